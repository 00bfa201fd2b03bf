//! Client side of the authority's device API.
//!
//! [`Authority`] is the seam between the agent and the remote service that
//! holds the canonical reservation ledger. [`HttpAuthority`] is the
//! production implementation over [`reqwest`]; tests plug in their own.

use std::time::Duration;

use async_trait::async_trait;
use iotm_core::wire::{AutoReleaseNotice, CommandKind, DeviceCommand, RemoteStatus, StatusReport};
use reqwest::{StatusCode, Url};
use serde::de::DeserializeOwned;

/// Upper bound on any single call to the authority.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Tighter bound for the polling reads (status and command slots).
const READ_TIMEOUT: Duration = Duration::from_secs(3);

/// Errors from talking to the authority.
///
/// None of them are fatal: callers log and wait for the next tick.
#[derive(Debug, thiserror::Error)]
pub enum AuthorityError {
    /// Network, DNS, TLS or timeout failure.
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The authority answered with an unexpected non-2xx status.
    #[error("Authority API error ({status}): {body}")]
    Api { status: u16, body: String },

    /// A 2xx response whose body could not be parsed.
    #[error("Malformed authority response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Invalid authority URL '{0}'")]
    InvalidUrl(String),
}

impl AuthorityError {
    /// Whether the authority could not be reached at all.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, Self::Request(e) if e.is_connect() || e.is_timeout())
    }
}

/// Operations the agent needs from the authority.
#[async_trait]
pub trait Authority: Send + Sync {
    /// `POST /api/v1/devices/status`.
    async fn push_status(&self, report: &StatusReport) -> Result<(), AuthorityError>;

    /// `GET /api/v1/devices/{resourceId}/status`; `Ok(None)` when the
    /// resource is unknown to the authority.
    async fn fetch_status(&self, resource_id: &str) -> Result<Option<RemoteStatus>, AuthorityError>;

    /// `GET /api/v1/devices/{resourceId}/commands/{kind}`; `Ok(None)` when
    /// no command is pending.
    async fn fetch_command(
        &self,
        resource_id: &str,
        kind: CommandKind,
    ) -> Result<Option<DeviceCommand>, AuthorityError>;

    /// `POST /api/v1/devices/{resourceId}/auto-release`.
    async fn notify_auto_release(
        &self,
        resource_id: &str,
        notice: &AutoReleaseNotice,
    ) -> Result<(), AuthorityError>;
}

/// HTTP client for the authority's `/api/v1/devices` endpoints.
#[derive(Debug)]
pub struct HttpAuthority {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpAuthority {
    /// Create a client for the authority at `base_url`, e.g.
    /// `http://localhost:8080`.
    pub fn new(base_url: &str) -> Result<Self, AuthorityError> {
        let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        let base_url = Url::parse(base_url)
            .map_err(|_| AuthorityError::InvalidUrl(base_url.to_string()))?;
        if base_url.cannot_be_a_base() {
            return Err(AuthorityError::InvalidUrl(base_url.to_string()));
        }
        Ok(Self { client, base_url })
    }

    // ---- private helpers ----

    /// Join path segments onto the base URL, percent-encoding each one.
    fn url(&self, segments: &[&str]) -> Result<Url, AuthorityError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| AuthorityError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(["api", "v1", "devices"])
            .extend(segments);
        Ok(url)
    }

    /// Turn a non-2xx response into [`AuthorityError::Api`].
    async fn ensure_success(
        response: reqwest::Response,
    ) -> Result<reqwest::Response, AuthorityError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(AuthorityError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    /// Read an optional JSON body: 404, 204 and empty bodies mean "nothing".
    async fn parse_optional<T: DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<Option<T>, AuthorityError> {
        if matches!(
            response.status(),
            StatusCode::NOT_FOUND | StatusCode::NO_CONTENT
        ) {
            return Ok(None);
        }
        let response = Self::ensure_success(response).await?;
        let body = response.text().await?;
        if body.trim().is_empty() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_str(&body)?))
    }
}

#[async_trait]
impl Authority for HttpAuthority {
    async fn push_status(&self, report: &StatusReport) -> Result<(), AuthorityError> {
        let response = self
            .client
            .post(self.url(&["status"])?)
            .json(report)
            .send()
            .await?;
        Self::ensure_success(response).await?;
        Ok(())
    }

    async fn fetch_status(
        &self,
        resource_id: &str,
    ) -> Result<Option<RemoteStatus>, AuthorityError> {
        let response = self
            .client
            .get(self.url(&[resource_id, "status"])?)
            .timeout(READ_TIMEOUT)
            .send()
            .await?;
        Self::parse_optional(response).await
    }

    async fn fetch_command(
        &self,
        resource_id: &str,
        kind: CommandKind,
    ) -> Result<Option<DeviceCommand>, AuthorityError> {
        let response = self
            .client
            .get(self.url(&[resource_id, "commands", kind.path_segment()])?)
            .timeout(READ_TIMEOUT)
            .send()
            .await?;
        Self::parse_optional(response).await
    }

    async fn notify_auto_release(
        &self,
        resource_id: &str,
        notice: &AutoReleaseNotice,
    ) -> Result<(), AuthorityError> {
        let response = self
            .client
            .post(self.url(&[resource_id, "auto-release"])?)
            .json(notice)
            .send()
            .await?;
        Self::ensure_success(response).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn builds_device_urls_under_api_prefix() {
        let authority = HttpAuthority::new("http://authority:8080").unwrap();
        let url = authority.url(&["lab-01", "commands", "reserve"]).unwrap();
        assert_eq!(
            url.as_str(),
            "http://authority:8080/api/v1/devices/lab-01/commands/reserve"
        );
    }

    #[test]
    fn keeps_base_path_and_encodes_resource_id() {
        let authority = HttpAuthority::new("http://authority:8080/ledger/").unwrap();
        let url = authority.url(&["lab 01", "status"]).unwrap();
        assert_eq!(
            url.as_str(),
            "http://authority:8080/ledger/api/v1/devices/lab%2001/status"
        );
    }

    #[test]
    fn rejects_unusable_base_urls() {
        assert_matches!(
            HttpAuthority::new("not a url"),
            Err(AuthorityError::InvalidUrl(_))
        );
        assert_matches!(
            HttpAuthority::new("mailto:ops@example.com"),
            Err(AuthorityError::InvalidUrl(_))
        );
    }
}
