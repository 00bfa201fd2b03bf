//! Agent configuration loaded from environment variables.
//!
//! | Variable                              | Required | Default                  |
//! |---------------------------------------|----------|--------------------------|
//! | `RESOURCE_ID`                         | yes      | --                       |
//! | `BACKEND_URL`                         | no       | `http://localhost:8080`  |
//! | `STATUS_INTERVAL_SECONDS`             | no       | `30`                     |
//! | `STATUS_CHECK_INTERVAL_SECONDS`       | no       | half the status interval |
//! | `TIMEOUT_DURATION_MINUTES`            | no       | `30`                     |
//! | `RECONCILE_STRATEGY`                  | no       | `status`                 |
//! | `DEBOUNCE_MILLIS`                     | no       | `2000`                   |
//! | `AUTO_RELEASE_ENABLED`                | no       | `false`                  |
//! | `AUTO_RELEASE_PROBABILITY`            | no       | `0.05`                   |
//! | `AUTO_RELEASE_MIN_MINUTES`            | no       | `5`                      |
//! | `AUTO_RELEASE_CHECK_INTERVAL_SECONDS` | no       | `60`                     |
//! | `HOST`                                | no       | `0.0.0.0`                |
//! | `PORT`                                | no       | `3000`                   |

use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use iotm_core::release::ProbabilisticPolicy;

pub const DEFAULT_BACKEND_URL: &str = "http://localhost:8080";
const DEFAULT_STATUS_INTERVAL_SECS: u64 = 30;
const DEFAULT_TIMEOUT_MINUTES: i64 = 30;
const DEFAULT_DEBOUNCE_MILLIS: i64 = 2000;
const DEFAULT_AUTO_RELEASE_PROBABILITY: f64 = 0.05;
const DEFAULT_AUTO_RELEASE_MIN_MINUTES: i64 = 5;
const DEFAULT_AUTO_RELEASE_CHECK_SECS: u64 = 60;
const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 3000;

/// Longest hold the agent will grant on its own (one year).
const MAX_TIMEOUT_MINUTES: i64 = 525_600;

/// Errors raised while loading configuration. All of them are fatal at
/// startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} environment variable is required")]
    Missing(&'static str),

    #[error("{var} has invalid value '{value}': {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

/// How the agent learns about the authority's view of the resource.
///
/// The two policies disagree on who owns the predicted end time, so a
/// deployment picks exactly one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileStrategy {
    /// Pull the canonical status; the authority supplies the deadline.
    StatusPull,
    /// Poll the reserve/release command slots; the agent owns the deadline.
    CommandPull,
}

impl FromStr for ReconcileStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "status" | "status-pull" => Ok(Self::StatusPull),
            "commands" | "command-pull" => Ok(Self::CommandPull),
            other => Err(format!(
                "unknown strategy '{other}', use 'status' or 'commands'"
            )),
        }
    }
}

/// Probabilistic release settings.
#[derive(Debug, Clone)]
pub struct AutoReleaseConfig {
    pub enabled: bool,
    pub probability: f64,
    pub min_hold: chrono::Duration,
    pub check_interval: Duration,
}

/// Everything one agent instance needs to run.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub resource_id: String,
    /// Authority base URL without a trailing slash.
    pub backend_url: String,
    /// Reporter cadence.
    pub status_interval: Duration,
    /// Reconciler (or command check) cadence.
    pub check_interval: Duration,
    /// Hold the agent grants when it owns the deadline.
    pub hold_duration: chrono::Duration,
    pub strategy: ReconcileStrategy,
    /// A reconcile fold is skipped if the last push is younger than this.
    pub debounce_window: chrono::Duration,
    pub auto_release: AutoReleaseConfig,
    pub host: String,
    pub port: u16,
}

impl AgentConfig {
    /// Defaults for everything except the resource and authority.
    pub fn new(resource_id: impl Into<String>, backend_url: impl Into<String>) -> Self {
        let status_interval = Duration::from_secs(DEFAULT_STATUS_INTERVAL_SECS);
        Self {
            resource_id: resource_id.into(),
            backend_url: backend_url.into().trim_end_matches('/').to_string(),
            status_interval,
            check_interval: default_check_interval(status_interval),
            hold_duration: chrono::Duration::minutes(DEFAULT_TIMEOUT_MINUTES),
            strategy: ReconcileStrategy::StatusPull,
            debounce_window: chrono::Duration::milliseconds(DEFAULT_DEBOUNCE_MILLIS),
            auto_release: AutoReleaseConfig {
                enabled: false,
                probability: DEFAULT_AUTO_RELEASE_PROBABILITY,
                min_hold: chrono::Duration::minutes(DEFAULT_AUTO_RELEASE_MIN_MINUTES),
                check_interval: Duration::from_secs(DEFAULT_AUTO_RELEASE_CHECK_SECS),
            },
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
        }
    }

    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let resource_id = lookup("RESOURCE_ID")
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .ok_or(ConfigError::Missing("RESOURCE_ID"))?;

        let backend_url = lookup("BACKEND_URL")
            .unwrap_or_else(|| DEFAULT_BACKEND_URL.to_string());

        let mut config = Self::new(resource_id, backend_url);

        let status_secs: u64 = parse_var(
            &lookup,
            "STATUS_INTERVAL_SECONDS",
            DEFAULT_STATUS_INTERVAL_SECS,
        )?;
        config.status_interval = Duration::from_secs(require_positive(
            "STATUS_INTERVAL_SECONDS",
            status_secs,
        )?);

        config.check_interval = match lookup("STATUS_CHECK_INTERVAL_SECONDS") {
            Some(_) => {
                let secs: u64 = parse_var(&lookup, "STATUS_CHECK_INTERVAL_SECONDS", 0)?;
                Duration::from_secs(require_positive("STATUS_CHECK_INTERVAL_SECONDS", secs)?)
            }
            None => default_check_interval(config.status_interval),
        };

        let timeout_minutes: i64 =
            parse_var(&lookup, "TIMEOUT_DURATION_MINUTES", DEFAULT_TIMEOUT_MINUTES)?;
        if !(1..=MAX_TIMEOUT_MINUTES).contains(&timeout_minutes) {
            return Err(invalid(
                "TIMEOUT_DURATION_MINUTES",
                timeout_minutes,
                format!("must be between 1 and {MAX_TIMEOUT_MINUTES}"),
            ));
        }
        config.hold_duration = chrono::Duration::minutes(timeout_minutes);

        if let Some(raw) = lookup("RECONCILE_STRATEGY") {
            config.strategy = raw
                .parse()
                .map_err(|reason| invalid("RECONCILE_STRATEGY", &raw, reason))?;
        }

        let debounce_millis: i64 = parse_var(&lookup, "DEBOUNCE_MILLIS", DEFAULT_DEBOUNCE_MILLIS)?;
        if debounce_millis < 0 {
            return Err(invalid(
                "DEBOUNCE_MILLIS",
                debounce_millis,
                "must not be negative",
            ));
        }
        config.debounce_window = chrono::Duration::milliseconds(debounce_millis);

        config.auto_release.enabled = lookup("AUTO_RELEASE_ENABLED")
            .is_some_and(|v| v.trim().eq_ignore_ascii_case("true"));

        let probability: f64 = parse_var(
            &lookup,
            "AUTO_RELEASE_PROBABILITY",
            DEFAULT_AUTO_RELEASE_PROBABILITY,
        )?;
        if !(0.0..=1.0).contains(&probability) {
            return Err(invalid(
                "AUTO_RELEASE_PROBABILITY",
                probability,
                "must be between 0 and 1",
            ));
        }
        config.auto_release.probability = probability;

        let min_minutes: i64 = parse_var(
            &lookup,
            "AUTO_RELEASE_MIN_MINUTES",
            DEFAULT_AUTO_RELEASE_MIN_MINUTES,
        )?;
        if !(0..=MAX_TIMEOUT_MINUTES).contains(&min_minutes) {
            return Err(invalid(
                "AUTO_RELEASE_MIN_MINUTES",
                min_minutes,
                format!("must be between 0 and {MAX_TIMEOUT_MINUTES}"),
            ));
        }
        config.auto_release.min_hold = chrono::Duration::minutes(min_minutes);

        let check_secs: u64 = parse_var(
            &lookup,
            "AUTO_RELEASE_CHECK_INTERVAL_SECONDS",
            DEFAULT_AUTO_RELEASE_CHECK_SECS,
        )?;
        config.auto_release.check_interval = Duration::from_secs(require_positive(
            "AUTO_RELEASE_CHECK_INTERVAL_SECONDS",
            check_secs,
        )?);

        config.host = lookup("HOST").unwrap_or_else(|| DEFAULT_HOST.to_string());
        config.port = parse_var(&lookup, "PORT", DEFAULT_PORT)?;

        Ok(config)
    }

    /// Probabilistic release policy, if enabled.
    pub fn probabilistic_policy(&self) -> Option<ProbabilisticPolicy> {
        self.auto_release.enabled.then(|| ProbabilisticPolicy {
            probability: self.auto_release.probability,
            min_hold: self.auto_release.min_hold,
        })
    }
}

/// The reconciler runs at half the reporter cadence, never below a second.
fn default_check_interval(status_interval: Duration) -> Duration {
    (status_interval / 2).max(Duration::from_secs(1))
}

fn parse_var<T, F>(lookup: &F, var: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(var) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e: T::Err| invalid(var, &raw, e.to_string())),
        None => Ok(default),
    }
}

fn require_positive(var: &'static str, value: u64) -> Result<u64, ConfigError> {
    if value == 0 {
        return Err(invalid(var, value, "must be greater than zero"));
    }
    Ok(value)
}

fn invalid(var: &'static str, value: impl Display, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        var,
        value: value.to_string(),
        reason: reason.into(),
    }
}
