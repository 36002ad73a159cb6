//! Monitor configuration file format
//!
//! The file is TOML. Everything here mirrors the file layout one to one;
//! validation into [`Target`]s happens in [`super::loader`].

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::loader::load;
use super::target::Target;

/// Environment variable consulted for the push credential when the config
/// does not name another one.
pub const DEFAULT_CREDENTIAL_ENV: &str = "SERVER_CHAN_KEY";

/// Top-level configuration file
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MonitorConfig {
    /// Suppression window for identical alerts
    #[serde(default)]
    pub dedup_window: Option<RawDuration>,
    /// Delivery attempts per alert, including the first
    #[serde(default)]
    pub max_retry_attempts: Option<u32>,
    /// Where target state is persisted across restarts
    #[serde(default)]
    pub state_file: Option<PathBuf>,
    /// How long in-flight work may run after a shutdown request
    #[serde(default)]
    pub shutdown_grace: Option<RawDuration>,
    /// How ERROR check results feed the failure counters
    #[serde(default)]
    pub error_policy: ErrorPolicy,
    #[serde(default)]
    pub notification: NotificationSection,
    #[serde(default)]
    pub api: Option<ApiSection>,
    #[serde(default)]
    pub targets: Vec<TargetConfig>,
}

/// `[notification]` table
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NotificationSection {
    pub provider: Option<String>,
    pub endpoint: Option<String>,
    pub credential_env: Option<String>,
    pub request_timeout: Option<RawDuration>,
    pub retry_base_delay: Option<RawDuration>,
    pub retry_max_delay: Option<RawDuration>,
}

/// `[api]` table
#[derive(Debug, Clone, Deserialize)]
pub struct ApiSection {
    pub listen: String,
}

/// One `[[targets]]` entry
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TargetConfig {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub protocol: Option<String>,
    #[serde(default)]
    pub interval: Option<RawDuration>,
    #[serde(default)]
    pub timeout: Option<RawDuration>,
    #[serde(default)]
    pub failure_threshold: Option<u32>,
    #[serde(default)]
    pub expect: Option<ExpectConfig>,
    #[serde(default)]
    pub active_hours: Option<ActiveHoursConfig>,
}

/// `[targets.expect]` table
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExpectConfig {
    #[serde(default)]
    pub status: Vec<u16>,
    pub body_contains: Option<String>,
    pub body_regex: Option<String>,
}

/// `[targets.active_hours]` table
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ActiveHoursConfig {
    #[serde(default)]
    pub utc_offset_hours: i32,
    #[serde(default)]
    pub weekdays_only: bool,
    #[serde(default)]
    pub windows: Vec<String>,
}

/// A duration written either as integer seconds or as a string like
/// `"500ms"`, `"30s"`, `"5m"` or `"1h"`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum RawDuration {
    Seconds(u64),
    Text(String),
}

impl RawDuration {
    /// Resolve to a [`Duration`], naming `field` in the error.
    pub fn resolve(&self, field: &str) -> Result<Duration, ConfigError> {
        match self {
            RawDuration::Seconds(secs) => Ok(Duration::from_secs(*secs)),
            RawDuration::Text(text) => {
                parse_duration(text).ok_or_else(|| ConfigError::InvalidDuration {
                    field: field.to_string(),
                    value: text.clone(),
                })
            }
        }
    }
}

/// Resolve an optional duration, falling back to `default`.
pub(crate) fn resolve_or(
    raw: &Option<RawDuration>,
    field: &str,
    default: Duration,
) -> Result<Duration, ConfigError> {
    match raw {
        Some(raw) => raw.resolve(field),
        None => Ok(default),
    }
}

/// Parse a duration string like "5s", "500ms", "2m", "1h" or a bare number
/// of seconds.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(ms) = s.strip_suffix("ms") {
        ms.trim().parse::<u64>().ok().map(Duration::from_millis)
    } else if let Some(secs) = s.strip_suffix('s') {
        secs.trim().parse::<u64>().ok().map(Duration::from_secs)
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.trim()
            .parse::<u64>()
            .ok()
            .and_then(|m| m.checked_mul(60))
            .map(Duration::from_secs)
    } else if let Some(hours) = s.strip_suffix('h') {
        hours
            .trim()
            .parse::<u64>()
            .ok()
            .and_then(|h| h.checked_mul(3600))
            .map(Duration::from_secs)
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}

/// How ERROR check results are counted
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorPolicy {
    /// ERROR counts toward the failure threshold like DOWN
    #[default]
    CountAsFailure,
    /// ERROR is logged and leaves the counters untouched
    Ignore,
}

/// Push provider flavour
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    /// JSON POST with a bearer credential
    Webhook,
    /// Form POST to `{endpoint}/{credential}.send`
    ServerChan,
}

impl std::str::FromStr for Provider {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "webhook" => Ok(Provider::Webhook),
            "serverchan" | "server_chan" => Ok(Provider::ServerChan),
            other => Err(ConfigError::UnknownProvider(other.to_string())),
        }
    }
}

/// Resolved notification settings handed to the notifier at construction.
///
/// `credential: None` means notifications are disabled.
#[derive(Debug, Clone)]
pub struct NotificationConfig {
    pub provider: Provider,
    pub endpoint: String,
    pub credential: Option<String>,
    pub request_timeout: Duration,
    pub dedup_window: Duration,
    pub max_attempts: u32,
    pub retry_base_delay: Duration,
    pub retry_max_delay: Duration,
}

impl NotificationConfig {
    /// Disabled notifications with default timings
    pub fn disabled() -> Self {
        Self {
            provider: Provider::Webhook,
            endpoint: String::new(),
            credential: None,
            request_timeout: Duration::from_secs(8),
            dedup_window: Duration::from_secs(300),
            max_attempts: 3,
            retry_base_delay: Duration::from_secs(1),
            retry_max_delay: Duration::from_secs(30),
        }
    }

    /// Whether a credential is available
    pub fn is_enabled(&self) -> bool {
        self.credential.is_some()
    }
}

/// Fully validated runtime settings
#[derive(Debug, Clone)]
pub struct Settings {
    pub targets: Vec<Target>,
    pub notification: NotificationConfig,
    pub error_policy: ErrorPolicy,
    pub shutdown_grace: Duration,
    pub state_file: Option<PathBuf>,
    pub api_listen: Option<SocketAddr>,
}

impl MonitorConfig {
    /// Read and parse a config file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Parse config text
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Validate everything, reading the credential from the process
    /// environment.
    pub fn settings(&self) -> Result<Settings, ConfigError> {
        self.settings_with_env(|key| std::env::var(key).ok())
    }

    /// Validate everything, reading the credential through `lookup`.
    pub fn settings_with_env<F>(&self, lookup: F) -> Result<Settings, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let targets = load(&self.targets)?;

        let max_attempts = self.max_retry_attempts.unwrap_or(3);
        if max_attempts == 0 {
            return Err(ConfigError::NonPositive {
                scope: "global".to_string(),
                field: "max_retry_attempts",
            });
        }

        let section = &self.notification;
        let provider = match &section.provider {
            Some(p) => p.parse()?,
            None => Provider::Webhook,
        };
        let credential_env = section
            .credential_env
            .as_deref()
            .unwrap_or(DEFAULT_CREDENTIAL_ENV);
        let credential = lookup(credential_env)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());
        let endpoint = match (&section.endpoint, provider) {
            (Some(endpoint), _) => endpoint.trim_end_matches('/').to_string(),
            (None, Provider::ServerChan) => "https://sctapi.ftqq.com".to_string(),
            (None, Provider::Webhook) if credential.is_some() => {
                return Err(ConfigError::MissingField {
                    scope: "notification".to_string(),
                    field: "endpoint",
                })
            }
            (None, Provider::Webhook) => String::new(),
        };

        let notification = NotificationConfig {
            provider,
            endpoint,
            credential,
            request_timeout: resolve_or(
                &section.request_timeout,
                "notification.request_timeout",
                Duration::from_secs(8),
            )?,
            dedup_window: resolve_or(&self.dedup_window, "dedup_window", Duration::from_secs(300))?,
            max_attempts,
            retry_base_delay: resolve_or(
                &section.retry_base_delay,
                "notification.retry_base_delay",
                Duration::from_secs(1),
            )?,
            retry_max_delay: resolve_or(
                &section.retry_max_delay,
                "notification.retry_max_delay",
                Duration::from_secs(30),
            )?,
        };

        let api_listen = match &self.api {
            Some(api) => Some(api.listen.parse().map_err(|_| ConfigError::InvalidAddress {
                scope: "api".to_string(),
                address: api.listen.clone(),
                reason: "expected ip:port".to_string(),
            })?),
            None => None,
        };

        Ok(Settings {
            targets,
            notification,
            error_policy: self.error_policy,
            shutdown_grace: resolve_or(&self.shutdown_grace, "shutdown_grace", Duration::from_secs(5))?,
            state_file: self.state_file.clone(),
            api_listen,
        })
    }
}

/// Configuration errors. All of these are fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Config parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("{scope}: missing required field '{field}'")]
    MissingField { scope: String, field: &'static str },

    #[error("Duplicate target name: {0}")]
    DuplicateTarget(String),

    #[error("{scope}: unknown protocol '{protocol}'")]
    UnknownProtocol { scope: String, protocol: String },

    #[error("{scope}: '{field}' must be positive")]
    NonPositive { scope: String, field: &'static str },

    #[error("{scope}: '{field}' must not exceed {max:?}")]
    TooLong {
        scope: String,
        field: &'static str,
        max: Duration,
    },

    #[error("{scope}: invalid address '{address}': {reason}")]
    InvalidAddress {
        scope: String,
        address: String,
        reason: String,
    },

    #[error("{scope}: invalid response criteria: {reason}")]
    InvalidCriteria { scope: String, reason: String },

    #[error("{scope}: invalid active hours: {reason}")]
    InvalidSchedule { scope: String, reason: String },

    #[error("Invalid duration '{value}' for {field}")]
    InvalidDuration { field: String, value: String },

    #[error("Unknown notification provider: {0}")]
    UnknownProvider(String),
}
