//! Configuration for the modem exporter.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::payload::DeviceFamily;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] json5::Error),
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Complete exporter configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExporterConfig {
    /// Modem connection settings.
    #[serde(default)]
    pub modem: ModemConfig,

    /// Polling and retry settings.
    #[serde(default)]
    pub poll: PollConfig,

    /// Prometheus exporter settings.
    #[serde(default)]
    pub prometheus: PrometheusConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Modem management interface settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModemConfig {
    /// Device family; selects the login flow, endpoints and parser.
    #[serde(default)]
    pub family: DeviceFamily,

    /// Base URL of the management interface (default: "http://192.168.8.1").
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Login user name. Leave unset, together with the password, for devices
    /// that need no login. ZTE routers ignore it, but it must still be set
    /// whenever a password is.
    #[serde(default)]
    pub username: Option<String>,

    /// Login password.
    #[serde(default)]
    pub password: Option<String>,

    /// File holding the password (e.g. a systemd credential). Takes
    /// precedence over `password`.
    #[serde(default)]
    pub password_file: Option<PathBuf>,
}

fn default_base_url() -> String {
    "http://192.168.8.1".to_string()
}

impl Default for ModemConfig {
    fn default() -> Self {
        Self {
            family: DeviceFamily::default(),
            base_url: default_base_url(),
            username: None,
            password: None,
            password_file: None,
        }
    }
}

/// Login credentials.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl ModemConfig {
    /// Resolve the configured credentials, reading the password file if set.
    pub fn credentials(&self) -> Result<Option<Credentials>, ConfigError> {
        let Some(username) = &self.username else {
            return Ok(None);
        };

        let password = match &self.password_file {
            Some(path) => std::fs::read_to_string(path)?
                .trim_end_matches(['\r', '\n'])
                .to_string(),
            None => self.password.clone().ok_or_else(|| {
                ConfigError::Validation("username is set but no password".to_string())
            })?,
        };

        Ok(Some(Credentials::new(username.clone(), password)))
    }
}

/// Polling, timeout and retry settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollConfig {
    /// Interval between polls when the modem is healthy (seconds).
    #[serde(default = "default_interval")]
    pub interval_secs: u64,

    /// Ceiling for the failure backoff delay (seconds).
    #[serde(default = "default_max_backoff")]
    pub max_backoff_secs: u64,

    /// Timeout for each HTTP request to the modem (milliseconds).
    /// All attempts of one request, retry delays included, must fit in the
    /// poll interval.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,

    /// Extra attempts after a network-level error.
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,

    /// Delay between network retries (milliseconds).
    #[serde(default = "default_retry_delay")]
    pub retry_delay_ms: u64,

    /// Re-login after a session has been held this long (seconds).
    #[serde(default = "default_session_ttl")]
    pub session_ttl_secs: u64,
}

fn default_interval() -> u64 {
    15
}

fn default_max_backoff() -> u64 {
    300 // 5 minutes
}

fn default_request_timeout() -> u64 {
    4_000
}

fn default_retry_attempts() -> u32 {
    2
}

fn default_retry_delay() -> u64 {
    500
}

fn default_session_ttl() -> u64 {
    240 // HiLink drops idle sessions after ~5 minutes
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval(),
            max_backoff_secs: default_max_backoff(),
            request_timeout_ms: default_request_timeout(),
            retry_attempts: default_retry_attempts(),
            retry_delay_ms: default_retry_delay(),
            session_ttl_secs: default_session_ttl(),
        }
    }
}

impl PollConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_secs(self.max_backoff_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }

    /// Worst-case time for one request that times out on every attempt.
    pub fn retry_budget(&self) -> Duration {
        let attempts = self.retry_attempts.saturating_add(1);
        self.request_timeout()
            .saturating_mul(attempts)
            .saturating_add(self.retry_delay().saturating_mul(self.retry_attempts))
    }
}

/// Prometheus HTTP endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrometheusConfig {
    /// Address to listen on (default: "0.0.0.0:9091").
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Path for metrics endpoint (default: "/metrics").
    #[serde(default = "default_path")]
    pub path: String,

    /// Default labels to add to all metrics.
    #[serde(default)]
    pub default_labels: HashMap<String, String>,

    /// Device metric name prefix (default: "modem").
    #[serde(default = "default_prefix")]
    pub prefix: String,
}

fn default_listen() -> String {
    "0.0.0.0:9091".to_string()
}

fn default_path() -> String {
    "/metrics".to_string()
}

fn default_prefix() -> String {
    "modem".to_string()
}

impl Default for PrometheusConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            path: default_path(),
            default_labels: HashMap::new(),
            prefix: default_prefix(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log output format: "text" or "json".
    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl ExporterConfig {
    /// Load configuration from a JSON5 file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse configuration from a JSON5 string.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: ExporterConfig = json5::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let poll = &self.poll;

        if poll.interval_secs == 0 {
            return Err(ConfigError::Validation(
                "interval_secs must be > 0".to_string(),
            ));
        }

        if poll.request_timeout_ms == 0 {
            return Err(ConfigError::Validation(
                "request_timeout_ms must be > 0".to_string(),
            ));
        }

        // A hung modem must not be able to stretch one cycle into the next
        if poll.request_timeout() >= poll.interval() {
            return Err(ConfigError::Validation(format!(
                "request_timeout_ms ({}) must be shorter than the poll interval ({}s)",
                poll.request_timeout_ms, poll.interval_secs
            )));
        }

        // A request failing on every attempt must end before the cycle deadline
        if poll.retry_budget() >= poll.interval() {
            return Err(ConfigError::Validation(format!(
                "request_timeout_ms ({}) x {} attempts plus retry delays ({} ms) must be shorter than the poll interval ({}s)",
                poll.request_timeout_ms,
                poll.retry_attempts.saturating_add(1),
                poll.retry_delay_ms,
                poll.interval_secs
            )));
        }

        if poll.max_backoff_secs < poll.interval_secs {
            return Err(ConfigError::Validation(
                "max_backoff_secs must be >= interval_secs".to_string(),
            ));
        }

        let base_url = self.modem.base_url.trim();
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(ConfigError::Validation(format!(
                "Invalid modem base_url: {}",
                self.modem.base_url
            )));
        }

        if self.modem.username.is_some()
            && self.modem.password.is_none()
            && self.modem.password_file.is_none()
        {
            return Err(ConfigError::Validation(
                "username is set but neither password nor password_file".to_string(),
            ));
        }

        if self.modem.username.is_none()
            && (self.modem.password.is_some() || self.modem.password_file.is_some())
        {
            return Err(ConfigError::Validation(format!(
                "a password is set but no username; set modem.username for {} login",
                self.modem.family
            )));
        }

        // Validate listen address format
        if self
            .prometheus
            .listen
            .parse::<std::net::SocketAddr>()
            .is_err()
        {
            return Err(ConfigError::Validation(format!(
                "Invalid listen address: {}",
                self.prometheus.listen
            )));
        }

        // Validate path starts with /
        if !self.prometheus.path.starts_with('/') {
            return Err(ConfigError::Validation(
                "Metrics path must start with /".to_string(),
            ));
        }

        Ok(())
    }
}
