//! Gateway configuration
//!
//! Loaded once at start-up and never mutated afterwards. Sources, lowest
//! priority first:
//! 1. Built-in defaults ([`GatewayConfig::default`])
//! 2. Optional TOML file (`mediagate.toml` or `--config <path>`)
//! 3. Environment variables prefixed `MEDIAGATE_`, nested keys split on `__`
//!    (e.g. `MEDIAGATE_LIMITS__MAX_DOWNLOAD_BYTES=1048576`)

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::core::validation::DEFAULT_ALLOWED_HOSTS;

/// Environment variable prefix for overrides
pub const ENV_PREFIX: &str = "MEDIAGATE_";

/// Config file looked up in the working directory when `--config` is not given
pub const DEFAULT_CONFIG_FILE: &str = "mediagate.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Address the HTTP server listens on
    pub bind_addr: SocketAddr,
    /// yt-dlp binary (name on PATH or absolute path)
    pub ytdlp_bin: String,
    /// Domains accepted by the URL validator (subdomains included)
    pub allowed_hosts: Vec<String>,
    /// Default tracing filter, overridden by `RUST_LOG`
    pub log_level: String,
    pub limits: Limits,
}

/// Byte and time caps. All durations are wall-clock seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Limits {
    /// Abort a download once more than this many bytes were received
    pub max_download_bytes: u64,
    /// Abort a download that has not finished after this long
    pub max_download_secs: u64,
    /// Bounded wait for `--dump-json`
    pub metadata_timeout_secs: u64,
    /// Abort a progress-relay session that has not finished after this long
    pub progress_timeout_secs: u64,
    /// Passed to yt-dlp as `--socket-timeout`
    pub socket_timeout_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 3000)),
            ytdlp_bin: "yt-dlp".to_string(),
            allowed_hosts: DEFAULT_ALLOWED_HOSTS.iter().map(|h| h.to_string()).collect(),
            log_level: "info".to_string(),
            limits: Limits::default(),
        }
    }
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_download_bytes: 1000 * 1024 * 1024,
            max_download_secs: 55,
            metadata_timeout_secs: 30,
            progress_timeout_secs: 600,
            socket_timeout_secs: 30,
        }
    }
}

/// Caps applied to one streaming session (download or progress relay).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamLimits {
    pub max_bytes: u64,
    pub max_duration: Duration,
}

impl StreamLimits {
    pub fn new(max_bytes: u64, max_duration: Duration) -> Self {
        Self { max_bytes, max_duration }
    }
}

impl Limits {
    pub fn download(&self) -> StreamLimits {
        StreamLimits::new(self.max_download_bytes, Duration::from_secs(self.max_download_secs))
    }

    /// Progress relay discards media bytes, so only the time cap matters.
    pub fn progress(&self) -> StreamLimits {
        StreamLimits::new(u64::MAX, Duration::from_secs(self.progress_timeout_secs))
    }

    pub fn metadata_timeout(&self) -> Duration {
        Duration::from_secs(self.metadata_timeout_secs)
    }
}

impl GatewayConfig {
    /// Loads defaults → TOML file → `MEDIAGATE_*` environment.
    ///
    /// An explicit `path` must exist; the default file is optional.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(GatewayConfig::default()));

        match path {
            Some(path) => {
                if !path.exists() {
                    return Err(ConfigError::Invalid(format!(
                        "config file not found: {}",
                        path.display()
                    )));
                }
                figment = figment.merge(Toml::file(path));
            }
            None => {
                figment = figment.merge(Toml::file(DEFAULT_CONFIG_FILE));
            }
        }

        Self::from_figment(figment.merge(Env::prefixed(ENV_PREFIX).split("__")))
    }

    /// Extracts and validates a config from an assembled figment.
    pub fn from_figment(figment: Figment) -> Result<Self, ConfigError> {
        let config: GatewayConfig = figment.extract().map_err(Box::new)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ytdlp_bin.trim().is_empty() {
            return Err(ConfigError::Invalid("ytdlp_bin must not be empty".to_string()));
        }
        if self.allowed_hosts.is_empty() || self.allowed_hosts.iter().any(|h| h.trim().is_empty()) {
            return Err(ConfigError::Invalid(
                "allowed_hosts must list at least one non-empty domain".to_string(),
            ));
        }

        let limits = &self.limits;
        let zero_field = [
            ("max_download_bytes", limits.max_download_bytes),
            ("max_download_secs", limits.max_download_secs),
            ("metadata_timeout_secs", limits.metadata_timeout_secs),
            ("progress_timeout_secs", limits.progress_timeout_secs),
            ("socket_timeout_secs", limits.socket_timeout_secs),
        ]
        .into_iter()
        .find(|(_, value)| *value == 0);

        if let Some((name, _)) = zero_field {
            return Err(ConfigError::Invalid(format!("limits.{} must be greater than zero", name)));
        }

        Ok(())
    }
}
