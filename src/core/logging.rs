//! Logging initialization and startup diagnostics

use thiserror::Error;
use tracing_subscriber::filter::ParseError;
use tracing_subscriber::EnvFilter;

use crate::core::config::GatewayConfig;

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("Invalid log level '{level}': {source}")]
    InvalidLevel {
        level: String,
        #[source]
        source: ParseError,
    },
    #[error("Failed to initialize logger: {0}")]
    Init(Box<dyn std::error::Error + Send + Sync>),
}

/// Initialize the global tracing subscriber.
///
/// `RUST_LOG` wins over `default_level` when set. Output goes to stderr so
/// stdout stays clean for the `info` command.
///
/// # Returns
/// * `Ok(())` - Subscriber installed
/// * `Err(LoggingError)` - Bad filter directive or a subscriber was already set
pub fn init_logger(default_level: &str) -> Result<(), LoggingError> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(default_level).map_err(|source| LoggingError::InvalidLevel {
            level: default_level.to_string(),
            source,
        })?,
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(LoggingError::Init)?;

    Ok(())
}

/// Logs the effective configuration at startup.
pub fn log_configuration(config: &GatewayConfig) {
    tracing::info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    tracing::info!("mediagate configuration");
    tracing::info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    tracing::info!("bind address:       {}", config.bind_addr);
    tracing::info!("yt-dlp binary:      {}", config.ytdlp_bin);
    tracing::info!("allowed hosts:      {}", config.allowed_hosts.join(", "));
    tracing::info!(
        "download caps:      {} MiB / {}s",
        config.limits.max_download_bytes / (1024 * 1024),
        config.limits.max_download_secs
    );
    tracing::info!("metadata timeout:   {}s", config.limits.metadata_timeout_secs);
    tracing::info!("progress timeout:   {}s", config.limits.progress_timeout_secs);
}
