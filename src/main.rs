use anyhow::{Context, Result};
use dotenvy::dotenv;
use std::sync::Arc;

use mediagate::cli::{Cli, Commands};
use mediagate::core::validation::validate_media_url;
use mediagate::core::web_server::{start_web_server, AppState};
use mediagate::core::{init_logger, log_configuration, GatewayConfig};
use mediagate::download::{MetadataFetcher, YtDlp};

/// Main entry point for the gateway
///
/// Parses CLI arguments, loads configuration and dispatches to the subcommand.
///
/// # Errors
/// Returns an error if configuration, logging or the chosen command fails.
#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env if present
    let _ = dotenv();

    let cli = Cli::parse_args();
    let mut config = GatewayConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;

    init_logger(&config.log_level)?;

    match cli.command {
        Some(Commands::Serve { bind }) => {
            if let Some(addr) = bind {
                config.bind_addr = addr;
            }
            run_server(config).await
        }
        Some(Commands::Info { url }) => run_info(config, url).await,
        Some(Commands::Check) => run_check(config).await,
        None => {
            tracing::info!("No command specified, running server");
            run_server(config).await
        }
    }
}

/// Run the HTTP server until Ctrl-C
async fn run_server(config: GatewayConfig) -> Result<()> {
    log_configuration(&config);

    // A missing yt-dlp is not fatal at startup; requests fail with 502 instead
    match YtDlp::from_config(&config).version().await {
        Ok(version) => tracing::info!("yt-dlp version: {}", version),
        Err(e) => tracing::warn!("yt-dlp version probe failed: {}", e),
    }

    let addr = config.bind_addr;
    start_web_server(AppState::new(config), addr).await?;
    Ok(())
}

/// Print normalized metadata as JSON
async fn run_info(config: GatewayConfig, url: String) -> Result<()> {
    let url = validate_media_url(&url, config.allowed_hosts.as_slice())?;
    let fetcher = MetadataFetcher::new(Arc::new(YtDlp::from_config(&config)), config.limits.metadata_timeout());

    let info = fetcher.fetch(&url).await?;
    println!("{}", serde_json::to_string_pretty(&info)?);
    Ok(())
}

/// Print the yt-dlp version
async fn run_check(config: GatewayConfig) -> Result<()> {
    let ytdlp = YtDlp::from_config(&config);
    let version = ytdlp
        .version()
        .await
        .with_context(|| format!("'{}' is not usable", ytdlp.bin()))?;
    println!("{} {}", ytdlp.bin(), version);
    Ok(())
}
