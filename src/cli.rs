use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "mediagate")]
#[command(author, version, about = "Streaming gateway for yt-dlp: metadata, downloads and live progress", long_about = None)]
pub struct Cli {
    /// Path to a TOML config file (default: ./mediagate.toml if present)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the HTTP server
    Serve {
        /// Override the configured bind address
        #[arg(short, long)]
        bind: Option<SocketAddr>,
    },

    /// Print normalized metadata for a URL as JSON
    Info {
        /// Media URL
        url: String,
    },

    /// Check that yt-dlp is installed and print its version
    Check,
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
