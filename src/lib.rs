//! mediagate - streaming gateway in front of yt-dlp
//!
//! Fetches normalized metadata for a media URL and streams the selected
//! rendition (or live progress for a quality tier) back over HTTP, without
//! buffering the media on disk or in memory.
//!
//! # Module Structure
//!
//! - `core`: configuration, errors, logging, process control, validation, HTTP server
//! - `download`: yt-dlp invocations, format normalization, download and progress sessions

#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

pub mod cli;
pub mod core;
pub mod download;

#[cfg(all(test, unix))]
mod testing;

// Re-export commonly used types for convenience
pub use crate::core::web_server::{router, start_web_server, AppState};
pub use crate::core::{config, AppError, GatewayConfig};
