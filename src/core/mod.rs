//! Core utilities, configuration, and the HTTP boundary

pub mod config;
pub mod error;
pub mod logging;
pub mod process;
pub mod validation;
pub mod web_server;

// Re-exports for convenience
pub use config::{GatewayConfig, Limits, StreamLimits};
pub use error::{AppError, AppResult};
pub use logging::{init_logger, log_configuration, LoggingError};
