//! yt-dlp backed metadata, download streaming and progress relay

pub mod error;
pub mod formats;
pub mod metadata;
pub mod progress;
pub mod stream;
pub mod ytdlp;

// Re-exports for convenience
pub use error::StreamError;
pub use metadata::{MediaInfo, MetadataFetcher};
pub use progress::{ProgressEvent, ProgressRelay};
pub use stream::{DownloadStream, DownloadStreamer};
pub use ytdlp::{QualityTier, YtDlp};
