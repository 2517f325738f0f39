use thiserror::Error;

/// Terminal outcome of a streaming session other than a clean exit.
///
/// Ends the outbound body (download) or the event stream (progress relay).
/// Client disconnects are not represented here: they are cancellations and
/// are only logged.
#[derive(Debug, Error)]
pub enum StreamError {
    /// yt-dlp could not be started
    #[error("failed to start downloader: {0}")]
    Spawn(String),
    /// Received more bytes than the configured cap
    #[error("download exceeded {limit} bytes")]
    SizeLimit { limit: u64 },
    /// Wall-clock deadline reached before the process finished
    #[error("download timed out after {}s", .0.as_secs_f64())]
    Timeout(std::time::Duration),
    /// Process finished with a nonzero exit code (`None` when killed by a signal)
    #[error("downloader exited with code {0:?}")]
    ExitStatus(Option<i32>),
    /// Reading a pipe or waiting for the process failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StreamError {
    /// Returns subcategory for log fields
    pub fn subcategory(&self) -> &'static str {
        match self {
            StreamError::Spawn(_) => "spawn",
            StreamError::SizeLimit { .. } => "size_limit",
            StreamError::Timeout(_) => "timeout",
            StreamError::ExitStatus(_) => "exit_status",
            StreamError::Io(_) => "io",
        }
    }

    /// Byte or time cap breach (as opposed to an upstream failure)
    pub fn is_resource_limit(&self) -> bool {
        matches!(self, StreamError::SizeLimit { .. } | StreamError::Timeout(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_stream_error_display() {
        let err = StreamError::SizeLimit { limit: 1024 };
        assert_eq!(err.to_string(), "download exceeded 1024 bytes");

        let err = StreamError::Timeout(Duration::from_millis(1500));
        assert_eq!(err.to_string(), "download timed out after 1.5s");

        let err = StreamError::ExitStatus(Some(1));
        assert_eq!(err.to_string(), "downloader exited with code Some(1)");
    }

    #[test]
    fn test_stream_error_subcategory() {
        assert_eq!(StreamError::Spawn("".into()).subcategory(), "spawn");
        assert_eq!(StreamError::SizeLimit { limit: 1 }.subcategory(), "size_limit");
        assert_eq!(StreamError::Timeout(Duration::ZERO).subcategory(), "timeout");
        assert_eq!(StreamError::ExitStatus(None).subcategory(), "exit_status");
        assert_eq!(
            StreamError::Io(std::io::Error::other("boom")).subcategory(),
            "io"
        );
    }

    #[test]
    fn test_resource_limit_classification() {
        assert!(StreamError::SizeLimit { limit: 1 }.is_resource_limit());
        assert!(StreamError::Timeout(Duration::from_secs(1)).is_resource_limit());
        assert!(!StreamError::ExitStatus(Some(2)).is_resource_limit());
        assert!(!StreamError::Spawn("missing".into()).is_resource_limit());
    }
}
