//! yt-dlp invocation shapes
//!
//! The gateway runs yt-dlp in exactly three modes, and this module is the only
//! place their argument vectors are assembled:
//! - metadata dump (`--dump-json`)
//! - one format streamed to stdout (`-f <id> -o -`)
//! - a quality tier streamed to stdout with `--newline --progress` on stderr
//!
//! The URL always comes last, after `--`, so neither it nor the format id can
//! be parsed as an option.

use std::process::Output;
use std::time::Duration;
use url::Url;

use crate::core::config::GatewayConfig;
use crate::core::process::{ProcessError, ProcessSession, ToolRunner};

/// Resolution ceilings offered as progress-relay tiers.
pub const SUPPORTED_HEIGHTS: &[u32] = &[2160, 1440, 1080, 720, 480, 360];

/// Timeout for `yt-dlp --version`
const VERSION_TIMEOUT: Duration = Duration::from_secs(10);

/// Coarse quality choice for the progress relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QualityTier {
    /// Best video at or below this height, merged with best audio
    MaxHeight(u32),
    /// Audio extracted to MP3
    Audio,
    /// Anything unrecognised falls back to yt-dlp's `best`
    Best,
}

impl QualityTier {
    /// Parses a tier label such as `"720p"` or `"Audio Only (MP3)"`.
    pub fn parse(s: &str) -> Self {
        let normalized = s.trim().to_lowercase();
        match normalized.as_str() {
            "audio" | "audio only" | "audio only (mp3)" | "mp3" => return Self::Audio,
            _ => {}
        }

        normalized
            .strip_suffix('p')
            .and_then(|h| h.parse::<u32>().ok())
            .filter(|h| SUPPORTED_HEIGHTS.contains(h))
            .map(Self::MaxHeight)
            .unwrap_or(Self::Best)
    }

    /// Label for logs.
    pub fn label(&self) -> String {
        match self {
            Self::MaxHeight(h) => format!("{}p", h),
            Self::Audio => "audio".to_string(),
            Self::Best => "best".to_string(),
        }
    }

    /// Format-selection arguments for this tier.
    pub fn selector_args(&self) -> Vec<String> {
        match self {
            Self::MaxHeight(h) => vec![
                "-f".into(),
                format!("bestvideo[height<={}]+bestaudio", h),
                "--merge-output-format".into(),
                "mp4".into(),
            ],
            Self::Best => vec![
                "-f".into(),
                "best".into(),
                "--merge-output-format".into(),
                "mp4".into(),
            ],
            Self::Audio => vec![
                "-f".into(),
                "bestaudio".into(),
                "-x".into(),
                "--audio-format".into(),
                "mp3".into(),
                "--audio-quality".into(),
                "0".into(),
            ],
        }
    }
}

/// One of the three argument-vector shapes.
#[derive(Debug, Clone, Copy)]
pub enum Invocation<'a> {
    DumpMetadata { url: &'a Url },
    StreamFormat { url: &'a Url, format_id: &'a str },
    StreamWithProgress { url: &'a Url, tier: QualityTier },
}

impl Invocation<'_> {
    pub fn args(&self, socket_timeout_secs: u64) -> Vec<String> {
        let mut args: Vec<String> = Vec::new();

        let url = match self {
            Invocation::DumpMetadata { url } => {
                args.push("--dump-json".into());
                url
            }
            Invocation::StreamFormat { url, format_id } => {
                args.extend(["-f".to_string(), format_id.to_string()]);
                args.extend(["-o".to_string(), "-".to_string(), "--quiet".to_string()]);
                url
            }
            Invocation::StreamWithProgress { url, tier } => {
                args.extend(tier.selector_args());
                args.extend(["--newline".to_string(), "--progress".to_string()]);
                args.extend(["-o".to_string(), "-".to_string()]);
                url
            }
        };

        args.extend([
            "--no-playlist".to_string(),
            "--no-warnings".to_string(),
            "--socket-timeout".to_string(),
            socket_timeout_secs.to_string(),
            "--".to_string(),
            url.as_str().to_string(),
        ]);
        args
    }
}

/// yt-dlp bound to a binary path and the shared socket timeout.
#[derive(Debug, Clone)]
pub struct YtDlp {
    runner: ToolRunner,
    socket_timeout_secs: u64,
}

impl YtDlp {
    pub fn new(bin: impl Into<String>, socket_timeout_secs: u64) -> Self {
        Self {
            runner: ToolRunner::new(bin),
            socket_timeout_secs,
        }
    }

    pub fn from_config(config: &GatewayConfig) -> Self {
        Self::new(config.ytdlp_bin.clone(), config.limits.socket_timeout_secs)
    }

    pub fn bin(&self) -> &str {
        self.runner.bin()
    }

    pub fn args(&self, invocation: &Invocation<'_>) -> Vec<String> {
        invocation.args(self.socket_timeout_secs)
    }

    /// Runs a bounded call/response invocation (metadata dump).
    pub async fn run(&self, invocation: &Invocation<'_>, timeout: Duration) -> Result<Output, ProcessError> {
        let args = self.args(invocation);
        tracing::info!("Running {} {}", self.bin(), args.join(" "));
        self.runner.output(&args, timeout).await
    }

    /// Starts a streaming invocation; the caller owns the pipes.
    pub fn spawn(&self, invocation: &Invocation<'_>) -> Result<ProcessSession, ProcessError> {
        let args = self.args(invocation);
        tracing::info!("Spawning {} {}", self.bin(), args.join(" "));
        self.runner.spawn(&args)
    }

    /// Returns `yt-dlp --version` output.
    pub async fn version(&self) -> Result<String, ProcessError> {
        let output = self.runner.output(&["--version".to_string()], VERSION_TIMEOUT).await?;
        let version = String::from_utf8_lossy(&output.stdout).trim().to_string();

        if !output.status.success() || version.is_empty() {
            return Err(ProcessError::Io(std::io::Error::other(format!(
                "{} --version produced no usable output (status: {})",
                self.bin(),
                output.status
            ))));
        }
        Ok(version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn url() -> Url {
        Url::parse("https://www.youtube.com/watch?v=dQw4w9WgXcQ").unwrap()
    }

    #[test]
    fn test_quality_tier_parse() {
        let cases = vec![
            ("720p", QualityTier::MaxHeight(720)),
            ("2160p", QualityTier::MaxHeight(2160)),
            (" 1080P ", QualityTier::MaxHeight(1080)),
            ("Audio Only (MP3)", QualityTier::Audio),
            ("audio", QualityTier::Audio),
            ("mp3", QualityTier::Audio),
            ("999p", QualityTier::Best),
            ("p", QualityTier::Best),
            ("best", QualityTier::Best),
            ("", QualityTier::Best),
        ];

        for (input, expected) in cases {
            assert_eq!(QualityTier::parse(input), expected, "Failed for: {:?}", input);
        }
    }

    #[test]
    fn test_quality_tier_selector_args() {
        assert_eq!(
            QualityTier::MaxHeight(720).selector_args(),
            vec!["-f", "bestvideo[height<=720]+bestaudio", "--merge-output-format", "mp4"]
        );
        assert_eq!(
            QualityTier::Audio.selector_args(),
            vec!["-f", "bestaudio", "-x", "--audio-format", "mp3", "--audio-quality", "0"]
        );
        assert_eq!(
            QualityTier::Best.selector_args(),
            vec!["-f", "best", "--merge-output-format", "mp4"]
        );
    }

    #[test]
    fn test_dump_metadata_args() {
        let url = url();
        let args = Invocation::DumpMetadata { url: &url }.args(30);
        assert_eq!(
            args,
            vec![
                "--dump-json",
                "--no-playlist",
                "--no-warnings",
                "--socket-timeout",
                "30",
                "--",
                "https://www.youtube.com/watch?v=dQw4w9WgXcQ",
            ]
        );
    }

    #[test]
    fn test_stream_format_args() {
        let url = url();
        let args = Invocation::StreamFormat {
            url: &url,
            format_id: "140",
        }
        .args(15);

        assert_eq!(&args[..5], &["-f", "140", "-o", "-", "--quiet"]);
        assert_eq!(args[args.len() - 2], "--");
        assert_eq!(args.last().map(String::as_str), Some(url.as_str()));
        assert!(args.windows(2).any(|w| w[0] == "--socket-timeout" && w[1] == "15"));
    }

    #[test]
    fn test_progress_args_enable_newline_progress() {
        let url = url();
        let args = Invocation::StreamWithProgress {
            url: &url,
            tier: QualityTier::MaxHeight(480),
        }
        .args(30);

        assert_eq!(args[1], "bestvideo[height<=480]+bestaudio");
        assert!(args.contains(&"--newline".to_string()));
        assert!(args.contains(&"--progress".to_string()));
        assert!(!args.contains(&"--quiet".to_string()));
        assert!(args.windows(2).any(|w| w[0] == "-o" && w[1] == "-"));
        assert_eq!(args.last().map(String::as_str), Some(url.as_str()));
    }

    #[test]
    fn test_from_config_uses_bin_and_socket_timeout() {
        let mut config = GatewayConfig::default();
        config.ytdlp_bin = "/opt/yt-dlp".to_string();
        config.limits.socket_timeout_secs = 7;

        let ytdlp = YtDlp::from_config(&config);
        let url = url();
        assert_eq!(ytdlp.bin(), "/opt/yt-dlp");
        assert!(ytdlp
            .args(&Invocation::DumpMetadata { url: &url })
            .windows(2)
            .any(|w| w[0] == "--socket-timeout" && w[1] == "7"));
    }
}
