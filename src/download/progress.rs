//! Live download progress relayed from yt-dlp's stderr.
//!
//! yt-dlp runs with `--newline --progress -o -`: media goes to stdout (drained
//! and discarded so the tool never blocks on a full pipe) and one line per
//! progress tick goes to stderr, e.g.
//!
//! ```text
//! [download]  45.2% of ~10.00MiB at  1.23MiB/s ETA 00:10
//! ```
//!
//! Every parsed line becomes one [`ProgressEvent`]. A clean exit adds a final
//! 100% `complete` event; any failure just ends the stream.

use futures_util::Stream;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use url::Url;

use crate::core::config::StreamLimits;
use crate::core::process::{ProcessSession, DIAGNOSTIC_TAIL_LINES};
use crate::download::error::StreamError;
use crate::download::ytdlp::{Invocation, QualityTier, YtDlp};

/// Events buffered between the relay task and the SSE response
const EVENT_BUFFER: usize = 8;

/// How long a finished session waits for the stdout drain to hit EOF
const DRAIN_GRACE: Duration = Duration::from_secs(2);

/// `45.2%`, `100%`
static PERCENT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d{1,3}(?:\.\d+)?)%").expect("Failed to compile percent regex"));

/// `of ~10.00MiB`, `of 3.5GiB`
static TOTAL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"of\s+~?\s*(\d+(?:\.\d+)?\s*[KMGT]?i?B)\b").expect("Failed to compile total size regex")
});

/// `at 1.23MiB/s`; `at Unknown B/s` does not match
static SPEED_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"at\s+(\d+(?:\.\d+)?\s*[KMGT]?i?B/s)").expect("Failed to compile speed regex")
});

/// `ETA 00:10`, `ETA 1:02:03`; `ETA Unknown` does not match
static ETA_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"ETA\s+(\d+(?::\d{2}){1,2})").expect("Failed to compile ETA regex"));

/// One parsed `[download]` progress line.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressSample {
    /// Clamped to `0..=100`
    pub percent: f64,
    /// As printed, e.g. `1.23MiB/s`
    pub speed: Option<String>,
    /// As printed, e.g. `00:10`
    pub eta: Option<String>,
    pub eta_seconds: Option<u64>,
    pub total_bytes: Option<u64>,
}

/// Parses a yt-dlp progress line. Lines without a `[download]` tag or a
/// percentage are not progress.
pub fn parse_progress_line(line: &str) -> Option<ProgressSample> {
    if !line.contains("[download]") {
        return None;
    }

    let percent = PERCENT_RE
        .captures(line)
        .and_then(|c| c[1].parse::<f64>().ok())?
        .clamp(0.0, 100.0);

    let speed = SPEED_RE.captures(line).map(|c| c[1].replace(' ', ""));
    let eta = ETA_RE.captures(line).map(|c| c[1].to_string());
    let eta_seconds = eta.as_deref().and_then(parse_eta);
    let total_bytes = TOTAL_RE.captures(line).and_then(|c| parse_size(&c[1]));

    tracing::trace!(percent, ?speed, ?eta, ?total_bytes, "Parsed progress line");

    Some(ProgressSample {
        percent,
        speed,
        eta,
        eta_seconds,
        total_bytes,
    })
}

/// Parses sizes like `10.00MiB`, `500KiB`, `1.5GB`, `/s` suffix allowed.
pub fn parse_size(size_str: &str) -> Option<u64> {
    let s = size_str.trim().trim_end_matches("/s").replace(' ', "");
    let split = s.find(|c: char| !(c.is_ascii_digit() || c == '.'))?;
    let (number, unit) = s.split_at(split);
    let value: f64 = number.parse().ok()?;

    let multiplier: f64 = match unit {
        "B" => 1.0,
        "KiB" => 1024.0,
        "MiB" => 1024.0 * 1024.0,
        "GiB" => 1024.0 * 1024.0 * 1024.0,
        "TiB" => 1024.0 * 1024.0 * 1024.0 * 1024.0,
        "KB" | "kB" => 1e3,
        "MB" => 1e6,
        "GB" => 1e9,
        "TB" => 1e12,
        _ => return None,
    };
    Some((value * multiplier) as u64)
}

/// Parses `MM:SS` or `H:MM:SS` into seconds.
pub fn parse_eta(eta_str: &str) -> Option<u64> {
    let parts = eta_str
        .trim()
        .split(':')
        .map(|p| p.parse::<u64>().ok())
        .collect::<Option<Vec<u64>>>()?;

    match parts.as_slice() {
        [minutes, seconds] => Some(minutes * 60 + seconds),
        [hours, minutes, seconds] => Some(hours * 3600 + minutes * 60 + seconds),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressStatus {
    Downloading,
    Complete,
}

/// One SSE frame.
///
/// `eta_seconds` and `total_bytes` are left out of the JSON when unknown.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressEvent {
    pub percent: f64,
    pub speed: Option<String>,
    pub eta: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eta_seconds: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_bytes: Option<u64>,
    pub status: ProgressStatus,
}

impl ProgressEvent {
    pub fn complete() -> Self {
        Self {
            percent: 100.0,
            speed: None,
            eta: None,
            eta_seconds: None,
            total_bytes: None,
            status: ProgressStatus::Complete,
        }
    }
}

impl From<ProgressSample> for ProgressEvent {
    fn from(sample: ProgressSample) -> Self {
        Self {
            percent: sample.percent,
            speed: sample.speed,
            eta: sample.eta,
            eta_seconds: sample.eta_seconds,
            total_bytes: sample.total_bytes,
            status: ProgressStatus::Downloading,
        }
    }
}

/// Event stream of one relay session. Dropping it kills yt-dlp.
#[derive(Debug)]
pub struct ProgressStream {
    events: mpsc::Receiver<ProgressEvent>,
}

impl Stream for ProgressStream {
    type Item = ProgressEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.events.poll_recv(cx)
    }
}

#[derive(Debug)]
enum RelayOutcome {
    Completed,
    Cancelled,
    Failed(StreamError),
}

/// Starts progress-relay sessions bounded by a wall-clock cap.
#[derive(Debug, Clone)]
pub struct ProgressRelay {
    ytdlp: Arc<YtDlp>,
    limits: StreamLimits,
}

impl ProgressRelay {
    pub fn new(ytdlp: Arc<YtDlp>, limits: StreamLimits) -> Self {
        Self { ytdlp, limits }
    }

    /// Spawns yt-dlp for `tier` and returns its event stream.
    ///
    /// A spawn failure is logged and yields a stream that ends immediately,
    /// without a completion frame.
    pub fn start(&self, url: &Url, tier: QualityTier) -> ProgressStream {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let label = format!("{} [{}]", url, tier.label());

        match self.ytdlp.spawn(&Invocation::StreamWithProgress { url, tier }) {
            Ok(session) => {
                tokio::spawn(run_relay(session, tx, self.limits, label));
            }
            Err(e) => {
                tracing::error!(subcategory = "spawn", "Progress relay failed to start for {}: {}", label, e);
            }
        }

        ProgressStream { events: rx }
    }
}

async fn run_relay(
    mut session: ProcessSession,
    events: mpsc::Sender<ProgressEvent>,
    limits: StreamLimits,
    label: String,
) {
    let drain = session.take_stdout().map(|mut stdout| {
        tokio::spawn(async move { tokio::io::copy(&mut stdout, &mut tokio::io::sink()).await })
    });

    let mut tail = VecDeque::with_capacity(DIAGNOSTIC_TAIL_LINES);
    let outcome = relay(&mut session, &events, limits, &mut tail).await;

    if !matches!(outcome, RelayOutcome::Completed) {
        session.terminate();
    }
    let discarded = match drain {
        Some(handle) if matches!(outcome, RelayOutcome::Completed) => tokio::time::timeout(DRAIN_GRACE, handle)
            .await
            .ok()
            .and_then(Result::ok)
            .and_then(Result::ok),
        Some(handle) => {
            handle.abort();
            None
        }
        None => None,
    };

    match outcome {
        RelayOutcome::Completed => {
            let _ = events.send(ProgressEvent::complete()).await;
            tracing::info!(
                "Progress relay complete: {} ({:?} bytes discarded, {:.1}s)",
                label,
                discarded,
                session.elapsed().as_secs_f64()
            );
        }
        RelayOutcome::Cancelled => {
            tracing::info!("Client disconnected, progress relay cancelled: {}", label);
        }
        RelayOutcome::Failed(err) => {
            tracing::error!(
                subcategory = err.subcategory(),
                resource_limit = err.is_resource_limit(),
                pid = ?session.pid(),
                "Progress relay failed: {}: {}. stderr tail: {}",
                label,
                err,
                tail.iter().cloned().collect::<Vec<_>>().join(" | ")
            );
        }
    }
}

async fn relay(
    session: &mut ProcessSession,
    events: &mpsc::Sender<ProgressEvent>,
    limits: StreamLimits,
    tail: &mut VecDeque<String>,
) -> RelayOutcome {
    let Some(stderr) = session.take_stderr() else {
        return RelayOutcome::Failed(StreamError::Io(std::io::Error::other("stderr not piped")));
    };
    let mut reader = BufReader::new(stderr);

    let deadline = tokio::time::sleep_until(session.deadline(limits.max_duration));
    tokio::pin!(deadline);

    let mut buf = Vec::new();
    loop {
        buf.clear();
        let read = tokio::select! {
            biased;
            _ = &mut deadline => return RelayOutcome::Failed(StreamError::Timeout(limits.max_duration)),
            _ = events.closed() => return RelayOutcome::Cancelled,
            read = reader.read_until(b'\n', &mut buf) => read,
        };

        match read {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => return RelayOutcome::Failed(StreamError::Io(e)),
        }

        let line = String::from_utf8_lossy(&buf).trim().to_string();
        if line.is_empty() {
            continue;
        }

        let Some(sample) = parse_progress_line(&line) else {
            if line.contains("ERROR") {
                tracing::warn!("yt-dlp stderr: {}", line);
            } else {
                tracing::debug!("yt-dlp stderr: {}", line);
            }
            if tail.len() == DIAGNOSTIC_TAIL_LINES {
                tail.pop_front();
            }
            tail.push_back(line);
            continue;
        };

        tokio::select! {
            biased;
            _ = &mut deadline => return RelayOutcome::Failed(StreamError::Timeout(limits.max_duration)),
            sent = events.send(sample.into()) => {
                if sent.is_err() {
                    return RelayOutcome::Cancelled;
                }
            }
        }
    }

    let status = tokio::select! {
        biased;
        _ = &mut deadline => return RelayOutcome::Failed(StreamError::Timeout(limits.max_duration)),
        _ = events.closed() => return RelayOutcome::Cancelled,
        status = session.wait() => status,
    };

    match status {
        Ok(status) if status.success() => RelayOutcome::Completed,
        Ok(status) => RelayOutcome::Failed(StreamError::ExitStatus(status.code())),
        Err(e) => RelayOutcome::Failed(StreamError::Io(e)),
    }
}


#[cfg(all(test, unix))]
mod relay_tests {
    use super::*;
    use crate::testing::FakeTool;
    use futures_util::StreamExt;
    use std::time::Instant;

    const PROGRESS_SCRIPT: &str = r#"
printf '[download] Destination: -\n' >&2
printf '[download]  10.0%% of ~5.00MiB at  1.00MiB/s ETA 00:04\n' >&2
head -c 200000 /dev/zero
printf '[download]  55.5%% of ~5.00MiB at  2.50MiB/s ETA 00:02\n' >&2
printf '[download] 100%% of 5.00MiB in 00:00:03 at 1.60MiB/s\n' >&2
exit 0
"#;

    fn relay_for(tool: &FakeTool, max_duration: Duration) -> ProgressRelay {
        ProgressRelay::new(
            Arc::new(YtDlp::new(tool.bin(), 5)),
            StreamLimits::new(u64::MAX, max_duration),
        )
    }

    fn url() -> Url {
        Url::parse("https://www.youtube.com/watch?v=abc").unwrap()
    }

    #[tokio::test]
    async fn test_clean_exit_ends_with_single_complete_frame() {
        let tool = FakeTool::new(PROGRESS_SCRIPT);
        let events: Vec<ProgressEvent> = relay_for(&tool, Duration::from_secs(10))
            .start(&url(), QualityTier::parse("720p"))
            .collect()
            .await;

        let (last, progress) = events.split_last().unwrap();
        assert!(last.status == ProgressStatus::Complete);
        assert_eq!(last.percent, 100.0);
        assert!(!progress.is_empty());
        assert!(progress.iter().all(|e| e.status == ProgressStatus::Downloading));
        assert!(progress.iter().all(|e| (0.0..=100.0).contains(&e.percent)));
        assert_eq!(progress[0].percent, 10.0);
        assert_eq!(progress[1].speed.as_deref(), Some("2.50MiB/s"));
    }

    #[tokio::test]
    async fn test_nonzero_exit_ends_without_complete_frame() {
        let tool = FakeTool::new(
            "printf '[download]  10.0%% of 1.00MiB\\n' >&2\necho 'ERROR: HTTP Error 403' >&2\nexit 1",
        );
        let events: Vec<ProgressEvent> = relay_for(&tool, Duration::from_secs(10))
            .start(&url(), QualityTier::Best)
            .collect()
            .await;

        assert_eq!(events.len(), 1);
        assert!(events[0].status == ProgressStatus::Downloading);
    }

    #[tokio::test]
    async fn test_timeout_ends_without_complete_frame() {
        let tool = FakeTool::new("exec sleep 30");
        let start = Instant::now();
        let events: Vec<ProgressEvent> = relay_for(&tool, Duration::from_millis(300))
            .start(&url(), QualityTier::Audio)
            .collect()
            .await;

        assert!(events.is_empty());
        assert!(start.elapsed() >= Duration::from_millis(300));
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_dropping_stream_kills_process() {
        use crate::testing::{process_is_gone, read_pid};

        let tool = FakeTool::build(|dir| {
            format!(
                "echo $$ > '{}/pid'\nwhile true; do printf '[download]  10.0%% of 1.00MiB\\n' >&2; sleep 0.05; done",
                dir.display()
            )
        });
        let pid_file = tool.scratch("pid");

        let mut stream = relay_for(&tool, Duration::from_secs(30)).start(&url(), QualityTier::parse("720p"));
        let first = stream.next().await.unwrap();
        assert!(first.status == ProgressStatus::Downloading);

        let pid = read_pid(&pid_file).await;
        drop(stream);

        let mut gone = false;
        for _ in 0..100 {
            if process_is_gone(pid) {
                gone = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(gone, "yt-dlp (pid {}) still running after the event stream was dropped", pid);
    }

    #[tokio::test]
    async fn test_spawn_failure_yields_empty_stream() {
        let relay = ProgressRelay::new(
            Arc::new(YtDlp::new("/nonexistent/yt-dlp-binary", 5)),
            StreamLimits::new(u64::MAX, Duration::from_secs(1)),
        );
        let events: Vec<ProgressEvent> = relay.start(&url(), QualityTier::Best).collect().await;
        assert!(events.is_empty());
    }
}
