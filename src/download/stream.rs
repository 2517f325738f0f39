//! Download streaming: yt-dlp stdout piped into an HTTP response body.
//!
//! A pump task owns the [`ProcessSession`] and moves stdout chunks into a
//! capacity-1 channel, so the next read only happens after the previous chunk
//! was taken by the response body. A stalled client therefore stalls the pipe
//! and, through it, yt-dlp itself.
//!
//! The session ends in exactly one of:
//! - clean EOF followed by exit code 0 → body ends normally
//! - cap breach, deadline, read error or nonzero exit → process killed,
//!   body ends with a [`StreamError`]
//! - body dropped (client went away) → process killed, nothing reported
//!
//! The terminal error travels on a oneshot next to the chunk channel. It is
//! sent before the chunk sender drops, so the body can never observe a clean
//! end for a failed session.
//!
//! [`DownloadStream::wait_for_output`] lets the caller hold the response
//! headers until the first chunk, so a tool that fails before writing anything
//! still gets a proper error status.

use bytes::{Bytes, BytesMut};
use futures_util::{Stream, StreamExt};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::sync::{mpsc, oneshot};
use url::Url;

use crate::core::config::StreamLimits;
use crate::core::process::{log_diagnostics, ProcessSession};
use crate::core::validation::sanitize_filename;
use crate::download::error::StreamError;
use crate::download::ytdlp::{Invocation, YtDlp};

/// Read size per stdout chunk
const CHUNK_SIZE: usize = 64 * 1024;

/// Bytes between two progress log lines
const LOG_EVERY_BYTES: u64 = 10 * 1024 * 1024;

/// Upper bound for collecting the stderr tail once the process is gone
const DIAGNOSTICS_GRACE: Duration = Duration::from_secs(2);

/// YouTube itags that carry only an audio track.
const AUDIO_ONLY_ITAGS: &[&str] = &[
    "139", "140", "141", "171", "172", "249", "250", "251", "256", "258", "325", "328", "599", "600",
];

/// Opus/Vorbis itags whose container is WebM.
const WEBM_AUDIO_ITAGS: &[&str] = &["171", "172", "249", "250", "251", "600"];

/// Optional hints a client copies from its metadata record.
#[derive(Debug, Clone, Default)]
pub struct FormatHint {
    pub audio_only: Option<bool>,
    pub ext: Option<String>,
    pub title: Option<String>,
}

/// Headers of a download response, decided before yt-dlp starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseMeta {
    pub audio_only: bool,
    pub content_type: &'static str,
    pub extension: String,
    pub filename: String,
}

impl ResponseMeta {
    /// Label-based decision: hints first, then the format identifier.
    pub fn for_format(format_id: &str, hint: &FormatHint) -> Self {
        let audio_only = hint.audio_only.unwrap_or_else(|| is_audio_only_format(format_id));

        let extension = hint
            .ext
            .as_deref()
            .map(|e| e.trim().trim_start_matches('.').to_ascii_lowercase())
            .filter(|e| !e.is_empty() && e.len() <= 8 && e.chars().all(|c| c.is_ascii_alphanumeric()))
            .unwrap_or_else(|| default_extension(format_id, audio_only).to_string());

        let stem = hint
            .title
            .as_deref()
            .map(|t| {
                sanitize_filename(t)
                    .chars()
                    .filter(|c| c.is_ascii() && !c.is_ascii_control())
                    .collect::<String>()
                    .trim()
                    .to_string()
            })
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| if audio_only { "audio" } else { "video" }.to_string());

        Self {
            audio_only,
            content_type: content_type_for(&extension, audio_only),
            filename: format!("{}.{}", stem, extension),
            extension,
        }
    }

    pub fn content_disposition(&self) -> String {
        format!("attachment; filename=\"{}\"", self.filename)
    }
}

/// Whether a format identifier or selector expression yields audio only.
///
/// Merges (`+`) never do. For fallback chains (`a/b`) every alternative must
/// be audio-only.
pub fn is_audio_only_format(format_id: &str) -> bool {
    let id = format_id.trim().to_ascii_lowercase();
    if id.is_empty() || id.contains('+') {
        return false;
    }
    id.split('/').all(is_audio_only_alternative)
}

fn is_audio_only_alternative(alternative: &str) -> bool {
    // drop filters such as `[ext=m4a]`
    let base = alternative.split('[').next().unwrap_or_default().trim();
    match base {
        "bestaudio" | "ba" | "worstaudio" | "wa" | "ba*" | "wa*" => true,
        _ if AUDIO_ONLY_ITAGS.contains(&base) => true,
        _ => base.contains("audio") && !base.contains("video"),
    }
}

fn default_extension(format_id: &str, audio_only: bool) -> &'static str {
    if !audio_only {
        return "mp4";
    }
    if WEBM_AUDIO_ITAGS.contains(&format_id.trim()) {
        "webm"
    } else {
        "m4a"
    }
}

fn content_type_for(extension: &str, audio_only: bool) -> &'static str {
    match (extension, audio_only) {
        ("m4a" | "mp4", true) => "audio/mp4",
        ("mp3", _) => "audio/mpeg",
        ("webm", true) => "audio/webm",
        ("opus" | "ogg", _) => "audio/ogg",
        ("aac", _) => "audio/aac",
        ("flac", _) => "audio/flac",
        ("wav", _) => "audio/wav",
        ("webm", false) => "video/webm",
        ("mkv", _) => "video/x-matroska",
        ("mov", _) => "video/quicktime",
        (_, true) => "audio/mp4",
        (_, false) => "video/mp4",
    }
}

/// How a pump session ended; used for the final log line.
#[derive(Debug)]
enum SessionOutcome {
    Completed,
    Cancelled,
    Failed(StreamError),
}

/// Response body of one download. Dropping it cancels the session.
#[derive(Debug)]
pub struct DownloadStream {
    chunks: mpsc::Receiver<Bytes>,
    failure: Option<oneshot::Receiver<StreamError>>,
    pending: Option<Bytes>,
}

impl DownloadStream {
    /// Waits until yt-dlp wrote its first chunk or the session ended.
    ///
    /// The chunk is kept and yielded first by the stream. An error here means
    /// nothing was forwarded yet.
    pub async fn wait_for_output(&mut self) -> Result<(), StreamError> {
        match self.next().await {
            Some(Ok(chunk)) => {
                self.pending = Some(chunk);
                Ok(())
            }
            Some(Err(e)) => Err(e),
            None => Ok(()),
        }
    }
}

impl Stream for DownloadStream {
    type Item = Result<Bytes, StreamError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        if let Some(chunk) = this.pending.take() {
            return Poll::Ready(Some(Ok(chunk)));
        }
        if let Some(chunk) = ready!(this.chunks.poll_recv(cx)) {
            return Poll::Ready(Some(Ok(chunk)));
        }

        // chunk channel closed: the pump finished, check how
        let Some(failure) = this.failure.as_mut() else {
            return Poll::Ready(None);
        };
        let result = ready!(Pin::new(failure).poll(cx));
        this.failure = None;
        Poll::Ready(result.ok().map(Err))
    }
}

/// Starts download sessions with fixed byte and time caps.
#[derive(Debug, Clone)]
pub struct DownloadStreamer {
    ytdlp: Arc<YtDlp>,
    limits: StreamLimits,
}

impl DownloadStreamer {
    pub fn new(ytdlp: Arc<YtDlp>, limits: StreamLimits) -> Self {
        Self { ytdlp, limits }
    }

    /// Spawns yt-dlp for `format_id` and returns the body stream.
    ///
    /// Fails only if the process cannot be started; everything after that is
    /// reported through the stream.
    pub fn start(&self, url: &Url, format_id: &str) -> Result<DownloadStream, StreamError> {
        let session = self
            .ytdlp
            .spawn(&Invocation::StreamFormat { url, format_id })
            .map_err(|e| StreamError::Spawn(e.to_string()))?;

        let (chunk_tx, chunk_rx) = mpsc::channel(1);
        let (failure_tx, failure_rx) = oneshot::channel();
        let label = format!("{} [{}]", url, format_id);

        tokio::spawn(run_session(session, chunk_tx, failure_tx, self.limits, label));

        Ok(DownloadStream {
            chunks: chunk_rx,
            failure: Some(failure_rx),
            pending: None,
        })
    }
}

async fn run_session(
    mut session: ProcessSession,
    chunks: mpsc::Sender<Bytes>,
    failure: oneshot::Sender<StreamError>,
    limits: StreamLimits,
    label: String,
) {
    let diagnostics = session
        .take_stderr()
        .map(|stderr| tokio::spawn(log_diagnostics(stderr, "yt-dlp")));

    let outcome = pump(&mut session, &chunks, limits).await;

    if !matches!(outcome, SessionOutcome::Completed) {
        session.terminate();
    }

    let tail = match diagnostics {
        Some(handle) => tokio::time::timeout(DIAGNOSTICS_GRACE, handle)
            .await
            .ok()
            .and_then(Result::ok)
            .unwrap_or_default(),
        None => Vec::new(),
    };

    let bytes = session.bytes_received();
    let elapsed = session.elapsed().as_secs_f64();
    match outcome {
        SessionOutcome::Completed => {
            tracing::info!(
                "Download complete: {} ({:.2} MB in {:.1}s)",
                label,
                bytes as f64 / (1024.0 * 1024.0),
                elapsed
            );
        }
        SessionOutcome::Cancelled => {
            tracing::info!("Client disconnected, download cancelled: {} after {} bytes", label, bytes);
        }
        SessionOutcome::Failed(err) => {
            tracing::error!(
                subcategory = err.subcategory(),
                resource_limit = err.is_resource_limit(),
                pid = ?session.pid(),
                bytes,
                elapsed_secs = elapsed,
                "Download failed: {}: {}. stderr tail: {}",
                label,
                err,
                tail.join(" | ")
            );
            let _ = failure.send(err);
        }
    }
    // `chunks` drops here, after the failure (if any) was queued
    drop(chunks);
}

async fn pump(session: &mut ProcessSession, chunks: &mpsc::Sender<Bytes>, limits: StreamLimits) -> SessionOutcome {
    let Some(mut stdout) = session.take_stdout() else {
        return SessionOutcome::Failed(StreamError::Io(std::io::Error::other("stdout not piped")));
    };

    let deadline = tokio::time::sleep_until(session.deadline(limits.max_duration));
    tokio::pin!(deadline);

    let mut buf = BytesMut::with_capacity(CHUNK_SIZE);
    let mut next_log = LOG_EVERY_BYTES;

    loop {
        buf.reserve(CHUNK_SIZE);
        let read = tokio::select! {
            biased;
            _ = &mut deadline => return SessionOutcome::Failed(StreamError::Timeout(limits.max_duration)),
            _ = chunks.closed() => return SessionOutcome::Cancelled,
            read = stdout.read_buf(&mut buf) => read,
        };

        let n = match read {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => return SessionOutcome::Failed(StreamError::Io(e)),
        };

        let total = session.record_bytes(n);
        if total > limits.max_bytes {
            tracing::warn!("Byte cap reached: {} > {}", total, limits.max_bytes);
            return SessionOutcome::Failed(StreamError::SizeLimit { limit: limits.max_bytes });
        }
        if total >= next_log {
            tracing::debug!("Streamed {:.1} MB", total as f64 / (1024.0 * 1024.0));
            next_log = total + LOG_EVERY_BYTES;
        }

        let chunk = buf.split().freeze();
        tokio::select! {
            biased;
            _ = &mut deadline => return SessionOutcome::Failed(StreamError::Timeout(limits.max_duration)),
            sent = chunks.send(chunk) => {
                if sent.is_err() {
                    return SessionOutcome::Cancelled;
                }
            }
        }
    }

    // stdout closed; the exit code decides whether the body was complete
    let status = tokio::select! {
        biased;
        _ = &mut deadline => return SessionOutcome::Failed(StreamError::Timeout(limits.max_duration)),
        _ = chunks.closed() => return SessionOutcome::Cancelled,
        status = session.wait() => status,
    };

    match status {
        Ok(status) if status.success() => SessionOutcome::Completed,
        Ok(status) => SessionOutcome::Failed(StreamError::ExitStatus(status.code())),
        Err(e) => SessionOutcome::Failed(StreamError::Io(e)),
    }
}
