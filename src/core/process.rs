//! Process execution utilities with timeout support
//!
//! One place that spawns external tools, for both shapes of use:
//! - [`run_with_timeout`] for bounded call/response (metadata dump)
//! - [`ToolRunner::spawn`] → [`ProcessSession`] for a long-running process whose
//!   pipes are pumped by the caller (download, progress relay)
//!
//! Every child is created with `kill_on_drop`, and [`ProcessSession`] kills
//! its child at most once, so no exit path can leak a process.

use std::collections::VecDeque;
use std::io;
use std::process::{ExitStatus, Output, Stdio};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};

/// How many diagnostic lines are kept for the failure log.
pub const DIAGNOSTIC_TAIL_LINES: usize = 20;

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("failed to start '{bin}': {source}")]
    Spawn {
        bin: String,
        #[source]
        source: io::Error,
    },

    #[error("process timed out after {}s", .0.as_secs_f64())]
    TimedOut(Duration),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Run an async Command with a timeout.
///
/// The child is killed when the timeout fires (or when the caller's future is
/// dropped), so it can never outlive the request that started it.
pub async fn run_with_timeout(cmd: &mut Command, timeout: Duration) -> Result<Output, ProcessError> {
    cmd.stdin(Stdio::null()).kill_on_drop(true);
    match tokio::time::timeout(timeout, cmd.output()).await {
        Ok(Ok(output)) => Ok(output),
        Ok(Err(e)) => Err(ProcessError::Io(e)),
        Err(_) => Err(ProcessError::TimedOut(timeout)),
    }
}

/// Spawns one external binary with varying argument vectors.
#[derive(Debug, Clone)]
pub struct ToolRunner {
    bin: String,
}

impl ToolRunner {
    pub fn new(bin: impl Into<String>) -> Self {
        Self { bin: bin.into() }
    }

    pub fn bin(&self) -> &str {
        &self.bin
    }

    fn command(&self, args: &[String]) -> Command {
        let mut cmd = Command::new(&self.bin);
        cmd.args(args).stdin(Stdio::null()).kill_on_drop(true);
        cmd
    }

    /// Runs to completion and captures stdout/stderr, bounded by `timeout`.
    pub async fn output(&self, args: &[String], timeout: Duration) -> Result<Output, ProcessError> {
        let mut cmd = self.command(args);
        run_with_timeout(&mut cmd, timeout).await.map_err(|e| match e {
            ProcessError::Io(source) if source.kind() == io::ErrorKind::NotFound => ProcessError::Spawn {
                bin: self.bin.clone(),
                source,
            },
            other => other,
        })
    }

    /// Starts the process with stdout and stderr piped.
    pub fn spawn(&self, args: &[String]) -> Result<ProcessSession, ProcessError> {
        let child = self
            .command(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| ProcessError::Spawn {
                bin: self.bin.clone(),
                source,
            })?;

        tracing::debug!(bin = %self.bin, pid = ?child.id(), "Spawned process");
        Ok(ProcessSession::new(child))
    }
}

/// Per-request state of one running subprocess.
///
/// Tracks the received-byte counter and the session start, and guarantees the
/// kill signal is sent at most once: after [`terminate`](Self::terminate) or a
/// reaped exit, further terminate calls are no-ops. Dropping an unfinished
/// session terminates it.
#[derive(Debug)]
pub struct ProcessSession {
    child: Child,
    pid: Option<u32>,
    started_at: Instant,
    bytes_received: u64,
    kill_requested: bool,
    exited: bool,
}

impl ProcessSession {
    fn new(child: Child) -> Self {
        Self {
            pid: child.id(),
            child,
            started_at: Instant::now(),
            bytes_received: 0,
            kill_requested: false,
            exited: false,
        }
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.child.stdout.take()
    }

    pub fn take_stderr(&mut self) -> Option<ChildStderr> {
        self.child.stderr.take()
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Wall-clock deadline measured from spawn.
    pub fn deadline(&self, max_duration: Duration) -> tokio::time::Instant {
        tokio::time::Instant::from_std(self.started_at) + max_duration
    }

    /// Adds `n` to the received-byte counter and returns the new total.
    pub fn record_bytes(&mut self, n: usize) -> u64 {
        self.bytes_received = self.bytes_received.saturating_add(n as u64);
        self.bytes_received
    }

    pub fn bytes_received(&self) -> u64 {
        self.bytes_received
    }

    /// Sends the kill signal without waiting for the process to go away.
    ///
    /// Returns `true` only for the call that actually sent it. A process that
    /// already exited on its own is left alone.
    pub fn terminate(&mut self) -> bool {
        if self.kill_requested || self.exited {
            return false;
        }
        self.kill_requested = true;

        match self.child.start_kill() {
            Ok(()) => tracing::debug!(pid = ?self.pid, "Sent kill signal"),
            // Raced with a natural exit; nothing left to kill.
            Err(e) => tracing::debug!(pid = ?self.pid, error = %e, "Kill signal not delivered"),
        }
        true
    }

    /// Waits for the process to exit and records that it did.
    pub async fn wait(&mut self) -> io::Result<ExitStatus> {
        let status = self.child.wait().await?;
        self.exited = true;
        Ok(status)
    }
}

impl Drop for ProcessSession {
    fn drop(&mut self) {
        if !self.exited && self.terminate() {
            tracing::debug!(pid = ?self.pid, "Session dropped before exit, process killed");
        }
    }
}

/// Reads a diagnostic channel line by line until EOF, logging every line.
///
/// `WARNING` lines are expected noise and go to debug; anything else is
/// logged at warn. Returns the last [`DIAGNOSTIC_TAIL_LINES`] lines for the
/// failure log. Invalid UTF-8 is replaced, not treated as an error.
pub async fn log_diagnostics<R>(reader: R, label: &'static str) -> Vec<String>
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut tail = VecDeque::with_capacity(DIAGNOSTIC_TAIL_LINES);
    let mut buf = Vec::new();

    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf).trim_end().to_string();
                if line.is_empty() {
                    continue;
                }
                if line.contains("WARNING") {
                    tracing::debug!("{} stderr: {}", label, line);
                } else {
                    tracing::warn!("{} stderr: {}", label, line);
                }
                if tail.len() == DIAGNOSTIC_TAIL_LINES {
                    tail.pop_front();
                }
                tail.push_back(line);
            }
            Err(e) => {
                tracing::debug!("{} stderr read failed: {}", label, e);
                break;
            }
        }
    }

    tail.into_iter().collect()
}
