//! Cancelable fix-it suggestions for failed shell commands.
//!
//! The provider round-trip runs in a short-lived worker process (the `tutr`
//! binary re-executed as `tutr suggest-worker`). The supervisor waits on the
//! worker's stdout and the real stdin at the same time, so Esc or Ctrl-C can
//! terminate a slow request without touching the HTTP client.

use super::fd_io::{poll_readable, read_fd};
use crate::config::TutrConfig;
use crate::format::{style_command, BOLD, RED, RESET, YELLOW};
use crate::process_signal::signal_process_group_or_pid;
use crate::query::{CommandQuery, QueryRequest};
use crate::safety::{assess_command_safety, ALLOW_UNSAFE_ENV};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::io::{self, ErrorKind, Read, Write};
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const ESCAPE: u8 = 0x1b;
const CTRL_C: u8 = 0x03;
/// How long a signaled worker gets before SIGKILL.
pub const CANCEL_GRACE: Duration = Duration::from_millis(500);
const REAP_POLL: Duration = Duration::from_millis(10);
const CANCELED_TEXT: &str = "\r\ntutr canceled.\r\n";

/// What the supervisor shows after a failure, and the command it may offer to run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuggestionResult {
    pub display_text: String,
    #[serde(default)]
    pub suggested_command: Option<String>,
}

impl SuggestionResult {
    fn notice(display_text: String) -> Self {
        Self {
            display_text,
            suggested_command: None,
        }
    }

    #[must_use]
    pub fn canceled() -> Self {
        Self::notice(CANCELED_TEXT.to_string())
    }

    #[must_use]
    pub fn error(message: &str, color: bool) -> Self {
        let text = if color {
            format!("\r\n{RED}tutr error: {message}{RESET}\r\n")
        } else {
            format!("\r\ntutr error: {message}\r\n")
        };
        Self::notice(text)
    }
}

/// One failure handed to the worker process on its stdin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerRequest {
    pub command: String,
    pub output: String,
    pub config: TutrConfig,
    #[serde(default)]
    pub allow_unsafe: bool,
    #[serde(default)]
    pub color: bool,
}

/// The free-text query sent for a failed command.
#[must_use]
pub fn failure_query(command: &str, output: &str) -> String {
    let mut query = format!("fix this command: {command}");
    if !output.is_empty() {
        query.push_str("\n\nTerminal output:\n");
        query.push_str(output);
    }
    query
}

fn paint(text: &str, style: &str, color: bool) -> String {
    if color {
        format!("{style}{text}{RESET}")
    } else {
        text.to_string()
    }
}

/// Ask `querier` for a fix and render it, applying the safety gate.
#[must_use]
pub fn compose_suggestion(request: &WorkerRequest, querier: &dyn CommandQuery) -> SuggestionResult {
    let query = QueryRequest {
        command_hint: None,
        free_text: failure_query(&request.command, &request.output),
    };
    let response = match querier.query(&query, &request.config) {
        Ok(response) => response,
        Err(err) => {
            warn!(%err, "suggestion query failed");
            return SuggestionResult::error(&err.to_string(), request.color);
        }
    };
    let command = response.command.trim();
    if command.is_empty() {
        return SuggestionResult::error("model returned an empty command", request.color);
    }

    let color = request.color;
    let safety = assess_command_safety(command);
    let mut text = String::from("\r\n");
    if !safety.is_safe && !request.allow_unsafe {
        text.push_str(&paint(
            "tutr blocked a potentially dangerous suggestion:",
            YELLOW,
            color,
        ));
        text.push_str("\r\n");
        for reason in &safety.reasons {
            text.push_str(&format!("  - {reason}\r\n"));
        }
        text.push_str(&format!(
            "  Set {ALLOW_UNSAFE_ENV}=1 to show and run flagged suggestions.\r\n"
        ));
        debug!(reasons = ?safety.reasons, "blocked suggestion");
        return SuggestionResult::notice(text);
    }
    if !safety.is_safe {
        text.push_str(&paint(
            "Warning: suggested command matched dangerous-pattern checks:",
            YELLOW,
            color,
        ));
        text.push_str("\r\n");
        for reason in &safety.reasons {
            text.push_str(&format!("  - {reason}\r\n"));
        }
    }
    text.push_str(&paint("tutr suggests:", BOLD, color));
    text.push_str(&format!("\r\n  {}\r\n", style_command(command, color)));
    if request.config.explanations_enabled() {
        if !response.explanation.trim().is_empty() {
            text.push_str(&format!("  {}\r\n", response.explanation.trim()));
        }
        if let Some(source) = response.source.as_deref().filter(|s| !s.trim().is_empty()) {
            text.push_str(&format!("  source: {}\r\n", source.trim()));
        }
    }
    SuggestionResult {
        display_text: text,
        suggested_command: (!request.config.execution_disabled()).then(|| command.to_string()),
    }
}

/// Worker side: one JSON request on `input`, one JSON result on `output`.
///
/// # Errors
///
/// Returns an error when the request cannot be read or decoded, or the
/// result cannot be written.
pub fn run_suggest_worker<R: Read, W: Write>(
    mut input: R,
    mut output: W,
    querier: &dyn CommandQuery,
) -> Result<()> {
    let mut raw = Vec::new();
    input
        .read_to_end(&mut raw)
        .context("failed to read worker request")?;
    let request: WorkerRequest =
        serde_json::from_slice(&raw).context("invalid worker request")?;
    debug!(command = %request.command, "worker handling failure");
    let result = compose_suggestion(&request, querier);
    serde_json::to_writer(&mut output, &result).context("failed to write worker result")?;
    output.flush().context("failed to flush worker result")?;
    Ok(())
}

/// Starts the isolated process that performs one suggestion request.
pub trait SuggestionWorker {
    /// Spawn a worker with piped stdout that will answer `request`.
    ///
    /// # Errors
    ///
    /// Returns an error when the process cannot be started.
    fn spawn(&self, request: &WorkerRequest) -> io::Result<Child>;
}

/// Re-executes the current binary as `tutr suggest-worker`.
#[derive(Debug, Clone)]
pub struct SelfExecWorker {
    executable: PathBuf,
    debug: bool,
}

impl SelfExecWorker {
    /// # Errors
    ///
    /// Returns an error when the running executable cannot be located.
    pub fn current(debug: bool) -> io::Result<Self> {
        Ok(Self {
            executable: std::env::current_exe()?,
            debug,
        })
    }
}

impl SuggestionWorker for SelfExecWorker {
    fn spawn(&self, request: &WorkerRequest) -> io::Result<Child> {
        let body = serde_json::to_vec(request).map_err(io::Error::other)?;
        let mut command = Command::new(&self.executable);
        command.arg("suggest-worker");
        if self.debug {
            command.arg("--debug");
        }
        let mut child = command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()?;
        if let Some(mut stdin) = child.stdin.take() {
            if let Err(err) = stdin.write_all(&body) {
                debug!(%err, "worker closed stdin early");
            }
        }
        Ok(child)
    }
}

enum Outcome {
    Finished(Vec<u8>),
    Canceled,
    Failed(io::Error),
}

/// Runs one worker per failure and lets the user abort it.
#[derive(Debug, Clone)]
pub struct CancelableRequester<W> {
    worker: W,
    grace: Duration,
}

impl<W: SuggestionWorker> CancelableRequester<W> {
    pub fn new(worker: W) -> Self {
        Self {
            worker,
            grace: CANCEL_GRACE,
        }
    }

    /// Request a suggestion; Esc or Ctrl-C on `stdin_fd` cancels it.
    pub fn request(&self, stdin_fd: RawFd, request: &WorkerRequest) -> SuggestionResult {
        let mut child = match self.worker.spawn(request) {
            Ok(child) => child,
            Err(err) => {
                warn!(%err, "failed to start suggestion worker");
                return SuggestionResult::error(
                    &format!("failed to start suggestion worker: {err}"),
                    request.color,
                );
            }
        };
        // Dropping stdin gives the worker EOF on its request stream.
        drop(child.stdin.take());
        let Some(stdout) = child.stdout.take() else {
            self.terminate(&mut child);
            return SuggestionResult::error("suggestion worker has no output pipe", request.color);
        };

        match wait_for_result(stdin_fd, stdout.as_raw_fd()) {
            Outcome::Finished(bytes) => {
                drop(stdout);
                reap(&mut child);
                decode_result(&bytes, request.color)
            }
            Outcome::Canceled => {
                drop(stdout);
                debug!(pid = child.id(), "suggestion canceled by user");
                self.terminate(&mut child);
                SuggestionResult::canceled()
            }
            Outcome::Failed(err) => {
                drop(stdout);
                warn!(%err, "suggestion wait failed");
                self.terminate(&mut child);
                SuggestionResult::error(&format!("suggestion failed: {err}"), request.color)
            }
        }
    }

    /// SIGTERM, bounded grace, then SIGKILL; always reaps.
    fn terminate(&self, child: &mut Child) {
        let pid = i32::try_from(child.id()).unwrap_or(-1);
        match signal_process_group_or_pid(pid, libc::SIGTERM, true) {
            Ok(delivery) => debug!(?delivery, "sent SIGTERM to worker"),
            Err(err) => debug!(%err, "SIGTERM to worker failed"),
        }
        let deadline = Instant::now() + self.grace;
        while Instant::now() < deadline {
            match child.try_wait() {
                Ok(Some(_)) => return,
                Ok(None) => thread::sleep(REAP_POLL),
                Err(err) => {
                    debug!(%err, "try_wait on worker failed");
                    break;
                }
            }
        }
        if let Err(err) = child.kill() {
            debug!(%err, "SIGKILL to worker failed");
        }
        let _ = child.wait();
    }
}

fn reap(child: &mut Child) {
    if let Err(err) = child.wait() {
        debug!(%err, "failed to reap worker");
    }
}

fn decode_result(bytes: &[u8], color: bool) -> SuggestionResult {
    match serde_json::from_slice::<SuggestionResult>(bytes) {
        Ok(result) => result,
        Err(err) => {
            warn!(%err, len = bytes.len(), "undecodable worker result");
            SuggestionResult::error("failed to parse tutor response", color)
        }
    }
}

/// Read the worker's full output unless a cancel key arrives first.
fn wait_for_result(stdin_fd: RawFd, result_fd: RawFd) -> Outcome {
    let mut collected = Vec::new();
    let mut chunk = [0u8; 4096];
    let mut stdin_open = true;
    loop {
        let fds: Vec<RawFd> = if stdin_open {
            vec![result_fd, stdin_fd]
        } else {
            vec![result_fd]
        };
        let ready = match poll_readable(&fds, -1) {
            Ok(ready) => ready,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Outcome::Failed(err),
        };

        if stdin_open && ready.get(1).copied().unwrap_or(false) {
            let mut byte = [0u8; 1];
            match read_fd(stdin_fd, &mut byte) {
                Ok(0) => stdin_open = false,
                Ok(_) if byte[0] == ESCAPE || byte[0] == CTRL_C => return Outcome::Canceled,
                // Other keys typed while waiting are dropped.
                Ok(_) => {}
                Err(err) => {
                    debug!(%err, "stdin unreadable while waiting for suggestion");
                    stdin_open = false;
                }
            }
        }

        if ready[0] {
            match read_fd(result_fd, &mut chunk) {
                Ok(0) => return Outcome::Finished(collected),
                Ok(n) => collected.extend_from_slice(&chunk[..n]),
                Err(err) => return Outcome::Failed(err),
            }
        }
    }
}
