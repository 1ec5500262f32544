//! The supervisor's I/O loop between the real terminal and the PTY.
//!
//! Keystrokes go to the shell untouched. Shell output goes to the terminal
//! with exit markers removed, and each marker for a failed command pauses the
//! loop while the assistant produces a suggestion.

use super::auto_run::{prompt_auto_run, AutoRunDecision};
use super::fd_io::{is_pty_closed, poll_readable, read_fd, should_retry, write_all_fd, Fd};
use super::marker::{MarkerMatch, MarkerScanner, Piece};
use super::resize::{propagate_resize, take_sigwinch};
use super::rolling_buffer::{RollingBuffer, CONTEXT_CHARS};
use super::suggest::{CancelableRequester, SuggestionResult, SuggestionWorker, WorkerRequest};
use crate::config::TutrConfig;
use anyhow::{Context, Result};
use std::io::ErrorKind;
use std::os::unix::io::RawFd;
use tracing::{debug, info};

const STDIN_CHUNK: usize = 1024;
const MASTER_CHUNK: usize = 4096;
/// Exit status of a command the user interrupted with Ctrl-C.
const INTERRUPTED_EXIT: i32 = 130;
/// Upper bound on how long a resize can wait for the loop to notice it.
const RESIZE_CHECK_MS: i32 = 250;

/// Produces the suggestion shown after a failed command.
pub trait FailureAssistant {
    fn suggest(&mut self, command: &str, output: &str) -> SuggestionResult;
}

/// Assistant backed by a cancelable worker process.
pub struct SessionAssistant<W> {
    requester: CancelableRequester<W>,
    config: TutrConfig,
    stdin_fd: RawFd,
    allow_unsafe: bool,
    color: bool,
}

impl<W: SuggestionWorker> SessionAssistant<W> {
    pub fn new(
        requester: CancelableRequester<W>,
        config: TutrConfig,
        stdin_fd: RawFd,
        allow_unsafe: bool,
        color: bool,
    ) -> Self {
        Self {
            requester,
            config,
            stdin_fd,
            allow_unsafe,
            color,
        }
    }
}

impl<W: SuggestionWorker> FailureAssistant for SessionAssistant<W> {
    fn suggest(&mut self, command: &str, output: &str) -> SuggestionResult {
        let request = WorkerRequest {
            command: command.to_string(),
            output: output.to_string(),
            config: self.config.clone(),
            allow_unsafe: self.allow_unsafe,
            color: self.color,
        };
        self.requester.request(self.stdin_fd, &request)
    }
}

/// Whether a marker reports a failure worth a suggestion.
#[must_use]
pub fn should_suggest(marker: &MarkerMatch) -> bool {
    marker.exit_code != 0 && marker.exit_code != INTERRUPTED_EXIT && !marker.command.is_empty()
}

/// Descriptors the relay moves bytes between.
#[derive(Debug, Clone, Copy)]
pub struct RelayFds {
    pub stdin: RawFd,
    pub stdout: RawFd,
    pub master: RawFd,
    /// Shell pid for resize forwarding; `0` disables it.
    pub shell_pid: i32,
}

struct Relay<'a> {
    fds: RelayFds,
    assistant: &'a mut dyn FailureAssistant,
    scanner: MarkerScanner,
    recent: RollingBuffer,
    stdin_open: bool,
    /// Set when a suggestion read stdin, voiding the last poll result for it.
    stdin_consumed: bool,
}

impl Relay<'_> {
    fn write_terminal(&self, bytes: &[u8]) -> Result<()> {
        write_all_fd(self.fds.stdout, bytes).context("failed to write to terminal")
    }

    fn handle_marker(&mut self, marker: MarkerMatch) -> Result<()> {
        let context = self.recent.tail_text(CONTEXT_CHARS);
        self.recent.clear();
        if !should_suggest(&marker) {
            return Ok(());
        }
        info!(
            exit_code = marker.exit_code,
            command = %marker.command,
            "command failed; requesting suggestion"
        );
        self.stdin_consumed = true;
        let result = self.assistant.suggest(&marker.command, &context);
        self.write_terminal(result.display_text.as_bytes())?;
        let Some(command) = result.suggested_command else {
            return Ok(());
        };
        if !self.stdin_open {
            return Ok(());
        }
        let decision = prompt_auto_run(
            &command,
            &mut Fd(self.fds.stdin),
            &mut Fd(self.fds.stdout),
            &mut Fd(self.fds.master),
        )
        .context("auto-run prompt failed")?;
        debug!(?decision, "auto-run prompt answered");
        if decision == AutoRunDecision::Aborted {
            self.stdin_open = false;
        }
        Ok(())
    }

    fn relay_pieces(&mut self, pieces: Vec<Piece>) -> Result<()> {
        for piece in pieces {
            match piece {
                Piece::Output(bytes) => {
                    self.write_terminal(&bytes)?;
                    self.recent.push(&bytes);
                }
                Piece::Marker(marker) => self.handle_marker(marker)?,
            }
        }
        Ok(())
    }

    /// Returns `false` once the shell side has hung up.
    fn pump_master(&mut self, buf: &mut [u8]) -> Result<bool> {
        match read_fd(self.fds.master, buf) {
            Ok(0) => Ok(false),
            Ok(n) => {
                let pieces = self.scanner.push(&buf[..n]);
                self.relay_pieces(pieces)?;
                Ok(true)
            }
            Err(err) if is_pty_closed(&err) => Ok(false),
            Err(err) if should_retry(&err) => Ok(true),
            Err(err) => Err(err).context("failed to read from PTY"),
        }
    }

    /// Returns `false` once the terminal closed or the shell is gone.
    fn pump_stdin(&mut self, buf: &mut [u8]) -> Result<bool> {
        match read_fd(self.fds.stdin, buf) {
            Ok(0) => {
                debug!("stdin closed; ending session");
                self.stdin_open = false;
                Ok(false)
            }
            Ok(n) => match write_all_fd(self.fds.master, &buf[..n]) {
                Ok(()) => Ok(true),
                Err(err) if is_pty_closed(&err) => Ok(false),
                Err(err) => Err(err).context("failed to write to PTY"),
            },
            Err(err) if should_retry(&err) => Ok(true),
            Err(err) => Err(err).context("failed to read from stdin"),
        }
    }

    fn forward_resize(&self) {
        if self.fds.shell_pid > 0 {
            propagate_resize(self.fds.stdin, self.fds.master, self.fds.shell_pid);
        }
    }

    fn run(&mut self) -> Result<()> {
        let mut master_buf = [0u8; MASTER_CHUNK];
        let mut stdin_buf = [0u8; STDIN_CHUNK];
        while self.stdin_open {
            if take_sigwinch() {
                self.forward_resize();
            }
            let ready = match poll_readable(&[self.fds.master, self.fds.stdin], RESIZE_CHECK_MS) {
                Ok(ready) => ready,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(err).context("poll failed"),
            };
            self.stdin_consumed = false;
            if ready[0] && !self.pump_master(&mut master_buf)? {
                break;
            }
            if self.stdin_open
                && !self.stdin_consumed
                && ready[1]
                && !self.pump_stdin(&mut stdin_buf)?
            {
                break;
            }
        }
        let held = self.scanner.finish();
        if !held.is_empty() {
            self.write_terminal(&held)?;
        }
        Ok(())
    }
}

/// Relay until the shell hangs up its side of the PTY or stdin closes.
///
/// # Errors
///
/// Returns an error when polling fails or the terminal cannot be written.
pub fn run_relay(fds: RelayFds, assistant: &mut dyn FailureAssistant) -> Result<()> {
    let mut relay = Relay {
        fds,
        assistant,
        scanner: MarkerScanner::new(),
        recent: RollingBuffer::default(),
        stdin_open: true,
        stdin_consumed: false,
    };
    relay.run()
}
