//! `tutr shell`: an interactive shell wrapped in a PTY that offers a fix
//! whenever a command fails.

pub mod detect;
pub mod hooks;
pub mod marker;
pub mod rolling_buffer;

#[cfg(unix)]
pub mod auto_run;
#[cfg(unix)]
pub(crate) mod fd_io;
#[cfg(unix)]
pub mod pty;
#[cfg(unix)]
pub mod relay;
#[cfg(unix)]
pub mod resize;
#[cfg(unix)]
pub mod suggest;

pub use detect::{detect_shell, ShellKind, ShellLaunchConfig};
pub use marker::{MarkerMatch, MarkerScanner};

use anyhow::Result;

#[cfg(unix)]
const NOT_A_TERMINAL: &str = "Error: stdin must be a terminal";
#[cfg(unix)]
const ALREADY_SUPERVISED: &str =
    "Error: already inside a tutr shell session (TUTR_ACTIVE is set)";

#[cfg(unix)]
/// Removes the session's hook artifacts however the session ends.
struct CleanupGuard(Vec<std::path::PathBuf>);

#[cfg(unix)]
impl Drop for CleanupGuard {
    fn drop(&mut self) {
        detect::remove_cleanup_paths(&self.0);
    }
}

/// Run one supervised shell session and return its exit code.
///
/// Diagnostics for a non-terminal stdin, a missing shell or a manual nested
/// start are printed here and reported as exit code 1. A nested start that
/// carries `TUTR_AUTOSTARTED` returns 0 without wrapping a second shell.
///
/// # Errors
///
/// Returns an error when configuration, PTY setup, or the relay fails.
#[cfg(unix)]
pub fn run_shell(debug: bool) -> Result<i32> {
    use crate::config::{load_config, needs_setup};
    use crate::configure::run_setup;
    use crate::format::supports_color;
    use crate::safety::is_unsafe_override_enabled;
    use crate::terminal_restore::RawModeGuard;
    use anyhow::Context;
    use relay::{run_relay, RelayFds, SessionAssistant};
    use std::io::IsTerminal;
    use suggest::{CancelableRequester, SelfExecWorker};
    use tracing::{info, warn};

    match detect::current_nested_session() {
        Some(detect::NestedSession::Autostarted) => {
            info!("nested autostart inside a session, skipping");
            return Ok(0);
        }
        Some(detect::NestedSession::Refuse) => {
            eprintln!("{ALREADY_SUPERVISED}");
            return Ok(1);
        }
        None => {}
    }
    if !std::io::stdin().is_terminal() {
        eprintln!("{NOT_A_TERMINAL}");
        return Ok(1);
    }
    let config = if needs_setup() {
        run_setup()?
    } else {
        load_config()?
    };

    let shell = match detect_shell() {
        Ok(shell) => shell,
        Err(err) => {
            eprintln!("Error: {err}");
            return Ok(1);
        }
    };
    let launch = match detect::build_launch_config(&shell) {
        Ok(launch) => launch,
        Err(err) => {
            eprintln!("Error: {err:#}");
            return Ok(1);
        }
    };
    let cleanup = CleanupGuard(launch.cleanup_paths.clone());
    info!(shell = shell.kind.name(), path = %shell.executable.display(), "starting session");

    let stdin_fd = libc::STDIN_FILENO;
    let size = pty::read_winsize(stdin_fd).unwrap_or_default();
    let session = pty::ShellProcess::spawn(&launch, size)?;
    if let Err(err) = resize::install_sigwinch_handler() {
        warn!(%err, "resize forwarding disabled");
    }

    let worker = SelfExecWorker::current(debug)?;
    let mut assistant = SessionAssistant::new(
        CancelableRequester::new(worker),
        config,
        stdin_fd,
        is_unsafe_override_enabled(),
        supports_color(),
    );
    let fds = RelayFds {
        stdin: stdin_fd,
        stdout: libc::STDOUT_FILENO,
        master: session.master_fd(),
        shell_pid: session.pid(),
    };

    let relayed = RawModeGuard::enter()
        .context("failed to put the terminal in raw mode")
        .and_then(|raw| {
            let relayed = run_relay(fds, &mut assistant);
            raw.leave();
            relayed
        });
    drop(cleanup);

    let exit_code = session.wait()?;
    info!(exit_code, "session ended");
    if let Err(err) = relayed {
        warn!(error = %format!("{err:#}"), "relay stopped");
        eprintln!("tutr: {err:#}");
    }
    Ok(exit_code)
}

#[cfg(not(unix))]
pub fn run_shell(_debug: bool) -> Result<i32> {
    eprintln!("Error: interactive shell mode requires a POSIX environment");
    Ok(1)
}
