//! Local documentation gathering (`--help`, `man`) and host description.

use std::env;
use std::fs;
use std::io::Read;
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use tracing::debug;

const HELP_TIMEOUT: Duration = Duration::from_secs(5);
const MAN_TIMEOUT: Duration = Duration::from_secs(10);
const MAN_MAX_LINES: usize = 200;
const WAIT_POLL: Duration = Duration::from_millis(20);

struct CapturedOutput {
    success: bool,
    stdout: String,
    stderr: String,
}

fn drain<R: Read + Send + 'static>(source: Option<R>) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut bytes = Vec::new();
        if let Some(mut source) = source {
            let _ = source.read_to_end(&mut bytes);
        }
        String::from_utf8_lossy(&bytes).into_owned()
    })
}

fn wait_with_deadline(child: &mut Child, timeout: Duration) -> Option<bool> {
    let deadline = Instant::now() + timeout;
    loop {
        match child.try_wait() {
            Ok(Some(status)) => return Some(status.success()),
            Ok(None) if Instant::now() < deadline => thread::sleep(WAIT_POLL),
            Ok(None) | Err(_) => {
                let _ = child.kill();
                let _ = child.wait();
                return None;
            }
        }
    }
}

/// Run `command`, capturing both streams, and give up after `timeout`.
fn run_captured(mut command: Command, timeout: Duration) -> Option<CapturedOutput> {
    let mut child = command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|err| debug!(%err, "context command failed to start"))
        .ok()?;
    // Readers run on their own threads so a chatty man page cannot fill the pipe.
    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());
    let finished = wait_with_deadline(&mut child, timeout);
    let stdout = stdout.join().unwrap_or_default();
    let stderr = stderr.join().unwrap_or_default();
    let Some(success) = finished else {
        debug!(?timeout, "context command timed out");
        return None;
    };
    Some(CapturedOutput {
        success,
        stdout,
        stderr,
    })
}

/// Output of `cmd --help`, preferring stdout and falling back to stderr.
#[must_use]
pub fn get_help_output(cmd: &str) -> Option<String> {
    let mut command = Command::new(cmd);
    command.arg("--help");
    let output = run_captured(command, HELP_TIMEOUT)?;
    let text = if output.stdout.trim().is_empty() {
        output.stderr
    } else {
        output.stdout
    };
    let text = text.trim();
    debug!(cmd, chars = text.len(), "help output");
    (!text.is_empty()).then(|| text.to_string())
}

/// Plain-text man page for `cmd`, cut to `max_lines` lines.
#[must_use]
pub fn get_man_page(cmd: &str, max_lines: usize) -> Option<String> {
    let mut command = Command::new("man");
    command.arg(cmd).env("MANPAGER", "cat").env("MANWIDTH", "120");
    let output = run_captured(command, MAN_TIMEOUT)?;
    if !output.success || output.stdout.trim().is_empty() {
        debug!(cmd, "man page unavailable");
        return None;
    }
    Some(truncate_lines(output.stdout.trim(), max_lines))
}

fn truncate_lines(text: &str, max_lines: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let total = lines.len();
    if total <= max_lines {
        return lines.join("\n");
    }
    let mut kept = lines[..max_lines].join("\n");
    kept.push_str(&format!(
        "\n\n... (truncated, {max_lines} of {total} lines shown)"
    ));
    kept
}

/// Documentation sections for `cmd`, or an empty string without a command.
#[must_use]
pub fn gather_context(cmd: Option<&str>) -> String {
    let Some(cmd) = cmd else {
        return String::new();
    };
    let mut parts = Vec::new();
    if let Some(help) = get_help_output(cmd) {
        parts.push(format!("=== {cmd} --help ===\n{help}"));
    }
    if let Some(man) = get_man_page(cmd, MAN_MAX_LINES) {
        parts.push(format!("=== man {cmd} ===\n{man}"));
    }
    if parts.is_empty() {
        parts.push(format!(
            "No documentation found for '{cmd}'. Rely on general knowledge."
        ));
    }
    let context = parts.join("\n\n");
    debug!(cmd, chars = context.len(), "gathered context");
    context
}

fn os_release_name(contents: &str) -> Option<String> {
    let mut name = None;
    for line in contents.lines() {
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let value = value.trim().trim_matches('"').to_string();
        match key.trim() {
            "PRETTY_NAME" => return Some(value),
            "NAME" => name = Some(value),
            _ => {}
        }
    }
    name
}

fn distro() -> String {
    if cfg!(target_os = "macos") {
        let version = Command::new("sw_vers")
            .arg("-productVersion")
            .output()
            .ok()
            .map(|out| String::from_utf8_lossy(&out.stdout).trim().to_string())
            .filter(|version| !version.is_empty());
        return match version {
            Some(version) => format!("macOS {version}"),
            None => "macOS".to_string(),
        };
    }
    fs::read_to_string("/etc/os-release")
        .ok()
        .and_then(|contents| os_release_name(&contents))
        .unwrap_or_else(|| env::consts::OS.to_string())
}

#[cfg(unix)]
fn kernel_release() -> String {
    // SAFETY: `uname` fills a zeroed, caller-owned struct.
    unsafe {
        let mut info: libc::utsname = std::mem::zeroed();
        if libc::uname(&mut info) != 0 {
            return String::new();
        }
        std::ffi::CStr::from_ptr(info.release.as_ptr())
            .to_string_lossy()
            .into_owned()
    }
}

#[cfg(not(unix))]
fn kernel_release() -> String {
    String::new()
}

/// `OS: <distro> (<kernel>)` and `Shell: <$SHELL>` lines for the prompt.
#[must_use]
pub fn system_info() -> String {
    let shell = env::var("SHELL").unwrap_or_else(|_| "unknown".to_string());
    format!("OS: {} ({})\nShell: {shell}", distro(), kernel_release())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_command_means_no_context() {
        assert_eq!(gather_context(None), "");
    }

    #[test]
    fn unknown_command_falls_back_to_general_knowledge() {
        let context = gather_context(Some("tutr-definitely-not-a-command"));
        assert_eq!(
            context,
            "No documentation found for 'tutr-definitely-not-a-command'. Rely on general knowledge."
        );
        assert!(get_help_output("tutr-definitely-not-a-command").is_none());
    }

    #[test]
    fn truncation_appends_note() {
        let text = (1..=5).map(|n| n.to_string()).collect::<Vec<_>>().join("\n");
        assert_eq!(
            truncate_lines(&text, 2),
            "1\n2\n\n... (truncated, 2 of 5 lines shown)"
        );
        assert_eq!(truncate_lines(&text, 5), text);
    }

    #[cfg(unix)]
    #[test]
    fn help_output_falls_back_to_stderr() {
        let dir = tempfile::tempdir().expect("tempdir");
        let script = dir.path().join("noisy");
        fs::write(&script, "#!/bin/sh\necho \"usage: noisy\" >&2\nexit 2\n").expect("write");
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).expect("chmod");
        let help = get_help_output(script.to_str().expect("utf8 path"));
        assert_eq!(help.as_deref(), Some("usage: noisy"));
    }

    #[cfg(unix)]
    #[test]
    fn slow_command_times_out() {
        let mut command = Command::new("sh");
        command.args(["-c", "exec sleep 5"]);
        let started = Instant::now();
        assert!(run_captured(command, Duration::from_millis(200)).is_none());
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[test]
    fn os_release_prefers_pretty_name() {
        assert_eq!(
            os_release_name("NAME=\"Debian\"\nPRETTY_NAME=\"Debian GNU/Linux 12\"\n").as_deref(),
            Some("Debian GNU/Linux 12")
        );
        assert_eq!(os_release_name("NAME=Arch\n").as_deref(), Some("Arch"));
        assert_eq!(os_release_name("ID=x\n"), None);
    }

    #[test]
    fn system_info_has_two_lines() {
        let info = system_info();
        assert!(info.starts_with("OS: "));
        assert!(info.lines().nth(1).is_some_and(|line| line.starts_with("Shell: ")));
    }
}
