//! Shell selection and launch configuration.

use super::hooks::{
    write_bash_rcfile, write_powershell_profile, write_zsh_dotdir, USER_ZDOTDIR_ENV,
};
use anyhow::Result;
use std::collections::BTreeMap;
use std::env;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

pub const SHELL_OVERRIDE_ENV: &str = "TUTR_SHELL";
pub const ACTIVE_ENV: &str = "TUTR_ACTIVE";
pub const AUTOSTARTED_ENV: &str = "TUTR_AUTOSTARTED";

const UNIX_FALLBACKS: &[&str] = &["bash", "zsh"];
const WINDOWS_FALLBACKS: &[&str] = &["pwsh", "powershell"];

/// Shell families with a hook implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShellKind {
    Bash,
    Zsh,
    PowerShell,
}

impl ShellKind {
    /// Classify a candidate by executable basename, ignoring case and `.exe`.
    #[must_use]
    pub fn classify(candidate: &str) -> Option<Self> {
        let trimmed = candidate.trim();
        let base = trimmed
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or(trimmed)
            .to_ascii_lowercase();
        let base = base.strip_suffix(".exe").unwrap_or(&base);
        match base {
            "bash" => Some(Self::Bash),
            "zsh" => Some(Self::Zsh),
            "pwsh" | "powershell" => Some(Self::PowerShell),
            _ => None,
        }
    }

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Bash => "bash",
            Self::Zsh => "zsh",
            Self::PowerShell => "powershell",
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ShellDetectError {
    #[error("no supported shell found (tried: {}); set TUTR_SHELL to bash, zsh, or pwsh", .tried.join(", "))]
    NoShell { tried: Vec<String> },
}

/// A classified shell that resolved to an executable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectedShell {
    pub kind: ShellKind,
    pub executable: PathBuf,
}

/// Everything needed to exec the wrapped shell once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellLaunchConfig {
    pub kind: ShellKind,
    pub executable: PathBuf,
    pub argv: Vec<OsString>,
    pub env: BTreeMap<OsString, OsString>,
    /// Removed when the session ends, whatever the exit path.
    pub cleanup_paths: Vec<PathBuf>,
}

/// Override first, then `$SHELL`, then the per-OS fallbacks.
#[must_use]
pub fn shell_candidates(
    override_shell: Option<&str>,
    login_shell: Option<&str>,
    windows: bool,
) -> Vec<String> {
    let fallbacks = if windows {
        WINDOWS_FALLBACKS
    } else {
        UNIX_FALLBACKS
    };
    let mut candidates: Vec<String> = Vec::new();
    for candidate in [override_shell, login_shell]
        .into_iter()
        .flatten()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .chain(fallbacks.iter().copied())
    {
        if !candidates.iter().any(|seen| seen == candidate) {
            candidates.push(candidate.to_string());
        }
    }
    candidates
}

fn has_separator(candidate: &str) -> bool {
    candidate.contains('/') || (cfg!(windows) && candidate.contains('\\'))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    fs::metadata(path).is_ok_and(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    fs::metadata(path).is_ok_and(|meta| meta.is_file())
}

/// Explicit paths must exist and be executable; bare names go through `PATH`.
#[must_use]
pub fn resolve_executable(candidate: &str) -> Option<PathBuf> {
    if has_separator(candidate) {
        let path = PathBuf::from(candidate);
        return is_executable(&path).then_some(path);
    }
    which::which(candidate).ok()
}

/// First candidate that both classifies and resolves.
///
/// # Errors
///
/// Returns [`ShellDetectError::NoShell`] when nothing usable is found.
pub fn detect_from(candidates: &[String]) -> Result<DetectedShell, ShellDetectError> {
    for candidate in candidates {
        let Some(kind) = ShellKind::classify(candidate) else {
            debug!(candidate = %candidate, "skipping unsupported shell");
            continue;
        };
        if let Some(executable) = resolve_executable(candidate) {
            debug!(kind = kind.name(), executable = %executable.display(), "detected shell");
            return Ok(DetectedShell { kind, executable });
        }
    }
    Err(ShellDetectError::NoShell {
        tried: candidates.to_vec(),
    })
}

/// Detect from `TUTR_SHELL`, `SHELL`, and the host OS.
///
/// # Errors
///
/// Returns [`ShellDetectError::NoShell`] when nothing usable is found.
pub fn detect_shell() -> Result<DetectedShell, ShellDetectError> {
    let override_shell = env::var(SHELL_OVERRIDE_ENV).ok();
    let login_shell = env::var("SHELL").ok();
    detect_from(&shell_candidates(
        override_shell.as_deref(),
        login_shell.as_deref(),
        cfg!(windows),
    ))
}

/// What to do when `tutr shell` starts under an existing supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NestedSession {
    /// Started from the user's startup files inside a session: exit 0 quietly.
    Autostarted,
    /// Started by hand inside a session: refuse with a diagnostic.
    Refuse,
}

fn is_set(value: Option<&OsString>) -> bool {
    value.is_some_and(|value| !value.is_empty())
}

/// Classify the environment markers a supervised shell inherits.
#[must_use]
pub fn nested_session(
    active: Option<&OsString>,
    autostarted: Option<&OsString>,
) -> Option<NestedSession> {
    if !is_set(active) {
        None
    } else if is_set(autostarted) {
        Some(NestedSession::Autostarted)
    } else {
        Some(NestedSession::Refuse)
    }
}

/// [`nested_session`] for the current process environment.
#[must_use]
pub fn current_nested_session() -> Option<NestedSession> {
    nested_session(
        env::var_os(ACTIVE_ENV).as_ref(),
        env::var_os(AUTOSTARTED_ENV).as_ref(),
    )
}

fn base_env() -> BTreeMap<OsString, OsString> {
    let mut vars: BTreeMap<OsString, OsString> = env::vars_os().collect();
    vars.insert(ACTIVE_ENV.into(), "1".into());
    vars.insert(AUTOSTARTED_ENV.into(), "1".into());
    vars
}

fn powershell_dot_source(profile: &Path) -> OsString {
    let quoted = profile.display().to_string().replace('\'', "''");
    format!(". '{quoted}'").into()
}

/// Write the hook artifact for `shell` and build its argv and environment.
///
/// # Errors
///
/// Returns an error when the hook artifact cannot be written.
pub fn build_launch_config(shell: &DetectedShell) -> Result<ShellLaunchConfig> {
    let executable = shell.executable.clone();
    let mut env = base_env();
    let mut argv: Vec<OsString> = vec![executable.clone().into_os_string()];
    let cleanup_paths = match shell.kind {
        ShellKind::Bash => {
            let rcfile = write_bash_rcfile()?;
            argv.push("--rcfile".into());
            argv.push(rcfile.clone().into_os_string());
            argv.push("-i".into());
            vec![rcfile]
        }
        ShellKind::Zsh => {
            let dotdir = write_zsh_dotdir()?;
            let user_dotdir = env
                .get(&OsString::from("ZDOTDIR"))
                .or_else(|| env.get(&OsString::from("HOME")))
                .cloned()
                .unwrap_or_default();
            env.insert(USER_ZDOTDIR_ENV.into(), user_dotdir);
            env.insert("ZDOTDIR".into(), dotdir.clone().into_os_string());
            argv.push("-i".into());
            vec![dotdir]
        }
        ShellKind::PowerShell => {
            let profile = write_powershell_profile()?;
            argv.extend(["-NoLogo", "-NoProfile", "-NoExit", "-Command"].map(OsString::from));
            argv.push(powershell_dot_source(&profile));
            vec![profile]
        }
    };
    Ok(ShellLaunchConfig {
        kind: shell.kind,
        executable,
        argv,
        env,
        cleanup_paths,
    })
}

/// Remove session artifacts, ignoring anything already gone or unremovable.
pub fn remove_cleanup_paths(paths: &[PathBuf]) {
    for path in paths {
        let result = if path.is_dir() {
            fs::remove_dir_all(path)
        } else {
            fs::remove_file(path)
        };
        if let Err(err) = result {
            debug!(path = %path.display(), %err, "cleanup skipped");
        }
    }
}
