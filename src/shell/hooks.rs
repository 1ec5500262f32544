//! Startup artifacts that install the exit-status marker hook per shell family.
//!
//! Every artifact sources the user's own startup files first. The
//! post-command hook is only installed under a supervisor (`TUTR_ACTIVE` set
//! in the environment) and at most once per shell process, however many
//! times the artifact is sourced.

use anyhow::{Context, Result};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

pub const PROMPT_PREFIX_ENV: &str = "TUTR_PROMPT_PREFIX";
/// Where the zsh hook finds the user's real startup directory.
pub const USER_ZDOTDIR_ENV: &str = "TUTR_USER_ZDOTDIR";

const BASH_RC: &str = r#"[ -f ~/.bashrc ] && source ~/.bashrc

if [ -n "${TUTR_ACTIVE-}" ] && [ -z "${__TUTR_HOOK_INSTALLED-}" ]; then
    __TUTR_HOOK_INSTALLED=1
    __tutr_last_hist=""
    __tutr_seen_prompt=""
    __tutr_prompt_hook() {
        local __tutr_status=$?
        local __tutr_num="" __tutr_cmd=""
        read -r __tutr_num __tutr_cmd <<< "$(HISTTIMEFORMAT= builtin history 1)"
        # An unchanged history number means Enter on an empty line.
        if [ -z "$__tutr_seen_prompt" ] || [ "$__tutr_num" = "$__tutr_last_hist" ]; then
            __tutr_cmd=""
        fi
        __tutr_seen_prompt=1
        __tutr_last_hist=$__tutr_num
        printf '\033]7770;%d;%s\007' "$__tutr_status" "$__tutr_cmd"
        return $__tutr_status
    }
    PROMPT_COMMAND="__tutr_prompt_hook${PROMPT_COMMAND:+;$PROMPT_COMMAND}"
    PS1="${TUTR_PROMPT_PREFIX-[tutr] }$PS1"
fi
"#;

const ZSH_ENV: &str = r#"__tutr_hook_dir="$ZDOTDIR"
ZDOTDIR="${TUTR_USER_ZDOTDIR:-$HOME}"
[ -f "$ZDOTDIR/.zshenv" ] && source "$ZDOTDIR/.zshenv"
ZDOTDIR="$__tutr_hook_dir"
unset __tutr_hook_dir
"#;

const ZSH_RC: &str = r#"ZDOTDIR="${TUTR_USER_ZDOTDIR:-$HOME}"
[ -f "$ZDOTDIR/.zshrc" ] && source "$ZDOTDIR/.zshrc"

if [[ -n "${TUTR_ACTIVE-}" && -z "${__TUTR_HOOK_INSTALLED-}" ]]; then
    typeset -g __TUTR_HOOK_INSTALLED=1
    typeset -g __tutr_cmd=""
    __tutr_preexec() {
        __tutr_cmd="$1"
    }
    __tutr_precmd() {
        local __tutr_status=$?
        printf '\033]7770;%d;%s\007' "$__tutr_status" "$__tutr_cmd"
        __tutr_cmd=""
    }
    autoload -Uz add-zsh-hook
    add-zsh-hook preexec __tutr_preexec
    # First in line so $? still holds the command's status.
    precmd_functions=(__tutr_precmd ${precmd_functions:#__tutr_precmd})
    PROMPT="${TUTR_PROMPT_PREFIX-[tutr] }$PROMPT"
fi
"#;

const POWERSHELL_PROFILE: &str = r#"$__tutrUserProfile = $PROFILE.CurrentUserCurrentHost
if ($__tutrUserProfile -and (Test-Path $__tutrUserProfile)) { . $__tutrUserProfile }

if ($env:TUTR_ACTIVE -and -not (Test-Path variable:global:__TutrHookInstalled)) {
    $global:__TutrHookInstalled = $true
    $global:__TutrLastHistoryId = (Get-History -Count 1).Id
    $global:__TutrOriginalPrompt = $function:prompt
    function global:prompt {
        $succeeded = $?
        $nativeCode = $global:LASTEXITCODE
        $command = ''
        $last = Get-History -Count 1
        if ($last -and $last.Id -ne $global:__TutrLastHistoryId) {
            $command = $last.CommandLine
            $global:__TutrLastHistoryId = $last.Id
        }
        if ($succeeded) { $status = 0 } elseif ($nativeCode) { $status = $nativeCode } else { $status = 1 }
        [Console]::Write("$([char]27)]7770;$status;$command$([char]7)")
        $prefix = if ($null -ne $env:TUTR_PROMPT_PREFIX) { $env:TUTR_PROMPT_PREFIX } else { '[tutr] ' }
        if ($global:__TutrOriginalPrompt) {
            $inner = & $global:__TutrOriginalPrompt
        } else {
            $inner = "PS $($executionContext.SessionState.Path.CurrentLocation)> "
        }
        "$prefix$inner"
    }
}
"#;

fn write_temp_file(prefix: &str, suffix: &str, contents: &str) -> Result<PathBuf> {
    let mut file = tempfile::Builder::new()
        .prefix(prefix)
        .suffix(suffix)
        .tempfile()
        .context("failed to create shell hook file")?;
    file.write_all(contents.as_bytes())
        .context("failed to write shell hook file")?;
    let (_, path) = file
        .keep()
        .context("failed to persist shell hook file")?;
    Ok(path)
}

/// Temporary bash rcfile; the caller deletes it.
///
/// # Errors
///
/// Returns an error when the temp file cannot be written.
pub fn write_bash_rcfile() -> Result<PathBuf> {
    write_temp_file("tutr_", ".bashrc", BASH_RC)
}

/// Temporary `ZDOTDIR` holding `.zshenv` and `.zshrc`; the caller deletes it.
///
/// # Errors
///
/// Returns an error when the directory or its files cannot be written.
pub fn write_zsh_dotdir() -> Result<PathBuf> {
    let dir = tempfile::Builder::new()
        .prefix("tutr_zsh_")
        .tempdir()
        .context("failed to create zsh hook directory")?
        .keep();
    write_into(&dir, ".zshenv", ZSH_ENV)?;
    write_into(&dir, ".zshrc", ZSH_RC)?;
    Ok(dir)
}

fn write_into(dir: &Path, name: &str, contents: &str) -> Result<()> {
    let path = dir.join(name);
    fs::write(&path, contents).with_context(|| format!("failed to write {}", path.display()))
}

/// Temporary PowerShell profile script; the caller deletes it.
///
/// # Errors
///
/// Returns an error when the temp file cannot be written.
pub fn write_powershell_profile() -> Result<PathBuf> {
    write_temp_file("tutr_", ".ps1", POWERSHELL_PROFILE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shell::detect::ACTIVE_ENV;
    use std::process::Command;

    #[test]
    fn bash_rcfile_guards_and_emits_marker() {
        let path = write_bash_rcfile().expect("rcfile");
        let contents = fs::read_to_string(&path).expect("read");
        assert!(contents.starts_with("[ -f ~/.bashrc ] && source ~/.bashrc"));
        assert!(contents.contains("__TUTR_HOOK_INSTALLED"));
        assert!(contents.contains(r"printf '\033]7770;%d;%s\007'"));
        assert!(contents.contains("${TUTR_PROMPT_PREFIX-[tutr] }"));
        assert!(path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name.starts_with("tutr_") && name.ends_with(".bashrc")));
        fs::remove_file(path).expect("cleanup");
    }

    #[test]
    fn zsh_dotdir_has_both_startup_files() {
        let dir = write_zsh_dotdir().expect("dotdir");
        assert!(dir.is_dir());
        let env = fs::read_to_string(dir.join(".zshenv")).expect("zshenv");
        let rc = fs::read_to_string(dir.join(".zshrc")).expect("zshrc");
        assert!(env.contains(USER_ZDOTDIR_ENV));
        assert!(rc.contains("add-zsh-hook preexec __tutr_preexec"));
        assert!(rc.contains("__tutr_precmd"));
        fs::remove_dir_all(dir).expect("cleanup");
    }

    #[test]
    fn powershell_profile_wraps_prompt() {
        let path = write_powershell_profile().expect("profile");
        let contents = fs::read_to_string(&path).expect("read");
        assert!(contents.contains("function global:prompt"));
        assert!(contents.contains("]7770;$status;$command"));
        assert!(contents.contains("$PROFILE.CurrentUserCurrentHost"));
        fs::remove_file(path).expect("cleanup");
    }

    #[cfg(unix)]
    fn run_bash(script: &str, rcfile: &Path, active: bool) -> Option<Vec<u8>> {
        let bash = which::which("bash").ok()?;
        let home = tempfile::tempdir().ok()?;
        let mut command = Command::new(bash);
        if active {
            command.env(ACTIVE_ENV, "1");
        } else {
            command.env_remove(ACTIVE_ENV);
        }
        let output = command
            .arg("--noprofile")
            .arg("--norc")
            .arg("-c")
            .arg(format!(
                "set -o history; PS1='$ '; source '{}'; {script}",
                rcfile.display()
            ))
            .env("HOME", home.path())
            .env("HISTFILE", home.path().join("history"))
            .env_remove(PROMPT_PREFIX_ENV)
            .env_remove("PROMPT_COMMAND")
            .output()
            .ok()?;
        Some(output.stdout)
    }

    #[cfg(unix)]
    #[test]
    fn bash_hook_reports_status_and_skips_first_prompt_command() {
        let rcfile = write_bash_rcfile().expect("rcfile");
        let Some(stdout) = run_bash("false; __tutr_prompt_hook; __tutr_prompt_hook", &rcfile, true)
        else {
            fs::remove_file(rcfile).expect("cleanup");
            return;
        };
        fs::remove_file(&rcfile).expect("cleanup");
        let markers = crate::shell::marker::parse_all(&stdout);
        assert_eq!(markers.len(), 2, "{}", String::from_utf8_lossy(&stdout));
        assert_eq!(markers[0].exit_code, 1);
        assert_eq!(markers[0].command, "");
        assert_eq!(markers[1].command, "");
    }

    #[cfg(unix)]
    #[test]
    fn supervised_bash_installs_hook_once_across_resourcing() {
        let rcfile = write_bash_rcfile().expect("rcfile");
        let script = format!(
            "source '{}'; printf 'PC=%s\\nPS1=%s\\n' \"$PROMPT_COMMAND\" \"$PS1\"",
            rcfile.display()
        );
        let stdout = run_bash(&script, &rcfile, true);
        fs::remove_file(&rcfile).expect("cleanup");
        let Some(stdout) = stdout else { return };
        let text = String::from_utf8_lossy(&stdout);
        assert!(text.contains("PC=__tutr_prompt_hook\n"), "{text}");
        assert!(text.contains("PS1=[tutr] $ \n"), "{text}");
    }

    #[cfg(unix)]
    #[test]
    fn unsupervised_bash_leaves_prompt_alone() {
        let rcfile = write_bash_rcfile().expect("rcfile");
        let stdout = run_bash(
            "printf 'PC=%s\\nPS1=%s\\n' \"${PROMPT_COMMAND-}\" \"$PS1\"",
            &rcfile,
            false,
        );
        fs::remove_file(&rcfile).expect("cleanup");
        let Some(stdout) = stdout else { return };
        let text = String::from_utf8_lossy(&stdout);
        assert!(text.contains("PC=\nPS1=$ \n"), "{text}");
    }

    #[test]
    fn every_family_keys_install_on_the_active_marker() {
        assert!(BASH_RC.contains(r#"[ -n "${TUTR_ACTIVE-}" ]"#));
        assert!(ZSH_RC.contains(r#"-n "${TUTR_ACTIVE-}""#));
        assert!(POWERSHELL_PROFILE.contains("$env:TUTR_ACTIVE -and"));
    }
}
