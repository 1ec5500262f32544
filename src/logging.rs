//! Debug logging that never corrupts a raw-mode terminal.
//!
//! One-shot queries log plain lines to stderr. The shell supervisor and its
//! suggestion worker share the terminal with the wrapped shell, so they log
//! JSON lines to a file instead.

use std::env;
use std::fs::OpenOptions;
use std::io;
use std::path::PathBuf;
use std::sync::{Mutex, OnceLock};
use tracing::Level;
use tracing_subscriber::fmt::time::UtcTime;

const LOG_PATH_ENV: &str = "TUTR_LOG";
const LOG_FILE_NAME: &str = "tutr_shell.log";

static TRACING_INIT: OnceLock<()> = OnceLock::new();

/// Where log lines go once logging is enabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogTarget {
    Stderr,
    File,
}

/// Path to the shell-mode log file.
pub fn log_file_path() -> PathBuf {
    match env::var(LOG_PATH_ENV) {
        Ok(path) if !path.trim().is_empty() => PathBuf::from(path.trim()),
        _ => env::temp_dir().join(LOG_FILE_NAME),
    }
}

fn logging_enabled(debug: bool) -> bool {
    debug || env::var(LOG_PATH_ENV).is_ok_and(|path| !path.trim().is_empty())
}

fn init_logging_once(debug: bool, target: LogTarget, once: &OnceLock<()>) {
    if !logging_enabled(debug) {
        return;
    }

    let _ = once.get_or_init(|| match target {
        LogTarget::Stderr => {
            let subscriber = tracing_subscriber::fmt()
                .with_max_level(Level::DEBUG)
                .with_writer(io::stderr)
                .without_time()
                .finish();
            let _ = tracing::subscriber::set_global_default(subscriber);
        }
        LogTarget::File => {
            let file = match OpenOptions::new()
                .create(true)
                .append(true)
                .open(log_file_path())
            {
                Ok(file) => file,
                Err(_) => return,
            };
            let subscriber = tracing_subscriber::fmt()
                .json()
                .with_max_level(Level::DEBUG)
                .with_timer(UtcTime::rfc_3339())
                .with_writer(Mutex::new(file))
                .with_current_span(false)
                .with_span_list(false)
                .finish();
            let _ = tracing::subscriber::set_global_default(subscriber);
        }
    });
}

/// Install the global subscriber (once) when `--debug` or `TUTR_LOG` asks for it.
pub fn init_logging(debug: bool, target: LogTarget) {
    init_logging_once(debug, target, &TRACING_INIT);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::fs;

    #[test]
    #[serial]
    fn log_file_path_prefers_env_override() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("trace.jsonl");
        unsafe {
            env::set_var(LOG_PATH_ENV, &path);
        }
        assert_eq!(log_file_path(), path);
        unsafe {
            env::remove_var(LOG_PATH_ENV);
        }
    }

    #[test]
    #[serial]
    fn log_file_path_defaults_to_temp_dir() {
        unsafe {
            env::remove_var(LOG_PATH_ENV);
        }
        assert_eq!(log_file_path(), env::temp_dir().join(LOG_FILE_NAME));
    }

    #[test]
    #[serial]
    fn logging_is_off_without_debug_or_env() {
        unsafe {
            env::remove_var(LOG_PATH_ENV);
        }
        assert!(!logging_enabled(false));
        assert!(logging_enabled(true));
    }

    #[test]
    #[serial]
    fn disabled_logging_creates_no_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("never.jsonl");
        unsafe {
            env::remove_var(LOG_PATH_ENV);
        }
        let once = OnceLock::new();
        init_logging_once(false, LogTarget::File, &once);
        assert!(once.get().is_none());
        assert!(!path.exists());
        let _ = fs::remove_file(path);
    }
}
