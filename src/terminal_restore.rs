//! Raw-mode ownership for `tutr shell`.
//!
//! The real terminal stays raw for the whole supervised session. Leaving raw
//! mode is idempotent, so the session guard, the panic hook, and explicit
//! teardown can all call [`restore_terminal`] without coordinating.

use crossterm::terminal;
use std::io::{self, Write};
use std::panic::{self, PanicHookInfo};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Once;

static RAW_ACTIVE: AtomicBool = AtomicBool::new(false);
static PANIC_HOOK: Once = Once::new();

/// Holds the terminal in raw mode until dropped or [`RawModeGuard::leave`].
#[derive(Debug)]
pub struct RawModeGuard {
    _owned: (),
}

impl RawModeGuard {
    /// Enter raw mode: no line buffering, no echo, and control keys arrive
    /// as bytes instead of signals.
    ///
    /// # Errors
    ///
    /// Returns an error if the terminal attributes cannot be changed; the
    /// terminal is left untouched in that case.
    pub fn enter() -> io::Result<Self> {
        install_terminal_panic_hook();
        terminal::enable_raw_mode()?;
        RAW_ACTIVE.store(true, Ordering::SeqCst);
        Ok(Self { _owned: () })
    }

    /// Restore the saved attributes now.
    pub fn leave(self) {
        drop(self);
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        restore_terminal();
    }
}

/// Whether this process currently holds the terminal in raw mode.
#[must_use]
pub fn is_raw_mode_active() -> bool {
    RAW_ACTIVE.load(Ordering::SeqCst)
}

/// Leave raw mode if this process entered it.
pub fn restore_terminal() {
    if RAW_ACTIVE.swap(false, Ordering::SeqCst) {
        if let Err(err) = terminal::disable_raw_mode() {
            tracing::warn!(%err, "failed to leave raw mode");
        }
    }
    let _ = io::stdout().flush();
}

fn panic_message(info: &PanicHookInfo<'_>) -> String {
    let payload = info.payload();
    payload
        .downcast_ref::<&str>()
        .map(|text| (*text).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string())
}

/// Restore the terminal before any panic output, then run the previous hook.
pub fn install_terminal_panic_hook() {
    PANIC_HOOK.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            restore_terminal();
            let location = info
                .location()
                .map_or_else(|| "unknown".to_string(), |loc| format!("{}:{}", loc.file(), loc.line()));
            tracing::error!(%location, message = %panic_message(info), "supervisor panicked");
            previous(info);
        }));
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn restore_is_idempotent_and_clears_flag() {
        RAW_ACTIVE.store(true, Ordering::SeqCst);
        restore_terminal();
        assert!(!is_raw_mode_active());
        restore_terminal();
        assert!(!is_raw_mode_active());
    }

    #[test]
    #[serial]
    fn guard_restores_on_leave() {
        // Without a controlling terminal `enter` fails and must not set the flag.
        match RawModeGuard::enter() {
            Ok(guard) => {
                assert!(is_raw_mode_active());
                guard.leave();
            }
            Err(_) => assert!(!is_raw_mode_active()),
        }
        assert!(!is_raw_mode_active());
    }

    #[test]
    #[serial]
    fn panic_hook_restores_before_unwinding() {
        install_terminal_panic_hook();
        RAW_ACTIVE.store(true, Ordering::SeqCst);
        let result = std::panic::catch_unwind(|| panic!("boom"));
        assert!(result.is_err());
        assert!(!is_raw_mode_active());
    }
}
