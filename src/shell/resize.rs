//! Keeps the wrapped shell's PTY the same size as the user's terminal.

use super::pty::{read_winsize, set_winsize};
use crate::process_signal::signal_process_group_or_pid;
use std::io;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

static RESIZE_PENDING: AtomicBool = AtomicBool::new(false);

extern "C" fn on_resize(_: libc::c_int) {
    RESIZE_PENDING.store(true, Ordering::SeqCst);
}

/// Route SIGWINCH to a flag the relay loop drains with [`take_sigwinch`].
///
/// # Errors
///
/// Returns the OS error if the handler cannot be registered.
pub fn install_sigwinch_handler() -> io::Result<()> {
    // SAFETY: `action` is zeroed before use and `on_resize` only stores an atomic.
    let registered = unsafe {
        let mut action: libc::sigaction = std::mem::zeroed();
        action.sa_flags = libc::SA_RESTART;
        action.sa_sigaction = on_resize as extern "C" fn(libc::c_int) as libc::sighandler_t;
        libc::sigemptyset(&mut action.sa_mask);
        libc::sigaction(libc::SIGWINCH, &action, std::ptr::null_mut())
    };
    if registered == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

/// True at most once per burst of resizes.
pub fn take_sigwinch() -> bool {
    RESIZE_PENDING.swap(false, Ordering::SeqCst)
}

/// Copy `terminal_fd`'s size onto `master_fd`, then tell the shell's jobs.
pub fn propagate_resize(terminal_fd: RawFd, master_fd: RawFd, shell_pid: i32) {
    let size = match read_winsize(terminal_fd).and_then(|size| {
        set_winsize(master_fd, size)?;
        Ok(size)
    }) {
        Ok(size) => size,
        Err(err) => {
            debug!(%err, "skipping resize");
            return;
        }
    };
    match signal_process_group_or_pid(shell_pid, libc::SIGWINCH, true) {
        Ok(delivery) => debug!(rows = size.rows, cols = size.cols, ?delivery, "pty resized"),
        Err(err) => debug!(%err, "pty resized but SIGWINCH was not delivered"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shell::detect::{ShellKind, ShellLaunchConfig};
    use crate::shell::pty::{close_fd, ShellProcess, WindowSize};
    use serial_test::serial;
    use std::collections::BTreeMap;
    use std::path::PathBuf;

    #[test]
    #[serial]
    fn raised_sigwinch_is_reported_once() {
        install_sigwinch_handler().expect("install");
        RESIZE_PENDING.store(false, Ordering::SeqCst);
        // SAFETY: the handler installed above only touches an atomic.
        unsafe {
            libc::raise(libc::SIGWINCH);
        }
        assert!(take_sigwinch());
        assert!(!take_sigwinch());
    }

    #[test]
    #[serial]
    fn terminal_size_is_copied_to_the_shell_pty() {
        let (mut source, mut peer) = (-1, -1);
        // SAFETY: openpty fills both fds; name, termios and winsize may be null.
        let opened = unsafe {
            libc::openpty(
                &mut source,
                &mut peer,
                std::ptr::null_mut(),
                std::ptr::null(),
                std::ptr::null(),
            )
        };
        assert_eq!(opened, 0, "openpty");
        let wanted = WindowSize {
            rows: 33,
            cols: 101,
            ..WindowSize::default()
        };
        set_winsize(source, wanted).expect("size source");

        let mut env = BTreeMap::new();
        env.insert("PATH".into(), "/usr/bin:/bin".into());
        let config = ShellLaunchConfig {
            kind: ShellKind::Bash,
            executable: PathBuf::from("/bin/sh"),
            argv: vec!["/bin/sh".into(), "-c".into(), "sleep 2".into()],
            env,
            cleanup_paths: Vec::new(),
        };
        let shell = ShellProcess::spawn(&config, WindowSize::default()).expect("spawn");

        propagate_resize(source, shell.master_fd(), shell.pid());
        assert_eq!(read_winsize(shell.master_fd()).expect("read"), wanted);

        // SAFETY: test-owned child and fds.
        unsafe {
            libc::kill(shell.pid(), libc::SIGKILL);
            close_fd(source);
            close_fd(peer);
        }
        let _ = shell.wait();
    }

    #[test]
    fn unreadable_terminal_leaves_pty_alone() {
        propagate_resize(-1, -1, 0);
    }
}
