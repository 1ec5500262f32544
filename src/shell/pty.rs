//! PTY allocation and fork/exec of the wrapped shell.

use super::detect::ShellLaunchConfig;
use anyhow::{anyhow, Context, Result};
use std::ffi::CString;
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::io::RawFd;
use std::ptr;
use tracing::debug;

/// Terminal dimensions as carried by `TIOCGWINSZ`/`TIOCSWINSZ`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSize {
    pub rows: u16,
    pub cols: u16,
    pub xpixel: u16,
    pub ypixel: u16,
}

impl Default for WindowSize {
    fn default() -> Self {
        Self {
            rows: 24,
            cols: 80,
            xpixel: 0,
            ypixel: 0,
        }
    }
}

impl WindowSize {
    fn to_raw(self) -> libc::winsize {
        libc::winsize {
            ws_row: self.rows,
            ws_col: self.cols,
            ws_xpixel: self.xpixel,
            ws_ypixel: self.ypixel,
        }
    }
}

/// Current size of the terminal behind `fd`.
pub fn read_winsize(fd: RawFd) -> io::Result<WindowSize> {
    let mut raw = libc::winsize {
        ws_row: 0,
        ws_col: 0,
        ws_xpixel: 0,
        ws_ypixel: 0,
    };
    // SAFETY: TIOCGWINSZ writes into the provided winsize struct.
    if unsafe { libc::ioctl(fd, libc::TIOCGWINSZ as _, &mut raw) } != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(WindowSize {
        rows: raw.ws_row,
        cols: raw.ws_col,
        xpixel: raw.ws_xpixel,
        ypixel: raw.ws_ypixel,
    })
}

/// Apply `size` to the terminal behind `fd`.
pub fn set_winsize(fd: RawFd, size: WindowSize) -> io::Result<()> {
    let raw = size.to_raw();
    // SAFETY: TIOCSWINSZ only reads the provided winsize struct.
    if unsafe { libc::ioctl(fd, libc::TIOCSWINSZ as _, &raw) } != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Running shell attached to the slave side of a PTY.
#[derive(Debug)]
pub struct ShellProcess {
    master_fd: RawFd,
    pid: i32,
}

/// argv/envp prepared before `fork`, so the child never allocates.
struct ExecImage {
    path: CString,
    argv: Vec<CString>,
    envp: Vec<CString>,
}

impl ExecImage {
    fn from_config(config: &ShellLaunchConfig) -> Result<Self> {
        let path = CString::new(config.executable.as_os_str().as_bytes())
            .context("shell path contains NUL byte")?;
        let argv = config
            .argv
            .iter()
            .map(|arg| CString::new(arg.as_bytes()))
            .collect::<Result<Vec<_>, _>>()
            .context("shell argument contains NUL byte")?;
        let envp = config
            .env
            .iter()
            .filter(|(key, _)| !key.is_empty() && !key.as_bytes().contains(&b'='))
            .filter_map(|(key, value)| {
                let mut entry = key.as_bytes().to_vec();
                entry.push(b'=');
                entry.extend_from_slice(value.as_bytes());
                CString::new(entry).ok()
            })
            .collect();
        Ok(Self { path, argv, envp })
    }
}

impl ShellProcess {
    /// Open a PTY sized to `size` and exec the configured shell on its slave side.
    ///
    /// # Errors
    ///
    /// Returns an error if PTY allocation or `fork` fails. An `exec` failure
    /// only terminates the child, which the caller observes through [`wait`].
    ///
    /// [`wait`]: ShellProcess::wait
    pub fn spawn(config: &ShellLaunchConfig, size: WindowSize) -> Result<Self> {
        let image = ExecImage::from_config(config)?;
        let mut argv_ptrs: Vec<*const libc::c_char> =
            image.argv.iter().map(|arg| arg.as_ptr()).collect();
        argv_ptrs.push(ptr::null());
        let mut envp_ptrs: Vec<*const libc::c_char> =
            image.envp.iter().map(|var| var.as_ptr()).collect();
        envp_ptrs.push(ptr::null());

        let mut master_fd: RawFd = -1;
        let mut slave_fd: RawFd = -1;
        let mut winsize = size.to_raw();

        // SAFETY: openpty writes the two fds; winsize is a live stack value.
        unsafe {
            if libc::openpty(
                &mut master_fd,
                &mut slave_fd,
                ptr::null_mut(),
                ptr::null_mut(),
                &mut winsize,
            ) != 0
            {
                return Err(errno_error("openpty failed"));
            }
            if let Err(err) = set_cloexec(master_fd).and_then(|()| set_cloexec(slave_fd)) {
                close_fd(master_fd);
                close_fd(slave_fd);
                return Err(err);
            }

            let pid = libc::fork();
            if pid < 0 {
                close_fd(master_fd);
                close_fd(slave_fd);
                return Err(errno_error("fork failed"));
            }
            if pid == 0 {
                child_exec(master_fd, slave_fd, &image.path, &argv_ptrs, &envp_ptrs);
            }
            close_fd(slave_fd);
            debug!(pid, shell = %config.executable.display(), "spawned shell");
            Ok(Self { master_fd, pid })
        }
    }

    #[must_use]
    pub fn master_fd(&self) -> RawFd {
        self.master_fd
    }

    #[must_use]
    pub fn pid(&self) -> i32 {
        self.pid
    }

    /// Close the master (the shell sees hangup) and reap the child.
    ///
    /// # Errors
    ///
    /// Returns an error if `waitpid` fails for a reason other than an
    /// interrupting signal.
    pub fn wait(mut self) -> Result<i32> {
        // SAFETY: master_fd is owned by this session and closed exactly once.
        unsafe {
            close_fd(self.master_fd);
        }
        self.master_fd = -1;
        let mut status = 0;
        loop {
            // SAFETY: pid is this session's child; status is a live out-param.
            let ret = unsafe { libc::waitpid(self.pid, &mut status, 0) };
            if ret >= 0 {
                break;
            }
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                self.pid = -1;
                return Err(anyhow!("waitpid failed: {err}"));
            }
        }
        self.pid = -1;
        Ok(exit_code_from_status(status))
    }
}

impl Drop for ShellProcess {
    fn drop(&mut self) {
        // SAFETY: fds/pids are owned by this session; -1 marks released handles.
        unsafe {
            close_fd(self.master_fd);
            if self.pid > 0 {
                let mut status = 0;
                let _ = libc::waitpid(self.pid, &mut status, libc::WNOHANG);
            }
        }
    }
}

/// Exit status of a normal exit, or `128 + signal` for a killed shell.
#[must_use]
pub fn exit_code_from_status(status: libc::c_int) -> i32 {
    if libc::WIFEXITED(status) {
        libc::WEXITSTATUS(status)
    } else if libc::WIFSIGNALED(status) {
        128 + libc::WTERMSIG(status)
    } else {
        1
    }
}

/// Runs in the forked child: attach the slave as controlling terminal and exec.
///
/// # Safety
///
/// Must only be called in the child after `fork()`. Never returns.
unsafe fn child_exec(
    master_fd: RawFd,
    slave_fd: RawFd,
    path: &CString,
    argv: &[*const libc::c_char],
    envp: &[*const libc::c_char],
) -> ! {
    unsafe fn fail(context: &[u8]) -> ! {
        // SAFETY: write and _exit are async-signal-safe.
        unsafe {
            let _ = libc::write(
                libc::STDERR_FILENO,
                context.as_ptr() as *const libc::c_void,
                context.len(),
            );
            libc::_exit(127);
        }
    }

    close_fd(master_fd);
    if libc::setsid() == -1 {
        fail(b"tutr: setsid failed\n");
    }
    if libc::ioctl(slave_fd, libc::TIOCSCTTY as _, 0) == -1 {
        fail(b"tutr: ioctl(TIOCSCTTY) failed\n");
    }
    if libc::dup2(slave_fd, libc::STDIN_FILENO) < 0
        || libc::dup2(slave_fd, libc::STDOUT_FILENO) < 0
        || libc::dup2(slave_fd, libc::STDERR_FILENO) < 0
    {
        fail(b"tutr: dup2 failed\n");
    }
    if slave_fd > libc::STDERR_FILENO {
        close_fd(slave_fd);
    }
    libc::execve(path.as_ptr(), argv.as_ptr(), envp.as_ptr());
    fail(b"tutr: exec of shell failed\n");
}

fn set_cloexec(fd: RawFd) -> Result<()> {
    // SAFETY: fcntl on a descriptor this module just opened.
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFD) };
    if flags < 0 {
        return Err(errno_error("fcntl(F_GETFD) failed"));
    }
    // SAFETY: same descriptor; only the close-on-exec bit changes.
    if unsafe { libc::fcntl(fd, libc::F_SETFD, flags | libc::FD_CLOEXEC) } < 0 {
        return Err(errno_error("fcntl(F_SETFD, FD_CLOEXEC) failed"));
    }
    Ok(())
}

pub(crate) fn errno_error(context: &str) -> anyhow::Error {
    anyhow!("{context}: {}", io::Error::last_os_error())
}

/// # Safety
///
/// `fd` must be open and owned by the caller, or negative.
pub(crate) unsafe fn close_fd(fd: RawFd) {
    if fd >= 0 {
        let _ = libc::close(fd);
    }
}
