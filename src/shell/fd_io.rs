//! Raw descriptor I/O for the relay: poll, read, and full writes.

use std::io::{self, ErrorKind, Read, Write};
use std::os::unix::io::RawFd;
use std::thread;
use std::time::Duration;

pub(crate) fn should_retry(err: &io::Error) -> bool {
    err.kind() == ErrorKind::Interrupted || err.kind() == ErrorKind::WouldBlock
}

/// `EIO` on the PTY master means the slave side is gone.
pub(crate) fn is_pty_closed(err: &io::Error) -> bool {
    matches!(err.raw_os_error(), Some(code) if code == libc::EIO)
}

/// Wait until any of `fds` is readable, hung up, or not open at all.
///
/// An unopened descriptor (`POLLNVAL`) counts as ready so the caller's next
/// read fails with `EBADF` and ends its loop.
///
/// A signal interrupting the wait comes back as `ErrorKind::Interrupted` so
/// the caller can handle it before waiting again.
pub(crate) fn poll_readable(fds: &[RawFd], timeout_ms: i32) -> io::Result<Vec<bool>> {
    let mut pollfds: Vec<libc::pollfd> = fds
        .iter()
        .map(|&fd| libc::pollfd {
            fd,
            events: libc::POLLIN,
            revents: 0,
        })
        .collect();
    // SAFETY: pollfds is a live, correctly sized array for the duration of the call.
    let ready = unsafe {
        libc::poll(
            pollfds.as_mut_ptr(),
            pollfds.len() as libc::nfds_t,
            timeout_ms,
        )
    };
    if ready < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(pollfds
        .iter()
        .map(|pfd| pfd.revents & (libc::POLLIN | libc::POLLHUP | libc::POLLERR | libc::POLLNVAL) != 0)
        .collect())
}

/// One `read(2)`, retried only when a signal interrupts it.
pub(crate) fn read_fd(fd: RawFd, buf: &mut [u8]) -> io::Result<usize> {
    loop {
        // SAFETY: buf is a live mutable slice and the length passed matches it.
        let read = unsafe { libc::read(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
        if read >= 0 {
            return Ok(read as usize);
        }
        let err = io::Error::last_os_error();
        if err.kind() != ErrorKind::Interrupted {
            return Err(err);
        }
    }
}

fn try_write(fd: RawFd, data: &[u8]) -> io::Result<usize> {
    if data.is_empty() {
        return Ok(0);
    }
    // SAFETY: data is a live slice and the length passed matches it.
    let written = unsafe { libc::write(fd, data.as_ptr() as *const libc::c_void, data.len()) };
    if written < 0 {
        return Err(io::Error::last_os_error());
    }
    if written == 0 {
        return Err(io::Error::new(ErrorKind::WriteZero, "write returned 0"));
    }
    Ok(written as usize)
}

/// Write every byte of `data`, retrying interrupted or would-block writes.
pub(crate) fn write_all_fd(fd: RawFd, mut data: &[u8]) -> io::Result<()> {
    while !data.is_empty() {
        match try_write(fd, data) {
            Ok(written) => data = &data[written.min(data.len())..],
            Err(err) if should_retry(&err) => thread::sleep(Duration::from_millis(1)),
            Err(err) => return Err(err),
        }
    }
    Ok(())
}

/// Borrowed descriptor usable through `Read`/`Write`; never closes the fd.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fd(pub RawFd);

impl Read for Fd {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        read_fd(self.0, buf)
    }
}

impl Write for Fd {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        loop {
            match try_write(self.0, buf) {
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                other => return other,
            }
        }
    }

    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        write_all_fd(self.0, buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
