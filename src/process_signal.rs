//! Signal delivery for the wrapped shell's job tree and the suggestion worker.

use std::io;

/// How a signal reached its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Delivery {
    /// The whole process group `-pid` (the shell after `setsid`).
    Group,
    /// Only the pid itself (a worker sharing our group).
    Pid,
    /// Neither existed and the caller accepts that.
    Gone,
    /// Non-positive pid, nothing sent.
    Skipped,
}

fn send(target: libc::pid_t, signal: i32) -> io::Result<()> {
    // SAFETY: kill takes plain integers; errno is read immediately after.
    if unsafe { libc::kill(target, signal) } == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

fn is_no_such_process(err: &io::Error) -> bool {
    err.raw_os_error() == Some(libc::ESRCH)
}

/// Signal `-pid` first, then `pid`.
///
/// `missing_is_ok` turns a final `ESRCH` from the direct pid into
/// [`Delivery::Gone`]; a missing group alone never does.
pub(crate) fn signal_process_group_or_pid(
    pid: i32,
    signal: i32,
    missing_is_ok: bool,
) -> io::Result<Delivery> {
    if pid <= 0 {
        return Ok(Delivery::Skipped);
    }
    let group_err = match send(-pid, signal) {
        Ok(()) => return Ok(Delivery::Group),
        Err(err) => err,
    };
    match send(pid, signal) {
        Ok(()) => Ok(Delivery::Pid),
        Err(err) if missing_is_ok && is_no_such_process(&err) => Ok(Delivery::Gone),
        Err(pid_err) => Err(io::Error::new(
            pid_err.kind(),
            format!("signal {signal} to group -{pid} failed ({group_err}) and to pid {pid} failed ({pid_err})"),
        )),
    }
}
