//! The y/N confirmation shown after a runnable suggestion.

use std::io::{self, ErrorKind, Read, Write};
use tracing::debug;

pub const AUTO_RUN_PROMPT: &str = "Run suggested command? [y/N] (Esc rejects): ";

/// What the user picked at the prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutoRunDecision {
    Accepted,
    Rejected,
    /// Input ended or failed before an answer.
    Aborted,
}

fn classify(byte: u8) -> Option<AutoRunDecision> {
    match byte {
        b'y' | b'Y' => Some(AutoRunDecision::Accepted),
        b'n' | b'N' | 0x1b | 0x03 | b'\r' | b'\n' => Some(AutoRunDecision::Rejected),
        _ => None,
    }
}

fn read_byte<R: Read>(input: &mut R) -> io::Result<Option<u8>> {
    let mut byte = [0u8; 1];
    loop {
        match input.read(&mut byte) {
            Ok(0) => return Ok(None),
            Ok(_) => return Ok(Some(byte[0])),
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        }
    }
}

/// Ask whether to run `command`; on yes, type it into the shell via `shell`.
///
/// Unrecognized keys are ignored and the prompt keeps waiting.
///
/// # Errors
///
/// Returns an error only when writing to the terminal or the shell fails.
pub fn prompt_auto_run<R, T, S>(
    command: &str,
    input: &mut R,
    terminal: &mut T,
    shell: &mut S,
) -> io::Result<AutoRunDecision>
where
    R: Read,
    T: Write,
    S: Write,
{
    terminal.write_all(AUTO_RUN_PROMPT.as_bytes())?;
    terminal.flush()?;
    loop {
        let byte = match read_byte(input) {
            Ok(Some(byte)) => byte,
            Ok(None) => {
                terminal.write_all(b"\r\n")?;
                terminal.flush()?;
                return Ok(AutoRunDecision::Aborted);
            }
            Err(err) => {
                debug!(%err, "auto-run prompt input failed");
                terminal.write_all(b"\r\n")?;
                terminal.flush()?;
                return Ok(AutoRunDecision::Aborted);
            }
        };
        match classify(byte) {
            Some(AutoRunDecision::Accepted) => {
                terminal.write_all(b"y\r\n")?;
                terminal.flush()?;
                let mut line = command.as_bytes().to_vec();
                line.push(b'\n');
                shell.write_all(&line)?;
                shell.flush()?;
                return Ok(AutoRunDecision::Accepted);
            }
            Some(decision) => {
                terminal.write_all(b"n\r\n")?;
                terminal.flush()?;
                return Ok(decision);
            }
            None => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(keys: &[u8]) -> (AutoRunDecision, String, Vec<u8>) {
        let mut input = keys;
        let mut terminal = Vec::new();
        let mut shell = Vec::new();
        let decision =
            prompt_auto_run("git status", &mut input, &mut terminal, &mut shell).expect("prompt");
        (
            decision,
            String::from_utf8(terminal).expect("utf8"),
            shell,
        )
    }

    #[test]
    fn yes_types_the_command_into_the_shell() {
        let (decision, terminal, shell) = run(b"y");
        assert_eq!(decision, AutoRunDecision::Accepted);
        assert_eq!(terminal, format!("{AUTO_RUN_PROMPT}y\r\n"));
        assert_eq!(shell, b"git status\n");
    }

    #[test]
    fn rejecting_keys_send_nothing() {
        for key in [b'n', b'N', 0x1b, 0x03, b'\r', b'\n'] {
            let (decision, terminal, shell) = run(&[key]);
            assert_eq!(decision, AutoRunDecision::Rejected, "key {key:#x}");
            assert!(terminal.ends_with("n\r\n"));
            assert!(shell.is_empty());
        }
    }

    #[test]
    fn unknown_keys_keep_waiting() {
        let (decision, _, shell) = run(b"xq Y");
        assert_eq!(decision, AutoRunDecision::Accepted);
        assert_eq!(shell, b"git status\n");
    }

    #[test]
    fn eof_aborts_with_a_newline() {
        let (decision, terminal, shell) = run(b"zz");
        assert_eq!(decision, AutoRunDecision::Aborted);
        assert_eq!(terminal, format!("{AUTO_RUN_PROMPT}\r\n"));
        assert!(shell.is_empty());
    }

    #[test]
    fn read_error_aborts() {
        struct Failing;
        impl Read for Failing {
            fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
                Err(io::Error::from(ErrorKind::BrokenPipe))
            }
        }
        let mut terminal = Vec::new();
        let mut shell = Vec::new();
        let decision =
            prompt_auto_run("ls", &mut Failing, &mut terminal, &mut shell).expect("prompt");
        assert_eq!(decision, AutoRunDecision::Aborted);
        assert!(shell.is_empty());
    }
}
