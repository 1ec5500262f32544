//! ANSI styling for suggested commands.

use std::env;
use std::io::IsTerminal;

pub const BOLD: &str = "\x1b[1m";
pub const RED: &str = "\x1b[31m";
pub const YELLOW: &str = "\x1b[33m";
pub const CYAN: &str = "\x1b[36m";
pub const RESET: &str = "\x1b[0m";

/// Whether ANSI color should be emitted on stdout.
#[must_use]
pub fn supports_color() -> bool {
    color_allowed(
        env::var_os("NO_COLOR").is_some(),
        env::var("TERM").ok().as_deref(),
        std::io::stdout().is_terminal(),
    )
}

fn color_allowed(no_color: bool, term: Option<&str>, stdout_is_tty: bool) -> bool {
    if no_color {
        return false;
    }
    if term.is_some_and(|term| term.eq_ignore_ascii_case("dumb")) {
        return false;
    }
    stdout_is_tty
}

/// Render a command the way a shell prompt line would show it.
#[must_use]
pub fn format_suggested_command(command: &str) -> String {
    style_command(command, supports_color())
}

pub(crate) fn style_command(command: &str, color: bool) -> String {
    if color {
        format!("{BOLD}{CYAN}$ {command}{RESET}")
    } else {
        format!("$ {command}")
    }
}
