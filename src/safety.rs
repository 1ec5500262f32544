//! Dangerous-pattern screening for model-suggested shell commands.

use regex::{Regex, RegexBuilder};
use std::env;
use std::sync::OnceLock;
use thiserror::Error;

pub const ALLOW_UNSAFE_ENV: &str = "TUTR_ALLOW_UNSAFE";

const MULTI_LINE_REASON: &str = "contains multiple lines";

/// Outcome of screening one command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSafetyAssessment {
    pub is_safe: bool,
    pub reasons: Vec<String>,
}

#[derive(Debug, Error)]
#[error("Unsafe command blocked: {}", .reasons.join("; "))]
pub struct UnsafeCommandError {
    pub reasons: Vec<String>,
}

struct DangerousPattern {
    regex: Regex,
    reason: &'static str,
}

const PATTERN_TABLE: &[(&str, bool, &str)] = &[
    (
        r"\brm\s+-[^\n]*(?:r[^\n]*f|f[^\n]*r)\b",
        true,
        "contains recursive force delete (rm -rf style)",
    ),
    (
        r"\bmkfs(?:\.[a-z0-9_+-]+)?\b",
        true,
        "contains filesystem formatting command (mkfs)",
    ),
    (r"\bdd\b", true, "contains raw disk copy command (dd)"),
    (
        r"\b(?:shutdown|reboot|halt|poweroff|killall)\b",
        true,
        "contains system/process shutdown command",
    ),
    (
        r"\b(?:curl|wget)\b[^\n|]*\|\s*(?:bash|sh|zsh|ksh|fish)\b",
        true,
        "contains pipe-to-shell execution (curl|bash style)",
    ),
    (
        r":\s*\(\s*\)\s*\{[^}]*:\s*\|\s*:\s*[&;][^}]*\}\s*;?\s*:",
        true,
        "contains fork bomb pattern",
    ),
    (
        r"`[^`\n]+`|\$\([^)\n]+\)",
        false,
        "contains command substitution",
    ),
];

fn dangerous_patterns() -> &'static [DangerousPattern] {
    static PATTERNS: OnceLock<Vec<DangerousPattern>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        PATTERN_TABLE
            .iter()
            .filter_map(|(pattern, case_insensitive, reason)| {
                RegexBuilder::new(pattern)
                    .case_insensitive(*case_insensitive)
                    .build()
                    .ok()
                    .map(|regex| DangerousPattern { regex, reason })
            })
            .collect()
    })
}

fn parse_truthy(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// Whether `TUTR_ALLOW_UNSAFE` forces flagged commands through.
#[must_use]
pub fn is_unsafe_override_enabled() -> bool {
    env::var(ALLOW_UNSAFE_ENV).is_ok_and(|raw| parse_truthy(&raw))
}

/// Screen `command` against every known dangerous pattern.
#[must_use]
pub fn assess_command_safety(command: &str) -> CommandSafetyAssessment {
    let mut reasons = Vec::new();
    if command.contains('\n') || command.contains('\r') {
        reasons.push(MULTI_LINE_REASON.to_string());
    }
    for pattern in dangerous_patterns() {
        if pattern.regex.is_match(command) {
            reasons.push(pattern.reason.to_string());
        }
    }
    CommandSafetyAssessment {
        is_safe: reasons.is_empty(),
        reasons,
    }
}

/// Screen `command` and refuse flagged ones unless `allow_unsafe` is set.
///
/// # Errors
///
/// Returns [`UnsafeCommandError`] with every matched reason when the command is
/// flagged and no override is active.
pub fn enforce_command_safety(
    command: &str,
    allow_unsafe: bool,
) -> Result<CommandSafetyAssessment, UnsafeCommandError> {
    let assessment = assess_command_safety(command);
    if !assessment.is_safe && !allow_unsafe {
        return Err(UnsafeCommandError {
            reasons: assessment.reasons,
        });
    }
    Ok(assessment)
}
