//! Exit-status marker protocol carried inside the shell's output stream.
//!
//! The shell hooks print `ESC ] 7770 ; <exit> ; <command> BEL` after every
//! command. Terminals ignore unknown OSC sequences, and the relay strips them
//! before anything reaches the real terminal.

use regex::bytes::Regex;
use std::sync::OnceLock;

pub const MARKER_PREFIX: &[u8] = b"\x1b]7770;";
const MARKER_TERMINATOR: u8 = 0x07;
const MAX_EXIT_DIGITS: usize = 9;
/// Longest incomplete marker held back waiting for the next read.
pub const MAX_HELD_MARKER_BYTES: usize = 8 * 1024;

/// One parsed marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkerMatch {
    pub exit_code: i32,
    /// Command text with invalid UTF-8 replaced and surrounding whitespace trimmed.
    pub command: String,
}

/// A run of ordinary output or one marker, in stream order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Piece {
    Output(Vec<u8>),
    Marker(MarkerMatch),
}

fn marker_regex() -> Option<&'static Regex> {
    static MARKER_RE: OnceLock<Option<Regex>> = OnceLock::new();
    MARKER_RE
        .get_or_init(|| Regex::new(r"(?-u)\x1b\]7770;([0-9]{1,9});([^\x07]*)\x07").ok())
        .as_ref()
}

fn to_match(caps: &regex::bytes::Captures<'_>) -> Option<MarkerMatch> {
    let digits = std::str::from_utf8(caps.get(1)?.as_bytes()).ok()?;
    Some(MarkerMatch {
        exit_code: digits.parse().ok()?,
        command: String::from_utf8_lossy(caps.get(2)?.as_bytes())
            .trim()
            .to_string(),
    })
}

/// Every complete marker in `chunk`, left to right.
#[must_use]
pub fn parse_all(chunk: &[u8]) -> Vec<MarkerMatch> {
    let Some(regex) = marker_regex() else {
        return Vec::new();
    };
    regex
        .captures_iter(chunk)
        .filter_map(|caps| to_match(&caps))
        .collect()
}

/// `chunk` with every complete marker removed.
#[must_use]
pub fn strip(chunk: &[u8]) -> Vec<u8> {
    match marker_regex() {
        Some(regex) => regex.replace_all(chunk, &b""[..]).into_owned(),
        None => chunk.to_vec(),
    }
}

/// Split `chunk` into output runs and markers, preserving order.
#[must_use]
pub fn split_pieces(chunk: &[u8]) -> Vec<Piece> {
    let Some(regex) = marker_regex() else {
        return vec![Piece::Output(chunk.to_vec())];
    };
    let mut pieces = Vec::new();
    let mut cursor = 0;
    for caps in regex.captures_iter(chunk) {
        let Some((whole, marker)) = caps.get(0).zip(to_match(&caps)) else {
            continue;
        };
        if whole.start() > cursor {
            pieces.push(Piece::Output(chunk[cursor..whole.start()].to_vec()));
        }
        pieces.push(Piece::Marker(marker));
        cursor = whole.end();
    }
    if cursor < chunk.len() {
        pieces.push(Piece::Output(chunk[cursor..].to_vec()));
    }
    pieces
}

/// Whether `tail` (which holds no BEL) could still grow into a complete
/// marker. Looks at no more than the prefix and the exit-code digits.
fn is_marker_prefix(tail: &[u8]) -> bool {
    if tail.len() <= MARKER_PREFIX.len() {
        return MARKER_PREFIX.starts_with(tail);
    }
    if !tail.starts_with(MARKER_PREFIX) {
        return false;
    }
    let rest = &tail[MARKER_PREFIX.len()..];
    let digits = rest
        .iter()
        .take(MAX_EXIT_DIGITS + 1)
        .take_while(|byte| byte.is_ascii_digit())
        .count();
    if digits > MAX_EXIT_DIGITS {
        return false;
    }
    digits == rest.len() || (digits > 0 && rest[digits] == b';')
}

/// Offset where a trailing, still-incomplete marker begins.
///
/// A held prefix never contains BEL, so only bytes after the window's last
/// BEL are candidates. One linear pass over at most the 8 KiB window.
fn incomplete_marker_start(data: &[u8]) -> Option<usize> {
    let window_start = data.len().saturating_sub(MAX_HELD_MARKER_BYTES);
    let search_from = data[window_start..]
        .iter()
        .rposition(|&byte| byte == MARKER_TERMINATOR)
        .map_or(window_start, |offset| window_start + offset + 1);
    (search_from..data.len())
        .filter(|&idx| data[idx] == 0x1b)
        .find(|&idx| is_marker_prefix(&data[idx..]))
}

/// Stateful scanner that recognizes markers split across reads.
#[derive(Debug, Default)]
pub struct MarkerScanner {
    held: Vec<u8>,
}

impl MarkerScanner {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one read; returns everything that is now safe to act on.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Piece> {
        let mut data = std::mem::take(&mut self.held);
        data.extend_from_slice(chunk);
        if let Some(start) = incomplete_marker_start(&data) {
            self.held = data.split_off(start);
        }
        split_pieces(&data)
    }

    /// Bytes still held back, released as plain output.
    pub fn finish(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.held)
    }

    #[must_use]
    pub fn held_len(&self) -> usize {
        self.held.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn marker(exit: i32, command: &str) -> Vec<u8> {
        let mut bytes = MARKER_PREFIX.to_vec();
        bytes.extend_from_slice(format!("{exit};{command}").as_bytes());
        bytes.push(MARKER_TERMINATOR);
        bytes
    }

    fn found(exit_code: i32, command: &str) -> MarkerMatch {
        MarkerMatch {
            exit_code,
            command: command.to_string(),
        }
    }

    #[test]
    fn parses_markers_in_order() {
        let mut chunk = b"out1".to_vec();
        chunk.extend(marker(1, "false"));
        chunk.extend(b"out2");
        chunk.extend(marker(0, ""));
        chunk.extend(marker(127, "nope --x"));
        assert_eq!(
            parse_all(&chunk),
            vec![found(1, "false"), found(0, ""), found(127, "nope --x")]
        );
        assert_eq!(strip(&chunk), b"out1out2");
    }

    #[test]
    fn invalid_utf8_command_is_replaced() {
        let mut chunk = MARKER_PREFIX.to_vec();
        chunk.extend_from_slice(b"2;ls \xff\xfe");
        chunk.push(MARKER_TERMINATOR);
        let parsed = parse_all(&chunk);
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].command, "ls \u{fffd}\u{fffd}");
        assert!(strip(&chunk).is_empty());
    }

    #[test]
    fn other_osc_sequences_pass_through() {
        let title = b"\x1b]0;my title\x07text";
        assert!(parse_all(title).is_empty());
        assert_eq!(strip(title), title.to_vec());
    }

    #[test]
    fn pieces_keep_output_between_markers() {
        let mut chunk = b"before".to_vec();
        chunk.extend(marker(2, "ls /missing"));
        chunk.extend(b"after");
        assert_eq!(
            split_pieces(&chunk),
            vec![
                Piece::Output(b"before".to_vec()),
                Piece::Marker(found(2, "ls /missing")),
                Piece::Output(b"after".to_vec()),
            ]
        );
    }

    #[test]
    fn scanner_joins_marker_split_across_reads() {
        let full = marker(1, "false");
        let mut scanner = MarkerScanner::new();
        let mut first = b"hello".to_vec();
        first.extend_from_slice(&full[..9]);
        assert_eq!(scanner.push(&first), vec![Piece::Output(b"hello".to_vec())]);
        assert_eq!(scanner.held_len(), 9);
        let mut second = full[9..].to_vec();
        second.extend_from_slice(b"$ ");
        assert_eq!(
            scanner.push(&second),
            vec![
                Piece::Marker(found(1, "false")),
                Piece::Output(b"$ ".to_vec())
            ]
        );
        assert!(scanner.finish().is_empty());
    }

    #[test]
    fn scanner_releases_non_marker_escapes() {
        let mut scanner = MarkerScanner::new();
        assert!(scanner.push(b"\x1b").is_empty());
        assert_eq!(
            scanner.push(b"[31mred"),
            vec![Piece::Output(b"\x1b[31mred".to_vec())]
        );
        assert_eq!(scanner.held_len(), 0);
    }

    #[test]
    fn scanner_flushes_held_prefix_on_finish() {
        let mut scanner = MarkerScanner::new();
        assert!(scanner.push(b"\x1b]7770;1;partial").is_empty());
        assert_eq!(scanner.finish(), b"\x1b]7770;1;partial".to_vec());
    }

    #[test]
    fn scanner_caps_held_bytes() {
        let mut scanner = MarkerScanner::new();
        let mut chunk = b"\x1b]7770;1;".to_vec();
        chunk.extend(std::iter::repeat(b'a').take(MAX_HELD_MARKER_BYTES));
        let pieces = scanner.push(&chunk);
        assert_eq!(pieces, vec![Piece::Output(chunk)]);
        assert_eq!(scanner.held_len(), 0);
    }

    #[test]
    fn prefix_detection() {
        assert!(is_marker_prefix(b"\x1b"));
        assert!(is_marker_prefix(b"\x1b]77"));
        assert!(is_marker_prefix(b"\x1b]7770;"));
        assert!(is_marker_prefix(b"\x1b]7770;12"));
        assert!(is_marker_prefix(b"\x1b]7770;12;git sta"));
        assert!(!is_marker_prefix(b"\x1b[0m"));
        assert!(!is_marker_prefix(b"\x1b]7770;;x"));
        assert!(!is_marker_prefix(b"\x1b]7770;1234567890"));
    }

    #[test]
    fn terminated_sequences_are_never_held() {
        let mut scanner = MarkerScanner::new();
        let mut chunk = b"\x1b]0;title\x07".to_vec();
        chunk.extend(marker(1, "x"));
        chunk.extend(b"\x1b]7770;1;done\x07 after");
        let pieces = scanner.push(&chunk);
        assert_eq!(scanner.held_len(), 0);
        assert_eq!(
            pieces.iter().filter(|piece| matches!(piece, Piece::Marker(_))).count(),
            2
        );
    }

    #[test]
    fn partial_marker_after_colored_output_is_held() {
        let mut scanner = MarkerScanner::new();
        let mut chunk = b"\x1b[31mred\x1b[0m ".repeat(600);
        chunk.extend(marker(0, "ls"));
        chunk.extend(b"\x1b[1mbold\x1b[0m");
        let partial = b"\x1b]7770;2;git sta";
        chunk.extend_from_slice(partial);
        scanner.push(&chunk);
        assert_eq!(scanner.held_len(), partial.len());
        let pieces = scanner.push(b"tus\x07");
        assert_eq!(pieces, vec![Piece::Marker(found(2, "git status"))]);
    }

    fn output_bytes() -> impl Strategy<Value = Vec<u8>> {
        prop::collection::vec(any::<u8>().prop_filter("no escape", |b| *b != 0x1b), 0..40)
    }

    fn command_text() -> impl Strategy<Value = String> {
        "[a-z0-9 ./-]{0,20}"
    }

    fn stream() -> impl Strategy<Value = (Vec<Vec<u8>>, Vec<(i32, String)>)> {
        prop::collection::vec((output_bytes(), 0i32..300, command_text()), 0..6).prop_map(
            |parts| {
                parts
                    .into_iter()
                    .map(|(out, exit, cmd)| (out, (exit, cmd)))
                    .unzip()
            },
        )
    }

    fn assemble(outputs: &[Vec<u8>], markers: &[(i32, String)]) -> Vec<u8> {
        let mut bytes = Vec::new();
        for (out, (exit, cmd)) in outputs.iter().zip(markers) {
            bytes.extend_from_slice(out);
            bytes.extend(marker(*exit, cmd));
        }
        bytes
    }

    proptest! {
        #[test]
        fn strip_removes_exactly_the_markers((outputs, markers) in stream()) {
            let chunk = assemble(&outputs, &markers);
            prop_assert_eq!(strip(&chunk), outputs.concat());
        }

        #[test]
        fn parse_all_returns_embedded_fields((outputs, markers) in stream()) {
            let chunk = assemble(&outputs, &markers);
            let expected: Vec<MarkerMatch> = markers
                .iter()
                .map(|(exit, cmd)| found(*exit, cmd.trim()))
                .collect();
            prop_assert_eq!(parse_all(&chunk), expected);
        }

        #[test]
        fn scanner_is_independent_of_read_boundaries(
            (outputs, markers) in stream(),
            cuts in prop::collection::vec(any::<prop::sample::Index>(), 0..6),
        ) {
            let data = assemble(&outputs, &markers);
            let mut offsets: Vec<usize> = cuts.iter().map(|cut| cut.index(data.len() + 1)).collect();
            offsets.sort_unstable();
            offsets.dedup();

            let mut scanner = MarkerScanner::new();
            let mut seen_output = Vec::new();
            let mut seen_markers = Vec::new();
            let mut last = 0;
            for offset in offsets.into_iter().chain(std::iter::once(data.len())) {
                for piece in scanner.push(&data[last..offset]) {
                    match piece {
                        Piece::Output(bytes) => seen_output.extend(bytes),
                        Piece::Marker(found) => seen_markers.push(found),
                    }
                }
                last = offset;
            }
            seen_output.extend(scanner.finish());

            prop_assert_eq!(seen_output, outputs.concat());
            prop_assert_eq!(seen_markers, parse_all(&data));
        }
    }
}
