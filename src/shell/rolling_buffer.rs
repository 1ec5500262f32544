//! Bounded window of recent shell output used as suggestion context.

use std::collections::VecDeque;

pub const OUTPUT_BUFFER_SIZE: usize = 4096;
/// Characters of decoded output sent along with a failed command.
pub const CONTEXT_CHARS: usize = 2048;

#[derive(Debug)]
pub struct RollingBuffer {
    bytes: VecDeque<u8>,
    capacity: usize,
}

impl Default for RollingBuffer {
    fn default() -> Self {
        Self::with_capacity(OUTPUT_BUFFER_SIZE)
    }
}

impl RollingBuffer {
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            bytes: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append `data`, dropping the oldest bytes past capacity.
    pub fn push(&mut self, data: &[u8]) {
        if data.len() >= self.capacity {
            self.bytes.clear();
            self.bytes.extend(&data[data.len() - self.capacity..]);
            return;
        }
        let overflow = (self.bytes.len() + data.len()).saturating_sub(self.capacity);
        self.bytes.drain(..overflow);
        self.bytes.extend(data);
    }

    pub fn clear(&mut self) {
        self.bytes.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    #[must_use]
    pub fn to_vec(&self) -> Vec<u8> {
        self.bytes.iter().copied().collect()
    }

    /// Last `max_chars` characters, decoding invalid UTF-8 as U+FFFD.
    #[must_use]
    pub fn tail_text(&self, max_chars: usize) -> String {
        let decoded = String::from_utf8_lossy(&self.to_vec()).into_owned();
        let total = decoded.chars().count();
        if total <= max_chars {
            return decoded;
        }
        decoded.chars().skip(total - max_chars).collect()
    }
}
