//! Reassembles newline-terminated text from arbitrary read chunks.

use memchr::memchr;
use tracing::warn;

/// Longest partial line kept while waiting for a terminator. Anything longer
/// is line noise (wrong baud rate, garbage after a reset) and is dropped.
pub const MAX_LINE_LEN: usize = 4096;

#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
    discarding: bool,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return every line it completed, without the
    /// trailing `\n` or `\r\n`.
    pub fn push(&mut self, mut chunk: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();

        while let Some(at) = memchr(b'\n', chunk) {
            let (head, rest) = chunk.split_at(at);
            chunk = &rest[1..];

            if self.discarding {
                self.discarding = false;
                self.pending.clear();
                continue;
            }

            self.pending.extend_from_slice(head);
            if self.pending.last() == Some(&b'\r') {
                self.pending.pop();
            }
            lines.push(String::from_utf8_lossy(&self.pending).into_owned());
            self.pending.clear();
        }

        if !self.discarding {
            self.pending.extend_from_slice(chunk);
            if self.pending.len() > MAX_LINE_LEN {
                warn!(len = self.pending.len(), "discarding overlong line without terminator");
                self.pending.clear();
                self.discarding = true;
            }
        }

        lines
    }

    /// Bytes held back waiting for a terminator.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}
