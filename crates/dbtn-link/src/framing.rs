//! Newline-delimited framing for the device link
//!
//! The device writes one command per line. Reads from the port arrive in
//! arbitrary chunks, so a line can be split across several reads or several
//! lines can arrive in one read.

/// Longest line we keep buffering before giving up on it
pub const MAX_LINE_LEN: usize = 256;

/// Buffers raw bytes and yields complete, trimmed, non-empty lines.
///
/// `\r` is treated as whitespace, so `\r\n` endings are handled. Invalid
/// UTF-8 is decoded lossily. A line longer than [`MAX_LINE_LEN`] is dropped
/// up to its terminating newline.
#[derive(Debug, Default)]
pub struct LineFramer {
    buffer: Vec<u8>,
    /// Set while discarding the remainder of an oversized line
    overflowed: bool,
}

impl LineFramer {
    pub fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(64),
            overflowed: false,
        }
    }

    /// Feed a chunk of bytes, returning every line it completed
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();

        for &b in bytes {
            if b == b'\n' {
                if !self.overflowed {
                    if let Some(line) = decode_line(&self.buffer) {
                        lines.push(line);
                    }
                }
                self.buffer.clear();
                self.overflowed = false;
                continue;
            }

            if self.overflowed {
                continue;
            }

            if self.buffer.len() >= MAX_LINE_LEN {
                tracing::debug!("Discarding oversized line from device");
                self.buffer.clear();
                self.overflowed = true;
                continue;
            }

            self.buffer.push(b);
        }

        lines
    }

    /// Bytes held for an incomplete line
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
        self.overflowed = false;
    }
}

fn decode_line(raw: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(raw);
    let trimmed = text.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
