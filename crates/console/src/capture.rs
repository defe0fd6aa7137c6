//! Console capture buffer
//!
//! Ring buffer of raw PTY output. This is the console machine's whole state:
//! saving returns the captured bytes, restoring replaces them.

use std::collections::VecDeque;

/// Bounded ring of the most recent output bytes
///
/// Raw bytes are kept as-is so ANSI sequences survive a save/restore.
#[derive(Debug)]
pub struct CaptureBuffer {
    buffer: VecDeque<u8>,
    max_bytes: usize,
}

impl CaptureBuffer {
    pub fn new(max_bytes: usize) -> Self {
        Self {
            buffer: VecDeque::with_capacity(max_bytes.min(64 * 1024)),
            max_bytes,
        }
    }

    /// Append output, evicting the oldest bytes once full
    pub fn push(&mut self, data: &[u8]) {
        let data = tail(data, self.max_bytes);
        let overflow = (self.buffer.len() + data.len()).saturating_sub(self.max_bytes);
        self.buffer.drain(..overflow);
        self.buffer.extend(data);
    }

    /// Replace the whole capture; only the newest `max_bytes` are kept
    pub fn replace(&mut self, data: &[u8]) {
        self.buffer.clear();
        self.buffer.extend(tail(data, self.max_bytes));
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.buffer.iter().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.max_bytes
    }
}

fn tail(data: &[u8], max: usize) -> &[u8] {
    &data[data.len().saturating_sub(max)..]
}
