//! Serial output coalescing
//!
//! The machine delivers output one byte at a time with no framing. Decoding
//! each byte on its own would split multi-byte UTF-8 characters, so bytes are
//! buffered and decoded in batches. A batch is flushed either when a short
//! timer expires or immediately after a byte that is always a safe boundary:
//! LF, CR, BS, TAB or ESC.
//!
//! The timer is a deadline owned by the coalescer; the session loop sleeps
//! until it and calls [`OutputCoalescer::flush`].

use crate::gate::OutputGate;
use std::time::Duration;
use tokio::time::Instant;

/// Bytes that trigger an immediate flush
pub const BOUNDARY_BYTES: [u8; 5] = [b'\n', b'\r', 0x08, b'\t', 0x1b];

/// Accumulates output bytes and releases decoded text
pub struct OutputCoalescer {
    buffer: Vec<u8>,
    deadline: Option<Instant>,
    delay: Duration,
    gate: OutputGate,
}

impl OutputCoalescer {
    pub fn new(gate: OutputGate, delay: Duration) -> Self {
        Self {
            buffer: Vec::with_capacity(256),
            deadline: None,
            delay,
            gate,
        }
    }

    /// Append one byte
    ///
    /// Bytes arriving while the gate is closed are dropped. Returns decoded
    /// text when the byte forced a flush.
    pub fn push(&mut self, byte: u8) -> Option<String> {
        if !self.gate.is_open() {
            return None;
        }

        self.buffer.push(byte);
        if self.deadline.is_none() {
            self.deadline = Some(Instant::now() + self.delay);
        }

        if BOUNDARY_BYTES.contains(&byte) {
            return self.flush();
        }
        None
    }

    /// Decode and drain the whole buffer, cancelling any pending timer
    ///
    /// With the gate closed the buffer is dropped instead.
    pub fn flush(&mut self) -> Option<String> {
        self.deadline = None;
        if !self.gate.is_open() {
            self.buffer.clear();
            return None;
        }
        if self.buffer.is_empty() {
            return None;
        }
        let text = String::from_utf8_lossy(&self.buffer).into_owned();
        self.buffer.clear();
        Some(text)
    }

    /// Drop buffered bytes without decoding them
    pub fn discard(&mut self) {
        self.buffer.clear();
        self.deadline = None;
    }

    /// When the pending flush timer fires, if one is pending
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}

/// Sleep until `deadline`, or forever when there is none
pub async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
