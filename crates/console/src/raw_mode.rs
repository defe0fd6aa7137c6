//! Raw mode terminal wrapper for crossterm
//!
//! Ensures the terminal is restored on drop (even on panic).

use anyhow::Result;
use crossterm::event::{DisableBracketedPaste, EnableBracketedPaste};
use crossterm::{execute, terminal};
use std::io::stdout;

/// Guard holding the host terminal in raw mode with bracketed paste
///
/// Raw mode passes every key (Ctrl+C included) through as bytes. Bracketed
/// paste lets pasted text arrive as one event instead of a key stream.
pub struct TerminalGuard {
    bracketed_paste: bool,
}

impl TerminalGuard {
    pub fn enable() -> Result<Self> {
        terminal::enable_raw_mode()?;
        let bracketed_paste = execute!(stdout(), EnableBracketedPaste).is_ok();
        Ok(Self { bracketed_paste })
    }
}

impl Drop for TerminalGuard {
    fn drop(&mut self) {
        // Best-effort restore - ignore errors during cleanup
        if self.bracketed_paste {
            let _ = execute!(stdout(), DisableBracketedPaste);
        }
        let _ = terminal::disable_raw_mode();
    }
}
