//! Terminal input routing
//!
//! Translates renderer notifications into serial input for the machine:
//!
//! 1. Paste shortcut: read the clipboard and send its text as one write.
//! 2. Copy shortcut: trigger the platform copy, send nothing.
//! 3. Anything else: send the key's payload.
//!
//! Resizes that change the row count renegotiate the guest's terminal size
//! with `stty`. The output gate stays closed until the shell has settled, so
//! the echo of the command itself is never rendered.

use crate::error::Result;
use crate::gate::OutputGate;
use crate::machine::Machine;
use crate::terminal::Clipboard;
use crate::types::{InputEvent, InputKind, KeyEvent};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, trace};

/// What a key press should do
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyAction {
    Paste,
    Copy,
    Forward(String),
}

impl KeyAction {
    /// Classify a key press by platform copy/paste conventions
    pub fn classify(event: &KeyEvent) -> Self {
        let mods = event.modifiers;
        let key = event.key.as_str();

        if mods.ctrl && (((mods.alt || mods.shift) && key == "v") || key == "V") {
            KeyAction::Paste
        } else if mods.ctrl && (mods.alt || mods.shift) && key == "c" {
            KeyAction::Copy
        } else {
            KeyAction::Forward(event.payload.clone())
        }
    }
}

/// Command that sets the guest's terminal height
pub fn stty_rows(rows: u16) -> String {
    format!("stty rows {rows}\r\n")
}

/// Routes renderer input to the machine's serial console
pub struct InputRouter {
    machine: Arc<dyn Machine>,
    clipboard: Arc<dyn Clipboard>,
    gate: OutputGate,
    last_rows: u16,
    composing: bool,
    settle_delay: Duration,
    settle_deadline: Option<Instant>,
}

impl InputRouter {
    pub fn new(
        machine: Arc<dyn Machine>,
        clipboard: Arc<dyn Clipboard>,
        gate: OutputGate,
        settle_delay: Duration,
    ) -> Self {
        Self {
            machine,
            clipboard,
            gate,
            last_rows: 0,
            composing: false,
            settle_delay,
            settle_deadline: None,
        }
    }

    /// Sync the guest to the renderer's current size
    ///
    /// Closes the gate, sends `stty`, and schedules reopening after `settle`.
    pub fn attach(&mut self, rows: u16, settle: Duration) -> Result<()> {
        self.last_rows = rows;
        self.renegotiate(rows, settle)
    }

    pub async fn on_key(&mut self, event: &KeyEvent) -> Result<()> {
        match KeyAction::classify(event) {
            KeyAction::Paste => {
                trace!("paste");
                let text = self.clipboard.read_text().await?;
                self.machine.send_serial(&text)
            }
            KeyAction::Copy => {
                trace!("copy");
                self.clipboard.copy_selection()
            }
            KeyAction::Forward(payload) => {
                trace!("key: {:?}", payload);
                self.machine.send_serial(&payload)
            }
        }
    }

    /// Handle composition and paste-by-input notifications
    ///
    /// A composition is forwarded once, on the update that follows the one
    /// that started it; any non-composition event ends it.
    pub fn on_input(&mut self, event: &InputEvent) -> Result<()> {
        if event.kind == InputKind::InsertCompositionText {
            if self.composing {
                self.composing = false;
                if let Some(data) = &event.data {
                    self.machine.send_serial(data)?;
                }
            } else {
                self.composing = true;
            }
        } else {
            self.composing = false;
        }

        if event.kind == InputKind::InsertFromPaste {
            if let Some(data) = &event.data {
                self.machine.send_serial(data)?;
            }
        }
        Ok(())
    }

    /// Handle a renderer resize
    ///
    /// Returns whether the guest was renegotiated. A resize during an
    /// earlier settle window replaces its deadline, so the gate reopens
    /// `settle_delay` after the latest change.
    pub fn on_resize(&mut self, rows: u16) -> Result<bool> {
        if rows == self.last_rows {
            return Ok(false);
        }
        debug!("Terminal rows changed {} -> {}", self.last_rows, rows);
        self.last_rows = rows;
        self.renegotiate(rows, self.settle_delay)?;
        Ok(true)
    }

    /// When the gate is due to reopen, if a settle window is active
    pub fn settle_deadline(&self) -> Option<Instant> {
        self.settle_deadline
    }

    /// Settle window elapsed: reopen the gate
    pub fn settle(&mut self) {
        self.settle_deadline = None;
        self.gate.open();
    }

    pub fn is_composing(&self) -> bool {
        self.composing
    }

    pub fn rows(&self) -> u16 {
        self.last_rows
    }

    fn renegotiate(&mut self, rows: u16, settle: Duration) -> Result<()> {
        self.gate.close();
        self.settle_deadline = Some(Instant::now() + settle);
        self.machine.send_serial(&stty_rows(rows))
    }
}
