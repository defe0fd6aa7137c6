//! Notification types exchanged with the machine and the renderer

/// Notification published by the machine executor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MachineEvent {
    /// One raw byte written to the serial console
    OutputByte(u8),
    /// Internal restore finished; the machine is usable
    Ready,
}

/// Notification published by the terminal renderer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RendererEvent {
    Key(KeyEvent),
    Input(InputEvent),
    Resize { rows: u16, cols: u16 },
}

/// Modifier keys held during a key press
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Modifiers {
    pub ctrl: bool,
    pub alt: bool,
    pub shift: bool,
}

impl Modifiers {
    pub const NONE: Modifiers = Modifiers {
        ctrl: false,
        alt: false,
        shift: false,
    };

    pub fn ctrl() -> Self {
        Self {
            ctrl: true,
            ..Self::NONE
        }
    }

    pub fn with_alt(mut self) -> Self {
        self.alt = true;
        self
    }

    pub fn with_shift(mut self) -> Self {
        self.shift = true;
        self
    }
}

/// Key press reported by the renderer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyEvent {
    /// Character payload the renderer wants forwarded (may be an escape sequence)
    pub payload: String,
    /// Logical key name as reported by the platform (e.g. `"v"`, `"V"`, `"Enter"`)
    pub key: String,
    pub modifiers: Modifiers,
}

impl KeyEvent {
    /// Plain key whose payload and name are the same text
    pub fn plain(text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            payload: text.clone(),
            key: text,
            modifiers: Modifiers::NONE,
        }
    }

    pub fn new(payload: impl Into<String>, key: impl Into<String>, modifiers: Modifiers) -> Self {
        Self {
            payload: payload.into(),
            key: key.into(),
            modifiers,
        }
    }
}

/// Kind of a text-input notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    /// IME composition update
    InsertCompositionText,
    /// Text inserted by a paste gesture
    InsertFromPaste,
    Other,
}

/// Text-input notification (composition, paste) reported by the renderer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputEvent {
    pub kind: InputKind,
    pub data: Option<String>,
}

impl InputEvent {
    pub fn composition(data: impl Into<String>) -> Self {
        Self {
            kind: InputKind::InsertCompositionText,
            data: Some(data.into()),
        }
    }

    pub fn paste(data: impl Into<String>) -> Self {
        Self {
            kind: InputKind::InsertFromPaste,
            data: Some(data.into()),
        }
    }

    pub fn other() -> Self {
        Self {
            kind: InputKind::Other,
            data: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_modifier_builders() {
        let mods = Modifiers::ctrl().with_shift();
        assert!(mods.ctrl && mods.shift && !mods.alt);
        assert_eq!(Modifiers::default(), Modifiers::NONE);
    }

    #[test]
    fn test_plain_key() {
        let key = KeyEvent::plain("a");
        assert_eq!(key.payload, "a");
        assert_eq!(key.key, "a");
        assert_eq!(key.modifiers, Modifiers::NONE);
    }
}
