//! crossterm key events to terminal key notifications
//!
//! Produces the byte sequence an xterm-compatible terminal would send for a
//! key, plus a DOM-style key name used for shortcut matching.

use crossterm::event::{KeyCode, KeyEvent as CtKeyEvent, KeyEventKind, KeyModifiers};
use tabvm_core::types::{KeyEvent, Modifiers};

/// Translate a key press; releases and unsupported keys yield `None`
pub fn translate(event: &CtKeyEvent) -> Option<KeyEvent> {
    if event.kind == KeyEventKind::Release {
        return None;
    }

    let modifiers = Modifiers {
        ctrl: event.modifiers.contains(KeyModifiers::CONTROL),
        alt: event.modifiers.contains(KeyModifiers::ALT),
        shift: event.modifiers.contains(KeyModifiers::SHIFT),
    };

    let (payload, key) = match event.code {
        KeyCode::Char(c) => {
            let payload = if modifiers.ctrl {
                control_byte(c).map(|b| (b as char).to_string())?
            } else {
                c.to_string()
            };
            (payload, c.to_string())
        }
        KeyCode::Enter => ("\r".into(), "Enter".into()),
        KeyCode::Tab => ("\t".into(), "Tab".into()),
        KeyCode::BackTab => ("\x1b[Z".into(), "Tab".into()),
        KeyCode::Backspace => ("\x7f".into(), "Backspace".into()),
        KeyCode::Esc => ("\x1b".into(), "Escape".into()),
        KeyCode::Up => ("\x1b[A".into(), "ArrowUp".into()),
        KeyCode::Down => ("\x1b[B".into(), "ArrowDown".into()),
        KeyCode::Right => ("\x1b[C".into(), "ArrowRight".into()),
        KeyCode::Left => ("\x1b[D".into(), "ArrowLeft".into()),
        KeyCode::Home => ("\x1b[H".into(), "Home".into()),
        KeyCode::End => ("\x1b[F".into(), "End".into()),
        KeyCode::PageUp => ("\x1b[5~".into(), "PageUp".into()),
        KeyCode::PageDown => ("\x1b[6~".into(), "PageDown".into()),
        KeyCode::Insert => ("\x1b[2~".into(), "Insert".into()),
        KeyCode::Delete => ("\x1b[3~".into(), "Delete".into()),
        KeyCode::F(n) => (function_key(n)?.into(), format!("F{n}")),
        _ => return None,
    };

    // Meta sends an ESC prefix
    let payload = if modifiers.alt && !modifiers.ctrl {
        format!("\x1b{payload}")
    } else {
        payload
    };

    Some(KeyEvent::new(payload, key, modifiers))
}

/// Ctrl+<c> as a C0 control byte
///
/// crossterm reports the bytes 0x1c..=0x1f as Ctrl+4..=7, so those digits
/// map back to the same bytes.
fn control_byte(c: char) -> Option<u8> {
    match c {
        'a'..='z' => Some(c as u8 - b'a' + 1),
        'A'..='Z' => Some(c as u8 - b'A' + 1),
        ' ' | '@' | '2' => Some(0x00),
        '[' | '3' => Some(0x1b),
        '\\' | '4' => Some(0x1c),
        ']' | '5' => Some(0x1d),
        '^' | '6' => Some(0x1e),
        '_' | '/' | '7' => Some(0x1f),
        '?' | '8' => Some(0x7f),
        _ => None,
    }
}

fn function_key(n: u8) -> Option<&'static str> {
    Some(match n {
        1 => "\x1bOP",
        2 => "\x1bOQ",
        3 => "\x1bOR",
        4 => "\x1bOS",
        5 => "\x1b[15~",
        6 => "\x1b[17~",
        7 => "\x1b[18~",
        8 => "\x1b[19~",
        9 => "\x1b[20~",
        10 => "\x1b[21~",
        11 => "\x1b[23~",
        12 => "\x1b[24~",
        _ => return None,
    })
}

/// Ctrl+], the hotkey prefix (crossterm may report it as Ctrl+5)
pub fn is_hotkey_prefix(event: &CtKeyEvent) -> bool {
    event.kind != KeyEventKind::Release
        && event.modifiers.contains(KeyModifiers::CONTROL)
        && matches!(event.code, KeyCode::Char(']') | KeyCode::Char('5'))
}
