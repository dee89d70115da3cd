use serde::{Deserialize, Serialize};
use std::fmt;

/// Physical key reported by a view backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyCode {
    /// Printable key, lowercase.
    Char(char),
    Up,
    Down,
    Left,
    Right,
    Space,
    Enter,
    Escape,
    /// Backend-specific code with no dedicated variant.
    Other(u32),
}

impl KeyCode {
    /// Map an ASCII code the way terminal-style backends report keys.
    pub fn from_ascii(code: u8) -> Self {
        match code {
            b' ' => Self::Space,
            b'\r' | b'\n' => Self::Enter,
            0x1b => Self::Escape,
            c if c.is_ascii_graphic() => Self::Char(char::from(c).to_ascii_lowercase()),
            c => Self::Other(u32::from(c)),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Modifiers {
    pub shift: bool,
    pub ctrl: bool,
    pub alt: bool,
    pub super_key: bool,
}

/// One keystroke with its modifier state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KeyEvent {
    pub code: KeyCode,
    pub modifiers: Modifiers,
}

impl KeyEvent {
    pub fn new(code: KeyCode) -> Self {
        Self {
            code,
            modifiers: Modifiers::default(),
        }
    }

    pub fn with_modifiers(mut self, modifiers: Modifiers) -> Self {
        self.modifiers = modifiers;
        self
    }

    pub fn char(c: char) -> Self {
        Self::new(KeyCode::Char(c.to_ascii_lowercase()))
    }
}

impl fmt::Display for KeyEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let m = self.modifiers;
        for (on, label) in [
            (m.ctrl, "Ctrl+"),
            (m.alt, "Alt+"),
            (m.super_key, "Super+"),
            (m.shift, "Shift+"),
        ] {
            if on {
                f.write_str(label)?;
            }
        }
        match self.code {
            KeyCode::Char(c) => write!(f, "{c}"),
            KeyCode::Other(code) => write!(f, "<{code}>"),
            other => write!(f, "{other:?}"),
        }
    }
}
