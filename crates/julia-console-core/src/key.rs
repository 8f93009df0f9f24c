//! Keyboard events and their editor-style keystroke strings.
//!
//! A keystroke string is the modifiers in fixed order (`ctrl`, `alt`,
//! `shift`, `cmd`) followed by the key name, joined with `-`, e.g.
//! `ctrl-shift-p`. Allow-lists compare against this form lower-cased.

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// A physical key, without modifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Key {
    /// Printable character
    Char(char),
    /// Enter/Return key
    Enter,
    /// Tab key
    Tab,
    /// Escape key
    Escape,
    /// Backspace key
    Backspace,
    /// Delete key
    Delete,
    /// Space key
    Space,
    /// Insert key
    Insert,
    /// Up arrow
    Up,
    /// Down arrow
    Down,
    /// Left arrow
    Left,
    /// Right arrow
    Right,
    /// Home key
    Home,
    /// End key
    End,
    /// Page Up
    PageUp,
    /// Page Down
    PageDown,
    /// Function key F1..F12
    F(u8),
}

impl Key {
    fn name(&self) -> String {
        match self {
            Key::Char(c) => c.to_lowercase().collect(),
            Key::Enter => "enter".to_string(),
            Key::Tab => "tab".to_string(),
            Key::Escape => "escape".to_string(),
            Key::Backspace => "backspace".to_string(),
            Key::Delete => "delete".to_string(),
            Key::Space => "space".to_string(),
            Key::Insert => "insert".to_string(),
            Key::Up => "up".to_string(),
            Key::Down => "down".to_string(),
            Key::Left => "left".to_string(),
            Key::Right => "right".to_string(),
            Key::Home => "home".to_string(),
            Key::End => "end".to_string(),
            Key::PageUp => "pageup".to_string(),
            Key::PageDown => "pagedown".to_string(),
            Key::F(n) => format!("f{n}"),
        }
    }

    fn from_name(name: &str) -> Result<Self> {
        let lower = name.to_lowercase();
        let key = match lower.as_str() {
            "enter" | "return" => Key::Enter,
            "tab" => Key::Tab,
            "escape" | "esc" => Key::Escape,
            "backspace" => Key::Backspace,
            "delete" | "del" => Key::Delete,
            "space" => Key::Space,
            "insert" | "ins" => Key::Insert,
            "up" => Key::Up,
            "down" => Key::Down,
            "left" => Key::Left,
            "right" => Key::Right,
            "home" => Key::Home,
            "end" => Key::End,
            "pageup" | "pgup" => Key::PageUp,
            "pagedown" | "pgdn" => Key::PageDown,
            _ => {
                let mut chars = lower.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) => Key::Char(c),
                    _ => match lower.strip_prefix('f').and_then(|n| n.parse::<u8>().ok()) {
                        Some(n @ 1..=12) => Key::F(n),
                        _ => return Err(Error::InvalidKey(name.to_string())),
                    },
                }
            }
        };
        Ok(key)
    }
}

/// Modifier state of a key event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Modifiers {
    /// Control held
    pub ctrl: bool,
    /// Alt/Option held
    pub alt: bool,
    /// Shift held
    pub shift: bool,
    /// Command/Super held
    pub cmd: bool,
}

/// A key press delivered to a terminal surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KeyEvent {
    /// The key pressed
    pub key: Key,
    /// Modifiers held during the press
    pub modifiers: Modifiers,
}

impl KeyEvent {
    /// Key press without modifiers.
    pub fn new(key: Key) -> Self {
        Self {
            key,
            modifiers: Modifiers::default(),
        }
    }

    /// Add the control modifier.
    pub fn ctrl(mut self) -> Self {
        self.modifiers.ctrl = true;
        self
    }

    /// Add the alt modifier.
    pub fn alt(mut self) -> Self {
        self.modifiers.alt = true;
        self
    }

    /// Add the shift modifier.
    pub fn shift(mut self) -> Self {
        self.modifiers.shift = true;
        self
    }

    /// Add the command modifier.
    pub fn cmd(mut self) -> Self {
        self.modifiers.cmd = true;
        self
    }

    /// Parse a keystroke string such as `Ctrl-Shift-P` or `ctrl--`.
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(Error::InvalidKey(s.to_string()));
        }
        if s == "-" {
            return Ok(KeyEvent::new(Key::Char('-')));
        }

        // A trailing "-" after a separator is the minus key itself
        let (mods, key_name) = match s.strip_suffix("--") {
            Some(rest) => (rest, "-"),
            None => match s.rsplit_once('-') {
                Some((rest, key)) if !key.is_empty() => (rest, key),
                Some(_) => return Err(Error::InvalidKey(s.to_string())),
                None => ("", s),
            },
        };

        let mut event = KeyEvent::new(Key::from_name(key_name)?);
        for modifier in mods.split('-').filter(|m| !m.is_empty()) {
            match modifier.to_lowercase().as_str() {
                "ctrl" | "control" => event.modifiers.ctrl = true,
                "alt" | "option" => event.modifiers.alt = true,
                "shift" => event.modifiers.shift = true,
                "cmd" | "super" | "meta" => event.modifiers.cmd = true,
                _ => return Err(Error::InvalidKey(s.to_string())),
            }
        }
        Ok(event)
    }

    /// Normalized, lower-case keystroke string for allow-list lookups.
    pub fn keystroke(&self) -> String {
        let mut parts: Vec<String> = Vec::with_capacity(5);
        if self.modifiers.ctrl {
            parts.push("ctrl".to_string());
        }
        if self.modifiers.alt {
            parts.push("alt".to_string());
        }
        if self.modifiers.shift {
            parts.push("shift".to_string());
        }
        if self.modifiers.cmd {
            parts.push("cmd".to_string());
        }
        parts.push(self.key.name());
        parts.join("-")
    }

    /// Bytes the terminal sends to the pty for this key.
    pub fn to_escape_sequence(&self) -> Vec<u8> {
        let base = match self.key {
            Key::Char(c) if self.modifiers.ctrl && c.is_ascii_alphabetic() => {
                // Ctrl+A = 0x01, Ctrl+Z = 0x1A
                vec![(c.to_ascii_lowercase() as u8) - b'a' + 1]
            }
            Key::Char(c) if self.modifiers.shift => c.to_uppercase().to_string().into_bytes(),
            Key::Char(c) => c.to_string().into_bytes(),
            Key::Enter => vec![0x0D],
            Key::Tab if self.modifiers.shift => b"\x1b[Z".to_vec(),
            Key::Tab => vec![0x09],
            Key::Escape => vec![0x1B],
            Key::Backspace => vec![0x7F],
            Key::Delete => b"\x1b[3~".to_vec(),
            Key::Space => vec![0x20],
            Key::Insert => b"\x1b[2~".to_vec(),
            Key::Up if self.modifiers.shift => b"\x1b[1;2A".to_vec(),
            Key::Down if self.modifiers.shift => b"\x1b[1;2B".to_vec(),
            Key::Right if self.modifiers.shift => b"\x1b[1;2C".to_vec(),
            Key::Left if self.modifiers.shift => b"\x1b[1;2D".to_vec(),
            Key::Up => b"\x1b[A".to_vec(),
            Key::Down => b"\x1b[B".to_vec(),
            Key::Right => b"\x1b[C".to_vec(),
            Key::Left => b"\x1b[D".to_vec(),
            Key::Home => b"\x1b[H".to_vec(),
            Key::End => b"\x1b[F".to_vec(),
            Key::PageUp => b"\x1b[5~".to_vec(),
            Key::PageDown => b"\x1b[6~".to_vec(),
            Key::F(n) => match n {
                1 => b"\x1bOP".to_vec(),
                2 => b"\x1bOQ".to_vec(),
                3 => b"\x1bOR".to_vec(),
                4 => b"\x1bOS".to_vec(),
                5 => b"\x1b[15~".to_vec(),
                6 => b"\x1b[17~".to_vec(),
                7 => b"\x1b[18~".to_vec(),
                8 => b"\x1b[19~".to_vec(),
                9 => b"\x1b[20~".to_vec(),
                10 => b"\x1b[21~".to_vec(),
                11 => b"\x1b[23~".to_vec(),
                _ => b"\x1b[24~".to_vec(),
            },
        };

        if self.modifiers.alt {
            // Alt sends ESC prefix
            let mut seq = vec![0x1B];
            seq.extend(base);
            seq
        } else {
            base
        }
    }
}

impl std::fmt::Display for KeyEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.keystroke())
    }
}
