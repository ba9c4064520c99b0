// Key-name normalisation: the service speaks browser-ish names ("ArrowDown", "CTRL",
// "Return"), the driver wants a small closed set.
use crate::errors::{ChartPilotError, ChartPilotResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NamedKey {
    Enter,
    Tab,
    Escape,
    Backspace,
    Delete,
    Space,
    Up,
    Down,
    Left,
    Right,
    Home,
    End,
    PageUp,
    PageDown,
    Control,
    Alt,
    Shift,
    Meta,
    CapsLock,
    F(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverKey {
    Named(NamedKey),
    Char(char),
}

pub fn parse_key(name: &str) -> ChartPilotResult<DriverKey> {
    let trimmed = name.trim();
    let mut chars = trimmed.chars();
    if let (Some(c), None) = (chars.next(), chars.next()) {
        return Ok(match c {
            ' ' => DriverKey::Named(NamedKey::Space),
            c => DriverKey::Char(c.to_ascii_lowercase()),
        });
    }

    let lower = trimmed.to_ascii_lowercase();
    let named = match lower.as_str() {
        "enter" | "return" => NamedKey::Enter,
        "tab" => NamedKey::Tab,
        "esc" | "escape" => NamedKey::Escape,
        "backspace" => NamedKey::Backspace,
        "delete" | "del" => NamedKey::Delete,
        "space" | "spacebar" => NamedKey::Space,
        "up" | "arrowup" => NamedKey::Up,
        "down" | "arrowdown" => NamedKey::Down,
        "left" | "arrowleft" => NamedKey::Left,
        "right" | "arrowright" => NamedKey::Right,
        "home" => NamedKey::Home,
        "end" => NamedKey::End,
        "pageup" | "page_up" => NamedKey::PageUp,
        "pagedown" | "page_down" => NamedKey::PageDown,
        "ctrl" | "control" => NamedKey::Control,
        "alt" | "option" => NamedKey::Alt,
        "shift" => NamedKey::Shift,
        "win" | "cmd" | "super" | "meta" | "command" => NamedKey::Meta,
        "capslock" => NamedKey::CapsLock,
        "slash" => return Ok(DriverKey::Char('/')),
        "backslash" => return Ok(DriverKey::Char('\\')),
        other => match other.strip_prefix('f').and_then(|n| n.parse::<u8>().ok()) {
            Some(n @ 1..=12) => NamedKey::F(n),
            _ => {
                return Err(ChartPilotError::Dispatch(format!("unsupported key '{name}'")));
            }
        },
    };
    Ok(DriverKey::Named(named))
}

/// Parses a whole chord; fails on the first unknown key so nothing is half-pressed.
pub fn parse_chord(keys: &[String]) -> ChartPilotResult<Vec<DriverKey>> {
    if keys.is_empty() {
        return Err(ChartPilotError::Dispatch("hotkey without keys".into()));
    }
    keys.iter().map(|k| parse_key(k)).collect()
}
