// Physical input simulation. Coordinates reaching this layer are already validated.
use enigo::{Axis, Button, Coordinate, Direction, Enigo, Key, Keyboard, Mouse, Settings};

use crate::errors::{ChartPilotError, ChartPilotResult};
use crate::executor::text_input::{DriverKey, NamedKey};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointerButton {
    Left,
    Right,
    Middle,
}

/// Raw OS input primitives. Calls block until the OS has accepted the event.
pub trait InputDriver: Send + Sync {
    fn move_to(&self, x: i32, y: i32) -> ChartPilotResult<()>;
    fn click(&self, button: PointerButton, count: u32) -> ChartPilotResult<()>;
    /// Press at the first point, move through the rest, release at the last.
    fn drag(&self, button: PointerButton, path: &[(i32, i32)]) -> ChartPilotResult<()>;
    /// Wheel notches; positive scrolls right / down.
    fn scroll(&self, horizontal: i32, vertical: i32) -> ChartPilotResult<()>;
    fn type_text(&self, text: &str) -> ChartPilotResult<()>;
    fn key_tap(&self, key: DriverKey) -> ChartPilotResult<()>;
    /// Holds `keys` in order and releases them in reverse.
    fn chord(&self, keys: &[DriverKey]) -> ChartPilotResult<()>;
}

/// Drives the real mouse and keyboard through enigo. A fresh connection is opened
/// per primitive so the driver itself holds no OS handles. Drags and chords stay on
/// one connection because enigo releases held input when it is dropped.
#[derive(Debug, Default)]
pub struct EnigoDriver;

impl EnigoDriver {
    fn connect(&self) -> ChartPilotResult<Enigo> {
        Enigo::new(&Settings::default())
            .map_err(|e| ChartPilotError::Dispatch(format!("input connection failed: {e}")))
    }
}

fn dispatch_err(e: impl std::fmt::Display) -> ChartPilotError {
    ChartPilotError::Dispatch(e.to_string())
}

fn to_enigo_button(button: PointerButton) -> Button {
    match button {
        PointerButton::Left => Button::Left,
        PointerButton::Right => Button::Right,
        PointerButton::Middle => Button::Middle,
    }
}

fn to_enigo_key(key: DriverKey) -> Key {
    match key {
        DriverKey::Char(c) => Key::Unicode(c),
        DriverKey::Named(named) => match named {
            NamedKey::Enter => Key::Return,
            NamedKey::Tab => Key::Tab,
            NamedKey::Escape => Key::Escape,
            NamedKey::Backspace => Key::Backspace,
            NamedKey::Delete => Key::Delete,
            NamedKey::Space => Key::Space,
            NamedKey::Up => Key::UpArrow,
            NamedKey::Down => Key::DownArrow,
            NamedKey::Left => Key::LeftArrow,
            NamedKey::Right => Key::RightArrow,
            NamedKey::Home => Key::Home,
            NamedKey::End => Key::End,
            NamedKey::PageUp => Key::PageUp,
            NamedKey::PageDown => Key::PageDown,
            NamedKey::Control => Key::Control,
            NamedKey::Alt => Key::Alt,
            NamedKey::Shift => Key::Shift,
            NamedKey::Meta => Key::Meta,
            NamedKey::CapsLock => Key::CapsLock,
            NamedKey::F(n) => match n {
                1 => Key::F1,
                2 => Key::F2,
                3 => Key::F3,
                4 => Key::F4,
                5 => Key::F5,
                6 => Key::F6,
                7 => Key::F7,
                8 => Key::F8,
                9 => Key::F9,
                10 => Key::F10,
                11 => Key::F11,
                _ => Key::F12,
            },
        },
    }
}

impl InputDriver for EnigoDriver {
    fn move_to(&self, x: i32, y: i32) -> ChartPilotResult<()> {
        self.connect()?
            .move_mouse(x, y, Coordinate::Abs)
            .map_err(dispatch_err)
    }

    fn click(&self, button: PointerButton, count: u32) -> ChartPilotResult<()> {
        let mut enigo = self.connect()?;
        for _ in 0..count {
            enigo
                .button(to_enigo_button(button), Direction::Click)
                .map_err(dispatch_err)?;
        }
        Ok(())
    }

    fn drag(&self, button: PointerButton, path: &[(i32, i32)]) -> ChartPilotResult<()> {
        let Some((&(sx, sy), rest)) = path.split_first() else {
            return Err(ChartPilotError::Dispatch("drag without points".into()));
        };
        let mut enigo = self.connect()?;
        enigo.move_mouse(sx, sy, Coordinate::Abs).map_err(dispatch_err)?;
        enigo
            .button(to_enigo_button(button), Direction::Press)
            .map_err(dispatch_err)?;
        let moved = rest
            .iter()
            .try_for_each(|&(x, y)| enigo.move_mouse(x, y, Coordinate::Abs));
        // release even when a move failed, so the button is never left held
        let released = enigo.button(to_enigo_button(button), Direction::Release);
        moved.map_err(dispatch_err)?;
        released.map_err(dispatch_err)
    }

    fn scroll(&self, horizontal: i32, vertical: i32) -> ChartPilotResult<()> {
        let mut enigo = self.connect()?;
        if horizontal != 0 {
            enigo.scroll(horizontal, Axis::Horizontal).map_err(dispatch_err)?;
        }
        if vertical != 0 {
            enigo.scroll(vertical, Axis::Vertical).map_err(dispatch_err)?;
        }
        Ok(())
    }

    fn type_text(&self, text: &str) -> ChartPilotResult<()> {
        self.connect()?.text(text).map_err(dispatch_err)
    }

    fn key_tap(&self, key: DriverKey) -> ChartPilotResult<()> {
        self.connect()?
            .key(to_enigo_key(key), Direction::Click)
            .map_err(dispatch_err)
    }

    fn chord(&self, keys: &[DriverKey]) -> ChartPilotResult<()> {
        let mut enigo = self.connect()?;
        let mut held = Vec::with_capacity(keys.len());
        let mut result = Ok(());
        for &key in keys {
            match enigo.key(to_enigo_key(key), Direction::Press) {
                Ok(()) => held.push(key),
                Err(e) => {
                    result = Err(dispatch_err(e));
                    break;
                }
            }
        }
        for &key in held.iter().rev() {
            if let Err(e) = enigo.key(to_enigo_key(key), Direction::Release) {
                tracing::warn!(?key, error = %e, "key release failed");
            }
        }
        result
    }
}
