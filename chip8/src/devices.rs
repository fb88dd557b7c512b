//! IO device interface
use serde::{Deserialize, Serialize};

use crate::{display::DisplayBuffer, error::Chip8Error};

/// Hooks to provide IO devices to the virtual machine.
///
/// The scheduler calls these from its own thread, so implementations
/// must hand the data over to whatever owns the real device.
pub trait Devices {
    /// Blit the display buffer to screen output.
    ///
    /// Only called when the display changed since the previous call.
    fn draw(&mut self, display: &DisplayBuffer);

    /// Sound the buzzer once. Fire and forget.
    fn beep(&mut self);

    /// The machine halted because of a fatal error.
    fn fault(&mut self, _error: &Chip8Error) {}
}

impl<T: Devices + ?Sized> Devices for Box<T> {
    fn draw(&mut self, display: &DisplayBuffer) {
        (**self).draw(display)
    }

    fn beep(&mut self) {
        (**self).beep()
    }

    fn fault(&mut self, error: &Chip8Error) {
        (**self).fault(error)
    }
}

/// Devices that discard all output.
#[derive(Debug, Default)]
pub struct Headless;

impl Devices for Headless {
    fn draw(&mut self, _display: &DisplayBuffer) {}
    fn beep(&mut self) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
#[repr(u8)]
pub enum KeyCode {
    Key0 = 0,
    Key1,
    Key2,
    Key3,
    Key4,
    Key5,
    Key6,
    Key7,
    Key8,
    Key9,
    KeyA,
    KeyB,
    KeyC,
    KeyD,
    KeyE,
    KeyF = 0xF,
}

impl KeyCode {
    pub fn as_u8(&self) -> u8 {
        *self as u8
    }
}

impl std::fmt::Display for KeyCode {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let key_id = self.as_u8();
        write!(f, "k{key_id:x}")
    }
}

impl From<KeyCode> for u8 {
    fn from(keycode: KeyCode) -> Self {
        keycode.as_u8()
    }
}

impl TryFrom<u8> for KeyCode {
    type Error = InvalidKeyCode;

    fn try_from(key_id: u8) -> Result<Self, Self::Error> {
        match key_id {
            0 => Ok(Self::Key0),
            1 => Ok(Self::Key1),
            2 => Ok(Self::Key2),
            3 => Ok(Self::Key3),
            4 => Ok(Self::Key4),
            5 => Ok(Self::Key5),
            6 => Ok(Self::Key6),
            7 => Ok(Self::Key7),
            8 => Ok(Self::Key8),
            9 => Ok(Self::Key9),
            10 => Ok(Self::KeyA),
            11 => Ok(Self::KeyB),
            12 => Ok(Self::KeyC),
            13 => Ok(Self::KeyD),
            14 => Ok(Self::KeyE),
            15 => Ok(Self::KeyF),
            _ => Err(InvalidKeyCode),
        }
    }
}

#[derive(Debug)]
pub struct InvalidKeyCode;

impl std::error::Error for InvalidKeyCode {}

impl std::fmt::Display for InvalidKeyCode {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "keycode must be in range 0 <= keycode < 16")
    }
}
