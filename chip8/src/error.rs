//! Result and errors.
use std::fmt::{self, Display, Formatter};

use crate::constants::{Address, MAX_PROGRAM_SIZE};

pub type Chip8Result<T> = std::result::Result<T, Chip8Error>;

#[derive(Debug)]
pub enum Chip8Error {
    /// Attempt to load a bytecode program that can't fit in memory.
    LargeProgram { size: usize },
    /// The program counter left the range of fetchable addresses.
    ///
    /// This is fatal. The scheduler stops rather than read undefined memory.
    ProgramCounter { pc: Address },
    /// Snapshot data is malformed or was not produced by this VM.
    Snapshot(String),
    /// Key mapping definition could not be used.
    KeyMap(String),
    /// Request can only be serviced while the machine is stopped or paused.
    Busy,
    /// The scheduler thread is no longer receiving commands.
    Disconnected,
    Io(std::io::Error),
}

impl Display for Chip8Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::LargeProgram { size } => write!(
                f,
                "program too large for VM memory: {size} bytes, maximum is {MAX_PROGRAM_SIZE}"
            ),
            Self::ProgramCounter { pc } => {
                write!(f, "runtime error: program counter out of range: {pc:#06X}")
            }
            Self::Snapshot(msg) => write!(f, "snapshot error: {msg}"),
            Self::KeyMap(msg) => write!(f, "key map error: {msg}"),
            Self::Busy => write!(f, "machine must be stopped or paused"),
            Self::Disconnected => write!(f, "scheduler is not running"),
            Self::Io(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for Chip8Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Chip8Error {
    fn from(err: std::io::Error) -> Self {
        Chip8Error::Io(err)
    }
}

impl From<serde_yaml::Error> for Chip8Error {
    fn from(err: serde_yaml::Error) -> Self {
        Chip8Error::Snapshot(err.to_string())
    }
}
