//! Machine state snapshots.
//!
//! A snapshot is a YAML document holding every field of the machine state.
//! The random number generator and the loaded configuration are not part of
//! the machine state.
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

use crate::{
    constants::*,
    error::{Chip8Error, Chip8Result},
    vm::Chip8Vm,
};

const FORMAT_TAG: &str = "chip8-snapshot";
const FORMAT_VERSION: u32 = 1;

const PIXEL_ON: char = '#';
const PIXEL_OFF: char = '.';

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    format: SmolStr,
    version: u32,
    pc: Address,
    address: Address,
    registers: Vec<u8>,
    stack: Vec<Address>,
    delay_timer: u8,
    sound_timer: u8,
    /// Register waiting for a key press.
    key_wait: Option<u8>,
    /// Key pressed during the wait, not yet stored in the register.
    #[serde(default)]
    key_press: Option<u8>,
    /// Input matrix, indexed by keypad key.
    keys: Vec<bool>,
    /// Display rows, drawn with `#` and `.`.
    display: Vec<String>,
    memory: Vec<u8>,
}

/// Serialize the state of the machine.
pub fn save(vm: &Chip8Vm) -> Chip8Result<Vec<u8>> {
    Snapshot::capture(vm).to_bytes()
}

/// Replace the state of the machine with a snapshot.
///
/// On error the machine is left untouched.
pub fn load(vm: &mut Chip8Vm, blob: &[u8]) -> Chip8Result<()> {
    Snapshot::from_bytes(blob)?.restore(vm)
}

impl Snapshot {
    pub fn capture(vm: &Chip8Vm) -> Self {
        let cpu = vm.cpu();
        let display = cpu.display();

        Self {
            format: SmolStr::new(FORMAT_TAG),
            version: FORMAT_VERSION,
            pc: cpu.pc(),
            address: cpu.address(),
            registers: cpu.registers().to_vec(),
            stack: cpu.stack().to_vec(),
            delay_timer: cpu.delay_timer(),
            sound_timer: cpu.sound_timer(),
            key_wait: cpu.key_wait(),
            key_press: cpu.key_press(),
            keys: (0..KEY_COUNT).map(|k| cpu.key_state(k)).collect(),
            display: display
                .buffer()
                .chunks(DISPLAY_WIDTH)
                .map(|row| {
                    row.iter()
                        .map(|px| if *px { PIXEL_ON } else { PIXEL_OFF })
                        .collect()
                })
                .collect(),
            memory: cpu.memory().bytes().to_vec(),
        }
    }

    pub fn to_bytes(&self) -> Chip8Result<Vec<u8>> {
        Ok(serde_yaml::to_string(self)?.into_bytes())
    }

    pub fn from_bytes(blob: &[u8]) -> Chip8Result<Self> {
        let snapshot: Snapshot = serde_yaml::from_slice(blob)?;
        snapshot.validate()?;
        Ok(snapshot)
    }

    /// Check that the snapshot describes a machine this VM can become.
    fn validate(&self) -> Chip8Result<()> {
        if self.format != FORMAT_TAG {
            return Err(invalid(format!("unknown format \"{}\"", self.format)));
        }
        if self.version != FORMAT_VERSION {
            return Err(invalid(format!("unsupported version {}", self.version)));
        }

        check_len("memory", self.memory.len(), MEM_SIZE)?;
        check_len("registers", self.registers.len(), REGISTER_COUNT)?;
        check_len("keys", self.keys.len(), KEY_COUNT as usize)?;
        check_len("display rows", self.display.len(), DISPLAY_HEIGHT)?;

        for (y, row) in self.display.iter().enumerate() {
            if row.chars().count() != DISPLAY_WIDTH
                || row.chars().any(|c| c != PIXEL_ON && c != PIXEL_OFF)
            {
                return Err(invalid(format!("malformed display row {y}")));
            }
        }

        if self.pc > ADDRESS_MASK {
            return Err(invalid(format!("program counter out of range: {:#X}", self.pc)));
        }
        if self.address > ADDRESS_MASK {
            return Err(invalid(format!("address register out of range: {:#X}", self.address)));
        }
        if let Some(addr) = self.stack.iter().find(|addr| **addr > ADDRESS_MASK) {
            return Err(invalid(format!("stack entry out of range: {addr:#X}")));
        }
        if let Some(register) = self.key_wait {
            if register as usize >= REGISTER_COUNT {
                return Err(invalid(format!("key wait register out of range: {register}")));
            }
        }
        match (self.key_wait, self.key_press) {
            (_, Some(key_id)) if key_id >= KEY_COUNT => {
                return Err(invalid(format!("pressed key out of range: {key_id}")));
            }
            (None, Some(_)) => {
                return Err(invalid("pressed key without a key wait".to_string()));
            }
            _ => {}
        }

        Ok(())
    }

    /// Replace every field of the machine state.
    ///
    /// The display is marked dirty so it will be published again.
    pub fn restore(&self, vm: &mut Chip8Vm) -> Chip8Result<()> {
        // Nothing may be touched until the whole snapshot is known to fit.
        self.validate()?;

        let pixels: Vec<bool> = self
            .display
            .iter()
            .flat_map(|row| row.chars().map(|c| c == PIXEL_ON))
            .collect();

        let cpu = vm.cpu_mut();
        cpu.pc = self.pc;
        cpu.address = self.address;
        cpu.registers.copy_from_slice(&self.registers);
        cpu.stack.clear();
        cpu.stack.extend_from_slice(&self.stack);
        cpu.delay_timer = self.delay_timer;
        cpu.sound_timer = self.sound_timer;
        cpu.key_wait = self.key_wait;
        cpu.key_press = self.key_press;
        cpu.clear_keys();
        for (key_id, pressed) in self.keys.iter().enumerate() {
            cpu.set_key_state(key_id as u8, *pressed);
        }
        cpu.ram.copy_from(&self.memory);
        cpu.display.copy_from(&pixels);
        cpu.display.mark_dirty();

        Ok(())
    }
}

fn invalid(msg: String) -> Chip8Error {
    Chip8Error::Snapshot(msg)
}

fn check_len(field: &str, actual: usize, expected: usize) -> Chip8Result<()> {
    if actual != expected {
        Err(invalid(format!("{field} has length {actual}, expected {expected}")))
    } else {
        Ok(())
    }
}
