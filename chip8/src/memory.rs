//! Main memory.
//!
//! ```text
//! +-----------------------------+ 0x000
//! | Font glyphs (80 bytes)      |
//! +-----------------------------+ 0x050
//! | Reserved                    |
//! +-----------------------------+ 0x200
//! | Program (up to 3584 bytes)  |
//! +-----------------------------+ 0x1000
//! ```
use crate::{
    constants::*,
    error::{Chip8Error, Chip8Result},
};

/// Flat 4K address space with the built-in font burned in.
#[derive(Clone, PartialEq, Eq)]
pub struct Memory {
    ram: Box<[u8; MEM_SIZE]>,
}

impl Default for Memory {
    fn default() -> Self {
        let mut memory = Self {
            ram: Box::new([0; MEM_SIZE]),
        };
        memory.load_font();
        memory
    }
}

impl Memory {
    pub fn new() -> Self {
        Default::default()
    }

    /// Zero all memory, then restore the font.
    pub fn clear(&mut self) {
        self.ram.fill(0);
        self.load_font();
    }

    fn load_font(&mut self) {
        let start = FONTSET_START as usize;
        self.ram[start..start + FONTSET_DATA_LENGTH].copy_from_slice(&FONTSET);
    }

    /// Replace the whole memory image with a fresh font and the given program
    /// placed at [`MEM_START`].
    ///
    /// Memory is left untouched when the program is too large.
    pub fn load_program(&mut self, program: &[u8]) -> Chip8Result<()> {
        if !check_program_size(program) {
            return Err(Chip8Error::LargeProgram {
                size: program.len(),
            });
        }

        // Start with clean memory to avoid leaking previous program.
        self.clear();
        self.ram[MEM_START..MEM_START + program.len()].copy_from_slice(program);

        Ok(())
    }

    /// Fetch the big-endian instruction word at the given address.
    pub fn fetch(&self, pc: Address) -> Chip8Result<u16> {
        let addr = pc as usize;
        if addr > LAST_FETCH_ADDRESS {
            return Err(Chip8Error::ProgramCounter { pc });
        }
        Ok(u16::from_be_bytes([self.ram[addr], self.ram[addr + 1]]))
    }

    /// Read a byte. Addresses wrap around the 4K space.
    #[inline(always)]
    pub fn read(&self, addr: usize) -> u8 {
        self.ram[addr & (MEM_SIZE - 1)]
    }

    /// Write a byte. Addresses wrap around the 4K space.
    #[inline(always)]
    pub fn write(&mut self, addr: usize, value: u8) {
        self.ram[addr & (MEM_SIZE - 1)] = value;
    }

    /// A read-only view of the entire address space.
    pub fn bytes(&self) -> &[u8] {
        &self.ram[..]
    }

    /// Overwrite the entire address space.
    ///
    /// Caller has to ensure the image is exactly [`MEM_SIZE`] bytes.
    pub(crate) fn copy_from(&mut self, image: &[u8]) {
        self.ram.copy_from_slice(image);
    }
}

impl std::fmt::Debug for Memory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Memory({} bytes)", self.ram.len())
    }
}

#[inline]
pub fn check_program_size(program: &[u8]) -> bool {
    program.len() <= MAX_PROGRAM_SIZE
}
