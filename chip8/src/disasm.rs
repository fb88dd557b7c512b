//! Disassembler.
use std::fmt::{self, Write as FmtWrite};

use crate::{bytecode::*, constants::MEM_START};

/// Render a single instruction word as a mnemonic.
///
/// Words that aren't valid instructions render as `DATA`.
pub fn mnemonic(word: u16) -> String {
    let mut s = String::new();
    // Writing into a String can't fail.
    let _ = write_mnemonic(&mut s, word);
    s
}

/// Write a single instruction word as a mnemonic to the given writer.
#[rustfmt::skip]
pub fn write_mnemonic<W: FmtWrite>(w: &mut W, word: u16) -> fmt::Result {
    let (vx, vy, n) = op_xyn(word);
    let nn = op_nn(word);
    let nnn = op_nnn(word);

    match (op_code(word), vx, vy, n) {
        (0x0, 0x0, 0xE, 0x0) => write!(w, "CLS"),
        (0x0, 0x0, 0xE, 0xE) => write!(w, "RET"),
        (0x1, _, _, _)       => write!(w, "JP {nnn:03X}"),
        (0x2, _, _, _)       => write!(w, "CALL {nnn:03X}"),
        (0x3, _, _, _)       => write!(w, "SE V{vx:X}, {nn:02X}"),
        (0x4, _, _, _)       => write!(w, "SNE V{vx:X}, {nn:02X}"),
        (0x5, _, _, 0x0)     => write!(w, "SE V{vx:X}, V{vy:X}"),
        (0x6, _, _, _)       => write!(w, "LD V{vx:X}, {nn:02X}"),
        (0x7, _, _, _)       => write!(w, "ADD V{vx:X}, {nn:02X}"),
        (0x8, _, _, 0x0)     => write!(w, "LD V{vx:X}, V{vy:X}"),
        (0x8, _, _, 0x1)     => write!(w, "OR V{vx:X}, V{vy:X}"),
        (0x8, _, _, 0x2)     => write!(w, "AND V{vx:X}, V{vy:X}"),
        (0x8, _, _, 0x3)     => write!(w, "XOR V{vx:X}, V{vy:X}"),
        (0x8, _, _, 0x4)     => write!(w, "ADD V{vx:X}, V{vy:X}"),
        (0x8, _, _, 0x5)     => write!(w, "SUB V{vx:X}, V{vy:X}"),
        (0x8, _, _, 0x6)     => write!(w, "SHR V{vx:X}"),
        (0x8, _, _, 0x7)     => write!(w, "SUBN V{vx:X}, V{vy:X}"),
        (0x8, _, _, 0xE)     => write!(w, "SHL V{vx:X}"),
        (0x9, _, _, 0x0)     => write!(w, "SNE V{vx:X}, V{vy:X}"),
        (0xA, _, _, _)       => write!(w, "LD I, {nnn:03X}"),
        (0xB, _, _, _)       => write!(w, "JP V0, {nnn:03X}"),
        (0xC, _, _, _)       => write!(w, "RND V{vx:X}, {nn:02X}"),
        (0xD, _, _, _)       => write!(w, "DRW V{vx:X}, V{vy:X}, {n:X}"),
        (0xE, _, 0x9, 0xE)   => write!(w, "SKP V{vx:X}"),
        (0xE, _, 0xA, 0x1)   => write!(w, "SKNP V{vx:X}"),
        (0xF, _, 0x0, 0x7)   => write!(w, "LD V{vx:X}, DT"),
        (0xF, _, 0x0, 0xA)   => write!(w, "LD V{vx:X}, K"),
        (0xF, _, 0x1, 0x5)   => write!(w, "LD DT, V{vx:X}"),
        (0xF, _, 0x1, 0x8)   => write!(w, "LD ST, V{vx:X}"),
        (0xF, _, 0x1, 0xE)   => write!(w, "ADD I, V{vx:X}"),
        (0xF, _, 0x2, 0x9)   => write!(w, "LD F, V{vx:X}"),
        (0xF, _, 0x3, 0x3)   => write!(w, "LD B, V{vx:X}"),
        (0xF, _, 0x5, 0x5)   => write!(w, "LD [I], V{vx:X}"),
        (0xF, _, 0x6, 0x5)   => write!(w, "LD V{vx:X}, [I]"),
        _                    => write!(w, "DATA {word:04X}"),
    }
}

pub struct Disassembler<'a> {
    bytecode: &'a [u8],
}

impl<'a> Disassembler<'a> {
    pub fn new(bytecode: &'a [u8]) -> Self {
        Self { bytecode }
    }

    /// Disassemble the whole program, one instruction per line, with
    /// addresses as they will be laid out in VM memory.
    pub fn disassemble<W: FmtWrite>(&self, w: &mut W) -> fmt::Result {
        for (i, instr) in self.bytecode.chunks(2).enumerate() {
            let offset = MEM_START + i * 2;
            match *instr {
                [a, b] => {
                    let word = u16::from_be_bytes([a, b]);
                    write!(w, "{offset:04X}: {word:04X}  ")?;
                    write_mnemonic(w, word)?;
                    writeln!(w)?;
                }
                // Odd trailing byte
                [a] => writeln!(w, "{offset:04X}: {a:02X}    DATA {a:02X}")?,
                _ => unreachable!("chunks are never empty"),
            }
        }

        Ok(())
    }

    pub fn listing(&self) -> Result<String, fmt::Error> {
        let mut s = String::new();
        self.disassemble(&mut s)?;
        Ok(s)
    }
}
