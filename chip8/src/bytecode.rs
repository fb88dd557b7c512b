/// Helpers for extracting data from instruction words.
///
/// Instructions are two bytes, big-endian, with the opcode identity
/// in the first 4-bit nibble.
///
/// ```text
/// 0xABCD
///   A     op
///    B    x
///     C   y
///      D  n
///     CD  nn (kk)
///    BCD  nnn
/// ```

/// Extract opcode nibble from the instruction word.
#[inline(always)]
pub fn op_code(word: u16) -> u8 {
    ((word & 0xF000) >> 12) as u8
}

/// Extract register index X from the instruction word.
#[inline(always)]
pub fn op_x(word: u16) -> u8 {
    ((word & 0x0F00) >> 8) as u8
}

/// Extract register index Y from the instruction word.
#[inline(always)]
pub fn op_y(word: u16) -> u8 {
    ((word & 0x00F0) >> 4) as u8
}

/// Extract the last nibble N from the instruction word.
#[inline(always)]
pub fn op_n(word: u16) -> u8 {
    (word & 0x000F) as u8
}

/// Extract immediate byte NN from the instruction word.
#[inline(always)]
pub fn op_nn(word: u16) -> u8 {
    (word & 0x00FF) as u8
}

/// Extract 12-bit address NNN from the instruction word.
#[inline(always)]
pub fn op_nnn(word: u16) -> u16 {
    word & 0x0FFF
}

/// Extract operands VX and NN from the instruction word.
#[inline(always)]
pub fn op_xnn(word: u16) -> (u8, u8) {
    (op_x(word), op_nn(word))
}

/// Extract operands VX, VY and N from the instruction word.
#[inline(always)]
pub fn op_xyn(word: u16) -> (u8, u8, u8) {
    (op_x(word), op_y(word), op_n(word))
}
