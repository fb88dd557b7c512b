//! Virtual machine.
use std::{
    fmt::{self, Write},
    time::Duration,
};

use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::{
    bytecode::*,
    constants::*,
    cpu::Chip8Cpu,
    devices::KeyCode,
    display::DisplayBuffer,
    error::Chip8Result,
};

pub struct Chip8Vm {
    cpu: Chip8Cpu,
    rng: StdRng,
    conf: Chip8Conf,
}

impl Chip8Vm {
    pub fn new(conf: Chip8Conf) -> Self {
        let rng = match conf.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        Chip8Vm {
            cpu: Chip8Cpu::new(),
            rng,
            conf,
        }
    }

    /// Configuration that was used to instantiate the VM.
    pub fn config(&self) -> &Chip8Conf {
        &self.conf
    }

    pub fn cpu(&self) -> &Chip8Cpu {
        &self.cpu
    }

    pub(crate) fn cpu_mut(&mut self) -> &mut Chip8Cpu {
        &mut self.cpu
    }

    /// Load a program into memory at [`MEM_START`] and reset the machine.
    ///
    /// Programs larger than [`MAX_PROGRAM_SIZE`] are rejected, leaving the
    /// machine untouched.
    pub fn load_bytecode(&mut self, bytecode: &[u8]) -> Chip8Result<()> {
        self.cpu.ram.load_program(bytecode)?;

        // Reset the program counter to prepare for execution.
        self.reset();

        Ok(())
    }

    /// Clear registers, stack, timers, keys and display. The loaded program stays in memory.
    pub fn reset(&mut self) {
        self.cpu.reset();
    }

    pub fn display_buffer(&self) -> &DisplayBuffer {
        self.cpu.display.buffer()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Ok,
    /// Program counter has jumped to a new address.
    ///
    /// This is returned when the interpreter encounters:
    ///
    /// - 1NNN (`JP addr`)
    /// - 2NNN (`CALL addr`)
    /// - 00EE (`RET`)
    /// - BNNN (`JP V0, addr`)
    Jump,
    /// The display buffer was changed.
    Draw,
    /// The sound timer was set.
    Sound,
    /// Wait for a keypress.
    ///
    /// This is triggered by the opcode `Fx0A` (`LD Vx, K`), which stops
    /// execution until a key is pressed, and loads the key value into `Vx`.
    KeyWait,
    /// The word at the program counter is not an instruction. It was skipped.
    Unsupported(u16),
}

/// VM Configuration Parameters.
#[derive(Debug, Clone)]
pub struct Chip8Conf {
    /// Number of instructions executed per second.
    pub instruction_rate: Hz,
    /// Seed for the random number generator behind `Cxkk` (`RND Vx, byte`).
    ///
    /// When `None` the generator is seeded from the operating system.
    pub rng_seed: Option<u64>,
}

impl Default for Chip8Conf {
    fn default() -> Self {
        Self {
            instruction_rate: Hz(DEFAULT_INSTRUCTION_RATE),
            rng_seed: None,
        }
    }
}

/// CPU clock frequency, in hertz (per second)
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Hz(pub u64);

/// Rate at which timers count down and frames are published.
pub const FRAME_RATE: Hz = Hz(DELAY_FREQUENCY);

impl Hz {
    /// Number of cycles that fit in one frame, at least one.
    pub fn cycles_per_frame(self) -> usize {
        ((self.0 / FRAME_RATE.0) as usize).max(1)
    }
}

impl From<Hz> for Duration {
    fn from(freq: Hz) -> Self {
        if freq.0 == 0 {
            Duration::from_nanos(0)
        } else {
            Duration::from_nanos(NANOS_IN_SECOND / freq.0)
        }
    }
}

/// Interpreter
impl Chip8Vm {
    /// Sets the keyboard key input state.
    ///
    /// If the VM is waiting for keyboard input, the first key going down
    /// is recorded. The next call to [`Chip8Vm::execute_one`] stores it and
    /// completes the `Fx0A` instruction, so a paused or stopped machine
    /// doesn't move.
    pub fn set_key(&mut self, key: KeyCode, pressed: bool) {
        let key_id = key.as_u8();
        let was_pressed = self.cpu.key_state(key_id);
        self.cpu.set_key_state(key_id, pressed);

        let waiting = self.cpu.key_wait.is_some() && self.cpu.key_press.is_none();
        if waiting && pressed && !was_pressed {
            self.cpu.key_press = Some(key_id);
        }
    }

    /// Clear the keyboard input state, setting all keys to up.
    pub fn clear_keys(&mut self) {
        self.cpu.clear_keys()
    }

    /// Count down both timers by one tick.
    ///
    /// Returns `true` when the buzzer should sound.
    pub fn tick_timers(&mut self) -> bool {
        self.cpu.tick_delay();
        self.cpu.tick_sound()
    }

    /// Execute a number of instructions, stopping early on a fault.
    pub fn run_steps(&mut self, step_count: usize) -> Chip8Result<Flow> {
        let mut flow = Flow::Ok;
        for _ in 0..step_count {
            flow = self.execute_one()?;
        }
        Ok(flow)
    }

    /// Fetch, decode and execute the instruction at the program counter.
    ///
    /// The only error is a program counter that points outside of memory,
    /// which leaves the machine untouched.
    pub fn execute_one(&mut self) -> Chip8Result<Flow> {
        if let Some(vx) = self.cpu.key_wait {
            return match self.cpu.key_press.take() {
                Some(key_id) => {
                    self.cpu.registers[vx as usize] = key_id;
                    self.cpu.pc = self.cpu.pc.wrapping_add(2);
                    self.cpu.key_wait = None;
                    Ok(Flow::Ok)
                }
                None => Ok(Flow::KeyWait),
            };
        }

        let word = self.cpu.ram.fetch(self.cpu.pc)?;
        op_trace(self.cpu.pc, word);

        let (vx, vy, n) = op_xyn(word);
        let nn = op_nn(word);
        let nnn = op_nnn(word);

        self.cpu.pc += 2;

        let mut control_flow = Flow::Ok;

        match op_code(word) {
            // Miscellaneous instructions identified by nn
            0x0 | 0xE | 0xF => control_flow = self.exec_misc(word),
            // 1NNN (JP addr)
            //
            // Jump to address.
            0x1 => {
                self.cpu.pc = nnn;
                control_flow = Flow::Jump;
            }
            // 2NNN (CALL addr)
            //
            // Call subroutine at NNN.
            0x2 => {
                self.cpu.stack.push(self.cpu.pc);
                self.cpu.pc = nnn;
                control_flow = Flow::Jump;
            }
            // 3XNN (SE Vx, byte)
            //
            // Skip the next instruction if register VX equals value NN.
            0x3 => {
                if self.cpu.registers[vx as usize] == nn {
                    self.cpu.pc += 2;
                }
            }
            // 4XNN (SNE Vx, byte)
            //
            // Skip the next instruction if register VX does not equal value NN.
            0x4 => {
                if self.cpu.registers[vx as usize] != nn {
                    self.cpu.pc += 2;
                }
            }
            // 5XY0 (SE Vx, Vy)
            //
            // Skip the next instruction if register VX equals value VY.
            0x5 if n == 0 => {
                if self.cpu.registers[vx as usize] == self.cpu.registers[vy as usize] {
                    self.cpu.pc += 2;
                }
            }
            // 6XNN (LD Vx, byte)
            //
            // Set register VX to value NN.
            0x6 => {
                self.cpu.registers[vx as usize] = nn;
            }
            // 7XNN (ADD Vx, byte)
            //
            // Add value NN to register VX. Carry flag is not set.
            0x7 => {
                let x = self.cpu.registers[vx as usize];
                self.cpu.registers[vx as usize] = x.wrapping_add(nn);
            }
            // Arithmetic instructions identified by n
            0x8 => control_flow = self.exec_math(word),
            // 9XY0 (SNE Vx, Vy)
            //
            // Skip next instruction if Vx != Vy.
            0x9 if n == 0 => {
                if self.cpu.registers[vx as usize] != self.cpu.registers[vy as usize] {
                    self.cpu.pc += 2;
                }
            }
            // ANNN (LD I, addr)
            //
            // Set address register I to value NNN.
            0xA => {
                self.cpu.address = nnn;
            }
            // BNNN (JP V0, addr)
            //
            // Jump to address NNN offset by V0. The result is not masked, so
            // a jump past the end of memory faults on the next fetch.
            0xB => {
                self.cpu.pc = nnn + self.cpu.registers[0] as u16;
                control_flow = Flow::Jump;
            }
            // CXNN (RND Vx, byte)
            //
            // Generate random number.
            // Set register VX to the result of bitwise AND between a random number and NN.
            0xC => {
                self.cpu.registers[vx as usize] = nn & self.rng.gen::<u8>();
            }
            // DXYN (DRW Vx, Vy, nibble)
            //
            // Draw sprite to the display buffer, at coordinate as per registers Vx and Vy.
            // Sprite is encoded as 8 pixels wide, N pixels high, stored in bits located in
            // memory pointed to by address register I.
            //
            // The start coordinate wraps around the screen, but pixels that fall off the
            // right or bottom edge are clipped.
            //
            // If the drawing operation erases existing pixels in the display buffer, register VF is set to
            // 1, and set to 0 if no display bits are unset. This is used for collision detection.
            0xD => {
                let (x, y) = (
                    self.cpu.registers[vx as usize],
                    self.cpu.registers[vy as usize],
                );
                let addr = self.cpu.address as usize;

                let mut sprite = [0u8; 0xF];
                for (r, row) in sprite.iter_mut().take(n as usize).enumerate() {
                    *row = self.cpu.ram.read(addr + r);
                }

                let is_erased = self.cpu.display.draw_sprite(x, y, &sprite[..n as usize]);

                // If a pixel was erased, then a collision occurred.
                self.cpu.registers[FLAG_REGISTER] = is_erased as u8;
                control_flow = Flow::Draw;
            }
            // Unsupported operation.
            _ => control_flow = self.unsupported(word),
        }

        Ok(control_flow)
    }

    /// Execute an arithmetic instruction
    ///
    /// Flag results are written to VF before the result is written to VX,
    /// so when VX is VF the result wins.
    #[inline]
    #[must_use]
    fn exec_math(&mut self, word: u16) -> Flow {
        let (vx, vy, n) = op_xyn(word);
        let (vx, vy) = (vx as usize, vy as usize);
        let (x, y) = (self.cpu.registers[vx], self.cpu.registers[vy]);

        match n {
            // 8XY0 (LD Vx, Vy)
            //
            // Store the value of register VY in register VX.
            0x0 => {
                self.cpu.registers[vx] = y;
            }
            // 8XY1 (OR Vx, Vy)
            //
            // Performs bitwise OR on VX and VY, and stores the result in VX.
            0x1 => {
                self.cpu.registers[vx] = x | y;
            }
            // 8XY2 (AND Vx, Vy)
            //
            // Performs bitwise AND on VX and VY, and stores the result in VX.
            0x2 => {
                self.cpu.registers[vx] = x & y;
            }
            // 8XY3 (XOR Vx, Vy)
            //
            // Performs bitwise XOR on VX and VY, and stores the result in VX.
            0x3 => {
                self.cpu.registers[vx] = x ^ y;
            }
            // 8XY4 (ADD Vx, Vy)
            //
            // ADDs VX to VY, and stores the result in VX.
            // Overflow is wrapped.
            // If overflow, set VF to 1, else 0.
            0x4 => {
                let (result, carry) = x.overflowing_add(y);
                self.cpu.registers[FLAG_REGISTER] = carry as u8;
                self.cpu.registers[vx] = result;
            }
            // 8XY5 (SUB Vx, Vy)
            //
            // Subtracts VY from VX, and stores the result in VX.
            // VF is set to 1 when VX is strictly greater than VY, otherwise 0.
            0x5 => {
                self.cpu.registers[FLAG_REGISTER] = (x > y) as u8;
                self.cpu.registers[vx] = x.wrapping_sub(y);
            }
            // 8XY6 (SHR Vx)
            //
            // If the least-significant bit of Vx is 1, then VF is set to 1, otherwise 0.
            // Shift VX right by 1.
            // VY is unused.
            0x6 => {
                self.cpu.registers[FLAG_REGISTER] = x & 1;
                self.cpu.registers[vx] = x >> 1;
            }
            // 8XY7 (SUBN Vx, Vy)
            //
            // Subtracts VX from VY, and stores the result in VX.
            // VF is set to 1 when VY is strictly greater than VX, otherwise 0.
            0x7 => {
                self.cpu.registers[FLAG_REGISTER] = (y > x) as u8;
                self.cpu.registers[vx] = y.wrapping_sub(x);
            }
            // 8XYE (SHL Vx)
            //
            // If the most-significant bit of Vx is 1, then VF is set to 1, otherwise 0.
            // Shift VX left by 1.
            // VY is unused.
            0xE => {
                self.cpu.registers[FLAG_REGISTER] = (x >> 7) & 1;
                self.cpu.registers[vx] = x << 1;
            }
            // ----------------------------------------------------------------
            // Unsupported operation.
            _ => return self.unsupported(word),
        }

        Flow::Ok
    }

    /// Execute a miscellaneous instruction
    #[inline]
    #[must_use]
    fn exec_misc(&mut self, word: u16) -> Flow {
        let op = op_code(word);
        let (vx, nn) = op_xnn(word);
        let vx = vx as usize;

        let mut control_flow = Flow::Ok;

        match (op, nn) {
            // ----------------------------------------------------------------
            // 00E0 (CLS)
            //
            // Clear display
            (0x0, 0xE0) if vx == 0 => {
                self.cpu.display.clear();
                control_flow = Flow::Draw;
            }
            // 00EE (RET)
            //
            // Return from a subroutine.
            // Set the program counter to the value at the top of the stack.
            // Returning with an empty stack restarts the program.
            (0x0, 0xEE) if vx == 0 => {
                self.cpu.pc = match self.cpu.stack.pop() {
                    Some(addr) => addr,
                    None => {
                        log::warn!(
                            "return with empty call stack at {:03X}, restarting at {:03X}",
                            self.cpu.pc - 2,
                            MEM_START
                        );
                        MEM_START as Address
                    }
                };
                control_flow = Flow::Jump;
            }
            // ----------------------------------------------------------------
            // Ex9E (SKP Vx)
            //
            // Skip next instruction if the key with the value of Vx is pressed.
            (0xE, 0x9E) => {
                if self.cpu.key_state(self.cpu.registers[vx] & 0xF) {
                    self.cpu.pc += 2;
                }
            }
            // ExA1 (SKNP Vx)
            //
            // Skip next instruction if the key with the value of Vx is not pressed.
            (0xE, 0xA1) => {
                if !self.cpu.key_state(self.cpu.registers[vx] & 0xF) {
                    self.cpu.pc += 2;
                }
            }
            // ----------------------------------------------------------------
            // Fx07 (LD Vx, DT)
            //
            // Set Vx = delay timer value.
            (0xF, 0x07) => {
                self.cpu.registers[vx] = self.cpu.delay_timer;
            }
            // Fx0A (LD Vx, K)
            //
            // Wait for a key press, store the value of the key in Vx.
            // All execution stops until a key is pressed. `set_key` records
            // the press and the next call here stores it.
            (0xF, 0x0A) => {
                // rewind the program counter to stall the machine
                self.cpu.pc -= 2;
                self.cpu.key_wait = Some(vx as u8);
                self.cpu.key_press = None;
                control_flow = Flow::KeyWait;
            }
            // Fx15 (LD DT, Vx)
            //
            // Set delay timer = Vx.
            (0xF, 0x15) => {
                self.cpu.delay_timer = self.cpu.registers[vx];
            }
            // Fx18 (LD ST, Vx)
            //
            // Set sound timer = Vx.
            (0xF, 0x18) => {
                self.cpu.sound_timer = self.cpu.registers[vx];
                control_flow = Flow::Sound;
            }
            // Fx1E (ADD I, Vx)
            //
            // Add Vx to I, wrapping within the 12-bit address space.
            (0xF, 0x1E) => {
                let addr = self.cpu.address;
                let x = self.cpu.registers[vx] as u16;
                self.cpu.address = addr.wrapping_add(x) & ADDRESS_MASK;
            }
            // Fx29 (LD F, Vx)
            //
            // Set I = location of sprite for digit Vx.
            (0xF, 0x29) => {
                let x = self.cpu.registers[vx] & 0xF;
                self.cpu.address = FONTSET_START + (x as u16) * FONTSET_HEIGHT as u16;
            }
            // Fx33 (LD B, Vx)
            //
            // Store the binary-coded decimal representation of Vx
            // in the memory locations I, I+1, and I+2.
            #[rustfmt::skip]
            (0xF, 0x33) => {
                let addr = self.cpu.address as usize;
                let x = self.cpu.registers[vx];
                self.cpu.ram.write(addr,     x / 100);
                self.cpu.ram.write(addr + 1, x / 10  % 10);
                self.cpu.ram.write(addr + 2, x       % 10);
            }
            // Fx55 (LD [I], Vx)
            //
            // Store registers V0 through Vx in memory starting at location I.
            (0xF, 0x55) => {
                let addr = self.cpu.address as usize;
                for v in 0..=vx {
                    self.cpu.ram.write(addr + v, self.cpu.registers[v]);
                }
            }
            // Fx65 (LD Vx, [I])
            //
            // Read registers V0 through Vx from memory starting at location I.
            (0xF, 0x65) => {
                let addr = self.cpu.address as usize;
                for v in 0..=vx {
                    self.cpu.registers[v] = self.cpu.ram.read(addr + v);
                }
            }
            // ----------------------------------------------------------------
            // Unsupported operation.
            _ => control_flow = self.unsupported(word),
        }

        control_flow
    }

    /// Words that don't decode are skipped over.
    #[cold]
    fn unsupported(&mut self, word: u16) -> Flow {
        log::warn!(
            "unsupported opcode {word:04X} at {:03X}",
            self.cpu.pc.wrapping_sub(2)
        );
        Flow::Unsupported(word)
    }
}

/// Troubleshooting
#[allow(dead_code)]
#[doc(hidden)]
impl Chip8Vm {
    /// Returns the contents of the memory as a human readable string.
    pub fn dump_ram(&self, count: usize) -> Result<String, std::fmt::Error> {
        let ram = self.cpu.ram.bytes();
        let iter = ram
            .iter()
            .enumerate()
            .skip(MEM_START)
            .take(count)
            .step_by(2);
        let mut buf = String::new();

        for (i, op) in iter {
            writeln!(buf, "{:04X}: {:02X}{:02X}", i, op, ram[(i + 1) % MEM_SIZE])?;
        }

        Ok(buf)
    }

    pub fn dump_display(&self) -> Result<String, std::fmt::Error> {
        self.cpu.display.dump()
    }

    pub fn dump_keys(&self) -> Result<String, fmt::Error> {
        let mut buf = String::new();

        if self.cpu.any_key() {
            write!(buf, "keys: ")?;
            for i in 0..KEY_COUNT {
                if self.cpu.key_state(i) {
                    write!(buf, "k{i:x}")?;
                }
            }
        }

        Ok(buf)
    }
}

#[cfg(feature = "op_trace")]
#[inline]
fn op_trace(pc: Address, word: u16) {
    log::trace!("{:04X}: {:04X} {}", pc, word, crate::disasm::mnemonic(word));
}

#[cfg(not(feature = "op_trace"))]
#[inline]
fn op_trace(_: Address, _: u16) {}

#[cfg(test)]
mod test {
    use super::*;
    use crate::error::Chip8Error;

    /// Build a VM with the given instruction words loaded.
    fn vm_with(words: &[u16]) -> Chip8Vm {
        let bytecode: Vec<u8> = words.iter().flat_map(|w| w.to_be_bytes()).collect();
        let mut vm = Chip8Vm::new(Chip8Conf {
            rng_seed: Some(0xC8),
            ..Default::default()
        });
        vm.load_bytecode(&bytecode).unwrap();
        vm
    }

    #[test]
    fn test_clock_hz() {
        let interval: Duration = Hz(60).into();
        assert_eq!(interval.as_millis(), 16);
        assert_eq!(Hz(500).cycles_per_frame(), 8);
        assert_eq!(Hz(30).cycles_per_frame(), 1);
        assert_eq!(Hz(0).cycles_per_frame(), 1);
    }

    #[test]
    fn test_load_then_reset() {
        let program: Vec<u8> = (0..MAX_PROGRAM_SIZE).map(|i| (i * 7) as u8).collect();
        let mut vm = Chip8Vm::new(Chip8Conf::default());
        vm.load_bytecode(&program).unwrap();

        vm.cpu.registers[4] = 1;
        vm.cpu.stack.push(0x400);
        vm.cpu.delay_timer = 5;
        vm.cpu.sound_timer = 5;
        vm.cpu.address = 0x123;
        vm.reset();

        for (k, byte) in program.iter().enumerate() {
            assert_eq!(vm.cpu.ram.read(MEM_START + k), *byte);
        }
        assert_eq!(vm.cpu.pc, 0x200);
        assert_eq!(vm.cpu.registers, [0; REGISTER_COUNT]);
        assert_eq!(vm.cpu.address, 0);
        assert!(vm.cpu.stack.is_empty());
        assert_eq!((vm.cpu.delay_timer, vm.cpu.sound_timer), (0, 0));
        assert!(vm.display_buffer().iter().all(|px| !px));
    }

    #[test]
    fn test_large_program_rejected() {
        let mut vm = vm_with(&[0x6001]);
        vm.execute_one().unwrap();

        let err = vm.load_bytecode(&[0; MAX_PROGRAM_SIZE + 1]).unwrap_err();
        assert!(matches!(err, Chip8Error::LargeProgram { .. }));
        assert_eq!(vm.cpu.pc, 0x202, "machine state must be unchanged");
        assert_eq!(vm.cpu.registers[0], 1);
    }

    #[test]
    fn test_load_store_immediate() {
        let mut vm = vm_with(&[0x6A42, 0x7A01, 0x7BFF, 0x7B02]);
        vm.run_steps(4).unwrap();

        assert_eq!(vm.cpu.registers[0xA], 0x43);
        // 7XNN wraps and leaves the flag alone.
        assert_eq!(vm.cpu.registers[0xB], 0x01);
        assert_eq!(vm.cpu.registers[0xF], 0);
        assert_eq!(vm.cpu.pc, 0x208);
    }

    #[test]
    fn test_add_carry() {
        let mut vm = vm_with(&[0x60FF, 0x6101, 0x8014]);
        vm.run_steps(3).unwrap();
        assert_eq!(vm.cpu.registers[0], 0x00);
        assert_eq!(vm.cpu.registers[0xF], 1);

        let mut vm = vm_with(&[0x6F01, 0x60FE, 0x6101, 0x8014]);
        vm.run_steps(4).unwrap();
        assert_eq!(vm.cpu.registers[0], 0xFF);
        assert_eq!(vm.cpu.registers[0xF], 0, "flag must be cleared without carry");
    }

    #[test]
    fn test_sub_flag() {
        // Equal operands: VX is not greater than VY.
        let mut vm = vm_with(&[0x6001, 0x6101, 0x8015]);
        vm.run_steps(3).unwrap();
        assert_eq!(vm.cpu.registers[0], 0x00);
        assert_eq!(vm.cpu.registers[0xF], 0);

        let mut vm = vm_with(&[0x6005, 0x6103, 0x8015]);
        vm.run_steps(3).unwrap();
        assert_eq!(vm.cpu.registers[0], 0x02);
        assert_eq!(vm.cpu.registers[0xF], 1);

        let mut vm = vm_with(&[0x6003, 0x6105, 0x8015]);
        vm.run_steps(3).unwrap();
        assert_eq!(vm.cpu.registers[0], 0xFE);
        assert_eq!(vm.cpu.registers[0xF], 0);
    }

    #[test]
    fn test_subn_flag() {
        let mut vm = vm_with(&[0x6003, 0x6105, 0x8017]);
        vm.run_steps(3).unwrap();
        assert_eq!(vm.cpu.registers[0], 0x02);
        assert_eq!(vm.cpu.registers[0xF], 1);

        let mut vm = vm_with(&[0x6005, 0x6105, 0x8017]);
        vm.run_steps(3).unwrap();
        assert_eq!(vm.cpu.registers[0], 0x00);
        assert_eq!(vm.cpu.registers[0xF], 0);
    }

    #[test]
    fn test_shifts_ignore_vy() {
        let mut vm = vm_with(&[0x6005, 0x61FF, 0x8016]);
        vm.run_steps(3).unwrap();
        assert_eq!(vm.cpu.registers[0], 0x02);
        assert_eq!(vm.cpu.registers[0xF], 1);
        assert_eq!(vm.cpu.registers[1], 0xFF);

        let mut vm = vm_with(&[0x6081, 0x6100, 0x801E]);
        vm.run_steps(3).unwrap();
        assert_eq!(vm.cpu.registers[0], 0x02);
        assert_eq!(vm.cpu.registers[0xF], 1);

        let mut vm = vm_with(&[0x6041, 0x801E]);
        vm.run_steps(2).unwrap();
        assert_eq!(vm.cpu.registers[0], 0x82);
        assert_eq!(vm.cpu.registers[0xF], 0);
    }

    #[test]
    fn test_bitwise() {
        let mut vm = vm_with(&[0x60F0, 0x613C, 0x8200, 0x8211, 0x8300, 0x8312, 0x8400, 0x8413]);
        vm.run_steps(8).unwrap();
        assert_eq!(vm.cpu.registers[2], 0xFC);
        assert_eq!(vm.cpu.registers[3], 0x30);
        assert_eq!(vm.cpu.registers[4], 0xCC);
    }

    /// Every conditional skip advances by 4 when taken and 2 otherwise.
    #[test]
    fn test_skips() {
        #[rustfmt::skip]
        let cases: &[(&[u16], Option<KeyCode>, u16)] = &[
            (&[0x6012, 0x3012], None, 4),                 // SE Vx, byte
            (&[0x6012, 0x3013], None, 2),
            (&[0x6012, 0x4013], None, 4),                 // SNE Vx, byte
            (&[0x6012, 0x4012], None, 2),
            (&[0x6007, 0x6107, 0x5010], None, 4),         // SE Vx, Vy
            (&[0x6007, 0x6108, 0x5010], None, 2),
            (&[0x6007, 0x6108, 0x9010], None, 4),         // SNE Vx, Vy
            (&[0x6007, 0x6107, 0x9010], None, 2),
            (&[0x6003, 0xE09E], Some(KeyCode::Key3), 4),  // SKP Vx
            (&[0x6003, 0xE09E], Some(KeyCode::Key4), 2),
            (&[0x6003, 0xE0A1], Some(KeyCode::Key4), 4),  // SKNP Vx
            (&[0x6003, 0xE0A1], Some(KeyCode::Key3), 2),
        ];

        for (program, key, advance) in cases {
            let mut vm = vm_with(program);
            if let Some(key) = key {
                vm.set_key(*key, true);
            }
            vm.run_steps(program.len() - 1).unwrap();

            let before = vm.cpu.pc;
            vm.execute_one().unwrap();
            assert_eq!(
                vm.cpu.pc - before,
                *advance,
                "{:04X}",
                program[program.len() - 1]
            );
        }
    }

    #[test]
    fn test_jump() {
        let mut vm = vm_with(&[0x1234]);
        assert_eq!(vm.execute_one().unwrap(), Flow::Jump);
        assert_eq!(vm.cpu.pc, 0x234);

        let mut vm = vm_with(&[0x6010, 0xB300]);
        vm.run_steps(2).unwrap();
        assert_eq!(vm.cpu.pc, 0x310);
    }

    #[test]
    fn test_call_return() {
        let mut vm = vm_with(&[
            0x2206, // 200: CALL 206
            0x6142, // 202: LD V1, 42
            0x1204, // 204: JP 204
            0x6001, // 206: LD V0, 1
            0x00EE, // 208: RET
        ]);

        vm.execute_one().unwrap();
        assert_eq!(vm.cpu.pc, 0x206);
        assert_eq!(vm.cpu.stack, vec![0x202]);

        vm.run_steps(2).unwrap();
        assert_eq!(vm.cpu.pc, 0x202);
        assert!(vm.cpu.stack.is_empty());

        vm.execute_one().unwrap();
        assert_eq!(vm.cpu.registers[0], 1);
        assert_eq!(vm.cpu.registers[1], 0x42);
    }

    #[test]
    fn test_return_with_empty_stack() {
        let mut vm = vm_with(&[0x6001, 0x00EE]);
        vm.run_steps(2).unwrap();
        assert_eq!(vm.cpu.pc, 0x200);
    }

    #[test]
    fn test_address_register() {
        let mut vm = vm_with(&[0xAFFE, 0x6005, 0xF01E]);
        vm.run_steps(3).unwrap();
        assert_eq!(vm.cpu.address, 0x003, "I must wrap at 12 bits");

        let mut vm = vm_with(&[0x601B, 0xF029]);
        vm.run_steps(2).unwrap();
        // Only the low nibble selects the glyph.
        assert_eq!(vm.cpu.address, 0xB * 5);
    }

    #[test]
    fn test_bcd() {
        let mut vm = vm_with(&[0x60EA, 0xA300, 0xF033]);
        vm.run_steps(3).unwrap();

        assert_eq!(vm.cpu.ram.read(0x300), 2);
        assert_eq!(vm.cpu.ram.read(0x301), 3);
        assert_eq!(vm.cpu.ram.read(0x302), 4);
        assert_eq!(vm.cpu.address, 0x300);
    }

    #[test]
    fn test_register_dump_and_fill() {
        let mut vm = vm_with(&[0x6011, 0x6122, 0x6233, 0xA400, 0xF155, 0xA401, 0xF265]);
        vm.run_steps(5).unwrap();
        assert_eq!(&vm.cpu.ram.bytes()[0x400..0x403], &[0x11, 0x22, 0x00]);

        vm.run_steps(2).unwrap();
        assert_eq!(&vm.cpu.registers[..3], &[0x22, 0x00, 0x00]);
    }

    #[test]
    fn test_random_mask() {
        let mut vm = vm_with(&[0xC000, 0xC10F]);
        vm.cpu.registers[0] = 0xFF;
        vm.run_steps(2).unwrap();

        assert_eq!(vm.cpu.registers[0], 0);
        assert!(vm.cpu.registers[1] <= 0x0F);
    }

    #[test]
    fn test_random_seeded() {
        let words = [0xC0FF, 0xC1FF, 0xC2FF, 0xC3FF];
        let mut a = vm_with(&words);
        let mut b = vm_with(&words);
        a.run_steps(4).unwrap();
        b.run_steps(4).unwrap();
        assert_eq!(a.cpu.registers, b.cpu.registers);
    }

    #[test]
    fn test_timers() {
        let mut vm = vm_with(&[0x6009, 0xF015, 0xF018, 0xF107]);
        vm.run_steps(2).unwrap();
        assert_eq!(vm.execute_one().unwrap(), Flow::Sound);
        assert_eq!((vm.cpu.delay_timer, vm.cpu.sound_timer), (9, 9));

        vm.tick_timers();
        vm.execute_one().unwrap();
        assert_eq!(vm.cpu.registers[1], 8);
    }

    #[test]
    fn test_draw_twice_collides() {
        let mut vm = vm_with(&[
            0xA20A, // LD I, sprite
            0x6005, // LD V0, 5
            0x6107, // LD V1, 7
            0xD011, // DRW V0, V1, 1
            0xD011, // DRW V0, V1, 1
            0xB6F0, // sprite: 10110110 (and filler)
        ]);
        vm.run_steps(4).unwrap();
        assert_eq!(vm.cpu.registers[0xF], 0);
        assert_eq!(vm.display_buffer().iter().filter(|px| **px).count(), 5);
        assert!(vm.cpu.display.pixel(5, 7));

        assert_eq!(vm.execute_one().unwrap(), Flow::Draw);
        assert_eq!(vm.cpu.registers[0xF], 1);
        assert!(vm.display_buffer().iter().all(|px| !px));
    }

    #[test]
    fn test_draw_collision() {
        // Draw two sprites next to each other.
        // The zero bits of the second draw must not erase
        // the pixels of the first draw
        //
        // draw sprite 1
        // ____####, vf == 0
        //
        // draw sprite 2
        // ########, vf == 0
        let mut vm = vm_with(&[
            0xA20C, // LD I, sprite
            0x6004, // LD v0, 4
            0x6100, // LD v1, 0
            0xD011, // DRW v0, v1, 1
            0x6000, // LD v0, 0
            0xD011, // DRW v0, v1, 1
            0xF000, // sprite: 11110000 00000000
        ]);
        vm.run_steps(6).unwrap();

        assert!(vm.display_buffer()[0]); // sprite 2
        assert!(vm.display_buffer()[4]); // sprite 1
        assert_eq!(vm.cpu.registers[0xF], 0);
    }

    #[test]
    fn test_draw_clips() {
        let mut vm = vm_with(&[
            0xA20A, // LD I, sprite
            0x603C, // LD V0, 60
            0x611F, // LD V1, 31
            0xD012, // DRW V0, V1, 2
            0x1208, // JP 208
            0xFFFF, // sprite
        ]);
        vm.run_steps(4).unwrap();

        let lit: Vec<usize> = vm
            .display_buffer()
            .iter()
            .enumerate()
            .filter_map(|(i, px)| px.then_some(i))
            .collect();
        let expected: Vec<usize> = (60..64).map(|x| x + 31 * DISPLAY_WIDTH).collect();
        assert_eq!(lit, expected);
    }

    #[test]
    fn test_clear_screen() {
        let mut vm = vm_with(&[0xD005, 0x00E0]);
        vm.execute_one().unwrap();
        assert!(vm.display_buffer().iter().any(|px| *px));

        assert_eq!(vm.execute_one().unwrap(), Flow::Draw);
        assert!(vm.display_buffer().iter().all(|px| !px));
    }

    /// Fx0A (LD Vx, K)
    ///
    /// Wait for a keypress, then store the key value in Vx.
    /// The VM must stall while waiting, and signal the state to the outer executer.
    #[test]
    #[rustfmt::skip]
    fn test_key_wait() {
        let mut vm = vm_with(&[
            0xF10A, // LD v1, K
            0x6242, // LD v2, 0x42  ; sentinal
        ]);

        // machine must stall
        for _ in 0..6 {
            assert_eq!(vm.execute_one().unwrap(), Flow::KeyWait);
            assert_eq!(vm.cpu.pc as usize, MEM_START);
        }
        assert_eq!(vm.cpu.key_wait(), Some(1));

        // Releasing a key doesn't count as a press.
        vm.set_key(KeyCode::Key9, false);
        assert_eq!(vm.cpu.key_wait(), Some(1));

        // machine has yielded, waiting for any key to be pressed.
        vm.set_key(KeyCode::Key5, true);
        assert!(vm.cpu.key_state(0x05));
        assert_eq!(vm.cpu.key_press(), Some(0x05));

        // The press is only stored by the next instruction.
        assert_eq!(vm.cpu.pc as usize, MEM_START);
        assert_eq!(vm.cpu.registers[1], 0);

        vm.set_key(KeyCode::Key6, true);
        assert_eq!(vm.execute_one().unwrap(), Flow::Ok);
        assert_eq!(vm.cpu.pc as usize, MEM_START + 2);
        assert_eq!(vm.cpu.registers[1], 0x05);
        assert_eq!(vm.cpu.key_wait(), None);
        assert_eq!(vm.cpu.key_press(), None);

        // Ensure the machine is continuing
        vm.execute_one().unwrap();
        assert_eq!(vm.cpu.pc as usize, MEM_START + 4);
        assert_eq!(vm.cpu.registers[2], 0x42); // sentinal
    }

    #[test]
    fn test_key_wait_needs_new_press() {
        let mut vm = vm_with(&[0xF30A]);
        vm.set_key(KeyCode::KeyC, true);

        assert_eq!(vm.execute_one().unwrap(), Flow::KeyWait);
        // Key is still held, no transition.
        vm.set_key(KeyCode::KeyC, true);
        assert_eq!(vm.cpu.key_wait(), Some(3));

        assert_eq!(vm.cpu.key_press(), None);

        vm.set_key(KeyCode::KeyD, true);
        vm.execute_one().unwrap();
        assert_eq!(vm.cpu.registers[3], 0xD);
        assert_eq!(vm.cpu.pc as usize, MEM_START + 2);
    }

    #[test]
    fn test_key_wait_ignores_earlier_press() {
        let mut vm = vm_with(&[0xF20A]);
        vm.cpu.key_press = Some(0x7);

        // Starting a wait forgets presses recorded before it.
        assert_eq!(vm.execute_one().unwrap(), Flow::KeyWait);
        assert_eq!(vm.cpu.key_press(), None);
        assert_eq!(vm.execute_one().unwrap(), Flow::KeyWait);
        assert_eq!(vm.cpu.pc as usize, MEM_START);
    }

    #[test]
    fn test_unsupported_opcode() {
        let mut vm = vm_with(&[0x6005, 0x5121, 0xFFFF, 0x0123, 0x8008]);
        vm.execute_one().unwrap();
        let before = vm.cpu.clone();

        assert_eq!(vm.execute_one().unwrap(), Flow::Unsupported(0x5121));
        assert_eq!(vm.execute_one().unwrap(), Flow::Unsupported(0xFFFF));
        assert_eq!(vm.execute_one().unwrap(), Flow::Unsupported(0x0123));
        assert_eq!(vm.execute_one().unwrap(), Flow::Unsupported(0x8008));

        assert_eq!(vm.cpu.pc, before.pc + 8);
        assert_eq!(vm.cpu.registers, before.registers);
        assert_eq!(vm.cpu.address, before.address);
    }

    #[test]
    fn test_program_counter_fault() {
        let mut vm = vm_with(&[0x1FFF]);
        vm.execute_one().unwrap();

        let err = vm.execute_one().unwrap_err();
        assert!(matches!(err, Chip8Error::ProgramCounter { pc: 0xFFF }));
        assert_eq!(vm.cpu.pc, 0xFFF);
    }

    #[test]
    fn test_dump_keys() {
        let mut vm = vm_with(&[]);
        assert_eq!(vm.dump_keys().unwrap(), "");
        vm.set_key(KeyCode::KeyA, true);
        vm.set_key(KeyCode::Key1, true);
        assert_eq!(vm.dump_keys().unwrap(), "keys: k1ka");
    }

    #[test]
    fn test_dump_ram() {
        let vm = vm_with(&[0x6005, 0xA123, 0x00E0]);
        assert_eq!(vm.dump_ram(0).unwrap(), "");
        assert_eq!(vm.dump_ram(4).unwrap(), "0200: 6005\n0202: A123\n");
        assert_eq!(
            vm.dump_ram(6).unwrap(),
            "0200: 6005\n0202: A123\n0204: 00E0\n"
        );

        // An odd count still prints the whole word it ends in.
        assert_eq!(vm.dump_ram(3).unwrap(), "0200: 6005\n0202: A123\n");
    }
}
