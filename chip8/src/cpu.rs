//! CPU and memory state.
use crate::{constants::*, display::Display, memory::Memory};

/// Core state for a chip8 interpreter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chip8Cpu {
    // ------------------------------------------------------------------------
    // Registers
    /// Program counter pointing to the current position in the bytecode.
    pub(crate) pc: Address,
    /// General purpose registers for temporary values.
    ///
    /// Register 16 (VF) is used for either the carry flag or borrow switch depending on opcode.
    pub(crate) registers: [u8; REGISTER_COUNT],
    /// Pointer register used for temporarily storing an address. Since addresses are 12 bits, only the
    /// lowest (rightmost) bits are used.
    pub(crate) address: Address,
    /// (DT) Delay timer that counts down to 0.
    pub(crate) delay_timer: u8,
    /// (ST) Sound timer that counts down to 0.
    pub(crate) sound_timer: u8,
    /// Register waiting to receive the next key press, set by `Fx0A`.
    pub(crate) key_wait: Option<u8>,
    /// Key that went down during the wait, delivered by the next instruction.
    pub(crate) key_press: Option<u8>,
    /// Keyboard input state. Pressed is a 1 bit, released is a 0 bit.
    pub(crate) key_state: u16,

    // ------------------------------------------------------------------------
    // Memory
    /// Main memory storage space.
    pub(crate) ram: Memory,
    /// Stack of return pointers used for jumping when a routine call finishes.
    ///
    /// Unlike the COSMAC VIP there is no nesting limit.
    pub(crate) stack: Vec<Address>,
    /// Screen buffer that is drawn too.
    pub(crate) display: Display,
}

impl Default for Chip8Cpu {
    fn default() -> Self {
        Self {
            pc: MEM_START as Address,
            registers: [0; REGISTER_COUNT],
            address: 0,
            delay_timer: 0,
            sound_timer: 0,
            key_wait: None,
            key_press: None,
            key_state: 0,

            ram: Memory::new(),
            stack: Vec::new(),
            display: Display::new(),
        }
    }
}

impl Chip8Cpu {
    pub fn new() -> Self {
        Default::default()
    }

    /// Put every register, the stack, timers, keys and the display back to
    /// their power-on state. Memory is kept, so a loaded program can be
    /// restarted.
    pub fn reset(&mut self) {
        self.pc = MEM_START as Address;
        self.registers = [0; REGISTER_COUNT];
        self.address = 0;
        self.delay_timer = 0;
        self.sound_timer = 0;
        self.key_wait = None;
        self.key_press = None;
        self.key_state = 0;
        self.stack.clear();
        self.display.clear();
    }

    pub fn pc(&self) -> Address {
        self.pc
    }

    pub fn registers(&self) -> &[u8; REGISTER_COUNT] {
        &self.registers
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn stack(&self) -> &[Address] {
        &self.stack
    }

    pub fn delay_timer(&self) -> u8 {
        self.delay_timer
    }

    pub fn sound_timer(&self) -> u8 {
        self.sound_timer
    }

    pub fn memory(&self) -> &Memory {
        &self.ram
    }

    pub fn display(&self) -> &Display {
        &self.display
    }

    /// Register index that will receive the next key press, if the
    /// interpreter is suspended on `Fx0A`.
    pub fn key_wait(&self) -> Option<u8> {
        self.key_wait
    }

    /// Key pressed while waiting that hasn't been delivered to the register yet.
    pub fn key_press(&self) -> Option<u8> {
        self.key_press
    }

    pub fn set_key_state(&mut self, key_id: u8, state: bool) {
        if key_id < KEY_COUNT {
            if state {
                self.key_state |= 1 << key_id;
            } else {
                self.key_state &= !(1 << key_id);
            }
        }
    }

    pub fn key_state(&self, key_id: u8) -> bool {
        if key_id < KEY_COUNT {
            self.key_state & (1 << key_id) > 0
        } else {
            false
        }
    }

    /// Bit field of all 16 keys, bit N set when key N is pressed.
    pub fn keys(&self) -> u16 {
        self.key_state
    }

    /// Check whether any key is pressed down.
    #[inline(always)]
    pub fn any_key(&self) -> bool {
        self.key_state > 0
    }

    /// Clear the keyboard input state, setting all keys to up.
    #[inline(always)]
    pub fn clear_keys(&mut self) {
        self.key_state = 0;
    }

    /// Count down the delay timer.
    #[inline]
    pub fn tick_delay(&mut self) {
        self.delay_timer = self.delay_timer.saturating_sub(1);
    }

    /// Count down the sound timer.
    ///
    /// Returns `true` when the timer was just decremented to exactly 1,
    /// which is when the buzzer is triggered.
    #[inline]
    pub fn tick_sound(&mut self) -> bool {
        if self.sound_timer > 0 {
            self.sound_timer -= 1;
            self.sound_timer == 1
        } else {
            false
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_key_state() {
        let mut cpu = Chip8Cpu::default();

        cpu.set_key_state(0, true);
        assert_eq!(cpu.key_state, 0b00000000_00000001);
        assert!(cpu.key_state(0));
        assert!(!cpu.key_state(1));
        assert!(!cpu.key_state(7));

        cpu.set_key_state(7, true);
        assert_eq!(cpu.key_state, 0b00000000_10000001);
        assert!(cpu.key_state(0));
        assert!(cpu.key_state(7));

        cpu.set_key_state(0, false);
        assert_eq!(cpu.key_state, 0b00000000_10000000);
        assert!(!cpu.key_state(0));
        assert!(cpu.any_key());

        cpu.set_key_state(15, true);
        assert_eq!(cpu.key_state, 0b10000000_10000000);
        assert!(cpu.key_state(15));

        // Out of range keys are ignored.
        cpu.set_key_state(16, true);
        assert_eq!(cpu.key_state, 0b10000000_10000000);
        assert!(!cpu.key_state(16));

        cpu.clear_keys();
        assert!(!cpu.any_key());
        assert_eq!(cpu.keys(), 0);
    }

    #[test]
    fn test_timers_clamp_at_zero() {
        let mut cpu = Chip8Cpu::default();
        cpu.delay_timer = 1;

        cpu.tick_delay();
        cpu.tick_delay();
        assert_eq!(cpu.delay_timer, 0);

        assert!(!cpu.tick_sound());
        assert_eq!(cpu.sound_timer, 0);
    }

    #[test]
    fn test_sound_fires_on_reaching_one() {
        let mut cpu = Chip8Cpu::default();
        cpu.sound_timer = 3;

        assert!(!cpu.tick_sound()); // 3 -> 2
        assert!(cpu.tick_sound()); // 2 -> 1
        assert!(!cpu.tick_sound()); // 1 -> 0
        assert!(!cpu.tick_sound());
    }

    #[test]
    fn test_reset_keeps_memory() {
        let mut cpu = Chip8Cpu::default();
        cpu.ram.load_program(&[0x60, 0x01]).unwrap();
        cpu.registers[3] = 9;
        cpu.stack.push(0x204);
        cpu.pc = 0x300;
        cpu.display.draw_sprite(0, 0, &[0xFF]);

        cpu.reset();

        assert_eq!(cpu.pc, 0x200);
        assert_eq!(cpu.registers, [0; REGISTER_COUNT]);
        assert!(cpu.stack.is_empty());
        assert!(cpu.display.buffer().iter().all(|px| !px));
        assert_eq!(cpu.ram.read(0x200), 0x60);
    }
}
