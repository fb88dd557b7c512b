mod bytecode;
mod clock;
pub mod constants;
mod cpu;
mod devices;
pub mod disasm;
mod display;
mod error;
mod keymap;
mod memory;
pub mod scheduler;
pub mod snapshot;
mod vm;

pub use self::{
    clock::Clock,
    devices::{Devices, Headless, InvalidKeyCode, KeyCode},
    display::{Display, DisplayBuffer},
    keymap::KeyMap,
    memory::Memory,
    vm::{Hz, FRAME_RATE},
};

pub mod prelude {
    pub use super::{
        cpu::Chip8Cpu,
        disasm::Disassembler,
        error::{Chip8Error, Chip8Result},
        scheduler::{RunState, Scheduler, SchedulerHandle, Status},
        vm::{Chip8Conf, Chip8Vm, Flow},
    };
}
