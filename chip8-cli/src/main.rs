//! Entrypoint for CLI
use std::{
    error::Error,
    fs,
    io::{self, Write},
    path::PathBuf,
    str::FromStr,
    time::Instant,
};

use chip8::{
    prelude::*, Clock, Devices, DisplayBuffer, Hz, KeyCode, KeyMap, FRAME_RATE,
};
use clap::{Parser, Subcommand};
use log::{debug, info, LevelFilter};

#[derive(Parser)]
#[command(author, version, about = "Headless CHIP-8 virtual machine", long_about = None)]
struct Args {
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Run the target ROM file, then print the display
    Run(RunArgs),
    /// Disassemble the target ROM into readable assembly
    Dis {
        /// Path to the ROM to disassemble
        rom: PathBuf,
    },
}

#[derive(clap::Args)]
struct RunArgs {
    /// Path to the ROM to run
    rom: PathBuf,

    /// Instructions executed per second
    #[arg(long, default_value_t = chip8::constants::DEFAULT_INSTRUCTION_RATE)]
    rate: u64,

    /// Number of 60 Hz frames to run for
    #[arg(long, default_value_t = 600)]
    frames: u64,

    /// Seed for the random number generator
    #[arg(long)]
    seed: Option<u64>,

    /// Press a key at a frame, held for a number of frames (default 1).
    /// Keys are named as in the key map, for example `w@120+10`
    #[arg(long = "press", value_name = "KEY@FRAME[+HOLD]")]
    presses: Vec<Press>,

    /// YAML file binding keyboard key names to keypad keys
    #[arg(long)]
    keymap: Option<PathBuf>,

    /// Restore a saved machine state before running
    #[arg(long, value_name = "FILE")]
    load_state: Option<PathBuf>,

    /// Save the machine state after running
    #[arg(long, value_name = "FILE")]
    save_state: Option<PathBuf>,

    /// Run frames back to back instead of at 60 Hz
    #[arg(long)]
    fast: bool,
}

/// Scripted key press.
#[derive(Debug, Clone)]
struct Press {
    key: String,
    frame: u64,
    hold: u64,
}

impl Press {
    /// Frame the key is released on.
    fn release(&self) -> u64 {
        self.frame.saturating_add(self.hold)
    }
}

impl FromStr for Press {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (key, timing) = s
            .rsplit_once('@')
            .ok_or_else(|| format!("expected KEY@FRAME[+HOLD], found \"{s}\""))?;
        let (frame, hold) = match timing.split_once('+') {
            Some((frame, hold)) => (frame, hold),
            None => (timing, "1"),
        };

        let press = Press {
            key: key.to_string(),
            frame: frame.parse().map_err(|err| format!("bad frame \"{frame}\": {err}"))?,
            hold: hold.parse().map_err(|err| format!("bad hold \"{hold}\": {err}"))?,
        };
        if press.hold == 0 {
            return Err(format!("key must be held for at least one frame, found \"{s}\""));
        }

        Ok(press)
    }
}

/// Render sink for the terminal. Frames are only counted, the final one
/// is printed when the run ends.
#[derive(Default)]
struct Terminal {
    frames: usize,
}

impl Devices for Terminal {
    fn draw(&mut self, _display: &DisplayBuffer) {
        self.frames += 1;
    }

    fn beep(&mut self) {
        // Terminal bell
        let mut stdout = io::stdout();
        let _ = stdout.write_all(b"\x07").and_then(|_| stdout.flush());
    }
}

fn run_bytecode(args: RunArgs) -> Result<(), Box<dyn Error>> {
    let bytecode = fs::read(&args.rom)?;

    let keymap = match &args.keymap {
        Some(path) => KeyMap::from_file(path)?,
        None => KeyMap::default(),
    };

    let presses = args
        .presses
        .iter()
        .map(|press| match keymap.map_key(&press.key) {
            Some(keycode) => Ok((keycode, press.frame, press.release())),
            None => Err(format!("key \"{}\" is not in the key map", press.key)),
        })
        .collect::<Result<Vec<(KeyCode, u64, u64)>, String>>()?;

    let mut vm = Chip8Vm::new(Chip8Conf {
        instruction_rate: Hz(args.rate),
        rng_seed: args.seed,
    });
    vm.load_bytecode(&bytecode)?;

    let mut scheduler = Scheduler::new(vm, Terminal::default());

    if let Some(path) = &args.load_state {
        scheduler.load(&fs::read(path)?)?;
        info!("restored state from {}", path.display());
    }

    info!("running {} at {} Hz", args.rom.display(), args.rate);
    scheduler.start();

    let mut clock = Clock::new(FRAME_RATE);
    let start = Instant::now();
    let mut result = Ok(());

    for frame in 0..args.frames {
        for (keycode, down, up) in &presses {
            if frame == *down {
                debug!("frame {frame}: {keycode} down");
                scheduler.key_down(*keycode);
            } else if frame == *up {
                debug!("frame {frame}: {keycode} up");
                scheduler.key_up(*keycode);
            }
        }

        result = scheduler.tick();
        if result.is_err() {
            break;
        }

        if !args.fast {
            clock.wait();
        }
    }

    info!(
        "{} frames drawn in {}ms",
        scheduler.devices().frames,
        start.elapsed().as_nanos() as f64 / 1000000.0
    );

    println!("{}", scheduler.vm().dump_display()?);
    let keys = scheduler.vm().dump_keys()?;
    if !keys.is_empty() {
        println!("{keys}");
    }

    if let Some(path) = &args.save_state {
        scheduler.stop();
        fs::write(path, scheduler.save()?)?;
        info!("saved state to {}", path.display());
    }

    result?;

    Ok(())
}

fn run_disassembler(rom: PathBuf) -> Result<(), Box<dyn Error>> {
    let bytecode = fs::read(rom)?;
    print!("{}", Disassembler::new(&bytecode).listing()?);
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    simple_logger::SimpleLogger::new()
        .with_level(LevelFilter::Info)
        .env()
        .init()?;

    match Args::parse().cmd {
        Cmd::Run(args) => run_bytecode(args)?,
        Cmd::Dis { rom } => run_disassembler(rom)?,
    }

    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_parse_press() {
        let press: Press = "w@120+10".parse().unwrap();
        assert_eq!((press.key.as_str(), press.frame, press.hold), ("w", 120, 10));

        let press: Press = "KP_Enter@3".parse().unwrap();
        assert_eq!((press.key.as_str(), press.frame, press.hold), ("KP_Enter", 3, 1));

        // The key itself may be an at sign.
        let press: Press = "@@5".parse().unwrap();
        assert_eq!(press.key, "@");

        assert!("w".parse::<Press>().is_err());
        assert!("w@soon".parse::<Press>().is_err());
        assert!("w@3+0".parse::<Press>().is_err());

        // Releases past the last frame never happen.
        let press: Press = "w@18446744073709551615+5".parse().unwrap();
        assert_eq!(press.release(), u64::MAX);
        assert_eq!("w@120+10".parse::<Press>().unwrap().release(), 130);
    }

    #[test]
    fn test_args() {
        let args = Args::try_parse_from([
            "chip8", "run", "maze.ch8", "--rate", "700", "--press", "q@2", "--press", "e@4+2",
        ])
        .unwrap();

        match args.cmd {
            Cmd::Run(run) => {
                assert_eq!(run.rate, 700);
                assert_eq!(run.frames, 600);
                assert_eq!(run.presses.len(), 2);
                assert!(!run.fast);
            }
            Cmd::Dis { .. } => panic!("expected run command"),
        }
    }
}
