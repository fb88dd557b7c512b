//! Scheduler driving the virtual machine at a fixed frame rate.
//!
//! Every frame the scheduler executes a batch of instructions, counts the
//! timers down, and publishes the display if it changed. The number of
//! instructions per frame follows from the configured instruction rate.
//!
//! The scheduler owns the machine. Other threads talk to it through a
//! [`SchedulerHandle`], which queues commands. Key events are applied
//! between instructions, everything else between frames.
use std::{
    collections::VecDeque,
    fmt,
    sync::mpsc::{self, Receiver, Sender, TryRecvError},
    thread::{self, JoinHandle},
};

use crate::{
    clock::Clock,
    constants::Address,
    devices::{Devices, KeyCode},
    error::{Chip8Error, Chip8Result},
    snapshot,
    vm::{Chip8Vm, Flow, Hz, FRAME_RATE},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Stopped,
    Running,
    Paused,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stopped => write!(f, "stopped"),
            Self::Running => write!(f, "running"),
            Self::Paused => write!(f, "paused"),
        }
    }
}

/// Snapshot of the run control state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    pub state: RunState,
    pub pc: Address,
    /// Message of the fault that last stopped the machine.
    pub fault: Option<String>,
}

/// Request sent from a [`SchedulerHandle`] to the scheduler thread.
enum Command {
    KeyDown(KeyCode),
    KeyUp(KeyCode),
    Start,
    Stop,
    TogglePause,
    Step(Sender<Chip8Result<Flow>>),
    Reset,
    SetInstructionRate(Hz),
    LoadProgram(Vec<u8>, Sender<Chip8Result<()>>),
    Save(Sender<Chip8Result<Vec<u8>>>),
    Load(Vec<u8>, Sender<Chip8Result<()>>),
    Status(Sender<Status>),
    Shutdown,
}

pub struct Scheduler<D> {
    vm: Chip8Vm,
    devices: D,
    state: RunState,
    instruction_rate: Hz,
    fault: Option<String>,
    /// Commands from the handle, when running on a thread.
    inbox: Option<Receiver<Command>>,
    /// Commands received mid-frame, waiting for the frame boundary.
    pending: VecDeque<Command>,
    shutdown: bool,
}

impl<D: Devices> Scheduler<D> {
    /// Takes ownership of the machine. The scheduler starts out stopped.
    pub fn new(vm: Chip8Vm, devices: D) -> Self {
        let instruction_rate = vm.config().instruction_rate;

        Self {
            vm,
            devices,
            state: RunState::Stopped,
            instruction_rate,
            fault: None,
            inbox: None,
            pending: VecDeque::new(),
            shutdown: false,
        }
    }

    pub fn vm(&self) -> &Chip8Vm {
        &self.vm
    }

    pub fn devices(&self) -> &D {
        &self.devices
    }

    pub fn devices_mut(&mut self) -> &mut D {
        &mut self.devices
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn instruction_rate(&self) -> Hz {
        self.instruction_rate
    }

    pub fn status(&self) -> Status {
        Status {
            state: self.state,
            pc: self.vm.cpu().pc(),
            fault: self.fault.clone(),
        }
    }

    pub fn into_parts(self) -> (Chip8Vm, D) {
        (self.vm, self.devices)
    }

    fn set_state(&mut self, state: RunState) {
        if self.state != state {
            log::debug!("{} -> {}", self.state, state);
            self.state = state;
        }
    }

    pub fn start(&mut self) {
        self.fault = None;
        self.set_state(RunState::Running);
    }

    pub fn stop(&mut self) {
        self.set_state(RunState::Stopped);
    }

    /// Switch between running and paused. Ignored while stopped.
    pub fn toggle_pause(&mut self) {
        match self.state {
            RunState::Running => self.set_state(RunState::Paused),
            RunState::Paused => self.set_state(RunState::Running),
            RunState::Stopped => log::debug!("pause ignored while stopped"),
        }
    }

    /// Execute exactly one instruction and publish the display.
    ///
    /// Timers are not counted down. Only allowed while stopped or paused.
    pub fn step(&mut self) -> Chip8Result<Flow> {
        self.ensure_idle()?;

        match self.vm.execute_one() {
            Ok(flow) => {
                self.vm.cpu_mut().display.mark_dirty();
                self.publish();
                Ok(flow)
            }
            Err(err) => Err(self.halt(err)),
        }
    }

    /// Restart the loaded program from the beginning, and stop.
    pub fn reset(&mut self) {
        self.vm.reset();
        self.fault = None;
        self.set_state(RunState::Stopped);
        self.publish();
    }

    /// Takes effect from the next frame.
    pub fn set_instruction_rate(&mut self, rate: Hz) {
        log::debug!("instruction rate {} Hz -> {} Hz", self.instruction_rate.0, rate.0);
        self.instruction_rate = rate;
    }

    /// Replace the program in memory and reset. Only allowed while stopped or paused.
    pub fn load_program(&mut self, bytecode: &[u8]) -> Chip8Result<()> {
        self.ensure_idle()?;
        self.vm.load_bytecode(bytecode)?;
        log::debug!("loaded program of {} bytes", bytecode.len());
        self.fault = None;
        self.set_state(RunState::Stopped);
        self.publish();
        Ok(())
    }

    /// Serialize the machine state. Only allowed while stopped or paused.
    pub fn save(&mut self) -> Chip8Result<Vec<u8>> {
        self.ensure_idle()?;
        let blob = snapshot::save(&self.vm)?;
        log::debug!("saved snapshot of {} bytes", blob.len());
        Ok(blob)
    }

    /// Restore the machine state. Only allowed while stopped or paused.
    ///
    /// The display is published on the next frame, or right away when
    /// stopped since no frames are running.
    pub fn load(&mut self, blob: &[u8]) -> Chip8Result<()> {
        self.ensure_idle()?;
        snapshot::load(&mut self.vm, blob)?;
        log::debug!("loaded snapshot of {} bytes", blob.len());
        if self.state == RunState::Stopped {
            self.publish();
        }
        Ok(())
    }

    pub fn key_down(&mut self, key: KeyCode) {
        self.vm.set_key(key, true);
    }

    pub fn key_up(&mut self, key: KeyCode) {
        self.vm.set_key(key, false);
    }

    /// Run one frame.
    ///
    /// While running, a batch of instructions is executed and the timers
    /// count down. The display is published whenever it changed, even
    /// when paused.
    ///
    /// On a fatal error the machine stops and the devices are told
    /// before the error is returned.
    pub fn tick(&mut self) -> Chip8Result<()> {
        self.receive();
        self.apply_pending();

        if self.state == RunState::Running {
            for _ in 0..self.instruction_rate.cycles_per_frame() {
                self.receive_keys();

                if let Err(err) = self.vm.execute_one() {
                    return Err(self.halt(err));
                }
            }

            if self.vm.tick_timers() {
                self.devices.beep();
            }
        }

        self.publish();

        Ok(())
    }

    fn publish(&mut self) {
        let cpu = self.vm.cpu_mut();
        if cpu.display.take_dirty() {
            self.devices.draw(cpu.display.buffer());
        }
    }

    fn ensure_idle(&self) -> Chip8Result<()> {
        if self.state == RunState::Running {
            Err(Chip8Error::Busy)
        } else {
            Ok(())
        }
    }

    /// Stop the machine on a fatal error.
    fn halt(&mut self, err: Chip8Error) -> Chip8Error {
        log::error!("machine halted: {err}");
        self.set_state(RunState::Stopped);
        self.fault = Some(err.to_string());
        self.devices.fault(&err);
        err
    }
}

/// Command queue
impl<D: Devices> Scheduler<D> {
    /// Move every queued command into the pending list.
    fn receive(&mut self) {
        while let Some(command) = self.try_recv() {
            self.pending.push_back(command);
        }
    }

    /// Apply queued key events. Other commands wait for the frame boundary.
    fn receive_keys(&mut self) {
        while let Some(command) = self.try_recv() {
            match command {
                // Keys must not overtake commands that were sent before them.
                Command::KeyDown(key) if self.pending.is_empty() => self.key_down(key),
                Command::KeyUp(key) if self.pending.is_empty() => self.key_up(key),
                command => self.pending.push_back(command),
            }
        }
    }

    fn try_recv(&mut self) -> Option<Command> {
        let inbox = self.inbox.as_ref()?;
        match inbox.try_recv() {
            Ok(command) => Some(command),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => {
                // Nobody is left to control the machine.
                self.shutdown = true;
                None
            }
        }
    }

    fn apply_pending(&mut self) {
        while let Some(command) = self.pending.pop_front() {
            self.apply(command);
        }
    }

    fn apply(&mut self, command: Command) {
        // Replies are dropped when the requester stopped listening.
        match command {
            Command::KeyDown(key) => self.key_down(key),
            Command::KeyUp(key) => self.key_up(key),
            Command::Start => self.start(),
            Command::Stop => self.stop(),
            Command::TogglePause => self.toggle_pause(),
            Command::Step(reply) => {
                let _ = reply.send(self.step());
            }
            Command::Reset => self.reset(),
            Command::SetInstructionRate(rate) => self.set_instruction_rate(rate),
            Command::LoadProgram(bytecode, reply) => {
                let _ = reply.send(self.load_program(&bytecode));
            }
            Command::Save(reply) => {
                let _ = reply.send(self.save());
            }
            Command::Load(blob, reply) => {
                let _ = reply.send(self.load(&blob));
            }
            Command::Status(reply) => {
                let _ = reply.send(self.status());
            }
            Command::Shutdown => self.shutdown = true,
        }
    }
}

/// Threading
impl<D: Devices + Send + 'static> Scheduler<D> {
    /// Move the scheduler onto its own thread.
    pub fn spawn(mut self) -> Chip8Result<SchedulerHandle> {
        let (sender, inbox) = mpsc::channel();
        self.inbox = Some(inbox);

        let worker = thread::Builder::new()
            .name("chip8-scheduler".to_string())
            .spawn(move || self.run())?;

        Ok(SchedulerHandle {
            sender,
            worker: Some(worker),
        })
    }

    fn run(mut self) -> Chip8Vm {
        let mut clock = Clock::new(FRAME_RATE);

        while !self.shutdown {
            if self.state == RunState::Stopped {
                // No frames run while stopped, so block until told otherwise.
                if self.pending.is_empty() {
                    match self.inbox.as_ref().map(|inbox| inbox.recv()) {
                        Some(Ok(command)) => self.pending.push_back(command),
                        _ => {
                            self.shutdown = true;
                            continue;
                        }
                    }
                }
                self.apply_pending();
                clock.reset();
                continue;
            }

            // Faults are reported to the devices, and the machine is stopped.
            let _ = self.tick();
            clock.wait();
        }

        log::debug!("scheduler shut down");
        self.vm
    }
}

/// Control surface of a scheduler running on its own thread.
///
/// Dropping the handle shuts the scheduler down.
pub struct SchedulerHandle {
    sender: Sender<Command>,
    worker: Option<JoinHandle<Chip8Vm>>,
}

impl SchedulerHandle {
    fn send(&self, command: Command) -> Chip8Result<()> {
        self.sender
            .send(command)
            .map_err(|_| Chip8Error::Disconnected)
    }

    /// Send a command and block until the scheduler replies.
    fn request<T>(&self, command: impl FnOnce(Sender<T>) -> Command) -> Chip8Result<T> {
        let (reply, response) = mpsc::channel();
        self.send(command(reply))?;
        response.recv().map_err(|_| Chip8Error::Disconnected)
    }

    pub fn key_down(&self, key: KeyCode) -> Chip8Result<()> {
        self.send(Command::KeyDown(key))
    }

    pub fn key_up(&self, key: KeyCode) -> Chip8Result<()> {
        self.send(Command::KeyUp(key))
    }

    pub fn start(&self) -> Chip8Result<()> {
        self.send(Command::Start)
    }

    pub fn stop(&self) -> Chip8Result<()> {
        self.send(Command::Stop)
    }

    pub fn toggle_pause(&self) -> Chip8Result<()> {
        self.send(Command::TogglePause)
    }

    pub fn step(&self) -> Chip8Result<Flow> {
        self.request(Command::Step)?
    }

    pub fn reset(&self) -> Chip8Result<()> {
        self.send(Command::Reset)
    }

    pub fn set_instruction_rate(&self, rate: Hz) -> Chip8Result<()> {
        self.send(Command::SetInstructionRate(rate))
    }

    pub fn load_program(&self, bytecode: impl Into<Vec<u8>>) -> Chip8Result<()> {
        let bytecode = bytecode.into();
        self.request(|reply| Command::LoadProgram(bytecode, reply))?
    }

    pub fn save(&self) -> Chip8Result<Vec<u8>> {
        self.request(Command::Save)?
    }

    pub fn load(&self, blob: impl Into<Vec<u8>>) -> Chip8Result<()> {
        let blob = blob.into();
        self.request(|reply| Command::Load(blob, reply))?
    }

    pub fn status(&self) -> Chip8Result<Status> {
        self.request(Command::Status)
    }

    /// Stop the scheduler thread and take back the machine.
    pub fn shutdown(mut self) -> Chip8Result<Chip8Vm> {
        let _ = self.send(Command::Shutdown);
        match self.worker.take() {
            Some(worker) => worker.join().map_err(|_| Chip8Error::Disconnected),
            None => Err(Chip8Error::Disconnected),
        }
    }
}

impl Drop for SchedulerHandle {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            let _ = self.sender.send(Command::Shutdown);
            let _ = worker.join();
        }
    }
}
