//! Communication between the emulator run loop and the controlling thread.

use crossbeam_channel::{Receiver, Sender};

use crate::breakpoints::Breakpoint;
use crate::bus::Address;
use crate::cpu::CpuRegisters;
use crate::tickable::Ticks;
use crate::types::Word;

/// Commands the controller can send to the run loop. Honored between
/// ticks only, never mid-tick.
#[derive(Debug)]
pub enum EmulatorCommand {
    Quit,
    Run,
    Stop,
    Step,
    StepOut,
    Reset,
    SetBreakpoint(Breakpoint),
    ClearBreakpoint(Address),
    ClearAllBreakpoints,
    SetPc(Address),
    WriteRegister { offset: u16, value: Word },
}

/// Snapshot of emulator state for the controller/UI.
#[derive(Debug, Clone)]
pub struct EmulatorStatus {
    pub running: bool,
    pub regs: CpuRegisters,
    pub ticks: Ticks,
    pub hpos: Word,
    pub vpos: Word,
    pub breakpoints: Vec<Address>,
}

#[derive(Debug)]
pub enum EmulatorEvent {
    Status(Box<EmulatorStatus>),
    /// The run loop is parked and state may be inspected safely
    Paused,
    BreakpointHit,
}

pub type EmulatorCommandSender = Sender<EmulatorCommand>;
pub type EmulatorCommandReceiver = Receiver<EmulatorCommand>;
pub type EmulatorEventSender = Sender<EmulatorEvent>;
pub type EmulatorEventReceiver = Receiver<EmulatorEvent>;
