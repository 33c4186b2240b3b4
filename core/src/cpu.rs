//! CPU collaborator contract.
//!
//! The processor itself lives outside this crate; the scheduler only needs
//! instruction stepping, a register snapshot and an interrupt level input.

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::bus::{Address, ChipBus};
use crate::tickable::Ticks;

/// Outcome of one instruction fetch/execute step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepResult {
    /// CPU clock cycles the instruction consumed
    pub cycles: Ticks,
    /// Whether the instruction was a subroutine or exception return
    pub was_return: bool,
}

/// Register snapshot for status reporting and step-out tracking.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CpuRegisters {
    pub pc: Address,
    pub sp: Address,
}

pub trait CpuCore {
    /// Executes exactly one instruction against the given bus.
    fn step(&mut self, bus: &mut dyn ChipBus) -> Result<StepResult>;

    fn registers(&self) -> CpuRegisters;

    fn set_pc(&mut self, pc: Address);

    fn reset(&mut self);

    /// Presents the chipset's aggregated interrupt level.
    fn set_interrupt_level(&mut self, level: u8);
}
