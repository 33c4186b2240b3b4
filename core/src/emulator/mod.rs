//! Top-level scheduler: drives the chipset, rations CPU execution against
//! bus contention and services debugger commands.

pub mod comm;

use anyhow::Result;
use crossbeam_channel::TryRecvError;
use log::*;

use crate::breakpoints::BreakpointCollection;
use crate::bus::{Address, ChipBus, DmaCounters};
use crate::chipset::dma::DmaSource;
use crate::chipset::Chipset;
use crate::cpu::CpuCore;
use crate::tickable::{Tickable, Ticks};
use comm::{
    EmulatorCommand, EmulatorCommandReceiver, EmulatorCommandSender, EmulatorEvent,
    EmulatorEventReceiver, EmulatorEventSender, EmulatorStatus,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Running,
    /// Run until the current instruction's cycle/wait budget drains
    Step,
    /// Run until a return instruction at or above the recorded stack pointer
    StepOut { sp: Address },
    Stopped,
    Exit,
}

/// The emulator run loop. One call to [`Tickable::tick`] advances the
/// machine by that many chipset ticks (macro-ticks).
pub struct Emulator<TCpu: CpuCore, TBus: ChipBus> {
    pub chipset: Chipset,
    pub breakpoints: BreakpointCollection,
    cpu: TCpu,
    bus: TBus,

    run_mode: RunMode,
    /// Chipset ticks left to pay for the last instruction pair
    cpu_cycles: Ticks,
    /// Bus slots the last instruction pair consumed, still to be arbitrated
    total_waits: u64,
    /// Suppresses the execute-breakpoint check for the instruction we are
    /// resuming on, so Run after a hit makes progress
    resume_skip_bp: bool,

    cmd_recv: EmulatorCommandReceiver,
    cmd_sender: EmulatorCommandSender,
    event_sender: EmulatorEventSender,
}

impl<TCpu: CpuCore, TBus: ChipBus> Emulator<TCpu, TBus> {
    pub fn new(cpu: TCpu, bus: TBus) -> (Self, EmulatorEventReceiver) {
        let (cmd_sender, cmd_recv) = crossbeam_channel::unbounded();
        let (event_sender, event_recv) = crossbeam_channel::unbounded();
        (
            Self {
                chipset: Chipset::new(),
                breakpoints: BreakpointCollection::new(),
                cpu,
                bus,
                run_mode: RunMode::Stopped,
                cpu_cycles: 0,
                total_waits: 0,
                resume_skip_bp: false,
                cmd_recv,
                cmd_sender,
                event_sender,
            },
            event_recv,
        )
    }

    pub fn create_cmd_sender(&self) -> EmulatorCommandSender {
        self.cmd_sender.clone()
    }

    pub fn run_mode(&self) -> RunMode {
        self.run_mode
    }

    pub fn cpu(&self) -> &TCpu {
        &self.cpu
    }

    pub fn bus(&self) -> &TBus {
        &self.bus
    }

    fn set_run_mode(&mut self, mode: RunMode) {
        if self.run_mode == mode {
            return;
        }
        debug!("run mode: {:?} -> {:?}", self.run_mode, mode);
        self.run_mode = mode;
        self.send_status();
    }

    fn send_status(&self) {
        let status = EmulatorStatus {
            running: !matches!(self.run_mode, RunMode::Stopped | RunMode::Exit),
            regs: self.cpu.registers(),
            ticks: self.chipset.clock.ticks(),
            hpos: self.chipset.clock.hpos(),
            vpos: self.chipset.clock.vpos(),
            breakpoints: self.breakpoints.iter().map(|bp| bp.address).collect(),
        };
        if self.event_sender.send(EmulatorEvent::Status(Box::new(status))).is_err() {
            warn!("status event receiver disconnected");
        }
    }

    fn handle_command(&mut self, cmd: EmulatorCommand) {
        match cmd {
            EmulatorCommand::Quit => self.set_run_mode(RunMode::Exit),
            EmulatorCommand::Run => {
                self.resume_skip_bp = true;
                self.set_run_mode(RunMode::Running);
            }
            EmulatorCommand::Stop => self.set_run_mode(RunMode::Stopped),
            EmulatorCommand::Step => {
                self.resume_skip_bp = true;
                self.set_run_mode(RunMode::Step);
            }
            EmulatorCommand::StepOut => {
                self.resume_skip_bp = true;
                let sp = self.cpu.registers().sp;
                self.set_run_mode(RunMode::StepOut { sp });
            }
            EmulatorCommand::Reset => {
                self.chipset.reset();
                self.cpu.reset();
                self.cpu_cycles = 0;
                self.total_waits = 0;
                self.send_status();
            }
            EmulatorCommand::SetBreakpoint(bp) => self.breakpoints.set(bp),
            EmulatorCommand::ClearBreakpoint(addr) => {
                self.breakpoints.clear(addr);
            }
            EmulatorCommand::ClearAllBreakpoints => self.breakpoints.clear_all(),
            EmulatorCommand::SetPc(pc) => self.cpu.set_pc(pc),
            EmulatorCommand::WriteRegister { offset, value } => {
                if let Err(e) = self.chipset.write_register(offset, value) {
                    warn!("register write failed: {}", e);
                }
            }
        }
    }

    /// Drains pending commands. While stopped, parks on the command channel
    /// so the controller can inspect and mutate state with the loop idle.
    fn process_commands(&mut self) {
        loop {
            match self.cmd_recv.try_recv() {
                Ok(cmd) => self.handle_command(cmd),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.set_run_mode(RunMode::Exit);
                    return;
                }
            }
        }
        while self.run_mode == RunMode::Stopped {
            let _ = self.event_sender.send(EmulatorEvent::Paused);
            match self.cmd_recv.recv() {
                Ok(cmd) => self.handle_command(cmd),
                Err(_) => self.set_run_mode(RunMode::Exit),
            }
        }
    }

    /// Two instruction steps back to back; the CPU clock runs at twice the
    /// chipset tick rate, so the summed cycle cost is halved to get the
    /// tick budget. The bus counter delta around the pair is the slot debt
    /// (`total_waits`) the CPU still has to pay off.
    fn execute_instruction_pair(&mut self) -> Result<()> {
        let counters_before: DmaCounters = self.bus.dma_counters();
        self.cpu
            .set_interrupt_level(self.chipset.cpu_interrupt_level());

        let mut cycles = 0;
        for i in 0..2 {
            let result = self.cpu.step(&mut self.bus)?;
            cycles += result.cycles;
            if let RunMode::StepOut { sp } = self.run_mode {
                if result.was_return && self.cpu.registers().sp >= sp {
                    // Target frame left; drain the budget, then stop
                    self.set_run_mode(RunMode::Step);
                }
            }
            // Execute breakpoints are checked on every instruction fetch,
            // so the second instruction of the pair is not executed when
            // one sits at its address. The latched hit stops the loop
            // after this tick.
            if i == 0
                && matches!(self.run_mode, RunMode::Running | RunMode::StepOut { .. })
                && self.breakpoints.is_breakpoint(self.cpu.registers().pc)
            {
                break;
            }
        }
        self.cpu_cycles = cycles / 2;
        self.total_waits = self.bus.dma_counters().slots_since(&counters_before);
        self.resume_skip_bp = false;
        Ok(())
    }

    /// One scheduler iteration: devices, CPU rationing, tick commit.
    fn macro_tick(&mut self) -> Result<bool> {
        self.process_commands();
        if self.run_mode == RunMode::Exit {
            return Ok(false);
        }

        self.chipset.emulate_tick(&mut self.bus);

        if self.cpu_cycles == 0 && self.total_waits == 0 {
            let pc = self.cpu.registers().pc;
            let blocked = !self.resume_skip_bp
                && matches!(self.run_mode, RunMode::Running | RunMode::StepOut { .. })
                && self.breakpoints.is_breakpoint(pc);
            if !blocked {
                self.execute_instruction_pair()?;
            }
        } else if self.total_waits > 0 {
            self.chipset.dma.request_slot(DmaSource::Cpu);
        }

        if self.cpu_cycles > 0 {
            self.cpu_cycles -= 1;
        }

        self.chipset.commit_tick();

        if self.total_waits > 0 && !self.chipset.dma.cpu_waiting() {
            self.total_waits -= 1;
        }

        if self.breakpoints.breakpoint_hit() {
            let _ = self.event_sender.send(EmulatorEvent::BreakpointHit);
            self.set_run_mode(RunMode::Stopped);
        } else if self.run_mode == RunMode::Step
            && self.cpu_cycles == 0
            && self.total_waits == 0
        {
            self.set_run_mode(RunMode::Stopped);
        }

        if self.chipset.clock.flags().end_of_frame() {
            self.send_status();
        }
        Ok(true)
    }
}

impl<TCpu: CpuCore, TBus: ChipBus> Tickable for Emulator<TCpu, TBus> {
    fn tick(&mut self, ticks: Ticks) -> Result<Ticks> {
        for done in 0..ticks {
            if !self.macro_tick()? {
                return Ok(done);
            }
            // Hand control back on a stop; the next call parks on the
            // command channel
            if self.run_mode == RunMode::Stopped {
                return Ok(done + 1);
            }
        }
        Ok(ticks)
    }
}
