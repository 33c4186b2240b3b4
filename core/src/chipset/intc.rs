//! Interrupt controller: INTENA/INTREQ, priority encoding and IPL lag.

use std::collections::VecDeque;

use log::*;
use serde::{Deserialize, Serialize};

use super::regs::set_clr_write;
use crate::types::Word;

/// Interrupt request bits
pub const INT_TBE: u16 = 0;
pub const INT_DSKBLK: u16 = 1;
pub const INT_SOFT: u16 = 2;
pub const INT_PORTS: u16 = 3;
pub const INT_COPER: u16 = 4;
pub const INT_VERTB: u16 = 5;
pub const INT_BLIT: u16 = 6;
pub const INT_AUD0: u16 = 7;
pub const INT_AUD1: u16 = 8;
pub const INT_AUD2: u16 = 9;
pub const INT_AUD3: u16 = 10;
pub const INT_RBF: u16 = 11;
pub const INT_DSKSYN: u16 = 12;
pub const INT_EXTER: u16 = 13;

/// INTENA master enable bit
const INTENA_MASTER: u16 = 14;

/// CPU interrupt priority level per request bit, indexed by bit number.
/// Scanned from the highest bit down; the first pending+enabled bit wins.
const IPL_TABLE: [u8; 16] = [
    1, // 0  TBE
    1, // 1  DSKBLK
    1, // 2  SOFT
    2, // 3  PORTS
    3, // 4  COPER
    3, // 5  VERTB
    3, // 6  BLIT
    4, // 7  AUD0
    4, // 8  AUD1
    4, // 9  AUD2
    4, // 10 AUD3
    5, // 11 RBF
    5, // 12 DSKSYN
    6, // 13 EXTER
    0, // 14 INTEN (not a request)
    0, // 15 SET/CLR (not a request)
];

/// Ticks a freshly computed IPL takes to become visible to the CPU.
pub const IPL_LATENCY_TICKS: usize = 4;

/// Chipset interrupt controller.
///
/// Tracks enable and request masks, encodes them into a CPU interrupt
/// priority level, and models the propagation delay between a register
/// write and the level change reaching the CPU. An external expansion
/// controller (Gayle) can inject its own level, which merges in after
/// the lag stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterruptController {
    intena: Word,
    intreq: Word,
    /// Pipeline of computed levels on their way to the CPU
    pending_levels: VecDeque<u8>,
    /// Level currently visible to the CPU (post-lag, pre-Gayle merge)
    current_level: u8,
    gayle_level: u8,
    latency: usize,
}

impl InterruptController {
    pub fn new() -> Self {
        Self::with_latency(IPL_LATENCY_TICKS)
    }

    pub fn with_latency(latency: usize) -> Self {
        Self {
            intena: 0,
            intreq: 0,
            pending_levels: VecDeque::with_capacity(latency + 1),
            current_level: 0,
            gayle_level: 0,
            latency,
        }
    }

    pub fn reset(&mut self) {
        let latency = self.latency;
        *self = Self::with_latency(latency);
    }

    pub fn write_intena(&mut self, val: Word) {
        set_clr_write(&mut self.intena, val);
    }

    pub fn write_intreq(&mut self, val: Word) {
        set_clr_write(&mut self.intreq, val);
    }

    pub fn read_intena(&self) -> Word {
        self.intena
    }

    pub fn read_intreq(&self) -> Word {
        self.intreq
    }

    /// Raises or drops a request bit from a hardware source.
    pub fn assert_interrupt(&mut self, bit: u16, asserted: bool) {
        debug_assert!(bit < 14);
        if asserted {
            if self.intreq & (1 << bit) == 0 {
                trace!("interrupt raised: bit {}", bit);
            }
            self.intreq |= 1 << bit;
        } else {
            self.intreq &= !(1 << bit);
        }
    }

    pub fn is_pending(&self, bit: u16) -> bool {
        self.intreq & (1 << bit) != 0
    }

    /// Level requested by the expansion controller. Re-asserts the matching
    /// chipset request bit so handlers that acknowledge through INTREQ see
    /// a consistent picture.
    pub fn set_gayle_level(&mut self, level: u8) {
        self.gayle_level = level;
        match level {
            2 => self.intreq |= 1 << INT_PORTS,
            6 => self.intreq |= 1 << INT_EXTER,
            _ => (),
        }
    }

    /// Encodes the current enable/request masks into an IPL. Returns 0 when
    /// the master enable is off or nothing pending is enabled.
    fn compute_level(&self) -> u8 {
        if self.intena & (1 << INTENA_MASTER) == 0 {
            return 0;
        }
        let active = self.intena & self.intreq & 0x3FFF;
        if active == 0 {
            return 0;
        }
        for bit in (0..14).rev() {
            if active & (1 << bit) != 0 {
                return IPL_TABLE[bit as usize];
            }
        }
        unreachable!()
    }

    /// Advances the lag pipeline by one tick.
    pub fn tick(&mut self) {
        if self.latency == 0 {
            self.current_level = self.compute_level();
            return;
        }
        self.pending_levels.push_back(self.compute_level());
        if self.pending_levels.len() > self.latency {
            // Pipeline full, oldest level becomes visible
            self.current_level = self.pending_levels.pop_front().unwrap();
        }
    }

    /// Interrupt level as the CPU sees it this tick.
    pub fn cpu_level(&self) -> u8 {
        self.current_level.max(self.gayle_level)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(intc: &mut InterruptController) {
        for _ in 0..=IPL_LATENCY_TICKS {
            intc.tick();
        }
    }

    #[test]
    fn master_disable_forces_level_zero() {
        let mut intc = InterruptController::with_latency(0);
        intc.write_intreq(0x8000 | (1 << INT_VERTB));
        intc.write_intena(0x8000 | (1 << INT_VERTB));
        intc.tick();
        assert_eq!(intc.cpu_level(), 0);

        intc.write_intena(0x8000 | (1 << INTENA_MASTER));
        intc.tick();
        assert_eq!(intc.cpu_level(), 3);
    }

    #[test]
    fn highest_pending_bit_determines_level() {
        let mut intc = InterruptController::with_latency(0);
        intc.write_intena(0xFFFF);
        intc.assert_interrupt(INT_SOFT, true);
        intc.tick();
        assert_eq!(intc.cpu_level(), 1);

        intc.assert_interrupt(INT_AUD2, true);
        intc.tick();
        assert_eq!(intc.cpu_level(), 4);

        intc.assert_interrupt(INT_EXTER, true);
        intc.tick();
        assert_eq!(intc.cpu_level(), 6);

        // Acknowledging the highest drops back to the next one
        intc.write_intreq(1 << INT_EXTER);
        intc.tick();
        assert_eq!(intc.cpu_level(), 4);
    }

    #[test]
    fn level_reaches_cpu_after_latency() {
        let mut intc = InterruptController::new();
        intc.write_intena(0xFFFF);
        intc.assert_interrupt(INT_VERTB, true);

        for _ in 0..IPL_LATENCY_TICKS {
            intc.tick();
            assert_eq!(intc.cpu_level(), 0);
        }
        intc.tick();
        assert_eq!(intc.cpu_level(), 3);
    }

    #[test]
    fn zero_latency_is_immediate() {
        let mut intc = InterruptController::with_latency(0);
        intc.write_intena(0xFFFF);
        intc.assert_interrupt(INT_BLIT, true);
        intc.tick();
        assert_eq!(intc.cpu_level(), 3);
    }

    #[test]
    fn gayle_level_merges_after_lag() {
        let mut intc = InterruptController::new();
        intc.write_intena(0xFFFF);
        intc.assert_interrupt(INT_DSKBLK, true);
        drain(&mut intc);
        assert_eq!(intc.cpu_level(), 1);

        // Gayle wins when higher, immediately
        intc.set_gayle_level(2);
        assert_eq!(intc.cpu_level(), 2);
        assert!(intc.is_pending(INT_PORTS));

        // Lagged chipset level wins when higher
        intc.assert_interrupt(INT_RBF, true);
        drain(&mut intc);
        assert_eq!(intc.cpu_level(), 5);

        intc.set_gayle_level(6);
        assert_eq!(intc.cpu_level(), 6);
        assert!(intc.is_pending(INT_EXTER));

        intc.set_gayle_level(0);
        assert_eq!(intc.cpu_level(), 5);
    }

    #[test]
    fn aggregate_level_matches_table() {
        let mut intc = InterruptController::with_latency(0);
        intc.write_intena(0xFFFF);
        for bit in 0..14u16 {
            intc.write_intreq(0x3FFF); // clear all
            intc.assert_interrupt(bit, true);
            intc.tick();
            assert_eq!(intc.cpu_level(), IPL_TABLE[bit as usize], "bit {}", bit);
        }
    }
}
