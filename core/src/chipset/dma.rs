//! DMA enable mask and bus slot arbitration.

use log::*;
use proc_bitfield::bitfield;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumCount, EnumIter, IntoEnumIterator};

use super::regs::set_clr_write;
use crate::types::Word;

bitfield! {
    /// DMA control register (DMACON)
    #[derive(Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
    pub struct Dmacon(pub u16): Debug, FromStorage, IntoStorage, DerefStorage {
        /// Audio channel 0 DMA enable
        pub aud0: bool @ 0,

        /// Audio channel 1 DMA enable
        pub aud1: bool @ 1,

        /// Audio channel 2 DMA enable
        pub aud2: bool @ 2,

        /// Audio channel 3 DMA enable
        pub aud3: bool @ 3,

        /// Disk DMA enable
        pub disk: bool @ 4,

        /// Sprite DMA enable
        pub sprite: bool @ 5,

        /// Blitter DMA enable
        pub blitter: bool @ 6,

        /// Copper DMA enable
        pub copper: bool @ 7,

        /// Bitplane DMA enable
        pub bitplane: bool @ 8,

        /// Master DMA enable, gates all other bits
        pub master: bool @ 9,

        /// Blitter priority over CPU ("blitter nasty")
        pub blitpri: bool @ 10,

        /// Set/clear mode flag (write only)
        pub set_clr: bool @ 15,
    }
}

/// Mask of the four audio channel enable bits
pub const DMA_AUDIO_MASK: Word = 0x000F;

/// Bits that read back through DMACONR
const DMACONR_MASK: Word = 0x07FF;

/// Hardware masters that can claim a bus slot, in fixed priority order
/// (highest first). This ordering is a hardware fact, not a tunable.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Display, EnumIter, EnumCount, Serialize,
    Deserialize,
)]
pub enum DmaSource {
    Agnus,
    Copper,
    Blitter,
    Cpu,
}

/// Upper bound used to size waiting-state tables.
pub const NUM_DMA_SOURCES: usize = <DmaSource as EnumCount>::COUNT;

impl DmaSource {
    fn index(self) -> usize {
        self as usize
    }
}

/// Owns the DMA enable mask and arbitrates the single bus slot available
/// per chipset tick.
///
/// Sources declare themselves waiting with [`DmaArbiter::request_slot`];
/// at tick commit the highest-priority waiter is granted and cleared, all
/// others stay waiting into the next tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DmaArbiter {
    dmacon: Dmacon,
    waiting: [bool; NUM_DMA_SOURCES],
    /// Source granted at the last tick commit
    last_grant: Option<DmaSource>,
}

impl DmaArbiter {
    pub fn new() -> Self {
        Self {
            dmacon: Dmacon(0),
            waiting: [false; NUM_DMA_SOURCES],
            last_grant: None,
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Applies a set/clear write to the enable mask.
    ///
    /// Returns the mask of enable bits that transitioned 0 -> 1 so the
    /// owning chipset can notify the affected sources that their DMA has
    /// just been (re)armed.
    pub fn write_dmacon(&mut self, val: Word) -> Word {
        let before = self.dmacon.0;
        let mut reg = self.dmacon.0;
        set_clr_write(&mut reg, val);
        self.dmacon = Dmacon(reg);

        let rising = !before & self.dmacon.0;
        if rising != 0 {
            trace!("DMACON write {:04X}: rising {:04X}", val, rising);
        }
        rising
    }

    /// DMACONR readback.
    pub fn read_dmacon(&self) -> Word {
        self.dmacon.0 & DMACONR_MASK
    }

    pub fn dmacon(&self) -> Dmacon {
        self.dmacon
    }

    /// Whether the given enable bit is set *and* the master enable is set.
    /// The master bit is a necessary precondition, checked on every query.
    pub fn is_enabled(&self, bit: u16) -> bool {
        self.dmacon.master() && (self.dmacon.0 & (1 << bit)) != 0
    }

    /// Whether audio channel DMA is live for the given channel.
    pub fn audio_enabled(&self, channel: usize) -> bool {
        debug_assert!(channel < 4);
        self.is_enabled(channel as u16)
    }

    /// Declares a source as waiting for a bus slot.
    pub fn request_slot(&mut self, source: DmaSource) {
        self.waiting[source.index()] = true;
    }

    pub fn is_waiting(&self, source: DmaSource) -> bool {
        self.waiting[source.index()]
    }

    /// Whether the CPU's slot request is still pending.
    pub fn cpu_waiting(&self) -> bool {
        self.waiting[DmaSource::Cpu.index()]
    }

    /// Commits this tick's slot grant: the highest-priority waiting source
    /// gets the slot and is cleared, everyone else keeps waiting.
    pub fn commit_tick(&mut self) -> Option<DmaSource> {
        let granted = DmaSource::iter().find(|src| self.waiting[src.index()]);
        if let Some(src) = granted {
            self.waiting[src.index()] = false;
        }
        self.last_grant = granted;
        granted
    }

    pub fn last_grant(&self) -> Option<DmaSource> {
        self.last_grant
    }

    /// Debugger aid: drains one source's pending slot request outside the
    /// normal tick cadence. Grant ordering semantics are unaffected since
    /// only the requested source is touched.
    pub fn debug_execute_source(&mut self, source: DmaSource) -> bool {
        let was_waiting = self.waiting[source.index()];
        self.waiting[source.index()] = false;
        was_waiting
    }

    /// Debugger aid: drains all pending slot requests, in priority order.
    pub fn debug_execute_all(&mut self) -> Vec<DmaSource> {
        let drained = DmaSource::iter()
            .filter(|src| self.waiting[src.index()])
            .collect();
        self.waiting = [false; NUM_DMA_SOURCES];
        drained
    }
}
