pub mod testbus;

use serde::{Deserialize, Serialize};

use crate::types::{Long, Word};

/// Main address data type (actually 24-bit)
pub type Address = u32;

pub const ADDRESS_MASK: Address = 0x00FF_FFFF;

/// Width of a single bus access, as seen by the access intercepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccessSize {
    Byte,
    Word,
    Long,
}

/// Bulk DMA access counters, split per memory region and direction.
///
/// The scheduler snapshots these around CPU instruction execution; the
/// difference is the number of bus slots the instruction actually consumed
/// and therefore the bus-wait budget the CPU still has to pay off.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DmaCounters {
    pub chip_reads: u64,
    pub chip_writes: u64,
    pub trapdoor_reads: u64,
    pub trapdoor_writes: u64,
    pub register_reads: u64,
    pub register_writes: u64,
}

impl DmaCounters {
    /// Total bus slots accounted for.
    pub fn total(&self) -> u64 {
        self.chip_reads
            + self.chip_writes
            + self.trapdoor_reads
            + self.trapdoor_writes
            + self.register_reads
            + self.register_writes
    }

    /// Slots consumed since an earlier snapshot.
    pub fn slots_since(&self, earlier: &Self) -> u64 {
        self.total() - earlier.total()
    }
}

/// Memory subsystem as seen from the chipset: a flat, word-wide view of
/// chip-accessible memory plus the slot-accounting counters.
///
/// The chipset's DMA engines only ever move 16-bit words; byte lane
/// handling is the CPU interface's business and stays outside this crate.
pub trait ChipBus {
    fn read_word(&mut self, addr: Address) -> Word;
    fn write_word(&mut self, addr: Address, val: Word);

    /// Current DMA access counters (monotonic).
    fn dma_counters(&self) -> DmaCounters;
}

/// Memory access intercept contract.
///
/// The memory subsystem calls `on_write` *before* a write lands and
/// `on_read`/`on_fetch` *after* the read/fetch completed. Implementors must
/// not mutate memory; they only observe and flag.
pub trait BusInterceptor {
    fn on_write(&mut self, pc: Address, addr: Address, val: Long, size: AccessSize);
    fn on_read(&mut self, pc: Address, addr: Address, val: Long, size: AccessSize);
    fn on_fetch(&mut self, pc: Address, addr: Address, val: Long, size: AccessSize);
}
