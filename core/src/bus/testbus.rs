use std::collections::HashMap;

use super::{Address, ChipBus, DmaCounters, ADDRESS_MASK};
use crate::types::Word;

/// Chip RAM region top (2MB)
const CHIP_TOP: Address = 0x001F_FFFF;

/// Trapdoor/slow RAM region ($C00000-$D7FFFF)
const TRAPDOOR_BOTTOM: Address = 0x00C0_0000;
const TRAPDOOR_TOP: Address = 0x00D7_FFFF;

/// Chipset register region ($DFF000-$DFF1FF)
const REGISTER_BOTTOM: Address = 0x00DF_F000;
const REGISTER_TOP: Address = 0x00DF_F1FF;

/// Sparse word-granular test bus with DMA slot accounting.
pub struct Testbus {
    pub mem: HashMap<Address, Word>,
    counters: DmaCounters,
}

impl Testbus {
    pub fn new() -> Self {
        Self {
            mem: HashMap::new(),
            counters: DmaCounters::default(),
        }
    }

    pub fn get_seen_addresses(&self) -> impl Iterator<Item = Address> + '_ {
        self.mem.keys().copied()
    }
}

impl ChipBus for Testbus {
    fn read_word(&mut self, addr: Address) -> Word {
        let addr = addr & ADDRESS_MASK & !1;
        match addr {
            0..=CHIP_TOP => self.counters.chip_reads += 1,
            TRAPDOOR_BOTTOM..=TRAPDOOR_TOP => self.counters.trapdoor_reads += 1,
            REGISTER_BOTTOM..=REGISTER_TOP => self.counters.register_reads += 1,
            _ => (),
        }
        *self.mem.get(&addr).unwrap_or(&0)
    }

    fn write_word(&mut self, addr: Address, val: Word) {
        let addr = addr & ADDRESS_MASK & !1;
        match addr {
            0..=CHIP_TOP => self.counters.chip_writes += 1,
            TRAPDOOR_BOTTOM..=TRAPDOOR_TOP => self.counters.trapdoor_writes += 1,
            REGISTER_BOTTOM..=REGISTER_TOP => self.counters.register_writes += 1,
            _ => (),
        }
        self.mem.insert(addr, val);
    }

    fn dma_counters(&self) -> DmaCounters {
        self.counters
    }
}
