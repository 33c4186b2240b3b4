//! Chipset clock: free-running tick counter and derived beam position.

use proc_bitfield::bitfield;
use serde::{Deserialize, Serialize};

use crate::tickable::Ticks;
use crate::types::Word;

/// Color clocks per scanline (PAL)
pub const CCKS_PER_LINE: Word = 227;

/// Scanlines per frame (PAL, non-interlaced)
pub const LINES_PER_FRAME: Word = 312;

/// Scanlines covered by the vertical blanking period
pub const VBLANK_LINES: Word = 26;

/// Color clocks covered by the horizontal blanking period
pub const HBLANK_CCKS: Word = 18;

bitfield! {
    /// Per-tick clock status, recomputed on every advance
    #[derive(Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
    pub struct ClockFlags(pub u8): Debug, FromStorage, IntoStorage, DerefStorage {
        /// Last color clock of the current scanline
        pub end_of_line: bool @ 0,

        /// Beam inside the horizontal blanking period
        pub hblank: bool @ 1,

        /// Beam inside the vertical blanking period
        pub vblank: bool @ 2,

        /// Last color clock of the current frame
        pub end_of_frame: bool @ 3,
    }
}

/// Free-running counter of chipset ticks with derived beam position.
///
/// Advances exactly once per scheduler iteration. The flags describe the
/// tick the beam currently sits on and gate which device operations run
/// this tick (audio polls on `end_of_line`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChipsetClock {
    ticks: Ticks,
    hpos: Word,
    vpos: Word,
    flags: ClockFlags,
    /// Long frame bit, toggled at each frame wrap
    lof: bool,
}

impl ChipsetClock {
    pub fn new() -> Self {
        let mut clock = Self {
            ticks: 0,
            hpos: 0,
            vpos: 0,
            flags: ClockFlags::default(),
            lof: true,
        };
        clock.update_flags();
        clock
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Advance the beam by one color clock.
    pub fn advance(&mut self) {
        self.ticks += 1;
        self.hpos += 1;
        if self.hpos >= CCKS_PER_LINE {
            self.hpos = 0;
            self.vpos += 1;
            if self.vpos >= LINES_PER_FRAME {
                self.vpos = 0;
                self.lof = !self.lof;
            }
        }
        self.update_flags();
    }

    fn update_flags(&mut self) {
        self.flags.set_end_of_line(self.hpos == CCKS_PER_LINE - 1);
        self.flags.set_hblank(self.hpos < HBLANK_CCKS);
        self.flags.set_vblank(self.vpos < VBLANK_LINES);
        self.flags.set_end_of_frame(
            self.hpos == CCKS_PER_LINE - 1 && self.vpos == LINES_PER_FRAME - 1,
        );
    }

    pub fn ticks(&self) -> Ticks {
        self.ticks
    }

    pub fn hpos(&self) -> Word {
        self.hpos
    }

    pub fn vpos(&self) -> Word {
        self.vpos
    }

    pub fn flags(&self) -> ClockFlags {
        self.flags
    }

    /// VPOSR: LOF bit and the high bit of the vertical position.
    pub fn read_vposr(&self) -> Word {
        let lof_bit = if self.lof { 0x8000 } else { 0 };
        lof_bit | ((self.vpos >> 8) & 1)
    }

    /// VHPOSR: low vertical position byte and horizontal position.
    pub fn read_vhposr(&self) -> Word {
        ((self.vpos & 0xFF) << 8) | (self.hpos & 0xFF)
    }
}
