use proc_bitfield::bitfield;
use serde::{Deserialize, Serialize};

pub type Byte = u8;
pub type Word = u16;
pub type Long = u32;

bitfield! {
    /// General purpose 16-bit field
    #[derive(Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
    pub struct Field16(pub u16): Debug, FromStorage, IntoStorage, DerefStorage {
        pub msb: u8 @ 8..16,
        pub lsb: u8 @ 0..8,
    }
}

bitfield! {
    /// General purpose 32-bit field
    #[derive(Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
    pub struct Field32(pub u32): Debug, FromStorage, IntoStorage, DerefStorage {
        pub high: u16 @ 16..32,
        pub low: u16 @ 0..16,
    }
}

/// A self-clearing latch for events etc.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct LatchingEvent {
    val: bool,
}

impl LatchingEvent {
    /// Returns the current value and clears the event.
    pub fn get_clear(&mut self) -> bool {
        let v = self.val;
        self.val = false;
        v
    }

    /// Sets the event.
    pub fn set(&mut self) {
        self.val = true;
    }

    /// Peeks at the event without clearing it
    pub fn peek(&self) -> bool {
        self.val
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field32_halves() {
        let mut f = Field32(0);
        f.set_high(0x0001);
        f.set_low(0x2344);
        assert_eq!(f.0, 0x0001_2344);
        assert_eq!(f.high(), 0x0001);
        assert_eq!(f.low(), 0x2344);
    }

    #[test]
    fn latching_event_clears_on_read() {
        let mut ev = LatchingEvent::default();
        assert!(!ev.get_clear());
        ev.set();
        assert!(ev.peek());
        assert!(ev.get_clear());
        assert!(!ev.get_clear());
    }
}
