//! Chipset register address space (word-addressed, 16-bit registers).

use num_derive::{FromPrimitive, ToPrimitive};

use crate::types::Word;

/// Non-audio chipset registers handled by this core, by word offset into
/// the $DFFxxx register page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, ToPrimitive)]
pub enum ChipReg {
    Dmaconr = 0x002,
    Vposr = 0x004,
    Vhposr = 0x006,
    Adkconr = 0x010,
    Intenar = 0x01C,
    Intreqr = 0x01E,
    Dmacon = 0x096,
    Intena = 0x09A,
    Intreq = 0x09C,
    Adkcon = 0x09E,
}

/// First audio channel register block (AUD0LCH)
pub const AUDIO_BASE: u16 = 0x0A0;

/// Last audio channel register (AUD3DAT)
pub const AUDIO_TOP: u16 = 0x0DA;

/// Register stride between audio channels
pub const AUDIO_CHANNEL_STRIDE: u16 = 0x10;

/// Registers within one audio channel block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
pub enum AudioReg {
    Lch = 0,
    Lcl = 1,
    Len = 2,
    Per = 3,
    Vol = 4,
    Dat = 5,
}

/// Splits an audio register offset into (channel, register).
pub fn decode_audio_reg(offset: u16) -> Option<(usize, AudioReg)> {
    use num_traits::FromPrimitive;

    if !(AUDIO_BASE..=AUDIO_TOP).contains(&offset) {
        return None;
    }
    let rel = offset - AUDIO_BASE;
    let channel = usize::from(rel / AUDIO_CHANNEL_STRIDE);
    let reg = AudioReg::from_u16((rel % AUDIO_CHANNEL_STRIDE) / 2)?;
    Some((channel, reg))
}

/// Applies the classic set/clear write convention: bit 15 selects whether
/// the remaining bits are OR'd into or AND-cleared from the register.
pub fn set_clr_write(reg: &mut Word, val: Word) {
    if val & 0x8000 != 0 {
        *reg |= val & 0x7FFF;
    } else {
        *reg &= !(val & 0x7FFF);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_clr_semantics() {
        let mut reg = 0;
        set_clr_write(&mut reg, 0x8201);
        assert_eq!(reg, 0x0201);
        set_clr_write(&mut reg, 0x0200);
        assert_eq!(reg, 0x0001);
        // Bit 15 is never stored
        set_clr_write(&mut reg, 0xFFFF);
        assert_eq!(reg, 0x7FFF);
    }

    #[test]
    fn audio_reg_decode() {
        assert_eq!(decode_audio_reg(0x0A0), Some((0, AudioReg::Lch)));
        assert_eq!(decode_audio_reg(0x0A8), Some((0, AudioReg::Vol)));
        assert_eq!(decode_audio_reg(0x0BA), Some((1, AudioReg::Dat)));
        assert_eq!(decode_audio_reg(0x0D6), Some((3, AudioReg::Per)));
        assert_eq!(decode_audio_reg(0x09E), None);
        assert_eq!(decode_audio_reg(0x0DC), None);
    }
}
