//! Custom chipset core: clock, DMA arbitration, audio and interrupts.

pub mod audio;
pub mod clock;
pub mod dma;
pub mod intc;
pub mod regs;

use num_traits::FromPrimitive;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::bus::ChipBus;
use crate::types::Word;
use audio::AudioEngine;
use clock::ChipsetClock;
use dma::{DmaArbiter, DmaSource, DMA_AUDIO_MASK};
use intc::{InterruptController, INT_VERTB};
use regs::{decode_audio_reg, ChipReg};

#[derive(Debug, Error)]
pub enum ChipsetError {
    #[error("unimplemented chipset register ${0:03X}")]
    UnimplementedRegister(u16),
    #[error("read of write-only chipset register ${0:03X}")]
    WriteOnlyRegister(u16),
}

/// The chipset proper: owns the clock, the DMA arbiter, the interrupt
/// controller and the audio engine, and dispatches register traffic
/// between them.
///
/// Device order within a tick is fixed: audio runs before the interrupt
/// controller's lag pipeline advances, so interrupts raised this tick
/// enter the pipeline this tick.
#[derive(Serialize, Deserialize)]
pub struct Chipset {
    pub clock: ChipsetClock,
    pub dma: DmaArbiter,
    pub intc: InterruptController,
    pub audio: AudioEngine,
}

impl Chipset {
    pub fn new() -> Self {
        Self {
            clock: ChipsetClock::new(),
            dma: DmaArbiter::new(),
            intc: InterruptController::new(),
            audio: AudioEngine::new(),
        }
    }

    pub fn reset(&mut self) {
        self.clock.reset();
        self.dma.reset();
        self.intc.reset();
        self.audio.reset();
    }

    /// Register write, by word offset into the register page.
    pub fn write_register(&mut self, offset: u16, val: Word) -> Result<(), ChipsetError> {
        if let Some((channel, reg)) = decode_audio_reg(offset) {
            self.audio.write_reg(channel, reg, val, &mut self.intc);
            return Ok(());
        }
        match ChipReg::from_u16(offset) {
            Some(ChipReg::Dmacon) => {
                let rising = self.dma.write_dmacon(val);
                self.notify_dma_armed(rising);
                Ok(())
            }
            Some(ChipReg::Intena) => {
                self.intc.write_intena(val);
                Ok(())
            }
            Some(ChipReg::Intreq) => {
                self.intc.write_intreq(val);
                Ok(())
            }
            Some(ChipReg::Adkcon) => {
                self.audio.write_adkcon(val);
                Ok(())
            }
            Some(
                ChipReg::Dmaconr
                | ChipReg::Vposr
                | ChipReg::Vhposr
                | ChipReg::Adkconr
                | ChipReg::Intenar
                | ChipReg::Intreqr,
            ) => Ok(()), // writes to read-only registers are ignored
            None => Err(ChipsetError::UnimplementedRegister(offset)),
        }
    }

    /// Register read, by word offset into the register page.
    pub fn read_register(&mut self, offset: u16) -> Result<Word, ChipsetError> {
        match ChipReg::from_u16(offset) {
            Some(ChipReg::Dmaconr) => Ok(self.dma.read_dmacon()),
            Some(ChipReg::Vposr) => Ok(self.clock.read_vposr()),
            Some(ChipReg::Vhposr) => Ok(self.clock.read_vhposr()),
            Some(ChipReg::Adkconr) => Ok(self.audio.read_adkcon()),
            Some(ChipReg::Intenar) => Ok(self.intc.read_intena()),
            Some(ChipReg::Intreqr) => Ok(self.intc.read_intreq()),
            Some(_) => Err(ChipsetError::WriteOnlyRegister(offset)),
            None => Err(ChipsetError::UnimplementedRegister(offset)),
        }
    }

    /// Audio channels whose DMA just went live restart their state machine.
    /// A rising master enable re-arms every channel whose bit is set, since
    /// their DMA becomes live at that moment too.
    fn notify_dma_armed(&mut self, rising: Word) {
        let mut armed = rising & DMA_AUDIO_MASK;
        if rising & 0x0200 != 0 {
            armed |= self.dma.dmacon().0 & DMA_AUDIO_MASK;
        }
        for channel in 0..4 {
            if armed & (1 << channel) != 0 && self.dma.audio_enabled(channel) {
                self.audio.dma_armed(channel, &mut self.intc);
            }
        }
    }

    /// Runs every chipset device once for the current tick. Does not
    /// advance the clock; that happens at [`Chipset::commit_tick`].
    pub fn emulate_tick(&mut self, bus: &mut dyn ChipBus) {
        self.audio.tick_sample();
        if self.clock.flags().end_of_line() {
            self.audio
                .tick_line(bus, &mut self.dma, &mut self.intc);
        }
        if self.clock.flags().end_of_frame() {
            self.intc.assert_interrupt(INT_VERTB, true);
        }
        self.intc.tick();
    }

    /// Commits the tick: the arbiter grants this tick's bus slot and the
    /// clock advances.
    pub fn commit_tick(&mut self) -> Option<DmaSource> {
        let grant = self.dma.commit_tick();
        self.clock.advance();
        grant
    }

    /// Interrupt level as presented to the CPU.
    pub fn cpu_interrupt_level(&self) -> u8 {
        self.intc.cpu_level()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::testbus::Testbus;
    use crate::chipset::audio::ChannelMode;
    use crate::chipset::clock::{CCKS_PER_LINE, LINES_PER_FRAME};
    use crate::chipset::intc::INT_AUD0;

    #[test]
    fn register_dispatch_set_clr_pairs() {
        let mut chipset = Chipset::new();
        chipset.write_register(0x096, 0x8201).unwrap();
        assert_eq!(chipset.read_register(0x002).unwrap(), 0x0201);

        chipset.write_register(0x09A, 0xC000).unwrap();
        assert_eq!(chipset.read_register(0x01C).unwrap(), 0x4000);

        chipset.write_register(0x09E, 0x8011).unwrap();
        assert_eq!(chipset.read_register(0x010).unwrap(), 0x0011);
    }

    #[test]
    fn unknown_register_is_reported() {
        let mut chipset = Chipset::new();
        assert!(matches!(
            chipset.write_register(0x1F0, 0),
            Err(ChipsetError::UnimplementedRegister(0x1F0))
        ));
        assert!(matches!(
            chipset.read_register(0x096),
            Err(ChipsetError::WriteOnlyRegister(_))
        ));
    }

    #[test]
    fn dmacon_write_arms_audio_channel() {
        let mut chipset = Chipset::new();
        chipset.write_register(0x0A4, 4).unwrap(); // AUD0LEN
        chipset.write_register(0x096, 0x8201).unwrap();
        assert_eq!(chipset.audio.channels[0].mode, ChannelMode::Dma);
        assert!(chipset.intc.is_pending(INT_AUD0));
    }

    #[test]
    fn master_enable_rearms_already_set_channels() {
        let mut chipset = Chipset::new();
        chipset.write_register(0x096, 0x8001).unwrap(); // AUD0 bit, master off
        assert_eq!(chipset.audio.channels[0].mode, ChannelMode::Idle);

        chipset.write_register(0x096, 0x8200).unwrap(); // master on
        assert_eq!(chipset.audio.channels[0].mode, ChannelMode::Dma);
    }

    #[test]
    fn vertb_raised_once_per_frame() {
        let mut chipset = Chipset::new();
        let mut bus = Testbus::new();
        let frame = u64::from(CCKS_PER_LINE) * u64::from(LINES_PER_FRAME);

        let mut raised = 0;
        for _ in 0..frame {
            chipset.write_register(0x09C, 1 << 5).unwrap(); // ack VERTB
            chipset.emulate_tick(&mut bus);
            if chipset.intc.is_pending(intc::INT_VERTB) {
                raised += 1;
            }
            chipset.commit_tick();
        }
        assert_eq!(raised, 1);
    }

    #[test]
    fn beam_counters_readable() {
        let mut chipset = Chipset::new();
        let mut bus = Testbus::new();
        for _ in 0..5 {
            chipset.emulate_tick(&mut bus);
            chipset.commit_tick();
        }
        assert_eq!(chipset.read_register(0x006).unwrap(), 0x0005);
    }
}
