//! Four-channel sample audio engine.
//!
//! Each channel is a small state machine fed by DMA one word per scanline
//! interval. Mixing of the currently held samples into the host output
//! stream runs at a much finer cadence, decoupled from the fetch rate.

use arrayvec::ArrayVec;
use crossbeam_channel::Sender;
use log::*;
use serde::{Deserialize, Serialize};
use strum::Display;

use super::clock::CCKS_PER_LINE;
use super::dma::{DmaArbiter, DmaSource};
use super::intc::{InterruptController, INT_AUD0};
use super::regs::{set_clr_write, AudioReg};
use crate::audio_filter::OutputFilter;
use crate::bus::{Address, ChipBus, ADDRESS_MASK};
use crate::tickable::Ticks;
use crate::types::{Field32, Word};

/// Sub-tick budget one end-of-line poll burns off a channel's working
/// period. Changing this changes observable fetch timing.
pub const PERIOD_TICKS_PER_LINE: i32 = CCKS_PER_LINE as i32;

/// Chipset ticks per host output sample (~44.3 kHz at the PAL tick rate)
pub const TICKS_PER_HOST_SAMPLE: Ticks = 80;

/// Stereo frames per output buffer handed to the host sink
pub const AUDIO_BUFFER_SAMPLES: usize = 512;

pub type AudioBuffer = Box<[i16]>;
pub type AudioSender = Sender<AudioBuffer>;

/// Volume register quirk: 7-bit mask, then bit 6 clamps to the 64 ceiling.
pub fn map_volume(val: Word) -> Word {
    let v = val & 0x7F;
    if v & 0x40 != 0 {
        64
    } else {
        v
    }
}

/// Applies channel volume to one signed 8-bit sample lane.
/// Shift scale, not a multiply by a float, to keep output bit-reproducible.
fn scale_lane(lane: i8, volume: Word) -> i16 {
    (i16::from(lane) * volume as i16) << 1
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, Serialize, Deserialize)]
pub enum ChannelMode {
    /// No activity
    #[default]
    Idle,
    /// Fetching sample words through DMA
    Dma,
    /// Period timer only, sample data written directly by the CPU
    Interrupt,
}

/// One audio channel: live (CPU-visible) registers plus the working copies
/// the DMA state machine actually runs on.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AudioChannel {
    /// Live sample block pointer (AUDxLCH/AUDxLCL)
    pub location: Field32,
    /// Live block length in words (AUDxLEN)
    pub length: Word,
    /// Live period (AUDxPER)
    pub period: Word,
    /// Live volume, already masked/clamped at write (AUDxVOL)
    pub volume: Word,
    /// Last value written to AUDxDAT
    pub data: Word,

    pub mode: ChannelMode,
    working_pointer: Address,
    working_length: Word,
    working_period: i32,

    /// Sample word currently being played
    sample: Word,
    /// When alternating modulation is configured, selects period vs volume
    /// for the next routed word
    modulate_period_next: bool,
}

impl AudioChannel {
    /// 0 -> 1 enable transition: working state reloads from the live
    /// registers and the channel interrupt fires before any fetch.
    fn arm_dma(&mut self) {
        self.working_pointer = self.location.0 & ADDRESS_MASK;
        self.working_length = self.length;
        self.working_period = i32::from(self.period);
        self.mode = ChannelMode::Dma;
    }

    fn restart_block(&mut self) {
        self.working_pointer = self.location.0 & ADDRESS_MASK;
        self.working_length = self.length;
    }

    /// Adds the configured period back into the working period, keeping the
    /// accumulated remainder. The floor clamp caps a too-short period at one
    /// fetch per poll instead of letting the deficit grow without bound.
    fn reload_period(&mut self) {
        self.working_period += i32::from(self.period.max(1));
        self.working_period = self.working_period.max(-PERIOD_TICKS_PER_LINE);
    }

    pub fn sample(&self) -> Word {
        self.sample
    }

    pub fn working_length(&self) -> Word {
        self.working_length
    }

    pub fn working_pointer(&self) -> Address {
        self.working_pointer
    }
}

/// How a fetched word leaves a channel.
enum FetchRoute {
    Play,
    ModulatePeriod,
    ModulateVolume,
}

/// The four-channel engine, the modulation configuration register and the
/// host-facing mixing stage.
#[derive(Serialize, Deserialize)]
pub struct AudioEngine {
    pub channels: [AudioChannel; 4],
    adkcon: Word,

    sample_divider: Ticks,
    /// Selects the high or low lane of each held sample word, flipped on
    /// every host sample step
    lane_high: bool,

    #[serde(skip)]
    buffers: [ArrayVec<i16, AUDIO_BUFFER_SAMPLES>; 4],
    #[serde(skip)]
    sender: Option<AudioSender>,
    #[serde(skip)]
    filters: Option<(OutputFilter, OutputFilter)>,
}

impl AudioEngine {
    pub fn new() -> Self {
        Self {
            channels: Default::default(),
            adkcon: 0,
            sample_divider: 0,
            lane_high: false,
            buffers: Default::default(),
            sender: None,
            filters: None,
        }
    }

    /// Connects the host audio sink. Buffers produced while no sink is
    /// connected are dropped.
    pub fn connect_sink(&mut self, sender: AudioSender) {
        self.sender = Some(sender);
    }

    pub fn set_filter(&mut self, filters: Option<(OutputFilter, OutputFilter)>) {
        self.filters = filters;
    }

    pub fn reset(&mut self) {
        let sender = self.sender.take();
        let filters = self.filters.take();
        *self = Self::new();
        self.sender = sender;
        self.filters = filters;
    }

    pub fn write_adkcon(&mut self, val: Word) {
        set_clr_write(&mut self.adkcon, val);
    }

    pub fn read_adkcon(&self) -> Word {
        self.adkcon
    }

    /// Register write into one channel's block.
    pub fn write_reg(
        &mut self,
        channel: usize,
        reg: AudioReg,
        val: Word,
        intc: &mut InterruptController,
    ) {
        let ch = &mut self.channels[channel];
        match reg {
            AudioReg::Lch => ch.location.set_high(val & 0x00FF),
            AudioReg::Lcl => ch.location.set_low(val & 0xFFFE),
            AudioReg::Len => ch.length = val,
            AudioReg::Per => ch.period = val,
            AudioReg::Vol => ch.volume = map_volume(val),
            AudioReg::Dat => {
                // Direct sample writes always take priority for the next
                // played sample and arm interrupt-driven playback.
                ch.data = val;
                ch.sample = val;
                ch.working_period = i32::from(ch.period);
                ch.mode = ChannelMode::Interrupt;
                intc.assert_interrupt(INT_AUD0 + channel as u16, true);
            }
        }
    }

    /// Called when a channel's DMA enable bit transitioned 0 -> 1.
    pub fn dma_armed(&mut self, channel: usize, intc: &mut InterruptController) {
        debug!("audio channel {} DMA armed", channel);
        self.channels[channel].arm_dma();
        intc.assert_interrupt(INT_AUD0 + channel as u16, true);
    }

    /// Modulation role of a fetched word, from the configuration register.
    /// Channels chain 0 -> 1 -> 2 -> 3; the last channel never modulates.
    fn fetch_route(&self, channel: usize) -> FetchRoute {
        if channel >= 3 {
            return FetchRoute::Play;
        }
        let vol_mod = self.adkcon & (1 << channel) != 0;
        let per_mod = self.adkcon & (1 << (channel + 4)) != 0;
        match (vol_mod, per_mod) {
            (false, false) => FetchRoute::Play,
            (true, false) => FetchRoute::ModulateVolume,
            (false, true) => FetchRoute::ModulatePeriod,
            // Both bits set: alternate on successive samples
            (true, true) => {
                if self.channels[channel].modulate_period_next {
                    FetchRoute::ModulatePeriod
                } else {
                    FetchRoute::ModulateVolume
                }
            }
        }
    }

    fn alternating(&self, channel: usize) -> bool {
        channel < 3
            && self.adkcon & (1 << channel) != 0
            && self.adkcon & (1 << (channel + 4)) != 0
    }

    /// End-of-line poll for all channels, in channel order.
    pub fn tick_line(
        &mut self,
        bus: &mut dyn ChipBus,
        dma: &mut DmaArbiter,
        intc: &mut InterruptController,
    ) {
        for n in 0..4 {
            self.poll_channel(n, bus, dma, intc);
        }
    }

    fn poll_channel(
        &mut self,
        n: usize,
        bus: &mut dyn ChipBus,
        dma: &mut DmaArbiter,
        intc: &mut InterruptController,
    ) {
        match self.channels[n].mode {
            ChannelMode::Idle => (),
            ChannelMode::Dma => self.poll_dma(n, bus, dma, intc),
            ChannelMode::Interrupt => self.poll_interrupt(n, intc),
        }
    }

    fn poll_dma(
        &mut self,
        n: usize,
        bus: &mut dyn ChipBus,
        dma: &mut DmaArbiter,
        intc: &mut InterruptController,
    ) {
        let irq = INT_AUD0 + n as u16;

        self.channels[n].working_period -= PERIOD_TICKS_PER_LINE;
        if self.channels[n].working_period <= 0 {
            dma.request_slot(DmaSource::Agnus);
            let word = {
                let ch = &mut self.channels[n];
                let word = bus.read_word(ch.working_pointer);
                ch.working_pointer = (ch.working_pointer + 2) & ADDRESS_MASK;
                ch.working_length = ch.working_length.wrapping_sub(1);
                word
            };
            self.channels[n].reload_period();

            let route = self.fetch_route(n);
            match route {
                FetchRoute::Play => self.channels[n].sample = word,
                FetchRoute::ModulatePeriod => {
                    self.channels[n + 1].working_period = i32::from(word);
                    self.channels[n].sample = 0;
                }
                FetchRoute::ModulateVolume => {
                    self.channels[n + 1].volume = map_volume(word);
                    self.channels[n].sample = 0;
                }
            }
            if self.alternating(n) {
                let ch = &mut self.channels[n];
                ch.modulate_period_next = !ch.modulate_period_next;
            }

            if self.channels[n].working_length == 0 {
                self.channels[n].restart_block();
                intc.assert_interrupt(irq, true);
            }
        }

        // DMA stops the moment the enable bit drops, but software still
        // gets the final completion interrupt.
        if !dma.audio_enabled(n) {
            self.channels[n].mode = ChannelMode::Idle;
            intc.assert_interrupt(irq, true);
        }
    }

    fn poll_interrupt(&mut self, n: usize, intc: &mut InterruptController) {
        let irq = INT_AUD0 + n as u16;
        let ch = &mut self.channels[n];

        ch.working_period -= PERIOD_TICKS_PER_LINE;
        if ch.working_period <= 0 {
            ch.reload_period();
            if intc.is_pending(irq) {
                // Software got behind; stop instead of stacking requests
                ch.mode = ChannelMode::Idle;
            } else {
                ch.sample = ch.data;
                intc.assert_interrupt(irq, true);
            }
        }
    }

    /// Per-tick mixing cadence: every [`TICKS_PER_HOST_SAMPLE`] ticks one
    /// sample per channel is recorded; full buffers are paired into stereo
    /// and handed to the sink.
    pub fn tick_sample(&mut self) {
        self.sample_divider += 1;
        if self.sample_divider < TICKS_PER_HOST_SAMPLE {
            return;
        }
        self.sample_divider = 0;

        for (n, buf) in self.buffers.iter_mut().enumerate() {
            let ch = &self.channels[n];
            let lane = if self.lane_high {
                (ch.sample >> 8) as i8
            } else {
                (ch.sample & 0xFF) as i8
            };
            buf.push(scale_lane(lane, ch.volume));
        }
        self.lane_high = !self.lane_high;

        if self.buffers[0].is_full() {
            self.flush_buffers();
        }
    }

    /// Channels 0/3 pan left, 1/2 pan right, as on the original hardware.
    fn flush_buffers(&mut self) {
        let mut out = Vec::with_capacity(AUDIO_BUFFER_SAMPLES * 2);
        for i in 0..AUDIO_BUFFER_SAMPLES {
            let mut left =
                ((i32::from(self.buffers[0][i]) + i32::from(self.buffers[3][i])) / 2) as i16;
            let mut right =
                ((i32::from(self.buffers[1][i]) + i32::from(self.buffers[2][i])) / 2) as i16;
            if let Some((fl, fr)) = self.filters.as_mut() {
                left = fl.run(left);
                right = fr.run(right);
            }
            out.push(left);
            out.push(right);
        }
        for buf in &mut self.buffers {
            buf.clear();
        }

        if let Some(sender) = &self.sender {
            // Never block inside a device tick; a saturated sink loses the
            // buffer and the host catches up on its own.
            if sender.try_send(out.into_boxed_slice()).is_err() {
                trace!("audio sink full, dropping buffer");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::testbus::Testbus;

    fn setup() -> (AudioEngine, Testbus, DmaArbiter, InterruptController) {
        (
            AudioEngine::new(),
            Testbus::new(),
            DmaArbiter::new(),
            InterruptController::with_latency(0),
        )
    }

    fn configure(audio: &mut AudioEngine, intc: &mut InterruptController, ch: usize, base: Word) {
        audio.write_reg(ch, AudioReg::Lch, 0, intc);
        audio.write_reg(ch, AudioReg::Lcl, base, intc);
        audio.write_reg(ch, AudioReg::Len, 4, intc);
        audio.write_reg(ch, AudioReg::Per, 100, intc);
        audio.write_reg(ch, AudioReg::Vol, 64, intc);
    }

    fn arm(audio: &mut AudioEngine, dma: &mut DmaArbiter, intc: &mut InterruptController, ch: usize) {
        let rising = dma.write_dmacon(0x8200 | (1 << ch));
        for n in 0..4 {
            if rising & (1 << n) != 0 {
                audio.dma_armed(n, intc);
            }
        }
    }

    #[test]
    fn volume_write_masks_and_clamps() {
        let (mut audio, _, _, mut intc) = setup();
        audio.write_reg(0, AudioReg::Vol, 0x003F, &mut intc);
        assert_eq!(audio.channels[0].volume, 0x3F);
        audio.write_reg(0, AudioReg::Vol, 0x0040, &mut intc);
        assert_eq!(audio.channels[0].volume, 64);
        audio.write_reg(0, AudioReg::Vol, 0xFFFF, &mut intc);
        assert_eq!(audio.channels[0].volume, 64);
        audio.write_reg(0, AudioReg::Vol, 0x0080, &mut intc);
        assert_eq!(audio.channels[0].volume, 0);
    }

    #[test]
    fn dma_block_plays_and_restarts() {
        let (mut audio, mut bus, mut dma, mut intc) = setup();
        for i in 0..8u32 {
            bus.write_word(0x1000 + i * 2, 0x1100 + i as Word);
        }
        configure(&mut audio, &mut intc, 0, 0x1000);
        arm(&mut audio, &mut dma, &mut intc, 0);

        // Arming raises the first interrupt before any fetch
        assert_eq!(audio.channels[0].mode, ChannelMode::Dma);
        assert!(intc.is_pending(INT_AUD0));
        assert_eq!(bus.dma_counters().chip_reads, 0);
        intc.write_intreq(1 << INT_AUD0);

        // Period 100 < line interval, so every poll fetches one word
        for poll in 0..3 {
            audio.tick_line(&mut bus, &mut dma, &mut intc);
            assert!(!intc.is_pending(INT_AUD0), "early interrupt at poll {}", poll);
        }
        audio.tick_line(&mut bus, &mut dma, &mut intc);

        // Fourth fetch exhausts the block: reload plus second interrupt,
        // with no further enable-register write
        assert!(intc.is_pending(INT_AUD0));
        assert_eq!(audio.channels[0].working_length(), 4);
        assert_eq!(audio.channels[0].working_pointer(), 0x1000);
        assert_eq!(audio.channels[0].sample(), 0x1103);
        assert_eq!(bus.dma_counters().chip_reads, 4);
    }

    #[test]
    fn each_fetch_claims_a_bus_slot() {
        let (mut audio, mut bus, mut dma, mut intc) = setup();
        configure(&mut audio, &mut intc, 0, 0x1000);
        arm(&mut audio, &mut dma, &mut intc, 0);

        audio.tick_line(&mut bus, &mut dma, &mut intc);
        assert!(dma.is_waiting(DmaSource::Agnus));
    }

    #[test]
    fn disable_mid_block_raises_final_interrupt() {
        let (mut audio, mut bus, mut dma, mut intc) = setup();
        configure(&mut audio, &mut intc, 0, 0x1000);
        arm(&mut audio, &mut dma, &mut intc, 0);
        intc.write_intreq(1 << INT_AUD0);

        audio.tick_line(&mut bus, &mut dma, &mut intc);
        assert_eq!(audio.channels[0].mode, ChannelMode::Dma);
        intc.write_intreq(1 << INT_AUD0);

        dma.write_dmacon(0x0001); // clear AUD0 enable
        audio.tick_line(&mut bus, &mut dma, &mut intc);
        assert_eq!(audio.channels[0].mode, ChannelMode::Idle);
        assert!(intc.is_pending(INT_AUD0));
    }

    #[test]
    fn volume_modulation_routes_word_to_next_channel() {
        let (mut audio, mut bus, mut dma, mut intc) = setup();
        bus.write_word(0x1000, 0x0050); // bit 6 set: clamps to 64
        configure(&mut audio, &mut intc, 0, 0x1000);
        audio.write_adkcon(0x8001); // channel 0 modulates channel 1 volume
        arm(&mut audio, &mut dma, &mut intc, 0);
        intc.write_intreq(1 << INT_AUD0);

        audio.tick_line(&mut bus, &mut dma, &mut intc);
        assert_eq!(audio.channels[1].volume, 64);
        // The routed word is never played by the modulator itself
        assert_eq!(audio.channels[0].sample(), 0);
    }

    #[test]
    fn period_modulation_overwrites_working_period() {
        let (mut audio, mut bus, mut dma, mut intc) = setup();
        bus.write_word(0x1000, 500);
        configure(&mut audio, &mut intc, 0, 0x1000);
        audio.write_adkcon(0x8010); // channel 0 modulates channel 1 period
        arm(&mut audio, &mut dma, &mut intc, 0);

        audio.tick_line(&mut bus, &mut dma, &mut intc);
        assert_eq!(audio.channels[1].working_period, 500);
        assert_eq!(audio.channels[0].sample(), 0);
    }

    #[test]
    fn alternating_modulation_toggles_target() {
        let (mut audio, mut bus, mut dma, mut intc) = setup();
        bus.write_word(0x1000, 10);
        bus.write_word(0x1002, 900);
        configure(&mut audio, &mut intc, 0, 0x1000);
        audio.write_adkcon(0x8011); // both bits: alternate volume/period

        arm(&mut audio, &mut dma, &mut intc, 0);
        audio.tick_line(&mut bus, &mut dma, &mut intc);
        assert_eq!(audio.channels[1].volume, 10);

        audio.tick_line(&mut bus, &mut dma, &mut intc);
        assert_eq!(audio.channels[1].working_period, 900);
    }

    #[test]
    fn last_channel_never_modulates() {
        let (mut audio, mut bus, mut dma, mut intc) = setup();
        bus.write_word(0x1000, 0x1234);
        configure(&mut audio, &mut intc, 3, 0x1000);
        audio.write_adkcon(0x80FF);
        arm(&mut audio, &mut dma, &mut intc, 3);

        audio.tick_line(&mut bus, &mut dma, &mut intc);
        assert_eq!(audio.channels[3].sample(), 0x1234);
    }

    #[test]
    fn dat_write_arms_interrupt_mode() {
        let (mut audio, _, _, mut intc) = setup();
        audio.write_reg(0, AudioReg::Per, 100, &mut intc);
        audio.write_reg(0, AudioReg::Dat, 0x7F7F, &mut intc);
        assert_eq!(audio.channels[0].mode, ChannelMode::Interrupt);
        assert!(intc.is_pending(INT_AUD0));
        assert_eq!(audio.channels[0].sample(), 0x7F7F);
    }

    #[test]
    fn interrupt_mode_stops_when_software_gets_behind() {
        let (mut audio, mut bus, mut dma, mut intc) = setup();
        audio.write_reg(0, AudioReg::Per, 100, &mut intc);
        audio.write_reg(0, AudioReg::Dat, 0x1111, &mut intc);
        intc.write_intreq(1 << INT_AUD0);

        // Acknowledged in time: re-raised on period expiry
        audio.tick_line(&mut bus, &mut dma, &mut intc);
        assert!(intc.is_pending(INT_AUD0));
        assert_eq!(audio.channels[0].mode, ChannelMode::Interrupt);

        // Not acknowledged: channel goes idle instead of re-raising
        audio.tick_line(&mut bus, &mut dma, &mut intc);
        assert_eq!(audio.channels[0].mode, ChannelMode::Idle);
    }

    #[test]
    fn mixing_fills_and_flushes_stereo_buffers() {
        let (mut audio, _, _, mut intc) = setup();
        let (tx, rx) = crossbeam_channel::bounded(2);
        audio.connect_sink(tx);
        audio.write_reg(0, AudioReg::Vol, 64, &mut intc);
        audio.write_reg(0, AudioReg::Dat, 0x4040, &mut intc);

        for _ in 0..TICKS_PER_HOST_SAMPLE as usize * AUDIO_BUFFER_SAMPLES {
            audio.tick_sample();
        }
        let buf = rx.try_recv().unwrap();
        assert_eq!(buf.len(), AUDIO_BUFFER_SAMPLES * 2);
        // Channel 0 pans left; lane value 0x40 at volume 64, halved with
        // the silent channel 3
        assert_eq!(buf[0], scale_lane(0x40, 64) / 2);
        assert_eq!(buf[1], 0);
    }
}
