//! Optional low-pass stage on the mixed audio output.
//!
//! Approximates the fixed RC filter on the original hardware's audio path.
//! Pure signal conditioning; channel timing is unaffected by whether this
//! stage is installed.

use anyhow::{anyhow, Result};
use biquad::{Biquad, Coefficients, DirectForm2Transposed, ToHertz, Type, Q_BUTTERWORTH_F32};

/// Cutoff of the fixed output filter
pub const LOWPASS_CUTOFF_HZ: f32 = 4500.0;

/// Two-pole low-pass over one output channel.
pub struct OutputFilter {
    filter: DirectForm2Transposed<f32>,
}

impl OutputFilter {
    pub fn new(sample_rate: f32, cutoff: f32) -> Result<Self> {
        let coeffs = Coefficients::<f32>::from_params(
            Type::LowPass,
            sample_rate.hz(),
            cutoff.hz(),
            Q_BUTTERWORTH_F32,
        )
        .map_err(|e| anyhow!("invalid filter parameters: {:?}", e))?;
        Ok(Self {
            filter: DirectForm2Transposed::<f32>::new(coeffs),
        })
    }

    pub fn run(&mut self, sample: i16) -> i16 {
        self.filter
            .run(f32::from(sample))
            .clamp(f32::from(i16::MIN), f32::from(i16::MAX)) as i16
    }
}

/// Builds the stereo filter pair for the mixing stage.
pub fn output_filters(sample_rate: f32) -> Result<(OutputFilter, OutputFilter)> {
    Ok((
        OutputFilter::new(sample_rate, LOWPASS_CUTOFF_HZ)?,
        OutputFilter::new(sample_rate, LOWPASS_CUTOFF_HZ)?,
    ))
}
