use thiserror::Error;

use crate::audio::bins::BinTable;
use crate::audio::fft::FftEngine;
use crate::audio::sensitivity::{AutoSensitivity, SILENCE_THRESHOLD};
use crate::audio::smoother::BarSmoother;
use crate::protocol;

#[derive(Debug, Error)]
pub enum ProcessorError {
    #[error("fft size {0} is not a power of two")]
    FftSize(usize),
    #[error("frame of {frame} samples does not fit a {fft}-point window")]
    FrameSize { frame: usize, fft: usize },
    #[error("frequency range {min}..{max} Hz is invalid at {rate} Hz")]
    FreqRange { min: f32, max: f32, rate: u32 },
    #[error("{bars} bars do not fit in a {fft}-point spectrum")]
    TooManyBars { bars: usize, fft: usize },
    #[error("expected {expected} samples, got {got}")]
    FrameLength { expected: usize, got: usize },
}

/// Everything that shapes the bin/EQ tables. Changing any field requires a
/// fresh processor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpectrumParams {
    pub sample_rate: u32,
    pub fft_size: usize,
    pub frame_samples: usize,
    pub bar_count: usize,
    pub freq_min: f32,
    pub freq_max: f32,
}

impl SpectrumParams {
    /// Default window size, one chunk per `PROCESS_RATE` tick.
    pub fn new(sample_rate: u32, bar_count: usize, freq_min: f32, freq_max: f32) -> Self {
        Self {
            sample_rate,
            fft_size: protocol::FFT_SIZE,
            frame_samples: protocol::frame_samples(sample_rate),
            bar_count,
            freq_min,
            freq_max,
        }
    }

    /// Snapshots per second implied by the chunk size.
    pub fn frame_rate(&self) -> f32 {
        self.sample_rate as f32 / self.frame_samples as f32
    }

    fn validate(&self) -> Result<(), ProcessorError> {
        if !self.fft_size.is_power_of_two() || self.fft_size < 4 {
            return Err(ProcessorError::FftSize(self.fft_size));
        }
        if self.frame_samples == 0 || self.frame_samples >= self.fft_size {
            return Err(ProcessorError::FrameSize { frame: self.frame_samples, fft: self.fft_size });
        }
        let nyquist = self.sample_rate as f32 / 2.0;
        if !(self.freq_min > 0.0 && self.freq_min < self.freq_max && self.freq_max <= nyquist) {
            return Err(ProcessorError::FreqRange {
                min: self.freq_min,
                max: self.freq_max,
                rate: self.sample_rate,
            });
        }
        Ok(())
    }
}

/// Sliding-window spectrum analyser producing `bar_count` levels in `[0, 1]`.
///
/// All adaptive state lives here; reconfiguring builds a new instance and
/// swaps it in whole.
pub struct SpectrumProcessor {
    params: SpectrumParams,
    window: Vec<f32>,
    fft: FftEngine,
    bins: BinTable,
    smoother: BarSmoother,
    sensitivity: AutoSensitivity,
    bar_mags: Vec<f32>,
    bars: Vec<f32>,
}

impl SpectrumProcessor {
    pub fn new(params: SpectrumParams) -> Result<Self, ProcessorError> {
        params.validate()?;
        let bins = BinTable::new(
            params.sample_rate,
            params.fft_size,
            params.bar_count,
            params.freq_min,
            params.freq_max,
        )
        .ok_or(ProcessorError::TooManyBars { bars: params.bar_count, fft: params.fft_size })?;

        Ok(Self {
            params,
            window: vec![0.0; params.fft_size],
            fft: FftEngine::new(params.fft_size),
            bins,
            smoother: BarSmoother::new(params.bar_count, params.frame_rate()),
            sensitivity: AutoSensitivity::default(),
            bar_mags: vec![0.0; params.bar_count],
            bars: vec![0.0; params.bar_count],
        })
    }

    /// On error the current state is left untouched.
    pub fn reinit(&mut self, params: SpectrumParams) -> Result<(), ProcessorError> {
        *self = Self::new(params)?;
        Ok(())
    }

    pub fn params(&self) -> &SpectrumParams {
        &self.params
    }

    pub fn sensitivity(&self) -> f32 {
        self.sensitivity.value()
    }

    pub fn process_frame(&mut self, samples: &[f32]) -> Result<&[f32], ProcessorError> {
        let frame = self.params.frame_samples;
        if samples.len() != frame {
            return Err(ProcessorError::FrameLength { expected: frame, got: samples.len() });
        }

        let keep = self.window.len() - frame;
        self.window.copy_within(frame.., 0);
        for (slot, &s) in self.window[keep..].iter_mut().zip(samples) {
            *slot = if s.is_finite() { s } else { 0.0 };
        }

        // Gate on the time-domain peak; spectral residue can't fake a signal.
        let audio_max = self.window[keep..].iter().fold(0.0f32, |m, s| m.max(s.abs()));

        let mags = self.fft.magnitudes(&self.window);
        self.bins.average(mags, &mut self.bar_mags);

        let norm = (self.fft.fft_size() / 2) as f32;
        let sens = self.sensitivity.value();
        let mut overshoot = false;
        for bar in 0..self.bars.len() {
            let raw = (self.bar_mags[bar] / norm).sqrt() * self.bins.eq(bar) * sens;
            let val = self.smoother.step(bar, raw);
            if self.smoother.accumulated(bar) > 1.0 {
                overshoot = true;
            }
            self.bars[bar] = val.clamp(0.0, 1.0);
        }

        self.sensitivity.update(overshoot, audio_max < SILENCE_THRESHOLD);
        Ok(&self.bars)
    }
}
