//! Byte frequency spectrum, computed the way a browser `AnalyserNode` does:
//! Blackman window, FFT, magnitude normalised by the window size, temporal
//! smoothing against the previous frame, then a linear map of decibels onto
//! 0..=255.

use crate::error::AudioError;
use mien_core::LoudnessConfig;
use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use serde::{Deserialize, Serialize};
use std::f32::consts::PI;
use std::sync::Arc;
use tracing::debug;

/// Analysis parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyserConfig {
    /// Window size, power of two in 32..=32768
    pub fft_size: usize,
    /// Weight of the previous frame (0..1)
    pub smoothing: f32,
    /// Decibel value mapped to byte 0
    pub min_decibels: f32,
    /// Decibel value mapped to byte 255
    pub max_decibels: f32,
}

impl Default for AnalyserConfig {
    fn default() -> Self {
        Self {
            fft_size: 32,
            smoothing: 0.8,
            min_decibels: -100.0,
            max_decibels: -30.0,
        }
    }
}

impl From<&LoudnessConfig> for AnalyserConfig {
    fn from(config: &LoudnessConfig) -> Self {
        Self {
            fft_size: config.fft_size,
            smoothing: config.smoothing,
            min_decibels: config.min_decibels,
            max_decibels: config.max_decibels,
        }
    }
}

impl AnalyserConfig {
    pub fn validate(&self) -> Result<(), String> {
        if !self.fft_size.is_power_of_two() || !(32..=32768).contains(&self.fft_size) {
            return Err(format!(
                "fft_size must be a power of two in 32..=32768, got {}",
                self.fft_size
            ));
        }
        if !(0.0..1.0).contains(&self.smoothing) {
            return Err(format!("smoothing must be in 0..1, got {}", self.smoothing));
        }
        if !(self.min_decibels < self.max_decibels) {
            return Err(format!(
                "min_decibels ({}) must be below max_decibels ({})",
                self.min_decibels, self.max_decibels
            ));
        }
        Ok(())
    }
}

pub struct FrequencyAnalyser {
    config: AnalyserConfig,
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    buffer: Vec<Complex<f32>>,
    scratch: Vec<Complex<f32>>,
    smoothed: Vec<f32>,
    bytes: Vec<u8>,
}

impl FrequencyAnalyser {
    pub fn new(config: AnalyserConfig) -> Result<Self, AudioError> {
        config.validate().map_err(AudioError::Config)?;

        let n = config.fft_size;
        let fft = FftPlanner::new().plan_fft_forward(n);
        let scratch = vec![Complex::new(0.0, 0.0); fft.get_inplace_scratch_len()];
        let bins = n / 2;

        debug!("Frequency analyser ready: fft_size={} bins={}", n, bins);
        Ok(Self {
            window: blackman(n),
            buffer: vec![Complex::new(0.0, 0.0); n],
            scratch,
            smoothed: vec![0.0; bins],
            bytes: vec![0; bins],
            fft,
            config,
        })
    }

    pub fn fft_size(&self) -> usize {
        self.config.fft_size
    }

    /// Number of output bins (half the window size)
    pub fn frequency_bin_count(&self) -> usize {
        self.config.fft_size / 2
    }

    /// Analyse the most recent window of `samples` and return the byte
    /// spectrum. Shorter input is treated as preceded by silence; longer
    /// input uses only its tail.
    pub fn analyse(&mut self, samples: &[f32]) -> &[u8] {
        let n = self.config.fft_size;
        let tail = &samples[samples.len().saturating_sub(n)..];
        let pad = n - tail.len();

        for (i, slot) in self.buffer.iter_mut().enumerate() {
            let sample = if i < pad { 0.0 } else { tail[i - pad] };
            let sample = if sample.is_finite() { sample } else { 0.0 };
            *slot = Complex::new(sample * self.window[i], 0.0);
        }

        self.fft.process_with_scratch(&mut self.buffer, &mut self.scratch);

        let tau = self.config.smoothing;
        let range = self.config.max_decibels - self.config.min_decibels;
        let scale = 1.0 / n as f32;
        for k in 0..self.smoothed.len() {
            let magnitude = self.buffer[k].norm() * scale;
            let smoothed = tau * self.smoothed[k] + (1.0 - tau) * magnitude;
            self.smoothed[k] = if smoothed.is_finite() { smoothed } else { 0.0 };

            let db = 20.0 * self.smoothed[k].log10();
            let scaled = 255.0 / range * (db - self.config.min_decibels);
            // -inf (silence) and NaN both land on 0
            self.bytes[k] = if scaled.is_nan() {
                0
            } else {
                scaled.floor().clamp(0.0, 255.0) as u8
            };
        }

        &self.bytes
    }

    /// Last computed byte spectrum
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Mean of the last byte spectrum
    pub fn average(&self) -> f32 {
        if self.bytes.is_empty() {
            return 0.0;
        }
        self.bytes.iter().map(|&b| b as f32).sum::<f32>() / self.bytes.len() as f32
    }

    /// Forget smoothing history
    pub fn reset(&mut self) {
        self.smoothed.iter_mut().for_each(|v| *v = 0.0);
        self.bytes.iter_mut().for_each(|b| *b = 0);
    }
}

fn blackman(n: usize) -> Vec<f32> {
    const A0: f32 = 0.42;
    const A1: f32 = 0.5;
    const A2: f32 = 0.08;
    (0..n)
        .map(|i| {
            let x = i as f32 / n as f32;
            A0 - A1 * (2.0 * PI * x).cos() + A2 * (4.0 * PI * x).cos()
        })
        .collect()
}
