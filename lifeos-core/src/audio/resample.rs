//! Sample-rate conversion using a rubato `FastFixedIn` resampler.
//!
//! Two places need it:
//! - capture: the microphone's native rate (commonly 48 kHz) → 16 kHz blocks;
//! - playback: 24 kHz model audio → the output device's native rate.
//!
//! When both rates match, `RateConverter` is a passthrough and no rubato
//! session is created.

use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use tracing::error;

use crate::error::{LiveError, Result};

/// Streaming f32 mono converter between two fixed sample rates.
pub struct RateConverter {
    /// `None` in passthrough mode.
    resampler: Option<FastFixedIn<f32>>,
    /// Holds partial input chunks between calls.
    input_buf: Vec<f32>,
    /// Input frames rubato expects per process call.
    chunk_size: usize,
    /// Pre-allocated output buffer: `[1][output_frames_max]`.
    output_buf: Vec<Vec<f32>>,
}

impl RateConverter {
    /// # Errors
    /// `LiveError::AudioDevice` if rubato rejects the parameters.
    pub fn new(from_rate: u32, to_rate: u32, chunk_size: usize) -> Result<Self> {
        if from_rate == to_rate {
            return Ok(Self {
                resampler: None,
                input_buf: Vec::new(),
                chunk_size,
                output_buf: Vec::new(),
            });
        }

        let ratio = to_rate as f64 / from_rate as f64;
        let resampler =
            FastFixedIn::<f32>::new(ratio, 1.0, PolynomialDegree::Cubic, chunk_size.max(1), 1)
                .map_err(|e| LiveError::AudioDevice(format!("resampler init: {e}")))?;

        let output_buf = vec![vec![0f32; resampler.output_frames_max()]; 1];

        tracing::debug!(from_rate, to_rate, chunk_size, "resampler created");

        Ok(Self {
            resampler: Some(resampler),
            input_buf: Vec::new(),
            chunk_size: chunk_size.max(1),
            output_buf,
        })
    }

    /// Process incoming samples, returning converted output (may be empty
    /// until a full chunk has accumulated).
    pub fn process(&mut self, samples: &[f32]) -> Vec<f32> {
        let Some(ref mut resampler) = self.resampler else {
            return samples.to_vec();
        };

        self.input_buf.extend_from_slice(samples);
        let mut result = Vec::new();

        while self.input_buf.len() >= self.chunk_size {
            let input_slice = &self.input_buf[..self.chunk_size];
            match resampler.process_into_buffer(&[input_slice], &mut self.output_buf, None) {
                Ok((_consumed, produced)) => {
                    result.extend_from_slice(&self.output_buf[0][..produced]);
                }
                Err(e) => error!("resampler process error: {e}"),
            }
            self.input_buf.drain(..self.chunk_size);
        }

        result
    }

    pub fn is_passthrough(&self) -> bool {
        self.resampler.is_none()
    }
}

/// Convert one self-contained buffer to exactly `out_len` frames.
///
/// Used for playback, where each inbound buffer occupies a fixed slot on the
/// output timeline: rubato's output length drifts by a few frames, so the
/// result is padded with silence or truncated to fit the slot.
pub fn convert_buffer(samples: &[f32], from_rate: u32, to_rate: u32, out_len: usize) -> Vec<f32> {
    let mut out = if samples.is_empty() || from_rate == to_rate {
        samples.to_vec()
    } else {
        match RateConverter::new(from_rate, to_rate, samples.len()) {
            Ok(mut rc) => rc.process(samples),
            Err(e) => {
                error!("playback resample failed, inserting silence: {e}");
                Vec::new()
            }
        }
    };
    out.resize(out_len, 0.0);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passthrough_identity() {
        let mut rc = RateConverter::new(16_000, 16_000, 960).unwrap();
        assert!(rc.is_passthrough());
        let samples: Vec<f32> = (0..480).map(|i| i as f32 * 0.001).collect();
        assert_eq!(rc.process(&samples), samples);
    }

    #[test]
    fn ratio_48k_to_16k_correct_length() {
        let mut rc = RateConverter::new(48_000, 16_000, 960).unwrap();
        let out = rc.process(&vec![0.0f32; 960]);
        assert!(
            (out.len() as isize - 320).unsigned_abs() <= 10,
            "output len={}",
            out.len()
        );
    }

    #[test]
    fn partial_chunk_is_held_back() {
        let mut rc = RateConverter::new(48_000, 16_000, 960).unwrap();
        assert!(rc.process(&vec![0.0f32; 500]).is_empty());
        assert!(!rc.process(&vec![0.0f32; 500]).is_empty());
    }

    #[test]
    fn convert_buffer_fills_exact_slot() {
        let samples = vec![0.25f32; 12_000]; // 0.5 s at 24 kHz
        let out = convert_buffer(&samples, 24_000, 48_000, 24_000);
        assert_eq!(out.len(), 24_000);

        let same = convert_buffer(&samples, 24_000, 24_000, 12_000);
        assert_eq!(same, samples);
    }
}
