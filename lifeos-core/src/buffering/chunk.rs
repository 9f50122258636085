//! Fixed-size capture block handed from the pipeline to the codec.

/// A contiguous block of mono PCM samples at a known sample rate.
///
/// One block per capture interval (4096 samples at 16 kHz by default).
/// Ephemeral: encoded and dropped immediately after transmission.
#[derive(Debug, Clone)]
pub struct AudioBlock {
    /// Mono f32 samples in [-1.0, 1.0].
    pub samples: Vec<f32>,
    /// Sample rate in Hz.
    pub sample_rate: u32,
}

impl AudioBlock {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    /// Duration of this block in seconds.
    pub fn duration_secs(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }

    /// Root-mean-square loudness in [0.0, 1.0].
    pub fn rms(&self) -> f32 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let sum_sq: f32 = self.samples.iter().map(|s| s * s).sum();
        (sum_sq / self.samples.len() as f32).sqrt()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rms_of_square_wave() {
        let samples: Vec<f32> = (0..256)
            .map(|i| if i % 2 == 0 { 0.5 } else { -0.5 })
            .collect();
        let block = AudioBlock::new(samples, 16_000);
        assert!((block.rms() - 0.5).abs() < 1e-5);
    }

    #[test]
    fn empty_block_is_silent() {
        let block = AudioBlock::new(vec![], 16_000);
        assert_eq!(block.rms(), 0.0);
        assert!(block.is_empty());
    }

    #[test]
    fn reference_block_lasts_256ms() {
        let block = AudioBlock::new(vec![0.0; 4096], 16_000);
        assert!((block.duration_secs() - 0.256).abs() < 1e-9);
    }
}
