//! Frame sources behind a [`crate::media::VideoTrack`].

use std::path::Path;
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use image::{Rgb, RgbImage};

use crate::error::{LiveError, Result};

/// A camera-like source of RGB frames.
///
/// `grab` must be cheap enough to call from an async task twice a second.
/// Returning `None` means "no frame this time"; the sampler skips the tick.
pub trait FrameSource: Send {
    fn grab(&mut self) -> Option<RgbImage>;

    /// Release the underlying device. Called once, when the track stops.
    fn stop(&mut self) {}
}

/// Synthetic camera producing a moving gradient.
///
/// Counts every grab attempt so tests can assert sampling cadence, and can
/// be told to miss every n-th frame.
pub struct TestPatternCamera {
    width: u32,
    height: u32,
    grabs: Arc<AtomicUsize>,
    miss_every: Option<usize>,
}

impl TestPatternCamera {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            grabs: Arc::new(AtomicUsize::new(0)),
            miss_every: None,
        }
    }

    /// Every `n`-th grab returns `None`.
    pub fn missing_every(mut self, n: usize) -> Self {
        self.miss_every = (n > 0).then_some(n);
        self
    }

    /// Shared counter of grab attempts, including missed ones.
    pub fn grab_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.grabs)
    }
}

impl FrameSource for TestPatternCamera {
    fn grab(&mut self) -> Option<RgbImage> {
        let n = self.grabs.fetch_add(1, Ordering::Relaxed) + 1;
        if self.miss_every.is_some_and(|every| n % every == 0) {
            return None;
        }
        let shift = (n as u32).wrapping_mul(7);
        Some(RgbImage::from_fn(self.width, self.height, |x, y| {
            Rgb([
                (x.wrapping_add(shift) % 256) as u8,
                (y % 256) as u8,
                ((x ^ y).wrapping_add(shift) % 256) as u8,
            ])
        }))
    }
}

/// A "camera" that shows one still image, for running the host without a
/// webcam (`lifeos live --image photo.jpg`).
pub struct StillImageCamera {
    frame: RgbImage,
}

impl StillImageCamera {
    /// # Errors
    /// `LiveError::DeviceAcquisition` if the file cannot be read or decoded.
    pub fn open(path: &Path) -> Result<Self> {
        let frame = image::open(path)
            .map_err(|e| {
                LiveError::DeviceAcquisition(format!("cannot open image {}: {e}", path.display()))
            })?
            .to_rgb8();
        tracing::info!(
            path = %path.display(),
            width = frame.width(),
            height = frame.height(),
            "still image camera ready"
        );
        Ok(Self { frame })
    }

    pub fn from_image(frame: RgbImage) -> Self {
        Self { frame }
    }
}

impl FrameSource for StillImageCamera {
    fn grab(&mut self) -> Option<RgbImage> {
        Some(self.frame.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pattern_counts_every_attempt() {
        let mut cam = TestPatternCamera::new(4, 3).missing_every(3);
        let counter = cam.grab_counter();
        let frames: Vec<_> = (0..6).map(|_| cam.grab()).collect();
        assert_eq!(counter.load(Ordering::Relaxed), 6);
        assert_eq!(frames.iter().filter(|f| f.is_none()).count(), 2);
        let first = frames[0].as_ref().expect("first frame");
        assert_eq!(first.dimensions(), (4, 3));
    }

    #[test]
    fn still_image_repeats_its_frame() {
        let mut cam = StillImageCamera::from_image(RgbImage::new(2, 2));
        assert_eq!(cam.grab(), cam.grab());
    }

    #[test]
    fn missing_file_is_a_device_error() {
        let err = StillImageCamera::open(Path::new("/definitely/not/here.png"))
            .err()
            .expect("should fail");
        assert!(err.is_device_error());
    }
}
