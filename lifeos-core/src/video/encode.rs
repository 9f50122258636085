//! Frame downscale + JPEG encoding.

use image::{codecs::jpeg::JpegEncoder, imageops::FilterType, RgbImage};

use crate::{
    codec::{MediaBlob, JPEG_MIME},
    error::{LiveError, Result},
};

/// Downscales frames by `scale` and encodes them as JPEG at `quality`.
#[derive(Debug, Clone, Copy)]
pub struct FrameEncoder {
    /// Linear scale factor in (0, 1]. Default: 0.5.
    pub scale: f32,
    /// JPEG quality 1–100. Default: 50.
    pub quality: u8,
}

impl Default for FrameEncoder {
    fn default() -> Self {
        Self {
            scale: 0.5,
            quality: 50,
        }
    }
}

impl FrameEncoder {
    pub fn new(scale: f32, quality: u8) -> Self {
        Self {
            scale: scale.clamp(0.05, 1.0),
            quality: quality.clamp(1, 100),
        }
    }

    /// Output dimensions for a `width`×`height` frame; never zero.
    pub fn scaled_size(&self, width: u32, height: u32) -> (u32, u32) {
        let w = ((width as f32 * self.scale).round() as u32).max(1);
        let h = ((height as f32 * self.scale).round() as u32).max(1);
        (w, h)
    }

    /// Encode one frame to JPEG bytes.
    ///
    /// # Errors
    /// `LiveError::FrameEncode` for empty frames or encoder failures.
    pub fn encode(&self, frame: &RgbImage) -> Result<Vec<u8>> {
        let (width, height) = frame.dimensions();
        if width == 0 || height == 0 {
            return Err(LiveError::FrameEncode("empty frame".into()));
        }

        let (w, h) = self.scaled_size(width, height);
        let resized = if (w, h) == (width, height) {
            frame.clone()
        } else {
            image::imageops::resize(frame, w, h, FilterType::Triangle)
        };

        let mut bytes = Vec::new();
        JpegEncoder::new_with_quality(&mut bytes, self.quality)
            .encode_image(&resized)
            .map_err(|e| LiveError::FrameEncode(e.to_string()))?;
        Ok(bytes)
    }

    /// Encode one frame into a `image/jpeg` blob ready for transmission.
    pub fn encode_blob(&self, frame: &RgbImage) -> Result<MediaBlob> {
        Ok(MediaBlob::from_bytes(&self.encode(frame)?, JPEG_MIME))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::{engine::general_purpose::STANDARD, Engine as _};

    #[test]
    fn halves_resolution_and_emits_jpeg() {
        let frame = RgbImage::from_pixel(640, 480, image::Rgb([40, 120, 200]));
        let enc = FrameEncoder::default();
        let bytes = enc.encode(&frame).expect("encode");
        assert_eq!(&bytes[..2], &[0xFF, 0xD8], "JPEG SOI marker");

        let decoded = image::load_from_memory(&bytes).expect("decode jpeg");
        assert_eq!((decoded.width(), decoded.height()), (320, 240));
    }

    #[test]
    fn tiny_frames_never_scale_to_zero() {
        assert_eq!(FrameEncoder::default().scaled_size(1, 1), (1, 1));
    }

    #[test]
    fn empty_frame_is_rejected() {
        let err = FrameEncoder::default().encode(&RgbImage::new(0, 0));
        assert!(matches!(err, Err(LiveError::FrameEncode(_))));
    }

    #[test]
    fn blob_is_tagged_as_jpeg() {
        let blob = FrameEncoder::default()
            .encode_blob(&RgbImage::new(8, 8))
            .expect("encode");
        assert_eq!(blob.mime_type, "image/jpeg");
        assert!(STANDARD.decode(&blob.data).is_ok());
    }
}
