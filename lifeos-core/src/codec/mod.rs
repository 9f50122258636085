//! PCM codec: f32 samples ⇄ signed 16-bit little-endian ⇄ base64.
//!
//! Outbound microphone audio leaves as `audio/pcm;rate=16000`; inbound model
//! audio arrives as base64 int16 at 24 kHz. Both directions use a scale of
//! 32768, so `decode(encode(x))` is within one quantization step of `x`.
//!
//! Encoding saturates: samples outside [-1.0, 1.0] clamp to the int16 range
//! instead of wrapping around.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};

use crate::error::{LiveError, Result};

/// MIME descriptor attached to every outbound microphone chunk.
pub const CAPTURE_PCM_MIME: &str = "audio/pcm;rate=16000";

/// MIME descriptor for sampled camera frames.
pub const JPEG_MIME: &str = "image/jpeg";

/// Normalisation factor between f32 and int16 samples.
pub const PCM_SCALE: f32 = 32768.0;

/// A base64 payload tagged with its MIME type, the unit of `realtimeInput`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaBlob {
    pub mime_type: String,
    pub data: String,
}

impl MediaBlob {
    /// Base64-encode `bytes` under `mime_type`.
    pub fn from_bytes(bytes: &[u8], mime_type: &str) -> Self {
        Self {
            mime_type: mime_type.to_string(),
            data: STANDARD.encode(bytes),
        }
    }

    pub fn is_audio(&self) -> bool {
        self.mime_type.starts_with("audio/")
    }
}

/// Wire form of one captured audio block.
pub type EncodedAudioChunk = MediaBlob;

/// Quantize samples to int16 little-endian bytes.
pub fn samples_to_pcm16(samples: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &s in samples {
        let q = (s * PCM_SCALE)
            .round()
            .clamp(i16::MIN as f32, i16::MAX as f32) as i16;
        bytes.extend_from_slice(&q.to_le_bytes());
    }
    bytes
}

/// Reinterpret int16 little-endian bytes as normalised f32 samples.
///
/// # Errors
/// `LiveError::MalformedPayload` when the byte count is odd.
pub fn pcm16_to_samples(bytes: &[u8]) -> Result<Vec<f32>> {
    if bytes.len() % 2 != 0 {
        return Err(LiveError::MalformedPayload(format!(
            "pcm16 payload has odd length {}",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / PCM_SCALE)
        .collect())
}

/// Encode one capture block for transmission.
pub fn encode_audio(samples: &[f32]) -> EncodedAudioChunk {
    MediaBlob::from_bytes(&samples_to_pcm16(samples), CAPTURE_PCM_MIME)
}

/// Decode a base64 int16 payload back to f32 samples.
///
/// # Errors
/// `LiveError::MalformedPayload` on invalid base64 or odd byte count.
pub fn decode_audio(data: &str) -> Result<Vec<f32>> {
    let bytes = STANDARD
        .decode(data.trim())
        .map_err(|e| LiveError::MalformedPayload(format!("base64: {e}")))?;
    pcm16_to_samples(&bytes)
}

/// Parse the `rate=` parameter of a PCM MIME type (`audio/pcm;rate=24000`).
pub fn pcm_rate_from_mime(mime_type: &str) -> Option<u32> {
    mime_type
        .split(';')
        .skip(1)
        .filter_map(|param| param.trim().strip_prefix("rate="))
        .find_map(|rate| rate.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_stays_within_one_quantization_step() {
        let samples: Vec<f32> = (0..4096)
            .map(|i| ((i as f32) * 0.013).sin() * 0.97)
            .chain([-1.0, 1.0, 0.0, 0.5, -0.5, 1.0 / PCM_SCALE])
            .collect();

        let decoded = decode_audio(&encode_audio(&samples).data).expect("decode");
        assert_eq!(decoded.len(), samples.len());
        for (i, (a, b)) in samples.iter().zip(&decoded).enumerate() {
            assert!(
                (a - b).abs() <= 1.0 / PCM_SCALE,
                "sample {i}: {a} vs {b}"
            );
        }
    }

    #[test]
    fn encode_is_little_endian_and_rounds() {
        let bytes = samples_to_pcm16(&[0.5, -1.0, 3.0 / PCM_SCALE * 0.5]);
        assert_eq!(&bytes[0..2], &16384i16.to_le_bytes());
        assert_eq!(&bytes[2..4], &(-32768i16).to_le_bytes());
        // 1.5 rounds away from zero
        assert_eq!(&bytes[4..6], &2i16.to_le_bytes());
    }

    #[test]
    fn encode_saturates_out_of_range_samples() {
        let bytes = samples_to_pcm16(&[1.0, 1.7, -3.2]);
        assert_eq!(&bytes[0..2], &i16::MAX.to_le_bytes());
        assert_eq!(&bytes[2..4], &i16::MAX.to_le_bytes());
        assert_eq!(&bytes[4..6], &i16::MIN.to_le_bytes());
    }

    #[test]
    fn encoded_chunk_carries_capture_mime() {
        let chunk = encode_audio(&[0.0; 8]);
        assert_eq!(chunk.mime_type, "audio/pcm;rate=16000");
        assert!(chunk.is_audio());
        assert_eq!(chunk.data, STANDARD.encode([0u8; 16]));
    }

    #[test]
    fn decode_rejects_odd_length_payload() {
        let odd = STANDARD.encode([1u8, 2, 3]);
        assert!(matches!(
            decode_audio(&odd),
            Err(LiveError::MalformedPayload(_))
        ));
    }

    #[test]
    fn decode_rejects_invalid_base64() {
        assert!(matches!(
            decode_audio("not*base64!"),
            Err(LiveError::MalformedPayload(_))
        ));
    }

    #[test]
    fn parses_rate_parameter() {
        assert_eq!(pcm_rate_from_mime("audio/pcm;rate=24000"), Some(24_000));
        assert_eq!(pcm_rate_from_mime("audio/pcm; rate=16000"), Some(16_000));
        assert_eq!(pcm_rate_from_mime("audio/pcm"), None);
    }
}
