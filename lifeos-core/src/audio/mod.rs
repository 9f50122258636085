//! Microphone capture via cpal.
//!
//! # Design constraints
//!
//! The cpal input callback runs on an OS audio thread at elevated priority.
//! It **must not** allocate per call, block on a mutex, or perform I/O.
//! Samples are down-mixed to mono into a scratch buffer sized on the first
//! callback and pushed into an SPSC ring producer (`push_slice` is wait-free).
//!
//! # Threading note
//!
//! `cpal::Stream` is `!Send` on most platforms (COM on Windows, CoreAudio on
//! macOS). `AudioCapture` therefore must be created and dropped on the same
//! thread; [`crate::media::MicrophoneTrack`] owns a dedicated device thread
//! for exactly that reason.

pub mod device;
pub mod resample;

#[cfg(feature = "audio-cpal")]
use cpal::{
    traits::{DeviceTrait, StreamTrait},
    FromSample, SampleFormat, SizedSample, Stream, StreamConfig,
};

use crate::buffering::AudioProducer;
#[cfg(feature = "audio-cpal")]
use crate::buffering::Producer;
use crate::error::{LiveError, Result};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
#[cfg(feature = "audio-cpal")]
use tracing::{error, info, warn};

/// Handle to an open input stream.
///
/// **Not `Send`**: create and drop on the same OS thread.
pub struct AudioCapture {
    #[cfg(feature = "audio-cpal")]
    _stream: Stream,
    /// Gate flag: while `false` the callback discards samples.
    running: Arc<AtomicBool>,
    /// Native capture sample rate reported by the device (Hz).
    pub sample_rate: u32,
}

#[cfg(feature = "audio-cpal")]
fn build_mono_input<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    mut producer: AudioProducer,
    running: Arc<AtomicBool>,
) -> std::result::Result<Stream, cpal::BuildStreamError>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    let channels = config.channels.max(1) as usize;
    let mut mono: Vec<f32> = Vec::new();
    device.build_input_stream(
        config,
        move |data: &[T], _info| {
            if !running.load(Ordering::Relaxed) {
                return;
            }
            let frames = data.len() / channels;
            mono.resize(frames, 0.0);
            for (out, frame) in mono.iter_mut().zip(data.chunks_exact(channels)) {
                let sum: f32 = frame.iter().map(|&s| f32::from_sample_(s)).sum();
                *out = sum / channels as f32;
            }
            let written = producer.push_slice(&mono);
            if written < mono.len() {
                warn!(dropped = mono.len() - written, "capture ring full");
            }
        },
        |err| error!("input stream error: {err}"),
        None,
    )
}

impl AudioCapture {
    /// Open an input device by preferred name, otherwise fall back to the
    /// default input device and then the best-scoring available device.
    ///
    /// The stream starts playing immediately but samples are only pushed
    /// once `running` is set.
    #[cfg(feature = "audio-cpal")]
    pub fn open_with_preference(
        producer: AudioProducer,
        running: Arc<AtomicBool>,
        preferred_device_name: Option<&str>,
    ) -> Result<Self> {
        use cpal::traits::HostTrait;

        let host = cpal::default_host();

        let preferred = preferred_device_name.and_then(|wanted| {
            let found = host
                .input_devices()
                .ok()
                .and_then(|mut devices| {
                    devices.find(|d| d.name().map(|n| n == wanted).unwrap_or(false))
                });
            if found.is_none() {
                warn!(wanted, "preferred input device not found, falling back");
            }
            found
        });

        let device = match preferred.or_else(|| host.default_input_device()) {
            Some(device) => device,
            None => {
                let devices = host
                    .input_devices()
                    .map_err(|e| LiveError::AudioDevice(e.to_string()))?;
                let best = devices
                    .max_by_key(|d| device::mic_preference_score(&d.name().unwrap_or_default()))
                    .ok_or(LiveError::NoDefaultInputDevice)?;
                warn!("no default input device, using best-scoring input");
                best
            }
        };

        info!(
            device = device.name().unwrap_or_default().as_str(),
            "opening input device"
        );

        let supported = device
            .default_input_config()
            .map_err(|e| LiveError::AudioDevice(e.to_string()))?;
        let sample_rate = supported.sample_rate().0;
        let config: StreamConfig = supported.config();

        info!(sample_rate, channels = config.channels, "input config selected");

        let flag = Arc::clone(&running);
        let stream = match supported.sample_format() {
            SampleFormat::F32 => build_mono_input::<f32>(&device, &config, producer, flag),
            SampleFormat::I16 => build_mono_input::<i16>(&device, &config, producer, flag),
            SampleFormat::U16 => build_mono_input::<u16>(&device, &config, producer, flag),
            SampleFormat::I32 => build_mono_input::<i32>(&device, &config, producer, flag),
            SampleFormat::U8 => build_mono_input::<u8>(&device, &config, producer, flag),
            fmt => {
                return Err(LiveError::AudioStream(format!(
                    "unsupported sample format: {fmt:?}"
                )))
            }
        }
        .map_err(|e| LiveError::AudioStream(e.to_string()))?;

        stream
            .play()
            .map_err(|e| LiveError::AudioStream(e.to_string()))?;

        Ok(Self {
            _stream: stream,
            running,
            sample_rate,
        })
    }

    /// Stop: the callback no-ops from its next invocation onwards.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }
}

/// Stub when the `audio-cpal` feature is disabled.
#[cfg(not(feature = "audio-cpal"))]
impl AudioCapture {
    pub fn open_with_preference(
        _producer: AudioProducer,
        _running: Arc<AtomicBool>,
        _preferred_device_name: Option<&str>,
    ) -> Result<Self> {
        Err(LiveError::AudioStream(
            "compiled without audio-cpal feature".into(),
        ))
    }
}

#[cfg(all(test, not(feature = "audio-cpal")))]
mod tests {
    use super::*;
    use crate::buffering::create_audio_ring;

    #[test]
    fn open_fails_without_backend() {
        let (producer, _consumer) = create_audio_ring();
        let running = Arc::new(AtomicBool::new(false));
        let err = AudioCapture::open_with_preference(producer, running, Some("USB Mic"))
            .err()
            .expect("no capture backend compiled in");
        assert!(matches!(err, LiveError::AudioStream(_)));
    }
}
