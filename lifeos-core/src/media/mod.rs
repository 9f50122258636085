//! Local media devices: one combined camera + microphone acquisition.
//!
//! [`MediaDevices::request_access`] is the only way a session obtains input
//! devices. It either returns every requested track or nothing; a failed
//! camera open stops the already-opened microphone before the error is
//! returned.
//!
//! Tracks are explicitly stopped by the session teardown. Each track carries a
//! [`TrackState`] that flips once, so hosts and tests can observe release.

pub mod scripted;
pub mod system;

pub use scripted::ScriptedMediaDevices;
pub use system::SystemMediaDevices;

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::thread::JoinHandle;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::{
    audio::AudioCapture,
    buffering::{create_audio_ring, AudioConsumer, AudioProducer},
    error::{LiveError, Result},
    video::source::FrameSource,
};

/// What a session asks the platform for.
#[derive(Debug, Clone, Default)]
pub struct MediaConstraints {
    /// Request a camera alongside the microphone.
    pub video: bool,
    /// Microphone name to prefer over the system default.
    pub preferred_input_device: Option<String>,
}

/// Shared "ended" flag of one track.
#[derive(Debug, Clone, Default)]
pub struct TrackState(Arc<AtomicBool>);

impl TrackState {
    pub fn end(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_ended(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Platform capability that hands out input tracks.
#[async_trait]
pub trait MediaDevices: Send + Sync {
    /// Acquire a microphone and, if `constraints.video`, a camera.
    ///
    /// # Errors
    /// `LiveError::DeviceAcquisition` (or a more specific audio device error)
    /// when any requested device is unavailable. No track outlives the error.
    async fn request_access(&self, constraints: &MediaConstraints) -> Result<MediaStream>;
}

/// The tracks returned by one successful acquisition.
pub struct MediaStream {
    pub audio: MicrophoneTrack,
    pub video: Option<VideoTrack>,
}

impl MediaStream {
    /// Stop every track. Safe to call repeatedly.
    pub fn stop_all_tracks(&mut self) {
        self.audio.stop();
        if let Some(video) = self.video.as_mut() {
            video.stop();
        }
    }
}

struct DeviceThread {
    stop_tx: crossbeam_channel::Sender<()>,
    join: JoinHandle<()>,
}

/// An acquired microphone.
///
/// The device stream lives on its own OS thread (cpal streams are `!Send`);
/// samples land in an SPSC ring whose consumer the capture pipeline takes.
/// The device starts *gated*: nothing is pushed until [`enable`] is called,
/// which the session does only after the transport reports it is open.
///
/// [`enable`]: MicrophoneTrack::enable
pub struct MicrophoneTrack {
    consumer: Option<AudioConsumer>,
    gate: Arc<AtomicBool>,
    sample_rate: u32,
    device: Option<DeviceThread>,
    state: TrackState,
}

impl MicrophoneTrack {
    /// Open a physical input device. Blocks until the device is confirmed
    /// open, so call it from `spawn_blocking`.
    ///
    /// # Errors
    /// Device errors from [`AudioCapture::open_with_preference`].
    pub fn open(preferred_device: Option<&str>) -> Result<Self> {
        let (producer, consumer) = create_audio_ring();
        let gate = Arc::new(AtomicBool::new(false));
        let (open_tx, open_rx) = std::sync::mpsc::channel::<Result<u32>>();
        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(1);

        let preferred = preferred_device.map(str::to_owned);
        let callback_gate = Arc::clone(&gate);
        let join = std::thread::Builder::new()
            .name("lifeos-mic".into())
            .spawn(move || {
                let capture = match AudioCapture::open_with_preference(
                    producer,
                    callback_gate,
                    preferred.as_deref(),
                ) {
                    Ok(c) => {
                        let _ = open_tx.send(Ok(c.sample_rate));
                        c
                    }
                    Err(e) => {
                        let _ = open_tx.send(Err(e));
                        return;
                    }
                };
                // Park until stopped (or the track is dropped).
                let _ = stop_rx.recv();
                capture.stop();
                // Stream drops here, releasing the device on this thread.
            })?;

        match open_rx.recv() {
            Ok(Ok(sample_rate)) => Ok(Self {
                consumer: Some(consumer),
                gate,
                sample_rate,
                device: Some(DeviceThread { stop_tx, join }),
                state: TrackState::default(),
            }),
            Ok(Err(e)) => {
                let _ = join.join();
                Err(e)
            }
            Err(_) => {
                let _ = join.join();
                Err(LiveError::DeviceAcquisition(
                    "microphone thread exited before opening".into(),
                ))
            }
        }
    }

    /// A track with no physical device behind it. Whoever holds the returned
    /// producer plays the role of the device callback.
    pub fn detached(sample_rate: u32) -> (Self, AudioProducer) {
        let (producer, consumer) = create_audio_ring();
        let track = Self {
            consumer: Some(consumer),
            gate: Arc::new(AtomicBool::new(false)),
            sample_rate,
            device: None,
            state: TrackState::default(),
        };
        (track, producer)
    }

    /// Native sample rate of the samples in the ring.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Hand the ring consumer to the capture pipeline (once).
    pub fn take_consumer(&mut self) -> Option<AudioConsumer> {
        self.consumer.take()
    }

    /// Open the gate: the device callback starts pushing samples.
    pub fn enable(&self) {
        if !self.state.is_ended() {
            self.gate.store(true, Ordering::Release);
        }
    }

    /// Whether a detached producer should currently deliver samples.
    pub fn is_enabled(&self) -> bool {
        self.gate.load(Ordering::Acquire)
    }

    /// Shared gate flag, for detached producers that emulate a device.
    pub fn gate(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.gate)
    }

    pub fn state(&self) -> TrackState {
        self.state.clone()
    }

    /// Stop the device and release it. Idempotent.
    pub fn stop(&mut self) {
        self.gate.store(false, Ordering::Release);
        if let Some(device) = self.device.take() {
            let _ = device.stop_tx.send(());
            if device.join.join().is_err() {
                warn!("microphone thread panicked during shutdown");
            }
            debug!("microphone released");
        }
        self.state.end();
    }
}

impl Drop for MicrophoneTrack {
    fn drop(&mut self) {
        self.stop();
    }
}

/// An acquired camera.
pub struct VideoTrack {
    source: Box<dyn FrameSource>,
    state: TrackState,
}

impl VideoTrack {
    pub fn new(source: Box<dyn FrameSource>) -> Self {
        Self {
            source,
            state: TrackState::default(),
        }
    }

    /// Grab the current frame. `None` once stopped or when the camera has
    /// nothing ready yet.
    pub fn grab(&mut self) -> Option<image::RgbImage> {
        if self.state.is_ended() {
            return None;
        }
        self.source.grab()
    }

    pub fn state(&self) -> TrackState {
        self.state.clone()
    }

    /// Stop the camera. Idempotent.
    pub fn stop(&mut self) {
        if !self.state.is_ended() {
            self.source.stop();
            self.state.end();
            debug!("camera released");
        }
    }
}

impl Drop for VideoTrack {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::video::source::TestPatternCamera;

    #[test]
    fn detached_track_starts_gated_and_stops_idempotently() {
        let (mut track, _producer) = MicrophoneTrack::detached(16_000);
        assert!(!track.is_enabled());
        track.enable();
        assert!(track.is_enabled());

        let state = track.state();
        track.stop();
        track.stop();
        assert!(state.is_ended());
        assert!(!track.is_enabled());

        // A stopped track cannot be re-armed.
        track.enable();
        assert!(!track.is_enabled());
    }

    #[test]
    fn consumer_can_only_be_taken_once() {
        let (mut track, _producer) = MicrophoneTrack::detached(16_000);
        assert!(track.take_consumer().is_some());
        assert!(track.take_consumer().is_none());
    }

    #[test]
    fn stopped_video_track_yields_no_frames() {
        let mut track = VideoTrack::new(Box::new(TestPatternCamera::new(8, 8)));
        assert!(track.grab().is_some());
        track.stop();
        assert!(track.grab().is_none());
        assert!(track.state().is_ended());
    }
}
