//! `ScriptedMediaDevices`: in-memory devices for tests and offline demos.
//!
//! The microphone is a detached ring whose producer the caller drives through
//! [`ScriptedMicrophone`]; the camera is a [`TestPatternCamera`]. Acquisition
//! can be made to fail, or held pending until an [`AcquisitionGate`] is
//! released.

use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc,
};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::oneshot;

use super::{MediaConstraints, MediaDevices, MediaStream, MicrophoneTrack, TrackState, VideoTrack};
use crate::{
    buffering::{AudioProducer, Producer},
    error::{LiveError, Result},
    video::source::TestPatternCamera,
};

/// Releases a pending acquisition.
pub struct AcquisitionGate(oneshot::Sender<()>);

impl AcquisitionGate {
    pub fn release(self) {
        let _ = self.0.send(());
    }
}

/// Test-side end of a scripted microphone: plays the device callback.
pub struct ScriptedMicrophone {
    producer: AudioProducer,
    gate: Arc<AtomicBool>,
}

impl ScriptedMicrophone {
    /// Push samples the way a device callback would: dropped while the
    /// track is gated. Returns the number of samples accepted.
    pub fn push(&mut self, samples: &[f32]) -> usize {
        if !self.gate.load(Ordering::Acquire) {
            return 0;
        }
        self.producer.push_slice(samples)
    }

    pub fn is_enabled(&self) -> bool {
        self.gate.load(Ordering::Acquire)
    }
}

struct Inner {
    sample_rate: u32,
    frame_size: (u32, u32),
    failure: Mutex<Option<String>>,
    pending: Mutex<Option<oneshot::Receiver<()>>>,
    microphones: Mutex<Vec<ScriptedMicrophone>>,
    tracks: Mutex<Vec<TrackState>>,
    requests: AtomicUsize,
}

#[derive(Clone)]
pub struct ScriptedMediaDevices {
    inner: Arc<Inner>,
}

impl ScriptedMediaDevices {
    /// Devices that succeed immediately with a microphone at `sample_rate`.
    pub fn new(sample_rate: u32) -> Self {
        Self {
            inner: Arc::new(Inner {
                sample_rate,
                frame_size: (64, 48),
                failure: Mutex::new(None),
                pending: Mutex::new(None),
                microphones: Mutex::new(Vec::new()),
                tracks: Mutex::new(Vec::new()),
                requests: AtomicUsize::new(0),
            }),
        }
    }

    /// Every acquisition fails with `DeviceAcquisition(reason)`.
    pub fn failing(sample_rate: u32, reason: &str) -> Self {
        let devices = Self::new(sample_rate);
        *devices.inner.failure.lock() = Some(reason.to_string());
        devices
    }

    /// The next acquisition stays pending until the gate is released.
    pub fn gated(sample_rate: u32) -> (Self, AcquisitionGate) {
        let devices = Self::new(sample_rate);
        let (tx, rx) = oneshot::channel();
        *devices.inner.pending.lock() = Some(rx);
        (devices, AcquisitionGate(tx))
    }

    /// Producer side of the most recently acquired microphone.
    pub fn take_microphone(&self) -> Option<ScriptedMicrophone> {
        self.inner.microphones.lock().pop()
    }

    /// Tracks handed out and not yet stopped.
    pub fn live_tracks(&self) -> usize {
        self.inner
            .tracks
            .lock()
            .iter()
            .filter(|t| !t.is_ended())
            .count()
    }

    pub fn request_count(&self) -> usize {
        self.inner.requests.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl MediaDevices for ScriptedMediaDevices {
    async fn request_access(&self, constraints: &MediaConstraints) -> Result<MediaStream> {
        self.inner.requests.fetch_add(1, Ordering::Relaxed);

        let pending = self.inner.pending.lock().take();
        if let Some(rx) = pending {
            let _ = rx.await;
        }

        if let Some(reason) = self.inner.failure.lock().clone() {
            return Err(LiveError::DeviceAcquisition(reason));
        }

        let (audio, producer) = MicrophoneTrack::detached(self.inner.sample_rate);
        let (width, height) = self.inner.frame_size;
        let video = constraints
            .video
            .then(|| VideoTrack::new(Box::new(TestPatternCamera::new(width, height))));

        {
            let mut tracks = self.inner.tracks.lock();
            tracks.push(audio.state());
            if let Some(v) = video.as_ref() {
                tracks.push(v.state());
            }
        }
        self.inner.microphones.lock().push(ScriptedMicrophone {
            producer,
            gate: audio.gate(),
        });

        Ok(MediaStream { audio, video })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn acquisition_returns_requested_tracks() {
        let devices = ScriptedMediaDevices::new(16_000);
        let constraints = MediaConstraints {
            video: true,
            ..Default::default()
        };
        let mut stream = devices.request_access(&constraints).await.expect("acquire");
        assert!(stream.video.is_some());
        assert_eq!(stream.audio.sample_rate(), 16_000);
        assert_eq!(devices.live_tracks(), 2);

        stream.stop_all_tracks();
        assert_eq!(devices.live_tracks(), 0);
    }

    #[tokio::test]
    async fn failing_devices_hand_out_nothing() {
        let devices = ScriptedMediaDevices::failing(16_000, "permission denied");
        let err = devices
            .request_access(&MediaConstraints::default())
            .await
            .err()
            .expect("should fail");
        assert!(err.is_device_error());
        assert_eq!(devices.live_tracks(), 0);
        assert!(devices.take_microphone().is_none());
    }

    #[tokio::test]
    async fn scripted_microphone_respects_gate() {
        let devices = ScriptedMediaDevices::new(16_000);
        let stream = devices
            .request_access(&MediaConstraints::default())
            .await
            .expect("acquire");
        let mut mic = devices.take_microphone().expect("mic");
        assert_eq!(mic.push(&[0.1; 32]), 0);
        stream.audio.enable();
        assert_eq!(mic.push(&[0.1; 32]), 32);
    }
}
