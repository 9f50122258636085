//! Physical devices: cpal microphone plus a host-supplied camera.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use super::{MediaConstraints, MediaDevices, MediaStream, MicrophoneTrack, VideoTrack};
use crate::{
    error::{LiveError, Result},
    video::source::FrameSource,
};

/// Opens a camera on demand. Supplied by the host, since camera access is
/// platform specific.
pub type CameraFactory = Arc<dyn Fn() -> Result<Box<dyn FrameSource>> + Send + Sync>;

/// Default microphone via cpal, camera via an optional factory.
#[derive(Clone, Default)]
pub struct SystemMediaDevices {
    camera: Option<CameraFactory>,
}

impl SystemMediaDevices {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_camera(mut self, camera: CameraFactory) -> Self {
        self.camera = Some(camera);
        self
    }
}

#[async_trait]
impl MediaDevices for SystemMediaDevices {
    async fn request_access(&self, constraints: &MediaConstraints) -> Result<MediaStream> {
        let preferred = constraints.preferred_input_device.clone();
        let mut audio = tokio::task::spawn_blocking(move || MicrophoneTrack::open(preferred.as_deref()))
            .await
            .map_err(|e| LiveError::DeviceAcquisition(format!("microphone task failed: {e}")))??;

        let video = if constraints.video {
            let opened = match self.camera.as_ref() {
                Some(factory) => factory(),
                None => Err(LiveError::DeviceAcquisition("no camera available".into())),
            };
            match opened {
                Ok(source) => Some(VideoTrack::new(source)),
                Err(e) => {
                    warn!("camera acquisition failed, releasing microphone: {e}");
                    audio.stop();
                    return Err(e);
                }
            }
        } else {
            None
        };

        info!(
            sample_rate = audio.sample_rate(),
            video = video.is_some(),
            "media devices acquired"
        );
        Ok(MediaStream { audio, video })
    }
}
