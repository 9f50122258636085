//! Video sampler: a fixed-rate timer that grabs, downscales and JPEG-encodes
//! camera frames and forwards them to the transport.
//!
//! The timer runs as its own tokio task, independent of the audio capture
//! loop. The first tick fires one period after start. Grab and encode run on
//! the blocking pool; the timer task only forwards the finished blob, so a
//! cancelled sampler never sends. A tick whose grab or encode fails is
//! skipped and the timer keeps going.

pub mod encode;
pub mod source;

pub use encode::FrameEncoder;
pub use source::{FrameSource, StillImageCamera, TestPatternCamera};

use std::sync::{atomic::Ordering, Arc};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::{
    codec::MediaBlob, error::Result, media::VideoTrack,
    session::diagnostics::SessionDiagnostics, transport::MediaSink,
};

pub struct VideoSampler {
    task: Option<JoinHandle<()>>,
}

impl VideoSampler {
    /// Start sampling `track` every `period`.
    pub fn start(
        track: Arc<Mutex<VideoTrack>>,
        encoder: FrameEncoder,
        sink: Arc<dyn MediaSink>,
        period: Duration,
        diagnostics: Arc<SessionDiagnostics>,
    ) -> Self {
        let period = period.max(Duration::from_millis(1));
        info!(period_ms = period.as_millis() as u64, "video sampler started");

        let task = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let track = Arc::clone(&track);
                let sampled = tokio::task::spawn_blocking(move || sample_once(&track, encoder))
                    .await;
                match sampled {
                    Ok(Some(Ok(blob))) => {
                        sink.send_video_frame(blob);
                        diagnostics.video_frames_sent.fetch_add(1, Ordering::Relaxed);
                    }
                    Ok(Some(Err(e))) => {
                        diagnostics.frames_skipped.fetch_add(1, Ordering::Relaxed);
                        warn!("frame skipped: {e}");
                    }
                    Ok(None) => {
                        diagnostics.frames_skipped.fetch_add(1, Ordering::Relaxed);
                        debug!("no frame available, skipping tick");
                    }
                    Err(e) => {
                        diagnostics.frames_skipped.fetch_add(1, Ordering::Relaxed);
                        warn!("frame task failed: {e}");
                    }
                }
            }
        });

        Self { task: Some(task) }
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Cancel the timer. Idempotent. A grab already on the blocking pool
    /// finishes, but its frame is never sent.
    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            debug!("video sampler stopped");
        }
    }

    /// Cancel the timer and wait until the timer task has exited.
    pub async fn shutdown(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            let _ = task.await;
            debug!("video sampler stopped");
        }
    }
}

impl Drop for VideoSampler {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Grab and encode one frame. `None` when the camera had nothing ready.
fn sample_once(track: &Mutex<VideoTrack>, encoder: FrameEncoder) -> Option<Result<MediaBlob>> {
    let frame = track.lock().grab()?;
    Some(encoder.encode_blob(&frame))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{codec::encode_audio, transport::RecordingSink};
    use std::sync::atomic::AtomicUsize;

    fn sampler_with_camera(
        camera: TestPatternCamera,
    ) -> (VideoSampler, Arc<AtomicUsize>, Arc<RecordingSink>, Arc<SessionDiagnostics>) {
        let grabs = camera.grab_counter();
        let track = Arc::new(Mutex::new(VideoTrack::new(Box::new(camera))));
        let sink = RecordingSink::new();
        let diagnostics = Arc::new(SessionDiagnostics::default());
        let sampler = VideoSampler::start(
            track,
            FrameEncoder::default(),
            sink.clone(),
            Duration::from_millis(500),
            Arc::clone(&diagnostics),
        );
        (sampler, grabs, sink, diagnostics)
    }

    #[tokio::test(start_paused = true)]
    async fn two_grabs_per_second_regardless_of_audio() {
        let (mut sampler, grabs, sink, _diag) = sampler_with_camera(TestPatternCamera::new(32, 24));

        // An unrelated audio producer on its own 256 ms cadence.
        let audio_sink = Arc::clone(&sink);
        let audio = tokio::spawn(async move {
            let mut tick = tokio::time::interval(Duration::from_millis(256));
            loop {
                tick.tick().await;
                audio_sink.send_audio_chunk(encode_audio(&[0.0; 64]));
            }
        });

        tokio::time::sleep(Duration::from_millis(1_250)).await;
        assert_eq!(grabs.load(Ordering::Relaxed), 2);

        tokio::time::sleep(Duration::from_millis(1_000)).await;
        assert_eq!(grabs.load(Ordering::Relaxed), 4);
        assert_eq!(sink.video().len(), 4);
        assert!(sink.audio().len() >= 8);

        sampler.stop();
        audio.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn missed_grab_skips_one_tick_only() {
        let (mut sampler, grabs, sink, diag) =
            sampler_with_camera(TestPatternCamera::new(16, 16).missing_every(2));

        tokio::time::sleep(Duration::from_millis(2_100)).await;
        sampler.stop();

        assert_eq!(grabs.load(Ordering::Relaxed), 4);
        assert_eq!(sink.video().len(), 2);
        assert_eq!(diag.snapshot().frames_skipped, 2);
        assert_eq!(diag.snapshot().video_frames_sent, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_waits_for_the_timer_task() {
        let (mut sampler, grabs, sink, _diag) = sampler_with_camera(TestPatternCamera::new(8, 8));
        tokio::time::sleep(Duration::from_millis(1_100)).await;
        sampler.shutdown().await;
        sampler.shutdown().await;
        assert!(!sampler.is_running());

        let sent = sink.video().len();
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(grabs.load(Ordering::Relaxed), 2);
        assert_eq!(sink.video().len(), sent);
    }

    #[test]
    fn sample_once_skips_stopped_track() {
        let track = Mutex::new(VideoTrack::new(Box::new(TestPatternCamera::new(8, 8))));
        let blob = sample_once(&track, FrameEncoder::default())
            .expect("frame")
            .expect("encoded");
        assert_eq!(blob.mime_type, "image/jpeg");

        track.lock().stop();
        assert!(sample_once(&track, FrameEncoder::default()).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn stop_cancels_future_ticks() {
        let (mut sampler, grabs, _sink, _diag) = sampler_with_camera(TestPatternCamera::new(8, 8));
        tokio::time::sleep(Duration::from_millis(600)).await;
        sampler.stop();
        sampler.stop();
        assert!(!sampler.is_running());

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(grabs.load(Ordering::Relaxed), 1);
    }
}
