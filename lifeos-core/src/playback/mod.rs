//! Playback of the remote model's audio.
//!
//! ```text
//! serverContent ─► decode ─► InboundAudioBuffer ─► PlaybackScheduler::schedule
//!                                                        │ start_at
//!                                                        ▼
//!                                  OutputContext::start_at ──► ended(id) ─► finish
//! ```
//!
//! The output context owns a clock in seconds since it was opened and
//! reports each buffer's end of playback on an `mpsc` channel. Scheduling
//! state is owned by [`Playback`] and only touched by the session driver.

#[cfg(feature = "audio-cpal")]
pub mod cpal_output;
pub mod scheduler;
pub mod virtual_output;

#[cfg(feature = "audio-cpal")]
pub use cpal_output::CpalOutput;
pub use scheduler::{BufferId, PlaybackScheduler, ScheduledBuffer};
pub use virtual_output::VirtualOutput;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::{
    codec::{decode_audio, pcm_rate_from_mime, MediaBlob},
    error::Result,
};

/// Decoded model audio, mono f32.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundAudioBuffer {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl InboundAudioBuffer {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    /// Decode an inline audio blob. The rate comes from the MIME type when
    /// present, otherwise `default_rate`.
    ///
    /// # Errors
    /// `LiveError::MalformedPayload` for undecodable data.
    pub fn decode(blob: &MediaBlob, default_rate: u32) -> Result<Self> {
        let sample_rate = pcm_rate_from_mime(&blob.mime_type).unwrap_or(default_rate);
        Ok(Self::new(decode_audio(&blob.data)?, sample_rate))
    }

    /// Duration in seconds.
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

/// An open audio output with its own clock.
pub trait OutputContext: Send {
    /// Seconds since the context was opened.
    fn current_time(&self) -> f64;

    /// Play `buffer` starting at `when` (context seconds). The context sends
    /// `id` on its ended channel once the buffer has finished playing.
    fn start_at(&mut self, id: BufferId, buffer: InboundAudioBuffer, when: f64) -> Result<()>;

    /// Stop all output and release the device. Idempotent.
    fn close(&mut self);
}

/// Opens output contexts.
pub trait OutputDevice: Send + Sync {
    /// `sample_rate` is the rate inbound buffers are produced at.
    fn open(
        &self,
        sample_rate: u32,
        ended: mpsc::UnboundedSender<BufferId>,
    ) -> Result<Box<dyn OutputContext>>;
}

/// Scheduler plus the context it schedules onto.
pub struct Playback {
    scheduler: PlaybackScheduler,
    context: Box<dyn OutputContext>,
    closed: bool,
}

impl Playback {
    pub fn new(context: Box<dyn OutputContext>) -> Self {
        Self {
            scheduler: PlaybackScheduler::new(),
            context,
            closed: false,
        }
    }

    /// Schedule one buffer after everything already queued.
    ///
    /// # Errors
    /// Whatever the output context reports; the buffer is then not counted
    /// as playing.
    pub fn enqueue(&mut self, buffer: InboundAudioBuffer) -> Result<ScheduledBuffer> {
        let clock = self.context.current_time();
        let slot = self.scheduler.schedule(buffer.duration(), clock);
        if let Err(e) = self.context.start_at(slot.id, buffer, slot.start_at) {
            self.scheduler.finish(slot.id);
            return Err(e);
        }
        debug!(
            id = slot.id,
            start_at = slot.start_at,
            duration = slot.duration,
            clock,
            "buffer scheduled"
        );
        Ok(slot)
    }

    /// Handle an ended notification. Returns whether the remote is still
    /// speaking afterwards.
    pub fn on_ended(&mut self, id: BufferId) -> bool {
        if !self.scheduler.finish(id) {
            warn!(id, "ended notification for unknown buffer");
        }
        self.scheduler.is_speaking()
    }

    pub fn is_speaking(&self) -> bool {
        self.scheduler.is_speaking()
    }

    pub fn next_start_time(&self) -> f64 {
        self.scheduler.next_start_time()
    }

    pub fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.context.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{samples_to_pcm16, MediaBlob};
    use approx::assert_abs_diff_eq;

    #[test]
    fn decode_uses_mime_rate() {
        let blob = MediaBlob::from_bytes(&samples_to_pcm16(&[0.0; 2400]), "audio/pcm;rate=24000");
        let buf = InboundAudioBuffer::decode(&blob, 16_000).expect("decode");
        assert_eq!(buf.sample_rate, 24_000);
        assert_abs_diff_eq!(buf.duration(), 0.1, epsilon = 1e-9);

        let bare = MediaBlob::from_bytes(&samples_to_pcm16(&[0.0; 2400]), "audio/pcm");
        let buf = InboundAudioBuffer::decode(&bare, 24_000).expect("decode");
        assert_eq!(buf.sample_rate, 24_000);
    }

    #[tokio::test]
    async fn playback_follows_output_clock() {
        let output = VirtualOutput::new();
        let (tx, mut ended) = mpsc::unbounded_channel();
        let mut playback = Playback::new(output.open(24_000, tx).expect("open"));

        let half_second = InboundAudioBuffer::new(vec![0.0; 12_000], 24_000);
        let a = playback.enqueue(half_second.clone()).expect("a");
        output.advance_to(0.2);
        let b = playback.enqueue(half_second).expect("b");
        assert_abs_diff_eq!(a.start_at, 0.0, epsilon = 1e-9);
        assert_abs_diff_eq!(b.start_at, 0.5, epsilon = 1e-9);

        output.advance_to(0.5);
        let id = ended.recv().await.expect("ended a");
        assert_eq!(id, a.id);
        assert!(playback.on_ended(id));

        output.advance_to(1.0);
        let id = ended.recv().await.expect("ended b");
        assert!(!playback.on_ended(id));

        playback.close();
        playback.close();
        assert!(output.is_closed());
    }
}
