//! Audio capture pipeline: blocking loop from the microphone ring to the
//! transport.
//!
//! ## Stages (per iteration)
//!
//! ```text
//! 1. Drain ring buffer → Vec<f32> at the device rate
//! 2. Resample to the capture rate (16 kHz by default)
//! 3. Accumulate; cut fixed-size blocks (4096 samples)
//! 4. Per block: RMS → "user speaking" flag + AudioActivityEvent
//! 5. Encode block as base64 PCM16 and hand it to the sink (never blocks)
//! ```
//!
//! The loop runs in `spawn_blocking`, keeping the Tokio executor free for the
//! transport and the session driver. Blocks are forwarded in capture order;
//! the sink queues them until the connection is open.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, OnceLock,
};
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::{
    audio::resample::RateConverter,
    buffering::{chunk::AudioBlock, AudioConsumer, Consumer},
    codec::encode_audio,
    ipc::events::AudioActivityEvent,
    session::diagnostics::SessionDiagnostics,
    transport::MediaSink,
};

/// Samples drained from the ring per iteration (20 ms at 48 kHz).
const DRAIN_CHUNK: usize = 960;

/// Sleep when the ring is empty (avoids busy-waiting a core).
const DEFAULT_SLEEP_EMPTY_MS: u64 = 5;

/// Everything the loop needs, passed as one struct.
pub struct CaptureContext {
    pub consumer: AudioConsumer,
    /// Rate of the samples in the ring.
    pub device_sample_rate: u32,
    /// Rate of the transmitted blocks.
    pub target_sample_rate: u32,
    pub block_size: usize,
    /// RMS above which the user counts as speaking.
    pub speaking_threshold: f32,
    pub sink: Arc<dyn MediaSink>,
    pub user_speaking: Arc<AtomicBool>,
    pub activity_tx: broadcast::Sender<AudioActivityEvent>,
    pub diagnostics: Arc<SessionDiagnostics>,
}

/// Run the blocking loop until `running` becomes false. A partial block left
/// at shutdown is discarded.
pub fn run(mut ctx: CaptureContext, running: Arc<AtomicBool>) {
    let mut resampler = match RateConverter::new(
        ctx.device_sample_rate,
        ctx.target_sample_rate,
        DRAIN_CHUNK,
    ) {
        Ok(r) => r,
        Err(e) => {
            error!("failed to create capture resampler: {e}");
            return;
        }
    };
    if !resampler.is_passthrough() {
        info!(
            from = ctx.device_sample_rate,
            to = ctx.target_sample_rate,
            "capture resampling enabled"
        );
    }

    let block_size = ctx.block_size.max(1);
    let mut raw = vec![0f32; DRAIN_CHUNK];
    let mut pending: Vec<f32> = Vec::with_capacity(block_size * 2);
    let mut seq = 0u64;

    info!(block_size, rate = ctx.target_sample_rate, "capture started");

    while running.load(Ordering::Relaxed) {
        let n = ctx.consumer.pop_slice(&mut raw);
        if n == 0 {
            std::thread::sleep(Duration::from_millis(empty_sleep_ms()));
            continue;
        }

        let resampled = resampler.process(&raw[..n]);
        if resampled.is_empty() {
            continue;
        }
        pending.extend_from_slice(&resampled);

        while pending.len() >= block_size {
            let block = AudioBlock::new(pending.drain(..block_size).collect(), ctx.target_sample_rate);
            forward_block(&ctx, &block, seq);
            seq = seq.saturating_add(1);
        }
    }

    if !pending.is_empty() {
        debug!(samples = pending.len(), "partial block discarded at stop");
    }
    ctx.user_speaking.store(false, Ordering::Relaxed);
    info!(blocks = seq, "capture stopped");
}

fn forward_block(ctx: &CaptureContext, block: &AudioBlock, seq: u64) {
    let rms = block.rms();
    let is_speech = rms > ctx.speaking_threshold;
    let was_speaking = ctx.user_speaking.swap(is_speech, Ordering::Relaxed);
    if was_speaking != is_speech {
        debug!(rms = format_args!("{:.4}", rms), is_speech, "user speaking changed");
    }
    let _ = ctx.activity_tx.send(AudioActivityEvent {
        seq,
        rms,
        is_speech,
    });

    ctx.sink.send_audio_chunk(encode_audio(&block.samples));
    ctx.diagnostics
        .audio_blocks_sent
        .fetch_add(1, Ordering::Relaxed);
}

fn empty_sleep_ms() -> u64 {
    static EMPTY_SLEEP_MS: OnceLock<u64> = OnceLock::new();
    *EMPTY_SLEEP_MS.get_or_init(|| {
        std::env::var("LIFEOS_CAPTURE_EMPTY_SLEEP_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .map(|v| v.clamp(1, 20))
            .unwrap_or(DEFAULT_SLEEP_EMPTY_MS)
    })
}

/// A running capture loop.
pub struct AudioCapturePipeline {
    running: Arc<AtomicBool>,
    task: Option<JoinHandle<()>>,
}

impl AudioCapturePipeline {
    pub fn start(ctx: CaptureContext) -> Self {
        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);
        let task = tokio::task::spawn_blocking(move || run(ctx, flag));
        Self {
            running,
            task: Some(task),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Stop the loop and wait for it to exit. Idempotent.
    pub async fn stop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!("capture task ended abnormally: {e}");
            }
        }
    }
}

impl Drop for AudioCapturePipeline {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        buffering::{create_audio_ring, Producer},
        codec::decode_audio,
        transport::RecordingSink,
    };
    use std::time::Instant;

    fn context(
        consumer: AudioConsumer,
        device_rate: u32,
        sink: Arc<RecordingSink>,
    ) -> (CaptureContext, Arc<AtomicBool>, broadcast::Receiver<AudioActivityEvent>) {
        let (activity_tx, activity_rx) = broadcast::channel(64);
        let speaking = Arc::new(AtomicBool::new(false));
        let ctx = CaptureContext {
            consumer,
            device_sample_rate: device_rate,
            target_sample_rate: 16_000,
            block_size: 4096,
            speaking_threshold: 0.05,
            sink,
            user_speaking: Arc::clone(&speaking),
            activity_tx,
            diagnostics: Arc::new(SessionDiagnostics::default()),
        };
        (ctx, speaking, activity_rx)
    }

    fn wait_for_blocks(sink: &RecordingSink, n: usize) {
        let start = Instant::now();
        while sink.audio().len() < n {
            assert!(
                start.elapsed() < Duration::from_secs(5),
                "timed out waiting for {n} blocks"
            );
            std::thread::sleep(Duration::from_millis(2));
        }
    }

    #[test]
    fn emits_fixed_blocks_and_drops_remainder() {
        let (mut producer, consumer) = create_audio_ring();
        producer.push_slice(&vec![0.2f32; 4096 * 2 + 100]);
        let sink = RecordingSink::new();
        let (ctx, speaking, mut activity) = context(consumer, 16_000, Arc::clone(&sink));

        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);
        let handle = std::thread::spawn(move || run(ctx, flag));
        wait_for_blocks(&sink, 2);
        assert!(speaking.load(Ordering::Relaxed));

        running.store(false, Ordering::Relaxed);
        handle.join().expect("capture thread panicked");

        let blocks = sink.audio();
        assert_eq!(blocks.len(), 2);
        for block in &blocks {
            assert_eq!(block.mime_type, "audio/pcm;rate=16000");
            assert_eq!(decode_audio(&block.data).expect("decode").len(), 4096);
        }
        let first = activity.try_recv().expect("activity event");
        assert_eq!(first.seq, 0);
        assert!(first.is_speech);
        assert!((first.rms - 0.2).abs() < 1e-4);
        assert!(!speaking.load(Ordering::Relaxed), "cleared at stop");
    }

    #[test]
    fn quiet_input_is_not_speech() {
        let (mut producer, consumer) = create_audio_ring();
        producer.push_slice(&vec![0.01f32; 4096]);
        let sink = RecordingSink::new();
        let (ctx, _speaking, mut activity) = context(consumer, 16_000, Arc::clone(&sink));

        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);
        let handle = std::thread::spawn(move || run(ctx, flag));
        wait_for_blocks(&sink, 1);
        running.store(false, Ordering::Relaxed);
        handle.join().expect("capture thread panicked");

        assert!(!activity.try_recv().expect("activity").is_speech);
    }

    #[test]
    fn device_rate_is_resampled_to_capture_rate() {
        let (mut producer, consumer) = create_audio_ring();
        // 0.6 s at 48 kHz → 9600 samples at 16 kHz → two full blocks.
        producer.push_slice(&vec![0.1f32; 28_800]);
        let sink = RecordingSink::new();
        let (ctx, _speaking, _activity) = context(consumer, 48_000, Arc::clone(&sink));

        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);
        let handle = std::thread::spawn(move || run(ctx, flag));
        wait_for_blocks(&sink, 2);
        running.store(false, Ordering::Relaxed);
        handle.join().expect("capture thread panicked");

        for block in sink.audio() {
            assert_eq!(decode_audio(&block.data).expect("decode").len(), 4096);
        }
    }

    #[tokio::test]
    async fn pipeline_stop_is_idempotent() {
        let (_producer, consumer) = create_audio_ring();
        let sink = RecordingSink::new();
        let (ctx, _speaking, _activity) = context(consumer, 16_000, sink);
        let mut pipeline = AudioCapturePipeline::start(ctx);
        assert!(pipeline.is_running());
        pipeline.stop().await;
        pipeline.stop().await;
        assert!(!pipeline.is_running());
    }
}
