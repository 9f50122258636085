use std::sync::atomic::{AtomicUsize, Ordering};

use serde::Serialize;

/// Counters shared by the capture loop, the sampler, the transport and the
/// session driver. Reset on every `start()`.
#[derive(Debug, Default)]
pub struct SessionDiagnostics {
    pub audio_blocks_sent: AtomicUsize,
    pub video_frames_sent: AtomicUsize,
    pub frames_skipped: AtomicUsize,
    pub inbound_chunks: AtomicUsize,
    pub malformed_chunks: AtomicUsize,
    pub buffers_scheduled: AtomicUsize,
    pub queued_before_open: AtomicUsize,
}

impl SessionDiagnostics {
    pub fn reset(&self) {
        self.audio_blocks_sent.store(0, Ordering::Relaxed);
        self.video_frames_sent.store(0, Ordering::Relaxed);
        self.frames_skipped.store(0, Ordering::Relaxed);
        self.inbound_chunks.store(0, Ordering::Relaxed);
        self.malformed_chunks.store(0, Ordering::Relaxed);
        self.buffers_scheduled.store(0, Ordering::Relaxed);
        self.queued_before_open.store(0, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            audio_blocks_sent: self.audio_blocks_sent.load(Ordering::Relaxed),
            video_frames_sent: self.video_frames_sent.load(Ordering::Relaxed),
            frames_skipped: self.frames_skipped.load(Ordering::Relaxed),
            inbound_chunks: self.inbound_chunks.load(Ordering::Relaxed),
            malformed_chunks: self.malformed_chunks.load(Ordering::Relaxed),
            buffers_scheduled: self.buffers_scheduled.load(Ordering::Relaxed),
            queued_before_open: self.queued_before_open.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticsSnapshot {
    pub audio_blocks_sent: usize,
    pub video_frames_sent: usize,
    pub frames_skipped: usize,
    pub inbound_chunks: usize,
    pub malformed_chunks: usize,
    pub buffers_scheduled: usize,
    pub queued_before_open: usize,
}
