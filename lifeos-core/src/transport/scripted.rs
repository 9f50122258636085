//! In-process transport doubles.
//!
//! `ScriptedConnector` stands in for the remote model: it records every
//! outbound chunk, counts connects and closes, and lets the caller inject
//! inbound events. `RecordingSink` captures what the capture loop and the
//! sampler would have sent, without any connection at all.

use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc,
};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::oneshot;

use super::{
    ConnectRequest, LiveConnector, LiveHandle, MediaSink, ServerContent, TransportEvent,
    TransportEventSender,
};
use crate::{
    codec::{samples_to_pcm16, EncodedAudioChunk, MediaBlob},
    error::{LiveError, Result},
};

/// MIME type the remote model uses for its audio.
pub const MODEL_AUDIO_MIME: &str = "audio/pcm;rate=24000";

enum ConnectMode {
    Succeed,
    Fail(String),
    Hang,
}

/// Releases a gated connect.
pub struct ConnectGate(oneshot::Sender<()>);

impl ConnectGate {
    pub fn release(self) {
        let _ = self.0.send(());
    }
}

struct ConnectorInner {
    mode: ConnectMode,
    gate: Mutex<Option<oneshot::Receiver<()>>>,
    events: Mutex<Option<TransportEventSender>>,
    requests: Mutex<Vec<ConnectRequest>>,
    sent: Mutex<Vec<MediaBlob>>,
    connects: AtomicUsize,
    closes: AtomicUsize,
    fail_sends: AtomicBool,
}

#[derive(Clone)]
pub struct ScriptedConnector {
    inner: Arc<ConnectorInner>,
}

impl Default for ScriptedConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedConnector {
    fn with_mode(mode: ConnectMode) -> Self {
        Self {
            inner: Arc::new(ConnectorInner {
                mode,
                gate: Mutex::new(None),
                events: Mutex::new(None),
                requests: Mutex::new(Vec::new()),
                sent: Mutex::new(Vec::new()),
                connects: AtomicUsize::new(0),
                closes: AtomicUsize::new(0),
                fail_sends: AtomicBool::new(false),
            }),
        }
    }

    /// Connects immediately and reports `Opened`.
    pub fn new() -> Self {
        Self::with_mode(ConnectMode::Succeed)
    }

    /// Every connect fails with `TransportConnect(reason)`.
    pub fn failing(reason: &str) -> Self {
        Self::with_mode(ConnectMode::Fail(reason.to_string()))
    }

    /// Connect never resolves.
    pub fn hanging() -> Self {
        Self::with_mode(ConnectMode::Hang)
    }

    /// The handshake completes only when the returned gate is released.
    pub fn gated() -> (Self, ConnectGate) {
        let connector = Self::new();
        let (tx, rx) = oneshot::channel();
        *connector.inner.gate.lock() = Some(rx);
        (connector, ConnectGate(tx))
    }

    /// Make subsequent sends fail with a runtime error.
    pub fn fail_sends(&self, fail: bool) {
        self.inner.fail_sends.store(fail, Ordering::Release);
    }

    /// Deliver an inbound event as if the remote had sent it. Returns `false`
    /// when no connection is listening.
    pub fn inject(&self, event: TransportEvent) -> bool {
        match self.inner.events.lock().as_ref() {
            Some(tx) => tx.send(event).is_ok(),
            None => false,
        }
    }

    /// Inject a model-turn chunk carrying `samples` as 24 kHz PCM.
    pub fn push_model_audio(&self, samples: &[f32]) -> bool {
        let blob = MediaBlob::from_bytes(&samples_to_pcm16(samples), MODEL_AUDIO_MIME);
        self.inject(TransportEvent::Content(ServerContent::with_audio(blob)))
    }

    /// Simulate the remote side hanging up.
    pub fn remote_close(&self, reason: &str) -> bool {
        self.inject(TransportEvent::Closed {
            reason: Some(reason.to_string()),
        })
    }

    /// Every chunk delivered through a live handle, in order.
    pub fn sent(&self) -> Vec<MediaBlob> {
        self.inner.sent.lock().clone()
    }

    pub fn sent_audio(&self) -> usize {
        self.inner.sent.lock().iter().filter(|b| b.is_audio()).count()
    }

    pub fn sent_video(&self) -> usize {
        self.inner.sent.lock().iter().filter(|b| !b.is_audio()).count()
    }

    pub fn connect_count(&self) -> usize {
        self.inner.connects.load(Ordering::Relaxed)
    }

    /// Handles closed, whether by teardown or because they resolved late.
    pub fn close_count(&self) -> usize {
        self.inner.closes.load(Ordering::Relaxed)
    }

    pub fn last_request(&self) -> Option<ConnectRequest> {
        self.inner.requests.lock().last().cloned()
    }
}

#[async_trait]
impl LiveConnector for ScriptedConnector {
    async fn connect(
        &self,
        request: ConnectRequest,
        events: TransportEventSender,
    ) -> Result<Arc<dyn LiveHandle>> {
        self.inner.connects.fetch_add(1, Ordering::Relaxed);
        self.inner.requests.lock().push(request);

        let gate = self.inner.gate.lock().take();
        if let Some(rx) = gate {
            let _ = rx.await;
        }

        match &self.inner.mode {
            ConnectMode::Succeed => {}
            ConnectMode::Fail(reason) => return Err(LiveError::TransportConnect(reason.clone())),
            ConnectMode::Hang => std::future::pending::<()>().await,
        }

        *self.inner.events.lock() = Some(events.clone());
        let _ = events.send(TransportEvent::Opened);
        Ok(Arc::new(ScriptedHandle {
            inner: Arc::clone(&self.inner),
            closed: AtomicBool::new(false),
        }))
    }
}

struct ScriptedHandle {
    inner: Arc<ConnectorInner>,
    closed: AtomicBool,
}

#[async_trait]
impl LiveHandle for ScriptedHandle {
    async fn send_realtime_input(&self, media: MediaBlob) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(LiveError::SessionClosed);
        }
        if self.inner.fail_sends.load(Ordering::Acquire) {
            return Err(LiveError::TransportRuntime("scripted send failure".into()));
        }
        self.inner.sent.lock().push(media);
        Ok(())
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.inner.closes.fetch_add(1, Ordering::Relaxed);
            self.inner.events.lock().take();
        }
    }
}

/// A [`MediaSink`] that keeps everything it is given.
#[derive(Default)]
pub struct RecordingSink {
    audio: Mutex<Vec<EncodedAudioChunk>>,
    video: Mutex<Vec<MediaBlob>>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn audio(&self) -> Vec<EncodedAudioChunk> {
        self.audio.lock().clone()
    }

    pub fn video(&self) -> Vec<MediaBlob> {
        self.video.lock().clone()
    }
}

impl MediaSink for RecordingSink {
    fn send_audio_chunk(&self, chunk: EncodedAudioChunk) {
        self.audio.lock().push(chunk);
    }

    fn send_video_frame(&self, frame: MediaBlob) {
        self.video.lock().push(frame);
    }
}
