//! Transport session: one full-duplex connection to the remote live model.
//!
//! ## Deferred handle
//!
//! ```text
//! TransportSession::open()
//!     ├─► connect task ── connector.connect() ──► handle ──┐
//!     │                                                     ▼
//!     └─► OutboundSink ── ordered mpsc queue ──► writer task (waits for handle,
//!                                                 then drains in order)
//! ```
//!
//! Sends made before the handshake resolves are queued and released in
//! submission order once the handle exists. After [`TransportSession::close`]
//! queued and new sends are dropped, and a handle that resolves late is
//! closed immediately.
//!
//! Inbound events are delivered over one `mpsc` channel, so the consumer
//! handles them strictly one at a time.

#[cfg(feature = "gemini-ws")]
pub mod gemini;
pub mod scripted;
pub mod wire;

#[cfg(feature = "gemini-ws")]
pub use gemini::GeminiConnector;
pub use scripted::{RecordingSink, ScriptedConnector};

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::{
    codec::{EncodedAudioChunk, MediaBlob},
    error::{LiveError, Result},
    session::diagnostics::SessionDiagnostics,
};

pub use wire::ServerContent;

/// Everything the remote model needs to know up front.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectRequest {
    pub model: String,
    pub voice_name: String,
    pub system_instruction: String,
}

/// Inbound notifications from the connection.
#[derive(Debug)]
pub enum TransportEvent {
    /// Handshake complete; outbound media may flow.
    Opened,
    /// A `serverContent` message.
    Content(ServerContent),
    /// Remote side closed the connection.
    Closed { reason: Option<String> },
    /// Connect or runtime failure.
    Error(LiveError),
}

pub type TransportEventSender = mpsc::UnboundedSender<TransportEvent>;
pub type TransportEventReceiver = mpsc::UnboundedReceiver<TransportEvent>;

/// An established connection.
#[async_trait]
pub trait LiveHandle: Send + Sync {
    /// Send one `realtimeInput` media chunk.
    async fn send_realtime_input(&self, media: MediaBlob) -> Result<()>;

    /// Close the connection. Must tolerate repeated calls.
    async fn close(&self);
}

/// Opens connections to the remote model.
#[async_trait]
pub trait LiveConnector: Send + Sync {
    /// Connect and perform the handshake.
    ///
    /// Implementations emit [`TransportEvent::Opened`] on `events` once the
    /// connection is usable, then keep delivering inbound events there until
    /// the connection ends.
    async fn connect(
        &self,
        request: ConnectRequest,
        events: TransportEventSender,
    ) -> Result<Arc<dyn LiveHandle>>;
}

/// Where captured media goes. Implemented by [`OutboundSink`]; tests use
/// [`RecordingSink`].
pub trait MediaSink: Send + Sync {
    /// Non-blocking; callable before the connection is open.
    fn send_audio_chunk(&self, chunk: EncodedAudioChunk);

    /// Non-blocking; callable before the connection is open.
    fn send_video_frame(&self, frame: MediaBlob);
}

struct Shared {
    closed: AtomicBool,
    handle: Mutex<Option<Arc<dyn LiveHandle>>>,
}

impl Shared {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// Cloneable, non-blocking sender side of a [`TransportSession`].
#[derive(Clone)]
pub struct OutboundSink {
    tx: mpsc::UnboundedSender<MediaBlob>,
    shared: Arc<Shared>,
    diagnostics: Arc<SessionDiagnostics>,
}

impl OutboundSink {
    fn enqueue(&self, blob: MediaBlob) {
        if self.shared.is_closed() {
            debug!(mime = blob.mime_type.as_str(), "send after close ignored");
            return;
        }
        if self.shared.handle.lock().is_none() {
            self.diagnostics
                .queued_before_open
                .fetch_add(1, Ordering::Relaxed);
        }
        let _ = self.tx.send(blob);
    }
}

impl MediaSink for OutboundSink {
    fn send_audio_chunk(&self, chunk: EncodedAudioChunk) {
        self.enqueue(chunk);
    }

    fn send_video_frame(&self, frame: MediaBlob) {
        self.enqueue(frame);
    }
}

/// One connection attempt and its outbound queue.
pub struct TransportSession {
    shared: Arc<Shared>,
    outbound: OutboundSink,
    writer: JoinHandle<()>,
}

impl TransportSession {
    /// Start connecting in the background and return immediately.
    ///
    /// A connect that has not resolved within `connect_timeout` is reported
    /// as [`LiveError::ConnectTimeout`] on `events`.
    pub fn open(
        connector: Arc<dyn LiveConnector>,
        request: ConnectRequest,
        events: TransportEventSender,
        connect_timeout: Duration,
        diagnostics: Arc<SessionDiagnostics>,
    ) -> Self {
        let shared = Arc::new(Shared {
            closed: AtomicBool::new(false),
            handle: Mutex::new(None),
        });
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (handle_tx, handle_rx) = oneshot::channel();

        info!(
            model = request.model.as_str(),
            voice = request.voice_name.as_str(),
            "connecting to live model"
        );

        // Detached: it always finishes, via resolution, failure or timeout.
        tokio::spawn(connect_task(
            connector,
            request,
            events.clone(),
            connect_timeout,
            Arc::clone(&shared),
            handle_tx,
        ));

        let writer = tokio::spawn(writer_task(handle_rx, out_rx, events, Arc::clone(&shared)));

        Self {
            outbound: OutboundSink {
                tx: out_tx,
                shared: Arc::clone(&shared),
                diagnostics,
            },
            shared,
            writer,
        }
    }

    /// A sender usable from other tasks and threads.
    pub fn sink(&self) -> OutboundSink {
        self.outbound.clone()
    }

    pub fn send_audio_chunk(&self, chunk: EncodedAudioChunk) {
        self.outbound.send_audio_chunk(chunk);
    }

    pub fn send_video_frame(&self, frame: MediaBlob) {
        self.outbound.send_video_frame(frame);
    }

    /// `true` once the handle exists and the session is not closed.
    pub fn is_open(&self) -> bool {
        !self.shared.is_closed() && self.shared.handle.lock().is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// Close the connection. Idempotent; queued sends are discarded.
    pub async fn close(&self) {
        let handle = {
            let mut slot = self.shared.handle.lock();
            if self.shared.closed.swap(true, Ordering::AcqRel) {
                return;
            }
            slot.take()
        };
        self.writer.abort();
        match handle {
            Some(handle) => {
                handle.close().await;
                info!("live connection closed");
            }
            None => debug!("transport closed before handshake resolved"),
        }
    }
}

impl Drop for TransportSession {
    fn drop(&mut self) {
        let handle = {
            let mut slot = self.shared.handle.lock();
            self.shared.closed.store(true, Ordering::Release);
            slot.take()
        };
        self.writer.abort();
        if let (Some(handle), Ok(rt)) = (handle, tokio::runtime::Handle::try_current()) {
            rt.spawn(async move { handle.close().await });
        }
    }
}

async fn connect_task(
    connector: Arc<dyn LiveConnector>,
    request: ConnectRequest,
    events: TransportEventSender,
    connect_timeout: Duration,
    shared: Arc<Shared>,
    handle_tx: oneshot::Sender<Arc<dyn LiveHandle>>,
) {
    let outcome = match tokio::time::timeout(
        connect_timeout,
        connector.connect(request, events.clone()),
    )
    .await
    {
        Ok(result) => result,
        Err(_) => Err(LiveError::ConnectTimeout {
            secs: connect_timeout.as_secs_f64(),
        }),
    };

    match outcome {
        Ok(handle) => {
            let late = {
                let mut slot = shared.handle.lock();
                if shared.is_closed() {
                    true
                } else {
                    *slot = Some(Arc::clone(&handle));
                    false
                }
            };
            if late {
                warn!("handshake resolved after teardown, closing late connection");
                handle.close().await;
                return;
            }
            debug!("live handle established");
            let _ = handle_tx.send(handle);
        }
        Err(e) => {
            if shared.is_closed() {
                debug!("connect failed after teardown: {e}");
            } else {
                warn!("connect failed: {e}");
                let _ = events.send(TransportEvent::Error(e));
            }
        }
    }
}

async fn writer_task(
    handle_rx: oneshot::Receiver<Arc<dyn LiveHandle>>,
    mut outbound: mpsc::UnboundedReceiver<MediaBlob>,
    events: TransportEventSender,
    shared: Arc<Shared>,
) {
    let Ok(handle) = handle_rx.await else {
        return;
    };
    while let Some(blob) = outbound.recv().await {
        if shared.is_closed() {
            break;
        }
        if let Err(e) = handle.send_realtime_input(blob).await {
            if !shared.is_closed() {
                warn!("send failed: {e}");
                let _ = events.send(TransportEvent::Error(match e {
                    LiveError::TransportRuntime(_) => e,
                    other => LiveError::TransportRuntime(other.to_string()),
                }));
            }
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::encode_audio;

    fn request() -> ConnectRequest {
        ConnectRequest {
            model: "test-model".into(),
            voice_name: "Kore".into(),
            system_instruction: "be brief".into(),
        }
    }

    fn open(
        connector: &ScriptedConnector,
        timeout: Duration,
    ) -> (TransportSession, TransportEventReceiver, Arc<SessionDiagnostics>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let diagnostics = Arc::new(SessionDiagnostics::default());
        let session = TransportSession::open(
            Arc::new(connector.clone()),
            request(),
            tx,
            timeout,
            Arc::clone(&diagnostics),
        );
        (session, rx, diagnostics)
    }

    async fn settle() {
        for _ in 0..16 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn sends_before_open_are_released_in_order() {
        let (connector, gate) = ScriptedConnector::gated();
        let (session, mut events, diagnostics) = open(&connector, Duration::from_secs(5));

        session.send_audio_chunk(encode_audio(&[0.1; 4]));
        session.send_video_frame(MediaBlob::from_bytes(b"jpeg-1", "image/jpeg"));
        session.send_audio_chunk(encode_audio(&[0.2; 4]));
        settle().await;
        assert!(connector.sent().is_empty());
        assert!(!session.is_open());

        gate.release();
        assert!(matches!(events.recv().await, Some(TransportEvent::Opened)));
        settle().await;

        let sent = connector.sent();
        assert_eq!(sent.len(), 3);
        assert_eq!(sent[0], encode_audio(&[0.1; 4]));
        assert_eq!(sent[1].mime_type, "image/jpeg");
        assert_eq!(sent[2], encode_audio(&[0.2; 4]));
        assert_eq!(diagnostics.snapshot().queued_before_open, 3);
        assert!(session.is_open());
    }

    #[tokio::test]
    async fn close_before_handshake_closes_late_handle() {
        let (connector, gate) = ScriptedConnector::gated();
        let (session, _events, _diag) = open(&connector, Duration::from_secs(5));
        session.send_audio_chunk(encode_audio(&[0.3; 4]));

        session.close().await;
        session.send_audio_chunk(encode_audio(&[0.4; 4]));
        gate.release();
        settle().await;

        assert!(connector.sent().is_empty());
        assert_eq!(connector.connect_count(), 1);
        assert_eq!(connector.close_count(), 1);
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let connector = ScriptedConnector::new();
        let (session, mut events, _diag) = open(&connector, Duration::from_secs(5));
        assert!(matches!(events.recv().await, Some(TransportEvent::Opened)));
        settle().await;

        session.close().await;
        session.close().await;
        assert_eq!(connector.close_count(), 1);
        assert!(session.is_closed());
    }

    #[tokio::test]
    async fn connect_failure_is_reported_as_event() {
        let connector = ScriptedConnector::failing("dns lookup failed");
        let (_session, mut events, _diag) = open(&connector, Duration::from_secs(5));
        match events.recv().await {
            Some(TransportEvent::Error(LiveError::TransportConnect(msg))) => {
                assert!(msg.contains("dns"));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn hung_handshake_times_out() {
        let connector = ScriptedConnector::hanging();
        let (_session, mut events, _diag) = open(&connector, Duration::from_secs(15));
        match events.recv().await {
            Some(TransportEvent::Error(LiveError::ConnectTimeout { secs })) => {
                assert!((secs - 15.0).abs() < f64::EPSILON);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn failed_send_surfaces_runtime_error() {
        let connector = ScriptedConnector::new();
        let (session, mut events, _diag) = open(&connector, Duration::from_secs(5));
        assert!(matches!(events.recv().await, Some(TransportEvent::Opened)));
        connector.fail_sends(true);
        session.send_audio_chunk(encode_audio(&[0.0; 4]));
        assert!(matches!(
            events.recv().await,
            Some(TransportEvent::Error(LiveError::TransportRuntime(_)))
        ));
    }
}
