//! Gemini Live over WebSocket (tokio-tungstenite).
//!
//! `connect` completes the WebSocket handshake, sends the `setup` frame and
//! waits for `setupComplete` before emitting `Opened` and returning the
//! handle. A reader task then forwards `serverContent` until the socket
//! closes.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_tungstenite::{tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use super::{
    wire::{RealtimeInputMessage, ServerMessage, SetupMessage},
    ConnectRequest, LiveConnector, LiveHandle, TransportEvent, TransportEventSender,
};
use crate::{
    codec::MediaBlob,
    error::{LiveError, Result},
};

pub const LIVE_ENDPOINT: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Clone)]
pub struct GeminiConnector {
    api_key: String,
    endpoint: String,
}

impl GeminiConnector {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            endpoint: LIVE_ENDPOINT.to_string(),
        }
    }

    /// Point at a different server (proxies, local mocks).
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    fn url(&self) -> String {
        format!("{}?key={}", self.endpoint, self.api_key)
    }
}

/// Parse one WebSocket frame. `Ok(None)` for control frames.
fn decode_frame(frame: &Message) -> Result<Option<ServerMessage>> {
    let parsed = match frame {
        Message::Text(text) => serde_json::from_str(text),
        Message::Binary(bytes) => serde_json::from_slice(bytes),
        _ => return Ok(None),
    };
    parsed
        .map(Some)
        .map_err(|e| LiveError::MalformedPayload(format!("server frame: {e}")))
}

async fn await_setup_complete(read: &mut SplitStream<WsStream>) -> Result<()> {
    while let Some(frame) = read.next().await {
        let frame = frame.map_err(|e| LiveError::TransportConnect(e.to_string()))?;
        if let Message::Close(close) = &frame {
            let reason = close
                .as_ref()
                .map(|c| c.reason.to_string())
                .unwrap_or_default();
            return Err(LiveError::TransportConnect(format!(
                "closed during setup: {reason}"
            )));
        }
        match decode_frame(&frame) {
            Ok(Some(msg)) if msg.setup_complete.is_some() => return Ok(()),
            Ok(_) => continue,
            Err(e) => warn!("ignoring frame during setup: {e}"),
        }
    }
    Err(LiveError::TransportConnect(
        "connection ended before setup completed".into(),
    ))
}

async fn read_loop(mut read: SplitStream<WsStream>, events: TransportEventSender) {
    while let Some(frame) = read.next().await {
        match frame {
            Ok(Message::Close(close)) => {
                let reason = close.map(|c| c.reason.to_string());
                info!(?reason, "live model closed the connection");
                let _ = events.send(TransportEvent::Closed { reason });
                return;
            }
            Ok(frame) => match decode_frame(&frame) {
                Ok(Some(ServerMessage {
                    server_content: Some(content),
                    ..
                })) => {
                    if events.send(TransportEvent::Content(content)).is_err() {
                        return;
                    }
                }
                Ok(_) => {}
                Err(e) => warn!("skipping undecodable server frame: {e}"),
            },
            Err(e) => {
                let _ = events.send(TransportEvent::Error(LiveError::TransportRuntime(
                    e.to_string(),
                )));
                return;
            }
        }
    }
    let _ = events.send(TransportEvent::Closed { reason: None });
}

#[async_trait]
impl LiveConnector for GeminiConnector {
    async fn connect(
        &self,
        request: ConnectRequest,
        events: TransportEventSender,
    ) -> Result<Arc<dyn LiveHandle>> {
        let (ws, _response) = tokio_tungstenite::connect_async(self.url())
            .await
            .map_err(|e| LiveError::TransportConnect(e.to_string()))?;
        let (mut write, mut read) = ws.split();

        let setup = serde_json::to_string(&SetupMessage::from_request(&request))
            .map_err(|e| LiveError::TransportConnect(format!("setup encode: {e}")))?;
        write
            .send(Message::Text(setup))
            .await
            .map_err(|e| LiveError::TransportConnect(e.to_string()))?;

        await_setup_complete(&mut read).await?;
        info!(model = request.model.as_str(), "live setup complete");

        let _ = events.send(TransportEvent::Opened);
        let reader = tokio::spawn(read_loop(read, events));

        Ok(Arc::new(GeminiHandle {
            write: tokio::sync::Mutex::new(write),
            reader: Mutex::new(Some(reader)),
        }))
    }
}

struct GeminiHandle {
    write: tokio::sync::Mutex<SplitSink<WsStream, Message>>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

#[async_trait]
impl LiveHandle for GeminiHandle {
    async fn send_realtime_input(&self, media: MediaBlob) -> Result<()> {
        let frame = serde_json::to_string(&RealtimeInputMessage::single(media))
            .map_err(|e| LiveError::TransportRuntime(format!("encode: {e}")))?;
        self.write
            .lock()
            .await
            .send(Message::Text(frame))
            .await
            .map_err(|e| LiveError::TransportRuntime(e.to_string()))
    }

    async fn close(&self) {
        let reader = self.reader.lock().take();
        let Some(reader) = reader else {
            return;
        };
        reader.abort();
        let mut write = self.write.lock().await;
        if let Err(e) = write.send(Message::Close(None)).await {
            debug!("close frame not sent: {e}");
        }
        let _ = write.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_carries_api_key() {
        let c = GeminiConnector::new("k123").with_endpoint("ws://localhost:9000/live");
        assert_eq!(c.url(), "ws://localhost:9000/live?key=k123");
    }

    #[test]
    fn binary_and_text_frames_decode_alike() {
        let json = r#"{"serverContent":{"turnComplete":true}}"#;
        let text = decode_frame(&Message::Text(json.into())).expect("text");
        let binary = decode_frame(&Message::Binary(json.as_bytes().to_vec())).expect("binary");
        assert!(text.and_then(|m| m.server_content).is_some_and(|c| c.turn_complete));
        assert!(binary.and_then(|m| m.server_content).is_some_and(|c| c.turn_complete));
    }

    #[test]
    fn control_frames_are_ignored_and_garbage_rejected() {
        assert!(decode_frame(&Message::Ping(vec![1])).expect("ping").is_none());
        assert!(matches!(
            decode_frame(&Message::Text("{not json".into())),
            Err(LiveError::MalformedPayload(_))
        ));
    }
}
