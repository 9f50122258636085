//! `LiveSession`: top-level lifecycle controller.
//!
//! ## Lifecycle
//!
//! ```text
//! LiveSession::new()
//!     └─► start()  → Starting: acquire mic+camera, open output, connect
//!         └─► Opened  → Live: mic enabled, capture + sampler running
//!             └─► stop() / remote close → Closing → teardown → Idle
//!             └─► transport error       → Error   → teardown → Idle
//! ```
//!
//! Any failure while starting also goes `Error → teardown → Idle`.
//! `start()` while starting or live and `stop()` while idle are no-ops. A
//! `start()` that arrives while the previous session is still tearing down
//! waits for that teardown, then starts fresh.
//!
//! ## Threading
//!
//! Each `start()` spawns one driver task that owns every resource of that
//! session. Transport events, playback-ended notifications and control
//! messages are all handled on that task one at a time, so the playback
//! scheduler needs no locking. A pending stop always wins over other ready
//! work. The driver is the only code that tears down.
//!
//! Teardown order: sampler timer, input tracks, capture loop, output
//! context, transport.

pub mod config;
pub mod diagnostics;
pub mod persona;

pub use config::{PreferenceProvider, SessionConfig, StaticPreferences, DEFAULT_MODEL};
pub use diagnostics::{DiagnosticsSnapshot, SessionDiagnostics};
pub use persona::Persona;

use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};

use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::{
    capture::{AudioCapturePipeline, CaptureContext},
    error::{LiveError, Result},
    ipc::events::{
        AudioActivityEvent, ModelSpeakingEvent, SessionState, SessionStatusEvent, TurnEvent,
        TurnKind,
    },
    media::{MediaConstraints, MediaDevices, MediaStream, MicrophoneTrack, VideoTrack},
    playback::{BufferId, InboundAudioBuffer, OutputContext, OutputDevice, Playback},
    transport::{
        ConnectRequest, LiveConnector, MediaSink, ServerContent, TransportEvent,
        TransportSession,
    },
    video::{FrameEncoder, VideoSampler},
};

/// Broadcast channel capacity for slow subscribers.
const BROADCAST_CAP: usize = 256;

/// The platform capabilities a session runs on.
#[derive(Clone)]
pub struct SessionPorts {
    pub connector: Arc<dyn LiveConnector>,
    pub devices: Arc<dyn MediaDevices>,
    pub output: Arc<dyn OutputDevice>,
    pub preferences: Arc<dyn PreferenceProvider>,
}

/// State shared between the handle and the driver task.
struct Shared {
    state: Mutex<SessionState>,
    last_error: Mutex<Option<String>>,
    connected: AtomicBool,
    model_speaking: AtomicBool,
    user_speaking: Arc<AtomicBool>,
    status_tx: broadcast::Sender<SessionStatusEvent>,
    activity_tx: broadcast::Sender<AudioActivityEvent>,
    speaking_tx: broadcast::Sender<ModelSpeakingEvent>,
    turn_tx: broadcast::Sender<TurnEvent>,
    diagnostics: Arc<SessionDiagnostics>,
}

impl Shared {
    fn set_state(&self, state: SessionState, detail: Option<String>) {
        *self.state.lock() = state;
        let _ = self.status_tx.send(SessionStatusEvent { state, detail });
    }

    fn set_model_speaking(&self, speaking: bool) {
        if self.model_speaking.swap(speaking, Ordering::Relaxed) != speaking {
            debug!(speaking, "model speaking changed");
            let _ = self.speaking_tx.send(ModelSpeakingEvent {
                is_speaking: speaking,
            });
        }
    }
}

enum Control {
    Stop,
}

struct Driver {
    control: mpsc::UnboundedSender<Control>,
    task: JoinHandle<()>,
}

/// One live conversation with a persona.
///
/// `LiveSession` is `Send + Sync`; wrap it in an `Arc` to share it between a
/// UI handler and event-forwarding tasks.
pub struct LiveSession {
    config: SessionConfig,
    persona: Persona,
    ports: SessionPorts,
    shared: Arc<Shared>,
    driver: tokio::sync::Mutex<Option<Driver>>,
    epoch: AtomicU64,
}

impl LiveSession {
    pub fn new(config: SessionConfig, persona: Persona, ports: SessionPorts) -> Self {
        let (status_tx, _) = broadcast::channel(BROADCAST_CAP);
        let (activity_tx, _) = broadcast::channel(BROADCAST_CAP);
        let (speaking_tx, _) = broadcast::channel(BROADCAST_CAP);
        let (turn_tx, _) = broadcast::channel(BROADCAST_CAP);

        Self {
            config: config.normalized(),
            persona,
            ports,
            shared: Arc::new(Shared {
                state: Mutex::new(SessionState::Idle),
                last_error: Mutex::new(None),
                connected: AtomicBool::new(false),
                model_speaking: AtomicBool::new(false),
                user_speaking: Arc::new(AtomicBool::new(false)),
                status_tx,
                activity_tx,
                speaking_tx,
                turn_tx,
                diagnostics: Arc::new(SessionDiagnostics::default()),
            }),
            driver: tokio::sync::Mutex::new(None),
            epoch: AtomicU64::new(0),
        }
    }

    /// Start a session: acquire devices, open the output and begin
    /// connecting.
    ///
    /// Returns once the connection attempt is under way; `Live` is reported
    /// on the status channel when the handshake completes. A no-op while a
    /// session is starting or live.
    ///
    /// # Errors
    /// - Device errors when the microphone, camera or speaker is unavailable.
    /// - `LiveError::SessionClosed` when `stop()` wins the race.
    pub async fn start(&self) -> Result<()> {
        let started_rx = {
            let mut driver = self.driver.lock().await;
            if let Some(previous) = driver.take() {
                if !previous.task.is_finished() && self.state().is_active() {
                    debug!("start ignored, session already active");
                    *driver = Some(previous);
                    return Ok(());
                }
                // Closing or failed: let its teardown finish first.
                let _ = previous.control.send(Control::Stop);
                if let Err(e) = previous.task.await {
                    warn!("previous session driver ended abnormally: {e}");
                }
            }

            self.shared.set_state(SessionState::Starting, None);
            self.shared.diagnostics.reset();
            *self.shared.last_error.lock() = None;
            let epoch = self.epoch.fetch_add(1, Ordering::Relaxed) + 1;

            let (control_tx, control_rx) = mpsc::unbounded_channel();
            let (started_tx, started_rx) = oneshot::channel();
            let span = info_span!("live_session", persona = %self.persona.id, epoch);
            let run = SessionRun {
                config: self.config.clone(),
                request: self.connect_request(),
                ports: self.ports.clone(),
                shared: Arc::clone(&self.shared),
                resources: Resources::default(),
            };
            let task = tokio::spawn(run.drive(control_rx, started_tx).instrument(span));
            *driver = Some(Driver {
                control: control_tx,
                task,
            });
            started_rx
        };

        started_rx.await.unwrap_or_else(|_| {
            Err(LiveError::Other(anyhow::anyhow!(
                "session driver died unexpectedly"
            )))
        })
    }

    /// Stop the session and wait for teardown to finish. Safe to call at any
    /// time, any number of times.
    pub async fn stop(&self) {
        // Held until teardown completes so a concurrent start() queues behind it.
        let mut driver = self.driver.lock().await;
        let Some(driver) = driver.take() else {
            return;
        };
        let _ = driver.control.send(Control::Stop);
        if let Err(e) = driver.task.await {
            warn!("session driver ended abnormally: {e}");
        }
    }

    /// Start when idle, stop otherwise.
    pub async fn toggle(&self) -> Result<()> {
        if self.state().is_active() {
            self.stop().await;
            Ok(())
        } else {
            self.start().await
        }
    }

    pub fn state(&self) -> SessionState {
        *self.shared.state.lock()
    }

    /// `true` while the remote connection is open.
    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::Relaxed)
    }

    /// `true` while any scheduled model audio has not finished playing.
    pub fn is_model_speaking(&self) -> bool {
        self.shared.model_speaking.load(Ordering::Relaxed)
    }

    pub fn is_user_speaking(&self) -> bool {
        self.shared.user_speaking.load(Ordering::Relaxed)
    }

    /// User-facing message of the most recent failure.
    pub fn last_error(&self) -> Option<String> {
        self.shared.last_error.lock().clone()
    }

    pub fn persona(&self) -> &Persona {
        &self.persona
    }

    pub fn subscribe_status(&self) -> broadcast::Receiver<SessionStatusEvent> {
        self.shared.status_tx.subscribe()
    }

    pub fn subscribe_activity(&self) -> broadcast::Receiver<AudioActivityEvent> {
        self.shared.activity_tx.subscribe()
    }

    pub fn subscribe_speaking(&self) -> broadcast::Receiver<ModelSpeakingEvent> {
        self.shared.speaking_tx.subscribe()
    }

    pub fn subscribe_turns(&self) -> broadcast::Receiver<TurnEvent> {
        self.shared.turn_tx.subscribe()
    }

    pub fn diagnostics_snapshot(&self) -> DiagnosticsSnapshot {
        self.shared.diagnostics.snapshot()
    }

    fn connect_request(&self) -> ConnectRequest {
        let name = self.ports.preferences.display_name();
        ConnectRequest {
            model: self.config.model.clone(),
            voice_name: self.persona.voice_name.clone(),
            system_instruction: self.persona.instruction_for(name.as_deref()),
        }
    }
}

impl Drop for LiveSession {
    fn drop(&mut self) {
        // The driver tears itself down once it sees the stop.
        if let Some(driver) = self.driver.get_mut().take() {
            let _ = driver.control.send(Control::Stop);
        }
    }
}

// ── Driver ───────────────────────────────────────────────────────────────────

/// Everything one session holds. Every field is optional so teardown works
/// from any point of startup.
#[derive(Default)]
struct Resources {
    audio: Option<MicrophoneTrack>,
    video: Option<Arc<Mutex<VideoTrack>>>,
    capture: Option<AudioCapturePipeline>,
    sampler: Option<VideoSampler>,
    playback: Option<Playback>,
    transport: Option<TransportSession>,
}

impl Resources {
    async fn teardown(&mut self) {
        if let Some(mut sampler) = self.sampler.take() {
            sampler.shutdown().await;
        }

        let audio = self.audio.take();
        let video = self.video.take();
        if audio.is_some() || video.is_some() {
            let stopped = tokio::task::spawn_blocking(move || {
                if let Some(video) = video {
                    video.lock().stop();
                }
                if let Some(mut audio) = audio {
                    audio.stop();
                }
            })
            .await;
            if let Err(e) = stopped {
                warn!("stopping input tracks failed: {e}");
            }
        }

        if let Some(mut capture) = self.capture.take() {
            capture.stop().await;
        }

        if let Some(mut playback) = self.playback.take() {
            if let Err(e) = tokio::task::spawn_blocking(move || playback.close()).await {
                warn!("closing output failed: {e}");
            }
        }

        if let Some(transport) = self.transport.take() {
            transport.close().await;
        }
    }
}

enum Exit {
    Stopped,
    RemoteClosed(Option<String>),
    Failed(LiveError),
}

enum Step {
    Continue,
    Exit(Exit),
}

struct SessionRun {
    config: SessionConfig,
    request: ConnectRequest,
    ports: SessionPorts,
    shared: Arc<Shared>,
    resources: Resources,
}

impl SessionRun {
    async fn drive(
        mut self,
        mut control: mpsc::UnboundedReceiver<Control>,
        started: oneshot::Sender<Result<()>>,
    ) {
        info!("session starting");

        // ── Acquire devices (stop stays effective meanwhile) ───────────────
        let devices = Arc::clone(&self.ports.devices);
        let constraints = MediaConstraints {
            video: self.config.video,
            preferred_input_device: self.config.preferred_input_device.clone(),
        };
        let mut acquire = tokio::spawn(async move { devices.request_access(&constraints).await });

        let acquired = tokio::select! {
            biased;
            _ = control.recv() => {
                info!("stopped during device acquisition");
                tokio::spawn(release_late_stream(acquire));
                let _ = started.send(Err(LiveError::SessionClosed));
                self.finish(Exit::Stopped).await;
                return;
            }
            joined = &mut acquire => match joined {
                Ok(result) => result,
                Err(e) => Err(LiveError::DeviceAcquisition(format!("acquisition task failed: {e}"))),
            },
        };
        let stream = match acquired {
            Ok(stream) => stream,
            Err(e) => return self.fail_startup(e, started).await,
        };
        self.hold_tracks(stream);

        // ── Open the speaker (stop stays effective meanwhile) ──────────────
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let (ended_tx, mut ended_rx) = mpsc::unbounded_channel::<BufferId>();

        let output = Arc::clone(&self.ports.output);
        let rate = self.config.playback_sample_rate;
        let mut opening = tokio::task::spawn_blocking(move || output.open(rate, ended_tx));
        let opened = tokio::select! {
            biased;
            _ = control.recv() => {
                info!("stopped while opening the output");
                tokio::spawn(close_late_output(opening));
                let _ = started.send(Err(LiveError::SessionClosed));
                self.finish(Exit::Stopped).await;
                return;
            }
            joined = &mut opening => match joined {
                Ok(result) => result,
                Err(e) => Err(LiveError::AudioDevice(format!("output task failed: {e}"))),
            },
        };
        match opened {
            Ok(context) => self.resources.playback = Some(Playback::new(context)),
            Err(e) => return self.fail_startup(e, started).await,
        }

        // ── Connect; sends made before the handshake are queued ────────────
        self.resources.transport = Some(TransportSession::open(
            Arc::clone(&self.ports.connector),
            self.request.clone(),
            events_tx,
            self.config.connect_timeout,
            Arc::clone(&self.shared.diagnostics),
        ));
        let _ = started.send(Ok(()));

        let exit = loop {
            let step = tokio::select! {
                biased;
                _ = control.recv() => Step::Exit(Exit::Stopped),
                Some(event) = events_rx.recv() => self.on_transport_event(event),
                Some(id) = ended_rx.recv() => self.on_playback_ended(id),
            };
            if let Step::Exit(exit) = step {
                break exit;
            }
        };
        self.finish(exit).await;
    }

    fn hold_tracks(&mut self, stream: MediaStream) {
        let MediaStream { audio, video } = stream;
        self.resources.audio = Some(audio);
        self.resources.video = video.map(|v| Arc::new(Mutex::new(v)));
    }

    async fn fail_startup(&mut self, e: LiveError, started: oneshot::Sender<Result<()>>) {
        warn!("session failed to start: {e}");
        self.fail(e.user_message().to_string()).await;
        let _ = started.send(Err(e));
    }

    fn on_transport_event(&mut self, event: TransportEvent) -> Step {
        match event {
            TransportEvent::Opened => {
                self.go_live();
                Step::Continue
            }
            TransportEvent::Content(content) => self.on_content(content),
            TransportEvent::Closed { reason } => Step::Exit(Exit::RemoteClosed(reason)),
            TransportEvent::Error(e) => Step::Exit(Exit::Failed(e)),
        }
    }

    fn go_live(&mut self) {
        if *self.shared.state.lock() != SessionState::Starting {
            debug!("duplicate open ignored");
            return;
        }
        let Some(transport) = self.resources.transport.as_ref() else {
            return;
        };
        let sink: Arc<dyn MediaSink> = Arc::new(transport.sink());

        if let Some(audio) = self.resources.audio.as_mut() {
            match audio.take_consumer() {
                Some(consumer) => {
                    self.resources.capture = Some(AudioCapturePipeline::start(CaptureContext {
                        consumer,
                        device_sample_rate: audio.sample_rate(),
                        target_sample_rate: self.config.capture_sample_rate,
                        block_size: self.config.block_size,
                        speaking_threshold: self.config.speaking_threshold,
                        sink: Arc::clone(&sink),
                        user_speaking: Arc::clone(&self.shared.user_speaking),
                        activity_tx: self.shared.activity_tx.clone(),
                        diagnostics: Arc::clone(&self.shared.diagnostics),
                    }));
                    audio.enable();
                }
                None => warn!("microphone consumer already taken, capture not started"),
            }
        }

        if let Some(video) = self.resources.video.as_ref() {
            self.resources.sampler = Some(VideoSampler::start(
                Arc::clone(video),
                FrameEncoder::new(self.config.frame_scale, self.config.jpeg_quality),
                sink,
                self.config.frame_interval,
                Arc::clone(&self.shared.diagnostics),
            ));
        }

        self.shared.connected.store(true, Ordering::Relaxed);
        self.shared.set_state(SessionState::Live, None);
        info!(
            voice = self.request.voice_name.as_str(),
            video = self.resources.sampler.is_some(),
            "session live"
        );
    }

    fn on_content(&mut self, content: ServerContent) -> Step {
        let diagnostics = &self.shared.diagnostics;
        diagnostics.inbound_chunks.fetch_add(1, Ordering::Relaxed);

        if content.interrupted {
            debug!("model turn interrupted");
            let _ = self.shared.turn_tx.send(TurnEvent {
                kind: TurnKind::Interrupted,
            });
        }

        if let Some(blob) = content.inline_audio() {
            let buffer = match InboundAudioBuffer::decode(blob, self.config.playback_sample_rate) {
                Ok(buffer) => buffer,
                Err(e) => {
                    diagnostics.malformed_chunks.fetch_add(1, Ordering::Relaxed);
                    warn!("skipping malformed model audio: {e}");
                    return Step::Continue;
                }
            };
            let Some(playback) = self.resources.playback.as_mut() else {
                return Step::Continue;
            };
            match playback.enqueue(buffer) {
                Ok(_) => {
                    diagnostics.buffers_scheduled.fetch_add(1, Ordering::Relaxed);
                    self.shared.set_model_speaking(true);
                }
                Err(e) => return Step::Exit(Exit::Failed(e)),
            }
        }

        if content.turn_complete {
            debug!("model turn complete");
            let _ = self.shared.turn_tx.send(TurnEvent {
                kind: TurnKind::Complete,
            });
        }
        Step::Continue
    }

    fn on_playback_ended(&mut self, id: BufferId) -> Step {
        if let Some(playback) = self.resources.playback.as_mut() {
            let still_speaking = playback.on_ended(id);
            self.shared.set_model_speaking(still_speaking);
        }
        Step::Continue
    }

    async fn finish(&mut self, exit: Exit) {
        match exit {
            Exit::Stopped => {
                self.shared.set_state(SessionState::Closing, None);
                info!("session stopping");
                self.teardown().await;
            }
            Exit::RemoteClosed(reason) => {
                self.shared.set_state(SessionState::Closing, None);
                info!(?reason, "connection closed by remote");
                self.teardown().await;
            }
            Exit::Failed(e) => {
                warn!("session failed: {e}");
                self.fail(e.user_message().to_string()).await;
            }
        }
    }

    async fn fail(&mut self, message: String) {
        *self.shared.last_error.lock() = Some(message.clone());
        self.shared.set_state(SessionState::Error, Some(message));
        self.teardown().await;
    }

    async fn teardown(&mut self) {
        self.resources.teardown().await;
        self.shared.connected.store(false, Ordering::Relaxed);
        self.shared.user_speaking.store(false, Ordering::Relaxed);
        self.shared.set_model_speaking(false);
        self.shared.set_state(SessionState::Idle, None);
        info!("session idle");
    }
}

/// Close an output context that finishes opening after the session was
/// stopped.
async fn close_late_output(opening: JoinHandle<Result<Box<dyn OutputContext>>>) {
    if let Ok(Ok(mut context)) = opening.await {
        debug!("closing output opened after stop");
        let _ = tokio::task::spawn_blocking(move || context.close()).await;
    }
}

/// Stop the tracks of an acquisition that completes after the session was
/// stopped.
async fn release_late_stream(acquire: JoinHandle<Result<MediaStream>>) {
    if let Ok(Ok(mut stream)) = acquire.await {
        debug!("releasing devices acquired after stop");
        let _ = tokio::task::spawn_blocking(move || stream.stop_all_tracks()).await;
    }
}
