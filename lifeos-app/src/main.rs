//! LifeOS terminal host.
//!
//! Runs one Vision Aid / Green Thumb live session against the remote model
//! with the system microphone and speaker until Ctrl-C, and manages the
//! small settings file the sessions read.

mod settings;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use lifeos_core::{
    audio::device::{list_devices, DeviceDirection},
    media::system::CameraFactory,
    video::{FrameSource, StillImageCamera, TestPatternCamera},
    CpalOutput, GeminiConnector, LiveSession, Persona, SessionPorts, SessionState,
    SystemMediaDevices,
};
use settings::{default_settings_path, load_settings, save_settings, AppSettings};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

#[derive(Debug, Parser)]
#[command(name = "lifeos", version, about = "Real-time voice and vision assistants")]
struct Cli {
    /// Settings file (defaults to the per-user data directory).
    #[arg(long, global = true, env = "LIFEOS_SETTINGS")]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Start a live session and run it until Ctrl-C.
    Live {
        /// Persona id (`vision-aid`, `green-thumb`).
        #[arg(long)]
        persona: Option<String>,
        /// Use a still image as the camera.
        #[arg(long, conflicts_with = "no_video")]
        image: Option<PathBuf>,
        /// Audio only.
        #[arg(long)]
        no_video: bool,
        /// Microphone to use instead of the system default.
        #[arg(long)]
        input_device: Option<String>,
        /// Stop automatically after this many seconds.
        #[arg(long)]
        duration_secs: Option<u64>,
    },
    /// List audio input and output devices.
    Devices,
    /// List the built-in personas.
    Personas,
    /// Set the name personas greet you by (empty clears it).
    SetName { name: String },
}

fn api_key() -> anyhow::Result<String> {
    ["GEMINI_API_KEY", "API_KEY"]
        .iter()
        .find_map(|var| std::env::var(var).ok().filter(|v| !v.trim().is_empty()))
        .context("set GEMINI_API_KEY (or API_KEY) to connect to the live model")
}

fn camera_factory(image: Option<PathBuf>) -> CameraFactory {
    Arc::new(move || -> lifeos_core::Result<Box<dyn FrameSource>> {
        let source: Box<dyn FrameSource> = match image.as_deref() {
            Some(path) => Box::new(StillImageCamera::open(path)?),
            None => {
                warn!("no camera backend configured, streaming a test pattern");
                Box::new(TestPatternCamera::new(640, 480))
            }
        };
        Ok(source)
    })
}

fn print_devices() {
    for direction in [DeviceDirection::Input, DeviceDirection::Output] {
        let devices = list_devices(direction);
        println!("{direction:?} devices:");
        if devices.is_empty() {
            println!("  (none found)");
        }
        for d in devices {
            let mut tags = Vec::new();
            if d.is_default {
                tags.push("default");
            }
            if d.is_recommended {
                tags.push("recommended");
            }
            if d.is_loopback_like {
                tags.push("loopback");
            }
            if tags.is_empty() {
                println!("  {}", d.name);
            } else {
                println!("  {} [{}]", d.name, tags.join(", "));
            }
        }
    }
}

fn print_personas(settings: &AppSettings) {
    for p in Persona::builtin() {
        let marker = if p.id == settings.default_persona { "*" } else { " " };
        println!("{marker} {:<12} {:<12} voice {}", p.id, p.name, p.voice_name);
    }
}

/// Forward session events to the log until the session settles back to idle.
fn spawn_event_logging(session: &Arc<LiveSession>) -> tokio::task::JoinHandle<()> {
    let mut activity_rx = session.subscribe_activity();
    tokio::spawn(async move {
        let mut speaking = false;
        loop {
            match activity_rx.recv().await {
                Ok(ev) => {
                    if ev.is_speech != speaking {
                        speaking = ev.is_speech;
                        debug!(rms = ev.rms, speaking, "user activity");
                    }
                }
                Err(RecvError::Lagged(n)) => debug!(skipped = n, "activity events lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let mut speaking_rx = session.subscribe_speaking();
    tokio::spawn(async move {
        while let Ok(ev) = speaking_rx.recv().await {
            info!(speaking = ev.is_speaking, "model speaking");
        }
    });

    let mut turn_rx = session.subscribe_turns();
    tokio::spawn(async move {
        while let Ok(ev) = turn_rx.recv().await {
            debug!(kind = ?ev.kind, "model turn");
        }
    });

    let mut status_rx = session.subscribe_status();
    tokio::spawn(async move {
        let mut was_active = false;
        loop {
            match status_rx.recv().await {
                Ok(ev) => {
                    match ev.detail.as_deref() {
                        Some(detail) => warn!(state = ?ev.state, "{detail}"),
                        None => info!(state = ?ev.state, "session status"),
                    }
                    if ev.state == SessionState::Idle && was_active {
                        break;
                    }
                    was_active |= ev.state.is_active();
                }
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            }
        }
    })
}

async fn run_live(
    settings: AppSettings,
    persona: Option<String>,
    image: Option<PathBuf>,
    no_video: bool,
    input_device: Option<String>,
    duration_secs: Option<u64>,
) -> anyhow::Result<()> {
    let persona_id = persona.unwrap_or_else(|| settings.default_persona.clone());
    let Some(persona) = settings::persona_alias(&persona_id).and_then(|id| Persona::by_id(&id))
    else {
        bail!("unknown persona `{persona_id}` (try `lifeos personas`)");
    };

    let mut config = settings.session_config();
    config.video = !no_video;
    if input_device.is_some() {
        config.preferred_input_device = input_device;
    }

    let ports = SessionPorts {
        connector: Arc::new(GeminiConnector::new(api_key()?)),
        devices: Arc::new(SystemMediaDevices::new().with_camera(camera_factory(image))),
        output: Arc::new(CpalOutput::new()),
        preferences: Arc::new(settings),
    };

    info!(persona = %persona.id, voice = %persona.voice_name, video = config.video, "starting live session");
    let session = Arc::new(LiveSession::new(config, persona, ports));
    let settled = spawn_event_logging(&session);

    session
        .start()
        .await
        .map_err(|e| anyhow::anyhow!("{} ({e})", e.user_message()))?;

    let deadline = async {
        match duration_secs {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => std::future::pending().await,
        }
    };

    tokio::select! {
        res = tokio::signal::ctrl_c() => {
            res.context("failed to listen for Ctrl-C")?;
            info!("Ctrl-C received, stopping");
        }
        _ = deadline => info!("duration elapsed, stopping"),
        _ = settled => info!("session ended"),
    }

    session.stop().await;
    let snapshot = session.diagnostics_snapshot();
    info!(
        audio_blocks = snapshot.audio_blocks_sent,
        video_frames = snapshot.video_frames_sent,
        buffers = snapshot.buffers_scheduled,
        "session summary"
    );
    if let Some(message) = session.last_error() {
        bail!(message);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── Tracing ───────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("lifeos=info")),
        )
        .init();

    let cli = Cli::parse();
    let settings_path = cli.settings.unwrap_or_else(default_settings_path);
    let mut settings = load_settings(&settings_path);
    debug!(settings_path = ?settings_path, persona = %settings.default_persona, "settings loaded");

    match cli.command {
        Command::Live {
            persona,
            image,
            no_video,
            input_device,
            duration_secs,
        } => run_live(settings, persona, image, no_video, input_device, duration_secs).await,
        Command::Devices => {
            print_devices();
            Ok(())
        }
        Command::Personas => {
            print_personas(&settings);
            Ok(())
        }
        Command::SetName { name } => {
            settings.display_name = Some(name);
            settings.normalize();
            save_settings(&settings_path, &settings)
                .with_context(|| format!("failed to write {}", settings_path.display()))?;
            match settings.display_name.as_deref() {
                Some(name) => println!("Personas will greet you as {name}."),
                None => println!("Display name cleared."),
            }
            Ok(())
        }
    }
}
