//! # lifeos-core
//!
//! Real-time multimodal session SDK: streams microphone audio and camera
//! frames to a remote live model and plays its spoken replies back gaplessly.
//!
//! ## Architecture
//!
//! ```text
//! Microphone → MicrophoneTrack → SPSC RingBuffer → capture loop (spawn_blocking)
//!                                                       │ 4096-sample PCM16 blocks
//! Camera → VideoTrack → VideoSampler (2 fps JPEG) ──────┤
//!                                                       ▼
//!                               TransportSession (ordered pre-open queue)
//!                                                       │
//!                                       serverContent inline audio
//!                                                       ▼
//!                       PlaybackScheduler → OutputContext (gapless, 24 kHz)
//! ```
//!
//! [`LiveSession`] owns all of the above for one conversation and is the only
//! component that tears anything down. The audio callback is zero-alloc; all
//! heap work happens on the capture thread.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod audio;
pub mod buffering;
pub mod capture;
pub mod codec;
pub mod error;
pub mod ipc;
pub mod media;
pub mod playback;
pub mod session;
pub mod transport;
pub mod video;

// Convenience re-exports for downstream crates
pub use error::{LiveError, Result};
pub use ipc::events::{
    AudioActivityEvent, ModelSpeakingEvent, SessionState, SessionStatusEvent, TurnEvent, TurnKind,
};
pub use media::{MediaDevices, ScriptedMediaDevices, SystemMediaDevices};
pub use playback::{OutputDevice, VirtualOutput};
pub use session::{
    LiveSession, Persona, PreferenceProvider, SessionConfig, SessionPorts, StaticPreferences,
};
pub use transport::{LiveConnector, LiveHandle, ScriptedConnector};

#[cfg(feature = "audio-cpal")]
pub use playback::CpalOutput;

#[cfg(feature = "gemini-ws")]
pub use transport::GeminiConnector;
