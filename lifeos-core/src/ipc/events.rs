//! Event types published by a live session.
//!
//! ## Channel names
//!
//! | Event | Channel |
//! |-------|---------|
//! | `SessionStatusEvent` | `"lifeos://status"` |
//! | `AudioActivityEvent` | `"lifeos://activity"` |
//! | `ModelSpeakingEvent` | `"lifeos://speaking"` |
//! | `TurnEvent` | `"lifeos://turn"` |

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Session status events
// ---------------------------------------------------------------------------

/// Emitted on channel `"lifeos://status"` on every state transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatusEvent {
    pub state: SessionState,
    /// Short user-facing message (set for `Error`).
    pub detail: Option<String>,
}

/// Lifecycle state of a live session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// No resources held; `start()` may be called.
    Idle,
    /// Devices acquired or being acquired; connection handshake pending.
    Starting,
    /// Connected; microphone and camera are streaming.
    Live,
    /// Teardown in progress after a stop or remote close.
    Closing,
    /// A failure occurred; teardown follows and the session returns to `Idle`.
    Error,
}

impl SessionState {
    pub fn is_active(self) -> bool {
        matches!(self, SessionState::Starting | SessionState::Live)
    }
}

// ---------------------------------------------------------------------------
// Audio activity events
// ---------------------------------------------------------------------------

/// Emitted on channel `"lifeos://activity"` for each captured block.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioActivityEvent {
    /// Monotonically increasing block sequence number.
    pub seq: u64,
    /// Root-mean-square level of the block in [0.0, 1.0].
    pub rms: f32,
    /// Whether the user counts as speaking for this block.
    pub is_speech: bool,
}

// ---------------------------------------------------------------------------
// Remote speech events
// ---------------------------------------------------------------------------

/// Emitted on channel `"lifeos://speaking"` when the remote model starts or
/// stops being audible.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelSpeakingEvent {
    pub is_speaking: bool,
}

/// Emitted on channel `"lifeos://turn"` for server turn markers.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnEvent {
    pub kind: TurnKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnKind {
    /// The model finished its turn.
    Complete,
    /// The model's turn was cut short by user speech.
    Interrupted,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_event_serializes_with_lowercase_state() {
        let event = SessionStatusEvent {
            state: SessionState::Error,
            detail: Some("Connection error. Please try again.".into()),
        };

        let json = serde_json::to_value(&event).expect("serialize status event");
        assert_eq!(json["state"], "error");
        assert_eq!(json["detail"], "Connection error. Please try again.");

        let round_trip: SessionStatusEvent =
            serde_json::from_value(json).expect("deserialize status event");
        assert_eq!(round_trip.state, SessionState::Error);
    }

    #[test]
    fn session_state_rejects_non_lowercase_values() {
        assert!(serde_json::from_str::<SessionState>(r#""Live""#).is_err());
        assert_eq!(
            serde_json::from_str::<SessionState>(r#""live""#).expect("parse"),
            SessionState::Live
        );
    }

    #[test]
    fn audio_activity_event_serializes_with_camel_case_fields() {
        let event = AudioActivityEvent {
            seq: 3,
            rms: 0.18,
            is_speech: true,
        };

        let json = serde_json::to_value(&event).expect("serialize activity event");
        assert_eq!(json["seq"], 3);
        let rms = json["rms"].as_f64().expect("rms should serialize as number");
        assert!((rms - 0.18).abs() < 1e-5);
        assert_eq!(json["isSpeech"], true);
    }

    #[test]
    fn speaking_and_turn_events_use_camel_case() {
        let json = serde_json::to_value(ModelSpeakingEvent { is_speaking: true }).expect("json");
        assert_eq!(json["isSpeaking"], true);

        let json = serde_json::to_value(TurnEvent {
            kind: TurnKind::Interrupted,
        })
        .expect("json");
        assert_eq!(json["kind"], "interrupted");
    }

    #[test]
    fn only_starting_and_live_are_active() {
        assert!(SessionState::Starting.is_active());
        assert!(SessionState::Live.is_active());
        assert!(!SessionState::Idle.is_active());
        assert!(!SessionState::Closing.is_active());
        assert!(!SessionState::Error.is_active());
    }
}
