//! JSON frames of the Gemini Live `BidiGenerateContent` protocol.
//!
//! Only the subset this crate speaks is modelled; unknown server fields are
//! ignored on deserialisation.

use serde::{Deserialize, Serialize};

use super::ConnectRequest;
use crate::codec::MediaBlob;

// ---------------------------------------------------------------------------
// Client → server
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetupMessage {
    pub setup: Setup,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Setup {
    /// Fully qualified model name (`models/<id>`).
    pub model: String,
    pub generation_config: GenerationConfig,
    pub system_instruction: Content,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: Vec<String>,
    pub speech_config: SpeechConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    pub voice_config: VoiceConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoiceConfig {
    pub voice_name: String,
}

impl SetupMessage {
    /// Audio-only responses, the persona's voice and instruction.
    pub fn from_request(request: &ConnectRequest) -> Self {
        let model = if request.model.starts_with("models/") {
            request.model.clone()
        } else {
            format!("models/{}", request.model)
        };
        Self {
            setup: Setup {
                model,
                generation_config: GenerationConfig {
                    response_modalities: vec!["AUDIO".into()],
                    speech_config: SpeechConfig {
                        voice_config: VoiceConfig {
                            prebuilt_voice_config: PrebuiltVoiceConfig {
                                voice_name: request.voice_name.clone(),
                            },
                        },
                    },
                },
                system_instruction: Content {
                    parts: vec![Part::text(&request.system_instruction)],
                },
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInputMessage {
    pub realtime_input: RealtimeInput,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInput {
    pub media_chunks: Vec<MediaBlob>,
}

impl RealtimeInputMessage {
    pub fn single(media: MediaBlob) -> Self {
        Self {
            realtime_input: RealtimeInput {
                media_chunks: vec![media],
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Shared content
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Content {
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<MediaBlob>,
}

impl Part {
    pub fn text(text: &str) -> Self {
        Self {
            text: Some(text.to_string()),
            inline_data: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Server → client
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub setup_complete: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_content: Option<ServerContent>,
}

/// One `serverContent` message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_turn: Option<Content>,
    #[serde(default)]
    pub turn_complete: bool,
    #[serde(default)]
    pub interrupted: bool,
}

impl ServerContent {
    /// Content carrying one inline audio part.
    pub fn with_audio(blob: MediaBlob) -> Self {
        Self {
            model_turn: Some(Content {
                parts: vec![Part {
                    text: None,
                    inline_data: Some(blob),
                }],
            }),
            ..Default::default()
        }
    }

    /// The inline audio payload of the first model-turn part, if any.
    pub fn inline_audio(&self) -> Option<&MediaBlob> {
        self.model_turn
            .as_ref()?
            .parts
            .first()?
            .inline_data
            .as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> ConnectRequest {
        ConnectRequest {
            model: "gemini-2.5-flash-native-audio-preview-09-2025".into(),
            voice_name: "Kore".into(),
            system_instruction: "Describe the scene.".into(),
        }
    }

    #[test]
    fn setup_serializes_in_camel_case() {
        let json = serde_json::to_value(SetupMessage::from_request(&request())).expect("json");
        let setup = &json["setup"];
        assert_eq!(
            setup["model"],
            "models/gemini-2.5-flash-native-audio-preview-09-2025"
        );
        assert_eq!(setup["generationConfig"]["responseModalities"][0], "AUDIO");
        assert_eq!(
            setup["generationConfig"]["speechConfig"]["voiceConfig"]["prebuiltVoiceConfig"]
                ["voiceName"],
            "Kore"
        );
        assert_eq!(
            setup["systemInstruction"]["parts"][0]["text"],
            "Describe the scene."
        );
    }

    #[test]
    fn realtime_input_wraps_media_chunks() {
        let msg = RealtimeInputMessage::single(MediaBlob {
            mime_type: "audio/pcm;rate=16000".into(),
            data: "AAA=".into(),
        });
        let json = serde_json::to_value(msg).expect("json");
        assert_eq!(
            json["realtimeInput"]["mediaChunks"][0]["mimeType"],
            "audio/pcm;rate=16000"
        );
        assert_eq!(json["realtimeInput"]["mediaChunks"][0]["data"], "AAA=");
    }

    #[test]
    fn parses_server_content_with_inline_audio() {
        let raw = r#"{
            "serverContent": {
                "modelTurn": {
                    "parts": [{ "inlineData": { "mimeType": "audio/pcm;rate=24000", "data": "AQA=" } }]
                },
                "turnComplete": true
            }
        }"#;
        let msg: ServerMessage = serde_json::from_str(raw).expect("parse");
        let content = msg.server_content.expect("content");
        assert!(content.turn_complete);
        assert!(!content.interrupted);
        assert_eq!(content.inline_audio().map(|b| b.data.as_str()), Some("AQA="));
    }

    #[test]
    fn setup_complete_and_unknown_fields_are_tolerated() {
        let msg: ServerMessage =
            serde_json::from_str(r#"{"setupComplete":{},"usageMetadata":{"x":1}}"#).expect("parse");
        assert!(msg.setup_complete.is_some());
        assert!(msg.server_content.is_none());
    }

    #[test]
    fn text_only_turn_has_no_audio() {
        let content = ServerContent {
            model_turn: Some(Content {
                parts: vec![Part::text("hi")],
            }),
            ..Default::default()
        };
        assert!(content.inline_audio().is_none());
    }
}
