//! Built-in personas. A persona is the only per-module difference between
//! live sessions: its voice and its instruction.

use serde::{Deserialize, Serialize};

const VISION_AID_INSTRUCTION: &str = "You are Vision Aid, a real-time visual assistant for the visually impaired.
- Continuously describe the video feed.
- Focus on obstacles, text, people, and safety hazards.
- Be concise but descriptive.
- If the user speaks, answer their question about the scene immediately.
- Speak clearly and calmly.";

const GREEN_THUMB_INSTRUCTION: &str = "You are Green Thumb, a friendly and expert AI Botanist.
- Analyze the video feed to identify plants, flowers, and trees in real-time.
- Diagnose visible plant health issues (yellowing leaves, pests, drooping).
- Provide specific care tips regarding light, water, and soil.
- Be concise, encouraging, and \"earthy\" in your tone.";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Persona {
    /// Stable lookup key (`vision-aid`).
    pub id: String,
    /// Display name (`Vision Aid`).
    pub name: String,
    /// Prebuilt voice of the remote model.
    pub voice_name: String,
    pub system_instruction: String,
}

impl Persona {
    pub fn new(id: &str, name: &str, voice_name: &str, system_instruction: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            voice_name: voice_name.to_string(),
            system_instruction: system_instruction.to_string(),
        }
    }

    pub fn vision_aid() -> Self {
        Self::new("vision-aid", "Vision Aid", "Kore", VISION_AID_INSTRUCTION)
    }

    pub fn green_thumb() -> Self {
        Self::new("green-thumb", "Green Thumb", "Zephyr", GREEN_THUMB_INSTRUCTION)
    }

    pub fn builtin() -> Vec<Self> {
        vec![Self::vision_aid(), Self::green_thumb()]
    }

    /// Case-insensitive lookup of a built-in persona by id.
    pub fn by_id(id: &str) -> Option<Self> {
        let wanted = id.trim().to_ascii_lowercase();
        Self::builtin().into_iter().find(|p| p.id == wanted)
    }

    /// The instruction sent at connect time, addressing the user by name
    /// when one is configured.
    pub fn instruction_for(&self, display_name: Option<&str>) -> String {
        match display_name.map(str::trim).filter(|n| !n.is_empty()) {
            Some(name) => format!(
                "{}\n- The user's name is {name}. Address them by name when greeting them.",
                self.system_instruction
            ),
            None => self.system_instruction.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtins_use_distinct_voices() {
        assert_eq!(Persona::vision_aid().voice_name, "Kore");
        assert_eq!(Persona::green_thumb().voice_name, "Zephyr");
    }

    #[test]
    fn lookup_is_case_insensitive() {
        assert_eq!(
            Persona::by_id(" Green-Thumb ").map(|p| p.name),
            Some("Green Thumb".to_string())
        );
        assert!(Persona::by_id("chef").is_none());
    }

    #[test]
    fn display_name_extends_instruction() {
        let p = Persona::vision_aid();
        assert_eq!(p.instruction_for(None), p.system_instruction);
        assert_eq!(p.instruction_for(Some("  ")), p.system_instruction);

        let named = p.instruction_for(Some("Ada"));
        assert!(named.starts_with(&p.system_instruction));
        assert!(named.contains("The user's name is Ada."));
    }
}
