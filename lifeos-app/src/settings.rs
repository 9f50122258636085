//! Persistent application settings (JSON file in app data directory).

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use lifeos_core::{session::DEFAULT_MODEL, Persona, PreferenceProvider, SessionConfig};
use serde::{Deserialize, Serialize};

const DEFAULT_PERSONA: &str = "vision-aid";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct AppSettings {
    /// Name the persona greets the user by.
    pub display_name: Option<String>,
    pub default_persona: String,
    pub preferred_input_device: Option<String>,
    pub model: String,
    pub connect_timeout_secs: u64,
    pub frame_interval_ms: u64,
    pub speaking_threshold: f32,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            display_name: None,
            default_persona: DEFAULT_PERSONA.into(),
            preferred_input_device: None,
            model: DEFAULT_MODEL.into(),
            connect_timeout_secs: 15,
            frame_interval_ms: 500,
            speaking_threshold: 0.05,
        }
    }
}

impl AppSettings {
    pub fn normalize(&mut self) {
        self.display_name = trimmed(self.display_name.take());
        self.default_persona = normalize_persona(&self.default_persona);
        self.preferred_input_device = trimmed(self.preferred_input_device.take());
        self.model = self.model.trim().to_string();
        if self.model.is_empty() {
            self.model = DEFAULT_MODEL.into();
        }
        self.connect_timeout_secs = self.connect_timeout_secs.clamp(1, 120);
        self.frame_interval_ms = self.frame_interval_ms.clamp(100, 10_000);
        self.speaking_threshold = if self.speaking_threshold.is_finite() {
            self.speaking_threshold.clamp(0.0, 1.0)
        } else {
            0.05
        };
    }

    /// Session configuration derived from these settings.
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            speaking_threshold: self.speaking_threshold,
            frame_interval: Duration::from_millis(self.frame_interval_ms),
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            model: self.model.clone(),
            preferred_input_device: self.preferred_input_device.clone(),
            ..SessionConfig::default()
        }
    }
}

impl PreferenceProvider for AppSettings {
    fn display_name(&self) -> Option<String> {
        self.display_name.clone()
    }
}

fn trimmed(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Built-in persona id for `raw`, accepting a few aliases.
pub fn persona_alias(raw: &str) -> Option<String> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "vision" | "vision_aid" | "visionaid" => Some("vision-aid".into()),
        "green" | "green_thumb" | "greenthumb" | "botanist" => Some("green-thumb".into()),
        other => Persona::by_id(other).map(|p| p.id),
    }
}

/// Like [`persona_alias`], falling back to the default persona.
pub fn normalize_persona(raw: &str) -> String {
    persona_alias(raw).unwrap_or_else(|| DEFAULT_PERSONA.into())
}

pub fn default_settings_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("LifeOS")
            .join("settings.json")
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var_os("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                std::env::var_os("HOME")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("/tmp"))
                    .join(".local")
                    .join("share")
            })
            .join("lifeos")
            .join("settings.json")
    }
}

pub fn load_settings(path: &Path) -> AppSettings {
    let mut settings = fs::read_to_string(path)
        .ok()
        .and_then(|raw| serde_json::from_str::<AppSettings>(&raw).ok())
        .unwrap_or_default();
    settings.normalize();
    settings
}

pub fn save_settings(path: &Path, settings: &AppSettings) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(settings).map_err(std::io::Error::other)?;
    fs::write(path, json)
}
