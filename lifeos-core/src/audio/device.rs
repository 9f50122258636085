//! Audio device enumeration for the host's device picker.

use serde::{Deserialize, Serialize};

/// Which side of the audio graph a device sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceDirection {
    Input,
    Output,
}

/// Metadata about one audio device.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    pub name: String,
    pub direction: DeviceDirection,
    pub is_default: bool,
    /// Input devices that most likely capture system output, not a voice.
    pub is_loopback_like: bool,
    /// Best guess for the device a live session should use.
    pub is_recommended: bool,
}

const LOOPBACK_KEYWORDS: &[&str] = &[
    "stereo mix",
    "what u hear",
    "what you hear",
    "loopback",
    "monitor of",
    "virtual output",
    "wave out",
];

const MIC_KEYWORDS: &[&str] = &["microphone", "mic", "headset", "array", "webcam", "usb"];

pub fn is_loopback_like_name(name: &str) -> bool {
    let lowered = name.trim().to_ascii_lowercase();
    LOOPBACK_KEYWORDS.iter().any(|k| lowered.contains(k))
}

/// Higher is better. Loopback-like names are pushed to the bottom.
pub fn mic_preference_score(name: &str) -> i32 {
    let lowered = name.trim().to_ascii_lowercase();
    let mut score = if is_loopback_like_name(&lowered) { -16 } else { 8 };
    if MIC_KEYWORDS.iter().any(|k| lowered.contains(k)) {
        score += 6;
    }
    score
}

/// Build a sorted device list, flagging the default and one recommendation.
fn rank_devices(
    names: impl IntoIterator<Item = String>,
    default_name: Option<&str>,
    direction: DeviceDirection,
) -> Vec<DeviceInfo> {
    let mut list: Vec<DeviceInfo> = names
        .into_iter()
        .map(|name| DeviceInfo {
            is_default: default_name == Some(name.as_str()),
            is_loopback_like: direction == DeviceDirection::Input && is_loopback_like_name(&name),
            is_recommended: false,
            direction,
            name,
        })
        .collect();

    let best = list
        .iter()
        .enumerate()
        .max_by_key(|(_, d)| {
            let base = match direction {
                DeviceDirection::Input => mic_preference_score(&d.name),
                DeviceDirection::Output => 0,
            };
            base + if d.is_default { 2 } else { 0 }
        })
        .map(|(idx, _)| idx);
    if let Some(best) = best.and_then(|idx| list.get_mut(idx)) {
        best.is_recommended = true;
    }

    list.sort_by_key(|d| {
        (
            !d.is_recommended,
            d.is_loopback_like,
            !d.is_default,
            d.name.to_ascii_lowercase(),
        )
    });
    list
}

/// List input and output devices on the default host.
///
/// Returns an empty `Vec` if cpal is unavailable or enumeration fails.
#[cfg(feature = "audio-cpal")]
pub fn list_devices(direction: DeviceDirection) -> Vec<DeviceInfo> {
    use cpal::traits::{DeviceTrait, HostTrait};

    let host = cpal::default_host();
    let (default, devices) = match direction {
        DeviceDirection::Input => (
            host.default_input_device(),
            host.input_devices().map(|d| d.collect::<Vec<_>>()),
        ),
        DeviceDirection::Output => (
            host.default_output_device(),
            host.output_devices().map(|d| d.collect::<Vec<_>>()),
        ),
    };
    let default_name = default.and_then(|d| d.name().ok());

    match devices {
        Ok(devices) => {
            let names = devices
                .iter()
                .enumerate()
                .map(|(idx, d)| d.name().unwrap_or_else(|_| format!("Device {}", idx + 1)));
            rank_devices(names, default_name.as_deref(), direction)
        }
        Err(e) => {
            tracing::warn!(?direction, "failed to enumerate devices: {e}");
            rank_devices(default_name.clone(), default_name.as_deref(), direction)
        }
    }
}

#[cfg(not(feature = "audio-cpal"))]
pub fn list_devices(_direction: DeviceDirection) -> Vec<DeviceInfo> {
    vec![]
}
