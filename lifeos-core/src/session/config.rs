use std::time::Duration;

/// Default remote model.
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash-native-audio-preview-09-2025";

/// Configuration for `LiveSession`.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Rate of transmitted microphone audio (Hz). Default: 16000.
    pub capture_sample_rate: u32,
    /// Samples per transmitted block. Default: 4096 (256 ms at 16 kHz).
    pub block_size: usize,
    /// Block RMS above which the user counts as speaking. Default: 0.05.
    pub speaking_threshold: f32,
    /// Camera sampling period. Default: 500 ms (2 fps).
    pub frame_interval: Duration,
    /// Linear downscale applied to camera frames. Default: 0.5.
    pub frame_scale: f32,
    /// JPEG quality 1–100. Default: 50.
    pub jpeg_quality: u8,
    /// Rate of the model's audio (Hz). Default: 24000.
    pub playback_sample_rate: u32,
    /// Upper bound for the connection handshake. Default: 15 s.
    pub connect_timeout: Duration,
    pub model: String,
    /// Request a camera. Default: true.
    pub video: bool,
    /// Microphone to prefer over the system default.
    pub preferred_input_device: Option<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            capture_sample_rate: 16_000,
            block_size: 4_096,
            speaking_threshold: 0.05,
            frame_interval: Duration::from_millis(500),
            frame_scale: 0.5,
            jpeg_quality: 50,
            playback_sample_rate: 24_000,
            connect_timeout: Duration::from_secs(15),
            model: DEFAULT_MODEL.to_string(),
            video: true,
            preferred_input_device: None,
        }
    }
}

impl SessionConfig {
    /// Clamp every field into a usable range.
    pub fn normalized(mut self) -> Self {
        self.capture_sample_rate = self.capture_sample_rate.clamp(8_000, 48_000);
        self.block_size = self.block_size.clamp(256, 16_384);
        self.speaking_threshold = if self.speaking_threshold.is_finite() {
            self.speaking_threshold.clamp(0.0, 1.0)
        } else {
            0.05
        };
        self.frame_interval = self
            .frame_interval
            .clamp(Duration::from_millis(100), Duration::from_secs(10));
        self.frame_scale = if self.frame_scale.is_finite() {
            self.frame_scale.clamp(0.05, 1.0)
        } else {
            0.5
        };
        self.jpeg_quality = self.jpeg_quality.clamp(1, 100);
        self.playback_sample_rate = self.playback_sample_rate.clamp(8_000, 48_000);
        self.connect_timeout = self
            .connect_timeout
            .clamp(Duration::from_secs(1), Duration::from_secs(120));
        self.model = self.model.trim().to_string();
        if self.model.is_empty() {
            self.model = DEFAULT_MODEL.to_string();
        }
        self.preferred_input_device = self
            .preferred_input_device
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty());
        self
    }
}

/// User preferences the session reads but never writes.
pub trait PreferenceProvider: Send + Sync {
    /// Name the persona should address the user by.
    fn display_name(&self) -> Option<String>;
}

/// In-memory preferences.
#[derive(Debug, Clone, Default)]
pub struct StaticPreferences {
    display_name: Option<String>,
}

impl StaticPreferences {
    pub fn new(display_name: Option<String>) -> Self {
        Self { display_name }
    }

    pub fn named(name: &str) -> Self {
        Self::new(Some(name.to_string()))
    }
}

impl PreferenceProvider for StaticPreferences {
    fn display_name(&self) -> Option<String> {
        self.display_name.clone()
    }
}
