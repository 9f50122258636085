use thiserror::Error;

/// All errors produced by lifeos-core.
#[derive(Debug, Error)]
pub enum LiveError {
    #[error("media device acquisition failed: {0}")]
    DeviceAcquisition(String),

    #[error("audio device error: {0}")]
    AudioDevice(String),

    #[error("audio stream error: {0}")]
    AudioStream(String),

    #[error("no default input device found")]
    NoDefaultInputDevice,

    #[error("no default output device found")]
    NoDefaultOutputDevice,

    #[error("could not connect to live model: {0}")]
    TransportConnect(String),

    #[error("live connection failed: {0}")]
    TransportRuntime(String),

    #[error("live model handshake did not complete within {secs:.1}s")]
    ConnectTimeout { secs: f64 },

    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    #[error("frame encoding failed: {0}")]
    FrameEncode(String),

    #[error("session is closed")]
    SessionClosed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl LiveError {
    /// `true` for camera/microphone/speaker acquisition failures.
    pub fn is_device_error(&self) -> bool {
        matches!(
            self,
            LiveError::DeviceAcquisition(_)
                | LiveError::AudioDevice(_)
                | LiveError::AudioStream(_)
                | LiveError::NoDefaultInputDevice
                | LiveError::NoDefaultOutputDevice
        )
    }

    /// Short, actionable text for the host UI. Never includes raw diagnostics.
    pub fn user_message(&self) -> &'static str {
        match self {
            e if e.is_device_error() => "Failed to access camera or microphone.",
            LiveError::TransportConnect(_)
            | LiveError::TransportRuntime(_)
            | LiveError::ConnectTimeout { .. } => "Connection error. Please try again.",
            LiveError::SessionClosed => "Session ended.",
            _ => "Something went wrong. Please try again.",
        }
    }
}

pub type Result<T> = std::result::Result<T, LiveError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_errors_share_one_user_message() {
        assert_eq!(
            LiveError::NoDefaultInputDevice.user_message(),
            LiveError::DeviceAcquisition("permission denied".into()).user_message()
        );
    }

    #[test]
    fn transport_errors_hide_diagnostics() {
        let err = LiveError::TransportRuntime("socket reset by peer 10.0.0.4:443".into());
        assert_eq!(err.user_message(), "Connection error. Please try again.");
        assert!(!err.user_message().contains("10.0.0.4"));
        assert_eq!(
            LiveError::ConnectTimeout { secs: 15.0 }.user_message(),
            "Connection error. Please try again."
        );
    }
}
