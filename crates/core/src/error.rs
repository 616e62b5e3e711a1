//! Error taxonomy for the device and codec layers.

/// Failures raised while acquiring or driving an audio device.
#[derive(Debug, thiserror::Error)]
pub enum AudioError {
    #[error("No {0} device is available")]
    DeviceUnavailable(&'static str),
    #[error("Microphone access was denied: {0}")]
    PermissionDenied(String),
    #[error("Unsupported stream configuration: {0}")]
    UnsupportedConfig(String),
    #[error("Audio stream failure: {0}")]
    Stream(String),
}

/// Failures raised while decoding inbound audio payloads.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("Invalid base64 audio payload: {0}")]
    Base64(#[from] base64::DecodeError),
}
