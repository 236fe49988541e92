//! Error types for the audio device boundary.
//!
//! Only acquiring hardware can fail. Silence, missing pitches and
//! out-of-band candidates are reported as data by the estimator and tracker,
//! and scheduler parameters are clamped rather than rejected.

use thiserror::Error;

/// Result type for device operations.
pub type DeviceResult<T> = Result<T, DeviceError>;

/// Errors that can occur while opening or running an audio device.
#[derive(Debug, Error)]
pub enum DeviceError {
    /// The host has no default capture device.
    #[error("no input device available")]
    NoInputDevice,

    /// The host has no default playback device.
    #[error("no output device available")]
    NoOutputDevice,

    /// The device exists but offers no 32-bit float stream.
    #[error("no suitable f32 stream format found")]
    NoSupportedConfig,

    /// The user or the OS refused access to the microphone.
    #[error("microphone access denied: {0}")]
    PermissionDenied(String),

    /// The device disappeared or is held by someone else.
    #[error("audio device unavailable")]
    DeviceUnavailable,

    /// A filter cutoff cannot be realised at the device's sample rate.
    #[error("cannot build a {cutoff_hz} Hz filter at {sample_rate} Hz")]
    InvalidFilter {
        /// Requested corner frequency.
        cutoff_hz: f32,
        /// Sample rate of the opened stream.
        sample_rate: u32,
    },

    #[error("failed to query device name: {0}")]
    DeviceName(#[from] cpal::DeviceNameError),

    #[error("failed to query supported stream configs: {0}")]
    SupportedConfigs(#[from] cpal::SupportedStreamConfigsError),

    #[error("failed to query default stream config: {0}")]
    DefaultConfig(#[from] cpal::DefaultStreamConfigError),

    #[error("failed to build audio stream: {0}")]
    BuildStream(cpal::BuildStreamError),

    #[error("failed to start audio stream: {0}")]
    PlayStream(#[from] cpal::PlayStreamError),
}

impl From<cpal::BuildStreamError> for DeviceError {
    fn from(err: cpal::BuildStreamError) -> Self {
        match err {
            cpal::BuildStreamError::DeviceNotAvailable => DeviceError::DeviceUnavailable,
            cpal::BuildStreamError::BackendSpecific { err }
                if looks_like_permission_denial(&err.description) =>
            {
                DeviceError::PermissionDenied(err.description)
            }
            other => DeviceError::BuildStream(other),
        }
    }
}

fn looks_like_permission_denial(message: &str) -> bool {
    let message = message.to_ascii_lowercase();
    message.contains("permission") || message.contains("denied") || message.contains("not authorized")
}
