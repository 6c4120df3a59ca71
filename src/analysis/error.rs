use thiserror::Error;
#[derive(Debug, Error)]
pub enum MeaError {
    #[error("recording has no channels")]
    NoChannels,
    #[error("channel {channel} has no samples")]
    EmptyChannel { channel: usize },
    #[error("channel {channel} has a non-finite sample at index {index}")]
    NonFiniteSample { channel: usize, index: usize },
    #[error("electrode layout has no valid labels")]
    EmptyLayout,
    #[error("sample rate must be greater than zero")]
    InvalidSampleRate,
    #[error("channel count mismatch: expected {expected}, got {actual}")]
    ChannelMismatch { expected: usize, actual: usize },
    #[error("event {event} out of range ({available} events available)")]
    EventOutOfRange { event: usize, available: usize },
    #[error("failed to read recording: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse json: {0}")]
    Json(#[from] serde_json::Error),
}
