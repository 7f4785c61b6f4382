//! Pipeline error types

use thiserror::Error;

/// Errors that can take the audio pipeline down
///
/// Any of these during initialization leaves the pipeline disabled; the host
/// keeps running without sound.
#[derive(Error, Debug)]
pub enum AudioError {
    /// No audio output device available
    #[error("No audio output device found")]
    NoDevice,

    /// Named device not found
    #[error("Audio device not found: {0}")]
    DeviceNotFound(String),

    /// Failed to get a usable device configuration
    #[error("Failed to get device config: {0}")]
    ConfigError(String),

    /// Failed to build the output stream
    #[error("Failed to build audio stream: {0}")]
    StreamBuildError(String),

    /// Failed to start the output stream
    #[error("Failed to start audio stream: {0}")]
    StreamPlayError(String),

    /// The time-stretch engine could not be set up
    #[error("Failed to initialize stretch engine: {0}")]
    EngineInit(String),

    /// The consumer worker could not be started
    #[error("Failed to start audio consumer: {0}")]
    ConsumerSpawn(String),

    /// Requested frequency is not usable
    #[error("Invalid audio frequency: {0}Hz")]
    InvalidFrequency(u32),
}

/// Result type for pipeline operations
pub type AudioResult<T> = Result<T, AudioError>;

/// Rejection of a single buffer submission
///
/// Never fatal: the consumer counts it and moves on.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SinkError {
    /// Every device slot is occupied
    #[error("Device buffer queue is full")]
    QueueFull,

    /// The device was stopped; no further submissions are accepted
    #[error("Device has been stopped")]
    Stopped,

    /// Backend-specific failure
    #[error("Device rejected buffer: {0}")]
    Backend(String),
}
