//! Error types for the replay engine

use thiserror::Error;

/// Main error type for the application
#[derive(Error, Debug)]
pub enum Error {
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("Playback error: {0}")]
    Playback(#[from] PlaybackError),

    #[error("Sink error: {0}")]
    Sink(#[from] SinkError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Wire codec errors
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Stream corruption at byte offset {offset}: {reason}")]
    StreamCorruption { offset: u64, reason: String },

    #[error("Invalid field value: {0}")]
    InvalidField(String),

    #[error("Record too large: {0} byte payload")]
    PayloadTooLarge(usize),
}

/// Audio decode/resample errors
#[derive(Error, Debug)]
pub enum AudioError {
    #[error("Decoder initialization failed: {0}")]
    DecoderInit(String),

    #[error("Decoding failed: {0}")]
    DecodingFailed(String),

    #[error("Unsupported channel count: {0}")]
    UnsupportedChannels(u16),

    #[error("Unsupported sample rate: {0}")]
    UnsupportedRate(u32),
}

/// Playback orchestration errors
#[derive(Error, Debug)]
pub enum PlaybackError {
    #[error("No packets to play")]
    EmptySession,

    #[error("Seek index {index} out of range (len {len})")]
    SeekOutOfRange { index: usize, len: usize },

    #[error("Invalid state for operation: {0}")]
    InvalidState(String),

    #[error("Worker did not stop within grace period")]
    StopTimeout,
}

/// Audio sink errors
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Failed to open stream: {0}")]
    StreamError(String),

    #[error("Write to sink failed: {0}")]
    WriteFailed(String),
}

/// Result type alias for the application
pub type Result<T> = std::result::Result<T, Error>;
