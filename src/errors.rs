use thiserror::Error;

/// Error type shared by every stage of the recording pipeline.
///
/// Contract violations between the encoder and the muxer are not represented
/// here: those abort through `assert_invariant!`.
#[derive(Debug, Error)]
pub enum ReelError {
    #[error("Encoding error: {0}")]
    EncodingError(String),
    #[error("Muxing error: {0}")]
    MuxingError(String),
    #[error("IO error: {0}")]
    IoError(String),
    #[error("Audio error: {0}")]
    AudioError(String),
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("Invalid music schedule: {0}")]
    InvalidSchedule(String),
    #[error("Invalid recorder state: {0}")]
    InvalidState(String),
}

impl From<std::io::Error> for ReelError {
    fn from(err: std::io::Error) -> Self {
        ReelError::IoError(err.to_string())
    }
}
