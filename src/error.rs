//! Error types for the output plugin

use thiserror::Error;

/// Main error type for the plugin
#[derive(Error, Debug)]
pub enum Error {
    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    #[error("Format error: {0}")]
    Format(#[from] FormatError),

    #[error("Operation error: {0}")]
    Operation(#[from] OperationError),

    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Config parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Server connection errors. Fatal to the current session.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    #[error("Server unreachable: {0}")]
    Unreachable(String),

    #[error("Connection failed: {0}")]
    Failed(String),

    #[error("Connection terminated")]
    Terminated,

    #[error("Event loop not running")]
    NotInitialized,
}

/// Format negotiation and stream creation errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FormatError {
    #[error("Unsupported bit depth: {0}")]
    UnsupportedBitDepth(u16),

    #[error("Invalid sample spec: {0}")]
    InvalidSpec(String),

    #[error("Server rejected format: {0}")]
    Rejected(String),
}

/// Failures of individual asynchronous requests.
///
/// These are reported and otherwise treated as no-ops; playback continues
/// while the stream is alive.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OperationError {
    #[error("No stream")]
    NoStream,

    #[error("Stream has no sink input index")]
    NoSinkInput,

    #[error("Volume control disabled")]
    Disabled,

    #[error("Request rejected: {0}")]
    Rejected(String),

    #[error("Operation failed: {0}")]
    Failed(String),

    #[error("Connection died while waiting: {0}")]
    Died(String),
}

/// Local audio device errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AudioError {
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Failed to open stream: {0}")]
    StreamError(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Stream thread failed: {0}")]
    Thread(String),
}

/// Result type alias for the plugin
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nested_errors_convert() {
        let err: Error = FormatError::UnsupportedBitDepth(12).into();
        assert!(matches!(err, Error::Format(FormatError::UnsupportedBitDepth(12))));
        assert_eq!(err.to_string(), "Format error: Unsupported bit depth: 12");

        let err: Error = ConnectionError::Failed("Connection refused".into()).into();
        assert!(err.to_string().contains("Connection refused"));
    }
}
