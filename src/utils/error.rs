//! Error types for SyncPlayer
//!
//! This module defines the error taxonomy used throughout the playback engine.
//! We use thiserror for convenient error type definitions and anyhow for
//! application-level error handling in the binary.

use thiserror::Error;

/// Main error type for SyncPlayer
#[derive(Error, Debug)]
pub enum SyncPlayerError {
    /// Media could not be opened (bad path, unsupported container)
    #[error("Open error: {0}")]
    Open(String),

    /// A single frame failed to decode
    #[error("Decode error: {0}")]
    Decode(String),

    /// Seek failed (decode failure while positioning)
    #[error("Seek error: {0}")]
    Seek(String),

    /// Audio device could not be opened or driven
    #[error("Audio device error: {0}")]
    AudioDevice(String),

    /// Decoding kept failing and the session was ended
    #[error("Playback failed: {0}")]
    PlaybackFailed(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// File I/O errors
    #[error("File error: {0}")]
    FileIO(#[from] std::io::Error),

    /// Invalid input errors
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Command not valid in the current playback state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Generic error for unexpected situations
    #[error("Internal error: {0}")]
    Internal(String),
}

#[cfg(feature = "ffmpeg")]
impl From<ffmpeg_next::Error> for SyncPlayerError {
    fn from(err: ffmpeg_next::Error) -> Self {
        SyncPlayerError::Decode(format!("FFmpeg error: {}", err))
    }
}

impl SyncPlayerError {
    /// Create a decode error from string
    pub fn decode_error<S: Into<String>>(msg: S) -> Self {
        SyncPlayerError::Decode(msg.into())
    }

    /// Whether the session can continue after this error
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            SyncPlayerError::Decode(_) | SyncPlayerError::Seek(_) | SyncPlayerError::AudioDevice(_)
        )
    }
}

/// Convenience type alias for Results in SyncPlayer
pub type Result<T> = std::result::Result<T, SyncPlayerError>;

/// Extension trait for converting other errors to SyncPlayerError
pub trait IntoPlayerError<T> {
    /// Convert this error into a SyncPlayerError with the given context
    fn open_err(self, context: &str) -> Result<T>;
    fn decoder_err(self, context: &str) -> Result<T>;
    fn audio_err(self, context: &str) -> Result<T>;
    fn config_err(self, context: &str) -> Result<T>;
}

impl<T, E: std::fmt::Display> IntoPlayerError<T> for std::result::Result<T, E> {
    fn open_err(self, context: &str) -> Result<T> {
        self.map_err(|e| SyncPlayerError::Open(format!("{}: {}", context, e)))
    }

    fn decoder_err(self, context: &str) -> Result<T> {
        self.map_err(|e| SyncPlayerError::Decode(format!("{}: {}", context, e)))
    }

    fn audio_err(self, context: &str) -> Result<T> {
        self.map_err(|e| SyncPlayerError::AudioDevice(format!("{}: {}", context, e)))
    }

    fn config_err(self, context: &str) -> Result<T> {
        self.map_err(|e| SyncPlayerError::Config(format!("{}: {}", context, e)))
    }
}

/// Helper macro for creating internal errors with file and line information
#[macro_export]
macro_rules! internal_error {
    ($msg:expr) => {
        $crate::utils::error::SyncPlayerError::Internal(
            format!("{} at {}:{}", $msg, file!(), line!())
        )
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::utils::error::SyncPlayerError::Internal(
            format!("{} at {}:{}", format!($fmt, $($arg)*), file!(), line!())
        )
    };
}
