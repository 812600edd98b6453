//! Error types for the call recorder

use std::path::PathBuf;
use thiserror::Error;

/// Result type for recorder operations
pub type RecorderResult<T> = Result<T, RecorderError>;

/// Errors that can occur while recording a call
#[derive(Debug, Error)]
pub enum RecorderError {
    /// Filesystem error while preparing the records folder
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// WAV encoding error
    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),

    /// Samples were written with no recording in progress
    #[error("No recording in progress")]
    NotRecording,
}

impl RecorderError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
