use std::path::PathBuf;

use thiserror::Error;

/// Central error type for the stem-to-midi crate.
#[derive(Debug, Error)]
pub enum ConvertError {
    // Generic fallback (wraps anyhow)
    #[error("{0}")]
    Anyhow(#[from] anyhow::Error),

    // Domain-specific variants
    #[error("Input directory not readable: {}", path.display())]
    InputDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Config error in {}: {message}", path.display())]
    Config { path: PathBuf, message: String },

    #[error("Separation failed: {0}")]
    Separation(String),

    #[error("MIDI error in {}: {message}", path.display())]
    Midi { path: PathBuf, message: String },

    #[error("Audio error: {0}")]
    Audio(String),

    #[error("Model error: {0}")]
    Model(String),

    #[error("Manifest error: {0}")]
    Manifest(String),

    #[error("Checksum mismatch for {}", path.display())]
    Checksum { path: PathBuf },

    #[error("Cache dir not available")]
    CacheDirUnavailable,
}

// --- Implement From conversions for common errors ---
impl From<std::io::Error> for ConvertError {
    fn from(e: std::io::Error) -> Self {
        ConvertError::Anyhow(e.into())
    }
}

impl From<hound::Error> for ConvertError {
    fn from(e: hound::Error) -> Self {
        ConvertError::Audio(e.to_string())
    }
}

impl From<symphonia::core::errors::Error> for ConvertError {
    fn from(e: symphonia::core::errors::Error) -> Self {
        ConvertError::Audio(e.to_string())
    }
}

impl From<reqwest::Error> for ConvertError {
    fn from(e: reqwest::Error) -> Self {
        ConvertError::Anyhow(e.into())
    }
}

impl From<ndarray::ShapeError> for ConvertError {
    fn from(e: ndarray::ShapeError) -> Self {
        ConvertError::Anyhow(e.into())
    }
}

pub type Result<T> = std::result::Result<T, ConvertError>;
