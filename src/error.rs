//! Error types shared by the cache, loaders and thumbnail pool.

use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("Failed to decode '{path}': {message}")]
    Decode { path: PathBuf, message: String },

    #[error("Unsupported format: {path}")]
    UnsupportedFormat { path: PathBuf },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Slot index {index} out of range for collection of {len}")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("Image handle used outside of its owning context")]
    WrongContext,

    #[error("Loader channel disconnected")]
    Disconnected,
}

impl LoadError {
    /// Flatten an `anyhow` chain into a decode failure for `path`.
    pub fn decode(path: &Path, err: anyhow::Error) -> Self {
        Self::Decode {
            path: path.to_path_buf(),
            message: format!("{:#}", err),
        }
    }

    pub fn is_out_of_range(&self) -> bool {
        matches!(self, Self::IndexOutOfRange { .. })
    }
}

pub type Result<T, E = LoadError> = std::result::Result<T, E>;
