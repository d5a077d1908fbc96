//! I/O error types.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for I/O operations.
pub type Result<T> = std::result::Result<T, Error>;

/// I/O error types.
#[derive(Error, Debug)]
pub enum Error {
    /// File I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An input file does not exist.
    #[error("file not found: {}", .0.display())]
    MissingFile(PathBuf),

    /// Invalid file format.
    #[error("invalid file format: {0}")]
    InvalidFormat(String),

    /// Malformed run description.
    #[error("run description error: {0}")]
    Json(#[from] serde_json::Error),

    /// Raw data interpretation error.
    #[error("raw data error: {0}")]
    RawError(#[from] monopix_raw::Error),

    /// Core library error.
    #[error("core error: {0}")]
    CoreError(#[from] monopix_core::Error),

    /// HDF5 library error.
    #[cfg(feature = "hdf5")]
    #[error("HDF5 error: {0}")]
    Hdf5(#[from] hdf5::Error),
}

/// Maps `NotFound` to [`Error::MissingFile`] so callers can name the path.
pub(crate) fn open_error(err: std::io::Error, path: &std::path::Path) -> Error {
    if err.kind() == std::io::ErrorKind::NotFound {
        Error::MissingFile(path.to_path_buf())
    } else {
        Error::Io(err)
    }
}
