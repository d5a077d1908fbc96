//! Raw data error types.

use thiserror::Error;

/// Result type for raw data operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Raw data error types.
#[derive(Error, Debug)]
pub enum Error {
    /// Meta data offsets or carried offsets are inconsistent.
    #[error("corrupt offsets: {0}")]
    CorruptOffsets(String),

    /// A word slice does not match the span it claims to cover.
    #[error("span covers {expected} words but {actual} were supplied")]
    SpanMismatch { expected: usize, actual: usize },

    /// Event building was asked to process a chunk without trigger words.
    #[error("no trigger data in chunk of {hits} hits")]
    NoTriggerData { hits: usize },

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Core library error.
    #[error("core error: {0}")]
    CoreError(#[from] monopix_core::Error),
}
