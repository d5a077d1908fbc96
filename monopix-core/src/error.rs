//! Error types for monopix-core.

use thiserror::Error;

/// Result type alias for monopix operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for monopix operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Pixel address outside the matrix.
    #[error("invalid pixel coordinate: ({col}, {row})")]
    InvalidCoordinate { col: u16, row: u16 },

    /// Parallel columns or arrays disagree in length.
    #[error("length mismatch for {what}: expected {expected}, got {actual}")]
    LengthMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    /// Configuration error.
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// Charge calibration error.
    #[error("calibration error: {0}")]
    CalibrationError(String),
}
