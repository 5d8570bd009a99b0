//! # Error Types
//!
//! Custom error types for Moonraker using `thiserror`.
//!
//! Protocol noise (bad checksums, malformed rotor replies) is deliberately
//! absent: it is dropped where it is detected and never becomes an error.

use thiserror::Error;

/// Main error type for Moonraker
#[derive(Debug, Error)]
pub enum MoonrakerError {
    /// Configuration errors (parse failures and out-of-range values)
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// Serial device path does not exist
    #[error("Serial device not found: {0}")]
    DeviceNotFound(String),

    /// Serial transport failures during a session
    #[error("Serial error: {0}")]
    Serial(String),

    /// Least-squares ellipsoid fit could not be solved
    #[error("Calibration fit is singular: {0}")]
    SingularFit(String),

    /// Persisted calibration or capture file is malformed
    #[error("Calibration file error: {0}")]
    CalibrationFile(String),

    /// TOML encoding errors
    #[error("Serialization error: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// A supervised background task terminated with an error
    #[error("{task} task failed: {reason}")]
    TaskFailed { task: String, reason: String },

    /// An operation was cancelled through its abort handle
    #[error("Operation aborted")]
    Aborted,

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Moonraker
pub type Result<T> = std::result::Result<T, MoonrakerError>;
