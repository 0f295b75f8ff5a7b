//! Error type of the `ni-mio` front end.
//!
//! `AppError` collects what can go wrong above the driver: loading and
//! validating configuration, writing output, and driver errors passed up
//! unchanged. The binary wraps it in `anyhow` for context at the top.

use comedi_core::ComediError;
use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, AppError>;

/// Errors of the front end.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    #[error("Configuration validation error: {0}")]
    Validation(String),

    #[error("Failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Driver error: {0}")]
    Driver(#[from] ComediError),

    #[error("Acquisition ended early: {0}")]
    Acquisition(String),

    #[error("Failed to initialize logging: {0}")]
    Logging(String),
}

impl AppError {
    /// Errno a C caller of the driver would have seen, when the error came
    /// from the driver.
    pub fn errno(&self) -> Option<i32> {
        match self {
            Self::Driver(e) => Some(e.errno()),
            _ => None,
        }
    }
}
