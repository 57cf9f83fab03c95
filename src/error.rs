//! Error types for the Tollgate governance layer.

use thiserror::Error;

use crate::store::StoreError;

/// Main error type for Tollgate operations.
#[derive(Error, Debug)]
pub enum TollgateError {
    /// Configuration-related errors (unknown tier, invalid policy).
    ///
    /// These are fatal at startup and never produced on the request path.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Counter store errors
    #[error("Counter store error: {0}")]
    Store(#[from] StoreError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Tollgate operations.
pub type Result<T> = std::result::Result<T, TollgateError>;
