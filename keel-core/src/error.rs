//! Error types for the Keel core crate

use thiserror::Error;

/// Result type alias for core operations
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors raised while loading specifications and credentials
#[derive(Debug, Error)]
pub enum CoreError {
    /// Document is not valid JSON or does not match the expected shape
    #[error("Failed to parse document: {0}")]
    Parse(#[from] serde_json::Error),

    /// A registry credential entry could not be decoded
    #[error("Invalid credentials for registry {registry}: {reason}")]
    InvalidCredentials {
        /// Registry address the entry is keyed by
        registry: String,
        /// What was wrong with the entry
        reason: String,
    },
}
