//! Error types for the Keel engine

use thiserror::Error;

use crate::runtime::RuntimeError;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors surfaced by engine operations
///
/// Failures of Create/Start/Wait/Tail abort the owning step; failures of
/// Setup/Destroy concern the whole run.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Image reference cannot be parsed under the reference grammar
    #[error("Invalid image reference {reference:?}: {reason}")]
    InvalidReference {
        /// The reference as written in the step
        reference: String,
        /// Which grammar rule it violates
        reason: String,
    },

    /// Step has no container configuration
    #[error("Step {0} is missing docker configuration")]
    MissingConfiguration(String),

    /// Registry pull failed
    #[error("Failed to pull image {image}: {source}")]
    PullFailure {
        /// Canonical reference that was pulled
        image: String,
        #[source]
        source: RuntimeError,
    },

    /// Image is still absent after the one-shot pull-and-recreate recovery,
    /// or recovery was not permitted by the pull policy
    #[error("Image not found: {0}")]
    ImageNotFound(String),

    /// Archive for file injection could not be built
    #[error("Failed to build archive: {0}")]
    Archive(#[from] std::io::Error),

    /// Any other container runtime failure, propagated untouched
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

impl EngineError {
    pub(crate) fn invalid_reference(reference: &str, reason: impl Into<String>) -> Self {
        Self::InvalidReference {
            reference: reference.to_string(),
            reason: reason.into(),
        }
    }
}
