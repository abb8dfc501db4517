//! Error types for adi-core.

use thiserror::Error;

/// Core error types.
///
/// Every variant is a programming error: the caller broke a contract of the
/// API and the operation was refused rather than corrupting state.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("Unknown subscription token: {0}")]
    UnknownSubscriptionToken(u64),

    #[error("Invalid definition: {0}")]
    InvalidDefinition(String),
}

/// Result type alias for core operations.
pub type CoreResult<T> = std::result::Result<T, CoreError>;
