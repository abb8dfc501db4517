//! Incubator error types.

use adi_core::CoreError;
use adi_feed::FeedError;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IncubatorError {
    #[error("Incubator has been finalised")]
    Finalised,

    #[error("No subscription initiated")]
    NotInitiated,

    #[error("Subscription rejected: {0}")]
    Rejected(String),

    #[error("Feed error: {0}")]
    Feed(#[from] FeedError),

    #[error("Core error: {0}")]
    Core(#[from] CoreError),
}

pub type IncubatorResult<T> = Result<T, IncubatorError>;
