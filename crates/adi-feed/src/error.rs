//! Feed error types.

use adi_core::CoreError;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FeedError {
    #[error("Transport open failed: {0}")]
    OpenFailed(String),

    #[error("Transport close failed: {0}")]
    CloseFailed(String),

    #[error("Data item {0} is not subscribed")]
    NotSubscribed(u64),

    #[error("Exerciser is already running")]
    ExerciserAlreadyRunning,

    #[error("Service has been shut down")]
    ShutDown,

    #[error("Core error: {0}")]
    Core(#[from] CoreError),
}

pub type FeedResult<T> = Result<T, FeedError>;
