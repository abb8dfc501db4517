//! Application error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Feed error: {0}")]
    Feed(#[from] adi_feed::FeedError),

    #[error("Incubator error: {0}")]
    Incubator(#[from] adi_incubator::IncubatorError),

    #[error("Telemetry error: {0}")]
    Telemetry(#[from] adi_telemetry::TelemetryError),
}

pub type AppResult<T> = Result<T, AppError>;
