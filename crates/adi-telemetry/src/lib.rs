//! Prometheus metrics and structured logging for the ADI engine.
//!
//! - Structured logging with tracing, JSON in production
//! - Prometheus gauges and counters for subscriptions, exercise ticks and
//!   incubation outcomes

pub mod error;
pub mod logging;
pub mod metrics;

pub use error::{TelemetryError, TelemetryResult};
pub use logging::init_logging;
pub use metrics::{IncubationOutcome, Metrics};
