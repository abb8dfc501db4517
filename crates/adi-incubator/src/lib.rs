//! Cancellable incubation of data subscriptions.
//!
//! Incubation is the wait between subscribing to a feed and its first
//! usable snapshot. This crate wraps that wait:
//! - `Incubator`: One current incubation per instance, superseded not queued
//! - `ListItemIncubator`: Incubate a list, then look one item up in it
//! - `Incubation`: Either the usable value now, or a future that settles
//!   with the value, with `Cancelled`, or with the rejection reason

pub mod error;
pub mod incubation;
pub mod incubator;
pub mod layered;

pub use error::{IncubatorError, IncubatorResult};
pub use incubation::{Incubation, IncubationFuture, Settlement};
pub use incubator::Incubator;
pub use layered::{ListItemIncubator, LookupFuture};
