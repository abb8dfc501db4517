//! Data subscription handles and subscription service for the ADI engine.
//!
//! Provides the live side of the engine:
//! - `DataItem`: One live subscription with a correctness state machine
//! - `AdiService`: Subscribe/unsubscribe entry point with shared streams
//! - `Exerciser`: Reentrancy-guarded periodic maintenance tick
//! - `FeedTransport`: Seam to the gateway transport

pub mod data_item;
pub mod error;
pub mod exerciser;
pub mod handle;
pub mod service;
#[cfg(any(test, feature = "testkit"))]
pub mod testkit;
pub mod transport;

pub use data_item::{DataItem, DataItemId, DataItemRef};
pub use error::{FeedError, FeedResult};
pub use exerciser::{ExerciseTick, Exerciser, ExerciserStats, DEFAULT_EXERCISE_INTERVAL};
pub use handle::{DataItemHandle, KeyedList, SubscriptionService};
pub use service::{AdiService, ServiceConfig, ServiceStats};
pub use transport::{FeedChange, FeedEvent, FeedSink, FeedStreamId, FeedTransport};
