//! Core domain types for the ADI subscription engine.
//!
//! This crate provides the value types shared by every layer of the engine:
//! - `DataDefinition`: Immutable description of a requested live feed
//! - `CorrectnessId`, `Badness`: Health model of a live subscription
//! - `DataRecord`, `RecordKey`: Keyed payload rows delivered by a feed
//! - `MulticastEvent`: Subscribe-many, publish-to-all event channel
//! - `Cancellable`: Outcome that distinguishes cancellation from a value

pub mod cancellable;
pub mod correctness;
pub mod definition;
pub mod error;
pub mod multicast;
pub mod record;

pub use cancellable::Cancellable;
pub use correctness::{Badness, BadnessReason, CorrectnessId};
pub use definition::{AccountId, DataDefinition, FeedKind, InstrumentId};
pub use error::{CoreError, CoreResult};
pub use multicast::{EventHandler, MulticastEvent, SubscriptionToken};
pub use record::{DataRecord, RecordKey};
