//! Seams between the subscription service and its consumers.
//!
//! Incubators are generic over these traits so that any handle type with a
//! usable flag and a correctness-changed event can be incubated.

use adi_core::{Badness, CoreResult, DataDefinition, EventHandler, SubscriptionToken};
use std::sync::Arc;

use crate::error::FeedResult;

/// Handle whose usability can be watched.
pub trait DataItemHandle: Send + Sync {
    /// Whether the handle currently holds usable data.
    fn incubated(&self) -> bool;

    /// Terminal rejection, if the subscription was refused.
    fn rejection(&self) -> Option<Badness>;

    fn subscribe_correctness_changed(&self, handler: EventHandler<()>) -> SubscriptionToken;

    fn unsubscribe_correctness_changed(&self, token: SubscriptionToken) -> CoreResult<()>;
}

impl<T: DataItemHandle + ?Sized> DataItemHandle for Arc<T> {
    fn incubated(&self) -> bool {
        (**self).incubated()
    }

    fn rejection(&self) -> Option<Badness> {
        (**self).rejection()
    }

    fn subscribe_correctness_changed(&self, handler: EventHandler<()>) -> SubscriptionToken {
        (**self).subscribe_correctness_changed(handler)
    }

    fn unsubscribe_correctness_changed(&self, token: SubscriptionToken) -> CoreResult<()> {
        (**self).unsubscribe_correctness_changed(token)
    }
}

/// Handle to a keyed list, supporting synchronous lookup once usable.
pub trait KeyedList {
    type Key;
    type Item;

    fn lookup(&self, key: &Self::Key) -> Option<Self::Item>;
}

impl<T: KeyedList + ?Sized> KeyedList for Arc<T> {
    type Key = T::Key;
    type Item = T::Item;

    fn lookup(&self, key: &Self::Key) -> Option<Self::Item> {
        (**self).lookup(key)
    }
}

/// Turns definitions into handles and releases them.
pub trait SubscriptionService: Send + Sync {
    type Handle: DataItemHandle + Clone + 'static;

    /// Subscribe to `definition`. Never blocks; the handle starts unusable
    /// unless the feed is already warm.
    fn subscribe(&self, definition: &DataDefinition) -> Self::Handle;

    /// Release a handle. Releasing a handle twice is refused.
    fn unsubscribe(&self, handle: &Self::Handle) -> FeedResult<()>;
}
