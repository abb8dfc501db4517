//! Data subscription handle.
//!
//! A `DataItem` is one live subscription to a `DataDefinition`. It holds the
//! latest image of the feed (records plus badness) and publishes a
//! correctness-changed event whenever it becomes usable, stops being usable,
//! or its badness changes.
//!
//! Only the service mutates an item, by applying transport changes. Consumers
//! read the result through `incubated`, `correctness_id` and `badness`.

use crate::handle::{DataItemHandle, KeyedList};
use crate::transport::FeedChange;
use adi_core::{
    Badness, BadnessReason, CoreResult, CorrectnessId, DataDefinition, DataRecord, EventHandler,
    MulticastEvent, RecordKey, SubscriptionToken,
};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace};

/// Unique identifier of a data item within one service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DataItemId(pub u64);

impl fmt::Display for DataItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "item-{}", self.0)
    }
}

/// Feed image: everything a new subscriber to the same stream inherits.
#[derive(Debug, Clone)]
pub(crate) struct FeedImage {
    badness: Badness,
    records: BTreeMap<RecordKey, DataRecord>,
    has_snapshot: bool,
}

impl FeedImage {
    pub(crate) fn with_badness(badness: Badness) -> Self {
        Self {
            badness,
            records: BTreeMap::new(),
            has_snapshot: false,
        }
    }

    fn incubated(&self) -> bool {
        self.has_snapshot && self.badness.correctness().is_usable()
    }

    fn reject(&mut self, text: &str) {
        self.badness = Badness::with_text(BadnessReason::Rejected, text);
        self.records.clear();
        self.has_snapshot = false;
    }

    /// Apply one transport change.
    fn apply(&mut self, change: &FeedChange) {
        if self.badness.is_rejected() {
            return;
        }

        match change {
            FeedChange::Status(badness) if badness.is_rejected() => self.reject(&badness.text),
            FeedChange::Status(badness) => {
                self.badness = badness.clone();
                // A snapshot only survives degradations that keep data usable.
                if !self.badness.correctness().is_usable() {
                    self.has_snapshot = false;
                }
            }
            FeedChange::Snapshot(records) => {
                self.records = records
                    .iter()
                    .map(|r| (r.key.clone(), r.clone()))
                    .collect();
                self.has_snapshot = true;
                self.badness = Badness::NOT_BAD;
            }
            FeedChange::Upsert(record) => {
                if self.has_snapshot {
                    self.records.insert(record.key.clone(), record.clone());
                } else {
                    trace!(key = %record.key, "Upsert before snapshot ignored");
                }
            }
            FeedChange::Remove(key) => {
                if self.has_snapshot {
                    self.records.remove(key);
                } else {
                    trace!(key = %key, "Remove before snapshot ignored");
                }
            }
            FeedChange::Rejected(text) => self.reject(text),
        }
    }
}

struct ItemState {
    image: FeedImage,
    torn_down: bool,
    last_changed: Option<DateTime<Utc>>,
}

/// Live subscription handle.
pub struct DataItem {
    id: DataItemId,
    definition: DataDefinition,
    state: Mutex<ItemState>,
    correctness_changed: MulticastEvent<()>,
}

impl DataItem {
    pub(crate) fn new(id: DataItemId, definition: DataDefinition, image: FeedImage) -> Self {
        Self {
            id,
            definition,
            state: Mutex::new(ItemState {
                image,
                torn_down: false,
                last_changed: None,
            }),
            correctness_changed: MulticastEvent::new(),
        }
    }

    pub fn id(&self) -> DataItemId {
        self.id
    }

    pub fn definition(&self) -> &DataDefinition {
        &self.definition
    }

    /// True exactly when a complete snapshot is held and the current
    /// badness keeps it usable.
    pub fn incubated(&self) -> bool {
        self.state.lock().image.incubated()
    }

    pub fn correctness_id(&self) -> CorrectnessId {
        self.state.lock().image.badness.correctness()
    }

    pub fn badness(&self) -> Badness {
        self.state.lock().image.badness.clone()
    }

    /// Rejection badness, if the subscription was refused.
    pub fn rejection(&self) -> Option<Badness> {
        let state = self.state.lock();
        state
            .image
            .badness
            .is_rejected()
            .then(|| state.image.badness.clone())
    }

    /// Whether the service has released this item.
    pub fn is_torn_down(&self) -> bool {
        self.state.lock().torn_down
    }

    /// Time of the last correctness change.
    pub fn last_changed(&self) -> Option<DateTime<Utc>> {
        self.state.lock().last_changed
    }

    /// Current records, in key order.
    pub fn records(&self) -> Vec<DataRecord> {
        self.state.lock().image.records.values().cloned().collect()
    }

    pub fn record(&self, key: &RecordKey) -> Option<DataRecord> {
        self.state.lock().image.records.get(key).cloned()
    }

    pub fn record_count(&self) -> usize {
        self.state.lock().image.records.len()
    }

    /// Listen for correctness changes.
    ///
    /// Listeners get no payload; they re-read `incubated` and
    /// `correctness_id` from the item.
    pub fn subscribe_correctness_changed(&self, handler: EventHandler<()>) -> SubscriptionToken {
        debug_assert!(
            !self.is_torn_down(),
            "subscribe_correctness_changed on torn down {}",
            self.id
        );
        self.correctness_changed.subscribe_arc(handler)
    }

    pub fn unsubscribe_correctness_changed(&self, token: SubscriptionToken) -> CoreResult<()> {
        self.correctness_changed.unsubscribe(token)
    }

    /// Number of correctness listeners.
    pub fn correctness_listener_count(&self) -> usize {
        self.correctness_changed.count()
    }

    pub(crate) fn image(&self) -> FeedImage {
        self.state.lock().image.clone()
    }

    /// Apply a transport change and publish if correctness changed.
    ///
    /// Returns whether the correctness-changed event fired.
    pub(crate) fn apply(&self, change: &FeedChange) -> bool {
        let changed = {
            let mut state = self.state.lock();
            if state.torn_down {
                return false;
            }

            let was_incubated = state.image.incubated();
            let old_badness = state.image.badness.clone();
            state.image.apply(change);

            let changed = was_incubated != state.image.incubated()
                || old_badness != state.image.badness;
            if changed {
                state.last_changed = Some(Utc::now());
                debug!(
                    item_id = %self.id,
                    definition = %self.definition,
                    badness = %state.image.badness,
                    incubated = state.image.incubated(),
                    "Data item correctness changed"
                );
            }
            changed
        };

        if changed {
            self.correctness_changed.publish(&());
        }
        changed
    }

    pub(crate) fn mark_torn_down(&self) {
        self.state.lock().torn_down = true;
    }
}

impl fmt::Debug for DataItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("DataItem")
            .field("id", &self.id)
            .field("definition", &self.definition)
            .field("badness", &state.image.badness)
            .field("incubated", &state.image.incubated())
            .field("torn_down", &state.torn_down)
            .finish()
    }
}

impl DataItemHandle for DataItem {
    fn incubated(&self) -> bool {
        DataItem::incubated(self)
    }

    fn rejection(&self) -> Option<Badness> {
        DataItem::rejection(self)
    }

    fn subscribe_correctness_changed(&self, handler: EventHandler<()>) -> SubscriptionToken {
        DataItem::subscribe_correctness_changed(self, handler)
    }

    fn unsubscribe_correctness_changed(&self, token: SubscriptionToken) -> CoreResult<()> {
        DataItem::unsubscribe_correctness_changed(self, token)
    }
}

impl KeyedList for DataItem {
    type Key = RecordKey;
    type Item = DataRecord;

    fn lookup(&self, key: &RecordKey) -> Option<DataRecord> {
        self.record(key)
    }
}

/// Shared handle type returned by the service.
pub type DataItemRef = Arc<DataItem>;
