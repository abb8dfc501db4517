//! Subscription service.
//!
//! Single entry point that turns a `DataDefinition` into a live `DataItem`.
//!
//! - Every `subscribe` call returns a fresh handle, synchronously
//! - Handles for equal definitions share one transport stream (refcounted)
//! - A handle joining a warm stream inherits its current image
//! - Transport events are drained after each `subscribe` and on every
//!   exercise tick, then fanned out to the handles of their stream
//! - Delivery is serialised: events reach a stream's handles in the order
//!   the transport reported them, and a handle never joins a stream while
//!   one of its events is half applied
//! - Teardown of the last handle of a stream closes the stream

use crate::data_item::{DataItem, DataItemId, DataItemRef, FeedImage};
use crate::error::{FeedError, FeedResult};
use crate::exerciser::{Exerciser, ExerciserStats};
use crate::handle::SubscriptionService;
use crate::transport::{FeedChange, FeedEvent, FeedSink, FeedStreamId, FeedTransport};
use adi_core::{Badness, BadnessReason, DataDefinition};
use parking_lot::{Mutex, ReentrantMutex};
use serde::{Deserialize, Serialize};
use std::cell::Cell;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};

/// Subscription service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Exercise tick interval (ms). Default: 100.
    #[serde(default = "default_exercise_interval_ms")]
    pub exercise_interval_ms: u64,
    /// Share one transport stream between handles of equal definitions.
    /// Default: true.
    #[serde(default = "default_share_streams")]
    pub share_streams: bool,
}

fn default_exercise_interval_ms() -> u64 {
    100
}

fn default_share_streams() -> bool {
    true
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            exercise_interval_ms: default_exercise_interval_ms(),
            share_streams: default_share_streams(),
        }
    }
}

/// Service statistics.
#[derive(Debug, Clone, Default)]
pub struct ServiceStats {
    pub active_items: usize,
    pub open_streams: usize,
    pub exerciser: ExerciserStats,
}

struct Stream {
    definition: DataDefinition,
    items: Vec<DataItemRef>,
    /// Whether the transport holds this stream (close required on release).
    open: bool,
}

#[derive(Default)]
struct Registry {
    streams: HashMap<FeedStreamId, Stream>,
    item_streams: HashMap<DataItemId, FeedStreamId>,
    shareable: HashMap<DataDefinition, FeedStreamId>,
    next_item_id: u64,
    next_stream_id: u64,
    shut_down: bool,
}

impl Registry {
    fn allocate_item_id(&mut self) -> DataItemId {
        self.next_item_id += 1;
        DataItemId(self.next_item_id)
    }

    fn allocate_stream_id(&mut self) -> FeedStreamId {
        self.next_stream_id += 1;
        FeedStreamId(self.next_stream_id)
    }

    /// Register `item` on a new stream.
    fn insert_stream(&mut self, item: &DataItemRef, open: bool) -> FeedStreamId {
        let stream_id = self.allocate_stream_id();
        self.streams.insert(
            stream_id,
            Stream {
                definition: item.definition().clone(),
                items: vec![Arc::clone(item)],
                open,
            },
        );
        self.item_streams.insert(item.id(), stream_id);
        stream_id
    }

    fn stream_items(&self, stream_id: FeedStreamId) -> Vec<DataItemRef> {
        self.streams
            .get(&stream_id)
            .map(|s| s.items.clone())
            .unwrap_or_default()
    }

    fn forget_shareable(&mut self, stream_id: FeedStreamId) {
        if let Some(stream) = self.streams.get(&stream_id) {
            if self.shareable.get(&stream.definition) == Some(&stream_id) {
                self.shareable.remove(&stream.definition);
            }
        }
    }
}

/// Outcome of the registry step of `subscribe`.
enum Placement {
    /// Joined an existing stream; nothing to open.
    Joined(DataItemRef),
    /// New stream that must be opened on the transport.
    Opening(DataItemRef, FeedStreamId),
    /// Refused without touching the transport.
    Refused(DataItemRef),
}

/// Clears the draining flag when a delivery pass ends, even by unwinding.
struct Draining<'a>(&'a Cell<bool>);

impl Drop for Draining<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

/// Subscription service over one transport.
pub struct AdiService {
    config: ServiceConfig,
    transport: Arc<dyn FeedTransport>,
    registry: Mutex<Registry>,
    events: Mutex<mpsc::UnboundedReceiver<FeedEvent>>,
    /// Held across joining and delivery. Reentrant so that correctness
    /// handlers may subscribe or exercise; the flag marks a delivery pass
    /// in progress on the holding thread.
    delivery: ReentrantMutex<Cell<bool>>,
    exerciser: Exerciser,
}

impl AdiService {
    /// Create a service; `build` receives the sink the transport reports into.
    pub fn new<F>(config: ServiceConfig, build: F) -> Arc<Self>
    where
        F: FnOnce(FeedSink) -> Arc<dyn FeedTransport>,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let transport = build(FeedSink::new(tx));
        let exerciser = Exerciser::new(Duration::from_millis(config.exercise_interval_ms));

        Arc::new(Self {
            config,
            transport,
            registry: Mutex::new(Registry::default()),
            events: Mutex::new(rx),
            delivery: ReentrantMutex::new(Cell::new(false)),
            exerciser,
        })
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Subscribe to `definition`.
    ///
    /// Always returns immediately. The handle starts unusable unless it
    /// joined a warm stream or the transport delivered a snapshot during
    /// `open`. A malformed definition or a failed open yields a rejected
    /// handle, which must still be unsubscribed.
    ///
    /// Called from a correctness handler, the events reported during `open`
    /// are delivered by the enclosing delivery pass once the handler returns.
    pub fn subscribe(&self, definition: &DataDefinition) -> DataItemRef {
        let delivery = self.delivery.lock();
        let placement = self.place(definition);

        let item = match placement {
            Placement::Joined(item) | Placement::Refused(item) => item,
            Placement::Opening(item, stream_id) => {
                self.open_stream(stream_id, definition);
                item
            }
        };

        // Deliver anything the transport reported synchronously.
        self.deliver(&delivery);
        item
    }

    fn place(&self, definition: &DataDefinition) -> Placement {
        let mut registry = self.registry.lock();
        let item_id = registry.allocate_item_id();

        let refusal = if registry.shut_down {
            Some("service shut down".to_string())
        } else {
            definition.validate().err().map(|e| e.to_string())
        };
        if let Some(text) = refusal {
            let image = FeedImage::with_badness(Badness::with_text(BadnessReason::Rejected, &text));
            let item = Arc::new(DataItem::new(item_id, definition.clone(), image));
            registry.insert_stream(&item, false);
            warn!(item_id = %item_id, definition = %definition, reason = %text, "Subscription refused");
            return Placement::Refused(item);
        }

        if self.config.share_streams {
            if let Some(&stream_id) = registry.shareable.get(definition) {
                if let Some(stream) = registry.streams.get_mut(&stream_id) {
                    let image = stream.items[0].image();
                    let item = Arc::new(DataItem::new(item_id, definition.clone(), image));
                    stream.items.push(Arc::clone(&item));
                    let refs = stream.items.len();
                    registry.item_streams.insert(item_id, stream_id);
                    debug!(
                        item_id = %item_id,
                        stream_id = %stream_id,
                        refs,
                        incubated = item.incubated(),
                        "Joined shared stream"
                    );
                    return Placement::Joined(item);
                }
            }
        }

        let image = FeedImage::with_badness(Badness::new(BadnessReason::Inactive));
        let item = Arc::new(DataItem::new(item_id, definition.clone(), image));
        let stream_id = registry.insert_stream(&item, true);
        if self.config.share_streams {
            registry.shareable.insert(definition.clone(), stream_id);
        }
        Placement::Opening(item, stream_id)
    }

    fn open_stream(&self, stream_id: FeedStreamId, definition: &DataDefinition) {
        let result = self.transport.open(stream_id, definition);

        let (items, change) = {
            let mut registry = self.registry.lock();
            let change = match &result {
                Ok(()) => FeedChange::Status(Badness::new(BadnessReason::Subscribing)),
                Err(e) => {
                    registry.forget_shareable(stream_id);
                    if let Some(stream) = registry.streams.get_mut(&stream_id) {
                        stream.open = false;
                    }
                    FeedChange::Rejected(e.to_string())
                }
            };
            (registry.stream_items(stream_id), change)
        };

        match &result {
            Ok(()) => info!(stream_id = %stream_id, definition = %definition, "Stream opened"),
            Err(e) => warn!(stream_id = %stream_id, definition = %definition, error = %e, "Stream open failed"),
        }

        for item in items {
            item.apply(&change);
        }
    }

    /// Release a handle.
    ///
    /// Closes the underlying stream when this was its last handle. A handle
    /// that is unknown or already released is refused.
    pub fn unsubscribe(&self, item: &DataItem) -> FeedResult<()> {
        let to_close = {
            let mut registry = self.registry.lock();

            let stream_id = registry.item_streams.get(&item.id()).copied();
            let position = stream_id.and_then(|id| {
                registry
                    .streams
                    .get(&id)
                    .and_then(|s| s.items.iter().position(|i| std::ptr::eq(&**i, item)))
            });
            let (Some(stream_id), Some(position)) = (stream_id, position) else {
                error!(item_id = %item.id(), definition = %item.definition(), "Unsubscribe of unknown or released data item");
                return Err(FeedError::NotSubscribed(item.id().0));
            };

            registry.item_streams.remove(&item.id());
            item.mark_torn_down();

            let now_empty = match registry.streams.get_mut(&stream_id) {
                Some(stream) => {
                    stream.items.remove(position);
                    stream.items.is_empty()
                }
                None => false,
            };

            debug!(item_id = %item.id(), stream_id = %stream_id, "Data item released");

            if now_empty {
                registry.forget_shareable(stream_id);
                registry
                    .streams
                    .remove(&stream_id)
                    .filter(|s| s.open)
                    .map(|_| stream_id)
            } else {
                None
            }
        };

        if let Some(stream_id) = to_close {
            match self.transport.close(stream_id) {
                Ok(()) => info!(stream_id = %stream_id, "Stream closed"),
                Err(e) => warn!(stream_id = %stream_id, error = %e, "Stream close failed"),
            }
        }
        Ok(())
    }

    /// One maintenance pass: transport upkeep, then event delivery.
    pub fn exercise(&self) {
        self.transport.exercise();
        self.drain_events();
    }

    /// Deliver all queued transport events.
    ///
    /// Returns the number of events processed. Returns 0 when called from
    /// inside a delivery pass, which goes on to deliver whatever was queued
    /// meanwhile.
    pub fn drain_events(&self) -> usize {
        let delivery = self.delivery.lock();
        self.deliver(&delivery)
    }

    /// Dispatch queued events one by one until the queue is empty.
    fn deliver(&self, draining: &Cell<bool>) -> usize {
        if draining.replace(true) {
            return 0;
        }
        let _draining = Draining(draining);

        let mut count = 0;
        loop {
            let next = self.events.lock().try_recv().ok();
            let Some(event) = next else {
                break;
            };
            self.dispatch(event);
            count += 1;
        }
        if count > 0 {
            trace!(count, "Feed events dispatched");
        }
        count
    }

    fn dispatch(&self, event: FeedEvent) {
        let items = {
            let mut registry = self.registry.lock();
            let terminal = match &event.change {
                FeedChange::Rejected(_) => true,
                FeedChange::Status(badness) => badness.is_rejected(),
                _ => false,
            };
            if terminal {
                // Later subscribers get a fresh attempt.
                registry.forget_shareable(event.stream);
            }
            registry.stream_items(event.stream)
        };

        if items.is_empty() {
            trace!(stream_id = %event.stream, "Event for released stream dropped");
            return;
        }

        for item in items {
            item.apply(&event.change);
        }
    }

    /// Drive `exercise` from the periodic exerciser.
    pub fn start(self: &Arc<Self>) -> FeedResult<()> {
        if self.is_shut_down() {
            return Err(FeedError::ShutDown);
        }

        let service = Arc::downgrade(self);
        self.exerciser.run(move |_tick| {
            if let Some(service) = service.upgrade() {
                service.exercise();
            }
        })
    }

    /// Stop the periodic exerciser. Subscriptions stay alive.
    pub fn stop(&self) {
        self.exerciser.stop();
    }

    /// Stop exercising, close every stream and tear down every handle.
    pub fn shutdown(&self) {
        self.stop();

        let streams: Vec<(FeedStreamId, Stream)> = {
            let mut registry = self.registry.lock();
            if registry.shut_down {
                return;
            }
            registry.shut_down = true;
            registry.item_streams.clear();
            registry.shareable.clear();
            registry.streams.drain().collect()
        };

        let mut closed = 0usize;
        for (stream_id, stream) in streams {
            for item in &stream.items {
                item.mark_torn_down();
            }
            if stream.open {
                if let Err(e) = self.transport.close(stream_id) {
                    warn!(stream_id = %stream_id, error = %e, "Stream close failed during shutdown");
                }
                closed += 1;
            }
        }
        info!(closed, "Subscription service shut down");
    }

    pub fn is_shut_down(&self) -> bool {
        self.registry.lock().shut_down
    }

    pub fn stats(&self) -> ServiceStats {
        let (active_items, open_streams) = {
            let registry = self.registry.lock();
            (
                registry.item_streams.len(),
                registry.streams.values().filter(|s| s.open).count(),
            )
        };
        ServiceStats {
            active_items,
            open_streams,
            exerciser: self.exerciser.stats(),
        }
    }
}

impl SubscriptionService for AdiService {
    type Handle = DataItemRef;

    fn subscribe(&self, definition: &DataDefinition) -> DataItemRef {
        AdiService::subscribe(self, definition)
    }

    fn unsubscribe(&self, handle: &DataItemRef) -> FeedResult<()> {
        AdiService::unsubscribe(self, handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockFeedTransport;
    use adi_core::{AccountId, CorrectnessId, DataRecord};
    use mockall::predicate::eq;

    fn service_with(mock: MockFeedTransport, config: ServiceConfig) -> Arc<AdiService> {
        AdiService::new(config, move |_sink| Arc::new(mock))
    }

    #[test]
    fn test_default_config() {
        let config = ServiceConfig::default();
        assert_eq!(config.exercise_interval_ms, 100);
        assert!(config.share_streams);
    }

    #[test]
    fn test_config_serde_defaults() {
        let config: ServiceConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.exercise_interval_ms, 100);
        assert!(config.share_streams);
    }

    #[test]
    fn test_subscribe_opens_and_unsubscribe_closes() {
        let mut mock = MockFeedTransport::new();
        mock.expect_open()
            .with(eq(FeedStreamId(1)), eq(DataDefinition::BrokerageAccounts))
            .times(1)
            .returning(|_, _| Ok(()));
        mock.expect_close()
            .with(eq(FeedStreamId(1)))
            .times(1)
            .returning(|_| Ok(()));

        let service = service_with(mock, ServiceConfig::default());
        let item = service.subscribe(&DataDefinition::BrokerageAccounts);

        assert!(!item.incubated());
        assert_eq!(item.badness().reason, BadnessReason::Subscribing);
        assert_eq!(service.stats().active_items, 1);

        service.unsubscribe(&item).unwrap();
        assert!(item.is_torn_down());
        assert_eq!(service.stats().open_streams, 0);
    }

    #[test]
    fn test_double_unsubscribe_is_refused() {
        let mut mock = MockFeedTransport::new();
        mock.expect_open().returning(|_, _| Ok(()));
        mock.expect_close().times(1).returning(|_| Ok(()));

        let service = service_with(mock, ServiceConfig::default());
        let item = service.subscribe(&DataDefinition::BrokerageAccounts);

        service.unsubscribe(&item).unwrap();
        assert_eq!(
            service.unsubscribe(&item),
            Err(FeedError::NotSubscribed(item.id().0))
        );
        assert_eq!(service.stats().active_items, 0);
    }

    #[test]
    fn test_open_failure_rejects_handle() {
        let mut mock = MockFeedTransport::new();
        mock.expect_open()
            .returning(|_, _| Err(FeedError::OpenFailed("gateway offline".to_string())));
        mock.expect_close().never();

        let service = service_with(mock, ServiceConfig::default());
        let item = service.subscribe(&DataDefinition::BrokerageAccounts);

        let rejection = item.rejection().unwrap();
        assert!(rejection.text.contains("gateway offline"));
        assert_eq!(item.correctness_id(), CorrectnessId::Error);

        // A never-usable handle is still released normally, without a close.
        service.unsubscribe(&item).unwrap();
    }

    #[test]
    fn test_malformed_definition_never_reaches_transport() {
        let mut mock = MockFeedTransport::new();
        mock.expect_open().never();
        mock.expect_close().never();

        let service = service_with(mock, ServiceConfig::default());
        let item = service.subscribe(&DataDefinition::orders(AccountId::new("")));

        assert!(item.rejection().is_some());
        service.unsubscribe(&item).unwrap();
    }

    #[test]
    fn test_shared_stream_opened_once() {
        let mut mock = MockFeedTransport::new();
        mock.expect_open().times(1).returning(|_, _| Ok(()));
        mock.expect_close().times(1).returning(|_| Ok(()));

        let service = service_with(mock, ServiceConfig::default());
        let first = service.subscribe(&DataDefinition::BrokerageAccounts);
        let second = service.subscribe(&DataDefinition::BrokerageAccounts);

        assert_ne!(first.id(), second.id());
        assert_eq!(service.stats().open_streams, 1);

        service.unsubscribe(&first).unwrap();
        assert!(!second.is_torn_down());
        service.unsubscribe(&second).unwrap();
    }

    #[test]
    fn test_unshared_streams() {
        let mut mock = MockFeedTransport::new();
        mock.expect_open().times(2).returning(|_, _| Ok(()));
        mock.expect_close().times(2).returning(|_| Ok(()));

        let config = ServiceConfig {
            share_streams: false,
            ..Default::default()
        };
        let service = service_with(mock, config);
        let first = service.subscribe(&DataDefinition::BrokerageAccounts);
        let second = service.subscribe(&DataDefinition::BrokerageAccounts);

        assert_eq!(service.stats().open_streams, 2);
        service.unsubscribe(&first).unwrap();
        service.unsubscribe(&second).unwrap();
    }

    #[test]
    fn test_events_reach_every_shared_item() {
        let sink_slot: Arc<Mutex<Option<FeedSink>>> = Arc::new(Mutex::new(None));
        let mut mock = MockFeedTransport::new();
        mock.expect_open().returning(|_, _| Ok(()));
        mock.expect_exercise().returning(|| ());

        let slot = Arc::clone(&sink_slot);
        let service = AdiService::new(ServiceConfig::default(), move |sink| {
            *slot.lock() = Some(sink);
            Arc::new(mock)
        });

        let first = service.subscribe(&DataDefinition::BrokerageAccounts);
        let second = service.subscribe(&DataDefinition::BrokerageAccounts);

        let sink = sink_slot.lock().clone().unwrap();
        sink.send(
            FeedStreamId(1),
            FeedChange::Snapshot(vec![DataRecord::new("A-1")]),
        );
        assert!(!first.incubated());

        service.exercise();
        assert!(first.incubated());
        assert!(second.incubated());
        assert_eq!(second.record_count(), 1);
    }

    #[test]
    fn test_shutdown_tears_down_everything() {
        let mut mock = MockFeedTransport::new();
        mock.expect_open().times(2).returning(|_, _| Ok(()));
        mock.expect_close().times(2).returning(|_| Ok(()));

        let service = service_with(mock, ServiceConfig::default());
        let accounts = service.subscribe(&DataDefinition::BrokerageAccounts);
        let orders = service.subscribe(&DataDefinition::orders(AccountId::new("A-1")));

        service.shutdown();
        assert!(accounts.is_torn_down());
        assert!(orders.is_torn_down());
        assert!(service.is_shut_down());

        // Late subscribers are refused, not failed.
        let late = service.subscribe(&DataDefinition::BrokerageAccounts);
        assert!(late.rejection().is_some());
        assert_eq!(service.start(), Err(FeedError::ShutDown));
    }
}
