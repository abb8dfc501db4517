//! Incubation behaviour through the public API.
//!
//! Runs incubators against a real `AdiService` over the manual transport:
//! - Fast path and ownership transfer
//! - Supersession and single resolution
//! - Cancellation and teardown of pending futures
//! - Layered list lookups

use adi_core::{AccountId, Cancellable, DataDefinition, DataRecord, MulticastEvent, RecordKey};
use adi_feed::testkit::ManualTransport;
use adi_feed::{AdiService, FeedError, ServiceConfig};
use adi_incubator::{Incubation, Incubator, IncubatorError, ListItemIncubator};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn accounts() -> Vec<DataRecord> {
    vec![
        DataRecord::new("A-1").with_field("name", "Main"),
        DataRecord::new("A-2").with_field("name", "Hedge"),
    ]
}

fn setup() -> (Arc<ManualTransport>, Arc<AdiService>) {
    let transport = ManualTransport::new();
    let service = transport.service(ServiceConfig::default());
    (transport, service)
}

#[test]
fn test_warm_feed_skips_the_future() {
    let (transport, service) = setup();
    transport.warm(DataDefinition::BrokerageAccounts, accounts());
    let incubator = Incubator::new(Arc::clone(&service));

    let handle = match incubator
        .incubate_subscribe(&DataDefinition::BrokerageAccounts)
        .unwrap()
    {
        Incubation::Ready(handle) => handle,
        Incubation::Pending(_) => panic!("warm feed must resolve synchronously"),
    };

    assert!(handle.incubated());
    service.unsubscribe(&handle).unwrap();
    assert_eq!(transport.open_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_list_handle_resolves_exactly_once() {
    let (transport, service) = setup();
    service.start().unwrap();
    let incubator = Incubator::new(Arc::clone(&service));

    let handle = incubator
        .initiate_subscribe_incubation(&DataDefinition::BrokerageAccounts)
        .unwrap();
    assert!(!handle.incubated());

    let future = incubator
        .initiated_subscription_or_future()
        .and_then(Incubation::pending)
        .unwrap();

    transport.complete(&DataDefinition::BrokerageAccounts, accounts());
    let resolved = match tokio::time::timeout(Duration::from_secs(1), future).await {
        Ok(Ok(Cancellable::Resolved(resolved))) => resolved,
        other => panic!("expected resolution, got {other:?}"),
    };

    assert!(Arc::ptr_eq(&resolved, &handle));
    assert!(incubator.initiated_subscription_or_future().is_none());
    assert_eq!(handle.correctness_listener_count(), 0);

    service.unsubscribe(&resolved).unwrap();
    service.shutdown();
}

#[tokio::test]
async fn test_superseded_futures_cancel_in_order() {
    let (transport, service) = setup();
    let incubator = Incubator::new(Arc::clone(&service));
    let definitions = ["A-1", "A-2", "A-3"]
        .map(|account| DataDefinition::orders(AccountId::new(account)));

    let futures: Vec<_> = definitions
        .iter()
        .map(|definition| {
            incubator
                .incubate_subscribe(definition)
                .unwrap()
                .pending()
                .unwrap()
        })
        .collect();

    transport.complete(&definitions[2], vec![]);
    service.exercise();

    let mut outcomes = Vec::new();
    for future in futures {
        outcomes.push(future.await.unwrap());
    }

    assert!(outcomes[0].is_cancelled());
    assert!(outcomes[1].is_cancelled());
    let last = outcomes.pop().and_then(Cancellable::into_value).unwrap();
    assert_eq!(last.definition(), &definitions[2]);

    // Only the winning subscription is still open.
    assert_eq!(transport.open_count(), 1);
    service.unsubscribe(&last).unwrap();
}

#[tokio::test]
async fn test_cancel_settles_within_one_turn() {
    let (_transport, service) = setup();
    let incubator = Incubator::new(Arc::clone(&service));

    let future = incubator
        .incubate_subscribe(&DataDefinition::BrokerageAccounts)
        .unwrap()
        .pending()
        .unwrap();
    incubator.cancel().unwrap();

    let outcome = tokio::time::timeout(Duration::from_millis(10), future)
        .await
        .expect("cancelled future must settle");
    assert!(matches!(outcome, Ok(Cancellable::Cancelled)));
}

#[tokio::test]
async fn test_finalise_settles_and_refuses() {
    let (transport, service) = setup();
    let incubator = Incubator::new(Arc::clone(&service));

    let future = incubator
        .incubate_subscribe(&DataDefinition::BrokerageAccounts)
        .unwrap()
        .pending()
        .unwrap();
    incubator.finalise().unwrap();

    let outcome = tokio::time::timeout(Duration::from_millis(10), future)
        .await
        .expect("finalised future must settle");
    assert!(matches!(outcome, Ok(Cancellable::Cancelled)));
    assert_eq!(transport.open_count(), 0);

    assert!(matches!(
        incubator.incubate_subscribe(&DataDefinition::BrokerageAccounts),
        Err(IncubatorError::Finalised)
    ));
    // Finalising twice is harmless.
    incubator.finalise().unwrap();
}

#[test]
fn test_double_release_is_refused() {
    let (transport, service) = setup();
    transport.warm(DataDefinition::BrokerageAccounts, accounts());

    let handle = service.subscribe(&DataDefinition::BrokerageAccounts);
    service.unsubscribe(&handle).unwrap();

    assert_eq!(
        service.unsubscribe(&handle),
        Err(FeedError::NotSubscribed(handle.id().0))
    );
    assert_eq!(transport.closed().len(), 1);
}

#[tokio::test]
async fn test_layered_cancel_reaches_the_list() {
    let (transport, service) = setup();
    let layered = ListItemIncubator::new(Arc::clone(&service), DataDefinition::BrokerageAccounts);

    let lookup = layered
        .incubate(&RecordKey::new("A-2"))
        .unwrap()
        .pending()
        .unwrap();
    assert_eq!(transport.open_count(), 1);

    layered.cancel().unwrap();

    let outcome = tokio::time::timeout(Duration::from_millis(10), lookup)
        .await
        .expect("cancelled lookup must settle");
    assert!(matches!(outcome, Ok(Cancellable::Cancelled)));
    assert_eq!(transport.open_count(), 0);
    assert_eq!(service.stats().active_items, 0);
}

#[tokio::test]
async fn test_layered_lookup_then_warm_hits() {
    let (transport, service) = setup();
    let layered = ListItemIncubator::new(Arc::clone(&service), DataDefinition::BrokerageAccounts);

    let lookup = layered
        .incubate(&RecordKey::new("A-2"))
        .unwrap()
        .settle();
    transport.complete(&DataDefinition::BrokerageAccounts, accounts());
    service.exercise();

    let record = lookup.await.unwrap().into_value().flatten().unwrap();
    assert_eq!(record.field_str("name"), Some("Hedge"));

    for key in ["A-1", "A-2", "missing"] {
        let incubation = layered.incubate(&RecordKey::new(key)).unwrap();
        assert!(incubation.is_ready(), "{key} should hit the warm list");
    }
    assert_eq!(transport.opened().len(), 1);

    layered.finalise().unwrap();
    assert_eq!(transport.open_count(), 0);
}

#[test]
fn test_publish_uses_handler_snapshot() {
    let event: Arc<MulticastEvent<()>> = Arc::new(MulticastEvent::new());
    let calls = Arc::new(AtomicUsize::new(0));
    let own_token = Arc::new(Mutex::new(None));

    let (e, c, t) = (Arc::clone(&event), Arc::clone(&calls), Arc::clone(&own_token));
    let token = event.subscribe(move |_: &()| {
        c.fetch_add(1, Ordering::SeqCst);
        if let Some(token) = t.lock().take() {
            e.unsubscribe(token).unwrap();
        }
        let late = Arc::clone(&c);
        e.subscribe(move |_: &()| {
            late.fetch_add(100, Ordering::SeqCst);
        });
    });
    *own_token.lock() = Some(token);

    event.publish(&());
    // Neither the removal nor the addition affects the running publish.
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(event.count(), 1);
}
