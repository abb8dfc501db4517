//! Simulated gateway transport.
//!
//! Every opened stream walks through the subscription lifecycle on
//! successive exercise ticks: `Synchronising` on the first tick, a full
//! snapshot once `sync_ticks` ticks have passed, then one record update per
//! tick. Account-scoped feeds of accounts the session cannot see are
//! rejected on the first tick.

use crate::config::SimulatorConfig;
use adi_core::{AccountId, Badness, BadnessReason, DataDefinition, DataRecord};
use adi_feed::{FeedChange, FeedError, FeedResult, FeedSink, FeedStreamId, FeedTransport};
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, trace};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Opened,
    Synchronising,
    Live,
    Rejected,
}

struct SimStream {
    definition: DataDefinition,
    phase: Phase,
    ticks: u32,
}

/// Transport that fabricates feed data on exercise ticks.
pub struct SimulatedTransport {
    config: SimulatorConfig,
    sink: FeedSink,
    streams: Mutex<BTreeMap<FeedStreamId, SimStream>>,
}

impl SimulatedTransport {
    pub fn new(config: SimulatorConfig, sink: FeedSink) -> Arc<Self> {
        Arc::new(Self {
            config,
            sink,
            streams: Mutex::new(BTreeMap::new()),
        })
    }

    /// Streams currently open.
    pub fn stream_count(&self) -> usize {
        self.streams.lock().len()
    }

    fn knows_account(&self, account: &AccountId) -> bool {
        self.config.accounts.contains(account)
    }

    fn snapshot(&self, definition: &DataDefinition) -> Vec<DataRecord> {
        match definition {
            DataDefinition::BrokerageAccounts => self
                .config
                .accounts
                .iter()
                .map(|account| {
                    DataRecord::new(account.clone())
                        .with_field("name", format!("Account {account}"))
                        .with_field("currency", "AUD")
                })
                .collect(),
            _ => (0..self.config.records_per_feed)
                .map(|n| self.record(definition, n, 0))
                .collect(),
        }
    }

    fn record(&self, definition: &DataDefinition, n: usize, tick: u32) -> DataRecord {
        let key = format!("{}-{}", definition.feed_kind(), n + 1);
        DataRecord::new(key.as_str())
            .with_field("seq", u64::from(tick))
            .with_field("value", 100.0 + n as f64 + f64::from(tick) / 100.0)
            .with_field("updated_at", Utc::now().to_rfc3339())
    }

    /// Advance one stream; returns the changes it produced.
    fn step(&self, stream: &mut SimStream) -> Vec<FeedChange> {
        stream.ticks += 1;
        match stream.phase {
            Phase::Opened => {
                if let Some(account) = account_of(&stream.definition) {
                    if !self.knows_account(account) {
                        stream.phase = Phase::Rejected;
                        return vec![FeedChange::Rejected(format!("unknown account {account}"))];
                    }
                }
                stream.phase = Phase::Synchronising;
                let mut changes = vec![FeedChange::Status(Badness::new(
                    BadnessReason::Synchronising,
                ))];
                changes.extend(self.complete_if_due(stream));
                changes
            }
            Phase::Synchronising => self.complete_if_due(stream).into_iter().collect(),
            Phase::Live => {
                if matches!(stream.definition, DataDefinition::BrokerageAccounts)
                    || self.config.records_per_feed == 0
                {
                    return Vec::new();
                }
                let n = stream.ticks as usize % self.config.records_per_feed;
                vec![FeedChange::Upsert(self.record(
                    &stream.definition,
                    n,
                    stream.ticks,
                ))]
            }
            Phase::Rejected => Vec::new(),
        }
    }

    fn complete_if_due(&self, stream: &mut SimStream) -> Option<FeedChange> {
        if stream.ticks < self.config.sync_ticks {
            return None;
        }
        stream.phase = Phase::Live;
        Some(FeedChange::Snapshot(self.snapshot(&stream.definition)))
    }
}

fn account_of(definition: &DataDefinition) -> Option<&AccountId> {
    match definition {
        DataDefinition::Orders { account }
        | DataDefinition::Holdings { account }
        | DataDefinition::Balances { account } => Some(account),
        _ => None,
    }
}

impl FeedTransport for SimulatedTransport {
    fn open(&self, stream: FeedStreamId, definition: &DataDefinition) -> FeedResult<()> {
        let mut streams = self.streams.lock();
        if streams.contains_key(&stream) {
            return Err(FeedError::OpenFailed(format!("{stream} already open")));
        }
        streams.insert(
            stream,
            SimStream {
                definition: definition.clone(),
                phase: Phase::Opened,
                ticks: 0,
            },
        );
        debug!(stream_id = %stream, definition = %definition, "Simulated stream opened");
        Ok(())
    }

    fn close(&self, stream: FeedStreamId) -> FeedResult<()> {
        match self.streams.lock().remove(&stream) {
            Some(_) => Ok(()),
            None => Err(FeedError::CloseFailed(format!("{stream} not open"))),
        }
    }

    fn exercise(&self) {
        let produced: Vec<(FeedStreamId, FeedChange)> = {
            let mut streams = self.streams.lock();
            streams
                .iter_mut()
                .flat_map(|(id, stream)| {
                    self.step(stream)
                        .into_iter()
                        .map(move |change| (*id, change))
                })
                .collect()
        };

        trace!(changes = produced.len(), "Simulated exercise");
        for (stream, change) in produced {
            self.sink.send(stream, change);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use adi_core::{CorrectnessId, InstrumentId, RecordKey};
    use adi_feed::{AdiService, ServiceConfig};

    fn service(config: SimulatorConfig) -> (Arc<AdiService>, Arc<SimulatedTransport>) {
        let mut slot = None;
        let service = AdiService::new(ServiceConfig::default(), |sink| {
            let transport = SimulatedTransport::new(config, sink);
            slot = Some(Arc::clone(&transport));
            transport
        });
        (service, slot.unwrap())
    }

    #[test]
    fn test_feed_synchronises_over_ticks() {
        let (service, _transport) = service(SimulatorConfig {
            sync_ticks: 3,
            ..Default::default()
        });
        let item = service.subscribe(&DataDefinition::depth(InstrumentId::new("BHP", "ASX")));
        assert_eq!(item.badness().reason, BadnessReason::Subscribing);

        service.exercise();
        assert_eq!(item.badness().reason, BadnessReason::Synchronising);
        service.exercise();
        assert!(!item.incubated());
        service.exercise();

        assert!(item.incubated());
        assert_eq!(item.correctness_id(), CorrectnessId::Good);
        assert_eq!(item.record_count(), 5);
    }

    #[test]
    fn test_single_tick_sync() {
        let (service, _transport) = service(SimulatorConfig {
            sync_ticks: 1,
            ..Default::default()
        });
        let item = service.subscribe(&DataDefinition::BrokerageAccounts);

        service.exercise();
        assert!(item.incubated());
        assert!(item.record(&RecordKey::new("A-1002")).is_some());
    }

    #[test]
    fn test_live_feed_updates_records() {
        let (service, _transport) = service(SimulatorConfig {
            sync_ticks: 1,
            records_per_feed: 2,
            ..Default::default()
        });
        let item = service.subscribe(&DataDefinition::orders(AccountId::new("A-1001")));
        service.exercise();
        let before = item.record(&RecordKey::new("orders-1")).unwrap();

        // Second tick updates record 2 % 2, the first one.
        service.exercise();
        let after = item.record(&RecordKey::new("orders-1")).unwrap();
        assert_ne!(before.field("seq"), after.field("seq"));
        assert_eq!(item.record_count(), 2);
    }

    #[test]
    fn test_unknown_account_rejected() {
        let (service, _transport) = service(SimulatorConfig::default());
        let item = service.subscribe(&DataDefinition::Balances {
            account: AccountId::new("A-9999"),
        });

        service.exercise();
        let rejection = item.rejection().unwrap();
        assert!(rejection.text.contains("A-9999"));
    }

    #[test]
    fn test_close_forgets_stream() {
        let (service, transport) = service(SimulatorConfig::default());
        let item = service.subscribe(&DataDefinition::BrokerageAccounts);
        assert_eq!(transport.stream_count(), 1);

        service.unsubscribe(&item).unwrap();
        assert_eq!(transport.stream_count(), 0);
        assert!(transport.close(FeedStreamId(1)).is_err());
    }
}
