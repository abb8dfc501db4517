//! Main application orchestration.
//!
//! Runs the engine once, end to end:
//! - Starts the subscription service over the simulated gateway
//! - Looks the configured account up in the brokerage account list
//! - Incubates every configured definition, cancelling on timeout
//! - Records outcomes in metrics and shuts down

use crate::config::DemoConfig;
use crate::error::AppResult;
use crate::simulator::SimulatedTransport;
use adi_core::{Cancellable, DataDefinition, DataRecord, RecordKey};
use adi_feed::{AdiService, DataItemRef};
use adi_incubator::{Incubation, Incubator, IncubatorError, ListItemIncubator, Settlement};
use adi_telemetry::{IncubationOutcome, Metrics};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Outcome of one definition's incubation.
#[derive(Debug, Clone)]
pub struct IncubationRecord {
    pub definition: DataDefinition,
    pub outcome: IncubationOutcome,
    /// Records held when the handle became usable.
    pub records: usize,
    pub detail: Option<String>,
}

/// What one run produced.
#[derive(Debug, Clone)]
pub struct DemoReport {
    pub account_outcome: IncubationOutcome,
    /// The looked-up account, if the list resolved and contained it.
    pub account: Option<DataRecord>,
    pub incubations: Vec<IncubationRecord>,
}

impl DemoReport {
    pub fn count(&self, outcome: IncubationOutcome) -> usize {
        self.incubations
            .iter()
            .filter(|r| r.outcome == outcome)
            .count()
    }
}

/// Main application.
pub struct Application {
    config: DemoConfig,
    service: Arc<AdiService>,
}

impl Application {
    /// Create a new application over the simulated gateway.
    pub fn new(config: DemoConfig) -> AppResult<Self> {
        config.validate()?;

        let simulator = config.simulator.clone();
        let service = AdiService::new(config.service.clone(), move |sink| {
            SimulatedTransport::new(simulator, sink)
        });

        Ok(Self { config, service })
    }

    pub fn service(&self) -> &Arc<AdiService> {
        &self.service
    }

    fn timeout(&self) -> Duration {
        Duration::from_millis(self.config.incubation_timeout_ms)
    }

    /// Run every incubation once, then shut down.
    pub async fn run(self) -> AppResult<DemoReport> {
        info!(
            definitions = self.config.definitions.len(),
            interval_ms = self.config.service.exercise_interval_ms,
            "Starting application"
        );
        self.service.start()?;

        let result = self.run_incubations().await;

        self.record_service_metrics();
        match Metrics::render() {
            Ok(text) => debug!(metrics = %text, "Final metrics"),
            Err(e) => warn!(error = %e, "Metrics rendering failed"),
        }

        self.service.shutdown();
        info!("Application stopped");
        result
    }

    async fn run_incubations(&self) -> AppResult<DemoReport> {
        let accounts =
            ListItemIncubator::new(Arc::clone(&self.service), DataDefinition::BrokerageAccounts);
        let (account_outcome, account) = self.lookup_account(&accounts).await?;

        let mut incubations = Vec::with_capacity(self.config.definitions.len());
        for definition in &self.config.definitions {
            let record = self.incubate(definition).await?;
            self.record_service_metrics();
            incubations.push(record);
        }

        accounts.finalise()?;

        let report = DemoReport {
            account_outcome,
            account,
            incubations,
        };
        info!(
            resolved = report.count(IncubationOutcome::Resolved),
            rejected = report.count(IncubationOutcome::Rejected),
            timed_out = report.count(IncubationOutcome::TimedOut),
            "Incubations complete"
        );
        Ok(report)
    }

    async fn lookup_account(
        &self,
        accounts: &ListItemIncubator<AdiService>,
    ) -> AppResult<(IncubationOutcome, Option<DataRecord>)> {
        let key = RecordKey::from(self.config.account.clone());
        let started = Instant::now();

        let settlement = match accounts.incubate(&key)? {
            Incubation::Ready(account) => Some(Ok(Cancellable::Resolved(account))),
            Incubation::Pending(lookup) => self.within_timeout(lookup).await,
        };

        let (outcome, account) = match settlement {
            Some(Ok(Cancellable::Resolved(account))) => (IncubationOutcome::Resolved, account),
            Some(Ok(Cancellable::Cancelled)) => (IncubationOutcome::Cancelled, None),
            Some(Err(IncubatorError::Rejected(reason))) => {
                warn!(reason = %reason, "Brokerage account list rejected");
                (IncubationOutcome::Rejected, None)
            }
            Some(Err(e)) => return Err(e.into()),
            None => {
                accounts.cancel()?;
                (IncubationOutcome::TimedOut, None)
            }
        };

        Metrics::incubation_settled("lookup", outcome, elapsed_ms(started));
        match &account {
            Some(record) => info!(
                account = %self.config.account,
                name = record.field_str("name").unwrap_or_default(),
                "Account resolved"
            ),
            None => warn!(
                account = %self.config.account,
                outcome = outcome.as_str(),
                "Account not available"
            ),
        }
        Ok((outcome, account))
    }

    async fn incubate(&self, definition: &DataDefinition) -> AppResult<IncubationRecord> {
        let incubator = Incubator::new(Arc::clone(&self.service));
        let started = Instant::now();

        let settlement = match incubator.incubate_subscribe(definition)? {
            Incubation::Ready(handle) => {
                debug!(definition = %definition, "Feed already usable");
                Some(Ok(Cancellable::Resolved(handle)))
            }
            Incubation::Pending(future) => self.within_timeout(future).await,
        };

        let (outcome, records, detail) = match settlement {
            Some(Ok(Cancellable::Resolved(handle))) => {
                let records = handle.record_count();
                self.release(&handle);
                (IncubationOutcome::Resolved, records, None)
            }
            Some(Ok(Cancellable::Cancelled)) => (IncubationOutcome::Cancelled, 0, None),
            Some(Err(IncubatorError::Rejected(reason))) => {
                (IncubationOutcome::Rejected, 0, Some(reason))
            }
            Some(Err(e)) => return Err(e.into()),
            None => {
                incubator.cancel()?;
                (IncubationOutcome::TimedOut, 0, None)
            }
        };

        Metrics::incubation_settled("item", outcome, elapsed_ms(started));
        info!(
            definition = %definition,
            outcome = outcome.as_str(),
            records,
            detail = detail.as_deref().unwrap_or_default(),
            "Incubation settled"
        );

        Ok(IncubationRecord {
            definition: definition.clone(),
            outcome,
            records,
            detail,
        })
    }

    /// Await `future`, or `None` once the incubation timeout elapses.
    async fn within_timeout<T, F>(&self, future: F) -> Option<Settlement<T>>
    where
        F: Future<Output = Settlement<T>>,
    {
        tokio::time::timeout(self.timeout(), future).await.ok()
    }

    fn release(&self, handle: &DataItemRef) {
        if let Err(e) = self.service.unsubscribe(handle) {
            warn!(error = %e, "Failed to release data item");
        }
    }

    fn record_service_metrics(&self) {
        let stats = self.service.stats();
        Metrics::service_occupancy(stats.active_items, stats.open_streams);
        Metrics::exercise_ticks(stats.exerciser.ticks, stats.exerciser.skipped);
    }
}

fn elapsed_ms(started: Instant) -> f64 {
    started.elapsed().as_secs_f64() * 1000.0
}
