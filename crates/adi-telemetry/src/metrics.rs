//! Prometheus metrics for the ADI engine.
//!
//! Covers:
//! - Live data items and open transport streams
//! - Exercise ticks, run and skipped
//! - Incubation outcomes and wait time
//!
//! # Panics
//!
//! Metric registration uses `unwrap()` intentionally. A registration failure
//! means duplicate metric names, a fatal configuration error that must crash
//! at startup. These panics only occur during static initialization.

use crate::error::{TelemetryError, TelemetryResult};
use once_cell::sync::Lazy;
use prometheus::{
    register_histogram_vec, register_int_counter_vec, register_int_gauge, Encoder, HistogramVec,
    IntCounterVec, IntGauge, TextEncoder,
};

/// Live data item handles.
pub static DATA_ITEMS_ACTIVE: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!("adi_data_items_active", "Live data item handles").unwrap()
});

/// Transport streams currently open.
pub static STREAMS_OPEN: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!("adi_streams_open", "Transport streams currently open").unwrap()
});

/// Exercise ticks.
/// Labels: result (run/skipped)
pub static EXERCISE_TICKS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "adi_exercise_ticks_total",
        "Exercise ticks, run or skipped while busy",
        &["result"]
    )
    .unwrap()
});

/// Incubation outcomes.
/// Labels: kind (item/lookup), outcome (resolved/cancelled/rejected/timeout)
pub static INCUBATIONS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "adi_incubations_total",
        "Settled incubations by outcome",
        &["kind", "outcome"]
    )
    .unwrap()
});

/// Time from incubation start to settlement, in milliseconds.
pub static INCUBATION_WAIT_MS: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "adi_incubation_wait_ms",
        "Time from incubation start to settlement in milliseconds",
        &["kind"],
        vec![0.0, 1.0, 10.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 5000.0]
    )
    .unwrap()
});

/// How an incubation settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IncubationOutcome {
    Resolved,
    Cancelled,
    Rejected,
    TimedOut,
}

impl IncubationOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Resolved => "resolved",
            Self::Cancelled => "cancelled",
            Self::Rejected => "rejected",
            Self::TimedOut => "timeout",
        }
    }
}

/// Raise a cumulative counter to `total`.
fn advance(counter: &prometheus::IntCounter, total: u64) {
    let current = counter.get();
    if total > current {
        counter.inc_by(total - current);
    }
}

/// Metrics facade for easy access.
pub struct Metrics;

impl Metrics {
    /// Record subscription service occupancy.
    pub fn service_occupancy(active_items: usize, open_streams: usize) {
        DATA_ITEMS_ACTIVE.set(active_items as i64);
        STREAMS_OPEN.set(open_streams as i64);
    }

    /// Record exerciser totals since start.
    pub fn exercise_ticks(run: u64, skipped: u64) {
        advance(&EXERCISE_TICKS_TOTAL.with_label_values(&["run"]), run);
        advance(&EXERCISE_TICKS_TOTAL.with_label_values(&["skipped"]), skipped);
    }

    /// Record one settled incubation.
    pub fn incubation_settled(kind: &str, outcome: IncubationOutcome, wait_ms: f64) {
        INCUBATIONS_TOTAL
            .with_label_values(&[kind, outcome.as_str()])
            .inc();
        INCUBATION_WAIT_MS
            .with_label_values(&[kind])
            .observe(wait_ms);
    }

    /// Render every registered metric in the Prometheus text format.
    pub fn render() -> TelemetryResult<String> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&prometheus::gather(), &mut buffer)
            .map_err(|e| TelemetryError::Metrics(e.to_string()))?;
        String::from_utf8(buffer).map_err(|e| TelemetryError::Metrics(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exercise_ticks_are_cumulative() {
        Metrics::exercise_ticks(5, 1);
        Metrics::exercise_ticks(3, 1);
        Metrics::exercise_ticks(8, 2);

        assert_eq!(EXERCISE_TICKS_TOTAL.with_label_values(&["run"]).get(), 8);
        assert_eq!(EXERCISE_TICKS_TOTAL.with_label_values(&["skipped"]).get(), 2);
    }

    #[test]
    fn test_render_includes_recorded_metrics() {
        Metrics::service_occupancy(3, 2);
        Metrics::incubation_settled("lookup", IncubationOutcome::Cancelled, 12.0);

        let text = Metrics::render().unwrap();
        assert!(text.contains("adi_data_items_active 3"));
        assert!(text.contains("adi_streams_open 2"));
        assert!(text.contains(r#"outcome="cancelled""#));
    }

    #[test]
    fn test_outcome_labels() {
        assert_eq!(IncubationOutcome::Resolved.as_str(), "resolved");
        assert_eq!(IncubationOutcome::TimedOut.as_str(), "timeout");
    }
}
