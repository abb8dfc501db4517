//! Transport seam.
//!
//! The transport is the external collaborator that talks to the market-data
//! and trading gateway. The service opens and closes streams on it and lets
//! it do connection maintenance on every exercise tick. Everything the
//! transport learns about a stream comes back as `FeedEvent`s pushed into
//! the `FeedSink` it was constructed with.

use crate::error::FeedResult;
use adi_core::{Badness, DataDefinition, DataRecord, RecordKey};
use std::fmt;
use tokio::sync::mpsc;

/// Transport-level stream identifier.
///
/// One stream may serve several data items when streams are shared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FeedStreamId(pub u64);

impl fmt::Display for FeedStreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stream-{}", self.0)
    }
}

/// Change reported by the transport for one stream.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedChange {
    /// Health transition.
    Status(Badness),
    /// Complete, consistent image of the feed.
    Snapshot(Vec<DataRecord>),
    /// Incremental add or replace of one record.
    Upsert(DataRecord),
    /// Incremental removal of one record.
    Remove(RecordKey),
    /// Subscription refused by the publisher. Terminal.
    Rejected(String),
}

/// Change tagged with its stream.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedEvent {
    pub stream: FeedStreamId,
    pub change: FeedChange,
}

impl FeedEvent {
    pub fn new(stream: FeedStreamId, change: FeedChange) -> Self {
        Self { stream, change }
    }
}

/// Sending half handed to the transport.
///
/// Cloneable; events are queued until the service drains them, either at
/// the end of a `subscribe` call or on the next exercise tick.
#[derive(Debug, Clone)]
pub struct FeedSink {
    tx: mpsc::UnboundedSender<FeedEvent>,
}

impl FeedSink {
    pub(crate) fn new(tx: mpsc::UnboundedSender<FeedEvent>) -> Self {
        Self { tx }
    }

    /// Queue an event. Returns false if the service is gone.
    pub fn send(&self, stream: FeedStreamId, change: FeedChange) -> bool {
        self.tx.send(FeedEvent::new(stream, change)).is_ok()
    }
}

/// Gateway transport.
#[cfg_attr(test, mockall::automock)]
pub trait FeedTransport: Send + Sync {
    /// Start delivering `definition` on `stream`.
    fn open(&self, stream: FeedStreamId, definition: &DataDefinition) -> FeedResult<()>;

    /// Stop delivering `stream` and release its resources.
    fn close(&self, stream: FeedStreamId) -> FeedResult<()>;

    /// Connection maintenance (heartbeat, reconnection, message pumping).
    ///
    /// Called once per exercise tick; must not block.
    fn exercise(&self);
}
