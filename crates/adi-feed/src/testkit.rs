//! Manual transport for tests.
//!
//! `ManualTransport` records every open and close, can be told to refuse
//! opens, can answer an open synchronously with canned changes, and lets a
//! test push changes that the service delivers on its next exercise.

use crate::error::{FeedError, FeedResult};
use crate::service::{AdiService, ServiceConfig};
use crate::transport::{FeedChange, FeedSink, FeedStreamId, FeedTransport};
use adi_core::{Badness, BadnessReason, DataDefinition, DataRecord};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Default)]
struct ManualState {
    opened: Vec<(FeedStreamId, DataDefinition)>,
    closed: Vec<FeedStreamId>,
    fail_open: Option<String>,
    on_open: HashMap<DataDefinition, Vec<FeedChange>>,
    exercises: usize,
}

/// Scriptable in-memory transport.
#[derive(Default)]
pub struct ManualTransport {
    sink: Mutex<Option<FeedSink>>,
    state: Mutex<ManualState>,
}

impl ManualTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Build a service reporting through this transport.
    pub fn service(self: &Arc<Self>, config: ServiceConfig) -> Arc<AdiService> {
        let transport = Arc::clone(self);
        AdiService::new(config, move |sink| {
            *transport.sink.lock() = Some(sink);
            transport
        })
    }

    /// Refuse every following open with `reason` (None to accept again).
    pub fn set_fail_open(&self, reason: Option<&str>) {
        self.state.lock().fail_open = reason.map(str::to_string);
    }

    /// Answer opens of `definition` synchronously with `changes`.
    pub fn respond_on_open(&self, definition: DataDefinition, changes: Vec<FeedChange>) {
        self.state.lock().on_open.insert(definition, changes);
    }

    /// Answer opens of `definition` with an immediate snapshot.
    pub fn warm(&self, definition: DataDefinition, records: Vec<DataRecord>) {
        self.respond_on_open(definition, vec![FeedChange::Snapshot(records)]);
    }

    /// Queue a change for delivery on the next exercise.
    pub fn emit(&self, stream: FeedStreamId, change: FeedChange) -> bool {
        match self.sink.lock().as_ref() {
            Some(sink) => sink.send(stream, change),
            None => false,
        }
    }

    /// Queue a change for the most recently opened stream of `definition`.
    pub fn emit_for(&self, definition: &DataDefinition, change: FeedChange) -> bool {
        match self.stream_for(definition) {
            Some(stream) => self.emit(stream, change),
            None => false,
        }
    }

    /// Queue the usual sequence that incubates a stream.
    pub fn complete(&self, definition: &DataDefinition, records: Vec<DataRecord>) -> bool {
        self.emit_for(
            definition,
            FeedChange::Status(Badness::new(BadnessReason::Synchronising)),
        ) && self.emit_for(definition, FeedChange::Snapshot(records))
    }

    /// Most recently opened, still open stream of `definition`.
    pub fn stream_for(&self, definition: &DataDefinition) -> Option<FeedStreamId> {
        let state = self.state.lock();
        state
            .opened
            .iter()
            .rev()
            .find(|(id, def)| def == definition && !state.closed.contains(id))
            .map(|(id, _)| *id)
    }

    pub fn opened(&self) -> Vec<(FeedStreamId, DataDefinition)> {
        self.state.lock().opened.clone()
    }

    pub fn closed(&self) -> Vec<FeedStreamId> {
        self.state.lock().closed.clone()
    }

    pub fn open_count(&self) -> usize {
        let state = self.state.lock();
        state.opened.len() - state.closed.len()
    }

    pub fn exercise_count(&self) -> usize {
        self.state.lock().exercises
    }
}

impl FeedTransport for ManualTransport {
    fn open(&self, stream: FeedStreamId, definition: &DataDefinition) -> FeedResult<()> {
        let immediate = {
            let mut state = self.state.lock();
            if let Some(reason) = &state.fail_open {
                return Err(FeedError::OpenFailed(reason.clone()));
            }
            state.opened.push((stream, definition.clone()));
            state.on_open.get(definition).cloned().unwrap_or_default()
        };

        for change in immediate {
            self.emit(stream, change);
        }
        Ok(())
    }

    fn close(&self, stream: FeedStreamId) -> FeedResult<()> {
        let mut state = self.state.lock();
        if state.closed.contains(&stream) {
            return Err(FeedError::CloseFailed(format!("{stream} already closed")));
        }
        state.closed.push(stream);
        Ok(())
    }

    fn exercise(&self) {
        self.state.lock().exercises += 1;
    }
}
