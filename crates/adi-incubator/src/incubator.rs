//! Incubator.
//!
//! An `Incubator` represents "the current desired incubation" of one data
//! item handle. It owns at most one handle and at most one pending
//! resolution at a time:
//! - Initiating again first resolves the previous pending future with
//!   `Cancelled` and releases the previously owned handle
//! - A handle that is already usable is returned directly, transferring
//!   ownership (and the duty to unsubscribe) to the caller
//! - Otherwise a future is returned that settles the moment the handle's
//!   correctness-changed event reports it usable or rejected
//! - `cancel` and `finalise` settle any pending future immediately
//!
//! An incubator built with a keeper hands every resolved handle to it
//! instead; callers then receive a clone they do not own.

use crate::error::{IncubatorError, IncubatorResult};
use crate::incubation::{Incubation, IncubationFuture, Settlement};
use adi_core::{Cancellable, DataDefinition, SubscriptionToken};
use adi_feed::{DataItemHandle, SubscriptionService};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use tokio::sync::oneshot;
use tracing::{debug, error, warn};

struct Pending<H> {
    tx: oneshot::Sender<Settlement<H>>,
    /// Handle the correctness listener is registered on.
    handle: H,
    token: SubscriptionToken,
    generation: u64,
}

struct State<H> {
    owned: Option<H>,
    pending: Option<Pending<H>>,
    generation: u64,
    finalised: bool,
}

enum Outcome<H> {
    Resolved(Pending<H>, H),
    Rejected(Pending<H>, H, String),
}

/// Takes ownership of resolved handles.
pub(crate) type Keeper<H> = Box<dyn Fn(H) + Send + Sync>;

struct Shared<S: SubscriptionService> {
    service: Arc<S>,
    state: Mutex<State<S::Handle>>,
    keeper: Option<Keeper<S::Handle>>,
}

impl<S: SubscriptionService + 'static> Shared<S> {
    fn release(&self, handle: &S::Handle) -> IncubatorResult<()> {
        self.service.unsubscribe(handle).map_err(|e| {
            error!(error = %e, "Failed to release data item");
            IncubatorError::from(e)
        })
    }

    fn detach(pending: &Pending<S::Handle>) {
        if let Err(e) = pending.handle.unsubscribe_correctness_changed(pending.token) {
            error!(error = %e, "Failed to detach correctness listener");
        }
    }

    fn cancel_pending(pending: Pending<S::Handle>) {
        Self::detach(&pending);
        // Receiver may already be gone; nothing left to tell.
        let _ = pending.tx.send(Ok(Cancellable::Cancelled));
        debug!(generation = pending.generation, "Pending incubation cancelled");
    }

    /// Settle the pending resolution of `generation` if its handle is now
    /// usable or rejected. Checked on every correctness change.
    fn settle_if_ready(&self, generation: u64) {
        let outcome = {
            let mut state = self.state.lock();
            let current = state
                .pending
                .as_ref()
                .is_some_and(|p| p.generation == generation);
            if !current {
                return;
            }
            let (incubated, rejection) = match state.owned.as_ref() {
                Some(handle) => (handle.incubated(), handle.rejection()),
                None => return,
            };
            if !incubated && rejection.is_none() {
                return;
            }

            let (Some(pending), Some(handle)) = (state.pending.take(), state.owned.take()) else {
                return;
            };
            match rejection {
                Some(rejection) if !incubated => {
                    Outcome::Rejected(pending, handle, rejection.text.into_owned())
                }
                _ => Outcome::Resolved(pending, handle),
            }
        };

        match outcome {
            Outcome::Resolved(pending, handle) => {
                Self::detach(&pending);
                debug!(generation, "Incubation resolved");
                if let Some(keep) = &self.keeper {
                    keep(handle.clone());
                    let _ = pending.tx.send(Ok(Cancellable::Resolved(handle)));
                } else if let Err(Ok(Cancellable::Resolved(handle))) =
                    pending.tx.send(Ok(Cancellable::Resolved(handle)))
                {
                    debug!(generation, "Incubation receiver gone, releasing handle");
                    let _ = self.release(&handle);
                }
            }
            Outcome::Rejected(pending, handle, reason) => {
                Self::detach(&pending);
                warn!(generation, reason = %reason, "Incubation rejected");
                let _ = self.release(&handle);
                let _ = pending.tx.send(Err(IncubatorError::Rejected(reason)));
            }
        }
    }

    /// Cancel the pending resolution and release the owned handle.
    fn discard(&self) -> IncubatorResult<()> {
        let (pending, owned) = {
            let mut state = self.state.lock();
            (state.pending.take(), state.owned.take())
        };

        if let Some(pending) = pending {
            Self::cancel_pending(pending);
        }
        match owned {
            Some(handle) => self.release(&handle),
            None => Ok(()),
        }
    }

    /// Take ownership of `handle`, discarding anything left over.
    fn own(&self, handle: S::Handle) -> IncubatorResult<()> {
        let (pending, previous) = {
            let mut state = self.state.lock();
            if state.finalised {
                drop(state);
                let _ = self.release(&handle);
                return Err(IncubatorError::Finalised);
            }
            (state.pending.take(), state.owned.replace(handle))
        };

        if let Some(pending) = pending {
            Self::cancel_pending(pending);
        }
        match previous {
            Some(previous) => self.release(&previous),
            None => Ok(()),
        }
    }
}

/// Single-slot incubator of data item handles.
pub struct Incubator<S: SubscriptionService + 'static> {
    shared: Arc<Shared<S>>,
}

impl<S: SubscriptionService + 'static> Incubator<S> {
    pub fn new(service: Arc<S>) -> Self {
        Self::build(service, None)
    }

    /// Incubator whose resolved handles go to `keeper`, on the fast path
    /// and on resolution alike.
    pub(crate) fn with_keeper(service: Arc<S>, keeper: Keeper<S::Handle>) -> Self {
        Self::build(service, Some(keeper))
    }

    fn build(service: Arc<S>, keeper: Option<Keeper<S::Handle>>) -> Self {
        Self {
            shared: Arc::new(Shared {
                service,
                state: Mutex::new(State {
                    owned: None,
                    pending: None,
                    generation: 0,
                    finalised: false,
                }),
                keeper,
            }),
        }
    }

    pub fn service(&self) -> &Arc<S> {
        &self.shared.service
    }

    /// Whether a handle is owned (initiated but not yet handed out).
    pub fn is_initiated(&self) -> bool {
        self.shared.state.lock().owned.is_some()
    }

    /// Whether a future is waiting for the owned handle.
    pub fn is_pending(&self) -> bool {
        self.shared.state.lock().pending.is_some()
    }

    pub fn is_finalised(&self) -> bool {
        self.shared.state.lock().finalised
    }

    fn ensure_usable(&self) -> IncubatorResult<()> {
        if self.is_finalised() {
            error!("Incubator used after finalise");
            return Err(IncubatorError::Finalised);
        }
        Ok(())
    }

    /// Subscribe to `definition` and own the handle.
    ///
    /// Any previous incubation is cancelled first. The returned clone can be
    /// inspected right away; ownership stays with the incubator.
    pub fn initiate_subscribe_incubation(
        &self,
        definition: &DataDefinition,
    ) -> IncubatorResult<S::Handle> {
        self.ensure_usable()?;
        self.shared.discard()?;

        let handle = self.shared.service.subscribe(definition);
        self.shared.own(handle.clone())?;
        debug!(definition = %definition, "Incubation initiated");
        Ok(handle)
    }

    /// Own an existing handle, as if it had just been subscribed.
    pub fn adopt(&self, handle: S::Handle) -> IncubatorResult<()> {
        if let Err(e) = self.ensure_usable() {
            let _ = self.shared.release(&handle);
            return Err(e);
        }
        self.shared.discard()?;
        self.shared.own(handle)
    }

    /// The owned handle if usable, otherwise a future for it.
    ///
    /// Returns `None` when nothing is owned: either nothing was initiated or
    /// ownership was already handed out. A previous pending future of this
    /// incubator is resolved `Cancelled`.
    pub fn initiated_subscription_or_future(
        &self,
    ) -> Option<Incubation<S::Handle, IncubationFuture<S>>> {
        let mut state = self.shared.state.lock();
        let handle = state.owned.clone()?;
        let superseded = state.pending.take();

        if handle.incubated() {
            state.owned = None;
            drop(state);
            if let Some(pending) = superseded {
                Shared::<S>::cancel_pending(pending);
            }
            debug!("Incubation fast path, handle already usable");
            if let Some(keep) = &self.shared.keeper {
                keep(handle.clone());
            }
            return Some(Incubation::Ready(handle));
        }

        state.generation += 1;
        let generation = state.generation;
        let (tx, rx) = oneshot::channel();

        let weak: Weak<Shared<S>> = Arc::downgrade(&self.shared);
        let token = handle.subscribe_correctness_changed(Arc::new(move |_: &()| {
            if let Some(shared) = weak.upgrade() {
                shared.settle_if_ready(generation);
            }
        }));
        state.pending = Some(Pending {
            tx,
            handle,
            token,
            generation,
        });
        drop(state);

        if let Some(pending) = superseded {
            Shared::<S>::cancel_pending(pending);
        }

        // The handle may have changed between the usable check and the
        // listener registration.
        self.shared.settle_if_ready(generation);

        let service = self.shared.keeper.is_none().then(|| Arc::clone(&self.shared.service));
        Some(Incubation::Pending(IncubationFuture::new(rx, service)))
    }

    /// Initiate and immediately ask for the handle or its future.
    pub fn incubate_subscribe(
        &self,
        definition: &DataDefinition,
    ) -> IncubatorResult<Incubation<S::Handle, IncubationFuture<S>>> {
        self.initiate_subscribe_incubation(definition)?;
        self.initiated_subscription_or_future()
            .ok_or(IncubatorError::NotInitiated)
    }

    /// Resolve any pending future `Cancelled` and release the owned handle.
    ///
    /// Safe to call with nothing pending.
    pub fn cancel(&self) -> IncubatorResult<()> {
        self.shared.discard()
    }

    /// Cancel and refuse any further incubation.
    pub fn finalise(&self) -> IncubatorResult<()> {
        self.shared.state.lock().finalised = true;
        self.shared.discard()
    }
}

impl<S: SubscriptionService + 'static> Drop for Incubator<S> {
    fn drop(&mut self) {
        if let Err(e) = self.finalise() {
            error!(error = %e, "Incubator finalise on drop failed");
        }
    }
}
