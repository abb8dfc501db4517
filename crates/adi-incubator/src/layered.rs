//! Layered incubation: incubate a list, then look one item up in it.
//!
//! The list handle is incubated once and then kept warm, so later lookups
//! complete synchronously. The list is kept from the moment it resolves,
//! whether or not the waiting lookup is ever polled. Cancellation of the
//! list incubation surfaces to the caller as `Cancelled`.

use crate::error::{IncubatorError, IncubatorResult};
use crate::incubation::{Incubation, IncubationFuture, Settlement};
use crate::incubator::Incubator;
use adi_core::{Cancellable, DataDefinition};
use adi_feed::{DataItemHandle, KeyedList, SubscriptionService};
use parking_lot::Mutex;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};
use tracing::{debug, error, warn};

type Key<S> = <<S as SubscriptionService>::Handle as KeyedList>::Key;
type Item<S> = <<S as SubscriptionService>::Handle as KeyedList>::Item;

struct HolderState<H> {
    list: Option<H>,
    finalised: bool,
}

/// Owner of the incubated list handle.
struct ListHolder<S: SubscriptionService> {
    service: Arc<S>,
    state: Mutex<HolderState<S::Handle>>,
}

impl<S: SubscriptionService> ListHolder<S> {
    fn release(&self, handle: &S::Handle) {
        if let Err(e) = self.service.unsubscribe(handle) {
            error!(error = %e, "Failed to release list handle");
        }
    }

    /// Keep `list` warm, releasing whatever was held before.
    fn hold(&self, list: S::Handle) {
        let released = {
            let mut state = self.state.lock();
            if state.finalised {
                Some(list)
            } else {
                state.list.replace(list)
            }
        };
        if let Some(handle) = released {
            self.release(&handle);
        }
    }

    fn take(&self) -> Option<S::Handle> {
        self.state.lock().list.take()
    }

    fn incubated_list(&self) -> Option<S::Handle> {
        self.state
            .lock()
            .list
            .as_ref()
            .filter(|list| list.incubated())
            .cloned()
    }

    fn list(&self) -> Option<S::Handle> {
        self.state.lock().list.clone()
    }

    fn finalise(&self) {
        let held = {
            let mut state = self.state.lock();
            state.finalised = true;
            state.list.take()
        };
        if let Some(handle) = held {
            self.release(&handle);
        }
    }
}

/// Incubates a keyed list and resolves single items out of it.
pub struct ListItemIncubator<S>
where
    S: SubscriptionService + 'static,
    S::Handle: KeyedList,
{
    definition: DataDefinition,
    incubator: Incubator<S>,
    holder: Arc<ListHolder<S>>,
}

impl<S> ListItemIncubator<S>
where
    S: SubscriptionService + 'static,
    S::Handle: KeyedList,
    Key<S>: Clone + Unpin,
{
    /// Layer over the list subscription `definition`. Nothing is subscribed
    /// until the first `incubate`.
    pub fn new(service: Arc<S>, definition: DataDefinition) -> Self {
        let holder = Arc::new(ListHolder {
            service: Arc::clone(&service),
            state: Mutex::new(HolderState {
                list: None,
                finalised: false,
            }),
        });

        let weak = Arc::downgrade(&holder);
        let fallback = Arc::clone(&service);
        let keeper = Box::new(move |list: S::Handle| match weak.upgrade() {
            Some(holder) => holder.hold(list),
            None => {
                warn!("List incubator gone before the list resolved, releasing list");
                if let Err(e) = fallback.unsubscribe(&list) {
                    error!(error = %e, "Failed to release list handle");
                }
            }
        });

        Self {
            definition,
            incubator: Incubator::with_keeper(service, keeper),
            holder,
        }
    }

    pub fn definition(&self) -> &DataDefinition {
        &self.definition
    }

    /// The held list handle, usable or not.
    pub fn list(&self) -> Option<S::Handle> {
        self.holder.list()
    }

    /// Whether a lookup is waiting for the list.
    pub fn is_incubating(&self) -> bool {
        self.incubator.is_pending()
    }

    /// Look `key` up in the list, waiting for the list if needed.
    ///
    /// Resolves with `None` when the list is usable but has no such item. A
    /// previous pending lookup of this incubator is resolved `Cancelled`.
    pub fn incubate(
        &self,
        key: &Key<S>,
    ) -> IncubatorResult<Incubation<Option<Item<S>>, LookupFuture<S>>> {
        if self.incubator.is_finalised() {
            error!(definition = %self.definition, "List incubator used after finalise");
            return Err(IncubatorError::Finalised);
        }

        // Warm path.
        if let Some(list) = self.holder.incubated_list() {
            // A lookup still pending on an older attempt is superseded.
            if self.incubator.is_pending() {
                self.incubator.cancel()?;
            }
            return Ok(Incubation::Ready(list.lookup(key)));
        }

        if !self.incubator.is_initiated() {
            match self.holder.take() {
                // Held but degraded: wait for it to recover.
                Some(list) => self.incubator.adopt(list)?,
                None => {
                    self.incubator
                        .initiate_subscribe_incubation(&self.definition)?;
                }
            }
        }

        match self
            .incubator
            .initiated_subscription_or_future()
            .ok_or(IncubatorError::NotInitiated)?
        {
            // Already held by the keeper.
            Incubation::Ready(list) => Ok(Incubation::Ready(list.lookup(key))),
            Incubation::Pending(inner) => {
                debug!(definition = %self.definition, "Lookup waiting for list incubation");
                Ok(Incubation::Pending(LookupFuture {
                    inner,
                    key: key.clone(),
                }))
            }
        }
    }

    /// Cancel the list incubation. Pending lookups resolve `Cancelled`.
    pub fn cancel(&self) -> IncubatorResult<()> {
        self.incubator.cancel()
    }

    /// Cancel and release the held list.
    pub fn finalise(&self) -> IncubatorResult<()> {
        let result = self.incubator.finalise();
        self.holder.finalise();
        result
    }
}

impl<S> Drop for ListItemIncubator<S>
where
    S: SubscriptionService + 'static,
    S::Handle: KeyedList,
{
    fn drop(&mut self) {
        // The incubator finalises itself on drop.
        self.holder.finalise();
    }
}

/// Future of one pending lookup.
pub struct LookupFuture<S>
where
    S: SubscriptionService + 'static,
    S::Handle: KeyedList,
{
    inner: IncubationFuture<S>,
    key: Key<S>,
}

impl<S> Future for LookupFuture<S>
where
    S: SubscriptionService + 'static,
    S::Handle: KeyedList,
    Key<S>: Unpin,
{
    type Output = Settlement<Option<Item<S>>>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let list = match ready!(Pin::new(&mut this.inner).poll(cx)) {
            Ok(Cancellable::Resolved(list)) => list,
            Ok(Cancellable::Cancelled) => return Poll::Ready(Ok(Cancellable::Cancelled)),
            Err(e) => return Poll::Ready(Err(e)),
        };

        Poll::Ready(Ok(Cancellable::Resolved(list.lookup(&this.key))))
    }
}

impl<S> fmt::Debug for LookupFuture<S>
where
    S: SubscriptionService + 'static,
    S::Handle: KeyedList,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LookupFuture").finish_non_exhaustive()
    }
}
