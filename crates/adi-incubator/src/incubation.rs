//! Incubation outcome types.

use crate::error::IncubatorResult;
use adi_core::Cancellable;
use adi_feed::SubscriptionService;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};
use tokio::sync::oneshot;
use tracing::{debug, error};

/// What a pending incubation settles with.
pub type Settlement<T> = IncubatorResult<Cancellable<T>>;

/// Either a value usable now, or a future that settles later.
#[must_use]
pub enum Incubation<T, F> {
    Ready(T),
    Pending(F),
}

impl<T, F> Incubation<T, F> {
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready(_))
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending(_))
    }

    pub fn ready(self) -> Option<T> {
        match self {
            Self::Ready(value) => Some(value),
            Self::Pending(_) => None,
        }
    }

    pub fn pending(self) -> Option<F> {
        match self {
            Self::Ready(_) => None,
            Self::Pending(future) => Some(future),
        }
    }
}

impl<T, F> Incubation<T, F>
where
    F: Future<Output = Settlement<T>>,
{
    /// Wait for the outcome, whichever variant this is.
    pub async fn settle(self) -> Settlement<T> {
        match self {
            Self::Ready(value) => Ok(Cancellable::Resolved(value)),
            Self::Pending(future) => future.await,
        }
    }
}

impl<T, F> fmt::Debug for Incubation<T, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ready(_) => f.write_str("Incubation::Ready"),
            Self::Pending(_) => f.write_str("Incubation::Pending"),
        }
    }
}

/// Future of one pending incubation.
///
/// Settles with the handle once it is usable, with `Cancelled` once the
/// incubation is superseded or cancelled, or with the rejection reason.
/// Dropping the future after the handle was delivered to it releases the
/// handle back to the service, unless the incubator keeps its handles.
pub struct IncubationFuture<S: SubscriptionService> {
    rx: oneshot::Receiver<Settlement<S::Handle>>,
    /// Service to release an undelivered handle to; `None` when the handle
    /// is owned elsewhere.
    service: Option<Arc<S>>,
}

impl<S: SubscriptionService> IncubationFuture<S> {
    pub(crate) fn new(
        rx: oneshot::Receiver<Settlement<S::Handle>>,
        service: Option<Arc<S>>,
    ) -> Self {
        Self { rx, service }
    }
}

impl<S: SubscriptionService> Future for IncubationFuture<S> {
    type Output = Settlement<S::Handle>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match ready!(Pin::new(&mut this.rx).poll(cx)) {
            Ok(settlement) => Poll::Ready(settlement),
            // Incubator gone without settling: nothing will ever resolve this.
            Err(_) => Poll::Ready(Ok(Cancellable::Cancelled)),
        }
    }
}

impl<S: SubscriptionService> Drop for IncubationFuture<S> {
    fn drop(&mut self) {
        self.rx.close();
        let Some(service) = &self.service else {
            return;
        };
        if let Ok(Ok(Cancellable::Resolved(handle))) = self.rx.try_recv() {
            debug!("Incubation abandoned after resolution, releasing handle");
            if let Err(e) = service.unsubscribe(&handle) {
                error!(error = %e, "Failed to release abandoned handle");
            }
        }
    }
}

impl<S: SubscriptionService> fmt::Debug for IncubationFuture<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IncubationFuture").finish_non_exhaustive()
    }
}
