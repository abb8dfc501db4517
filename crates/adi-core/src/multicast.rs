//! Multicast event channel.
//!
//! Many handlers subscribe, every publish reaches all of them, and each
//! handler is removed with the token its subscription returned.
//!
//! `publish` takes a snapshot of the handler list under the lock and invokes
//! the snapshot with the lock released. Handlers may therefore subscribe or
//! unsubscribe (themselves or others) while being invoked; such changes apply
//! from the next publish on.

use crate::error::{CoreError, CoreResult};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tracing::error;

/// Handler invoked on publish.
pub type EventHandler<A> = Arc<dyn Fn(&A) + Send + Sync>;

/// Opaque subscription token.
///
/// Tokens are allocated monotonically per channel and never reused, so a
/// stale token can never remove a later subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionToken(u64);

impl SubscriptionToken {
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriptionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

struct Inner<A> {
    next_token: u64,
    handlers: Vec<(SubscriptionToken, EventHandler<A>)>,
}

/// Subscribe-many, fire-to-all event channel.
pub struct MulticastEvent<A = ()> {
    inner: Mutex<Inner<A>>,
}

impl<A> MulticastEvent<A> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                next_token: 1,
                handlers: Vec::new(),
            }),
        }
    }

    /// Append a handler. Handlers are invoked in subscription order.
    pub fn subscribe<F>(&self, handler: F) -> SubscriptionToken
    where
        F: Fn(&A) + Send + Sync + 'static,
    {
        self.subscribe_arc(Arc::new(handler))
    }

    /// Append an already shared handler.
    pub fn subscribe_arc(&self, handler: EventHandler<A>) -> SubscriptionToken {
        let mut inner = self.inner.lock();
        let token = SubscriptionToken(inner.next_token);
        inner.next_token += 1;
        inner.handlers.push((token, handler));
        token
    }

    /// Remove the handler registered under `token`.
    ///
    /// A token that was never issued by this channel, or was already
    /// unsubscribed, is refused.
    pub fn unsubscribe(&self, token: SubscriptionToken) -> CoreResult<()> {
        let mut inner = self.inner.lock();
        match inner.handlers.iter().position(|(t, _)| *t == token) {
            Some(idx) => {
                inner.handlers.remove(idx);
                Ok(())
            }
            None => {
                error!(token = %token, "Unsubscribe with unknown or stale token");
                Err(CoreError::UnknownSubscriptionToken(token.0))
            }
        }
    }

    /// Invoke every currently subscribed handler.
    pub fn publish(&self, args: &A) {
        let snapshot: Vec<EventHandler<A>> = {
            let inner = self.inner.lock();
            if inner.handlers.is_empty() {
                return;
            }
            inner.handlers.iter().map(|(_, h)| Arc::clone(h)).collect()
        };

        for handler in snapshot {
            handler(args);
        }
    }

    /// Number of subscribed handlers.
    pub fn count(&self) -> usize {
        self.inner.lock().handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }
}

impl<A> Default for MulticastEvent<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A> fmt::Debug for MulticastEvent<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MulticastEvent")
            .field("handlers", &self.count())
            .finish()
    }
}
