//! Cancellable outcome.

/// Outcome of an operation that may be superseded or cancelled.
///
/// Cancellation is a normal outcome, distinct from both success and failure.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use]
pub enum Cancellable<T> {
    Cancelled,
    Resolved(T),
}

impl<T> Cancellable<T> {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Value if resolved.
    pub fn into_value(self) -> Option<T> {
        match self {
            Self::Cancelled => None,
            Self::Resolved(value) => Some(value),
        }
    }

    pub fn as_ref(&self) -> Cancellable<&T> {
        match self {
            Self::Cancelled => Cancellable::Cancelled,
            Self::Resolved(value) => Cancellable::Resolved(value),
        }
    }

    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> Cancellable<U> {
        match self {
            Self::Cancelled => Cancellable::Cancelled,
            Self::Resolved(value) => Cancellable::Resolved(f(value)),
        }
    }
}
