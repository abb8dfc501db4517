//! Correctness and badness model.
//!
//! Every live subscription carries a `Badness` describing its current
//! health. The badness reason maps onto a coarse `CorrectnessId`; only the
//! usable/not-usable split is load bearing; the finer grades are
//! informational.

use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;

/// Coarse correctness grade of a subscription's data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CorrectnessId {
    /// Data is complete and current.
    Good,
    /// Data is complete but may be out of date.
    Usable,
    /// Data is incomplete or being re-synchronised.
    Suspect,
    /// Data cannot be obtained.
    Error,
}

impl CorrectnessId {
    /// Whether data with this grade may be consumed.
    pub fn is_usable(&self) -> bool {
        matches!(self, Self::Good | Self::Usable)
    }
}

impl fmt::Display for CorrectnessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Good => write!(f, "GOOD"),
            Self::Usable => write!(f, "USABLE"),
            Self::Suspect => write!(f, "SUSPECT"),
            Self::Error => write!(f, "ERROR"),
        }
    }
}

/// Reason a subscription is not fully healthy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BadnessReason {
    NotBad,
    /// Not yet opened on the transport.
    Inactive,
    /// Subscription request sent, no acknowledgement yet.
    Subscribing,
    /// Acknowledged, waiting for the first complete snapshot.
    Synchronising,
    /// Transport connection lost; data will be re-synchronised.
    Reconnecting,
    /// Data is held but updates are delayed.
    Stale,
    /// Publisher reported an error for this feed.
    PublisherError,
    /// Subscription refused. Terminal.
    Rejected,
}

impl BadnessReason {
    /// Correctness grade implied by this reason.
    pub fn correctness(&self) -> CorrectnessId {
        match self {
            Self::NotBad => CorrectnessId::Good,
            Self::Stale => CorrectnessId::Usable,
            Self::Inactive | Self::Subscribing | Self::Synchronising | Self::Reconnecting => {
                CorrectnessId::Suspect
            }
            Self::PublisherError | Self::Rejected => CorrectnessId::Error,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotBad => "notBad",
            Self::Inactive => "inactive",
            Self::Subscribing => "subscribing",
            Self::Synchronising => "synchronising",
            Self::Reconnecting => "reconnecting",
            Self::Stale => "stale",
            Self::PublisherError => "publisherError",
            Self::Rejected => "rejected",
        }
    }
}

/// Health descriptor: reason code plus human readable text.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Badness {
    pub reason: BadnessReason,
    pub text: Cow<'static, str>,
}

impl Badness {
    /// Fully healthy.
    pub const NOT_BAD: Self = Self {
        reason: BadnessReason::NotBad,
        text: Cow::Borrowed(""),
    };

    pub fn new(reason: BadnessReason) -> Self {
        Self {
            reason,
            text: Cow::Borrowed(""),
        }
    }

    pub fn with_text(reason: BadnessReason, text: impl Into<String>) -> Self {
        Self {
            reason,
            text: Cow::Owned(text.into()),
        }
    }

    pub fn correctness(&self) -> CorrectnessId {
        self.reason.correctness()
    }

    pub fn is_good(&self) -> bool {
        self.reason == BadnessReason::NotBad
    }

    pub fn is_rejected(&self) -> bool {
        self.reason == BadnessReason::Rejected
    }
}

impl Default for Badness {
    fn default() -> Self {
        Self::NOT_BAD
    }
}

impl fmt::Display for Badness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.text.is_empty() {
            f.write_str(self.reason.as_str())
        } else {
            write!(f, "{}: {}", self.reason.as_str(), self.text)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usable_grades() {
        assert!(CorrectnessId::Good.is_usable());
        assert!(CorrectnessId::Usable.is_usable());
        assert!(!CorrectnessId::Suspect.is_usable());
        assert!(!CorrectnessId::Error.is_usable());
    }

    #[test]
    fn test_reason_mapping() {
        assert_eq!(BadnessReason::NotBad.correctness(), CorrectnessId::Good);
        assert_eq!(BadnessReason::Stale.correctness(), CorrectnessId::Usable);
        assert_eq!(
            BadnessReason::Synchronising.correctness(),
            CorrectnessId::Suspect
        );
        assert_eq!(BadnessReason::Rejected.correctness(), CorrectnessId::Error);
    }

    #[test]
    fn test_badness_display() {
        assert_eq!(Badness::NOT_BAD.to_string(), "notBad");
        let b = Badness::with_text(BadnessReason::PublisherError, "feed halted");
        assert_eq!(b.to_string(), "publisherError: feed halted");
        assert!(!b.is_good());
        assert!(Badness::default().is_good());
    }
}
