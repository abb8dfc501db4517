//! Data definitions.
//!
//! A `DataDefinition` fully describes one requested live feed: its kind plus
//! the parameters that select it. Definitions are immutable values with
//! structural equality, so two equal definitions can share one feed stream.

use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Tradable instrument identifier (code listed on an exchange).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InstrumentId {
    pub code: String,
    pub exchange: String,
}

impl InstrumentId {
    pub fn new(code: impl Into<String>, exchange: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            exchange: exchange.into(),
        }
    }
}

impl fmt::Display for InstrumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.code, self.exchange)
    }
}

/// Brokerage account identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(pub String);

impl AccountId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Feed kind, the parameter-free part of a definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FeedKind {
    BrokerageAccounts,
    Depth,
    Trades,
    Security,
    Orders,
    Holdings,
    Balances,
}

impl FeedKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BrokerageAccounts => "brokerageAccounts",
            Self::Depth => "depth",
            Self::Trades => "trades",
            Self::Security => "security",
            Self::Orders => "orders",
            Self::Holdings => "holdings",
            Self::Balances => "balances",
        }
    }

    /// Whether records of this feed are keyed by account.
    pub fn is_account_scoped(&self) -> bool {
        matches!(self, Self::Orders | Self::Holdings | Self::Balances)
    }
}

impl fmt::Display for FeedKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable description of a requested live data feed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum DataDefinition {
    /// List of all brokerage accounts visible to the session.
    BrokerageAccounts,
    /// Market depth (order book) of one instrument.
    Depth { instrument: InstrumentId },
    /// Trade history of one instrument.
    Trades { instrument: InstrumentId },
    /// Security detail of one instrument.
    Security { instrument: InstrumentId },
    /// Working orders of one account.
    Orders { account: AccountId },
    /// Holdings of one account.
    Holdings { account: AccountId },
    /// Cash balances of one account.
    Balances { account: AccountId },
}

impl DataDefinition {
    pub fn depth(instrument: InstrumentId) -> Self {
        Self::Depth { instrument }
    }

    pub fn trades(instrument: InstrumentId) -> Self {
        Self::Trades { instrument }
    }

    pub fn orders(account: AccountId) -> Self {
        Self::Orders { account }
    }

    /// Feed kind of this definition.
    pub fn feed_kind(&self) -> FeedKind {
        match self {
            Self::BrokerageAccounts => FeedKind::BrokerageAccounts,
            Self::Depth { .. } => FeedKind::Depth,
            Self::Trades { .. } => FeedKind::Trades,
            Self::Security { .. } => FeedKind::Security,
            Self::Orders { .. } => FeedKind::Orders,
            Self::Holdings { .. } => FeedKind::Holdings,
            Self::Balances { .. } => FeedKind::Balances,
        }
    }

    /// Check that every parameter is present.
    ///
    /// A definition that fails validation is still accepted by the service
    /// but its handle is rejected instead of opened.
    pub fn validate(&self) -> CoreResult<()> {
        match self {
            Self::BrokerageAccounts => Ok(()),
            Self::Depth { instrument }
            | Self::Trades { instrument }
            | Self::Security { instrument } => {
                if instrument.code.trim().is_empty() || instrument.exchange.trim().is_empty() {
                    Err(CoreError::InvalidDefinition(format!(
                        "{} requires instrument code and exchange",
                        self.feed_kind()
                    )))
                } else {
                    Ok(())
                }
            }
            Self::Orders { account } | Self::Holdings { account } | Self::Balances { account } => {
                if account.as_str().trim().is_empty() {
                    Err(CoreError::InvalidDefinition(format!(
                        "{} requires an account id",
                        self.feed_kind()
                    )))
                } else {
                    Ok(())
                }
            }
        }
    }
}

impl fmt::Display for DataDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BrokerageAccounts => write!(f, "{}", self.feed_kind()),
            Self::Depth { instrument }
            | Self::Trades { instrument }
            | Self::Security { instrument } => write!(f, "{}[{}]", self.feed_kind(), instrument),
            Self::Orders { account } | Self::Holdings { account } | Self::Balances { account } => {
                write!(f, "{}[{}]", self.feed_kind(), account)
            }
        }
    }
}
