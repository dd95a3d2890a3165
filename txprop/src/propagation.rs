//! Propagation policies

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Rule deciding whether a unit of work joins, starts, suspends or rejects a
/// transaction, based on the transaction already active on the call chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Propagation {
    /// Join the ambient transaction, or start one if there is none.
    #[default]
    Required,

    /// Always start a new transaction; an ambient one is left untouched.
    RequiresNew,

    /// Start a new, independent transaction. Savepoints are not used, so this
    /// behaves like [`Propagation::RequiresNew`].
    Nested,

    /// Join the ambient transaction; fail if there is none.
    Mandatory,

    /// Run without a transaction; fail if one is active.
    Never,

    /// Run without a transaction, suspending the ambient one for the duration.
    NotSupported,

    /// Join the ambient transaction if there is one, otherwise run without.
    Supports,
}

impl Propagation {
    /// All policies, in declaration order.
    pub const ALL: [Propagation; 7] = [
        Propagation::Required,
        Propagation::RequiresNew,
        Propagation::Nested,
        Propagation::Mandatory,
        Propagation::Never,
        Propagation::NotSupported,
        Propagation::Supports,
    ];

    /// Canonical upper-case name, e.g. `REQUIRES_NEW`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Propagation::Required => "REQUIRED",
            Propagation::RequiresNew => "REQUIRES_NEW",
            Propagation::Nested => "NESTED",
            Propagation::Mandatory => "MANDATORY",
            Propagation::Never => "NEVER",
            Propagation::NotSupported => "NOT_SUPPORTED",
            Propagation::Supports => "SUPPORTS",
        }
    }
}

/// What the engine does for one call, once the policy has met the ambient state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Strategy {
    /// Run in the current scope; hooks go to the enclosing owner.
    Inline,
    /// Run in a fresh hook scope without a transaction.
    NonTransactional,
    /// Clear the ambient transaction, run in a fresh hook scope, restore it.
    Suspend,
    /// Begin a new transaction and run inside it.
    NewTransaction,
}

impl Propagation {
    /// Pick the strategy for this policy given whether a transaction is
    /// active, or the error for an illegal combination.
    pub fn strategy(self, has_transaction: bool) -> Result<Strategy, Error> {
        match (self, has_transaction) {
            (Propagation::Mandatory, false) => Err(Error::MandatoryPropagation),
            (Propagation::Never, true) => Err(Error::NeverPropagation),
            (Propagation::Mandatory, true)
            | (Propagation::Required, true)
            | (Propagation::Supports, true)
            | (Propagation::NotSupported, false) => Ok(Strategy::Inline),
            (Propagation::Never, false) | (Propagation::Supports, false) => {
                Ok(Strategy::NonTransactional)
            }
            (Propagation::NotSupported, true) => Ok(Strategy::Suspend),
            (Propagation::Required, false)
            | (Propagation::RequiresNew, _)
            | (Propagation::Nested, _) => Ok(Strategy::NewTransaction),
        }
    }
}

impl fmt::Display for Propagation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Propagation {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().replace('-', "_").to_ascii_uppercase();
        Propagation::ALL
            .into_iter()
            .find(|p| p.as_str() == normalized)
            .ok_or_else(|| Error::Config(format!("Unknown propagation: {}", s)))
    }
}
