//! Transaction provider contract

use std::fmt;
use std::future::Future;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Transaction isolation level.
///
/// Defines the degree to which one transaction must be isolated from
/// resource or data modifications made by other transactions. When no level
/// is requested the client's own default applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsolationLevel {
    /// Allows dirty reads, non-repeatable reads, and phantom reads.
    ReadUncommitted,

    /// Prevents dirty reads but allows non-repeatable reads and phantom reads.
    ReadCommitted,

    /// Prevents dirty reads and non-repeatable reads but allows phantom reads.
    RepeatableRead,

    /// Provides full isolation. Transactions are completely isolated from one another.
    Serializable,
}

impl IsolationLevel {
    /// SQL spelling, e.g. `READ COMMITTED`.
    pub fn as_sql(&self) -> &'static str {
        match self {
            IsolationLevel::ReadUncommitted => "READ UNCOMMITTED",
            IsolationLevel::ReadCommitted => "READ COMMITTED",
            IsolationLevel::RepeatableRead => "REPEATABLE READ",
            IsolationLevel::Serializable => "SERIALIZABLE",
        }
    }
}

impl fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

impl FromStr for IsolationLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_lowercase();
        match normalized.as_str() {
            "readuncommitted" => Ok(IsolationLevel::ReadUncommitted),
            "readcommitted" => Ok(IsolationLevel::ReadCommitted),
            "repeatableread" => Ok(IsolationLevel::RepeatableRead),
            "serializable" => Ok(IsolationLevel::Serializable),
            _ => Err(Error::Config(format!("Unknown isolation level: {}", s))),
        }
    }
}

/// A resource client that can run a unit of work inside a native transaction.
///
/// The provider owns the commit/rollback decision: it begins a transaction
/// with the requested isolation level, hands the transaction-scoped delegate
/// to `body`, and then commits if `body` returned `Ok` or rolls back if it
/// returned `Err`. The body's value or error is passed through unchanged.
/// Failures of the client itself (begin, commit) are reported through
/// `E: From<Error>`.
///
/// # Example
///
/// ```ignore
/// let id = client
///     .transaction(Some(IsolationLevel::ReadCommitted), |tx| async move {
///         tx.execute("INSERT INTO users (name) VALUES (?)", ("Alice",)).await?;
///         Ok::<_, txprop::Error>(tx.last_insert_id())
///     })
///     .await?;
/// ```
pub trait TransactionProvider: Send + Sync + 'static {
    /// Transaction-scoped delegate handed to the unit of work.
    ///
    /// Clones must refer to the same underlying transaction.
    type Tx: Clone + Send + Sync + 'static;

    /// Run `body` inside a new transaction.
    fn transaction<R, E, F, Fut>(
        &self,
        isolation: Option<IsolationLevel>,
        body: F,
    ) -> impl Future<Output = Result<R, E>> + Send
    where
        R: Send,
        E: From<Error> + Send,
        F: FnOnce(Self::Tx) -> Fut + Send,
        Fut: Future<Output = Result<R, E>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_isolation_level() {
        assert_eq!(
            "ReadCommitted".parse::<IsolationLevel>().unwrap(),
            IsolationLevel::ReadCommitted
        );
        assert_eq!(
            "repeatable_read".parse::<IsolationLevel>().unwrap(),
            IsolationLevel::RepeatableRead
        );
        assert_eq!(
            "READ UNCOMMITTED".parse::<IsolationLevel>().unwrap(),
            IsolationLevel::ReadUncommitted
        );
        assert!("snapshot".parse::<IsolationLevel>().is_err());
    }

    #[test]
    fn test_sql_spelling() {
        assert_eq!(IsolationLevel::Serializable.as_sql(), "SERIALIZABLE");
        assert_eq!(IsolationLevel::ReadCommitted.to_string(), "READ COMMITTED");
    }
}
