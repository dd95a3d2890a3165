//! Statement execution shared by clients, transactions and delegates

use async_trait::async_trait;
use mysql_async::prelude::FromRow;
use mysql_async::Params;

use crate::error::Result;
use crate::registry::{Delegate, TransactionAware};

use super::MySqlClient;

/// Result of a statement execution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecuteResult {
    /// Number of rows affected by the statement
    pub rows_affected: u64,
    /// Last insert ID (for INSERT statements)
    pub last_insert_id: Option<u64>,
}

/// Something MySQL statements can be issued against.
///
/// Implemented by [`MySqlClient`] (auto-commit), by
/// [`MySqlTransaction`](super::MySqlTransaction), and by
/// `TransactionAware<MySqlClient>`, which picks one of the two per call.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Execute a statement and report affected rows.
    async fn execute<P>(&self, sql: &str, params: P) -> Result<ExecuteResult>
    where
        P: Into<Params> + Send;

    /// Fetch all rows.
    async fn fetch_all<T, P>(&self, sql: &str, params: P) -> Result<Vec<T>>
    where
        T: FromRow + Send + 'static,
        P: Into<Params> + Send;

    /// Fetch the first row, if any. Single-column rows map onto plain values.
    async fn fetch_optional<T, P>(&self, sql: &str, params: P) -> Result<Option<T>>
    where
        T: FromRow + Send + 'static,
        P: Into<Params> + Send;
}

#[async_trait]
impl Executor for TransactionAware<MySqlClient> {
    async fn execute<P>(&self, sql: &str, params: P) -> Result<ExecuteResult>
    where
        P: Into<Params> + Send,
    {
        match self.resolve() {
            Delegate::Transaction(handle) => handle.tx().execute(sql, params).await,
            Delegate::Base(client) => client.execute(sql, params).await,
        }
    }

    async fn fetch_all<T, P>(&self, sql: &str, params: P) -> Result<Vec<T>>
    where
        T: FromRow + Send + 'static,
        P: Into<Params> + Send,
    {
        match self.resolve() {
            Delegate::Transaction(handle) => handle.tx().fetch_all(sql, params).await,
            Delegate::Base(client) => client.fetch_all(sql, params).await,
        }
    }

    async fn fetch_optional<T, P>(&self, sql: &str, params: P) -> Result<Option<T>>
    where
        T: FromRow + Send + 'static,
        P: Into<Params> + Send,
    {
        match self.resolve() {
            Delegate::Transaction(handle) => handle.tx().fetch_optional(sql, params).await,
            Delegate::Base(client) => client.fetch_optional(sql, params).await,
        }
    }
}
