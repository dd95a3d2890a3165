//! MySQL transaction delegate

use std::sync::Arc;

use async_trait::async_trait;
use mysql_async::prelude::{FromRow, Queryable};
use mysql_async::Params;
use tokio::sync::Mutex;

use crate::error::{Error, Result};
use crate::traits::IsolationLevel;

use super::executor::{ExecuteResult, Executor};

/// A MySQL transaction, shared by everything running inside it.
///
/// Clones refer to the same `mysql_async::Transaction`. Once the provider has
/// committed or rolled it back, every clone fails with
/// [`Error::TransactionFinished`].
#[derive(Clone)]
pub struct MySqlTransaction {
    // mysql_async::Transaction needs &mut for queries; the lock is only
    // contended when one transaction is used from concurrent branches.
    inner: Arc<Mutex<Option<mysql_async::Transaction<'static>>>>,
}

impl MySqlTransaction {
    pub(crate) fn new(tx: mysql_async::Transaction<'static>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Some(tx))),
        }
    }

    async fn take_inner(&self) -> Result<mysql_async::Transaction<'static>> {
        self.inner
            .lock()
            .await
            .take()
            .ok_or(Error::TransactionFinished)
    }

    /// Whether the transaction has been committed or rolled back.
    pub async fn is_finished(&self) -> bool {
        self.inner.lock().await.is_none()
    }

    pub(crate) async fn commit(&self) -> Result<()> {
        let tx = self.take_inner().await?;
        tx.commit().await?;
        Ok(())
    }

    pub(crate) async fn rollback(&self) -> Result<()> {
        let tx = self.take_inner().await?;
        tx.rollback().await?;
        Ok(())
    }
}

impl std::fmt::Debug for MySqlTransaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MySqlTransaction").finish_non_exhaustive()
    }
}

#[async_trait]
impl Executor for MySqlTransaction {
    async fn execute<P>(&self, sql: &str, params: P) -> Result<ExecuteResult>
    where
        P: Into<Params> + Send,
    {
        let mut guard = self.inner.lock().await;
        let tx = guard.as_mut().ok_or(Error::TransactionFinished)?;

        tx.exec_drop(sql, params).await?;

        Ok(ExecuteResult {
            rows_affected: tx.affected_rows(),
            last_insert_id: tx.last_insert_id(),
        })
    }

    async fn fetch_all<T, P>(&self, sql: &str, params: P) -> Result<Vec<T>>
    where
        T: FromRow + Send + 'static,
        P: Into<Params> + Send,
    {
        let mut guard = self.inner.lock().await;
        let tx = guard.as_mut().ok_or(Error::TransactionFinished)?;
        Ok(tx.exec(sql, params).await?)
    }

    async fn fetch_optional<T, P>(&self, sql: &str, params: P) -> Result<Option<T>>
    where
        T: FromRow + Send + 'static,
        P: Into<Params> + Send,
    {
        let mut guard = self.inner.lock().await;
        let tx = guard.as_mut().ok_or(Error::TransactionFinished)?;
        Ok(tx.exec_first(sql, params).await?)
    }
}

/// Convert txprop IsolationLevel to mysql_async IsolationLevel.
pub(crate) fn to_mysql_isolation(level: IsolationLevel) -> mysql_async::IsolationLevel {
    match level {
        IsolationLevel::ReadUncommitted => mysql_async::IsolationLevel::ReadUncommitted,
        IsolationLevel::ReadCommitted => mysql_async::IsolationLevel::ReadCommitted,
        IsolationLevel::RepeatableRead => mysql_async::IsolationLevel::RepeatableRead,
        IsolationLevel::Serializable => mysql_async::IsolationLevel::Serializable,
    }
}
