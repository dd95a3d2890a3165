//! In-process transactional key/value client
//!
//! `MemoryClient` implements [`TransactionProvider`] over a string map.
//! Writes made through a [`MemoryTransaction`] are staged and only become
//! visible to other readers on commit. It keeps commit/rollback counters and
//! the isolation level of every transaction it began, which makes it a
//! convenient stand-in for a database in tests.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;

use crate::error::{Error, Result};
use crate::registry::{Delegate, TransactionAware};
use crate::traits::{IsolationLevel, TransactionProvider};

#[derive(Debug, Default)]
struct MemoryState {
    data: BTreeMap<String, String>,
    commits: u64,
    rollbacks: u64,
    isolation_history: Vec<Option<IsolationLevel>>,
}

/// Transactional in-memory store.
#[derive(Debug, Default)]
pub struct MemoryClient {
    state: Arc<Mutex<MemoryState>>,
    next_native_id: AtomicU64,
}

impl MemoryClient {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a committed value.
    pub fn get(&self, key: &str) -> Option<String> {
        self.state.lock().data.get(key).cloned()
    }

    /// Write a value outside of any transaction (auto-commit).
    pub fn put(&self, key: impl Into<String>, value: impl Into<String>) {
        self.state.lock().data.insert(key.into(), value.into());
    }

    /// Number of committed keys.
    pub fn len(&self) -> usize {
        self.state.lock().data.len()
    }

    /// Whether the store holds no committed keys.
    pub fn is_empty(&self) -> bool {
        self.state.lock().data.is_empty()
    }

    /// Transactions committed so far.
    pub fn commits(&self) -> u64 {
        self.state.lock().commits
    }

    /// Transactions rolled back so far.
    pub fn rollbacks(&self) -> u64 {
        self.state.lock().rollbacks
    }

    /// Isolation level requested by every transaction begun, in order.
    pub fn isolation_history(&self) -> Vec<Option<IsolationLevel>> {
        self.state.lock().isolation_history.clone()
    }

    /// Begin a transaction by hand.
    pub fn begin(&self, isolation: Option<IsolationLevel>) -> MemoryTransaction {
        let native_id = self.next_native_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.state.lock().isolation_history.push(isolation);
        trace!(native_id, ?isolation, "memory transaction begun");
        MemoryTransaction {
            inner: Arc::new(TxInner {
                native_id,
                isolation,
                writes: Mutex::new(Some(BTreeMap::new())),
                state: Arc::clone(&self.state),
            }),
        }
    }
}

impl TransactionProvider for MemoryClient {
    type Tx = MemoryTransaction;

    fn transaction<R, E, F, Fut>(
        &self,
        isolation: Option<IsolationLevel>,
        body: F,
    ) -> impl Future<Output = std::result::Result<R, E>> + Send
    where
        R: Send,
        E: From<Error> + Send,
        F: FnOnce(Self::Tx) -> Fut + Send,
        Fut: Future<Output = std::result::Result<R, E>> + Send,
    {
        async move {
            let tx = self.begin(isolation);
            match body(tx.clone()).await {
                Ok(value) => {
                    tx.commit()?;
                    Ok(value)
                }
                Err(e) => {
                    // Already settled only if the body settled it by hand
                    let _ = tx.rollback();
                    Err(e)
                }
            }
        }
    }
}

#[derive(Debug)]
struct TxInner {
    native_id: u64,
    isolation: Option<IsolationLevel>,
    // `None` once committed or rolled back
    writes: Mutex<Option<BTreeMap<String, Option<String>>>>,
    state: Arc<Mutex<MemoryState>>,
}

/// A transaction against a [`MemoryClient`].
///
/// Cloning is cheap; all clones share the same staged writes.
#[derive(Debug, Clone)]
pub struct MemoryTransaction {
    inner: Arc<TxInner>,
}

impl MemoryTransaction {
    /// Identifier assigned by the store.
    pub fn native_id(&self) -> u64 {
        self.inner.native_id
    }

    /// Isolation level this transaction was begun with.
    pub fn isolation(&self) -> Option<IsolationLevel> {
        self.inner.isolation
    }

    /// Whether the transaction has been committed or rolled back.
    pub fn is_finished(&self) -> bool {
        self.inner.writes.lock().is_none()
    }

    /// Read a value, seeing this transaction's own staged writes.
    pub fn get(&self, key: &str) -> Result<Option<String>> {
        let writes = self.inner.writes.lock();
        let staged = writes.as_ref().ok_or(Error::TransactionFinished)?;
        match staged.get(key) {
            Some(value) => Ok(value.clone()),
            None => Ok(self.inner.state.lock().data.get(key).cloned()),
        }
    }

    /// Stage a write.
    pub fn put(&self, key: impl Into<String>, value: impl Into<String>) -> Result<()> {
        self.stage(key.into(), Some(value.into()))
    }

    /// Stage a delete.
    pub fn delete(&self, key: impl Into<String>) -> Result<()> {
        self.stage(key.into(), None)
    }

    fn stage(&self, key: String, value: Option<String>) -> Result<()> {
        let mut writes = self.inner.writes.lock();
        writes
            .as_mut()
            .ok_or(Error::TransactionFinished)?
            .insert(key, value);
        Ok(())
    }

    /// Apply staged writes.
    pub fn commit(&self) -> Result<()> {
        let writes = self
            .inner
            .writes
            .lock()
            .take()
            .ok_or(Error::TransactionFinished)?;
        let mut state = self.inner.state.lock();
        for (key, value) in writes {
            match value {
                Some(value) => {
                    state.data.insert(key, value);
                }
                None => {
                    state.data.remove(&key);
                }
            }
        }
        state.commits += 1;
        trace!(native_id = self.inner.native_id, "memory transaction committed");
        Ok(())
    }

    /// Discard staged writes.
    pub fn rollback(&self) -> Result<()> {
        self.inner
            .writes
            .lock()
            .take()
            .ok_or(Error::TransactionFinished)?;
        self.inner.state.lock().rollbacks += 1;
        trace!(native_id = self.inner.native_id, "memory transaction rolled back");
        Ok(())
    }
}

impl TransactionAware<MemoryClient> {
    /// Read through the active transaction, or the committed data outside one.
    pub fn get(&self, key: &str) -> Result<Option<String>> {
        match self.resolve() {
            Delegate::Transaction(handle) => handle.tx().get(key),
            Delegate::Base(client) => Ok(client.get(key)),
        }
    }

    /// Write through the active transaction, or auto-commit outside one.
    pub fn put(&self, key: impl Into<String>, value: impl Into<String>) -> Result<()> {
        match self.resolve() {
            Delegate::Transaction(handle) => handle.tx().put(key, value),
            Delegate::Base(client) => {
                client.put(key, value);
                Ok(())
            }
        }
    }
}
