//! Transaction handles stored in the execution context

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::context::{current_scope, ContextKey};
use crate::traits::IsolationLevel;

static NEXT_TRANSACTION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identifier of a transaction started by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransactionId(u64);

impl TransactionId {
    pub(crate) fn next() -> Self {
        Self(NEXT_TRANSACTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw numeric value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tx-{}", self.0)
    }
}

/// A live transaction, as seen by the unit of work running inside it.
///
/// `T` is the provider's transaction-scoped delegate.
#[derive(Clone)]
pub struct TransactionHandle<T> {
    id: TransactionId,
    isolation: Option<IsolationLevel>,
    client: Arc<str>,
    tx: T,
}

impl<T> TransactionHandle<T> {
    pub(crate) fn new(
        id: TransactionId,
        isolation: Option<IsolationLevel>,
        client: Arc<str>,
        tx: T,
    ) -> Self {
        Self {
            id,
            isolation,
            client,
            tx,
        }
    }

    /// Engine-assigned identifier.
    pub fn id(&self) -> TransactionId {
        self.id
    }

    /// Requested isolation level, if any.
    pub fn isolation(&self) -> Option<IsolationLevel> {
        self.isolation
    }

    /// Name of the client that owns this transaction.
    pub fn client(&self) -> &str {
        &self.client
    }

    /// The transaction-scoped delegate.
    pub fn tx(&self) -> &T {
        &self.tx
    }

    /// Take the delegate out of the handle.
    pub fn into_inner(self) -> T {
        self.tx
    }
}

impl<T> fmt::Debug for TransactionHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionHandle")
            .field("id", &self.id)
            .field("isolation", &self.isolation)
            .field("client", &self.client)
            .finish_non_exhaustive()
    }
}

/// Scope key under which the transaction of `client` is stored.
pub(crate) fn transaction_key<T>(client: &str) -> ContextKey<TransactionHandle<T>> {
    ContextKey::named(format!("txprop/transaction/{}", client))
}

/// The transaction of `client` active on this call chain, if any.
///
/// `T` must be the client's transaction delegate type; any other type reads
/// as `None`.
pub fn current_transaction<T>(client: &str) -> Option<TransactionHandle<T>>
where
    T: Clone + Send + Sync + 'static,
{
    current_scope()
        .ok()
        .and_then(|scope| scope.get(&transaction_key::<T>(client)))
}
