//! Named resource clients and transaction-aware delegates

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::context::{current_scope, ContextKey};
use crate::error::{Error, Result};
use crate::handle::{transaction_key, TransactionHandle};
use crate::traits::TransactionProvider;

/// Resource clients known to a [`TransactionManager`](crate::TransactionManager), by name.
pub struct ClientRegistry<P> {
    clients: HashMap<String, Arc<P>>,
}

impl<P: TransactionProvider> ClientRegistry<P> {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            clients: HashMap::new(),
        }
    }

    /// Register `client` under `name`, returning the client it replaced.
    pub fn insert(&mut self, name: impl Into<String>, client: impl Into<Arc<P>>) -> Option<Arc<P>> {
        self.clients.insert(name.into(), client.into())
    }

    /// Look up a client.
    pub fn get(&self, name: &str) -> Result<Arc<P>> {
        self.clients
            .get(name)
            .cloned()
            .ok_or_else(|| Error::UnknownClient(name.to_string()))
    }

    /// Whether `name` is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.clients.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.clients.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Number of registered clients.
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// Whether no client is registered.
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

impl<P: TransactionProvider> Default for ClientRegistry<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P> fmt::Debug for ClientRegistry<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.clients.keys()).finish()
    }
}

/// What a [`TransactionAware`] client resolves to at one point of a call chain.
pub enum Delegate<P: TransactionProvider> {
    /// A transaction of this client is active.
    Transaction(TransactionHandle<P::Tx>),
    /// No transaction is active; use the base client.
    Base(Arc<P>),
}

impl<P: TransactionProvider> Delegate<P> {
    /// Whether this is the transaction-scoped delegate.
    pub fn is_transaction(&self) -> bool {
        matches!(self, Delegate::Transaction(_))
    }
}

impl<P: TransactionProvider> fmt::Debug for Delegate<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Delegate::Transaction(handle) => f.debug_tuple("Transaction").field(handle).finish(),
            Delegate::Base(_) => f.write_str("Base"),
        }
    }
}

/// A client that routes every call to the active transaction, if any.
///
/// Resolution happens per call through [`TransactionAware::resolve`], so the
/// same value can be stored in a service and used both inside and outside
/// transactional units of work.
pub struct TransactionAware<P: TransactionProvider> {
    name: Arc<str>,
    base: Arc<P>,
    key: ContextKey<TransactionHandle<P::Tx>>,
}

impl<P: TransactionProvider> TransactionAware<P> {
    pub(crate) fn new(name: &str, base: Arc<P>) -> Self {
        Self {
            name: Arc::from(name),
            base,
            key: transaction_key::<P::Tx>(name),
        }
    }

    /// Registered name of the underlying client.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The base client, bypassing any transaction.
    pub fn base(&self) -> &Arc<P> {
        &self.base
    }

    /// The active transaction of this client, if any.
    pub fn transaction(&self) -> Option<TransactionHandle<P::Tx>> {
        current_scope().ok().and_then(|scope| scope.get(&self.key))
    }

    /// Pick the delegate for the current point of the call chain.
    pub fn resolve(&self) -> Delegate<P> {
        match self.transaction() {
            Some(handle) => Delegate::Transaction(handle),
            None => Delegate::Base(Arc::clone(&self.base)),
        }
    }
}

impl<P: TransactionProvider> Clone for TransactionAware<P> {
    fn clone(&self) -> Self {
        Self {
            name: Arc::clone(&self.name),
            base: Arc::clone(&self.base),
            key: self.key.clone(),
        }
    }
}

impl<P: TransactionProvider> fmt::Debug for TransactionAware<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionAware")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}
