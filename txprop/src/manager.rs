//! The propagation engine

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::debug;

use crate::config::{defaults, TransactionalConfig};
use crate::context::{current_scope, ContextKey, ContextStorage, Scope, StorageDriver};
use crate::error::{Error, Result};
use crate::handle::{transaction_key, TransactionHandle, TransactionId};
use crate::hooks::{HookRegistry, Outcome, HOOKS};
use crate::propagation::{Propagation, Strategy};
use crate::registry::{ClientRegistry, TransactionAware};
use crate::traits::{IsolationLevel, TransactionProvider};

/// Per-call transaction settings. Unset fields fall back to the manager's
/// [`TransactionalConfig`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransactionOptions {
    /// Propagation policy
    pub propagation: Option<Propagation>,
    /// Isolation level for a newly started transaction
    pub isolation: Option<IsolationLevel>,
    /// Registered client to run against
    pub client: Option<String>,
}

impl TransactionOptions {
    /// Options that defer everything to the manager's configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the propagation policy.
    pub fn propagation(mut self, propagation: Propagation) -> Self {
        self.propagation = Some(propagation);
        self
    }

    /// Set the isolation level.
    pub fn isolation(mut self, isolation: IsolationLevel) -> Self {
        self.isolation = Some(isolation);
        self
    }

    /// Set the client name.
    pub fn client(mut self, name: impl Into<String>) -> Self {
        self.client = Some(name.into());
        self
    }
}

impl From<Propagation> for TransactionOptions {
    fn from(propagation: Propagation) -> Self {
        Self::new().propagation(propagation)
    }
}

struct ManagerInner<P> {
    registry: ClientRegistry<P>,
    storage: ContextStorage,
    config: TransactionalConfig,
}

/// Decides, per call, whether a unit of work joins, starts, suspends or
/// rejects a transaction, and runs it accordingly.
///
/// Cloning is cheap: clones share the client registry and configuration.
///
/// # Example
///
/// ```ignore
/// let manager = TransactionManager::builder()
///     .client("default", MySqlClient::new(&url)?)
///     .build()?;
///
/// let id = manager
///     .run(Propagation::RequiresNew.into(), || async {
///         let db = manager.default_client()?;
///         db.execute("INSERT INTO audit (msg) VALUES (?)", ("login",)).await?;
///         Ok::<_, AppError>(db.last_insert_id())
///     })
///     .await?;
/// ```
pub struct TransactionManager<P: TransactionProvider> {
    inner: Arc<ManagerInner<P>>,
}

impl<P: TransactionProvider> Clone for TransactionManager<P> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<P: TransactionProvider> fmt::Debug for TransactionManager<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionManager")
            .field("clients", &self.inner.registry)
            .field("driver", &self.inner.storage.driver())
            .field("config", &self.inner.config)
            .finish()
    }
}

impl<P: TransactionProvider> TransactionManager<P> {
    /// Start configuring a manager.
    pub fn builder() -> TransactionManagerBuilder<P> {
        TransactionManagerBuilder::new()
    }

    /// Manager with a single client registered under the default name.
    pub fn with_client(client: impl Into<Arc<P>>) -> Result<Self> {
        Self::builder().client(defaults::CLIENT_NAME, client).build()
    }

    /// Effective configuration.
    pub fn config(&self) -> &TransactionalConfig {
        &self.inner.config
    }

    /// Resolved context storage driver.
    pub fn storage_driver(&self) -> StorageDriver {
        self.inner.storage.driver()
    }

    /// Registered clients.
    pub fn registry(&self) -> &ClientRegistry<P> {
        &self.inner.registry
    }

    /// Transaction-aware view of the client registered as `name`.
    pub fn client(&self, name: &str) -> Result<TransactionAware<P>> {
        let base = self.inner.registry.get(name)?;
        Ok(TransactionAware::new(name, base))
    }

    /// Transaction-aware view of the default client.
    pub fn default_client(&self) -> Result<TransactionAware<P>> {
        self.client(defaults::CLIENT_NAME)
    }

    /// Active transaction of client `name` on this call chain.
    pub fn current_transaction(&self, name: &str) -> Option<TransactionHandle<P::Tx>> {
        current_scope()
            .ok()
            .and_then(|scope| scope.get(&transaction_key::<P::Tx>(name)))
    }

    /// Identifier of the default client's active transaction.
    pub fn current_transaction_id(&self) -> Option<TransactionId> {
        self.current_transaction(defaults::CLIENT_NAME)
            .map(|handle| handle.id())
    }

    /// Run `f` as a transactional unit of work.
    ///
    /// Errors returned by `f` come back unchanged (after any rollback and
    /// rollback hooks). Engine failures, such as a violated `MANDATORY` or
    /// `NEVER` policy or an unknown client, arrive through `E: From<Error>`.
    pub async fn run<T, E, F, Fut>(&self, options: TransactionOptions, f: F) -> std::result::Result<T, E>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = std::result::Result<T, E>> + Send,
        T: Send,
        E: From<Error> + Send,
    {
        let client_name: Arc<str> =
            Arc::from(options.client.as_deref().unwrap_or(defaults::CLIENT_NAME));
        let client = self.inner.registry.get(&client_name)?;
        let propagation = options
            .propagation
            .unwrap_or(self.inner.config.default_propagation);
        let isolation = options.isolation.or(self.inner.config.default_isolation);

        self.inner
            .storage
            .run_within_new_scope(async move {
                let scope = current_scope()?;

                // The outermost call of a chain owns the ambient hook scope.
                let ambient = if scope.get(&HOOKS).is_none() {
                    let registry = self.new_hook_registry();
                    scope.set(&HOOKS, Some(Arc::clone(&registry)));
                    Some(registry)
                } else {
                    None
                };

                let key = transaction_key::<P::Tx>(&client_name);
                let current = scope.get(&key);
                let strategy = propagation.strategy(current.is_some())?;
                debug!(
                    %propagation,
                    client = %client_name,
                    active = ?current.as_ref().map(|h| h.id()),
                    ?strategy,
                    "Transaction propagation resolved"
                );

                let result = match strategy {
                    Strategy::Inline => f().await,
                    Strategy::NonTransactional => self.run_non_transactional(&scope, f).await,
                    Strategy::Suspend => {
                        let _resume = Suspended::new(scope.clone(), key.clone(), current);
                        self.run_non_transactional(&scope, f).await
                    }
                    Strategy::NewTransaction => {
                        if propagation == Propagation::Nested && current.is_some() {
                            debug!("NESTED runs as an independent transaction, savepoints are not used");
                        }
                        self.run_new_transaction(&scope, &client, client_name, key, isolation, f)
                            .await
                    }
                };

                if let Some(registry) = ambient {
                    registry.dispatch(Outcome::Finished);
                }
                result
            })
            .await
    }

    /// Wrap `f` so that every call runs through [`TransactionManager::run`]
    /// with `options`. The returned callable has the same argument and
    /// result types as `f`; use a tuple for several arguments.
    pub fn wrap<A, T, E, F, Fut>(
        &self,
        options: TransactionOptions,
        f: F,
    ) -> impl Fn(A) -> BoxFuture<'static, std::result::Result<T, E>> + Clone + Send + Sync
    where
        F: Fn(A) -> Fut + Clone + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<T, E>> + Send + 'static,
        A: Send + 'static,
        T: Send + 'static,
        E: From<Error> + Send + 'static,
    {
        let manager = self.clone();
        move |args: A| {
            let manager = manager.clone();
            let options = options.clone();
            let f = f.clone();
            Box::pin(async move { manager.run(options, move || f(args)).await })
        }
    }

    fn new_hook_registry(&self) -> Arc<HookRegistry> {
        Arc::new(HookRegistry::new(self.inner.config.max_hook_handlers))
    }

    async fn run_non_transactional<T, E, F, Fut>(&self, scope: &Scope, f: F) -> std::result::Result<T, E>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = std::result::Result<T, E>> + Send,
    {
        let registry = self.new_hook_registry();
        scope.set(&HOOKS, Some(Arc::clone(&registry)));
        let result = f().await;
        registry.dispatch(Outcome::Finished);
        result
    }

    async fn run_new_transaction<T, E, F, Fut>(
        &self,
        scope: &Scope,
        client: &P,
        client_name: Arc<str>,
        key: ContextKey<TransactionHandle<P::Tx>>,
        isolation: Option<IsolationLevel>,
        f: F,
    ) -> std::result::Result<T, E>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = std::result::Result<T, E>> + Send,
        T: Send,
        E: From<Error> + Send,
    {
        let registry = self.new_hook_registry();
        scope.set(&HOOKS, Some(Arc::clone(&registry)));

        let id = TransactionId::next();
        debug!(%id, client = %client_name, ?isolation, "Beginning transaction");

        let body_scope = scope.clone();
        let result = client
            .transaction(isolation, move |tx| async move {
                body_scope.set(&key, Some(TransactionHandle::new(id, isolation, client_name, tx)));
                let _clear = Cleared {
                    scope: body_scope,
                    key,
                };
                f().await
            })
            .await;

        let outcome = if result.is_ok() {
            Outcome::Committed
        } else {
            Outcome::RolledBack
        };
        debug!(%id, ?outcome, "Transaction settled");
        registry.dispatch(outcome);
        result
    }
}

/// Clears a transaction slot when the unit of work inside it settles.
struct Cleared<T: Send + Sync + 'static> {
    scope: Scope,
    key: ContextKey<T>,
}

impl<T: Send + Sync + 'static> Drop for Cleared<T> {
    fn drop(&mut self) {
        self.scope.set(&self.key, None);
    }
}

/// Holds a suspended transaction and writes it back on drop, so it is
/// restored even when the inner call fails or unwinds.
struct Suspended<T: Clone + Send + Sync + 'static> {
    scope: Scope,
    key: ContextKey<T>,
    previous: Option<T>,
}

impl<T: Clone + Send + Sync + 'static> Suspended<T> {
    fn new(scope: Scope, key: ContextKey<T>, previous: Option<T>) -> Self {
        scope.set(&key, None);
        Self {
            scope,
            key,
            previous,
        }
    }
}

impl<T: Clone + Send + Sync + 'static> Drop for Suspended<T> {
    fn drop(&mut self) {
        self.scope.set(&self.key, self.previous.take());
    }
}

/// Builder for a [`TransactionManager`]; `build` is the initialization step
/// that must happen before any transactional call.
pub struct TransactionManagerBuilder<P: TransactionProvider> {
    registry: ClientRegistry<P>,
    config: TransactionalConfig,
}

impl<P: TransactionProvider> TransactionManagerBuilder<P> {
    /// Create a builder with default configuration and no clients.
    pub fn new() -> Self {
        Self {
            registry: ClientRegistry::new(),
            config: TransactionalConfig::default(),
        }
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: TransactionalConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the context storage driver.
    pub fn storage_driver(mut self, driver: StorageDriver) -> Self {
        self.config.storage_driver = driver;
        self
    }

    /// Set the propagation used when a call names none.
    pub fn default_propagation(mut self, propagation: Propagation) -> Self {
        self.config.default_propagation = propagation;
        self
    }

    /// Set the isolation level used when a call names none.
    pub fn default_isolation(mut self, isolation: IsolationLevel) -> Self {
        self.config.default_isolation = Some(isolation);
        self
    }

    /// Set the hook count per scope above which a warning is logged.
    pub fn max_hook_handlers(mut self, max: usize) -> Self {
        self.config.max_hook_handlers = max;
        self
    }

    /// Register a client under `name`.
    pub fn client(mut self, name: impl Into<String>, client: impl Into<Arc<P>>) -> Self {
        self.registry.insert(name, client);
        self
    }

    /// Validate the configuration and create the manager.
    pub fn build(self) -> Result<TransactionManager<P>> {
        self.config.validate()?;
        if self.registry.is_empty() {
            return Err(Error::Config(
                "at least one transactional client must be registered".into(),
            ));
        }
        let storage = ContextStorage::new(self.config.storage_driver);
        debug!(
            driver = ?storage.driver(),
            clients = ?self.registry.names(),
            "Transaction manager initialized"
        );
        Ok(TransactionManager {
            inner: Arc::new(ManagerInner {
                registry: self.registry,
                storage,
                config: self.config,
            }),
        })
    }
}

impl<P: TransactionProvider> Default for TransactionManagerBuilder<P> {
    fn default() -> Self {
        Self::new()
    }
}
