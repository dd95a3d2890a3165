//! Execution context store
//!
//! A [`Scope`] is a key/value map bound to one logical call chain. Exactly one
//! scope is current at any point of a chain, and it follows the chain across
//! `.await` points. Two drivers install scopes:
//!
//! - [`StorageDriver::TaskLocal`] uses `tokio::task_local!`.
//! - [`StorageDriver::PollScoped`] wraps the future in [`Scoped`], which puts
//!   the scope into a thread-local slot for the duration of every `poll`. It
//!   works on any executor.
//!
//! Both behave the same: a child scope starts as a copy of its parent, and
//! writes into the child are gone once control returns to the parent.

mod poll_scoped;
mod task_local;

use std::any::Any;
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub use poll_scoped::Scoped;

static NEXT_SCOPE_ID: AtomicU64 = AtomicU64::new(1);
static NEXT_INSTALL: AtomicU64 = AtomicU64::new(1);

/// Install stamps increase with every poll that enters a scope, so within
/// one call stack the innermost installed scope holds the largest stamp.
fn next_install() -> u64 {
    NEXT_INSTALL.fetch_add(1, Ordering::Relaxed)
}

type Slot = Option<Arc<dyn Any + Send + Sync>>;

/// Typed key into a [`Scope`].
///
/// ```ignore
/// const REQUEST_ID: ContextKey<String> = ContextKey::new("app/request-id");
/// scope.set(&REQUEST_ID, Some("abc".to_string()));
/// ```
pub struct ContextKey<T> {
    name: Cow<'static, str>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> ContextKey<T> {
    /// Create a key with a static name.
    pub const fn new(name: &'static str) -> Self {
        Self {
            name: Cow::Borrowed(name),
            _marker: PhantomData,
        }
    }

    /// Create a key with a name built at runtime.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Cow::Owned(name.into()),
            _marker: PhantomData,
        }
    }

    /// The key's name.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl<T> Clone for ContextKey<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> fmt::Debug for ContextKey<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ContextKey").field(&self.name).finish()
    }
}

struct ScopeInner {
    id: u64,
    parent: Option<u64>,
    depth: usize,
    values: Mutex<HashMap<Cow<'static, str>, Slot>>,
}

/// One execution scope.
///
/// Cloning is cheap and yields a handle to the same scope.
#[derive(Clone)]
pub struct Scope {
    inner: Arc<ScopeInner>,
}

impl Scope {
    /// Create a fresh, empty root scope.
    pub fn root() -> Self {
        Self::build(None, 0, HashMap::new())
    }

    /// Create a child scope holding a copy of this scope's values.
    pub fn child(&self) -> Self {
        let values = self.inner.values.lock().clone();
        Self::build(Some(self.inner.id), self.inner.depth + 1, values)
    }

    fn build(parent: Option<u64>, depth: usize, values: HashMap<Cow<'static, str>, Slot>) -> Self {
        Self {
            inner: Arc::new(ScopeInner {
                id: NEXT_SCOPE_ID.fetch_add(1, Ordering::Relaxed),
                parent,
                depth,
                values: Mutex::new(values),
            }),
        }
    }

    /// Process-unique identifier of this scope.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Identifier of the scope this one was derived from.
    pub fn parent_id(&self) -> Option<u64> {
        self.inner.parent
    }

    /// Nesting depth; a root scope has depth 0.
    pub fn depth(&self) -> usize {
        self.inner.depth
    }

    /// Read a value. Keys that were never set and keys that were cleared
    /// both read as `None`.
    pub fn get<T>(&self, key: &ContextKey<T>) -> Option<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        self.inner
            .values
            .lock()
            .get(key.name.as_ref())
            .and_then(|slot| slot.as_ref())
            .and_then(|value| value.downcast_ref::<T>())
            .cloned()
    }

    /// Write a value. `None` clears the key but keeps it present.
    pub fn set<T>(&self, key: &ContextKey<T>, value: Option<T>)
    where
        T: Send + Sync + 'static,
    {
        let slot: Slot = value.map(|v| Arc::new(v) as Arc<dyn Any + Send + Sync>);
        self.inner.values.lock().insert(key.name.clone(), slot);
    }

    /// Write a value and return the previous one.
    pub fn replace<T>(&self, key: &ContextKey<T>, value: Option<T>) -> Option<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        let previous = self.get(key);
        self.set(key, value);
        previous
    }

    /// Whether the key has ever been written in this scope (or copied from
    /// its parent), including writes of `None`.
    pub fn contains_key<T>(&self, key: &ContextKey<T>) -> bool {
        self.inner.values.lock().contains_key(key.name.as_ref())
    }

    /// Whether both handles refer to the same scope.
    pub fn ptr_eq(&self, other: &Scope) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let keys: Vec<String> = self
            .inner
            .values
            .lock()
            .keys()
            .map(|k| k.to_string())
            .collect();
        f.debug_struct("Scope")
            .field("id", &self.inner.id)
            .field("parent", &self.inner.parent)
            .field("depth", &self.inner.depth)
            .field("keys", &keys)
            .finish()
    }
}

/// The scope current on this call chain.
///
/// Fails with [`Error::NoContext`] outside of any scope.
pub fn current_scope() -> Result<Scope> {
    match (task_local::current(), poll_scoped::current()) {
        // Both slots are only filled while polling this chain; the one
        // entered last is the innermost.
        (Some((a, a_stamp)), Some((b, b_stamp))) => Ok(if b_stamp > a_stamp { b } else { a }),
        (Some((scope, _)), None) | (None, Some((scope, _))) => Ok(scope),
        (None, None) => Err(Error::NoContext),
    }
}

/// Run `fut` with an explicitly captured scope installed as current.
///
/// Use this to carry a chain's context into work that runs elsewhere, for
/// example a task started with `tokio::spawn`.
pub fn in_scope<F: Future>(scope: Scope, fut: F) -> Scoped<F> {
    Scoped::new(scope, fut)
}

/// Backing strategy for the context store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageDriver {
    /// `TaskLocal` inside a tokio runtime, `PollScoped` otherwise.
    #[default]
    Auto,
    /// `tokio::task_local!` storage.
    TaskLocal,
    /// Thread-local slot swapped in around each poll by [`Scoped`].
    PollScoped,
}

impl StorageDriver {
    /// Replace `Auto` with the driver that fits the calling environment.
    pub fn resolve(self) -> StorageDriver {
        match self {
            StorageDriver::Auto => {
                if tokio::runtime::Handle::try_current().is_ok() {
                    StorageDriver::TaskLocal
                } else {
                    StorageDriver::PollScoped
                }
            }
            other => other,
        }
    }
}

/// Installs scopes using one resolved [`StorageDriver`].
#[derive(Debug, Clone, Copy)]
pub struct ContextStorage {
    driver: StorageDriver,
}

impl ContextStorage {
    /// Create a store; `Auto` is resolved immediately.
    pub fn new(driver: StorageDriver) -> Self {
        Self {
            driver: driver.resolve(),
        }
    }

    /// The resolved driver.
    pub fn driver(&self) -> StorageDriver {
        self.driver
    }

    /// See [`current_scope`].
    pub fn current_scope(&self) -> Result<Scope> {
        current_scope()
    }

    /// Run `fut` with `scope` installed as current.
    pub async fn run_within<F: Future>(&self, scope: Scope, fut: F) -> F::Output {
        match self.driver {
            StorageDriver::TaskLocal => task_local::scope(scope, fut).await,
            StorageDriver::PollScoped | StorageDriver::Auto => Scoped::new(scope, fut).await,
        }
    }

    /// Run `fut` inside a fresh child of the current scope, or inside a new
    /// root scope when none is current.
    pub async fn run_within_new_scope<F: Future>(&self, fut: F) -> F::Output {
        let scope = match current_scope() {
            Ok(parent) => parent.child(),
            Err(_) => Scope::root(),
        };
        self.run_within(scope, fut).await
    }
}

impl Default for ContextStorage {
    fn default() -> Self {
        Self::new(StorageDriver::Auto)
    }
}
