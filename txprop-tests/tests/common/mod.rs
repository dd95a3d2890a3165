//! Shared fixtures for the in-memory test suites

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tracing_subscriber::EnvFilter;
use txprop::{MemoryClient, StorageDriver, TransactionId, TransactionManager, TransactionalConfig};

/// Error type of the units of work under test
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Engine(#[from] txprop::Error),

    #[error("business failure: {0}")]
    Business(&'static str),
}

/// Route `tracing` output through the test harness.
///
/// The filter comes from `RUST_LOG`, then `log_level` in `txprop.toml` or
/// `TXPROP__LOG_LEVEL`.
pub fn init_tracing() {
    let config = TransactionalConfig::load(None).unwrap_or_default();
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(config.log_directive()))
        .with_test_writer()
        .try_init();
}

pub fn manager() -> TransactionManager<MemoryClient> {
    manager_with(StorageDriver::Auto)
}

pub fn manager_with(driver: StorageDriver) -> TransactionManager<MemoryClient> {
    TransactionManager::builder()
        .storage_driver(driver)
        .client("default", MemoryClient::new())
        .build()
        .unwrap()
}

pub fn client(manager: &TransactionManager<MemoryClient>) -> Arc<MemoryClient> {
    manager.registry().get("default").unwrap()
}

/// Id of the default client's transaction on the current chain.
pub fn current_id() -> Option<TransactionId> {
    txprop::current_transaction::<txprop::MemoryTransaction>("default").map(|h| h.id())
}

/// A shared counter handing out hook callbacks.
#[derive(Clone, Default)]
pub struct Counter(Arc<AtomicUsize>);

impl Counter {
    pub fn hook(&self) -> impl FnOnce() + Send + 'static {
        let count = Arc::clone(&self.0);
        move || {
            count.fetch_add(1, Ordering::SeqCst);
        }
    }

    pub fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

/// Records the order in which hooks fire.
#[derive(Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<&'static str>>>);

impl Journal {
    pub fn hook(&self, entry: &'static str) -> impl FnOnce() + Send + 'static {
        let entries = Arc::clone(&self.0);
        move || entries.lock().unwrap().push(entry)
    }

    pub fn entries(&self) -> Vec<&'static str> {
        self.0.lock().unwrap().clone()
    }
}
