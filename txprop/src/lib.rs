//! txprop - declarative transaction propagation
//!
//! Marks async units of work as transactional and decides, per call, whether
//! they join the transaction already active on the current call chain, start
//! a new one, suspend it, or are rejected.
//!
//! # Features
//!
//! - **Seven propagation policies**: `REQUIRED`, `REQUIRES_NEW`, `NESTED`,
//!   `MANDATORY`, `NEVER`, `NOT_SUPPORTED` and `SUPPORTS`
//! - **Transaction hooks**: `on_commit`, `on_rollback` and `on_complete`
//!   callbacks that fire once the owning transaction settles
//! - **Chain-scoped context**: tokio task-locals, or a poll-scoped adapter
//!   that works on any executor
//! - **Pluggable providers**: MySQL via `mysql_async`, plus an in-memory
//!   provider for tests
//!
//! # Example
//!
//! ```ignore
//! use txprop::{transactional, on_commit, Executor, MySqlClient, TransactionManager};
//!
//! static MANAGER: OnceLock<TransactionManager<MySqlClient>> = OnceLock::new();
//!
//! #[transactional(manager = MANAGER.get().unwrap(), propagation = "REQUIRES_NEW")]
//! async fn record_login(user_id: i64) -> anyhow::Result<()> {
//!     let db = MANAGER.get().unwrap().default_client()?;
//!     db.execute("INSERT INTO logins (user_id) VALUES (?)", (user_id,)).await?;
//!     on_commit(move || tracing::info!(user_id, "login recorded"))?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod context;
pub mod error;
pub mod handle;
pub mod hooks;
pub mod manager;
pub mod memory;
pub mod mysql;
pub mod propagation;
pub mod registry;
pub mod traits;

// Re-export the attribute macro
pub use txprop_macros::transactional;

// Re-export main types
pub use config::TransactionalConfig;
pub use context::{current_scope, in_scope, ContextKey, ContextStorage, Scope, StorageDriver};
pub use error::{Error, Result};
pub use handle::{current_transaction, TransactionHandle, TransactionId};
pub use hooks::{on_commit, on_complete, on_rollback, HookKind, HookRegistry, Outcome};
pub use manager::{TransactionManager, TransactionManagerBuilder, TransactionOptions};
pub use memory::{MemoryClient, MemoryTransaction};
pub use mysql::{ExecuteResult, Executor, MySqlClient, MySqlTransaction};
pub use propagation::{Propagation, Strategy};
pub use registry::{ClientRegistry, Delegate, TransactionAware};
pub use traits::{IsolationLevel, TransactionProvider};
