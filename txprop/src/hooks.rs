//! Commit, rollback and completion hooks
//!
//! Every transactional call chain carries a [`HookRegistry`] in its scope.
//! A call that starts a new transaction installs a fresh registry and
//! dispatches it once the provider has committed or rolled back; calls that
//! join the ambient transaction register into the enclosing registry.
//!
//! ```ignore
//! manager.run(TransactionOptions::default(), || async {
//!     create_user(&db, "alice").await?;
//!     txprop::on_commit(|| send_welcome_mail("alice"))?;
//!     Ok::<_, AppError>(())
//! }).await?;
//! ```

use std::any::Any;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, error, warn};

use crate::context::{current_scope, ContextKey};
use crate::error::{Error, Result};

/// Scope key holding the hook registry of the current chain.
pub(crate) const HOOKS: ContextKey<Arc<HookRegistry>> = ContextKey::new("txprop/hooks");

type HookFn = Box<dyn FnOnce() + Send + 'static>;

/// When a hook runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookKind {
    /// After the owning transaction committed.
    Commit,
    /// After the owning transaction rolled back.
    Rollback,
    /// After the owning scope settled, whatever the outcome.
    Complete,
}

/// How a hook scope settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Outcome {
    /// The owning transaction committed.
    Committed,
    /// The owning transaction rolled back.
    RolledBack,
    /// A scope without a transaction of its own finished.
    Finished,
}

impl Outcome {
    fn fires(&self, kind: HookKind) -> bool {
        matches!(
            (self, kind),
            (Outcome::Committed, HookKind::Commit) | (Outcome::RolledBack, HookKind::Rollback)
        )
    }
}

/// Callbacks owned by one hook scope.
pub struct HookRegistry {
    entries: Mutex<Vec<(HookKind, HookFn)>>,
    max_handlers: usize,
    warned: AtomicBool,
    // Written under the `entries` lock
    settled: AtomicBool,
}

impl HookRegistry {
    /// Create an empty registry that warns past `max_handlers` callbacks.
    pub fn new(max_handlers: usize) -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            max_handlers,
            warned: AtomicBool::new(false),
            settled: AtomicBool::new(false),
        }
    }

    /// Add a callback. The same callback logic registered twice runs twice.
    ///
    /// Fails with [`Error::ScopeSettled`] once the registry has been
    /// dispatched, since the callback could never run.
    pub fn register<F>(&self, kind: HookKind, f: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let len = {
            let mut entries = self.entries.lock();
            if self.settled.load(Ordering::Relaxed) {
                debug!(?kind, "Hook registered after its scope settled");
                return Err(Error::ScopeSettled);
            }
            entries.push((kind, Box::new(f)));
            entries.len()
        };
        if len > self.max_handlers && !self.warned.swap(true, Ordering::Relaxed) {
            warn!(
                "{} transaction hooks registered in one scope (max_hook_handlers = {}); possible hook leak",
                len, self.max_handlers
            );
        }
        Ok(())
    }

    /// Number of pending callbacks.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether no callbacks are pending.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Run the callbacks matching `outcome` in registration order, then every
    /// complete callback. The registry is drained, so dispatching again runs
    /// nothing. A panicking callback is reported and skipped.
    ///
    /// Returns the number of callbacks that ran to completion.
    pub fn dispatch(&self, outcome: Outcome) -> usize {
        let entries = {
            let mut entries = self.entries.lock();
            self.settled.store(true, Ordering::Relaxed);
            std::mem::take(&mut *entries)
        };
        let mut outcome_hooks = Vec::new();
        let mut complete_hooks = Vec::new();
        let mut discarded = 0usize;

        for (kind, f) in entries {
            if kind == HookKind::Complete {
                complete_hooks.push(f);
            } else if outcome.fires(kind) {
                outcome_hooks.push(f);
            } else if outcome == Outcome::Finished {
                discarded += 1;
            }
        }

        if discarded > 0 {
            debug!(
                "Discarded {} commit/rollback hooks registered outside a transaction",
                discarded
            );
        }

        outcome_hooks
            .into_iter()
            .chain(complete_hooks)
            .map(|f| run_hook(outcome, f))
            .filter(|ok| *ok)
            .count()
    }
}

impl Default for HookRegistry {
    fn default() -> Self {
        Self::new(crate::config::defaults::MAX_HOOK_HANDLERS)
    }
}

impl fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookRegistry")
            .field("pending", &self.len())
            .field("max_handlers", &self.max_handlers)
            .field("settled", &self.settled.load(Ordering::Relaxed))
            .finish()
    }
}

fn run_hook(outcome: Outcome, f: HookFn) -> bool {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(()) => true,
        Err(payload) => {
            error!(
                ?outcome,
                "Transaction hook panicked: {}",
                panic_message(payload.as_ref())
            );
            false
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}

fn register<F>(kind: HookKind, f: F) -> Result<()>
where
    F: FnOnce() + Send + 'static,
{
    let registry = current_scope()?.get(&HOOKS).ok_or(Error::NoContext)?;
    registry.register(kind, f)
}

/// Run `f` once the enclosing transaction commits.
///
/// Fails with [`Error::NoContext`] when called outside a transactional call chain.
pub fn on_commit<F>(f: F) -> Result<()>
where
    F: FnOnce() + Send + 'static,
{
    register(HookKind::Commit, f)
}

/// Run `f` once the enclosing transaction rolls back.
pub fn on_rollback<F>(f: F) -> Result<()>
where
    F: FnOnce() + Send + 'static,
{
    register(HookKind::Rollback, f)
}

/// Run `f` once the enclosing scope settles, whatever the outcome.
pub fn on_complete<F>(f: F) -> Result<()>
where
    F: FnOnce() + Send + 'static,
{
    register(HookKind::Complete, f)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn recorder(log: &Arc<Mutex<Vec<&'static str>>>, name: &'static str) -> impl FnOnce() + Send + 'static {
        let log = Arc::clone(log);
        move || log.lock().push(name)
    }

    #[test]
    fn test_commit_runs_commit_then_complete() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let registry = HookRegistry::new(10);
        registry.register(HookKind::Complete, recorder(&log, "complete")).unwrap();
        registry.register(HookKind::Commit, recorder(&log, "commit-1")).unwrap();
        registry.register(HookKind::Rollback, recorder(&log, "rollback")).unwrap();
        registry.register(HookKind::Commit, recorder(&log, "commit-2")).unwrap();

        assert_eq!(registry.dispatch(Outcome::Committed), 3);
        assert_eq!(*log.lock(), vec!["commit-1", "commit-2", "complete"]);
    }

    #[test]
    fn test_rollback_skips_commit_hooks() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let registry = HookRegistry::new(10);
        registry.register(HookKind::Commit, recorder(&log, "commit")).unwrap();
        registry.register(HookKind::Rollback, recorder(&log, "rollback")).unwrap();
        registry.register(HookKind::Complete, recorder(&log, "complete")).unwrap();

        registry.dispatch(Outcome::RolledBack);
        assert_eq!(*log.lock(), vec!["rollback", "complete"]);
    }

    #[test]
    fn test_finished_runs_only_complete_hooks() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let registry = HookRegistry::new(10);
        registry.register(HookKind::Commit, recorder(&log, "commit")).unwrap();
        registry.register(HookKind::Complete, recorder(&log, "complete")).unwrap();

        registry.dispatch(Outcome::Finished);
        assert_eq!(*log.lock(), vec!["complete"]);
    }

    #[test]
    fn test_dispatch_fires_at_most_once() {
        let count = Arc::new(AtomicUsize::new(0));
        let registry = HookRegistry::new(10);
        let c = Arc::clone(&count);
        registry
            .register(HookKind::Complete, move || {
                c.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        registry.dispatch(Outcome::Committed);
        registry.dispatch(Outcome::Committed);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_panicking_hook_does_not_stop_siblings() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let registry = HookRegistry::new(10);
        registry.register(HookKind::Commit, || panic!("mail server down")).unwrap();
        registry.register(HookKind::Commit, recorder(&log, "after")).unwrap();

        assert_eq!(registry.dispatch(Outcome::Committed), 1);
        assert_eq!(*log.lock(), vec!["after"]);
    }

    #[test]
    fn test_registration_after_dispatch_fails() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let registry = HookRegistry::new(10);
        registry.dispatch(Outcome::Committed);

        let err = registry
            .register(HookKind::Complete, recorder(&log, "late"))
            .unwrap_err();
        assert!(matches!(err, Error::ScopeSettled));
        assert!(registry.is_empty());
        assert_eq!(registry.dispatch(Outcome::Committed), 0);
        assert!(log.lock().is_empty());
    }

    #[test]
    fn test_registration_outside_scope_fails() {
        assert!(matches!(on_commit(|| {}), Err(Error::NoContext)));
    }
}
