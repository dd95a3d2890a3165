//! `tokio::task_local!` driver

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::task::futures::TaskLocalFuture;

use super::{next_install, Scope};

struct Installed {
    scope: Scope,
    // Refreshed on every poll of the owning `TaskScoped`
    stamp: Arc<AtomicU64>,
}

tokio::task_local! {
    static CURRENT: Installed;
}

pub(super) fn current() -> Option<(Scope, u64)> {
    CURRENT
        .try_with(|installed| {
            (
                installed.scope.clone(),
                installed.stamp.load(Ordering::Relaxed),
            )
        })
        .ok()
}

/// Task-local scope that re-stamps its install order on every poll, so it
/// can be ranked against scopes installed by [`super::Scoped`].
pub(super) struct TaskScoped<F: Future> {
    stamp: Arc<AtomicU64>,
    inner: Pin<Box<TaskLocalFuture<Installed, F>>>,
}

pub(super) fn scope<F: Future>(scope: Scope, fut: F) -> TaskScoped<F> {
    let stamp = Arc::new(AtomicU64::new(0));
    let installed = Installed {
        scope,
        stamp: Arc::clone(&stamp),
    };
    TaskScoped {
        stamp,
        inner: Box::pin(CURRENT.scope(installed, fut)),
    }
}

impl<F: Future> Future for TaskScoped<F> {
    type Output = F::Output;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;
        this.stamp.store(next_install(), Ordering::Relaxed);
        this.inner.as_mut().poll(cx)
    }
}

impl<F: Future> fmt::Debug for TaskScoped<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskScoped")
            .field("stamp", &self.stamp.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}
