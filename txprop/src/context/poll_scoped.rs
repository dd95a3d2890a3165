//! Thread-local driver with a per-poll future adapter

use std::cell::RefCell;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use super::{next_install, Scope};

// The scope and the install stamp of the poll that entered it
thread_local! {
    static CURRENT: RefCell<Option<(Scope, u64)>> = const { RefCell::new(None) };
}

pub(super) fn current() -> Option<(Scope, u64)> {
    CURRENT
        .try_with(|slot| slot.borrow().clone())
        .ok()
        .flatten()
}

/// Puts the previous scope back when a poll ends, including by unwinding.
struct Restore(Option<(Scope, u64)>);

impl Drop for Restore {
    fn drop(&mut self) {
        let previous = self.0.take();
        let _ = CURRENT.try_with(|slot| *slot.borrow_mut() = previous);
    }
}

fn enter(scope: Scope) -> Restore {
    let previous = CURRENT
        .try_with(|slot| slot.borrow_mut().replace((scope, next_install())))
        .ok()
        .flatten();
    Restore(previous)
}

/// Future adapter that makes `scope` current while the inner future is polled.
#[must_use = "futures do nothing unless polled"]
pub struct Scoped<F> {
    scope: Scope,
    inner: Pin<Box<F>>,
}

impl<F: Future> Scoped<F> {
    /// Bind `fut` to `scope`.
    pub fn new(scope: Scope, fut: F) -> Self {
        Self {
            scope,
            inner: Box::pin(fut),
        }
    }

    /// The scope this future runs in.
    pub fn scope(&self) -> &Scope {
        &self.scope
    }
}

impl<F: Future> Future for Scoped<F> {
    type Output = F::Output;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;
        let _restore = enter(this.scope.clone());
        this.inner.as_mut().poll(cx)
    }
}

impl<F> fmt::Debug for Scoped<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scoped").field("scope", &self.scope).finish()
    }
}
