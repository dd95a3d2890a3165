//! Commit, rollback and completion hooks

mod common;

use common::{manager, AppError, Counter, Journal};
use ctor::ctor;
use txprop::{on_commit, on_complete, on_rollback, Error, Propagation, TransactionOptions};

#[ctor]
fn init() {
    common::init_tracing();
}

#[tokio::test]
async fn test_commit_fires_commit_and_complete_once() {
    let manager = manager();
    let (commit, rollback, complete) = (Counter::default(), Counter::default(), Counter::default());

    manager
        .run(TransactionOptions::new(), || async {
            on_commit(commit.hook())?;
            on_rollback(rollback.hook())?;
            on_complete(complete.hook())?;
            Ok::<_, AppError>(())
        })
        .await
        .unwrap();

    assert_eq!(commit.get(), 1);
    assert_eq!(rollback.get(), 0);
    assert_eq!(complete.get(), 1);
}

#[tokio::test]
async fn test_error_fires_rollback_and_complete_once() {
    let manager = manager();
    let (commit, rollback, complete) = (Counter::default(), Counter::default(), Counter::default());

    let err = manager
        .run(TransactionOptions::new(), || async {
            on_commit(commit.hook())?;
            on_rollback(rollback.hook())?;
            on_complete(complete.hook())?;
            Err::<(), _>(AppError::Business("boom"))
        })
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::Business("boom")));
    assert_eq!(commit.get(), 0);
    assert_eq!(rollback.get(), 1);
    assert_eq!(complete.get(), 1);
}

#[tokio::test]
async fn test_same_hook_registered_twice_runs_twice() {
    let manager = manager();
    let commit = Counter::default();

    manager
        .run(TransactionOptions::new(), || async {
            on_commit(commit.hook())?;
            on_commit(commit.hook())?;
            Ok::<_, AppError>(())
        })
        .await
        .unwrap();

    assert_eq!(commit.get(), 2);
}

#[tokio::test]
async fn test_complete_runs_after_outcome_hooks() {
    let manager = manager();
    let journal = Journal::default();

    manager
        .run(TransactionOptions::new(), || async {
            on_complete(journal.hook("complete"))?;
            on_commit(journal.hook("commit-1"))?;
            on_commit(journal.hook("commit-2"))?;
            Ok::<_, AppError>(())
        })
        .await
        .unwrap();

    assert_eq!(journal.entries(), vec!["commit-1", "commit-2", "complete"]);
}

#[tokio::test]
async fn test_panicking_hook_does_not_stop_siblings() {
    let manager = manager();
    let (commit, complete) = (Counter::default(), Counter::default());

    let value = manager
        .run(TransactionOptions::new(), || async {
            on_commit(|| panic!("hook failure"))?;
            on_commit(commit.hook())?;
            on_complete(complete.hook())?;
            Ok::<_, AppError>(42)
        })
        .await
        .unwrap();

    assert_eq!(value, 42);
    assert_eq!(commit.get(), 1);
    assert_eq!(complete.get(), 1);
}

#[tokio::test]
async fn test_joined_hooks_wait_for_enclosing_transaction() {
    let manager = manager();
    let commit = Counter::default();

    manager
        .run(TransactionOptions::new(), || async {
            manager
                .run(Propagation::Required.into(), || async {
                    on_commit(commit.hook())?;
                    Ok::<_, AppError>(())
                })
                .await?;
            assert_eq!(commit.get(), 0, "joined call must not settle the transaction");
            Ok::<_, AppError>(())
        })
        .await
        .unwrap();

    assert_eq!(commit.get(), 1);
}

#[tokio::test]
async fn test_joined_hooks_roll_back_with_enclosing_transaction() {
    let manager = manager();
    let (commit, rollback) = (Counter::default(), Counter::default());

    let _ = manager
        .run(TransactionOptions::new(), || async {
            manager
                .run(Propagation::Mandatory.into(), || async {
                    on_commit(commit.hook())?;
                    on_rollback(rollback.hook())?;
                    Ok::<_, AppError>(())
                })
                .await?;
            Err::<(), _>(AppError::Business("outer"))
        })
        .await;

    assert_eq!(commit.get(), 0);
    assert_eq!(rollback.get(), 1);
}

#[tokio::test]
async fn test_requires_new_hooks_fire_with_inner_transaction() {
    let manager = manager();
    let journal = Journal::default();

    manager
        .run(TransactionOptions::new(), || async {
            on_commit(journal.hook("outer-commit"))?;
            let _ = manager
                .run(Propagation::RequiresNew.into(), || async {
                    on_rollback(journal.hook("inner-rollback"))?;
                    Err::<(), _>(AppError::Business("inner"))
                })
                .await;
            assert_eq!(journal.entries(), vec!["inner-rollback"]);
            Ok::<_, AppError>(())
        })
        .await
        .unwrap();

    assert_eq!(journal.entries(), vec!["inner-rollback", "outer-commit"]);
}

#[tokio::test]
async fn test_non_transactional_scope_runs_only_complete_hooks() {
    let manager = manager();
    let (commit, rollback, complete) = (Counter::default(), Counter::default(), Counter::default());

    manager
        .run(Propagation::Supports.into(), || async {
            on_commit(commit.hook())?;
            on_rollback(rollback.hook())?;
            on_complete(complete.hook())?;
            Ok::<_, AppError>(())
        })
        .await
        .unwrap();

    assert_eq!(commit.get(), 0);
    assert_eq!(rollback.get(), 0);
    assert_eq!(complete.get(), 1);
}

#[tokio::test]
async fn test_suspended_scope_has_its_own_hooks() {
    let manager = manager();
    let journal = Journal::default();

    manager
        .run(TransactionOptions::new(), || async {
            manager
                .run(Propagation::NotSupported.into(), || async {
                    on_complete(journal.hook("suspended-complete"))?;
                    Ok::<_, AppError>(())
                })
                .await?;
            assert_eq!(journal.entries(), vec!["suspended-complete"]);
            on_complete(journal.hook("outer-complete"))?;
            Ok::<_, AppError>(())
        })
        .await
        .unwrap();

    assert_eq!(journal.entries(), vec!["suspended-complete", "outer-complete"]);
}

#[tokio::test]
async fn test_registration_outside_chain_fails() {
    let err = on_commit(|| {}).unwrap_err();
    assert!(matches!(err, Error::NoContext));
    assert!(matches!(on_complete(|| {}), Err(Error::NoContext)));
}

#[tokio::test]
async fn test_registration_after_settle_is_rejected() {
    let manager = manager();
    let commit = Counter::default();

    let scope = manager
        .run(TransactionOptions::new(), || async {
            Ok::<_, AppError>(txprop::current_scope()?)
        })
        .await
        .unwrap();

    let late = txprop::in_scope(scope, async { on_commit(commit.hook()) }).await;
    assert!(matches!(late, Err(Error::ScopeSettled)));
    assert_eq!(commit.get(), 0);
}

#[tokio::test]
async fn test_many_hooks_still_fire() {
    let manager = txprop::TransactionManager::builder()
        .max_hook_handlers(2)
        .client("default", txprop::MemoryClient::new())
        .build()
        .unwrap();
    let complete = Counter::default();

    manager
        .run(TransactionOptions::new(), || async {
            for _ in 0..5 {
                on_complete(complete.hook())?;
            }
            Ok::<_, AppError>(())
        })
        .await
        .unwrap();

    assert_eq!(complete.get(), 5);
}
