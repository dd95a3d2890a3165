//! Interleaved and parallel call chains never observe each other's state

mod common;

use std::collections::HashSet;
use std::time::Duration;

use common::{client, current_id, manager_with, AppError, Counter};
use ctor::ctor;
use txprop::{on_commit, on_rollback, StorageDriver, TransactionId, TransactionOptions};

#[ctor]
fn init() {
    common::init_tracing();
}

const CHAINS: usize = 3;

async fn observe_ids(driver: StorageDriver) -> Vec<TransactionId> {
    let manager = manager_with(driver);

    let chain = |delay: u64| {
        let manager = manager.clone();
        async move {
            manager
                .run(TransactionOptions::new(), || async {
                    let before = current_id();
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                    tokio::task::yield_now().await;
                    assert_eq!(current_id(), before);
                    Ok::<_, AppError>(before.unwrap())
                })
                .await
                .unwrap()
        }
    };

    let (a, b, c) = tokio::join!(chain(15), chain(5), chain(10));
    assert_eq!(client(&manager).commits(), CHAINS as u64);
    vec![a, b, c]
}

#[tokio::test]
async fn test_concurrent_chains_see_distinct_ids_task_local() {
    let ids = observe_ids(StorageDriver::TaskLocal).await;
    assert_eq!(ids.iter().collect::<HashSet<_>>().len(), CHAINS);
}

#[tokio::test]
async fn test_concurrent_chains_see_distinct_ids_poll_scoped() {
    let ids = observe_ids(StorageDriver::PollScoped).await;
    assert_eq!(ids.iter().collect::<HashSet<_>>().len(), CHAINS);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_spawned_chains_on_multi_thread_runtime() {
    for driver in [StorageDriver::TaskLocal, StorageDriver::PollScoped] {
        let manager = manager_with(driver);

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let manager = manager.clone();
                tokio::spawn(async move {
                    manager
                        .run(TransactionOptions::new(), || async {
                            let id = current_id();
                            for _ in 0..i {
                                tokio::task::yield_now().await;
                            }
                            assert_eq!(current_id(), id);
                            Ok::<_, AppError>(id.unwrap())
                        })
                        .await
                })
            })
            .collect();

        let mut ids = HashSet::new();
        for handle in handles {
            ids.insert(handle.await.unwrap().unwrap());
        }
        assert_eq!(ids.len(), 8, "{:?} leaked state between tasks", driver);
    }
}

#[tokio::test]
async fn test_interleaved_hooks_follow_their_own_chain() {
    let manager = manager_with(StorageDriver::TaskLocal);
    let (committed, rolled_back) = (Counter::default(), Counter::default());

    let ok = manager.run(TransactionOptions::new(), || async {
        on_commit(committed.hook())?;
        on_rollback(rolled_back.hook())?;
        tokio::time::sleep(Duration::from_millis(10)).await;
        Ok::<_, AppError>(())
    });
    let failed = manager.run(TransactionOptions::new(), || async {
        tokio::time::sleep(Duration::from_millis(5)).await;
        on_commit(committed.hook())?;
        on_rollback(rolled_back.hook())?;
        Err::<(), _>(AppError::Business("second chain"))
    });

    let (ok, failed) = tokio::join!(ok, failed);
    assert!(ok.is_ok());
    assert!(failed.is_err());
    assert_eq!(committed.get(), 1);
    assert_eq!(rolled_back.get(), 1);
}

#[tokio::test]
async fn test_captured_scope_follows_spawned_task() {
    let manager = manager_with(StorageDriver::TaskLocal);

    manager
        .run(TransactionOptions::new(), || async {
            let outer = current_id();
            let scope = txprop::current_scope()?;

            let (lost, carried) = tokio::join!(
                tokio::spawn(async { current_id() }),
                tokio::spawn(txprop::in_scope(scope, async { current_id() })),
            );
            assert_eq!(lost.unwrap(), None);
            assert_eq!(carried.unwrap(), outer);
            Ok::<_, AppError>(())
        })
        .await
        .unwrap();
}
