//! Behavioural properties of the pool manager
//!
//! Run with: cargo test -p pool-executor --test manager_properties

mod common;

use std::any::Any;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use common::{wait_until, Gate};
use pool_executor::prelude::*;
use pool_executor::{MAX_POOL_SIZE, MIN_POOL_SIZE};

fn running(manager: &PoolManager, pool: &str) -> usize {
    manager
        .stats()
        .into_iter()
        .find(|stats| stats.name == pool)
        .map(|stats| stats.running)
        .unwrap_or(0)
}

fn waiting(manager: &PoolManager, pool: &str) -> usize {
    manager
        .stats()
        .into_iter()
        .find(|stats| stats.name == pool)
        .map(|stats| stats.waiting)
        .unwrap_or(0)
}

/// Fill `pool` with `count` tasks that block on `gate`
fn saturate(manager: &PoolManager, pool: &str, count: usize, gate: &Arc<Gate>) {
    for _ in 0..count {
        let gate = Arc::clone(gate);
        manager.execute(pool, move || gate.wait()).unwrap();
    }
    wait_until(|| running(manager, pool) == count);
}

#[test_log::test(tokio::test(flavor = "multi_thread", worker_threads = 2))]
async fn saturated_pool_does_not_overload_others() {
    let manager = PoolManager::new(vec![
        PoolConfig::new("a", 2).non_blocking(),
        PoolConfig::new("b", 2).non_blocking(),
    ])
    .unwrap();
    let gate = Gate::new();

    saturate(&manager, "a", 2, &gate);
    let err = manager.execute("a", || {}).unwrap_err();
    assert!(err.is_overload());

    let done = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&done);
    manager
        .execute("b", move || flag.store(true, Ordering::SeqCst))
        .unwrap();
    wait_until(|| done.load(Ordering::SeqCst));

    gate.open();
    manager.shutdown().await;
}

#[test_log::test(tokio::test(flavor = "multi_thread", worker_threads = 2))]
async fn non_blocking_pool_overloads_past_capacity() {
    let manager = PoolManager::new(vec![PoolConfig::new("http", 3).non_blocking()]).unwrap();
    let gate = Gate::new();

    saturate(&manager, "http", 3, &gate);

    let err = manager.execute("http", || {}).unwrap_err();
    assert!(matches!(err, ExecutorError::PoolOverload(ref name) if name == "http"));

    gate.open();
    manager.shutdown().await;
}

#[test_log::test(tokio::test(flavor = "multi_thread", worker_threads = 2))]
async fn blocking_pool_waits_for_free_slot() {
    let manager = Arc::new(PoolManager::new(vec![PoolConfig::new("storage", 1)]).unwrap());
    let gate = Gate::new();
    let first_done = Arc::new(AtomicBool::new(false));

    {
        let gate = Arc::clone(&gate);
        let first_done = Arc::clone(&first_done);
        manager
            .execute("storage", move || {
                gate.wait();
                first_done.store(true, Ordering::SeqCst);
            })
            .unwrap();
    }
    wait_until(|| running(&manager, "storage") == 1);

    let returned = Arc::new(AtomicBool::new(false));
    let submitter = {
        let manager = Arc::clone(&manager);
        let returned = Arc::clone(&returned);
        thread::spawn(move || {
            let result = manager.execute("storage", || {});
            returned.store(true, Ordering::SeqCst);
            result
        })
    };

    wait_until(|| waiting(&manager, "storage") == 1);
    assert!(!returned.load(Ordering::SeqCst));

    gate.open();
    submitter.join().unwrap().unwrap();
    assert!(first_done.load(Ordering::SeqCst));

    manager.shutdown().await;
}

#[test_log::test(tokio::test(flavor = "multi_thread", worker_threads = 2))]
async fn reload_is_observed_atomically() {
    let manager = Arc::new(
        PoolManager::new(vec![PoolConfig::new("old-a", 64), PoolConfig::new("old-b", 64)])
            .unwrap(),
    );
    let stop = Arc::new(AtomicBool::new(false));
    let calls = Arc::new(AtomicUsize::new(0));

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let manager = Arc::clone(&manager);
            let stop = Arc::clone(&stop);
            let calls = Arc::clone(&calls);
            thread::spawn(move || {
                let mut swapped = false;
                while !stop.load(Ordering::SeqCst) {
                    for (old, new) in [("old-a", "new-a"), ("old-b", "new-b")] {
                        let old_result = manager.execute(old, || {});
                        let new_result = manager.execute(new, || {});
                        calls.fetch_add(2, Ordering::SeqCst);

                        match (&old_result, &new_result) {
                            // Old config still active
                            (Ok(()), Err(e)) if e.is_not_found() => {
                                assert!(!swapped, "old pools served after the swap");
                            }
                            // Swap happened between the two calls
                            (Ok(()), Ok(())) => swapped = true,
                            // New config active
                            (Err(e), Ok(())) if e.is_not_found() => swapped = true,
                            other => panic!("mixed configuration observed: {:?}", other),
                        }
                    }
                }
                swapped
            })
        })
        .collect();

    wait_until(|| calls.load(Ordering::SeqCst) > 1_000);
    manager
        .reload(vec![PoolConfig::new("new-a", 64), PoolConfig::new("new-b", 64)])
        .await
        .unwrap();

    let after_reload = calls.load(Ordering::SeqCst);
    wait_until(|| calls.load(Ordering::SeqCst) > after_reload + 1_000);
    stop.store(true, Ordering::SeqCst);

    for reader in readers {
        assert!(reader.join().unwrap(), "reader never observed the new pools");
    }

    manager.shutdown().await;
}

#[test_log::test(tokio::test(flavor = "multi_thread", worker_threads = 2))]
async fn failed_reload_keeps_current_pools() {
    let manager = PoolManager::new(vec![
        PoolConfig::new("http", 4).non_blocking(),
        PoolConfig::new("storage", 2),
    ])
    .unwrap();

    let err = manager
        .reload(vec![
            PoolConfig::new("reports", 2),
            PoolConfig::new("", 2),
            PoolConfig::new("exports", 2),
        ])
        .await
        .unwrap_err();
    assert!(matches!(err, ExecutorError::InvalidConfig(_)));

    manager.execute("http", || {}).unwrap();
    manager.execute("storage", || {}).unwrap();
    assert!(manager.execute("reports", || {}).unwrap_err().is_not_found());
    assert_eq!(manager.pool_names(), vec!["http", "storage"]);

    let err = manager
        .reload(vec![PoolConfig::new("x", 1), PoolConfig::new("x", 2)])
        .await
        .unwrap_err();
    assert!(matches!(err, ExecutorError::DuplicatePool(ref name) if name == "x"));
    assert_eq!(manager.pool_names(), vec!["http", "storage"]);

    manager.shutdown().await;
}

#[test_log::test(tokio::test(flavor = "multi_thread", worker_threads = 2))]
async fn panicking_task_is_contained() {
    let panics = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&panics);
    let handler: SharedPanicHandler = Arc::new(move |pool: &str, _: &(dyn Any + Send)| {
        assert_eq!(pool, "jobs");
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let manager = PoolManager::with_options(
        vec![PoolConfig::new("jobs", 1)],
        ManagerOptions::new().with_panic_handler(handler),
    )
    .unwrap();

    let first = manager.execute("jobs", || panic!("task failed"));
    let done = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&done);
    let second = manager.execute("jobs", move || flag.store(true, Ordering::SeqCst));

    assert!(first.is_ok());
    assert!(second.is_ok());
    wait_until(|| done.load(Ordering::SeqCst));
    assert_eq!(panics.load(Ordering::SeqCst), 1);

    manager.shutdown().await;
}

#[test_log::test(tokio::test(flavor = "multi_thread", worker_threads = 2))]
async fn panicking_task_without_handler_is_contained() {
    let manager = PoolManager::new(vec![PoolConfig::new("jobs", 1)]).unwrap();

    manager.execute("jobs", || panic!("no observer")).unwrap();
    let done = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&done);
    manager
        .execute("jobs", move || flag.store(true, Ordering::SeqCst))
        .unwrap();

    wait_until(|| done.load(Ordering::SeqCst));
    manager.shutdown().await;
}

#[test_log::test(tokio::test)]
async fn execute_after_shutdown_is_rejected() {
    let manager = PoolManager::new(vec![PoolConfig::new("http", 4)]).unwrap();
    manager.shutdown().await;

    for pool in ["http", "never-existed"] {
        let err = manager.execute(pool, || {}).unwrap_err();
        assert!(matches!(err, ExecutorError::ManagerClosed));
    }
}

#[test]
fn config_sizes_are_repaired() {
    let mut low = PoolConfig::new("low", -5);
    low.validate().unwrap();
    assert_eq!(low.size, MIN_POOL_SIZE);

    let mut high = PoolConfig::new("high", 999_999);
    high.validate().unwrap();
    assert_eq!(high.size, MAX_POOL_SIZE);
}

#[test_log::test(tokio::test(flavor = "multi_thread", worker_threads = 2))]
async fn reload_drains_accepted_work() {
    let manager = PoolManager::new(vec![PoolConfig::new("storage", 2)]).unwrap();
    let done = Arc::new(AtomicBool::new(false));

    let flag = Arc::clone(&done);
    manager
        .execute("storage", move || {
            thread::sleep(Duration::from_millis(100));
            flag.store(true, Ordering::SeqCst);
        })
        .unwrap();

    manager
        .reload(vec![PoolConfig::new("storage", 4)])
        .await
        .unwrap();

    // Reload waited for the superseded pool to drain
    assert!(done.load(Ordering::SeqCst));
    assert_eq!(manager.stats()[0].capacity, 4);
    manager.shutdown().await;
}

#[test_log::test(tokio::test(flavor = "multi_thread", worker_threads = 2))]
async fn shutdown_wait_is_bounded() {
    let manager = PoolManager::with_options(
        vec![PoolConfig::new("slow", 1)],
        ManagerOptions::new().with_shutdown_timeout(Duration::from_millis(100)),
    )
    .unwrap();

    let done = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&done);
    manager
        .execute("slow", move || {
            thread::sleep(Duration::from_millis(800));
            flag.store(true, Ordering::SeqCst);
        })
        .unwrap();
    wait_until(|| running(&manager, "slow") == 1);

    let started = Instant::now();
    manager.shutdown().await;
    assert!(started.elapsed() < Duration::from_millis(600));
    assert!(!done.load(Ordering::SeqCst));

    // The drain was not aborted
    wait_until(|| done.load(Ordering::SeqCst));
}

#[test_log::test(tokio::test(flavor = "multi_thread", worker_threads = 2))]
async fn pools_release_in_parallel() {
    let manager = PoolManager::with_options(
        (0..4)
            .map(|i| PoolConfig::new(format!("pool-{}", i), 1))
            .collect(),
        ManagerOptions::new().with_shutdown_timeout(Duration::from_secs(5)),
    )
    .unwrap();

    for i in 0..4 {
        manager
            .execute(&format!("pool-{}", i), || {
                thread::sleep(Duration::from_millis(300));
            })
            .unwrap();
    }

    let started = Instant::now();
    manager.shutdown().await;
    // Serial drains would take at least 1.2s
    assert!(started.elapsed() < Duration::from_millis(1_000));
}

/// Park one submitter on a saturated blocking "storage" pool, then reload
/// with `configs` and return what the parked submission reported.
async fn parked_submission_across_reload(
    configs: Vec<PoolConfig>,
    ran: &Arc<AtomicBool>,
) -> Result<(), ExecutorError> {
    let manager = Arc::new(
        PoolManager::with_options(
            vec![PoolConfig::new("storage", 1)],
            ManagerOptions::new().with_shutdown_timeout(Duration::from_millis(100)),
        )
        .unwrap(),
    );
    let gate = Gate::new();
    saturate(&manager, "storage", 1, &gate);

    let submitter = {
        let manager = Arc::clone(&manager);
        let flag = Arc::clone(ran);
        thread::spawn(move || manager.execute("storage", move || flag.store(true, Ordering::SeqCst)))
    };
    wait_until(|| waiting(&manager, "storage") == 1);

    manager.reload(configs).await.unwrap();
    let result = submitter.join().unwrap();

    gate.open();
    manager.shutdown().await;
    result
}

#[test_log::test(tokio::test(flavor = "multi_thread", worker_threads = 2))]
async fn submission_racing_reload_moves_to_new_pool() {
    let ran = Arc::new(AtomicBool::new(false));
    let result =
        parked_submission_across_reload(vec![PoolConfig::new("storage", 2)], &ran).await;

    assert!(result.is_ok());
    wait_until(|| ran.load(Ordering::SeqCst));
}

#[test_log::test(tokio::test(flavor = "multi_thread", worker_threads = 2))]
async fn submission_racing_reload_sees_dropped_name() {
    let ran = Arc::new(AtomicBool::new(false));
    let err = parked_submission_across_reload(vec![PoolConfig::new("http", 1)], &ran)
        .await
        .unwrap_err();

    assert!(err.is_not_found());
    assert_eq!(err.pool(), Some("storage"));
    assert!(!ran.load(Ordering::SeqCst));
}

#[test]
fn timed_out_shutdown_does_not_hold_runtime_open() {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .enable_all()
        .build()
        .unwrap();
    let manager = PoolManager::with_options(
        vec![PoolConfig::new("slow", 1)],
        ManagerOptions::new().with_shutdown_timeout(Duration::from_millis(100)),
    )
    .unwrap();

    let gate = Gate::new();
    saturate(&manager, "slow", 1, &gate);
    runtime.block_on(manager.shutdown());

    // Dropping the runtime is what returning from #[tokio::main] does
    let started = Instant::now();
    drop(runtime);
    assert!(started.elapsed() < Duration::from_secs(1));

    gate.open();
}
