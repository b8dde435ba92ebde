use serde_json::{Value as JsonValue, json};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use workerpool_core::{
    PoolConfig, PoolError, PoolEvent, Task, TaskId, TaskState, TerminationReason, Worker,
    WorkerId, WorkerPool,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Shared observations made by test workers
#[derive(Clone, Default)]
struct Tracker {
    active: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
    created: Arc<AtomicUsize>,
    aborted: Arc<AtomicUsize>,
    log: Arc<Mutex<Vec<String>>>,
    /// Worker id that refuses to initialize
    broken_worker: Option<usize>,
    /// Stop creating workers once this many instances exist
    max_instances: Option<usize>,
    /// Re-created workers panic in `new`
    panic_on_recycle: bool,
    /// Re-created workers take this long to build
    recycle_delay_ms: u64,
    abort_panics: bool,
}

impl Tracker {
    fn enter(&self, name: &str) {
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(active, Ordering::SeqCst);
        self.log.lock().unwrap().push(format!("start:{name}"));
    }

    fn leave(&self, name: &str) {
        self.log.lock().unwrap().push(format!("end:{name}"));
        self.active.fetch_sub(1, Ordering::SeqCst);
    }

    fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    fn position(&self, entry: &str) -> usize {
        self.log()
            .iter()
            .position(|e| e == entry)
            .unwrap_or_else(|| panic!("{entry} not logged"))
    }
}

struct TestWorker {
    tracker: Tracker,
}

impl Worker for TestWorker {
    type Init = Tracker;

    async fn new(id: WorkerId, tracker: Tracker) -> Result<Self, TerminationReason> {
        if tracker.broken_worker == Some(id.0) {
            return Err(TerminationReason::InitializationError(format!(
                "{id} is broken"
            )));
        }

        let created = tracker.created.fetch_add(1, Ordering::SeqCst);
        if created > 0 && tracker.recycle_delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(tracker.recycle_delay_ms)).await;
        }
        if created > 0 && tracker.panic_on_recycle {
            panic!("constructor exploded");
        }
        if tracker.max_instances.is_some_and(|max| created >= max) {
            return Err(TerminationReason::InitializationError(
                "no more workers".into(),
            ));
        }

        Ok(Self { tracker })
    }

    async fn exec(&mut self, task: Task) -> Result<JsonValue, TerminationReason> {
        let name = task.id().to_string();
        let payload = task.into_payload();

        self.tracker.enter(&name);
        let result = match payload["op"].as_str() {
            Some("sleep") => {
                let ms = payload["ms"].as_u64().unwrap_or(0);
                tokio::time::sleep(Duration::from_millis(ms)).await;
                Ok(payload["value"].clone())
            }
            Some("fail") => Err(TerminationReason::Exception(
                payload["message"].as_str().unwrap_or("failed").to_string(),
            )),
            Some("panic") => panic!("worker exploded"),
            _ => Ok(payload),
        };
        self.tracker.leave(&name);

        result
    }

    fn abort(&mut self) {
        self.tracker.aborted.fetch_add(1, Ordering::SeqCst);
        if self.tracker.abort_panics {
            panic!("abort exploded");
        }
    }
}

fn sleep_task(id: &str, ms: u64) -> Task {
    Task::with_id(id, json!({ "op": "sleep", "ms": ms, "value": id }))
}

async fn start(config: PoolConfig, tracker: &Tracker) -> WorkerPool {
    init_tracing();
    WorkerPool::start::<TestWorker>(config, tracker.clone())
        .await
        .expect("pool should start")
}

#[tokio::test]
async fn test_returns_worker_value() {
    let tracker = Tracker::default();
    let pool = start(PoolConfig::default().with_size(2), &tracker).await;

    let value = pool
        .submit(json!({ "hello": "world" }))
        .expect("submit should succeed")
        .await
        .expect("task should complete");

    assert_eq!(value, json!({ "hello": "world" }));
    assert_eq!(pool.stats().completed, 1);
    assert_eq!(pool.size(), 2);
}

#[tokio::test]
async fn test_never_exceeds_pool_size() {
    let tracker = Tracker::default();
    let pool = start(PoolConfig::default().with_size(3), &tracker).await;

    let handles: Vec<_> = (0..12)
        .map(|i| pool.submit_task(sleep_task(&format!("t{i}"), 20)).unwrap())
        .collect();

    assert!(pool.stats().running <= 3);

    for handle in handles {
        handle.await.expect("task should complete");
    }

    assert_eq!(tracker.peak.load(Ordering::SeqCst), 3);
    let stats = pool.stats();
    assert_eq!(stats.completed, 12);
    assert_eq!(stats.idle, 3);
    assert_eq!(stats.pending, 0);
}

#[tokio::test]
async fn test_short_tasks_wait_for_a_free_worker() {
    let tracker = Tracker::default();
    let pool = start(PoolConfig::default().with_size(2), &tracker).await;

    let handles: Vec<_> = [("A", 100), ("B", 100), ("C", 10), ("D", 10)]
        .into_iter()
        .map(|(id, ms)| pool.submit_task(sleep_task(id, ms)).unwrap())
        .collect();

    for handle in handles {
        handle.await.unwrap();
    }

    let first_end = tracker.position("end:A").min(tracker.position("end:B"));
    assert!(tracker.position("start:C") > first_end);
    assert!(tracker.position("start:D") > first_end);
}

#[tokio::test]
async fn test_dispatches_in_submission_order() {
    let tracker = Tracker::default();
    let pool = start(PoolConfig::default().with_size(1), &tracker).await;

    let ids: Vec<String> = (0..5).map(|i| format!("job-{i}")).collect();
    let handles: Vec<_> = ids
        .iter()
        .map(|id| pool.submit_task(sleep_task(id, 5)).unwrap())
        .collect();

    for handle in handles {
        handle.await.unwrap();
    }

    let starts: Vec<String> = tracker
        .log()
        .into_iter()
        .filter_map(|e| e.strip_prefix("start:").map(str::to_string))
        .collect();
    assert_eq!(starts, ids);
}

#[tokio::test]
async fn test_queued_tasks_keep_order_when_workers_free_together() {
    let tracker = Tracker::default();
    let pool = start(PoolConfig::default().with_size(2), &tracker).await;

    let handles: Vec<_> = [("A", 50), ("B", 50), ("C", 5), ("D", 5), ("E", 5)]
        .into_iter()
        .map(|(id, ms)| pool.submit_task(sleep_task(id, ms)).unwrap())
        .collect();
    assert_eq!(pool.stats().queued, 3);

    for handle in handles {
        handle.await.unwrap();
    }

    let first_end = tracker.position("end:A").min(tracker.position("end:B"));
    assert!(tracker.position("start:C") > first_end);
    assert!(tracker.position("start:C") < tracker.position("start:D"));
    assert!(tracker.position("start:D") < tracker.position("start:E"));
}

#[tokio::test]
async fn test_bounded_queue_rejects_immediately() {
    let tracker = Tracker::default();
    let pool = start(
        PoolConfig::default().with_size(1).with_queue_capacity(1),
        &tracker,
    )
    .await;

    let running = pool.submit_task(sleep_task("running", 50)).unwrap();
    let queued = pool.submit_task(sleep_task("queued", 1)).unwrap();

    let err = pool.submit_task(sleep_task("rejected", 1)).unwrap_err();
    assert_eq!(err, PoolError::CapacityExceeded { capacity: 1 });
    assert_eq!(pool.task_state(&TaskId::new("rejected")), None);

    assert_eq!(running.await.unwrap(), json!("running"));
    assert_eq!(queued.await.unwrap(), json!("queued"));
}

#[tokio::test]
async fn test_shutdown_cancels_in_flight_and_queued() {
    let tracker = Tracker::default();
    let pool = start(PoolConfig::default().with_size(2), &tracker).await;

    let handles: Vec<_> = (0..4)
        .map(|i| pool.submit_task(sleep_task(&format!("long-{i}"), 10_000)).unwrap())
        .collect();
    assert_eq!(
        pool.task_state(&TaskId::new("long-0")),
        Some(TaskState::Running)
    );
    assert_eq!(
        pool.task_state(&TaskId::new("long-3")),
        Some(TaskState::Queued)
    );

    pool.shutdown();
    pool.shutdown();

    for handle in handles {
        assert_eq!(handle.await, Err(PoolError::PoolShutdown));
    }

    // Sleeping tasks are abandoned at their await point
    pool.join();

    let stats = pool.stats();
    assert!(stats.shutdown);
    assert_eq!(stats.cancelled, 4);
    assert_eq!(stats.completed, 0);
    assert_eq!(stats.terminated, 2);
    assert_eq!(tracker.aborted.load(Ordering::SeqCst), 2);
    assert!(pool.is_shutdown());

    let err = pool.submit(json!(1)).unwrap_err();
    assert!(err.is_cancelled());
}

#[tokio::test]
async fn test_task_error_does_not_stop_pool() {
    let tracker = Tracker::default();
    let pool = start(PoolConfig::default().with_size(1), &tracker).await;

    let err = pool
        .submit_task(Task::with_id(
            "bad",
            json!({ "op": "fail", "message": "invalid image" }),
        ))
        .unwrap()
        .await
        .unwrap_err();

    assert_eq!(
        err,
        PoolError::WorkerFailure {
            task_id: TaskId::new("bad"),
            reason: TerminationReason::Exception("invalid image".into()),
        }
    );

    let value = pool.submit(json!("next")).unwrap().await.unwrap();
    assert_eq!(value, json!("next"));

    let stats = pool.stats();
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.recycled, 0);
    assert_eq!(tracker.created.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_panic_is_isolated_and_worker_recycled() {
    let tracker = Tracker::default();
    let pool = start(PoolConfig::default().with_size(2), &tracker).await;

    let err = pool
        .submit(json!({ "op": "panic" }))
        .unwrap()
        .await
        .unwrap_err();

    assert_eq!(
        err.termination_reason(),
        Some(&TerminationReason::Panicked("worker exploded".into()))
    );

    let handles: Vec<_> = (0..4).map(|i| pool.submit(json!(i)).unwrap()).collect();
    for (i, handle) in handles.into_iter().enumerate() {
        assert_eq!(handle.await.unwrap(), json!(i));
    }

    assert_eq!(pool.stats().terminated, 0);

    // Recycling finishes on the worker thread after the failure is reported
    pool.join();
    assert_eq!(pool.stats().recycled, 1);
    assert_eq!(tracker.aborted.load(Ordering::SeqCst), 1);
    assert_eq!(tracker.created.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_wall_clock_limit() {
    let tracker = Tracker::default();
    let pool = start(
        PoolConfig::default()
            .with_size(1)
            .with_max_wall_clock_time_ms(50),
        &tracker,
    )
    .await;

    let err = pool
        .submit_task(sleep_task("slow", 5_000))
        .unwrap()
        .await
        .unwrap_err();
    assert_eq!(
        err.termination_reason(),
        Some(&TerminationReason::WallClockTimeout)
    );

    let value = pool.submit_task(sleep_task("fast", 1)).unwrap().await;
    assert_eq!(value, Ok(json!("fast")));
    assert_eq!(pool.stats().recycled, 1);
    assert_eq!(tracker.aborted.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_failed_recycle_retires_worker() {
    let tracker = Tracker {
        max_instances: Some(1),
        ..Default::default()
    };
    let pool = start(PoolConfig::default().with_size(1), &tracker).await;

    let err = pool
        .submit(json!({ "op": "panic" }))
        .unwrap()
        .await
        .unwrap_err();
    assert!(matches!(
        err.termination_reason(),
        Some(TerminationReason::Panicked(_))
    ));

    // No worker left: new work fails instead of hanging
    let err = pool.submit(json!(1)).unwrap().await.unwrap_err();
    assert_eq!(err.termination_reason(), Some(&TerminationReason::Terminated));
    assert_eq!(pool.stats().terminated, 1);
}

#[tokio::test]
async fn test_panicking_recycle_retires_worker() {
    let tracker = Tracker {
        panic_on_recycle: true,
        ..Default::default()
    };
    let pool = start(PoolConfig::default().with_size(1), &tracker).await;

    let err = pool
        .submit(json!({ "op": "panic" }))
        .unwrap()
        .await
        .unwrap_err();
    assert_eq!(
        err.termination_reason(),
        Some(&TerminationReason::Panicked("worker exploded".into()))
    );

    let err = pool.submit(json!(1)).unwrap().await.unwrap_err();
    assert_eq!(err.termination_reason(), Some(&TerminationReason::Terminated));

    let stats = pool.stats();
    assert_eq!(stats.terminated, 1);
    assert_eq!(stats.recycled, 0);
    assert_eq!(stats.pending, 0);
}

#[tokio::test]
async fn test_panicking_abort_still_recycles() {
    let tracker = Tracker {
        abort_panics: true,
        ..Default::default()
    };
    let pool = start(PoolConfig::default().with_size(1), &tracker).await;

    let err = pool
        .submit(json!({ "op": "panic" }))
        .unwrap()
        .await
        .unwrap_err();
    assert!(matches!(
        err.termination_reason(),
        Some(TerminationReason::Panicked(_))
    ));

    let value = pool.submit(json!("after")).unwrap().await;
    assert_eq!(value, Ok(json!("after")));

    let stats = pool.stats();
    assert_eq!(stats.recycled, 1);
    assert_eq!(stats.terminated, 0);
    assert_eq!(tracker.aborted.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_failure_reported_before_recycle_finishes() {
    let tracker = Tracker {
        recycle_delay_ms: 500,
        ..Default::default()
    };
    let pool = start(PoolConfig::default().with_size(1), &tracker).await;

    let handle = pool.submit(json!({ "op": "panic" })).unwrap();
    let err = tokio::time::timeout(Duration::from_millis(250), handle)
        .await
        .expect("failure should not wait for the replacement worker")
        .unwrap_err();
    assert!(matches!(
        err.termination_reason(),
        Some(TerminationReason::Panicked(_))
    ));

    let stats = pool.stats();
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.recycled, 0);
    assert_eq!(stats.busy, 1);

    // Waits for the replacement, then runs normally
    let value = pool.submit(json!("next")).unwrap().await;
    assert_eq!(value, Ok(json!("next")));
    assert_eq!(pool.stats().recycled, 1);
}

#[tokio::test]
async fn test_worker_init_failure_fails_start() {
    init_tracing();
    let tracker = Tracker {
        broken_worker: Some(1),
        ..Default::default()
    };

    let err = WorkerPool::start::<TestWorker>(PoolConfig::default().with_size(3), tracker)
        .await
        .unwrap_err();

    assert_eq!(
        err,
        PoolError::WorkerInit {
            worker_id: WorkerId(1),
            reason: TerminationReason::InitializationError("worker-1 is broken".into()),
        }
    );
}

#[tokio::test]
async fn test_duplicate_pending_id_is_rejected() {
    let tracker = Tracker::default();
    let pool = start(PoolConfig::default().with_size(1), &tracker).await;

    let first = pool.submit_task(sleep_task("same", 50)).unwrap();
    let err = pool.submit_task(sleep_task("same", 1)).unwrap_err();
    assert_eq!(err, PoolError::DuplicateTaskId(TaskId::new("same")));

    first.await.unwrap();
    // Settled ids may be reused
    let again = pool.submit_task(sleep_task("same", 1)).unwrap();
    assert_eq!(again.task_id().as_str(), "same");
    again.await.unwrap();
}

#[tokio::test]
async fn test_events_follow_task_lifecycle() {
    init_tracing();
    let (tx, rx) = std::sync::mpsc::channel();
    let pool = WorkerPool::start_with_events::<TestWorker>(
        PoolConfig::default().with_size(1),
        Tracker::default(),
        Some(tx),
    )
    .await
    .unwrap();

    pool.submit_task(Task::with_id("ok", json!(1)))
        .unwrap()
        .await
        .unwrap();
    pool.submit_task(Task::with_id("ko", json!({ "op": "fail" })))
        .unwrap()
        .await
        .unwrap_err();

    // Taking the lock guarantees every event above was sent
    pool.shutdown();

    let events: Vec<PoolEvent> = rx.try_iter().collect();
    let for_task = |id: &str| -> Vec<String> {
        events
            .iter()
            .filter(|e| e.task_id().map(TaskId::as_str) == Some(id))
            .map(|e| e.to_string().split_whitespace().next().unwrap().to_string())
            .collect()
    };

    assert_eq!(for_task("ok"), ["QUEUED", "STARTED", "COMPLETED"]);
    assert_eq!(for_task("ko"), ["QUEUED", "STARTED", "FAILED"]);
    assert!(
        events
            .iter()
            .any(|e| matches!(e, PoolEvent::WorkerTerminated { worker_id } if *worker_id == WorkerId(0)))
    );
}

#[tokio::test]
async fn test_from_fn_pool() {
    init_tracing();
    let pool = WorkerPool::from_fn(PoolConfig::default().with_size(2), |task: Task| async move {
        let n = task.payload().as_i64().unwrap_or_default();
        Ok::<_, TerminationReason>(json!(n * n))
    })
    .await
    .unwrap();

    let handles: Vec<_> = (1..=4).map(|n| pool.submit(json!(n)).unwrap()).collect();
    let mut squares = Vec::new();
    for handle in handles {
        squares.push(handle.await.unwrap());
    }

    assert_eq!(squares, [json!(1), json!(4), json!(9), json!(16)]);
}

#[test]
fn test_blocking_start_outside_runtime() {
    init_tracing();
    let pool = WorkerPool::start_blocking::<TestWorker>(
        PoolConfig::default()
            .with_size(1)
            .with_thread_name_prefix("blocking"),
        Tracker::default(),
    )
    .unwrap();

    let handle = pool.submit(json!("sync")).unwrap();
    assert_eq!(futures::executor::block_on(handle), Ok(json!("sync")));

    pool.join();
    assert!(pool.is_shutdown());
}
