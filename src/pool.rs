use crate::dispatcher::{Dispatcher, SharedDispatcher};
use crate::executor::WorkerThread;
use crate::{
    EventSender, FnWorker, PoolConfig, PoolError, PoolStats, Task, TaskHandle, TaskId, TaskState,
    TerminationReason, Worker, WorkerId,
};
use serde_json::Value as JsonValue;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{error, info};

/// Fixed-size pool of worker threads
///
/// # Example
///
/// ```ignore
/// use workerpool_core::{PoolConfig, WorkerPool};
///
/// let pool = WorkerPool::from_fn(PoolConfig::default().with_size(4), |task| async move {
///     Ok(task.into_payload())
/// })
/// .await?;
///
/// let value = pool.submit(serde_json::json!({ "n": 1 }))?.await?;
/// pool.shutdown();
/// ```
pub struct WorkerPool {
    config: PoolConfig,
    shared: Arc<SharedDispatcher>,
    shutdown_tx: watch::Sender<bool>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Start a pool and wait until every worker is initialized
    pub async fn start<W: Worker>(config: PoolConfig, init: W::Init) -> Result<Self, PoolError> {
        Self::start_with_events::<W>(config, init, None).await
    }

    /// Start a pool that reports lifecycle events to `events`
    pub async fn start_with_events<W: Worker>(
        config: PoolConfig,
        init: W::Init,
        events: Option<EventSender>,
    ) -> Result<Self, PoolError> {
        let size = config.size.get();
        let (senders, receivers): (Vec<_>, Vec<_>) =
            (0..size).map(|_| mpsc::unbounded_channel()).unzip();
        let (shutdown_tx, _) = watch::channel(false);

        let pool = Self {
            shared: Arc::new(SharedDispatcher::new(Dispatcher::new(
                config.queue_capacity,
                senders,
                events,
            ))),
            shutdown_tx,
            threads: Mutex::new(Vec::with_capacity(size)),
            config,
        };

        let mut ready = Vec::with_capacity(size);
        for (index, rx) in receivers.into_iter().enumerate() {
            let id = WorkerId(index);
            let (ready_tx, ready_rx) = oneshot::channel();

            let thread = WorkerThread::<W> {
                id,
                init: init.clone(),
                shared: pool.shared.clone(),
                rx,
                shutdown: pool.shutdown_tx.subscribe(),
                wall_clock_limit: pool.config.wall_clock_limit(),
            };

            let name = format!("{}-{}", pool.config.thread_name_prefix, index);
            match thread.spawn(name, ready_tx) {
                Ok(handle) => pool.lock_threads().push(handle),
                Err(e) => {
                    error!(worker_id = %id, "failed to spawn worker thread: {}", e);
                    pool.shutdown();
                    return Err(PoolError::WorkerInit {
                        worker_id: id,
                        reason: TerminationReason::InitializationError(e.to_string()),
                    });
                }
            }

            ready.push((id, ready_rx));
        }

        for (id, ready_rx) in ready {
            // A dropped sender means the thread died before reporting
            let result = ready_rx
                .await
                .unwrap_or(Err(TerminationReason::Terminated));

            if let Err(reason) = result {
                pool.shutdown();
                return Err(PoolError::WorkerInit {
                    worker_id: id,
                    reason,
                });
            }
        }

        info!(
            size,
            queue_capacity = ?pool.config.queue_capacity,
            max_wall_clock_time_ms = pool.config.max_wall_clock_time_ms,
            "worker pool started"
        );

        Ok(pool)
    }

    /// Blocking variant of [`WorkerPool::start`] for callers outside an
    /// async context
    pub fn start_blocking<W: Worker>(config: PoolConfig, init: W::Init) -> Result<Self, PoolError> {
        futures::executor::block_on(Self::start::<W>(config, init))
    }

    /// Start a pool of [`FnWorker`]s running `f` for every task
    pub async fn from_fn<F, Fut>(config: PoolConfig, f: F) -> Result<Self, PoolError>
    where
        F: Fn(Task) -> Fut + Clone + Send + 'static,
        Fut: Future<Output = Result<JsonValue, TerminationReason>>,
    {
        Self::start::<FnWorker<F>>(config, f).await
    }

    /// Submit a payload under a generated task id
    pub fn submit(&self, payload: JsonValue) -> Result<TaskHandle, PoolError> {
        self.submit_task(Task::new(payload))
    }

    /// Submit a task; never waits for a worker
    ///
    /// Fails with `CapacityExceeded` when the queue bound is reached,
    /// `DuplicateTaskId` when the id is still pending and `PoolShutdown`
    /// after shutdown.
    pub fn submit_task(&self, task: Task) -> Result<TaskHandle, PoolError> {
        self.shared.lock().submit(task)
    }

    /// Cancel all unsettled tasks with `PoolShutdown` and stop every worker
    ///
    /// Running tasks are abandoned at their next await point. Idempotent.
    pub fn shutdown(&self) {
        if self.shared.lock().shutdown() {
            self.shutdown_tx.send_replace(true);
            info!("worker pool shut down");
        }
    }

    /// Shut down and block until every worker thread has exited
    pub fn join(&self) {
        self.shutdown();

        let threads = std::mem::take(&mut *self.lock_threads());
        for handle in threads {
            let name = handle.thread().name().map(str::to_string);
            if handle.join().is_err() {
                error!(thread = ?name, "worker thread panicked");
            }
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.shared.lock().is_shutdown()
    }

    /// State of an unsettled task; `None` once settled or if unknown
    pub fn task_state(&self, task_id: &TaskId) -> Option<TaskState> {
        self.shared.lock().task_state(task_id)
    }

    pub fn stats(&self) -> PoolStats {
        self.shared.lock().stats()
    }

    pub fn size(&self) -> usize {
        self.config.size.get()
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    fn lock_threads(&self) -> std::sync::MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.threads.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("config", &self.config)
            .field("stats", &self.stats())
            .finish()
    }
}
