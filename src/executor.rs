//! Worker thread body
//!
//! Each worker owns a dedicated OS thread with a current-thread tokio
//! runtime. The `Worker` instance is created on that thread and never leaves
//! it; tasks arrive by value over the assignment channel.

use crate::dispatcher::{AssignmentReceiver, SharedDispatcher};
use crate::{Task, TaskOutcome, TerminationReason, Worker, WorkerId};
use futures::FutureExt;
use serde_json::Value as JsonValue;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tracing::{debug, error, warn};

/// Signals the pool once the first worker instance is ready (or failed)
pub(crate) type ReadySender = oneshot::Sender<Result<(), TerminationReason>>;

pub(crate) struct WorkerThread<W: Worker> {
    pub id: WorkerId,
    pub init: W::Init,
    pub shared: Arc<SharedDispatcher>,
    pub rx: AssignmentReceiver,
    pub shutdown: watch::Receiver<bool>,
    pub wall_clock_limit: Option<Duration>,
}

impl<W: Worker> WorkerThread<W> {
    pub fn spawn(self, name: String, ready: ReadySender) -> std::io::Result<JoinHandle<()>> {
        std::thread::Builder::new().name(name).spawn(move || {
            let runtime = match tokio::runtime::Builder::new_current_thread()
                .enable_time()
                .build()
            {
                Ok(runtime) => runtime,
                Err(e) => {
                    let _ = ready.send(Err(TerminationReason::InitializationError(format!(
                        "failed to build worker runtime: {e}"
                    ))));
                    return;
                }
            };

            runtime.block_on(self.run(ready));
        })
    }

    async fn run(self, ready: ReadySender) {
        let Self {
            id,
            init,
            shared,
            mut rx,
            mut shutdown,
            wall_clock_limit,
        } = self;

        let mut worker = match W::new(id, init.clone()).await {
            Ok(worker) => {
                let _ = ready.send(Ok(()));
                worker
            }
            Err(reason) => {
                error!(worker_id = %id, "worker failed to initialize: {}", reason);
                let _ = ready.send(Err(reason));
                return;
            }
        };

        debug!(worker_id = %id, "worker started");
        let _guard = RetireOnUnwind {
            id,
            shared: shared.clone(),
        };

        loop {
            let task = tokio::select! {
                biased;
                _ = shutdown.wait_for(|stop| *stop) => break,
                task = rx.recv() => match task {
                    Some(task) => task,
                    None => break,
                },
            };

            let task_id = task.id().clone();

            // Race the task against shutdown; cancellation only happens at
            // the task's await points
            let result = tokio::select! {
                biased;
                _ = shutdown.wait_for(|stop| *stop) => None,
                result = execute(&mut worker, task, wall_clock_limit) => Some(result),
            };

            let Some(result) = result else {
                debug!(worker_id = %id, task_id = %task_id, "task abandoned on shutdown");
                abort(id, &mut worker);
                break;
            };

            let outcome = TaskOutcome::from(result);

            let recycle = match &outcome {
                TaskOutcome::Failed(reason) if reason.requires_recycle() => Some(reason.clone()),
                _ => None,
            };

            let Some(reason) = recycle else {
                shared.lock().complete(id, &task_id, outcome);
                continue;
            };

            // The caller learns about the failure now; the worker stays bound
            // until its replacement is ready
            shared.lock().report(id, &task_id, outcome);

            warn!(worker_id = %id, task_id = %task_id, "recycling worker: {}", reason);
            abort(id, &mut worker);

            match recreate::<W>(id, &init).await {
                Ok(fresh) => {
                    worker = fresh;
                    shared.lock().recycled(id, reason);
                }
                Err(init_err) => {
                    error!(worker_id = %id, "worker failed to re-initialize: {}", init_err);
                    shared.lock().retire(id, None);
                    return;
                }
            }
        }

        debug!(worker_id = %id, "worker stopped");
    }
}

/// Retires the worker if its thread unwinds, so a task bound to it still
/// settles and the dispatcher stops counting it as live
struct RetireOnUnwind {
    id: WorkerId,
    shared: Arc<SharedDispatcher>,
}

impl Drop for RetireOnUnwind {
    fn drop(&mut self) {
        if std::thread::panicking() {
            error!(worker_id = %self.id, "worker thread panicked");
            self.shared.lock().retire(self.id, None);
        }
    }
}

/// Call `Worker::abort`; a panic there only loses an instance that is
/// discarded anyway
fn abort<W: Worker>(id: WorkerId, worker: &mut W) {
    if let Err(payload) = std::panic::catch_unwind(AssertUnwindSafe(|| worker.abort())) {
        warn!(
            worker_id = %id,
            "worker panicked while aborting: {}",
            TerminationReason::from_panic(payload)
        );
    }
}

/// Build a replacement worker, turning a constructor panic into an error
async fn recreate<W: Worker>(id: WorkerId, init: &W::Init) -> Result<W, TerminationReason> {
    AssertUnwindSafe(W::new(id, init.clone()))
        .catch_unwind()
        .await
        .unwrap_or_else(|payload| Err(TerminationReason::from_panic(payload)))
}

/// Run one task, catching panics and enforcing the wall-clock limit
async fn execute<W: Worker>(
    worker: &mut W,
    task: Task,
    wall_clock_limit: Option<Duration>,
) -> Result<JsonValue, TerminationReason> {
    let exec = AssertUnwindSafe(async move { worker.exec(task).await }).catch_unwind();

    let caught = match wall_clock_limit {
        Some(limit) => match tokio::time::timeout(limit, exec).await {
            Ok(caught) => caught,
            Err(_) => return Err(TerminationReason::WallClockTimeout),
        },
        None => exec.await,
    };

    caught.unwrap_or_else(|payload| Err(TerminationReason::from_panic(payload)))
}
