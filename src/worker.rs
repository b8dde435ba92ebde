use crate::{Task, TaskId, TerminationReason};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::future::Future;

/// Index of a worker inside its pool (`0..size`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkerId(pub usize);

impl std::fmt::Display for WorkerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "worker-{}", self.0)
    }
}

/// Worker lifecycle as seen by the pool
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    /// Bound to exactly one task
    Busy(TaskId),
    Terminated,
}

impl WorkerState {
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    pub fn is_busy(&self) -> bool {
        matches!(self, Self::Busy(_))
    }

    pub fn is_terminated(&self) -> bool {
        matches!(self, Self::Terminated)
    }
}

/// An isolated execution context, one per pool thread
///
/// Note: Futures are not required to be `Send` because every worker lives on
/// its own thread with a single-threaded runtime. The worker itself is never
/// moved off that thread, so it may hold thread-local state.
pub trait Worker: Sized + 'static {
    /// Data needed to build a worker, cloned once per worker thread
    type Init: Clone + Send + 'static;

    /// Create a new worker
    fn new(
        id: WorkerId,
        init: Self::Init,
    ) -> impl Future<Output = Result<Self, TerminationReason>>;

    /// Execute a task
    ///
    /// Returns:
    /// - `Ok(value)` if the task succeeded
    /// - `Err(TerminationReason)` if something went wrong
    fn exec(&mut self, task: Task) -> impl Future<Output = Result<JsonValue, TerminationReason>>;

    /// Abort the worker
    ///
    /// Called when the current task was abandoned (timeout, panic, shutdown).
    /// The pool drops this instance afterwards and, unless it is shutting
    /// down, creates a fresh one.
    fn abort(&mut self) {}
}

/// Worker backed by an async closure
pub struct FnWorker<F> {
    id: WorkerId,
    f: F,
}

impl<F> FnWorker<F> {
    pub fn id(&self) -> WorkerId {
        self.id
    }
}

impl<F, Fut> Worker for FnWorker<F>
where
    F: Fn(Task) -> Fut + Clone + Send + 'static,
    Fut: Future<Output = Result<JsonValue, TerminationReason>>,
{
    type Init = F;

    async fn new(id: WorkerId, f: F) -> Result<Self, TerminationReason> {
        Ok(Self { id, f })
    }

    fn exec(&mut self, task: Task) -> impl Future<Output = Result<JsonValue, TerminationReason>> {
        (self.f)(task)
    }
}
