use crate::{TaskId, TerminationReason, WorkerId};

/// Errors surfaced to callers of the pool
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    /// The bounded queue is full
    #[error("task queue is full (capacity {capacity})")]
    CapacityExceeded { capacity: usize },

    /// The task failed inside its worker
    #[error("task {task_id} failed: {reason}")]
    WorkerFailure {
        task_id: TaskId,
        reason: TerminationReason,
    },

    /// The pool was shut down before the task settled
    #[error("worker pool is shut down")]
    PoolShutdown,

    /// A task with the same id is still pending
    #[error("task {0} is already pending")]
    DuplicateTaskId(TaskId),

    /// A worker could not be created when starting the pool
    #[error("worker {worker_id} failed to initialize: {reason}")]
    WorkerInit {
        worker_id: WorkerId,
        reason: TerminationReason,
    },

    /// Invalid configuration
    #[error("invalid pool configuration: {0}")]
    Config(String),
}

impl PoolError {
    /// Returns true if the task was cancelled by shutdown
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::PoolShutdown)
    }

    /// Returns the worker's failure reason, if any
    pub fn termination_reason(&self) -> Option<&TerminationReason> {
        match self {
            Self::WorkerFailure { reason, .. } | Self::WorkerInit { reason, .. } => Some(reason),
            _ => None,
        }
    }
}
