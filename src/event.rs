use crate::{TaskId, TerminationReason, WorkerId};
use serde::{Deserialize, Serialize};

/// Type alias for pool event sender
pub type EventSender = std::sync::mpsc::Sender<PoolEvent>;

/// Lifecycle event emitted by the pool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PoolEvent {
    /// Task accepted and waiting for a worker
    Queued { task_id: TaskId },
    /// Task handed to a worker
    Started { task_id: TaskId, worker_id: WorkerId },
    /// Task produced a value
    Completed {
        task_id: TaskId,
        worker_id: WorkerId,
        elapsed_ms: u64,
    },
    /// Task failed (worker error, panic, timeout)
    Failed {
        task_id: TaskId,
        worker_id: Option<WorkerId>,
        reason: TerminationReason,
    },
    /// Task cancelled by shutdown
    Cancelled { task_id: TaskId },
    /// Worker was re-created after a failure left it unusable
    WorkerRecycled {
        worker_id: WorkerId,
        reason: TerminationReason,
    },
    /// Worker left the pool
    WorkerTerminated { worker_id: WorkerId },
}

impl PoolEvent {
    /// Task this event refers to, if any
    pub fn task_id(&self) -> Option<&TaskId> {
        match self {
            Self::Queued { task_id }
            | Self::Started { task_id, .. }
            | Self::Completed { task_id, .. }
            | Self::Failed { task_id, .. }
            | Self::Cancelled { task_id } => Some(task_id),
            Self::WorkerRecycled { .. } | Self::WorkerTerminated { .. } => None,
        }
    }
}

impl std::fmt::Display for PoolEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Queued { task_id } => write!(f, "QUEUED {task_id}"),
            Self::Started { task_id, worker_id } => write!(f, "STARTED {task_id} on {worker_id}"),
            Self::Completed {
                task_id,
                worker_id,
                elapsed_ms,
            } => write!(f, "COMPLETED {task_id} on {worker_id} in {elapsed_ms}ms"),
            Self::Failed {
                task_id, reason, ..
            } => write!(f, "FAILED {task_id}: {reason}"),
            Self::Cancelled { task_id } => write!(f, "CANCELLED {task_id}"),
            Self::WorkerRecycled { worker_id, reason } => {
                write!(f, "RECYCLED {worker_id}: {reason}")
            }
            Self::WorkerTerminated { worker_id } => write!(f, "TERMINATED {worker_id}"),
        }
    }
}
