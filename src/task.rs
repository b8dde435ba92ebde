use crate::{PoolError, TerminationReason};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::time::{SystemTime, UNIX_EPOCH};

// ============================================================================
// Task identity
// ============================================================================

/// Unique task identifier, caller-assigned or generated
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a time-ordered id (UUID v7)
    pub fn generate() -> Self {
        Self(uuid::Uuid::now_v7().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for TaskId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

// ============================================================================
// Task
// ============================================================================

/// A unit of work. Immutable once submitted; ownership moves to the worker
/// that runs it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    id: TaskId,
    payload: JsonValue,
    /// Unix timestamp (ms) when the task was submitted to a pool
    #[serde(default, skip_serializing_if = "Option::is_none")]
    submitted_at: Option<u64>,
}

impl Task {
    /// Create a task with a generated id
    pub fn new(payload: JsonValue) -> Self {
        Self::with_id(TaskId::generate(), payload)
    }

    /// Create a task with a caller-assigned id
    pub fn with_id(id: impl Into<TaskId>, payload: JsonValue) -> Self {
        Self {
            id: id.into(),
            payload,
            submitted_at: None,
        }
    }

    pub fn id(&self) -> &TaskId {
        &self.id
    }

    pub fn payload(&self) -> &JsonValue {
        &self.payload
    }

    /// `None` until the task is accepted by a pool
    pub fn submitted_at(&self) -> Option<u64> {
        self.submitted_at
    }

    pub(crate) fn mark_submitted(&mut self) {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();

        self.submitted_at = Some(now);
    }

    /// Take the payload, consuming the task
    pub fn into_payload(self) -> JsonValue {
        self.payload
    }
}

// ============================================================================
// Lifecycle
// ============================================================================

/// Per-task state machine
///
/// `Queued -> Running -> {Completed | Failed | Cancelled}`. A queued task may
/// also be cancelled (shutdown) or failed (no worker left). Terminal states
/// are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    pub fn can_transition_to(self, next: TaskState) -> bool {
        match (self, next) {
            (Self::Queued, Self::Running) => true,
            (Self::Queued, Self::Failed | Self::Cancelled) => true,
            (Self::Running, Self::Completed | Self::Failed | Self::Cancelled) => true,
            _ => false,
        }
    }
}

/// Outcome of a task, as reported by a worker or forced by shutdown
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "data", rename_all = "snake_case")]
pub enum TaskOutcome {
    Completed(JsonValue),
    Failed(TerminationReason),
    Cancelled,
}

impl TaskOutcome {
    /// Terminal state this outcome leads to
    pub fn state(&self) -> TaskState {
        match self {
            Self::Completed(_) => TaskState::Completed,
            Self::Failed(_) => TaskState::Failed,
            Self::Cancelled => TaskState::Cancelled,
        }
    }

    pub(crate) fn into_result(self, task_id: &TaskId) -> Result<JsonValue, PoolError> {
        match self {
            Self::Completed(value) => Ok(value),
            Self::Failed(reason) => Err(PoolError::WorkerFailure {
                task_id: task_id.clone(),
                reason,
            }),
            Self::Cancelled => Err(PoolError::PoolShutdown),
        }
    }
}

impl From<Result<JsonValue, TerminationReason>> for TaskOutcome {
    fn from(result: Result<JsonValue, TerminationReason>) -> Self {
        match result {
            Ok(value) => Self::Completed(value),
            Err(reason) => Self::Failed(reason),
        }
    }
}
