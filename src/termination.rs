use serde::{Deserialize, Serialize};

/// Reason why a worker failed to produce a value for a task
///
/// This is returned as `Err(TerminationReason)` from `Worker::exec()` and
/// `Worker::new()`. A successful execution returns `Ok(value)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TerminationReason {
    // === Resource limits ===
    /// Task exceeded the configured wall-clock time limit
    WallClockTimeout,

    // === Task errors (userland) ===
    /// Task returned an error
    Exception(String),

    /// Task panicked while executing
    Panicked(String),

    // === Runtime errors (pool-side) ===
    /// Worker failed to initialize
    InitializationError(String),

    /// Worker thread is gone (shutdown or lost after a failed recycle)
    Terminated,

    /// Worker was aborted via abort() call
    Aborted,

    /// Unexpected error
    Other(String),
}

impl TerminationReason {
    /// Returns true if this represents a resource limit violation
    pub fn is_limit_exceeded(&self) -> bool {
        matches!(self, Self::WallClockTimeout)
    }

    /// Returns true if the task itself failed (error or panic)
    pub fn is_task_error(&self) -> bool {
        matches!(self, Self::Exception(_) | Self::Panicked(_))
    }

    /// Returns true if this is a runtime (pool-side) error
    pub fn is_runtime_error(&self) -> bool {
        matches!(
            self,
            Self::InitializationError(_) | Self::Terminated | Self::Aborted | Self::Other(_)
        )
    }

    /// Returns true if the worker state can no longer be trusted and the
    /// worker must be re-created before running another task
    pub fn requires_recycle(&self) -> bool {
        matches!(self, Self::Panicked(_) | Self::WallClockTimeout | Self::Aborted)
    }

    /// Get a human-readable description
    pub fn description(&self) -> &str {
        match self {
            Self::WallClockTimeout => "Task exceeded wall-clock time limit",
            Self::Exception(msg) => msg,
            Self::Panicked(msg) => msg,
            Self::InitializationError(msg) => msg,
            Self::Terminated => "Worker was terminated",
            Self::Aborted => "Worker was aborted",
            Self::Other(msg) => msg,
        }
    }

    /// Build a reason from a caught panic payload
    pub(crate) fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let msg = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "task panicked".to_string()
        };

        Self::Panicked(msg)
    }
}

impl std::fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.description())
    }
}

impl std::error::Error for TerminationReason {}
