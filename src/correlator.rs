//! Maps task ids to the caller's pending handle and settles each handle
//! exactly once.

use crate::{PoolError, TaskId, TaskOutcome, TaskState};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};
use tokio::sync::oneshot;

type ResultSender = oneshot::Sender<Result<JsonValue, PoolError>>;

/// Caller-side handle for a submitted task
///
/// Resolves once with the worker's value, its failure, or `PoolShutdown`.
/// Dropping the handle does not cancel the task.
#[derive(Debug)]
pub struct TaskHandle {
    task_id: TaskId,
    rx: oneshot::Receiver<Result<JsonValue, PoolError>>,
}

impl TaskHandle {
    pub fn task_id(&self) -> &TaskId {
        &self.task_id
    }
}

impl Future for TaskHandle {
    type Output = Result<JsonValue, PoolError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            // Sender dropped without settling: the pool itself is gone
            Poll::Ready(Err(_)) => Poll::Ready(Err(PoolError::PoolShutdown)),
            Poll::Pending => Poll::Pending,
        }
    }
}

#[derive(Debug)]
struct PendingResult {
    state: TaskState,
    sender: ResultSender,
    submitted: Instant,
    started: Option<Instant>,
}

/// Pending results keyed by task id
#[derive(Debug, Default)]
pub(crate) struct ResultCorrelator {
    pending: HashMap<TaskId, PendingResult>,
}

impl ResultCorrelator {
    /// Register a new pending result; the id must not be pending already
    pub fn register(&mut self, task_id: &TaskId) -> Result<TaskHandle, PoolError> {
        if self.pending.contains_key(task_id) {
            return Err(PoolError::DuplicateTaskId(task_id.clone()));
        }

        let (sender, rx) = oneshot::channel();
        self.pending.insert(
            task_id.clone(),
            PendingResult {
                state: TaskState::Queued,
                sender,
                submitted: Instant::now(),
                started: None,
            },
        );

        Ok(TaskHandle {
            task_id: task_id.clone(),
            rx,
        })
    }

    /// Drop a registration that never made it into the queue
    pub fn unregister(&mut self, task_id: &TaskId) {
        self.pending.remove(task_id);
    }

    /// Mark a queued task as running; false if unknown or not queued
    pub fn start(&mut self, task_id: &TaskId) -> bool {
        match self.pending.get_mut(task_id) {
            Some(entry) if entry.state.can_transition_to(TaskState::Running) => {
                entry.state = TaskState::Running;
                entry.started = Some(Instant::now());
                true
            }
            _ => false,
        }
    }

    /// Settle a task. Returns the time it spent running (or waiting, if it
    /// never started), or `None` when the id is unknown, meaning it was
    /// already settled.
    pub fn settle(&mut self, task_id: &TaskId, outcome: TaskOutcome) -> Option<Duration> {
        let entry = self.pending.get(task_id)?;
        if !entry.state.can_transition_to(outcome.state()) {
            return None;
        }

        let entry = self.pending.remove(task_id)?;
        let elapsed = entry.started.unwrap_or(entry.submitted).elapsed();

        // The caller may have dropped its handle; nothing to notify then
        let _ = entry.sender.send(outcome.into_result(task_id));

        Some(elapsed)
    }

    /// Cancel every pending task, returning their ids
    pub fn cancel_all(&mut self) -> Vec<TaskId> {
        let mut ids: Vec<TaskId> = self.pending.keys().cloned().collect();
        ids.sort();

        for id in &ids {
            self.settle(id, TaskOutcome::Cancelled);
        }

        ids
    }

    pub fn state(&self, task_id: &TaskId) -> Option<TaskState> {
        self.pending.get(task_id).map(|entry| entry.state)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn running(&self) -> usize {
        self.pending
            .values()
            .filter(|entry| entry.state == TaskState::Running)
            .count()
    }
}
