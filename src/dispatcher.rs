//! Coordinator state: the queue, the worker table and the pending results.
//!
//! Every method runs inside one short critical section and never awaits.
//! Dispatch happens after each enqueue and each release.

use crate::correlator::{ResultCorrelator, TaskHandle};
use crate::queue::TaskQueue;
use crate::{
    EventSender, PoolError, PoolEvent, Task, TaskId, TaskOutcome, TaskState, TerminationReason,
    WorkerId, WorkerState,
};
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

/// Channel carrying a task (and its ownership) to a worker thread
pub(crate) type AssignmentSender = mpsc::UnboundedSender<Task>;
pub(crate) type AssignmentReceiver = mpsc::UnboundedReceiver<Task>;

/// Point-in-time view of the pool
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    pub size: usize,
    pub idle: usize,
    pub busy: usize,
    pub terminated: usize,
    /// Tasks waiting for a worker
    pub queued: usize,
    /// Tasks bound to a worker
    pub running: usize,
    /// Tasks not yet settled (queued + running)
    pub pending: usize,
    pub queue_capacity: Option<usize>,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub recycled: u64,
    pub shutdown: bool,
}

#[derive(Debug)]
struct WorkerSlot {
    state: WorkerState,
    tx: Option<AssignmentSender>,
}

#[derive(Debug, Default)]
struct Counters {
    completed: u64,
    failed: u64,
    cancelled: u64,
    recycled: u64,
}

#[derive(Debug)]
pub(crate) struct Dispatcher {
    queue: TaskQueue,
    workers: Vec<WorkerSlot>,
    correlator: ResultCorrelator,
    counters: Counters,
    events: Option<EventSender>,
    shutdown: bool,
}

impl Dispatcher {
    pub fn new(
        queue_capacity: Option<NonZeroUsize>,
        senders: Vec<AssignmentSender>,
        events: Option<EventSender>,
    ) -> Self {
        let workers = senders
            .into_iter()
            .map(|tx| WorkerSlot {
                state: WorkerState::Idle,
                tx: Some(tx),
            })
            .collect();

        Self {
            queue: TaskQueue::new(queue_capacity),
            workers,
            correlator: ResultCorrelator::default(),
            counters: Counters::default(),
            events,
            shutdown: false,
        }
    }

    /// Accept a task: register its pending result, queue it, dispatch
    pub fn submit(&mut self, mut task: Task) -> Result<TaskHandle, PoolError> {
        if self.shutdown {
            return Err(PoolError::PoolShutdown);
        }

        task.mark_submitted();

        let task_id = task.id().clone();
        let handle = self.correlator.register(&task_id)?;

        if let Err(err) = self.queue.enqueue(task) {
            self.correlator.unregister(&task_id);
            debug!(task_id = %task_id, "task rejected: {}", err);
            return Err(err);
        }

        trace!(task_id = %task_id, queued = self.queue.len(), "task queued");
        self.emit(PoolEvent::Queued { task_id });
        self.dispatch();

        Ok(handle)
    }

    /// Lowest-numbered idle worker, or `None` when the pool is exhausted
    pub fn acquire(&self) -> Option<WorkerId> {
        self.workers
            .iter()
            .position(|slot| slot.state.is_idle())
            .map(WorkerId)
    }

    /// Return a busy worker to the idle set
    pub fn release(&mut self, worker_id: WorkerId) {
        if let Some(slot) = self.workers.get_mut(worker_id.0) {
            if slot.state.is_busy() {
                slot.state = WorkerState::Idle;
            }
        }
    }

    /// Pair idle workers with the head of the queue until one runs out
    pub fn dispatch(&mut self) {
        if self.shutdown {
            return;
        }

        while !self.queue.is_empty() {
            let Some(worker_id) = self.acquire() else {
                break;
            };
            let Some(task) = self.queue.dequeue() else {
                break;
            };
            self.assign(worker_id, task);
        }

        if !self.queue.is_empty() && self.live_workers() == 0 {
            self.fail_queued(TerminationReason::Terminated);
        }
    }

    fn assign(&mut self, worker_id: WorkerId, task: Task) {
        let task_id = task.id().clone();
        let slot = &mut self.workers[worker_id.0];

        let sent = match &slot.tx {
            Some(tx) => tx.send(task).is_ok(),
            None => false,
        };

        if sent {
            slot.state = WorkerState::Busy(task_id.clone());
            self.correlator.start(&task_id);
            debug!(worker_id = %worker_id, task_id = %task_id, "task dispatched");
            self.emit(PoolEvent::Started { task_id, worker_id });
        } else {
            // The worker thread is gone
            slot.state = WorkerState::Terminated;
            slot.tx = None;
            warn!(worker_id = %worker_id, task_id = %task_id, "worker unreachable, task failed");
            self.emit(PoolEvent::WorkerTerminated { worker_id });
            self.correlator.start(&task_id);
            self.settle(Some(worker_id), &task_id, TaskOutcome::Failed(TerminationReason::Terminated));
        }
    }

    /// A worker finished a task and is ready for the next one
    pub fn complete(&mut self, worker_id: WorkerId, task_id: &TaskId, outcome: TaskOutcome) {
        self.settle(Some(worker_id), task_id, outcome);
        self.release(worker_id);
        self.dispatch();
    }

    /// Settle a task without releasing its worker, which stays bound until
    /// it is recycled or retired
    pub fn report(&mut self, worker_id: WorkerId, task_id: &TaskId, outcome: TaskOutcome) {
        self.settle(Some(worker_id), task_id, outcome);
    }

    /// A worker was re-created after an unrecoverable task failure and is
    /// ready for the next task
    pub fn recycled(&mut self, worker_id: WorkerId, reason: TerminationReason) {
        self.counters.recycled += 1;
        info!(worker_id = %worker_id, "worker recycled: {}", reason);
        self.emit(PoolEvent::WorkerRecycled { worker_id, reason });
        self.release(worker_id);
        self.dispatch();
    }

    /// A worker left the pool for good, possibly while reporting a task.
    /// A task still bound to it fails with `Terminated`.
    pub fn retire(&mut self, worker_id: WorkerId, report: Option<(TaskId, TaskOutcome)>) {
        if let Some((task_id, outcome)) = report {
            self.settle(Some(worker_id), &task_id, outcome);
        }

        let Some(slot) = self.workers.get_mut(worker_id.0) else {
            return;
        };
        let previous = std::mem::replace(&mut slot.state, WorkerState::Terminated);
        slot.tx = None;

        let bound = match previous {
            WorkerState::Terminated => {
                self.dispatch();
                return;
            }
            WorkerState::Busy(task_id) => Some(task_id),
            WorkerState::Idle => None,
        };

        warn!(worker_id = %worker_id, live = self.live_workers(), "worker retired");
        self.emit(PoolEvent::WorkerTerminated { worker_id });

        if let Some(task_id) = bound {
            // No-op when the report above already settled it
            self.settle(
                Some(worker_id),
                &task_id,
                TaskOutcome::Failed(TerminationReason::Terminated),
            );
        }

        self.dispatch();
    }

    /// Stop accepting work and cancel everything unsettled. Returns false if
    /// the pool was already shut down.
    pub fn shutdown(&mut self) -> bool {
        if self.shutdown {
            return false;
        }
        self.shutdown = true;

        let dropped = self.queue.drain();
        let cancelled = self.correlator.cancel_all();
        self.counters.cancelled += cancelled.len() as u64;

        info!(
            queued = dropped.len(),
            cancelled = cancelled.len(),
            "shutting down worker pool"
        );

        for task_id in cancelled {
            self.emit(PoolEvent::Cancelled { task_id });
        }

        for index in 0..self.workers.len() {
            let slot = &mut self.workers[index];
            // Closing the channel lets idle worker threads exit
            slot.tx = None;
            if !slot.state.is_terminated() {
                slot.state = WorkerState::Terminated;
                self.emit(PoolEvent::WorkerTerminated {
                    worker_id: WorkerId(index),
                });
            }
        }

        true
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown
    }

    /// State of an unsettled task; `None` once settled or if unknown
    pub fn task_state(&self, task_id: &TaskId) -> Option<TaskState> {
        self.correlator.state(task_id)
    }

    pub fn stats(&self) -> PoolStats {
        let mut stats = PoolStats {
            size: self.workers.len(),
            queued: self.queue.len(),
            running: self.correlator.running(),
            pending: self.correlator.len(),
            queue_capacity: self.queue.capacity(),
            completed: self.counters.completed,
            failed: self.counters.failed,
            cancelled: self.counters.cancelled,
            recycled: self.counters.recycled,
            shutdown: self.shutdown,
            ..Default::default()
        };

        for slot in &self.workers {
            match slot.state {
                WorkerState::Idle => stats.idle += 1,
                WorkerState::Busy(_) => stats.busy += 1,
                WorkerState::Terminated => stats.terminated += 1,
            }
        }

        stats
    }

    fn live_workers(&self) -> usize {
        self.workers
            .iter()
            .filter(|slot| !slot.state.is_terminated())
            .count()
    }

    fn fail_queued(&mut self, reason: TerminationReason) {
        let tasks = self.queue.drain();
        warn!(tasks = tasks.len(), "no live workers left, failing queued tasks");

        for task in tasks {
            self.settle(None, task.id(), TaskOutcome::Failed(reason.clone()));
        }
    }

    fn settle(&mut self, worker_id: Option<WorkerId>, task_id: &TaskId, outcome: TaskOutcome) {
        let reason = match &outcome {
            TaskOutcome::Failed(reason) => Some(reason.clone()),
            _ => None,
        };
        let cancelled = matches!(outcome, TaskOutcome::Cancelled);

        let Some(elapsed) = self.correlator.settle(task_id, outcome) else {
            // Already settled (e.g. cancelled by shutdown while running)
            debug!(task_id = %task_id, "late report ignored");
            return;
        };

        let task_id = task_id.clone();
        match (reason, cancelled, worker_id) {
            (Some(reason), _, worker_id) => {
                self.counters.failed += 1;
                warn!(task_id = %task_id, "task failed: {}", reason);
                self.emit(PoolEvent::Failed {
                    task_id,
                    worker_id,
                    reason,
                });
            }
            (None, true, _) => {
                self.counters.cancelled += 1;
                self.emit(PoolEvent::Cancelled { task_id });
            }
            (None, false, Some(worker_id)) => {
                self.counters.completed += 1;
                let elapsed_ms = elapsed.as_millis() as u64;
                debug!(task_id = %task_id, worker_id = %worker_id, elapsed_ms, "task completed");
                self.emit(PoolEvent::Completed {
                    task_id,
                    worker_id,
                    elapsed_ms,
                });
            }
            (None, false, None) => {
                self.counters.completed += 1;
            }
        }
    }

    fn emit(&self, event: PoolEvent) {
        if let Some(tx) = &self.events {
            // Receiver gone: nobody is listening anymore
            let _ = tx.send(event);
        }
    }
}

/// Dispatcher shared between the pool handle and its worker threads
#[derive(Debug)]
pub(crate) struct SharedDispatcher(Mutex<Dispatcher>);

impl SharedDispatcher {
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self(Mutex::new(dispatcher))
    }

    /// Critical sections never panic halfway, so a poisoned lock still
    /// holds consistent state
    pub fn lock(&self) -> MutexGuard<'_, Dispatcher> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
