//! Bounded worker-thread pool
//!
//! A fixed set of isolated workers, each on its own thread, fed from a FIFO
//! queue. Every submitted task gets a handle that settles exactly once with
//! the worker's value, its failure, or a shutdown cancellation.

mod config;
mod correlator;
mod dispatcher;
mod error;
mod event;
mod executor;
mod pool;
mod queue;
mod task;
mod termination;
mod worker;

pub use config::PoolConfig;
pub use correlator::TaskHandle;
pub use dispatcher::PoolStats;
pub use error::PoolError;
pub use event::{EventSender, PoolEvent};
pub use pool::WorkerPool;
pub use task::{Task, TaskId, TaskOutcome, TaskState};
pub use termination::TerminationReason;
pub use worker::{FnWorker, Worker, WorkerId, WorkerState};
