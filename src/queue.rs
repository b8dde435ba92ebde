use crate::{PoolError, Task};
use std::collections::VecDeque;
use std::num::NonZeroUsize;

/// FIFO of tasks waiting for a worker
#[derive(Debug, Default)]
pub(crate) struct TaskQueue {
    tasks: VecDeque<Task>,
    capacity: Option<NonZeroUsize>,
}

impl TaskQueue {
    pub fn new(capacity: Option<NonZeroUsize>) -> Self {
        Self {
            tasks: VecDeque::new(),
            capacity,
        }
    }

    /// Append to the back; fails instead of blocking when the bound is hit
    pub fn enqueue(&mut self, task: Task) -> Result<(), PoolError> {
        if let Some(capacity) = self.capacity {
            if self.tasks.len() >= capacity.get() {
                return Err(PoolError::CapacityExceeded {
                    capacity: capacity.get(),
                });
            }
        }

        self.tasks.push_back(task);
        Ok(())
    }

    pub fn dequeue(&mut self) -> Option<Task> {
        self.tasks.pop_front()
    }

    pub fn drain(&mut self) -> Vec<Task> {
        self.tasks.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn capacity(&self) -> Option<usize> {
        self.capacity.map(NonZeroUsize::get)
    }
}
