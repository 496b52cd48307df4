use std::collections::{HashSet, VecDeque};

use crate::core::WorkerIdentity;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    #[error("worker pool is full ({capacity} idle workers)")]
    CapacityExceeded { capacity: usize },

    #[error("worker pool is empty")]
    Empty,
}

/// Outcome of a successful `enqueue`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueued {
    Queued,
    /// The worker was already waiting; its position is unchanged.
    AlreadyQueued,
}

/// Idle workers in readiness order (least recently used first)
///
/// FIFO over a VecDeque with a membership set so a worker can never occupy
/// two slots.
#[derive(Debug)]
pub struct WorkerQueue {
    order: VecDeque<WorkerIdentity>,
    members: HashSet<WorkerIdentity>,
    capacity: usize,
}

impl WorkerQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            order: VecDeque::with_capacity(capacity.min(1024)),
            members: HashSet::with_capacity(capacity.min(1024)),
            capacity,
        }
    }

    pub fn enqueue(&mut self, worker: WorkerIdentity) -> Result<Enqueued, PoolError> {
        if self.members.contains(&worker) {
            return Ok(Enqueued::AlreadyQueued);
        }
        if self.order.len() >= self.capacity {
            return Err(PoolError::CapacityExceeded {
                capacity: self.capacity,
            });
        }
        self.members.insert(worker.clone());
        self.order.push_back(worker);
        Ok(Enqueued::Queued)
    }

    pub fn dequeue_head(&mut self) -> Result<WorkerIdentity, PoolError> {
        let worker = self.order.pop_front().ok_or(PoolError::Empty)?;
        self.members.remove(&worker);
        Ok(worker)
    }

    /// Drop a worker wherever it sits. Returns whether it was queued.
    pub fn remove(&mut self, worker: &WorkerIdentity) -> bool {
        if !self.members.remove(worker) {
            return false;
        }
        self.order.retain(|w| w != worker);
        true
    }

    pub fn contains(&self, worker: &WorkerIdentity) -> bool {
        self.members.contains(worker)
    }

    pub fn size(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
