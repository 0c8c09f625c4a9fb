//! FIFO hand-off between listener tasks and the execution driver.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

use super::job::{Job, JobId};

/// Why a job was refused at admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejected {
    /// The queue already holds `depth` jobs.
    Full { depth: usize },
    /// The bridge is shutting down.
    Closed,
}

struct Inner {
    jobs: VecDeque<Job>,
    next_id: JobId,
    closed: bool,
}

/// Ordered, bounded queue of pending jobs behind a single lock.
///
/// Ids are assigned under the same lock that appends, so id order is
/// enqueue order.
pub struct JobQueue {
    inner: Mutex<Inner>,
    max_depth: usize,
}

impl JobQueue {
    pub fn new(max_depth: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                jobs: VecDeque::new(),
                next_id: 1,
                closed: false,
            }),
            max_depth,
        }
    }

    // Nothing panics while the lock is held, so a poisoned lock still holds
    // a consistent queue.
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Append a job at the tail and return its id.
    pub fn enqueue(&self, mut job: Job) -> Result<JobId, Rejected> {
        let mut inner = self.lock();
        if inner.closed {
            return Err(Rejected::Closed);
        }
        if inner.jobs.len() >= self.max_depth {
            return Err(Rejected::Full {
                depth: self.max_depth,
            });
        }
        let id = inner.next_id;
        inner.next_id += 1;
        job.assign_id(id);
        inner.jobs.push_back(job);
        Ok(id)
    }

    /// Remove up to `n` jobs from the head, preserving order.
    pub fn dequeue_up_to(&self, n: usize) -> Vec<Job> {
        let mut inner = self.lock();
        let take = n.min(inner.jobs.len());
        inner.jobs.drain(..take).collect()
    }

    /// Refuse further jobs and hand back everything still queued.
    pub fn close(&self) -> Vec<Job> {
        let mut inner = self.lock();
        inner.closed = true;
        inner.jobs.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.lock().jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }
}
