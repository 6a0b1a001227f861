//! Fixed-size worker pool draining a shared FIFO queue.

use crate::error::{ServerError, ServerResult};
use crossbeam::channel::{self, Receiver, Sender, TrySendError};
use log::{debug, error, warn};
use std::panic::{self, AssertUnwindSafe};
use std::thread::{self, JoinHandle};

/// A unit of work
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// A pool of worker threads consuming a shared task queue
pub struct WorkerPool {
    sender: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `threads` workers over an unbounded queue
    pub fn new(threads: usize) -> ServerResult<Self> {
        Self::build(threads, None)
    }

    /// Spawn `threads` workers over a queue holding at most `capacity` jobs
    pub fn bounded(threads: usize, capacity: usize) -> ServerResult<Self> {
        Self::build(threads, Some(capacity))
    }

    fn build(threads: usize, capacity: Option<usize>) -> ServerResult<Self> {
        if threads == 0 {
            return Err(ServerError::Config(
                "worker pool needs at least one thread".to_string(),
            ));
        }

        let (sender, receiver) = match capacity {
            Some(capacity) => channel::bounded(capacity),
            None => channel::unbounded(),
        };

        let mut workers = Vec::with_capacity(threads);
        for id in 0..threads {
            let receiver: Receiver<Job> = receiver.clone();
            let handle = thread::Builder::new()
                .name(format!("worker-{}", id))
                .spawn(move || worker_loop(id, receiver))?;
            workers.push(handle);
        }

        Ok(Self {
            sender: Some(sender),
            workers,
        })
    }

    /// Number of worker threads
    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Number of queued jobs not yet picked up
    pub fn queued(&self) -> usize {
        self.sender.as_ref().map_or(0, |s| s.len())
    }

    /// Queue a job without blocking.
    ///
    /// A full bounded queue rejects the job.
    pub fn execute<F>(&self, job: F) -> ServerResult<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let sender = self
            .sender
            .as_ref()
            .ok_or_else(|| ServerError::Reactor("worker pool is shut down".to_string()))?;

        match sender.try_send(Box::new(job)) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                warn!("task queue full, dropping task");
                Err(ServerError::Reactor("task queue full".to_string()))
            }
            Err(TrySendError::Disconnected(_)) => {
                Err(ServerError::Reactor("worker pool is shut down".to_string()))
            }
        }
    }
}

fn worker_loop(id: usize, receiver: Receiver<Job>) {
    for job in receiver.iter() {
        if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
            error!("worker {} recovered from a panicking task", id);
        }
    }
    debug!("worker {} exiting", id);
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Closing the queue lets workers finish what is queued and exit.
        self.sender.take();
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}
