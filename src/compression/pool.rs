//! Worker Pool
//!
//! Bounded fork-join map over independent jobs. Workers pull the next job
//! index from a shared counter and send `(index, result)` back over a channel,
//! so each output slot is written exactly once and no job sees another's
//! state. A pool of one thread runs the jobs inline, in order.
//!
//! Workers are scoped threads spawned per call, so small workloads should go
//! through [`WorkerPool::sized_for`] and run inline.

use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam::channel;

/// Below this many bytes of work, spawning threads costs more than it saves
pub const PARALLEL_MIN_BYTES: usize = 256 * 1024;

/// Fixed-size fan-out/fan-in executor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerPool {
    threads: usize,
}

impl WorkerPool {
    pub fn new(threads: usize) -> Self {
        Self {
            threads: threads.max(1),
        }
    }

    /// Pool that runs every job on the calling thread
    pub fn sequential() -> Self {
        Self::new(1)
    }

    pub fn threads(&self) -> usize {
        self.threads
    }

    /// This pool for `total_bytes` of work, or an inline pool when the work
    /// is too small to repay a thread spawn.
    pub fn sized_for(&self, total_bytes: usize) -> WorkerPool {
        if total_bytes < PARALLEL_MIN_BYTES {
            Self::sequential()
        } else {
            *self
        }
    }

    /// Apply `job` to every item, returning results in item order.
    ///
    /// The result is identical for every pool size.
    pub fn map<T, R, F>(&self, items: &[T], job: F) -> Vec<R>
    where
        T: Sync,
        R: Send,
        F: Fn(usize, &T) -> R + Sync,
    {
        let workers = self.threads.min(items.len());
        if workers <= 1 {
            return items.iter().enumerate().map(|(i, item)| job(i, item)).collect();
        }

        let next = AtomicUsize::new(0);
        let (tx, rx) = channel::unbounded();
        let scoped = crossbeam::thread::scope(|scope| {
            for _ in 0..workers {
                let tx = tx.clone();
                let next = &next;
                let job = &job;
                scope.spawn(move |_| loop {
                    let i = next.fetch_add(1, Ordering::Relaxed);
                    if i >= items.len() {
                        break;
                    }
                    // The receiver outlives the scope, so send cannot fail.
                    let _ = tx.send((i, job(i, &items[i])));
                });
            }
        });
        if let Err(panic) = scoped {
            std::panic::resume_unwind(panic);
        }
        drop(tx);

        let mut slots: Vec<Option<R>> = (0..items.len()).map(|_| None).collect();
        for (i, result) in rx.try_iter() {
            slots[i] = Some(result);
        }
        let results: Vec<R> = slots.into_iter().flatten().collect();
        debug_assert_eq!(results.len(), items.len());
        results
    }
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::sequential()
    }
}
