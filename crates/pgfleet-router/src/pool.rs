//! Per-upstream bounded connection admission. Generalizes
//! this codebase's `BoundedQueue<T>` convention: a lock-free bounded queue
//! signals backpressure instead of blocking a producer thread. Here the
//! "producers" are async tasks, so a full queue parks the caller in a FIFO
//! wait list (a queue of wake channels) rather than retrying; the pool
//! admission bookkeeping itself is O(1) and holds no lock across an await
//! point.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_queue::ArrayQueue;
use tokio::sync::oneshot;

use pgfleet_metrics::Metrics;

use crate::error::RouterError;

/// An admitted slot against one upstream's `max_per_upstream` bound. Drop
/// releases the slot and wakes the next FIFO waiter, if any.
pub struct PoolPermit<'a> {
    pool: &'a UpstreamPool,
}

impl Drop for PoolPermit<'_> {
    fn drop(&mut self) {
        self.pool.release();
    }
}

/// Bounded admission for one upstream's live connection count, with a FIFO
/// wait queue used when the upstream is already at `max_connections`.
pub struct UpstreamPool {
    max_connections: usize,
    live: AtomicUsize,
    waiters: ArrayQueue<oneshot::Sender<bool>>,
    metrics: Arc<Metrics>,
}

impl UpstreamPool {
    pub fn new(max_connections: usize, max_client_connections: usize, metrics: Arc<Metrics>) -> Self {
        Self {
            max_connections,
            live: AtomicUsize::new(0),
            waiters: ArrayQueue::new(max_client_connections.max(1)),
            metrics,
        }
    }

    pub fn live_connections(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }

    pub fn max_connections(&self) -> usize {
        self.max_connections
    }

    pub fn has_capacity(&self) -> bool {
        self.live_connections() < self.max_connections
    }

    fn try_admit(&self) -> bool {
        self.live
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |live| {
                (live < self.max_connections).then_some(live + 1)
            })
            .is_ok()
    }

    fn release(&self) {
        // Hand off directly to a waiter rather than decrementing then
        // letting it race to re-admit: that would let two waiters observe
        // a single freed slot as available.
        while let Some(waiter) = self.waiters.pop() {
            if waiter.send(true).is_ok() {
                return;
            }
            // Waiter already gave up (timed out); try the next one with
            // the slot still held for hand-off.
        }
        self.live.fetch_sub(1, Ordering::AcqRel);
    }

    /// Acquires a permit, waiting in FIFO order up to `enqueue_timeout` if
    /// the upstream is already saturated. Enqueued-but-abandoned waiters
    /// (the `try_push` below found the queue full) fail immediately with
    /// `PoolFull`, matching the "reject after `T_enqueue`" rule for
    /// the already-saturated case without an unbounded wait list.
    pub async fn acquire(&self, node: &str, enqueue_timeout: Duration) -> Result<PoolPermit<'_>, RouterError> {
        if self.try_admit() {
            return Ok(PoolPermit { pool: self });
        }

        self.metrics.pool_enqueue_total.inc();
        let (tx, rx) = oneshot::channel();
        if self.waiters.push(tx).is_err() {
            self.metrics.pool_full_total.inc();
            return Err(RouterError::PoolFull { node: node.to_string() });
        }

        match tokio::time::timeout(enqueue_timeout, rx).await {
            Ok(Ok(true)) => Ok(PoolPermit { pool: self }),
            _ => {
                self.metrics.pool_full_total.inc();
                Err(RouterError::PoolFull { node: node.to_string() })
            }
        }
    }
}
