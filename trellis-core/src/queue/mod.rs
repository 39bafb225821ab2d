//! Mutation Queue
//!
//! Every write to the document passes through one queue. Callers enqueue a
//! [`Mutation`] and get a [`MutationHandle`], a future that resolves once the
//! write has run (or rejects if it failed, was cancelled, evicted, or
//! cleared).
//!
//! # Ordering
//!
//! Higher [`Priority`] runs first; equal priorities run in submission order.
//! Placement is a linear scan for the first entry with a strictly lower
//! priority, which keeps the insertion stable.
//!
//! # Scheduling
//!
//! When a tokio runtime is available, the first enqueue spawns a drain loop.
//! The loop waits for the next frame ([`FrameSource`]), runs one batch, and
//! repeats until the queue is empty; at most one loop is active at a time.
//! Without a runtime, [`MutationQueue::flush`] drains synchronously. If the
//! runtime goes away while a loop is parked, the next enqueue on a live
//! runtime starts a new one.
//!
//! [`MutationQueue::settle`] queues an idle-priority barrier behind all
//! pending work. Barriers do not count toward the capacity and are never
//! evicted or cleared.
//!
//! # Isolation
//!
//! Each operation runs on its own: an error or panic rejects only that
//! operation's handle and is logged. The batch and the loop carry on.

mod batch;
mod mutation;

pub use batch::BatchController;
pub use mutation::{Mutation, MutationHandle, MutationId, Operation, Priority};

pub use crate::config::FrameSource;

use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::config::QueueConfig;
use crate::dom::Document;
use crate::error::QueueError;
use crate::{dev_debug, dev_error, dev_warn};
use mutation::Pending;

/// Counters describing what the queue has done so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub executed: u64,
    pub failed: u64,
    pub evicted: u64,
    pub cancelled: u64,
    pub batches: u64,
}

struct QueueState {
    pending: VecDeque<Pending>,
    next_id: u64,
    batch: BatchController,
    draining: bool,
    stats: QueueStats,
}

/// Priority-ordered, adaptively batched mutation scheduler.
///
/// Cloning yields another handle to the same queue.
#[derive(Clone)]
pub struct MutationQueue {
    state: Arc<Mutex<QueueState>>,
    document: Arc<Mutex<Document>>,
    capacity: usize,
    frame: FrameSource,
}

impl std::fmt::Debug for MutationQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("MutationQueue")
            .field("pending", &state.pending.len())
            .field("batch_size", &state.batch.size())
            .field("draining", &state.draining)
            .field("capacity", &self.capacity)
            .finish()
    }
}

impl MutationQueue {
    pub fn new(document: Arc<Mutex<Document>>, config: &QueueConfig) -> Self {
        Self {
            state: Arc::new(Mutex::new(QueueState {
                pending: VecDeque::new(),
                next_id: 1,
                batch: BatchController::new(config),
                draining: false,
                stats: QueueStats::default(),
            })),
            document,
            capacity: config.capacity.max(1),
            frame: config.frame,
        }
    }

    pub fn document(&self) -> &Arc<Mutex<Document>> {
        &self.document
    }

    /// Queue `mutation` and schedule a drain if none is running.
    pub fn enqueue(&self, mutation: Mutation) -> MutationHandle {
        self.push(mutation, false)
    }

    fn enqueue_barrier(&self) -> MutationHandle {
        let barrier = Mutation::new(|_| Ok(()))
            .with_priority(Priority::IDLE)
            .with_label("settle");
        self.push(barrier, true)
    }

    fn push(&self, mutation: Mutation, barrier: bool) -> MutationHandle {
        let (done, receiver) = oneshot::channel();

        let (id, evicted, spawn) = {
            let mut state = self.state.lock();
            let id = MutationId::new(state.next_id);
            state.next_id += 1;

            let writes = state.pending.iter().filter(|p| !p.barrier).count();
            let evicted = if !barrier && writes >= self.capacity {
                state.stats.evicted += 1;
                oldest_index(&state.pending).and_then(|index| state.pending.remove(index))
            } else {
                None
            };

            let priority = mutation.priority;
            let position = state
                .pending
                .iter()
                .position(|p| p.mutation.priority < priority)
                .unwrap_or(state.pending.len());
            state.pending.insert(position, Pending { id, mutation, done, barrier });

            let spawn = !state.draining && tokio::runtime::Handle::try_current().is_ok();
            if spawn {
                state.draining = true;
            }
            (id, evicted, spawn)
        };

        if let Some(old) = evicted {
            dev_warn!(
                id = %old.id,
                label = old.mutation.label,
                capacity = self.capacity,
                "mutation queue full; dropping oldest pending mutation"
            );
            let old_id = old.id;
            old.reject(QueueError::Overflow(old_id));
        }
        if spawn {
            self.spawn_drain();
        }
        MutationHandle::new(id, receiver)
    }

    /// Remove a pending mutation. Returns `false` if it already ran or is
    /// unknown.
    pub fn cancel(&self, id: MutationId) -> bool {
        let removed = {
            let mut state = self.state.lock();
            let index = state.pending.iter().position(|p| p.id == id);
            let removed = index.and_then(|i| state.pending.remove(i));
            if removed.is_some() {
                state.stats.cancelled += 1;
            }
            removed
        };
        match removed {
            Some(pending) => {
                pending.reject(QueueError::Cancelled(id));
                true
            }
            None => false,
        }
    }

    /// Reject every pending mutation with [`QueueError::Cleared`].
    /// Pending `settle` calls still resolve.
    pub fn clear(&self) -> usize {
        let drained: VecDeque<Pending> = {
            let mut state = self.state.lock();
            let (barriers, writes): (VecDeque<Pending>, VecDeque<Pending>) =
                state.pending.drain(..).partition(|p| p.barrier);
            state.pending = barriers;
            state.stats.cancelled += writes.len() as u64;
            writes
        };
        let count = drained.len();
        for pending in drained {
            pending.reject(QueueError::Cleared);
        }
        count
    }

    pub fn len(&self) -> usize {
        self.state.lock().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().pending.is_empty()
    }

    pub fn batch_size(&self) -> usize {
        self.state.lock().batch.size()
    }

    pub fn stats(&self) -> QueueStats {
        self.state.lock().stats
    }

    /// Run one batch now. Returns the number of mutations executed.
    ///
    /// Must not be called while holding the document lock.
    pub fn drain_batch(&self) -> usize {
        let batch: Vec<Pending> = {
            let mut state = self.state.lock();
            let size = state.batch.size().min(state.pending.len());
            state.pending.drain(..size).collect()
        };
        if batch.is_empty() {
            return 0;
        }

        let count = batch.len();
        let started = Instant::now();
        let mut failed = 0;
        {
            let mut document = self.document.lock();
            for pending in batch {
                if !run(pending, &mut document) {
                    failed += 1;
                }
            }
        }
        let elapsed = started.elapsed();

        let mut state = self.state.lock();
        state.batch.record(elapsed);
        state.stats.batches += 1;
        state.stats.executed += count as u64;
        state.stats.failed += failed;
        dev_debug!(
            count,
            elapsed_us = elapsed.as_micros() as u64,
            next_batch = state.batch.size(),
            "mutation batch drained"
        );
        count
    }

    /// Drain everything synchronously, batch by batch.
    pub fn flush(&self) -> usize {
        let mut total = 0;
        loop {
            let ran = self.drain_batch();
            if ran == 0 {
                return total;
            }
            total += ran;
        }
    }

    /// Resolve once everything enqueued before this call has run.
    pub async fn settle(&self) -> Result<(), QueueError> {
        let handle = self.enqueue_barrier();
        if tokio::runtime::Handle::try_current().is_err() {
            self.flush();
        }
        handle.await
    }

    fn spawn_drain(&self) {
        let queue = self.clone();
        let active = DrainActive {
            state: Arc::clone(&self.state),
            armed: true,
        };
        tokio::spawn(async move { queue.drain_loop(active).await });
    }

    async fn drain_loop(self, mut active: DrainActive) {
        loop {
            self.wait_frame().await;
            self.drain_batch();

            let mut state = self.state.lock();
            if state.pending.is_empty() {
                state.draining = false;
                active.armed = false;
                return;
            }
        }
    }

    async fn wait_frame(&self) {
        match self.frame {
            FrameSource::Animation { interval_ms } => {
                tokio::time::sleep(Duration::from_millis(interval_ms)).await
            }
            FrameSource::Immediate => tokio::task::yield_now().await,
        }
    }
}

/// Marks the drain loop as running. Dropping it while armed (the task was
/// dropped with its runtime) lets the next enqueue spawn a fresh loop.
struct DrainActive {
    state: Arc<Mutex<QueueState>>,
    armed: bool,
}

impl Drop for DrainActive {
    fn drop(&mut self) {
        if self.armed {
            self.state.lock().draining = false;
        }
    }
}

/// Oldest pending write; barriers are never chosen.
fn oldest_index(pending: &VecDeque<Pending>) -> Option<usize> {
    pending
        .iter()
        .enumerate()
        .filter(|(_, p)| !p.barrier)
        .min_by_key(|(_, p)| p.id)
        .map(|(index, _)| index)
}

/// Execute one mutation and resolve its handle. Returns `false` on failure.
fn run(pending: Pending, document: &mut Document) -> bool {
    let Pending { id, mutation, done, .. } = pending;
    let Mutation {
        label,
        operation,
        guards,
        ..
    } = mutation;

    let outcome = catch_unwind(AssertUnwindSafe(move || operation(document)));
    let result = match outcome {
        Ok(Ok(())) => Ok(()),
        Ok(Err(err)) => {
            dev_error!(id = %id, label, "mutation failed: {}", err);
            Err(QueueError::Failed(err))
        }
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            dev_error!(id = %id, label, "mutation panicked: {}", message);
            Err(QueueError::Panicked(message))
        }
    };
    let ok = result.is_ok();
    drop(guards);
    let _ = done.send(result);
    ok
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue(capacity: usize) -> MutationQueue {
        let config = QueueConfig {
            capacity,
            frame: FrameSource::Immediate,
            ..QueueConfig::default()
        };
        MutationQueue::new(Arc::new(Mutex::new(Document::new())), &config)
    }

    fn recorder(log: &Arc<Mutex<Vec<&'static str>>>, name: &'static str, priority: i32) -> Mutation {
        let log = Arc::clone(log);
        Mutation::new(move |_| {
            log.lock().push(name);
            Ok(())
        })
        .with_priority(Priority(priority))
    }

    #[test]
    fn higher_priority_first_then_fifo() {
        let queue = queue(10);
        let log = Arc::new(Mutex::new(Vec::new()));
        queue.enqueue(recorder(&log, "a", 1));
        queue.enqueue(recorder(&log, "b", 10));
        queue.enqueue(recorder(&log, "c", 1));

        assert_eq!(queue.flush(), 3);
        assert_eq!(*log.lock(), vec!["b", "a", "c"]);
    }

    #[test]
    fn overflow_evicts_oldest() {
        let queue = queue(2);
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut first = queue.enqueue(recorder(&log, "first", 0));
        let mut second = queue.enqueue(recorder(&log, "second", 0));
        let mut third = queue.enqueue(recorder(&log, "third", 5));

        assert_eq!(first.try_result(), Some(Err(QueueError::Overflow(first.id()))));
        assert_eq!(queue.len(), 2);

        queue.flush();
        assert_eq!(*log.lock(), vec!["third", "second"]);
        assert_eq!(second.try_result(), Some(Ok(())));
        assert_eq!(third.try_result(), Some(Ok(())));
        assert_eq!(queue.stats().evicted, 1);
    }

    #[test]
    fn cancel_and_clear_reject_handles() {
        let queue = queue(10);
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut a = queue.enqueue(recorder(&log, "a", 0));
        let mut b = queue.enqueue(recorder(&log, "b", 0));
        let mut c = queue.enqueue(recorder(&log, "c", 0));

        assert!(queue.cancel(a.id()));
        assert!(!queue.cancel(a.id()));
        assert_eq!(a.try_result(), Some(Err(QueueError::Cancelled(a.id()))));

        assert_eq!(queue.clear(), 2);
        assert_eq!(b.try_result(), Some(Err(QueueError::Cleared)));
        assert_eq!(c.try_result(), Some(Err(QueueError::Cleared)));
        assert_eq!(queue.flush(), 0);
        assert!(log.lock().is_empty());
    }

    #[test]
    fn failures_and_panics_are_isolated() {
        let queue = queue(10);
        let log = Arc::new(Mutex::new(Vec::new()));
        let missing = Document::new().root();

        let mut failing = queue.enqueue(Mutation::new(move |doc| doc.set_attribute(missing, "x", "1")));
        let mut panicking = queue.enqueue(Mutation::new(|_| panic!("boom")));
        let mut fine = queue.enqueue(recorder(&log, "fine", 0));

        queue.flush();
        assert!(matches!(failing.try_result(), Some(Err(QueueError::Failed(_)))));
        assert_eq!(panicking.try_result(), Some(Err(QueueError::Panicked("boom".into()))));
        assert_eq!(fine.try_result(), Some(Ok(())));
        assert_eq!(queue.stats().failed, 2);
    }

    #[test]
    fn guards_release_after_execution() {
        use crate::suppress::{Suppression, WriteKind};

        let queue = queue(10);
        let suppression = Suppression::new();
        queue.enqueue(Mutation::new(|_| Ok(())).with_guard(suppression.acquire(WriteKind::Content)));
        assert!(suppression.is_active(WriteKind::Content));
        queue.flush();
        assert!(!suppression.is_active(WriteKind::Content));
    }

    #[test]
    fn barriers_take_no_capacity() {
        let queue = queue(2);
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut barrier = queue.enqueue_barrier();
        let mut a = queue.enqueue(recorder(&log, "a", 0));
        let _b = queue.enqueue(recorder(&log, "b", 0));
        assert_eq!(a.try_result(), None);

        // The oldest write goes, not the older barrier.
        let _c = queue.enqueue(recorder(&log, "c", 0));
        assert_eq!(a.try_result(), Some(Err(QueueError::Overflow(a.id()))));

        assert_eq!(queue.clear(), 2);
        assert_eq!(queue.flush(), 1);
        assert_eq!(barrier.try_result(), Some(Ok(())));
        assert!(log.lock().is_empty());
    }

    #[tokio::test]
    async fn settle_on_a_full_queue_keeps_every_write() {
        let queue = queue(2);
        let log = Arc::new(Mutex::new(Vec::new()));
        let a = queue.enqueue(recorder(&log, "a", 0));
        let b = queue.enqueue(recorder(&log, "b", 0));

        queue.settle().await.unwrap();
        assert_eq!(a.await, Ok(()));
        assert_eq!(b.await, Ok(()));
        assert_eq!(*log.lock(), vec!["a", "b"]);
        assert_eq!(queue.stats().evicted, 0);
    }

    #[test]
    fn runtime_shutdown_releases_the_drain_loop() {
        let config = QueueConfig {
            frame: FrameSource::Animation { interval_ms: 1 },
            ..QueueConfig::default()
        };
        let queue = MutationQueue::new(Arc::new(Mutex::new(Document::new())), &config);
        let log = Arc::new(Mutex::new(Vec::new()));

        let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        let mut first = runtime.block_on(async { queue.enqueue(recorder(&log, "a", 0)) });
        drop(runtime);
        assert_eq!(first.try_result(), None);
        assert!(!queue.state.lock().draining);

        let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        let settled = runtime.block_on(async {
            tokio::time::timeout(Duration::from_secs(5), queue.settle()).await
        });
        assert_eq!(settled, Ok(Ok(())));
        assert_eq!(first.try_result(), Some(Ok(())));
        assert_eq!(*log.lock(), vec!["a"]);
    }

    #[tokio::test]
    async fn drain_loop_runs_on_runtime() {
        let queue = queue(10);
        let log = Arc::new(Mutex::new(Vec::new()));
        let a = queue.enqueue(recorder(&log, "a", 0));
        let b = queue.enqueue(recorder(&log, "b", 0));

        a.await.unwrap();
        b.await.unwrap();
        queue.settle().await.unwrap();
        assert_eq!(*log.lock(), vec!["a", "b"]);
        assert!(queue.is_empty());
    }
}
