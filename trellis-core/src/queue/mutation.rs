//! Mutations and their completion handles.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use smallvec::SmallVec;
use tokio::sync::oneshot;

use crate::dom::Document;
use crate::error::{DomError, QueueError};
use crate::suppress::SuppressionGuard;

/// Identifier assigned to a mutation at enqueue time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MutationId(u64);

impl MutationId {
    pub(crate) fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for MutationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "m{}", self.0)
    }
}

/// Scheduling priority. Higher runs first; equal priorities run FIFO.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Priority(pub i32);

impl Priority {
    /// Runs after everything else; used by settle barriers.
    pub const IDLE: Priority = Priority(i32::MIN);
    pub const LOW: Priority = Priority(-10);
    pub const NORMAL: Priority = Priority(0);
    pub const HIGH: Priority = Priority(10);
}

/// A write against the document.
pub type Operation = Box<dyn FnOnce(&mut Document) -> Result<(), DomError> + Send>;

/// A deferred write plus the suppression it holds while pending.
pub struct Mutation {
    pub(crate) priority: Priority,
    pub(crate) label: &'static str,
    pub(crate) operation: Operation,
    pub(crate) guards: SmallVec<[SuppressionGuard; 1]>,
}

impl Mutation {
    pub fn new<F>(operation: F) -> Self
    where
        F: FnOnce(&mut Document) -> Result<(), DomError> + Send + 'static,
    {
        Self {
            priority: Priority::NORMAL,
            label: "mutation",
            operation: Box::new(operation),
            guards: SmallVec::new(),
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Short name used in diagnostics.
    pub fn with_label(mut self, label: &'static str) -> Self {
        self.label = label;
        self
    }

    /// Hold `guard` until this mutation is dropped.
    pub fn with_guard(mut self, guard: SuppressionGuard) -> Self {
        self.guards.push(guard);
        self
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }
}

impl fmt::Debug for Mutation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mutation")
            .field("priority", &self.priority)
            .field("label", &self.label)
            .field("guards", &self.guards.len())
            .finish()
    }
}

/// A queued mutation with its completion channel.
pub(crate) struct Pending {
    pub(crate) id: MutationId,
    pub(crate) mutation: Mutation,
    pub(crate) done: oneshot::Sender<Result<(), QueueError>>,
    /// Internal `settle` marker: never counted, evicted or cleared.
    pub(crate) barrier: bool,
}

impl Pending {
    /// Resolve without running. Guards release here.
    pub(crate) fn reject(self, error: QueueError) {
        let _ = self.done.send(Err(error));
    }
}

/// Resolves once the mutation has run, failed or been discarded.
#[derive(Debug)]
pub struct MutationHandle {
    id: MutationId,
    done: oneshot::Receiver<Result<(), QueueError>>,
}

impl MutationHandle {
    pub(crate) fn new(id: MutationId, done: oneshot::Receiver<Result<(), QueueError>>) -> Self {
        Self { id, done }
    }

    pub fn id(&self) -> MutationId {
        self.id
    }

    /// Outcome if already settled, without waiting.
    pub fn try_result(&mut self) -> Option<Result<(), QueueError>> {
        match self.done.try_recv() {
            Ok(result) => Some(result),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(Err(QueueError::Dropped)),
        }
    }
}

impl Future for MutationHandle {
    type Output = Result<(), QueueError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.done).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_)) => Poll::Ready(Err(QueueError::Dropped)),
            Poll::Pending => Poll::Pending,
        }
    }
}
