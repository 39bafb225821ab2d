//! Mutation Suppression
//!
//! The engine writes to the same tree it observes. Without care, every write
//! would come back through the observation path and trigger another
//! evaluation. Each fragment therefore owns a [`Suppression`] with one
//! counter per write kind.
//!
//! # Protocol
//!
//! 1. Before a write is enqueued, [`Suppression::acquire`] bumps the counter
//!    and returns a [`SuppressionGuard`].
//! 2. The guard is moved into the queued operation.
//! 3. While the counter is non-zero, the document's record filter drops
//!    records of that kind for that node.
//! 4. The guard is released when the operation is dropped: after it ran,
//!    failed, panicked, was cancelled or was evicted by overflow.
//!
//! Counters rather than flags make overlapping writes to one fragment safe:
//! the first write to finish does not re-enable observation for the second.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;

use crate::dom::{MutationKind, MutationRecord, NodeHandle, RecordFilter};

/// Which observation channel a write touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WriteKind {
    Attribute,
    Content,
    ChildList,
}

impl WriteKind {
    pub fn of(record: &MutationRecord) -> Self {
        match record.kind {
            MutationKind::Attribute { .. } => WriteKind::Attribute,
            MutationKind::Content => WriteKind::Content,
            MutationKind::ChildList { .. } => WriteKind::ChildList,
        }
    }
}

/// Per-fragment suppression counters.
#[derive(Debug, Default)]
pub struct Suppression {
    attribute: AtomicUsize,
    content: AtomicUsize,
    child_list: AtomicUsize,
}

impl Suppression {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn counter(&self, kind: WriteKind) -> &AtomicUsize {
        match kind {
            WriteKind::Attribute => &self.attribute,
            WriteKind::Content => &self.content,
            WriteKind::ChildList => &self.child_list,
        }
    }

    /// Suppress observation of `kind` until the guard drops.
    pub fn acquire(self: &Arc<Self>, kind: WriteKind) -> SuppressionGuard {
        self.counter(kind).fetch_add(1, Ordering::AcqRel);
        SuppressionGuard {
            suppression: Arc::clone(self),
            kind,
        }
    }

    pub fn is_active(&self, kind: WriteKind) -> bool {
        self.counter(kind).load(Ordering::Acquire) > 0
    }

    /// Number of outstanding guards for `kind`.
    pub fn depth(&self, kind: WriteKind) -> usize {
        self.counter(kind).load(Ordering::Acquire)
    }
}

/// Releases one level of suppression when dropped.
#[derive(Debug)]
pub struct SuppressionGuard {
    suppression: Arc<Suppression>,
    kind: WriteKind,
}

impl SuppressionGuard {
    pub fn kind(&self) -> WriteKind {
        self.kind
    }
}

impl Drop for SuppressionGuard {
    fn drop(&mut self) {
        let previous = self.suppression.counter(self.kind).fetch_sub(1, Ordering::AcqRel);
        debug_assert!(previous > 0, "suppression counter underflow for {:?}", self.kind);
    }
}

/// Node → suppression side table consulted by the record filter.
#[derive(Debug, Default)]
pub struct SuppressionRegistry {
    entries: DashMap<NodeHandle, Arc<Suppression>>,
}

impl SuppressionRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn register(&self, node: NodeHandle, suppression: Arc<Suppression>) {
        self.entries.insert(node, suppression);
    }

    pub fn unregister(&self, node: NodeHandle) {
        self.entries.remove(&node);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether `record` was caused by a suppressed write.
    pub fn is_suppressed(&self, record: &MutationRecord) -> bool {
        self.entries
            .get(&record.target)
            .map_or(false, |entry| entry.is_active(WriteKind::of(record)))
    }

    /// A document record filter that drops suppressed records.
    pub fn filter(self: &Arc<Self>) -> RecordFilter {
        let registry = Arc::clone(self);
        Arc::new(move |record: &MutationRecord| !registry.is_suppressed(record))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::Document;

    #[test]
    fn guard_releases_on_drop() {
        let suppression = Suppression::new();
        assert!(!suppression.is_active(WriteKind::Content));
        {
            let _first = suppression.acquire(WriteKind::Content);
            let second = suppression.acquire(WriteKind::Content);
            assert_eq!(suppression.depth(WriteKind::Content), 2);
            drop(second);
            assert!(suppression.is_active(WriteKind::Content));
            assert!(!suppression.is_active(WriteKind::Attribute));
        }
        assert!(!suppression.is_active(WriteKind::Content));
    }

    #[test]
    fn guard_released_when_owning_closure_is_dropped() {
        let suppression = Suppression::new();
        let guard = suppression.acquire(WriteKind::Attribute);
        let op: Box<dyn FnOnce() + Send> = Box::new(move || drop(guard));
        assert!(suppression.is_active(WriteKind::Attribute));
        drop(op);
        assert!(!suppression.is_active(WriteKind::Attribute));
    }

    #[test]
    fn filter_hides_only_matching_kind() {
        let mut doc = Document::new();
        let div = doc.create_element("div");
        let registry = SuppressionRegistry::new();
        let suppression = Suppression::new();
        registry.register(div, Arc::clone(&suppression));
        doc.set_record_filter(registry.filter());

        let guard = suppression.acquire(WriteKind::Attribute);
        doc.set_attribute(div, "class", "a").unwrap();
        let text = doc.create_text("x");
        doc.append_child(div, text).unwrap();
        drop(guard);
        doc.set_attribute(div, "class", "b").unwrap();

        let records = doc.take_records();
        assert_eq!(records.len(), 2);
        assert_eq!(WriteKind::of(&records[0]), WriteKind::ChildList);
        assert_eq!(records[1], MutationRecord::attribute(div, "class"));
    }
}
