//! Host Render Tree
//!
//! The engine mirrors a live tree it does not own. This module provides
//! that tree: an arena [`Document`] of element, text and comment nodes
//! addressed by stable [`NodeHandle`]s.
//!
//! # Observation
//!
//! Every public write appends a [`MutationRecord`], the way a browser's
//! mutation observer would see it. An optional record filter can drop
//! records before they are stored; the engine installs one that hides its
//! own writes from its own observation path.
//!
//! ```text
//! set_attribute(h, "class", "x")  ->  MutationRecord { target: h, kind: Attribute { name: "class" } }
//! insert_before(p, c, None)       ->  MutationRecord { target: p, kind: ChildList { added: [c], .. } }
//! ```

mod document;
mod parse;

pub use document::{Document, RecordFilter};

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::IndexMap;

/// Stable identity of a node in a [`Document`].
///
/// Handles are unique across every document in the process, so side tables
/// keyed by handle never collide between documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeHandle(u64);

impl NodeHandle {
    pub(crate) fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw handle value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for NodeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Payload of a host node.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeData {
    Element {
        tag: String,
        attributes: IndexMap<String, String>,
    },
    Text {
        content: String,
        /// Serialized without escaping.
        raw: bool,
    },
    Comment(String),
}

impl NodeData {
    pub fn kind_name(&self) -> &'static str {
        match self {
            NodeData::Element { .. } => "element",
            NodeData::Text { .. } => "text",
            NodeData::Comment(_) => "comment",
        }
    }
}

/// What changed in a [`MutationRecord`].
#[derive(Debug, Clone, PartialEq)]
pub enum MutationKind {
    Attribute { name: String },
    Content,
    ChildList {
        added: Vec<NodeHandle>,
        removed: Vec<NodeHandle>,
    },
}

/// One observed change to the tree.
#[derive(Debug, Clone, PartialEq)]
pub struct MutationRecord {
    /// Changed node; for child-list changes, the parent.
    pub target: NodeHandle,
    pub kind: MutationKind,
}

impl MutationRecord {
    pub fn attribute(target: NodeHandle, name: impl Into<String>) -> Self {
        Self {
            target,
            kind: MutationKind::Attribute { name: name.into() },
        }
    }

    pub fn content(target: NodeHandle) -> Self {
        Self {
            target,
            kind: MutationKind::Content,
        }
    }

    pub fn child_list(target: NodeHandle, added: Vec<NodeHandle>, removed: Vec<NodeHandle>) -> Self {
        Self {
            target,
            kind: MutationKind::ChildList { added, removed },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handles_are_unique() {
        let a = NodeHandle::next();
        let b = NodeHandle::next();
        assert_ne!(a, b);
        assert!(b.raw() > a.raw());
        assert_eq!(format!("{}", a), format!("#{}", a.raw()));
    }
}
