//! Fragment Tree
//!
//! A fragment is the engine's in-memory shadow of one document node. It
//! carries what the document cannot: the segmented source of every text
//! and attribute, the last rendered values, declared binding data, the
//! visibility state machine and the templates of a repetition.
//!
//! # Arena
//!
//! Fragments live in a `HashMap` keyed by [`FragmentId`], with a side table
//! from [`NodeHandle`] to fragment. Links are ids in both directions:
//! ownership flows through `children`, `parent` is a plain back-reference.
//!
//! ```text
//!   by_node: NodeHandle ──▶ FragmentId
//!   fragments: FragmentId ──▶ Fragment { target, parent, kind, .. }
//!                                          │
//!                                          ▼
//!                               Element { children: [FragmentId], templates, .. }
//! ```
//!
//! Fragments are built lazily by [`FragmentTree::get`] the first time their
//! node is visited and destroyed recursively when their node leaves the
//! tree. Templates captured by a repetition are parked: no parent, not in
//! any children list, never evaluated.
//!
//! # Writes
//!
//! Fragment state is updated synchronously. Document writes are wrapped in
//! a [`Mutation`] holding a suppression guard of the written fragment and
//! sent through the [`MutationQueue`].
//!
//! A text node or attribute remembers the value it last queued as a
//! [`Rendered`]. If that write is evicted, cancelled or fails, the value is
//! no longer trusted and the next evaluation writes it again.

mod data;
mod evaluate;
mod visibility;

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use indexmap::IndexMap;

use crate::content::{AttributeValue, Contents, RenderedText};
use crate::directive::{Directive, DirectiveTable};
use crate::dom::{Document, NodeData, NodeHandle};
use crate::error::DomError;
use crate::expr::Evaluator;
use crate::queue::{Mutation, MutationHandle, MutationQueue, Priority};
use crate::suppress::{Suppression, SuppressionRegistry, WriteKind};
use crate::value::Scope;
use crate::dev_debug;

/// Identity of a fragment within its tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FragmentId(u64);

impl FragmentId {
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for FragmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "f{}", self.0)
    }
}

/// Reconciliation identity of a repeated fragment.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ListKey {
    pub item_key: String,
    pub template_index: usize,
}

/// Value last queued for the document, with the fate of its write.
#[derive(Debug, Clone)]
pub struct Rendered<T> {
    pub value: T,
    rejected: Arc<AtomicBool>,
}

impl<T: PartialEq> Rendered<T> {
    /// Track `value`; the returned [`Landing`] travels with its write.
    pub(crate) fn queued(value: T) -> (Self, Landing) {
        let rejected = Arc::new(AtomicBool::new(false));
        let landing = Landing {
            rejected: Arc::clone(&rejected),
            landed: false,
        };
        (Self { value, rejected }, landing)
    }

    /// Whether `value` is in the document or still on its way there.
    pub fn holds(&self, value: &T) -> bool {
        self.value == *value && !self.rejected.load(Ordering::Acquire)
    }
}

/// Moved into a queued write. Dropped without [`Landing::land`], it marks
/// the write rejected.
pub(crate) struct Landing {
    rejected: Arc<AtomicBool>,
    landed: bool,
}

impl Landing {
    pub(crate) fn land(mut self) {
        self.landed = true;
    }
}

impl Drop for Landing {
    fn drop(&mut self) {
        if !self.landed {
            self.rejected.store(true, Ordering::Release);
        }
    }
}

/// An attribute's source, its directive role and what was last written.
#[derive(Debug, Clone)]
pub struct AttributeSlot {
    pub source: String,
    pub directive: Option<Directive>,
    pub contents: Contents,
    pub rendered: Option<Rendered<AttributeValue>>,
}

impl AttributeSlot {
    fn new(name: &str, source: &str, directives: &DirectiveTable) -> Self {
        let directive = directives.lookup(name);
        let contents = match directive {
            Some(d) if d.is_forced() => Contents::directive(source),
            Some(Directive::Bind) => Contents::code(source),
            _ => Contents::attribute(source),
        };
        Self {
            source: source.to_string(),
            directive,
            contents,
            rendered: None,
        }
    }

    /// Whether evaluation may write this attribute back.
    pub fn is_dynamic(&self) -> bool {
        self.directive.is_none() && self.contents.has_expressions()
    }
}

/// Visibility state machine.
#[derive(Debug, Clone, Default)]
pub struct Visibility {
    pub hidden: bool,
    /// Display value captured when hiding; restored when shown.
    pub saved_display: Option<String>,
    /// Display value most recently queued, ahead of the document.
    pub(crate) display_shadow: Option<Option<String>>,
}

#[derive(Debug, Clone)]
pub struct ElementData {
    pub tag: String,
    pub children: Vec<FragmentId>,
    pub attributes: IndexMap<String, AttributeSlot>,
    /// Own declared binding data, not inherited.
    pub binding_data: Option<Scope>,
    pub(crate) binding_cache: Option<Arc<Scope>>,
    /// A bind declaration waits to be evaluated.
    pub(crate) bind_pending: bool,
    pub visibility: Visibility,
    pub templates: Vec<FragmentId>,
    pub(crate) templates_captured: bool,
    /// Last synced control value.
    pub value: Option<String>,
}

impl ElementData {
    pub fn directive(&self, directive: Directive) -> Option<&AttributeSlot> {
        self.attributes.values().find(|slot| slot.directive == Some(directive))
    }

    pub fn has_directive(&self, directive: Directive) -> bool {
        self.directive(directive).is_some()
    }

    /// Before/after markers of a repetition.
    pub fn is_marker(&self) -> bool {
        self.has_directive(Directive::EachBefore) || self.has_directive(Directive::EachAfter)
    }
}

#[derive(Debug, Clone)]
pub struct TextData {
    pub contents: Contents,
    pub rendered: Option<Rendered<RenderedText>>,
    /// Item data when the text node is a repetition row.
    pub binding_data: Option<Scope>,
}

#[derive(Debug, Clone)]
pub enum FragmentKind {
    Element(ElementData),
    Text(TextData),
    Comment,
}

#[derive(Debug, Clone)]
pub struct Fragment {
    pub id: FragmentId,
    pub target: NodeHandle,
    pub parent: Option<FragmentId>,
    pub mounted: bool,
    pub suppression: Arc<Suppression>,
    /// Identity within a repetition, for rows only.
    pub list_key: Option<ListKey>,
    pub kind: FragmentKind,
}

impl Fragment {
    pub fn as_element(&self) -> Option<&ElementData> {
        match &self.kind {
            FragmentKind::Element(element) => Some(element),
            _ => None,
        }
    }

    pub(crate) fn as_element_mut(&mut self) -> Option<&mut ElementData> {
        match &mut self.kind {
            FragmentKind::Element(element) => Some(element),
            _ => None,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self.kind {
            FragmentKind::Element(_) => "element",
            FragmentKind::Text(_) => "text",
            FragmentKind::Comment => "comment",
        }
    }
}

/// The arena of fragments plus everything evaluation needs.
pub struct FragmentTree {
    fragments: HashMap<FragmentId, Fragment>,
    by_node: HashMap<NodeHandle, FragmentId>,
    next_id: u64,
    pub(crate) evaluator: Arc<Evaluator>,
    pub(crate) directives: DirectiveTable,
    pub(crate) queue: MutationQueue,
    registry: Arc<SuppressionRegistry>,
}

impl fmt::Debug for FragmentTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FragmentTree")
            .field("fragments", &self.fragments.len())
            .field("queue", &self.queue)
            .finish()
    }
}

impl FragmentTree {
    pub fn new(
        queue: MutationQueue,
        evaluator: Arc<Evaluator>,
        directives: DirectiveTable,
        registry: Arc<SuppressionRegistry>,
    ) -> Self {
        Self {
            fragments: HashMap::new(),
            by_node: HashMap::new(),
            next_id: 1,
            evaluator,
            directives,
            queue,
            registry,
        }
    }

    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    pub fn fragment(&self, id: FragmentId) -> Option<&Fragment> {
        self.fragments.get(&id)
    }

    pub(crate) fn fragment_mut(&mut self, id: FragmentId) -> Option<&mut Fragment> {
        self.fragments.get_mut(&id)
    }

    pub fn element(&self, id: FragmentId) -> Option<&ElementData> {
        self.fragments.get(&id)?.as_element()
    }

    pub(crate) fn element_mut(&mut self, id: FragmentId) -> Option<&mut ElementData> {
        self.fragments.get_mut(&id)?.as_element_mut()
    }

    /// Fragment mirroring `node`, if one was built.
    pub fn lookup(&self, node: NodeHandle) -> Option<FragmentId> {
        self.by_node.get(&node).copied()
    }

    pub fn target(&self, id: FragmentId) -> Option<NodeHandle> {
        self.fragments.get(&id).map(|f| f.target)
    }

    pub fn children(&self, id: FragmentId) -> &[FragmentId] {
        self.element(id).map(|e| e.children.as_slice()).unwrap_or(&[])
    }

    pub fn list_key(&self, id: FragmentId) -> Option<&ListKey> {
        self.fragments.get(&id)?.list_key.as_ref()
    }

    pub fn is_hidden(&self, id: FragmentId) -> bool {
        self.element(id).map_or(false, |e| e.visibility.hidden)
    }

    pub fn value(&self, id: FragmentId) -> Option<&str> {
        self.element(id)?.value.as_deref()
    }

    // ------------------------------------------------------------------
    // Construction
    // ------------------------------------------------------------------

    /// Get or lazily build the fragment for `node` and its subtree.
    pub fn get(&mut self, node: NodeHandle) -> Option<FragmentId> {
        if let Some(id) = self.lookup(node) {
            return Some(id);
        }
        let document = Arc::clone(self.queue.document());
        let doc = document.lock();
        let id = self.build(&doc, node)?;
        let mounted = doc.parent(node).is_some();
        drop(doc);

        if let Some(fragment) = self.fragments.get_mut(&id) {
            fragment.mounted = mounted;
        }
        Some(id)
    }

    fn build(&mut self, doc: &Document, node: NodeHandle) -> Option<FragmentId> {
        if let Some(id) = self.lookup(node) {
            return Some(id);
        }
        let kind = match doc.data(node)? {
            NodeData::Element { tag, attributes } => {
                let attributes: IndexMap<String, AttributeSlot> = attributes
                    .iter()
                    .map(|(name, value)| (name.clone(), AttributeSlot::new(name, value, &self.directives)))
                    .collect();
                let bind_pending = attributes
                    .values()
                    .any(|slot| slot.directive == Some(Directive::Bind));
                let value = attributes
                    .get("value")
                    .filter(|slot| !slot.contents.has_expressions())
                    .map(|slot| slot.source.clone());
                FragmentKind::Element(ElementData {
                    tag: tag.clone(),
                    children: Vec::new(),
                    attributes,
                    binding_data: None,
                    binding_cache: None,
                    bind_pending,
                    visibility: Visibility::default(),
                    templates: Vec::new(),
                    templates_captured: false,
                    value,
                })
            }
            NodeData::Text { content, .. } => FragmentKind::Text(TextData {
                contents: Contents::parse(content),
                rendered: None,
                binding_data: None,
            }),
            NodeData::Comment(_) => FragmentKind::Comment,
        };

        let id = FragmentId(self.next_id);
        self.next_id += 1;
        let suppression = Suppression::new();
        self.registry.register(node, Arc::clone(&suppression));
        self.by_node.insert(node, id);
        self.fragments.insert(
            id,
            Fragment {
                id,
                target: node,
                parent: None,
                mounted: false,
                suppression,
                list_key: None,
                kind,
            },
        );

        let mut children = Vec::new();
        for &child_node in doc.children(node) {
            if let Some(child) = self.build(doc, child_node) {
                if let Some(fragment) = self.fragments.get_mut(&child) {
                    fragment.parent = Some(id);
                    fragment.mounted = true;
                }
                children.push(child);
            }
        }
        if let Some(element) = self.element_mut(id) {
            element.children = children;
        }
        Some(id)
    }

    /// Remove a fragment and its subtree from the arena. The document is
    /// not touched.
    pub fn destroy(&mut self, id: FragmentId) {
        if let Some(parent) = self.fragments.get(&id).and_then(|f| f.parent) {
            if let Some(element) = self.element_mut(parent) {
                element.children.retain(|&c| c != id);
            }
        }
        let mut stack = vec![id];
        while let Some(next) = stack.pop() {
            let Some(fragment) = self.fragments.remove(&next) else {
                continue;
            };
            if self.by_node.get(&fragment.target) == Some(&next) {
                self.by_node.remove(&fragment.target);
                self.registry.unregister(fragment.target);
            }
            if let FragmentKind::Element(element) = fragment.kind {
                stack.extend(element.children);
                stack.extend(element.templates);
            }
        }
    }

    /// Forget the fragment of a node that left the document.
    pub fn forget(&mut self, node: NodeHandle) -> bool {
        match self.lookup(node) {
            Some(id) => {
                self.destroy(id);
                true
            }
            None => false,
        }
    }

    // ------------------------------------------------------------------
    // Structure
    // ------------------------------------------------------------------

    /// Splice `child` into `parent` before `reference` without writing to
    /// the document. Used when the document already changed.
    pub fn adopt(&mut self, parent: FragmentId, child: FragmentId, reference: Option<FragmentId>) -> bool {
        if parent == child || !self.fragments.contains_key(&child) {
            return false;
        }
        let old_parent = self.fragments.get(&child).and_then(|f| f.parent);
        if let Some(old) = old_parent {
            if let Some(element) = self.element_mut(old) {
                element.children.retain(|&c| c != child);
            }
        }
        let Some(element) = self.element_mut(parent) else {
            return false;
        };
        let index = reference
            .and_then(|r| element.children.iter().position(|&c| c == r))
            .unwrap_or(element.children.len());
        element.children.insert(index, child);

        if let Some(fragment) = self.fragments.get_mut(&child) {
            fragment.parent = Some(parent);
            fragment.mounted = true;
        }
        true
    }

    /// Splice `child` into `parent` before `reference` and queue the
    /// matching document write.
    pub fn insert_before(
        &mut self,
        parent: FragmentId,
        child: FragmentId,
        reference: Option<FragmentId>,
    ) -> Option<MutationHandle> {
        let parent_node = self.target(parent)?;
        let child_node = self.target(child)?;
        let reference_node = match reference {
            Some(r) => Some(self.target(r)?),
            None => None,
        };
        if !self.adopt(parent, child, reference) {
            return None;
        }
        Some(self.write(
            parent,
            WriteKind::ChildList,
            Priority::NORMAL,
            "insert",
            move |doc| doc.insert_before(parent_node, child_node, reference_node),
        ))
    }

    /// Detach `child` from its parent, queue the document removal and
    /// destroy the fragment.
    pub fn remove_child(&mut self, child: FragmentId) -> Option<MutationHandle> {
        let fragment = self.fragments.get(&child)?;
        let node = fragment.target;
        let parent = fragment.parent;
        self.destroy(child);

        let handle = match parent {
            Some(parent) => self.write(parent, WriteKind::ChildList, Priority::NORMAL, "remove", move |doc| {
                discard_if_present(doc, node)
            }),
            None => self.queue.enqueue(
                Mutation::new(move |doc| discard_if_present(doc, node)).with_label("remove"),
            ),
        };
        Some(handle)
    }

    /// Detach `child` from the live tree, keeping the fragment parked.
    pub(crate) fn park(&mut self, child: FragmentId) -> Option<MutationHandle> {
        let fragment = self.fragments.get_mut(&child)?;
        let node = fragment.target;
        let parent = fragment.parent.take()?;
        fragment.mounted = false;
        if let Some(element) = self.element_mut(parent) {
            element.children.retain(|&c| c != child);
        }
        Some(self.write(parent, WriteKind::ChildList, Priority::NORMAL, "park", move |doc| {
            doc.remove(node)
        }))
    }

    /// Copy a parked template into a fresh, unattached fragment subtree.
    pub(crate) fn instantiate(&mut self, template: FragmentId) -> Option<FragmentId> {
        let template_node = self.target(template)?;
        let document = Arc::clone(self.queue.document());
        let mut doc = document.lock();
        let node = doc.deep_clone(template_node).ok()?;
        self.build(&doc, node)
    }

    /// Queue a write holding a suppression guard of fragment `id`.
    pub(crate) fn write<F>(
        &self,
        id: FragmentId,
        kind: WriteKind,
        priority: Priority,
        label: &'static str,
        operation: F,
    ) -> MutationHandle
    where
        F: FnOnce(&mut Document) -> Result<(), DomError> + Send + 'static,
    {
        let mut mutation = Mutation::new(operation)
            .with_priority(priority)
            .with_label(label);
        if let Some(fragment) = self.fragments.get(&id) {
            mutation = mutation.with_guard(fragment.suppression.acquire(kind));
        }
        dev_debug!(fragment = %id, label, "queueing write");
        self.queue.enqueue(mutation)
    }
}

fn discard_if_present(doc: &mut Document, node: NodeHandle) -> Result<(), DomError> {
    if doc.contains(node) {
        doc.discard(node)
    } else {
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::config::QueueConfig;
    use parking_lot::Mutex;

    /// A tree over parsed markup with an immediate, manually flushed queue.
    pub fn tree(markup: &str) -> (FragmentTree, MutationQueue) {
        let document = Document::parse(markup).expect("valid markup");
        let document = Arc::new(Mutex::new(document));
        let queue = MutationQueue::new(document, &QueueConfig::default());
        let registry = SuppressionRegistry::new();
        queue.document().lock().set_record_filter(registry.filter());
        let tree = FragmentTree::new(
            queue.clone(),
            Arc::new(Evaluator::new()),
            DirectiveTable::default(),
            registry,
        );
        (tree, queue)
    }

    pub fn html(queue: &MutationQueue) -> String {
        queue.flush();
        queue.document().lock().html()
    }
}
