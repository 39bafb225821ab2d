//! Engine
//!
//! The engine is the coordinator that connects the document, the fragment
//! tree and the mutation queue. It owns the wiring; the work happens in
//! the layers underneath.
//!
//! # How It Works
//!
//! 1. [`Engine::new`] shares the document with a [`MutationQueue`] and
//!    installs a record filter backed by the suppression registry, so the
//!    engine's own queued writes never show up as mutation records.
//!
//! 2. [`Engine::scan`] builds the fragment tree for the whole document and
//!    evaluates it once. Fragments below the root can also be fetched (and
//!    lazily built) one node at a time with [`Engine::fragment`].
//!
//! 3. Writes made by anybody else land in the document's record list.
//!    [`Engine::process_mutations`] drains it and feeds every record back
//!    into the tree:
//!
//! ```text
//!   Attribute { name }       -> FragmentTree::set_attribute(current value)
//!   Content                  -> FragmentTree::set_content(current text)
//!   ChildList { removed }    -> forget nodes that are no longer children
//!   ChildList { added }      -> build, splice before the next known sibling,
//!                               evaluate
//! ```
//!
//! Records are resolved against the document as it is when they are
//! processed, not as it was when they were written. A node that was
//! removed and re-added before processing is simply spliced back.
//!
//! # Locking
//!
//! The document lock is held only while reading; it is always released
//! before the tree is touched, since tree operations lock it themselves.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::EngineConfig;
use crate::directive::DirectiveTable;
use crate::dom::{Document, MutationKind, MutationRecord, NodeHandle};
use crate::error::{ConfigError, QueueError};
use crate::expr::Evaluator;
use crate::fragment::{FragmentId, FragmentTree};
use crate::queue::MutationQueue;
use crate::suppress::SuppressionRegistry;
use crate::value::Scope;
use crate::{dev_debug, dev_info};

/// Binding engine over one shared document.
pub struct Engine {
    tree: FragmentTree,
    queue: MutationQueue,
    document: Arc<Mutex<Document>>,
    registry: Arc<SuppressionRegistry>,
    evaluator: Arc<Evaluator>,
    config: EngineConfig,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("tree", &self.tree)
            .field("suppressed_nodes", &self.registry.len())
            .field("config", &self.config)
            .finish()
    }
}

impl Engine {
    /// Validate `config` and wire an engine around `document`.
    pub fn new(document: Document, config: EngineConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        crate::log::set_dev_mode(config.dev_mode);

        let registry = SuppressionRegistry::new();
        let mut document = document;
        document.set_record_filter(registry.filter());
        let document = Arc::new(Mutex::new(document));

        let queue = MutationQueue::new(Arc::clone(&document), &config.queue);
        let evaluator = Arc::new(Evaluator::new());
        let directives = DirectiveTable::new(config.prefixes.as_slice());
        let tree = FragmentTree::new(
            queue.clone(),
            Arc::clone(&evaluator),
            directives,
            Arc::clone(&registry),
        );

        dev_info!(prefixes = ?config.prefixes, "engine created");
        Ok(Self {
            tree,
            queue,
            document,
            registry,
            evaluator,
            config,
        })
    }

    pub fn document(&self) -> &Arc<Mutex<Document>> {
        &self.document
    }

    pub fn tree(&self) -> &FragmentTree {
        &self.tree
    }

    pub fn tree_mut(&mut self) -> &mut FragmentTree {
        &mut self.tree
    }

    pub fn queue(&self) -> &MutationQueue {
        &self.queue
    }

    pub fn evaluator(&self) -> &Arc<Evaluator> {
        &self.evaluator
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // ------------------------------------------------------------------
    // Scan entrypoint
    // ------------------------------------------------------------------

    /// Build the fragment tree for the whole document and evaluate it.
    pub fn scan(&mut self) -> Option<FragmentId> {
        let root = self.document.lock().root();
        let id = self.tree.get(root)?;
        self.tree.evaluate_all(id);
        dev_debug!(fragments = self.tree.len(), "document scanned");
        Some(id)
    }

    /// Fragment of `node`, built on first access.
    pub fn fragment(&mut self, node: NodeHandle) -> Option<FragmentId> {
        self.tree.get(node)
    }

    /// Re-evaluate the subtree rooted at `node`.
    pub fn evaluate(&mut self, node: NodeHandle) -> bool {
        match self.tree.get(node) {
            Some(id) => {
                self.tree.evaluate_all(id);
                true
            }
            None => false,
        }
    }

    /// Replace the binding data of `node` and re-evaluate its subtree.
    pub fn set_binding_data(&mut self, node: NodeHandle, data: Scope) -> bool {
        let Some(id) = self.tree.get(node) else {
            return false;
        };
        if !self.tree.set_binding_data(id, data) {
            return false;
        }
        self.tree.evaluate_all(id);
        true
    }

    // ------------------------------------------------------------------
    // Observer feedback
    // ------------------------------------------------------------------

    /// Drain the document's mutation records into the fragment tree.
    /// Returns the number of records handled.
    pub fn process_mutations(&mut self) -> usize {
        let records = self.document.lock().take_records();
        let count = records.len();
        for record in records {
            self.dispatch(record);
        }
        if count > 0 {
            dev_debug!(records = count, "mutation records processed");
        }
        count
    }

    fn dispatch(&mut self, record: MutationRecord) {
        let MutationRecord { target, kind } = record;
        let Some(id) = self.tree.lookup(target) else {
            return;
        };
        match kind {
            MutationKind::Attribute { name } => {
                let value = self.document.lock().attribute(target, &name).map(str::to_string);
                self.tree.set_attribute(id, &name, value.as_deref());
            }
            MutationKind::Content => {
                let text = self.document.lock().text(target).map(str::to_string);
                if let Some(text) = text {
                    self.tree.set_content(id, &text);
                }
            }
            MutationKind::ChildList { added, removed } => {
                for node in removed {
                    self.child_removed(target, node);
                }
                for node in added {
                    self.child_added(id, target, node);
                }
            }
        }
    }

    fn child_removed(&mut self, parent: NodeHandle, node: NodeHandle) {
        if self.document.lock().parent(node) == Some(parent) {
            return;
        }
        if self.tree.forget(node) {
            dev_debug!(node = %node, "fragment forgotten");
        }
    }

    fn child_added(&mut self, parent_id: FragmentId, parent: NodeHandle, node: NodeHandle) {
        let reference_node = {
            let doc = self.document.lock();
            if doc.parent(node) != Some(parent) {
                return;
            }
            let siblings = doc.children(parent);
            let position = siblings.iter().position(|&n| n == node);
            position.and_then(|p| {
                siblings[p + 1..]
                    .iter()
                    .copied()
                    .find(|&n| self.tree.lookup(n).is_some())
            })
        };

        let Some(child) = self.tree.get(node) else {
            return;
        };
        let reference = reference_node.and_then(|n| self.tree.lookup(n));
        if self.tree.adopt(parent_id, child, reference) {
            self.tree.invalidate(child);
            self.tree.evaluate_all(child);
        }
    }

    // ------------------------------------------------------------------
    // Queue
    // ------------------------------------------------------------------

    /// Resolve once every write queued so far has run.
    pub async fn settle(&self) -> Result<(), QueueError> {
        self.queue.settle().await
    }

    /// Run every queued write synchronously.
    pub fn flush(&self) -> usize {
        self.queue.flush()
    }

    /// Serialized document, after flushing pending writes.
    pub fn html(&self) -> String {
        self.flush();
        self.document.lock().html()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::scope_from_json;
    use serde_json::json;

    fn engine(markup: &str) -> Engine {
        let document = Document::parse(markup).expect("valid markup");
        Engine::new(document, EngineConfig::default()).expect("default config")
    }

    #[test]
    fn scan_evaluates_the_whole_document() {
        let mut engine = engine(r#"<div tr-bind="{ n: 2 }"><p>{{n * 3}}</p></div>"#);
        engine.scan().unwrap();
        assert_eq!(engine.html(), r#"<div tr-bind="{ n: 2 }"><p>6</p></div>"#);
    }

    #[test]
    fn own_writes_leave_no_records() {
        let mut engine = engine(r#"<ul tr-each="items" tr-each-key="id"><li>{{name}}</li></ul>"#);
        let root = engine.scan().unwrap();
        let root_node = engine.tree().target(root).unwrap();
        engine.set_binding_data(root_node, scope_from_json(json!({
            "items": [{"id": 1, "name": "A"}, {"id": 2, "name": "B"}]
        })));
        engine.flush();
        assert_eq!(engine.document().lock().pending_records(), 0);
        assert_eq!(engine.process_mutations(), 0);
    }

    #[test]
    fn external_attribute_write_is_fed_back() {
        let mut engine = engine(r#"<p class="x">hi</p>"#);
        let root = engine.scan().unwrap();
        let root_node = engine.tree().target(root).unwrap();
        engine.set_binding_data(root_node, scope_from_json(json!({"c": "on"})));
        engine.flush();

        let p = engine.document().lock().elements_by_tag(root_node, "p")[0];
        engine.document().lock().set_attribute(p, "class", "{{c}}").unwrap();
        assert_eq!(engine.process_mutations(), 1);
        assert_eq!(engine.html(), r#"<p class="on">hi</p>"#);
        // The engine's rewrite of the attribute was suppressed.
        assert_eq!(engine.process_mutations(), 0);
    }

    #[test]
    fn inserted_nodes_are_built_and_evaluated() {
        let mut engine = engine("<ul><li>a</li></ul>");
        let root = engine.scan().unwrap();
        let root_node = engine.tree().target(root).unwrap();
        engine.set_binding_data(root_node, scope_from_json(json!({"who": "B"})));
        engine.flush();

        let (ul, li) = {
            let mut doc = engine.document().lock();
            let ul = doc.elements_by_tag(root_node, "ul")[0];
            let first = doc.children(ul)[0];
            let li = doc.create_element("li");
            let text = doc.create_text("{{who}}");
            doc.append_child(li, text).unwrap();
            doc.insert_before(ul, li, Some(first)).unwrap();
            (ul, li)
        };
        engine.process_mutations();

        let ul_id = engine.tree().lookup(ul).unwrap();
        let li_id = engine.tree().lookup(li).unwrap();
        assert_eq!(engine.tree().children(ul_id)[0], li_id);
        assert_eq!(engine.html(), "<ul><li>B</li><li>a</li></ul>");
    }

    #[test]
    fn removed_nodes_are_forgotten() {
        let mut engine = engine("<ul><li>a</li><li>b</li></ul>");
        let root = engine.scan().unwrap();
        let root_node = engine.tree().target(root).unwrap();
        let li = {
            let doc = engine.document().lock();
            let ul = doc.elements_by_tag(root_node, "ul")[0];
            doc.children(ul)[0]
        };
        let before = engine.tree().len();
        engine.document().lock().remove(li).unwrap();
        engine.process_mutations();

        assert!(engine.tree().lookup(li).is_none());
        assert_eq!(engine.tree().len(), before - 2);
    }

    #[test]
    fn evicted_writes_are_repeated() {
        let mut config = EngineConfig::default();
        config.queue.capacity = 1;
        let document = Document::parse(r#"<p>{{a}}</p><p title="{{b}}">{{b}}</p>"#).unwrap();
        let mut engine = Engine::new(document, config).unwrap();
        let root = engine.document().lock().root();
        let data = scope_from_json(json!({"a": "A", "b": "B"}));

        // Only the last of the three writes survives a capacity of one.
        engine.set_binding_data(root, data.clone());
        assert_eq!(engine.html(), r#"<p>{{a}}</p><p title="{{b}}">B</p>"#);

        engine.set_binding_data(root, data.clone());
        assert_eq!(engine.html(), r#"<p>{{a}}</p><p title="B">B</p>"#);
        engine.set_binding_data(root, data.clone());
        assert_eq!(engine.html(), r#"<p>A</p><p title="B">B</p>"#);

        engine.set_binding_data(root, data);
        assert!(engine.queue().is_empty());
    }

    #[test]
    fn invalid_config_is_rejected() {
        let mut config = EngineConfig::default();
        config.prefixes.clear();
        assert!(Engine::new(Document::new(), config).is_err());
    }
}
