//! Arena document.
//!
//! Nodes live in a `HashMap` keyed by handle and link to each other through
//! handles only. Removing a node detaches it but keeps it in the arena so it
//! can be re-inserted; [`Document::discard`] drops a detached subtree for
//! good.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;

use super::{MutationRecord, NodeData, NodeHandle};
use crate::error::DomError;

/// Decides whether a record is kept. Returning `false` drops it.
pub type RecordFilter = Arc<dyn Fn(&MutationRecord) -> bool + Send + Sync>;

const ROOT_TAG: &str = "#document";

#[derive(Debug, Clone)]
struct Node {
    parent: Option<NodeHandle>,
    children: Vec<NodeHandle>,
    data: NodeData,
}

impl Node {
    fn new(data: NodeData) -> Self {
        Self {
            parent: None,
            children: Vec::new(),
            data,
        }
    }
}

/// A live render tree.
pub struct Document {
    nodes: HashMap<NodeHandle, Node>,
    root: NodeHandle,
    records: Vec<MutationRecord>,
    filter: Option<RecordFilter>,
}

impl fmt::Debug for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Document")
            .field("nodes", &self.nodes.len())
            .field("root", &self.root)
            .field("pending_records", &self.records.len())
            .finish()
    }
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    /// Create an empty document with a root container.
    pub fn new() -> Self {
        let root = NodeHandle::next();
        let mut nodes = HashMap::new();
        nodes.insert(
            root,
            Node::new(NodeData::Element {
                tag: ROOT_TAG.to_string(),
                attributes: IndexMap::new(),
            }),
        );
        Self {
            nodes,
            root,
            records: Vec::new(),
            filter: None,
        }
    }

    pub fn root(&self) -> NodeHandle {
        self.root
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.len() <= 1
    }

    // ------------------------------------------------------------------
    // Creation
    // ------------------------------------------------------------------

    /// Create a detached element.
    pub fn create_element(&mut self, tag: impl Into<String>) -> NodeHandle {
        self.insert_node(NodeData::Element {
            tag: tag.into().to_ascii_lowercase(),
            attributes: IndexMap::new(),
        })
    }

    /// Create a detached text node.
    pub fn create_text(&mut self, content: impl Into<String>) -> NodeHandle {
        self.insert_node(NodeData::Text {
            content: content.into(),
            raw: false,
        })
    }

    /// Create a detached comment.
    pub fn create_comment(&mut self, text: impl Into<String>) -> NodeHandle {
        self.insert_node(NodeData::Comment(text.into()))
    }

    fn insert_node(&mut self, data: NodeData) -> NodeHandle {
        let handle = NodeHandle::next();
        self.nodes.insert(handle, Node::new(data));
        handle
    }

    /// Copy a subtree. The copy is detached and produces no records.
    pub fn deep_clone(&mut self, handle: NodeHandle) -> Result<NodeHandle, DomError> {
        let node = self.node(handle)?;
        let data = node.data.clone();
        let children = node.children.clone();

        let copy = self.insert_node(data);
        for child in children {
            let child_copy = self.deep_clone(child)?;
            self.link(copy, child_copy, None);
        }
        Ok(copy)
    }

    // ------------------------------------------------------------------
    // Reading
    // ------------------------------------------------------------------

    pub fn contains(&self, handle: NodeHandle) -> bool {
        self.nodes.contains_key(&handle)
    }

    pub fn data(&self, handle: NodeHandle) -> Option<&NodeData> {
        self.nodes.get(&handle).map(|n| &n.data)
    }

    pub fn tag(&self, handle: NodeHandle) -> Option<&str> {
        match self.data(handle)? {
            NodeData::Element { tag, .. } => Some(tag),
            _ => None,
        }
    }

    pub fn parent(&self, handle: NodeHandle) -> Option<NodeHandle> {
        self.nodes.get(&handle).and_then(|n| n.parent)
    }

    /// Children of `handle`; empty for unknown nodes.
    pub fn children(&self, handle: NodeHandle) -> &[NodeHandle] {
        self.nodes
            .get(&handle)
            .map(|n| n.children.as_slice())
            .unwrap_or(&[])
    }

    /// Whether `handle` is attached (transitively) under the root.
    pub fn is_connected(&self, handle: NodeHandle) -> bool {
        let mut current = Some(handle);
        while let Some(node) = current {
            if node == self.root {
                return true;
            }
            current = self.parent(node);
        }
        false
    }

    pub fn attributes(&self, handle: NodeHandle) -> Option<&IndexMap<String, String>> {
        match self.data(handle)? {
            NodeData::Element { attributes, .. } => Some(attributes),
            _ => None,
        }
    }

    pub fn attribute(&self, handle: NodeHandle, name: &str) -> Option<&str> {
        self.attributes(handle)?.get(name).map(String::as_str)
    }

    /// Content of a text or comment node.
    pub fn text(&self, handle: NodeHandle) -> Option<&str> {
        match self.data(handle)? {
            NodeData::Text { content, .. } => Some(content),
            NodeData::Comment(text) => Some(text),
            NodeData::Element { .. } => None,
        }
    }

    /// Concatenated text of every descendant text node.
    pub fn text_content(&self, handle: NodeHandle) -> String {
        let mut out = String::new();
        self.collect_text(handle, &mut out);
        out
    }

    fn collect_text(&self, handle: NodeHandle, out: &mut String) {
        match self.data(handle) {
            Some(NodeData::Text { content, .. }) => out.push_str(content),
            Some(NodeData::Element { .. }) => {
                for &child in self.children(handle) {
                    self.collect_text(child, out);
                }
            }
            _ => {}
        }
    }

    /// Pre-order descendants of `handle`, excluding itself.
    pub fn descendants(&self, handle: NodeHandle) -> Vec<NodeHandle> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeHandle> = self.children(handle).iter().rev().copied().collect();
        while let Some(next) = stack.pop() {
            out.push(next);
            stack.extend(self.children(next).iter().rev().copied());
        }
        out
    }

    /// Descendant elements with the given tag, in document order.
    pub fn elements_by_tag(&self, handle: NodeHandle, tag: &str) -> Vec<NodeHandle> {
        self.descendants(handle)
            .into_iter()
            .filter(|&h| self.tag(h) == Some(tag))
            .collect()
    }

    /// First descendant element carrying `name`, optionally with `value`.
    pub fn find_by_attribute(&self, handle: NodeHandle, name: &str, value: Option<&str>) -> Option<NodeHandle> {
        self.descendants(handle).into_iter().find(|&h| match self.attribute(h, name) {
            Some(found) => value.map_or(true, |v| v == found),
            None => false,
        })
    }

    // ------------------------------------------------------------------
    // Writing
    // ------------------------------------------------------------------

    pub fn set_attribute(&mut self, handle: NodeHandle, name: &str, value: &str) -> Result<(), DomError> {
        self.attributes_mut(handle)?
            .insert(name.to_string(), value.to_string());
        self.record(MutationRecord::attribute(handle, name));
        Ok(())
    }

    /// Remove an attribute. Returns whether it existed.
    pub fn remove_attribute(&mut self, handle: NodeHandle, name: &str) -> Result<bool, DomError> {
        let existed = self.attributes_mut(handle)?.shift_remove(name).is_some();
        if existed {
            self.record(MutationRecord::attribute(handle, name));
        }
        Ok(existed)
    }

    /// Replace the content of a text or comment node.
    pub fn set_text(&mut self, handle: NodeHandle, text: &str, raw: bool) -> Result<(), DomError> {
        match &mut self.node_mut(handle)?.data {
            NodeData::Text { content, raw: flag } => {
                *content = text.to_string();
                *flag = raw;
            }
            NodeData::Comment(content) => *content = text.to_string(),
            NodeData::Element { .. } => return Err(DomError::NotText(handle)),
        }
        self.record(MutationRecord::content(handle));
        Ok(())
    }

    pub fn append_child(&mut self, parent: NodeHandle, child: NodeHandle) -> Result<(), DomError> {
        self.insert_before(parent, child, None)
    }

    /// Insert `child` into `parent` before `reference` (or last). A child
    /// already in the tree is moved.
    pub fn insert_before(
        &mut self,
        parent: NodeHandle,
        child: NodeHandle,
        reference: Option<NodeHandle>,
    ) -> Result<(), DomError> {
        if !matches!(self.node(parent)?.data, NodeData::Element { .. }) {
            return Err(DomError::NotAnElement(parent));
        }
        self.node(child)?;
        if reference == Some(child) {
            return Ok(());
        }
        if let Some(reference) = reference {
            if self.parent(reference) != Some(parent) {
                return Err(DomError::NotAChild { parent, reference });
            }
        }
        let mut ancestor = Some(parent);
        while let Some(node) = ancestor {
            if node == child {
                return Err(DomError::HierarchyRequest { parent, child });
            }
            ancestor = self.parent(node);
        }

        if let Some(old_parent) = self.unlink(child) {
            self.record(MutationRecord::child_list(old_parent, Vec::new(), vec![child]));
        }
        self.link(parent, child, reference);
        self.record(MutationRecord::child_list(parent, vec![child], Vec::new()));
        Ok(())
    }

    /// Detach `handle` from its parent. The node stays in the arena.
    pub fn remove(&mut self, handle: NodeHandle) -> Result<(), DomError> {
        self.node(handle)?;
        if let Some(parent) = self.unlink(handle) {
            self.record(MutationRecord::child_list(parent, Vec::new(), vec![handle]));
        }
        Ok(())
    }

    /// Drop a subtree from the arena, detaching it first. Produces no
    /// records beyond the detach.
    pub fn discard(&mut self, handle: NodeHandle) -> Result<(), DomError> {
        if handle == self.root {
            return Err(DomError::HierarchyRequest {
                parent: handle,
                child: handle,
            });
        }
        self.remove(handle)?;
        let mut stack = vec![handle];
        while let Some(next) = stack.pop() {
            if let Some(node) = self.nodes.remove(&next) {
                stack.extend(node.children);
            }
        }
        Ok(())
    }

    fn link(&mut self, parent: NodeHandle, child: NodeHandle, reference: Option<NodeHandle>) {
        if let Some(node) = self.nodes.get_mut(&parent) {
            let index = reference
                .and_then(|r| node.children.iter().position(|&c| c == r))
                .unwrap_or(node.children.len());
            node.children.insert(index, child);
        }
        if let Some(node) = self.nodes.get_mut(&child) {
            node.parent = Some(parent);
        }
    }

    fn unlink(&mut self, child: NodeHandle) -> Option<NodeHandle> {
        let parent = self.nodes.get_mut(&child)?.parent.take()?;
        if let Some(node) = self.nodes.get_mut(&parent) {
            node.children.retain(|&c| c != child);
        }
        Some(parent)
    }

    // ------------------------------------------------------------------
    // Inline display style
    // ------------------------------------------------------------------

    /// The `display` declaration of the inline `style` attribute.
    pub fn style_display(&self, handle: NodeHandle) -> Option<String> {
        let style = self.attribute(handle, "style")?;
        parse_style(style)
            .into_iter()
            .find(|(property, _)| property == "display")
            .map(|(_, value)| value)
    }

    /// Set or remove the inline `display` declaration. An emptied `style`
    /// attribute is removed.
    pub fn set_style_display(&mut self, handle: NodeHandle, display: Option<&str>) -> Result<(), DomError> {
        let current = self.attribute(handle, "style").map(str::to_string);
        let mut declarations = current.as_deref().map(parse_style).unwrap_or_default();

        match display {
            Some(value) => match declarations.iter_mut().find(|entry| entry.0 == "display") {
                Some(entry) => entry.1 = value.to_string(),
                None => declarations.push(("display".to_string(), value.to_string())),
            },
            None => declarations.retain(|entry| entry.0 != "display"),
        }

        if declarations.is_empty() {
            if current.is_some() {
                self.remove_attribute(handle, "style")?;
            }
            return Ok(());
        }
        let style = declarations
            .iter()
            .map(|(p, v)| format!("{}: {};", p, v))
            .collect::<Vec<_>>()
            .join(" ");
        if current.as_deref() != Some(style.as_str()) {
            self.set_attribute(handle, "style", &style)?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Records
    // ------------------------------------------------------------------

    pub fn set_record_filter(&mut self, filter: RecordFilter) {
        self.filter = Some(filter);
    }

    pub fn clear_record_filter(&mut self) {
        self.filter = None;
    }

    /// Drain the pending mutation records.
    pub fn take_records(&mut self) -> Vec<MutationRecord> {
        std::mem::take(&mut self.records)
    }

    pub fn pending_records(&self) -> usize {
        self.records.len()
    }

    fn record(&mut self, record: MutationRecord) {
        let keep = self.filter.as_ref().map_or(true, |filter| filter(&record));
        if keep {
            self.records.push(record);
        }
    }

    // ------------------------------------------------------------------
    // Serialization
    // ------------------------------------------------------------------

    /// Serialize the children of the root.
    pub fn html(&self) -> String {
        self.inner_html(self.root)
    }

    pub fn inner_html(&self, handle: NodeHandle) -> String {
        let mut out = String::new();
        for &child in self.children(handle) {
            self.write_html(child, &mut out);
        }
        out
    }

    /// Serialize `handle` itself, including its own tag.
    pub fn to_html(&self, handle: NodeHandle) -> String {
        let mut out = String::new();
        self.write_html(handle, &mut out);
        out
    }

    fn write_html(&self, handle: NodeHandle, out: &mut String) {
        let Some(node) = self.nodes.get(&handle) else {
            return;
        };
        match &node.data {
            NodeData::Text { content, raw: true } => out.push_str(content),
            NodeData::Text { content, raw: false } => out.push_str(&escape_text(content)),
            NodeData::Comment(text) => {
                out.push_str("<!--");
                out.push_str(text);
                out.push_str("-->");
            }
            NodeData::Element { tag, attributes } => {
                out.push('<');
                out.push_str(tag);
                for (name, value) in attributes {
                    out.push(' ');
                    out.push_str(name);
                    out.push_str("=\"");
                    out.push_str(&escape_attribute(value));
                    out.push('"');
                }
                out.push('>');
                if super::parse::is_void(tag) {
                    return;
                }
                for &child in &node.children {
                    self.write_html(child, out);
                }
                out.push_str("</");
                out.push_str(tag);
                out.push('>');
            }
        }
    }

    // ------------------------------------------------------------------
    // Internal access
    // ------------------------------------------------------------------

    fn node(&self, handle: NodeHandle) -> Result<&Node, DomError> {
        self.nodes.get(&handle).ok_or(DomError::NodeNotFound(handle))
    }

    fn node_mut(&mut self, handle: NodeHandle) -> Result<&mut Node, DomError> {
        self.nodes.get_mut(&handle).ok_or(DomError::NodeNotFound(handle))
    }

    fn attributes_mut(&mut self, handle: NodeHandle) -> Result<&mut IndexMap<String, String>, DomError> {
        match &mut self.node_mut(handle)?.data {
            NodeData::Element { attributes, .. } => Ok(attributes),
            _ => Err(DomError::NotAnElement(handle)),
        }
    }

    /// Attach without recording. Used while building from markup.
    pub(super) fn attach_silently(&mut self, parent: NodeHandle, child: NodeHandle) {
        self.link(parent, child, None);
    }

    pub(super) fn create_node(&mut self, data: NodeData) -> NodeHandle {
        self.insert_node(data)
    }
}

fn parse_style(style: &str) -> Vec<(String, String)> {
    style
        .split(';')
        .filter_map(|declaration| {
            let (property, value) = declaration.split_once(':')?;
            let property = property.trim().to_ascii_lowercase();
            let value = value.trim();
            if property.is_empty() {
                return None;
            }
            Some((property, value.to_string()))
        })
        .collect()
}

fn escape_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(c),
        }
    }
    out
}

fn escape_attribute(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '<' => out.push_str("&lt;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::MutationKind;

    fn list() -> (Document, NodeHandle, NodeHandle, NodeHandle) {
        let mut doc = Document::new();
        let ul = doc.create_element("ul");
        let a = doc.create_element("li");
        let b = doc.create_element("li");
        doc.append_child(doc.root(), ul).unwrap();
        doc.append_child(ul, a).unwrap();
        doc.append_child(ul, b).unwrap();
        doc.take_records();
        (doc, ul, a, b)
    }

    #[test]
    fn insert_before_moves_existing_child() {
        let (mut doc, ul, a, b) = list();
        doc.insert_before(ul, b, Some(a)).unwrap();
        assert_eq!(doc.children(ul), &[b, a]);

        let records = doc.take_records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0], MutationRecord::child_list(ul, vec![], vec![b]));
        assert_eq!(records[1], MutationRecord::child_list(ul, vec![b], vec![]));
    }

    #[test]
    fn rejects_cycles_and_foreign_references() {
        let (mut doc, ul, a, _) = list();
        assert_eq!(
            doc.insert_before(a, ul, None),
            Err(DomError::HierarchyRequest { parent: a, child: ul })
        );

        let stray = doc.create_element("li");
        assert_eq!(
            doc.insert_before(ul, a, Some(stray)),
            Err(DomError::NotAChild { parent: ul, reference: stray })
        );
    }

    #[test]
    fn deep_clone_is_detached_and_silent() {
        let (mut doc, ul, a, _) = list();
        let text = doc.create_text("hi");
        doc.append_child(a, text).unwrap();
        doc.set_attribute(a, "class", "row").unwrap();
        doc.take_records();

        let copy = doc.deep_clone(ul).unwrap();
        assert_eq!(doc.parent(copy), None);
        assert_eq!(doc.pending_records(), 0);
        assert_eq!(doc.to_html(copy), doc.to_html(ul));
        assert_ne!(doc.children(copy)[0], a);
    }

    #[test]
    fn display_style_round_trip() {
        let (mut doc, _, a, b) = list();
        doc.set_attribute(a, "style", "color: red").unwrap();

        doc.set_style_display(a, Some("none")).unwrap();
        assert_eq!(doc.attribute(a, "style"), Some("color: red; display: none;"));
        assert_eq!(doc.style_display(a).as_deref(), Some("none"));

        doc.set_style_display(a, None).unwrap();
        assert_eq!(doc.attribute(a, "style"), Some("color: red;"));

        doc.set_style_display(b, Some("none")).unwrap();
        doc.set_style_display(b, None).unwrap();
        assert_eq!(doc.attribute(b, "style"), None);
    }

    #[test]
    fn record_filter_drops_records() {
        let (mut doc, _, a, b) = list();
        doc.set_record_filter(Arc::new(move |record: &MutationRecord| record.target != a));
        doc.set_attribute(a, "x", "1").unwrap();
        doc.set_attribute(b, "x", "1").unwrap();
        let records = doc.take_records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].target, b);
        assert!(matches!(&records[0].kind, MutationKind::Attribute { name } if name == "x"));
    }

    #[test]
    fn raw_text_is_not_escaped() {
        let mut doc = Document::new();
        let p = doc.create_element("p");
        let text = doc.create_text("");
        doc.append_child(doc.root(), p).unwrap();
        doc.append_child(p, text).unwrap();

        doc.set_text(text, "<b>&</b>", false).unwrap();
        assert_eq!(doc.html(), "<p>&lt;b&gt;&amp;&lt;/b&gt;</p>");
        doc.set_text(text, "<b>&</b>", true).unwrap();
        assert_eq!(doc.html(), "<p><b>&</b></p>");
    }

    #[test]
    fn discard_drops_subtree() {
        let (mut doc, ul, a, b) = list();
        let before = doc.len();
        doc.discard(ul).unwrap();
        assert!(!doc.contains(ul) && !doc.contains(a) && !doc.contains(b));
        assert_eq!(doc.len(), before - 3);
        assert!(doc.discard(doc.root()).is_err());
    }
}
