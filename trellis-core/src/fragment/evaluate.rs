//! Evaluation protocol.
//!
//! ```text
//! evaluate_all(fragment)
//!   Text     -> render content, write if changed
//!   Comment  -> nothing
//!   Element  -> 1. pending bind declaration (parent scope)
//!               2. visibility; stop here while hidden
//!               3. dynamic attributes, write if changed
//!               4. repetition -> reconcile, otherwise recurse into children
//! ```
//!
//! Only changed values are written, so re-evaluating an unchanged subtree
//! queues nothing.

use super::{AttributeSlot, FragmentId, FragmentKind, FragmentTree, Rendered};
use crate::content::{AttributeValue, Contents};
use crate::directive::Directive;
use crate::queue::Priority;
use crate::suppress::WriteKind;
use crate::dev_debug;

impl FragmentTree {
    /// Re-evaluate a fragment and its subtree.
    pub fn evaluate_all(&mut self, id: FragmentId) {
        let Some(fragment) = self.fragment(id) else {
            return;
        };
        match fragment.kind {
            FragmentKind::Text(_) => self.evaluate_text(id),
            FragmentKind::Comment => {}
            FragmentKind::Element(_) => self.evaluate_element(id),
        }
    }

    fn evaluate_text(&mut self, id: FragmentId) {
        let contents = match self.fragment(id).map(|f| &f.kind) {
            Some(FragmentKind::Text(text)) if text.contents.has_expressions() => text.contents.clone(),
            _ => return,
        };
        let scope = self.scope(id);
        let rendered = contents.render_text(&self.evaluator, &scope);

        let Some(fragment) = self.fragment_mut(id) else {
            return;
        };
        let node = fragment.target;
        let FragmentKind::Text(text) = &mut fragment.kind else {
            return;
        };
        if text.rendered.as_ref().map_or(false, |r| r.holds(&rendered)) {
            return;
        }
        let (tracked, landing) = Rendered::queued(rendered.clone());
        text.rendered = Some(tracked);
        self.write(id, WriteKind::Content, Priority::NORMAL, "text", move |doc| {
            doc.set_text(node, &rendered.text, rendered.raw)?;
            landing.land();
            Ok(())
        });
    }

    fn evaluate_element(&mut self, id: FragmentId) {
        self.evaluate_bind(id);

        let has_if = self.element(id).map_or(false, |e| e.has_directive(Directive::If));
        if has_if && !self.apply_visibility(id) {
            return;
        }

        self.evaluate_attributes(id);

        let has_each = self.element(id).map_or(false, |e| e.has_directive(Directive::Each));
        if has_each {
            self.reconcile(id);
        } else {
            for child in self.children(id).to_vec() {
                self.evaluate_all(child);
            }
        }
    }

    fn evaluate_attributes(&mut self, id: FragmentId) {
        let dynamic: Vec<String> = match self.element(id) {
            Some(element) => element
                .attributes
                .iter()
                .filter(|(_, slot)| slot.is_dynamic())
                .map(|(name, _)| name.clone())
                .collect(),
            None => return,
        };
        for name in dynamic {
            self.evaluate_attribute(id, &name);
        }
    }

    fn evaluate_attribute(&mut self, id: FragmentId, name: &str) {
        let Some(contents) = self
            .element(id)
            .and_then(|e| e.attributes.get(name))
            .map(|slot| slot.contents.clone())
        else {
            return;
        };
        let scope = self.scope(id);
        let value = contents.render_attribute(&self.evaluator, &scope);
        let Some(node) = self.target(id) else {
            return;
        };

        let Some(element) = self.element_mut(id) else {
            return;
        };
        if name == "value" {
            element.value = match &value {
                AttributeValue::Set(text) => Some(text.clone()),
                AttributeValue::Remove => None,
            };
        }
        let Some(slot) = element.attributes.get_mut(name) else {
            return;
        };
        if slot.rendered.as_ref().map_or(false, |r| r.holds(&value)) {
            return;
        }
        let (tracked, landing) = Rendered::queued(value.clone());
        slot.rendered = Some(tracked);

        let name = name.to_string();
        match value {
            AttributeValue::Set(text) => {
                self.write(id, WriteKind::Attribute, Priority::NORMAL, "attribute", move |doc| {
                    doc.set_attribute(node, &name, &text)?;
                    landing.land();
                    Ok(())
                });
            }
            AttributeValue::Remove => {
                self.write(id, WriteKind::Attribute, Priority::NORMAL, "attribute", move |doc| {
                    doc.remove_attribute(node, &name)?;
                    landing.land();
                    Ok(())
                });
            }
        }
    }

    // ------------------------------------------------------------------
    // Update entrypoints
    // ------------------------------------------------------------------

    /// An attribute changed (or was removed) outside the engine.
    pub fn set_attribute(&mut self, id: FragmentId, name: &str, value: Option<&str>) {
        let directive = self.directives.lookup(name);
        if directive.map_or(false, |d| d.is_engine_owned()) {
            return;
        }
        let slot = value.map(|source| AttributeSlot::new(name, source, &self.directives));
        let Some(element) = self.element_mut(id) else {
            return;
        };

        match slot {
            Some(slot) => {
                if element.attributes.get(name).map(|s| s.source.as_str()) == Some(slot.source.as_str()) {
                    return;
                }
                if name == "value" && !slot.contents.has_expressions() {
                    element.value = Some(slot.source.clone());
                }
                element.attributes.insert(name.to_string(), slot);
            }
            None => {
                if element.attributes.shift_remove(name).is_none() {
                    return;
                }
                if name == "value" {
                    element.value = None;
                }
            }
        }
        dev_debug!(fragment = %id, attribute = name, "attribute changed externally");

        match directive {
            Some(Directive::Bind) => {
                if let Some(element) = self.element_mut(id) {
                    element.bind_pending = value.is_some();
                    if value.is_none() {
                        element.binding_data = None;
                    }
                }
                self.invalidate(id);
                self.evaluate_all(id);
            }
            Some(Directive::If) if value.is_none() => {
                self.show(id);
                self.evaluate_all(id);
            }
            Some(_) => self.evaluate_all(id),
            None => {
                let dynamic = self
                    .element(id)
                    .and_then(|e| e.attributes.get(name))
                    .map_or(false, |slot| slot.is_dynamic());
                if dynamic {
                    self.evaluate_attribute(id, name);
                }
            }
        }
    }

    /// The content of a text node changed outside the engine.
    pub fn set_content(&mut self, id: FragmentId, text: &str) {
        let Some(FragmentKind::Text(data)) = self.fragment_mut(id).map(|f| &mut f.kind) else {
            return;
        };
        if data.rendered.as_ref().map(|r| r.value.text.as_str()) == Some(text) {
            return;
        }
        data.contents = Contents::parse(text);
        data.rendered = None;
        self.evaluate_text(id);
    }
}
