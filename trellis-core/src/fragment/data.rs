//! Binding data inheritance.
//!
//! The resolved scope of a fragment is its parent's resolved scope with the
//! fragment's own binding data laid over it. The overlay is shallow: an own
//! key replaces the inherited value wholesale, objects are never merged.
//!
//! Text nodes produced by a repetition carry item data of their own, laid
//! over the parent's scope the same way but never cached.
//!
//! Resolved scopes are cached per element. Any change to an element's own
//! data clears the cache of that element and every descendant immediately,
//! so reads before the next queue drain already see the new data.

use std::sync::Arc;

use super::{FragmentId, FragmentKind, FragmentTree};
use crate::directive::Directive;
use crate::error::BindError;
use crate::value::{Scope, Value};
use crate::{dev_error, dev_warn};

impl FragmentTree {
    /// Resolved scope of `id`. Comment fragments see their parent's scope.
    pub fn scope(&mut self, id: FragmentId) -> Arc<Scope> {
        let (parent, is_element, cached) = match self.fragment(id) {
            None => return Arc::new(Scope::new()),
            Some(fragment) => match &fragment.kind {
                FragmentKind::Element(element) => (fragment.parent, true, element.binding_cache.clone()),
                _ => (fragment.parent, false, None),
            },
        };
        if let Some(cached) = cached {
            return cached;
        }

        let inherited = parent.map(|p| self.scope(p)).unwrap_or_default();
        let resolved = overlay(inherited, self.binding_data(id));
        if is_element {
            if let Some(element) = self.element_mut(id) {
                element.binding_cache = Some(Arc::clone(&resolved));
            }
        }
        resolved
    }

    /// Replace the own binding data of an element or text fragment.
    /// Overrides a pending bind declaration.
    pub fn set_binding_data(&mut self, id: FragmentId, data: Scope) -> bool {
        match self.fragment_mut(id).map(|f| &mut f.kind) {
            Some(FragmentKind::Element(element)) => {
                element.binding_data = Some(data);
                element.bind_pending = false;
            }
            Some(FragmentKind::Text(text)) => {
                text.binding_data = Some(data);
                return true;
            }
            _ => return false,
        }
        self.invalidate(id);
        true
    }

    /// Own binding data of a fragment.
    pub fn binding_data(&self, id: FragmentId) -> Option<&Scope> {
        match &self.fragment(id)?.kind {
            FragmentKind::Element(element) => element.binding_data.as_ref(),
            FragmentKind::Text(text) => text.binding_data.as_ref(),
            FragmentKind::Comment => None,
        }
    }

    /// Clear the resolved-scope cache of `id` and all descendants.
    pub fn invalidate(&mut self, id: FragmentId) {
        let mut stack = vec![id];
        while let Some(next) = stack.pop() {
            if let Some(element) = self.element_mut(next) {
                element.binding_cache = None;
                stack.extend(element.children.iter().copied());
            }
        }
    }

    /// Evaluate a pending bind declaration in the parent's scope.
    pub(crate) fn evaluate_bind(&mut self, id: FragmentId) {
        let Some(element) = self.element(id) else {
            return;
        };
        if !element.bind_pending {
            return;
        }
        let Some(slot) = element.directive(Directive::Bind) else {
            if let Some(element) = self.element_mut(id) {
                element.bind_pending = false;
            }
            return;
        };
        let contents = slot.contents.clone();
        let parent = self.fragment(id).and_then(|f| f.parent);

        let scope = parent.map(|p| self.scope(p)).unwrap_or_default();
        let value = contents.render_value(&self.evaluator, &scope);
        let data = match value {
            Value::Object(map) => Some(map),
            Value::Undefined | Value::Null => None,
            other => {
                let err = BindError::InvalidBindData(other.type_name());
                dev_error!(fragment = %id, "{}", err);
                None
            }
        };
        if data.is_none() {
            dev_warn!(fragment = %id, "bind declaration produced no data");
        }

        if let Some(element) = self.element_mut(id) {
            element.binding_data = data;
            element.bind_pending = false;
        }
        self.invalidate(id);
    }
}

fn overlay(inherited: Arc<Scope>, own: Option<&Scope>) -> Arc<Scope> {
    match own {
        Some(own) if !own.is_empty() => {
            let mut merged = (*inherited).clone();
            for (key, value) in own {
                merged.insert(key.clone(), value.clone());
            }
            Arc::new(merged)
        }
        _ => inherited,
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use crate::value::{scope_from_json, Value};
    use serde_json::json;

    #[test]
    fn own_keys_replace_inherited_values_wholesale() {
        let (mut tree, queue) = tree("<div><section><p>x</p></section></div>");
        let root = queue.document().lock().root();
        let root_id = tree.get(root).unwrap();
        let div = tree.children(root_id)[0];
        let section = tree.children(div)[0];
        let p = tree.children(section)[0];

        tree.set_binding_data(div, scope_from_json(json!({"user": {"name": "A", "age": 3}, "n": 1})));
        tree.set_binding_data(section, scope_from_json(json!({"user": {"name": "B"}})));

        let scope = tree.scope(p);
        assert_eq!(scope["n"], Value::from(1.0));
        assert_eq!(scope["user"], Value::from(json!({"name": "B"})));
    }

    #[test]
    fn invalidation_reaches_descendants_eagerly() {
        let (mut tree, queue) = tree("<div><p>{{n}}</p></div>");
        let root = queue.document().lock().root();
        let root_id = tree.get(root).unwrap();
        let div = tree.children(root_id)[0];
        let p = tree.children(div)[0];
        let text = tree.children(p)[0];

        tree.set_binding_data(div, scope_from_json(json!({"n": 1})));
        assert_eq!(tree.scope(text)["n"], Value::from(1.0));
        tree.set_binding_data(div, scope_from_json(json!({"n": 2})));
        assert_eq!(tree.scope(text)["n"], Value::from(2.0));
    }

    #[test]
    fn bind_declaration_uses_parent_scope() {
        let (mut tree, queue) = tree(r#"<div><p tr-bind="{ label: user.name }">x</p></div>"#);
        let root = queue.document().lock().root();
        let root_id = tree.get(root).unwrap();
        let div = tree.children(root_id)[0];
        let p = tree.children(div)[0];

        tree.set_binding_data(div, scope_from_json(json!({"user": {"name": "A"}})));
        tree.evaluate_bind(p);
        assert_eq!(tree.binding_data(p).unwrap()["label"], Value::from("A"));
        assert_eq!(tree.scope(p)["user"], Value::from(json!({"name": "A"})));
    }
}
