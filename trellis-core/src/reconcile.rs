//! Keyed List Reconciliation
//!
//! Runs for every element carrying a repetition directive:
//!
//! ```html
//! <ul tr-each="users" tr-each-key="id">
//!   <li tr-each-before>header</li>
//!   <li>{{name}}</li>          <!-- template -->
//!   <li tr-each-after>footer</li>
//! </ul>
//! ```
//!
//! # Algorithm
//!
//! 1. On the first run, every child that is not a marker is parked as a
//!    template, text and comments included.
//! 2. Each list item expands into one target per template, identified by
//!    `(item key, template index)`.
//! 3. Live children whose identity is not in the target sequence are
//!    removed.
//! 4. Targets are walked in order. A surviving child with the same identity
//!    is reused, otherwise the template is cloned. The fragment gets the
//!    item as binding data, has its key stamped (elements only), and is
//!    moved to the cursor
//!    (right after the leading markers plus the targets already placed)
//!    unless it is already there. Then it is evaluated.
//!
//! # Keys
//!
//! With `each-key`, the key is that property of the item; a primitive item
//! (only allowed with `each-arg`) is its own key. A missing or `null` key,
//! or no `each-key` at all, yields a fresh random key: such an item is never
//! matched against a previous render.

use std::collections::{HashMap, HashSet};

use ulid::Ulid;

use crate::directive::Directive;
use crate::error::BindError;
use crate::fragment::{FragmentId, FragmentTree, ListKey};
use crate::queue::Priority;
use crate::suppress::WriteKind;
use crate::value::{Scope, Value};
use crate::{dev_debug, dev_error, dev_warn};

/// What one reconciliation pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub created: usize,
    pub reused: usize,
    /// Reused fragments that had to change position.
    pub moved: usize,
    pub removed: usize,
}

impl ReconcileReport {
    /// Whether the pass changed the structure of the list.
    pub fn is_noop(&self) -> bool {
        self.created == 0 && self.moved == 0 && self.removed == 0
    }
}

/// Repetition configuration read from an element's directives.
#[derive(Debug, Clone, Default)]
struct Repetition {
    key: Option<String>,
    index: Option<String>,
    arg: Option<String>,
}

struct Target {
    key: ListKey,
    data: Scope,
}

impl FragmentTree {
    /// Reconcile the children of a repetition element with its list.
    pub fn reconcile(&mut self, id: FragmentId) -> ReconcileReport {
        let mut report = ReconcileReport::default();
        let Some(element) = self.element(id) else {
            return report;
        };
        let Some(list_contents) = element.directive(Directive::Each).map(|s| s.contents.clone()) else {
            return report;
        };
        let modifier = |d: Directive| {
            element
                .directive(d)
                .map(|slot| slot.source.trim().to_string())
                .filter(|s| !s.is_empty())
        };
        let repetition = Repetition {
            key: modifier(Directive::EachKey),
            index: modifier(Directive::EachIndex),
            arg: modifier(Directive::EachArg),
        };

        self.capture_templates(id);
        let templates = self.element(id).map(|e| e.templates.clone()).unwrap_or_default();

        let scope = self.scope(id);
        let list = list_contents.render_value(&self.evaluator, &scope);
        let targets = build_targets(id, &list, &repetition, templates.len());

        // Partition the live children.
        let children = self.children(id).to_vec();
        let mut before = Vec::new();
        let mut after = Vec::new();
        let mut live = Vec::new();
        for child in children {
            match self.element(child) {
                Some(e) if e.has_directive(Directive::EachBefore) => before.push(child),
                Some(e) if e.has_directive(Directive::EachAfter) => after.push(child),
                _ => live.push(child),
            }
        }

        // Remove children absent from the target sequence.
        let wanted: HashSet<&ListKey> = targets.iter().map(|t| &t.key).collect();
        let mut survivors: HashMap<ListKey, FragmentId> = HashMap::new();
        for child in live {
            match self.list_key(child).cloned() {
                Some(key) if wanted.contains(&key) && !survivors.contains_key(&key) => {
                    survivors.insert(key, child);
                }
                _ => {
                    self.remove_child(child);
                    report.removed += 1;
                }
            }
        }

        let key_attribute = self.directives.name(Directive::Key);
        for (i, target) in targets.into_iter().enumerate() {
            let fragment = match survivors.remove(&target.key) {
                Some(existing) => {
                    report.reused += 1;
                    existing
                }
                None => {
                    let Some(created) = templates
                        .get(target.key.template_index)
                        .and_then(|&template| self.instantiate(template))
                    else {
                        continue;
                    };
                    report.created += 1;
                    self.stamp_key(created, &key_attribute, &target.key);
                    created
                }
            };

            let desired = before.len() + i;
            let current = self.children(id).iter().position(|&c| c == fragment);
            if current != Some(desired) {
                if current.is_some() {
                    report.moved += 1;
                }
                let reference = self
                    .children(id)
                    .iter()
                    .copied()
                    .filter(|&c| c != fragment)
                    .nth(desired)
                    .or_else(|| after.first().copied());
                self.insert_before(id, fragment, reference);
            }

            if let Some(row) = self.fragment_mut(fragment) {
                row.list_key = Some(target.key);
            }
            self.set_binding_data(fragment, target.data);
            self.evaluate_all(fragment);
        }

        for marker in before.into_iter().chain(after) {
            self.evaluate_all(marker);
        }

        dev_debug!(
            fragment = %id,
            created = report.created,
            reused = report.reused,
            moved = report.moved,
            removed = report.removed,
            "reconciled list"
        );
        report
    }

    fn capture_templates(&mut self, id: FragmentId) {
        let Some(element) = self.element(id) else {
            return;
        };
        if element.templates_captured {
            return;
        }
        let templates: Vec<FragmentId> = element
            .children
            .iter()
            .copied()
            .filter(|&child| !self.element(child).map_or(false, |e| e.is_marker()))
            .collect();
        for &template in &templates {
            self.park(template);
        }

        if let Some(element) = self.element_mut(id) {
            element.templates = templates;
            element.templates_captured = true;
        }
    }

    fn stamp_key(&self, id: FragmentId, attribute: &str, key: &ListKey) {
        let Some(node) = self.target(id) else {
            return;
        };
        if self.element(id).is_none() {
            return;
        }
        let attribute = attribute.to_string();
        let value = key.item_key.clone();
        self.write(id, WriteKind::Attribute, Priority::NORMAL, "stamp-key", move |doc| {
            doc.set_attribute(node, &attribute, &value)
        });
    }
}

/// Expand the list into targets, one per item and template.
fn build_targets(id: FragmentId, list: &Value, repetition: &Repetition, templates: usize) -> Vec<Target> {
    let entries: Vec<(Value, &Value)> = match list {
        Value::Array(items) => items
            .iter()
            .enumerate()
            .map(|(i, item)| (Value::Number(i as f64), item))
            .collect(),
        Value::Object(map) => map
            .iter()
            .map(|(name, item)| (Value::String(name.clone()), item))
            .collect(),
        Value::Undefined | Value::Null => Vec::new(),
        other => {
            dev_error!(fragment = %id, "{}", BindError::InvalidList(other.kind_name()));
            Vec::new()
        }
    };

    let mut seen = HashSet::new();
    let mut targets = Vec::with_capacity(entries.len() * templates);
    for (position, (index, item)) in entries.into_iter().enumerate() {
        let Some(data) = item_scope(item, &index, repetition) else {
            dev_error!(
                fragment = %id,
                "{}",
                BindError::PrimitiveWithoutArgument { index: position }
            );
            continue;
        };

        let mut item_key = item_key(item, repetition);
        if !seen.insert(item_key.clone()) {
            dev_warn!(fragment = %id, key = %item_key, "duplicate list key; rendering item without reuse");
            item_key = Ulid::new().to_string();
            seen.insert(item_key.clone());
        }

        for template_index in 0..templates {
            targets.push(Target {
                key: ListKey {
                    item_key: item_key.clone(),
                    template_index,
                },
                data: data.clone(),
            });
        }
    }
    targets
}

/// Binding data for one item, or `None` for a primitive without `each-arg`.
fn item_scope(item: &Value, index: &Value, repetition: &Repetition) -> Option<Scope> {
    let mut data = match (&repetition.arg, item) {
        (Some(arg), _) => {
            let mut scope = Scope::new();
            scope.insert(arg.clone(), item.clone());
            scope
        }
        (None, Value::Object(map)) => map.clone(),
        (None, _) => return None,
    };
    if let Some(name) = &repetition.index {
        data.insert(name.clone(), index.clone());
    }
    Some(data)
}

fn item_key(item: &Value, repetition: &Repetition) -> String {
    let Some(selector) = &repetition.key else {
        return Ulid::new().to_string();
    };
    let key = match item {
        Value::Object(_) | Value::Array(_) => item.get(selector),
        primitive => primitive.clone(),
    };
    if key.is_nullish() {
        Ulid::new().to_string()
    } else {
        key.canonical_key()
    }
}
