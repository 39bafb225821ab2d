//! Visibility directive.
//!
//! A two-state machine per element, `visible` initially:
//!
//! ```text
//!   visible --(blank)--> hidden     save display, display: none, set marker
//!   hidden  --(value)--> visible    restore display, clear marker, re-evaluate
//! ```
//!
//! Same-state evaluations write nothing. While hidden, children are not
//! evaluated at all.
//!
//! The saved display is read from the last value the engine queued for the
//! element when there is one, and from the document otherwise, so pending
//! writes never leak `none` into the saved value.

use super::{FragmentId, FragmentTree};
use crate::directive::Directive;
use crate::queue::Priority;
use crate::suppress::WriteKind;
use crate::dev_debug;

impl FragmentTree {
    /// Run the visibility directive. Returns whether the element is visible.
    pub(crate) fn apply_visibility(&mut self, id: FragmentId) -> bool {
        let Some(contents) = self
            .element(id)
            .and_then(|e| e.directive(Directive::If))
            .map(|slot| slot.contents.clone())
        else {
            return true;
        };
        let scope = self.scope(id);
        let visible = !contents.render_value(&self.evaluator, &scope).is_blank();

        match (self.is_hidden(id), visible) {
            (false, false) => {
                self.hide(id);
                false
            }
            (true, true) => {
                self.show(id);
                true
            }
            (hidden, _) => !hidden,
        }
    }

    fn hide(&mut self, id: FragmentId) {
        let Some(node) = self.target(id) else {
            return;
        };
        let shadow = self.element(id).and_then(|e| e.visibility.display_shadow.clone());
        let current = match shadow {
            Some(queued) => queued,
            None => self.queue.document().lock().style_display(node),
        };

        let Some(element) = self.element_mut(id) else {
            return;
        };
        element.visibility.hidden = true;
        element.visibility.saved_display = current;
        element.visibility.display_shadow = Some(Some("none".to_string()));
        dev_debug!(fragment = %id, "hiding");

        let marker = self.directives.name(Directive::Hidden);
        self.write(id, WriteKind::Attribute, Priority::HIGH, "hide", move |doc| {
            doc.set_style_display(node, Some("none"))?;
            doc.set_attribute(node, &marker, "")
        });
    }

    /// Restore the saved display. No-op unless hidden.
    pub(crate) fn show(&mut self, id: FragmentId) {
        let Some(node) = self.target(id) else {
            return;
        };
        let Some(element) = self.element_mut(id) else {
            return;
        };
        if !element.visibility.hidden {
            return;
        }
        let restore = element.visibility.saved_display.take();
        element.visibility.hidden = false;
        element.visibility.display_shadow = Some(restore.clone());
        dev_debug!(fragment = %id, "showing");

        let marker = self.directives.name(Directive::Hidden);
        self.write(id, WriteKind::Attribute, Priority::HIGH, "show", move |doc| {
            doc.set_style_display(node, restore.as_deref())?;
            doc.remove_attribute(node, &marker).map(|_| ())
        });
    }
}
