//! Content Segmentation
//!
//! Text nodes and attribute values are split once, when a fragment is
//! created, into alternating literal and placeholder segments:
//!
//! ```text
//! "Hello {{ user.name }}!"  ->  [Literal("Hello "), Expression("user.name"), Literal("!")]
//! "{{{ html }}}"            ->  [Expression { source: "html", raw: true }]
//! ```
//!
//! `{{{ }}}` marks a raw (unescaped) placeholder and `{{ }}` an escaped one.
//! Scanning is left to right, non-overlapping and non-nested; an
//! unterminated placeholder is literal text.
//!
//! A raw placeholder is only meaningful when it is the whole content. When
//! more than one segment exists every raw segment is demoted to escaped and
//! a usage warning is logged.
//!
//! # Join policy
//!
//! The blank set `{null, undefined, NaN, false}` renders as the empty
//! string inside joined text. For an attribute whose whole value is a
//! single expression the same set instead means *remove the attribute*.

use smallvec::SmallVec;

use crate::dev_warn;
use crate::expr::Evaluator;
use crate::value::{Scope, Value};

const RAW_OPEN: &str = "{{{";
const RAW_CLOSE: &str = "}}}";
const OPEN: &str = "{{";
const CLOSE: &str = "}}";

/// One piece of segmented content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Literal(String),
    Expression { source: String, raw: bool },
}

/// Result of evaluating attribute content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributeValue {
    Set(String),
    Remove,
}

/// Rendered text content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedText {
    pub text: String,
    /// Whether the text should be written unescaped.
    pub raw: bool,
}

/// Immutable segmented content of a text node or attribute value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Contents {
    segments: SmallVec<[Segment; 2]>,
}

impl Contents {
    /// Segment free-form content (text nodes, plain attributes).
    pub fn parse(raw_text: &str) -> Self {
        Self { segments: segment(raw_text) }
    }

    /// Segment a forced-evaluation directive value: literal text without
    /// placeholders is one implicit expression. Raw placeholders are
    /// demoted because attributes are never written unescaped.
    pub fn directive(raw_text: &str) -> Self {
        let mut contents = Self::parse(raw_text);
        if !contents.has_expressions() {
            contents.segments = SmallVec::from_vec(vec![Segment::Expression {
                source: raw_text.trim().to_string(),
                raw: false,
            }]);
        }
        contents.demote_raw("directive attribute");
        contents
    }

    /// The whole value is code; no placeholder scanning at all.
    pub fn code(source: &str) -> Self {
        let mut segments = SmallVec::new();
        segments.push(Segment::Expression {
            source: source.trim().to_string(),
            raw: false,
        });
        Self { segments }
    }

    /// Segment an ordinary attribute value, demoting raw placeholders.
    pub fn attribute(raw_text: &str) -> Self {
        let mut contents = Self::parse(raw_text);
        contents.demote_raw("attribute");
        contents
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn has_expressions(&self) -> bool {
        self.segments
            .iter()
            .any(|s| matches!(s, Segment::Expression { .. }))
    }

    /// The literal source text if there are no expressions.
    pub fn literal(&self) -> Option<String> {
        if self.has_expressions() {
            return None;
        }
        Some(
            self.segments
                .iter()
                .map(|s| match s {
                    Segment::Literal(text) => text.as_str(),
                    Segment::Expression { .. } => "",
                })
                .collect(),
        )
    }

    /// Evaluate to text, joining segments with the blank set collapsed.
    pub fn render_text(&self, evaluator: &Evaluator, scope: &Scope) -> RenderedText {
        let raw = matches!(self.segments.as_slice(), [Segment::Expression { raw: true, .. }]);
        let mut text = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(literal) => text.push_str(literal),
                Segment::Expression { source, .. } => {
                    let value = evaluator.evaluate(source, scope);
                    if !value.is_blank() {
                        text.push_str(&value.to_display_string());
                    }
                }
            }
        }
        RenderedText { text, raw }
    }

    /// Evaluate as an attribute value. A single expression yielding a
    /// blank value removes the attribute.
    pub fn render_attribute(&self, evaluator: &Evaluator, scope: &Scope) -> AttributeValue {
        if let [Segment::Expression { source, .. }] = self.segments.as_slice() {
            let value = evaluator.evaluate(source, scope);
            return if value.is_blank() {
                AttributeValue::Remove
            } else {
                AttributeValue::Set(value.to_display_string())
            };
        }
        AttributeValue::Set(self.render_text(evaluator, scope).text)
    }

    /// Evaluate to a raw value for directives. Only the first expression
    /// counts; extra segments are a usage error.
    pub fn render_value(&self, evaluator: &Evaluator, scope: &Scope) -> Value {
        let mut expressions = self.segments.iter().filter_map(|s| match s {
            Segment::Expression { source, .. } => Some(source.as_str()),
            Segment::Literal(_) => None,
        });
        let Some(first) = expressions.next() else {
            return Value::Null;
        };
        if self.segments.len() > 1 {
            dev_warn!(
                expression = %first,
                segments = self.segments.len(),
                "directive value has multiple segments; using the first expression only"
            );
        }
        evaluator.evaluate(first, scope)
    }

    fn demote_raw(&mut self, context: &str) {
        for segment in self.segments.iter_mut() {
            if let Segment::Expression { raw, source } = segment {
                if *raw {
                    *raw = false;
                    dev_warn!(expression = %source, "raw placeholder not allowed in {}; evaluating escaped", context);
                }
            }
        }
    }
}

/// Split `raw_text` into literal and placeholder segments.
pub fn segment(raw_text: &str) -> SmallVec<[Segment; 2]> {
    let mut segments: SmallVec<[Segment; 2]> = SmallVec::new();
    let mut rest = raw_text;

    while let Some(start) = rest.find(OPEN) {
        let (raw, open, close) = if rest[start..].starts_with(RAW_OPEN)
            && rest[start + RAW_OPEN.len()..].contains(RAW_CLOSE)
        {
            (true, RAW_OPEN, RAW_CLOSE)
        } else {
            (false, OPEN, CLOSE)
        };

        let body_start = start + open.len();
        let Some(body_len) = rest[body_start..].find(close) else {
            break;
        };

        push_literal(&mut segments, &rest[..start]);
        segments.push(Segment::Expression {
            source: rest[body_start..body_start + body_len].trim().to_string(),
            raw,
        });
        rest = &rest[body_start + body_len + close.len()..];
    }
    push_literal(&mut segments, rest);

    if segments.len() > 1 {
        for segment in segments.iter_mut() {
            if let Segment::Expression { source, raw } = segment {
                if *raw {
                    dev_warn!(expression = %source, "raw placeholder mixed with other content; evaluating escaped");
                    *raw = false;
                }
            }
        }
    }
    segments
}

fn push_literal(segments: &mut SmallVec<[Segment; 2]>, text: &str) {
    if text.is_empty() {
        return;
    }
    if let Some(Segment::Literal(previous)) = segments.last_mut() {
        previous.push_str(text);
    } else {
        segments.push(Segment::Literal(text.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::scope_from_json;
    use serde_json::json;

    fn expr(source: &str, raw: bool) -> Segment {
        Segment::Expression { source: source.to_string(), raw }
    }

    fn lit(text: &str) -> Segment {
        Segment::Literal(text.to_string())
    }

    #[test]
    fn splits_literals_and_placeholders() {
        let parts = segment("Hello {{ user.name }}!");
        assert_eq!(parts.as_slice(), &[lit("Hello "), expr("user.name", false), lit("!")]);
    }

    #[test]
    fn raw_only_when_sole_segment() {
        assert_eq!(segment("{{{ html }}}").as_slice(), &[expr("html", true)]);
        assert_eq!(
            segment("<b>{{{ html }}}</b>").as_slice(),
            &[lit("<b>"), expr("html", false), lit("</b>")]
        );
    }

    #[test]
    fn unterminated_placeholder_is_literal() {
        assert_eq!(segment("a {{ b").as_slice(), &[lit("a {{ b")]);
        assert_eq!(segment("{{a}}{{b").as_slice(), &[expr("a", false), lit("{{b")]);
        assert!(segment("").is_empty());
    }

    #[test]
    fn adjacent_placeholders() {
        assert_eq!(segment("{{a}}{{b}}").as_slice(), &[expr("a", false), expr("b", false)]);
    }

    #[test]
    fn directive_values_are_forced_expressions() {
        let contents = Contents::directive(" items.length > 0 ");
        assert_eq!(contents.segments(), &[expr("items.length > 0", false)]);

        let placeholder = Contents::directive("{{{ show }}}");
        assert_eq!(placeholder.segments(), &[expr("show", false)]);
    }

    #[test]
    fn blank_values_collapse_in_text_and_remove_attributes() {
        let evaluator = Evaluator::new();
        let scope = scope_from_json(json!({"n": null, "f": false, "zero": 0}));

        for source in ["n", "f", "missing", "0 / 0"] {
            let text = Contents::parse(&format!("[{{{{{source}}}}}]"));
            assert_eq!(text.render_text(&evaluator, &scope).text, "[]", "text {source}");

            let attribute = Contents::attribute(&format!("{{{{{source}}}}}"));
            assert_eq!(attribute.render_attribute(&evaluator, &scope), AttributeValue::Remove, "attr {source}");
        }

        let zero = Contents::attribute("{{zero}}");
        assert_eq!(zero.render_attribute(&evaluator, &scope), AttributeValue::Set("0".into()));

        let mixed = Contents::attribute("x-{{f}}");
        assert_eq!(mixed.render_attribute(&evaluator, &scope), AttributeValue::Set("x-".into()));
    }

    #[test]
    fn raw_text_rendering() {
        let evaluator = Evaluator::new();
        let scope = scope_from_json(json!({"html": "<i>x</i>"}));
        let rendered = Contents::parse("{{{html}}}").render_text(&evaluator, &scope);
        assert_eq!(rendered, RenderedText { text: "<i>x</i>".into(), raw: true });
    }

    #[test]
    fn render_value_uses_first_expression() {
        let evaluator = Evaluator::new();
        let scope = scope_from_json(json!({"a": 1, "b": 2}));
        let contents = Contents::directive("{{a}} and {{b}}");
        assert_eq!(contents.render_value(&evaluator, &scope), Value::Number(1.0));
    }
}
