//! Markup reader.
//!
//! A small, strict reader for the markup subset the engine needs: elements
//! with quoted, unquoted or bare attributes, text, comments, void elements,
//! self-closing tags and the five predefined character references. Closing
//! tags must match; anything else is a [`DomError::Parse`].

use indexmap::IndexMap;

use super::{Document, NodeData, NodeHandle};
use crate::error::DomError;

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source", "track", "wbr",
];

pub(crate) fn is_void(tag: &str) -> bool {
    VOID_ELEMENTS.contains(&tag)
}

impl Document {
    /// Build a document whose root holds the parsed markup.
    pub fn parse(markup: &str) -> Result<Self, DomError> {
        let mut doc = Document::new();
        let root = doc.root();
        for node in doc.parse_fragment(markup)? {
            doc.attach_silently(root, node);
        }
        Ok(doc)
    }

    /// Parse markup into detached top-level nodes. No records are produced.
    pub fn parse_fragment(&mut self, markup: &str) -> Result<Vec<NodeHandle>, DomError> {
        Reader { doc: self, src: markup, pos: 0 }.read()
    }
}

struct Reader<'a> {
    doc: &'a mut Document,
    src: &'a str,
    pos: usize,
}

impl<'a> Reader<'a> {
    fn read(mut self) -> Result<Vec<NodeHandle>, DomError> {
        let mut top = Vec::new();
        // Open elements, innermost last.
        let mut stack: Vec<(NodeHandle, String)> = Vec::new();

        while self.pos < self.src.len() {
            let rest = &self.src[self.pos..];
            let node = if rest.starts_with("<!--") {
                Some(self.comment()?)
            } else if rest.starts_with("</") {
                let tag = self.closing_tag()?;
                match stack.pop() {
                    Some((_, open)) if open == tag => None,
                    Some((_, open)) => {
                        return Err(self.error(format!("expected </{}>, found </{}>", open, tag)))
                    }
                    None => return Err(self.error(format!("unexpected </{}>", tag))),
                }
            } else if rest.starts_with('<') {
                let (handle, tag, open) = self.opening_tag()?;
                self.place(handle, &stack, &mut top);
                if open {
                    stack.push((handle, tag));
                }
                continue;
            } else {
                Some(self.text())
            };

            if let Some(handle) = node {
                self.place(handle, &stack, &mut top);
            }
        }

        if let Some((_, open)) = stack.pop() {
            return Err(self.error(format!("unclosed <{}>", open)));
        }
        Ok(top)
    }

    fn place(&mut self, handle: NodeHandle, stack: &[(NodeHandle, String)], top: &mut Vec<NodeHandle>) {
        match stack.last() {
            Some((parent, _)) => self.doc.attach_silently(*parent, handle),
            None => top.push(handle),
        }
    }

    fn comment(&mut self) -> Result<NodeHandle, DomError> {
        let body_start = self.pos + 4;
        let Some(len) = self.src[body_start..].find("-->") else {
            return Err(self.error("unterminated comment"));
        };
        let text = self.src[body_start..body_start + len].to_string();
        self.pos = body_start + len + 3;
        Ok(self.doc.create_node(NodeData::Comment(text)))
    }

    fn text(&mut self) -> NodeHandle {
        let rest = &self.src[self.pos..];
        let len = rest.find('<').unwrap_or(rest.len());
        let content = decode_entities(&rest[..len]);
        self.pos += len;
        self.doc.create_node(NodeData::Text { content, raw: false })
    }

    fn closing_tag(&mut self) -> Result<String, DomError> {
        self.pos += 2;
        let tag = self.name();
        self.skip_whitespace();
        if !self.eat('>') {
            return Err(self.error("expected `>` after closing tag"));
        }
        Ok(tag)
    }

    /// Returns the element, its tag and whether it stays open.
    fn opening_tag(&mut self) -> Result<(NodeHandle, String, bool), DomError> {
        self.pos += 1;
        let tag = self.name();
        if tag.is_empty() {
            return Err(self.error("expected tag name"));
        }

        let mut attributes = IndexMap::new();
        let self_closing = loop {
            self.skip_whitespace();
            if self.eat('>') {
                break false;
            }
            if self.src[self.pos..].starts_with("/>") {
                self.pos += 2;
                break true;
            }
            let name = self.name();
            if name.is_empty() {
                return Err(self.error(format!("malformed attribute in <{}>", tag)));
            }
            self.skip_whitespace();
            let value = if self.eat('=') {
                self.skip_whitespace();
                self.attribute_value()?
            } else {
                String::new()
            };
            attributes.insert(name, value);
        };

        let open = !self_closing && !is_void(&tag);
        let handle = self.doc.create_node(NodeData::Element {
            tag: tag.clone(),
            attributes,
        });
        Ok((handle, tag, open))
    }

    fn attribute_value(&mut self) -> Result<String, DomError> {
        let rest = &self.src[self.pos..];
        if let Some(quote) = rest.chars().next().filter(|c| *c == '"' || *c == '\'') {
            let Some(len) = rest[1..].find(quote) else {
                return Err(self.error("unterminated attribute value"));
            };
            let value = decode_entities(&rest[1..1 + len]);
            self.pos += len + 2;
            return Ok(value);
        }
        let len = rest
            .find(|c: char| c.is_whitespace() || c == '>')
            .unwrap_or(rest.len());
        let value = decode_entities(&rest[..len]);
        self.pos += len;
        Ok(value)
    }

    fn name(&mut self) -> String {
        let rest = &self.src[self.pos..];
        let len = rest
            .find(|c: char| c.is_whitespace() || matches!(c, '>' | '/' | '=' | '<'))
            .unwrap_or(rest.len());
        self.pos += len;
        rest[..len].to_ascii_lowercase()
    }

    fn skip_whitespace(&mut self) {
        let rest = &self.src[self.pos..];
        self.pos += rest.len() - rest.trim_start().len();
    }

    fn eat(&mut self, expected: char) -> bool {
        if self.src[self.pos..].starts_with(expected) {
            self.pos += expected.len_utf8();
            true
        } else {
            false
        }
    }

    fn error(&self, message: impl Into<String>) -> DomError {
        DomError::Parse {
            message: message.into(),
            position: self.pos,
        }
    }
}

fn decode_entities(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_nested_markup() {
        let doc = Document::parse(r#"<ul tr-each="users"><li class=row>{{name}}</li><!-- note --></ul>"#).unwrap();
        let ul = doc.children(doc.root())[0];
        assert_eq!(doc.tag(ul), Some("ul"));
        assert_eq!(doc.attribute(ul, "tr-each"), Some("users"));

        let li = doc.children(ul)[0];
        assert_eq!(doc.attribute(li, "class"), Some("row"));
        assert_eq!(doc.text_content(li), "{{name}}");
        assert!(matches!(doc.data(doc.children(ul)[1]), Some(NodeData::Comment(c)) if c == " note "));
        assert_eq!(doc.pending_records(), 0);
    }

    #[test]
    fn void_and_self_closing_elements() {
        let doc = Document::parse(r#"<p>a<br>b<span/><input disabled value='x'></p>"#).unwrap();
        let p = doc.children(doc.root())[0];
        assert_eq!(doc.children(p).len(), 5);
        let input = doc.elements_by_tag(p, "input")[0];
        assert_eq!(doc.attribute(input, "disabled"), Some(""));
        assert_eq!(doc.attribute(input, "value"), Some("x"));
    }

    #[test]
    fn entities_decode_and_reencode() {
        let doc = Document::parse("<p title=\"a &amp; b\">1 &lt; 2</p>").unwrap();
        assert_eq!(doc.html(), "<p title=\"a &amp; b\">1 &lt; 2</p>");
    }

    #[test]
    fn mismatched_tags_fail() {
        assert!(matches!(Document::parse("<p></div>"), Err(DomError::Parse { .. })));
        assert!(matches!(Document::parse("<p>"), Err(DomError::Parse { .. })));
        assert!(matches!(Document::parse("</p>"), Err(DomError::Parse { .. })));
        assert!(matches!(Document::parse("<p a=\"x></p>"), Err(DomError::Parse { .. })));
    }
}
