//! Directive Vocabulary
//!
//! Directives are reserved attribute names. Each one is accepted under every
//! configured prefix (`tr-if` and `data-tr-if` are synonyms); the engine's
//! own writes (hidden marker, key stamp) use the primary prefix.
//!
//! | Suffix        | Meaning                                              |
//! |---------------|------------------------------------------------------|
//! | `bind`        | Declares binding data (an object expression)         |
//! | `if`          | Visibility                                           |
//! | `each`        | Keyed repetition over a list or object               |
//! | `each-key`    | Property read from each item as its key              |
//! | `each-index`  | Scope name receiving the item index                  |
//! | `each-arg`    | Scope name the item is wrapped under                 |
//! | `each-before` | Marks a child the repetition never touches (leading) |
//! | `each-after`  | Marks a child the repetition never touches (trailing)|
//! | `hidden`      | Written by the engine while hidden                   |
//! | `key`         | Written by the engine on repeated children           |
//!
//! Dispatch goes through [`DirectiveTable::lookup`], a plain name → variant
//! map built once from the prefixes.

use std::collections::HashMap;

/// A directive attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Directive {
    Bind,
    If,
    Each,
    EachKey,
    EachIndex,
    EachArg,
    EachBefore,
    EachAfter,
    Hidden,
    Key,
}

impl Directive {
    pub const ALL: [Directive; 10] = [
        Directive::Bind,
        Directive::If,
        Directive::Each,
        Directive::EachKey,
        Directive::EachIndex,
        Directive::EachArg,
        Directive::EachBefore,
        Directive::EachAfter,
        Directive::Hidden,
        Directive::Key,
    ];

    pub fn suffix(&self) -> &'static str {
        match self {
            Directive::Bind => "bind",
            Directive::If => "if",
            Directive::Each => "each",
            Directive::EachKey => "each-key",
            Directive::EachIndex => "each-index",
            Directive::EachArg => "each-arg",
            Directive::EachBefore => "each-before",
            Directive::EachAfter => "each-after",
            Directive::Hidden => "hidden",
            Directive::Key => "key",
        }
    }

    /// Whole value is one expression even without placeholders.
    pub fn is_forced(&self) -> bool {
        matches!(self, Directive::If | Directive::Each)
    }

    /// Plain-string modifiers and markers; never evaluated.
    pub fn is_static(&self) -> bool {
        matches!(
            self,
            Directive::EachKey
                | Directive::EachIndex
                | Directive::EachArg
                | Directive::EachBefore
                | Directive::EachAfter
        )
    }

    /// Written by the engine itself.
    pub fn is_engine_owned(&self) -> bool {
        matches!(self, Directive::Hidden | Directive::Key)
    }
}

/// Name → directive lookup for a set of prefixes.
#[derive(Debug, Clone)]
pub struct DirectiveTable {
    primary: String,
    table: HashMap<String, Directive>,
}

impl DirectiveTable {
    /// Build the table. The first prefix is primary; an empty list falls
    /// back to the defaults.
    pub fn new<S: AsRef<str>>(prefixes: &[S]) -> Self {
        let prefixes: Vec<&str> = if prefixes.is_empty() {
            DEFAULT_PREFIXES.to_vec()
        } else {
            prefixes.iter().map(|p| p.as_ref()).collect()
        };

        let mut table = HashMap::new();
        for prefix in &prefixes {
            for directive in Directive::ALL {
                table.insert(format!("{}{}", prefix, directive.suffix()), directive);
            }
        }
        Self {
            primary: prefixes[0].to_string(),
            table,
        }
    }

    pub fn lookup(&self, attribute: &str) -> Option<Directive> {
        self.table.get(attribute).copied()
    }

    /// Attribute name under the primary prefix.
    pub fn name(&self, directive: Directive) -> String {
        format!("{}{}", self.primary, directive.suffix())
    }

    pub fn primary_prefix(&self) -> &str {
        &self.primary
    }
}

impl Default for DirectiveTable {
    fn default() -> Self {
        Self::new(DEFAULT_PREFIXES)
    }
}

pub const DEFAULT_PREFIXES: &[&str] = &["tr-", "data-tr-"];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefixes_are_synonyms() {
        let table = DirectiveTable::default();
        assert_eq!(table.lookup("tr-if"), Some(Directive::If));
        assert_eq!(table.lookup("data-tr-if"), Some(Directive::If));
        assert_eq!(table.lookup("data-tr-each-key"), Some(Directive::EachKey));
        assert_eq!(table.lookup("class"), None);
        assert_eq!(table.lookup("tr-unknown"), None);
    }

    #[test]
    fn engine_writes_use_primary_prefix() {
        let table = DirectiveTable::new(&["x-", "data-x-"]);
        assert_eq!(table.name(Directive::Hidden), "x-hidden");
        assert_eq!(table.name(Directive::Key), "x-key");
        assert_eq!(table.lookup("tr-if"), None);
    }

    #[test]
    fn classification() {
        assert!(Directive::If.is_forced() && Directive::Each.is_forced());
        assert!(!Directive::Bind.is_forced());
        assert!(Directive::EachArg.is_static());
        assert!(Directive::Key.is_engine_owned());
    }
}
