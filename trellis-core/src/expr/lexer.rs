//! Expression Tokenizer

use crate::error::EvalError;
use crate::value::parse_number_literal;

/// Punctuators, longest spelling first where prefixes overlap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Punct {
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Comma,
    Colon,
    Dot,
    QuestionDot,
    Question,
    Nullish,
    Plus,
    Minus,
    Star,
    StarStar,
    Slash,
    Percent,
    Bang,
    Lt,
    Le,
    Gt,
    Ge,
    EqEq,
    NotEq,
    EqEqEq,
    NotEqEq,
    AndAnd,
    OrOr,
}

const PUNCTUATORS: &[(&str, Punct)] = &[
    ("===", Punct::EqEqEq),
    ("!==", Punct::NotEqEq),
    ("**", Punct::StarStar),
    ("==", Punct::EqEq),
    ("!=", Punct::NotEq),
    ("<=", Punct::Le),
    (">=", Punct::Ge),
    ("&&", Punct::AndAnd),
    ("||", Punct::OrOr),
    ("??", Punct::Nullish),
    ("?.", Punct::QuestionDot),
    ("(", Punct::LParen),
    (")", Punct::RParen),
    ("[", Punct::LBracket),
    ("]", Punct::RBracket),
    ("{", Punct::LBrace),
    ("}", Punct::RBrace),
    (",", Punct::Comma),
    (":", Punct::Colon),
    (".", Punct::Dot),
    ("?", Punct::Question),
    ("+", Punct::Plus),
    ("-", Punct::Minus),
    ("*", Punct::Star),
    ("/", Punct::Slash),
    ("%", Punct::Percent),
    ("!", Punct::Bang),
    ("<", Punct::Lt),
    (">", Punct::Gt),
];

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum TokenKind {
    Number(f64),
    Str(String),
    Ident(String),
    Punct(Punct),
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Token {
    pub kind: TokenKind,
    /// Byte offset of the token in the source.
    pub offset: usize,
}

/// Split an expression into tokens, terminated by `Eof`.
pub(crate) fn tokenize(source: &str) -> Result<Vec<Token>, EvalError> {
    let bytes = source.as_bytes();
    let mut tokens = Vec::new();
    let mut pos = 0;

    while pos < bytes.len() {
        let c = bytes[pos];

        if c.is_ascii_whitespace() {
            pos += 1;
            continue;
        }

        let start = pos;

        if c.is_ascii_digit() || (c == b'.' && bytes.get(pos + 1).is_some_and(u8::is_ascii_digit)) {
            pos = scan_number(bytes, pos);
            let text = &source[start..pos];
            let value = parse_number_literal(text)
                .ok_or_else(|| EvalError::syntax(format!("invalid number `{text}`"), start))?;
            tokens.push(Token { kind: TokenKind::Number(value), offset: start });
            continue;
        }

        if c == b'"' || c == b'\'' {
            let (value, end) = scan_string(source, pos)?;
            pos = end;
            tokens.push(Token { kind: TokenKind::Str(value), offset: start });
            continue;
        }

        if c.is_ascii_alphabetic() || c == b'_' || c == b'$' {
            while pos < bytes.len()
                && (bytes[pos].is_ascii_alphanumeric() || bytes[pos] == b'_' || bytes[pos] == b'$')
            {
                pos += 1;
            }
            tokens.push(Token {
                kind: TokenKind::Ident(source[start..pos].to_string()),
                offset: start,
            });
            continue;
        }

        let rest = &source[pos..];
        // `?.5` is a conditional followed by a number, not optional chaining.
        let matched = PUNCTUATORS.iter().find(|(text, punct)| {
            rest.starts_with(text)
                && !(*punct == Punct::QuestionDot
                    && bytes.get(pos + 2).is_some_and(u8::is_ascii_digit))
        });
        match matched {
            Some((text, punct)) => {
                pos += text.len();
                tokens.push(Token { kind: TokenKind::Punct(*punct), offset: start });
            }
            None => {
                let ch = rest.chars().next().unwrap_or('?');
                return Err(EvalError::syntax(format!("unexpected character `{ch}`"), start));
            }
        }
    }

    tokens.push(Token { kind: TokenKind::Eof, offset: source.len() });
    Ok(tokens)
}

fn scan_number(bytes: &[u8], mut pos: usize) -> usize {
    if bytes[pos] == b'0' && matches!(bytes.get(pos + 1), Some(b'x' | b'X')) {
        pos += 2;
        while pos < bytes.len() && bytes[pos].is_ascii_hexdigit() {
            pos += 1;
        }
        return pos;
    }
    while pos < bytes.len() && (bytes[pos].is_ascii_digit() || bytes[pos] == b'.') {
        pos += 1;
    }
    if matches!(bytes.get(pos), Some(b'e' | b'E')) {
        let mut probe = pos + 1;
        if matches!(bytes.get(probe), Some(b'+' | b'-')) {
            probe += 1;
        }
        if bytes.get(probe).is_some_and(u8::is_ascii_digit) {
            pos = probe;
            while pos < bytes.len() && bytes[pos].is_ascii_digit() {
                pos += 1;
            }
        }
    }
    pos
}

fn scan_string(source: &str, start: usize) -> Result<(String, usize), EvalError> {
    let mut chars = source[start..].char_indices();
    let (_, quote) = chars.next().ok_or_else(|| EvalError::syntax("expected string", start))?;
    let mut value = String::new();

    while let Some((offset, ch)) = chars.next() {
        match ch {
            c if c == quote => return Ok((value, start + offset + c.len_utf8())),
            '\\' => {
                let (_, escaped) = chars
                    .next()
                    .ok_or_else(|| EvalError::syntax("unterminated escape", start + offset))?;
                match escaped {
                    'n' => value.push('\n'),
                    't' => value.push('\t'),
                    'r' => value.push('\r'),
                    '0' => value.push('\0'),
                    'u' => {
                        let hex: String = chars.by_ref().take(4).map(|(_, c)| c).collect();
                        let decoded = u32::from_str_radix(&hex, 16)
                            .ok()
                            .and_then(char::from_u32)
                            .ok_or_else(|| {
                                EvalError::syntax("invalid unicode escape", start + offset)
                            })?;
                        value.push(decoded);
                    }
                    other => value.push(other),
                }
            }
            other => value.push(other),
        }
    }

    Err(EvalError::syntax("unterminated string literal", start))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        tokenize(source).unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn tokenizes_operators_greedily() {
        assert_eq!(
            kinds("a === b ?? c"),
            vec![
                TokenKind::Ident("a".into()),
                TokenKind::Punct(Punct::EqEqEq),
                TokenKind::Ident("b".into()),
                TokenKind::Punct(Punct::Nullish),
                TokenKind::Ident("c".into()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn optional_chaining_versus_conditional_number() {
        assert_eq!(kinds("a?.b")[1], TokenKind::Punct(Punct::QuestionDot));
        assert_eq!(kinds("a?.5:1")[1], TokenKind::Punct(Punct::Question));
    }

    #[test]
    fn numbers_and_strings() {
        assert_eq!(
            kinds(r#"1.5e2 0xff 'it\'s' "A""#),
            vec![
                TokenKind::Number(150.0),
                TokenKind::Number(255.0),
                TokenKind::Str("it's".into()),
                TokenKind::Str("A".into()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn reports_offsets() {
        let err = tokenize("a # b").unwrap_err();
        assert_eq!(err, EvalError::syntax("unexpected character `#`", 2));

        let err = tokenize("'open").unwrap_err();
        assert!(matches!(err, EvalError::Syntax { position: 0, .. }));
    }
}
