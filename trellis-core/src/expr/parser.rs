//! Expression Parser
//!
//! Precedence-climbing parser producing the [`Expr`] tree. Identifiers are
//! left unresolved here; the compiler binds them to parameter slots once
//! the scope's variable names are known.
//!
//! Precedence, lowest first:
//!
//! | level | operators            | associativity |
//! |-------|----------------------|---------------|
//! | 1     | `?:`                 | right         |
//! | 2     | `??` `\|\|`          | left          |
//! | 3     | `&&`                 | left          |
//! | 4     | `==` `!=` `===` `!==`| left          |
//! | 5     | `<` `<=` `>` `>=`    | left          |
//! | 6     | `+` `-`              | left          |
//! | 7     | `*` `/` `%`          | left          |
//! | 8     | `**`                 | right         |
//! | 9     | unary `!` `-` `+` `typeof` | prefix  |
//! | 10    | `.` `?.` `[]` `()`   | postfix       |

use crate::error::EvalError;
use crate::value::Value;

use super::lexer::{tokenize, Punct, Token, TokenKind};

/// Maximum nesting of sub-expressions, and maximum height of the
/// resulting tree.
pub const MAX_DEPTH: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
    Plus,
    TypeOf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Pow,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    NotEq,
    StrictEq,
    StrictNotEq,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
    Nullish,
}

/// Where a resolved identifier reads its value from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    /// Index into the compiled expression's parameter list.
    Param(usize),
    /// A safe builtin namespace or function.
    Global(super::builtins::Global),
    /// A sandboxed or unknown name; always reads as `undefined`.
    Shadowed,
}

/// Expression tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    /// Unresolved identifier (parser output only).
    Ident(String),
    /// Resolved identifier (compiler output only).
    Var(Slot),
    Array(Vec<Expr>),
    Object(Vec<(String, Expr)>),
    Member {
        object: Box<Expr>,
        property: String,
        optional: bool,
    },
    Index {
        object: Box<Expr>,
        index: Box<Expr>,
        optional: bool,
    },
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Logical {
        op: LogicalOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Conditional {
        test: Box<Expr>,
        consequent: Box<Expr>,
        alternate: Box<Expr>,
    },
}

/// Parse a complete expression.
pub fn parse(source: &str) -> Result<Expr, EvalError> {
    let tokens = tokenize(source)?;
    let mut parser = Parser { tokens, pos: 0, depth: 0, height: 0 };
    let expr = parser.parse_conditional()?;
    match parser.peek() {
        TokenKind::Eof => Ok(expr),
        other => Err(EvalError::syntax(
            format!("unexpected {}", describe(other)),
            parser.offset(),
        )),
    }
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
    /// Height of the expression built last.
    height: usize,
}

impl Parser {
    fn peek(&self) -> &TokenKind {
        &self.tokens[self.pos.min(self.tokens.len() - 1)].kind
    }

    fn offset(&self) -> usize {
        self.tokens[self.pos.min(self.tokens.len() - 1)].offset
    }

    fn advance(&mut self) -> TokenKind {
        let kind = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        kind
    }

    fn eat(&mut self, punct: Punct) -> bool {
        if *self.peek() == TokenKind::Punct(punct) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, punct: Punct, what: &str) -> Result<(), EvalError> {
        if self.eat(punct) {
            Ok(())
        } else {
            Err(EvalError::syntax(
                format!("expected {what}, found {}", describe(self.peek())),
                self.offset(),
            ))
        }
    }

    fn set_height(&mut self, height: usize) -> Result<(), EvalError> {
        if height > MAX_DEPTH {
            return Err(EvalError::TooDeep(MAX_DEPTH));
        }
        self.height = height;
        Ok(())
    }

    fn leaf(&mut self, expr: Expr) -> Result<Expr, EvalError> {
        self.height = 1;
        Ok(expr)
    }

    fn nested<T>(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<T, EvalError>,
    ) -> Result<T, EvalError> {
        if self.depth + 1 >= MAX_DEPTH {
            return Err(EvalError::TooDeep(MAX_DEPTH));
        }
        self.depth += 1;
        let result = f(self);
        self.depth -= 1;
        result
    }

    fn parse_conditional(&mut self) -> Result<Expr, EvalError> {
        self.nested(|p| {
            let test = p.parse_binary(2)?;
            if !p.eat(Punct::Question) {
                return Ok(test);
            }
            let mut height = p.height;
            let consequent = p.parse_conditional()?;
            height = height.max(p.height);
            p.expect(Punct::Colon, "`:`")?;
            let alternate = p.parse_conditional()?;
            p.set_height(height.max(p.height) + 1)?;
            Ok(Expr::Conditional {
                test: Box::new(test),
                consequent: Box::new(consequent),
                alternate: Box::new(alternate),
            })
        })
    }

    fn parse_binary(&mut self, min_level: u8) -> Result<Expr, EvalError> {
        if min_level > 8 {
            return self.parse_unary();
        }
        let mut lhs = self.parse_binary(min_level + 1)?;
        let mut height = self.height;

        while let Some(op) = operator_at(self.peek(), min_level) {
            self.advance();

            // `**` is right-associative: recurse at the same level.
            let rhs = if min_level == 8 {
                self.nested(|p| p.parse_binary(8))?
            } else {
                self.parse_binary(min_level + 1)?
            };
            height = height.max(self.height) + 1;
            self.set_height(height)?;
            lhs = match op {
                Op::Logical(op) => Expr::Logical { op, lhs: Box::new(lhs), rhs: Box::new(rhs) },
                Op::Binary(op) => Expr::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs) },
            };
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr, EvalError> {
        let op = match self.peek() {
            TokenKind::Punct(Punct::Bang) => Some(UnaryOp::Not),
            TokenKind::Punct(Punct::Minus) => Some(UnaryOp::Neg),
            TokenKind::Punct(Punct::Plus) => Some(UnaryOp::Plus),
            TokenKind::Ident(name) if name == "typeof" => Some(UnaryOp::TypeOf),
            _ => None,
        };
        match op {
            Some(op) => {
                self.advance();
                let operand = self.nested(Self::parse_unary)?;
                self.set_height(self.height + 1)?;
                Ok(Expr::Unary { op, operand: Box::new(operand) })
            }
            None => self.parse_postfix(),
        }
    }

    fn parse_postfix(&mut self) -> Result<Expr, EvalError> {
        let mut expr = self.parse_primary()?;
        let mut height = self.height;

        loop {
            let optional = self.eat(Punct::QuestionDot);
            let (next, child) = match self.peek().clone() {
                TokenKind::Ident(name) if optional => {
                    self.advance();
                    (Expr::Member { object: Box::new(expr), property: name, optional }, 0)
                }
                TokenKind::Punct(Punct::Dot) if !optional => {
                    self.advance();
                    match self.advance() {
                        TokenKind::Ident(name) => {
                            (Expr::Member { object: Box::new(expr), property: name, optional }, 0)
                        }
                        other => {
                            return Err(EvalError::syntax(
                                format!("expected property name, found {}", describe(&other)),
                                self.offset(),
                            ))
                        }
                    }
                }
                TokenKind::Punct(Punct::LBracket) => {
                    self.advance();
                    let index = self.parse_conditional()?;
                    self.expect(Punct::RBracket, "`]`")?;
                    (
                        Expr::Index { object: Box::new(expr), index: Box::new(index), optional },
                        self.height,
                    )
                }
                TokenKind::Punct(Punct::LParen) if !optional => {
                    self.advance();
                    let args = self.parse_list(Punct::RParen, Self::parse_conditional)?;
                    (Expr::Call { callee: Box::new(expr), args }, self.height)
                }
                other if optional => {
                    return Err(EvalError::syntax(
                        format!("unexpected {} after `?.`", describe(&other)),
                        self.offset(),
                    ))
                }
                _ => return Ok(expr),
            };
            height = height.max(child) + 1;
            self.set_height(height)?;
            expr = next;
        }
    }

    fn parse_primary(&mut self) -> Result<Expr, EvalError> {
        let offset = self.offset();
        match self.advance() {
            TokenKind::Number(n) => self.leaf(Expr::Literal(Value::Number(n))),
            TokenKind::Str(s) => self.leaf(Expr::Literal(Value::String(s))),
            TokenKind::Ident(name) => self.leaf(match name.as_str() {
                "true" => Expr::Literal(Value::Bool(true)),
                "false" => Expr::Literal(Value::Bool(false)),
                "null" => Expr::Literal(Value::Null),
                _ => Expr::Ident(name),
            }),
            TokenKind::Punct(Punct::LParen) => {
                let inner = self.parse_conditional()?;
                self.expect(Punct::RParen, "`)`")?;
                Ok(inner)
            }
            TokenKind::Punct(Punct::LBracket) => {
                let items = self.parse_list(Punct::RBracket, Self::parse_conditional)?;
                self.set_height(self.height + 1)?;
                Ok(Expr::Array(items))
            }
            TokenKind::Punct(Punct::LBrace) => {
                let entries = self.parse_list(Punct::RBrace, Self::parse_entry)?;
                self.set_height(self.height + 1)?;
                Ok(Expr::Object(entries))
            }
            other => Err(EvalError::syntax(format!("unexpected {}", describe(&other)), offset)),
        }
    }

    fn parse_entry(&mut self) -> Result<(String, Expr), EvalError> {
        let offset = self.offset();
        let key = match self.advance() {
            TokenKind::Ident(name) => name,
            TokenKind::Str(s) => s,
            TokenKind::Number(n) => crate::value::format_number(n),
            other => {
                return Err(EvalError::syntax(
                    format!("expected object key, found {}", describe(&other)),
                    offset,
                ))
            }
        };
        // `{ name }` shorthand.
        if matches!(self.peek(), TokenKind::Punct(Punct::Comma | Punct::RBrace)) {
            self.height = 1;
            return Ok((key.clone(), Expr::Ident(key)));
        }
        self.expect(Punct::Colon, "`:`")?;
        let value = self.parse_conditional()?;
        Ok((key, value))
    }

    /// Comma-separated list closed by `close`; trailing comma allowed.
    /// Leaves the tallest item's height behind.
    fn parse_list<T>(
        &mut self,
        close: Punct,
        mut item: impl FnMut(&mut Self) -> Result<T, EvalError>,
    ) -> Result<Vec<T>, EvalError> {
        self.nested(|p| {
            let mut items = Vec::new();
            let mut tallest = 0;
            loop {
                if p.eat(close) {
                    p.height = tallest;
                    return Ok(items);
                }
                items.push(item(p)?);
                tallest = tallest.max(p.height);
                if !p.eat(Punct::Comma) {
                    p.expect(close, "closing delimiter")?;
                    p.height = tallest;
                    return Ok(items);
                }
            }
        })
    }
}

enum Op {
    Binary(BinaryOp),
    Logical(LogicalOp),
}

fn operator_at(token: &TokenKind, level: u8) -> Option<Op> {
    let TokenKind::Punct(punct) = token else {
        return None;
    };
    let op = match (level, punct) {
        (2, Punct::Nullish) => Op::Logical(LogicalOp::Nullish),
        (2, Punct::OrOr) => Op::Logical(LogicalOp::Or),
        (3, Punct::AndAnd) => Op::Logical(LogicalOp::And),
        (4, Punct::EqEq) => Op::Binary(BinaryOp::Eq),
        (4, Punct::NotEq) => Op::Binary(BinaryOp::NotEq),
        (4, Punct::EqEqEq) => Op::Binary(BinaryOp::StrictEq),
        (4, Punct::NotEqEq) => Op::Binary(BinaryOp::StrictNotEq),
        (5, Punct::Lt) => Op::Binary(BinaryOp::Lt),
        (5, Punct::Le) => Op::Binary(BinaryOp::Le),
        (5, Punct::Gt) => Op::Binary(BinaryOp::Gt),
        (5, Punct::Ge) => Op::Binary(BinaryOp::Ge),
        (6, Punct::Plus) => Op::Binary(BinaryOp::Add),
        (6, Punct::Minus) => Op::Binary(BinaryOp::Sub),
        (7, Punct::Star) => Op::Binary(BinaryOp::Mul),
        (7, Punct::Slash) => Op::Binary(BinaryOp::Div),
        (7, Punct::Percent) => Op::Binary(BinaryOp::Rem),
        (8, Punct::StarStar) => Op::Binary(BinaryOp::Pow),
        _ => return None,
    };
    Some(op)
}

fn describe(token: &TokenKind) -> String {
    match token {
        TokenKind::Number(n) => format!("number {n}"),
        TokenKind::Str(_) => "string".to_string(),
        TokenKind::Ident(name) => format!("`{name}`"),
        TokenKind::Punct(p) => format!("{p:?}"),
        TokenKind::Eof => "end of expression".to_string(),
    }
}
