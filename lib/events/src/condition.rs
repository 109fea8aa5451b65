//! Parsed boolean conditions over event fields.
//!
//! Conditions are parsed once, at filter construction, into a small clause
//! tree; nothing is interpreted at match time. The language is deliberately
//! tiny: conjunctions of field comparisons and containment tests, bound only
//! to the event payload plus the reserved identifiers `topic` and `source`.
//!
//! ```text
//! expr     := clause ( "and" clause )*
//! clause   := field op literal | literal "in" field | field "in" literal
//! op       := "==" | "!=" | ">" | ">=" | "<" | "<="
//! literal  := 'string' | "string" | number | true | false
//! ```
//!
//! A missing field never satisfies a clause, and comparisons over mismatched
//! types evaluate false. Ordered comparisons are numeric only.

use crate::error::ConditionError;
use crate::event::EventRecord;
use serde_json::Value as JsonValue;
use std::fmt;
use std::str::FromStr;

/// Comparison operators usable in a clause.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = match self {
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Lt => "<",
            Self::Le => "<=",
        };
        write!(f, "{symbol}")
    }
}

/// A literal value appearing in a condition.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Str(String),
    Num(f64),
    Bool(bool),
}

/// One conjunct of a condition.
#[derive(Debug, Clone, PartialEq)]
enum Clause {
    /// `field op literal`
    Compare {
        field: String,
        op: CompareOp,
        value: Literal,
    },
    /// `literal in field`: the field's string contains the literal, or the
    /// field's array has an equal element.
    Contains { field: String, needle: Literal },
    /// `field in literal`: the field's string value is a substring of the
    /// literal string.
    Within { field: String, haystack: String },
}

/// A parsed condition expression: a conjunction of clauses.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    clauses: Vec<Clause>,
}

impl Condition {
    /// Parses a condition expression.
    ///
    /// # Errors
    ///
    /// Returns a [`ConditionError`] describing the first offending token when
    /// the expression is empty or malformed.
    pub fn parse(input: &str) -> Result<Self, ConditionError> {
        let tokens = tokenize(input)?;
        if tokens.is_empty() {
            return Err(ConditionError::Empty);
        }

        let mut parser = Parser { tokens, pos: 0 };
        let mut clauses = vec![parser.clause()?];
        while parser.eat_and() {
            clauses.push(parser.clause()?);
        }
        if let Some((position, token)) = parser.peek_raw() {
            return Err(ConditionError::UnexpectedToken {
                position,
                token: token.describe(),
            });
        }

        Ok(Self { clauses })
    }

    /// Evaluates the condition against an event. All clauses must hold.
    #[must_use]
    pub fn evaluate(&self, event: &EventRecord) -> bool {
        self.clauses.iter().all(|clause| clause.evaluate(event))
    }
}

impl FromStr for Condition {
    type Err = ConditionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// A field resolved against one event.
enum Resolved<'a> {
    Text(&'a str),
    Value(&'a JsonValue),
}

fn resolve<'a>(event: &'a EventRecord, field: &str) -> Option<Resolved<'a>> {
    // Reserved identifiers bind to event attributes, not payload keys.
    match field {
        "topic" => Some(Resolved::Text(&event.topic)),
        "source" => Some(Resolved::Text(&event.source)),
        _ => event.payload.get(field).map(Resolved::Value),
    }
}

impl Resolved<'_> {
    fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            Self::Value(v) => v.as_str(),
        }
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Text(_) => None,
            Self::Value(v) => v.as_f64(),
        }
    }

    fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Text(_) => None,
            Self::Value(v) => v.as_bool(),
        }
    }

    fn equals(&self, literal: &Literal) -> bool {
        match literal {
            Literal::Str(s) => self.as_str() == Some(s.as_str()),
            Literal::Num(n) => self.as_f64() == Some(*n),
            Literal::Bool(b) => self.as_bool() == Some(*b),
        }
    }

    fn contains(&self, needle: &Literal) -> bool {
        if let Some(text) = self.as_str() {
            if let Literal::Str(s) = needle {
                return text.contains(s.as_str());
            }
            return false;
        }
        if let Self::Value(JsonValue::Array(items)) = self {
            return items.iter().any(|item| Resolved::Value(item).equals(needle));
        }
        false
    }
}

impl Clause {
    fn evaluate(&self, event: &EventRecord) -> bool {
        match self {
            Self::Compare { field, op, value } => {
                let Some(resolved) = resolve(event, field) else {
                    return false;
                };
                match op {
                    CompareOp::Eq => resolved.equals(value),
                    CompareOp::Ne => match value {
                        // Same-type comparison only; a type mismatch is false
                        // for every operator, including !=.
                        Literal::Str(s) => resolved.as_str().is_some_and(|v| v != s),
                        Literal::Num(n) => resolved.as_f64().is_some_and(|v| v != *n),
                        Literal::Bool(b) => resolved.as_bool().is_some_and(|v| v != *b),
                    },
                    CompareOp::Gt | CompareOp::Ge | CompareOp::Lt | CompareOp::Le => {
                        let (Some(lhs), Literal::Num(rhs)) = (resolved.as_f64(), value) else {
                            return false;
                        };
                        match op {
                            CompareOp::Gt => lhs > *rhs,
                            CompareOp::Ge => lhs >= *rhs,
                            CompareOp::Lt => lhs < *rhs,
                            _ => lhs <= *rhs,
                        }
                    }
                }
            }
            Self::Contains { field, needle } => resolve(event, field)
                .is_some_and(|resolved| resolved.contains(needle)),
            Self::Within { field, haystack } => resolve(event, field)
                .and_then(|resolved| resolved.as_str().map(|s| haystack.contains(s)))
                .unwrap_or(false),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Str(String),
    Num(f64),
    Bool(bool),
    Op(CompareOp),
    And,
    In,
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Self::Ident(s) => s.clone(),
            Self::Str(s) => format!("'{s}'"),
            Self::Num(n) => n.to_string(),
            Self::Bool(b) => b.to_string(),
            Self::Op(op) => op.to_string(),
            Self::And => "and".to_string(),
            Self::In => "in".to_string(),
        }
    }
}

fn tokenize(input: &str) -> Result<Vec<(usize, Token)>, ConditionError> {
    let bytes = input.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i] as char;
        if c.is_ascii_whitespace() {
            i += 1;
            continue;
        }

        let start = i;
        match c {
            '=' | '!' => {
                if bytes.get(i + 1) == Some(&b'=') {
                    let op = if c == '=' { CompareOp::Eq } else { CompareOp::Ne };
                    tokens.push((start, Token::Op(op)));
                    i += 2;
                } else {
                    return Err(ConditionError::UnexpectedToken {
                        position: start,
                        token: c.to_string(),
                    });
                }
            }
            '>' | '<' => {
                let wide = bytes.get(i + 1) == Some(&b'=');
                let op = match (c, wide) {
                    ('>', true) => CompareOp::Ge,
                    ('>', false) => CompareOp::Gt,
                    (_, true) => CompareOp::Le,
                    (_, false) => CompareOp::Lt,
                };
                tokens.push((start, Token::Op(op)));
                i += if wide { 2 } else { 1 };
            }
            '\'' | '"' => {
                let quote = bytes[start];
                let mut j = i + 1;
                while j < bytes.len() && bytes[j] != quote {
                    j += 1;
                }
                if j >= bytes.len() {
                    return Err(ConditionError::UnterminatedString { position: start });
                }
                tokens.push((start, Token::Str(input[i + 1..j].to_string())));
                i = j + 1;
            }
            c if c.is_ascii_digit() || c == '-' => {
                let mut j = i + 1;
                while j < bytes.len()
                    && ((bytes[j] as char).is_ascii_digit() || bytes[j] == b'.')
                {
                    j += 1;
                }
                let text = &input[start..j];
                let value = text.parse::<f64>().map_err(|_| {
                    ConditionError::UnexpectedToken {
                        position: start,
                        token: text.to_string(),
                    }
                })?;
                tokens.push((start, Token::Num(value)));
                i = j;
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let mut j = i + 1;
                while j < bytes.len()
                    && ((bytes[j] as char).is_ascii_alphanumeric() || bytes[j] == b'_')
                {
                    j += 1;
                }
                let word = &input[start..j];
                let token = match word {
                    "and" => Token::And,
                    "in" => Token::In,
                    "true" => Token::Bool(true),
                    "false" => Token::Bool(false),
                    _ => Token::Ident(word.to_string()),
                };
                tokens.push((start, token));
                i = j;
            }
            other => {
                return Err(ConditionError::UnexpectedToken {
                    position: start,
                    token: other.to_string(),
                });
            }
        }
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<(usize, Token)>,
    pos: usize,
}

impl Parser {
    fn peek_raw(&self) -> Option<(usize, &Token)> {
        self.tokens.get(self.pos).map(|(p, t)| (*p, t))
    }

    fn next(&mut self) -> Option<(usize, Token)> {
        let item = self.tokens.get(self.pos).cloned();
        if item.is_some() {
            self.pos += 1;
        }
        item
    }

    fn eat_and(&mut self) -> bool {
        if matches!(self.peek_raw(), Some((_, Token::And))) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn clause(&mut self) -> Result<Clause, ConditionError> {
        let (position, token) = self.next().ok_or(ConditionError::UnexpectedEnd)?;
        match token {
            Token::Ident(field) => self.clause_for_field(field),
            Token::Str(_) | Token::Num(_) | Token::Bool(_) => {
                let needle = match token {
                    Token::Str(s) => Literal::Str(s),
                    Token::Num(n) => Literal::Num(n),
                    Token::Bool(b) => Literal::Bool(b),
                    _ => unreachable!(),
                };
                self.expect_in()?;
                match self.next() {
                    Some((_, Token::Ident(field))) => Ok(Clause::Contains { field, needle }),
                    Some((position, other)) => Err(ConditionError::UnexpectedToken {
                        position,
                        token: other.describe(),
                    }),
                    None => Err(ConditionError::UnexpectedEnd),
                }
            }
            other => Err(ConditionError::UnexpectedToken {
                position,
                token: other.describe(),
            }),
        }
    }

    fn clause_for_field(&mut self, field: String) -> Result<Clause, ConditionError> {
        match self.next() {
            Some((_, Token::Op(op))) => {
                let value = self.literal()?;
                Ok(Clause::Compare { field, op, value })
            }
            Some((_, Token::In)) => match self.next() {
                Some((_, Token::Str(haystack))) => Ok(Clause::Within { field, haystack }),
                Some((position, other)) => Err(ConditionError::UnexpectedToken {
                    position,
                    token: other.describe(),
                }),
                None => Err(ConditionError::UnexpectedEnd),
            },
            Some((position, other)) => Err(ConditionError::UnexpectedToken {
                position,
                token: other.describe(),
            }),
            None => Err(ConditionError::UnexpectedEnd),
        }
    }

    fn expect_in(&mut self) -> Result<(), ConditionError> {
        match self.next() {
            Some((_, Token::In)) => Ok(()),
            Some((position, other)) => Err(ConditionError::UnexpectedToken {
                position,
                token: other.describe(),
            }),
            None => Err(ConditionError::UnexpectedEnd),
        }
    }

    fn literal(&mut self) -> Result<Literal, ConditionError> {
        match self.next() {
            Some((_, Token::Str(s))) => Ok(Literal::Str(s)),
            Some((_, Token::Num(n))) => Ok(Literal::Num(n)),
            Some((_, Token::Bool(b))) => Ok(Literal::Bool(b)),
            Some((position, other)) => Err(ConditionError::UnexpectedToken {
                position,
                token: other.describe(),
            }),
            None => Err(ConditionError::UnexpectedEnd),
        }
    }
}
