//! Constrained boolean expressions used by consistency rules.
//!
//! The language covers comparisons between columns and literals combined with
//! `and`, `or`, `not` and parentheses, plus `is [not] null` and
//! `[not] in (...)`. There are no function calls and no arithmetic.

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;

use silverline_core::ColumnType;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExpressionError {
    #[error("syntax error at {position}: {message}")]
    Syntax { position: usize, message: String },
    #[error("unknown column: {0}")]
    UnknownColumn(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    fn holds(&self, ordering: Ordering) -> bool {
        match self {
            CompareOp::Eq => ordering == Ordering::Equal,
            CompareOp::Ne => ordering != Ordering::Equal,
            CompareOp::Lt => ordering == Ordering::Less,
            CompareOp::Le => ordering != Ordering::Greater,
            CompareOp::Gt => ordering == Ordering::Greater,
            CompareOp::Ge => ordering != Ordering::Less,
        }
    }
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = match self {
            CompareOp::Eq => "=",
            CompareOp::Ne => "!=",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
        };
        f.write_str(symbol)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Number(f64),
    Text(String),
    Bool(bool),
    Null,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Column(String),
    Literal(Literal),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    Or(Box<Expression>, Box<Expression>),
    And(Box<Expression>, Box<Expression>),
    Not(Box<Expression>),
    Compare {
        left: Operand,
        op: CompareOp,
        right: Operand,
    },
    IsNull {
        operand: Operand,
        negated: bool,
    },
    InList {
        operand: Operand,
        items: Vec<Literal>,
        negated: bool,
    },
}

impl Expression {
    pub fn parse(source: &str) -> Result<Expression, ExpressionError> {
        let tokens = tokenize(source)?;
        let mut parser = Parser {
            tokens,
            position: 0,
        };
        let expression = parser.parse_or()?;
        if let Some((offset, token)) = parser.peek_with_offset() {
            return Err(ExpressionError::Syntax {
                position: offset,
                message: format!("unexpected {token}"),
            });
        }
        Ok(expression)
    }

    /// Distinct columns referenced anywhere in the expression.
    pub fn columns(&self) -> BTreeSet<String> {
        let mut columns = BTreeSet::new();
        self.collect_columns(&mut columns);
        columns
    }

    fn collect_columns(&self, out: &mut BTreeSet<String>) {
        match self {
            Expression::Or(left, right) | Expression::And(left, right) => {
                left.collect_columns(out);
                right.collect_columns(out);
            }
            Expression::Not(inner) => inner.collect_columns(out),
            Expression::Compare { left, right, .. } => {
                add_column(out, left);
                add_column(out, right);
            }
            Expression::IsNull { operand, .. } | Expression::InList { operand, .. } => {
                add_column(out, operand)
            }
        }
    }

    /// Evaluate against one record. Comparisons touching a null are false.
    pub fn evaluate<'r>(
        &self,
        lookup: &dyn Fn(&str) -> Option<Option<&'r str>>,
    ) -> Result<bool, ExpressionError> {
        match self {
            Expression::Or(left, right) => Ok(left.evaluate(lookup)? || right.evaluate(lookup)?),
            Expression::And(left, right) => Ok(left.evaluate(lookup)? && right.evaluate(lookup)?),
            Expression::Not(inner) => Ok(!inner.evaluate(lookup)?),
            Expression::Compare { left, op, right } => {
                let left = resolve(left, lookup)?;
                let right = resolve(right, lookup)?;
                Ok(compare(&left, &right).is_some_and(|ordering| op.holds(ordering)))
            }
            Expression::IsNull { operand, negated } => {
                let is_null = matches!(resolve(operand, lookup)?, Value::Null);
                Ok(is_null != *negated)
            }
            Expression::InList {
                operand,
                items,
                negated,
            } => {
                let value = resolve(operand, lookup)?;
                if matches!(value, Value::Null) {
                    return Ok(false);
                }
                let found = items.iter().any(|item| {
                    compare(&value, &Value::from_literal(item)) == Some(Ordering::Equal)
                });
                Ok(found != *negated)
            }
        }
    }
}

fn add_column(out: &mut BTreeSet<String>, operand: &Operand) {
    if let Operand::Column(name) = operand {
        out.insert(name.clone());
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Value<'a> {
    Null,
    Raw(&'a str),
    Number(f64),
    Text(String),
    Bool(bool),
}

impl<'a> Value<'a> {
    fn from_literal(literal: &Literal) -> Value<'a> {
        match literal {
            Literal::Number(value) => Value::Number(*value),
            Literal::Text(value) => Value::Text(value.clone()),
            Literal::Bool(value) => Value::Bool(*value),
            Literal::Null => Value::Null,
        }
    }

    fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(value) => Some(*value),
            Value::Raw(raw) => ColumnType::Float.coerce(raw).ok()?.as_f64(),
            _ => None,
        }
    }

    fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(value) => Some(*value),
            Value::Raw(raw) => match ColumnType::Boolean.coerce(raw).ok()? {
                silverline_core::Scalar::Bool(value) => Some(value),
                _ => None,
            },
            _ => None,
        }
    }

    fn as_text(&self) -> Option<String> {
        match self {
            Value::Raw(raw) => Some(raw.to_string()),
            Value::Text(text) => Some(text.clone()),
            Value::Number(value) => Some(value.to_string()),
            Value::Bool(value) => Some(value.to_string()),
            Value::Null => None,
        }
    }
}

fn resolve<'r>(
    operand: &Operand,
    lookup: &dyn Fn(&str) -> Option<Option<&'r str>>,
) -> Result<Value<'r>, ExpressionError> {
    match operand {
        Operand::Literal(literal) => Ok(Value::from_literal(literal)),
        Operand::Column(name) => match lookup(name) {
            None => Err(ExpressionError::UnknownColumn(name.clone())),
            Some(None) => Ok(Value::Null),
            Some(Some(raw)) => Ok(Value::Raw(raw)),
        },
    }
}

/// Booleans compare when either side is a boolean literal, numbers when both
/// sides are numeric, text otherwise. String literals always compare as text.
fn compare(left: &Value<'_>, right: &Value<'_>) -> Option<Ordering> {
    if matches!(left, Value::Null) || matches!(right, Value::Null) {
        return None;
    }
    if matches!(left, Value::Bool(_)) || matches!(right, Value::Bool(_)) {
        return Some(left.as_bool()?.cmp(&right.as_bool()?));
    }
    if let (Some(l), Some(r)) = (left.as_number(), right.as_number()) {
        return l.partial_cmp(&r);
    }
    Some(left.as_text()?.cmp(&right.as_text()?))
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Number(f64),
    Text(String),
    Op(CompareOp),
    LParen,
    RParen,
    Comma,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Ident(name) => write!(f, "'{name}'"),
            Token::Number(value) => write!(f, "number {value}"),
            Token::Text(value) => write!(f, "string '{value}'"),
            Token::Op(op) => write!(f, "operator {op}"),
            Token::LParen => f.write_str("'('"),
            Token::RParen => f.write_str("')'"),
            Token::Comma => f.write_str("','"),
        }
    }
}

fn syntax(position: usize, message: impl Into<String>) -> ExpressionError {
    ExpressionError::Syntax {
        position,
        message: message.into(),
    }
}

fn tokenize(source: &str) -> Result<Vec<(usize, Token)>, ExpressionError> {
    let chars: Vec<(usize, char)> = source.char_indices().collect();
    let mut tokens = Vec::new();
    let mut idx = 0;

    while idx < chars.len() {
        let (offset, ch) = chars[idx];
        if ch.is_whitespace() {
            idx += 1;
            continue;
        }
        match ch {
            '(' => {
                tokens.push((offset, Token::LParen));
                idx += 1;
            }
            ')' => {
                tokens.push((offset, Token::RParen));
                idx += 1;
            }
            ',' => {
                tokens.push((offset, Token::Comma));
                idx += 1;
            }
            '=' => {
                tokens.push((offset, Token::Op(CompareOp::Eq)));
                idx += 1;
            }
            '!' | '<' | '>' => {
                let next = chars.get(idx + 1).map(|(_, c)| *c);
                let (op, width) = match (ch, next) {
                    ('!', Some('=')) => (CompareOp::Ne, 2),
                    ('<', Some('>')) => (CompareOp::Ne, 2),
                    ('<', Some('=')) => (CompareOp::Le, 2),
                    ('>', Some('=')) => (CompareOp::Ge, 2),
                    ('<', _) => (CompareOp::Lt, 1),
                    ('>', _) => (CompareOp::Gt, 1),
                    _ => return Err(syntax(offset, "expected '!='")),
                };
                tokens.push((offset, Token::Op(op)));
                idx += width;
            }
            '\'' => {
                let mut text = String::new();
                idx += 1;
                loop {
                    match chars.get(idx) {
                        None => return Err(syntax(offset, "unterminated string")),
                        Some((_, '\'')) if chars.get(idx + 1).map(|(_, c)| *c) == Some('\'') => {
                            text.push('\'');
                            idx += 2;
                        }
                        Some((_, '\'')) => {
                            idx += 1;
                            break;
                        }
                        Some((_, c)) => {
                            text.push(*c);
                            idx += 1;
                        }
                    }
                }
                tokens.push((offset, Token::Text(text)));
            }
            '"' => {
                let mut name = String::new();
                idx += 1;
                loop {
                    match chars.get(idx) {
                        None => return Err(syntax(offset, "unterminated quoted identifier")),
                        Some((_, '"')) => {
                            idx += 1;
                            break;
                        }
                        Some((_, c)) => {
                            name.push(*c);
                            idx += 1;
                        }
                    }
                }
                tokens.push((offset, Token::Ident(name)));
            }
            c if c.is_ascii_digit()
                || (c == '-' && chars.get(idx + 1).is_some_and(|(_, n)| n.is_ascii_digit())) =>
            {
                let start = idx;
                idx += 1;
                while chars
                    .get(idx)
                    .is_some_and(|(_, n)| n.is_ascii_digit() || *n == '.')
                {
                    idx += 1;
                }
                let end = chars.get(idx).map_or(source.len(), |(o, _)| *o);
                let raw = &source[chars[start].0..end];
                let value = raw
                    .parse::<f64>()
                    .map_err(|_| syntax(offset, format!("invalid number '{raw}'")))?;
                tokens.push((offset, Token::Number(value)));
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = idx;
                while chars
                    .get(idx)
                    .is_some_and(|(_, n)| n.is_alphanumeric() || *n == '_')
                {
                    idx += 1;
                }
                let end = chars.get(idx).map_or(source.len(), |(o, _)| *o);
                tokens.push((offset, Token::Ident(source[chars[start].0..end].to_string())));
            }
            other => return Err(syntax(offset, format!("unexpected character '{other}'"))),
        }
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<(usize, Token)>,
    position: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.position).map(|(_, token)| token)
    }

    fn peek_with_offset(&self) -> Option<(usize, &Token)> {
        self.tokens
            .get(self.position)
            .map(|(offset, token)| (*offset, token))
    }

    fn offset(&self) -> usize {
        self.tokens
            .get(self.position)
            .map_or_else(|| self.tokens.last().map_or(0, |(o, _)| *o + 1), |(o, _)| *o)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.position).map(|(_, token)| token.clone());
        if token.is_some() {
            self.position += 1;
        }
        token
    }

    fn at_keyword(&self, keyword: &str) -> bool {
        matches!(self.peek(), Some(Token::Ident(name)) if name.eq_ignore_ascii_case(keyword))
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        if self.at_keyword(keyword) {
            self.position += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: Token) -> Result<(), ExpressionError> {
        let offset = self.offset();
        match self.next() {
            Some(token) if token == expected => Ok(()),
            Some(token) => Err(syntax(offset, format!("expected {expected}, found {token}"))),
            None => Err(syntax(offset, format!("expected {expected}, found end of input"))),
        }
    }

    fn parse_or(&mut self) -> Result<Expression, ExpressionError> {
        let mut left = self.parse_and()?;
        while self.eat_keyword("or") {
            let right = self.parse_and()?;
            left = Expression::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expression, ExpressionError> {
        let mut left = self.parse_unary()?;
        while self.eat_keyword("and") {
            let right = self.parse_unary()?;
            left = Expression::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expression, ExpressionError> {
        if self.eat_keyword("not") {
            return Ok(Expression::Not(Box::new(self.parse_unary()?)));
        }
        self.parse_predicate()
    }

    fn parse_predicate(&mut self) -> Result<Expression, ExpressionError> {
        if self.peek() == Some(&Token::LParen) {
            self.position += 1;
            let inner = self.parse_or()?;
            self.expect(Token::RParen)?;
            return Ok(inner);
        }

        let operand = self.parse_operand()?;
        let offset = self.offset();

        if self.eat_keyword("is") {
            let negated = self.eat_keyword("not");
            if !self.eat_keyword("null") {
                return Err(syntax(self.offset(), "expected 'null' after 'is'"));
            }
            return Ok(Expression::IsNull { operand, negated });
        }

        let negated = self.eat_keyword("not");
        if self.eat_keyword("in") {
            let items = self.parse_list()?;
            return Ok(Expression::InList {
                operand,
                items,
                negated,
            });
        }
        if negated {
            return Err(syntax(self.offset(), "expected 'in' after 'not'"));
        }

        match self.next() {
            Some(Token::Op(op)) => {
                let right = self.parse_operand()?;
                Ok(Expression::Compare {
                    left: operand,
                    op,
                    right,
                })
            }
            Some(token) => Err(syntax(offset, format!("expected comparison, found {token}"))),
            None => Err(syntax(offset, "expected comparison, found end of input")),
        }
    }

    fn parse_list(&mut self) -> Result<Vec<Literal>, ExpressionError> {
        self.expect(Token::LParen)?;
        let mut items = Vec::new();
        loop {
            let offset = self.offset();
            match self.parse_operand()? {
                Operand::Literal(literal) => items.push(literal),
                Operand::Column(name) => {
                    return Err(syntax(offset, format!("list items must be literals, found '{name}'")));
                }
            }
            match self.next() {
                Some(Token::Comma) => continue,
                Some(Token::RParen) => break,
                Some(token) => return Err(syntax(self.offset(), format!("expected ',' or ')', found {token}"))),
                None => return Err(syntax(self.offset(), "unterminated list")),
            }
        }
        Ok(items)
    }

    fn parse_operand(&mut self) -> Result<Operand, ExpressionError> {
        let offset = self.offset();
        match self.next() {
            Some(Token::Number(value)) => Ok(Operand::Literal(Literal::Number(value))),
            Some(Token::Text(value)) => Ok(Operand::Literal(Literal::Text(value))),
            Some(Token::Ident(name)) => {
                let lowered = name.to_ascii_lowercase();
                match lowered.as_str() {
                    "true" => Ok(Operand::Literal(Literal::Bool(true))),
                    "false" => Ok(Operand::Literal(Literal::Bool(false))),
                    "null" => Ok(Operand::Literal(Literal::Null)),
                    "and" | "or" | "not" | "is" | "in" => {
                        Err(syntax(offset, format!("unexpected keyword '{name}'")))
                    }
                    _ => Ok(Operand::Column(name)),
                }
            }
            Some(token) => Err(syntax(offset, format!("expected operand, found {token}"))),
            None => Err(syntax(offset, "expected operand, found end of input")),
        }
    }
}
