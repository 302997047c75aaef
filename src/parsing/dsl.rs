//! Parser for the path DSL.
//!
//! ```text
//! query            := conditioned_path+ time_clause? aggregate_clause?
//! conditioned_path := path condition?
//! condition        := COMPARATOR (literal | path) | "like" QUOTED
//! path             := segment (connective segment)*
//! segment          := glue? label | glue
//! label            := IDENTIFIER | QUOTED | IDENTIFIER QUOTED
//! glue             := "[" IDENTIFIER "]"
//! time_clause      := "from" TIMESTAMP "to" TIMESTAMP
//! aggregate_clause := "aggregate" FUNCTION DURATION
//! ```
//!
//! A connective is a run of one repeated symbol out of `. : ; - / \`. Two
//! segments with nothing between them start a new path. `Pump"P-101"`, with
//! no space before the quote, names a node by class and name at once.
//!
//! After a comparator, a quoted string is a literal unless a connective
//! follows it; identifiers and glues start a path.

use crate::core::{parse_date_time, AggregateFunction, Aggregation, Comparator, Value};
use crate::error::{HybridError, Result};
use crate::parsing::lexer::{Lexer, Token, TokenKind, TokenStream};
use chrono::{DateTime, Utc};
use std::time::Duration;

const KEYWORDS: &[&str] = &["from", "to", "aggregate", "like"];

/// What a segment names: a class (bare identifier), a label (quoted) or
/// both (`Class"label"`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SegmentLabel {
    Class(String),
    Name(String),
    ClassAndName(String, String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathSegment {
    /// `[glue]` name shared by every segment carrying it
    pub glue: Option<String>,
    pub label: Option<SegmentLabel>,
}

impl PathSegment {
    /// Text used for this segment in path names.
    pub fn display_label(&self) -> &str {
        match (&self.label, &self.glue) {
            (Some(SegmentLabel::Class(label) | SegmentLabel::Name(label)), _) => label,
            (Some(SegmentLabel::ClassAndName(_, name)), _) => name,
            (None, Some(glue)) => glue,
            (None, None) => "",
        }
    }
}

/// Segments joined by connectives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathExpr {
    pub segments: Vec<PathSegment>,
    /// `connectives[i]` joins `segments[i]` and `segments[i + 1]`
    pub connectives: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionOperator {
    Compare(Comparator),
    /// SQL-style pattern match on the lexical form
    Like,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConditionOperand {
    Literal(Value),
    /// The value of another series at the same timestamp
    Path(PathExpr),
}

/// A condition on the value of the series at the end of a path.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub operator: ConditionOperator,
    pub operand: ConditionOperand,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConditionedPath {
    pub path: PathExpr,
    pub condition: Option<Condition>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DslPathQuery {
    pub paths: Vec<ConditionedPath>,
    /// Inclusive `from .. to` bounds
    pub time_range: Option<(DateTime<Utc>, DateTime<Utc>)>,
    pub aggregation: Option<Aggregation>,
}

pub struct DslParser {
    lexer: Lexer,
}

impl DslParser {
    pub fn new() -> std::result::Result<Self, regex::Error> {
        let lexer = Lexer::new(&[
            (TokenKind::Skip, r"\s+"),
            (
                TokenKind::Timestamp,
                r"\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}(?:\.\d+)?(?:Z|[+-]\d{2}:\d{2})?",
            ),
            (TokenKind::Duration, r"\d+[A-Za-z]+"),
            (TokenKind::Number, r"\d+(?:\.\d+)?"),
            (TokenKind::Quoted, r#""(?:[^"\\]|\\.)*""#),
            (TokenKind::Word, r"[A-Za-z_][A-Za-z0-9_]*"),
            (TokenKind::Operator, r"<=|>=|!=|=|<|>"),
            (TokenKind::Symbol, r"[\[\]]"),
            (TokenKind::Connective, r"\.+|:+|;+|-+|/+|\\+"),
        ])?;
        Ok(DslParser { lexer })
    }

    pub fn parse(&self, text: &str) -> Result<DslPathQuery> {
        let mut stream = self.lexer.tokenize(text)?;
        let mut paths = Vec::new();
        while stream.peek().is_some_and(|t| !is_keyword(t)) {
            paths.push(conditioned_path(&mut stream)?);
        }
        if paths.is_empty() {
            return Err(HybridError::ParseError("a DSL query needs at least one path".to_string()));
        }

        let mut time_range = None;
        if stream.eat_keyword("from") {
            let start = timestamp(&mut stream)?;
            stream.expect_keyword("to")?;
            let end = timestamp(&mut stream)?;
            if end < start {
                return Err(HybridError::ParseError(format!(
                    "time range ends ({}) before it starts ({})",
                    end, start
                )));
            }
            time_range = Some((start, end));
        }

        let mut aggregation = None;
        if stream.eat_keyword("aggregate") {
            let function: AggregateFunction =
                stream.expect_kind(TokenKind::Word, "aggregate function")?.text.parse()?;
            let window = parse_duration(&stream.expect_kind(TokenKind::Duration, "window duration")?.text)?;
            aggregation = Some(Aggregation::new(function, window)?);
        }

        if let Some(token) = stream.peek() {
            return Err(stream.unexpected(token, "end of query"));
        }
        Ok(DslPathQuery { paths, time_range, aggregation })
    }
}

fn is_keyword(token: &Token) -> bool {
    KEYWORDS.iter().any(|k| token.is_keyword(k))
}

fn conditioned_path(stream: &mut TokenStream) -> Result<ConditionedPath> {
    let head = path(stream)?;

    let condition = if stream.eat_keyword("like") {
        let pattern = stream.expect_kind(TokenKind::Quoted, "quoted like pattern")?;
        Some(Condition {
            operator: ConditionOperator::Like,
            operand: ConditionOperand::Literal(Value::String(unquote(&pattern.text))),
        })
    } else if stream.peek().is_some_and(|t| t.kind == TokenKind::Operator) {
        let operator = stream.expect_kind(TokenKind::Operator, "comparator")?;
        let comparator = Comparator::from_symbol(&operator.text)
            .ok_or_else(|| stream.unexpected(&operator, "comparator"))?;
        let operand = if starts_path(stream) {
            ConditionOperand::Path(path(stream)?)
        } else {
            ConditionOperand::Literal(literal(stream)?)
        };
        Some(Condition { operator: ConditionOperator::Compare(comparator), operand })
    } else {
        None
    };
    Ok(ConditionedPath { path: head, condition })
}

fn path(stream: &mut TokenStream) -> Result<PathExpr> {
    let mut segments = vec![segment(stream)?];
    let mut connectives = Vec::new();
    while let Some(token) = stream.peek().filter(|t| t.kind == TokenKind::Connective) {
        connectives.push(token.text.clone());
        stream.next_token();
        segments.push(segment(stream)?);
    }
    Ok(PathExpr { segments, connectives })
}

/// Whether the right-hand side of a comparison is a path.
fn starts_path(stream: &TokenStream) -> bool {
    match stream.peek() {
        Some(token) if token.text == "[" => true,
        Some(token) if token.kind == TokenKind::Word => {
            !is_keyword(token) && token.text != "true" && token.text != "false"
        }
        Some(token) if token.kind == TokenKind::Quoted => {
            stream.peek_n(1).is_some_and(|next| next.kind == TokenKind::Connective)
        }
        _ => false,
    }
}

fn segment(stream: &mut TokenStream) -> Result<PathSegment> {
    let glue = if stream.eat_text("[") {
        let name = stream.expect_kind(TokenKind::Word, "glue name")?;
        stream.expect_text("]")?;
        Some(name.text)
    } else {
        None
    };

    let label = match stream.peek() {
        Some(token) if token.kind == TokenKind::Word && !is_keyword(token) => {
            let class = token.text.clone();
            let end = token.offset + token.text.len();
            stream.next_token();
            match stream.peek() {
                Some(quoted) if quoted.kind == TokenKind::Quoted && quoted.offset == end => {
                    let name = unquote(&quoted.text);
                    stream.next_token();
                    Some(SegmentLabel::ClassAndName(class, name))
                }
                _ => Some(SegmentLabel::Class(class)),
            }
        }
        Some(token) if token.kind == TokenKind::Quoted => {
            let text = unquote(&token.text);
            stream.next_token();
            Some(SegmentLabel::Name(text))
        }
        _ => None,
    };

    if glue.is_none() && label.is_none() {
        return match stream.peek() {
            Some(token) => Err(stream.unexpected(token, "path segment")),
            None => Err(HybridError::ParseError("expected path segment, found end of input".to_string())),
        };
    }
    Ok(PathSegment { glue, label })
}

fn literal(stream: &mut TokenStream) -> Result<Value> {
    let token = stream.expect_any("literal")?;
    match token.kind {
        TokenKind::Connective if token.text == "-" => {
            let number = stream.expect_kind(TokenKind::Number, "number")?;
            number_value(&format!("-{}", number.text))
        }
        TokenKind::Number => number_value(&token.text),
        TokenKind::Quoted => Ok(Value::String(unquote(&token.text))),
        TokenKind::Timestamp => timestamp_value(&token),
        TokenKind::Word if token.text == "true" => Ok(Value::Boolean(true)),
        TokenKind::Word if token.text == "false" => Ok(Value::Boolean(false)),
        _ => Err(stream.unexpected(&token, "literal")),
    }
}

fn number_value(text: &str) -> Result<Value> {
    let parsed = if text.contains('.') {
        text.parse().map(Value::Double).ok()
    } else {
        text.parse().map(Value::Integer).ok()
    };
    parsed.ok_or_else(|| HybridError::ParseError(format!("invalid number: {}", text)))
}

fn timestamp(stream: &mut TokenStream) -> Result<DateTime<Utc>> {
    let token = stream.expect_kind(TokenKind::Timestamp, "timestamp")?;
    match timestamp_value(&token)? {
        Value::DateTime(instant) => Ok(instant),
        _ => Err(stream.unexpected(&token, "timestamp")),
    }
}

fn timestamp_value(token: &Token) -> Result<Value> {
    parse_date_time(&token.text)
        .map(Value::DateTime)
        .ok_or_else(|| HybridError::ParseError(format!("invalid timestamp '{}'", token.text)))
}

fn unquote(text: &str) -> String {
    let inner = &text[1..text.len() - 1];
    let mut unescaped = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(escaped) = chars.next() {
                unescaped.push(escaped);
            }
        } else {
            unescaped.push(c);
        }
    }
    unescaped
}

/// Parses `<integer><unit>` with units ms, s/sec, m/min, h/hour, d/day.
pub fn parse_duration(text: &str) -> Result<Duration> {
    let split = text.find(|c: char| !c.is_ascii_digit()).unwrap_or(text.len());
    let (amount, unit) = text.split_at(split);
    let amount: u64 = amount
        .parse()
        .map_err(|_| HybridError::ParseError(format!("invalid duration '{}'", text)))?;
    let millis_per_unit = match unit {
        "ms" => 1,
        "s" | "sec" => 1_000,
        "m" | "min" => 60_000,
        "h" | "hour" => 3_600_000,
        "d" | "day" => 86_400_000,
        other => {
            return Err(HybridError::ParseError(format!("unknown duration unit '{}' in '{}'", other, text)))
        }
    };
    if amount == 0 {
        return Err(HybridError::ParseError(format!("duration '{}' must be positive", text)));
    }
    let millis = amount
        .checked_mul(millis_per_unit)
        .ok_or_else(|| HybridError::ParseError(format!("duration '{}' is too long", text)))?;
    Ok(Duration::from_millis(millis))
}
