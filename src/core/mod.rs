//! Core data structures and types for the chronograph hybrid query engine

use crate::error::{HybridError, Result};
use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

pub mod table;
pub mod time;

pub use table::{Column, ResultTable};
pub use time::{AggregateFunction, Aggregation, TimeRange};

/// XSD datatype IRIs understood by the engine.
pub mod xsd {
    pub const STRING: &str = "http://www.w3.org/2001/XMLSchema#string";
    pub const BOOLEAN: &str = "http://www.w3.org/2001/XMLSchema#boolean";
    pub const INTEGER: &str = "http://www.w3.org/2001/XMLSchema#integer";
    pub const INT: &str = "http://www.w3.org/2001/XMLSchema#int";
    pub const LONG: &str = "http://www.w3.org/2001/XMLSchema#long";
    pub const SHORT: &str = "http://www.w3.org/2001/XMLSchema#short";
    pub const UNSIGNED_INT: &str = "http://www.w3.org/2001/XMLSchema#unsignedInt";
    pub const DECIMAL: &str = "http://www.w3.org/2001/XMLSchema#decimal";
    pub const DOUBLE: &str = "http://www.w3.org/2001/XMLSchema#double";
    pub const FLOAT: &str = "http://www.w3.org/2001/XMLSchema#float";
    pub const DATE_TIME: &str = "http://www.w3.org/2001/XMLSchema#dateTime";
}

/// The rdf:type IRI
pub const RDF_TYPE: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#type";

/// A single RDF term or time-series cell as seen by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Iri(String),
    String(String),
    Integer(i64),
    Double(f64),
    Boolean(bool),
    DateTime(DateTime<Utc>),
}

/// Coarse datatype groups used to decide whether two values may be compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DatatypeFamily {
    Iri,
    String,
    Numeric,
    Boolean,
    DateTime,
}

/// Declared element type of a result column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColumnType {
    Iri,
    String,
    Integer,
    Double,
    Boolean,
    DateTime,
}

impl Value {
    /// Builds a value from a lexical form and an optional datatype IRI.
    ///
    /// Unknown datatypes keep their lexical form as a plain string.
    pub fn from_literal(lexical: &str, datatype: Option<&str>) -> Result<Value> {
        let invalid = |dt: &str| {
            HybridError::TypeMismatch(format!("'{}' is not a valid <{}> literal", lexical, dt))
        };
        match datatype {
            None | Some(xsd::STRING) => Ok(Value::String(lexical.to_string())),
            Some(dt @ (xsd::INTEGER | xsd::INT | xsd::LONG | xsd::SHORT | xsd::UNSIGNED_INT)) => {
                lexical.trim().parse::<i64>().map(Value::Integer).map_err(|_| invalid(dt))
            }
            Some(dt @ (xsd::DECIMAL | xsd::DOUBLE | xsd::FLOAT)) => {
                lexical.trim().parse::<f64>().map(Value::Double).map_err(|_| invalid(dt))
            }
            Some(xsd::BOOLEAN) => match lexical.trim() {
                "true" | "1" => Ok(Value::Boolean(true)),
                "false" | "0" => Ok(Value::Boolean(false)),
                _ => Err(invalid(xsd::BOOLEAN)),
            },
            Some(xsd::DATE_TIME) => {
                parse_date_time(lexical).map(Value::DateTime).ok_or_else(|| invalid(xsd::DATE_TIME))
            }
            Some(_) => Ok(Value::String(lexical.to_string())),
        }
    }

    /// XSD datatype IRI of a literal, `None` for IRIs.
    pub fn datatype(&self) -> Option<&'static str> {
        match self {
            Value::Iri(_) => None,
            Value::String(_) => Some(xsd::STRING),
            Value::Integer(_) => Some(xsd::INTEGER),
            Value::Double(_) => Some(xsd::DOUBLE),
            Value::Boolean(_) => Some(xsd::BOOLEAN),
            Value::DateTime(_) => Some(xsd::DATE_TIME),
        }
    }

    pub fn family(&self) -> DatatypeFamily {
        match self {
            Value::Iri(_) => DatatypeFamily::Iri,
            Value::String(_) => DatatypeFamily::String,
            Value::Integer(_) | Value::Double(_) => DatatypeFamily::Numeric,
            Value::Boolean(_) => DatatypeFamily::Boolean,
            Value::DateTime(_) => DatatypeFamily::DateTime,
        }
    }

    pub fn column_type(&self) -> ColumnType {
        match self {
            Value::Iri(_) => ColumnType::Iri,
            Value::String(_) => ColumnType::String,
            Value::Integer(_) => ColumnType::Integer,
            Value::Double(_) => ColumnType::Double,
            Value::Boolean(_) => ColumnType::Boolean,
            Value::DateTime(_) => ColumnType::DateTime,
        }
    }

    /// Lexical form without datatype decoration.
    pub fn lexical(&self) -> String {
        match self {
            Value::Iri(iri) => iri.clone(),
            Value::String(s) => s.clone(),
            Value::Integer(i) => i.to_string(),
            Value::Double(d) => d.to_string(),
            Value::Boolean(b) => b.to_string(),
            Value::DateTime(dt) => dt.to_rfc3339_opts(SecondsFormat::AutoSi, true),
        }
    }

    /// SPARQL surface syntax for this value.
    pub fn to_sparql(&self) -> String {
        match self {
            Value::Iri(iri) => format!("<{}>", iri),
            Value::String(s) => format!("\"{}\"", escape_string(s)),
            Value::Integer(i) => i.to_string(),
            Value::Double(d) => format!("\"{}\"^^<{}>", d, xsd::DOUBLE),
            Value::Boolean(b) => b.to_string(),
            Value::DateTime(_) => format!("\"{}\"^^<{}>", self.lexical(), xsd::DATE_TIME),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(i) => Some(*i as f64),
            Value::Double(d) => Some(*d),
            _ => None,
        }
    }

    pub fn as_date_time(&self) -> Option<DateTime<Utc>> {
        match self {
            Value::DateTime(dt) => Some(*dt),
            _ => None,
        }
    }

    /// Compares two values of the same datatype family.
    ///
    /// Returns `None` for incomparable values (different families, NaN).
    pub fn partial_compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Integer(a), Value::Integer(b)) => Some(a.cmp(b)),
            (Value::Iri(a), Value::Iri(b)) | (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            (Value::Boolean(a), Value::Boolean(b)) => Some(a.cmp(b)),
            (Value::DateTime(a), Value::DateTime(b)) => Some(a.cmp(b)),
            (a, b) => match (a.as_f64(), b.as_f64()) {
                (Some(x), Some(y)) => x.partial_cmp(&y),
                _ => None,
            },
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.lexical())
    }
}

/// Datatype family of a declared XSD datatype IRI.
pub fn family_of_datatype(datatype: &str) -> DatatypeFamily {
    match datatype {
        xsd::INTEGER | xsd::INT | xsd::LONG | xsd::SHORT | xsd::UNSIGNED_INT | xsd::DECIMAL
        | xsd::DOUBLE | xsd::FLOAT => DatatypeFamily::Numeric,
        xsd::BOOLEAN => DatatypeFamily::Boolean,
        xsd::DATE_TIME => DatatypeFamily::DateTime,
        _ => DatatypeFamily::String,
    }
}

impl ColumnType {
    /// Column type holding values of a declared XSD datatype.
    pub fn of_datatype(datatype: &str) -> ColumnType {
        match datatype {
            xsd::INTEGER | xsd::INT | xsd::LONG | xsd::SHORT | xsd::UNSIGNED_INT => ColumnType::Integer,
            xsd::DECIMAL | xsd::DOUBLE | xsd::FLOAT => ColumnType::Double,
            xsd::BOOLEAN => ColumnType::Boolean,
            xsd::DATE_TIME => ColumnType::DateTime,
            _ => ColumnType::String,
        }
    }
}

/// Parses an RFC 3339 timestamp, treating zone-less timestamps as UTC.
pub fn parse_date_time(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f").ok().map(|naive| naive.and_utc())
}

fn escape_string(s: &str) -> String {
    let mut escaped = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '"' => escaped.push_str("\\\""),
            '\\' => escaped.push_str("\\\\"),
            '\n' => escaped.push_str("\\n"),
            '\r' => escaped.push_str("\\r"),
            '\t' => escaped.push_str("\\t"),
            other => escaped.push(other),
        }
    }
    escaped
}

/// Binary comparison operators appearing in filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Comparator {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

impl Comparator {
    pub fn symbol(self) -> &'static str {
        match self {
            Comparator::Lt => "<",
            Comparator::Le => "<=",
            Comparator::Gt => ">",
            Comparator::Ge => ">=",
            Comparator::Eq => "=",
            Comparator::Ne => "!=",
        }
    }

    pub fn from_symbol(symbol: &str) -> Option<Comparator> {
        match symbol {
            "<" => Some(Comparator::Lt),
            "<=" => Some(Comparator::Le),
            ">" => Some(Comparator::Gt),
            ">=" => Some(Comparator::Ge),
            "=" => Some(Comparator::Eq),
            "!=" => Some(Comparator::Ne),
            _ => None,
        }
    }

    /// The comparator to use when the operands are swapped.
    pub fn flip(self) -> Comparator {
        match self {
            Comparator::Lt => Comparator::Gt,
            Comparator::Le => Comparator::Ge,
            Comparator::Gt => Comparator::Lt,
            Comparator::Ge => Comparator::Le,
            other => other,
        }
    }

    /// Whether a backend may be asked to evaluate this comparator.
    pub fn is_pushable(self) -> bool {
        !matches!(self, Comparator::Ne)
    }

    pub fn holds(self, ordering: Ordering) -> bool {
        match self {
            Comparator::Lt => ordering == Ordering::Less,
            Comparator::Le => ordering != Ordering::Greater,
            Comparator::Gt => ordering == Ordering::Greater,
            Comparator::Ge => ordering != Ordering::Less,
            Comparator::Eq => ordering == Ordering::Equal,
            Comparator::Ne => ordering != Ordering::Equal,
        }
    }

    /// Evaluates `left <op> right`; incomparable operands never satisfy it.
    pub fn evaluate(self, left: &Value, right: &Value) -> bool {
        left.partial_compare(right).is_some_and(|ordering| self.holds(ordering))
    }
}

impl fmt::Display for Comparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// A pushed-down condition on the value column of a time series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValuePredicate {
    pub comparator: Comparator,
    pub literal: Value,
}

impl ValuePredicate {
    pub fn new(comparator: Comparator, literal: Value) -> Self {
        Self { comparator, literal }
    }

    pub fn matches(&self, value: &Value) -> bool {
        self.comparator.evaluate(value, &self.literal)
    }
}
