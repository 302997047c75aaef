//! Graph-pattern query algebra
//!
//! Parsed queries are held as an arena of triple patterns indexed by
//! variable, plus filter expressions and constant bindings. The splitter
//! walks this structure to find time-series sub-patterns and renders the
//! residual back to SPARQL text through the `Display` impls.

use crate::core::{Comparator, Value};
use crate::error::{HybridError, Result};
use regex::{Regex, RegexBuilder};
use std::collections::BTreeSet;
use std::fmt;

pub mod arena;
pub mod query;

pub use arena::{PatternArena, TripleId};
pub use query::{GraphQuery, HybridQuery, Projection};

/// Subject, predicate or object position of a triple pattern.
#[derive(Debug, Clone, PartialEq)]
pub enum Term {
    Variable(String),
    Iri(String),
    Literal(Value),
}

impl Term {
    pub fn variable(name: impl Into<String>) -> Self {
        Term::Variable(name.into())
    }

    pub fn iri(iri: impl Into<String>) -> Self {
        Term::Iri(iri.into())
    }

    pub fn as_variable(&self) -> Option<&str> {
        match self {
            Term::Variable(name) => Some(name),
            _ => None,
        }
    }

    pub fn is_iri(&self, iri: &str) -> bool {
        matches!(self, Term::Iri(own) if own == iri)
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Term::Variable(name) => write!(f, "?{}", name),
            Term::Iri(iri) => write!(f, "<{}>", iri),
            Term::Literal(value) => f.write_str(&value.to_sparql()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TriplePattern {
    pub subject: Term,
    pub predicate: Term,
    pub object: Term,
}

impl TriplePattern {
    pub fn new(subject: Term, predicate: Term, object: Term) -> Self {
        Self { subject, predicate, object }
    }

    pub fn variables(&self) -> impl Iterator<Item = &str> {
        [&self.subject, &self.predicate, &self.object].into_iter().filter_map(Term::as_variable)
    }

    pub fn mentions(&self, variable: &str) -> bool {
        self.variables().any(|v| v == variable)
    }
}

impl fmt::Display for TriplePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {} .", self.subject, self.predicate, self.object)
    }
}

/// A compiled regular expression matched against lexical forms.
#[derive(Debug, Clone)]
pub struct TextPattern {
    source: String,
    case_insensitive: bool,
    compiled: Regex,
}

impl TextPattern {
    pub fn new(source: impl Into<String>, case_insensitive: bool) -> Result<Self> {
        let source = source.into();
        let compiled = RegexBuilder::new(&source)
            .case_insensitive(case_insensitive)
            .build()
            .map_err(|e| HybridError::ParseError(format!("invalid regular expression '{}': {}", source, e)))?;
        Ok(Self { source, case_insensitive, compiled })
    }

    /// A whole-string pattern from a `like` pattern: `%` matches any run of
    /// characters and `_` exactly one.
    pub fn from_like(pattern: &str) -> Result<Self> {
        let mut source = String::from("^");
        for c in pattern.chars() {
            match c {
                '%' => source.push_str(".*"),
                '_' => source.push('.'),
                other => source.push_str(&regex::escape(other.encode_utf8(&mut [0; 4]))),
            }
        }
        source.push('$');
        Self::new(source, false)
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.compiled.is_match(text)
    }
}

impl PartialEq for TextPattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source && self.case_insensitive == other.case_insensitive
    }
}

/// Filter expressions over query variables.
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    Variable(String),
    Constant(Value),
    Compare(Comparator, Box<Expression>, Box<Expression>),
    And(Box<Expression>, Box<Expression>),
    Or(Box<Expression>, Box<Expression>),
    Not(Box<Expression>),
    /// `REGEX(STR(operand), pattern)`
    Regex(Box<Expression>, TextPattern),
}

impl Expression {
    pub fn compare(comparator: Comparator, left: Expression, right: Expression) -> Self {
        Expression::Compare(comparator, Box::new(left), Box::new(right))
    }

    /// Left-nested conjunction of all expressions, `None` when empty.
    pub fn conjunction(mut expressions: Vec<Expression>) -> Option<Expression> {
        if expressions.is_empty() {
            return None;
        }
        let first = expressions.remove(0);
        Some(expressions.into_iter().fold(first, |acc, e| Expression::And(Box::new(acc), Box::new(e))))
    }

    /// Flattens nested `&&` into its conjuncts.
    pub fn conjuncts(&self) -> Vec<&Expression> {
        match self {
            Expression::And(left, right) => {
                let mut parts = left.conjuncts();
                parts.extend(right.conjuncts());
                parts
            }
            other => vec![other],
        }
    }

    pub fn variables(&self) -> BTreeSet<&str> {
        let mut found = BTreeSet::new();
        self.collect_variables(&mut found);
        found
    }

    fn collect_variables<'a>(&'a self, found: &mut BTreeSet<&'a str>) {
        match self {
            Expression::Variable(name) => {
                found.insert(name.as_str());
            }
            Expression::Constant(_) => {}
            Expression::Compare(_, left, right)
            | Expression::And(left, right)
            | Expression::Or(left, right) => {
                left.collect_variables(found);
                right.collect_variables(found);
            }
            Expression::Not(inner) | Expression::Regex(inner, _) => inner.collect_variables(found),
        }
    }

    /// Evaluates the expression as a filter condition.
    ///
    /// `lookup` resolves variables; unbound variables and incomparable
    /// operands are errors (`None`) which `||` and `&&` treat like SPARQL.
    pub fn evaluate(&self, lookup: &dyn Fn(&str) -> Option<Value>) -> Option<bool> {
        match self {
            Expression::Compare(comparator, left, right) => {
                let left = left.value(lookup)?;
                let right = right.value(lookup)?;
                let ordering = left.partial_compare(&right)?;
                Some(comparator.holds(ordering))
            }
            Expression::And(left, right) => {
                match (left.evaluate(lookup), right.evaluate(lookup)) {
                    (Some(false), _) | (_, Some(false)) => Some(false),
                    (Some(true), Some(true)) => Some(true),
                    _ => None,
                }
            }
            Expression::Or(left, right) => match (left.evaluate(lookup), right.evaluate(lookup)) {
                (Some(true), _) | (_, Some(true)) => Some(true),
                (Some(false), Some(false)) => Some(false),
                _ => None,
            },
            Expression::Not(inner) => inner.evaluate(lookup).map(|b| !b),
            Expression::Regex(operand, pattern) => {
                Some(pattern.is_match(&operand.value(lookup)?.lexical()))
            }
            Expression::Variable(_) | Expression::Constant(_) => match self.value(lookup)? {
                Value::Boolean(b) => Some(b),
                Value::String(s) => Some(!s.is_empty()),
                Value::Integer(i) => Some(i != 0),
                Value::Double(d) => Some(d != 0.0 && !d.is_nan()),
                Value::Iri(_) | Value::DateTime(_) => None,
            },
        }
    }

    fn value(&self, lookup: &dyn Fn(&str) -> Option<Value>) -> Option<Value> {
        match self {
            Expression::Variable(name) => lookup(name),
            Expression::Constant(value) => Some(value.clone()),
            other => other.evaluate(lookup).map(Value::Boolean),
        }
    }

    /// Matches `?var <op> literal` or `literal <op> ?var`, normalised so the
    /// variable is on the left.
    pub fn as_variable_comparison(&self) -> Option<(&str, Comparator, &Value)> {
        match self {
            Expression::Compare(comparator, left, right) => match (left.as_ref(), right.as_ref()) {
                (Expression::Variable(var), Expression::Constant(value)) => {
                    Some((var.as_str(), *comparator, value))
                }
                (Expression::Constant(value), Expression::Variable(var)) => {
                    Some((var.as_str(), comparator.flip(), value))
                }
                _ => None,
            },
            _ => None,
        }
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expression::Variable(name) => write!(f, "?{}", name),
            Expression::Constant(value) => f.write_str(&value.to_sparql()),
            Expression::Compare(comparator, left, right) => {
                write!(f, "({} {} {})", left, comparator, right)
            }
            Expression::And(left, right) => write!(f, "({} && {})", left, right),
            Expression::Or(left, right) => write!(f, "({} || {})", left, right),
            Expression::Not(inner) => write!(f, "(!{})", inner),
            Expression::Regex(operand, pattern) => {
                let source = Value::String(pattern.source.clone()).to_sparql();
                if pattern.case_insensitive {
                    write!(f, "REGEX(STR({}), {}, \"i\")", operand, source)
                } else {
                    write!(f, "REGEX(STR({}), {})", operand, source)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn var(name: &str) -> Expression {
        Expression::Variable(name.to_string())
    }

    fn int(i: i64) -> Expression {
        Expression::Constant(Value::Integer(i))
    }

    #[test]
    fn test_conjuncts_flatten_nested_and() {
        let expr = Expression::conjunction(vec![
            Expression::compare(Comparator::Gt, var("t"), int(1)),
            Expression::compare(Comparator::Lt, var("v"), int(2)),
            Expression::compare(Comparator::Eq, var("x"), int(3)),
        ])
        .unwrap();
        assert_eq!(expr.conjuncts().len(), 3);
        assert_eq!(expr.variables().into_iter().collect::<Vec<_>>(), vec!["t", "v", "x"]);
    }

    #[test]
    fn test_variable_comparison_normalises_direction() {
        let expr = Expression::compare(Comparator::Gt, int(5), var("v"));
        let (name, comparator, literal) = expr.as_variable_comparison().unwrap();
        assert_eq!(name, "v");
        assert_eq!(comparator, Comparator::Lt);
        assert_eq!(literal, &Value::Integer(5));
    }

    #[test]
    fn test_or_tolerates_one_error_branch() {
        let expr = Expression::Or(
            Box::new(Expression::compare(Comparator::Lt, var("v"), int(10))),
            Box::new(Expression::compare(Comparator::Eq, var("unbound"), int(1))),
        );
        let lookup = |name: &str| (name == "v").then_some(Value::Integer(3));
        assert_eq!(expr.evaluate(&lookup), Some(true));
        let lookup = |name: &str| (name == "v").then_some(Value::Integer(30));
        assert_eq!(expr.evaluate(&lookup), None);
    }

    #[test]
    fn test_like_pattern_matches_whole_lexical_form() {
        let pattern = TextPattern::from_like("Pump_%.v1").unwrap();
        assert_eq!(pattern.source(), "^Pump..*\\.v1$");
        let expr = Expression::Regex(Box::new(var("name")), pattern);
        let named = |text: &'static str| move |_: &str| Some(Value::String(text.to_string()));
        assert_eq!(expr.evaluate(&named("Pump7 north.v1")), Some(true));
        assert_eq!(expr.evaluate(&named("Pump7 north_v1")), Some(false));
        assert_eq!(expr.evaluate(&|_: &str| -> Option<Value> { None }), None);
        assert_eq!(expr.to_string(), "REGEX(STR(?name), \"^Pump..*\\\\.v1$\")");
    }

    #[test]
    fn test_case_insensitive_regex() {
        let expr = Expression::Regex(Box::new(var("s")), TextPattern::new("^temp", true).unwrap());
        assert_eq!(expr.evaluate(&|_: &str| Some(Value::String("TempSensor".into()))), Some(true));
        assert!(expr.to_string().ends_with(", \"i\")"));
        assert!(matches!(TextPattern::new("(", false), Err(HybridError::ParseError(_))));
    }

    #[test]
    fn test_display_renders_sparql() {
        let expr = Expression::And(
            Box::new(Expression::compare(Comparator::Ge, var("t"), int(1))),
            Box::new(Expression::Not(Box::new(var("flag")))),
        );
        assert_eq!(expr.to_string(), "((?t >= 1) && (!?flag))");
    }
}
