//! SPARQL front end for hybrid queries.
//!
//! Query text is parsed with `spargebra`. A SELECT over one basic graph
//! pattern with filters and constant binds lowers to a [`GraphQuery`]; any
//! other shape is kept as a reason, so the engine can still forward a query
//! that holds no time-series pattern to the triple store untouched.

use crate::algebra::{Expression, GraphQuery, Projection, Term, TextPattern};
use crate::core::{xsd, Comparator, Value};
use crate::error::{HybridError, Result};
use spargebra::algebra::{Expression as SparqlExpression, Function, GraphPattern, PropertyPathExpression};
use spargebra::term::{Literal, NamedNodePattern, TermPattern, TriplePattern};
use spargebra::Query;
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, Default)]
pub struct SparqlParser;

impl SparqlParser {
    pub fn new() -> Self {
        SparqlParser
    }

    /// Parses `text`, lowering it when its shape allows.
    ///
    /// # Errors
    ///
    /// `ParseError` for malformed text and for query forms other than SELECT.
    pub fn parse(&self, text: &str) -> Result<ParsedQuery> {
        let query = spargebra::SparqlParser::new()
            .parse_query(text)
            .map_err(|e| HybridError::ParseError(e.to_string()))?;
        let Query::Select { dataset, pattern, .. } = query else {
            return Err(HybridError::ParseError("only SELECT queries are supported".to_string()));
        };

        let mut predicates = BTreeSet::new();
        collect_predicates(&pattern, &mut predicates);
        let lowered = match dataset {
            Some(_) => Err(Lowering::Unsupported("FROM".to_string())),
            None => lower_select(&pattern),
        };
        Ok(ParsedQuery { lowered, predicates })
    }
}

/// A parsed SELECT query.
#[derive(Debug)]
pub struct ParsedQuery {
    lowered: std::result::Result<GraphQuery, Lowering>,
    predicates: BTreeSet<String>,
}

impl ParsedQuery {
    /// Whether `iri` occurs as a predicate anywhere in the query, including
    /// optional parts, unions and property paths.
    pub fn mentions_predicate(&self, iri: &str) -> bool {
        self.predicates.contains(iri)
    }

    /// The lowered query.
    ///
    /// # Errors
    ///
    /// `ParseError` naming the construct that cannot be combined with
    /// time-series patterns, or the error met while lowering a term.
    pub fn into_graph_query(self) -> Result<GraphQuery> {
        match self.lowered {
            Ok(query) => Ok(query),
            Err(Lowering::Unsupported(construct)) => Err(HybridError::ParseError(format!(
                "{} is not supported around time-series patterns",
                construct
            ))),
            Err(Lowering::Failed(e)) => Err(e),
        }
    }
}

#[derive(Debug)]
enum Lowering {
    Unsupported(String),
    Failed(HybridError),
}

impl From<HybridError> for Lowering {
    fn from(e: HybridError) -> Self {
        Lowering::Failed(e)
    }
}

type Lowered<T> = std::result::Result<T, Lowering>;

fn unsupported<T>(construct: impl Into<String>) -> Lowered<T> {
    Err(Lowering::Unsupported(construct.into()))
}

fn lower_select(pattern: &GraphPattern) -> Lowered<GraphQuery> {
    let mut query = GraphQuery::new();
    let mut pattern = pattern;
    if let GraphPattern::Distinct { inner } = pattern {
        query.distinct = true;
        pattern = inner;
    }
    match pattern {
        GraphPattern::Project { inner, variables } => {
            query.projection =
                Projection::Variables(variables.iter().map(|v| v.as_str().to_string()).collect());
            lower_group(inner, &mut query)?;
        }
        other => lower_group(other, &mut query)?,
    }
    Ok(query)
}

fn lower_group(pattern: &GraphPattern, query: &mut GraphQuery) -> Lowered<()> {
    match pattern {
        GraphPattern::Bgp { patterns } => {
            for triple in patterns {
                lower_triple(triple, query)?;
            }
            Ok(())
        }
        GraphPattern::Join { left, right } => {
            lower_group(left, query)?;
            lower_group(right, query)
        }
        GraphPattern::Filter { expr, inner } => {
            lower_group(inner, query)?;
            query.filters.push(lower_expression(expr)?);
            Ok(())
        }
        GraphPattern::Extend { inner, variable, expression } => {
            lower_group(inner, query)?;
            let value = match expression {
                SparqlExpression::Literal(literal) => literal_value(literal)?,
                SparqlExpression::NamedNode(node) => Value::Iri(node.as_str().to_string()),
                other => return unsupported(format!("BIND of the non-constant expression {}", other)),
            };
            query.binds.push((value, variable.as_str().to_string()));
            Ok(())
        }
        GraphPattern::Path { .. } => unsupported("a property path"),
        GraphPattern::LeftJoin { .. } => unsupported("OPTIONAL"),
        GraphPattern::Union { .. } => unsupported("UNION"),
        GraphPattern::Minus { .. } => unsupported("MINUS"),
        GraphPattern::Graph { .. } => unsupported("GRAPH"),
        GraphPattern::Service { .. } => unsupported("SERVICE"),
        GraphPattern::Values { .. } => unsupported("VALUES"),
        GraphPattern::OrderBy { .. } => unsupported("ORDER BY"),
        GraphPattern::Slice { .. } => unsupported("LIMIT/OFFSET"),
        GraphPattern::Group { .. } => unsupported("GROUP BY"),
        GraphPattern::Reduced { .. } => unsupported("REDUCED"),
        GraphPattern::Distinct { .. } | GraphPattern::Project { .. } => unsupported("a sub-query"),
        #[allow(unreachable_patterns)]
        _ => unsupported("this graph pattern"),
    }
}

fn lower_triple(triple: &TriplePattern, query: &mut GraphQuery) -> Lowered<()> {
    let predicate = match &triple.predicate {
        NamedNodePattern::NamedNode(node) => Term::iri(node.as_str()),
        NamedNodePattern::Variable(variable) => Term::variable(variable.as_str()),
    };
    query.add_triple(lower_term(&triple.subject)?, predicate, lower_term(&triple.object)?);
    Ok(())
}

fn lower_term(term: &TermPattern) -> Lowered<Term> {
    match term {
        TermPattern::NamedNode(node) => Ok(Term::iri(node.as_str())),
        TermPattern::Variable(variable) => Ok(Term::variable(variable.as_str())),
        TermPattern::Literal(literal) => Ok(Term::Literal(literal_value(literal)?)),
        TermPattern::BlankNode(_) => unsupported("a blank node"),
        #[allow(unreachable_patterns)]
        _ => unsupported("a quoted triple"),
    }
}

fn literal_value(literal: &Literal) -> Lowered<Value> {
    if literal.language().is_some() {
        return Ok(Value::String(literal.value().to_string()));
    }
    let datatype = literal.datatype();
    Ok(Value::from_literal(literal.value(), Some(datatype.as_str()))?)
}

fn lower_expression(expression: &SparqlExpression) -> Lowered<Expression> {
    let compare = |comparator: Comparator, left: &SparqlExpression, right: &SparqlExpression| -> Lowered<Expression> {
        Ok(Expression::compare(comparator, lower_expression(left)?, lower_expression(right)?))
    };
    match expression {
        SparqlExpression::Variable(variable) => Ok(Expression::Variable(variable.as_str().to_string())),
        SparqlExpression::NamedNode(node) => Ok(Expression::Constant(Value::Iri(node.as_str().to_string()))),
        SparqlExpression::Literal(literal) => Ok(Expression::Constant(literal_value(literal)?)),
        SparqlExpression::Equal(left, right) => compare(Comparator::Eq, left, right),
        SparqlExpression::Greater(left, right) => compare(Comparator::Gt, left, right),
        SparqlExpression::GreaterOrEqual(left, right) => compare(Comparator::Ge, left, right),
        SparqlExpression::Less(left, right) => compare(Comparator::Lt, left, right),
        SparqlExpression::LessOrEqual(left, right) => compare(Comparator::Le, left, right),
        SparqlExpression::Not(inner) => match inner.as_ref() {
            SparqlExpression::Equal(left, right) => compare(Comparator::Ne, left, right),
            other => Ok(Expression::Not(Box::new(lower_expression(other)?))),
        },
        SparqlExpression::And(left, right) => {
            Ok(Expression::And(Box::new(lower_expression(left)?), Box::new(lower_expression(right)?)))
        }
        SparqlExpression::Or(left, right) => {
            Ok(Expression::Or(Box::new(lower_expression(left)?), Box::new(lower_expression(right)?)))
        }
        SparqlExpression::FunctionCall(Function::Regex, arguments) => lower_regex(arguments),
        other => unsupported(format!("the expression {}", other)),
    }
}

/// `REGEX(text, "pattern")` and `REGEX(text, "pattern", "i")`, where `text`
/// is a variable or `STR` of one.
fn lower_regex(arguments: &[SparqlExpression]) -> Lowered<Expression> {
    let (operand, source, flags) = match arguments {
        [operand, SparqlExpression::Literal(source)] => (operand, source, ""),
        [operand, SparqlExpression::Literal(source), SparqlExpression::Literal(flags)] => {
            (operand, source, flags.value())
        }
        _ => return unsupported("REGEX with a non-literal pattern"),
    };
    let operand = match operand {
        SparqlExpression::FunctionCall(Function::Str, inner) if inner.len() == 1 => &inner[0],
        other => other,
    };
    let case_insensitive = match flags {
        "" => false,
        "i" => true,
        other => return unsupported(format!("REGEX flags \"{}\"", other)),
    };
    if source.datatype().as_str() != xsd::STRING && source.language().is_none() {
        return unsupported("REGEX with a typed pattern");
    }
    let pattern = TextPattern::new(source.value(), case_insensitive)?;
    Ok(Expression::Regex(Box::new(lower_expression(operand)?), pattern))
}

fn collect_predicates(pattern: &GraphPattern, found: &mut BTreeSet<String>) {
    match pattern {
        GraphPattern::Bgp { patterns } => {
            for triple in patterns {
                if let NamedNodePattern::NamedNode(node) = &triple.predicate {
                    found.insert(node.as_str().to_string());
                }
            }
        }
        GraphPattern::Path { path, .. } => collect_path_predicates(path, found),
        GraphPattern::Join { left, right }
        | GraphPattern::Union { left, right }
        | GraphPattern::Minus { left, right } => {
            collect_predicates(left, found);
            collect_predicates(right, found);
        }
        GraphPattern::LeftJoin { left, right, expression } => {
            collect_predicates(left, found);
            collect_predicates(right, found);
            if let Some(expression) = expression {
                collect_expression_predicates(expression, found);
            }
        }
        GraphPattern::Filter { expr, inner } => {
            collect_predicates(inner, found);
            collect_expression_predicates(expr, found);
        }
        GraphPattern::Extend { inner, expression, .. } => {
            collect_predicates(inner, found);
            collect_expression_predicates(expression, found);
        }
        GraphPattern::Graph { inner, .. }
        | GraphPattern::Service { inner, .. }
        | GraphPattern::OrderBy { inner, .. }
        | GraphPattern::Project { inner, .. }
        | GraphPattern::Distinct { inner }
        | GraphPattern::Reduced { inner }
        | GraphPattern::Slice { inner, .. }
        | GraphPattern::Group { inner, .. } => collect_predicates(inner, found),
        GraphPattern::Values { .. } => {}
        #[allow(unreachable_patterns)]
        _ => {}
    }
}

fn collect_path_predicates(path: &PropertyPathExpression, found: &mut BTreeSet<String>) {
    match path {
        PropertyPathExpression::NamedNode(node) => {
            found.insert(node.as_str().to_string());
        }
        PropertyPathExpression::Reverse(inner)
        | PropertyPathExpression::ZeroOrMore(inner)
        | PropertyPathExpression::OneOrMore(inner)
        | PropertyPathExpression::ZeroOrOne(inner) => collect_path_predicates(inner, found),
        PropertyPathExpression::Sequence(left, right) | PropertyPathExpression::Alternative(left, right) => {
            collect_path_predicates(left, found);
            collect_path_predicates(right, found);
        }
        PropertyPathExpression::NegatedPropertySet(nodes) => {
            found.extend(nodes.iter().map(|node| node.as_str().to_string()));
        }
    }
}

/// Predicates inside `EXISTS` / `NOT EXISTS` patterns.
fn collect_expression_predicates(expression: &SparqlExpression, found: &mut BTreeSet<String>) {
    match expression {
        SparqlExpression::Exists(pattern) => collect_predicates(pattern, found),
        SparqlExpression::Or(a, b)
        | SparqlExpression::And(a, b)
        | SparqlExpression::Equal(a, b)
        | SparqlExpression::SameTerm(a, b)
        | SparqlExpression::Greater(a, b)
        | SparqlExpression::GreaterOrEqual(a, b)
        | SparqlExpression::Less(a, b)
        | SparqlExpression::LessOrEqual(a, b)
        | SparqlExpression::Add(a, b)
        | SparqlExpression::Subtract(a, b)
        | SparqlExpression::Multiply(a, b)
        | SparqlExpression::Divide(a, b) => {
            collect_expression_predicates(a, found);
            collect_expression_predicates(b, found);
        }
        SparqlExpression::UnaryPlus(inner) | SparqlExpression::UnaryMinus(inner) | SparqlExpression::Not(inner) => {
            collect_expression_predicates(inner, found)
        }
        SparqlExpression::If(a, b, c) => {
            for part in [a, b, c] {
                collect_expression_predicates(part, found);
            }
        }
        SparqlExpression::In(first, rest) => {
            collect_expression_predicates(first, found);
            rest.iter().for_each(|e| collect_expression_predicates(e, found));
        }
        SparqlExpression::Coalesce(parts) | SparqlExpression::FunctionCall(_, parts) => {
            parts.iter().for_each(|e| collect_expression_predicates(e, found));
        }
        SparqlExpression::NamedNode(_)
        | SparqlExpression::Literal(_)
        | SparqlExpression::Variable(_)
        | SparqlExpression::Bound(_) => {}
    }
}
