use crate::algebra::{Expression, PatternArena, Term, TriplePattern};
use crate::core::{Aggregation, Value};
use std::fmt;

/// Projected variables of a SELECT query.
#[derive(Debug, Clone, PartialEq)]
pub enum Projection {
    All,
    Variables(Vec<String>),
}

/// A parsed SELECT query: basic graph pattern, filters and constant binds.
#[derive(Debug, Clone, Default)]
pub struct GraphQuery {
    pub distinct: bool,
    pub projection: Projection,
    pub patterns: PatternArena,
    pub filters: Vec<Expression>,
    pub binds: Vec<(Value, String)>,
}

impl Default for Projection {
    fn default() -> Self {
        Projection::All
    }
}

impl GraphQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_triple(&mut self, subject: Term, predicate: Term, object: Term) {
        self.patterns.insert(TriplePattern::new(subject, predicate, object));
    }

    /// Every variable in first-appearance order: triples, binds, then filters.
    pub fn variables(&self) -> Vec<String> {
        let mut seen: Vec<String> = Vec::new();
        let mut push = |name: &str| {
            if !seen.iter().any(|s| s == name) {
                seen.push(name.to_string());
            }
        };
        for (_, triple) in self.patterns.iter() {
            triple.variables().for_each(&mut push);
        }
        for (_, variable) in &self.binds {
            push(variable);
        }
        for filter in &self.filters {
            filter.variables().into_iter().for_each(&mut push);
        }
        seen
    }

    /// Variables the query returns, in output order.
    pub fn projected_variables(&self) -> Vec<String> {
        match &self.projection {
            Projection::All => self.variables(),
            Projection::Variables(vars) => vars.clone(),
        }
    }

    /// Whether `variable` occurs in a triple or a bind.
    pub fn binds_variable(&self, variable: &str) -> bool {
        !self.patterns.with_variable(variable).is_empty()
            || self.binds.iter().any(|(_, v)| v == variable)
    }
}

impl fmt::Display for GraphQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SELECT ")?;
        if self.distinct {
            f.write_str("DISTINCT ")?;
        }
        match &self.projection {
            Projection::All => f.write_str("*")?,
            Projection::Variables(vars) => {
                let rendered: Vec<String> = vars.iter().map(|v| format!("?{}", v)).collect();
                f.write_str(&rendered.join(" "))?;
            }
        }
        writeln!(f, " WHERE {{")?;
        for (_, triple) in self.patterns.iter() {
            writeln!(f, "  {}", triple)?;
        }
        for (value, variable) in &self.binds {
            writeln!(f, "  BIND({} AS ?{})", value.to_sparql(), variable)?;
        }
        for filter in &self.filters {
            match filter {
                Expression::Compare(..) | Expression::And(..) | Expression::Or(..) | Expression::Not(..) => {
                    writeln!(f, "  FILTER{}", filter)?
                }
                _ => writeln!(f, "  FILTER({})", filter)?,
            }
        }
        f.write_str("}")
    }
}

/// A graph query plus the optional aggregation only the DSL can request.
#[derive(Debug, Clone, Default)]
pub struct HybridQuery {
    pub query: GraphQuery,
    pub aggregation: Option<Aggregation>,
}

impl HybridQuery {
    pub fn new(query: GraphQuery) -> Self {
        Self { query, aggregation: None }
    }

    pub fn with_aggregation(mut self, aggregation: Aggregation) -> Self {
        self.aggregation = Some(aggregation);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Comparator;

    #[test]
    fn test_rendering_uses_full_iris() {
        let mut query = GraphQuery::new();
        query.projection = Projection::Variables(vec!["s".into(), "label".into()]);
        query.add_triple(Term::variable("s"), Term::iri("http://ex/p"), Term::variable("o"));
        query.binds.push((Value::String("x".into()), "label".into()));
        query.filters.push(Expression::compare(
            Comparator::Gt,
            Expression::Variable("o".into()),
            Expression::Constant(Value::Integer(3)),
        ));
        assert_eq!(
            query.to_string(),
            "SELECT ?s ?label WHERE {\n  ?s <http://ex/p> ?o .\n  BIND(\"x\" AS ?label)\n  FILTER(?o > 3)\n}"
        );

        query.filters = vec![Expression::Regex(
            Box::new(Expression::Variable("o".into())),
            crate::algebra::TextPattern::from_like("a%").unwrap(),
        )];
        assert!(query.to_string().contains("  FILTER(REGEX(STR(?o), \"^a.*$\"))\n"));
    }

    #[test]
    fn test_variables_in_first_appearance_order() {
        let mut query = GraphQuery::new();
        query.add_triple(Term::variable("b"), Term::iri("http://ex/p"), Term::variable("a"));
        query.add_triple(Term::variable("a"), Term::iri("http://ex/p"), Term::variable("c"));
        assert_eq!(query.variables(), vec!["b", "a", "c"]);
        assert!(query.binds_variable("c"));
        assert!(!query.binds_variable("d"));
    }
}
