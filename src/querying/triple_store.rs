use crate::core::Value;
use crate::error::Result;
use async_trait::async_trait;

/// Solutions of a graph query: variable names plus one row of optional
/// bindings per solution, in the store's order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SolutionTable {
    variables: Vec<String>,
    rows: Vec<Vec<Option<Value>>>,
}

impl SolutionTable {
    pub fn new(variables: Vec<String>, rows: Vec<Vec<Option<Value>>>) -> Self {
        Self { variables, rows }
    }

    pub fn variables(&self) -> &[String] {
        &self.variables
    }

    pub fn rows(&self) -> &[Vec<Option<Value>>] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<Vec<Option<Value>>> {
        self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn variable_index(&self, variable: &str) -> Option<usize> {
        self.variables.iter().position(|v| v == variable)
    }

    /// The binding of `variable` in row `row`, if bound.
    pub fn value(&self, row: usize, variable: &str) -> Option<&Value> {
        let idx = self.variable_index(variable)?;
        self.rows.get(row)?.get(idx)?.as_ref()
    }
}

/// A store answering graph queries.
///
/// Implementations receive complete SELECT queries and return their
/// solutions; updates load or modify the graph.
#[async_trait]
pub trait TripleStore: Send + Sync {
    /// Evaluates a SELECT query.
    ///
    /// # Errors
    ///
    /// `TripleStore` when the store rejects the query or fails evaluating it.
    async fn select(&self, query: &str) -> Result<SolutionTable>;

    /// Applies a SPARQL update.
    async fn update(&self, update: &str) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_lookup() {
        let table = SolutionTable::new(
            vec!["s".into(), "id".into()],
            vec![vec![Some(Value::Iri("http://ex/a".into())), None]],
        );
        assert_eq!(table.value(0, "s"), Some(&Value::Iri("http://ex/a".into())));
        assert_eq!(table.value(0, "id"), None);
        assert_eq!(table.value(1, "s"), None);
        assert_eq!(table.value(0, "missing"), None);
    }
}
