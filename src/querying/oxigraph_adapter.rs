//! Oxigraph-backed triple store.
//!
//! Keeps the knowledge graph in an in-process Oxigraph [`Store`]. Queries
//! run on the blocking thread pool against a handle to the same store, so a
//! long evaluation never stalls the async workers. A cancelled hybrid query
//! stops waiting at once; the evaluation itself runs to completion and its
//! result is dropped.
//!
//! # Example
//!
//! ```ignore
//! use chronograph::querying::{OxigraphTripleStore, TripleStore};
//!
//! let store = OxigraphTripleStore::new()?;
//! store.load_turtle("<http://ex/a> <http://ex/p> \"x\" .")?;
//! let solutions = store.select("SELECT ?s WHERE { ?s ?p ?o }").await?;
//! ```

use crate::core::Value;
use crate::error::{HybridError, Result};
use crate::querying::triple_store::{SolutionTable, TripleStore};
use async_trait::async_trait;
use log::debug;
use oxigraph::io::RdfFormat;
use oxigraph::model::Term;
use oxigraph::sparql::{QueryResults, SparqlEvaluator};
use oxigraph::store::Store;
use std::fmt;

pub struct OxigraphTripleStore {
    store: Store,
}

impl fmt::Debug for OxigraphTripleStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OxigraphTripleStore").finish_non_exhaustive()
    }
}

impl From<oxigraph::store::StorageError> for HybridError {
    fn from(err: oxigraph::store::StorageError) -> Self {
        HybridError::TripleStore(err.to_string())
    }
}

impl From<oxigraph::sparql::QueryEvaluationError> for HybridError {
    fn from(err: oxigraph::sparql::QueryEvaluationError) -> Self {
        HybridError::TripleStore(err.to_string())
    }
}

impl OxigraphTripleStore {
    /// An empty in-memory store.
    pub fn new() -> Result<Self> {
        Ok(Self { store: Store::new()? })
    }

    /// Loads Turtle text into the default graph.
    pub fn load_turtle(&self, data: &str) -> Result<()> {
        self.store
            .load_from_reader(RdfFormat::Turtle, data.as_bytes())
            .map_err(|e| HybridError::TripleStore(format!("cannot load Turtle: {}", e)))
    }

    /// Number of quads in the store.
    pub fn len(&self) -> Result<usize> {
        Ok(self.store.len()?)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.store.is_empty()?)
    }
}

fn evaluate(store: &Store, query: &str) -> Result<SolutionTable> {
    debug!("Evaluating graph query on Oxigraph:\n{}", query);
    let evaluator = SparqlEvaluator::new();
    let parsed_query = evaluator
        .parse_query(query)
        .map_err(|e| HybridError::TripleStore(e.to_string()))?;
    let results = parsed_query.on_store(store).execute()?;

    let QueryResults::Solutions(solutions) = results else {
        return Err(HybridError::TripleStore(
            "only SELECT queries return solution tables".to_string(),
        ));
    };
    let variables: Vec<String> =
        solutions.variables().iter().map(|v| v.as_str().to_string()).collect();
    let mut rows = Vec::new();
    for solution in solutions {
        let solution = solution?;
        let row = variables
            .iter()
            .map(|var| solution.get(var.as_str()).map(term_to_value).transpose())
            .collect::<Result<Vec<_>>>()?;
        rows.push(row);
    }
    Ok(SolutionTable::new(variables, rows))
}

#[async_trait]
impl TripleStore for OxigraphTripleStore {
    async fn select(&self, query: &str) -> Result<SolutionTable> {
        let store = self.store.clone();
        let query = query.to_string();
        tokio::task::spawn_blocking(move || evaluate(&store, &query))
            .await
            .map_err(|e| HybridError::TripleStore(format!("graph evaluation task failed: {}", e)))?
    }

    async fn update(&self, update: &str) -> Result<()> {
        SparqlEvaluator::new()
            .parse_update(update)
            .map_err(|e| HybridError::TripleStore(e.to_string()))?
            .on_store(&self.store)
            .execute()
            .map_err(|e| HybridError::TripleStore(e.to_string()))
    }
}

/// Converts an Oxigraph term to a [`Value`]; blank nodes keep their `_:` label.
pub fn term_to_value(term: &Term) -> Result<Value> {
    match term {
        Term::NamedNode(node) => Ok(Value::Iri(node.as_str().to_string())),
        Term::BlankNode(node) => Ok(Value::String(format!("_:{}", node.as_str()))),
        Term::Literal(literal) => {
            if literal.language().is_some() {
                return Ok(Value::String(literal.value().to_string()));
            }
            Value::from_literal(literal.value(), Some(literal.datatype().as_str()))
        }
        #[allow(unreachable_patterns)]
        other => Ok(Value::String(other.to_string())),
    }
}
