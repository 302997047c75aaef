//! Remote triple store reached over the SPARQL 1.1 protocol.

use crate::core::{xsd, Value};
use crate::error::{HybridError, Result};
use crate::querying::triple_store::{SolutionTable, TripleStore};
use async_trait::async_trait;
use log::debug;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

const RESULTS_JSON: &str = "application/sparql-results+json";

#[derive(Debug, Clone)]
pub struct SparqlHttpStore {
    query_endpoint: String,
    update_endpoint: Option<String>,
    client: reqwest::Client,
    timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct SparqlResults {
    head: SparqlHead,
    results: SparqlBindings,
}

#[derive(Debug, Deserialize)]
struct SparqlHead {
    #[serde(default)]
    vars: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct SparqlBindings {
    bindings: Vec<HashMap<String, SparqlTerm>>,
}

#[derive(Debug, Deserialize)]
struct SparqlTerm {
    #[serde(rename = "type")]
    kind: String,
    value: String,
    datatype: Option<String>,
    #[serde(rename = "xml:lang")]
    lang: Option<String>,
}

impl SparqlHttpStore {
    pub fn new(query_endpoint: impl Into<String>) -> Self {
        Self {
            query_endpoint: query_endpoint.into(),
            update_endpoint: None,
            client: reqwest::Client::new(),
            timeout: Duration::from_secs(60),
        }
    }

    pub fn with_update_endpoint(mut self, update_endpoint: impl Into<String>) -> Self {
        self.update_endpoint = Some(update_endpoint.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn post_form(&self, endpoint: &str, field: &str, body: &str) -> Result<reqwest::Response> {
        let response = self
            .client
            .post(endpoint)
            .timeout(self.timeout)
            .header(reqwest::header::ACCEPT, RESULTS_JSON)
            .form(&[(field, body)])
            .send()
            .await
            .map_err(|e| HybridError::TripleStore(format!("{}: {}", endpoint, e)))?;
        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(HybridError::TripleStore(format!("{} answered {}: {}", endpoint, status, text)));
        }
        Ok(response)
    }
}

#[async_trait]
impl TripleStore for SparqlHttpStore {
    async fn select(&self, query: &str) -> Result<SolutionTable> {
        debug!("Sending graph query to {}", self.query_endpoint);
        let response = self.post_form(&self.query_endpoint, "query", query).await?;
        let text = response.text().await.map_err(|e| HybridError::TripleStore(e.to_string()))?;
        parse_results(&text)
    }

    async fn update(&self, update: &str) -> Result<()> {
        let endpoint = self.update_endpoint.as_deref().unwrap_or(&self.query_endpoint);
        self.post_form(endpoint, "update", update).await?;
        Ok(())
    }
}

/// Parses a SPARQL JSON results document.
pub fn parse_results(text: &str) -> Result<SolutionTable> {
    let results: SparqlResults = serde_json::from_str(text)
        .map_err(|e| HybridError::TripleStore(format!("malformed SPARQL results: {}", e)))?;
    let variables = results.head.vars;
    let rows = results
        .results
        .bindings
        .into_iter()
        .map(|binding| {
            variables
                .iter()
                .map(|var| binding.get(var).map(term_to_value).transpose())
                .collect::<Result<Vec<_>>>()
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(SolutionTable::new(variables, rows))
}

fn term_to_value(term: &SparqlTerm) -> Result<Value> {
    match term.kind.as_str() {
        "uri" => Ok(Value::Iri(term.value.clone())),
        "bnode" => Ok(Value::String(format!("_:{}", term.value))),
        "literal" | "typed-literal" if term.lang.is_none() => Value::from_literal(
            &term.value,
            Some(term.datatype.as_deref().unwrap_or(xsd::STRING)),
        ),
        "literal" | "typed-literal" => Ok(Value::String(term.value.clone())),
        other => Err(HybridError::TripleStore(format!("unknown term type '{}'", other))),
    }
}
