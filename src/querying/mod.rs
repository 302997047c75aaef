//! Triple store access
//!
//! The graph half of a hybrid query runs against a [`TripleStore`].
//!
//! # Components
//!
//! - **TripleStore** - async trait answering SELECT queries with a [`SolutionTable`]
//! - **OxigraphTripleStore** - in-process Oxigraph store, loadable from Turtle
//! - **SparqlHttpStore** - remote store over the SPARQL 1.1 protocol

pub mod oxigraph_adapter;
pub mod sparql_http;
pub mod triple_store;

pub use oxigraph_adapter::OxigraphTripleStore;
pub use sparql_http::SparqlHttpStore;
pub use triple_store::{SolutionTable, TripleStore};
