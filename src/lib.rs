//! # Chronograph
//!
//! Chronograph is a hybrid query engine answering queries that span a
//! knowledge graph and time-series data kept in separate backends.
//!
//! Graph queries describe physical assets and how they link to their
//! series. The engine isolates the time-series part of a query, sends the
//! rest to the triple store, reads the matching series from the active
//! backend and joins both halves into one table.
//!
//! ## Features
//!
//! - Time-series pattern detection and pushdown of time ranges, value
//!   predicates and window aggregation
//! - Columnar SQL warehouse, industrial historian and in-memory backends
//! - A compact path DSL compiled into hybrid queries
//! - Embedded (Oxigraph) and remote SPARQL triple stores
//!
//! ## Example
//!
//! ```rust,no_run
//! use chronograph::{Engine, OxigraphTripleStore, Result};
//! use std::sync::Arc;
//!
//! async fn example() -> Result<()> {
//!     let mut engine = Engine::new(Arc::new(OxigraphTripleStore::new()?))?;
//!     engine.set_class_namespace("http://example.org/types#");
//!     engine.add_connective(".", "http://example.org/types#hasSensor")?;
//!     let table = engine.execute_dsl_query("Widget.Sensor aggregate mean 5s").await?;
//!     println!("{}", table);
//!     Ok(())
//! }
//! ```

#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::redundant_closure_for_method_calls)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::new_without_default)]
#![allow(clippy::too_many_lines)]

/// Core data structures and types
pub mod core;

/// Graph-pattern query algebra
pub mod algebra;

/// SPARQL parsing and lowering, and the path DSL parser
pub mod parsing;

/// Time-series backend adapters
pub mod backends;

/// Virtualized time-series table registry
pub mod registry;

/// Time-series pattern detection and query splitting
pub mod splitter;

/// Execution of split hybrid queries
pub mod execution;

/// Triple store clients
pub mod querying;

/// Path DSL compilation
pub mod dsl;

/// Engine facade
pub mod api;

/// Configuration file
pub mod config;

pub mod error;

// Re-export commonly used types
pub use api::Engine;
pub use core::ResultTable;
pub use error::{HybridError, Result};
pub use querying::{OxigraphTripleStore, SparqlHttpStore, TripleStore};
