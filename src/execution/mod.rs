//! Query Execution Module
//!
//! Executes split hybrid queries: the residual graph query, the backend
//! reads of every pushdown spec and the merge of both.
//!
//! # Components
//!
//! - **HybridExecutor** - orchestrates the triple store and backend reads
//! - **merge** - inner join of graph solutions with series points,
//!   post-filters, projection, DISTINCT and ordering
//!
//! # Example
//!
//! ```ignore
//! use chronograph::execution::HybridExecutor;
//! use tokio_util::sync::CancellationToken;
//!
//! let executor = HybridExecutor::new(store, registry);
//! let table = executor.execute(&split, &CancellationToken::new()).await?;
//! println!("{}", table);
//! ```

pub mod hybrid_executor;
pub mod merge;

pub use hybrid_executor::{solutions_to_table, HybridExecutor};
