//! Hybrid Query Splitter
//!
//! Isolates the time-series sub-patterns of a graph query so they can be
//! answered by a time-series backend instead of the triple store.
//!
//! # Components
//!
//! - **Vocabulary** - relation IRIs that make up a time-series shape
//! - **Splitter** - detects shapes and produces a [`SplitQuery`]
//! - **PushdownSpec** - identifiers, time range, value predicates and
//!   aggregation of one backend read
//!
//! A shape is `?series hasDataPoint ?point` where `?point` is used only as
//! the subject of `hasTimestamp ?t` and/or `hasValue ?v`, and neither `?t`
//! nor `?v` appears in any other triple. Those triples are replaced by a link
//! from `?series` to its backend identifier; comparisons of `?t` / `?v` with
//! literals become pushdown conditions and all other conditions mentioning
//! them are evaluated after the merge.

pub mod query_splitter;
pub mod vocabulary;

pub use query_splitter::{OutputColumn, PushdownSpec, SplitQuery, Splitter};
pub use vocabulary::Vocabulary;
