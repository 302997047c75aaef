//! Query text parsing
//!
//! # Components
//!
//! - **SparqlParser** - SPARQL SELECT queries, parsed with `spargebra` and
//!   lowered to the graph-pattern algebra
//! - **DslParser** - the path DSL (`Widget.Sensor > 5 from .. to .. aggregate mean 5s`)
//! - **lexer** - regex token rules of the DSL

pub mod dsl;
pub mod lexer;
pub mod sparql;

pub use dsl::{
    Condition, ConditionOperand, ConditionOperator, ConditionedPath, DslParser, DslPathQuery, PathExpr,
    PathSegment, SegmentLabel,
};
pub use sparql::{ParsedQuery, SparqlParser};
