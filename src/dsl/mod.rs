//! Path DSL compilation
//!
//! Turns parsed path queries such as
//!
//! ```text
//! BigWidget.ImportantSensor > 50 from 2022-08-17T10:42:00Z to 2022-08-17T10:43:00Z aggregate mean 5s
//! ```
//!
//! into hybrid queries the splitter understands. Labels are resolved
//! through a configurable name predicate or class namespace, connectives
//! through a [`ConnectiveMapping`].

pub mod compiler;
pub mod connective_mapping;

pub use compiler::{DslCompiler, TIMESTAMP_VARIABLE};
pub use connective_mapping::ConnectiveMapping;
