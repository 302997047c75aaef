//! Engine facade
//!
//! [`Engine`] owns the configuration surface (name predicate, class
//! namespace, connective mapping, vocabulary, active backend, virtualized
//! tables) and the entry points executing SPARQL and DSL queries.

pub mod engine;

pub use engine::Engine;
