//! Virtualized time-series table registry

pub mod table_registry;

pub use table_registry::{TableRegistry, VirtualizedTimeSeriesTable};
