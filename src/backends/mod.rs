//! Time-series backend adapters
//!
//! Every physical time-series source sits behind the same read contract:
//! given a virtualized table and a [`ReadRequest`], return the matching
//! `(identifier, timestamp, value)` rows, aggregated into windows when asked.
//!
//! # Components
//!
//! - **ColumnarSqlBackend** - SQL warehouse returning Arrow IPC streams over HTTP
//! - **HistorianBackend** - stateful framed binary session with an industrial historian
//! - **InMemoryBackend** - series held in process memory
//!
//! The active backend is a [`Backend`] value; replacing it switches every
//! registered table to the new source.

use crate::core::{Aggregation, TimeRange, Value, ValuePredicate};
use crate::error::Result;
use crate::registry::VirtualizedTimeSeriesTable;
use chrono::{DateTime, Utc};

pub mod columnar_sql;
pub mod historian;
pub mod in_memory;
pub mod series_ops;

pub use columnar_sql::{ColumnarSqlBackend, Credentials};
pub use historian::HistorianBackend;
pub use in_memory::InMemoryBackend;

/// One observation returned by a backend read.
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesRow {
    pub identifier: String,
    pub timestamp: DateTime<Utc>,
    pub value: Value,
}

/// What the executor asks a backend for.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReadRequest {
    /// Requested identifiers, in the order rows should come back
    pub identifiers: Vec<String>,
    pub time_range: TimeRange,
    pub value_predicates: Vec<ValuePredicate>,
    pub aggregation: Option<Aggregation>,
}

impl ReadRequest {
    /// The same identifiers and time range, with nothing else pushed down.
    pub fn raw(&self) -> ReadRequest {
        ReadRequest {
            identifiers: self.identifiers.clone(),
            time_range: self.time_range,
            value_predicates: Vec::new(),
            aggregation: None,
        }
    }
}

/// The active time-series source of an engine.
#[derive(Debug)]
pub enum Backend {
    ColumnarSql(ColumnarSqlBackend),
    HistorianRead(HistorianBackend),
    InMemory(InMemoryBackend),
}

impl Backend {
    pub fn kind(&self) -> &'static str {
        match self {
            Backend::ColumnarSql(_) => "columnar-sql",
            Backend::HistorianRead(_) => "historian",
            Backend::InMemory(_) => "in-memory",
        }
    }

    /// Reads rows for `request` from `table`.
    ///
    /// # Errors
    ///
    /// - `BackendUnavailable` on connection or authentication failure
    /// - `BackendTimeout` when the adapter's timeout elapses
    /// - `SchemaMismatch` when registered columns are missing in the backend
    /// - `UnsupportedPredicate` when a value predicate cannot be pushed down
    pub async fn read(
        &self,
        table: &VirtualizedTimeSeriesTable,
        request: &ReadRequest,
    ) -> Result<Vec<SeriesRow>> {
        match self {
            Backend::ColumnarSql(backend) => backend.read(table, request).await,
            Backend::HistorianRead(backend) => backend.read(table, request).await,
            Backend::InMemory(backend) => backend.read(table, request).await,
        }
    }
}

impl From<ColumnarSqlBackend> for Backend {
    fn from(backend: ColumnarSqlBackend) -> Self {
        Backend::ColumnarSql(backend)
    }
}

impl From<HistorianBackend> for Backend {
    fn from(backend: HistorianBackend) -> Self {
        Backend::HistorianRead(backend)
    }
}

impl From<InMemoryBackend> for Backend {
    fn from(backend: InMemoryBackend) -> Self {
        Backend::InMemory(backend)
    }
}
