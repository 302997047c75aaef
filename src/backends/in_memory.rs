use crate::backends::{series_ops, ReadRequest, SeriesRow};
use crate::core::{family_of_datatype, Value};
use crate::error::{HybridError, Result};
use crate::registry::VirtualizedTimeSeriesTable;
use chrono::{DateTime, Utc};
use log::debug;
use std::collections::HashMap;

/// Series kept in process memory, keyed by identifier.
#[derive(Debug, Clone)]
pub struct InMemoryBackend {
    series: HashMap<String, Vec<(DateTime<Utc>, Value)>>,
    push_value_predicates: bool,
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self { series: HashMap::new(), push_value_predicates: true }
    }

    /// Behaves like a backend whose query language cannot express value
    /// predicates; reads carrying them fail with `UnsupportedPredicate`.
    pub fn without_value_predicates(mut self) -> Self {
        self.push_value_predicates = false;
        self
    }

    pub fn with_series(
        mut self,
        identifier: impl Into<String>,
        points: Vec<(DateTime<Utc>, Value)>,
    ) -> Self {
        self.insert_series(identifier, points);
        self
    }

    /// Appends points to a series, keeping it ordered by timestamp.
    pub fn insert_series(
        &mut self,
        identifier: impl Into<String>,
        points: Vec<(DateTime<Utc>, Value)>,
    ) {
        let series = self.series.entry(identifier.into()).or_default();
        series.extend(points);
        series.sort_by_key(|(timestamp, _)| *timestamp);
    }

    pub fn series_count(&self) -> usize {
        self.series.len()
    }

    pub async fn read(
        &self,
        table: &VirtualizedTimeSeriesTable,
        request: &ReadRequest,
    ) -> Result<Vec<SeriesRow>> {
        if !self.push_value_predicates && !request.value_predicates.is_empty() {
            return Err(HybridError::UnsupportedPredicate(format!(
                "value predicates on {}",
                table.qualified_name()
            )));
        }
        let declared = family_of_datatype(&table.value_datatype);
        let mut rows = Vec::new();
        for identifier in &request.identifiers {
            let Some(points) = self.series.get(identifier) else {
                continue;
            };
            for (timestamp, value) in points {
                if value.family() != declared {
                    return Err(HybridError::TypeMismatch(format!(
                        "series {} holds {} but {} declares <{}>",
                        identifier,
                        value,
                        table.qualified_name(),
                        table.value_datatype
                    )));
                }
                rows.push(SeriesRow {
                    identifier: identifier.clone(),
                    timestamp: *timestamp,
                    value: value.clone(),
                });
            }
        }
        let output = series_ops::evaluate(rows, request)?;
        debug!(
            "in-memory read of {} identifiers from {} returned {} rows",
            request.identifiers.len(),
            table.qualified_name(),
            output.len()
        );
        Ok(output)
    }
}
