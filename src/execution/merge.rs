//! Joins graph solutions with fetched series.
//!
//! Every graph solution is combined with the points of each spec's series
//! (inner join on the identifier). Specs sharing a timestamp variable only
//! combine points at equal timestamps. Post-filters run on the combined row;
//! a filter that cannot be evaluated rejects the row.
//!
//! Timestamp and value columns carry their declared types, so an empty
//! result keeps its schema. Only graph columns are typed from their cells.

use crate::core::table::infer_column_type;
use crate::core::{Column, ColumnType, ResultTable, Value};
use crate::querying::SolutionTable;
use crate::splitter::{OutputColumn, SplitQuery};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};

/// Points of one series, ascending by timestamp.
pub type SeriesPoints = Vec<(DateTime<Utc>, Value)>;

/// `(spec index, qualified table name, identifier)`
pub type SeriesKey = (usize, String, String);

/// Per graph solution and spec: the `(table, identifier)` to join with, or
/// `None` when the solution left the identifier unbound.
pub type RowKeys = Vec<Vec<Option<(String, String)>>>;

struct MergedRow {
    graph_row: usize,
    timestamps: Vec<DateTime<Utc>>,
    cells: Vec<Option<Value>>,
}

/// `value_types[spec]` is the declared type of that spec's value column.
pub fn merge(
    split: &SplitQuery,
    solutions: &SolutionTable,
    row_keys: &RowKeys,
    series: &HashMap<SeriesKey, SeriesPoints>,
    value_types: &[ColumnType],
) -> ResultTable {
    let spec_count = split.specs.len();
    let synchronized: Vec<Option<usize>> = (0..spec_count).map(|s| split.synchronized_with(s)).collect();

    let mut merged = Vec::new();
    'solutions: for (graph_row, keys) in row_keys.iter().enumerate() {
        let mut per_spec: Vec<&[(DateTime<Utc>, Value)]> = Vec::with_capacity(spec_count);
        for (spec, key) in keys.iter().enumerate() {
            let Some((table, identifier)) = key else {
                continue 'solutions;
            };
            let points = series
                .get(&(spec, table.clone(), identifier.clone()))
                .map_or(&[][..], Vec::as_slice);
            if points.is_empty() {
                continue 'solutions;
            }
            per_spec.push(points);
        }

        for combination in combinations(&per_spec, &synchronized) {
            let lookup = |variable: &str| -> Option<Value> {
                for (spec, definition) in split.specs.iter().enumerate() {
                    let (timestamp, value) = &per_spec[spec][combination[spec]];
                    if definition.timestamp_variable.as_deref() == Some(variable) {
                        return Some(Value::DateTime(*timestamp));
                    }
                    if definition.value_variable.as_deref() == Some(variable) {
                        return Some(value.clone());
                    }
                }
                solutions.value(graph_row, variable).cloned()
            };
            if !split.post_filters.iter().all(|f| f.evaluate(&lookup) == Some(true)) {
                continue;
            }
            let cells = split
                .output
                .iter()
                .map(|column| match column {
                    OutputColumn::Graph { variable, .. } => solutions.value(graph_row, variable).cloned(),
                    OutputColumn::Timestamp { spec, .. } => {
                        Some(Value::DateTime(per_spec[*spec][combination[*spec]].0))
                    }
                    OutputColumn::Value { spec, .. } => Some(per_spec[*spec][combination[*spec]].1.clone()),
                })
                .collect();
            let timestamps =
                combination.iter().enumerate().map(|(spec, idx)| per_spec[spec][*idx].0).collect();
            merged.push(MergedRow { graph_row, timestamps, cells });
        }
    }

    merged.sort_by(|a, b| a.graph_row.cmp(&b.graph_row).then_with(|| a.timestamps.cmp(&b.timestamps)));

    let mut rows: Vec<Vec<Option<Value>>> = merged.into_iter().map(|row| row.cells).collect();
    if split.distinct {
        let mut seen = HashSet::new();
        rows.retain(|row| seen.insert(format!("{:?}", row)));
    }
    let columns = split
        .output
        .iter()
        .enumerate()
        .map(|(idx, column)| {
            let column_type = match column {
                OutputColumn::Graph { .. } => {
                    infer_column_type(rows.iter().filter_map(|row| row.get(idx)?.as_ref()))
                }
                OutputColumn::Timestamp { .. } => ColumnType::DateTime,
                OutputColumn::Value { spec, .. } => {
                    value_types.get(*spec).copied().unwrap_or(ColumnType::String)
                }
            };
            Column { name: column.name().to_string(), column_type }
        })
        .collect();
    ResultTable::new(columns, rows)
}

/// Index tuples picking one point per spec; a synchronized spec only pairs
/// with points at its partner's timestamp.
fn combinations(
    per_spec: &[&[(DateTime<Utc>, Value)]],
    synchronized: &[Option<usize>],
) -> Vec<Vec<usize>> {
    let mut partial: Vec<Vec<usize>> = vec![Vec::new()];
    for (spec, points) in per_spec.iter().enumerate() {
        let mut extended = Vec::new();
        for combination in &partial {
            let candidates = match synchronized[spec] {
                Some(partner) => {
                    let instant = per_spec[partner][combination[partner]].0;
                    let low = points.partition_point(|(ts, _)| *ts < instant);
                    let high = points.partition_point(|(ts, _)| *ts <= instant);
                    low..high
                }
                None => 0..points.len(),
            };
            for idx in candidates {
                let mut next = combination.clone();
                next.push(idx);
                extended.push(next);
            }
        }
        partial = extended;
    }
    partial
}
