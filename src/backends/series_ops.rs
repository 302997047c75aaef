//! Client-side evaluation of read requests over fetched series rows.
//!
//! Backends that cannot push a predicate or an aggregation down use these
//! functions so every adapter produces identical rows for identical requests.

use crate::backends::{ReadRequest, SeriesRow};
use crate::core::{AggregateFunction, Aggregation, TimeRange, Value, ValuePredicate};
use crate::error::{HybridError, Result};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

/// Keeps rows whose identifier is requested, whose timestamp lies in the
/// range and whose value satisfies every predicate.
pub fn filter_rows(rows: Vec<SeriesRow>, request: &ReadRequest) -> Vec<SeriesRow> {
    rows.into_iter()
        .filter(|row| request.identifiers.iter().any(|id| *id == row.identifier))
        .filter(|row| request.time_range.contains(&row.timestamp))
        .filter(|row| satisfies_all(&row.value, &request.value_predicates))
        .collect()
}

pub fn satisfies_all(value: &Value, predicates: &[ValuePredicate]) -> bool {
    predicates.iter().all(|predicate| predicate.matches(value))
}

/// Orders rows by the position of their identifier in `identifiers`, then by
/// ascending timestamp. The sort is stable.
pub fn sort_rows(rows: &mut [SeriesRow], identifiers: &[String]) {
    let rank: HashMap<&str, usize> =
        identifiers.iter().enumerate().map(|(idx, id)| (id.as_str(), idx)).collect();
    rows.sort_by(|a, b| {
        let ra = rank.get(a.identifier.as_str()).copied().unwrap_or(usize::MAX);
        let rb = rank.get(b.identifier.as_str()).copied().unwrap_or(usize::MAX);
        ra.cmp(&rb).then(a.timestamp.cmp(&b.timestamp))
    });
}

/// Buckets rows into consecutive windows and applies the aggregate function.
///
/// Windows start at the range start, or at the earliest timestamp among the
/// rows when the start is unbounded. Empty windows produce no row; each output
/// row is stamped with its window start.
pub fn aggregate(
    rows: Vec<SeriesRow>,
    aggregation: &Aggregation,
    time_range: &TimeRange,
) -> Result<Vec<SeriesRow>> {
    match time_range.start_instant().or_else(|| rows.iter().map(|row| row.timestamp).min()) {
        Some(origin) => aggregate_from(rows, aggregation, origin),
        None => Ok(Vec::new()),
    }
}

/// Buckets rows into windows counted from `origin`.
pub fn aggregate_from(
    rows: Vec<SeriesRow>,
    aggregation: &Aggregation,
    origin: DateTime<Utc>,
) -> Result<Vec<SeriesRow>> {
    let window_ms = aggregation.window_millis();
    let origin_ms = origin.timestamp_millis();

    let mut buckets: BTreeMap<(String, i64), Vec<Value>> = BTreeMap::new();
    for row in rows {
        let bucket = (row.timestamp.timestamp_millis() - origin_ms).div_euclid(window_ms);
        buckets.entry((row.identifier, bucket)).or_default().push(row.value);
    }

    buckets
        .into_iter()
        .map(|((identifier, bucket), values)| {
            Ok(SeriesRow {
                identifier,
                timestamp: window_start(origin, bucket, window_ms),
                value: apply_function(aggregation.function, &values)?,
            })
        })
        .collect()
}

/// Start instant of window number `bucket`.
pub fn window_start(origin: DateTime<Utc>, bucket: i64, window_ms: i64) -> DateTime<Utc> {
    origin + ChronoDuration::milliseconds(bucket.saturating_mul(window_ms))
}

pub fn apply_function(function: AggregateFunction, values: &[Value]) -> Result<Value> {
    match function {
        AggregateFunction::Count => Ok(Value::Integer(values.len() as i64)),
        AggregateFunction::Mean => {
            let numbers = numeric(values, function)?;
            Ok(Value::Double(numbers.iter().sum::<f64>() / numbers.len().max(1) as f64))
        }
        AggregateFunction::Sum => {
            if values.iter().all(|v| matches!(v, Value::Integer(_))) {
                let total = values
                    .iter()
                    .filter_map(|v| match v {
                        Value::Integer(i) => Some(*i),
                        _ => None,
                    })
                    .fold(0i64, i64::saturating_add);
                Ok(Value::Integer(total))
            } else {
                Ok(Value::Double(numeric(values, function)?.iter().sum()))
            }
        }
        AggregateFunction::Min => extreme(values, Ordering::Less),
        AggregateFunction::Max => extreme(values, Ordering::Greater),
    }
}

fn numeric(values: &[Value], function: AggregateFunction) -> Result<Vec<f64>> {
    values
        .iter()
        .map(|v| {
            v.as_f64().ok_or_else(|| {
                HybridError::TypeMismatch(format!("cannot apply {} to non-numeric value {}", function, v))
            })
        })
        .collect()
}

fn extreme(values: &[Value], wanted: Ordering) -> Result<Value> {
    let mut best: Option<&Value> = None;
    for value in values {
        best = match best {
            None => Some(value),
            Some(current) => match value.partial_compare(current) {
                Some(ordering) if ordering == wanted => Some(value),
                Some(_) => Some(current),
                None => {
                    return Err(HybridError::TypeMismatch(format!(
                        "cannot compare {} with {}",
                        value, current
                    )))
                }
            },
        };
    }
    best.cloned()
        .ok_or_else(|| HybridError::TypeMismatch("empty aggregation window".to_string()))
}

/// Full client-side evaluation: filter, aggregate when requested, sort.
pub fn evaluate(rows: Vec<SeriesRow>, request: &ReadRequest) -> Result<Vec<SeriesRow>> {
    let filtered = filter_rows(rows, request);
    let mut output = match &request.aggregation {
        Some(aggregation) => aggregate(filtered, aggregation, &request.time_range)?,
        None => filtered,
    };
    sort_rows(&mut output, &request.identifiers);
    Ok(output)
}
