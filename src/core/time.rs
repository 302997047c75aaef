//! Time ranges and window aggregation directives

use crate::core::Comparator;
use crate::error::{HybridError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Bound;
use std::str::FromStr;
use std::time::Duration;

/// A possibly open-ended interval of timestamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub start: Bound<DateTime<Utc>>,
    pub end: Bound<DateTime<Utc>>,
}

impl Default for TimeRange {
    fn default() -> Self {
        Self::unbounded()
    }
}

impl TimeRange {
    pub fn unbounded() -> Self {
        Self { start: Bound::Unbounded, end: Bound::Unbounded }
    }

    /// Both ends included.
    pub fn closed(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start: Bound::Included(start), end: Bound::Included(end) }
    }

    /// Narrows the range with `t <op> instant`.
    ///
    /// `!=` cannot be expressed as a range and is rejected.
    pub fn constrain(&mut self, comparator: Comparator, instant: DateTime<Utc>) -> Result<()> {
        match comparator {
            Comparator::Gt => self.start = tighter_start(self.start, Bound::Excluded(instant)),
            Comparator::Ge => self.start = tighter_start(self.start, Bound::Included(instant)),
            Comparator::Lt => self.end = tighter_end(self.end, Bound::Excluded(instant)),
            Comparator::Le => self.end = tighter_end(self.end, Bound::Included(instant)),
            Comparator::Eq => {
                self.start = tighter_start(self.start, Bound::Included(instant));
                self.end = tighter_end(self.end, Bound::Included(instant));
            }
            Comparator::Ne => {
                return Err(HybridError::UnsupportedPredicate(
                    "'!=' cannot bound a time range".to_string(),
                ))
            }
        }
        Ok(())
    }

    pub fn intersect(&self, other: &TimeRange) -> TimeRange {
        TimeRange {
            start: tighter_start(self.start, other.start),
            end: tighter_end(self.end, other.end),
        }
    }

    pub fn contains(&self, instant: &DateTime<Utc>) -> bool {
        let after_start = match self.start {
            Bound::Included(s) => *instant >= s,
            Bound::Excluded(s) => *instant > s,
            Bound::Unbounded => true,
        };
        let before_end = match self.end {
            Bound::Included(e) => *instant <= e,
            Bound::Excluded(e) => *instant < e,
            Bound::Unbounded => true,
        };
        after_start && before_end
    }

    /// The instant windows are anchored on, when the start is bounded.
    pub fn start_instant(&self) -> Option<DateTime<Utc>> {
        match self.start {
            Bound::Included(s) | Bound::Excluded(s) => Some(s),
            Bound::Unbounded => None,
        }
    }

    pub fn end_instant(&self) -> Option<DateTime<Utc>> {
        match self.end {
            Bound::Included(e) | Bound::Excluded(e) => Some(e),
            Bound::Unbounded => None,
        }
    }

    pub fn is_unbounded(&self) -> bool {
        matches!((self.start, self.end), (Bound::Unbounded, Bound::Unbounded))
    }
}

fn tighter_start(
    a: Bound<DateTime<Utc>>,
    b: Bound<DateTime<Utc>>,
) -> Bound<DateTime<Utc>> {
    match (a, b) {
        (Bound::Unbounded, other) | (other, Bound::Unbounded) => other,
        (Bound::Included(x), Bound::Included(y)) => Bound::Included(x.max(y)),
        (Bound::Excluded(x), Bound::Excluded(y)) => Bound::Excluded(x.max(y)),
        (Bound::Included(i), Bound::Excluded(e)) | (Bound::Excluded(e), Bound::Included(i)) => {
            if i > e {
                Bound::Included(i)
            } else {
                Bound::Excluded(e)
            }
        }
    }
}

fn tighter_end(a: Bound<DateTime<Utc>>, b: Bound<DateTime<Utc>>) -> Bound<DateTime<Utc>> {
    match (a, b) {
        (Bound::Unbounded, other) | (other, Bound::Unbounded) => other,
        (Bound::Included(x), Bound::Included(y)) => Bound::Included(x.min(y)),
        (Bound::Excluded(x), Bound::Excluded(y)) => Bound::Excluded(x.min(y)),
        (Bound::Included(i), Bound::Excluded(e)) | (Bound::Excluded(e), Bound::Included(i)) => {
            if i < e {
                Bound::Included(i)
            } else {
                Bound::Excluded(e)
            }
        }
    }
}

/// Aggregation functions applicable to a window of values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregateFunction {
    Mean,
    Min,
    Max,
    Sum,
    Count,
}

impl AggregateFunction {
    pub fn name(self) -> &'static str {
        match self {
            AggregateFunction::Mean => "mean",
            AggregateFunction::Min => "min",
            AggregateFunction::Max => "max",
            AggregateFunction::Sum => "sum",
            AggregateFunction::Count => "count",
        }
    }
}

impl FromStr for AggregateFunction {
    type Err = HybridError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "mean" | "avg" | "average" => Ok(AggregateFunction::Mean),
            "min" => Ok(AggregateFunction::Min),
            "max" => Ok(AggregateFunction::Max),
            "sum" => Ok(AggregateFunction::Sum),
            "count" => Ok(AggregateFunction::Count),
            other => Err(HybridError::ParseError(format!("unknown aggregate function '{}'", other))),
        }
    }
}

impl fmt::Display for AggregateFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Window aggregation directive attached to a hybrid query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Aggregation {
    pub function: AggregateFunction,
    window: Duration,
}

impl Aggregation {
    /// Fails with `ParseError` for a zero-length window.
    pub fn new(function: AggregateFunction, window: Duration) -> Result<Self> {
        if window.is_zero() {
            return Err(HybridError::ParseError(
                "aggregation window must be a positive duration".to_string(),
            ));
        }
        Ok(Self { function, window })
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Window length in milliseconds, at least one.
    pub fn window_millis(&self) -> i64 {
        i64::try_from(self.window.as_millis()).unwrap_or(i64::MAX).max(1)
    }
}

impl fmt::Display for Aggregation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}ms", self.function, self.window.as_millis())
    }
}
