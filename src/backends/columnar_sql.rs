//! Columnar SQL warehouse adapter
//!
//! Reads are rendered as PostgreSQL-dialect SQL, posted to the warehouse's
//! `/sql` endpoint and answered with an Arrow IPC stream. Identifier, time
//! range and value predicates are pushed into the `WHERE` clause. Window
//! aggregation is pushed down as a `GROUP BY` over a bucket expression when
//! the range has a start; otherwise it runs client-side.

use crate::backends::{series_ops, ReadRequest, SeriesRow};
use crate::core::{family_of_datatype, xsd, AggregateFunction, Comparator, DatatypeFamily, Value};
use crate::error::{HybridError, Result};
use crate::registry::VirtualizedTimeSeriesTable;
use arrow::array::{
    Array, ArrayRef, BooleanArray, Float64Array, Int64Array, StringArray,
    TimestampMillisecondArray,
};
use arrow::compute::cast;
use arrow::datatypes::{DataType, SchemaRef, TimeUnit};
use arrow::ipc::reader::StreamReader;
use arrow::record_batch::RecordBatch;
use chrono::{DateTime, Utc};
use log::{debug, info};
use reqwest::StatusCode;
use sea_query::{
    Alias, Asterisk, Expr, Func, Order, PostgresQueryBuilder, Query, SelectStatement, SimpleExpr,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::io::Cursor;
use std::sync::Mutex;
use std::time::Duration;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Basic-auth credentials for the warehouse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

#[derive(Debug)]
pub struct ColumnarSqlBackend {
    endpoint: String,
    credentials: Option<Credentials>,
    timeout: Duration,
    client: reqwest::Client,
    validated: Mutex<HashSet<String>>,
}

#[derive(Serialize)]
struct SqlRequest<'a> {
    query: &'a str,
}

impl ColumnarSqlBackend {
    /// `endpoint` is the warehouse base URL, e.g. `http://localhost:8080`.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            credentials: None,
            timeout: DEFAULT_TIMEOUT,
            client: reqwest::Client::new(),
            validated: Mutex::new(HashSet::new()),
        }
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub async fn read(
        &self,
        table: &VirtualizedTimeSeriesTable,
        request: &ReadRequest,
    ) -> Result<Vec<SeriesRow>> {
        if request.identifiers.is_empty() {
            return Ok(Vec::new());
        }
        match tokio::time::timeout(self.timeout, self.read_within_timeout(table, request)).await {
            Ok(result) => result,
            Err(_) => Err(HybridError::BackendTimeout(format!(
                "{} did not answer within {:?}",
                self.endpoint, self.timeout
            ))),
        }
    }

    async fn read_within_timeout(
        &self,
        table: &VirtualizedTimeSeriesTable,
        request: &ReadRequest,
    ) -> Result<Vec<SeriesRow>> {
        self.validate_schema(table).await?;

        let pushed_aggregation = request.aggregation.is_some() && request.time_range.start_instant().is_some();
        let sql = render_select(table, request)?;
        debug!("columnar SQL read: {}", sql);
        let batches = self.execute(&sql).await?;

        if pushed_aggregation {
            let mut rows = decode_aggregated_rows(&batches, table, request)?;
            series_ops::sort_rows(&mut rows, &request.identifiers);
            Ok(rows)
        } else {
            let rows = decode_rows(&batches, table)?;
            series_ops::evaluate(rows, request)
        }
    }

    /// Checks once per table that the registered columns exist.
    async fn validate_schema(&self, table: &VirtualizedTimeSeriesTable) -> Result<()> {
        let name = table.qualified_name();
        let validated = self.validated.lock().map_err(|_| poisoned())?.contains(&name);
        if validated {
            return Ok(());
        }
        let schema_query =
            Query::select().column(Asterisk).from_virtualized(table).limit(0).to_string(PostgresQueryBuilder);
        let schema = self.execute_for_schema(&schema_query).await?;
        let missing: Vec<&str> =
            [&table.identifier_column, &table.timestamp_column, &table.value_column]
                .into_iter()
                .filter(|column| schema.field_with_name(column).is_err())
                .map(String::as_str)
                .collect();
        if !missing.is_empty() {
            return Err(HybridError::SchemaMismatch(format!(
                "{} has no column(s) {}",
                name,
                missing.join(", ")
            )));
        }
        info!("Validated schema of {}", name);
        self.validated.lock().map_err(|_| poisoned())?.insert(name);
        Ok(())
    }

    async fn post(&self, sql: &str) -> Result<bytes::Bytes> {
        let mut builder = self
            .client
            .post(format!("{}/sql", self.endpoint))
            .timeout(self.timeout)
            .json(&SqlRequest { query: sql });
        if let Some(credentials) = &self.credentials {
            builder = builder.basic_auth(&credentials.username, Some(&credentials.password));
        }
        let response = builder.send().await?;
        match response.status() {
            status if status.is_success() => Ok(response.bytes().await?),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(HybridError::BackendUnavailable(
                format!("{} rejected the credentials", self.endpoint),
            )),
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(HybridError::BackendUnavailable(format!(
                    "{} answered {}: {}",
                    self.endpoint, status, body
                )))
            }
        }
    }

    async fn execute(&self, sql: &str) -> Result<Vec<RecordBatch>> {
        let payload = self.post(sql).await?;
        decode_ipc(&payload).map(|(_, batches)| batches)
    }

    async fn execute_for_schema(&self, sql: &str) -> Result<SchemaRef> {
        let payload = self.post(sql).await?;
        decode_ipc(&payload).map(|(schema, _)| schema)
    }
}

fn poisoned() -> HybridError {
    HybridError::Config("schema cache lock poisoned".to_string())
}

trait FromVirtualized {
    fn from_virtualized(&mut self, table: &VirtualizedTimeSeriesTable) -> &mut Self;
}

impl FromVirtualized for SelectStatement {
    fn from_virtualized(&mut self, table: &VirtualizedTimeSeriesTable) -> &mut Self {
        if table.schema.is_empty() {
            self.from(Alias::new(&table.table_name))
        } else {
            self.from((Alias::new(&table.schema), Alias::new(&table.table_name)))
        }
    }
}

/// Renders the SQL for a read.
///
/// Aggregated reads with a bounded start group by identifier and window
/// bucket and return `identifier`, `bucket` and `value` columns. All other
/// reads return `identifier`, `timestamp` and `value`.
pub fn render_select(table: &VirtualizedTimeSeriesTable, request: &ReadRequest) -> Result<String> {
    let id_col = || Expr::col(Alias::new(&table.identifier_column));
    let ts_col = || Expr::col(Alias::new(&table.timestamp_column));
    let value_col = || Expr::col(Alias::new(&table.value_column));

    let mut select = Query::select();
    select.from_virtualized(table);
    select.and_where(id_col().is_in(request.identifiers.iter().cloned()));

    let range = &request.time_range;
    match range.start {
        std::ops::Bound::Included(start) => {
            select.and_where(ts_col().gte(start));
        }
        std::ops::Bound::Excluded(start) => {
            select.and_where(ts_col().gt(start));
        }
        std::ops::Bound::Unbounded => {}
    }
    match range.end {
        std::ops::Bound::Included(end) => {
            select.and_where(ts_col().lte(end));
        }
        std::ops::Bound::Excluded(end) => {
            select.and_where(ts_col().lt(end));
        }
        std::ops::Bound::Unbounded => {}
    }
    for predicate in &request.value_predicates {
        let literal = sql_value(&predicate.literal)?;
        let condition = match predicate.comparator {
            Comparator::Lt => value_col().lt(literal),
            Comparator::Le => value_col().lte(literal),
            Comparator::Gt => value_col().gt(literal),
            Comparator::Ge => value_col().gte(literal),
            Comparator::Eq => value_col().eq(literal),
            Comparator::Ne => value_col().ne(literal),
        };
        select.and_where(condition);
    }

    match (&request.aggregation, range.start_instant()) {
        (Some(aggregation), Some(origin)) => {
            let bucket = Expr::cust(format!(
                "FLOOR((EXTRACT(EPOCH FROM {}) * 1000 - {}) / {})",
                quote_identifier(&table.timestamp_column),
                origin.timestamp_millis(),
                aggregation.window_millis()
            ));
            let aggregated: SimpleExpr = match aggregation.function {
                AggregateFunction::Mean => Func::avg(value_col()).into(),
                AggregateFunction::Min => Func::min(value_col()).into(),
                AggregateFunction::Max => Func::max(value_col()).into(),
                AggregateFunction::Sum => Func::sum(value_col()).into(),
                AggregateFunction::Count => Func::count(value_col()).into(),
            };
            select
                .expr_as(id_col(), Alias::new("identifier"))
                .expr_as(bucket.clone(), Alias::new("bucket"))
                .expr_as(aggregated, Alias::new("value"))
                .add_group_by([SimpleExpr::from(id_col()), bucket])
                .order_by(Alias::new("identifier"), Order::Asc)
                .order_by(Alias::new("bucket"), Order::Asc);
        }
        _ => {
            select
                .expr_as(id_col(), Alias::new("identifier"))
                .expr_as(ts_col(), Alias::new("timestamp"))
                .expr_as(value_col(), Alias::new("value"))
                .order_by(Alias::new("identifier"), Order::Asc)
                .order_by(Alias::new("timestamp"), Order::Asc);
        }
    }
    Ok(select.to_string(PostgresQueryBuilder))
}

fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn sql_value(value: &Value) -> Result<sea_query::Value> {
    Ok(match value {
        Value::Integer(i) => (*i).into(),
        Value::Double(d) => (*d).into(),
        Value::Boolean(b) => (*b).into(),
        Value::String(s) | Value::Iri(s) => s.clone().into(),
        Value::DateTime(dt) => (*dt).into(),
    })
}

/// Schema and batches of an Arrow IPC stream.
pub fn decode_ipc(payload: &[u8]) -> Result<(SchemaRef, Vec<RecordBatch>)> {
    let reader = StreamReader::try_new(Cursor::new(payload), None)?;
    let schema = reader.schema();
    let batches = reader.collect::<std::result::Result<Vec<_>, _>>()?;
    Ok((schema, batches))
}

fn column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a ArrayRef> {
    batch
        .column_by_name(name)
        .ok_or_else(|| HybridError::SchemaMismatch(format!("result has no column '{}'", name)))
}

fn cast_column(array: &ArrayRef, to: &DataType, name: &str) -> Result<ArrayRef> {
    cast(array, to).map_err(|e| {
        HybridError::TypeMismatch(format!("column '{}' cannot be read as {}: {}", name, to, e))
    })
}

fn downcast<'a, T: 'static>(array: &'a ArrayRef, name: &str) -> Result<&'a T> {
    array
        .as_any()
        .downcast_ref::<T>()
        .ok_or_else(|| HybridError::TypeMismatch(format!("unexpected Arrow type for '{}'", name)))
}

fn identifiers(batch: &RecordBatch) -> Result<ArrayRef> {
    cast_column(column(batch, "identifier")?, &DataType::Utf8, "identifier")
}

/// Turns the value column into typed cells according to `family`.
fn values(array: &ArrayRef, family: ValueKind) -> Result<Vec<Option<Value>>> {
    Ok(match family {
        ValueKind::Integer => {
            let cast = cast_column(array, &DataType::Int64, "value")?;
            let typed = downcast::<Int64Array>(&cast, "value")?;
            (0..typed.len()).map(|i| typed.is_valid(i).then(|| Value::Integer(typed.value(i)))).collect()
        }
        ValueKind::Double => {
            let cast = cast_column(array, &DataType::Float64, "value")?;
            let typed = downcast::<Float64Array>(&cast, "value")?;
            (0..typed.len()).map(|i| typed.is_valid(i).then(|| Value::Double(typed.value(i)))).collect()
        }
        ValueKind::Boolean => {
            let cast = cast_column(array, &DataType::Boolean, "value")?;
            let typed = downcast::<BooleanArray>(&cast, "value")?;
            (0..typed.len()).map(|i| typed.is_valid(i).then(|| Value::Boolean(typed.value(i)))).collect()
        }
        ValueKind::String => {
            let cast = cast_column(array, &DataType::Utf8, "value")?;
            let typed = downcast::<StringArray>(&cast, "value")?;
            (0..typed.len())
                .map(|i| typed.is_valid(i).then(|| Value::String(typed.value(i).to_string())))
                .collect()
        }
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ValueKind {
    Integer,
    Double,
    Boolean,
    String,
}

fn declared_kind(datatype: &str) -> ValueKind {
    match family_of_datatype(datatype) {
        DatatypeFamily::Numeric
            if matches!(datatype, xsd::DOUBLE | xsd::FLOAT | xsd::DECIMAL) =>
        {
            ValueKind::Double
        }
        DatatypeFamily::Numeric => ValueKind::Integer,
        DatatypeFamily::Boolean => ValueKind::Boolean,
        _ => ValueKind::String,
    }
}

/// Decodes `identifier`, `timestamp`, `value` batches; null cells are skipped.
pub fn decode_rows(
    batches: &[RecordBatch],
    table: &VirtualizedTimeSeriesTable,
) -> Result<Vec<SeriesRow>> {
    let kind = declared_kind(&table.value_datatype);
    let mut rows = Vec::new();
    for batch in batches {
        let ids = identifiers(batch)?;
        let ids = downcast::<StringArray>(&ids, "identifier")?;
        let timestamps = cast_column(
            column(batch, "timestamp")?,
            &DataType::Timestamp(TimeUnit::Millisecond, Some("UTC".into())),
            "timestamp",
        )?;
        let timestamps = downcast::<TimestampMillisecondArray>(&timestamps, "timestamp")?;
        let cells = values(column(batch, "value")?, kind)?;
        for (i, value) in cells.into_iter().enumerate() {
            let (Some(value), true, true) = (value, ids.is_valid(i), timestamps.is_valid(i)) else {
                continue;
            };
            rows.push(SeriesRow {
                identifier: ids.value(i).to_string(),
                timestamp: millis_to_instant(timestamps.value(i))?,
                value,
            });
        }
    }
    Ok(rows)
}

/// Decodes `identifier`, `bucket`, `value` batches of a pushed-down aggregation.
pub fn decode_aggregated_rows(
    batches: &[RecordBatch],
    table: &VirtualizedTimeSeriesTable,
    request: &ReadRequest,
) -> Result<Vec<SeriesRow>> {
    let (Some(aggregation), Some(origin)) = (&request.aggregation, request.time_range.start_instant())
    else {
        return decode_rows(batches, table);
    };
    let kind = match aggregation.function {
        AggregateFunction::Count => ValueKind::Integer,
        AggregateFunction::Mean => ValueKind::Double,
        AggregateFunction::Sum | AggregateFunction::Min | AggregateFunction::Max => {
            declared_kind(&table.value_datatype)
        }
    };
    let window_ms = aggregation.window_millis();
    let mut rows = Vec::new();
    for batch in batches {
        let ids = identifiers(batch)?;
        let ids = downcast::<StringArray>(&ids, "identifier")?;
        let buckets = cast_column(column(batch, "bucket")?, &DataType::Int64, "bucket")?;
        let buckets = downcast::<Int64Array>(&buckets, "bucket")?;
        let cells = values(column(batch, "value")?, kind)?;
        for (i, value) in cells.into_iter().enumerate() {
            let (Some(value), true, true) = (value, ids.is_valid(i), buckets.is_valid(i)) else {
                continue;
            };
            rows.push(SeriesRow {
                identifier: ids.value(i).to_string(),
                timestamp: series_ops::window_start(origin, buckets.value(i), window_ms),
                value,
            });
        }
    }
    Ok(rows)
}

fn millis_to_instant(millis: i64) -> Result<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_millis(millis)
        .ok_or_else(|| HybridError::TypeMismatch(format!("timestamp {} out of range", millis)))
}
