//! Industrial historian adapter
//!
//! Holds one TCP session to the historian. Concurrent reads are serialized
//! on that session inside the adapter; callers never coordinate. A session
//! that breaks mid-read is reopened once before the read fails.
//!
//! The historian's read services have no notion of value conditions, so any
//! read carrying value predicates fails with `UnsupportedPredicate` and the
//! executor applies them client-side.

pub mod protocol;

use crate::backends::{series_ops, ReadRequest, SeriesRow};
use crate::core::{family_of_datatype, xsd, AggregateFunction, DatatypeFamily, Value};
use crate::error::{HybridError, Result};
use crate::registry::VirtualizedTimeSeriesTable;
use chrono::{DateTime, Utc};
use log::{debug, warn};
use protocol::{HistorianFramed, HistorianRequest, HistorianResponse, HistoryValue};
use std::fmt;
use std::ops::Bound;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::Mutex;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

struct HistorianSession {
    framed: HistorianFramed<TcpStream>,
    session_id: u64,
}

pub struct HistorianBackend {
    endpoint: String,
    namespace: u16,
    timeout: Duration,
    session: Mutex<Option<HistorianSession>>,
}

impl fmt::Debug for HistorianBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HistorianBackend")
            .field("endpoint", &self.endpoint)
            .field("namespace", &self.namespace)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// How a request maps onto the historian's read services.
enum ReadPlan {
    Raw { start_ms: Option<i64>, end_ms: Option<i64> },
    Processed { start_ms: i64, end_ms: i64, interval_ms: i64, function: AggregateFunction },
}

impl HistorianBackend {
    /// `endpoint` is a `host:port` address; the connection opens lazily.
    pub fn new(endpoint: impl Into<String>, namespace: u16) -> Self {
        Self {
            endpoint: endpoint.into(),
            namespace,
            timeout: DEFAULT_TIMEOUT,
            session: Mutex::new(None),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn namespace(&self) -> u16 {
        self.namespace
    }

    pub async fn read(
        &self,
        table: &VirtualizedTimeSeriesTable,
        request: &ReadRequest,
    ) -> Result<Vec<SeriesRow>> {
        if !request.value_predicates.is_empty() {
            return Err(HybridError::UnsupportedPredicate(format!(
                "historian reads cannot filter values ({} predicates on {})",
                request.value_predicates.len(),
                table.qualified_name()
            )));
        }
        match tokio::time::timeout(self.timeout, self.read_within_timeout(table, request)).await {
            Ok(result) => result,
            Err(_) => Err(HybridError::BackendTimeout(format!(
                "historian {} did not answer within {:?}",
                self.endpoint, self.timeout
            ))),
        }
    }

    async fn read_within_timeout(
        &self,
        table: &VirtualizedTimeSeriesTable,
        request: &ReadRequest,
    ) -> Result<Vec<SeriesRow>> {
        let plan = plan_read(request);
        let node_ids: Vec<String> =
            request.identifiers.iter().map(|id| protocol::node_id(self.namespace, id)).collect();

        let values = self.exchange_values(&plan, &node_ids).await?;
        debug!(
            "historian returned {} values for {} nodes of {}",
            values.len(),
            node_ids.len(),
            table.qualified_name()
        );

        let processed_function = match &plan {
            ReadPlan::Processed { function, .. } => Some(*function),
            ReadPlan::Raw { .. } => None,
        };
        let rows = values
            .into_iter()
            .map(|value| to_series_row(value, table, processed_function))
            .collect::<Result<Vec<_>>>()?;

        match plan {
            ReadPlan::Processed { .. } => {
                let mut rows = rows;
                series_ops::sort_rows(&mut rows, &request.identifiers);
                Ok(rows)
            }
            // Raw reads are inclusive; exclusive bounds and aggregation are applied here.
            ReadPlan::Raw { .. } => series_ops::evaluate(rows, request),
        }
    }

    /// Sends the read on the current session, reopening it once if it broke.
    ///
    /// The session stays out of its slot while a request is in flight and is
    /// put back only after a complete reply. A read dropped by a timeout or a
    /// cancellation therefore leaves no half-answered session behind.
    async fn exchange_values(&self, plan: &ReadPlan, node_ids: &[String]) -> Result<Vec<HistoryValue>> {
        let mut slot = self.session.lock().await;
        let mut attempts = 0;
        loop {
            attempts += 1;
            let mut session = match slot.take() {
                Some(session) => session,
                None => self.connect().await?,
            };
            let message = build_request(plan, session.session_id, node_ids);
            let outcome = match protocol::send(&mut session.framed, &message).await {
                Ok(()) => protocol::receive::<_, HistorianResponse>(&mut session.framed).await,
                Err(err) => Err(err),
            };
            match outcome {
                Ok(HistorianResponse::Values(values)) => {
                    *slot = Some(session);
                    return Ok(values);
                }
                Ok(HistorianResponse::Fault { status_code, message })
                    if status_code == protocol::BAD_SESSION_ID_INVALID && attempts == 1 =>
                {
                    warn!("historian session expired ({}), reopening", message);
                }
                Ok(HistorianResponse::Fault { status_code, message }) => {
                    // A fault is a complete reply; the session is still in step.
                    if status_code != protocol::BAD_SESSION_ID_INVALID {
                        *slot = Some(session);
                    }
                    return Err(HybridError::BackendUnavailable(format!(
                        "historian fault 0x{:08X}: {}",
                        status_code, message
                    )));
                }
                Ok(other) => {
                    return Err(HybridError::BackendUnavailable(format!(
                        "unexpected historian response {:?}",
                        other
                    )))
                }
                Err(err @ HybridError::BackendUnavailable(_)) if attempts == 1 => {
                    warn!("historian connection to {} broke: {}; reconnecting", self.endpoint, err);
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn connect(&self) -> Result<HistorianSession> {
        let stream = TcpStream::connect(&self.endpoint).await.map_err(|e| {
            HybridError::BackendUnavailable(format!("cannot reach historian {}: {}", self.endpoint, e))
        })?;
        let mut framed = protocol::framed(stream);
        protocol::send(&mut framed, &HistorianRequest::OpenSession { namespace: self.namespace })
            .await?;
        match protocol::receive(&mut framed).await? {
            HistorianResponse::SessionOpened { session_id } => {
                debug!("historian session {} opened on {}", session_id, self.endpoint);
                Ok(HistorianSession { framed, session_id })
            }
            HistorianResponse::Fault { status_code, message } => Err(HybridError::BackendUnavailable(
                format!("historian refused session (0x{:08X}): {}", status_code, message),
            )),
            other => Err(HybridError::BackendUnavailable(format!(
                "unexpected historian handshake {:?}",
                other
            ))),
        }
    }

    /// Closes the session, if one is open.
    pub async fn close(&self) -> Result<()> {
        let mut slot = self.session.lock().await;
        if let Some(mut session) = slot.take() {
            protocol::send(&mut session.framed, &HistorianRequest::CloseSession {
                session_id: session.session_id,
            })
            .await?;
        }
        Ok(())
    }
}

fn plan_read(request: &ReadRequest) -> ReadPlan {
    let range = &request.time_range;
    if let Some(aggregation) = &request.aggregation {
        let end_ms = match range.end {
            Bound::Included(end) => Some(end.timestamp_millis() + 1),
            Bound::Excluded(end) => Some(end.timestamp_millis()),
            Bound::Unbounded => None,
        };
        if let (Bound::Included(start), Some(end_ms)) = (range.start, end_ms) {
            return ReadPlan::Processed {
                start_ms: start.timestamp_millis(),
                end_ms,
                interval_ms: aggregation.window_millis(),
                function: aggregation.function,
            };
        }
    }
    ReadPlan::Raw {
        start_ms: range.start_instant().map(|s| s.timestamp_millis()),
        end_ms: range.end_instant().map(|e| e.timestamp_millis()),
    }
}

fn build_request(plan: &ReadPlan, session_id: u64, node_ids: &[String]) -> HistorianRequest {
    match plan {
        ReadPlan::Raw { start_ms, end_ms } => HistorianRequest::ReadRaw {
            session_id,
            node_ids: node_ids.to_vec(),
            start_ms: *start_ms,
            end_ms: *end_ms,
        },
        ReadPlan::Processed { start_ms, end_ms, interval_ms, function } => {
            HistorianRequest::ReadProcessed {
                session_id,
                node_ids: node_ids.to_vec(),
                start_ms: *start_ms,
                end_ms: *end_ms,
                interval_ms: *interval_ms,
                aggregate_id: protocol::aggregate_id(*function),
            }
        }
    }
}

fn to_series_row(
    value: HistoryValue,
    table: &VirtualizedTimeSeriesTable,
    processed: Option<AggregateFunction>,
) -> Result<SeriesRow> {
    let timestamp = DateTime::<Utc>::from_timestamp_millis(value.timestamp_ms).ok_or_else(|| {
        HybridError::BackendUnavailable(format!("timestamp {} out of range", value.timestamp_ms))
    })?;
    Ok(SeriesRow {
        identifier: protocol::identifier_of(&value.node_id).to_string(),
        timestamp,
        value: typed_value(value.value, &table.value_datatype, processed),
    })
}

/// Historian values travel as doubles; give them the table's declared type.
fn typed_value(raw: f64, datatype: &str, processed: Option<AggregateFunction>) -> Value {
    match processed {
        Some(AggregateFunction::Count) => return Value::Integer(raw as i64),
        Some(AggregateFunction::Mean) => return Value::Double(raw),
        _ => {}
    }
    match family_of_datatype(datatype) {
        DatatypeFamily::Boolean => Value::Boolean(raw != 0.0),
        DatatypeFamily::Numeric
            if !matches!(datatype, xsd::DOUBLE | xsd::FLOAT | xsd::DECIMAL) && raw.fract() == 0.0 =>
        {
            Value::Integer(raw as i64)
        }
        _ => Value::Double(raw),
    }
}
