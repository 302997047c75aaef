//! Framed binary protocol spoken with the historian.
//!
//! Frames are length-delimited (4-byte big-endian prefix) and carry
//! `bincode`-encoded [`HistorianRequest`] / [`HistorianResponse`] messages.
//! A session is opened once per connection and its id accompanies every read.

use crate::core::AggregateFunction;
use crate::error::{HybridError, Result};
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{Framed, LengthDelimitedCodec};

/// Standard aggregate function node ids
pub const AGGREGATE_AVERAGE: u32 = 2342;
pub const AGGREGATE_TOTAL: u32 = 2344;
pub const AGGREGATE_MINIMUM: u32 = 2346;
pub const AGGREGATE_MAXIMUM: u32 = 2347;
pub const AGGREGATE_COUNT: u32 = 2352;

/// Status code reported when the session id is not (or no longer) valid
pub const BAD_SESSION_ID_INVALID: u32 = 0x8025_0000;
/// Status code reported for unknown node ids
pub const BAD_NODE_ID_UNKNOWN: u32 = 0x8034_0000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum HistorianRequest {
    OpenSession {
        namespace: u16,
    },
    /// Raw history; both bounds inclusive, `None` means open-ended
    ReadRaw {
        session_id: u64,
        node_ids: Vec<String>,
        start_ms: Option<i64>,
        end_ms: Option<i64>,
    },
    /// Processed history over `[start_ms, end_ms)` in intervals from `start_ms`
    ReadProcessed {
        session_id: u64,
        node_ids: Vec<String>,
        start_ms: i64,
        end_ms: i64,
        interval_ms: i64,
        aggregate_id: u32,
    },
    CloseSession {
        session_id: u64,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum HistorianResponse {
    SessionOpened { session_id: u64 },
    Values(Vec<HistoryValue>),
    Closed,
    Fault { status_code: u32, message: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryValue {
    pub node_id: String,
    pub timestamp_ms: i64,
    pub value: f64,
}

/// A framed historian connection over any byte stream.
pub type HistorianFramed<T> = Framed<T, LengthDelimitedCodec>;

pub fn framed<T: AsyncRead + AsyncWrite>(io: T) -> HistorianFramed<T> {
    Framed::new(io, LengthDelimitedCodec::new())
}

pub async fn send<T, M>(framed: &mut HistorianFramed<T>, message: &M) -> Result<()>
where
    T: AsyncRead + AsyncWrite + Unpin,
    M: Serialize,
{
    let payload = bincode::serialize(message)?;
    framed.send(Bytes::from(payload)).await?;
    Ok(())
}

/// Receives one message; a closed connection is `BackendUnavailable`.
pub async fn receive<T, M>(framed: &mut HistorianFramed<T>) -> Result<M>
where
    T: AsyncRead + AsyncWrite + Unpin,
    M: DeserializeOwned,
{
    match framed.next().await {
        Some(frame) => Ok(bincode::deserialize(&frame?)?),
        None => Err(HybridError::BackendUnavailable(
            "historian closed the connection".to_string(),
        )),
    }
}

pub fn aggregate_id(function: AggregateFunction) -> u32 {
    match function {
        AggregateFunction::Mean => AGGREGATE_AVERAGE,
        AggregateFunction::Sum => AGGREGATE_TOTAL,
        AggregateFunction::Min => AGGREGATE_MINIMUM,
        AggregateFunction::Max => AGGREGATE_MAXIMUM,
        AggregateFunction::Count => AGGREGATE_COUNT,
    }
}

pub fn aggregate_function(aggregate_id: u32) -> Option<AggregateFunction> {
    match aggregate_id {
        AGGREGATE_AVERAGE => Some(AggregateFunction::Mean),
        AGGREGATE_TOTAL => Some(AggregateFunction::Sum),
        AGGREGATE_MINIMUM => Some(AggregateFunction::Min),
        AGGREGATE_MAXIMUM => Some(AggregateFunction::Max),
        AGGREGATE_COUNT => Some(AggregateFunction::Count),
        _ => None,
    }
}

/// String node id of `identifier` in `namespace`, e.g. `ns=2;s=ts1`.
pub fn node_id(namespace: u16, identifier: &str) -> String {
    format!("ns={};s={}", namespace, identifier)
}

/// Identifier part of a string node id; other forms are returned unchanged.
pub fn identifier_of(node_id: &str) -> &str {
    node_id
        .strip_prefix("ns=")
        .and_then(|rest| rest.split_once(";s="))
        .map_or(node_id, |(_, identifier)| identifier)
}
