//! Historian adapter tests against a fake historian
//!
//! The fake listens on a local TCP port, speaks the framed session protocol
//! and serves one minute of one-second values per node.

use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use chronograph::backends::historian::protocol::{
    self, HistorianRequest, HistorianResponse, HistoryValue, AGGREGATE_AVERAGE, BAD_SESSION_ID_INVALID,
};
use chronograph::backends::{HistorianBackend, ReadRequest};
use chronograph::core::{xsd, AggregateFunction, Aggregation, TimeRange, Value};
use chronograph::registry::VirtualizedTimeSeriesTable;
use chronograph::{Engine, HybridError, OxigraphTripleStore};
use tokio_util::sync::CancellationToken;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::ops::Bound;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};

type RequestLog = Arc<Mutex<Vec<HistorianRequest>>>;

#[derive(Clone, Copy, Default)]
struct Behaviour {
    /// Answer the first read of session 1 with an invalid-session fault
    expire_first_session: bool,
    /// Never answer reads
    silent: bool,
    /// Hold back the answer to the first read of session 1
    delay_first_read: Option<Duration>,
}

fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2022, 8, 17, 10, 42, 0).unwrap()
}

fn history() -> HashMap<String, Vec<(i64, f64)>> {
    let series = |base: f64| {
        (0..60).map(|i| (start().timestamp_millis() + i * 1000, base + i as f64)).collect::<Vec<_>>()
    };
    HashMap::from([
        (protocol::node_id(2, "ts1"), series(100.0)),
        (protocol::node_id(2, "ts2"), series(200.0)),
    ])
}

async fn spawn_historian(behaviour: Behaviour) -> (SocketAddr, RequestLog) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let log: RequestLog = Arc::new(Mutex::new(Vec::new()));
    let server_log = Arc::clone(&log);
    tokio::spawn(async move {
        let mut connections = 0;
        while let Ok((stream, _)) = listener.accept().await {
            connections += 1;
            tokio::spawn(serve(stream, connections, behaviour, Arc::clone(&server_log)));
        }
    });
    (addr, log)
}

async fn serve(stream: TcpStream, session_id: u64, behaviour: Behaviour, log: RequestLog) {
    let data = history();
    let mut framed = protocol::framed(stream);
    let mut first_read = true;
    let mut delayed = false;
    while let Ok(request) = protocol::receive::<_, HistorianRequest>(&mut framed).await {
        log.lock().unwrap().push(request.clone());
        if let (Some(delay), HistorianRequest::ReadRaw { session_id: 1, .. }) = (behaviour.delay_first_read, &request) {
            if !delayed {
                delayed = true;
                tokio::time::sleep(delay).await;
            }
        }
        let response = match request {
            HistorianRequest::OpenSession { .. } => HistorianResponse::SessionOpened { session_id },
            _ if behaviour.silent => continue,
            HistorianRequest::ReadRaw { session_id: 1, .. } if behaviour.expire_first_session && first_read => {
                first_read = false;
                HistorianResponse::Fault {
                    status_code: BAD_SESSION_ID_INVALID,
                    message: "session timed out".to_string(),
                }
            }
            HistorianRequest::ReadRaw { node_ids, start_ms, end_ms, .. } => {
                let mut values = Vec::new();
                for node_id in node_ids {
                    for (timestamp_ms, value) in data.get(&node_id).into_iter().flatten() {
                        let after_start = start_ms.map_or(true, |s| *timestamp_ms >= s);
                        let before_end = end_ms.map_or(true, |e| *timestamp_ms <= e);
                        if after_start && before_end {
                            values.push(HistoryValue {
                                node_id: node_id.clone(),
                                timestamp_ms: *timestamp_ms,
                                value: *value,
                            });
                        }
                    }
                }
                HistorianResponse::Values(values)
            }
            HistorianRequest::ReadProcessed { node_ids, start_ms, end_ms, interval_ms, aggregate_id, .. } => {
                assert_eq!(aggregate_id, AGGREGATE_AVERAGE);
                let mut values = Vec::new();
                for node_id in node_ids {
                    let points = data.get(&node_id).cloned().unwrap_or_default();
                    let mut window = start_ms;
                    while window < end_ms {
                        let inside: Vec<f64> = points
                            .iter()
                            .filter(|(t, _)| *t >= window && *t < (window + interval_ms).min(end_ms))
                            .map(|(_, v)| *v)
                            .collect();
                        if !inside.is_empty() {
                            values.push(HistoryValue {
                                node_id: node_id.clone(),
                                timestamp_ms: window,
                                value: inside.iter().sum::<f64>() / inside.len() as f64,
                            });
                        }
                        window += interval_ms;
                    }
                }
                HistorianResponse::Values(values)
            }
            HistorianRequest::CloseSession { .. } => HistorianResponse::Closed,
        };
        if protocol::send(&mut framed, &response).await.is_err() {
            return;
        }
    }
}

fn table() -> VirtualizedTimeSeriesTable {
    VirtualizedTimeSeriesTable::new("", "opcua", xsd::INTEGER)
}

fn requests(log: &RequestLog) -> Vec<HistorianRequest> {
    log.lock().unwrap().clone()
}

#[tokio::test]
async fn test_raw_read_over_session() {
    let (addr, log) = spawn_historian(Behaviour::default()).await;
    let backend = HistorianBackend::new(addr.to_string(), 2);
    let request = ReadRequest {
        identifiers: vec!["ts1".into()],
        time_range: TimeRange::closed(start() + ChronoDuration::seconds(10), start() + ChronoDuration::seconds(14)),
        ..ReadRequest::default()
    };

    let rows = backend.read(&table(), &request).await.unwrap();
    let values: Vec<Value> = rows.iter().map(|r| r.value.clone()).collect();
    assert_eq!(values, (110..115).map(Value::Integer).collect::<Vec<_>>());
    assert!(rows.iter().all(|r| r.identifier == "ts1"));

    let requests = requests(&log);
    assert_eq!(requests[0], HistorianRequest::OpenSession { namespace: 2 });
    assert_eq!(
        requests[1],
        HistorianRequest::ReadRaw {
            session_id: 1,
            node_ids: vec!["ns=2;s=ts1".to_string()],
            start_ms: Some(start().timestamp_millis() + 10_000),
            end_ms: Some(start().timestamp_millis() + 14_000),
        }
    );

    backend.read(&table(), &request).await.unwrap();
    let opened = requests_of(&log, |r| matches!(r, HistorianRequest::OpenSession { .. }));
    assert_eq!(opened, 1);
    backend.close().await.unwrap();
}

fn requests_of(log: &RequestLog, predicate: impl Fn(&HistorianRequest) -> bool) -> usize {
    requests(log).iter().filter(|r| predicate(r)).count()
}

#[tokio::test]
async fn test_aggregation_uses_processed_read() {
    let (addr, log) = spawn_historian(Behaviour::default()).await;
    let backend = HistorianBackend::new(addr.to_string(), 2);
    let request = ReadRequest {
        identifiers: vec!["ts2".into(), "ts1".into()],
        time_range: TimeRange::closed(start(), start() + ChronoDuration::seconds(59)),
        aggregation: Some(Aggregation::new(AggregateFunction::Mean, Duration::from_secs(5)).unwrap()),
        ..ReadRequest::default()
    };

    let rows = backend.read(&table(), &request).await.unwrap();
    assert_eq!(rows.len(), 24);
    assert_eq!(rows[0].identifier, "ts2");
    assert_eq!(rows[0].value, Value::Double(202.0));
    assert_eq!(rows[12].identifier, "ts1");
    assert_eq!(rows[13].timestamp, start() + ChronoDuration::seconds(5));
    assert_eq!(rows[13].value, Value::Double(107.0));

    let processed = requests(&log).into_iter().find_map(|r| match r {
        HistorianRequest::ReadProcessed { end_ms, interval_ms, .. } => Some((end_ms, interval_ms)),
        _ => None,
    });
    assert_eq!(processed, Some((start().timestamp_millis() + 59_001, 5_000)));
}

#[tokio::test]
async fn test_exclusive_start_aggregates_client_side() {
    let (addr, log) = spawn_historian(Behaviour::default()).await;
    let backend = HistorianBackend::new(addr.to_string(), 2);
    let request = ReadRequest {
        identifiers: vec!["ts1".into()],
        time_range: TimeRange { start: Bound::Excluded(start()), end: Bound::Included(start() + ChronoDuration::seconds(59)) },
        aggregation: Some(Aggregation::new(AggregateFunction::Mean, Duration::from_secs(5)).unwrap()),
        ..ReadRequest::default()
    };

    let rows = backend.read(&table(), &request).await.unwrap();
    assert_eq!(rows.len(), 12);
    assert_eq!(rows[0].value, Value::Double(102.5));
    assert_eq!(requests_of(&log, |r| matches!(r, HistorianRequest::ReadProcessed { .. })), 0);
}

#[tokio::test]
async fn test_expired_session_is_reopened_once() {
    let (addr, log) = spawn_historian(Behaviour { expire_first_session: true, ..Behaviour::default() }).await;
    let backend = HistorianBackend::new(addr.to_string(), 2);
    let request = ReadRequest { identifiers: vec!["ts1".into()], ..ReadRequest::default() };

    let rows = backend.read(&table(), &request).await.unwrap();
    assert_eq!(rows.len(), 60);
    assert_eq!(requests_of(&log, |r| matches!(r, HistorianRequest::OpenSession { .. })), 2);
    assert!(requests(&log).iter().any(|r| matches!(r, HistorianRequest::ReadRaw { session_id: 2, .. })));
}

#[tokio::test]
async fn test_silent_historian_times_out() {
    let (addr, _) = spawn_historian(Behaviour { silent: true, ..Behaviour::default() }).await;
    let backend = HistorianBackend::new(addr.to_string(), 2).with_timeout(Duration::from_millis(200));
    let request = ReadRequest { identifiers: vec!["ts1".into()], ..ReadRequest::default() };
    assert!(matches!(backend.read(&table(), &request).await, Err(HybridError::BackendTimeout(_))));
}

#[tokio::test]
async fn test_unreachable_historian() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    let backend = HistorianBackend::new(addr.to_string(), 2);
    let request = ReadRequest { identifiers: vec!["ts1".into()], ..ReadRequest::default() };
    assert!(matches!(backend.read(&table(), &request).await, Err(HybridError::BackendUnavailable(_))));
}

#[tokio::test]
async fn test_timed_out_read_does_not_answer_the_next_read() {
    let behaviour = Behaviour { delay_first_read: Some(Duration::from_millis(300)), ..Behaviour::default() };
    let (addr, log) = spawn_historian(behaviour).await;
    let backend = HistorianBackend::new(addr.to_string(), 2).with_timeout(Duration::from_millis(150));

    let first = ReadRequest { identifiers: vec!["ts1".into()], ..ReadRequest::default() };
    assert!(matches!(backend.read(&table(), &first).await, Err(HybridError::BackendTimeout(_))));

    let second = ReadRequest {
        identifiers: vec!["ts2".into()],
        time_range: TimeRange::closed(start(), start() + ChronoDuration::seconds(2)),
        ..ReadRequest::default()
    };
    let rows = backend.read(&table(), &second).await.unwrap();
    assert!(rows.iter().all(|r| r.identifier == "ts2"));
    let values: Vec<Value> = rows.into_iter().map(|r| r.value).collect();
    assert_eq!(values, (200..203).map(Value::Integer).collect::<Vec<_>>());
    assert_eq!(requests_of(&log, |r| matches!(r, HistorianRequest::OpenSession { .. })), 2);
}

const SENSOR_GRAPH: &str = r#"
    @prefix ct: <https://github.com/magbak/chrontext#> .
    @prefix ex: <http://example.org/case#> .
    ex:mySensor1 ct:hasTimeseries ex:myTimeseries1 .
    ex:myTimeseries1 ct:hasExternalId "ts1" .
"#;

const VALUES_BELOW_105: &str = r#"PREFIX ct: <https://github.com/magbak/chrontext#>
    SELECT ?s ?v WHERE {
        ?s ct:hasTimeseries ?ts .
        ?ts ct:hasDataPoint ?dp .
        ?dp ct:hasValue ?v .
        FILTER(?v < 105)
    }"#;

fn engine_over(backend: HistorianBackend) -> Engine {
    let store = OxigraphTripleStore::new().unwrap();
    store.load_turtle(SENSOR_GRAPH).unwrap();
    let engine = Engine::new(Arc::new(store)).unwrap();
    engine.register_table(table()).unwrap();
    engine.set_backend(backend).unwrap();
    engine
}

#[tokio::test]
async fn test_engine_aborts_query_on_backend_timeout() {
    let (addr, _) = spawn_historian(Behaviour { silent: true, ..Behaviour::default() }).await;
    let engine = engine_over(HistorianBackend::new(addr.to_string(), 2).with_timeout(Duration::from_millis(200)));

    let err = engine.execute_hybrid_query(VALUES_BELOW_105).await.unwrap_err();
    assert!(matches!(err, HybridError::HybridQueryFailed { .. }));
    assert!(matches!(err.root_cause(), HybridError::BackendTimeout(_)));
}

#[tokio::test]
async fn test_cancellation_interrupts_pending_read() {
    let (addr, log) = spawn_historian(Behaviour { silent: true, ..Behaviour::default() }).await;
    let engine = engine_over(HistorianBackend::new(addr.to_string(), 2).with_timeout(Duration::from_secs(30)));
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let outcome = tokio::time::timeout(
        Duration::from_secs(5),
        engine.execute_hybrid_query_with_cancellation(VALUES_BELOW_105, &cancel),
    )
    .await
    .expect("cancellation should end the query promptly");
    let err = outcome.unwrap_err();
    assert!(matches!(err, HybridError::HybridQueryFailed { .. }));
    assert!(matches!(err.root_cause(), HybridError::Cancelled));
    assert!(requests(&log).iter().any(|r| matches!(r, HistorianRequest::ReadRaw { .. })));
}

#[tokio::test]
async fn test_engine_filters_values_client_side() {
    let (addr, log) = spawn_historian(Behaviour::default()).await;
    let engine = engine_over(HistorianBackend::new(addr.to_string(), 2));

    let table = engine.execute_hybrid_query(VALUES_BELOW_105).await.unwrap();

    let values: Vec<_> = table.column_values("v").unwrap().into_iter().map(|v| v.cloned()).collect();
    assert_eq!(values, (100..105).map(|i| Some(Value::Integer(i))).collect::<Vec<_>>());
    assert!(requests(&log).iter().all(|r| !matches!(r, HistorianRequest::ReadProcessed { .. })));
}
