//! End-to-end tests for hybrid query execution
//!
//! An embedded Oxigraph store holds three widgets with one sensor each;
//! the in-memory backend holds one minute of one-second values for the
//! first two series (100..159 and 200..259). The third series has no data.

use chrono::{DateTime, Duration, TimeZone, Utc};
use chronograph::backends::InMemoryBackend;
use chronograph::core::{xsd, ColumnType, Value};
use chronograph::registry::VirtualizedTimeSeriesTable;
use chronograph::{Engine, HybridError, OxigraphTripleStore};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

const TYPES: &str = "http://example.org/types#";

const GRAPH: &str = r#"
@prefix ct: <https://github.com/magbak/chrontext#> .
@prefix types: <http://example.org/types#> .
@prefix ex: <http://example.org/case#> .

ex:myWidget1 a types:BigWidget ; types:hasName "myWidget1" ; types:hasSensor ex:mySensor1 .
ex:myWidget2 a types:BigWidget ; types:hasName "myWidget2" ; types:hasSensor ex:mySensor2 .
ex:myWidget3 a types:BigWidget ; types:hasName "myWidget3" ; types:hasSensor ex:mySensor3 .
ex:mySensor1 a types:ImportantSensor ; ct:hasTimeseries ex:myTimeseries1 .
ex:mySensor2 a types:ImportantSensor ; ct:hasTimeseries ex:myTimeseries2 .
ex:mySensor3 a types:ImportantSensor ; ct:hasTimeseries ex:myTimeseries3 .
ex:myTimeseries1 ct:hasExternalId "ts1" .
ex:myTimeseries2 ct:hasExternalId "ts2" .
ex:myTimeseries3 ct:hasExternalId "ts3" .
"#;

const PROLOGUE: &str = r#"
PREFIX xsd: <http://www.w3.org/2001/XMLSchema#>
PREFIX rdf: <http://www.w3.org/1999/02/22-rdf-syntax-ns#>
PREFIX ct: <https://github.com/magbak/chrontext#>
PREFIX types: <http://example.org/types#>
"#;

fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2022, 8, 17, 10, 42, 0).unwrap()
}

fn minute_of(base: i64) -> Vec<(DateTime<Utc>, Value)> {
    (0..60).map(|i| (start() + Duration::seconds(i), Value::Integer(base + i))).collect()
}

fn backend() -> InMemoryBackend {
    InMemoryBackend::new().with_series("ts1", minute_of(100)).with_series("ts2", minute_of(200))
}

fn engine_with(backend: InMemoryBackend) -> Engine {
    let store = OxigraphTripleStore::new().unwrap();
    store.load_turtle(GRAPH).unwrap();
    let mut engine = Engine::new(Arc::new(store)).unwrap();
    engine.set_class_namespace(TYPES);
    engine.set_name_predicate(format!("{}hasName", TYPES));
    engine.add_connective(".", format!("{}hasSensor", TYPES)).unwrap();
    engine.register_table(VirtualizedTimeSeriesTable::new("", "measurements", xsd::INTEGER)).unwrap();
    engine.set_backend(backend).unwrap();
    engine
}

fn engine() -> Engine {
    engine_with(backend())
}

fn sparql(body: &str) -> String {
    format!("{}{}", PROLOGUE, body)
}

fn integers(values: Vec<Option<&Value>>) -> Vec<i64> {
    values
        .into_iter()
        .map(|v| match v {
            Some(Value::Integer(i)) => *i,
            other => panic!("expected an integer, got {:?}", other),
        })
        .collect()
}

#[tokio::test]
async fn test_time_and_value_filters_pushed_down() {
    let query = sparql(
        r#"SELECT ?w ?t ?v WHERE {
            ?w types:hasSensor ?s .
            ?s ct:hasTimeseries ?ts .
            ?ts ct:hasDataPoint ?dp .
            ?dp ct:hasTimestamp ?t .
            ?dp ct:hasValue ?v .
            FILTER(?t > "2022-08-17T10:42:30Z"^^xsd:dateTime && ?v < 200)
        }"#,
    );
    let table = engine().execute_hybrid_query(&query).await.unwrap();

    assert_eq!(table.column_names(), vec!["w", "t", "v"]);
    assert_eq!(table.len(), 29);
    assert_eq!(integers(table.column_values("v").unwrap()), (131..160).collect::<Vec<_>>());
    assert!(table
        .column_values("w")
        .unwrap()
        .iter()
        .all(|w| *w == Some(&Value::Iri("http://example.org/case#myWidget1".to_string()))));
    assert_eq!(table.rows()[0][1], Some(Value::DateTime(start() + Duration::seconds(31))));
    assert_eq!(table.columns()[1].column_type, ColumnType::DateTime);
}

#[tokio::test]
async fn test_raw_query_and_dsl_query_agree() {
    let raw = sparql(
        r#"SELECT ?BigWidget_ImportantSensor__path_name ?timestamp ?BigWidget_ImportantSensor_value WHERE {
            ?BigWidget rdf:type types:BigWidget .
            ?BigWidget_ImportantSensor rdf:type types:ImportantSensor .
            ?BigWidget types:hasSensor ?BigWidget_ImportantSensor .
            ?BigWidget_ImportantSensor ct:hasTimeseries ?BigWidget_ImportantSensor_timeseries .
            ?BigWidget_ImportantSensor_timeseries ct:hasDataPoint ?BigWidget_ImportantSensor_datapoint .
            ?BigWidget_ImportantSensor_datapoint ct:hasTimestamp ?timestamp .
            ?BigWidget_ImportantSensor_datapoint ct:hasValue ?BigWidget_ImportantSensor_value .
            BIND("BigWidget_ImportantSensor" AS ?BigWidget_ImportantSensor__path_name)
            FILTER(?BigWidget_ImportantSensor_value > 150)
            FILTER(?timestamp >= "2022-08-17T10:42:10Z"^^xsd:dateTime && ?timestamp <= "2022-08-17T10:42:50Z"^^xsd:dateTime)
        }"#,
    );
    let dsl = "BigWidget.ImportantSensor > 150 from 2022-08-17T10:42:10Z to 2022-08-17T10:42:50Z";

    let engine = engine();
    let from_raw = engine.execute_hybrid_query(&raw).await.unwrap();
    let from_dsl = engine.execute_dsl_query(dsl).await.unwrap();

    assert_eq!(from_raw, from_dsl);
    assert_eq!(from_dsl.len(), 41);
    assert_eq!(
        from_dsl.rows()[0][0],
        Some(Value::String("BigWidget_ImportantSensor".to_string()))
    );
    assert_eq!(integers(from_dsl.column_values("BigWidget_ImportantSensor_value").unwrap())[0], 210);
}

#[tokio::test]
async fn test_path_compared_with_path_at_equal_timestamps() {
    let engine = engine();
    let above = engine
        .execute_dsl_query(r#""myWidget2".ImportantSensor > "myWidget1".ImportantSensor"#)
        .await
        .unwrap();
    assert_eq!(
        above.column_names(),
        vec!["myWidget2_ImportantSensor__path_name", "timestamp", "myWidget2_ImportantSensor_value"]
    );
    assert_eq!(above.len(), 60);
    assert_eq!(integers(above.column_values("myWidget2_ImportantSensor_value").unwrap())[0], 200);

    let below = engine
        .execute_dsl_query(r#""myWidget2".ImportantSensor < "myWidget1".ImportantSensor"#)
        .await
        .unwrap();
    assert!(below.is_empty());
}

#[tokio::test]
async fn test_like_on_class_and_name_segment() {
    let table = engine()
        .execute_dsl_query(r#"BigWidget"myWidget1".ImportantSensor like "12_""#)
        .await
        .unwrap();
    assert_eq!(
        integers(table.column_values("myWidget1_ImportantSensor_value").unwrap()),
        (120..130).collect::<Vec<_>>()
    );
}

#[tokio::test]
async fn test_repeated_execution_is_identical() {
    let engine = engine();
    let dsl = "BigWidget.ImportantSensor from 2022-08-17T10:42:00Z to 2022-08-17T10:42:20Z";
    let first = engine.execute_dsl_query(dsl).await.unwrap();
    let second = engine.execute_dsl_query(dsl).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(first.len(), 42);
}

#[tokio::test]
async fn test_mean_over_five_second_windows() {
    let table = engine()
        .execute_dsl_query(
            r#""myWidget1".ImportantSensor from 2022-08-17T10:42:00Z to 2022-08-17T10:42:59Z aggregate mean 5s"#,
        )
        .await
        .unwrap();

    assert_eq!(
        table.column_names(),
        vec!["myWidget1_ImportantSensor__path_name", "window_start", "myWidget1_ImportantSensor_value"]
    );
    assert_eq!(table.len(), 12);
    for (k, row) in table.rows().iter().enumerate() {
        let k = k as i64;
        assert_eq!(row[1], Some(Value::DateTime(start() + Duration::seconds(5 * k))));
        assert_eq!(row[2], Some(Value::Double(102.0 + 5.0 * k as f64)));
    }
}

#[tokio::test]
async fn test_exclusive_and_inclusive_bounds() {
    let query = |filter: &str| {
        sparql(&format!(
            r#"SELECT ?v WHERE {{
                ?w types:hasName "myWidget1" .
                ?w types:hasSensor ?s .
                ?s ct:hasTimeseries ?ts .
                ?ts ct:hasDataPoint ?dp .
                ?dp ct:hasTimestamp ?t .
                ?dp ct:hasValue ?v .
                FILTER({})
            }}"#,
            filter
        ))
    };
    let engine = engine();

    let closed_open = engine
        .execute_hybrid_query(&query(
            r#"?t >= "2022-08-17T10:42:10Z"^^xsd:dateTime && ?t < "2022-08-17T10:42:20Z"^^xsd:dateTime"#,
        ))
        .await
        .unwrap();
    assert_eq!(integers(closed_open.column_values("v").unwrap()), (110..120).collect::<Vec<_>>());

    let open_closed = engine
        .execute_hybrid_query(&query(
            r#""2022-08-17T10:42:10Z"^^xsd:dateTime < ?t && ?t <= "2022-08-17T10:42:20Z"^^xsd:dateTime"#,
        ))
        .await
        .unwrap();
    assert_eq!(integers(open_closed.column_values("v").unwrap()), (111..121).collect::<Vec<_>>());

    let instant = engine
        .execute_hybrid_query(&query(r#"?t = "2022-08-17T10:42:42Z"^^xsd:dateTime"#))
        .await
        .unwrap();
    assert_eq!(integers(instant.column_values("v").unwrap()), vec![142]);
}

#[tokio::test]
async fn test_entities_without_data_contribute_no_rows() {
    let query = sparql(
        r#"SELECT ?w ?v WHERE {
            ?w types:hasSensor ?s .
            ?s ct:hasTimeseries ?ts .
            ?ts ct:hasDataPoint ?dp .
            ?dp ct:hasValue ?v .
        }"#,
    );
    let table = engine().execute_hybrid_query(&query).await.unwrap();
    assert_eq!(table.len(), 120);
    let widget3 = Value::Iri("http://example.org/case#myWidget3".to_string());
    assert!(!table.column_values("w").unwrap().contains(&Some(&widget3)));
}

#[tokio::test]
async fn test_graph_only_query_is_forwarded() {
    let query = sparql("SELECT ?w WHERE { ?w rdf:type types:BigWidget }");
    let table = engine().execute_hybrid_query(&query).await.unwrap();
    assert_eq!(table.column_names(), vec!["w"]);
    assert_eq!(table.len(), 3);
}

#[tokio::test]
async fn test_graph_only_modifiers_are_forwarded_unmodified() {
    let engine = engine();

    let limited = sparql("SELECT ?w WHERE { ?w rdf:type types:BigWidget } ORDER BY DESC(?w) LIMIT 2");
    let table = engine.execute_hybrid_query(&limited).await.unwrap();
    assert_eq!(table.len(), 2);
    assert_eq!(table.rows()[0][0], Some(Value::Iri("http://example.org/case#myWidget3".to_string())));

    let optional = sparql(
        r#"SELECT ?w ?id WHERE {
            ?w types:hasName ?name .
            OPTIONAL { ?w types:hasSerial ?id }
            FILTER(?name != "myWidget2")
        }"#,
    );
    let table = engine.execute_hybrid_query(&optional).await.unwrap();
    assert_eq!(table.column_names(), vec!["w", "id"]);
    assert_eq!(table.len(), 2);
    assert!(table.column_values("id").unwrap().iter().all(Option::is_none));
}

#[tokio::test]
async fn test_refused_value_predicate_falls_back_to_client_side_filtering() {
    let query = sparql(
        r#"SELECT ?v WHERE {
            ?ts ct:hasDataPoint ?dp .
            ?dp ct:hasValue ?v .
            FILTER(?v >= 255)
        }"#,
    );
    let pushed = engine().execute_hybrid_query(&query).await.unwrap();
    let fallback = engine_with(backend().without_value_predicates()).execute_hybrid_query(&query).await.unwrap();
    assert_eq!(pushed, fallback);
    assert_eq!(integers(fallback.column_values("v").unwrap()), vec![255, 256, 257, 258, 259]);
}

#[tokio::test]
async fn test_literal_of_wrong_type_is_rejected() {
    let query = sparql(
        r#"SELECT ?v WHERE {
            ?ts ct:hasDataPoint ?dp .
            ?dp ct:hasValue ?v .
            FILTER(?v > "high")
        }"#,
    );
    let err = engine().execute_hybrid_query(&query).await.unwrap_err();
    assert!(matches!(err.root_cause(), HybridError::TypeMismatch(_)));
}

#[tokio::test]
async fn test_series_resolve_their_own_table() {
    let store = OxigraphTripleStore::new().unwrap();
    store.load_turtle(GRAPH).unwrap();
    store
        .load_turtle(
            r#"
            @prefix ct: <https://github.com/magbak/chrontext#> .
            @prefix ex: <http://example.org/case#> .
            ex:myTimeseries1 ct:hasTimeseriesTable "plant.measurements" .
            ex:myTimeseries2 ct:hasTimeseriesTable "plant.measurements" .
            "#,
        )
        .unwrap();
    let engine = Engine::new(Arc::new(store)).unwrap();
    engine.register_table(VirtualizedTimeSeriesTable::new("plant", "measurements", xsd::INTEGER)).unwrap();
    engine.register_table(VirtualizedTimeSeriesTable::new("plant", "alarms", xsd::BOOLEAN)).unwrap();
    engine.set_backend(backend()).unwrap();

    let query = sparql(
        r#"SELECT ?ts ?v WHERE {
            ?ts ct:hasDataPoint ?dp .
            ?dp ct:hasValue ?v .
        }"#,
    );
    let table = engine.execute_hybrid_query(&query).await.unwrap();
    assert_eq!(table.len(), 120);
}

#[tokio::test]
async fn test_failures_surface_as_hybrid_query_failed() {
    let store = OxigraphTripleStore::new().unwrap();
    store.load_turtle(GRAPH).unwrap();
    let engine = Engine::new(Arc::new(store)).unwrap();
    engine.register_table(VirtualizedTimeSeriesTable::new("", "measurements", xsd::INTEGER)).unwrap();

    let query = sparql(
        r#"SELECT ?v WHERE {
            ?ts ct:hasDataPoint ?dp .
            ?dp ct:hasValue ?v .
        }"#,
    );
    let err = engine.execute_hybrid_query(&query).await.unwrap_err();
    assert!(matches!(err, HybridError::HybridQueryFailed { .. }));
    assert!(err.is_backend_failure());

    engine.set_backend(backend()).unwrap();
    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = engine.execute_hybrid_query_with_cancellation(&query, &cancel).await.unwrap_err();
    assert!(matches!(err.root_cause(), HybridError::Cancelled));
}

#[tokio::test]
async fn test_unbounded_aggregation_shares_one_window_grid() {
    let store = OxigraphTripleStore::new().unwrap();
    store
        .load_turtle(
            r#"
            @prefix ct: <https://github.com/magbak/chrontext#> .
            @prefix types: <http://example.org/types#> .
            @prefix ex: <http://example.org/case#> .
            ex:x1 a types:X ; types:hasSensor ex:sensor1 ; types:drives ex:motor1 .
            ex:sensor1 a types:Sensor ; ct:hasTimeseries ex:sensorSeries .
            ex:motor1 a types:Motor ; ct:hasTimeseries ex:motorSeries .
            ex:sensorSeries ct:hasExternalId "ts1" .
            ex:motorSeries ct:hasExternalId "ts2" .
            "#,
        )
        .unwrap();
    let mut engine = Engine::new(Arc::new(store)).unwrap();
    engine.set_class_namespace(TYPES);
    engine.add_connective(".", format!("{}hasSensor", TYPES)).unwrap();
    engine.add_connective("-", format!("{}drives", TYPES)).unwrap();
    engine.register_table(VirtualizedTimeSeriesTable::new("", "measurements", xsd::INTEGER)).unwrap();
    let seconds = |from: i64, to: i64| -> Vec<(DateTime<Utc>, Value)> {
        (from..to).map(|i| (start() + Duration::seconds(i), Value::Integer(i))).collect()
    };
    engine
        .set_backend(InMemoryBackend::new().with_series("ts1", seconds(0, 20)).with_series("ts2", seconds(2, 22)))
        .unwrap();

    let table = engine.execute_dsl_query("X.Sensor X-Motor aggregate mean 5s").await.unwrap();

    let stamps: Vec<_> = table.column_values("window_start").unwrap().into_iter().map(|v| v.cloned()).collect();
    assert_eq!(
        stamps,
        (0..4).map(|k| Some(Value::DateTime(start() + Duration::seconds(5 * k)))).collect::<Vec<_>>()
    );
    assert_eq!(table.rows()[0][3], Some(Value::Double(2.0)));
    assert_eq!(table.rows()[0][4], Some(Value::Double(3.0)));
}

#[tokio::test]
async fn test_empty_result_keeps_declared_column_types() {
    let query = sparql(
        r#"SELECT ?w ?t ?v WHERE {
            ?w types:hasSensor ?s .
            ?s ct:hasTimeseries ?ts .
            ?ts ct:hasDataPoint ?dp .
            ?dp ct:hasTimestamp ?t .
            ?dp ct:hasValue ?v .
            FILTER(?t > "2030-01-01T00:00:00Z"^^xsd:dateTime)
        }"#,
    );
    let table = engine().execute_hybrid_query(&query).await.unwrap();
    assert!(table.is_empty());
    let types: Vec<ColumnType> = table.columns().iter().map(|c| c.column_type).collect();
    assert_eq!(types[1..], [ColumnType::DateTime, ColumnType::Integer]);

    let batch = table.to_record_batch().unwrap();
    assert_eq!(batch.num_rows(), 0);
    assert_eq!(batch.schema().field(2).data_type(), &arrow::datatypes::DataType::Int64);
}
