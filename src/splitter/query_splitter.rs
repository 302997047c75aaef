use crate::algebra::{Expression, GraphQuery, HybridQuery, Projection, Term, TripleId};
use crate::core::{Aggregation, TimeRange, Value, ValuePredicate};
use crate::error::{HybridError, Result};
use crate::splitter::Vocabulary;
use log::debug;
use std::collections::HashSet;

/// What one backend read must fetch for one time-series sub-pattern.
#[derive(Debug, Clone, PartialEq)]
pub struct PushdownSpec {
    pub series_variable: String,
    pub point_variable: String,
    /// Residual variable bound to the backend identifier of each series
    pub identifier_variable: String,
    /// Residual variable bound to the table name, when several tables exist
    pub table_variable: Option<String>,
    pub timestamp_variable: Option<String>,
    pub value_variable: Option<String>,
    pub time_range: TimeRange,
    pub value_predicates: Vec<ValuePredicate>,
    pub aggregation: Option<Aggregation>,
}

/// One column of the final result and where its cells come from.
#[derive(Debug, Clone, PartialEq)]
pub enum OutputColumn {
    Graph { name: String, variable: String },
    Timestamp { name: String, variable: String, spec: usize },
    Value { name: String, variable: String, spec: usize },
}

impl OutputColumn {
    pub fn name(&self) -> &str {
        match self {
            OutputColumn::Graph { name, .. }
            | OutputColumn::Timestamp { name, .. }
            | OutputColumn::Value { name, .. } => name,
        }
    }

    pub fn variable(&self) -> &str {
        match self {
            OutputColumn::Graph { variable, .. }
            | OutputColumn::Timestamp { variable, .. }
            | OutputColumn::Value { variable, .. } => variable,
        }
    }
}

/// A hybrid query split into its graph and time-series halves.
#[derive(Debug, Clone)]
pub struct SplitQuery {
    /// Graph query run against the triple store
    pub residual: GraphQuery,
    /// One entry per time-series sub-pattern, in pattern order
    pub specs: Vec<PushdownSpec>,
    /// Conditions over time-series variables applied after the merge
    pub post_filters: Vec<Expression>,
    pub output: Vec<OutputColumn>,
    pub distinct: bool,
}

impl SplitQuery {
    /// The earliest spec sharing `spec`'s timestamp variable, if any.
    ///
    /// Rows of synchronized specs are only combined at equal timestamps.
    pub fn synchronized_with(&self, spec: usize) -> Option<usize> {
        let variable = self.specs.get(spec)?.timestamp_variable.as_deref()?;
        self.specs[..spec]
            .iter()
            .position(|other| other.timestamp_variable.as_deref() == Some(variable))
    }

    pub fn column_names(&self) -> Vec<String> {
        self.output.iter().map(|c| c.name().to_string()).collect()
    }
}

#[derive(Debug, Clone)]
struct Shape {
    series: String,
    point: String,
    timestamp: Option<(String, TripleId)>,
    value: Option<(String, TripleId)>,
    triples: Vec<TripleId>,
}

/// Finds time-series sub-patterns in graph queries and rewrites them into
/// a residual graph query plus pushdown specs.
#[derive(Debug, Clone, Default)]
pub struct Splitter {
    vocabulary: Vocabulary,
}

impl Splitter {
    pub fn new(vocabulary: Vocabulary) -> Self {
        Self { vocabulary }
    }

    pub fn vocabulary(&self) -> &Vocabulary {
        &self.vocabulary
    }

    /// Splits `query`, or returns `None` when it holds no time-series shape
    /// and should be sent to the triple store as is.
    ///
    /// # Arguments
    ///
    /// * `query` - The parsed hybrid query
    /// * `table_count` - Number of registered tables; with more than one the
    ///   residual also fetches each series' table name
    ///
    /// # Errors
    ///
    /// `TypeMismatch` when a timestamp is compared with a non-`xsd:dateTime`
    /// literal. Contradictory time bounds are not an error; they leave an
    /// empty range and the query returns no rows.
    pub fn split(&self, query: &HybridQuery, table_count: usize) -> Result<Option<SplitQuery>> {
        let original = &query.query;
        let shapes = self.detect_shapes(original);
        if shapes.is_empty() {
            return Ok(None);
        }

        let mut residual = original.clone();
        residual.distinct = false;
        residual.filters.clear();
        let mut taken: HashSet<String> = original.variables().into_iter().collect();

        let mut specs = Vec::with_capacity(shapes.len());
        for shape in &shapes {
            for id in &shape.triples {
                residual.patterns.remove(*id);
            }
            let identifier_variable = self.link(
                &mut residual,
                &mut taken,
                &shape.series,
                &self.vocabulary.has_external_id,
                "external_id",
            );
            let table_variable = (table_count > 1).then(|| {
                self.link(
                    &mut residual,
                    &mut taken,
                    &shape.series,
                    &self.vocabulary.has_timeseries_table,
                    "table",
                )
            });
            specs.push(PushdownSpec {
                series_variable: shape.series.clone(),
                point_variable: shape.point.clone(),
                identifier_variable,
                table_variable,
                timestamp_variable: shape.timestamp.as_ref().map(|(v, _)| v.clone()),
                value_variable: shape.value.as_ref().map(|(v, _)| v.clone()),
                time_range: TimeRange::unbounded(),
                value_predicates: Vec::new(),
                aggregation: query.aggregation,
            });
        }

        let post_filters = split_filters(original, &mut residual, &mut specs)?;
        residual.projection = Projection::Variables(residual.variables());

        let output = output_columns(original, &shapes, &specs, query.aggregation.is_some());
        debug!(
            "Split hybrid query into {} pushdown spec(s), {} post-filter(s); residual:\n{}",
            specs.len(),
            post_filters.len(),
            residual
        );
        Ok(Some(SplitQuery { residual, specs, post_filters, output, distinct: original.distinct }))
    }

    fn detect_shapes(&self, query: &GraphQuery) -> Vec<Shape> {
        let mut candidates: Vec<Shape> = query
            .patterns
            .iter()
            .filter(|(_, triple)| triple.predicate.is_iri(&self.vocabulary.has_data_point))
            .filter_map(|(id, triple)| {
                let series = triple.subject.as_variable()?;
                let point = triple.object.as_variable()?;
                (series != point).then(|| self.shape_at(query, id, series, point))?
            })
            .collect();

        // Timestamp variables may be shared between shapes, so exclusivity is
        // checked against the surviving candidates until nothing changes.
        loop {
            let timestamp_triples: HashSet<TripleId> = candidates
                .iter()
                .filter_map(|shape| shape.timestamp.as_ref().map(|(_, id)| *id))
                .collect();
            let keep: Vec<bool> =
                candidates.iter().map(|shape| is_exclusive(query, shape, &timestamp_triples)).collect();
            if keep.iter().all(|k| *k) {
                return candidates;
            }
            let mut flags = keep.into_iter();
            candidates.retain(|_| flags.next().unwrap_or(false));
        }
    }

    fn shape_at(&self, query: &GraphQuery, data_point: TripleId, series: &str, point: &str) -> Option<Shape> {
        let mut shape = Shape {
            series: series.to_string(),
            point: point.to_string(),
            timestamp: None,
            value: None,
            triples: vec![data_point],
        };
        for &id in query.patterns.with_variable(point) {
            if id == data_point {
                continue;
            }
            let triple = query.patterns.get(id)?;
            if triple.subject.as_variable() != Some(point) {
                return None;
            }
            let object = triple.object.as_variable().filter(|o| *o != point && *o != series)?;
            if triple.predicate.is_iri(&self.vocabulary.has_timestamp) && shape.timestamp.is_none() {
                shape.timestamp = Some((object.to_string(), id));
            } else if triple.predicate.is_iri(&self.vocabulary.has_value) && shape.value.is_none() {
                shape.value = Some((object.to_string(), id));
            } else {
                return None;
            }
            shape.triples.push(id);
        }
        if shape.timestamp.is_none() && shape.value.is_none() {
            return None;
        }
        if let (Some((t, _)), Some((v, _))) = (&shape.timestamp, &shape.value) {
            if t == v {
                return None;
            }
        }
        Some(shape)
    }

    /// Variable `?o` of an existing `?subject <predicate> ?o` triple, or a
    /// fresh `?{subject}_{suffix}` linked by a new triple.
    fn link(
        &self,
        residual: &mut GraphQuery,
        taken: &mut HashSet<String>,
        subject: &str,
        predicate: &str,
        suffix: &str,
    ) -> String {
        let existing = residual
            .patterns
            .with_subject_and_predicate(subject, predicate)
            .into_iter()
            .find_map(|id| residual.patterns.get(id)?.object.as_variable().map(str::to_string));
        if let Some(variable) = existing {
            return variable;
        }
        let variable = fresh_variable(taken, format!("{}_{}", subject, suffix));
        residual.add_triple(Term::variable(subject), Term::iri(predicate), Term::variable(&variable));
        variable
    }
}

fn is_exclusive(query: &GraphQuery, shape: &Shape, timestamp_triples: &HashSet<TripleId>) -> bool {
    let bound_elsewhere = |variable: &str| query.binds.iter().any(|(_, v)| v == variable);
    if let Some((t, _)) = &shape.timestamp {
        let only_timestamps = query.patterns.with_variable(t).iter().all(|id| timestamp_triples.contains(id));
        if !only_timestamps || bound_elsewhere(t) || *t == shape.series {
            return false;
        }
    }
    if let Some((v, own)) = &shape.value {
        if query.patterns.with_variable(v) != [*own] || bound_elsewhere(v) || *v == shape.series {
            return false;
        }
    }
    true
}

fn fresh_variable(taken: &mut HashSet<String>, base: String) -> String {
    let mut candidate = base.clone();
    let mut counter = 1;
    while taken.contains(&candidate) {
        counter += 1;
        candidate = format!("{}_{}", base, counter);
    }
    taken.insert(candidate.clone());
    candidate
}

/// Routes every filter conjunct to the residual, a spec's time range or
/// value predicates, or the post-filters; returns the post-filters.
fn split_filters(
    original: &GraphQuery,
    residual: &mut GraphQuery,
    specs: &mut [PushdownSpec],
) -> Result<Vec<Expression>> {
    let timestamp_variables: HashSet<String> =
        specs.iter().filter_map(|s| s.timestamp_variable.clone()).collect();
    let value_variables: HashSet<String> = specs.iter().filter_map(|s| s.value_variable.clone()).collect();

    let mut post_filters = Vec::new();
    for conjunct in original.filters.iter().flat_map(Expression::conjuncts) {
        let touches_series = conjunct
            .variables()
            .iter()
            .any(|v| timestamp_variables.contains(*v) || value_variables.contains(*v));
        if !touches_series {
            residual.filters.push(conjunct.clone());
            continue;
        }
        match conjunct.as_variable_comparison() {
            Some((variable, comparator, literal))
                if comparator.is_pushable() && timestamp_variables.contains(variable) =>
            {
                let Value::DateTime(instant) = literal else {
                    return Err(HybridError::TypeMismatch(format!(
                        "?{} is a timestamp but is compared with {}",
                        variable,
                        literal.to_sparql()
                    )));
                };
                for spec in specs.iter_mut().filter(|s| s.timestamp_variable.as_deref() == Some(variable)) {
                    spec.time_range.constrain(comparator, *instant)?;
                }
            }
            Some((variable, comparator, literal))
                if comparator.is_pushable() && value_variables.contains(variable) =>
            {
                for spec in specs.iter_mut().filter(|s| s.value_variable.as_deref() == Some(variable)) {
                    spec.value_predicates.push(ValuePredicate::new(comparator, literal.clone()));
                }
            }
            _ => post_filters.push(conjunct.clone()),
        }
    }
    Ok(post_filters)
}

fn output_columns(
    original: &GraphQuery,
    shapes: &[Shape],
    specs: &[PushdownSpec],
    aggregated: bool,
) -> Vec<OutputColumn> {
    // Point variables only link a series to its timestamp and value.
    let points: HashSet<&str> = shapes.iter().map(|s| s.point.as_str()).collect();
    let projected: Vec<String> = original
        .projected_variables()
        .into_iter()
        .filter(|v| !points.contains(v.as_str()))
        .collect();
    let timestamp_spec =
        |v: &str| specs.iter().position(|s| s.timestamp_variable.as_deref() == Some(v));
    let value_spec = |v: &str| specs.iter().position(|s| s.value_variable.as_deref() == Some(v));
    let timestamp_columns = projected.iter().filter(|v| timestamp_spec(v).is_some()).count();

    projected
        .into_iter()
        .map(|variable| {
            if let Some(spec) = timestamp_spec(&variable) {
                let name = match (aggregated, timestamp_columns) {
                    (false, _) => variable.clone(),
                    (true, 1) => "window_start".to_string(),
                    (true, _) => format!("{}_window_start", variable),
                };
                OutputColumn::Timestamp { name, variable, spec }
            } else if let Some(spec) = value_spec(&variable) {
                OutputColumn::Value { name: variable.clone(), variable, spec }
            } else {
                OutputColumn::Graph { name: variable.clone(), variable }
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{AggregateFunction, Comparator};
    use crate::parsing::SparqlParser;
    use chrono::{TimeZone, Utc};
    use std::ops::Bound;
    use std::time::Duration;

    const PROLOGUE: &str = r#"
        PREFIX xsd: <http://www.w3.org/2001/XMLSchema#>
        PREFIX ct: <https://github.com/magbak/chrontext#>
        PREFIX types: <http://example.org/types#>
    "#;

    fn hybrid(body: &str) -> HybridQuery {
        let parsed = SparqlParser::new().parse(&format!("{}{}", PROLOGUE, body)).unwrap();
        HybridQuery::new(parsed.into_graph_query().unwrap())
    }

    fn split(body: &str) -> Option<SplitQuery> {
        Splitter::default().split(&hybrid(body), 1).unwrap()
    }

    #[test]
    fn test_canonical_shape_is_pushed_down() {
        let split = split(
            r#"SELECT ?w ?t ?v WHERE {
                ?w types:hasSensor ?s .
                ?s ct:hasTimeseries ?ts .
                ?ts ct:hasDataPoint ?dp .
                ?dp ct:hasTimestamp ?t .
                ?dp ct:hasValue ?v .
                FILTER(?t > "2022-08-17T10:42:30Z"^^xsd:dateTime && ?v < 200)
            }"#,
        )
        .unwrap();

        assert_eq!(split.specs.len(), 1);
        let spec = &split.specs[0];
        assert_eq!(spec.series_variable, "ts");
        assert_eq!(spec.identifier_variable, "ts_external_id");
        assert_eq!(spec.table_variable, None);
        let mid = Utc.with_ymd_and_hms(2022, 8, 17, 10, 42, 30).unwrap();
        assert_eq!(spec.time_range.start, Bound::Excluded(mid));
        assert_eq!(spec.time_range.end, Bound::Unbounded);
        assert_eq!(spec.value_predicates, vec![ValuePredicate::new(Comparator::Lt, Value::Integer(200))]);
        assert!(split.post_filters.is_empty());

        let residual = split.residual.to_string();
        assert!(!residual.contains("hasDataPoint"), "{}", residual);
        assert!(!residual.contains("FILTER"), "{}", residual);
        assert!(residual.contains("?ts <https://github.com/magbak/chrontext#hasExternalId> ?ts_external_id ."));
        assert!(residual.contains("?s <https://github.com/magbak/chrontext#hasTimeseries> ?ts ."));
        assert_eq!(split.column_names(), vec!["w", "t", "v"]);
    }

    #[test]
    fn test_existing_external_id_is_reused() {
        let split = split(
            r#"SELECT * WHERE {
                ?ts ct:hasExternalId ?id .
                ?ts ct:hasDataPoint ?dp .
                ?dp ct:hasValue ?v .
            }"#,
        )
        .unwrap();
        assert_eq!(split.specs[0].identifier_variable, "id");
        assert_eq!(split.specs[0].timestamp_variable, None);
        assert_eq!(split.column_names(), vec!["id", "ts", "v"], "point variables are not output");
    }

    #[test]
    fn test_queries_without_shape_are_not_split() {
        assert!(split("SELECT ?s WHERE { ?s types:hasSensor ?o }").is_none());
    }

    #[test]
    fn test_timestamp_used_elsewhere_is_not_a_shape() {
        let split = split(
            r#"SELECT * WHERE {
                ?ts ct:hasDataPoint ?dp .
                ?dp ct:hasTimestamp ?t .
                ?other types:observedAt ?t .
            }"#,
        );
        assert!(split.is_none());
    }

    #[test]
    fn test_timestamp_literal_must_be_date_time() {
        let query = hybrid(
            r#"SELECT * WHERE {
                ?ts ct:hasDataPoint ?dp .
                ?dp ct:hasTimestamp ?t .
                FILTER(?t > "yesterday")
            }"#,
        );
        assert!(matches!(Splitter::default().split(&query, 1), Err(HybridError::TypeMismatch(_))));
    }

    #[test]
    fn test_contradictory_time_bounds_give_an_empty_range() {
        let split = split(
            r#"SELECT ?v WHERE {
                ?ts ct:hasDataPoint ?dp .
                ?dp ct:hasTimestamp ?t .
                ?dp ct:hasValue ?v .
                FILTER(?t > "2022-08-17T10:43:00Z"^^xsd:dateTime && ?t < "2022-08-17T10:42:00Z"^^xsd:dateTime)
            }"#,
        )
        .unwrap();
        let range = split.specs[0].time_range;
        assert!(split.post_filters.is_empty());
        for second in 0..120 {
            let instant = Utc.with_ymd_and_hms(2022, 8, 17, 10, 42, 0).unwrap() + chrono::Duration::seconds(second);
            assert!(!range.contains(&instant));
        }
    }

    #[test]
    fn test_disjunctions_become_post_filters() {
        let split = split(
            r#"SELECT * WHERE {
                ?w types:hasName ?name .
                ?w ct:hasTimeseries ?ts .
                ?ts ct:hasDataPoint ?dp .
                ?dp ct:hasValue ?v .
                FILTER((?v < 3 || ?v > 10) && ?name != "x" && ?v != 5)
            }"#,
        )
        .unwrap();
        assert_eq!(split.post_filters.len(), 2);
        assert_eq!(split.residual.filters.len(), 1);
        assert!(split.specs[0].value_predicates.is_empty());
    }

    #[test]
    fn test_several_tables_fetch_table_names() {
        let query = hybrid(
            r#"SELECT ?v WHERE {
                ?ts ct:hasDataPoint ?dp .
                ?dp ct:hasValue ?v .
            }"#,
        );
        let split = Splitter::default().split(&query, 2).unwrap().unwrap();
        assert_eq!(split.specs[0].table_variable.as_deref(), Some("ts_table"));
        assert!(split.residual.to_string().contains("hasTimeseriesTable> ?ts_table"));
    }

    #[test]
    fn test_shared_timestamp_synchronizes_specs() {
        let query = hybrid(
            r#"SELECT ?t ?v1 ?v2 WHERE {
                ?ts1 ct:hasDataPoint ?dp1 .
                ?dp1 ct:hasTimestamp ?t .
                ?dp1 ct:hasValue ?v1 .
                ?ts2 ct:hasDataPoint ?dp2 .
                ?dp2 ct:hasTimestamp ?t .
                ?dp2 ct:hasValue ?v2 .
            }"#,
        )
        .with_aggregation(Aggregation::new(AggregateFunction::Mean, Duration::from_secs(5)).unwrap());
        let split = Splitter::default().split(&query, 1).unwrap().unwrap();
        assert_eq!(split.specs.len(), 2);
        assert_eq!(split.synchronized_with(1), Some(0));
        assert_eq!(split.synchronized_with(0), None);
        assert_eq!(split.column_names(), vec!["window_start", "v1", "v2"]);
        assert!(split.specs.iter().all(|s| s.aggregation.is_some()));
    }
}
