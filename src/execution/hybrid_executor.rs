//! Hybrid Query Executor
//!
//! Runs a [`SplitQuery`]:
//! 1. the residual graph query against the triple store
//! 2. one backend read per (spec, table) with the identifiers the graph
//!    returned, concurrently
//! 3. the merge of graph solutions with series points
//!
//! Reads run as tasks on a `JoinSet`. The first failed read ends the
//! execution and dropping the set aborts the reads still in flight. The
//! whole execution races the caller's cancellation token.
//!
//! Aggregations over a range without a start are read raw and windowed here,
//! all on one origin: the earliest timestamp any of those reads returned.
//! Synchronized series therefore share a window grid.

use crate::backends::{series_ops, Backend, ReadRequest, SeriesRow};
use crate::core::{family_of_datatype, AggregateFunction, Aggregation, ColumnType, ResultTable};
use crate::error::{HybridError, Result};
use crate::execution::merge::{self, RowKeys, SeriesKey, SeriesPoints};
use crate::querying::{SolutionTable, TripleStore};
use crate::registry::{TableRegistry, VirtualizedTimeSeriesTable};
use crate::splitter::{PushdownSpec, SplitQuery};
use log::{debug, info, warn};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// One backend read planned for a spec.
#[derive(Debug, Clone)]
struct PlannedRead {
    spec: usize,
    table: Arc<VirtualizedTimeSeriesTable>,
    request: ReadRequest,
    /// Aggregation applied after the read, on the common window origin
    deferred: Option<Aggregation>,
}

/// What [`HybridExecutor::plan_reads`] hands to fetch and merge.
struct ReadPlan {
    row_keys: RowKeys,
    reads: Vec<PlannedRead>,
    value_types: Vec<ColumnType>,
}

/// Executor for split hybrid queries.
pub struct HybridExecutor {
    store: Arc<dyn TripleStore>,
    registry: Arc<TableRegistry>,
}

impl HybridExecutor {
    /// Creates a new HybridExecutor.
    ///
    /// # Arguments
    ///
    /// * `store` - Triple store answering the residual graph queries
    /// * `registry` - Virtualized tables and the active backend
    pub fn new(store: Arc<dyn TripleStore>, registry: Arc<TableRegistry>) -> Self {
        Self { store, registry }
    }

    /// Executes a split query.
    ///
    /// # Returns
    ///
    /// The merged table with the split's output columns, ordered by graph
    /// solution and then by timestamp.
    ///
    /// # Errors
    ///
    /// Returns the first failure of the triple store or of any backend read,
    /// or `Cancelled` when `cancel` fires first. No partial result is kept.
    pub async fn execute(&self, split: &SplitQuery, cancel: &CancellationToken) -> Result<ResultTable> {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                info!("Hybrid query cancelled");
                Err(HybridError::Cancelled)
            }
            result = self.run(split) => result,
        }
    }

    /// Sends a query with no time-series shape to the triple store unchanged.
    pub async fn execute_graph_only(&self, query: &str, cancel: &CancellationToken) -> Result<ResultTable> {
        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(HybridError::Cancelled),
            solutions = self.store.select(query) => Ok(solutions_to_table(solutions?)),
        }
    }

    async fn run(&self, split: &SplitQuery) -> Result<ResultTable> {
        let residual = split.residual.to_string();
        let solutions = self.store.select(&residual).await?;
        debug!("Residual graph query returned {} solutions", solutions.len());

        let plan = self.plan_reads(split, &solutions)?;
        let series = self.fetch(plan.reads).await?;
        let table = merge::merge(split, &solutions, &plan.row_keys, &series, &plan.value_types);
        info!("Hybrid query produced {} rows", table.len());
        Ok(table)
    }

    /// Groups the identifiers each spec needs by table.
    fn plan_reads(&self, split: &SplitQuery, solutions: &SolutionTable) -> Result<ReadPlan> {
        let mut row_keys: RowKeys = vec![Vec::with_capacity(split.specs.len()); solutions.len()];
        let mut reads = Vec::new();
        let mut value_types = Vec::with_capacity(split.specs.len());

        for (spec_idx, spec) in split.specs.iter().enumerate() {
            let mut groups: Vec<(Arc<VirtualizedTimeSeriesTable>, Vec<String>)> = Vec::new();
            for (row, keys) in row_keys.iter_mut().enumerate() {
                let Some(identifier) = solutions.value(row, &spec.identifier_variable) else {
                    keys.push(None);
                    continue;
                };
                let table = match &spec.table_variable {
                    Some(variable) => match solutions.value(row, variable) {
                        Some(name) => self.registry.resolve_qualified(&name.lexical())?,
                        None => {
                            keys.push(None);
                            continue;
                        }
                    },
                    None => self.only_table()?,
                };
                let identifier = identifier.lexical();
                keys.push(Some((table.qualified_name(), identifier.clone())));

                match groups.iter_mut().find(|(t, _)| t.qualified_name() == table.qualified_name()) {
                    Some((_, identifiers)) => {
                        if !identifiers.contains(&identifier) {
                            identifiers.push(identifier);
                        }
                    }
                    None => groups.push((table, vec![identifier])),
                }
            }

            check_datatypes(spec, &groups)?;
            let declared = match groups.first() {
                Some((table, _)) => Some(Arc::clone(table)),
                None => self.only_table().ok(),
            };
            value_types.push(value_column_type(declared.as_deref(), spec.aggregation));

            let deferred = spec.aggregation.filter(|_| spec.time_range.start_instant().is_none());
            for (table, identifiers) in groups {
                reads.push(PlannedRead {
                    spec: spec_idx,
                    table,
                    request: ReadRequest {
                        identifiers,
                        time_range: spec.time_range,
                        value_predicates: spec.value_predicates.clone(),
                        aggregation: if deferred.is_some() { None } else { spec.aggregation },
                    },
                    deferred,
                });
            }
        }
        debug!("Planned {} backend read(s) for {} spec(s)", reads.len(), split.specs.len());
        Ok(ReadPlan { row_keys, reads, value_types })
    }

    fn only_table(&self) -> Result<Arc<VirtualizedTimeSeriesTable>> {
        let mut tables = self.registry.tables()?;
        match tables.len() {
            1 => Ok(tables.remove(0)),
            0 => Err(HybridError::UnknownTable("no virtualized table is registered".to_string())),
            n => Err(HybridError::UnknownTable(format!(
                "{} tables are registered but the series does not name one",
                n
            ))),
        }
    }

    async fn fetch(&self, reads: Vec<PlannedRead>) -> Result<HashMap<SeriesKey, SeriesPoints>> {
        let mut tasks = JoinSet::new();
        for read in reads {
            let backend = self.registry.backend_for(&read.table)?;
            tasks.spawn(async move {
                let rows = read_with_fallback(&backend, &read.table, &read.request).await;
                (read, rows)
            });
        }

        let mut fetched = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            let (read, rows) = joined
                .map_err(|e| HybridError::BackendUnavailable(format!("backend read task failed: {}", e)))?;
            let rows = rows?;
            debug!("Read {} rows for spec {} from {}", rows.len(), read.spec, read.table.qualified_name());
            fetched.push((read, rows));
        }

        let origin = fetched
            .iter()
            .filter(|(read, _)| read.deferred.is_some())
            .flat_map(|(_, rows)| rows.iter().map(|row| row.timestamp))
            .min();
        if let Some(origin) = origin {
            debug!("Windows without a range start are anchored on {}", origin);
        }

        let mut series: HashMap<SeriesKey, SeriesPoints> = HashMap::new();
        for (read, rows) in fetched {
            let rows = match (&read.deferred, origin) {
                (Some(aggregation), Some(origin)) => series_ops::aggregate_from(rows, aggregation, origin)?,
                _ => rows,
            };
            for row in rows {
                series
                    .entry((read.spec, read.table.qualified_name(), row.identifier))
                    .or_default()
                    .push((row.timestamp, row.value));
            }
        }
        for points in series.values_mut() {
            points.sort_by_key(|(timestamp, _)| *timestamp);
        }
        Ok(series)
    }
}

/// Declared type of a spec's value column. Means are doubles and counts are
/// integers whatever the table declares.
fn value_column_type(table: Option<&VirtualizedTimeSeriesTable>, aggregation: Option<Aggregation>) -> ColumnType {
    match aggregation.map(|a| a.function) {
        Some(AggregateFunction::Mean) => ColumnType::Double,
        Some(AggregateFunction::Count) => ColumnType::Integer,
        _ => table.map_or(ColumnType::String, |t| ColumnType::of_datatype(&t.value_datatype)),
    }
}

/// Reads from the backend; predicates or aggregation it cannot express are
/// applied client-side on a raw re-read.
async fn read_with_fallback(
    backend: &Backend,
    table: &VirtualizedTimeSeriesTable,
    request: &ReadRequest,
) -> Result<Vec<SeriesRow>> {
    match backend.read(table, request).await {
        Err(HybridError::UnsupportedPredicate(reason)) => {
            warn!(
                "{} backend cannot evaluate the pushed-down conditions on {} ({}); filtering client-side",
                backend.kind(),
                table.qualified_name(),
                reason
            );
            let rows = backend.read(table, &request.raw()).await?;
            series_ops::evaluate(rows, request)
        }
        other => other,
    }
}

/// Tables read by one spec must share a datatype, and value literals must
/// match it.
fn check_datatypes(spec: &PushdownSpec, groups: &[(Arc<VirtualizedTimeSeriesTable>, Vec<String>)]) -> Result<()> {
    let Some((first, _)) = groups.first() else {
        return Ok(());
    };
    let family = family_of_datatype(&first.value_datatype);
    if let Some((other, _)) = groups.iter().find(|(t, _)| family_of_datatype(&t.value_datatype) != family) {
        return Err(HybridError::TypeMismatch(format!(
            "?{} spans {} <{}> and {} <{}>",
            spec.series_variable,
            first.qualified_name(),
            first.value_datatype,
            other.qualified_name(),
            other.value_datatype
        )));
    }
    if let Some(predicate) = spec.value_predicates.iter().find(|p| p.literal.family() != family) {
        return Err(HybridError::TypeMismatch(format!(
            "{} compared with values of {} declared <{}>",
            predicate.literal.to_sparql(),
            first.qualified_name(),
            first.value_datatype
        )));
    }
    Ok(())
}

/// Converts triple store solutions to a result table.
pub fn solutions_to_table(solutions: SolutionTable) -> ResultTable {
    let variables = solutions.variables().to_vec();
    ResultTable::from_rows(variables, solutions.into_rows())
}
