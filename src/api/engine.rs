use crate::algebra::HybridQuery;
use crate::backends::Backend;
use crate::config::EngineConfig;
use crate::core::ResultTable;
use crate::dsl::{ConnectiveMapping, DslCompiler};
use crate::error::{HybridError, Result};
use crate::execution::HybridExecutor;
use crate::parsing::{DslParser, SparqlParser};
use crate::querying::TripleStore;
use crate::registry::{TableRegistry, VirtualizedTimeSeriesTable};
use crate::splitter::{Splitter, Vocabulary};
use log::{debug, info};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// A hybrid query engine: one triple store, one registry of virtualized
/// tables with its active backend, and the DSL settings of this session.
///
/// Configuration is explicit and owned by the engine; two engines never
/// share settings.
pub struct Engine {
    store: Arc<dyn TripleStore>,
    registry: Arc<TableRegistry>,
    sparql: SparqlParser,
    dsl: DslParser,
    compiler: DslCompiler,
    splitter: Splitter,
}

impl Engine {
    /// Creates an engine over `store` with the default vocabulary, no
    /// registered tables and no backend.
    pub fn new(store: Arc<dyn TripleStore>) -> Result<Self> {
        Ok(Engine {
            store,
            registry: Arc::new(TableRegistry::new()),
            sparql: SparqlParser::new(),
            dsl: DslParser::new()?,
            compiler: DslCompiler::default(),
            splitter: Splitter::default(),
        })
    }

    /// Builds the triple store, backend, tables and DSL settings of `config`.
    pub fn from_config(config: &EngineConfig) -> Result<Self> {
        let mut engine = Engine::new(config.triple_store.build()?)?;
        engine.set_vocabulary(config.vocabulary.clone());
        if let Some(predicate) = &config.name_predicate {
            engine.set_name_predicate(predicate.clone());
        }
        if let Some(namespace) = &config.class_namespace {
            engine.set_class_namespace(namespace.clone());
        }
        engine.set_connective_mapping(config.connectives.clone())?;
        if let Some(backend) = &config.backend {
            engine.set_backend(backend.build())?;
        }
        for table in &config.tables {
            engine.register_table(table.clone())?;
        }
        info!(
            "Engine configured with {} table(s) and {} connective(s)",
            engine.registry.len(),
            config.connectives.len()
        );
        Ok(engine)
    }

    pub fn set_name_predicate(&mut self, predicate: impl Into<String>) {
        self.compiler.set_name_predicate(predicate);
    }

    pub fn set_class_namespace(&mut self, namespace: impl Into<String>) {
        self.compiler.set_class_namespace(namespace);
    }

    pub fn add_connective(&mut self, symbol: impl Into<String>, relation: impl Into<String>) -> Result<()> {
        self.compiler.add_connective(symbol, relation)
    }

    pub fn set_connective_mapping(&mut self, mapping: ConnectiveMapping) -> Result<()> {
        self.compiler.set_connective_mapping(mapping)
    }

    /// Replaces the relation IRIs used to find and compile series patterns.
    pub fn set_vocabulary(&mut self, vocabulary: Vocabulary) {
        self.compiler.set_vocabulary(vocabulary.clone());
        self.splitter = Splitter::new(vocabulary);
    }

    /// Makes `backend` the source of every registered table, returning the
    /// previous one.
    pub fn set_backend(&self, backend: impl Into<Backend>) -> Result<Option<Arc<Backend>>> {
        self.registry.set_backend(backend.into())
    }

    pub fn register_table(&self, table: VirtualizedTimeSeriesTable) -> Result<Arc<VirtualizedTimeSeriesTable>> {
        self.registry.register(table)
    }

    pub fn registry(&self) -> &Arc<TableRegistry> {
        &self.registry
    }

    pub fn triple_store(&self) -> &Arc<dyn TripleStore> {
        &self.store
    }

    /// Parses and compiles DSL text without executing it.
    pub fn compile_dsl(&self, text: &str) -> Result<HybridQuery> {
        let parsed = self.dsl.parse(text)?;
        self.compiler.compile(&parsed)
    }

    /// Executes a SPARQL SELECT query, pushing its time-series patterns down
    /// to the active backend.
    ///
    /// A query that never uses the data-point relation is sent to the triple
    /// store as written, whatever SPARQL it contains.
    ///
    /// # Errors
    ///
    /// Every failure is wrapped in `HybridQueryFailed`.
    pub async fn execute_hybrid_query(&self, query: &str) -> Result<ResultTable> {
        self.execute_hybrid_query_with_cancellation(query, &CancellationToken::new()).await
    }

    pub async fn execute_hybrid_query_with_cancellation(
        &self,
        query: &str,
        cancel: &CancellationToken,
    ) -> Result<ResultTable> {
        self.run_sparql(query, cancel).await.map_err(HybridError::into_query_failure)
    }

    async fn run_sparql(&self, query: &str, cancel: &CancellationToken) -> Result<ResultTable> {
        let parsed = self.sparql.parse(query)?;
        if !parsed.mentions_predicate(&self.splitter.vocabulary().has_data_point) {
            debug!("Query never reaches a data point; forwarding it to the triple store");
            let executor = HybridExecutor::new(Arc::clone(&self.store), Arc::clone(&self.registry));
            return executor.execute_graph_only(query, cancel).await;
        }
        let graph = parsed.into_graph_query()?;
        self.execute(HybridQuery::new(graph), Some(query), cancel).await
    }

    /// Compiles and executes DSL text.
    ///
    /// # Errors
    ///
    /// Every failure is wrapped in `HybridQueryFailed`.
    pub async fn execute_dsl_query(&self, text: &str) -> Result<ResultTable> {
        self.execute_dsl_query_with_cancellation(text, &CancellationToken::new()).await
    }

    pub async fn execute_dsl_query_with_cancellation(
        &self,
        text: &str,
        cancel: &CancellationToken,
    ) -> Result<ResultTable> {
        let outcome = match self.compile_dsl(text) {
            Ok(hybrid) => self.execute(hybrid, None, cancel).await,
            Err(e) => Err(e),
        };
        outcome.map_err(HybridError::into_query_failure)
    }

    /// Runs a compiled query; `original` is forwarded unchanged when the
    /// query has no time-series pattern.
    async fn execute(
        &self,
        hybrid: HybridQuery,
        original: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<ResultTable> {
        let executor = HybridExecutor::new(Arc::clone(&self.store), Arc::clone(&self.registry));
        match self.splitter.split(&hybrid, self.registry.len())? {
            Some(split) => executor.execute(&split, cancel).await,
            None => {
                debug!("Query has no time-series pattern; forwarding it to the triple store");
                let text = match original {
                    Some(text) => text.to_string(),
                    None => hybrid.query.to_string(),
                };
                executor.execute_graph_only(&text, cancel).await
            }
        }
    }
}
