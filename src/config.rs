//! Engine configuration file
//!
//! ```json
//! {
//!   "triple_store": {"kind": "oxigraph", "turtle_files": ["assets.ttl"]},
//!   "name_predicate": "http://example.org/types#hasName",
//!   "connectives": {".": "http://example.org/types#hasSensor"},
//!   "backend": {"kind": "historian", "endpoint": "127.0.0.1:4840", "namespace": 2},
//!   "tables": [{"schema": "", "table_name": "ts", "value_datatype": "http://www.w3.org/2001/XMLSchema#double"}]
//! }
//! ```

use crate::backends::{Backend, ColumnarSqlBackend, Credentials, HistorianBackend};
use crate::dsl::ConnectiveMapping;
use crate::error::{HybridError, Result};
use crate::querying::{OxigraphTripleStore, SparqlHttpStore, TripleStore};
use crate::registry::VirtualizedTimeSeriesTable;
use crate::splitter::Vocabulary;
use log::info;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TripleStoreConfig {
    /// Embedded store loaded from Turtle files
    Oxigraph {
        #[serde(default)]
        turtle_files: Vec<PathBuf>,
    },
    /// Remote SPARQL 1.1 protocol endpoint
    Http {
        query_endpoint: String,
        #[serde(default)]
        update_endpoint: Option<String>,
        #[serde(default)]
        timeout_secs: Option<u64>,
    },
}

impl Default for TripleStoreConfig {
    fn default() -> Self {
        TripleStoreConfig::Oxigraph { turtle_files: Vec::new() }
    }
}

impl TripleStoreConfig {
    pub fn build(&self) -> Result<Arc<dyn TripleStore>> {
        match self {
            TripleStoreConfig::Oxigraph { turtle_files } => {
                let store = OxigraphTripleStore::new()?;
                for file in turtle_files {
                    let data = fs::read_to_string(file).map_err(|e| {
                        HybridError::Config(format!("cannot read {}: {}", file.display(), e))
                    })?;
                    store.load_turtle(&data)?;
                    info!("Loaded {} into the embedded triple store", file.display());
                }
                Ok(Arc::new(store))
            }
            TripleStoreConfig::Http { query_endpoint, update_endpoint, timeout_secs } => {
                let mut store = SparqlHttpStore::new(query_endpoint);
                if let Some(update_endpoint) = update_endpoint {
                    store = store.with_update_endpoint(update_endpoint);
                }
                if let Some(secs) = timeout_secs {
                    store = store.with_timeout(Duration::from_secs(*secs));
                }
                Ok(Arc::new(store))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackendConfig {
    ColumnarSql {
        endpoint: String,
        #[serde(default)]
        credentials: Option<Credentials>,
        #[serde(default)]
        timeout_secs: Option<u64>,
    },
    Historian {
        endpoint: String,
        namespace: u16,
        #[serde(default)]
        timeout_secs: Option<u64>,
    },
}

impl BackendConfig {
    pub fn build(&self) -> Backend {
        match self {
            BackendConfig::ColumnarSql { endpoint, credentials, timeout_secs } => {
                let mut backend = ColumnarSqlBackend::new(endpoint);
                if let Some(credentials) = credentials {
                    backend = backend.with_credentials(credentials.clone());
                }
                if let Some(secs) = timeout_secs {
                    backend = backend.with_timeout(Duration::from_secs(*secs));
                }
                backend.into()
            }
            BackendConfig::Historian { endpoint, namespace, timeout_secs } => {
                let mut backend = HistorianBackend::new(endpoint, *namespace);
                if let Some(secs) = timeout_secs {
                    backend = backend.with_timeout(Duration::from_secs(*secs));
                }
                backend.into()
            }
        }
    }
}

/// Everything needed to build an [`Engine`](crate::api::Engine).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub triple_store: TripleStoreConfig,
    #[serde(default)]
    pub name_predicate: Option<String>,
    #[serde(default)]
    pub class_namespace: Option<String>,
    #[serde(default)]
    pub connectives: ConnectiveMapping,
    #[serde(default)]
    pub vocabulary: Vocabulary,
    #[serde(default)]
    pub backend: Option<BackendConfig>,
    #[serde(default)]
    pub tables: Vec<VirtualizedTimeSeriesTable>,
}

impl EngineConfig {
    pub fn from_json(text: &str) -> Result<Self> {
        let config: EngineConfig = serde_json::from_str(text)?;
        config.connectives.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .map_err(|e| HybridError::Config(format!("cannot read {}: {}", path.display(), e)))?;
        Self::from_json(&text)
    }
}
