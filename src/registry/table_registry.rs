use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use log::info;
use serde::{Deserialize, Serialize};

use crate::backends::Backend;
use crate::error::{HybridError, Result};

/// A logical time-series table served by the active backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VirtualizedTimeSeriesTable {
    pub schema: String,
    pub table_name: String,
    #[serde(default = "default_value_column")]
    pub value_column: String,
    #[serde(default = "default_timestamp_column")]
    pub timestamp_column: String,
    #[serde(default = "default_identifier_column")]
    pub identifier_column: String,
    /// XSD datatype IRI of the value column
    pub value_datatype: String,
}

fn default_value_column() -> String {
    "value".to_string()
}

fn default_timestamp_column() -> String {
    "timestamp".to_string()
}

fn default_identifier_column() -> String {
    "id".to_string()
}

impl VirtualizedTimeSeriesTable {
    /// A table with the conventional `id`, `timestamp` and `value` columns.
    pub fn new(
        schema: impl Into<String>,
        table_name: impl Into<String>,
        value_datatype: impl Into<String>,
    ) -> Self {
        Self {
            schema: schema.into(),
            table_name: table_name.into(),
            value_column: default_value_column(),
            timestamp_column: default_timestamp_column(),
            identifier_column: default_identifier_column(),
            value_datatype: value_datatype.into(),
        }
    }

    pub fn with_columns(
        mut self,
        identifier_column: impl Into<String>,
        timestamp_column: impl Into<String>,
        value_column: impl Into<String>,
    ) -> Self {
        self.identifier_column = identifier_column.into();
        self.timestamp_column = timestamp_column.into();
        self.value_column = value_column.into();
        self
    }

    /// `schema.table_name`, or just the table name when the schema is empty.
    pub fn qualified_name(&self) -> String {
        if self.schema.is_empty() {
            self.table_name.clone()
        } else {
            format!("{}.{}", self.schema, self.table_name)
        }
    }

    fn key(&self) -> (String, String) {
        (self.schema.clone(), self.table_name.clone())
    }
}

/// Virtualized tables plus the single backend currently serving them.
pub struct TableRegistry {
    tables: Arc<RwLock<Vec<Arc<VirtualizedTimeSeriesTable>>>>,
    index: Arc<RwLock<HashMap<(String, String), usize>>>,
    backend: Arc<RwLock<Option<Arc<Backend>>>>,
}

impl Default for TableRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TableRegistry {
    pub fn new() -> Self {
        TableRegistry {
            tables: Arc::new(RwLock::new(Vec::new())),
            index: Arc::new(RwLock::new(HashMap::new())),
            backend: Arc::new(RwLock::new(None)),
        }
    }

    /// Registers a table; `(schema, table_name)` must be new.
    pub fn register(&self, table: VirtualizedTimeSeriesTable) -> Result<Arc<VirtualizedTimeSeriesTable>> {
        let mut index = self.index.write().map_err(poisoned)?;
        let mut tables = self.tables.write().map_err(poisoned)?;
        if index.contains_key(&table.key()) {
            return Err(HybridError::DuplicateTable(table.qualified_name()));
        }
        info!("Registered virtualized table {}", table.qualified_name());
        let table = Arc::new(table);
        index.insert(table.key(), tables.len());
        tables.push(Arc::clone(&table));
        Ok(table)
    }

    pub fn resolve(&self, schema: &str, table_name: &str) -> Result<Arc<VirtualizedTimeSeriesTable>> {
        let index = self.index.read().map_err(poisoned)?;
        let tables = self.tables.read().map_err(poisoned)?;
        index
            .get(&(schema.to_string(), table_name.to_string()))
            .and_then(|idx| tables.get(*idx))
            .cloned()
            .ok_or_else(|| HybridError::UnknownTable(qualified(schema, table_name)))
    }

    /// Resolves `schema.table` or a bare table name in the empty schema.
    pub fn resolve_qualified(&self, name: &str) -> Result<Arc<VirtualizedTimeSeriesTable>> {
        match name.split_once('.') {
            Some((schema, table_name)) => self.resolve(schema, table_name),
            None => self.resolve("", name),
        }
    }

    /// The backend serving `table`.
    pub fn backend_for(&self, table: &VirtualizedTimeSeriesTable) -> Result<Arc<Backend>> {
        self.resolve(&table.schema, &table.table_name)?;
        self.active_backend()?.ok_or_else(|| {
            HybridError::BackendUnavailable(format!(
                "no backend configured for {}",
                table.qualified_name()
            ))
        })
    }

    /// Replaces the active backend, returning the previous one.
    pub fn set_backend(&self, backend: Backend) -> Result<Option<Arc<Backend>>> {
        let mut slot = self.backend.write().map_err(poisoned)?;
        info!("Active time-series backend set to {}", backend.kind());
        Ok(slot.replace(Arc::new(backend)))
    }

    pub fn active_backend(&self) -> Result<Option<Arc<Backend>>> {
        Ok(self.backend.read().map_err(poisoned)?.clone())
    }

    /// Registered tables in registration order.
    pub fn tables(&self) -> Result<Vec<Arc<VirtualizedTimeSeriesTable>>> {
        Ok(self.tables.read().map_err(poisoned)?.clone())
    }

    pub fn len(&self) -> usize {
        self.tables.read().map(|tables| tables.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn qualified(schema: &str, table_name: &str) -> String {
    if schema.is_empty() {
        table_name.to_string()
    } else {
        format!("{}.{}", schema, table_name)
    }
}

fn poisoned<T>(_: std::sync::PoisonError<T>) -> HybridError {
    HybridError::Config("table registry lock poisoned".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::InMemoryBackend;
    use crate::core::xsd;

    #[test]
    fn test_register_and_resolve() {
        let registry = TableRegistry::new();
        registry
            .register(VirtualizedTimeSeriesTable::new("public", "ts_int", xsd::INTEGER))
            .unwrap();
        let table = registry.resolve("public", "ts_int").unwrap();
        assert_eq!(table.identifier_column, "id");
        assert_eq!(registry.resolve_qualified("public.ts_int").unwrap(), table);
        assert!(matches!(
            registry.resolve("public", "missing"),
            Err(HybridError::UnknownTable(name)) if name == "public.missing"
        ));
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let registry = TableRegistry::new();
        let table = VirtualizedTimeSeriesTable::new("", "ts", xsd::DOUBLE);
        registry.register(table.clone()).unwrap();
        assert!(matches!(registry.register(table), Err(HybridError::DuplicateTable(name)) if name == "ts"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_backend_replacement() {
        let registry = TableRegistry::new();
        let table = registry.register(VirtualizedTimeSeriesTable::new("", "ts", xsd::DOUBLE)).unwrap();
        assert!(matches!(registry.backend_for(&table), Err(HybridError::BackendUnavailable(_))));

        assert!(registry.set_backend(InMemoryBackend::new().into()).unwrap().is_none());
        let previous = registry.set_backend(InMemoryBackend::new().into()).unwrap();
        assert_eq!(previous.map(|b| b.kind()), Some("in-memory"));
        assert_eq!(registry.backend_for(&table).unwrap().kind(), "in-memory");

        let stranger = VirtualizedTimeSeriesTable::new("", "other", xsd::DOUBLE);
        assert!(matches!(registry.backend_for(&stranger), Err(HybridError::UnknownTable(_))));
    }
}
