use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::types::{TableName, TableSchema};

/// Internal storage for registry data.
#[derive(Debug)]
struct Inner {
    table_schemas: HashMap<TableName, Arc<TableSchema>>,
}

/// Thread-safe registry of changelog table schemas the engine has ensured.
///
/// The merger consults the registry before touching the store: a registered
/// table needs no existence check and no creation attempt. The lazy
/// create-from-sample path remains as the fallback for tables seen for the
/// first time, so two table pipelines never race on the same schema (each
/// table has exactly one coordinator).
#[derive(Debug, Clone)]
pub struct SchemaRegistry {
    inner: Arc<Mutex<Inner>>,
}

impl SchemaRegistry {
    /// Creates a new empty registry.
    pub fn new() -> Self {
        let inner = Inner {
            table_schemas: HashMap::new(),
        };

        Self {
            inner: Arc::new(Mutex::new(inner)),
        }
    }

    /// Returns the registered schema for a table, if any.
    pub async fn get(&self, table: &TableName) -> Option<Arc<TableSchema>> {
        let inner = self.inner.lock().await;
        inner.table_schemas.get(table).cloned()
    }

    /// Registers a table schema, replacing any previous entry.
    pub async fn register(&self, schema: TableSchema) -> Arc<TableSchema> {
        let mut inner = self.inner.lock().await;

        let name = schema.name.clone();
        let schema = Arc::new(schema);
        inner.table_schemas.insert(name, schema.clone());

        schema
    }
}

impl Default for SchemaRegistry {
    fn default() -> Self {
        Self::new()
    }
}
