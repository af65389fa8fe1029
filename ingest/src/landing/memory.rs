use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::info;

use crate::error::IngestResult;
use crate::landing::base::LandingStore;
use crate::types::{BatchId, DeltaRow, TableSchema};

/// One landed batch held in memory.
#[derive(Debug, Clone)]
pub struct LandedBatch {
    pub schema: TableSchema,
    pub rows: Vec<DeltaRow>,
}

/// In-memory landing storage for testing and development purposes.
///
/// Landed batches stay addressable by `(table, batch_id)` so tests can replay
/// them through the merger, which is exactly what crash recovery does against
/// the filesystem store.
#[derive(Debug, Clone)]
pub struct MemoryLandingStore {
    inner: Arc<Mutex<HashMap<(String, String), LandedBatch>>>,
}

impl MemoryLandingStore {
    /// Creates a new empty landing store.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Returns a copy of the batch landed for `(table, batch_id)`.
    pub async fn landed_batch(&self, table: &str, batch_id: &BatchId) -> Option<LandedBatch> {
        let inner = self.inner.lock().await;
        inner
            .get(&(table.to_string(), batch_id.as_str().to_string()))
            .cloned()
    }

    /// Returns the number of batches landed for a table.
    pub async fn batch_count(&self, table: &str) -> usize {
        let inner = self.inner.lock().await;
        inner.keys().filter(|(t, _)| t == table).count()
    }

    /// Returns the ids of every batch landed for a table.
    pub async fn landed_batch_ids(&self, table: &str) -> Vec<BatchId> {
        let inner = self.inner.lock().await;
        inner
            .keys()
            .filter(|(t, _)| t == table)
            .map(|(_, batch_id)| BatchId::new(batch_id.clone()))
            .collect()
    }
}

impl Default for MemoryLandingStore {
    fn default() -> Self {
        Self::new()
    }
}

impl LandingStore for MemoryLandingStore {
    async fn write_batch(
        &self,
        schema: &TableSchema,
        rows: &[DeltaRow],
        table: &str,
        batch_id: &BatchId,
    ) -> IngestResult<String> {
        let mut inner = self.inner.lock().await;

        let key = (table.to_string(), batch_id.as_str().to_string());
        let entry = inner.entry(key).or_insert_with(|| LandedBatch {
            schema: schema.clone(),
            rows: Vec::new(),
        });
        entry.rows.extend(rows.iter().cloned());

        info!(table, batch_id = %batch_id, rows = rows.len(), "landed delta batch in memory");

        Ok(format!("memory://{table}/batch_id={batch_id}"))
    }
}
