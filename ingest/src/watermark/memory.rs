use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::error::IngestResult;
use crate::watermark::base::{Watermark, WatermarkStore, beginning_of_time};

/// In-memory watermark storage for testing and development purposes.
///
/// All cursors are held in memory and lost when the process terminates.
#[derive(Debug, Clone)]
pub struct MemoryWatermarkStore {
    inner: Arc<Mutex<HashMap<String, Watermark>>>,
}

impl MemoryWatermarkStore {
    /// Creates a new empty watermark store.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Returns a copy of the stored watermark record for a table.
    ///
    /// Useful for verifying cursor movement in tests.
    pub async fn watermark(&self, table: &str) -> Option<Watermark> {
        let inner = self.inner.lock().await;
        inner.get(table).cloned()
    }
}

impl Default for MemoryWatermarkStore {
    fn default() -> Self {
        Self::new()
    }
}

impl WatermarkStore for MemoryWatermarkStore {
    async fn get(&self, table: &str) -> IngestResult<DateTime<Utc>> {
        let inner = self.inner.lock().await;

        Ok(inner
            .get(table)
            .map(|watermark| watermark.last_change_ts)
            .unwrap_or_else(beginning_of_time))
    }

    async fn advance(&self, table: &str, new_ts: DateTime<Utc>) -> IngestResult<()> {
        let mut inner = self.inner.lock().await;

        inner.insert(
            table.to_string(),
            Watermark {
                table_name: table.to_string(),
                last_change_ts: new_ts,
                last_run_ts: Utc::now(),
            },
        );

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[tokio::test]
    async fn missing_table_reads_as_beginning_of_time() {
        let store = MemoryWatermarkStore::new();

        assert_eq!(store.get("voos").await.unwrap(), beginning_of_time());
    }

    #[tokio::test]
    async fn advance_replaces_the_whole_record() {
        let store = MemoryWatermarkStore::new();
        let first = Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap();
        let second = Utc.with_ymd_and_hms(2024, 3, 2, 10, 0, 0).unwrap();

        store.advance("voos", first).await.unwrap();
        let first_record = store.watermark("voos").await.unwrap();

        store.advance("voos", second).await.unwrap();
        let second_record = store.watermark("voos").await.unwrap();

        assert_eq!(store.get("voos").await.unwrap(), second);
        assert!(second_record.last_run_ts >= first_record.last_run_ts);
    }

    #[tokio::test]
    async fn tables_are_independent() {
        let store = MemoryWatermarkStore::new();
        let ts = Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap();

        store.advance("voos", ts).await.unwrap();

        assert_eq!(store.get("voos").await.unwrap(), ts);
        assert_eq!(store.get("reservas").await.unwrap(), beginning_of_time());
    }
}
