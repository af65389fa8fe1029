use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::info;

use crate::changelog::base::ChangelogStore;
use crate::error::{ErrorKind, IngestResult};
use crate::ingest_error;
use crate::types::{Cell, TableName, TableRow, TableSchema};

/// One changelog table held in memory.
#[derive(Debug)]
struct StoredTable {
    schema: TableSchema,
    rows: Vec<TableRow>,
}

/// In-memory changelog storage for testing and development purposes.
///
/// [`MemoryChangelogStore`] reproduces the durable store's conditional-insert
/// semantics, including schema drift detection, so pipeline behavior can be
/// verified without a database.
#[derive(Debug, Clone)]
pub struct MemoryChangelogStore {
    inner: Arc<Mutex<HashMap<TableName, StoredTable>>>,
}

impl MemoryChangelogStore {
    /// Creates a new empty changelog store.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Returns a copy of all rows stored for a changelog table.
    pub async fn table_rows(&self, table: &TableName) -> Vec<TableRow> {
        let inner = self.inner.lock().await;
        inner
            .get(table)
            .map(|stored| stored.rows.clone())
            .unwrap_or_default()
    }

    /// Returns a copy of the stored schema for a changelog table.
    pub async fn table_schema(&self, table: &TableName) -> Option<TableSchema> {
        let inner = self.inner.lock().await;
        inner.get(table).map(|stored| stored.schema.clone())
    }
}

impl Default for MemoryChangelogStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Returns whether `row` matches `existing` on every match column.
fn matches_on(row: &TableRow, existing: &TableRow, match_columns: &[usize]) -> bool {
    match_columns.iter().all(|&index| {
        let row_cell = &row.values()[index];
        let existing_cell = &existing.values()[index];

        // SQL equality: NULL never matches, not even another NULL.
        !row_cell.is_null() && !existing_cell.is_null() && row_cell == existing_cell
    })
}

impl ChangelogStore for MemoryChangelogStore {
    async fn table_exists(&self, table: &TableName) -> IngestResult<bool> {
        let inner = self.inner.lock().await;
        Ok(inner.contains_key(table))
    }

    async fn create_table(&self, table: &TableName, schema: &TableSchema) -> IngestResult<()> {
        let mut inner = self.inner.lock().await;

        inner.entry(table.clone()).or_insert_with(|| StoredTable {
            schema: schema.clone(),
            rows: Vec::new(),
        });

        Ok(())
    }

    async fn insert_missing(
        &self,
        table: &TableName,
        schema: &TableSchema,
        match_columns: &[usize],
        rows: &[TableRow],
    ) -> IngestResult<u64> {
        let mut inner = self.inner.lock().await;

        let Some(stored) = inner.get_mut(table) else {
            return Err(ingest_error!(
                ErrorKind::InvalidState,
                "Changelog table does not exist",
                table.to_string()
            ));
        };

        let stored_columns: Vec<_> = stored
            .schema
            .columns
            .iter()
            .map(|column| column.name.clone())
            .collect();
        let incoming_columns: Vec<_> = schema
            .columns
            .iter()
            .map(|column| column.name.clone())
            .collect();
        if stored_columns != incoming_columns {
            return Err(ingest_error!(
                ErrorKind::SchemaDrift,
                "Delta shape is incompatible with the existing changelog table",
                format!(
                    "table `{table}`: stored columns {stored_columns:?}, incoming {incoming_columns:?}"
                )
            ));
        }

        let mut inserted = 0u64;
        for row in rows {
            let already_present = stored
                .rows
                .iter()
                .any(|existing| matches_on(row, existing, match_columns));

            if !already_present {
                stored.rows.push(row.clone());
                inserted += 1;
            }
        }

        info!(table = %table, inserted, skipped = rows.len() as u64 - inserted, "merged rows into memory changelog");

        Ok(inserted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ColumnSchema, ColumnType};

    fn schema() -> TableSchema {
        TableSchema::new(
            TableName::new("bronze".to_string(), "voos_changelog".to_string()),
            vec![
                ColumnSchema::new("id".to_string(), ColumnType::I64, true),
                ColumnSchema::new("data_ref".to_string(), ColumnType::Timestamp, true),
            ],
        )
    }

    fn row(id: i64, seconds: i64) -> TableRow {
        let ts = chrono::DateTime::from_timestamp(seconds, 0).unwrap().naive_utc();
        TableRow::new(vec![Cell::I64(id), Cell::Timestamp(ts)])
    }

    #[tokio::test]
    async fn insert_missing_skips_matched_rows() {
        let store = MemoryChangelogStore::new();
        let schema = schema();
        let table = schema.name.clone();

        store.create_table(&table, &schema).await.unwrap();

        let inserted = store
            .insert_missing(&table, &schema, &[0, 1], &[row(1, 10), row(2, 10)])
            .await
            .unwrap();
        assert_eq!(inserted, 2);

        // Same key and same change timestamp: matched, not inserted.
        let inserted = store
            .insert_missing(&table, &schema, &[0, 1], &[row(1, 10), row(1, 20)])
            .await
            .unwrap();
        assert_eq!(inserted, 1);

        assert_eq!(store.table_rows(&table).await.len(), 3);
    }

    #[tokio::test]
    async fn incompatible_shape_is_schema_drift() {
        let store = MemoryChangelogStore::new();
        let schema = schema();
        let table = schema.name.clone();

        store.create_table(&table, &schema).await.unwrap();

        let drifted = TableSchema::new(
            table.clone(),
            vec![ColumnSchema::new("other".to_string(), ColumnType::I64, true)],
        );
        let err = store
            .insert_missing(&table, &drifted, &[0], &[TableRow::new(vec![Cell::I64(1)])])
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::SchemaDrift);
    }
}
