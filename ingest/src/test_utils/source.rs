use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use ingest_config::shared::TableConfig;
use tokio::sync::Mutex;

use crate::error::{ErrorKind, IngestResult};
use crate::ingest_error;
use crate::source::DeltaSource;
use crate::source::query::{
    CHANGE_OP_COLUMN, CREATED_AT_COLUMN, DATA_REF_COLUMN, UPDATED_AT_COLUMN,
};
use crate::types::{
    Cell, ChangeOp, ColumnSchema, ColumnType, DeltaBatch, DeltaRow, TableName, TableRow,
    TableSchema,
};

/// One source table held in memory.
#[derive(Debug, Clone)]
struct SourceTable {
    schema: TableSchema,
    rows: Vec<TableRow>,
}

/// In-memory delta source reproducing the SQL selection semantics.
///
/// Source tables carry the two audit columns like their database
/// counterparts. Fetching a delta applies the same predicate, projection,
/// classification and `(data_ref, business key)` ordering the real query
/// produces, so pipeline tests exercise the exact selection behavior.
#[derive(Debug, Clone)]
pub struct MemoryDeltaSource {
    inner: Arc<Mutex<HashMap<String, SourceTable>>>,
}

impl MemoryDeltaSource {
    /// Creates a new source with no tables.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Replaces the contents of a source table.
    ///
    /// The schema must include the `aud_dh_criacao` and `aud_dh_alteracao`
    /// audit columns.
    pub async fn set_table(&self, table: &str, schema: TableSchema, rows: Vec<TableRow>) {
        let mut inner = self.inner.lock().await;
        inner.insert(table.to_string(), SourceTable { schema, rows });
    }

    /// Appends one row to a source table.
    pub async fn push_row(&self, table: &str, row: TableRow) {
        let mut inner = self.inner.lock().await;
        if let Some(source_table) = inner.get_mut(table) {
            source_table.rows.push(row);
        }
    }

    /// Replaces the row at `index` of a source table, simulating an in-place
    /// update on the source system.
    pub async fn replace_row(&self, table: &str, index: usize, row: TableRow) {
        let mut inner = self.inner.lock().await;
        if let Some(source_table) = inner.get_mut(table) {
            source_table.rows[index] = row;
        }
    }
}

impl Default for MemoryDeltaSource {
    fn default() -> Self {
        Self::new()
    }
}

/// Reads a timestamp cell as UTC, treating naive values as UTC wall time.
fn cell_timestamp(cell: &Cell) -> Option<DateTime<Utc>> {
    match cell {
        Cell::Timestamp(naive) => Some(Utc.from_utc_datetime(naive)),
        Cell::TimestampTz(ts) => Some(*ts),
        _ => None,
    }
}

/// Total order over the cell types used as business keys in tests.
fn compare_cells(a: &Cell, b: &Cell) -> Ordering {
    match (a, b) {
        (Cell::I16(x), Cell::I16(y)) => x.cmp(y),
        (Cell::I32(x), Cell::I32(y)) => x.cmp(y),
        (Cell::I64(x), Cell::I64(y)) => x.cmp(y),
        (Cell::String(x), Cell::String(y)) => x.cmp(y),
        (Cell::Uuid(x), Cell::Uuid(y)) => x.cmp(y),
        _ => Ordering::Equal,
    }
}

impl DeltaSource for MemoryDeltaSource {
    async fn fetch_delta(
        &self,
        table: &str,
        table_config: &TableConfig,
        since: DateTime<Utc>,
    ) -> IngestResult<DeltaBatch> {
        let inner = self.inner.lock().await;

        let Some(source_table) = inner.get(table) else {
            return Err(ingest_error!(
                ErrorKind::SourceSchemaError,
                "Source table does not exist",
                table.to_string()
            ));
        };

        let created_index = source_table
            .schema
            .resolve_columns(&[CREATED_AT_COLUMN.to_string()])?[0];
        let updated_index = source_table
            .schema
            .resolve_columns(&[UPDATED_AT_COLUMN.to_string()])?[0];
        let key_indexes = source_table
            .schema
            .resolve_columns(&table_config.business_keys)?;

        // Project: every source column plus the derived data_ref and change_op.
        let table_name = TableName::new(table_config.source_schema.clone(), table.to_string());
        let mut columns = source_table.schema.columns.clone();
        columns.push(ColumnSchema::new(
            DATA_REF_COLUMN.to_string(),
            ColumnType::TimestampTz,
            false,
        ));
        columns.push(ColumnSchema::new(
            CHANGE_OP_COLUMN.to_string(),
            ColumnType::Text,
            false,
        ));
        let schema = TableSchema::new(table_name, columns);

        let mut rows = Vec::new();
        for source_row in &source_table.rows {
            let created = cell_timestamp(&source_row.values()[created_index]);
            let updated = cell_timestamp(&source_row.values()[updated_index]);

            let Some(data_ref) = updated.or(created) else {
                continue;
            };
            if data_ref <= since {
                continue;
            }

            let change_op = if updated.is_none() {
                ChangeOp::Insert
            } else {
                ChangeOp::Update
            };

            let mut values = source_row.values().to_vec();
            values.push(Cell::TimestampTz(data_ref));
            values.push(Cell::String(change_op.as_str().to_string()));

            rows.push(DeltaRow {
                row: TableRow::new(values),
                data_ref,
                change_op,
            });
        }

        rows.sort_by(|a, b| {
            a.data_ref.cmp(&b.data_ref).then_with(|| {
                for &index in &key_indexes {
                    let ordering = compare_cells(&a.row.values()[index], &b.row.values()[index]);
                    if ordering != Ordering::Equal {
                        return ordering;
                    }
                }

                Ordering::Equal
            })
        });

        Ok(DeltaBatch {
            table: table.to_string(),
            schema,
            rows,
        })
    }
}
