//! Insert-only merge of delta batches into changelog tables.

use chrono::Utc;
use tracing::{debug, info};

use crate::changelog::ChangelogStore;
use crate::error::{ErrorKind, IngestResult};
use crate::ingest_error;
use crate::schema::SchemaRegistry;
use crate::source::query::DATA_REF_COLUMN;
use crate::types::{
    BatchId, Cell, ColumnSchema, ColumnType, DeltaBatch, TableName, TableRow, TableSchema,
};

/// Audit column carrying the merge wall-clock timestamp.
pub const LOAD_TS_COLUMN: &str = "load_ts";

/// Audit column carrying the batch id of the run that inserted the row.
pub const BATCH_ID_COLUMN: &str = "batch_id";

/// Audit column carrying the provenance tag of the extraction source.
pub const ORIGEM_SISTEMA_COLUMN: &str = "origem_sistema";

/// Suffix appended to the source table name to form the changelog table name.
const CHANGELOG_SUFFIX: &str = "_changelog";

/// Merges delta batches into append-only changelog tables.
///
/// The merge matches on the business key columns and `data_ref` jointly: rows
/// that match an existing changelog record are left untouched, rows with no
/// match are inserted. There is no update or delete branch, which is what
/// makes replaying an already-merged batch safe - every row matches and
/// nothing is inserted.
#[derive(Debug, Clone)]
pub struct ChangelogMerger<C> {
    store: C,
    registry: SchemaRegistry,
    target_schema: String,
    origem_sistema: String,
}

impl<C> ChangelogMerger<C>
where
    C: ChangelogStore + Send + Sync,
{
    pub fn new(
        store: C,
        registry: SchemaRegistry,
        target_schema: String,
        origem_sistema: String,
    ) -> Self {
        Self {
            store,
            registry,
            target_schema,
            origem_sistema,
        }
    }

    /// Returns the changelog table name for a logical source table.
    pub fn changelog_table_name(&self, table: &str) -> TableName {
        TableName::new(
            self.target_schema.clone(),
            format!("{table}{CHANGELOG_SUFFIX}"),
        )
    }

    /// Merges one delta batch, returning the number of inserted rows.
    ///
    /// Empty batches are an explicit no-op. The changelog table is created
    /// lazily, with zero rows, from the first batch's shape.
    pub async fn merge(
        &self,
        batch: &DeltaBatch,
        business_keys: &[String],
        batch_id: &BatchId,
    ) -> IngestResult<u64> {
        if batch.is_empty() {
            debug!(table = %batch.table, "empty delta, skipping merge");
            return Ok(0);
        }

        let changelog_table = self.changelog_table_name(&batch.table);
        let enriched_schema = enrich_schema(changelog_table.clone(), &batch.schema);

        self.ensure_table(&changelog_table, &enriched_schema).await?;

        let mut match_columns = enriched_schema.resolve_columns(business_keys)?;
        match_columns.push(enriched_schema.resolve_columns(&[DATA_REF_COLUMN.to_string()])?[0]);

        let load_ts = Utc::now();
        let mut rows = Vec::with_capacity(batch.len());
        for delta_row in &batch.rows {
            let mut values = delta_row.row.values().to_vec();
            values.push(Cell::TimestampTz(load_ts));
            values.push(Cell::String(batch_id.as_str().to_string()));
            values.push(Cell::String(self.origem_sistema.clone()));
            rows.push(TableRow::new(values));
        }

        // Two rows with the same key and the same change timestamp collapse to
        // the first one in batch order, mirroring the match the store applies
        // against existing records.
        let deduped = dedupe_rows(rows, &match_columns);
        let collapsed = batch.len() - deduped.len();

        let inserted = self
            .store
            .insert_missing(&changelog_table, &enriched_schema, &match_columns, &deduped)
            .await?;

        info!(
            table = %batch.table,
            batch_id = %batch_id,
            inserted,
            collapsed,
            matched = deduped.len() as u64 - inserted,
            "merged delta batch into changelog"
        );

        Ok(inserted)
    }

    /// Makes sure the changelog table exists and its schema is registered.
    ///
    /// The registry is consulted first; the store is only asked when the
    /// table was never seen by this process. A registered schema that no
    /// longer matches the incoming shape is surfaced as drift instead of
    /// silently altering changelog history.
    async fn ensure_table(
        &self,
        changelog_table: &TableName,
        enriched_schema: &TableSchema,
    ) -> IngestResult<()> {
        if let Some(registered) = self.registry.get(changelog_table).await {
            if registered.columns != enriched_schema.columns {
                return Err(ingest_error!(
                    ErrorKind::SchemaDrift,
                    "Delta shape is incompatible with the existing changelog table",
                    format!(
                        "table `{changelog_table}`: registered {:?}, incoming {:?}",
                        registered.columns, enriched_schema.columns
                    )
                ));
            }

            return Ok(());
        }

        if !self.store.table_exists(changelog_table).await? {
            self.store
                .create_table(changelog_table, enriched_schema)
                .await?;
        }
        self.registry.register(enriched_schema.clone()).await;

        Ok(())
    }
}

/// Extends the delta schema with the three audit columns.
fn enrich_schema(changelog_table: TableName, delta_schema: &TableSchema) -> TableSchema {
    let mut columns = delta_schema.columns.clone();
    columns.push(ColumnSchema::new(
        LOAD_TS_COLUMN.to_string(),
        ColumnType::TimestampTz,
        false,
    ));
    columns.push(ColumnSchema::new(
        BATCH_ID_COLUMN.to_string(),
        ColumnType::Text,
        false,
    ));
    columns.push(ColumnSchema::new(
        ORIGEM_SISTEMA_COLUMN.to_string(),
        ColumnType::Text,
        false,
    ));

    TableSchema::new(changelog_table, columns)
}

/// Drops rows that duplicate an earlier row of the same batch on the match
/// columns, preserving first-occurrence order.
fn dedupe_rows(rows: Vec<TableRow>, match_columns: &[usize]) -> Vec<TableRow> {
    let mut deduped: Vec<TableRow> = Vec::with_capacity(rows.len());

    for row in rows {
        let duplicate = deduped.iter().any(|kept| {
            match_columns.iter().all(|&index| {
                let kept_cell = &kept.values()[index];
                let row_cell = &row.values()[index];

                !kept_cell.is_null() && !row_cell.is_null() && kept_cell == row_cell
            })
        });

        if !duplicate {
            deduped.push(row);
        }
    }

    deduped
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};

    use crate::changelog::MemoryChangelogStore;
    use crate::types::{ChangeOp, DeltaRow};

    fn ts(seconds: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(seconds, 0).unwrap()
    }

    fn delta_schema() -> TableSchema {
        TableSchema::new(
            TableName::new("aviacao".to_string(), "voos".to_string()),
            vec![
                ColumnSchema::new("id".to_string(), ColumnType::I64, true),
                ColumnSchema::new("numero_voo".to_string(), ColumnType::Text, true),
                ColumnSchema::new("data_ref".to_string(), ColumnType::TimestampTz, true),
                ColumnSchema::new("change_op".to_string(), ColumnType::Text, true),
            ],
        )
    }

    fn delta_row(id: i64, numero: &str, seconds: i64, op: ChangeOp) -> DeltaRow {
        DeltaRow {
            row: TableRow::new(vec![
                Cell::I64(id),
                Cell::String(numero.to_string()),
                Cell::TimestampTz(ts(seconds)),
                Cell::String(op.as_str().to_string()),
            ]),
            data_ref: ts(seconds),
            change_op: op,
        }
    }

    fn batch(rows: Vec<DeltaRow>) -> DeltaBatch {
        DeltaBatch {
            table: "voos".to_string(),
            schema: delta_schema(),
            rows,
        }
    }

    fn merger(store: MemoryChangelogStore) -> ChangelogMerger<MemoryChangelogStore> {
        ChangelogMerger::new(
            store,
            SchemaRegistry::new(),
            "bronze".to_string(),
            "postgres-aviacao".to_string(),
        )
    }

    #[tokio::test]
    async fn empty_batch_is_a_no_op() {
        let store = MemoryChangelogStore::new();
        let merger = merger(store.clone());

        let inserted = merger
            .merge(&batch(vec![]), &["id".to_string()], &BatchId::new("b1"))
            .await
            .unwrap();

        assert_eq!(inserted, 0);
        assert!(
            !store
                .table_exists(&merger.changelog_table_name("voos"))
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn first_merge_creates_the_table_with_audit_columns() {
        let store = MemoryChangelogStore::new();
        let merger = merger(store.clone());

        let inserted = merger
            .merge(
                &batch(vec![delta_row(1, "LA3000", 10, ChangeOp::Insert)]),
                &["id".to_string()],
                &BatchId::new("b1"),
            )
            .await
            .unwrap();
        assert_eq!(inserted, 1);

        let schema = store
            .table_schema(&merger.changelog_table_name("voos"))
            .await
            .unwrap();
        let column_names: Vec<_> = schema
            .columns
            .iter()
            .map(|column| column.name.as_str())
            .collect();
        assert_eq!(
            column_names,
            vec![
                "id",
                "numero_voo",
                "data_ref",
                "change_op",
                "load_ts",
                "batch_id",
                "origem_sistema"
            ]
        );
    }

    #[tokio::test]
    async fn replaying_a_merged_batch_inserts_nothing() {
        let store = MemoryChangelogStore::new();
        let merger = merger(store.clone());
        let rows = vec![
            delta_row(1, "LA3000", 10, ChangeOp::Insert),
            delta_row(2, "G31412", 20, ChangeOp::Update),
        ];

        let first = merger
            .merge(&batch(rows.clone()), &["id".to_string()], &BatchId::new("b1"))
            .await
            .unwrap();
        assert_eq!(first, 2);

        let replay = merger
            .merge(&batch(rows), &["id".to_string()], &BatchId::new("b2"))
            .await
            .unwrap();
        assert_eq!(replay, 0);

        let stored = store
            .table_rows(&merger.changelog_table_name("voos"))
            .await;
        assert_eq!(stored.len(), 2);
    }

    #[tokio::test]
    async fn same_timestamp_update_collision_is_dropped() {
        // Two distinct updates of the same entity can coalesce to the same
        // change timestamp when the source batches its writes. The merge
        // matches on business key + data_ref only, so the second update is
        // treated as already merged and silently dropped. Faithful to the
        // source system; a fix would need a strictly monotonic change
        // sequence upstream.
        let store = MemoryChangelogStore::new();
        let merger = merger(store.clone());

        let inserted = merger
            .merge(
                &batch(vec![
                    delta_row(7, "first-update", 50, ChangeOp::Update),
                    delta_row(7, "second-update", 50, ChangeOp::Update),
                ]),
                &["id".to_string()],
                &BatchId::new("b1"),
            )
            .await
            .unwrap();
        assert_eq!(inserted, 1);

        let stored = store
            .table_rows(&merger.changelog_table_name("voos"))
            .await;
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].values()[1], Cell::String("first-update".to_string()));
    }

    #[tokio::test]
    async fn same_key_distinct_timestamps_are_distinct_events() {
        let store = MemoryChangelogStore::new();
        let merger = merger(store.clone());

        let inserted = merger
            .merge(
                &batch(vec![
                    delta_row(7, "created", 50, ChangeOp::Insert),
                    delta_row(7, "updated", 60, ChangeOp::Update),
                ]),
                &["id".to_string()],
                &BatchId::new("b1"),
            )
            .await
            .unwrap();

        assert_eq!(inserted, 2);
    }

    #[tokio::test]
    async fn changed_shape_is_surfaced_as_schema_drift() {
        let store = MemoryChangelogStore::new();
        let merger = merger(store.clone());

        merger
            .merge(
                &batch(vec![delta_row(1, "LA3000", 10, ChangeOp::Insert)]),
                &["id".to_string()],
                &BatchId::new("b1"),
            )
            .await
            .unwrap();

        let mut drifted_schema = delta_schema();
        drifted_schema.columns.push(ColumnSchema::new(
            "rota".to_string(),
            ColumnType::Text,
            true,
        ));
        let mut drifted_row = delta_row(2, "AD4056", 20, ChangeOp::Insert);
        drifted_row
            .row
            .values_mut()
            .push(Cell::String("GRU-SSA".to_string()));

        let err = merger
            .merge(
                &DeltaBatch {
                    table: "voos".to_string(),
                    schema: drifted_schema,
                    rows: vec![drifted_row],
                },
                &["id".to_string()],
                &BatchId::new("b2"),
            )
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::SchemaDrift);
    }
}
