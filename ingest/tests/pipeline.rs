#![cfg(feature = "test-utils")]

use std::collections::BTreeMap;

use chrono::{DateTime, TimeZone, Utc};
use ingest::changelog::{ChangelogStore, MemoryChangelogStore};
use ingest::landing::MemoryLandingStore;
use ingest::merger::ChangelogMerger;
use ingest::pipeline::{Pipeline, TableOutcome};
use ingest::schema::SchemaRegistry;
use ingest::test_utils::{FailingChangelogStore, MemoryDeltaSource};
use ingest::types::{
    BatchId, Cell, ColumnSchema, ColumnType, DeltaBatch, TableName, TableRow, TableSchema,
};
use ingest::watermark::{MemoryWatermarkStore, WatermarkStore, beginning_of_time};
use ingest_config::shared::{PipelineSettings, TableConfig};
use ingest_telemetry::tracing::init_test_tracing;

fn ts(seconds: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(seconds, 0).unwrap()
}

fn voos_source_schema() -> TableSchema {
    TableSchema::new(
        TableName::new("aviacao".to_string(), "voos".to_string()),
        vec![
            ColumnSchema::new("id".to_string(), ColumnType::Text, false),
            ColumnSchema::new("numero_voo".to_string(), ColumnType::Text, true),
            ColumnSchema::new("aud_dh_criacao".to_string(), ColumnType::TimestampTz, false),
            ColumnSchema::new("aud_dh_alteracao".to_string(), ColumnType::TimestampTz, true),
        ],
    )
}

fn voos_row(id: &str, numero: &str, created: i64, updated: Option<i64>) -> TableRow {
    TableRow::new(vec![
        Cell::String(id.to_string()),
        Cell::String(numero.to_string()),
        Cell::TimestampTz(ts(created)),
        updated.map(|seconds| Cell::TimestampTz(ts(seconds))).unwrap_or(Cell::Null),
    ])
}

fn table_configs(tables: &[&str]) -> BTreeMap<String, TableConfig> {
    tables
        .iter()
        .map(|table| {
            (
                table.to_string(),
                TableConfig {
                    source_schema: "aviacao".to_string(),
                    business_keys: vec!["id".to_string()],
                },
            )
        })
        .collect()
}

fn settings() -> PipelineSettings {
    PipelineSettings {
        origem_sistema: "postgres-aviacao".to_string(),
        meta_schema: "meta".to_string(),
        target_schema: "bronze".to_string(),
        max_parallel_tables: 4,
        extract_timeout_ms: 5_000,
        merge_timeout_ms: 5_000,
    }
}

fn create_pipeline<C>(
    source: MemoryDeltaSource,
    watermarks: MemoryWatermarkStore,
    landing: MemoryLandingStore,
    changelog: C,
    tables: &[&str],
) -> Pipeline<MemoryDeltaSource, MemoryWatermarkStore, MemoryLandingStore, C>
where
    C: ChangelogStore + Clone + Send + Sync + 'static,
{
    let merger = ChangelogMerger::new(
        changelog,
        SchemaRegistry::new(),
        "bronze".to_string(),
        "postgres-aviacao".to_string(),
    );

    Pipeline::new(
        source,
        watermarks,
        landing,
        merger,
        settings(),
        table_configs(tables),
    )
}

fn changelog_table(table: &str) -> TableName {
    TableName::new("bronze".to_string(), format!("{table}_changelog"))
}

#[tokio::test(flavor = "multi_thread")]
async fn first_run_merges_full_table_and_advances_watermark() {
    init_test_tracing();

    let source = MemoryDeltaSource::new();
    source
        .set_table(
            "voos",
            voos_source_schema(),
            vec![
                voos_row("1", "LA3000", 10, None),
                voos_row("2", "G31412", 20, Some(25)),
            ],
        )
        .await;

    let watermarks = MemoryWatermarkStore::new();
    let landing = MemoryLandingStore::new();
    let changelog = MemoryChangelogStore::new();
    let pipeline = create_pipeline(
        source,
        watermarks.clone(),
        landing.clone(),
        changelog.clone(),
        &["voos"],
    );

    let report = pipeline.run().await;
    assert!(!report.has_failures());

    let run = &report.runs[0];
    let TableOutcome::Merged {
        rows_extracted,
        rows_merged,
        new_watermark,
        ..
    } = run.result.as_ref().unwrap()
    else {
        panic!("expected a merged outcome");
    };
    assert_eq!(*rows_extracted, 2);
    assert_eq!(*rows_merged, 2);
    assert_eq!(*new_watermark, ts(25));

    assert_eq!(watermarks.get("voos").await.unwrap(), ts(25));
    assert_eq!(landing.batch_count("voos").await, 1);
    assert_eq!(changelog.table_rows(&changelog_table("voos")).await.len(), 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn empty_delta_is_a_no_op_with_watermark_unchanged() {
    init_test_tracing();

    let source = MemoryDeltaSource::new();
    source
        .set_table(
            "voos",
            voos_source_schema(),
            vec![voos_row("1", "LA3000", 10, None)],
        )
        .await;

    let watermarks = MemoryWatermarkStore::new();
    let landing = MemoryLandingStore::new();
    let changelog = MemoryChangelogStore::new();
    let pipeline = create_pipeline(
        source,
        watermarks.clone(),
        landing.clone(),
        changelog.clone(),
        &["voos"],
    );

    pipeline.run().await;
    let watermark_after_first = watermarks.get("voos").await.unwrap();

    // Nothing changed on the source: the second cycle extracts nothing.
    let report = pipeline.run().await;
    assert!(!report.has_failures());
    assert!(matches!(
        report.runs[0].result.as_ref().unwrap(),
        TableOutcome::Empty
    ));

    assert_eq!(watermarks.get("voos").await.unwrap(), watermark_after_first);
    assert_eq!(landing.batch_count("voos").await, 1);
    assert_eq!(changelog.table_rows(&changelog_table("voos")).await.len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn subsequent_runs_pick_up_inserts_and_updates() {
    init_test_tracing();

    let source = MemoryDeltaSource::new();
    source
        .set_table(
            "voos",
            voos_source_schema(),
            vec![voos_row("1", "LA3000", 10, None)],
        )
        .await;

    let watermarks = MemoryWatermarkStore::new();
    let landing = MemoryLandingStore::new();
    let changelog = MemoryChangelogStore::new();
    let pipeline = create_pipeline(
        source.clone(),
        watermarks.clone(),
        landing.clone(),
        changelog.clone(),
        &["voos"],
    );

    pipeline.run().await;

    // The existing flight is renumbered and a new one is created.
    source
        .replace_row("voos", 0, voos_row("1", "LA3001", 10, Some(30)))
        .await;
    source.push_row("voos", voos_row("2", "G31412", 35, None)).await;

    let report = pipeline.run().await;
    assert!(!report.has_failures());

    let stored = changelog.table_rows(&changelog_table("voos")).await;
    assert_eq!(stored.len(), 3);
    assert_eq!(watermarks.get("voos").await.unwrap(), ts(35));

    // The update surfaces as an update event even though the row also has a
    // fresh creation timestamp in the window.
    let change_ops: Vec<_> = stored
        .iter()
        .map(|row| row.values()[5].clone())
        .collect();
    assert_eq!(
        change_ops,
        vec![
            Cell::String("I".to_string()),
            Cell::String("U".to_string()),
            Cell::String("I".to_string()),
        ]
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn row_updated_twice_between_runs_is_not_lost() {
    init_test_tracing();

    let source = MemoryDeltaSource::new();
    source
        .set_table(
            "voos",
            voos_source_schema(),
            vec![voos_row("1", "LA3000", 10, None)],
        )
        .await;

    let watermarks = MemoryWatermarkStore::new();
    let landing = MemoryLandingStore::new();
    let changelog = MemoryChangelogStore::new();
    let pipeline = create_pipeline(
        source.clone(),
        watermarks.clone(),
        landing,
        changelog.clone(),
        &["voos"],
    );

    pipeline.run().await;

    // Two updates land between cycles; the source keeps only the latest
    // alteration timestamp.
    source
        .replace_row("voos", 0, voos_row("1", "LA3001", 10, Some(20)))
        .await;
    source
        .replace_row("voos", 0, voos_row("1", "LA3002", 10, Some(40)))
        .await;

    let report = pipeline.run().await;
    assert!(!report.has_failures());

    let stored = changelog.table_rows(&changelog_table("voos")).await;
    assert_eq!(stored.len(), 2);
    assert_eq!(stored[1].values()[1], Cell::String("LA3002".to_string()));
    assert_eq!(watermarks.get("voos").await.unwrap(), ts(40));
}

#[tokio::test(flavor = "multi_thread")]
async fn rows_merge_in_timestamp_then_key_order() {
    init_test_tracing();

    let source = MemoryDeltaSource::new();
    source
        .set_table(
            "voos",
            voos_source_schema(),
            vec![
                voos_row("B", "LA3000", 10, None),
                voos_row("A", "G31412", 10, None),
                voos_row("C", "AD4056", 12, None),
            ],
        )
        .await;

    let watermarks = MemoryWatermarkStore::new();
    let landing = MemoryLandingStore::new();
    let changelog = MemoryChangelogStore::new();
    let pipeline = create_pipeline(source, watermarks, landing, changelog.clone(), &["voos"]);

    pipeline.run().await;

    // Insertion order in the changelog captures merge order: timestamp
    // primary, business key secondary.
    let stored = changelog.table_rows(&changelog_table("voos")).await;
    let merge_order: Vec<_> = stored
        .iter()
        .map(|row| {
            let Cell::String(id) = &row.values()[0] else {
                panic!("expected a text id");
            };
            let Cell::TimestampTz(data_ref) = &row.values()[4] else {
                panic!("expected a timestamptz data_ref");
            };
            (data_ref.timestamp(), id.clone())
        })
        .collect();

    assert_eq!(
        merge_order,
        vec![
            (10, "A".to_string()),
            (10, "B".to_string()),
            (12, "C".to_string()),
        ]
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn merge_failure_leaves_watermark_for_a_safe_re_run() {
    init_test_tracing();

    let source = MemoryDeltaSource::new();
    source
        .set_table(
            "voos",
            voos_source_schema(),
            vec![
                voos_row("1", "LA3000", 10, None),
                voos_row("2", "G31412", 20, Some(25)),
            ],
        )
        .await;

    let watermarks = MemoryWatermarkStore::new();
    let landing = MemoryLandingStore::new();
    let inner_changelog = MemoryChangelogStore::new();
    let changelog = FailingChangelogStore::wrap(inner_changelog.clone(), 1);
    let pipeline = create_pipeline(
        source,
        watermarks.clone(),
        landing.clone(),
        changelog,
        &["voos"],
    );

    // First cycle: the batch lands, the merge fails, the watermark must not
    // move.
    let report = pipeline.run().await;
    assert!(report.has_failures());
    assert_eq!(watermarks.get("voos").await.unwrap(), beginning_of_time());
    assert_eq!(landing.batch_count("voos").await, 1);
    assert!(
        inner_changelog
            .table_rows(&changelog_table("voos"))
            .await
            .is_empty()
    );

    // Second cycle re-extracts from the unchanged watermark, lands a fresh
    // batch, and the insert-only merge reconciles it.
    let report = pipeline.run().await;
    assert!(!report.has_failures());

    let stored = inner_changelog.table_rows(&changelog_table("voos")).await;
    assert_eq!(stored.len(), 2);
    assert_eq!(watermarks.get("voos").await.unwrap(), ts(25));
    assert_eq!(landing.batch_count("voos").await, 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn landed_batch_can_be_re_merged_without_re_extraction() {
    init_test_tracing();

    let source = MemoryDeltaSource::new();
    source
        .set_table(
            "voos",
            voos_source_schema(),
            vec![
                voos_row("1", "LA3000", 10, None),
                voos_row("2", "G31412", 20, Some(25)),
            ],
        )
        .await;

    let watermarks = MemoryWatermarkStore::new();
    let landing = MemoryLandingStore::new();
    let inner_changelog = MemoryChangelogStore::new();
    let changelog = FailingChangelogStore::wrap(inner_changelog.clone(), 1);
    let pipeline = create_pipeline(
        source,
        watermarks.clone(),
        landing.clone(),
        changelog.clone(),
        &["voos"],
    );

    let report = pipeline.run().await;
    assert!(report.has_failures());

    // Recover the landed batch and re-merge it directly, without touching the
    // source again. The failure budget is spent, so the merge goes through.
    let landed = landing
        .landed_batch("voos", &find_landed_batch_id(&landing, "voos").await)
        .await
        .unwrap();
    let batch = DeltaBatch {
        table: "voos".to_string(),
        schema: landed.schema.clone(),
        rows: landed.rows.clone(),
    };

    let merger = ChangelogMerger::new(
        changelog,
        SchemaRegistry::new(),
        "bronze".to_string(),
        "postgres-aviacao".to_string(),
    );
    let batch_id = BatchId::new("recovered-b1");

    let merged = merger
        .merge(&batch, &["id".to_string()], &batch_id)
        .await
        .unwrap();
    assert_eq!(merged, 2);

    // Re-merging the same landed batch inserts nothing more.
    let re_merged = merger
        .merge(&batch, &["id".to_string()], &batch_id)
        .await
        .unwrap();
    assert_eq!(re_merged, 0);
    assert_eq!(
        inner_changelog
            .table_rows(&changelog_table("voos"))
            .await
            .len(),
        2
    );

    // The watermark advances exactly once, to the batch's greatest data_ref.
    watermarks
        .advance("voos", batch.max_data_ref().unwrap())
        .await
        .unwrap();
    assert_eq!(watermarks.get("voos").await.unwrap(), ts(25));
}

#[tokio::test(flavor = "multi_thread")]
async fn one_table_failure_does_not_block_other_tables() {
    init_test_tracing();

    let source = MemoryDeltaSource::new();
    source
        .set_table(
            "voos",
            voos_source_schema(),
            vec![voos_row("1", "LA3000", 10, None)],
        )
        .await;
    source
        .set_table(
            "reservas",
            voos_source_schema(),
            vec![voos_row("9", "R-0001", 15, None)],
        )
        .await;

    let watermarks = MemoryWatermarkStore::new();
    let landing = MemoryLandingStore::new();
    let inner_changelog = MemoryChangelogStore::new();
    let changelog =
        FailingChangelogStore::wrap(inner_changelog.clone(), usize::MAX).only_for_table("voos");
    let pipeline = create_pipeline(
        source,
        watermarks.clone(),
        landing,
        changelog,
        &["reservas", "voos"],
    );

    let report = pipeline.run().await;
    assert!(report.has_failures());

    let outcomes: BTreeMap<_, _> = report
        .runs
        .iter()
        .map(|run| (run.table.as_str(), run.result.is_ok()))
        .collect();
    assert!(outcomes["reservas"]);
    assert!(!outcomes["voos"]);

    // The healthy table merged and advanced; the failed one is untouched.
    assert_eq!(
        inner_changelog
            .table_rows(&changelog_table("reservas"))
            .await
            .len(),
        1
    );
    assert_eq!(watermarks.get("reservas").await.unwrap(), ts(15));
    assert_eq!(watermarks.get("voos").await.unwrap(), beginning_of_time());
}

/// Returns the single batch id landed for a table.
async fn find_landed_batch_id(landing: &MemoryLandingStore, table: &str) -> BatchId {
    let batch_ids = landing.landed_batch_ids(table).await;
    assert_eq!(batch_ids.len(), 1);
    batch_ids.into_iter().next().unwrap()
}
