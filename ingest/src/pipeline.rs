//! Per-table sequencing of the incremental load.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use ingest_config::shared::{PipelineSettings, TableConfig};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing::{error, info};

use crate::changelog::ChangelogStore;
use crate::error::{ErrorKind, IngestError, IngestResult};
use crate::ingest_error;
use crate::landing::LandingStore;
use crate::merger::ChangelogMerger;
use crate::source::DeltaSource;
use crate::types::{BatchId, DeltaBatch};
use crate::watermark::WatermarkStore;

/// Outcome of one table's run.
#[derive(Debug)]
pub enum TableOutcome {
    /// Rows were extracted, landed, merged, and the watermark advanced.
    Merged {
        rows_extracted: usize,
        rows_merged: u64,
        new_watermark: DateTime<Utc>,
        batch_id: BatchId,
    },
    /// The delta was empty. Nothing landed and the watermark is unchanged.
    Empty,
}

/// One table's run and its result.
#[derive(Debug)]
pub struct TableRun {
    pub table: String,
    pub result: IngestResult<TableOutcome>,
}

/// Per-table results of one pipeline run.
///
/// Tables are independent units of work: one table's failure never aborts the
/// others, so the report carries every outcome instead of short-circuiting.
#[derive(Debug)]
pub struct PipelineReport {
    pub runs: Vec<TableRun>,
}

impl PipelineReport {
    /// Returns whether any table failed.
    pub fn has_failures(&self) -> bool {
        self.runs.iter().any(|run| run.result.is_err())
    }

    /// Collapses the report into a result, aggregating per-table errors.
    pub fn into_result(self) -> IngestResult<()> {
        let errors: Vec<IngestError> = self
            .runs
            .into_iter()
            .filter_map(|run| run.result.err())
            .collect();

        if errors.is_empty() {
            return Ok(());
        }

        Err(errors.into())
    }
}

/// Coordinates the incremental load across all configured tables.
///
/// Per table the stages are strictly ordered: read watermark, extract, land,
/// merge, advance watermark. The watermark only moves after a fully
/// successful merge, and it moves to the greatest `data_ref` of the merged
/// delta rather than to "now". Tables run in parallel with each other,
/// bounded by `max_parallel_tables`.
#[derive(Debug)]
pub struct Pipeline<S, W, L, C> {
    source: S,
    watermarks: W,
    landing: L,
    merger: ChangelogMerger<C>,
    settings: Arc<PipelineSettings>,
    tables: Arc<BTreeMap<String, TableConfig>>,
}

impl<S, W, L, C> Pipeline<S, W, L, C>
where
    S: DeltaSource + Clone + Send + Sync + 'static,
    W: WatermarkStore + Clone + Send + Sync + 'static,
    L: LandingStore + Clone + Send + Sync + 'static,
    C: ChangelogStore + Clone + Send + Sync + 'static,
{
    pub fn new(
        source: S,
        watermarks: W,
        landing: L,
        merger: ChangelogMerger<C>,
        settings: PipelineSettings,
        tables: BTreeMap<String, TableConfig>,
    ) -> Self {
        Self {
            source,
            watermarks,
            landing,
            merger,
            settings: Arc::new(settings),
            tables: Arc::new(tables),
        }
    }

    /// Runs one load cycle over every configured table.
    pub async fn run(&self) -> PipelineReport {
        info!(tables = self.tables.len(), "starting incremental load cycle");

        // The permits semaphore controls how many table runs can be in flight
        // at the same time.
        let permits = Arc::new(Semaphore::new(self.settings.max_parallel_tables));

        let mut join_set = JoinSet::new();
        for (table, table_config) in self.tables.iter() {
            let permits = permits.clone();
            let source = self.source.clone();
            let watermarks = self.watermarks.clone();
            let landing = self.landing.clone();
            let merger = self.merger.clone();
            let settings = self.settings.clone();
            let table = table.clone();
            let table_config = table_config.clone();

            join_set.spawn(async move {
                let _permit = permits
                    .acquire_owned()
                    .await
                    .expect("the permits semaphore is never closed");

                let result = run_table(
                    &source,
                    &watermarks,
                    &landing,
                    &merger,
                    &settings,
                    &table,
                    &table_config,
                )
                .await;

                if let Err(err) = &result {
                    error!(table = %table, %err, "table run failed, skipping until next cycle");
                }

                TableRun { table, result }
            });
        }

        let mut runs = Vec::with_capacity(self.tables.len());
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(run) => runs.push(run),
                Err(join_err) => runs.push(TableRun {
                    table: "<unknown>".to_string(),
                    result: Err(ingest_error!(
                        ErrorKind::InvalidState,
                        "Table run task aborted",
                        join_err.to_string()
                    )),
                }),
            }
        }

        // Report in configuration order rather than completion order.
        runs.sort_by(|a, b| a.table.cmp(&b.table));

        PipelineReport { runs }
    }
}

/// Runs the strictly ordered stages of one table.
async fn run_table<S, W, L, C>(
    source: &S,
    watermarks: &W,
    landing: &L,
    merger: &ChangelogMerger<C>,
    settings: &PipelineSettings,
    table: &str,
    table_config: &TableConfig,
) -> IngestResult<TableOutcome>
where
    S: DeltaSource + Send + Sync,
    W: WatermarkStore + Send + Sync,
    L: LandingStore + Send + Sync,
    C: ChangelogStore + Send + Sync,
{
    let last_watermark = watermarks.get(table).await?;
    info!(table, %last_watermark, "starting table run");

    let extract_timeout = Duration::from_millis(settings.extract_timeout_ms);
    let batch: DeltaBatch = timeout(
        extract_timeout,
        source.fetch_delta(table, table_config, last_watermark),
    )
    .await??;

    if batch.is_empty() {
        info!(table, rows = 0, "empty delta, watermark unchanged");
        return Ok(TableOutcome::Empty);
    }

    // Landing must durably complete before the merge: the landed batch is the
    // replayable record in case the merge fails mid-way.
    let batch_id = BatchId::generate();
    landing
        .write_batch(&batch.schema, &batch.rows, table, &batch_id)
        .await?;

    let merge_timeout = Duration::from_millis(settings.merge_timeout_ms);
    let rows_merged = timeout(
        merge_timeout,
        merger.merge(&batch, &table_config.business_keys, &batch_id),
    )
    .await??;

    let new_watermark = batch.max_data_ref().ok_or_else(|| {
        ingest_error!(
            ErrorKind::InvalidState,
            "Non-empty delta has no change timestamps",
            table.to_string()
        )
    })?;
    watermarks.advance(table, new_watermark).await?;

    info!(
        table,
        rows_extracted = batch.len(),
        rows_merged,
        %new_watermark,
        batch_id = %batch_id,
        "table run complete"
    );

    Ok(TableOutcome::Merged {
        rows_extracted: batch.len(),
        rows_merged,
        new_watermark,
        batch_id,
    })
}
