use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::Context;
use ingest::changelog::PostgresChangelogStore;
use ingest::landing::CsvLandingStore;
use ingest::merger::ChangelogMerger;
use ingest::pipeline::{Pipeline, TableOutcome};
use ingest::schema::SchemaRegistry;
use ingest::source::PostgresDeltaSource;
use ingest::watermark::PostgresWatermarkStore;
use ingest_config::shared::{IntoConnectOptions, LoaderConfig, PgConnectionConfig, TableConfig};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tracing::{error, info};

/// Maximum number of connections in each database pool.
///
/// Sized to the table parallelism ceiling so concurrent table runs never
/// starve each other waiting for a connection.
const MAX_POOL_CONNECTIONS: u32 = 8;

/// Duration after which idle connections are closed.
const IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// Creates a lazily connected pool with automatic idle connection cleanup.
///
/// Returns immediately without establishing any connections. Connections are
/// created on demand when queries are executed and closed after being idle.
fn create_database_pool(config: &PgConnectionConfig) -> PgPool {
    let options = config.with_db();

    PgPoolOptions::new()
        .min_connections(0)
        .max_connections(MAX_POOL_CONNECTIONS)
        .idle_timeout(Some(IDLE_TIMEOUT))
        .connect_lazy_with(options)
}

/// Selects the tables for this cycle, honoring an optional subset filter.
fn select_tables(
    configured: BTreeMap<String, TableConfig>,
    filter: Option<Vec<String>>,
) -> anyhow::Result<BTreeMap<String, TableConfig>> {
    let Some(filter) = filter else {
        return Ok(configured);
    };

    let mut selected = BTreeMap::new();
    for table in filter {
        let table_config = configured
            .get(&table)
            .with_context(|| format!("table `{table}` is not configured"))?;
        selected.insert(table, table_config.clone());
    }

    Ok(selected)
}

/// Wires the configured stores together and runs one load cycle.
pub async fn start_loader(
    loader_config: LoaderConfig,
    tables_filter: Option<Vec<String>>,
) -> anyhow::Result<()> {
    loader_config.validate()?;

    let tables = select_tables(loader_config.tables.clone(), tables_filter)?;

    info!(
        tables = tables.len(),
        landing = %loader_config.landing.base_path,
        "starting incremental loader"
    );

    // Pools are opened here and closed before the process exits; every
    // component receives its pool explicitly.
    let source_pool = create_database_pool(&loader_config.source);
    let target_pool = create_database_pool(&loader_config.target);

    let source = PostgresDeltaSource::new(source_pool.clone());
    let watermarks = PostgresWatermarkStore::new(
        target_pool.clone(),
        loader_config.pipeline.meta_schema.clone(),
    );
    let landing = CsvLandingStore::new(loader_config.landing.base_path.clone());
    let changelog = PostgresChangelogStore::new(target_pool.clone());
    let merger = ChangelogMerger::new(
        changelog,
        SchemaRegistry::new(),
        loader_config.pipeline.target_schema.clone(),
        loader_config.pipeline.origem_sistema.clone(),
    );

    let pipeline = Pipeline::new(
        source,
        watermarks,
        landing,
        merger,
        loader_config.pipeline.clone(),
        tables,
    );

    let report = pipeline.run().await;

    for run in &report.runs {
        match &run.result {
            Ok(TableOutcome::Merged {
                rows_extracted,
                rows_merged,
                new_watermark,
                batch_id,
            }) => {
                info!(
                    table = %run.table,
                    rows_extracted,
                    rows_merged,
                    %new_watermark,
                    batch_id = %batch_id,
                    "table completed"
                );
            }
            Ok(TableOutcome::Empty) => {
                info!(table = %run.table, rows = 0, "table had no changes");
            }
            Err(err) => {
                error!(table = %run.table, %err, "table failed");
            }
        }
    }

    source_pool.close().await;
    target_pool.close().await;

    report
        .into_result()
        .context("one or more tables failed this cycle")?;

    Ok(())
}
