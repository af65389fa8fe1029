use chrono::{DateTime, Utc};
use pg_escape::quote_identifier;
use sqlx::{PgPool, Row};
use tracing::debug;

use crate::error::{ErrorKind, IngestResult};
use crate::ingest_error;
use crate::watermark::base::{WatermarkStore, beginning_of_time};

/// Name of the watermark table inside the meta schema.
const WATERMARK_TABLE: &str = "watermark_incremental";

/// SQLSTATE for "relation does not exist".
const UNDEFINED_TABLE: &str = "42P01";

/// SQLSTATE for "schema does not exist".
const UNDEFINED_SCHEMA: &str = "3F000";

/// Postgres-backed watermark storage.
///
/// Cursors live in `<meta_schema>.watermark_incremental`, one row per table,
/// created lazily on first advance. Rows are replaced whole through an upsert,
/// so a failed advance leaves the previous cursor intact and advances for
/// different tables never interfere (per-row atomicity).
#[derive(Debug, Clone)]
pub struct PostgresWatermarkStore {
    pool: PgPool,
    meta_schema: String,
}

impl PostgresWatermarkStore {
    /// Creates a new store over an injected target-database pool.
    pub fn new(pool: PgPool, meta_schema: String) -> Self {
        Self { pool, meta_schema }
    }

    fn qualified_table(&self) -> String {
        format!(
            "{}.{}",
            quote_identifier(&self.meta_schema),
            quote_identifier(WATERMARK_TABLE)
        )
    }
}

/// Returns whether the error means the watermark table (or its schema) does
/// not exist yet, which reads as "no prior state" rather than a failure.
fn is_missing_relation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db_err)
            if matches!(db_err.code().as_deref(), Some(UNDEFINED_TABLE) | Some(UNDEFINED_SCHEMA))
    )
}

impl WatermarkStore for PostgresWatermarkStore {
    async fn get(&self, table: &str) -> IngestResult<DateTime<Utc>> {
        let query = format!(
            "select last_change_ts from {} where table_name = $1",
            self.qualified_table()
        );

        let row = match sqlx::query(&query)
            .bind(table)
            .fetch_optional(&self.pool)
            .await
        {
            Ok(row) => row,
            Err(err) if is_missing_relation(&err) => {
                debug!(table, "watermark table absent, using beginning of time");
                return Ok(beginning_of_time());
            }
            Err(err) => {
                return Err(ingest_error!(
                    ErrorKind::TargetQueryFailed,
                    "Failed to read watermark",
                    err.to_string(),
                    source: err
                ));
            }
        };

        match row {
            Some(row) => {
                let last_change_ts: DateTime<Utc> = row.try_get("last_change_ts").map_err(|err| {
                    ingest_error!(
                        ErrorKind::ConversionError,
                        "Failed to decode watermark timestamp",
                        err.to_string(),
                        source: err
                    )
                })?;

                Ok(last_change_ts)
            }
            None => {
                debug!(table, "no watermark row, using beginning of time");
                Ok(beginning_of_time())
            }
        }
    }

    async fn advance(&self, table: &str, new_ts: DateTime<Utc>) -> IngestResult<()> {
        let mut tx = self.pool.begin().await.map_err(|err| {
            ingest_error!(
                ErrorKind::TargetConnectionFailed,
                "Failed to open watermark transaction",
                err.to_string(),
                source: err
            )
        })?;

        let create_schema = format!(
            "create schema if not exists {}",
            quote_identifier(&self.meta_schema)
        );
        let create_table = format!(
            r#"
            create table if not exists {} (
                table_name text primary key,
                last_change_ts timestamptz not null,
                last_run_ts timestamptz not null
            )
            "#,
            self.qualified_table()
        );
        let upsert = format!(
            r#"
            insert into {} (table_name, last_change_ts, last_run_ts)
            values ($1, $2, $3)
            on conflict (table_name)
            do update set last_change_ts = excluded.last_change_ts,
                          last_run_ts = excluded.last_run_ts
            "#,
            self.qualified_table()
        );

        let advance = async {
            sqlx::query(&create_schema).execute(&mut *tx).await?;
            sqlx::query(&create_table).execute(&mut *tx).await?;
            sqlx::query(&upsert)
                .bind(table)
                .bind(new_ts)
                .bind(Utc::now())
                .execute(&mut *tx)
                .await?;

            tx.commit().await
        };

        advance.await.map_err(|err| {
            ingest_error!(
                ErrorKind::TargetQueryFailed,
                "Failed to advance watermark",
                err.to_string(),
                source: err
            )
        })?;

        debug!(table, %new_ts, "watermark advanced");

        Ok(())
    }
}
