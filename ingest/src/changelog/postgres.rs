use pg_escape::quote_identifier;
use sqlx::postgres::PgArguments;
use sqlx::query::Query;
use sqlx::{PgPool, Postgres, Row};
use tracing::info;

use crate::changelog::base::ChangelogStore;
use crate::error::{ErrorKind, IngestError, IngestResult};
use crate::ingest_error;
use crate::types::{Cell, ColumnType, TableName, TableRow, TableSchema};

/// SQLSTATE for "column does not exist".
const UNDEFINED_COLUMN: &str = "42703";

/// SQLSTATE for "datatype mismatch".
const DATATYPE_MISMATCH: &str = "42804";

/// Postgres-backed changelog storage.
///
/// Changelog tables are created schema-on-write and only ever grow: the
/// conditional insert runs inside one transaction, processing rows in batch
/// order, and never updates or deletes existing records.
#[derive(Debug, Clone)]
pub struct PostgresChangelogStore {
    pool: PgPool,
}

impl PostgresChangelogStore {
    /// Creates a new store over an injected target-database pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Classifies a target-store error, surfacing schema drift distinctly.
fn classify_target_error(err: sqlx::Error) -> IngestError {
    let is_drift = matches!(
        &err,
        sqlx::Error::Database(db_err)
            if matches!(db_err.code().as_deref(), Some(UNDEFINED_COLUMN) | Some(DATATYPE_MISMATCH))
    );

    if is_drift {
        ingest_error!(
            ErrorKind::SchemaDrift,
            "Delta shape is incompatible with the existing changelog table",
            err.to_string(),
            source: err
        )
    } else {
        ingest_error!(
            ErrorKind::TargetQueryFailed,
            "Changelog operation failed",
            err.to_string(),
            source: err
        )
    }
}

/// Binds one cell, using the column type for typed NULLs.
fn bind_cell<'q>(
    query: Query<'q, Postgres, PgArguments>,
    cell: &Cell,
    typ: ColumnType,
) -> Query<'q, Postgres, PgArguments> {
    match cell {
        Cell::Null => match typ {
            ColumnType::Bool => query.bind(None::<bool>),
            ColumnType::I16 => query.bind(None::<i16>),
            ColumnType::I32 => query.bind(None::<i32>),
            ColumnType::I64 => query.bind(None::<i64>),
            ColumnType::F32 => query.bind(None::<f32>),
            ColumnType::F64 => query.bind(None::<f64>),
            ColumnType::Numeric => query.bind(None::<bigdecimal::BigDecimal>),
            ColumnType::Text => query.bind(None::<String>),
            ColumnType::Date => query.bind(None::<chrono::NaiveDate>),
            ColumnType::Timestamp => query.bind(None::<chrono::NaiveDateTime>),
            ColumnType::TimestampTz => query.bind(None::<chrono::DateTime<chrono::Utc>>),
            ColumnType::Uuid => query.bind(None::<uuid::Uuid>),
            ColumnType::Json => query.bind(None::<serde_json::Value>),
        },
        Cell::Bool(value) => query.bind(*value),
        Cell::I16(value) => query.bind(*value),
        Cell::I32(value) => query.bind(*value),
        Cell::I64(value) => query.bind(*value),
        Cell::F32(value) => query.bind(*value),
        Cell::F64(value) => query.bind(*value),
        Cell::Numeric(value) => query.bind(value.clone()),
        Cell::String(value) => query.bind(value.clone()),
        Cell::Date(value) => query.bind(*value),
        Cell::Timestamp(value) => query.bind(*value),
        Cell::TimestampTz(value) => query.bind(*value),
        Cell::Uuid(value) => query.bind(*value),
        Cell::Json(value) => query.bind(value.clone()),
    }
}

/// Builds the conditional insert statement for one table.
///
/// Placeholders `$1..$N` carry the row values; the anti-join predicate reuses
/// the placeholders of the match columns, so each row binds exactly once.
fn build_insert_missing(
    table: &TableName,
    schema: &TableSchema,
    match_columns: &[usize],
) -> String {
    let qualified = table.as_quoted_identifier();

    let column_list = schema
        .columns
        .iter()
        .map(|column| quote_identifier(&column.name).into_owned())
        .collect::<Vec<_>>()
        .join(", ");

    let placeholders = (1..=schema.columns.len())
        .map(|position| format!("${position}"))
        .collect::<Vec<_>>()
        .join(", ");

    let match_predicate = match_columns
        .iter()
        .map(|&index| {
            format!(
                "tgt.{} = ${}",
                quote_identifier(&schema.columns[index].name),
                index + 1
            )
        })
        .collect::<Vec<_>>()
        .join(" and ");

    format!(
        r#"
        insert into {qualified} ({column_list})
        select {placeholders}
        where not exists (
            select 1 from {qualified} tgt where {match_predicate}
        )
        "#
    )
}

impl ChangelogStore for PostgresChangelogStore {
    async fn table_exists(&self, table: &TableName) -> IngestResult<bool> {
        let row = sqlx::query(
            r#"
            select exists (
                select 1 from information_schema.tables
                where table_schema = $1 and table_name = $2
            ) as present
            "#,
        )
        .bind(&table.schema)
        .bind(&table.name)
        .fetch_one(&self.pool)
        .await
        .map_err(classify_target_error)?;

        row.try_get("present").map_err(classify_target_error)
    }

    async fn create_table(&self, table: &TableName, schema: &TableSchema) -> IngestResult<()> {
        let create_schema = format!(
            "create schema if not exists {}",
            quote_identifier(&table.schema)
        );

        let column_defs = schema
            .columns
            .iter()
            .map(|column| {
                format!(
                    "{} {}",
                    quote_identifier(&column.name),
                    column.typ.ddl_type_name()
                )
            })
            .collect::<Vec<_>>()
            .join(",\n                ");
        let create_table = format!(
            "create table if not exists {} (\n                {}\n            )",
            table.as_quoted_identifier(),
            column_defs
        );

        sqlx::query(&create_schema)
            .execute(&self.pool)
            .await
            .map_err(classify_target_error)?;
        sqlx::query(&create_table)
            .execute(&self.pool)
            .await
            .map_err(classify_target_error)?;

        info!(table = %table, columns = schema.columns.len(), "created changelog table");

        Ok(())
    }

    async fn insert_missing(
        &self,
        table: &TableName,
        schema: &TableSchema,
        match_columns: &[usize],
        rows: &[TableRow],
    ) -> IngestResult<u64> {
        let statement = build_insert_missing(table, schema, match_columns);

        let mut tx = self.pool.begin().await.map_err(classify_target_error)?;

        let mut inserted = 0u64;
        for row in rows {
            let mut query = sqlx::query(&statement);
            for (cell, column) in row.values().iter().zip(schema.columns.iter()) {
                query = bind_cell(query, cell, column.typ);
            }

            let result = query
                .execute(&mut *tx)
                .await
                .map_err(classify_target_error)?;
            inserted += result.rows_affected();
        }

        tx.commit().await.map_err(classify_target_error)?;

        info!(
            table = %table,
            inserted,
            skipped = rows.len() as u64 - inserted,
            "merged rows into changelog"
        );

        Ok(inserted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ColumnSchema;

    fn schema() -> TableSchema {
        TableSchema::new(
            TableName::new("bronze".to_string(), "voos_changelog".to_string()),
            vec![
                ColumnSchema::new("id".to_string(), ColumnType::I64, true),
                ColumnSchema::new("origem".to_string(), ColumnType::Text, true),
                ColumnSchema::new("data_ref".to_string(), ColumnType::Timestamp, true),
            ],
        )
    }

    #[test]
    fn insert_statement_reuses_match_column_placeholders() {
        let schema = schema();
        let statement = build_insert_missing(&schema.name, &schema, &[0, 2]);

        assert!(statement.contains("insert into bronze.voos_changelog (id, origem, data_ref)"));
        assert!(statement.contains("select $1, $2, $3"));
        assert!(statement.contains("tgt.id = $1 and tgt.data_ref = $3"));
    }
}
