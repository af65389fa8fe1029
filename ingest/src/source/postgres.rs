use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use ingest_config::shared::TableConfig;
use sqlx::postgres::{PgPool, PgRow};
use sqlx::{Column, Row, TypeInfo};
use tracing::debug;
use uuid::Uuid;

use crate::error::{ErrorKind, IngestResult};
use crate::source::base::DeltaSource;
use crate::source::query::{CHANGE_OP_COLUMN, DATA_REF_COLUMN, build_delta_query};
use crate::types::{
    Cell, ChangeOp, ColumnSchema, ColumnType, DeltaBatch, DeltaRow, TableName, TableRow,
    TableSchema,
};
use crate::{bail, ingest_error};

/// Delta extraction from a source Postgres database.
///
/// Issues the delta-selection query of [`build_delta_query`] over an injected
/// connection pool and decodes the result into typed rows. The whole delta is
/// read in one statement, which gives a single consistent snapshot.
#[derive(Debug, Clone)]
pub struct PostgresDeltaSource {
    pool: PgPool,
}

impl PostgresDeltaSource {
    /// Creates a new extractor over an injected source-database pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl DeltaSource for PostgresDeltaSource {
    async fn fetch_delta(
        &self,
        table: &str,
        table_config: &TableConfig,
        since: DateTime<Utc>,
    ) -> IngestResult<DeltaBatch> {
        let query = build_delta_query(
            &table_config.source_schema,
            table,
            &table_config.business_keys,
        );

        // The source audit columns are timezone-naive and written in UTC, so
        // the cursor binds as its naive UTC form.
        let pg_rows = sqlx::query(&query)
            .bind(since.naive_utc())
            .fetch_all(&self.pool)
            .await?;

        let table_name = TableName::new(table_config.source_schema.clone(), table.to_string());

        let Some(first_row) = pg_rows.first() else {
            debug!(table, "delta query returned no rows");

            return Ok(DeltaBatch {
                table: table.to_string(),
                schema: TableSchema::new(table_name, Vec::new()),
                rows: Vec::new(),
            });
        };

        let schema = schema_from_row(table_name, first_row)?;
        let data_ref_index = schema.resolve_columns(&[DATA_REF_COLUMN.to_string()])?[0];
        let change_op_index = schema.resolve_columns(&[CHANGE_OP_COLUMN.to_string()])?[0];

        let mut rows = Vec::with_capacity(pg_rows.len());
        for pg_row in &pg_rows {
            let mut values = Vec::with_capacity(schema.columns.len());
            for (index, column) in schema.columns.iter().enumerate() {
                values.push(decode_cell(pg_row, index, column)?);
            }

            let data_ref = match &values[data_ref_index] {
                Cell::Timestamp(naive) => Utc.from_utc_datetime(naive),
                Cell::TimestampTz(ts) => *ts,
                other => {
                    bail!(
                        ErrorKind::InvalidData,
                        "Delta row carries a non-timestamp change reference",
                        format!("table `{table}` produced `{other:?}`")
                    );
                }
            };

            let change_op = match &values[change_op_index] {
                Cell::String(flag) => ChangeOp::from_flag(flag),
                _ => None,
            };
            let Some(change_op) = change_op else {
                bail!(
                    ErrorKind::InvalidData,
                    "Delta row carries an unknown change flag",
                    format!("table `{table}`, values `{:?}`", values[change_op_index])
                );
            };

            rows.push(DeltaRow {
                row: TableRow::new(values),
                data_ref,
                change_op,
            });
        }

        debug!(table, rows = rows.len(), "extracted delta");

        Ok(DeltaBatch {
            table: table.to_string(),
            schema,
            rows,
        })
    }
}

/// Builds the projected table schema from the first result row.
fn schema_from_row(name: TableName, row: &PgRow) -> IngestResult<TableSchema> {
    let mut columns = Vec::with_capacity(row.columns().len());

    for column in row.columns() {
        let type_name = column.type_info().name();
        let Some(typ) = ColumnType::from_pg_type_name(type_name) else {
            bail!(
                ErrorKind::ConversionError,
                "Unsupported column type in delta projection",
                format!("column `{}` has type `{type_name}`", column.name())
            );
        };

        // Nullability is not reported on result rows; every projected column
        // is treated as nullable.
        columns.push(ColumnSchema::new(column.name().to_string(), typ, true));
    }

    Ok(TableSchema::new(name, columns))
}

/// Decodes one column of a result row into a typed [`Cell`].
fn decode_cell(row: &PgRow, index: usize, column: &ColumnSchema) -> IngestResult<Cell> {
    let decoded = match column.typ {
        ColumnType::Bool => row.try_get::<Option<bool>, _>(index).map(|v| v.map(Cell::Bool)),
        ColumnType::I16 => row.try_get::<Option<i16>, _>(index).map(|v| v.map(Cell::I16)),
        ColumnType::I32 => row.try_get::<Option<i32>, _>(index).map(|v| v.map(Cell::I32)),
        ColumnType::I64 => row.try_get::<Option<i64>, _>(index).map(|v| v.map(Cell::I64)),
        ColumnType::F32 => row.try_get::<Option<f32>, _>(index).map(|v| v.map(Cell::F32)),
        ColumnType::F64 => row.try_get::<Option<f64>, _>(index).map(|v| v.map(Cell::F64)),
        ColumnType::Numeric => row
            .try_get::<Option<bigdecimal::BigDecimal>, _>(index)
            .map(|v| v.map(Cell::Numeric)),
        ColumnType::Text => row
            .try_get::<Option<String>, _>(index)
            .map(|v| v.map(Cell::String)),
        ColumnType::Date => row
            .try_get::<Option<NaiveDate>, _>(index)
            .map(|v| v.map(Cell::Date)),
        ColumnType::Timestamp => row
            .try_get::<Option<NaiveDateTime>, _>(index)
            .map(|v| v.map(Cell::Timestamp)),
        ColumnType::TimestampTz => row
            .try_get::<Option<DateTime<Utc>>, _>(index)
            .map(|v| v.map(Cell::TimestampTz)),
        ColumnType::Uuid => row
            .try_get::<Option<Uuid>, _>(index)
            .map(|v| v.map(Cell::Uuid)),
        ColumnType::Json => row
            .try_get::<Option<serde_json::Value>, _>(index)
            .map(|v| v.map(Cell::Json)),
    };

    let cell = decoded.map_err(|err| {
        ingest_error!(
            ErrorKind::ConversionError,
            "Failed to decode delta column",
            format!("column `{}`: {err}", column.name),
            source: err
        )
    })?;

    Ok(cell.unwrap_or(Cell::Null))
}
