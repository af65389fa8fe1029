use std::fmt;

use pg_escape::quote_identifier;

use crate::error::{ErrorKind, IngestResult};
use crate::ingest_error;

/// A fully qualified Postgres table name consisting of a schema and table name.
#[derive(Debug, Clone, Eq, PartialEq, PartialOrd, Ord, Hash)]
pub struct TableName {
    /// The schema containing the table.
    pub schema: String,
    /// The name of the table within the schema.
    pub name: String,
}

impl TableName {
    pub fn new(schema: String, name: String) -> TableName {
        Self { schema, name }
    }

    /// Returns the table name as a properly quoted Postgres identifier.
    ///
    /// Ensures the schema and table names are escaped according to Postgres
    /// identifier quoting rules.
    pub fn as_quoted_identifier(&self) -> String {
        let quoted_schema = quote_identifier(&self.schema);
        let quoted_name = quote_identifier(&self.name);

        format!("{quoted_schema}.{quoted_name}")
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_fmt(format_args!("{0}.{1}", self.schema, self.name))
    }
}

/// The column types the engine understands.
///
/// A closed set rather than raw type OIDs: a delta containing a column type
/// outside this set is a conversion error at the extraction boundary.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum ColumnType {
    Bool,
    I16,
    I32,
    I64,
    F32,
    F64,
    Numeric,
    Text,
    Date,
    Timestamp,
    TimestampTz,
    Uuid,
    Json,
}

impl ColumnType {
    /// Maps a Postgres type name (as reported by the driver) to a [`ColumnType`].
    pub fn from_pg_type_name(name: &str) -> Option<ColumnType> {
        let typ = match name {
            "BOOL" => ColumnType::Bool,
            "INT2" => ColumnType::I16,
            "INT4" => ColumnType::I32,
            "INT8" => ColumnType::I64,
            "FLOAT4" => ColumnType::F32,
            "FLOAT8" => ColumnType::F64,
            "NUMERIC" => ColumnType::Numeric,
            "TEXT" | "VARCHAR" | "CHAR" | "BPCHAR" | "NAME" => ColumnType::Text,
            "DATE" => ColumnType::Date,
            "TIMESTAMP" => ColumnType::Timestamp,
            "TIMESTAMPTZ" => ColumnType::TimestampTz,
            "UUID" => ColumnType::Uuid,
            "JSON" | "JSONB" => ColumnType::Json,
            _ => return None,
        };

        Some(typ)
    }

    /// Returns the Postgres type name used when creating changelog tables.
    pub fn ddl_type_name(&self) -> &'static str {
        match self {
            ColumnType::Bool => "boolean",
            ColumnType::I16 => "smallint",
            ColumnType::I32 => "integer",
            ColumnType::I64 => "bigint",
            ColumnType::F32 => "real",
            ColumnType::F64 => "double precision",
            ColumnType::Numeric => "numeric",
            ColumnType::Text => "text",
            ColumnType::Date => "date",
            ColumnType::Timestamp => "timestamp",
            ColumnType::TimestampTz => "timestamptz",
            ColumnType::Uuid => "uuid",
            ColumnType::Json => "jsonb",
        }
    }
}

/// Represents the schema of a single column.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ColumnSchema {
    /// The name of the column.
    pub name: String,
    /// The data type of the column.
    pub typ: ColumnType,
    /// Whether the column can contain NULL values.
    pub nullable: bool,
}

impl ColumnSchema {
    pub fn new(name: String, typ: ColumnType, nullable: bool) -> ColumnSchema {
        Self {
            name,
            typ,
            nullable,
        }
    }
}

/// The full schema of a table as observed at extraction time.
///
/// Column order matches the extraction projection, which is also the order of
/// values in every [`crate::types::TableRow`] of the same delta.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct TableSchema {
    /// The fully qualified table name.
    pub name: TableName,
    /// Ordered column schemas.
    pub columns: Vec<ColumnSchema>,
}

impl TableSchema {
    pub fn new(name: TableName, columns: Vec<ColumnSchema>) -> TableSchema {
        Self { name, columns }
    }

    /// Returns the position of a column by name.
    pub fn column_index(&self, column_name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|column| column.name == column_name)
    }

    /// Resolves a list of column names to their positions.
    ///
    /// Fails with [`ErrorKind::MissingColumn`] when any name is absent, which
    /// catches business-key configuration drift before a merge is attempted.
    pub fn resolve_columns(&self, column_names: &[String]) -> IngestResult<Vec<usize>> {
        column_names
            .iter()
            .map(|column_name| {
                self.column_index(column_name).ok_or_else(|| {
                    ingest_error!(
                        ErrorKind::MissingColumn,
                        "Column not found in table schema",
                        format!("column `{column_name}` is not part of `{}`", self.name)
                    )
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_schema() -> TableSchema {
        TableSchema::new(
            TableName::new("aviacao".to_string(), "voos".to_string()),
            vec![
                ColumnSchema::new("id".to_string(), ColumnType::I64, false),
                ColumnSchema::new("numero_voo".to_string(), ColumnType::Text, false),
                ColumnSchema::new("data_ref".to_string(), ColumnType::TimestampTz, false),
            ],
        )
    }

    #[test]
    fn quoted_identifier_escapes_mixed_case_names() {
        let name = TableName::new("public".to_string(), "Voos".to_string());
        assert_eq!(name.as_quoted_identifier(), "public.\"Voos\"");
    }

    #[test]
    fn resolve_columns_returns_positions_in_request_order() {
        let schema = test_schema();
        let positions = schema
            .resolve_columns(&["data_ref".to_string(), "id".to_string()])
            .unwrap();

        assert_eq!(positions, vec![2, 0]);
    }

    #[test]
    fn resolve_columns_fails_on_unknown_name() {
        let schema = test_schema();
        let err = schema
            .resolve_columns(&["missing".to_string()])
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::MissingColumn);
    }

    #[test]
    fn pg_type_names_round_trip_through_ddl() {
        assert_eq!(
            ColumnType::from_pg_type_name("TIMESTAMPTZ"),
            Some(ColumnType::TimestampTz)
        );
        assert_eq!(ColumnType::TimestampTz.ddl_type_name(), "timestamptz");
        assert_eq!(ColumnType::from_pg_type_name("GEOMETRY"), None);
    }
}
