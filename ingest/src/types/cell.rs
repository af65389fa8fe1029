use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use uuid::Uuid;

/// A single typed value from a database row.
///
/// [`Cell`] covers the column types the source system emits. Values are
/// constructed at the extraction boundary so that shape problems surface
/// there instead of at merge time.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Null,
    Bool(bool),
    I16(i16),
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    Numeric(BigDecimal),
    String(String),
    Date(NaiveDate),
    Timestamp(NaiveDateTime),
    TimestampTz(DateTime<Utc>),
    Uuid(Uuid),
    Json(serde_json::Value),
}

impl Cell {
    /// Renders the cell as a delimited-file field.
    ///
    /// Returns [`None`] for SQL NULL, which lands as an empty field.
    pub fn to_field(&self) -> Option<String> {
        match self {
            Cell::Null => None,
            Cell::Bool(value) => Some(value.to_string()),
            Cell::I16(value) => Some(value.to_string()),
            Cell::I32(value) => Some(value.to_string()),
            Cell::I64(value) => Some(value.to_string()),
            Cell::F32(value) => Some(value.to_string()),
            Cell::F64(value) => Some(value.to_string()),
            Cell::Numeric(value) => Some(value.to_string()),
            Cell::String(value) => Some(value.clone()),
            Cell::Date(value) => Some(value.format("%Y-%m-%d").to_string()),
            Cell::Timestamp(value) => Some(value.format("%Y-%m-%d %H:%M:%S%.6f").to_string()),
            Cell::TimestampTz(value) => {
                Some(value.format("%Y-%m-%d %H:%M:%S%.6f%:z").to_string())
            }
            Cell::Uuid(value) => Some(value.to_string()),
            Cell::Json(value) => Some(value.to_string()),
        }
    }

    /// Returns whether the cell is SQL NULL.
    pub fn is_null(&self) -> bool {
        matches!(self, Cell::Null)
    }
}
