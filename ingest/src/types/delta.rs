use std::fmt;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::types::{TableRow, TableSchema};

/// The kind of change a delta row represents.
///
/// A row is an [`ChangeOp::Insert`] only while it has never been altered in
/// the source; once altered it always surfaces as an [`ChangeOp::Update`],
/// even when created and altered inside the same extraction window. The
/// changelog is an event log of changes, not a snapshot.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ChangeOp {
    Insert,
    Update,
}

impl ChangeOp {
    /// The single-character form stored in the `change_op` column.
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeOp::Insert => "I",
            ChangeOp::Update => "U",
        }
    }

    /// Parses the single-character form produced by the delta projection.
    pub fn from_flag(flag: &str) -> Option<ChangeOp> {
        match flag {
            "I" => Some(ChangeOp::Insert),
            "U" => Some(ChangeOp::Update),
            _ => None,
        }
    }
}

impl fmt::Display for ChangeOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single changed row pulled from the source.
///
/// The underlying [`TableRow`] carries every projected column, including the
/// derived `data_ref` and `change_op` columns; the typed fields here are the
/// parsed copies the coordinator and merger work with.
#[derive(Debug, Clone, PartialEq)]
pub struct DeltaRow {
    /// All projected column values.
    pub row: TableRow,
    /// Effective change timestamp: alteration timestamp when present,
    /// creation timestamp otherwise.
    pub data_ref: DateTime<Utc>,
    /// Insert/update classification.
    pub change_op: ChangeOp,
}

/// The full delta of one table for one run, in merge order.
#[derive(Debug, Clone)]
pub struct DeltaBatch {
    /// Logical name of the source table.
    pub table: String,
    /// Schema of the projected rows.
    pub schema: TableSchema,
    /// Delta rows ordered by `(data_ref, business key)` ascending.
    pub rows: Vec<DeltaRow>,
}

impl DeltaBatch {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Returns the greatest change timestamp in the batch.
    ///
    /// This is the value the watermark advances to after a successful merge;
    /// advancing to "now" instead could skip rows with late-arriving
    /// timestamps from writers still in flight on the source.
    pub fn max_data_ref(&self) -> Option<DateTime<Utc>> {
        self.rows.iter().map(|row| row.data_ref).max()
    }
}

/// Identifier grouping one extraction-to-merge cycle's rows.
///
/// Batch ids partition the landing store and are stamped on every changelog
/// row for traceability.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct BatchId(String);

impl BatchId {
    /// Generates a fresh random batch id.
    pub fn generate() -> BatchId {
        BatchId(Uuid::new_v4().to_string())
    }

    pub fn new(id: impl Into<String>) -> BatchId {
        BatchId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    use crate::types::{Cell, ColumnSchema, ColumnType, TableName};

    fn batch_with_timestamps(timestamps: &[i64]) -> DeltaBatch {
        let schema = TableSchema::new(
            TableName::new("aviacao".to_string(), "voos".to_string()),
            vec![ColumnSchema::new("id".to_string(), ColumnType::I64, false)],
        );

        let rows = timestamps
            .iter()
            .map(|seconds| DeltaRow {
                row: TableRow::new(vec![Cell::I64(*seconds)]),
                data_ref: Utc.timestamp_opt(*seconds, 0).unwrap(),
                change_op: ChangeOp::Insert,
            })
            .collect();

        DeltaBatch {
            table: "voos".to_string(),
            schema,
            rows,
        }
    }

    #[test]
    fn max_data_ref_of_empty_batch_is_none() {
        assert_eq!(batch_with_timestamps(&[]).max_data_ref(), None);
    }

    #[test]
    fn max_data_ref_picks_greatest_timestamp() {
        let batch = batch_with_timestamps(&[10, 30, 20]);
        assert_eq!(
            batch.max_data_ref(),
            Some(Utc.timestamp_opt(30, 0).unwrap())
        );
    }

    #[test]
    fn change_op_flags_round_trip() {
        assert_eq!(ChangeOp::from_flag("I"), Some(ChangeOp::Insert));
        assert_eq!(ChangeOp::from_flag("U"), Some(ChangeOp::Update));
        assert_eq!(ChangeOp::from_flag("D"), None);
        assert_eq!(ChangeOp::Update.as_str(), "U");
    }
}
