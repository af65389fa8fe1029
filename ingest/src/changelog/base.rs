use std::future::Future;

use crate::error::IngestResult;
use crate::types::{TableName, TableRow, TableSchema};

/// Trait for the durable table store that holds changelog tables.
///
/// The store exposes a narrow contract: existence checks, schema-on-write
/// table creation, and a conditional insert that skips rows already matched
/// by key columns. There is deliberately no update or delete operation; the
/// changelog only ever grows, which is what makes re-merging a batch safe.
pub trait ChangelogStore {
    /// Returns whether the changelog table exists.
    fn table_exists(&self, table: &TableName) -> impl Future<Output = IngestResult<bool>> + Send;

    /// Creates the changelog table from the given schema, with zero rows.
    ///
    /// Creating a table that already exists is a no-op.
    fn create_table(
        &self,
        table: &TableName,
        schema: &TableSchema,
    ) -> impl Future<Output = IngestResult<()>> + Send;

    /// Inserts the rows that have no existing match on the given match
    /// columns, in batch order, and returns how many were inserted.
    ///
    /// A row matches an existing record when every match column compares
    /// equal. Matched rows are left untouched.
    fn insert_missing(
        &self,
        table: &TableName,
        schema: &TableSchema,
        match_columns: &[usize],
        rows: &[TableRow],
    ) -> impl Future<Output = IngestResult<u64>> + Send;
}
