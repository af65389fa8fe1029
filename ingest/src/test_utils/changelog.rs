use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::changelog::ChangelogStore;
use crate::error::{ErrorKind, IngestResult};
use crate::ingest_error;
use crate::types::{TableName, TableRow, TableSchema};

/// Changelog store wrapper that injects merge failures.
///
/// Existence checks and table creation pass through; `insert_missing` fails
/// while the configured failure budget lasts, then delegates. This simulates
/// a crash between landing and merge, the window the landed batch exists to
/// recover from.
#[derive(Debug, Clone)]
pub struct FailingChangelogStore<C> {
    wrapped: C,
    failures_remaining: Arc<AtomicUsize>,
    only_table: Option<String>,
}

impl<C> FailingChangelogStore<C> {
    /// Wraps a store with a budget of merge failures to inject.
    pub fn wrap(wrapped: C, failures: usize) -> Self {
        Self {
            wrapped,
            failures_remaining: Arc::new(AtomicUsize::new(failures)),
            only_table: None,
        }
    }

    /// Restricts injected failures to changelog tables of one source table.
    pub fn only_for_table(mut self, table: &str) -> Self {
        self.only_table = Some(table.to_string());
        self
    }

    /// Arms the wrapper with a new failure budget.
    pub fn fail_next(&self, failures: usize) {
        self.failures_remaining.store(failures, Ordering::SeqCst);
    }

    fn targets(&self, table: &TableName) -> bool {
        match &self.only_table {
            Some(only) => table.name.starts_with(only.as_str()),
            None => true,
        }
    }
}

impl<C> ChangelogStore for FailingChangelogStore<C>
where
    C: ChangelogStore + Send + Sync,
{
    async fn table_exists(&self, table: &TableName) -> IngestResult<bool> {
        self.wrapped.table_exists(table).await
    }

    async fn create_table(&self, table: &TableName, schema: &TableSchema) -> IngestResult<()> {
        self.wrapped.create_table(table, schema).await
    }

    async fn insert_missing(
        &self,
        table: &TableName,
        schema: &TableSchema,
        match_columns: &[usize],
        rows: &[TableRow],
    ) -> IngestResult<u64> {
        let armed = self.targets(table)
            && self
                .failures_remaining
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |remaining| {
                    remaining.checked_sub(1)
                })
                .is_ok();

        if armed {
            return Err(ingest_error!(
                ErrorKind::TargetQueryFailed,
                "Injected merge failure",
                table.to_string()
            ));
        }

        self.wrapped
            .insert_missing(table, schema, match_columns, rows)
            .await
    }
}
