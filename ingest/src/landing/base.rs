use std::future::Future;

use crate::error::IngestResult;
use crate::types::{BatchId, DeltaRow, TableSchema};

/// Trait for stores that persist raw delta batches before they are merged.
///
/// Landing must durably complete before the changelog merge runs: the landed
/// batch is the write-ahead, replayable record of every delta ever pulled. If
/// the merge fails or the process crashes, the batch can be re-merged without
/// re-querying the source.
///
/// Writes are append-only and partitioned by batch id, so repeated runs never
/// collide with prior batches. Landing the same batch twice is acceptable;
/// idempotence is enforced downstream at merge time.
pub trait LandingStore {
    /// Persists the rows of one batch and returns the landed location.
    fn write_batch(
        &self,
        schema: &TableSchema,
        rows: &[DeltaRow],
        table: &str,
        batch_id: &BatchId,
    ) -> impl Future<Output = IngestResult<String>> + Send;
}
