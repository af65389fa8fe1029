use std::future::Future;

use chrono::{DateTime, Utc};
use ingest_config::shared::TableConfig;

use crate::error::IngestResult;
use crate::types::DeltaBatch;

/// Trait for systems the engine can pull table deltas from.
///
/// A [`DeltaSource`] returns, in one consistent read, every row of a table
/// whose effective change timestamp is strictly after `since`, ordered by
/// `(data_ref, business key)` ascending and classified as insert or update.
/// The ordering is load-bearing: a replay from the same watermark must
/// reproduce a superset that includes every unprocessed row, in a
/// deterministic sequence.
///
/// No pagination happens at this layer; bounding delta size is the
/// coordinator's responsibility (run often enough that deltas stay small).
pub trait DeltaSource {
    /// Fetches the delta of `table` since the given watermark.
    ///
    /// Any read error is fatal for the table's run and prevents watermark
    /// advancement.
    fn fetch_delta(
        &self,
        table: &str,
        table_config: &TableConfig,
        since: DateTime<Utc>,
    ) -> impl Future<Output = IngestResult<DeltaBatch>> + Send;
}
