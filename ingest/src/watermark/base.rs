use std::future::Future;

use chrono::{DateTime, TimeZone, Utc};

use crate::error::IngestResult;

/// Returns the sentinel cursor used when a table has no prior watermark.
///
/// Every change timestamp the source can produce is after this instant, so a
/// first run extracts the full table.
pub fn beginning_of_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(1900, 1, 1, 0, 0, 0)
        .single()
        .expect("1900-01-01T00:00:00Z is a valid timestamp")
}

/// One watermark record: the incremental cursor of a single table.
#[derive(Debug, Clone, PartialEq)]
pub struct Watermark {
    /// Logical name of the table the cursor belongs to.
    pub table_name: String,
    /// Greatest change timestamp successfully merged so far.
    pub last_change_ts: DateTime<Utc>,
    /// When the cursor was last advanced. Audit only.
    pub last_run_ts: DateTime<Utc>,
}

/// Trait for storing and retrieving per-table watermarks.
///
/// Implementations replace watermark records whole: a failed [`WatermarkStore::advance`]
/// must leave the previous record intact, since advancing the cursor past data
/// that was not durably merged would lose rows. Concurrent advances for
/// different tables must not interfere; concurrent advances for the same table
/// are not expected (one coordinator per table).
pub trait WatermarkStore {
    /// Returns the stored cursor for `table`.
    ///
    /// Returns [`beginning_of_time`] when the table has no prior watermark.
    /// An absent store or watermark table is a legitimate "no prior state"
    /// condition, not an error.
    fn get(&self, table: &str) -> impl Future<Output = IngestResult<DateTime<Utc>>> + Send;

    /// Atomically replaces the watermark for `table` with
    /// `{table, new_ts, now()}`.
    fn advance(
        &self,
        table: &str,
        new_ts: DateTime<Utc>,
    ) -> impl Future<Output = IngestResult<()>> + Send;
}
