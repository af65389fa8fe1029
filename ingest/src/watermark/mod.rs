//! Durable per-table cursors of the last processed change timestamp.

mod base;
mod memory;
mod postgres;

pub use base::{Watermark, WatermarkStore, beginning_of_time};
pub use memory::MemoryWatermarkStore;
pub use postgres::PostgresWatermarkStore;
