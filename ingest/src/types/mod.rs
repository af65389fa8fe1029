//! Core data types shared across the ingestion engine.

mod cell;
mod delta;
mod row;
mod schema;

pub use cell::Cell;
pub use delta::{BatchId, ChangeOp, DeltaBatch, DeltaRow};
pub use row::TableRow;
pub use schema::{ColumnSchema, ColumnType, TableName, TableSchema};
