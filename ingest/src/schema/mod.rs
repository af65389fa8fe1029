//! Schema bookkeeping for changelog tables.

mod registry;

pub use registry::SchemaRegistry;
