//! Shared configuration types for the ingestion pipeline.

mod connection;
mod loader;

pub use connection::{IntoConnectOptions, PgConnectionConfig, TlsConfig};
pub use loader::{
    LandingConfig, LoaderConfig, PipelineSettings, TableConfig, ValidationError,
};
