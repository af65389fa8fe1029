use std::collections::BTreeMap;

use serde::Deserialize;
use thiserror::Error;

use crate::Config;
use crate::shared::PgConnectionConfig;

/// Configuration validation errors.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// Maximum parallel tables cannot be zero.
    #[error("`max_parallel_tables` cannot be zero")]
    MaxParallelTablesZero,
    /// The provenance tag must be set.
    #[error("`origem_sistema` cannot be empty")]
    MissingOrigemSistema,
    /// At least one table must be configured.
    #[error("`tables` cannot be empty")]
    NoTablesConfigured,
    /// A configured table is missing its business key columns.
    #[error("table `{0}` has no business key columns")]
    MissingBusinessKeys(String),
    /// TLS is enabled but no trusted root certificates are provided.
    #[error("Invalid TLS config: `trusted_root_certs` must be set when `enabled` is true")]
    MissingTrustedRootCerts,
}

/// Per-table extraction settings.
///
/// Maps a logical table name to the source schema that holds it and the
/// natural-identity columns used to detect already-merged rows.
#[derive(Debug, Clone, Deserialize)]
pub struct TableConfig {
    /// Schema of the table in the source database.
    pub source_schema: String,
    /// Business key columns, matched together with the change timestamp
    /// during the changelog merge.
    pub business_keys: Vec<String>,
}

/// Landing storage settings.
#[derive(Debug, Clone, Deserialize)]
pub struct LandingConfig {
    /// Base directory under which `<table>/batch_id=<id>` partitions are written.
    pub base_path: String,
}

/// Engine-level pipeline settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct PipelineSettings {
    /// Static provenance tag stamped on every changelog row.
    pub origem_sistema: String,
    /// Schema on the target store holding the watermark table.
    #[serde(default = "default_meta_schema")]
    pub meta_schema: String,
    /// Schema on the target store holding the changelog tables.
    #[serde(default = "default_target_schema")]
    pub target_schema: String,
    /// Maximum number of tables processed concurrently.
    #[serde(default = "default_max_parallel_tables")]
    pub max_parallel_tables: usize,
    /// Maximum time, in milliseconds, a delta extraction may take.
    #[serde(default = "default_stage_timeout_ms")]
    pub extract_timeout_ms: u64,
    /// Maximum time, in milliseconds, a changelog merge may take.
    #[serde(default = "default_stage_timeout_ms")]
    pub merge_timeout_ms: u64,
}

impl PipelineSettings {
    /// Default maximum number of tables processed concurrently.
    pub const DEFAULT_MAX_PARALLEL_TABLES: usize = 4;

    /// Default per-stage timeout in milliseconds.
    pub const DEFAULT_STAGE_TIMEOUT_MS: u64 = 300_000;
}

fn default_meta_schema() -> String {
    "meta".to_string()
}

fn default_target_schema() -> String {
    "bronze".to_string()
}

fn default_max_parallel_tables() -> usize {
    PipelineSettings::DEFAULT_MAX_PARALLEL_TABLES
}

fn default_stage_timeout_ms() -> u64 {
    PipelineSettings::DEFAULT_STAGE_TIMEOUT_MS
}

/// Top-level configuration for the loader service.
#[derive(Debug, Clone, Deserialize)]
pub struct LoaderConfig {
    /// Source database the deltas are extracted from.
    pub source: PgConnectionConfig,
    /// Target database holding the changelog and watermark tables.
    pub target: PgConnectionConfig,
    /// Landing storage for raw delta batches.
    pub landing: LandingConfig,
    /// Engine settings.
    pub pipeline: PipelineSettings,
    /// Tables to process, keyed by logical table name.
    pub tables: BTreeMap<String, TableConfig>,
}

impl LoaderConfig {
    /// Validates loader configuration settings.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.pipeline.max_parallel_tables == 0 {
            return Err(ValidationError::MaxParallelTablesZero);
        }

        if self.pipeline.origem_sistema.is_empty() {
            return Err(ValidationError::MissingOrigemSistema);
        }

        if self.tables.is_empty() {
            return Err(ValidationError::NoTablesConfigured);
        }

        for (table, table_config) in &self.tables {
            if table_config.business_keys.is_empty() {
                return Err(ValidationError::MissingBusinessKeys(table.clone()));
            }
        }

        for connection in [&self.source, &self.target] {
            if connection.tls.enabled && connection.tls.trusted_root_certs.is_empty() {
                return Err(ValidationError::MissingTrustedRootCerts);
            }
        }

        Ok(())
    }
}

impl Config for LoaderConfig {
    const LIST_PARSE_KEYS: &'static [&'static str] = &[];
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::TlsConfig;

    fn connection() -> PgConnectionConfig {
        PgConnectionConfig {
            host: "localhost".to_string(),
            port: 5432,
            name: "postgres".to_string(),
            username: "postgres".to_string(),
            password: None,
            tls: TlsConfig::disabled(),
        }
    }

    fn valid_config() -> LoaderConfig {
        LoaderConfig {
            source: connection(),
            target: connection(),
            landing: LandingConfig {
                base_path: "/tmp/landing".to_string(),
            },
            pipeline: PipelineSettings {
                origem_sistema: "postgres-aviacao".to_string(),
                meta_schema: default_meta_schema(),
                target_schema: default_target_schema(),
                max_parallel_tables: default_max_parallel_tables(),
                extract_timeout_ms: default_stage_timeout_ms(),
                merge_timeout_ms: default_stage_timeout_ms(),
            },
            tables: BTreeMap::from([(
                "voos".to_string(),
                TableConfig {
                    source_schema: "aviacao".to_string(),
                    business_keys: vec!["id".to_string()],
                },
            )]),
        }
    }

    #[test]
    fn valid_config_passes_validation() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn zero_parallel_tables_fails_validation() {
        let mut config = valid_config();
        config.pipeline.max_parallel_tables = 0;
        assert!(matches!(
            config.validate(),
            Err(ValidationError::MaxParallelTablesZero)
        ));
    }

    #[test]
    fn empty_business_keys_fail_validation() {
        let mut config = valid_config();
        config
            .tables
            .get_mut("voos")
            .unwrap()
            .business_keys
            .clear();
        assert!(matches!(
            config.validate(),
            Err(ValidationError::MissingBusinessKeys(table)) if table == "voos"
        ));
    }
}
