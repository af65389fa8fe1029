use ingest_config::shared::LoaderConfig;
use ingest_config::{LoadConfigError, load_config};

/// Loads the loader configuration from the layered configuration sources.
pub fn load_loader_config() -> Result<LoaderConfig, LoadConfigError> {
    load_config::<LoaderConfig>()
}
