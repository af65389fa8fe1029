use std::io;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::environment::Environment;

/// Directory containing configuration files, relative to the working directory.
const CONFIGURATION_DIR: &str = "configuration";

/// Supported extensions for configuration files.
const CONFIG_FILE_EXTENSIONS: &[&str] = &["yaml", "yml", "json"];

/// Prefix for environment variable configuration overrides.
const ENV_PREFIX: &str = "APP";

/// Separator for nested configuration keys in environment variables.
const ENV_SEPARATOR: &str = "__";

/// Separator for list elements in environment variables.
const LIST_SEPARATOR: &str = ",";

/// Trait implemented by configuration structures that require list parsing help.
pub trait Config {
    /// Keys whose values should be parsed as lists when loading the configuration.
    const LIST_PARSE_KEYS: &'static [&'static str];
}

/// Errors that can occur while loading configuration files and overrides.
#[derive(Debug, Error)]
pub enum LoadConfigError {
    /// Failed to determine the current working directory.
    #[error("failed to determine the current directory: {0}")]
    CurrentDir(#[source] io::Error),

    /// The `configuration` directory does not exist.
    #[error("configuration directory `{0}` does not exist")]
    MissingConfigurationDirectory(PathBuf),

    /// A required configuration file was not found under any supported extension.
    #[error("no `{stem}` configuration file in `{directory}` (tried {extensions:?})")]
    ConfigurationFileMissing {
        stem: String,
        directory: PathBuf,
        extensions: &'static [&'static str],
    },

    /// Failed to determine the runtime environment (`APP_ENVIRONMENT`).
    #[error("failed to determine runtime environment: {0}")]
    Environment(#[from] io::Error),

    /// Reading or merging the configuration sources failed.
    #[error("failed to build configuration: {0}")]
    Build(#[source] config::ConfigError),

    /// The merged configuration did not deserialize into the target type.
    #[error("failed to deserialize configuration: {0}")]
    Deserialize(#[source] config::ConfigError),
}

/// Loads hierarchical configuration from base, environment, and
/// environment-variable sources.
///
/// `configuration/base.(yaml|yml|json)` is loaded first, then
/// `configuration/{environment}.(yaml|yml|json)`, then `APP_`-prefixed
/// environment variable overrides. Nested keys use double underscores
/// (`APP_SOURCE__HOST`), and list values are comma-separated.
pub fn load_config<T>() -> Result<T, LoadConfigError>
where
    T: Config + DeserializeOwned,
{
    let working_dir = std::env::current_dir().map_err(LoadConfigError::CurrentDir)?;
    let configuration_dir = working_dir.join(CONFIGURATION_DIR);
    if !configuration_dir.is_dir() {
        return Err(LoadConfigError::MissingConfigurationDirectory(
            configuration_dir,
        ));
    }

    let environment = Environment::load()?;
    let base_file = locate_file(&configuration_dir, "base")?;
    let environment_file = locate_file(&configuration_dir, environment.as_str())?;

    let mut environment_source = config::Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("_")
        .separator(ENV_SEPARATOR);
    if !T::LIST_PARSE_KEYS.is_empty() {
        environment_source = environment_source
            .try_parsing(true)
            .list_separator(LIST_SEPARATOR);
        for key in T::LIST_PARSE_KEYS {
            environment_source = environment_source.with_list_parse_key(key);
        }
    }

    config::Config::builder()
        .add_source(config::File::from(base_file))
        .add_source(config::File::from(environment_file))
        .add_source(environment_source)
        .build()
        .map_err(LoadConfigError::Build)?
        .try_deserialize::<T>()
        .map_err(LoadConfigError::Deserialize)
}

/// Finds the configuration file with the given stem among the supported
/// extensions.
fn locate_file(directory: &Path, stem: &str) -> Result<PathBuf, LoadConfigError> {
    for extension in CONFIG_FILE_EXTENSIONS {
        let path = directory.join(format!("{stem}.{extension}"));
        if path.is_file() {
            return Ok(path);
        }
    }

    Err(LoadConfigError::ConfigurationFileMissing {
        stem: stem.to_string(),
        directory: directory.to_path_buf(),
        extensions: CONFIG_FILE_EXTENSIONS,
    })
}
