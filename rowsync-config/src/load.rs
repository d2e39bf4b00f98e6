use serde::de::DeserializeOwned;
use std::path::Path;
use thiserror::Error;

use crate::environment::Environment;

/// Directory containing configuration files relative to the working directory.
const CONFIGURATION_DIR: &str = "configuration";

/// Base configuration file loaded for all environments.
const BASE_CONFIG_FILE: &str = "base.yaml";

/// Prefix for environment variable configuration overrides.
const ENV_PREFIX: &str = "APP";

/// Separator between environment variable prefix and key segments.
const ENV_PREFIX_SEPARATOR: &str = "_";

/// Separator for nested configuration keys in environment variables.
///
/// Example: `APP_DATABASE__HOST` sets the `database.host` field.
const ENV_SEPARATOR: &str = "__";

/// Separator for list elements in environment variables.
const LIST_SEPARATOR: &str = ",";

/// Errors raised while assembling the configuration.
#[derive(Debug, Error)]
pub enum LoadConfigError {
    #[error("failed to determine the current directory: {0}")]
    CurrentDir(#[source] std::io::Error),

    #[error("failed to determine the running environment: {0}")]
    Environment(#[source] std::io::Error),

    #[error("failed to build the configuration: {0}")]
    Config(#[from] config::ConfigError),
}

/// Trait implemented by every top-level configuration type.
pub trait Config {
    /// Keys whose environment variable values are split on `,` into lists.
    const LIST_PARSE_KEYS: &'static [&'static str];
}

/// Loads hierarchical configuration from the `configuration` directory of the working directory.
///
/// Sources are layered in this order, later ones overriding earlier ones:
/// 1. `configuration/base.yaml`
/// 2. `configuration/{environment}.yaml`, with the environment taken from `APP_ENVIRONMENT`
/// 3. environment variables prefixed with `APP`, e.g. `APP_DATABASE__PASSWORD`
pub fn load_config<T>() -> Result<T, LoadConfigError>
where
    T: Config + DeserializeOwned,
{
    let base_path = std::env::current_dir().map_err(LoadConfigError::CurrentDir)?;
    let environment = Environment::load().map_err(LoadConfigError::Environment)?;

    load_config_from(&base_path.join(CONFIGURATION_DIR), environment)
}

/// Loads configuration from an explicit directory and environment.
///
/// Same layering as [`load_config`].
pub fn load_config_from<T>(
    configuration_directory: &Path,
    environment: Environment,
) -> Result<T, LoadConfigError>
where
    T: Config + DeserializeOwned,
{
    let environment_filename = format!("{environment}.yaml");

    let mut environment_source = config::Environment::with_prefix(ENV_PREFIX)
        .prefix_separator(ENV_PREFIX_SEPARATOR)
        .separator(ENV_SEPARATOR);

    if !<T as Config>::LIST_PARSE_KEYS.is_empty() {
        environment_source = environment_source
            .try_parsing(true)
            .list_separator(LIST_SEPARATOR);

        for key in <T as Config>::LIST_PARSE_KEYS {
            environment_source = environment_source.with_list_parse_key(key);
        }
    }

    let settings = config::Config::builder()
        .add_source(config::File::from(
            configuration_directory.join(BASE_CONFIG_FILE),
        ))
        // The environment file is optional, base.yaml alone is a complete configuration.
        .add_source(
            config::File::from(configuration_directory.join(environment_filename)).required(false),
        )
        .add_source(environment_source)
        .build()?;

    Ok(settings.try_deserialize::<T>()?)
}
