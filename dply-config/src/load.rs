use std::path::Path;

use config::ConfigError;
use serde::de::DeserializeOwned;

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
/// Example: `APP_PROVIDER__OPERATION_TIMEOUT_SECS=60` sets the
/// `provider.operation_timeout_secs` field.
const ENV_SEPARATOR: &str = "__";

/// Loads hierarchical configuration from `./configuration`.
///
/// The running [`Environment`] is read from `APP_ENVIRONMENT`. See
/// [`load_config_from`] for the layering rules.
pub fn load_config<T>() -> Result<T, ConfigError>
where
    T: DeserializeOwned,
{
    let base_path = std::env::current_dir().map_err(|e| ConfigError::Foreign(Box::new(e)))?;
    let environment = Environment::load().map_err(|e| ConfigError::Foreign(Box::new(e)))?;

    load_config_from(&base_path.join(CONFIGURATION_DIR), environment)
}

/// Loads configuration from `configuration_directory` for `environment`.
///
/// Sources are layered in this order, later sources overriding earlier ones:
/// 1. `base.yaml` (required)
/// 2. `{environment}.yaml` (optional)
/// 3. environment variables prefixed with `APP_`, nested with `__`
pub fn load_config_from<T>(
    configuration_directory: &Path,
    environment: Environment,
) -> Result<T, ConfigError>
where
    T: DeserializeOwned,
{
    let environment_filename = format!("{environment}.yaml");

    let environment_source = config::Environment::with_prefix(ENV_PREFIX)
        .prefix_separator(ENV_PREFIX_SEPARATOR)
        .separator(ENV_SEPARATOR);

    let settings = config::Config::builder()
        .add_source(config::File::from(
            configuration_directory.join(BASE_CONFIG_FILE),
        ))
        .add_source(
            config::File::from(configuration_directory.join(environment_filename)).required(false),
        )
        .add_source(environment_source)
        .build()?;

    settings.try_deserialize::<T>()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    struct Sample {
        name: String,
        attempts: u32,
    }

    #[test]
    fn environment_file_overrides_base_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("base.yaml"), "name: base\nattempts: 3\n").unwrap();
        std::fs::write(dir.path().join("staging.yaml"), "attempts: 7\n").unwrap();

        let sample: Sample = load_config_from(dir.path(), Environment::Staging).unwrap();
        assert_eq!(sample.name, "base");
        assert_eq!(sample.attempts, 7);
    }

    #[test]
    fn environment_file_is_optional() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("base.yaml"), "name: only\nattempts: 1\n").unwrap();

        let sample: Sample = load_config_from(dir.path(), Environment::Prod).unwrap();
        assert_eq!(sample.name, "only");
        assert_eq!(sample.attempts, 1);
    }

    #[test]
    fn missing_base_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_config_from::<Sample>(dir.path(), Environment::Dev).is_err());
    }
}
