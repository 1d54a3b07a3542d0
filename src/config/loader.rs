use std::path::Path;

use config::{Config, Environment, File, FileFormat};
use eyre::{Context, Result};
use serde::de::DeserializeOwned;

use crate::config::models::{ApiDefinition, ReactorConfig};

/// Prefix of environment variables overriding [`ReactorConfig`] fields,
/// e.g. `AXON_REACTOR__PENDING_REQUESTS_TIMEOUT_MS=5000`.
pub const ENV_PREFIX: &str = "AXON_REACTOR";

fn file_format(path: &Path) -> FileFormat {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("yaml") | Some("yml") => FileFormat::Yaml,
        Some("json") => FileFormat::Json,
        Some("toml") => FileFormat::Toml,
        Some("ini") => FileFormat::Ini,
        _ => FileFormat::Yaml,
    }
}

fn load_from<T: DeserializeOwned>(config_path: &Path, with_env: bool) -> Result<T> {
    let path_str = config_path
        .to_str()
        .ok_or_else(|| eyre::eyre!("Invalid UTF-8 path: {}", config_path.display()))?;

    let mut builder =
        Config::builder().add_source(File::new(path_str, file_format(config_path)));
    if with_env {
        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__"),
        );
    }

    let settings = builder
        .build()
        .with_context(|| format!("Failed to build config from {}", config_path.display()))?;

    settings.try_deserialize().with_context(|| {
        format!(
            "Failed to deserialize config from {}",
            config_path.display()
        )
    })
}

/// Load the gateway-level reactor settings. Environment variables take
/// precedence over the file.
pub fn load_reactor_config(config_path: impl AsRef<Path>) -> Result<ReactorConfig> {
    load_from(config_path.as_ref(), true)
}

/// Load an API definition (YAML, JSON or TOML, chosen by extension).
pub fn load_api_definition(definition_path: impl AsRef<Path>) -> Result<ApiDefinition> {
    load_from(definition_path.as_ref(), false)
}
