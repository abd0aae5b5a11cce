//! Layered configuration: defaults -> YAML file -> environment (`APP__*`).

use std::path::Path;

use anyhow::{Context, Result};
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Yaml};
use tenant_schemas::MigrateSchemasConfig;

/// Environment prefix; `APP__DATABASE__DSN` sets `database.dsn`.
const ENV_PREFIX: &str = "APP__";

pub fn figment(path: Option<&Path>) -> Figment {
    let mut figment = Figment::from(Serialized::defaults(MigrateSchemasConfig::default()));
    if let Some(path) = path {
        figment = figment.merge(Yaml::file(path));
    }
    figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
}

/// # Errors
///
/// Returns an error if the file does not exist or the merged configuration
/// does not deserialize.
pub fn load(path: Option<&Path>) -> Result<MigrateSchemasConfig> {
    if let Some(path) = path
        && !path.is_file()
    {
        anyhow::bail!("config file does not exist: {}", path.display());
    }

    figment(path)
        .extract()
        .context("failed to load migrate-schemas configuration")
}

/// # Errors
///
/// Returns an error if serialization fails.
pub fn to_yaml(config: &MigrateSchemasConfig) -> Result<String> {
    serde_saphyr::to_string(config).context("failed to render configuration as YAML")
}
