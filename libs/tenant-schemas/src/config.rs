//! Configuration for schema migrations.

use serde::{Deserialize, Serialize};

use crate::directory::Tenant;
use crate::managed_apps::{ManagedApps, MigrationModules};

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MigrateSchemasConfig {
    pub database: DatabaseConfig,

    /// Name of the shared schema.
    pub public_schema_name: String,

    pub apps: AppsConfig,

    /// Initial managed-app mapping (label -> `ignore` or module name).
    /// Absent means "not configured".
    pub migration_modules: Option<MigrationModules>,

    pub tenants: TenantsConfig,

    pub logging: LoggingConfig,
}

impl Default for MigrateSchemasConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            public_schema_name: "public".to_owned(),
            apps: AppsConfig::default(),
            migration_modules: None,
            tenants: TenantsConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl MigrateSchemasConfig {
    /// The managed-app signal this configuration starts from.
    #[must_use]
    pub fn managed_apps(&self) -> ManagedApps {
        ManagedApps::new(self.migration_modules.clone())
    }
}

/// Installed, shared and tenant application lists.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppsConfig {
    /// Every migratable application, in migration order.
    pub installed_apps: Vec<String>,
    /// Applications whose tables live in the shared schema.
    pub shared_apps: Vec<String>,
    /// Applications whose tables live in every tenant schema.
    pub tenant_apps: Vec<String>,
}

/// Database engine, as far as migrate guarding is concerned.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DbEngine {
    /// Postgres with one schema per tenant; plain migrate is refused.
    #[default]
    TenantSchemas,
    Postgres,
    Sqlite,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DatabaseConfig {
    /// Logical database name used in messages.
    pub name: String,
    pub dsn: String,
    pub engine: DbEngine,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            name: "default".to_owned(),
            dsn: String::new(),
            engine: DbEngine::default(),
        }
    }
}

/// Where tenant records come from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum TenantsConfig {
    /// A table in the shared schema.
    Database {
        #[serde(default = "default_tenant_table")]
        table: String,
        #[serde(default = "default_schema_column")]
        schema_column: String,
    },
    /// A fixed list of schema names.
    Static {
        #[serde(default)]
        schemas: Vec<String>,
    },
}

fn default_tenant_table() -> String {
    "tenants".to_owned()
}

fn default_schema_column() -> String {
    "schema_name".to_owned()
}

impl Default for TenantsConfig {
    fn default() -> Self {
        Self::Database {
            table: default_tenant_table(),
            schema_column: default_schema_column(),
        }
    }
}

impl TenantsConfig {
    /// Tenants of a `static` source, empty otherwise.
    #[must_use]
    pub fn static_tenants(&self) -> Vec<Tenant> {
        match self {
            Self::Static { schemas } => schemas.iter().map(Tenant::new).collect(),
            Self::Database { .. } => Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    pub format: LogFormat,
}
