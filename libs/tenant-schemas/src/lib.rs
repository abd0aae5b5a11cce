#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
//! Schema-per-tenant migration orchestration.
//!
//! Applications are split into shared apps, whose tables live in the public
//! schema, and tenant apps, whose tables live in every tenant schema. An app
//! listed in both is "overridden": it is migrated per tenant with the public
//! schema hidden from the resolution path.
//!
//! # Components
//! - [`apps`]: app labels and shared/tenant classification
//! - [`managed_apps`]: the skip-list the migrator reads, with scoped save/restore
//! - [`migrator`]: the [`Migrator`] contract and a `SeaORM`-backed implementation
//! - [`connection`]: schema rebinding ([`SchemaConnection`])
//! - [`directory`]: tenant enumeration ([`TenantDirectory`])
//! - [`orchestrator`]: the public pass and the per-tenant two-pass run
//!
//! # Features
//! - `pg`: [`PgSchemaConnection`] and Postgres support in the migrator
//! - `sqlite`: `SQLite` support (plain migrate, tests)

pub mod apps;
pub mod config;
pub mod connection;
pub mod directory;
pub mod error;
pub mod managed_apps;
pub mod migrator;
pub mod orchestrator;

pub use apps::{AppClassification, app_label, classify};
pub use config::{AppsConfig, DatabaseConfig, DbEngine, MigrateSchemasConfig, TenantsConfig};
#[cfg(feature = "pg")]
pub use connection::PgSchemaConnection;
pub use connection::{ActiveSchema, ConnectionError, SchemaConnection, SharedSchema};
pub use directory::{
    DbTenantDirectory, DirectoryError, StaticTenantDirectory, Tenant, TenantDirectory,
};
pub use error::{MigrateSchemasError, Result};
pub use managed_apps::{ManagedApps, ManagedAppsScope, MigrationModules, MigrationSource};
pub use migrator::{
    AppMigrations, CacheScope, MigrateOptions, MigrationError, MigrationReport, Migrator,
    SeaOrmMigrator,
};
pub use orchestrator::{SchemaMigrations, SyncTargets, migrate_plain};
