//! The migration engine seen by the orchestrator.
//!
//! A [`Migrator`] applies pending migrations for every application that the
//! managed-app signal does not skip, against whatever schema the connection
//! is currently bound to. It memoizes per-application state, so callers must
//! [`invalidate`](Migrator::invalidate) it when the bound schema changes.

mod runner;

pub use runner::{AppMigrations, SeaOrmMigrator};

use std::collections::BTreeMap;

use async_trait::async_trait;
use sea_orm::DbErr;
use thiserror::Error;

use crate::managed_apps::ManagedApps;

/// Errors that can occur during migration execution.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// Failed to create the migration history table.
    #[error("failed to create migration table for module '{module}': {source}")]
    CreateTable { module: String, source: DbErr },

    /// Failed to query existing migrations.
    #[error("failed to query migration history for module '{module}': {source}")]
    QueryHistory { module: String, source: DbErr },

    /// A specific migration failed to execute.
    #[error("migration '{migration}' failed for module '{module}': {source}")]
    MigrationFailed {
        module: String,
        migration: String,
        source: DbErr,
    },

    /// Failed to record a migration in the history table.
    #[error("failed to record migration '{migration}' for module '{module}': {source}")]
    RecordFailed {
        module: String,
        migration: String,
        source: DbErr,
    },

    /// Duplicate migration name found in a module's migrations list.
    #[error("duplicate migration name '{name}' for module '{module}'")]
    DuplicateMigrationName { module: String, name: String },

    /// An app's migration source points at a module nothing registered.
    #[error("app '{app}' uses migration module '{module}' which has no registered migrations")]
    UnknownMigrationModule { app: String, module: String },
}

/// Options forwarded from the command layer to every migrator invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrateOptions {
    /// Record pending migrations as applied without running them.
    pub fake: bool,
    /// Report pending migrations without applying anything.
    pub list: bool,
    /// Restrict the run to a single application label.
    pub app_label: Option<String>,
}

/// Result of one migrator invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    /// Number of migrations that were applied (or faked).
    pub applied: usize,
    /// Number of migrations that were skipped (already applied).
    pub skipped: usize,
    /// Applied migration names per application label.
    pub applied_names: BTreeMap<String, Vec<String>>,
    /// Pending migration names per application label (`list` mode only).
    pub pending: BTreeMap<String, Vec<String>>,
}

/// What to drop from the migrator's dependency cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheScope {
    /// One application's plan and history.
    App(String),
    /// The "dependencies resolved" marker: per-schema history is recomputed
    /// on the next run.
    TenantMarker,
    /// Everything.
    All,
}

/// The migration engine.
#[async_trait]
pub trait Migrator: Send + Sync {
    /// Apply pending migrations for every app not skipped by `managed`.
    ///
    /// # Errors
    ///
    /// Returns `Err(MigrationError)` if history cannot be read or written, or
    /// any migration fails. Nothing is retried.
    async fn execute(
        &self,
        managed: &ManagedApps,
        options: &MigrateOptions,
    ) -> Result<MigrationReport, MigrationError>;

    /// Invalidate memoized migration state.
    fn invalidate(&self, scope: CacheScope);
}
