//! `SeaORM` migration runner.
//!
//! Executes application-provided migrations using a **per-application**
//! migration history table, created in the schema that is first on the bound
//! connection's search path. Running the same migrator against every tenant
//! schema in turn therefore gives each tenant its own history.
//!
//! # Per-Application Migration Tables
//!
//! Each application gets a table named `tenant_migrations__<label>__<hash8>`,
//! where `<hash8>` is an 8-character hex hash of the label via `xxh3_64`.
//!
//! Examples:
//! - Label "billing" → `tenant_migrations__billing__<hash8>`
//!
//! # Dependency Cache
//!
//! Two things are memoized between runs:
//! - per-module plans (duplicate-checked, name-sorted migration order), which
//!   do not depend on the bound schema;
//! - per-application history (which migrations are applied), which does.
//!   History is only trusted while the "dependencies resolved" marker is set;
//!   clearing the marker with [`CacheScope::TenantMarker`] makes the next run
//!   reload it from the newly bound schema.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use sea_orm::{
    ConnectionTrait, DatabaseBackend, DatabaseConnection, ExecResult, FromQueryResult, Statement,
    TransactionTrait,
};
use sea_orm_migration::MigrationTrait;
use tracing::{debug, info, warn};
use xxhash_rust::xxh3::xxh3_64;

use super::{CacheScope, MigrateOptions, MigrationError, MigrationReport, Migrator};
use crate::apps::app_label;
use crate::managed_apps::{ManagedApps, MigrationSource};

/// Migrations provided by one module.
pub struct AppMigrations {
    module: String,
    migrations: Vec<Box<dyn MigrationTrait>>,
}

impl AppMigrations {
    /// `module` is normally the owning application's label.
    pub fn new(module: impl Into<String>, migrations: Vec<Box<dyn MigrationTrait>>) -> Self {
        Self {
            module: module.into(),
            migrations,
        }
    }
}

/// Internal model for querying migration history.
#[derive(Debug, FromQueryResult)]
struct MigrationRecord {
    version: String,
}

#[derive(Debug, Default)]
struct DependencyCache {
    /// module -> indices into its migrations, sorted by name
    plans: HashMap<String, Arc<Vec<usize>>>,
    dependencies_resolved: bool,
    /// app label -> applied migration names in the bound schema
    history: HashMap<String, HashSet<String>>,
}

/// [`Migrator`] over a `SeaORM` connection.
pub struct SeaOrmMigrator {
    conn: DatabaseConnection,
    installed_apps: Vec<String>,
    modules: HashMap<String, Vec<Box<dyn MigrationTrait>>>,
    cache: Mutex<DependencyCache>,
}

impl SeaOrmMigrator {
    /// Apps are migrated in `installed_apps` order.
    #[must_use]
    pub fn new(conn: DatabaseConnection, installed_apps: Vec<String>) -> Self {
        Self {
            conn,
            installed_apps,
            modules: HashMap::new(),
            cache: Mutex::new(DependencyCache::default()),
        }
    }

    /// Register a module's migrations.
    #[must_use]
    pub fn with_app(mut self, app: AppMigrations) -> Self {
        if self.modules.contains_key(&app.module) {
            warn!(module = %app.module, "Replacing previously registered migrations");
        }
        self.modules.insert(app.module, app.migrations);
        self
    }

    fn begin_resolution(&self) {
        let mut cache = self.cache.lock();
        if !cache.dependencies_resolved {
            debug!("Resolving migration history for the bound schema");
            cache.history.clear();
            cache.dependencies_resolved = true;
        }
    }

    fn plan(
        &self,
        module: &str,
        migrations: &[Box<dyn MigrationTrait>],
    ) -> Result<Arc<Vec<usize>>, MigrationError> {
        if let Some(plan) = self.cache.lock().plans.get(module) {
            return Ok(Arc::clone(plan));
        }

        // Reject duplicate migration names early (deterministic + idempotent)
        let mut seen = HashSet::new();
        for m in migrations {
            if !seen.insert(m.name()) {
                return Err(MigrationError::DuplicateMigrationName {
                    module: module.to_owned(),
                    name: m.name().to_owned(),
                });
            }
        }

        let mut order: Vec<usize> = (0..migrations.len()).collect();
        order.sort_by(|&a, &b| migrations[a].name().cmp(migrations[b].name()));
        let plan = Arc::new(order);

        self.cache
            .lock()
            .plans
            .insert(module.to_owned(), Arc::clone(&plan));
        Ok(plan)
    }

    /// Applied migrations for `label`, from cache or from the bound schema.
    ///
    /// With `create == false` a missing history table reads as "nothing
    /// applied" and nothing is cached.
    async fn history(
        &self,
        label: &str,
        table_name: &str,
        create: bool,
    ) -> Result<HashSet<String>, MigrationError> {
        let cached = self.cache.lock().history.get(label).cloned();
        if let Some(applied) = cached {
            return Ok(applied);
        }

        if create {
            ensure_migration_table(&self.conn, table_name, label).await?;
        } else if !migration_table_exists(&self.conn, table_name, label).await? {
            return Ok(HashSet::new());
        }

        let applied = get_applied_migrations(&self.conn, table_name, label).await?;
        self.cache
            .lock()
            .history
            .insert(label.to_owned(), applied.clone());
        Ok(applied)
    }

    async fn migrate_app(
        &self,
        label: &str,
        module: &str,
        migrations: &[Box<dyn MigrationTrait>],
        options: &MigrateOptions,
        report: &mut MigrationReport,
    ) -> Result<(), MigrationError> {
        if migrations.is_empty() {
            debug!(module = label, "No migrations to run");
            return Ok(());
        }

        let plan = self.plan(module, migrations)?;
        let table_name = migration_table_name(label);

        if options.list {
            let applied = self.history(label, &table_name, false).await?;
            let pending: Vec<String> = plan
                .iter()
                .map(|&i| migrations[i].name())
                .filter(|name| !applied.contains(*name))
                .map(ToOwned::to_owned)
                .collect();
            info!(module = label, pending = pending.len(), "Pending migrations");
            report.pending.insert(label.to_owned(), pending);
            return Ok(());
        }

        let applied = self.history(label, &table_name, true).await?;

        for &idx in plan.iter() {
            let migration = &migrations[idx];
            let name = migration.name().to_owned();

            if applied.contains(&name) {
                debug!(
                    module = label,
                    migration = %name,
                    "Migration already applied, skipping"
                );
                report.skipped += 1;
                continue;
            }

            if options.fake {
                info!(module = label, migration = %name, "Faking migration");
                record_migration(&self.conn, &table_name, label, &name).await?;
            } else {
                info!(module = label, migration = %name, "Applying migration");
                apply_migration(&self.conn, &table_name, label, migration.as_ref()).await?;
            }

            self.cache
                .lock()
                .history
                .entry(label.to_owned())
                .or_default()
                .insert(name.clone());

            report.applied += 1;
            report
                .applied_names
                .entry(label.to_owned())
                .or_default()
                .push(name);
        }

        Ok(())
    }
}

#[async_trait]
impl Migrator for SeaOrmMigrator {
    async fn execute(
        &self,
        managed: &ManagedApps,
        options: &MigrateOptions,
    ) -> Result<MigrationReport, MigrationError> {
        self.begin_resolution();

        let mut report = MigrationReport::default();

        for app in &self.installed_apps {
            let label = app_label(app);
            if options
                .app_label
                .as_deref()
                .is_some_and(|only| only != label)
            {
                continue;
            }

            let module = match managed.source(label) {
                Some(MigrationSource::Ignore) => {
                    debug!(module = label, "App is not managed in this pass, skipping");
                    continue;
                }
                Some(MigrationSource::Module(module)) => {
                    if !self.modules.contains_key(module) {
                        return Err(MigrationError::UnknownMigrationModule {
                            app: label.to_owned(),
                            module: module.clone(),
                        });
                    }
                    module.as_str()
                }
                None => label,
            };

            let Some(migrations) = self.modules.get(module) else {
                debug!(module = label, "App has no migrations");
                continue;
            };

            self.migrate_app(label, module, migrations, options, &mut report)
                .await?;
        }

        info!(
            applied = report.applied,
            skipped = report.skipped,
            "Migration run complete"
        );

        Ok(report)
    }

    fn invalidate(&self, scope: CacheScope) {
        let mut cache = self.cache.lock();
        match scope {
            CacheScope::App(label) => {
                cache.plans.remove(&label);
                cache.history.remove(&label);
            }
            CacheScope::TenantMarker => cache.dependencies_resolved = false,
            CacheScope::All => *cache = DependencyCache::default(),
        }
    }
}

/// Sanitize an application label into a safe identifier fragment.
///
/// Rules:
/// - Allowed: `[a-zA-Z0-9_]`
/// - Everything else becomes `_`
fn sanitize_label(name: &str) -> String {
    let out: String = name
        .chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '_' => c,
            _ => '_',
        })
        .collect();
    if out.is_empty() { "_".to_owned() } else { out }
}

/// Build the per-application migration table name.
///
/// Format: `tenant_migrations__<label>__<hash8>`, capped to the Postgres
/// 63-byte identifier limit. The hash is taken over the ORIGINAL label.
fn migration_table_name(label: &str) -> String {
    const PREFIX: &str = "tenant_migrations__";
    const SEP: &str = "__";
    const HASH_LEN: usize = 8;
    const PG_IDENT_MAX: usize = 63;

    let sanitized = sanitize_label(label);
    let hash = xxh3_64(label.as_bytes());
    let hash8 = format!("{hash:016x}")[..HASH_LEN].to_owned();

    let max_label_len = PG_IDENT_MAX.saturating_sub(PREFIX.len() + SEP.len() + HASH_LEN);
    let label_part = if sanitized.len() > max_label_len {
        &sanitized[..max_label_len]
    } else {
        sanitized.as_str()
    };

    format!("{PREFIX}{label_part}{SEP}{hash8}")
}

/// Create the migration history table for an application if it doesn't exist.
///
/// `SQLite` gets its own DDL; every other backend is Postgres, the only
/// other driver this crate enables.
async fn ensure_migration_table(
    conn: &impl ConnectionTrait,
    table_name: &str,
    label: &str,
) -> Result<(), MigrationError> {
    let backend = conn.get_database_backend();

    let sql = if backend == DatabaseBackend::Sqlite {
        format!(
            r#"
            CREATE TABLE IF NOT EXISTS "{table_name}" (
                version TEXT PRIMARY KEY,
                applied_at TEXT NOT NULL DEFAULT (datetime('now'))
            )
            "#
        )
    } else {
        format!(
            r#"
            CREATE TABLE IF NOT EXISTS "{table_name}" (
                version VARCHAR(255) PRIMARY KEY,
                applied_at TIMESTAMPTZ NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#
        )
    };

    conn.execute(Statement::from_string(backend, sql))
        .await
        .map_err(|e| MigrationError::CreateTable {
            module: label.to_owned(),
            source: e,
        })?;

    Ok(())
}

/// Check for the history table in the bound schema only.
async fn migration_table_exists(
    conn: &impl ConnectionTrait,
    table_name: &str,
    label: &str,
) -> Result<bool, MigrationError> {
    let backend = conn.get_database_backend();
    let query_err = |e| MigrationError::QueryHistory {
        module: label.to_owned(),
        source: e,
    };

    if backend == DatabaseBackend::Sqlite {
        let sql = format!(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='{table_name}'"
        );
        let row = conn
            .query_one(Statement::from_string(backend, sql))
            .await
            .map_err(query_err)?;
        return Ok(row
            .and_then(|r| r.try_get_by_index::<i32>(0).ok())
            .is_some_and(|c| c > 0));
    }

    let sql = format!(
        "SELECT EXISTS (SELECT 1 FROM information_schema.tables \
         WHERE table_schema = current_schema() AND table_name = '{table_name}')"
    );
    let row = conn
        .query_one(Statement::from_string(backend, sql))
        .await
        .map_err(query_err)?;
    Ok(row
        .and_then(|r| r.try_get_by_index::<bool>(0).ok())
        .unwrap_or(false))
}

/// Query all applied migrations for an application.
async fn get_applied_migrations(
    conn: &impl ConnectionTrait,
    table_name: &str,
    label: &str,
) -> Result<HashSet<String>, MigrationError> {
    let backend = conn.get_database_backend();
    let sql = format!(r#"SELECT version FROM "{table_name}""#);

    let records: Vec<MigrationRecord> =
        MigrationRecord::find_by_statement(Statement::from_string(backend, sql))
            .all(conn)
            .await
            .map_err(|e| MigrationError::QueryHistory {
                module: label.to_owned(),
                source: e,
            })?;

    Ok(records.into_iter().map(|r| r.version).collect())
}

/// Record a migration as applied.
async fn record_migration(
    conn: &impl ConnectionTrait,
    table_name: &str,
    label: &str,
    migration_name: &str,
) -> Result<ExecResult, MigrationError> {
    let backend = conn.get_database_backend();
    let sql = format!(r#"INSERT INTO "{table_name}" (version) VALUES ($1)"#);

    conn.execute(Statement::from_sql_and_values(
        backend,
        &sql,
        [migration_name.into()],
    ))
    .await
    .map_err(|e| MigrationError::RecordFailed {
        module: label.to_owned(),
        migration: migration_name.to_owned(),
        source: e,
    })
}

/// Run `up()` and record it inside one transaction.
///
/// Best-effort atomicity: some backends auto-commit DDL.
async fn apply_migration<C>(
    conn: &C,
    table_name: &str,
    label: &str,
    migration: &dyn MigrationTrait,
) -> Result<(), MigrationError>
where
    C: ConnectionTrait + TransactionTrait,
{
    let name = migration.name();
    let failed = |e| MigrationError::MigrationFailed {
        module: label.to_owned(),
        migration: name.to_owned(),
        source: e,
    };

    let txn = conn.begin().await.map_err(failed)?;

    let manager = sea_orm_migration::SchemaManager::new(&txn);
    let res: Result<(), MigrationError> = async {
        migration.up(&manager).await.map_err(failed)?;
        record_migration(&txn, table_name, label, name).await?;
        Ok(())
    }
    .await;

    match res {
        Ok(()) => txn.commit().await.map_err(failed)?,
        Err(err) => {
            _ = txn.rollback().await;
            return Err(err);
        }
    }

    info!(module = label, migration = %name, "Migration applied successfully");
    Ok(())
}
