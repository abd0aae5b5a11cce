//! Shared/tenant migration orchestration.
//!
//! Runs the migrator against the public schema for shared apps, and against
//! every tenant schema in two passes:
//!
//! 1. overridden apps (in both the shared and tenant lists) with the shared
//!    schema hidden, so they never see or re-create shared-schema objects;
//! 2. tenant-only apps with the shared schema visible, so they can reference
//!    shared tables.
//!
//! The managed-app signal is saved before a run and restored on every exit
//! path. Tenants are processed strictly one at a time; the migrator's
//! dependency marker is cleared before each one.

use std::sync::Arc;

use tracing::{debug, info};

use crate::apps::classify;
use crate::config::{AppsConfig, DbEngine};
use crate::connection::{SchemaConnection, SharedSchema};
use crate::directory::{Tenant, TenantDirectory};
use crate::error::{MigrateSchemasError, Result};
use crate::managed_apps::ManagedApps;
use crate::migrator::{CacheScope, MigrateOptions, MigrationReport, Migrator};

/// Which passes a run performs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncTargets {
    pub public: bool,
    pub tenant: bool,
    /// Restrict the tenant pass to one schema.
    pub schema_name: Option<String>,
}

impl SyncTargets {
    /// Resolve command switches into passes.
    ///
    /// Neither switch means both passes. Naming the public schema selects the
    /// public pass; naming any other schema selects the tenant pass.
    ///
    /// # Errors
    ///
    /// Returns `MigrateSchemasError::SchemaRequiresTenantPass` if a schema is
    /// named together with `shared`.
    pub fn resolve(
        shared: bool,
        tenant: bool,
        schema_name: Option<String>,
        public_schema_name: &str,
    ) -> Result<Self> {
        let (mut public, mut tenant) = if shared || tenant {
            (shared, tenant)
        } else {
            (true, true)
        };

        let schema_name = match schema_name {
            None => None,
            Some(_) if shared => return Err(MigrateSchemasError::SchemaRequiresTenantPass),
            Some(name) if name == public_schema_name => {
                public = true;
                tenant = false;
                None
            }
            Some(name) => {
                public = false;
                tenant = true;
                Some(name)
            }
        };

        Ok(Self {
            public,
            tenant,
            schema_name,
        })
    }
}

/// Drives the migrator across the public schema and the tenant fleet.
pub struct SchemaMigrations {
    apps: AppsConfig,
    public_schema_name: String,
    connection: Arc<dyn SchemaConnection>,
    directory: Arc<dyn TenantDirectory>,
    migrator: Arc<dyn Migrator>,
    options: MigrateOptions,
}

impl SchemaMigrations {
    #[must_use]
    pub fn new(
        apps: AppsConfig,
        public_schema_name: impl Into<String>,
        connection: Arc<dyn SchemaConnection>,
        directory: Arc<dyn TenantDirectory>,
        migrator: Arc<dyn Migrator>,
    ) -> Self {
        Self {
            apps,
            public_schema_name: public_schema_name.into(),
            connection,
            directory,
            migrator,
            options: MigrateOptions::default(),
        }
    }

    /// Options forwarded to every migrator invocation.
    #[must_use]
    pub fn with_options(mut self, options: MigrateOptions) -> Self {
        self.options = options;
        self
    }

    /// Public pass first, then the tenant pass, as selected by `targets`.
    ///
    /// # Errors
    ///
    /// Propagates the first failure; see [`Self::migrate_public_apps`] and
    /// [`Self::migrate_tenant_apps`].
    pub async fn run(&self, managed: &mut ManagedApps, targets: &SyncTargets) -> Result<()> {
        if targets.public {
            self.migrate_public_apps(managed).await?;
        }
        if targets.tenant {
            self.migrate_tenant_apps(managed, targets.schema_name.as_deref())
                .await?;
        }
        Ok(())
    }

    /// Migrate shared apps against the public schema.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be rebound or the migrator fails.
    pub async fn migrate_public_apps(&self, managed: &mut ManagedApps) -> Result<()> {
        let mut managed = managed.scoped();

        let apps = if self.apps.shared_apps.is_empty() {
            &self.apps.installed_apps
        } else {
            &self.apps.shared_apps
        };
        managed.configure(apps, &self.apps.tenant_apps);

        info!("=== Running migrate for schema {}", self.public_schema_name);
        self.connection.set_schema_to_public().await?;
        let report = self.migrator.execute(&managed, &self.options).await?;
        log_report(&self.public_schema_name, &report);

        // Tenant runs must not reuse anything resolved against the public schema.
        self.migrator.invalidate(CacheScope::All);
        Ok(())
    }

    /// Migrate tenant apps for one named schema or for every tenant.
    ///
    /// # Errors
    ///
    /// Returns `MigrateSchemasError::TenantNotFound` if `schema_name` has no
    /// tenant record, or the first directory, connection or migrator failure.
    pub async fn migrate_tenant_apps(
        &self,
        managed: &mut ManagedApps,
        schema_name: Option<&str>,
    ) -> Result<()> {
        let mut managed = managed.scoped();

        let apps = if self.apps.tenant_apps.is_empty() {
            &self.apps.installed_apps
        } else {
            &self.apps.tenant_apps
        };
        managed.configure(apps, &self.apps.shared_apps);

        if let Some(schema_name) = schema_name {
            info!("=== Running migrate for schema: {schema_name}");
            self.connection.set_schema_to_public().await?;
            let tenant = self.directory.get(schema_name).await?.ok_or_else(|| {
                MigrateSchemasError::TenantNotFound {
                    schema_name: schema_name.to_owned(),
                }
            })?;
            self.migrator.invalidate(CacheScope::TenantMarker);
            self.migrate_tenant(&mut managed, &tenant).await?;
            return Ok(());
        }

        self.connection.set_schema_to_public().await?;
        let tenants: Vec<Tenant> = self
            .directory
            .all()
            .await?
            .into_iter()
            .filter(|t| t.schema_name != self.public_schema_name)
            .collect();

        if tenants.is_empty() {
            info!("No tenants found");
        }

        for tenant in &tenants {
            self.migrator.invalidate(CacheScope::TenantMarker);
            info!("=== Running migrate for schema {}", tenant.schema_name);
            self.migrate_tenant(&mut managed, tenant).await?;
        }

        Ok(())
    }

    /// Two-pass migration of one tenant.
    async fn migrate_tenant(&self, managed: &mut ManagedApps, tenant: &Tenant) -> Result<()> {
        let classes = classify(&self.apps.shared_apps, &self.apps.tenant_apps);

        // Drop markers left by the previous tenant's second pass.
        managed.reset(&self.apps.tenant_apps);

        let mut excluded = self.apps.shared_apps.clone();
        excluded.extend(classes.tenant_only.iter().cloned());
        managed.configure(&classes.overridden, &excluded);
        self.run_step(managed, tenant, SharedSchema::Hidden).await?;

        managed.reset(&self.apps.tenant_apps);

        managed.configure(&classes.tenant_only, &classes.overridden);
        self.run_step(managed, tenant, SharedSchema::Visible).await?;

        Ok(())
    }

    async fn run_step(
        &self,
        managed: &ManagedApps,
        tenant: &Tenant,
        shared: SharedSchema,
    ) -> Result<MigrationReport> {
        self.connection.set_tenant(tenant, shared).await?;
        let report = self.migrator.execute(managed, &self.options).await?;
        debug!(schema = %tenant.schema_name, ?shared, "Schema step finished");
        log_report(&tenant.schema_name, &report);
        Ok(report)
    }
}

/// Plain, non-orchestrated migrate: every installed app, current binding.
///
/// # Errors
///
/// Returns `MigrateSchemasError::MigrateDisabled` for schema-per-tenant
/// databases, or the migrator's failure.
pub async fn migrate_plain(
    migrator: &dyn Migrator,
    managed: &ManagedApps,
    options: &MigrateOptions,
    database: &str,
    engine: DbEngine,
) -> Result<MigrationReport> {
    if engine == DbEngine::TenantSchemas {
        return Err(MigrateSchemasError::MigrateDisabled {
            database: database.to_owned(),
        });
    }
    Ok(migrator.execute(managed, options).await?)
}

fn log_report(schema: &str, report: &MigrationReport) {
    info!(
        schema,
        applied = report.applied,
        skipped = report.skipped,
        "Schema migrated"
    );
    for (app, pending) in &report.pending {
        for name in pending {
            info!(schema, module = %app, migration = %name, "Pending");
        }
    }
}
