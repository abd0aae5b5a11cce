#![allow(clippy::unwrap_used, clippy::expect_used)]
#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use sea_orm::DbErr;
use tenant_schemas::{
    ActiveSchema, AppsConfig, CacheScope, ConnectionError, DirectoryError, ManagedApps,
    MigrateOptions, MigrationError, MigrationReport, MigrationSource, Migrator, SchemaConnection,
    SchemaMigrations, SharedSchema, Tenant, TenantDirectory, app_label,
};
use tracing_subscriber::layer::SubscriberExt;

/// Everything the orchestrator asked its collaborators to do, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    SetPublic,
    SetTenant(String, SharedSchema),
    ListTenants(ActiveSchema),
    GetTenant(String, ActiveSchema),
    Execute {
        schema: ActiveSchema,
        /// Installed apps the managed-app signal left unskipped.
        migrated: Vec<String>,
        /// Whether the "dependencies resolved" marker was still set.
        marker_was_set: bool,
    },
    Invalidate(CacheScope),
}

pub type Journal = Arc<Mutex<Vec<Call>>>;

pub struct FakeConnection {
    journal: Journal,
    active: Mutex<ActiveSchema>,
}

#[async_trait]
impl SchemaConnection for FakeConnection {
    async fn set_tenant(
        &self,
        tenant: &Tenant,
        shared: SharedSchema,
    ) -> Result<(), ConnectionError> {
        self.journal
            .lock()
            .unwrap()
            .push(Call::SetTenant(tenant.schema_name.clone(), shared));
        *self.active.lock().unwrap() = ActiveSchema::Tenant {
            schema_name: tenant.schema_name.clone(),
            shared,
        };
        Ok(())
    }

    async fn set_schema_to_public(&self) -> Result<(), ConnectionError> {
        self.journal.lock().unwrap().push(Call::SetPublic);
        *self.active.lock().unwrap() = ActiveSchema::Public;
        Ok(())
    }

    fn active_schema(&self) -> ActiveSchema {
        self.active.lock().unwrap().clone()
    }
}

pub struct FakeDirectory {
    journal: Journal,
    connection: Arc<FakeConnection>,
    tenants: Vec<Tenant>,
}

#[async_trait]
impl TenantDirectory for FakeDirectory {
    async fn all(&self) -> Result<Vec<Tenant>, DirectoryError> {
        self.journal
            .lock()
            .unwrap()
            .push(Call::ListTenants(self.connection.active_schema()));
        Ok(self.tenants.clone())
    }

    async fn get(&self, schema_name: &str) -> Result<Option<Tenant>, DirectoryError> {
        self.journal.lock().unwrap().push(Call::GetTenant(
            schema_name.to_owned(),
            self.connection.active_schema(),
        ));
        Ok(self
            .tenants
            .iter()
            .find(|t| t.schema_name == schema_name)
            .cloned())
    }
}

pub struct FakeMigrator {
    journal: Journal,
    connection: Arc<FakeConnection>,
    installed_apps: Vec<String>,
    marker: Mutex<bool>,
    fail_on: Option<String>,
    /// (bound schema, app, module its migrations would be loaded from)
    resolved: Mutex<Vec<(ActiveSchema, String, String)>>,
}

impl FakeMigrator {
    pub fn resolved(&self) -> Vec<(ActiveSchema, String, String)> {
        self.resolved.lock().unwrap().clone()
    }
}

#[async_trait]
impl Migrator for FakeMigrator {
    async fn execute(
        &self,
        managed: &ManagedApps,
        options: &MigrateOptions,
    ) -> Result<MigrationReport, MigrationError> {
        let schema = self.connection.active_schema();
        let migrated: Vec<String> = self
            .installed_apps
            .iter()
            .filter(|app| !managed.is_skipped(app))
            .filter(|app| {
                options
                    .app_label
                    .as_deref()
                    .is_none_or(|only| only == app_label(app))
            })
            .cloned()
            .collect();
        let marker_was_set = std::mem::replace(&mut *self.marker.lock().unwrap(), true);

        for app in &migrated {
            let module = match managed.source(app) {
                Some(MigrationSource::Module(module)) => module.clone(),
                _ => app_label(app).to_owned(),
            };
            self.resolved
                .lock()
                .unwrap()
                .push((schema.clone(), app.clone(), module));
        }

        self.journal.lock().unwrap().push(Call::Execute {
            schema: schema.clone(),
            migrated: migrated.clone(),
            marker_was_set,
        });

        if let ActiveSchema::Tenant { schema_name, .. } = &schema
            && self.fail_on.as_deref() == Some(schema_name.as_str())
        {
            return Err(MigrationError::MigrationFailed {
                module: "orders".to_owned(),
                migration: "m001_initial".to_owned(),
                source: DbErr::Custom("relation already exists".to_owned()),
            });
        }

        let mut report = MigrationReport::default();
        for app in migrated {
            report.applied += 1;
            report
                .applied_names
                .insert(app_label(&app).to_owned(), vec!["m001_initial".to_owned()]);
        }
        Ok(report)
    }

    fn invalidate(&self, scope: CacheScope) {
        if matches!(scope, CacheScope::TenantMarker | CacheScope::All) {
            *self.marker.lock().unwrap() = false;
        }
        self.journal.lock().unwrap().push(Call::Invalidate(scope));
    }
}

pub fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| (*s).to_owned()).collect()
}

pub fn apps(installed: &[&str], shared: &[&str], tenant: &[&str]) -> AppsConfig {
    AppsConfig {
        installed_apps: strings(installed),
        shared_apps: strings(shared),
        tenant_apps: strings(tenant),
    }
}

/// Orchestrator wired to recording fakes.
pub struct Harness {
    pub journal: Journal,
    pub migrator: Arc<FakeMigrator>,
    pub migrations: SchemaMigrations,
}

impl Harness {
    pub fn new(apps: AppsConfig, tenants: &[&str]) -> Self {
        Self::build(apps, tenants, None)
    }

    /// Same as [`Harness::new`], but migrating `schema` fails.
    pub fn failing_on(apps: AppsConfig, tenants: &[&str], schema: &str) -> Self {
        Self::build(apps, tenants, Some(schema.to_owned()))
    }

    fn build(apps: AppsConfig, tenants: &[&str], fail_on: Option<String>) -> Self {
        let journal = Journal::default();
        let connection = Arc::new(FakeConnection {
            journal: Arc::clone(&journal),
            active: Mutex::new(ActiveSchema::Public),
        });
        let directory = Arc::new(FakeDirectory {
            journal: Arc::clone(&journal),
            connection: Arc::clone(&connection),
            tenants: tenants.iter().map(|t| Tenant::new(*t)).collect(),
        });
        let migrator = Arc::new(FakeMigrator {
            journal: Arc::clone(&journal),
            connection: Arc::clone(&connection),
            installed_apps: apps.installed_apps.clone(),
            marker: Mutex::new(false),
            fail_on,
            resolved: Mutex::default(),
        });
        let migrations = SchemaMigrations::new(
            apps,
            "public",
            connection,
            directory,
            Arc::clone(&migrator) as Arc<dyn Migrator>,
        );
        Self {
            journal,
            migrator,
            migrations,
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.journal.lock().unwrap().clone()
    }

    /// Only the migrator invocations: (bound schema, migrated apps).
    pub fn executes(&self) -> Vec<(ActiveSchema, Vec<String>)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Execute {
                    schema, migrated, ..
                } => Some((schema, migrated)),
                _ => None,
            })
            .collect()
    }
}

pub fn tenant_step(schema_name: &str, shared: SharedSchema) -> ActiveSchema {
    ActiveSchema::Tenant {
        schema_name: schema_name.to_owned(),
        shared,
    }
}

/// Captures the message of every `INFO` event.
#[derive(Clone, Default)]
pub struct NoticeCapture {
    notices: Arc<Mutex<Vec<String>>>,
}

impl NoticeCapture {
    pub fn notices(&self) -> Vec<String> {
        self.notices.lock().unwrap().clone()
    }
}

impl<S: tracing::Subscriber> tracing_subscriber::Layer<S> for NoticeCapture {
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: tracing_subscriber::layer::Context<'_, S>) {
        if *event.metadata().level() == tracing::Level::INFO {
            let mut visitor = MessageVisitor(String::new());
            event.record(&mut visitor);
            self.notices.lock().unwrap().push(visitor.0);
        }
    }
}

struct MessageVisitor(String);

impl tracing::field::Visit for MessageVisitor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.0 = format!("{value:?}");
        }
    }
}

/// Install a notice-capturing subscriber for the current thread.
///
/// Use with the default current-thread `#[tokio::test]` runtime.
pub fn capture_notices() -> (NoticeCapture, tracing::subscriber::DefaultGuard) {
    let capture = NoticeCapture::default();
    let subscriber = tracing_subscriber::registry().with(capture.clone());
    let guard = tracing::subscriber::set_default(subscriber);
    (capture, guard)
}
