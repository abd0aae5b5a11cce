mod config;
mod logging;
mod migrations;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use sea_orm::{Database, DatabaseConnection};
use tenant_schemas::connection::validate_schema_name;
use tenant_schemas::{
    DbEngine, DbTenantDirectory, MigrateOptions, MigrateSchemasConfig, PgSchemaConnection,
    SchemaMigrations, SeaOrmMigrator, StaticTenantDirectory, SyncTargets, TenantDirectory,
    TenantsConfig, migrate_plain,
};

/// Migrate the shared schema and every tenant schema
#[derive(Parser)]
#[command(name = "migrate-schemas")]
#[command(about = "Migrate the shared schema and every tenant schema")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print effective configuration (YAML) and exit
    #[arg(long)]
    print_config: bool,

    /// Log verbosity level (-v debug, -vv debug incl. SQL, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Migrate shared apps in the public schema, then tenant apps in every tenant schema
    MigrateSchemas(MigrateSchemasArgs),
    /// Plain migrate of every installed app (refused for schema-per-tenant databases)
    Migrate(MigrateArgs),
    /// Validate configuration and exit
    Check,
}

#[derive(Args, Default)]
struct MigrateSchemasArgs {
    /// Run the public pass
    #[arg(long)]
    shared: bool,

    /// Run the tenant pass
    #[arg(long)]
    tenant: bool,

    /// Migrate only this tenant schema
    #[arg(short, long)]
    schema: Option<String>,

    #[command(flatten)]
    migrate: MigrateArgs,
}

#[derive(Args, Default)]
struct MigrateArgs {
    /// Record migrations as applied without running them
    #[arg(long)]
    fake: bool,

    /// Show pending migrations without applying them
    #[arg(long)]
    list: bool,

    /// Only migrate this app
    app_label: Option<String>,
}

impl MigrateArgs {
    fn options(self) -> MigrateOptions {
        MigrateOptions {
            fake: self.fake,
            list: self.list,
            app_label: self.app_label,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = config::load(cli.config.as_deref())?;
    logging::init(&config.logging, cli.verbose);

    if cli.print_config {
        println!("Effective configuration:\n{}", config::to_yaml(&config)?);
        return Ok(());
    }

    match cli
        .command
        .unwrap_or_else(|| Commands::MigrateSchemas(MigrateSchemasArgs::default()))
    {
        Commands::MigrateSchemas(args) => migrate_schemas(config, args).await,
        Commands::Migrate(args) => migrate(config, args).await,
        Commands::Check => check_config(&config),
    }
}

fn build_migrator(conn: DatabaseConnection, config: &MigrateSchemasConfig) -> SeaOrmMigrator {
    migrations::builtin(&config.tenants)
        .into_iter()
        .fold(
            SeaOrmMigrator::new(conn, config.apps.installed_apps.clone()),
            SeaOrmMigrator::with_app,
        )
}

async fn migrate_schemas(config: MigrateSchemasConfig, args: MigrateSchemasArgs) -> Result<()> {
    let targets = SyncTargets::resolve(
        args.shared,
        args.tenant,
        args.schema,
        &config.public_schema_name,
    )?;

    if config.database.engine == DbEngine::Sqlite {
        anyhow::bail!(
            "database '{}' has no schemas; use `migrate` instead",
            config.database.name
        );
    }

    let connection = Arc::new(
        PgSchemaConnection::connect(&config.database.dsn, &config.public_schema_name).await?,
    );
    let db = connection.database();
    let migrator = build_migrator(db.clone(), &config);

    let directory: Arc<dyn TenantDirectory> = match &config.tenants {
        TenantsConfig::Database {
            table,
            schema_column,
        } => Arc::new(DbTenantDirectory::new(
            db,
            table.clone(),
            schema_column.clone(),
        )?),
        TenantsConfig::Static { .. } => {
            Arc::new(StaticTenantDirectory::new(config.tenants.static_tenants()))
        }
    };

    let mut managed = config.managed_apps();
    SchemaMigrations::new(
        config.apps.clone(),
        config.public_schema_name.clone(),
        connection,
        directory,
        Arc::new(migrator),
    )
    .with_options(args.migrate.options())
    .run(&mut managed, &targets)
    .await?;

    tracing::info!("Schema migration finished");
    Ok(())
}

/// Connection for a plain migrate. Postgres is bound to the public schema.
async fn plain_connection(config: &MigrateSchemasConfig) -> Result<DatabaseConnection> {
    let conn = match config.database.engine {
        // migrate_plain refuses schema-per-tenant databases before any statement runs.
        DbEngine::TenantSchemas => DatabaseConnection::Disconnected,
        DbEngine::Postgres => {
            PgSchemaConnection::connect(&config.database.dsn, &config.public_schema_name)
                .await?
                .database()
        }
        DbEngine::Sqlite => Database::connect(config.database.dsn.as_str()).await?,
    };
    Ok(conn)
}

async fn migrate(config: MigrateSchemasConfig, args: MigrateArgs) -> Result<()> {
    let conn = plain_connection(&config).await?;
    let migrator = build_migrator(conn, &config);

    let managed = config.managed_apps();
    let report = migrate_plain(
        &migrator,
        &managed,
        &args.options(),
        &config.database.name,
        config.database.engine,
    )
    .await?;

    for (app, pending) in &report.pending {
        for name in pending {
            println!("{app}: {name}");
        }
    }
    tracing::info!(
        applied = report.applied,
        skipped = report.skipped,
        "Migrate finished"
    );
    Ok(())
}

fn check_config(config: &MigrateSchemasConfig) -> Result<()> {
    tracing::info!("Checking configuration...");

    validate_schema_name(&config.public_schema_name)?;
    for tenant in config.tenants.static_tenants() {
        validate_schema_name(&tenant.schema_name)?;
    }

    println!("Configuration is valid");
    println!("{}", config::to_yaml(config)?);
    Ok(())
}
