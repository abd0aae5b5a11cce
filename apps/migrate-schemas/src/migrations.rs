//! Migrations shipped with the binary.
//!
//! The `tenants` app owns the tenant table read by the database tenant
//! directory. List it in `shared_apps` so it is created in the public schema.

use sea_orm_migration::prelude::*;
use tenant_schemas::{AppMigrations, TenantsConfig};

/// Label of the built-in tenant table app.
pub const TENANTS_APP: &str = "tenants";

/// Built-in apps for this configuration.
pub fn builtin(tenants: &TenantsConfig) -> Vec<AppMigrations> {
    match tenants {
        TenantsConfig::Database {
            table,
            schema_column,
        } => vec![AppMigrations::new(
            TENANTS_APP,
            vec![Box::new(CreateTenants {
                table: table.clone(),
                schema_column: schema_column.clone(),
            })],
        )],
        TenantsConfig::Static { .. } => Vec::new(),
    }
}

struct CreateTenants {
    table: String,
    schema_column: String,
}

impl MigrationName for CreateTenants {
    fn name(&self) -> &str {
        "m0001_create_tenants"
    }
}

#[async_trait::async_trait]
impl MigrationTrait for CreateTenants {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Alias::new(&self.table))
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Alias::new("id"))
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(Alias::new(&self.schema_column))
                            .string_len(63)
                            .not_null()
                            .unique_key(),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Alias::new(&self.table)).to_owned())
            .await
    }
}
