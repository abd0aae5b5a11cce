//! Errors surfaced to the command layer.

use thiserror::Error;

use crate::connection::ConnectionError;
use crate::directory::DirectoryError;
use crate::migrator::MigrationError;

/// Library-local result type.
pub type Result<T> = std::result::Result<T, MigrateSchemasError>;

#[derive(Debug, Error)]
pub enum MigrateSchemasError {
    /// The named schema has no tenant record.
    #[error("no tenant found for schema '{schema_name}'")]
    TenantNotFound { schema_name: String },

    /// Plain migrate was requested against a schema-per-tenant database.
    #[error(
        "migrate has been disabled for database '{database}'. Use migrate-schemas instead. \
         Please read the documentation if you don't know why you shouldn't call migrate directly!"
    )]
    MigrateDisabled { database: String },

    /// `--schema` combined with `--shared`.
    #[error("--schema should only be used with the --tenant switch")]
    SchemaRequiresTenantPass,

    #[error(transparent)]
    Migrator(#[from] MigrationError),

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    Directory(#[from] DirectoryError),
}
