//! Tenant directory: the registry of tenant schemas.

use async_trait::async_trait;
use sea_orm::{ConnectionTrait, DatabaseConnection, DbErr, FromQueryResult, Statement};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::connection::is_valid_identifier;

/// One tenant, identified by its schema name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tenant {
    pub schema_name: String,
}

impl Tenant {
    pub fn new(schema_name: impl Into<String>) -> Self {
        Self {
            schema_name: schema_name.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("invalid tenant table identifier '{0}'")]
    InvalidTenantTable(String),

    #[error(transparent)]
    Db(#[from] DbErr),
}

/// Lists tenants and looks them up by schema name.
#[async_trait]
pub trait TenantDirectory: Send + Sync {
    /// Every tenant record, including the public pseudo-tenant if one exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be read.
    async fn all(&self) -> Result<Vec<Tenant>, DirectoryError>;

    /// # Errors
    ///
    /// Returns an error if the directory cannot be read. A missing tenant is
    /// `Ok(None)`.
    async fn get(&self, schema_name: &str) -> Result<Option<Tenant>, DirectoryError>;
}

/// Tenants fixed at construction time, enumerated in the given order.
#[derive(Debug, Clone, Default)]
pub struct StaticTenantDirectory {
    tenants: Vec<Tenant>,
}

impl StaticTenantDirectory {
    #[must_use]
    pub fn new(tenants: Vec<Tenant>) -> Self {
        Self { tenants }
    }
}

#[async_trait]
impl TenantDirectory for StaticTenantDirectory {
    async fn all(&self) -> Result<Vec<Tenant>, DirectoryError> {
        Ok(self.tenants.clone())
    }

    async fn get(&self, schema_name: &str) -> Result<Option<Tenant>, DirectoryError> {
        Ok(self
            .tenants
            .iter()
            .find(|t| t.schema_name == schema_name)
            .cloned())
    }
}

#[derive(Debug, FromQueryResult)]
struct TenantRow {
    schema_name: String,
}

/// Tenants read from a table, ordered by schema name.
///
/// The table is resolved through the connection's current search path, so
/// callers bind the connection to the public schema before querying.
pub struct DbTenantDirectory {
    conn: DatabaseConnection,
    table: String,
    schema_column: String,
}

impl DbTenantDirectory {
    /// # Errors
    ///
    /// Returns `DirectoryError::InvalidTenantTable` if the table or column
    /// name is not a plain SQL identifier.
    pub fn new(
        conn: DatabaseConnection,
        table: impl Into<String>,
        schema_column: impl Into<String>,
    ) -> Result<Self, DirectoryError> {
        let table = table.into();
        let schema_column = schema_column.into();
        for ident in [&table, &schema_column] {
            if !is_valid_identifier(ident) {
                return Err(DirectoryError::InvalidTenantTable(ident.clone()));
            }
        }
        Ok(Self {
            conn,
            table,
            schema_column,
        })
    }

    fn select(&self) -> String {
        format!(
            r#"SELECT "{col}" AS schema_name FROM "{table}""#,
            col = self.schema_column,
            table = self.table
        )
    }
}

#[async_trait]
impl TenantDirectory for DbTenantDirectory {
    async fn all(&self) -> Result<Vec<Tenant>, DirectoryError> {
        let backend = self.conn.get_database_backend();
        let sql = format!(r#"{} ORDER BY "{}""#, self.select(), self.schema_column);
        let rows = TenantRow::find_by_statement(Statement::from_string(backend, sql))
            .all(&self.conn)
            .await?;
        Ok(rows.into_iter().map(|r| Tenant::new(r.schema_name)).collect())
    }

    async fn get(&self, schema_name: &str) -> Result<Option<Tenant>, DirectoryError> {
        let backend = self.conn.get_database_backend();
        // `$1` binds on both Postgres and SQLite.
        let sql = format!(r#"{} WHERE "{}" = $1"#, self.select(), self.schema_column);
        let row = TenantRow::find_by_statement(Statement::from_sql_and_values(
            backend,
            &sql,
            [schema_name.into()],
        ))
        .one(&self.conn)
        .await?;
        Ok(row.map(|r| Tenant::new(r.schema_name)))
    }
}
