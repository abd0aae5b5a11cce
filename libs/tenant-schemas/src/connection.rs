//! Schema-scoped connection: which schema(s) the session currently sees.
//!
//! Only one schema binding is active at a time. A tenant binding either hides
//! the shared schema or appends it to the resolution path.

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use sea_orm::DbErr;
use thiserror::Error;

use crate::directory::Tenant;

#[allow(clippy::expect_used)]
static SQL_IDENTIFIER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[_a-zA-Z][_a-zA-Z0-9]{0,62}$").expect("valid identifier regex"));

/// Whether the shared schema is visible while a tenant is bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SharedSchema {
    Hidden,
    Visible,
}

/// The schema binding currently in effect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActiveSchema {
    Public,
    Tenant {
        schema_name: String,
        shared: SharedSchema,
    },
}

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("invalid schema name '{0}'")]
    InvalidSchemaName(String),

    #[cfg(feature = "pg")]
    #[error(transparent)]
    Sqlx(#[from] sea_orm::sqlx::Error),

    #[error(transparent)]
    Db(#[from] DbErr),
}

/// Returns `true` if `name` is usable as an unescaped SQL identifier.
#[must_use]
pub fn is_valid_identifier(name: &str) -> bool {
    SQL_IDENTIFIER_RE.is_match(name)
}

/// # Errors
///
/// Returns `ConnectionError::InvalidSchemaName` if `name` is not a valid SQL identifier.
pub fn validate_schema_name(name: &str) -> Result<(), ConnectionError> {
    if is_valid_identifier(name) {
        Ok(())
    } else {
        Err(ConnectionError::InvalidSchemaName(name.to_owned()))
    }
}

/// A connection whose visible schemas can be rebound.
#[async_trait]
pub trait SchemaConnection: Send + Sync {
    /// Bind the connection to `tenant`'s schema.
    ///
    /// # Errors
    ///
    /// Returns an error if the schema name is invalid or the rebinding fails.
    async fn set_tenant(&self, tenant: &Tenant, shared: SharedSchema)
    -> Result<(), ConnectionError>;

    /// Bind the connection to the shared (public) schema only.
    ///
    /// # Errors
    ///
    /// Returns an error if the rebinding fails.
    async fn set_schema_to_public(&self) -> Result<(), ConnectionError>;

    fn active_schema(&self) -> ActiveSchema;
}

#[cfg(feature = "pg")]
pub use pg::PgSchemaConnection;

#[cfg(feature = "pg")]
mod pg {
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use sea_orm::sqlx::postgres::PgPoolOptions;
    use sea_orm::{ConnectionTrait, DatabaseBackend, DatabaseConnection, SqlxPostgresConnector, Statement};
    use tracing::debug;

    use super::{ActiveSchema, ConnectionError, SchemaConnection, SharedSchema, validate_schema_name};
    use crate::directory::Tenant;

    /// Postgres connection rebinding `search_path`.
    ///
    /// Backed by a pool of exactly one connection that is never recycled, so
    /// every statement (including those issued by the migrator and the tenant
    /// directory through [`PgSchemaConnection::database`]) runs in the session
    /// whose `search_path` was set last.
    pub struct PgSchemaConnection {
        conn: DatabaseConnection,
        public_schema: String,
        active: Mutex<ActiveSchema>,
    }

    impl PgSchemaConnection {
        /// Connect and bind to the public schema.
        ///
        /// # Errors
        ///
        /// Returns an error if `public_schema` is invalid or the connection fails.
        pub async fn connect(dsn: &str, public_schema: &str) -> Result<Self, ConnectionError> {
            validate_schema_name(public_schema)?;

            let pool = PgPoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect(dsn)
                .await?;

            let this = Self {
                conn: SqlxPostgresConnector::from_sqlx_postgres_pool(pool),
                public_schema: public_schema.to_owned(),
                active: Mutex::new(ActiveSchema::Public),
            };
            this.set_schema_to_public().await?;
            Ok(this)
        }

        /// The underlying connection, bound to whatever schema is active.
        #[must_use]
        pub fn database(&self) -> DatabaseConnection {
            self.conn.clone()
        }

        async fn set_search_path(&self, schemas: &[&str]) -> Result<(), ConnectionError> {
            let path = schemas
                .iter()
                .map(|s| format!("\"{s}\""))
                .collect::<Vec<_>>()
                .join(", ");
            debug!(search_path = %path, "Setting search_path");
            self.conn
                .execute(Statement::from_string(
                    DatabaseBackend::Postgres,
                    format!("SET search_path TO {path}"),
                ))
                .await?;
            Ok(())
        }
    }

    #[async_trait]
    impl SchemaConnection for PgSchemaConnection {
        async fn set_tenant(
            &self,
            tenant: &Tenant,
            shared: SharedSchema,
        ) -> Result<(), ConnectionError> {
            validate_schema_name(&tenant.schema_name)?;
            match shared {
                SharedSchema::Hidden => self.set_search_path(&[tenant.schema_name.as_str()]).await?,
                SharedSchema::Visible => {
                    self.set_search_path(&[
                        tenant.schema_name.as_str(),
                        self.public_schema.as_str(),
                    ])
                    .await?;
                }
            }
            *self.active.lock() = ActiveSchema::Tenant {
                schema_name: tenant.schema_name.clone(),
                shared,
            };
            Ok(())
        }

        async fn set_schema_to_public(&self) -> Result<(), ConnectionError> {
            self.set_search_path(&[self.public_schema.as_str()]).await?;
            *self.active.lock() = ActiveSchema::Public;
            Ok(())
        }

        fn active_schema(&self) -> ActiveSchema {
            self.active.lock().clone()
        }
    }
}
