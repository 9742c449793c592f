//! Database operation tools.
//!
//! Connecting, switching between databases, cluster-wide database listing, session
//! listing, cluster settings, and database create/drop.

use crate::context::AppContext;
use crate::db::PoolStats;
use crate::error::{DbError, DbResult};
use crate::models::{ConnectionFields, DEFAULT_DATABASE, Row, SslMode};
use crate::tools::MessageOutput;
use crate::tools::sql_validator::{quote_ident, validate_identifier};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::str::FromStr;
use tracing::{info, warn};

const LIST_DATABASES_SQL: &str = "SELECT database_name, owner, primary_region, regions, survival_goal \
     FROM [SHOW DATABASES] ORDER BY database_name";

const CONNECTION_DETAILS_SQL: &str = "SELECT current_database() AS database, current_user() AS user, \
     pg_backend_pid() AS backend_pid";

const ACTIVE_SESSIONS_SQL: &str = "SELECT session_id, user_name, client_address, application_name, \
     active_query_start, last_active_query, session_start, status \
     FROM [SHOW SESSIONS] ORDER BY session_start DESC";

/// Input for the connect_database tool.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct ConnectDatabaseInput {
    /// CockroachDB host
    pub host: String,
    /// Database name (default: "defaultdb")
    #[serde(default)]
    pub database: String,
    /// Port (default: 26257)
    #[serde(default)]
    pub port: Option<u16>,
    /// Username (default: "root")
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// SSL mode: disable (default), allow, prefer, require, verify-ca, verify-full
    #[serde(default)]
    pub sslmode: Option<String>,
    /// Path to the client certificate file
    #[serde(default)]
    pub sslcert: Option<String>,
    /// Path to the client key file
    #[serde(default)]
    pub sslkey: Option<String>,
    /// Path to the CA certificate file
    #[serde(default)]
    pub sslrootcert: Option<String>,
}

impl ConnectDatabaseInput {
    fn into_fields(self) -> DbResult<ConnectionFields> {
        let ssl_mode = self
            .sslmode
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(SslMode::from_str)
            .transpose()?;

        Ok(ConnectionFields {
            host: Some(self.host),
            port: self.port,
            database: Some(self.database),
            username: self.username,
            password: self.password,
            ssl_mode,
            ssl_cert: self.sslcert,
            ssl_key: self.sslkey,
            ssl_root_cert: self.sslrootcert,
        })
    }
}

#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct ConnectOutput {
    pub message: String,
    pub server_version: Option<String>,
    pub current_database: Option<String>,
}

#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct ListDatabasesOutput {
    pub databases: Vec<Row>,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct ConnectionStatusOutput {
    pub connected: bool,
    /// Session details (database, user, backend_pid) when connected
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Row>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pool_stats: Option<PoolStats>,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct SwitchDatabaseInput {
    /// Name of the database to switch to
    pub database: String,
}

#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct SwitchDatabaseOutput {
    pub message: String,
    pub current_database: String,
}

#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct ActiveConnectionsOutput {
    pub connections: Vec<Row>,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct DatabaseSettingsOutput {
    pub settings: Vec<Row>,
    pub count: usize,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct DatabaseNameInput {
    /// Name of the database
    pub database_name: String,
}

/// Handler for database operation tools.
#[derive(Debug, Clone)]
pub struct DatabaseToolHandler {
    ctx: AppContext,
}

impl DatabaseToolHandler {
    pub fn new(ctx: AppContext) -> Self {
        Self { ctx }
    }

    /// Create (or reuse) the pool for the configured target and check it answers.
    pub async fn connect(&self) -> DbResult<ConnectOutput> {
        let pool = self.ctx.pool().await?;
        self.check_connection(&pool).await
    }

    /// Rebind the pool to an explicitly supplied target.
    pub async fn connect_database(&self, input: ConnectDatabaseInput) -> DbResult<ConnectOutput> {
        let descriptor = input.into_fields()?.resolve()?;
        info!(url = %descriptor.masked_url(), "Connecting to new target");
        let pool = self.ctx.pools.replace_pool(descriptor).await?;
        self.check_connection(&pool).await
    }

    async fn check_connection(&self, pool: &PgPool) -> DbResult<ConnectOutput> {
        let version = self
            .ctx
            .executor
            .fetch(pool, "SELECT version() AS version", &[])
            .await?
            .first_string("version");
        let database = self
            .ctx
            .executor
            .fetch(pool, "SELECT current_database() AS current_database", &[])
            .await?
            .first_string("current_database");

        if let Some(db) = &database {
            self.ctx.pools.set_current_database(db.clone()).await;
        }
        let dsn = self
            .ctx
            .pools
            .descriptor()
            .await
            .map(|d| d.masked_url())
            .unwrap_or_default();

        info!(database = ?database, "Connected to CockroachDB");
        Ok(ConnectOutput {
            message: format!("Connected to CockroachDB with DSN: {}", dsn),
            server_version: version,
            current_database: database,
        })
    }

    pub async fn list_databases(&self) -> DbResult<ListDatabasesOutput> {
        let result = self.ctx.fetch(LIST_DATABASES_SQL, &[]).await?;
        let count = result.row_count();
        Ok(ListDatabasesOutput {
            databases: result.into_rows(),
            count,
        })
    }

    /// Report on the live pool. Never creates one.
    pub async fn connection_status(&self) -> DbResult<ConnectionStatusOutput> {
        let Some(pool) = self.ctx.pools.live_pool().await else {
            return Ok(ConnectionStatusOutput {
                connected: false,
                details: None,
                pool_stats: None,
            });
        };

        let result = self
            .ctx
            .executor
            .fetch(&pool, CONNECTION_DETAILS_SQL, &[])
            .await
            .inspect_err(|e| warn!(error = %e, "Connection status check failed"))?;
        Ok(ConnectionStatusOutput {
            connected: true,
            details: result.rows.into_iter().next(),
            pool_stats: self.ctx.pools.stats().await,
        })
    }

    pub async fn switch_database(&self, input: SwitchDatabaseInput) -> DbResult<SwitchDatabaseOutput> {
        let database = validate_identifier("Database", &input.database)?.to_string();
        self.switch_to(&database).await?;
        Ok(SwitchDatabaseOutput {
            message: format!("Switched to database: {}", database),
            current_database: database,
        })
    }

    async fn switch_to(&self, database: &str) -> DbResult<()> {
        let current = self
            .ctx
            .pools
            .descriptor()
            .await
            .ok_or_else(|| DbError::not_connected("no connection has been configured"))?;
        let descriptor = current.with_database(database)?;
        info!(database = %database, "Switching database");
        self.ctx.pools.replace_pool(descriptor).await?;
        Ok(())
    }

    pub async fn active_connections(&self) -> DbResult<ActiveConnectionsOutput> {
        let result = self.ctx.fetch(ACTIVE_SESSIONS_SQL, &[]).await?;
        let count = result.row_count();
        Ok(ActiveConnectionsOutput {
            connections: result.into_rows(),
            count,
        })
    }

    pub async fn database_settings(&self) -> DbResult<DatabaseSettingsOutput> {
        let result = self.ctx.fetch("SHOW ALL CLUSTER SETTINGS", &[]).await?;
        let count = result.row_count();
        Ok(DatabaseSettingsOutput {
            settings: result.into_rows(),
            count,
        })
    }

    pub async fn create_database(&self, input: DatabaseNameInput) -> DbResult<MessageOutput> {
        let name = validate_identifier("Database", &input.database_name)?;
        self.ctx.execute(&create_database_sql(name)).await?;
        info!(database = %name, "Database created");
        Ok(MessageOutput::new(format!("Database '{}' created.", name)))
    }

    /// Drop a database. `defaultdb` is refused before the pool is touched. When the target
    /// is the database the server is bound to, or will bind to on first use, the pool moves
    /// to `defaultdb` first.
    ///
    /// The name is quoted as given, the same way `create_database` quotes it.
    pub async fn drop_database(&self, input: DatabaseNameInput) -> DbResult<MessageOutput> {
        let name = validate_identifier("Database", &input.database_name)?;
        if name.eq_ignore_ascii_case(DEFAULT_DATABASE) {
            return Err(DbError::invalid_input("Cannot drop the default database."));
        }

        let bound = self
            .ctx
            .pools
            .descriptor()
            .await
            .map(|d| d.database().to_owned());
        if bound.is_some_and(|db| db.eq_ignore_ascii_case(name)) {
            info!(database = %name, "Dropping the active database; switching to defaultdb first");
            self.switch_to(DEFAULT_DATABASE).await?;
        }

        self.ctx.execute(&drop_database_sql(name)).await?;
        info!(database = %name, "Database dropped");
        Ok(MessageOutput::new(format!("Database '{}' dropped.", name)))
    }
}

fn create_database_sql(name: &str) -> String {
    format!("CREATE DATABASE IF NOT EXISTS {}", quote_ident(name))
}

fn drop_database_sql(name: &str) -> String {
    format!("DROP DATABASE IF EXISTS {} CASCADE", quote_ident(name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_and_drop_quote_the_same_name() {
        assert_eq!(create_database_sql("Foo"), r#"CREATE DATABASE IF NOT EXISTS "Foo""#);
        assert_eq!(drop_database_sql("Foo"), r#"DROP DATABASE IF EXISTS "Foo" CASCADE"#);
        assert_eq!(drop_database_sql("bank"), r#"DROP DATABASE IF EXISTS "bank" CASCADE"#);
    }

    fn input(json: serde_json::Value) -> ConnectDatabaseInput {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn test_connect_database_input_defaults() {
        let descriptor = input(serde_json::json!({"host": "crdb.internal"}))
            .into_fields()
            .unwrap()
            .resolve()
            .unwrap();
        assert_eq!(descriptor.host(), "crdb.internal");
        assert_eq!(descriptor.port(), 26257);
        assert_eq!(descriptor.database(), "defaultdb");
        assert_eq!(descriptor.username(), "root");
        assert!(descriptor.ssl_mode().is_disabled());
    }

    #[test]
    fn test_connect_database_input_full() {
        let descriptor = input(serde_json::json!({
            "host": "10.0.0.5",
            "database": "bank",
            "port": 26258,
            "username": "maxroach",
            "password": "s3cret",
            "sslmode": "verify-full",
            "sslrootcert": "/certs/ca.crt"
        }))
        .into_fields()
        .unwrap()
        .resolve()
        .unwrap();
        assert_eq!(descriptor.database(), "bank");
        assert_eq!(descriptor.port(), 26258);
        assert_eq!(descriptor.ssl_mode(), SslMode::VerifyFull);
        assert!(descriptor.url().contains("sslrootcert="));
        assert!(!descriptor.masked_url().contains("s3cret"));
    }

    #[test]
    fn test_connect_database_rejects_bad_sslmode() {
        let err = input(serde_json::json!({"host": "h", "sslmode": "sometimes"}))
            .into_fields()
            .unwrap_err();
        assert!(matches!(err, DbError::InvalidInput { .. }));
    }

    #[test]
    fn test_empty_sslmode_means_default() {
        let fields = input(serde_json::json!({"host": "h", "sslmode": ""}))
            .into_fields()
            .unwrap();
        assert!(fields.ssl_mode.is_none());
    }
}
