//! Database connection handling
//!
//! This module provides functionality to establish and manage the single
//! database connection a run owns.

use regex::Regex;
use sqlx::{
    mysql::MySqlPoolOptions, postgres::PgPoolOptions, sqlite::SqlitePoolOptions, Executor, MySql,
    Pool, Postgres, Row, Sqlite,
};
use std::time::Duration;

use crate::config::{DatabaseConfig, Driver};
use crate::error::{Error, Result};
use crate::schema::types::ColumnInfo;

/// Enumeration of supported database pools
#[derive(Debug, Clone)]
pub enum DatabasePool {
    Postgres(Pool<Postgres>),
    MySql(Pool<MySql>),
    Sqlite(Pool<Sqlite>),
}

/// A live connection to the target database plus the settings that govern
/// how statements are run against it
#[derive(Debug, Clone)]
pub struct DatabaseConnection {
    pool: DatabasePool,
    schema: Option<String>,
    statement_timeout: Duration,
    already_exists: Regex,
}

impl DatabaseConnection {
    /// Create a new database connection from configuration.
    ///
    /// Failure to reach the server is reported as [`Error::ConnectionFailure`].
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        // One writer per run; statements are strictly sequential.
        let pool_size = config.pool_size.unwrap_or(1);
        let timeout = config.connect_timeout();
        let driver = config.driver()?;

        tracing::debug!(%driver, pool_size, "Connecting to database");

        let pool = match driver {
            Driver::Postgres => DatabasePool::Postgres(
                PgPoolOptions::new()
                    .max_connections(pool_size)
                    .acquire_timeout(timeout)
                    .connect(&config.url)
                    .await
                    .map_err(connection_failure)?,
            ),
            Driver::MySql => DatabasePool::MySql(
                MySqlPoolOptions::new()
                    .max_connections(pool_size)
                    .acquire_timeout(timeout)
                    .connect(&config.url)
                    .await
                    .map_err(connection_failure)?,
            ),
            Driver::Sqlite => DatabasePool::Sqlite(
                SqlitePoolOptions::new()
                    .max_connections(pool_size)
                    .acquire_timeout(timeout)
                    .connect(&config.url)
                    .await
                    .map_err(connection_failure)?,
            ),
        };

        Ok(Self {
            pool,
            schema: config.schema.clone(),
            statement_timeout: config.statement_timeout(),
            already_exists: config.already_exists_regex()?,
        })
    }

    /// Get the schema name configured for the connection
    pub fn get_schema(&self) -> Option<&str> {
        self.schema.as_deref()
    }

    pub fn driver(&self) -> Driver {
        match self.pool {
            DatabasePool::Postgres(_) => Driver::Postgres,
            DatabasePool::MySql(_) => Driver::MySql,
            DatabasePool::Sqlite(_) => Driver::Sqlite,
        }
    }

    pub fn statement_timeout(&self) -> Duration {
        self.statement_timeout
    }

    pub(crate) fn already_exists_pattern(&self) -> &Regex {
        &self.already_exists
    }

    /// Bind placeholder for the `n`th (1-based) query parameter
    pub fn placeholder(&self, n: usize) -> String {
        match self.pool {
            DatabasePool::Postgres(_) => format!("${}", n),
            DatabasePool::MySql(_) | DatabasePool::Sqlite(_) => "?".to_string(),
        }
    }

    /// Execute raw SQL text.
    ///
    /// Uses the unprepared (simple) query path so DDL and statements with
    /// dollar-quoted bodies go through unchanged.
    pub async fn execute(&self, sql: &str) -> std::result::Result<(), sqlx::Error> {
        match &self.pool {
            DatabasePool::Postgres(pool) => pool.execute(sql).await.map(|_| ()),
            DatabasePool::MySql(pool) => pool.execute(sql).await.map(|_| ()),
            DatabasePool::Sqlite(pool) => pool.execute(sql).await.map(|_| ()),
        }
    }

    /// Run a query whose rows are all text columns
    pub async fn fetch_strings(
        &self,
        sql: &str,
        params: &[&str],
    ) -> std::result::Result<Vec<Vec<Option<String>>>, sqlx::Error> {
        macro_rules! fetch {
            ($pool:expr) => {{
                let mut query = sqlx::query(sql);
                for param in params {
                    query = query.bind(*param);
                }
                let rows = query.fetch_all($pool).await?;
                rows.iter()
                    .map(|row| {
                        (0..row.len())
                            .map(|i| row.try_get::<Option<String>, _>(i))
                            .collect::<std::result::Result<Vec<_>, _>>()
                    })
                    .collect()
            }};
        }

        match &self.pool {
            DatabasePool::Postgres(pool) => fetch!(pool),
            DatabasePool::MySql(pool) => fetch!(pool),
            DatabasePool::Sqlite(pool) => fetch!(pool),
        }
    }

    /// Run a parameterized statement that returns no rows
    pub async fn execute_with(
        &self,
        sql: &str,
        params: &[&str],
    ) -> std::result::Result<(), sqlx::Error> {
        macro_rules! run {
            ($pool:expr) => {{
                let mut query = sqlx::query(sql);
                for param in params {
                    query = query.bind(*param);
                }
                query.execute($pool).await.map(|_| ())
            }};
        }

        match &self.pool {
            DatabasePool::Postgres(pool) => run!(pool),
            DatabasePool::MySql(pool) => run!(pool),
            DatabasePool::Sqlite(pool) => run!(pool),
        }
    }

    /// Read the columns of `table`, in ordinal order
    pub async fn table_columns(&self, table: &str) -> Result<Vec<ColumnInfo>> {
        let rows = match &self.pool {
            DatabasePool::Postgres(_) | DatabasePool::MySql(_) => {
                let schema = match (&self.pool, self.get_schema()) {
                    (_, Some(schema)) => schema.to_string(),
                    (DatabasePool::Postgres(_), None) => "public".to_string(),
                    _ => self.current_database().await?,
                };
                // information_schema uses domain types sqlx will not decode as text
                let select = match self.pool {
                    DatabasePool::Postgres(_) => {
                        "column_name::text, data_type::text, is_nullable::text"
                    }
                    _ => {
                        "CAST(column_name AS CHAR), CAST(data_type AS CHAR), \
                         CAST(is_nullable AS CHAR)"
                    }
                };
                let sql = format!(
                    "SELECT {} \
                     FROM information_schema.columns \
                     WHERE table_schema = {} AND table_name = {} \
                     ORDER BY ordinal_position",
                    select,
                    self.placeholder(1),
                    self.placeholder(2)
                );
                self.fetch_strings(&sql, &[schema.as_str(), table]).await?
            }
            DatabasePool::Sqlite(_) => {
                let sql = "SELECT name, type, CASE WHEN \"notnull\" = 0 THEN 'YES' ELSE 'NO' END \
                           FROM pragma_table_info(?) ORDER BY cid";
                self.fetch_strings(sql, &[table]).await?
            }
        };

        Ok(rows
            .into_iter()
            .map(|row| {
                let mut cells = row.into_iter();
                let name = cells.next().flatten().unwrap_or_default();
                let data_type = cells.next().flatten().unwrap_or_default().to_lowercase();
                let nullable = cells.next().flatten().map(|v| v == "YES").unwrap_or(true);
                ColumnInfo {
                    name,
                    data_type,
                    nullable,
                }
            })
            .collect())
    }

    async fn current_database(&self) -> Result<String> {
        let rows = self.fetch_strings("SELECT DATABASE()", &[]).await?;
        rows.into_iter()
            .next()
            .and_then(|row| row.into_iter().next().flatten())
            .ok_or_else(|| Error::DatabaseError("No database selected".to_string()))
    }

    /// Close the underlying pool
    pub async fn close(&self) {
        match &self.pool {
            DatabasePool::Postgres(pool) => pool.close().await,
            DatabasePool::MySql(pool) => pool.close().await,
            DatabasePool::Sqlite(pool) => pool.close().await,
        }
    }
}

/// Whether an sqlx error means the server is unreachable rather than that
/// one statement was rejected
pub fn is_connection_error(error: &sqlx::Error) -> bool {
    matches!(
        error,
        sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed
            | sqlx::Error::Protocol(_)
            | sqlx::Error::Configuration(_)
    )
}

fn connection_failure(error: sqlx::Error) -> Error {
    Error::ConnectionFailure(error.to_string())
}
