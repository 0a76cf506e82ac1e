//! Applied-migrations ledger
//!
//! An optional history table recording which migration files have been
//! applied, so repeat runs skip them instead of relying on the database
//! rejecting duplicate definitions.

use async_trait::async_trait;
use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::collections::HashMap;

use crate::db::connection::{is_connection_error, DatabaseConnection};
use crate::error::{Error, Result};

static IDENTIFIER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)?$")
        .expect("identifier pattern is valid")
});

/// A row of the history table
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppliedMigration {
    pub migration_id: String,
    pub name: String,
    pub checksum: Option<String>,
    pub applied_at: String,
}

/// Storage for the applied-migrations record
#[async_trait]
pub trait MigrationLedger: Send + Sync {
    /// Create the ledger if it does not exist yet
    async fn ensure(&self) -> Result<()>;

    /// All recorded migrations keyed by migration id
    async fn applied(&self) -> Result<HashMap<String, AppliedMigration>>;

    /// Record a migration as applied
    async fn record(&self, migration_id: &str, name: &str, checksum: &str) -> Result<()>;
}

/// Ledger kept in a table of the target database
pub struct HistoryTable<'a> {
    connection: &'a DatabaseConnection,
    table: String,
}

impl<'a> HistoryTable<'a> {
    pub fn new(connection: &'a DatabaseConnection, table: &str) -> Result<Self> {
        if !IDENTIFIER.is_match(table) {
            return Err(Error::ConfigError(format!(
                "Invalid history table name: {}",
                table
            )));
        }

        Ok(Self {
            connection,
            table: table.to_string(),
        })
    }
}

#[async_trait]
impl<'a> MigrationLedger for HistoryTable<'a> {
    async fn ensure(&self) -> Result<()> {
        let create_table_sql = format!(
            "CREATE TABLE IF NOT EXISTS {} (
                migration_id VARCHAR(255) NOT NULL PRIMARY KEY,
                name VARCHAR(255) NOT NULL,
                checksum VARCHAR(64),
                applied_at VARCHAR(64) NOT NULL
            )",
            self.table
        );

        self.connection
            .execute(&create_table_sql)
            .await
            .map_err(ledger_error)
    }

    async fn applied(&self) -> Result<HashMap<String, AppliedMigration>> {
        let sql = format!(
            "SELECT migration_id, name, checksum, applied_at FROM {} ORDER BY migration_id",
            self.table
        );

        let rows = self
            .connection
            .fetch_strings(&sql, &[])
            .await
            .map_err(ledger_error)?;

        Ok(rows
            .into_iter()
            .filter_map(|row| {
                let mut cells = row.into_iter();
                let migration_id = cells.next().flatten()?;
                let name = cells.next().flatten().unwrap_or_default();
                let checksum = cells.next().flatten();
                let applied_at = cells.next().flatten().unwrap_or_default();
                Some((
                    migration_id.clone(),
                    AppliedMigration {
                        migration_id,
                        name,
                        checksum,
                        applied_at,
                    },
                ))
            })
            .collect())
    }

    async fn record(&self, migration_id: &str, name: &str, checksum: &str) -> Result<()> {
        let sql = format!(
            "INSERT INTO {} (migration_id, name, checksum, applied_at) VALUES ({}, {}, {}, {})",
            self.table,
            self.connection.placeholder(1),
            self.connection.placeholder(2),
            self.connection.placeholder(3),
            self.connection.placeholder(4),
        );
        let applied_at = Utc::now().to_rfc3339();

        self.connection
            .execute_with(&sql, &[migration_id, name, checksum, applied_at.as_str()])
            .await
            .map_err(ledger_error)
    }
}

fn ledger_error(error: sqlx::Error) -> Error {
    if is_connection_error(&error) {
        Error::ConnectionFailure(error.to_string())
    } else {
        Error::DatabaseError(format!("migration history: {}", error))
    }
}
