//! schema_apply: applies ordered SQL migration files to a database
//!
//! Migration files are applied strictly in order, statement by statement.
//! Errors saying an object already exists are treated as harmless so the same
//! set of files can be run repeatedly. An optional history table records
//! applied files, and a verifier checks the resulting schema.

pub mod config;
pub mod db;
pub mod error;
pub mod migrations;
pub mod schema;
pub mod utils;

use std::path::PathBuf;

// Re-export main types for easier access
pub use config::Config;
pub use db::connection::DatabaseConnection;
pub use error::{Error, Result};
pub use migrations::{MigrationRunner, RunSummary};
pub use schema::{SchemaVerifier, VerificationReport};

use db::ledger::{HistoryTable, MigrationLedger};
use migrations::file::{self, FileStore, FsStore, MigrationFile};

/// Resolve configuration and connect to the database
pub async fn init(config_path: Option<&str>) -> Result<SchemaApplyClient> {
    let config = config::load(config_path)?;
    SchemaApplyClient::new(config).await
}

/// Applied/pending state of one migration file
#[derive(Debug, Clone, serde::Serialize)]
pub struct MigrationStatus {
    pub name: String,
    pub applied_at: Option<String>,
    pub checksum_changed: bool,
}

/// The main client for interacting with schema_apply
pub struct SchemaApplyClient {
    config: Config,
    db_connection: DatabaseConnection,
}

impl SchemaApplyClient {
    /// Create a new client from configuration.
    ///
    /// Fails with [`Error::ConnectionFailure`] when the database is unreachable.
    pub async fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let db_connection = DatabaseConnection::connect(&config.database).await?;

        Ok(Self {
            config,
            db_connection,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.db_connection
    }

    /// The files a run covers, in the order they will be applied
    pub fn migration_files(&self, explicit: &[PathBuf]) -> Result<Vec<PathBuf>> {
        file::resolve(&self.config.migrations, explicit)
    }

    fn history_table(&self) -> Result<Option<HistoryTable<'_>>> {
        self.config
            .migrations
            .history_table
            .as_deref()
            .map(|table| HistoryTable::new(&self.db_connection, table))
            .transpose()
    }

    /// Apply migration files to the database
    pub async fn apply_migrations(&self, files: &[PathBuf]) -> Result<RunSummary> {
        let history = self.history_table()?;
        let mut runner = MigrationRunner::new(&self.db_connection, &FsStore);
        if let Some(history) = &history {
            runner = runner.with_ledger(history);
        }

        runner.apply(files).await
    }

    /// Verify the schema against the `[verify]` section
    pub async fn verify_schema(&self) -> Result<VerificationReport> {
        let verify = self.config.verify.as_ref().ok_or_else(|| {
            Error::ConfigError("No [verify] section in configuration".to_string())
        })?;

        SchemaVerifier::new(verify)?
            .verify(&self.db_connection)
            .await
    }

    /// Applied/pending state of each file according to the history table
    pub async fn migration_status(&self, files: &[PathBuf]) -> Result<Vec<MigrationStatus>> {
        let history = self.history_table()?.ok_or_else(|| {
            Error::ConfigError(
                "Migration status needs [migrations].history_table to be set".to_string(),
            )
        })?;

        history.ensure().await?;
        let applied = history.applied().await?;

        Ok(files
            .iter()
            .map(|path| {
                let migration = MigrationFile::new(path);
                let record = applied.get(&migration.id());
                let recorded = record.and_then(|r| r.checksum.as_deref());
                let checksum_changed = match (recorded, FsStore.read(path)) {
                    (Some(recorded), Ok(text)) => recorded != file::checksum(&text),
                    _ => false,
                };

                MigrationStatus {
                    name: migration.name(),
                    applied_at: record.map(|r| r.applied_at.clone()),
                    checksum_changed,
                }
            })
            .collect())
    }

    pub async fn close(&self) {
        self.db_connection.close().await;
    }
}
