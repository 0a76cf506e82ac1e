//! SQL executor
//!
//! The runner only talks to the database through [`StatementExecutor`], which
//! reports "object already exists" separately from real failures.

use async_trait::async_trait;
use regex::Regex;
use std::time::Duration;
use thiserror::Error;

use crate::config::Driver;
use crate::db::connection::{is_connection_error, DatabaseConnection};
use crate::error::{Error, Result};

/// SQLSTATE codes for duplicate-object errors (PostgreSQL, then MySQL)
const DUPLICATE_OBJECT_CODES: &[&str] = &[
    "42P04", // duplicate_database
    "42P06", // duplicate_schema
    "42P07", // duplicate_table
    "42701", // duplicate_column
    "42710", // duplicate_object
    "42723", // duplicate_function
    "42S01", // table exists
    "42S21", // duplicate column
];

/// Why a single statement did not succeed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StatementError {
    /// The statement targets an object that is already present
    #[error("{0}")]
    AlreadyExists(String),

    #[error("{0}")]
    Failed(String),

    #[error("statement timed out after {}s", .0.as_secs())]
    TimedOut(Duration),

    /// The database stopped answering; nothing further can run
    #[error("{0}")]
    Connection(String),
}

/// Something that can run migration statements one at a time
#[async_trait]
pub trait StatementExecutor: Send + Sync {
    /// Check that the database is reachable
    async fn probe(&self) -> Result<()>;

    /// Execute a single SQL statement
    async fn execute_statement(&self, sql: &str) -> std::result::Result<(), StatementError>;

    /// Whether `\` escapes characters in every string literal (MySQL)
    fn backslash_escapes(&self) -> bool {
        false
    }
}

#[async_trait]
impl StatementExecutor for DatabaseConnection {
    async fn probe(&self) -> Result<()> {
        match tokio::time::timeout(self.statement_timeout(), self.execute("SELECT 1")).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(Error::ConnectionFailure(e.to_string())),
            Err(_) => Err(Error::ConnectionFailure(format!(
                "probe timed out after {}s",
                self.statement_timeout().as_secs()
            ))),
        }
    }

    async fn execute_statement(&self, sql: &str) -> std::result::Result<(), StatementError> {
        let timeout = self.statement_timeout();
        match tokio::time::timeout(timeout, self.execute(sql)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(classify_error(e, self.already_exists_pattern())),
            Err(_) => Err(StatementError::TimedOut(timeout)),
        }
    }

    fn backslash_escapes(&self) -> bool {
        self.driver() == Driver::MySql
    }
}

/// Map a driver error onto the runner's outcome classes
pub fn classify_error(error: sqlx::Error, already_exists: &Regex) -> StatementError {
    if is_connection_error(&error) {
        return StatementError::Connection(error.to_string());
    }

    let duplicate_code = match &error {
        sqlx::Error::Database(db) => db
            .code()
            .as_deref()
            .map_or(false, |code| DUPLICATE_OBJECT_CODES.contains(&code)),
        _ => false,
    };

    let message = error.to_string();
    if duplicate_code || already_exists.is_match(&message) {
        StatementError::AlreadyExists(message)
    } else {
        StatementError::Failed(message)
    }
}
