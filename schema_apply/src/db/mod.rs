//! Database module for schema_apply
//!
//! This module handles the database connection, statement execution and the
//! applied-migrations ledger.

pub mod connection;
pub mod executor;
pub mod ledger;

// Re-export key types
pub use connection::DatabaseConnection;
pub use executor::{StatementError, StatementExecutor};
pub use ledger::{AppliedMigration, HistoryTable, MigrationLedger};
