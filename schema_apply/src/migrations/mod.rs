//! Migrations module for schema_apply
//!
//! This module handles finding migration files, splitting them into
//! statements and applying them in order.

pub mod file;
pub mod runner;
pub mod splitter;

// Re-export key types
pub use file::{FileStore, FsStore, MigrationFile};
pub use runner::{plan, FileReport, FileStatus, MigrationRunner, PlannedFile, RunSummary};
pub use splitter::{split_statements, split_statements_with};
