//! Migration runner
//!
//! Applies migration files strictly in the order given. Each file is split
//! into statements which run one by one with autocommit; there is no
//! transaction and no rollback. Within a file the first real failure stops
//! the remaining statements, and the run moves on to the next file. An
//! unreachable database ends the whole run.

use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::db::executor::{StatementError, StatementExecutor};
use crate::db::ledger::{AppliedMigration, MigrationLedger};
use crate::error::{Error, Result};
use crate::migrations::file::{checksum, FileStore, MigrationFile};
use crate::migrations::splitter::split_statements_with;

/// What happened to one migration file
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FileStatus {
    /// Every statement succeeded or already existed
    Applied,
    /// The file was not found and was skipped
    Missing,
    /// The history table says this file already ran
    AlreadyApplied,
    ReadFailed { error: String },
    /// Statement `statement` (1-based) failed; later statements were not run
    Failed { statement: usize, error: String },
}

/// Per-file outcome counts
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileReport {
    pub name: String,
    pub path: PathBuf,
    #[serde(flatten)]
    pub status: FileStatus,
    pub total: usize,
    pub succeeded: usize,
    pub skipped: usize,
    pub failed: usize,
    pub not_attempted: usize,
    /// Set when the file ran but could not be recorded in the history table
    #[serde(skip_serializing_if = "Option::is_none")]
    pub history_error: Option<String>,
}

impl FileReport {
    fn new(file: &MigrationFile, status: FileStatus) -> Self {
        Self {
            name: file.name(),
            path: file.path.clone(),
            status,
            total: 0,
            succeeded: 0,
            skipped: 0,
            failed: 0,
            not_attempted: 0,
            history_error: None,
        }
    }
}

/// Outcome of a whole run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub files: Vec<FileReport>,
}

impl RunSummary {
    pub fn succeeded(&self) -> usize {
        self.files.iter().map(|f| f.succeeded).sum()
    }

    pub fn skipped(&self) -> usize {
        self.files.iter().map(|f| f.skipped).sum()
    }

    pub fn failed(&self) -> usize {
        self.files.iter().map(|f| f.failed).sum()
    }

    /// Files that ran but are missing from the history table
    pub fn unrecorded(&self) -> usize {
        self.files.iter().filter(|f| f.history_error.is_some()).count()
    }

    /// True when no statement failed in any file and every applied file
    /// was recorded
    pub fn is_success(&self) -> bool {
        self.failed() == 0 && self.unrecorded() == 0
    }

    pub fn count(&self, predicate: impl Fn(&FileStatus) -> bool) -> usize {
        self.files.iter().filter(|f| predicate(&f.status)).count()
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Migration summary:")?;
        for file in &self.files {
            let outcome = match &file.status {
                FileStatus::Applied => match &file.history_error {
                    Some(error) => format!("applied, not recorded: {}", error),
                    None => "applied".to_string(),
                },
                FileStatus::Missing => "missing (skipped)".to_string(),
                FileStatus::AlreadyApplied => "already applied".to_string(),
                FileStatus::ReadFailed { error } => format!("unreadable: {}", error),
                FileStatus::Failed { statement, error } => {
                    format!("failed at statement {}: {}", statement, error)
                }
            };
            writeln!(
                f,
                "  {:<60} {} ({} ok, {} existing, {} failed, {} not run)",
                file.name, outcome, file.succeeded, file.skipped, file.failed, file.not_attempted
            )?;
        }
        writeln!(
            f,
            "Files: {} applied, {} already applied, {} missing, {} failed",
            self.count(|s| matches!(s, FileStatus::Applied)),
            self.count(|s| matches!(s, FileStatus::AlreadyApplied)),
            self.count(|s| matches!(s, FileStatus::Missing)),
            self.count(|s| matches!(s, FileStatus::Failed { .. } | FileStatus::ReadFailed { .. })),
        )?;
        write!(
            f,
            "Statements: {} succeeded, {} already existed, {} failed",
            self.succeeded(),
            self.skipped(),
            self.failed()
        )
    }
}

/// Applies migration files through a [`StatementExecutor`]
pub struct MigrationRunner<'a> {
    executor: &'a dyn StatementExecutor,
    store: &'a dyn FileStore,
    ledger: Option<&'a dyn MigrationLedger>,
}

impl<'a> MigrationRunner<'a> {
    pub fn new(executor: &'a dyn StatementExecutor, store: &'a dyn FileStore) -> Self {
        Self {
            executor,
            store,
            ledger: None,
        }
    }

    /// Skip files already recorded in `ledger` and record newly applied ones
    pub fn with_ledger(mut self, ledger: &'a dyn MigrationLedger) -> Self {
        self.ledger = Some(ledger);
        self
    }

    /// Apply `files` in the given order.
    ///
    /// Returns [`Error::ConnectionFailure`] if the database cannot be reached,
    /// either up front or part way through. Every other problem is recorded
    /// in the returned summary.
    pub async fn apply(&self, files: &[PathBuf]) -> Result<RunSummary> {
        if let Err(e) = self.executor.probe().await {
            tracing::error!(error = %e, "Cannot reach database; no migrations attempted");
            return Err(e);
        }

        let mut applied = match self.ledger {
            Some(ledger) => {
                ledger.ensure().await?;
                ledger.applied().await?
            }
            None => HashMap::new(),
        };

        let mut summary = RunSummary::default();
        for path in files {
            let report = self.apply_file(path, &mut applied).await?;
            summary.files.push(report);
        }

        tracing::info!(
            succeeded = summary.succeeded(),
            skipped = summary.skipped(),
            failed = summary.failed(),
            "Migration run finished"
        );
        Ok(summary)
    }

    async fn apply_file(
        &self,
        path: &Path,
        applied: &mut HashMap<String, AppliedMigration>,
    ) -> Result<FileReport> {
        let file = MigrationFile::new(path);
        let name = file.name();

        let text = match self.store.read(path) {
            Ok(text) => text,
            Err(Error::FileMissing(_)) => {
                tracing::warn!(file = %name, "Migration file not found, skipping");
                return Ok(FileReport::new(&file, FileStatus::Missing));
            }
            Err(e) => {
                tracing::error!(file = %name, error = %e, "Cannot read migration file");
                let mut report = FileReport::new(
                    &file,
                    FileStatus::ReadFailed {
                        error: e.to_string(),
                    },
                );
                report.failed = 1;
                return Ok(report);
            }
        };

        let sum = checksum(&text);
        if let Some(record) = applied.get(&file.id()) {
            if record.checksum.as_deref().map_or(false, |c| c != sum) {
                tracing::warn!(
                    file = %name,
                    "Migration changed since it was applied; not re-running it"
                );
            }
            tracing::info!(file = %name, applied_at = %record.applied_at, "Already applied, skipping");
            return Ok(FileReport::new(&file, FileStatus::AlreadyApplied));
        }

        let statements = split_statements_with(&text, self.executor.backslash_escapes());
        let total = statements.len();
        let mut report = FileReport::new(&file, FileStatus::Applied);
        report.total = total;

        tracing::info!(file = %name, statements = total, "Applying migration");

        for (i, statement) in statements.iter().enumerate() {
            let index = i + 1;
            tracing::debug!(file = %name, statement = index, sql = %statement, "Executing");

            match self.executor.execute_statement(statement).await {
                Ok(()) => {
                    report.succeeded += 1;
                    tracing::info!(file = %name, statement = index, total, "Statement executed");
                }
                Err(StatementError::AlreadyExists(message)) => {
                    report.skipped += 1;
                    tracing::warn!(
                        file = %name,
                        statement = index,
                        total,
                        error = %message,
                        "Already exists, skipped"
                    );
                }
                Err(StatementError::Connection(message)) => {
                    tracing::error!(
                        file = %name,
                        statement = index,
                        error = %message,
                        "Lost connection to database; aborting run"
                    );
                    return Err(Error::ConnectionFailure(message));
                }
                Err(e) => {
                    report.failed += 1;
                    report.not_attempted = total - index;
                    tracing::error!(
                        file = %name,
                        statement = index,
                        total,
                        error = %e,
                        "Statement failed; skipping the rest of this file"
                    );
                    report.status = FileStatus::Failed {
                        statement: index,
                        error: e.to_string(),
                    };
                    return Ok(report);
                }
            }
        }

        if let Some(ledger) = self.ledger {
            let recorded = ledger.record(&file.id(), &name, &sum).await;
            match recorded {
                Ok(()) => {
                    applied.insert(
                        file.id(),
                        AppliedMigration {
                            migration_id: file.id(),
                            name: name.clone(),
                            checksum: Some(sum),
                            applied_at: chrono::Utc::now().to_rfc3339(),
                        },
                    );
                }
                Err(e) if e.is_connection_failure() => return Err(e),
                Err(e) => {
                    tracing::error!(
                        file = %name,
                        error = %e,
                        "Migration ran but could not be recorded in the history table"
                    );
                    report.history_error = Some(e.to_string());
                    return Ok(report);
                }
            }
        }

        tracing::info!(file = %name, "Migration completed");
        Ok(report)
    }
}

/// A file as it would be applied, for dry runs
#[derive(Debug, Clone, Serialize)]
pub struct PlannedFile {
    pub name: String,
    pub path: PathBuf,
    pub statements: Vec<String>,
    pub error: Option<String>,
}

/// Read and split `files` without touching the database.
///
/// `backslash_escapes` selects MySQL-style string literals.
pub fn plan(files: &[PathBuf], store: &dyn FileStore, backslash_escapes: bool) -> Vec<PlannedFile> {
    files
        .iter()
        .map(|path| {
            let file = MigrationFile::new(path);
            let (statements, error) = match store.read(path) {
                Ok(text) => (split_statements_with(&text, backslash_escapes), None),
                Err(e) => (Vec::new(), Some(e.to_string())),
            };

            for (i, sql) in statements.iter().enumerate() {
                tracing::info!(file = %file.name(), statement = i + 1, sql = %sql, "Planned statement (dry run)");
            }
            if let Some(error) = &error {
                tracing::warn!(file = %file.name(), %error, "Would be skipped");
            }

            PlannedFile {
                name: file.name(),
                path: file.path,
                statements,
                error,
            }
        })
        .collect()
}
