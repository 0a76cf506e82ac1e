//! Runner behaviour against in-memory collaborators

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use rstest::*;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use schema_apply::db::ledger::{AppliedMigration, MigrationLedger};
use schema_apply::db::{StatementError, StatementExecutor};
use schema_apply::migrations::file::{checksum, FileStore};
use schema_apply::migrations::{plan, FileStatus, MigrationRunner};
use schema_apply::{Error, Result};

/// Pretends to be a database: remembers created tables and rejects
/// duplicates the way a real server does
#[derive(Default)]
struct FakeDatabase {
    unreachable: bool,
    mysql: bool,
    tables: Mutex<HashSet<String>>,
    executed: Mutex<Vec<String>>,
}

impl FakeDatabase {
    fn unreachable() -> Self {
        Self {
            unreachable: true,
            ..Self::default()
        }
    }

    fn mysql() -> Self {
        Self {
            mysql: true,
            ..Self::default()
        }
    }

    fn executed(&self) -> Vec<String> {
        self.executed.lock().unwrap().clone()
    }
}

#[async_trait]
impl StatementExecutor for FakeDatabase {
    async fn probe(&self) -> Result<()> {
        if self.unreachable {
            return Err(Error::ConnectionFailure("connection refused".to_string()));
        }
        Ok(())
    }

    async fn execute_statement(&self, sql: &str) -> std::result::Result<(), StatementError> {
        self.executed.lock().unwrap().push(sql.to_string());

        if sql.contains("DISCONNECT") {
            return Err(StatementError::Connection("server closed the connection".into()));
        }
        if sql.contains("TIMEOUT") {
            return Err(StatementError::TimedOut(Duration::from_secs(30)));
        }
        if sql.contains("BROKEN") {
            return Err(StatementError::Failed(format!("syntax error in: {}", sql)));
        }
        if let Some(pos) = sql.find("CREATE TABLE ") {
            let rest = &sql[pos + "CREATE TABLE ".len()..];
            let name = rest.split_whitespace().next().unwrap_or_default().to_string();
            if !self.tables.lock().unwrap().insert(name.clone()) {
                return Err(StatementError::AlreadyExists(format!(
                    "relation \"{}\" already exists",
                    name
                )));
            }
        }
        Ok(())
    }

    fn backslash_escapes(&self) -> bool {
        self.mysql
    }
}

/// File store backed by a map; absent keys are missing files
#[derive(Default)]
struct MemoryStore {
    files: HashMap<PathBuf, String>,
    unreadable: HashSet<PathBuf>,
    reads: Mutex<Vec<PathBuf>>,
}

impl MemoryStore {
    fn with(mut self, name: &str, sql: &str) -> Self {
        self.files.insert(PathBuf::from(name), sql.to_string());
        self
    }

    fn with_unreadable(mut self, name: &str) -> Self {
        self.unreadable.insert(PathBuf::from(name));
        self
    }
}

impl FileStore for MemoryStore {
    fn read(&self, path: &Path) -> Result<String> {
        self.reads.lock().unwrap().push(path.to_path_buf());
        if self.unreadable.contains(path) {
            return Err(Error::ReadFailure {
                path: path.to_path_buf(),
                source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
            });
        }
        self.files
            .get(path)
            .cloned()
            .ok_or_else(|| Error::FileMissing(path.to_path_buf()))
    }
}

#[derive(Default)]
struct MemoryLedger {
    rows: Mutex<HashMap<String, AppliedMigration>>,
    read_only: bool,
}

#[async_trait]
impl MigrationLedger for MemoryLedger {
    async fn ensure(&self) -> Result<()> {
        Ok(())
    }

    async fn applied(&self) -> Result<HashMap<String, AppliedMigration>> {
        Ok(self.rows.lock().unwrap().clone())
    }

    async fn record(&self, migration_id: &str, name: &str, checksum: &str) -> Result<()> {
        if self.read_only {
            return Err(Error::DatabaseError(
                "migration history: attempt to write a readonly database".to_string(),
            ));
        }
        let mut rows = self.rows.lock().unwrap();
        if rows.contains_key(migration_id) {
            return Err(Error::DatabaseError(format!(
                "migration history: duplicate key {}",
                migration_id
            )));
        }
        rows.insert(
            migration_id.to_string(),
            AppliedMigration {
                migration_id: migration_id.to_string(),
                name: name.to_string(),
                checksum: Some(checksum.to_string()),
                applied_at: "2025-07-20T00:00:00Z".to_string(),
            },
        );
        Ok(())
    }
}

fn paths(names: &[&str]) -> Vec<PathBuf> {
    names.iter().map(PathBuf::from).collect()
}

#[fixture]
fn store() -> MemoryStore {
    MemoryStore::default()
        .with(
            "20250601000001_create_users_table.sql",
            "-- users\nCREATE TABLE users (id TEXT PRIMARY KEY);\n",
        )
        .with(
            "20250602000001_create_transactions_table.sql",
            "CREATE TABLE transactions (id TEXT, user_id TEXT);\nCREATE INDEX tx_user ON transactions (user_id);\n",
        )
        .with(
            "20250710000001_add_subcategory_to_finance_tables.sql",
            "ALTER TABLE transactions ADD COLUMN subcategory TEXT;\n",
        )
}

#[rstest]
#[tokio::test]
async fn files_run_in_the_order_given(store: MemoryStore) {
    let db = FakeDatabase::default();
    let files = paths(&[
        "20250710000001_add_subcategory_to_finance_tables.sql",
        "20250601000001_create_users_table.sql",
    ]);

    let summary = MigrationRunner::new(&db, &store).apply(&files).await.unwrap();

    assert!(summary.is_success());
    assert_eq!(
        db.executed(),
        vec![
            "ALTER TABLE transactions ADD COLUMN subcategory TEXT",
            "-- users\nCREATE TABLE users (id TEXT PRIMARY KEY)",
        ]
    );
    assert_eq!(*store.reads.lock().unwrap(), files);
}

#[rstest]
#[tokio::test]
async fn comment_only_statements_are_never_sent(store: MemoryStore) {
    let store = store.with("comments.sql", "-- nothing here;\n/* or; here */;\n   ;\nSELECT 1;");
    let db = FakeDatabase::default();

    let summary = MigrationRunner::new(&db, &store)
        .apply(&paths(&["comments.sql"]))
        .await
        .unwrap();

    assert_eq!(db.executed(), vec!["SELECT 1"]);
    assert_eq!(summary.files[0].total, 1);
}

#[tokio::test]
async fn duplicate_create_is_skipped_not_failed() {
    let store = MemoryStore::default().with(
        "dup.sql",
        "CREATE TABLE t (id TEXT);\nCREATE TABLE t (id TEXT);",
    );
    let db = FakeDatabase::default();

    let summary = MigrationRunner::new(&db, &store)
        .apply(&paths(&["dup.sql"]))
        .await
        .unwrap();

    let report = &summary.files[0];
    assert_eq!(report.status, FileStatus::Applied);
    assert_eq!((report.succeeded, report.skipped, report.failed), (1, 1, 0));
    assert!(summary.is_success());
}

#[rstest]
#[tokio::test]
async fn missing_file_warns_and_run_continues(store: MemoryStore) {
    let db = FakeDatabase::default();
    let files = paths(&[
        "20250601000001_create_users_table.sql",
        "20250603000001_create_debts_table.sql",
        "20250602000001_create_transactions_table.sql",
    ]);

    let summary = MigrationRunner::new(&db, &store).apply(&files).await.unwrap();

    let statuses: Vec<_> = summary.files.iter().map(|f| f.status.clone()).collect();
    assert_eq!(
        statuses,
        vec![FileStatus::Applied, FileStatus::Missing, FileStatus::Applied]
    );
    assert!(summary.is_success());
    assert_eq!(db.executed().len(), 3);
}

#[rstest]
#[tokio::test]
async fn unreachable_database_attempts_nothing(store: MemoryStore) {
    let db = FakeDatabase::unreachable();

    let err = MigrationRunner::new(&db, &store)
        .apply(&paths(&["20250601000001_create_users_table.sql"]))
        .await
        .unwrap_err();

    assert!(err.is_connection_failure());
    assert!(db.executed().is_empty());
    assert!(store.reads.lock().unwrap().is_empty());
}

#[rstest]
#[tokio::test]
async fn second_run_is_clean(store: MemoryStore) {
    let db = FakeDatabase::default();
    let files = paths(&[
        "20250601000001_create_users_table.sql",
        "20250602000001_create_transactions_table.sql",
    ]);
    let runner = MigrationRunner::new(&db, &store);

    let first = runner.apply(&files).await.unwrap();
    let tables_after_first = db.tables.lock().unwrap().clone();
    let second = runner.apply(&files).await.unwrap();

    assert!(first.is_success());
    assert!(second.is_success());
    assert_eq!(second.skipped(), 2);
    assert_eq!(*db.tables.lock().unwrap(), tables_after_first);
}

#[tokio::test]
async fn failure_stops_the_file_but_not_the_run() {
    let store = MemoryStore::default()
        .with(
            "1_bad.sql",
            "CREATE TABLE a (id TEXT);\nBROKEN STATEMENT;\nCREATE TABLE b (id TEXT);\nCREATE TABLE c (id TEXT);",
        )
        .with("2_good.sql", "CREATE TABLE d (id TEXT);");
    let db = FakeDatabase::default();

    let summary = MigrationRunner::new(&db, &store)
        .apply(&paths(&["1_bad.sql", "2_good.sql"]))
        .await
        .unwrap();

    let bad = &summary.files[0];
    assert!(matches!(bad.status, FileStatus::Failed { statement: 2, .. }));
    assert_eq!((bad.succeeded, bad.failed, bad.not_attempted), (1, 1, 2));
    assert_eq!(summary.files[1].status, FileStatus::Applied);
    assert!(!summary.is_success());
    assert_eq!(
        db.executed(),
        vec!["CREATE TABLE a (id TEXT)", "BROKEN STATEMENT", "CREATE TABLE d (id TEXT)"]
    );
}

#[rstest]
#[tokio::test]
async fn unreadable_file_counts_as_failure(store: MemoryStore) {
    let store = store.with_unreadable("locked.sql");
    let db = FakeDatabase::default();

    let summary = MigrationRunner::new(&db, &store)
        .apply(&paths(&["locked.sql", "20250601000001_create_users_table.sql"]))
        .await
        .unwrap();

    assert!(matches!(summary.files[0].status, FileStatus::ReadFailed { .. }));
    assert_eq!(summary.files[0].failed, 1);
    assert_eq!(summary.files[1].status, FileStatus::Applied);
    assert!(!summary.is_success());
}

#[tokio::test]
async fn lost_connection_aborts_the_run() {
    let store = MemoryStore::default()
        .with("1.sql", "SELECT 1;\nDISCONNECT;\nSELECT 2;")
        .with("2.sql", "SELECT 3;");
    let db = FakeDatabase::default();

    let err = MigrationRunner::new(&db, &store)
        .apply(&paths(&["1.sql", "2.sql"]))
        .await
        .unwrap_err();

    assert!(err.is_connection_failure());
    assert_eq!(db.executed(), vec!["SELECT 1", "DISCONNECT"]);
}

#[rstest]
#[tokio::test]
async fn ledger_skips_recorded_files_and_records_new_ones(store: MemoryStore) {
    let db = FakeDatabase::default();
    let ledger = MemoryLedger::default();
    let files = paths(&[
        "20250601000001_create_users_table.sql",
        "20250602000001_create_transactions_table.sql",
    ]);
    let runner = MigrationRunner::new(&db, &store).with_ledger(&ledger);

    runner.apply(&files).await.unwrap();
    let executed_first = db.executed().len();
    let second = runner.apply(&files).await.unwrap();

    assert_eq!(db.executed().len(), executed_first);
    assert!(second
        .files
        .iter()
        .all(|f| f.status == FileStatus::AlreadyApplied));

    let rows = ledger.rows.lock().unwrap();
    let users = &rows["20250601000001_create_users_table"];
    assert_eq!(
        users.checksum.as_deref(),
        Some(checksum("-- users\nCREATE TABLE users (id TEXT PRIMARY KEY);\n").as_str())
    );
}

#[tokio::test]
async fn ledger_does_not_record_failed_files() {
    let store = MemoryStore::default().with("1_bad.sql", "BROKEN;");
    let db = FakeDatabase::default();
    let ledger = MemoryLedger::default();

    MigrationRunner::new(&db, &store)
        .with_ledger(&ledger)
        .apply(&paths(&["1_bad.sql"]))
        .await
        .unwrap();

    assert!(ledger.rows.lock().unwrap().is_empty());
}

#[rstest]
fn dry_run_plan_reads_without_executing(store: MemoryStore) {
    let planned = plan(
        &paths(&["20250602000001_create_transactions_table.sql", "absent.sql"]),
        &store,
        false,
    );

    assert_eq!(planned[0].statements.len(), 2);
    assert!(planned[0].error.is_none());
    assert!(planned[1].statements.is_empty());
    assert!(planned[1].error.is_some());
}

#[tokio::test]
async fn timed_out_statement_fails_the_file_and_the_run_goes_on() {
    let store = MemoryStore::default()
        .with(
            "1_slow.sql",
            "CREATE TABLE a (id TEXT);\nUPDATE a SET id = id -- TIMEOUT\n;\nCREATE TABLE b (id TEXT);",
        )
        .with("2_next.sql", "CREATE TABLE c (id TEXT);");
    let db = FakeDatabase::default();

    let summary = MigrationRunner::new(&db, &store)
        .apply(&paths(&["1_slow.sql", "2_next.sql"]))
        .await
        .unwrap();

    let slow = &summary.files[0];
    match &slow.status {
        FileStatus::Failed { statement, error } => {
            assert_eq!(*statement, 2);
            assert!(error.contains("timed out"), "{}", error);
        }
        other => panic!("unexpected status: {:?}", other),
    }
    assert_eq!((slow.succeeded, slow.failed, slow.not_attempted), (1, 1, 1));
    assert_eq!(summary.files[1].status, FileStatus::Applied);
    assert!(!summary.is_success());
    assert_eq!(db.executed().last().map(String::as_str), Some("CREATE TABLE c (id TEXT)"));
}

#[rstest]
#[tokio::test]
async fn same_file_listed_twice_runs_once_with_ledger(store: MemoryStore) {
    let db = FakeDatabase::default();
    let ledger = MemoryLedger::default();
    let files = paths(&[
        "20250601000001_create_users_table.sql",
        "20250602000001_create_transactions_table.sql",
        "20250601000001_create_users_table.sql",
    ]);

    let summary = MigrationRunner::new(&db, &store)
        .with_ledger(&ledger)
        .apply(&files)
        .await
        .unwrap();

    let statuses: Vec<_> = summary.files.iter().map(|f| f.status.clone()).collect();
    assert_eq!(
        statuses,
        vec![FileStatus::Applied, FileStatus::Applied, FileStatus::AlreadyApplied]
    );
    assert!(summary.is_success());
    assert_eq!(db.executed().len(), 3);
}

#[rstest]
#[tokio::test]
async fn history_write_failure_is_reported_not_fatal(store: MemoryStore) {
    let db = FakeDatabase::default();
    let ledger = MemoryLedger {
        read_only: true,
        ..MemoryLedger::default()
    };
    let files = paths(&[
        "20250601000001_create_users_table.sql",
        "20250602000001_create_transactions_table.sql",
    ]);

    let summary = MigrationRunner::new(&db, &store)
        .with_ledger(&ledger)
        .apply(&files)
        .await
        .unwrap();

    assert_eq!(summary.files.len(), 2);
    for report in &summary.files {
        assert_eq!(report.status, FileStatus::Applied);
        assert_eq!(report.failed, 0);
        assert!(report.history_error.as_deref().unwrap().contains("readonly"));
    }
    assert_eq!(summary.unrecorded(), 2);
    assert!(!summary.is_success());
    assert!(summary.to_string().contains("applied, not recorded"));
}

#[tokio::test]
async fn mysql_strings_keep_backslash_escaped_quotes() {
    let sql = r"INSERT INTO notes VALUES ('it\'s; fine');SELECT 2;";
    let store = MemoryStore::default().with("notes.sql", sql);

    let mysql = FakeDatabase::mysql();
    MigrationRunner::new(&mysql, &store)
        .apply(&paths(&["notes.sql"]))
        .await
        .unwrap();
    assert_eq!(
        mysql.executed(),
        vec![r"INSERT INTO notes VALUES ('it\'s; fine')", "SELECT 2"]
    );

    let planned = plan(&paths(&["notes.sql"]), &store, true);
    assert_eq!(planned[0].statements, mysql.executed());
}
