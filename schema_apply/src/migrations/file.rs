//! Migration files and where they come from

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::config::MigrationsConfig;
use crate::error::{Error, Result};

/// A migration file, identified by its timestamp-prefixed file name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationFile {
    pub path: PathBuf,
}

impl MigrationFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// File name including extension, e.g. `20250601000001_create_users_table.sql`
    pub fn name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.display().to_string())
    }

    /// Identifier recorded in the history table: the file stem
    pub fn id(&self) -> String {
        self.path
            .file_stem()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.name())
    }
}

/// md5 of the file text, hex encoded
pub fn checksum(text: &str) -> String {
    format!("{:x}", md5::compute(text.as_bytes()))
}

/// Source of migration text
pub trait FileStore: Send + Sync {
    /// Read the full text of `path`.
    ///
    /// Returns [`Error::FileMissing`] when the file does not exist and
    /// [`Error::ReadFailure`] when it exists but cannot be read.
    fn read(&self, path: &Path) -> Result<String>;
}

/// Reads migration files from the local filesystem
#[derive(Debug, Clone, Copy, Default)]
pub struct FsStore;

impl FileStore for FsStore {
    fn read(&self, path: &Path) -> Result<String> {
        fs::read_to_string(path).map_err(|source| match source.kind() {
            io::ErrorKind::NotFound => Error::FileMissing(path.to_path_buf()),
            _ => Error::ReadFailure {
                path: path.to_path_buf(),
                source,
            },
        })
    }
}

/// Find migration files in `directory` matching `pattern`, sorted by file name
pub fn discover(directory: &Path, pattern: &str) -> Result<Vec<PathBuf>> {
    if !directory.is_dir() {
        return Err(Error::ConfigError(format!(
            "Migrations directory not found: {}",
            directory.display()
        )));
    }

    let full_pattern = directory.join(pattern);
    let mut paths = glob::glob(&full_pattern.to_string_lossy())?
        .filter_map(|entry| match entry {
            Ok(path) if path.is_file() => Some(path),
            Ok(_) => None,
            Err(e) => {
                tracing::warn!(error = %e, "Skipping unreadable directory entry");
                None
            }
        })
        .collect::<Vec<_>>();

    paths.sort_by_key(|p| p.file_name().map(|n| n.to_os_string()));
    Ok(paths)
}

/// Decide which files a run covers.
///
/// Paths given on the command line win and are used as-is. Otherwise the
/// configured `files` list is used in its written order, and failing that the
/// directory is scanned.
pub fn resolve(config: &MigrationsConfig, explicit: &[PathBuf]) -> Result<Vec<PathBuf>> {
    if !explicit.is_empty() {
        return Ok(explicit.to_vec());
    }

    let directory = Path::new(&config.directory);
    match &config.files {
        Some(files) => Ok(files.iter().map(|f| directory.join(f)).collect()),
        None => discover(directory, &config.pattern),
    }
}
