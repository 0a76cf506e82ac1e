//! Configuration handling for schema_apply
//!
//! Configuration comes from an optional TOML file, with connection details
//! overridable from the environment so credentials never need to live in
//! the file itself.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::error::{Error, Result};

/// Config file looked up in the working directory when none is given
pub const DEFAULT_CONFIG_PATH: &str = "schema_apply.toml";

/// Environment variables checked, in order, for the database URL
pub const DATABASE_URL_VARS: [&str; 2] = ["SCHEMA_APPLY_DATABASE_URL", "DATABASE_URL"];

const DEFAULT_TIMEOUT_SECONDS: u64 = 30;
const DEFAULT_ALREADY_EXISTS_PATTERN: &str = "already exists";

static ENV_PLACEHOLDER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("placeholder pattern is valid")
});

/// Load configuration from a TOML file
pub fn load_from_file(path: &str) -> Result<Config> {
    let config_str = fs::read_to_string(path)
        .map_err(|e| Error::ConfigError(format!("Failed to read config file {}: {}", path, e)))?;

    let config: Config = toml::from_str(&config_str)
        .map_err(|e| Error::ConfigError(format!("Failed to parse config file {}: {}", path, e)))?;

    Ok(config)
}

/// Resolve the effective configuration.
///
/// An explicitly named file must exist. Without one, `schema_apply.toml` is
/// used when present and built-in defaults otherwise. Environment overrides
/// are applied last. Call [`Config::validate`] before connecting.
pub fn load(path: Option<&str>) -> Result<Config> {
    let mut config = match path {
        Some(path) => load_from_file(path)?,
        None if Path::new(DEFAULT_CONFIG_PATH).exists() => load_from_file(DEFAULT_CONFIG_PATH)?,
        None => Config::default(),
    };

    config.apply_overrides(|name| std::env::var(name).ok())?;
    Ok(config)
}

/// Represents the complete schema_apply configuration
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub migrations: MigrationsConfig,
    pub verify: Option<VerifyConfig>,
    pub logging: Option<LoggingConfig>,
}

impl Config {
    /// Apply environment overrides using `lookup` to read variables
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = DATABASE_URL_VARS
            .iter()
            .find_map(|&name| lookup(name).filter(|v| !v.trim().is_empty()))
        {
            self.database.url = url;
        }

        self.database.url = expand_placeholders(&self.database.url, &lookup)?;
        Ok(())
    }

    /// Check that the configuration can drive a run
    pub fn validate(&self) -> Result<()> {
        if self.database.url.trim().is_empty() {
            return Err(Error::ConfigError(format!(
                "No database URL configured; set [database].url or one of {}",
                DATABASE_URL_VARS.join(", ")
            )));
        }

        self.database.driver()?;
        self.database.already_exists_regex()?;

        if let Some(verify) = &self.verify {
            for rule in &verify.column_rules {
                Regex::new(&rule.column_pattern)?;
            }
        }

        Ok(())
    }
}

/// Replace `${NAME}` placeholders with values from `lookup`
pub fn expand_placeholders<F>(input: &str, lookup: F) -> Result<String>
where
    F: Fn(&str) -> Option<String>,
{
    let mut missing = Vec::new();
    let expanded = ENV_PLACEHOLDER.replace_all(input, |caps: &regex::Captures<'_>| {
        let name = &caps[1];
        match lookup(name) {
            Some(value) => value,
            None => {
                missing.push(name.to_string());
                String::new()
            }
        }
    });

    if !missing.is_empty() {
        return Err(Error::ConfigError(format!(
            "Environment variable(s) referenced in config are not set: {}",
            missing.join(", ")
        )));
    }

    Ok(expanded.into_owned())
}

/// Supported database drivers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Driver {
    Postgres,
    MySql,
    Sqlite,
}

impl Driver {
    fn parse(name: &str) -> Result<Self> {
        match name.to_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(Driver::Postgres),
            "mysql" | "mariadb" => Ok(Driver::MySql),
            "sqlite" => Ok(Driver::Sqlite),
            other => Err(Error::ConfigError(format!(
                "Unsupported database driver: {}",
                other
            ))),
        }
    }

    /// Infer the driver from a connection URL scheme
    pub fn from_url(url: &str) -> Result<Self> {
        let scheme = url.split(':').next().unwrap_or_default();
        Driver::parse(scheme).map_err(|_| {
            Error::ConfigError(format!(
                "Cannot infer database driver from URL scheme '{}'; set [database].driver",
                scheme
            ))
        })
    }
}

impl fmt::Display for Driver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Driver::Postgres => "postgres",
            Driver::MySql => "mysql",
            Driver::Sqlite => "sqlite",
        };
        f.write_str(name)
    }
}

/// Database connection configuration
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct DatabaseConfig {
    pub driver: Option<String>,
    pub url: String,
    pub pool_size: Option<u32>,
    pub timeout_seconds: Option<u64>,
    pub statement_timeout_seconds: Option<u64>,
    pub schema: Option<String>,
    pub already_exists_pattern: Option<String>,
}

impl DatabaseConfig {
    /// The configured driver, or the one implied by the URL
    pub fn driver(&self) -> Result<Driver> {
        match &self.driver {
            Some(name) => Driver::parse(name),
            None => Driver::from_url(&self.url),
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds.unwrap_or(DEFAULT_TIMEOUT_SECONDS))
    }

    pub fn statement_timeout(&self) -> Duration {
        Duration::from_secs(
            self.statement_timeout_seconds
                .unwrap_or(DEFAULT_TIMEOUT_SECONDS),
        )
    }

    /// Case-insensitive matcher for "object already exists" error text
    pub fn already_exists_regex(&self) -> Result<Regex> {
        let pattern = self
            .already_exists_pattern
            .as_deref()
            .unwrap_or(DEFAULT_ALREADY_EXISTS_PATTERN);
        Ok(Regex::new(&format!("(?i){}", pattern))?)
    }
}

/// Migration source configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct MigrationsConfig {
    pub directory: String,
    /// Explicit ordered list of files (relative to `directory`). Never reordered.
    pub files: Option<Vec<String>>,
    /// Glob used to discover files when no explicit list is given
    pub pattern: String,
    pub history_table: Option<String>,
    pub dry_run: bool,
}

impl Default for MigrationsConfig {
    fn default() -> Self {
        Self {
            directory: "migrations".to_string(),
            files: None,
            pattern: "*.sql".to_string(),
            history_table: None,
            dry_run: false,
        }
    }
}

/// Schema verification configuration
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct VerifyConfig {
    pub expected_tables: Vec<String>,
    pub column_rules: Vec<ColumnRule>,
}

/// Columns whose name matches `column_pattern` must have one of `allowed_types`
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ColumnRule {
    pub column_pattern: String,
    pub allowed_types: Vec<String>,
    pub description: Option<String>,
}

/// Logging configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<String>,
    pub format: String,
    /// Log to the console (stderr) when no file is set
    pub stdout: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
            format: "text".to_string(),
            stdout: true,
        }
    }
}
