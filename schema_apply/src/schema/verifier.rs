//! Schema verifier
//!
//! Checks that the expected tables exist and that columns matching a rule
//! have an allowed type, e.g. that every `user_id` column is `text`.

use async_trait::async_trait;
use regex::Regex;

use crate::config::{ColumnRule, VerifyConfig};
use crate::db::connection::DatabaseConnection;
use crate::error::Result;
use crate::schema::types::{ColumnInfo, ColumnViolation, TableReport, VerificationReport};

/// Something that can describe a table's columns
#[async_trait]
pub trait ColumnSource: Send + Sync {
    /// Columns of `table` in ordinal order; empty when the table is absent
    async fn columns(&self, table: &str) -> Result<Vec<ColumnInfo>>;
}

#[async_trait]
impl ColumnSource for DatabaseConnection {
    async fn columns(&self, table: &str) -> Result<Vec<ColumnInfo>> {
        self.table_columns(table).await
    }
}

struct CompiledRule {
    pattern: Regex,
    allowed: Vec<String>,
    label: String,
}

impl CompiledRule {
    fn new(rule: &ColumnRule) -> Result<Self> {
        Ok(Self {
            pattern: Regex::new(&rule.column_pattern)?,
            allowed: rule.allowed_types.iter().map(|t| normalize_type(t)).collect(),
            label: rule
                .description
                .clone()
                .unwrap_or_else(|| rule.column_pattern.clone()),
        })
    }

    fn check(&self, column: &ColumnInfo) -> Option<ColumnViolation> {
        if !self.pattern.is_match(&column.name) {
            return None;
        }

        let actual = normalize_type(&column.data_type);
        if self.allowed.iter().any(|t| *t == actual) {
            return None;
        }

        Some(ColumnViolation {
            column: column.name.clone(),
            data_type: column.data_type.clone(),
            allowed_types: self.allowed.clone(),
            rule: self.label.clone(),
        })
    }
}

/// Lowercase and drop any length/precision suffix: `VARCHAR(255)` -> `varchar`
fn normalize_type(data_type: &str) -> String {
    let base = data_type.split('(').next().unwrap_or(data_type);
    base.trim().to_lowercase()
}

/// Verifies tables against a [`VerifyConfig`]
pub struct SchemaVerifier {
    expected_tables: Vec<String>,
    rules: Vec<CompiledRule>,
}

impl SchemaVerifier {
    pub fn new(config: &VerifyConfig) -> Result<Self> {
        Ok(Self {
            expected_tables: config.expected_tables.clone(),
            rules: config
                .column_rules
                .iter()
                .map(CompiledRule::new)
                .collect::<Result<Vec<_>>>()?,
        })
    }

    /// Check every expected table, in configured order
    pub async fn verify(&self, source: &dyn ColumnSource) -> Result<VerificationReport> {
        let mut report = VerificationReport::default();

        for table in &self.expected_tables {
            let columns = source.columns(table).await?;
            let exists = !columns.is_empty();

            let violations: Vec<_> = columns
                .iter()
                .flat_map(|column| self.rules.iter().filter_map(move |rule| rule.check(column)))
                .collect();

            if exists {
                tracing::info!(table = %table, columns = columns.len(), "Table exists");
            } else {
                tracing::error!(table = %table, "Table does not exist");
            }
            for violation in &violations {
                tracing::warn!(
                    table = %table,
                    column = %violation.column,
                    data_type = %violation.data_type,
                    rule = %violation.rule,
                    "Column type not allowed"
                );
            }

            report.tables.insert(
                table.clone(),
                TableReport {
                    name: table.clone(),
                    exists,
                    columns,
                    violations,
                },
            );
        }

        Ok(report)
    }
}
