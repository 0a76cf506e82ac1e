//! Type definitions for schema verification

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// A column as reported by the database
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    /// Lowercased data type, e.g. `text` or `character varying`
    pub data_type: String,
    pub nullable: bool,
}

/// A column whose type breaks a configured rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnViolation {
    pub column: String,
    pub data_type: String,
    pub allowed_types: Vec<String>,
    pub rule: String,
}

/// Verification result for one expected table
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableReport {
    pub name: String,
    pub exists: bool,
    pub columns: Vec<ColumnInfo>,
    pub violations: Vec<ColumnViolation>,
}

impl TableReport {
    pub fn is_ok(&self) -> bool {
        self.exists && self.violations.is_empty()
    }
}

/// Verification result for all expected tables, in configured order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct VerificationReport {
    pub tables: IndexMap<String, TableReport>,
}

impl VerificationReport {
    pub fn missing_tables(&self) -> Vec<&str> {
        self.tables
            .values()
            .filter(|t| !t.exists)
            .map(|t| t.name.as_str())
            .collect()
    }

    pub fn violations(&self) -> impl Iterator<Item = (&str, &ColumnViolation)> {
        self.tables
            .values()
            .flat_map(|t| t.violations.iter().map(move |v| (t.name.as_str(), v)))
    }

    pub fn is_success(&self) -> bool {
        self.tables.values().all(TableReport::is_ok)
    }
}
