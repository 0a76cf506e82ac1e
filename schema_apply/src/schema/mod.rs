//! Schema module for schema_apply
//!
//! This module handles verification of the schema left by applied migrations.

pub mod types;
pub mod verifier;

// Re-export key types
pub use types::{ColumnInfo, ColumnViolation, TableReport, VerificationReport};
pub use verifier::{ColumnSource, SchemaVerifier};
