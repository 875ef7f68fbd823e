//! Taxonomy schema validation
//!
//! Applications are validated against a compiled taxonomy JSON schema
//! before admission. Validation failures are reported per field so the
//! webhook can surface them as admission errors.

use crate::error::{Error, Result};
use jsonschema::{Draft, Validator};
use serde_json::Value;

/// One field-level validation failure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    /// JSON pointer to the offending field
    pub field: String,
    /// What the schema rejected
    pub message: String,
}

impl std::fmt::Display for FieldError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validator for submitted applications, compiled once at startup
pub struct TaxonomyValidator {
    schema: Validator,
}

impl TaxonomyValidator {
    /// Compile the taxonomy schema from a file
    pub fn from_file(path: &str) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let schema_json: Value = serde_json::from_str(&raw)?;
        Self::from_value(&schema_json)
    }

    /// Compile the taxonomy schema from an in-memory document
    pub fn from_value(schema_json: &Value) -> Result<Self> {
        let schema = jsonschema::options()
            .with_draft(Draft::Draft7)
            .build(schema_json)
            .map_err(|e| Error::TaxonomyValidation(e.to_string()))?;
        Ok(Self { schema })
    }

    /// Validate an instance, returning every field-level failure
    pub fn validate(&self, instance: &Value) -> Vec<FieldError> {
        self.schema
            .iter_errors(instance)
            .map(|err| FieldError {
                field: err.instance_path.to_string(),
                message: err.to_string(),
            })
            .collect()
    }

    /// Validate an instance, failing on the first schema violation
    pub fn check(&self, instance: &Value, subject: &str) -> Result<()> {
        let errors = self.validate(instance);
        if errors.is_empty() {
            return Ok(());
        }
        let joined = errors
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; ");
        Err(Error::TaxonomyValidation(format!("{subject}: {joined}")))
    }
}
