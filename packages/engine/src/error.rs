//! Error types for the machine-law engine
//!
//! Only defects abort an evaluation. Absent citizen data is not an error: it
//! surfaces as `RuleResult::missing_required`.

use thiserror::Error;

/// Main error type for engine operations
#[derive(Error, Debug)]
pub enum EngineError {
    /// Failed to load a rule specification document
    #[error("Failed to load rule specification: {0}")]
    LoadError(String),

    /// YAML parsing error
    #[error("YAML parse error: {0}")]
    YamlError(#[from] serde_yaml_ng::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// IO error (file operations)
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Malformed specification shape (missing output, non-array conditions, ...)
    #[error("Invalid specification: {0}")]
    Configuration(String),

    /// Actions depend on each other in a cycle
    #[error("Circular dependency detected between actions: {0}")]
    CircularDependency(String),

    /// Value cannot be coerced to the type an operator needs
    #[error("Type mismatch: expected {expected}, got {actual}")]
    TypeMismatch { expected: String, actual: String },

    /// Invalid date format
    #[error("Invalid date format: {0}")]
    InvalidDate(String),

    /// No loaded specification matches service, law and date
    #[error("No rule specification for {service}/{law} valid on {date}")]
    RuleSpecNotFound {
        service: String,
        law: String,
        date: String,
    },

    /// Cross-law evaluation nested too deeply
    #[error("Circular reference detected: {0}")]
    CircularReference(String),

    /// External tabular source lookup failed
    #[error("Source lookup failed: {0}")]
    SourceError(String),
}

impl EngineError {
    pub(crate) fn type_mismatch(expected: &str, actual: &crate::types::Value) -> Self {
        EngineError::TypeMismatch {
            expected: expected.to_string(),
            actual: actual.type_name().to_string(),
        }
    }
}

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;
