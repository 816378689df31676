//! Error types for astra bookkeeping operations.
//!
//! Storage, configuration and monitoring errors live next to the code that
//! raises them. This module holds the errors shared between subsystems:
//! - Pipeline output validation
//! - Data product path resolution

use thiserror::Error;

/// Errors raised when a pipeline output row does not match its table.
#[derive(Debug, Error, PartialEq)]
pub enum OutputError {
    #[error("Unknown output kind '{0}'")]
    UnknownKind(String),

    #[error("Column '{column}' does not exist in {table}")]
    UnknownColumn { table: String, column: String },

    #[error("Missing required column '{column}' for {table}")]
    MissingColumn { table: String, column: String },

    #[error("Column '{column}' in {table} cannot be null")]
    NullNotAllowed { table: String, column: String },

    #[error("Column '{column}' in {table} expects {expected}, got {found}")]
    TypeMismatch {
        table: String,
        column: String,
        expected: String,
        found: String,
    },

    #[error("Column '{0}' is managed by the database and cannot be set")]
    ReservedColumn(String),
}

/// Errors that can occur while resolving a data product to a path.
#[derive(Debug, Error, PartialEq)]
pub enum PathError {
    #[error("No path template registered for filetype '{filetype}' (release '{release}')")]
    UnknownFiletype { release: String, filetype: String },

    #[error("Keyword '{keyword}' required by the {filetype} template is missing")]
    MissingKeyword { filetype: String, keyword: String },

    #[error("Environment variable '{0}' is not set")]
    MissingEnvVar(String),

    #[error("Data product keywords must be a JSON object, got: {0}")]
    InvalidKwargs(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_error_display() {
        let err = OutputError::TypeMismatch {
            table: "ferreoutput".to_string(),
            column: "teff".to_string(),
            expected: "float".to_string(),
            found: "boolean".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("ferreoutput"));
        assert!(msg.contains("teff"));
        assert!(msg.contains("boolean"));
    }

    #[test]
    fn test_path_error_display() {
        let err = PathError::MissingEnvVar("APOGEE_REDUX".to_string());
        assert!(err.to_string().contains("APOGEE_REDUX"));

        let err = PathError::MissingKeyword {
            filetype: "apStar".to_string(),
            keyword: "obj".to_string(),
        };
        assert!(err.to_string().contains("obj"));
    }
}
