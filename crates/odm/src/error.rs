//! Error types for the ODM
//!
//! Separates attribute-level validation failures (collected on an instance and
//! reported one at a time) from failures of the database client itself.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::event_error::EventError;

/// Result type alias for adapter operations
pub type OdmResult<T> = Result<T, OdmError>;

/// Server error codes reported for a unique index violation
pub const DUPLICATE_KEY_CODES: [i32; 2] = [11000, 11001];

/// A single attribute-level error registered on an instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationError {
    pub attr: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(attr: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            attr: attr.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ValidationError {}

/// Raw error reported by the document database client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseError {
    /// Server error code, when the client exposes one
    pub code: Option<i32>,
    pub message: String,
}

impl DatabaseError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
        }
    }

    pub fn with_code(code: i32, message: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            message: message.into(),
        }
    }

    /// Whether the server rejected the write because of a unique index
    pub fn is_duplicate_key(&self) -> bool {
        self.code
            .map(|code| DUPLICATE_KEY_CODES.contains(&code))
            .unwrap_or(false)
    }
}

impl fmt::Display for DatabaseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "{} (code {})", self.message, code),
            None => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for DatabaseError {}

/// Error types for ODM operations
#[derive(Debug, Clone, thiserror::Error)]
pub enum OdmError {
    /// First attribute error of a rejected persistence attempt
    #[error("Validation error: {0}")]
    Validation(ValidationError),

    /// Identifier text that does not describe a native identifier
    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    /// Anything the database client reported, passed through unchanged
    #[error("Database error: {0}")]
    Database(DatabaseError),

    #[error("Primary key is missing or invalid")]
    MissingPrimaryKey,

    #[error("Instance of '{0}' has not been saved")]
    NotSaved(String),

    #[error("Document not found in collection '{0}'")]
    NotFound(String),

    #[error("Unknown attribute '{attr}' on model '{model}'")]
    UnknownAttribute { model: String, attr: String },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Event error: {0}")]
    Event(#[from] EventError),
}

impl OdmError {
    pub fn database(message: impl Into<String>) -> Self {
        OdmError::Database(DatabaseError::new(message))
    }

    /// The attribute error carried by a validation failure
    pub fn validation_error(&self) -> Option<&ValidationError> {
        match self {
            OdmError::Validation(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ValidationError> for OdmError {
    fn from(err: ValidationError) -> Self {
        OdmError::Validation(err)
    }
}

impl From<DatabaseError> for OdmError {
    fn from(err: DatabaseError) -> Self {
        OdmError::Database(err)
    }
}

impl From<bson::oid::Error> for OdmError {
    fn from(err: bson::oid::Error) -> Self {
        OdmError::InvalidIdentifier(err.to_string())
    }
}

impl From<bson::ser::Error> for OdmError {
    fn from(err: bson::ser::Error) -> Self {
        OdmError::Serialization(err.to_string())
    }
}

impl From<bson::de::Error> for OdmError {
    fn from(err: bson::de::Error) -> Self {
        OdmError::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for OdmError {
    fn from(err: serde_json::Error) -> Self {
        OdmError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_key_codes() {
        assert!(DatabaseError::with_code(11000, "dup").is_duplicate_key());
        assert!(DatabaseError::with_code(11001, "dup").is_duplicate_key());
        assert!(!DatabaseError::with_code(2, "bad value").is_duplicate_key());
        assert!(!DatabaseError::new("connection reset").is_duplicate_key());
    }

    #[test]
    fn test_validation_error_display() {
        let err = OdmError::from(ValidationError::new("email", "email has already been taken"));
        assert_eq!(
            err.to_string(),
            "Validation error: email has already been taken"
        );
        assert_eq!(err.validation_error().map(|e| e.attr.as_str()), Some("email"));
    }

    #[test]
    fn test_validation_error_serializes_for_responses() {
        let err = ValidationError::new("email", "email has already been taken");
        assert_eq!(
            serde_json::to_value(&err).unwrap(),
            serde_json::json!({ "attr": "email", "message": "email has already been taken" })
        );
    }

    #[test]
    fn test_database_error_display() {
        let err = OdmError::Database(DatabaseError::with_code(11000, "E11000 duplicate key"));
        assert_eq!(err.to_string(), "Database error: E11000 duplicate key (code 11000)");
        assert!(err.validation_error().is_none());
    }
}
