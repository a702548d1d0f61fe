// Formentry - Clinical Form Compiler and Submission Engine
// Copyright (c) 2025 Formentry Contributors
// Licensed under the MIT License

//! Domain error types
//!
//! Form design problems are fatal at compile or render time. Submission
//! problems are collected per field and block every write. The two never mix:
//! a bad template is never reported as a validation error on submission.

use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Main Formentry error type
#[derive(Debug, Error)]
pub enum FormEntryError {
    /// Configuration file errors
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The form definition itself is malformed or contradictory
    #[error("Bad form design: {0}")]
    FormDesign(#[from] FormDesignError),

    /// Submitted values were rejected
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationErrors),

    /// An API or static reference was used incorrectly
    #[error("Misuse: {0}")]
    Misuse(String),

    /// Clinical data repository errors
    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(String),

    /// Generic errors with context
    #[error("{0}")]
    Other(String),
}

impl FormEntryError {
    /// Returns true when the error is a configuration or form-design error
    pub fn is_design_error(&self) -> bool {
        matches!(
            self,
            FormEntryError::Configuration(_) | FormEntryError::FormDesign(_)
        )
    }

    /// Returns the validation errors carried by this error, if any
    pub fn validation_errors(&self) -> Option<&ValidationErrors> {
        match self {
            FormEntryError::Validation(errors) => Some(errors),
            _ => None,
        }
    }
}

/// Errors in a form definition, detected while compiling or binding defaults
#[derive(Debug, Error, Clone, PartialEq)]
pub enum FormDesignError {
    /// Markup could not be parsed
    #[error("Malformed markup: {0}")]
    MalformedMarkup(String),

    /// DOCTYPE or entity declarations are not accepted
    #[error("External entity declarations are not permitted in form markup")]
    EntityDeclaration,

    /// A tag is missing a required attribute
    #[error("<{tag}> requires attribute '{attribute}'")]
    MissingAttribute { tag: String, attribute: String },

    /// Two attributes may not be combined
    #[error("<{tag}> cannot combine '{first}' with '{second}'")]
    ConflictingAttributes {
        tag: String,
        first: String,
        second: String,
    },

    /// An attribute holds a value outside its allowed set or format
    #[error("<{tag}> attribute '{attribute}' has invalid value '{value}': {reason}")]
    InvalidAttribute {
        tag: String,
        attribute: String,
        value: String,
        reason: String,
    },

    /// A reference to metadata (concept, state, program...) cannot be resolved
    #[error("Cannot resolve {kind} '{reference}'")]
    UnresolvedReference { kind: String, reference: String },

    /// A literal default does not fit the field
    #[error("Invalid default '{value}' for field {field}: {reason}")]
    InvalidDefault {
        field: String,
        value: String,
        reason: String,
    },

    /// Macro definitions are malformed
    #[error("Invalid macro definition: {0}")]
    InvalidMacro(String),

    /// A repeat block is malformed
    #[error("Invalid repeat: {0}")]
    InvalidRepeat(String),

    /// A conditional test could not be read or evaluated
    #[error("Invalid conditional test: {0}")]
    InvalidTest(String),
}

/// One per-field validation failure
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    /// Widget id (or logical field name) the error belongs to
    pub field_id: String,

    /// Human readable message
    pub message: String,
}

impl FieldError {
    /// Creates a new field error
    pub fn new(field_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field_id: field_id.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field_id, self.message)
    }
}

/// Collected validation errors for one submission
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationErrors {
    errors: Vec<FieldError>,
}

impl ValidationErrors {
    /// Creates an empty error list
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an error for a field
    pub fn push(&mut self, field_id: impl Into<String>, message: impl Into<String>) {
        self.errors.push(FieldError::new(field_id, message));
    }

    /// Appends every error from another list
    pub fn extend(&mut self, other: ValidationErrors) {
        self.errors.extend(other.errors);
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    /// Returns the collected errors in insertion order
    pub fn errors(&self) -> &[FieldError] {
        &self.errors
    }

    /// Returns the errors recorded against one field
    pub fn for_field<'a>(&'a self, field_id: &'a str) -> impl Iterator<Item = &'a FieldError> {
        self.errors.iter().filter(move |e| e.field_id == field_id)
    }

    /// Converts into `Err` when non-empty
    pub fn into_result(self) -> Result<(), FormEntryError> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(FormEntryError::Validation(self))
        }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.errors.iter().map(ToString::to_string).collect();
        write!(f, "{}", parts.join("; "))
    }
}

impl std::error::Error for ValidationErrors {}

/// Clinical data repository errors
///
/// These don't expose the backing store's own error types.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RepositoryError {
    /// Entity not found
    #[error("{kind} not found: {id}")]
    NotFound { kind: String, id: String },

    /// A write referenced something the store does not hold
    #[error("Integrity violation: {0}")]
    Integrity(String),

    /// The store could not commit a change set
    #[error("Commit failed: {0}")]
    CommitFailed(String),
}

impl RepositoryError {
    pub fn not_found(kind: impl Into<String>, id: impl fmt::Display) -> Self {
        RepositoryError::NotFound {
            kind: kind.into(),
            id: id.to_string(),
        }
    }
}

impl From<std::io::Error> for FormEntryError {
    fn from(err: std::io::Error) -> Self {
        FormEntryError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for FormEntryError {
    fn from(err: serde_json::Error) -> Self {
        FormEntryError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for FormEntryError {
    fn from(err: toml::de::Error) -> Self {
        FormEntryError::Configuration(format!("TOML parse error: {err}"))
    }
}

impl From<quick_xml::Error> for FormEntryError {
    fn from(err: quick_xml::Error) -> Self {
        FormDesignError::MalformedMarkup(err.to_string()).into()
    }
}

impl From<quick_xml::events::attributes::AttrError> for FormEntryError {
    fn from(err: quick_xml::events::attributes::AttrError) -> Self {
        FormDesignError::MalformedMarkup(err.to_string()).into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_form_design_error_display() {
        let err: FormEntryError = FormDesignError::MissingAttribute {
            tag: "workflowState".to_string(),
            attribute: "workflowId".to_string(),
        }
        .into();
        assert_eq!(
            err.to_string(),
            "Bad form design: <workflowState> requires attribute 'workflowId'"
        );
        assert!(err.is_design_error());
    }

    #[test]
    fn test_validation_errors_collect() {
        let mut errors = ValidationErrors::new();
        assert!(errors.clone().into_result().is_ok());

        errors.push("w3", "Required");
        errors.push("w5", "Cannot be in the future");
        assert_eq!(errors.len(), 2);
        assert_eq!(errors.for_field("w3").count(), 1);

        let err = errors.into_result().unwrap_err();
        assert!(!err.is_design_error());
        assert_eq!(err.validation_errors().map(|e| e.len()), Some(2));
        assert!(err.to_string().contains("w5: Cannot be in the future"));
    }

    #[test]
    fn test_repository_error_conversion() {
        let err: FormEntryError = RepositoryError::not_found("Concept", 5089).into();
        assert!(matches!(err, FormEntryError::Repository(_)));
        assert_eq!(err.to_string(), "Repository error: Concept not found: 5089");
    }

    #[test]
    fn test_toml_error_conversion() {
        let toml_err = toml::from_str::<toml::Value>("invalid = toml = syntax").unwrap_err();
        let err: FormEntryError = toml_err.into();
        assert!(matches!(err, FormEntryError::Configuration(_)));
        assert!(err.to_string().contains("TOML parse error"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "File not found");
        let err: FormEntryError = io_err.into();
        assert!(matches!(err, FormEntryError::Io(_)));
    }
}
