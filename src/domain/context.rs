// Formentry - Clinical Form Compiler and Submission Engine
// Copyright (c) 2025 Formentry Contributors
// Licensed under the MIT License

//! Error context extension trait
//!
//! Adds `.context()` / `.with_context()` to any result whose error converts
//! into [`FormEntryError`]. Form-design and validation errors keep their
//! variant so callers can still tell them apart; everything else is wrapped
//! in [`FormEntryError::Other`] with the context prefixed.
//!
//! ```rust
//! use formentry::domain::Result;
//! use formentry::domain::context::ResultExt;
//!
//! fn read_template(path: &str) -> Result<String> {
//!     std::fs::read_to_string(path).with_context(|| format!("Failed to read template {path}"))
//! }
//! ```

use crate::domain::errors::{FormDesignError, FormEntryError};
use crate::domain::result::Result;

/// Extension trait for adding context to `Result` types
pub trait ResultExt<T> {
    /// Add context to an error (eager)
    fn context<C>(self, context: C) -> Result<T>
    where
        C: std::fmt::Display + Send + Sync + 'static;

    /// Add context to an error using a closure (lazy)
    fn with_context<C, F>(self, f: F) -> Result<T>
    where
        C: std::fmt::Display + Send + Sync + 'static,
        F: FnOnce() -> C;
}

impl<T, E> ResultExt<T> for std::result::Result<T, E>
where
    E: Into<FormEntryError>,
{
    fn context<C>(self, context: C) -> Result<T>
    where
        C: std::fmt::Display + Send + Sync + 'static,
    {
        self.map_err(|e| wrap(e.into(), context))
    }

    fn with_context<C, F>(self, f: F) -> Result<T>
    where
        C: std::fmt::Display + Send + Sync + 'static,
        F: FnOnce() -> C,
    {
        self.map_err(|e| wrap(e.into(), f()))
    }
}

fn wrap(base: FormEntryError, context: impl std::fmt::Display) -> FormEntryError {
    match base {
        FormEntryError::FormDesign(inner) => FormEntryError::FormDesign(
            FormDesignError::MalformedMarkup(format!("{context}: {inner}")),
        ),
        FormEntryError::Validation(errors) => FormEntryError::Validation(errors),
        other => FormEntryError::Other(format!("{context}: {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::errors::ValidationErrors;

    #[test]
    fn test_context_with_io_error() {
        let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "File not found");
        let result: std::result::Result<(), _> = Err(io_error);
        let err = result.context("Failed to read form.xml").unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("Failed to read form.xml"));
        assert!(msg.contains("File not found"));
    }

    #[test]
    fn test_context_keeps_design_errors_fatal() {
        let result: Result<()> = Err(FormDesignError::InvalidMacro("no key".to_string()).into());
        let err = result.context("Compiling vitals form").unwrap_err();
        assert!(err.is_design_error());
        assert!(err.to_string().contains("Compiling vitals form"));
    }

    #[test]
    fn test_context_keeps_validation_errors() {
        let mut errors = ValidationErrors::new();
        errors.push("w1", "Required");
        let result: Result<()> = Err(errors.into());
        let err = result.with_context(|| "Submitting").unwrap_err();
        assert_eq!(err.validation_errors().map(|e| e.len()), Some(1));
    }

    #[test]
    fn test_with_context_lazy_evaluation() {
        let called = std::cell::Cell::new(false);
        let result: Result<i32> = Ok(42);
        let out = result.with_context(|| {
            called.set(true);
            "never"
        });
        assert!(out.is_ok());
        assert!(!called.get());
    }
}
