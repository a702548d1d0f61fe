// Formentry - Clinical Form Compiler and Submission Engine
// Copyright (c) 2025 Formentry Contributors
// Licensed under the MIT License

//! Logging and observability
//!
//! This module provides structured logging with support for:
//! - Console output filtered by `RUST_LOG` or the configured level
//! - JSON-formatted file logs with daily or hourly rotation
//! - Event macros for the compile, match and submission stages
//!
//! # Example
//!
//! ```no_run
//! use formentry::logging::init_logging;
//! use formentry::config::LoggingConfig;
//!
//! let config = LoggingConfig::default();
//! let _guard = init_logging("info", &config).expect("Failed to initialize logging");
//!
//! tracing::info!("Form engine started");
//! ```

pub mod structured;

pub use structured::{init_logging, LoggingGuard};

/// Log the completion of a template compilation
///
/// # Example
///
/// ```no_run
/// use formentry::log_compile_complete;
///
/// log_compile_complete!(12, 2, 4u128);
/// ```
#[macro_export]
macro_rules! log_compile_complete {
    ($widgets:expr, $groups:expr, $elapsed_ms:expr) => {
        tracing::debug!(
            widgets = $widgets,
            groups = $groups,
            elapsed_ms = $elapsed_ms as u64,
            "Form compiled"
        );
    };
}

/// Log an obs group binding chosen among equally ranked candidates
#[macro_export]
macro_rules! log_match_guess {
    ($key:expr, $chosen:expr, $tied:expr) => {
        tracing::debug!(
            group = %$key,
            chosen = %$chosen,
            tied = $tied,
            "Ambiguous obs group match, bound lowest id"
        );
    };
}

/// Log the size of a planned change set
///
/// # Example
///
/// ```no_run
/// use formentry::log_plan_summary;
/// use formentry::domain::ChangeSet;
///
/// let changes = ChangeSet::default();
/// log_plan_summary!("enter", changes);
/// ```
#[macro_export]
macro_rules! log_plan_summary {
    ($mode:expr, $changes:expr) => {
        tracing::info!(
            mode = $mode,
            summary = %$changes.summary(),
            "Submission planned"
        );
    };
}

/// Log an error with context
///
/// # Example
///
/// ```no_run
/// use formentry::log_error_with_context;
/// use formentry::domain::FormEntryError;
///
/// let error = FormEntryError::Configuration("Invalid config".to_string());
/// log_error_with_context!(&error, "Failed to load configuration");
/// ```
#[macro_export]
macro_rules! log_error_with_context {
    ($error:expr, $context:expr) => {
        tracing::error!(
            error = %$error,
            context = $context,
            "Error occurred"
        );
    };
}

#[cfg(test)]
mod tests {
    use crate::domain::{ChangeSet, FormEntryError, ObsId};

    #[test]
    fn test_macros_expand_without_subscriber() {
        let changes = ChangeSet::default();
        crate::log_compile_complete!(3usize, 1usize, 2u128);
        crate::log_match_guess!("g1", ObsId::new(7).unwrap(), 2usize);
        crate::log_plan_summary!("edit", changes);
        crate::log_error_with_context!(FormEntryError::Other("boom".into()), "submit");
    }
}
