// Formentry - Clinical Form Compiler and Submission Engine
// Copyright (c) 2025 Formentry Contributors
// Licensed under the MIT License

//! Result type alias for Formentry

use super::errors::FormEntryError;

/// Result type alias for Formentry operations
///
/// # Examples
///
/// ```
/// use formentry::domain::result::Result;
/// use formentry::domain::errors::FormEntryError;
///
/// fn example_function() -> Result<String> {
///     Ok("success".to_string())
/// }
///
/// fn failing_function() -> Result<()> {
///     Err(FormEntryError::Misuse("unknown constant".to_string()))
/// }
/// ```
pub type Result<T> = std::result::Result<T, FormEntryError>;
