// Formentry - Clinical Form Compiler and Submission Engine
// Copyright (c) 2025 Formentry Contributors
// Licensed under the MIT License

//! CLI command implementations

pub mod compile;
pub mod init;
pub mod submit;
pub mod validate;

use crate::config::{load_config, FormEntryConfig};
use crate::domain::{FormEntryError, Result};
use std::path::Path;

/// Loads the configuration file, or the defaults when it does not exist
pub(crate) fn load_config_or_default(config_path: &str) -> Result<FormEntryConfig> {
    if Path::new(config_path).exists() {
        load_config(config_path)
    } else {
        tracing::debug!(config_path = %config_path, "No configuration file, using defaults");
        Ok(FormEntryConfig::default())
    }
}

/// Maps a library error to the process exit code
pub(crate) fn exit_code_for(error: &FormEntryError) -> i32 {
    match error {
        FormEntryError::Configuration(_) | FormEntryError::FormDesign(_) => 2,
        FormEntryError::Validation(_) => 3,
        _ => 5,
    }
}

/// Splits a comma-separated role list
pub(crate) fn parse_roles(raw: Option<&str>) -> Vec<String> {
    raw.map(|list| {
        list.split(',')
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .map(str::to_string)
            .collect()
    })
    .unwrap_or_default()
}
