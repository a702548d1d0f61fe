// Formentry - Clinical Form Compiler and Submission Engine
// Copyright (c) 2025 Formentry Contributors
// Licensed under the MIT License

//! Configuration loader with TOML parsing and environment variable overrides

use super::schema::FormEntryConfig;
use crate::domain::errors::FormEntryError;
use crate::domain::result::Result;
use regex::Regex;
use std::fs;
use std::path::Path;

/// Loads configuration from a TOML file
///
/// This function:
/// 1. Reads the TOML file
/// 2. Performs environment variable substitution (`${VAR}` syntax)
/// 3. Parses the TOML into [`FormEntryConfig`]
/// 4. Applies environment variable overrides (`FORMENTRY_*` prefix)
/// 5. Validates the configuration
///
/// # Errors
///
/// Returns [`FormEntryError::Configuration`] if the file is missing or
/// unreadable, a referenced variable is unset, parsing fails, or
/// validation rejects a value.
///
/// # Examples
///
/// ```no_run
/// use formentry::config::loader::load_config;
///
/// let config = load_config("formentry.toml").expect("Failed to load config");
/// println!("{}", config.formats.date_format);
/// ```
pub fn load_config(path: impl AsRef<Path>) -> Result<FormEntryConfig> {
    let path = path.as_ref();

    if !path.exists() {
        return Err(FormEntryError::Configuration(format!(
            "Configuration file not found: {}",
            path.display()
        )));
    }

    let contents = fs::read_to_string(path).map_err(|e| {
        FormEntryError::Configuration(format!(
            "Failed to read configuration file {}: {}",
            path.display(),
            e
        ))
    })?;

    parse_config(&contents)
}

/// Parses configuration text, applying substitution, overrides and validation
///
/// # Errors
///
/// Same as [`load_config`], minus the file access failures.
pub fn parse_config(contents: &str) -> Result<FormEntryConfig> {
    let contents = substitute_env_vars(contents)?;

    let mut config: FormEntryConfig = toml::from_str(&contents)
        .map_err(|e| FormEntryError::Configuration(format!("Failed to parse TOML: {e}")))?;

    apply_env_overrides(&mut config)?;

    config.validate().map_err(|e| {
        FormEntryError::Configuration(format!("Configuration validation failed: {e}"))
    })?;

    Ok(config)
}

/// Substitutes environment variables in the format `${VAR_NAME}`
///
/// Comment lines are copied through untouched.
///
/// # Errors
///
/// Returns an error listing every referenced variable that is not set
fn substitute_env_vars(input: &str) -> Result<String> {
    let re = Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}")
        .map_err(|e| FormEntryError::Configuration(format!("Invalid substitution pattern: {e}")))?;
    let mut result = String::with_capacity(input.len());
    let mut missing_vars: Vec<String> = Vec::new();

    for line in input.lines() {
        if line.trim_start().starts_with('#') {
            result.push_str(line);
            result.push('\n');
            continue;
        }

        let mut processed_line = line.to_string();
        for cap in re.captures_iter(line) {
            let var_name = &cap[1];
            match std::env::var(var_name) {
                Ok(value) => {
                    processed_line = processed_line.replace(&format!("${{{var_name}}}"), &value);
                }
                Err(_) => {
                    if !missing_vars.iter().any(|m| m == var_name) {
                        missing_vars.push(var_name.to_string());
                    }
                }
            }
        }
        result.push_str(&processed_line);
        result.push('\n');
    }

    if !missing_vars.is_empty() {
        return Err(FormEntryError::Configuration(format!(
            "Missing required environment variables: {}",
            missing_vars.join(", ")
        )));
    }

    Ok(result)
}

fn parse_override<T: std::str::FromStr>(name: &str, raw: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e| {
        FormEntryError::Configuration(format!("Invalid value '{raw}' for {name}: {e}"))
    })
}

/// Applies environment variable overrides using the `FORMENTRY_` prefix
///
/// Variables follow the pattern `FORMENTRY_<SECTION>_<KEY>`, for example
/// `FORMENTRY_FORMATS_DATE_FORMAT` or `FORMENTRY_MATCHING_LEGACY_CROSS_PARENT_BINDING`.
fn apply_env_overrides(config: &mut FormEntryConfig) -> Result<()> {
    let var = |name: &str| std::env::var(name).ok();

    // Application
    if let Some(val) = var("FORMENTRY_APPLICATION_LOG_LEVEL") {
        config.application.log_level = val;
    }
    if let Some(val) = var("FORMENTRY_APPLICATION_DRY_RUN") {
        config.application.dry_run = parse_override("FORMENTRY_APPLICATION_DRY_RUN", &val)?;
    }

    // Formats
    if let Some(val) = var("FORMENTRY_FORMATS_DATE_FORMAT") {
        config.formats.date_format = val;
    }
    if let Some(val) = var("FORMENTRY_FORMATS_DATETIME_FORMAT") {
        config.formats.datetime_format = val;
    }
    if let Some(val) = var("FORMENTRY_FORMATS_TIME_FORMAT") {
        config.formats.time_format = val;
    }

    // Concepts
    if let Some(val) = var("FORMENTRY_CONCEPTS_TRUE_CONCEPT") {
        config.concepts.true_concept = parse_override("FORMENTRY_CONCEPTS_TRUE_CONCEPT", &val)?;
    }
    if let Some(val) = var("FORMENTRY_CONCEPTS_FALSE_CONCEPT") {
        config.concepts.false_concept = parse_override("FORMENTRY_CONCEPTS_FALSE_CONCEPT", &val)?;
    }
    if let Some(val) = var("FORMENTRY_CONCEPTS_FREE_TEXT_INSTRUCTIONS") {
        config.concepts.free_text_instructions = Some(parse_override(
            "FORMENTRY_CONCEPTS_FREE_TEXT_INSTRUCTIONS",
            &val,
        )?);
    }

    // Defaults
    if let Some(val) = var("FORMENTRY_DEFAULTS_LOCATION") {
        config.defaults.location = Some(val);
    }
    if let Some(val) = var("FORMENTRY_DEFAULTS_PROVIDER") {
        config.defaults.provider = Some(val);
    }

    // Matching
    if let Some(val) = var("FORMENTRY_MATCHING_LEGACY_CROSS_PARENT_BINDING") {
        config.matching.legacy_cross_parent_binding =
            parse_override("FORMENTRY_MATCHING_LEGACY_CROSS_PARENT_BINDING", &val)?;
    }

    // Orders
    if let Some(val) = var("FORMENTRY_ORDERS_STOP_OFFSET_SECONDS") {
        config.orders.stop_offset_seconds =
            parse_override("FORMENTRY_ORDERS_STOP_OFFSET_SECONDS", &val)?;
    }

    // Logging
    if let Some(val) = var("FORMENTRY_LOGGING_LOCAL_ENABLED") {
        config.logging.local_enabled = parse_override("FORMENTRY_LOGGING_LOCAL_ENABLED", &val)?;
    }
    if let Some(val) = var("FORMENTRY_LOGGING_LOCAL_PATH") {
        config.logging.local_path = val;
    }
    if let Some(val) = var("FORMENTRY_LOGGING_LOCAL_ROTATION") {
        config.logging.local_rotation = val;
    }

    Ok(())
}
