// Formentry - Clinical Form Compiler and Submission Engine
// Copyright (c) 2025 Formentry Contributors
// Licensed under the MIT License

//! Configuration schema types
//!
//! This module defines the configuration structure for Formentry. Every
//! section is optional in the TOML file and falls back to its defaults.

use crate::domain::ids::{ConceptId, DrugId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Main Formentry configuration
///
/// This is the root configuration structure that maps to the TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FormEntryConfig {
    /// Application-level settings
    #[serde(default)]
    pub application: ApplicationConfig,

    /// Display and parse formats for dates and times
    #[serde(default)]
    pub formats: FormatsConfig,

    /// Well-known concept identifiers
    #[serde(default)]
    pub concepts: ConceptsConfig,

    /// System defaults used by `SystemDefault`
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// Obs group matching behaviour
    #[serde(default)]
    pub matching: MatchingConfig,

    /// Drug order date arithmetic
    #[serde(default)]
    pub orders: OrdersConfig,

    /// Standard regimens offered by `standardRegimen`
    #[serde(default)]
    pub regimens: Vec<RegimenConfig>,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl FormEntryConfig {
    /// Validates the configuration
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid
    pub fn validate(&self) -> Result<(), String> {
        self.application.validate()?;
        self.formats.validate()?;
        self.concepts.validate()?;
        self.orders.validate()?;
        let mut codes = BTreeSet::new();
        for regimen in &self.regimens {
            regimen.validate()?;
            if !codes.insert(regimen.code.as_str()) {
                return Err(format!("Duplicate regimen code '{}'", regimen.code));
            }
        }
        self.logging.validate()?;
        Ok(())
    }

    /// Looks up a regimen by code
    pub fn regimen(&self, code: &str) -> Option<&RegimenConfig> {
        self.regimens.iter().find(|r| r.code == code.trim())
    }
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Dry run mode (plan submissions without applying them)
    #[serde(default)]
    pub dry_run: bool,
}

impl ApplicationConfig {
    fn validate(&self) -> Result<(), String> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.log_level.as_str()) {
            return Err(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.log_level,
                valid_levels.join(", ")
            ));
        }
        Ok(())
    }
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            dry_run: false,
        }
    }
}

/// Date and time formats (chrono format strings)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormatsConfig {
    #[serde(default = "default_date_format")]
    pub date_format: String,

    #[serde(default = "default_datetime_format")]
    pub datetime_format: String,

    #[serde(default = "default_time_format")]
    pub time_format: String,
}

impl FormatsConfig {
    fn validate(&self) -> Result<(), String> {
        for (name, value) in [
            ("formats.date_format", &self.date_format),
            ("formats.datetime_format", &self.datetime_format),
            ("formats.time_format", &self.time_format),
        ] {
            if value.trim().is_empty() {
                return Err(format!("{name} cannot be empty"));
            }
            if !value.contains('%') {
                return Err(format!("{name} '{value}' contains no format specifiers"));
            }
        }
        Ok(())
    }
}

impl Default for FormatsConfig {
    fn default() -> Self {
        Self {
            date_format: default_date_format(),
            datetime_format: default_datetime_format(),
            time_format: default_time_format(),
        }
    }
}

/// Well-known concepts referenced by `Constant:` defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConceptsConfig {
    /// Question used for free-text order instructions, when the site has one
    #[serde(default)]
    pub free_text_instructions: Option<ConceptId>,

    #[serde(default = "default_true_concept")]
    pub true_concept: ConceptId,

    #[serde(default = "default_false_concept")]
    pub false_concept: ConceptId,
}

impl ConceptsConfig {
    fn validate(&self) -> Result<(), String> {
        if self.true_concept == self.false_concept {
            return Err("concepts.true_concept and concepts.false_concept must differ".to_string());
        }
        Ok(())
    }

    /// Resolves a `Constant:NAME` reference (case-insensitive)
    pub fn constant(&self, name: &str) -> Option<ConceptId> {
        match name.trim().to_ascii_uppercase().as_str() {
            "TRUE_CONCEPT" => Some(self.true_concept),
            "FALSE_CONCEPT" => Some(self.false_concept),
            "FREE_TEXT_INSTRUCTIONS" => self.free_text_instructions,
            _ => None,
        }
    }
}

impl Default for ConceptsConfig {
    fn default() -> Self {
        Self {
            free_text_instructions: None,
            true_concept: default_true_concept(),
            false_concept: default_false_concept(),
        }
    }
}

/// Site defaults resolved by `SystemDefault`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Location id, uuid or name
    #[serde(default)]
    pub location: Option<String>,

    /// Provider id, uuid or name
    #[serde(default)]
    pub provider: Option<String>,
}

/// Obs group matching configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchingConfig {
    /// Let a nested group template bind a group attached directly to the
    /// encounter when its grouping concept is unique at that level
    #[serde(default = "default_true")]
    pub legacy_cross_parent_binding: bool,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            legacy_cross_parent_binding: true,
        }
    }
}

/// Drug order configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrdersConfig {
    /// Seconds subtracted from a revision's activation date to stop its predecessor
    #[serde(default = "default_stop_offset_seconds")]
    pub stop_offset_seconds: i64,
}

impl OrdersConfig {
    fn validate(&self) -> Result<(), String> {
        if self.stop_offset_seconds < 0 {
            return Err("orders.stop_offset_seconds must be >= 0".to_string());
        }
        Ok(())
    }
}

impl Default for OrdersConfig {
    fn default() -> Self {
        Self {
            stop_offset_seconds: default_stop_offset_seconds(),
        }
    }
}

/// A named combination of drugs ordered together
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegimenConfig {
    /// Code submitted by the regimen dropdown
    pub code: String,

    /// Display name; the code when unset
    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub components: Vec<RegimenComponent>,
}

impl RegimenConfig {
    fn validate(&self) -> Result<(), String> {
        if self.code.trim().is_empty() {
            return Err("regimens.code cannot be empty".to_string());
        }
        if self.components.is_empty() {
            return Err(format!("Regimen '{}' has no components", self.code));
        }
        for component in &self.components {
            if component.dose.is_some_and(|d| !d.is_finite() || d < 0.0) {
                return Err(format!(
                    "Regimen '{}' has an invalid dose for drug {}",
                    self.code, component.drug
                ));
            }
        }
        Ok(())
    }

    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.code)
    }
}

/// One drug of a regimen
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegimenComponent {
    pub drug: DrugId,

    #[serde(default)]
    pub dose: Option<f64>,

    #[serde(default)]
    pub dose_units: Option<ConceptId>,

    #[serde(default)]
    pub frequency: Option<ConceptId>,

    #[serde(default)]
    pub instructions: Option<String>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Enable local file logging
    #[serde(default)]
    pub local_enabled: bool,

    /// Local log file path
    #[serde(default = "default_local_path")]
    pub local_path: String,

    /// Log rotation strategy
    #[serde(default = "default_local_rotation")]
    pub local_rotation: String,

    /// Maximum log file size in MB
    #[serde(default = "default_local_max_size_mb")]
    pub local_max_size_mb: usize,
}

impl LoggingConfig {
    fn validate(&self) -> Result<(), String> {
        let valid_rotations = ["daily", "hourly"];
        if !valid_rotations.contains(&self.local_rotation.as_str()) {
            return Err(format!(
                "Invalid logging.local_rotation '{}'. Must be one of: {}",
                self.local_rotation,
                valid_rotations.join(", ")
            ));
        }

        if self.local_max_size_mb == 0 {
            return Err("logging.local_max_size_mb must be > 0".to_string());
        }

        Ok(())
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            local_enabled: false,
            local_path: default_local_path(),
            local_rotation: default_local_rotation(),
            local_max_size_mb: default_local_max_size_mb(),
        }
    }
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

fn default_date_format() -> String {
    "%Y-%m-%d".to_string()
}

fn default_datetime_format() -> String {
    "%Y-%m-%d %H:%M".to_string()
}

fn default_time_format() -> String {
    "%H:%M".to_string()
}

fn default_true_concept() -> ConceptId {
    ConceptId::from_raw(1065)
}

fn default_false_concept() -> ConceptId {
    ConceptId::from_raw(1066)
}

fn default_stop_offset_seconds() -> i64 {
    1
}

fn default_local_path() -> String {
    "/var/log/formentry".to_string()
}

fn default_local_rotation() -> String {
    "daily".to_string()
}

fn default_local_max_size_mb() -> usize {
    100
}
