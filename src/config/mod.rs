// Formentry - Clinical Form Compiler and Submission Engine
// Copyright (c) 2025 Formentry Contributors
// Licensed under the MIT License

//! Configuration management for Formentry.
//!
//! This module provides TOML-based configuration loading, parsing, and validation.
//!
//! # Overview
//!
//! Formentry uses TOML configuration files with support for:
//! - Environment variable substitution (`${VAR_NAME}`)
//! - `FORMENTRY_<SECTION>_<KEY>` environment overrides
//! - Default values for every setting
//! - Validation on load
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use formentry::config::load_config;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = load_config("formentry.toml")?;
//!
//! println!("Date format: {}", config.formats.date_format);
//! println!("Legacy binding: {}", config.matching.legacy_cross_parent_binding);
//! # Ok(())
//! # }
//! ```
//!
//! # Configuration Structure
//!
//! - [`ApplicationConfig`] - Log level and dry-run switch
//! - [`FormatsConfig`] - Date, datetime and time formats
//! - [`ConceptsConfig`] - Concepts behind `Constant:` defaults
//! - [`DefaultsConfig`] - Site location and provider for `SystemDefault`
//! - [`MatchingConfig`] - Obs group matching behaviour
//! - [`OrdersConfig`] - Drug order date arithmetic
//! - [`RegimenConfig`] - Standard regimens and their drug components
//! - [`LoggingConfig`] - Logging configuration
//!
//! # Example Configuration
//!
//! ```toml
//! [application]
//! log_level = "info"
//!
//! [formats]
//! date_format = "%Y-%m-%d"
//! datetime_format = "%Y-%m-%d %H:%M"
//!
//! [concepts]
//! true_concept = 1065
//! false_concept = 1066
//!
//! [defaults]
//! location = "${FORMENTRY_SITE_LOCATION}"
//! ```

pub mod loader;
pub mod schema;

pub use loader::{load_config, parse_config};
pub use schema::{
    ApplicationConfig, ConceptsConfig, DefaultsConfig, FormEntryConfig, FormatsConfig,
    LoggingConfig, MatchingConfig, OrdersConfig, RegimenComponent, RegimenConfig,
};
