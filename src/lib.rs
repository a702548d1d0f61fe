// Formentry - Clinical Form Compiler and Submission Engine
// Copyright (c) 2025 Formentry Contributors
// Licensed under the MIT License

//! # Formentry - Clinical Form Compiler and Submission Engine
//!
//! Formentry compiles declarative, XML-like clinical form templates into a
//! widget schema, binds stored patient data to it, and reconciles submitted
//! values against what is already recorded with the smallest possible set of
//! writes.
//!
//! ## Overview
//!
//! - **Compiling** templates: macros, repeats, conditional and role-restricted
//!   blocks, then one widget id per data-entry field
//! - **Matching** stored obs groups back to structurally identical templates,
//!   deterministically and with an ambiguity flag
//! - **Binding** defaults or stored values for display
//! - **Reconciling** submissions into observation, drug order and program
//!   state changes that commit atomically
//!
//! ## Architecture
//!
//! - [`cli`] - Command-line interface and argument parsing
//! - [`core`] - Compiler, matching, binder, reconciliation, orders, programs
//! - [`adapters`] - Clinical data store abstraction
//! - [`domain`] - Core domain types and models
//! - [`config`] - Configuration management
//! - [`logging`] - Structured logging and observability
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use formentry::adapters::repository::InMemoryRepository;
//! use formentry::config::FormEntryConfig;
//! use formentry::core::compiler::{compile, CompileEnv};
//! use formentry::core::expression::{EvaluationScope, SimpleEvaluator};
//! use formentry::core::session::FormMode;
//! use std::collections::BTreeSet;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let repository = InMemoryRepository::from_json_file("clinic.json")?;
//! let config = FormEntryConfig::default();
//! let scope = EvaluationScope::new();
//! let roles = BTreeSet::new();
//! let env = CompileEnv {
//!     repository: &repository,
//!     config: &config,
//!     evaluator: &SimpleEvaluator,
//!     scope: &scope,
//!     roles: &roles,
//!     mode: FormMode::Enter,
//! };
//!
//! let form = compile(&std::fs::read_to_string("vitals.xml")?, &env)?;
//! println!("{} widgets", form.widget_count);
//! # Ok(())
//! # }
//! ```
//!
//! ## Error Handling
//!
//! Library functions return [`domain::Result`], whose error type
//! [`domain::FormEntryError`] separates template design mistakes from
//! per-field validation errors:
//!
//! ```rust,no_run
//! use formentry::domain::FormEntryError;
//!
//! fn report(error: &FormEntryError) {
//!     if let Some(errors) = error.validation_errors() {
//!         for field in errors.errors() {
//!             eprintln!("{}: {}", field.field_id, field.message);
//!         }
//!     } else if error.is_design_error() {
//!         eprintln!("Fix the form: {error}");
//!     }
//! }
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod logging;
