// Formentry - Clinical Form Compiler and Submission Engine
// Copyright (c) 2025 Formentry Contributors
// Licensed under the MIT License

//! Clinical data repository abstraction
//!
//! This module provides a trait-based abstraction over the clinical data
//! store, so the engine can run against any backend:
//!
//! - [`traits`] - read and atomic-write traits
//! - [`memory`] - in-memory implementation loaded from a JSON fixture

pub mod memory;
pub mod traits;

pub use memory::{ClinicalData, InMemoryRepository};
pub use traits::{ClinicalRepository, ClinicalWriter};
