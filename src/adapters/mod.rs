// Formentry - Clinical Form Compiler and Submission Engine
// Copyright (c) 2025 Formentry Contributors
// Licensed under the MIT License

//! External system integrations for Formentry.
//!
//! - [`repository`] - clinical data store abstraction (trait-based)
//!
//! # Design Pattern
//!
//! Adapters follow the **Adapter Pattern** to isolate the clinical data store
//! and enable testing with the in-memory implementation:
//!
//! ```rust,no_run
//! use formentry::adapters::repository::{ClinicalRepository, InMemoryRepository};
//! use formentry::domain::PatientId;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let repo = InMemoryRepository::from_json_file("fixture.json")?;
//! let patient = repo.patient(PatientId::new(2)?)?;
//! println!("{:?}", patient.gender);
//! # Ok(())
//! # }
//! ```

pub mod repository;
