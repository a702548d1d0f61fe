// Formentry - Clinical Form Compiler and Submission Engine
// Copyright (c) 2025 Formentry Contributors
// Licensed under the MIT License

//! Core business logic for Formentry.
//!
//! # Modules
//!
//! - [`compiler`] - Template markup to widget schema and placeholder HTML
//! - [`matching`] - Binds stored obs and obs groups to schema slots
//! - [`binder`] - Produces the value each widget shows
//! - [`reconcile`] - Turns a submission into a [`ChangeSet`](crate::domain::ChangeSet)
//! - [`orders`] and [`programs`] - Drug order actions and workflow state history
//! - [`regimens`] - Standard regimens ordered as one choice
//! - [`session`] - Ties the stages together for one form in one mode
//!
//! # Submission Workflow
//!
//! 1. **Compile** the template against the patient's evaluation scope
//! 2. **Load** the encounter snapshot (VIEW and EDIT only)
//! 3. **Match** stored obs to the schema's groups and fields
//! 4. **Bind** values for display
//! 5. **Reconcile** the submitted values into a change set
//! 6. **Apply** the change set through a [`ClinicalWriter`](crate::adapters::repository::ClinicalWriter)
//!
//! # Example
//!
//! ```rust,no_run
//! use formentry::adapters::repository::{ClinicalRepository, ClinicalWriter, InMemoryRepository};
//! use formentry::config::FormEntryConfig;
//! use formentry::core::expression::SimpleEvaluator;
//! use formentry::core::session::{FormMode, FormSession, RenderContext};
//! use formentry::domain::PatientId;
//!
//! # fn example(mut repo: InMemoryRepository, template: &str) -> Result<(), Box<dyn std::error::Error>> {
//! let config = FormEntryConfig::default();
//! let now = chrono::Local::now().naive_local();
//! let patient = repo.patient(PatientId::new(2)?)?;
//! let context = RenderContext::new(FormMode::Enter, patient, now);
//!
//! let changes = {
//!     let session = FormSession::open(template, &repo, &config, &SimpleEvaluator, context)?;
//!     let rendered = session.render()?;
//!     session.submit(&rendered.values.to_submission(), None)?
//! };
//! repo.apply(&changes)?;
//! # Ok(())
//! # }
//! ```

pub mod binder;
pub mod compiler;
pub mod expression;
pub mod matching;
pub mod orders;
pub mod programs;
pub mod reconcile;
pub mod regimens;
pub mod session;
pub mod snapshot;
pub mod values;

#[cfg(test)]
pub(crate) mod testing;
