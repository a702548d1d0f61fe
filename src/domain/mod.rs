// Formentry - Clinical Form Compiler and Submission Engine
// Copyright (c) 2025 Formentry Contributors
// Licensed under the MIT License

//! Domain models and types for Formentry.
//!
//! # Overview
//!
//! The domain layer provides:
//! - **Strongly-typed identifiers** ([`ConceptId`], [`ObsId`], [`WidgetId`], ...)
//! - **Clinical models** ([`Concept`], [`Obs`], [`Encounter`], [`DrugOrder`], [`PatientProgram`])
//! - **The observation arena** ([`ObsArena`]) with group/member indexes
//! - **Error types** ([`FormEntryError`], [`FormDesignError`], [`ValidationErrors`])
//! - **Result type alias** ([`Result`])
//!
//! # Type Safety
//!
//! ```rust
//! use formentry::domain::{ConceptId, ObsId};
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let question = ConceptId::new(5089)?;
//! let obs = ObsId::new(42)?;
//!
//! // let wrong: ConceptId = obs;  // Compile error!
//! # Ok(())
//! # }
//! ```

pub mod changes;
pub mod concept;
pub mod context;
pub mod encounter;
pub mod errors;
pub mod ids;
pub mod obs;
pub mod order;
pub mod program;
pub mod result;

pub use changes::{AppliedChanges, ChangeSet, EncounterChange, NewObs, ObsRef};
pub use concept::{Concept, ConceptDatatype};
pub use encounter::{Encounter, EncounterType, Location, Patient, Provider};
pub use errors::{FieldError, FormDesignError, FormEntryError, RepositoryError, ValidationErrors};
pub use ids::{
    ConceptId, DrugId, EncounterId, EncounterTypeId, LocationId, ObsId, OrderId, PatientId, PatientProgramId,
    ProgramId, ProviderId, StateId, WidgetId, WidgetIdAllocator, WorkflowId,
};
pub use obs::{Obs, ObsArena, ObsValue};
pub use order::{CareSetting, DosingType, Drug, DrugOrder, OrderAction, Urgency};
pub use program::{PatientProgram, PatientState, Program, ProgramWorkflow, WorkflowState};
pub use result::Result;
