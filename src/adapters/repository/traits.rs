// Formentry - Clinical Form Compiler and Submission Engine
// Copyright (c) 2025 Formentry Contributors
// Licensed under the MIT License

//! Clinical data repository traits
//!
//! The engine never talks to a data store directly. Reads go through
//! [`ClinicalRepository`]; writes go through [`ClinicalWriter`], which must
//! apply a whole [`ChangeSet`] or nothing.

use crate::domain::changes::{AppliedChanges, ChangeSet};
use crate::domain::concept::Concept;
use crate::domain::encounter::{Encounter, EncounterType, Location, Patient, Provider};
use crate::domain::ids::{ConceptId, DrugId, EncounterId, OrderId, PatientId, ProgramId, WorkflowId};
use crate::domain::obs::ObsArena;
use crate::domain::order::{Drug, DrugOrder};
use crate::domain::program::{PatientProgram, Program};
use crate::domain::Result;

/// Read access to clinical data and metadata
pub trait ClinicalRepository {
    /// Load a patient
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::NotFound` if the patient does not exist.
    fn patient(&self, id: PatientId) -> Result<Patient>;

    /// Load a concept by id
    fn concept(&self, id: ConceptId) -> Result<Concept>;

    /// Resolve a concept reference written as id, uuid or `SOURCE:code`
    ///
    /// Returns `Ok(None)` when nothing matches.
    fn find_concept(&self, reference: &str) -> Result<Option<Concept>>;

    /// Resolve a location by id, uuid or name
    fn find_location(&self, reference: &str) -> Result<Option<Location>>;

    /// Resolve a provider by id, uuid or name
    fn find_provider(&self, reference: &str) -> Result<Option<Provider>>;

    /// Every encounter type, retired ones included
    fn encounter_types(&self) -> Result<Vec<EncounterType>>;

    /// Resolve an encounter type by id, uuid or name
    fn find_encounter_type(&self, reference: &str) -> Result<Option<EncounterType>>;

    fn drug(&self, id: DrugId) -> Result<Drug>;

    fn encounter(&self, id: EncounterId) -> Result<Encounter>;

    /// Every observation recorded in an encounter, voided ones included
    fn encounter_obs(&self, id: EncounterId) -> Result<ObsArena>;

    /// Every order placed in an encounter, voided ones included
    fn encounter_orders(&self, id: EncounterId) -> Result<Vec<DrugOrder>>;

    /// Every non-voided order for a patient
    fn patient_orders(&self, patient: PatientId) -> Result<Vec<DrugOrder>>;

    fn order(&self, id: OrderId) -> Result<DrugOrder>;

    fn program(&self, id: ProgramId) -> Result<Program>;

    /// The program that owns a workflow
    fn program_of_workflow(&self, workflow: WorkflowId) -> Result<Program>;

    /// Every non-voided enrollment for a patient
    fn patient_programs(&self, patient: PatientId) -> Result<Vec<PatientProgram>>;

    /// A global property value, if set
    fn global_property(&self, name: &str) -> Result<Option<String>>;
}

/// Atomic write access
pub trait ClinicalWriter {
    /// Apply every change in the set, or none of them
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Integrity` if the set references records the
    /// store does not hold; the store is left untouched.
    fn apply(&mut self, changes: &ChangeSet) -> Result<AppliedChanges>;
}
