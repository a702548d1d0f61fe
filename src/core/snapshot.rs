// Formentry - Clinical Form Compiler and Submission Engine
// Copyright (c) 2025 Formentry Contributors
// Licensed under the MIT License

//! Persisted state of one encounter, loaded fresh for every render

use crate::adapters::repository::ClinicalRepository;
use crate::domain::context::ResultExt;
use crate::domain::encounter::Encounter;
use crate::domain::ids::EncounterId;
use crate::domain::obs::ObsArena;
use crate::domain::order::DrugOrder;
use crate::domain::program::PatientProgram;
use crate::domain::Result;
use chrono::NaiveDateTime;

/// An encounter with its observations, orders and the patient's enrollments
#[derive(Debug, Clone)]
pub struct EncounterSnapshot {
    pub encounter: Encounter,
    pub obs: ObsArena,
    /// Orders placed in this encounter, voided ones included
    pub orders: Vec<DrugOrder>,
    /// The patient's enrollments in any program
    pub programs: Vec<PatientProgram>,
}

impl EncounterSnapshot {
    /// Loads everything the binder and reconciliation read for an encounter
    ///
    /// # Errors
    ///
    /// Returns a repository error if the encounter does not exist.
    pub fn load(repository: &dyn ClinicalRepository, id: EncounterId) -> Result<Self> {
        let encounter = repository
            .encounter(id)
            .with_context(|| format!("Failed to load encounter {id}"))?;
        let obs = repository.encounter_obs(id)?;
        let orders = repository.encounter_orders(id)?;
        let programs = repository.patient_programs(encounter.patient)?;
        Ok(Self {
            encounter,
            obs,
            orders,
            programs,
        })
    }

    pub fn datetime(&self) -> Option<NaiveDateTime> {
        self.encounter.encounter_datetime
    }
}
