// Formentry - Clinical Form Compiler and Submission Engine
// Copyright (c) 2025 Formentry Contributors
// Licensed under the MIT License

//! In-memory repository backed by a JSON fixture
//!
//! [`InMemoryRepository::apply`] stages every change on a clone of the data
//! and swaps it in only when the whole set succeeded.

use super::traits::{ClinicalRepository, ClinicalWriter};
use crate::domain::changes::{AppliedChanges, ChangeSet, EncounterChange, ObsRef};
use crate::domain::concept::Concept;
use crate::domain::encounter::{Encounter, EncounterType, Location, Patient, Provider};
use crate::domain::errors::{FormEntryError, RepositoryError};
use crate::domain::ids::{
    ConceptId, DrugId, EncounterId, ObsId, OrderId, PatientId, PatientProgramId, ProgramId,
    WorkflowId,
};
use crate::domain::obs::{Obs, ObsArena};
use crate::domain::order::{Drug, DrugOrder};
use crate::domain::program::{PatientProgram, Program};
use crate::domain::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// Everything the in-memory store holds
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClinicalData {
    #[serde(default)]
    pub patients: Vec<Patient>,
    #[serde(default)]
    pub concepts: Vec<Concept>,
    #[serde(default)]
    pub drugs: Vec<Drug>,
    #[serde(default)]
    pub locations: Vec<Location>,
    #[serde(default)]
    pub providers: Vec<Provider>,
    #[serde(default)]
    pub encounter_types: Vec<EncounterType>,
    #[serde(default)]
    pub encounters: Vec<Encounter>,
    #[serde(default)]
    pub obs: Vec<Obs>,
    #[serde(default)]
    pub orders: Vec<DrugOrder>,
    #[serde(default)]
    pub programs: Vec<Program>,
    #[serde(default)]
    pub patient_programs: Vec<PatientProgram>,
    #[serde(default)]
    pub global_properties: BTreeMap<String, String>,
}

/// Repository holding [`ClinicalData`] in memory
#[derive(Debug, Clone, Default)]
pub struct InMemoryRepository {
    data: ClinicalData,
}

impl InMemoryRepository {
    pub fn new(data: ClinicalData) -> Self {
        Self { data }
    }

    /// Loads a JSON fixture
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|e| {
            FormEntryError::Io(format!("Failed to read fixture {}: {}", path.display(), e))
        })?;
        let data: ClinicalData = serde_json::from_str(&contents)?;
        Ok(Self::new(data))
    }

    /// Writes the current data back as pretty JSON
    pub fn save_json_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(&self.data)?;
        fs::write(path.as_ref(), json)?;
        Ok(())
    }

    pub fn data(&self) -> &ClinicalData {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut ClinicalData {
        &mut self.data
    }

    /// Observation by id, voided included
    pub fn obs(&self, id: ObsId) -> Option<&Obs> {
        self.data.obs.iter().find(|o| o.id == id)
    }
}

fn next_id(existing: impl Iterator<Item = u32>) -> u32 {
    existing.max().unwrap_or(0) + 1
}

fn typed<T>(raw: u32, parse: fn(u32) -> std::result::Result<T, String>) -> Result<T> {
    parse(raw).map_err(|e| RepositoryError::Integrity(e).into())
}

impl ClinicalRepository for InMemoryRepository {
    fn patient(&self, id: PatientId) -> Result<Patient> {
        self.data
            .patients
            .iter()
            .find(|p| p.id == id)
            .cloned()
            .ok_or_else(|| RepositoryError::not_found("Patient", id).into())
    }

    fn concept(&self, id: ConceptId) -> Result<Concept> {
        self.data
            .concepts
            .iter()
            .find(|c| c.id == id)
            .cloned()
            .ok_or_else(|| RepositoryError::not_found("Concept", id).into())
    }

    fn find_concept(&self, reference: &str) -> Result<Option<Concept>> {
        Ok(self
            .data
            .concepts
            .iter()
            .find(|c| c.matches_reference(reference))
            .cloned())
    }

    fn find_location(&self, reference: &str) -> Result<Option<Location>> {
        let reference = reference.trim();
        Ok(self
            .data
            .locations
            .iter()
            .find(|l| {
                l.id.to_string() == reference
                    || l.uuid.as_deref() == Some(reference)
                    || l.name.eq_ignore_ascii_case(reference)
            })
            .cloned())
    }

    fn find_provider(&self, reference: &str) -> Result<Option<Provider>> {
        let reference = reference.trim();
        Ok(self
            .data
            .providers
            .iter()
            .find(|p| {
                p.id.to_string() == reference
                    || p.uuid.as_deref() == Some(reference)
                    || p.name.eq_ignore_ascii_case(reference)
            })
            .cloned())
    }

    fn encounter_types(&self) -> Result<Vec<EncounterType>> {
        Ok(self.data.encounter_types.clone())
    }

    fn find_encounter_type(&self, reference: &str) -> Result<Option<EncounterType>> {
        let reference = reference.trim();
        Ok(self
            .data
            .encounter_types
            .iter()
            .find(|t| {
                t.id.to_string() == reference
                    || t.uuid.as_deref() == Some(reference)
                    || t.name.eq_ignore_ascii_case(reference)
            })
            .cloned())
    }

    fn drug(&self, id: DrugId) -> Result<Drug> {
        self.data
            .drugs
            .iter()
            .find(|d| d.id == id)
            .cloned()
            .ok_or_else(|| RepositoryError::not_found("Drug", id).into())
    }

    fn encounter(&self, id: EncounterId) -> Result<Encounter> {
        self.data
            .encounters
            .iter()
            .find(|e| e.id == Some(id))
            .cloned()
            .ok_or_else(|| RepositoryError::not_found("Encounter", id).into())
    }

    fn encounter_obs(&self, id: EncounterId) -> Result<ObsArena> {
        Ok(ObsArena::from_records(
            self.data
                .obs
                .iter()
                .filter(|o| o.encounter == Some(id))
                .cloned(),
        ))
    }

    fn encounter_orders(&self, id: EncounterId) -> Result<Vec<DrugOrder>> {
        Ok(self
            .data
            .orders
            .iter()
            .filter(|o| o.encounter == Some(id))
            .cloned()
            .collect())
    }

    fn patient_orders(&self, patient: PatientId) -> Result<Vec<DrugOrder>> {
        Ok(self
            .data
            .orders
            .iter()
            .filter(|o| o.patient == patient && !o.voided)
            .cloned()
            .collect())
    }

    fn order(&self, id: OrderId) -> Result<DrugOrder> {
        self.data
            .orders
            .iter()
            .find(|o| o.id == Some(id))
            .cloned()
            .ok_or_else(|| RepositoryError::not_found("Order", id).into())
    }

    fn program(&self, id: ProgramId) -> Result<Program> {
        self.data
            .programs
            .iter()
            .find(|p| p.id == id)
            .cloned()
            .ok_or_else(|| RepositoryError::not_found("Program", id).into())
    }

    fn program_of_workflow(&self, workflow: WorkflowId) -> Result<Program> {
        self.data
            .programs
            .iter()
            .find(|p| p.workflow(workflow).is_some())
            .cloned()
            .ok_or_else(|| RepositoryError::not_found("Workflow", workflow).into())
    }

    fn patient_programs(&self, patient: PatientId) -> Result<Vec<PatientProgram>> {
        Ok(self
            .data
            .patient_programs
            .iter()
            .filter(|pp| pp.patient == patient && !pp.voided)
            .cloned()
            .collect())
    }

    fn global_property(&self, name: &str) -> Result<Option<String>> {
        Ok(self.data.global_properties.get(name).cloned())
    }
}

impl ClinicalWriter for InMemoryRepository {
    fn apply(&mut self, changes: &ChangeSet) -> Result<AppliedChanges> {
        let mut staged = self.data.clone();
        let applied = apply_to(&mut staged, changes)?;
        self.data = staged;
        Ok(applied)
    }
}

fn integrity(message: impl Into<String>) -> FormEntryError {
    RepositoryError::Integrity(message.into()).into()
}

fn apply_to(data: &mut ClinicalData, changes: &ChangeSet) -> Result<AppliedChanges> {
    let mut applied = AppliedChanges::default();
    let void_reason = changes.void_reason.clone();

    // Encounter first, so new obs and orders have an id to attach to
    let encounter_id = match &changes.encounter {
        Some(EncounterChange::Create(encounter)) => {
            let id: EncounterId = typed(
                next_id(data.encounters.iter().filter_map(|e| e.id).map(u32::from)),
                EncounterId::new,
            )?;
            let mut encounter = encounter.clone();
            encounter.id = Some(id);
            data.encounters.push(encounter);
            Some(id)
        }
        Some(EncounterChange::Update(encounter)) => {
            let id = encounter
                .id
                .ok_or_else(|| integrity("cannot update an encounter without an id"))?;
            if changes.target_encounter.is_some_and(|t| t != id) {
                return Err(FormEntryError::Misuse(format!(
                    "change set targets encounter {:?} but updates encounter {id}",
                    changes.target_encounter
                )));
            }
            let slot = data
                .encounters
                .iter_mut()
                .find(|e| e.id == Some(id))
                .ok_or_else(|| integrity(format!("encounter {id} does not exist")))?;
            let previous = slot.clone();
            *slot = encounter.clone();
            propagate_encounter_fields(data, &previous, encounter);
            Some(id)
        }
        None => changes.target_encounter,
    };
    applied.encounter = encounter_id;

    if let Some(id) = encounter_id {
        if !data.encounters.iter().any(|e| e.id == Some(id)) {
            return Err(integrity(format!("encounter {id} does not exist")));
        }
    }

    for (id, comment) in &changes.obs_comment_updates {
        let obs = data
            .obs
            .iter_mut()
            .find(|o| o.id == *id)
            .ok_or_else(|| integrity(format!("obs {id} does not exist")))?;
        obs.comment = comment.clone();
    }

    // Voids cascade to every descendant
    let arena = ObsArena::from_records(data.obs.iter().cloned());
    for id in &changes.obs_to_void {
        if arena.get(*id).is_none() {
            return Err(integrity(format!("obs {id} does not exist")));
        }
        let mut targets = vec![*id];
        targets.extend(arena.descendants(*id));
        for target in targets {
            if let Some(obs) = data.obs.iter_mut().find(|o| o.id == target && !o.voided) {
                obs.voided = true;
                obs.void_reason = void_reason.clone();
                applied.voided_obs.push(target);
            }
        }
    }

    if !changes.obs_to_create.is_empty() {
        let encounter_id =
            encounter_id.ok_or_else(|| integrity("obs cannot be created without an encounter"))?;
        let encounter = data
            .encounters
            .iter()
            .find(|e| e.id == Some(encounter_id))
            .cloned()
            .ok_or_else(|| integrity(format!("encounter {encounter_id} does not exist")))?;
        let default_datetime = encounter
            .encounter_datetime
            .ok_or_else(|| integrity("encounter has no datetime"))?;

        let mut next = next_id(data.obs.iter().map(|o| u32::from(o.id)));
        let mut created: Vec<ObsId> = Vec::with_capacity(changes.obs_to_create.len());
        for (index, new_obs) in changes.obs_to_create.iter().enumerate() {
            let group = match new_obs.group {
                None => None,
                Some(ObsRef::New(i)) if i < index => Some(created[i]),
                Some(ObsRef::New(i)) => {
                    return Err(integrity(format!(
                        "new obs {index} references later parent {i}"
                    )))
                }
                Some(ObsRef::Existing(parent)) => {
                    let ok = data.obs.iter().any(|o| {
                        o.id == parent && !o.voided && o.encounter == Some(encounter_id)
                    });
                    if !ok {
                        return Err(integrity(format!(
                            "parent obs {parent} is not an active obs of encounter {encounter_id}"
                        )));
                    }
                    Some(parent)
                }
            };
            let id: ObsId = typed(next, ObsId::new)?;
            next += 1;
            data.obs.push(Obs {
                id,
                patient: encounter.patient,
                encounter: Some(encounter_id),
                concept: new_obs.concept,
                value: new_obs.value.clone(),
                obs_datetime: new_obs.obs_datetime.unwrap_or(default_datetime),
                location: encounter.location,
                comment: new_obs.comment.clone(),
                accession_number: new_obs.accession_number.clone(),
                group,
                voided: false,
                void_reason: None,
                previous_version: new_obs.previous_version,
            });
            created.push(id);
        }
        applied.created_obs = created;
    }

    void_emptied_groups(data, &void_reason, &mut applied);

    for id in &changes.orders_to_void {
        let order = data
            .orders
            .iter_mut()
            .find(|o| o.id == Some(*id))
            .ok_or_else(|| integrity(format!("order {id} does not exist")))?;
        order.voided = true;
        order.void_reason = void_reason.clone();
        applied.voided_orders.push(*id);
    }

    for (id, stopped) in &changes.orders_to_stop {
        let order = data
            .orders
            .iter_mut()
            .find(|o| o.id == Some(*id))
            .ok_or_else(|| integrity(format!("order {id} does not exist")))?;
        order.date_stopped = Some(*stopped);
    }

    let mut next_order = next_id(data.orders.iter().filter_map(|o| o.id).map(u32::from));
    for order in &changes.orders_to_create {
        if let Some(previous) = order.previous_order {
            if !data.orders.iter().any(|o| o.id == Some(previous)) {
                return Err(integrity(format!("previous order {previous} does not exist")));
            }
        }
        let id: OrderId = typed(next_order, OrderId::new)?;
        next_order += 1;
        let mut order = order.clone();
        order.id = Some(id);
        if order.encounter.is_none() {
            order.encounter = encounter_id;
        }
        data.orders.push(order);
        applied.created_orders.push(id);
    }

    let mut next_program = next_id(
        data.patient_programs
            .iter()
            .filter_map(|p| p.id)
            .map(u32::from),
    );
    for program in &changes.programs_to_save {
        match program.id {
            Some(id) => {
                let slot = data
                    .patient_programs
                    .iter_mut()
                    .find(|p| p.id == Some(id))
                    .ok_or_else(|| integrity(format!("patient program {id} does not exist")))?;
                *slot = program.clone();
                applied.saved_programs.push(id);
            }
            None => {
                let id: PatientProgramId = typed(next_program, PatientProgramId::new)?;
                next_program += 1;
                let mut program = program.clone();
                program.id = Some(id);
                data.patient_programs.push(program);
                applied.saved_programs.push(id);
            }
        }
    }

    if changes.void_encounter {
        let id = encounter_id.ok_or_else(|| integrity("no encounter to void"))?;
        if let Some(encounter) = data.encounters.iter_mut().find(|e| e.id == Some(id)) {
            encounter.voided = true;
            encounter.void_reason = void_reason.clone();
        }
    }

    Ok(applied)
}

/// Obs that followed the old encounter datetime or location follow the new one
fn propagate_encounter_fields(data: &mut ClinicalData, previous: &Encounter, updated: &Encounter) {
    for obs in data
        .obs
        .iter_mut()
        .filter(|o| o.encounter == updated.id && !o.voided)
    {
        if let (Some(old), Some(new)) = (previous.encounter_datetime, updated.encounter_datetime) {
            if obs.obs_datetime == old {
                obs.obs_datetime = new;
            }
        }
        if obs.location == previous.location {
            obs.location = updated.location;
        }
    }
}

/// Voids groups left with members that are all voided, innermost first
fn void_emptied_groups(data: &mut ClinicalData, reason: &Option<String>, applied: &mut AppliedChanges) {
    loop {
        let arena = ObsArena::from_records(data.obs.iter().cloned());
        let emptied: Vec<ObsId> = arena
            .active()
            .filter(|o| !arena.member_ids(o.id).is_empty() && arena.members(o.id).is_empty())
            .map(|o| o.id)
            .collect();
        if emptied.is_empty() {
            return;
        }
        for obs in data.obs.iter_mut().filter(|o| emptied.contains(&o.id)) {
            obs.voided = true;
            obs.void_reason = reason.clone();
            applied.voided_obs.push(obs.id);
        }
    }
}
