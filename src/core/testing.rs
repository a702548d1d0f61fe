// Formentry - Clinical Form Compiler and Submission Engine
// Copyright (c) 2025 Formentry Contributors
// Licensed under the MIT License

//! Shared fixtures for core unit tests

use crate::adapters::repository::{ClinicalData, InMemoryRepository};
use crate::config::FormEntryConfig;
use crate::core::compiler::{compile, CompileEnv, CompiledForm};
use crate::core::expression::{EvaluationScope, SimpleEvaluator};
use crate::core::session::FormMode;
use crate::domain::concept::{Concept, ConceptDatatype};
use crate::domain::encounter::{Encounter, EncounterType, Location, Patient, Provider};
use crate::domain::ids::{
    ConceptId, DrugId, EncounterId, EncounterTypeId, LocationId, PatientId, ProgramId, ProviderId,
    StateId, WorkflowId,
};
use crate::domain::order::Drug;
use crate::domain::program::{Program, ProgramWorkflow, WorkflowState};
use chrono::{NaiveDate, NaiveDateTime};
use std::collections::BTreeSet;

pub fn cid(n: u32) -> ConceptId {
    ConceptId::new(n).unwrap()
}

pub fn day(y: i32, m: u32, d: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(y, m, d)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap()
}

pub fn patient_id() -> PatientId {
    PatientId::new(2).unwrap()
}

pub fn encounter_id() -> EncounterId {
    EncounterId::new(1).unwrap()
}

fn encounter_type(id: u32, name: &str, retired: bool) -> EncounterType {
    EncounterType {
        id: EncounterTypeId::new(id).unwrap(),
        name: name.to_string(),
        uuid: None,
        retired,
    }
}

fn state(id: u32, name: &str, retired: bool) -> WorkflowState {
    WorkflowState {
        id: StateId::new(id).unwrap(),
        name: name.to_string(),
        initial: false,
        terminal: false,
        retired,
    }
}

/// Metadata used across the core tests
///
/// * 7 ALLERGY CONSTRUCT groups 1000 ALLERGY (coded), 1005 ALLERGY DATE and 80000 ALLERGY NOTE
/// * 6 OUTER GROUP holds nested 8 INNER GROUP
/// * 5089 WEIGHT (numeric), 5096 RETURN VISIT DATE (date), 1119 SYMPTOMS (coded)
/// * program 1 with workflows 100 and 101; drug 2 ASPIRIN (concept 88)
/// * encounter types 1 ADULTINITIAL and 2 ADULTRETURN, 3 OLD VISIT retired
pub fn clinical_data() -> ClinicalData {
    let mut patient = Patient::new(patient_id());
    patient.gender = Some("F".to_string());
    patient.birthdate = NaiveDate::from_ymd_opt(1990, 1, 1);

    let mut encounter = Encounter::new(patient_id());
    encounter.id = Some(encounter_id());
    encounter.encounter_datetime = Some(day(2024, 3, 1));
    encounter.location = LocationId::new(2).ok();

    ClinicalData {
        patients: vec![patient],
        concepts: vec![
            Concept::new(cid(7), "ALLERGY CONSTRUCT", ConceptDatatype::NotApplicable),
            Concept::new(cid(6), "OUTER GROUP", ConceptDatatype::NotApplicable),
            Concept::new(cid(8), "INNER GROUP", ConceptDatatype::NotApplicable),
            Concept::new(cid(1000), "ALLERGY", ConceptDatatype::Coded)
                .with_answers([cid(1001), cid(1002), cid(1003), cid(1004)]),
            Concept::new(cid(1001), "PENICILLIN", ConceptDatatype::NotApplicable),
            Concept::new(cid(1002), "CATS", ConceptDatatype::NotApplicable),
            Concept::new(cid(1003), "OPENMRS", ConceptDatatype::NotApplicable),
            Concept::new(cid(1004), "DOGS", ConceptDatatype::NotApplicable),
            Concept::new(cid(1005), "ALLERGY DATE", ConceptDatatype::Date),
            Concept::new(cid(80000), "ALLERGY NOTE", ConceptDatatype::Text),
            Concept::new(cid(5089), "WEIGHT", ConceptDatatype::Numeric),
            Concept::new(cid(5096), "RETURN VISIT DATE", ConceptDatatype::Date),
            Concept::new(cid(1119), "SYMPTOMS", ConceptDatatype::Coded)
                .with_answers([cid(1001), cid(1002), cid(1003)]),
            Concept::new(cid(1065), "YES", ConceptDatatype::NotApplicable),
            Concept::new(cid(1066), "NO", ConceptDatatype::NotApplicable),
            Concept::new(cid(88), "ASPIRIN", ConceptDatatype::NotApplicable),
            Concept::new(cid(555), "PATIENT REQUEST", ConceptDatatype::NotApplicable),
        ],
        drugs: vec![Drug {
            id: DrugId::new(2).unwrap(),
            name: "Aspirin 325mg".to_string(),
            concept: cid(88),
            retired: false,
        }],
        locations: vec![
            Location {
                id: LocationId::new(1).unwrap(),
                name: "Unknown Location".to_string(),
                uuid: None,
            },
            Location {
                id: LocationId::new(2).unwrap(),
                name: "Xanadu".to_string(),
                uuid: Some("9356400c-a5a2-4532-8f2b-2361b3446eb8".to_string()),
            },
        ],
        providers: vec![Provider {
            id: ProviderId::new(1).unwrap(),
            name: "Hippocrates".to_string(),
            uuid: None,
        }],
        encounter_types: vec![
            encounter_type(1, "ADULTINITIAL", false),
            encounter_type(2, "ADULTRETURN", false),
            encounter_type(3, "OLD VISIT", true),
        ],
        encounters: vec![encounter],
        programs: vec![Program {
            id: ProgramId::new(1).unwrap(),
            name: "HIV PROGRAM".to_string(),
            outcomes_concept: None,
            workflows: vec![
                ProgramWorkflow {
                    id: WorkflowId::new(100).unwrap(),
                    program: ProgramId::new(1).unwrap(),
                    name: "TREATMENT STATUS".to_string(),
                    states: vec![
                        state(200, "ON ART", false),
                        state(201, "OFF ART", false),
                        state(202, "FOLLOWING", false),
                        state(209, "OLD STATE", true),
                    ],
                },
                ProgramWorkflow {
                    id: WorkflowId::new(101).unwrap(),
                    program: ProgramId::new(1).unwrap(),
                    name: "PATIENT STATUS".to_string(),
                    states: vec![state(210, "ALIVE", false), state(211, "TRANSFERRED", false)],
                },
            ],
        }],
        ..ClinicalData::default()
    }
}

pub fn repository() -> InMemoryRepository {
    InMemoryRepository::new(clinical_data())
}

/// Compiles a template against a repository with default configuration
pub fn compile_form(repository: &InMemoryRepository, template: &str) -> CompiledForm {
    compile_form_with(repository, &FormEntryConfig::default(), template)
}

pub fn compile_form_with(repository: &InMemoryRepository, config: &FormEntryConfig, template: &str) -> CompiledForm {
    let scope = EvaluationScope::new();
    let roles = BTreeSet::new();
    let env = CompileEnv {
        repository,
        config,
        evaluator: &SimpleEvaluator,
        scope: &scope,
        roles: &roles,
        mode: FormMode::Enter,
    };
    compile(template, &env).unwrap()
}
