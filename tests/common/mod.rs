// Formentry - Clinical Form Compiler and Submission Engine
// Copyright (c) 2025 Formentry Contributors
// Licensed under the MIT License

//! Shared fixture for integration tests

#![allow(dead_code)]

use chrono::{NaiveDate, NaiveDateTime};
use formentry::adapters::repository::{ClinicalRepository, ClinicalWriter, InMemoryRepository};
use formentry::config::FormEntryConfig;
use formentry::core::compiler::{compile, CompileEnv, CompiledForm};
use formentry::core::expression::{EvaluationScope, SimpleEvaluator};
use formentry::core::session::{FormMode, FormSession, RenderContext, RenderedForm};
use formentry::core::values::SubmittedValues;
use formentry::domain::{AppliedChanges, ChangeSet, EncounterId, PatientId, Result};
use std::collections::BTreeSet;

/// Dictionary, one patient (2) and one encounter (1, 2024-03-01 at Xanadu)
///
/// * 7 ALLERGY CONSTRUCT groups 1000 ALLERGY (coded) and 80000 ALLERGY NOTE
/// * 5089 WEIGHT, 5096 RETURN VISIT DATE
/// * program 1 with workflow 100 (states 200, 201, 202)
/// * drug 2 (concept 88)
pub const FIXTURE: &str = r#"{
  "patients": [
    { "id": 2, "gender": "F", "birthdate": "1990-01-01" }
  ],
  "concepts": [
    { "id": 7, "name": "ALLERGY CONSTRUCT", "datatype": "not_applicable" },
    { "id": 1000, "name": "ALLERGY", "datatype": "coded", "answers": [1001, 1002, 1003, 1004] },
    { "id": 1001, "name": "PENICILLIN", "datatype": "not_applicable" },
    { "id": 1002, "name": "CATS", "datatype": "not_applicable" },
    { "id": 1003, "name": "OPENMRS", "datatype": "not_applicable" },
    { "id": 1004, "name": "DOGS", "datatype": "not_applicable" },
    { "id": 80000, "name": "ALLERGY NOTE", "datatype": "text" },
    { "id": 5089, "name": "WEIGHT", "datatype": "numeric" },
    { "id": 5096, "name": "RETURN VISIT DATE", "datatype": "date" },
    { "id": 1065, "name": "YES", "datatype": "not_applicable" },
    { "id": 1066, "name": "NO", "datatype": "not_applicable" },
    { "id": 88, "name": "ASPIRIN", "datatype": "not_applicable" }
  ],
  "drugs": [
    { "id": 2, "name": "Aspirin 325mg", "concept": 88 }
  ],
  "locations": [
    { "id": 1, "name": "Unknown Location" },
    { "id": 2, "name": "Xanadu", "uuid": "9356400c-a5a2-4532-8f2b-2361b3446eb8" }
  ],
  "providers": [
    { "id": 1, "name": "Hippocrates" }
  ],
  "encounters": [
    { "id": 1, "patient": 2, "encounter_datetime": "2024-03-01T00:00:00", "location": 2 }
  ],
  "programs": [
    {
      "id": 1,
      "name": "HIV PROGRAM",
      "workflows": [
        {
          "id": 100,
          "program": 1,
          "name": "TREATMENT STATUS",
          "states": [
            { "id": 200, "name": "ON ART" },
            { "id": 201, "name": "OFF ART" },
            { "id": 202, "name": "FOLLOWING" }
          ]
        }
      ]
    }
  ],
  "global_properties": { "default_location": "Xanadu" }
}"#;

pub fn repository() -> InMemoryRepository {
    InMemoryRepository::new(serde_json::from_str(FIXTURE).expect("fixture parses"))
}

pub fn day(y: i32, m: u32, d: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(y, m, d)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap()
}

pub fn patient() -> PatientId {
    PatientId::new(2).unwrap()
}

pub fn compile_form(repo: &InMemoryRepository, template: &str) -> Result<CompiledForm> {
    let config = FormEntryConfig::default();
    let scope = EvaluationScope::new();
    let roles = BTreeSet::new();
    compile(
        template,
        &CompileEnv {
            repository: repo,
            config: &config,
            evaluator: &SimpleEvaluator,
            scope: &scope,
            roles: &roles,
            mode: FormMode::Enter,
        },
    )
}

fn context(
    repo: &InMemoryRepository,
    mode: FormMode,
    encounter: Option<EncounterId>,
    now: NaiveDateTime,
) -> RenderContext {
    let patient = repo.patient(patient()).unwrap();
    let context = RenderContext::new(mode, patient, now);
    match encounter {
        Some(id) => context.with_encounter(id),
        None => context,
    }
}

/// Renders a form in any mode
pub fn render(
    repo: &InMemoryRepository,
    template: &str,
    mode: FormMode,
    encounter: Option<EncounterId>,
    now: NaiveDateTime,
) -> Result<RenderedForm> {
    let config = FormEntryConfig::default();
    let session = FormSession::open(
        template,
        repo,
        &config,
        &SimpleEvaluator,
        context(repo, mode, encounter, now),
    )?;
    session.render()
}

/// Plans a submission in ENTER (no encounter) or EDIT mode
pub fn plan(
    repo: &InMemoryRepository,
    template: &str,
    encounter: Option<EncounterId>,
    values: &SubmittedValues,
    now: NaiveDateTime,
) -> Result<ChangeSet> {
    let config = FormEntryConfig::default();
    let mode = if encounter.is_some() { FormMode::Edit } else { FormMode::Enter };
    let session = FormSession::open(
        template,
        repo,
        &config,
        &SimpleEvaluator,
        context(repo, mode, encounter, now),
    )?;
    session.submit(values, None)
}

/// Plans and applies a submission
pub fn submit(
    repo: &mut InMemoryRepository,
    template: &str,
    encounter: Option<EncounterId>,
    values: &SubmittedValues,
    now: NaiveDateTime,
) -> Result<AppliedChanges> {
    let changes = plan(repo, template, encounter, values, now)?;
    repo.apply(&changes)
}

/// Builds submitted values from `(key, value)` pairs
pub fn values(pairs: &[(&str, &str)]) -> SubmittedValues {
    let mut values = SubmittedValues::new();
    for (key, value) in pairs {
        values.set(*key, *value);
    }
    values
}
