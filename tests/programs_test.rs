// Formentry - Clinical Form Compiler and Submission Engine
// Copyright (c) 2025 Formentry Contributors
// Licensed under the MIT License

//! End-to-end tests for workflow state changes made through forms

mod common;

use chrono::NaiveDateTime;
use common::{day, render, repository, submit, values};
use formentry::adapters::repository::{ClinicalRepository, InMemoryRepository};
use formentry::core::session::FormMode;
use formentry::domain::{PatientProgram, PatientProgramId, PatientState, ProgramId, StateId, WorkflowId};
use pretty_assertions::assert_eq;

/// w1 encounter date, w2 weight, w3 treatment status
const FORM: &str = r#"<htmlform>
    <encounterDate/>
    <obs conceptId="5089"/>
    <workflowState workflowId="100"/>
</htmlform>"#;

fn workflow() -> WorkflowId {
    WorkflowId::new(100).unwrap()
}

/// Enrolled on 2024-01-01 in state 200
fn enrolled() -> InMemoryRepository {
    let mut repo = repository();
    let mut program = PatientProgram::new(common::patient(), ProgramId::new(1).unwrap(), day(2024, 1, 1));
    program.id = PatientProgramId::new(1).ok();
    program
        .states
        .push(PatientState::new(workflow(), StateId::new(200).unwrap(), day(2024, 1, 1)));
    repo.data_mut().patient_programs.push(program);
    repo
}

fn timeline(repo: &InMemoryRepository) -> Vec<(u32, NaiveDateTime, Option<NaiveDateTime>)> {
    let programs = repo.patient_programs(common::patient()).unwrap();
    assert_eq!(programs.len(), 1);
    let mut states: Vec<_> = programs[0]
        .states
        .iter()
        .filter(|s| !s.voided)
        .filter_map(|s| s.start_date.map(|start| (s.state.get(), start, s.end_date)))
        .collect();
    states.sort_by_key(|(_, start, _)| *start);
    states
}

fn visit(repo: &mut InMemoryRepository, date: &str, state: &str) -> formentry::domain::EncounterId {
    submit(
        repo,
        FORM,
        None,
        &values(&[("w1", date), ("w2", "70"), ("w3", state)]),
        day(2024, 3, 10),
    )
    .unwrap()
    .encounter
    .unwrap()
}

#[test]
fn test_backdated_state_splits_existing_timeline() {
    let mut repo = enrolled();
    visit(&mut repo, "2024-02-01", "201");
    visit(&mut repo, "2024-01-15", "202");

    assert_eq!(
        timeline(&repo),
        vec![
            (200, day(2024, 1, 1), Some(day(2024, 1, 15))),
            (202, day(2024, 1, 15), Some(day(2024, 2, 1))),
            (201, day(2024, 2, 1), None),
        ]
    );
}

#[test]
fn test_editing_encounter_date_moves_state_boundary() {
    let mut repo = enrolled();
    visit(&mut repo, "2024-02-01", "201");
    let encounter = visit(&mut repo, "2024-01-15", "202");

    let rendered = render(&repo, FORM, FormMode::Edit, Some(encounter), day(2024, 3, 10)).unwrap();
    assert_eq!(rendered.values.value("w3".parse().unwrap()), Some("202"));
    let mut edited = rendered.values.to_submission();
    edited.set("w1", "2024-01-20");
    submit(&mut repo, FORM, Some(encounter), &edited, day(2024, 3, 10)).unwrap();

    assert_eq!(
        timeline(&repo),
        vec![
            (200, day(2024, 1, 1), Some(day(2024, 1, 20))),
            (202, day(2024, 1, 20), Some(day(2024, 2, 1))),
            (201, day(2024, 2, 1), None),
        ]
    );
}

#[test]
fn test_state_only_submission_needs_no_encounter() {
    let mut repo = repository();
    let applied = submit(
        &mut repo,
        FORM,
        None,
        &values(&[("w1", "2024-03-01"), ("w3", "201")]),
        day(2024, 3, 10),
    )
    .unwrap();

    assert_eq!(applied.encounter, None);
    assert_eq!(applied.saved_programs.len(), 1);
    let programs = repo.patient_programs(common::patient()).unwrap();
    assert_eq!(programs[0].date_enrolled, day(2024, 3, 1));
    assert_eq!(timeline(&repo), vec![(201, day(2024, 3, 1), None)]);
}

#[test]
fn test_resubmitting_same_state_changes_nothing() {
    let mut repo = enrolled();
    let encounter = visit(&mut repo, "2024-02-01", "201");
    let before = timeline(&repo);

    let rendered = render(&repo, FORM, FormMode::Edit, Some(encounter), day(2024, 3, 10)).unwrap();
    let changes = common::plan(
        &repo,
        FORM,
        Some(encounter),
        &rendered.values.to_submission(),
        day(2024, 3, 10),
    )
    .unwrap();
    assert!(changes.is_empty(), "{}", changes.summary());
    assert_eq!(timeline(&repo), before);
}
