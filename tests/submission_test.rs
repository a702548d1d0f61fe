// Formentry - Clinical Form Compiler and Submission Engine
// Copyright (c) 2025 Formentry Contributors
// Licensed under the MIT License

//! End-to-end tests for entering, editing and voiding encounters

mod common;

use common::{day, plan, render, repository, submit, values};
use formentry::adapters::repository::{ClinicalRepository, ClinicalWriter, InMemoryRepository};
use formentry::config::FormEntryConfig;
use formentry::core::expression::SimpleEvaluator;
use formentry::core::session::{FormMode, FormSession, RenderContext};
use formentry::domain::{EncounterId, FormEntryError, ObsValue};
use pretty_assertions::assert_eq;

const FORM: &str = r#"<htmlform>
    <encounterDate/>
    <encounterLocation/>
    <obsgroup groupingConceptId="7">
        <obs conceptId="1000" answerConceptId="1001"/>
        <obs conceptId="80000"/>
    </obsgroup>
    <obs conceptId="5089"/>
</htmlform>"#;

/// Enters one encounter through the form and returns its id
fn entered(repo: &mut InMemoryRepository) -> EncounterId {
    let applied = submit(
        repo,
        FORM,
        None,
        &values(&[
            ("w1", "2024-03-05"),
            ("w2", "Xanadu"),
            ("w3", "1001"),
            ("w4", "rash"),
            ("w5", "70"),
        ]),
        day(2024, 3, 10),
    )
    .unwrap();
    assert_eq!(applied.created_obs.len(), 4);
    applied.encounter.unwrap()
}

fn active_values(repo: &InMemoryRepository, encounter: EncounterId) -> Vec<(u32, Option<ObsValue>)> {
    let mut out: Vec<(u32, Option<ObsValue>)> = repo
        .data()
        .obs
        .iter()
        .filter(|o| o.encounter == Some(encounter) && !o.voided)
        .map(|o| (o.concept.get(), o.value.clone()))
        .collect();
    out.sort_by_key(|(concept, _)| *concept);
    out
}

#[test]
fn test_enter_creates_encounter_with_location() {
    let mut repo = repository();
    let encounter = entered(&mut repo);
    let stored = repo.encounter(encounter).unwrap();
    assert_eq!(stored.encounter_datetime, Some(day(2024, 3, 5)));
    assert_eq!(stored.location.map(|l| l.to_string()), Some("2".to_string()));

    assert_eq!(
        active_values(&repo, encounter),
        vec![
            (7, None),
            (1000, Some(ObsValue::Coded(formentry::domain::ConceptId::new(1001).unwrap()))),
            (5089, Some(ObsValue::Numeric(70.0))),
            (80000, Some(ObsValue::Text("rash".to_string()))),
        ]
    );
}

#[test]
fn test_resubmitting_rendered_values_changes_nothing() {
    let mut repo = repository();
    let encounter = entered(&mut repo);

    let rendered = render(&repo, FORM, FormMode::Edit, Some(encounter), day(2024, 3, 10)).unwrap();
    assert!(!rendered.ambiguous);
    let changes = plan(
        &repo,
        FORM,
        Some(encounter),
        &rendered.values.to_submission(),
        day(2024, 3, 10),
    )
    .unwrap();
    assert!(changes.is_empty(), "{}", changes.summary());
}

#[test]
fn test_changed_value_replaces_previous_version() {
    let mut repo = repository();
    let encounter = entered(&mut repo);
    let before = render(&repo, FORM, FormMode::Edit, Some(encounter), day(2024, 3, 10)).unwrap();

    let mut edited = before.values.to_submission();
    edited.set("w5", "72.5");
    let applied = submit(&mut repo, FORM, Some(encounter), &edited, day(2024, 3, 10)).unwrap();
    assert_eq!(applied.voided_obs.len(), 1);
    assert_eq!(applied.created_obs.len(), 1);

    let replaced = applied.voided_obs[0];
    let created = repo.data().obs.iter().find(|o| o.id == applied.created_obs[0]).unwrap();
    assert_eq!(created.previous_version, Some(replaced));
    assert_eq!(created.value, Some(ObsValue::Numeric(72.5)));

    let after = render(&repo, FORM, FormMode::View, Some(encounter), day(2024, 3, 11)).unwrap();
    assert_eq!(after.values.value("w5".parse().unwrap()), Some("72.5"));
    assert_eq!(after.values.value("w4".parse().unwrap()), Some("rash"));
}

#[test]
fn test_clearing_group_members_voids_the_group() {
    let mut repo = repository();
    let encounter = entered(&mut repo);
    let before = render(&repo, FORM, FormMode::Edit, Some(encounter), day(2024, 3, 10)).unwrap();

    let mut edited = before.values.to_submission();
    edited.remove("w3");
    edited.remove("w4");
    submit(&mut repo, FORM, Some(encounter), &edited, day(2024, 3, 10)).unwrap();

    assert_eq!(
        active_values(&repo, encounter),
        vec![(5089, Some(ObsValue::Numeric(70.0)))]
    );
}

#[test]
fn test_invalid_values_are_rejected_without_writes() {
    let mut repo = repository();
    let before = repo.data().clone();
    let err = submit(
        &mut repo,
        FORM,
        None,
        &values(&[("w1", "2024-03-05"), ("w2", "Atlantis"), ("w5", "heavy")]),
        day(2024, 3, 10),
    )
    .unwrap_err();

    let errors = err.validation_errors().unwrap();
    assert_eq!(errors.for_field("w2").count(), 1);
    assert_eq!(errors.for_field("w5").count(), 1);
    assert_eq!(repo.data(), &before);
}

#[test]
fn test_future_encounter_date_is_rejected() {
    let repo = repository();
    let err = plan(
        &repo,
        FORM,
        None,
        &values(&[("w1", "2024-04-01"), ("w5", "70")]),
        day(2024, 3, 10),
    )
    .unwrap_err();
    assert!(matches!(err, FormEntryError::Validation(_)));
}

#[test]
fn test_void_encounter_by_form() {
    let mut repo = repository();
    let encounter = entered(&mut repo);
    let config = FormEntryConfig::default();

    let changes = {
        let patient = repo.patient(common::patient()).unwrap();
        let context = RenderContext::new(FormMode::Edit, patient, day(2024, 3, 10)).with_encounter(encounter);
        let session = FormSession::open(FORM, &repo, &config, &SimpleEvaluator, context).unwrap();
        session.void_encounter(Some("wrong patient".to_string())).unwrap()
    };
    assert!(changes.void_encounter);
    repo.apply(&changes).unwrap();

    let stored = repo.encounter(encounter).unwrap();
    assert!(stored.voided);
    assert_eq!(stored.void_reason.as_deref(), Some("wrong patient"));
    assert!(active_values(&repo, encounter).is_empty());
}
