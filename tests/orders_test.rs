// Formentry - Clinical Form Compiler and Submission Engine
// Copyright (c) 2025 Formentry Contributors
// Licensed under the MIT License

//! End-to-end tests for drug order lines across encounters

mod common;

use chrono::NaiveDate;
use common::{day, plan, render, repository, submit, values};
use formentry::adapters::repository::{ClinicalRepository, InMemoryRepository};
use formentry::core::session::FormMode;
use formentry::domain::{ConceptId, DrugOrder, EncounterId, OrderAction, OrderId};
use pretty_assertions::assert_eq;

/// w1 encounter date, w2 the order line, w3 its voided flag, w4 its discontinue date
const FORM: &str = r#"<htmlform>
    <encounterDate/>
    <drugOrder drugId="2" discontinueReasonAnswers="1065,1066"/>
</htmlform>"#;

fn orders(repo: &InMemoryRepository) -> Vec<DrugOrder> {
    repo.patient_orders(common::patient()).unwrap()
}

/// Places a NEW order on 2024-01-10 and returns its encounter
fn prescribed(repo: &mut InMemoryRepository) -> EncounterId {
    let applied = submit(
        repo,
        FORM,
        None,
        &values(&[
            ("w1", "2024-01-10"),
            ("w2", "2"),
            ("w2_action", "NEW"),
            ("w2_dose", "1"),
            ("w2_instructions", "with food"),
        ]),
        day(2024, 3, 10),
    )
    .unwrap();
    assert_eq!(applied.created_orders.len(), 1);
    applied.encounter.unwrap()
}

#[test]
fn test_new_order_belongs_to_its_encounter() {
    let mut repo = repository();
    let encounter = prescribed(&mut repo);
    let placed = orders(&repo);
    assert_eq!(placed.len(), 1);
    assert_eq!(placed[0].encounter, Some(encounter));
    assert_eq!(placed[0].action, OrderAction::New);
    assert_eq!(placed[0].date_activated, Some(day(2024, 1, 10)));
    assert_eq!(placed[0].dosing_instructions.as_deref(), Some("with food"));
}

#[test]
fn test_rendered_order_line_resubmits_unchanged() {
    let mut repo = repository();
    let encounter = prescribed(&mut repo);
    let rendered = render(&repo, FORM, FormMode::Edit, Some(encounter), day(2024, 3, 10)).unwrap();
    assert_eq!(rendered.values.value("w2".parse().unwrap()), Some("2"));

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
fn test_revise_in_later_encounter_stops_previous() {
    let mut repo = repository();
    prescribed(&mut repo);
    let applied = submit(
        &mut repo,
        FORM,
        None,
        &values(&[
            ("w1", "2024-03-05"),
            ("w2", "2"),
            ("w2_action", "REVISE"),
            ("w2_dose", "2"),
        ]),
        day(2024, 3, 10),
    )
    .unwrap();
    assert_eq!(applied.created_orders.len(), 1);

    let all = orders(&repo);
    let original = all.iter().find(|o| o.action == OrderAction::New).unwrap();
    let revision = all.iter().find(|o| o.action == OrderAction::Revise).unwrap();
    let stop = NaiveDate::from_ymd_opt(2024, 3, 4)
        .unwrap()
        .and_hms_opt(23, 59, 59)
        .unwrap();
    assert_eq!(original.date_stopped, Some(stop));
    assert_eq!(revision.previous_order, original.id);
    assert_eq!(revision.dose, Some(2.0));
    assert_eq!(revision.dosing_instructions.as_deref(), Some("with food"));
    assert!(revision.is_active_on(day(2024, 3, 6)));
    assert!(!original.is_active_on(day(2024, 3, 6)));
}

#[test]
fn test_renew_with_new_instructions_is_rejected() {
    let mut repo = repository();
    prescribed(&mut repo);
    let before = orders(&repo);

    let err = submit(
        &mut repo,
        FORM,
        None,
        &values(&[
            ("w1", "2024-03-05"),
            ("w2", "2"),
            ("w2_action", "RENEW"),
            ("w2_instructions", "before bed"),
        ]),
        day(2024, 3, 10),
    )
    .unwrap_err();

    let errors = err.validation_errors().unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors.for_field("w2").count(), 1);
    assert_eq!(orders(&repo), before);
}

#[test]
fn test_discontinue_widget_records_reason() {
    let mut repo = repository();
    let first = prescribed(&mut repo);
    let applied = submit(
        &mut repo,
        FORM,
        None,
        &values(&[("w1", "2024-03-05"), ("w4", "2024-03-05"), ("w4_reason", "1066")]),
        day(2024, 3, 10),
    )
    .unwrap();
    assert_ne!(applied.encounter, Some(first));

    let all = orders(&repo);
    let original = all.iter().find(|o| o.action == OrderAction::New).unwrap();
    let discontinuation = all.iter().find(|o| o.action == OrderAction::Discontinue).unwrap();
    assert_eq!(original.date_stopped, Some(day(2024, 3, 5)));
    assert_eq!(discontinuation.previous_order, original.id);
    assert_eq!(discontinuation.order_reason, ConceptId::new(1066).ok());
    assert_eq!(discontinuation.encounter, applied.encounter);
}

#[test]
fn test_voiding_order_line_in_edit() {
    let mut repo = repository();
    let encounter = prescribed(&mut repo);
    let rendered = render(&repo, FORM, FormMode::Edit, Some(encounter), day(2024, 3, 10)).unwrap();
    let mut edited = rendered.values.to_submission();
    edited.remove("w2");

    let applied = submit(&mut repo, FORM, Some(encounter), &edited, day(2024, 3, 10)).unwrap();
    assert_eq!(applied.voided_orders, vec![OrderId::new(1).unwrap()]);
    assert!(orders(&repo).is_empty());
    assert!(repo.data().orders.iter().all(|o| o.voided));
}
