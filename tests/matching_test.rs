// Formentry - Clinical Form Compiler and Submission Engine
// Copyright (c) 2025 Formentry Contributors
// Licensed under the MIT License

//! Property tests for obs group matching

mod common;

use common::{compile_form, day, patient, repository};
use formentry::config::MatchingConfig;
use formentry::core::compiler::CompiledForm;
use formentry::core::matching::{match_observations, Binding};
use formentry::domain::{ConceptId, EncounterId, Obs, ObsArena, ObsId, ObsValue};
use proptest::prelude::*;

const ALLERGIES: &str = r#"<htmlform>
    <encounterDate/>
    <obsgroup groupingConceptId="7">
        <obs conceptId="1000" answerConceptId="1001"/>
        <obs conceptId="80000"/>
    </obsgroup>
    <obsgroup groupingConceptId="7">
        <obs conceptId="1000" answerConceptId="1002"/>
        <obs conceptId="80000"/>
    </obsgroup>
    <obsgroup groupingConceptId="7">
        <obs conceptId="1000" answerConceptId="1004"/>
        <obs conceptId="80000"/>
    </obsgroup>
</htmlform>"#;

const ANSWERS: [u32; 3] = [1001, 1002, 1004];

fn record(id: u32, concept: u32, value: Option<ObsValue>, group: Option<u32>) -> Obs {
    Obs {
        id: ObsId::new(id).unwrap(),
        patient: patient(),
        encounter: EncounterId::new(1).ok(),
        concept: ConceptId::new(concept).unwrap(),
        value,
        obs_datetime: day(2024, 3, 1),
        location: None,
        comment: None,
        accession_number: None,
        group: group.map(|g| ObsId::new(g).unwrap()),
        voided: false,
        void_reason: None,
        previous_version: None,
    }
}

/// One allergy group per answer; group `i` gets ids `base[i]`, `base[i] + 1` and `base[i] + 2`
fn allergy_records(bases: &[u32]) -> Vec<Obs> {
    let mut out = Vec::new();
    for (answer, base) in ANSWERS.iter().zip(bases) {
        out.push(record(*base, 7, None, None));
        out.push(record(
            base + 1,
            1000,
            Some(ObsValue::Coded(ConceptId::new(*answer).unwrap())),
            Some(*base),
        ));
        out.push(record(
            base + 2,
            80000,
            Some(ObsValue::Text(format!("note {answer}"))),
            Some(*base),
        ));
    }
    out
}

fn bind(form: &CompiledForm, records: Vec<Obs>) -> Binding {
    match_observations(
        &form.schema,
        &ObsArena::from_records(records),
        &MatchingConfig::default(),
    )
}

fn allergy_form() -> CompiledForm {
    compile_form(&repository(), ALLERGIES).unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn binding_ignores_record_order(records in Just(allergy_records(&[10, 20, 30])).prop_shuffle()) {
        let form = allergy_form();
        let expected = bind(&form, allergy_records(&[10, 20, 30]));
        prop_assert_eq!(bind(&form, records), expected);
    }

    #[test]
    fn each_template_binds_the_group_holding_its_answer(
        order in Just(vec![0u32, 1, 2]).prop_shuffle()
    ) {
        let form = allergy_form();
        let bases: Vec<u32> = order.iter().map(|slot| 10 + slot * 10).collect();
        let binding = bind(&form, allergy_records(&bases));

        prop_assert!(!binding.ambiguous);
        for (i, template) in form.schema.groups().iter().enumerate() {
            let group = binding.group(template.key);
            prop_assert_eq!(group, ObsId::new(bases[i]).ok());

            let fields = template.direct_fields();
            prop_assert_eq!(binding.field_obs(fields[0].widget), ObsId::new(bases[i] + 1).ok());
            prop_assert_eq!(binding.field_obs(fields[1].widget), ObsId::new(bases[i] + 2).ok());
        }
        prop_assert!(binding.unmatched.is_empty());
    }

    #[test]
    fn identical_groups_are_flagged_ambiguous(swap in any::<bool>()) {
        let form = compile_form(
            &repository(),
            r#"<htmlform>
                <obsgroup groupingConceptId="7"><obs conceptId="80000"/></obsgroup>
                <obsgroup groupingConceptId="7"><obs conceptId="80000"/></obsgroup>
            </htmlform>"#,
        )
        .unwrap();
        let (first, second) = if swap { (40, 10) } else { (10, 40) };
        let records = vec![
            record(first, 7, None, None),
            record(first + 1, 80000, Some(ObsValue::Text("a".to_string())), Some(first)),
            record(second, 7, None, None),
            record(second + 1, 80000, Some(ObsValue::Text("b".to_string())), Some(second)),
        ];
        let binding = bind(&form, records);

        prop_assert!(binding.ambiguous);
        let bound: Vec<Option<ObsId>> = form.schema.groups().iter().map(|g| binding.group(g.key)).collect();
        prop_assert!(bound.iter().all(Option::is_some));
        prop_assert_ne!(bound[0], bound[1]);
    }
}

#[test]
fn test_unrelated_group_stays_unmatched() {
    let form = allergy_form();
    let mut records = allergy_records(&[10, 20, 30]);
    records.push(record(50, 5089, Some(ObsValue::Numeric(70.0)), None));
    let binding = bind(&form, records);
    assert_eq!(binding.unmatched, vec![ObsId::new(50).unwrap()]);
}

#[test]
fn test_fewer_instances_than_templates_leaves_the_rest_empty() {
    let form = compile_form(
        &repository(),
        r#"<htmlform>
            <obsgroup groupingConceptId="7"><obs conceptId="80000"/></obsgroup>
            <obsgroup groupingConceptId="7"><obs conceptId="80000"/></obsgroup>
            <obsgroup groupingConceptId="7"><obs conceptId="80000"/></obsgroup>
        </htmlform>"#,
    )
    .unwrap();
    let records = vec![
        record(10, 7, None, None),
        record(11, 80000, Some(ObsValue::Text("a".to_string())), Some(10)),
        record(20, 7, None, None),
        record(21, 80000, Some(ObsValue::Text("b".to_string())), Some(20)),
    ];
    let binding = bind(&form, records);
    let bound: Vec<Option<ObsId>> = form.schema.groups().iter().map(|g| binding.group(g.key)).collect();
    assert_eq!(bound, vec![ObsId::new(10).ok(), ObsId::new(20).ok(), None]);
}

#[test]
fn test_view_shows_each_answer_in_its_slot_whatever_the_creation_order() {
    let mut repo = repository();
    let mut records = allergy_records(&[30, 20, 10]);
    records.reverse();
    repo.data_mut().obs.extend(records);

    let rendered = common::render(
        &repo,
        ALLERGIES,
        formentry::core::session::FormMode::View,
        EncounterId::new(1).ok(),
        day(2024, 3, 10),
    )
    .unwrap();
    let shown: Vec<Option<&str>> = ["w2", "w3", "w4", "w5", "w6", "w7"]
        .iter()
        .map(|w| rendered.values.value(w.parse().unwrap()))
        .collect();
    assert_eq!(
        shown,
        vec![
            Some("1001"),
            Some("note 1001"),
            Some("1002"),
            Some("note 1002"),
            Some("1004"),
            Some("note 1004"),
        ]
    );
    assert!(!rendered.ambiguous);
}
