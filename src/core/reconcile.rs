// Formentry - Clinical Form Compiler and Submission Engine
// Copyright (c) 2025 Formentry Contributors
// Licensed under the MIT License

//! Submission reconciliation
//!
//! Turns a submission into a [`ChangeSet`] by comparing each field's
//! submitted value with the data bound to it:
//!
//! | Before | After | Plan |
//! |---|---|---|
//! | empty | empty | nothing |
//! | empty | value | create |
//! | value | same value | nothing |
//! | value | other value | void and create |
//! | value | empty | void |
//!
//! Multi-valued fields compare sets of values, so reordering changes
//! nothing. Every validation problem is collected before anything is
//! planned for writing; a single error rejects the whole submission.

use crate::adapters::repository::ClinicalRepository;
use crate::config::FormEntryConfig;
use crate::core::compiler::schema::{ObsField, Schema, SchemaNode};
use crate::core::matching::Binding;
use crate::core::orders::{bind_order_lines, discontinuation_of, plan_orders, OrderContext};
use crate::core::programs::{plan_programs, ProgramContext};
use crate::core::regimens::{bind_regimens, plan_regimens};
use crate::core::snapshot::EncounterSnapshot;
use crate::core::values::{parse_obs_value, SubmittedValues};
use crate::domain::changes::{ChangeSet, EncounterChange, NewObs, ObsRef};
use crate::domain::concept::ConceptDatatype;
use crate::domain::encounter::Encounter;
use crate::domain::errors::ValidationErrors;
use crate::domain::ids::{ConceptId, EncounterTypeId, LocationId, ObsId, PatientId, ProviderId, WidgetId};
use crate::domain::obs::{Obs, ObsValue};
use crate::domain::Result;
use chrono::{NaiveDate, NaiveDateTime};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Field id used for encounter-level errors when the form has no date widget
pub const ENCOUNTER_DATE_FIELD: &str = "encounterDate";

/// Inputs for reconciling one submission
pub struct SubmissionContext<'a> {
    pub repository: &'a dyn ClinicalRepository,
    pub config: &'a FormEntryConfig,
    pub patient: PatientId,
    /// Reference instant for future and past date checks
    pub now: NaiveDateTime,
    pub void_reason: Option<String>,
}

/// The encounter being edited together with the matching of its data
#[derive(Clone, Copy)]
pub struct Existing<'a> {
    pub snapshot: &'a EncounterSnapshot,
    pub binding: &'a Binding,
}

#[derive(Debug, Default)]
struct FieldPlan {
    create: Vec<NewObs>,
    void: Vec<ObsId>,
    comment: Option<(ObsId, Option<String>)>,
}

impl FieldPlan {
    fn creates(&self) -> bool {
        !self.create.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct EncounterFields {
    datetime: Option<NaiveDateTime>,
    location: Option<LocationId>,
    provider: Option<ProviderId>,
    encounter_type: Option<EncounterTypeId>,
}

struct Reconciler<'a, 'b> {
    schema: &'b Schema,
    values: &'b SubmittedValues,
    existing: Option<Existing<'b>>,
    ctx: &'b SubmissionContext<'a>,
    errors: ValidationErrors,
}

impl Reconciler<'_, '_> {
    fn today(&self) -> NaiveDate {
        self.ctx.now.date()
    }

    fn bound_obs(&self, widget: WidgetId) -> Vec<&Obs> {
        let Some(existing) = self.existing else {
            return Vec::new();
        };
        existing
            .binding
            .field_all(widget)
            .iter()
            .filter_map(|id| existing.snapshot.obs.get(*id))
            .filter(|o| !o.voided)
            .collect()
    }

    // ---- encounter ----

    fn encounter_fields(&mut self) -> Result<EncounterFields> {
        let before = self.existing.map(|e| &e.snapshot.encounter);
        let mut fields = EncounterFields {
            datetime: before.and_then(|e| e.encounter_datetime),
            location: before.and_then(|e| e.location),
            provider: before.and_then(|e| e.provider),
            encounter_type: before.and_then(|e| e.encounter_type),
        };

        if let Some(field) = self.schema.encounter_date() {
            match self.values.datetime(field.widget, &self.ctx.config.formats) {
                Err(reason) => self.errors.push(field.widget.to_string(), reason),
                Ok(None) => fields.datetime = None,
                Ok(Some(submitted)) => {
                    if !field.allow_future_dates && submitted.date() > self.today() {
                        self.errors
                            .push(field.widget.to_string(), "The encounter date cannot be in the future");
                    }
                    let same_day = fields
                        .datetime
                        .is_some_and(|d| !field.show_time && d.date() == submitted.date());
                    if !same_day {
                        fields.datetime = Some(submitted);
                    }
                }
            }
        }

        if let Some(field) = self.schema.encounter_location() {
            fields.location = match self.values.widget(field.widget) {
                None => None,
                Some(raw) => match self.ctx.repository.find_location(raw)? {
                    Some(location) => Some(location.id),
                    None => {
                        self.errors
                            .push(field.widget.to_string(), format!("Unknown location '{raw}'"));
                        None
                    }
                },
            };
            if field.required && self.values.widget(field.widget).is_none() {
                self.errors.push(field.widget.to_string(), "Required");
            }
        }

        if let Some(field) = self.schema.encounter_provider() {
            fields.provider = match self.values.widget(field.widget) {
                None => None,
                Some(raw) => match self.ctx.repository.find_provider(raw)? {
                    Some(provider) => Some(provider.id),
                    None => {
                        self.errors
                            .push(field.widget.to_string(), format!("Unknown provider '{raw}'"));
                        None
                    }
                },
            };
            if field.required && self.values.widget(field.widget).is_none() {
                self.errors.push(field.widget.to_string(), "Required");
            }
        }

        if let Some(field) = self.schema.encounter_type() {
            fields.encounter_type = match self.values.widget(field.widget) {
                None => {
                    if field.required {
                        self.errors.push(field.widget.to_string(), "Required");
                    }
                    None
                }
                Some(raw) => match raw.parse::<EncounterTypeId>() {
                    Ok(id) if field.offers(id) => Some(id),
                    _ => {
                        self.errors
                            .push(field.widget.to_string(), format!("'{raw}' is not an offered encounter type"));
                        None
                    }
                },
            };
        }
        Ok(fields)
    }

    // ---- observations ----

    /// Submitted `(question, value)` pairs of a field, validated
    fn desired(&mut self, field: &ObsField) -> Vec<(ConceptId, ObsValue)> {
        let raws: Vec<String> = if field.multi {
            self.values.dynamic(field.widget)
        } else {
            self.values.widget(field.widget).map(str::to_string).into_iter().collect()
        };
        if raws.is_empty() && field.required {
            self.errors.push(field.widget.to_string(), "Required");
        }

        let mut out = Vec::new();
        for raw in raws {
            let parsed = if field.concepts.len() > 1 {
                raw.parse::<ConceptId>()
                    .ok()
                    .filter(|c| field.records_concept(*c))
                    .zip(field.checkbox_answer)
                    .map(|(question, answer)| (question, ObsValue::Coded(answer)))
                    .ok_or_else(|| format!("'{raw}' is not one of the allowed questions"))
            } else {
                parse_obs_value(field, &raw, &self.ctx.config.formats, self.ctx.repository)
                    .map(|value| (field.concepts[0], value))
            };
            match parsed {
                Ok(pair) => {
                    if let Some(reason) = self.date_policy(field, &pair.1) {
                        self.errors.push(field.widget.to_string(), reason);
                    } else {
                        out.push(pair);
                    }
                }
                Err(reason) => self.errors.push(field.widget.to_string(), reason),
            }
        }
        out
    }

    fn date_policy(&self, field: &ObsField, value: &ObsValue) -> Option<&'static str> {
        if !matches!(field.datatype, ConceptDatatype::Date | ConceptDatatype::Datetime) {
            return None;
        }
        let date = match value {
            ObsValue::Date(d) => *d,
            ObsValue::Datetime(dt) => dt.date(),
            _ => return None,
        };
        if !field.allow_future_dates && date > self.today() {
            return Some("Cannot be in the future");
        }
        if !field.allow_past_dates && date < self.today() {
            return Some("Cannot be in the past");
        }
        None
    }

    fn plan_field(&mut self, field: &ObsField) -> FieldPlan {
        let desired = self.desired(field);
        let comment = field
            .comment_widget
            .and_then(|w| self.values.widget(w))
            .map(str::to_string);
        let bound = self.bound_obs(field.widget);
        let mut plan = FieldPlan::default();

        let new_obs = |concept: ConceptId, value: &ObsValue, replaces: Option<ObsId>| {
            let mut obs = NewObs::new(concept, Some(value.clone()));
            obs.comment = comment.clone();
            obs.previous_version = replaces;
            obs
        };
        let key = |concept: ConceptId, value: Option<&ObsValue>| {
            (concept, value.map(ObsValue::canonical).unwrap_or_default())
        };

        if field.multi {
            let wanted: BTreeSet<_> = desired.iter().map(|(c, v)| key(*c, Some(v))).collect();
            let have: BTreeSet<_> = bound.iter().map(|o| key(o.concept, o.value.as_ref())).collect();
            for obs in &bound {
                if !wanted.contains(&key(obs.concept, obs.value.as_ref())) {
                    plan.void.push(obs.id);
                }
            }
            let mut seen = BTreeSet::new();
            for (concept, value) in &desired {
                let k = key(*concept, Some(value));
                if !have.contains(&k) && seen.insert(k) {
                    plan.create.push(new_obs(*concept, value, None));
                }
            }
            return plan;
        }

        match (desired.first(), bound.first()) {
            (None, None) => {}
            (None, Some(old)) => plan.void.push(old.id),
            (Some((concept, value)), None) => plan.create.push(new_obs(*concept, value, None)),
            (Some((concept, value)), Some(old)) => {
                if key(*concept, Some(value)) != key(old.concept, old.value.as_ref()) {
                    plan.void.push(old.id);
                    plan.create.push(new_obs(*concept, value, Some(old.id)));
                } else if field.comment_widget.is_some() && old.comment != comment {
                    plan.comment = Some((old.id, comment.clone()));
                }
            }
        }
        plan
    }

    fn subtree_creates(nodes: &[SchemaNode], plans: &BTreeMap<WidgetId, FieldPlan>) -> bool {
        nodes.iter().any(|node| match node {
            SchemaNode::Obs(field) => plans.get(&field.widget).is_some_and(FieldPlan::creates),
            SchemaNode::Section(section) => Self::subtree_creates(&section.children, plans),
            SchemaNode::Group(group) => Self::subtree_creates(&group.children, plans),
            _ => false,
        })
    }

    /// Emits planned obs writes, creating group obs only around new members
    fn emit(
        &self,
        nodes: &[SchemaNode],
        parent: Option<ObsRef>,
        plans: &mut BTreeMap<WidgetId, FieldPlan>,
        changes: &mut ChangeSet,
    ) {
        for node in nodes {
            match node {
                SchemaNode::Section(section) => self.emit(&section.children, parent, plans, changes),
                SchemaNode::Obs(field) => {
                    let Some(plan) = plans.remove(&field.widget) else {
                        continue;
                    };
                    for id in plan.void {
                        changes.void_obs(id);
                    }
                    for obs in plan.create {
                        let obs = match parent {
                            Some(p) => obs.in_group(p),
                            None => obs,
                        };
                        changes.create_obs(obs);
                    }
                    if let Some(update) = plan.comment {
                        changes.obs_comment_updates.push(update);
                    }
                }
                SchemaNode::Group(group) => {
                    let bound = self.existing.and_then(|e| e.binding.group(group.key));
                    let group_ref = if Self::subtree_creates(&group.children, plans) {
                        Some(match bound {
                            Some(id) => ObsRef::Existing(id),
                            None => {
                                let new = NewObs::new(group.concept, None);
                                changes.create_obs(match parent {
                                    Some(p) => new.in_group(p),
                                    None => new,
                                })
                            }
                        })
                    } else {
                        bound.map(ObsRef::Existing)
                    };
                    self.emit(&group.children, group_ref, plans, changes);
                }
                _ => {}
            }
        }
    }
}

/// Plans every write a submission needs
///
/// `existing` is `None` when entering a new encounter.
///
/// # Errors
///
/// Returns `FormEntryError::Validation` with every problem found when any
/// submitted value is rejected, or a repository error.
pub fn plan_submission(
    schema: &Schema,
    values: &SubmittedValues,
    existing: Option<Existing<'_>>,
    ctx: &SubmissionContext<'_>,
) -> Result<ChangeSet> {
    let mut reconciler = Reconciler {
        schema,
        values,
        existing,
        ctx,
        errors: ValidationErrors::new(),
    };
    let mut changes = ChangeSet::new();
    changes.target_encounter = existing.and_then(|e| e.snapshot.encounter.id);
    changes.void_reason = ctx.void_reason.clone();

    let encounter = reconciler.encounter_fields()?;

    let mut plans = BTreeMap::new();
    for field in schema.obs_fields() {
        let plan = reconciler.plan_field(field);
        plans.insert(field.widget, plan);
    }
    reconciler.emit(&schema.nodes, None, &mut plans, &mut changes);

    let encounter_datetime = encounter.datetime.unwrap_or(ctx.now);
    let no_orders = Vec::new();
    let order_ctx = OrderContext {
        repository: ctx.repository,
        config: ctx.config,
        patient: ctx.patient,
        encounter: changes.target_encounter,
        encounter_datetime,
        existing: existing.map_or(&no_orders, |e| &e.snapshot.orders),
    };
    plan_orders(schema, values, &order_ctx, &mut changes, &mut reconciler.errors)?;
    plan_regimens(schema, values, &order_ctx, &mut changes, &mut reconciler.errors)?;

    let program_ctx = ProgramContext {
        repository: ctx.repository,
        config: ctx.config,
        patient: ctx.patient,
        encounter_datetime,
        previous_datetime: existing.and_then(|e| e.snapshot.datetime()),
    };
    plan_programs(schema, values, &program_ctx, &mut changes, &mut reconciler.errors)?;

    let needs_encounter = !changes.obs_to_create.is_empty() || !changes.orders_to_create.is_empty();
    match existing {
        None if needs_encounter => {
            if encounter.datetime.is_none() {
                let field = schema
                    .encounter_date()
                    .map_or_else(|| ENCOUNTER_DATE_FIELD.to_string(), |f| f.widget.to_string());
                reconciler.errors.push(field, "An encounter date is required");
            }
            let mut created = Encounter::new(ctx.patient);
            created.encounter_datetime = encounter.datetime;
            created.location = encounter.location;
            created.provider = encounter.provider;
            created.encounter_type = encounter.encounter_type;
            changes.encounter = Some(EncounterChange::Create(created));
        }
        None => {}
        Some(e) => {
            let before = &e.snapshot.encounter;
            if encounter.datetime.is_none() {
                reconciler.errors.push(
                    schema
                        .encounter_date()
                        .map_or_else(|| ENCOUNTER_DATE_FIELD.to_string(), |f| f.widget.to_string()),
                    "An encounter date is required",
                );
            }
            let unchanged = EncounterFields {
                datetime: before.encounter_datetime,
                location: before.location,
                provider: before.provider,
                encounter_type: before.encounter_type,
            };
            if encounter != unchanged {
                let mut updated = before.clone();
                updated.encounter_datetime = encounter.datetime;
                updated.location = encounter.location;
                updated.provider = encounter.provider;
                updated.encounter_type = encounter.encounter_type;
                changes.encounter = Some(EncounterChange::Update(updated));
            }
        }
    }

    reconciler.errors.into_result()?;
    crate::log_plan_summary!(if existing.is_some() { "edit" } else { "enter" }, changes);
    Ok(changes)
}

/// Plans voiding everything a schema recognizes in an encounter
///
/// Voids each observation and order the schema's fields bound, regimen
/// orders included. A bound
/// group is voided only when all of its members were, and the encounter
/// itself only when nothing else remains in it. An
/// already voided encounter yields an empty change set.
pub fn void_by_schema(
    schema: &Schema,
    existing: Existing<'_>,
    config: &FormEntryConfig,
    void_reason: Option<String>,
) -> ChangeSet {
    let snapshot = existing.snapshot;
    let mut changes = ChangeSet::new();
    changes.target_encounter = snapshot.encounter.id;
    changes.void_reason = void_reason;
    if snapshot.encounter.voided {
        return changes;
    }

    let mut voided: BTreeSet<ObsId> = BTreeSet::new();
    for id in existing.binding.claimed() {
        if snapshot.obs.get(id).is_some_and(|o| !o.voided) {
            changes.void_obs(id);
            voided.insert(id);
        }
    }
    // A group goes only once every active member is gone; nested groups
    // settle first, so repeat until nothing changes
    let mut groups: Vec<ObsId> = existing
        .binding
        .groups
        .values()
        .map(|m| m.obs)
        .filter(|id| snapshot.obs.get(*id).is_some_and(|o| !o.voided))
        .collect();
    loop {
        let (emptied, kept): (Vec<ObsId>, Vec<ObsId>) = groups.into_iter().partition(|group| {
            snapshot
                .obs
                .members(*group)
                .iter()
                .all(|m| voided.contains(&m.id))
        });
        groups = kept;
        if emptied.is_empty() {
            break;
        }
        for group in emptied {
            changes.void_obs(group);
            voided.insert(group);
        }
    }

    let lines = bind_order_lines(schema, &snapshot.orders);
    let regimens = bind_regimens(schema, config, &snapshot.orders);
    let recognised = lines
        .values()
        .copied()
        .chain(regimens.values().flat_map(|m| m.orders.iter().copied()));
    let mut voided_orders = BTreeSet::new();
    for order in recognised {
        for target in std::iter::once(order).chain(discontinuation_of(order, &snapshot.orders)) {
            if let Some(id) = target.id {
                changes.void_order(id);
                voided_orders.insert(id);
            }
        }
    }

    let obs_remaining = snapshot
        .obs
        .active()
        .filter(|o| !snapshot.obs.is_group(o.id))
        .any(|o| !voided.contains(&o.id));
    let orders_remaining = snapshot
        .orders
        .iter()
        .any(|o| !o.voided && o.id.is_some_and(|id| !voided_orders.contains(&id)));
    changes.void_encounter = !obs_remaining && !orders_remaining;
    debug!(
        obs = changes.obs_to_void.len(),
        orders = changes.orders_to_void.len(),
        void_encounter = changes.void_encounter,
        "Planned void by schema"
    );
    changes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::repository::{ClinicalWriter, InMemoryRepository};
    use crate::core::compiler::CompiledForm;
    use crate::core::matching::match_observations;
    use crate::core::testing::{compile_form, day, encounter_id, patient_id, repository};
    use crate::domain::obs::fixtures::{coded, obs, text};
    use pretty_assertions::assert_eq;

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
        <obs conceptId="5089"/>
    </htmlform>"#;

    fn ctx(repo: &InMemoryRepository) -> SubmissionContext<'_> {
        static CONFIG: std::sync::OnceLock<FormEntryConfig> = std::sync::OnceLock::new();
        SubmissionContext {
            repository: repo,
            config: CONFIG.get_or_init(FormEntryConfig::default),
            patient: patient_id(),
            now: day(2024, 3, 10),
            void_reason: None,
        }
    }

    fn load(repo: &InMemoryRepository, form: &CompiledForm) -> (EncounterSnapshot, Binding) {
        let snapshot = EncounterSnapshot::load(repo, encounter_id()).unwrap();
        let binding = match_observations(&form.schema, &snapshot.obs, &FormEntryConfig::default().matching);
        (snapshot, binding)
    }

    #[test]
    fn test_enter_creates_encounter_and_groups() {
        let repo = repository();
        let form = compile_form(&repo, ALLERGIES);
        let mut values = SubmittedValues::new();
        values.set("w1", "2024-03-05");
        values.set("w2", "1001");
        values.set("w3", "since childhood");
        values.set("w6", "70");

        let changes = plan_submission(&form.schema, &values, None, &ctx(&repo)).unwrap();
        assert!(matches!(changes.encounter, Some(EncounterChange::Create(_))));
        let concepts: Vec<u32> = changes.obs_to_create.iter().map(|o| o.concept.get()).collect();
        assert_eq!(concepts, vec![7, 1000, 80000, 5089]);
        assert_eq!(changes.obs_to_create[1].group, Some(ObsRef::New(0)));
        assert_eq!(changes.obs_to_create[3].group, None);
    }

    #[test]
    fn test_empty_submission_creates_nothing() {
        let repo = repository();
        let form = compile_form(&repo, ALLERGIES);
        let mut values = SubmittedValues::new();
        values.set("w1", "2024-03-05");
        let changes = plan_submission(&form.schema, &values, None, &ctx(&repo)).unwrap();
        assert!(changes.is_empty());
    }

    #[test]
    fn test_missing_encounter_date_is_rejected() {
        let repo = repository();
        let form = compile_form(&repo, ALLERGIES);
        let mut values = SubmittedValues::new();
        values.set("w6", "70");
        let err = plan_submission(&form.schema, &values, None, &ctx(&repo)).unwrap_err();
        let errors = err.validation_errors().unwrap();
        assert_eq!(errors.for_field("w1").count(), 1);
    }

    #[test]
    fn test_validation_errors_are_collected() {
        let repo = repository();
        let form = compile_form(
            &repo,
            r#"<htmlform><encounterDate/><obs conceptId="5089" required="true"/><obs conceptId="5096"/><obs conceptId="1000" answerConceptIds="1001,1002"/></htmlform>"#,
        );
        let mut values = SubmittedValues::new();
        values.set("w1", "2024-03-05");
        values.set("w3", "2030-01-01");
        values.set("w4", "1003");
        let err = plan_submission(&form.schema, &values, None, &ctx(&repo)).unwrap_err();
        let errors = err.validation_errors().unwrap();
        assert_eq!(errors.len(), 3);
        assert_eq!(errors.for_field("w2").count(), 1);
        assert_eq!(errors.for_field("w3").next().map(|e| e.message.as_str()), Some("Cannot be in the future"));
    }

    fn seeded() -> InMemoryRepository {
        let mut repo = repository();
        let data = repo.data_mut();
        data.obs.push(obs(1, 7, None, None));
        data.obs.push(obs(2, 1000, coded(1002), Some(1)));
        data.obs.push(obs(3, 80000, text("cats"), Some(1)));
        data.obs.push(obs(4, 7, None, None));
        data.obs.push(obs(5, 1000, coded(1001), Some(4)));
        data.obs.push(obs(6, 5089, Some(ObsValue::Numeric(70.0)), None));
        repo
    }

    fn resubmission() -> SubmittedValues {
        let mut values = SubmittedValues::new();
        values.set("w1", "2024-03-01");
        values.set("w2", "1001");
        values.set("w4", "1002");
        values.set("w5", "cats");
        values.set("w6", "70");
        values
    }

    #[test]
    fn test_unchanged_edit_is_a_no_op() {
        let repo = seeded();
        let form = compile_form(&repo, ALLERGIES);
        let (snapshot, binding) = load(&repo, &form);
        let existing = Existing { snapshot: &snapshot, binding: &binding };
        let changes = plan_submission(&form.schema, &resubmission(), Some(existing), &ctx(&repo)).unwrap();
        assert!(changes.is_empty(), "{}", changes.summary());
    }

    #[test]
    fn test_edit_changes_only_what_changed() {
        let repo = seeded();
        let form = compile_form(&repo, ALLERGIES);
        let (snapshot, binding) = load(&repo, &form);
        let existing = Existing { snapshot: &snapshot, binding: &binding };

        let mut values = resubmission();
        values.set("w5", "dogs too");
        values.set("w3", "hives");
        values.remove("w6");
        let changes = plan_submission(&form.schema, &values, Some(existing), &ctx(&repo)).unwrap();

        assert_eq!(changes.obs_to_void, vec![ObsId::new(3).unwrap(), ObsId::new(6).unwrap()]);
        let created: Vec<(u32, Option<ObsRef>)> = changes
            .obs_to_create
            .iter()
            .map(|o| (o.concept.get(), o.group))
            .collect();
        assert_eq!(
            created,
            vec![
                (80000, Some(ObsRef::Existing(ObsId::new(4).unwrap()))),
                (80000, Some(ObsRef::Existing(ObsId::new(1).unwrap()))),
            ]
        );
        assert_eq!(changes.obs_to_create[1].previous_version, ObsId::new(3).ok());
    }

    #[test]
    fn test_multi_values_reconcile_as_sets() {
        let mut repo = repository();
        repo.data_mut().obs.push(obs(1, 1119, coded(1001), None));
        repo.data_mut().obs.push(obs(2, 1119, coded(1002), None));
        let form = compile_form(
            &repo,
            r#"<htmlform><encounterDate/><obs conceptId="1119" style="autocomplete" selectMulti="true"/></htmlform>"#,
        );
        let (snapshot, binding) = load(&repo, &form);
        let existing = Existing { snapshot: &snapshot, binding: &binding };

        let mut values = SubmittedValues::new();
        values.set("w1", "2024-03-01");
        values.set_dynamic(WidgetId::from_sequence(2), &["1003".to_string(), "1001".to_string()]);
        let changes = plan_submission(&form.schema, &values, Some(existing), &ctx(&repo)).unwrap();
        assert_eq!(changes.obs_to_void, vec![ObsId::new(2).unwrap()]);
        assert_eq!(changes.obs_to_create.len(), 1);
        assert_eq!(changes.obs_to_create[0].value, coded(1003));
    }

    #[test]
    fn test_comment_only_change_updates_in_place() {
        let mut repo = repository();
        repo.data_mut().obs.push(obs(1, 5089, Some(ObsValue::Numeric(70.0)), None));
        let form = compile_form(
            &repo,
            r#"<htmlform><encounterDate/><obs conceptId="5089" showCommentField="true"/></htmlform>"#,
        );
        let (snapshot, binding) = load(&repo, &form);
        let existing = Existing { snapshot: &snapshot, binding: &binding };
        let mut values = SubmittedValues::new();
        values.set("w1", "2024-03-01");
        values.set("w2", "70");
        values.set("w3", "after lunch");
        let changes = plan_submission(&form.schema, &values, Some(existing), &ctx(&repo)).unwrap();
        assert!(changes.obs_to_void.is_empty());
        assert_eq!(
            changes.obs_comment_updates,
            vec![(ObsId::new(1).unwrap(), Some("after lunch".to_string()))]
        );
    }

    #[test]
    fn test_encounter_date_change_updates_encounter() {
        let repo = seeded();
        let form = compile_form(&repo, ALLERGIES);
        let (snapshot, binding) = load(&repo, &form);
        let existing = Existing { snapshot: &snapshot, binding: &binding };
        let mut values = resubmission();
        values.set("w1", "2024-03-02");
        let changes = plan_submission(&form.schema, &values, Some(existing), &ctx(&repo)).unwrap();
        match changes.encounter {
            Some(EncounterChange::Update(e)) => assert_eq!(e.encounter_datetime, Some(day(2024, 3, 2))),
            other => panic!("expected an update, got {other:?}"),
        }
    }

    #[test]
    fn test_void_by_schema_keeps_partial_encounter() {
        let mut repo = seeded();
        repo.data_mut().obs.push(obs(7, 5096, Some(ObsValue::Date(day(2024, 4, 1).date())), None));
        let form = compile_form(&repo, ALLERGIES);
        let (snapshot, binding) = load(&repo, &form);
        let changes = void_by_schema(&form.schema, Existing { snapshot: &snapshot, binding: &binding }, &FormEntryConfig::default(), None);
        assert!(!changes.void_encounter);
        assert!(changes.obs_to_void.contains(&ObsId::new(6).unwrap()));
        assert!(!changes.obs_to_void.contains(&ObsId::new(7).unwrap()));
    }

    #[test]
    fn test_void_by_schema_spares_group_with_unclaimed_member() {
        let mut repo = seeded();
        repo.data_mut()
            .obs
            .push(obs(7, 1005, Some(ObsValue::Date(day(2023, 6, 1).date())), Some(4)));
        let form = compile_form(&repo, ALLERGIES);
        let (snapshot, binding) = load(&repo, &form);
        assert_eq!(binding.unmatched, vec![ObsId::new(7).unwrap()]);

        let changes = void_by_schema(&form.schema, Existing { snapshot: &snapshot, binding: &binding }, &FormEntryConfig::default(), None);
        assert!(!changes.void_encounter);
        assert!(changes.obs_to_void.contains(&ObsId::new(5).unwrap()));
        assert!(changes.obs_to_void.contains(&ObsId::new(1).unwrap()));
        assert!(!changes.obs_to_void.contains(&ObsId::new(4).unwrap()));

        repo.apply(&changes).unwrap();
        let kept = repo.data().obs.iter().find(|o| o.id == ObsId::new(7).unwrap()).unwrap();
        assert!(!kept.voided);
        let group = repo.data().obs.iter().find(|o| o.id == ObsId::new(4).unwrap()).unwrap();
        assert!(!group.voided);
        assert!(!repo.data().encounters[0].voided);
    }

    #[test]
    fn test_void_by_schema_is_idempotent() {
        let mut repo = seeded();
        let form = compile_form(&repo, ALLERGIES);
        let (snapshot, binding) = load(&repo, &form);
        let changes = void_by_schema(
            &form.schema,
            Existing { snapshot: &snapshot, binding: &binding },
            &FormEntryConfig::default(),
            Some("entered in error".to_string()),
        );
        assert!(changes.void_encounter);
        repo.apply(&changes).unwrap();

        let (snapshot, binding) = load(&repo, &form);
        assert!(snapshot.encounter.voided);
        let again = void_by_schema(&form.schema, Existing { snapshot: &snapshot, binding: &binding }, &FormEntryConfig::default(), None);
        assert!(again.is_empty());
    }

    const TYPED: &str = r#"<htmlform><encounterDate/><encounterType types="1,2"/><obs conceptId="5089"/></htmlform>"#;

    #[test]
    fn test_encounter_type_is_set_on_create() {
        let repo = repository();
        let form = compile_form(&repo, TYPED);
        let mut values = SubmittedValues::new();
        values.set("w1", "2024-03-05");
        values.set("w2", "2");
        values.set("w3", "70");
        let changes = plan_submission(&form.schema, &values, None, &ctx(&repo)).unwrap();
        match changes.encounter {
            Some(EncounterChange::Create(e)) => assert_eq!(e.encounter_type, EncounterTypeId::new(2).ok()),
            other => panic!("expected a new encounter, got {other:?}"),
        }
    }

    #[test]
    fn test_encounter_type_must_be_offered_and_present() {
        let repo = repository();
        let form = compile_form(&repo, TYPED);
        let mut values = SubmittedValues::new();
        values.set("w1", "2024-03-05");
        values.set("w3", "70");
        let err = plan_submission(&form.schema, &values, None, &ctx(&repo)).unwrap_err();
        assert_eq!(err.validation_errors().unwrap().for_field("w2").count(), 1);

        values.set("w2", "3");
        let err = plan_submission(&form.schema, &values, None, &ctx(&repo)).unwrap_err();
        let errors = err.validation_errors().unwrap();
        assert_eq!(
            errors.for_field("w2").next().map(|e| e.message.as_str()),
            Some("'3' is not an offered encounter type")
        );
    }

    #[test]
    fn test_encounter_type_change_updates_encounter() {
        let mut repo = repository();
        repo.data_mut().encounters[0].encounter_type = EncounterTypeId::new(1).ok();
        let form = compile_form(&repo, TYPED);
        let (snapshot, binding) = load(&repo, &form);
        let mut values = SubmittedValues::new();
        values.set("w1", "2024-03-01");
        values.set("w2", "1");

        let existing = Existing { snapshot: &snapshot, binding: &binding };
        let changes = plan_submission(&form.schema, &values, Some(existing), &ctx(&repo)).unwrap();
        assert!(changes.is_empty(), "{}", changes.summary());

        values.set("w2", "2");
        let changes = plan_submission(&form.schema, &values, Some(existing), &ctx(&repo)).unwrap();
        match changes.encounter {
            Some(EncounterChange::Update(e)) => assert_eq!(e.encounter_type, EncounterTypeId::new(2).ok()),
            other => panic!("expected an update, got {other:?}"),
        }
    }

    #[test]
    fn test_complete_program_records_outcome() {
        use crate::domain::ids::ProgramId;
        use crate::domain::program::PatientProgram;

        let mut repo = repository();
        repo.data_mut().programs[0].outcomes_concept = Some(crate::core::testing::cid(1119));
        repo.data_mut()
            .patient_programs
            .push(PatientProgram::new(patient_id(), ProgramId::new(1).unwrap(), day(2024, 1, 1)));
        let form = compile_form(
            &repo,
            r#"<htmlform><encounterDate/><obs conceptId="1119" answerConceptIds="1001,1002"/><completeProgram programId="1"/></htmlform>"#,
        );
        let mut values = SubmittedValues::new();
        values.set("w1", "2024-03-05");
        values.set("w2", "1002");

        let changes = plan_submission(&form.schema, &values, None, &ctx(&repo)).unwrap();
        let completed = &changes.programs_to_save[0];
        assert_eq!(completed.date_completed, Some(day(2024, 3, 5)));
        assert_eq!(completed.outcome, Some(crate::core::testing::cid(1002)));
    }

    #[test]
    fn test_void_by_schema_voids_regimen_orders() {
        use crate::config::{RegimenComponent, RegimenConfig};
        use crate::core::testing::{cid, compile_form_with};
        use crate::domain::ids::{DrugId, OrderId};
        use crate::domain::order::DrugOrder;

        let mut repo = repository();
        let mut order = DrugOrder::new(patient_id(), cid(88));
        order.id = OrderId::new(1).ok();
        order.drug = DrugId::new(2).ok();
        order.encounter = Some(encounter_id());
        order.date_activated = Some(day(2024, 3, 1));
        repo.data_mut().orders.push(order);

        let config = FormEntryConfig {
            regimens: vec![RegimenConfig {
                code: "ASA".to_string(),
                name: None,
                components: vec![RegimenComponent {
                    drug: DrugId::new(2).unwrap(),
                    dose: None,
                    dose_units: None,
                    frequency: None,
                    instructions: None,
                }],
            }],
            ..FormEntryConfig::default()
        };
        let form = compile_form_with(&repo, &config, r#"<htmlform><standardRegimen regimenCodes="ASA"/></htmlform>"#);
        let (snapshot, binding) = load(&repo, &form);
        let changes = void_by_schema(&form.schema, Existing { snapshot: &snapshot, binding: &binding }, &config, None);
        assert_eq!(changes.orders_to_void, vec![OrderId::new(1).unwrap()]);
        assert!(changes.void_encounter);
    }
}
