// Formentry - Clinical Form Compiler and Submission Engine
// Copyright (c) 2025 Formentry Contributors
// Licensed under the MIT License

//! Value binder
//!
//! Decides what each widget shows. When entering a new encounter, fields
//! show their defaults. When viewing or editing, fields show what the
//! matching engine bound to them and defaults are never consulted, so a
//! value cleared on an earlier edit stays cleared.
//!
//! Defaults are resolved in this order:
//!
//! 1. `defaultValue` (or `defaultDatetime`, `default`), either a literal or
//!    one of the keywords `GlobalProperty:name`, `UserProperty:name`,
//!    `SessionAttribute:name`, `SystemDefault`, `Constant:NAME`, `now`, `today`
//! 2. `defaultExpression`, evaluated against the patient and session
//!
//! A literal or expression default that does not fit its field is a form
//! design error. A keyword that yields nothing, or yields something that
//! does not fit, leaves the field empty.

use crate::adapters::repository::ClinicalRepository;
use crate::config::FormEntryConfig;
use crate::core::compiler::schema::{
    DefaultSpec, DrugOrderField, EncounterDateField, EncounterTypeField, EnrollField, ObsField,
    ReferenceField, Schema, SchemaNode, StandardRegimenField, WorkflowStateField,
};
use crate::core::expression::{EvaluationScope, ExprValue, ExpressionEvaluator};
use crate::core::matching::Binding;
use crate::core::orders::{bind_order_lines, discontinuation_of, line_parts};
use crate::core::regimens::{bind_regimens, RegimenMatch};
use crate::core::session::{FormMode, RenderContext};
use crate::core::snapshot::EncounterSnapshot;
use crate::core::values::{display_obs_value, format_obs_value, parse_obs_value, SubmittedValues};
use crate::domain::concept::ConceptDatatype;
use crate::domain::errors::{FormDesignError, FormEntryError};
use crate::domain::ids::{EncounterTypeId, WidgetId};
use crate::domain::Result;
use chrono::{NaiveDateTime, NaiveTime, Timelike};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Where a widget's value came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueSource {
    /// Persisted data bound to the field
    #[default]
    Bound,
    /// A resolved default
    Default,
    /// Values redisplayed from a rejected submission
    LastSubmission,
}

/// What one widget shows
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FieldValue {
    /// Raw values in submission form
    pub values: Vec<String>,
    /// Human readable values, parallel to `values`
    pub display: Vec<String>,
    /// Suffixed sub-values (`_hours`, `_dose`, `_reason`...)
    pub parts: BTreeMap<String, String>,
    /// Submitted through the dynamic `_hid` convention
    pub multi: bool,
    pub source: ValueSource,
}

impl FieldValue {
    fn single(value: String, display: String, source: ValueSource) -> Self {
        Self {
            values: vec![value],
            display: vec![display],
            source,
            ..Self::default()
        }
    }

    pub fn value(&self) -> Option<&str> {
        self.values.first().map(String::as_str)
    }
}

/// Values of every widget that shows something
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BoundValues {
    pub fields: BTreeMap<WidgetId, FieldValue>,
}

impl BoundValues {
    pub fn get(&self, widget: WidgetId) -> Option<&FieldValue> {
        self.fields.get(&widget)
    }

    pub fn value(&self, widget: WidgetId) -> Option<&str> {
        self.get(widget).and_then(FieldValue::value)
    }

    /// The submission a user would send by accepting every shown value
    pub fn to_submission(&self) -> SubmittedValues {
        let mut submission = SubmittedValues::new();
        for (widget, field) in &self.fields {
            if field.multi {
                submission.set_dynamic(*widget, &field.values);
            } else if let Some(value) = field.value() {
                submission.set(widget.to_string(), value);
            }
            for (suffix, value) in &field.parts {
                submission.set(widget.suffixed(suffix), value.clone());
            }
        }
        submission
    }

    /// Rebuilds widget values from a submission, for redisplay after rejection
    pub fn from_submission(schema: &Schema, submission: &SubmittedValues) -> Self {
        let multi: Vec<WidgetId> = schema
            .obs_fields()
            .iter()
            .filter(|f| f.multi)
            .map(|f| f.widget)
            .collect();
        let mut fields = BTreeMap::new();
        for widget in schema.widgets() {
            let is_multi = multi.contains(&widget);
            let values: Vec<String> = if is_multi {
                submission.dynamic(widget)
            } else {
                submission.widget(widget).map(str::to_string).into_iter().collect()
            };
            let prefix = format!("{widget}_");
            let parts: BTreeMap<String, String> = submission
                .iter()
                .filter(|(key, _)| key.starts_with(&prefix) && !key.ends_with("_hid"))
                .filter_map(|(key, raw)| {
                    let value = raw.first()?.trim();
                    (!value.is_empty()).then(|| (key[widget.to_string().len()..].to_string(), value.to_string()))
                })
                .collect();
            if values.is_empty() && parts.is_empty() {
                continue;
            }
            fields.insert(
                widget,
                FieldValue {
                    display: values.clone(),
                    values,
                    parts,
                    multi: is_multi,
                    source: ValueSource::LastSubmission,
                },
            );
        }
        Self { fields }
    }
}

/// Read-only collaborators of the binder
pub struct BinderInputs<'a> {
    pub repository: &'a dyn ClinicalRepository,
    pub config: &'a FormEntryConfig,
    pub evaluator: &'a dyn ExpressionEvaluator,
    pub scope: &'a EvaluationScope,
    pub context: &'a RenderContext,
}

/// A raw default and whether a failed type check is a design error
struct RawDefault {
    value: String,
    strict: bool,
}

struct Binder<'a, 'b> {
    inputs: &'b BinderInputs<'a>,
    out: BoundValues,
    /// Skip expression defaults; set when defaults are only being checked
    literals_only: bool,
}

/// Resolves the value of every widget
///
/// In ENTER mode defaults are resolved; otherwise `snapshot` and `binding`
/// supply the values. Literal defaults are type-checked in every mode.
///
/// # Errors
///
/// Returns a form design error for a literal or expression default that does
/// not fit its field, and a misuse error for an unknown `Constant:` name.
pub fn bind_values(
    schema: &Schema,
    binding: &Binding,
    snapshot: Option<&EncounterSnapshot>,
    inputs: &BinderInputs<'_>,
) -> Result<BoundValues> {
    let mut binder = Binder {
        inputs,
        out: BoundValues::default(),
        literals_only: false,
    };
    match (inputs.context.mode, snapshot) {
        (FormMode::Enter, _) | (_, None) => binder.bind_defaults(schema)?,
        (_, Some(snapshot)) => {
            let mut check = Binder {
                inputs,
                out: BoundValues::default(),
                literals_only: true,
            };
            check.bind_defaults(schema)?;
            binder.bind_existing(schema, binding, snapshot);
        }
    }
    debug!(
        mode = ?inputs.context.mode,
        fields = binder.out.fields.len(),
        "Bound widget values"
    );
    Ok(binder.out)
}

fn invalid_default(widget: WidgetId, value: &str, reason: impl Into<String>) -> FormEntryError {
    FormDesignError::InvalidDefault {
        field: widget.to_string(),
        value: value.to_string(),
        reason: reason.into(),
    }
    .into()
}

impl Binder<'_, '_> {
    fn put(&mut self, widget: WidgetId, value: FieldValue) {
        self.out.fields.insert(widget, value);
    }

    fn now(&self) -> NaiveDateTime {
        self.inputs.context.now
    }

    // ---- defaults ----

    fn bind_defaults(&mut self, schema: &Schema) -> Result<()> {
        for node in schema.walk() {
            match node {
                SchemaNode::Obs(field) => self.obs_default(field)?,
                SchemaNode::EncounterDate(field) => self.encounter_date_default(field)?,
                SchemaNode::EncounterLocation(field) => self.reference_default(field, true)?,
                SchemaNode::EncounterProvider(field) => self.reference_default(field, false)?,
                SchemaNode::EncounterType(field) => {
                    if let Some(id) = field.default {
                        self.put_encounter_type(field, id, ValueSource::Default);
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Resolves keywords and expressions to a raw string
    fn raw_default(&self, widget: WidgetId, spec: &DefaultSpec, system: Option<&str>) -> Result<Option<RawDefault>> {
        let ctx = self.inputs.context;
        if let Some(value) = spec.value.as_deref() {
            let keyword = |v: Option<String>| Ok(v.map(|value| RawDefault { value, strict: false }));
            if let Some(name) = value.strip_prefix("GlobalProperty:") {
                return keyword(self.inputs.repository.global_property(name.trim())?);
            }
            if let Some(name) = value.strip_prefix("UserProperty:") {
                return keyword(ctx.user_properties.get(name.trim()).cloned());
            }
            if let Some(name) = value.strip_prefix("SessionAttribute:") {
                return keyword(ctx.session_attributes.get(name.trim()).cloned());
            }
            if value.eq_ignore_ascii_case("SystemDefault") {
                return keyword(system.map(str::to_string));
            }
            if let Some(name) = value.strip_prefix("Constant:") {
                let id = self.inputs.config.concepts.constant(name).ok_or_else(|| {
                    FormEntryError::Misuse(format!("Unknown static constant '{name}'"))
                })?;
                return Ok(Some(RawDefault {
                    value: id.to_string(),
                    strict: true,
                }));
            }
            return Ok(Some(RawDefault {
                value: value.to_string(),
                strict: true,
            }));
        }
        if let Some(expression) = spec.expression.as_deref().filter(|_| !self.literals_only) {
            let result = self
                .inputs
                .evaluator
                .evaluate(expression, self.inputs.scope)
                .map_err(|reason| invalid_default(widget, expression, reason))?;
            return Ok(match result {
                ExprValue::Null => None,
                ExprValue::Text(ref s) if s.is_empty() => None,
                other => Some(RawDefault {
                    value: other.to_string(),
                    strict: true,
                }),
            });
        }
        Ok(None)
    }

    /// Type-checks a resolved default; loose defaults that do not fit are dropped
    fn checked<T>(&self, widget: WidgetId, raw: &RawDefault, outcome: std::result::Result<T, String>) -> Result<Option<T>> {
        match outcome {
            Ok(value) => Ok(Some(value)),
            Err(reason) if raw.strict => Err(invalid_default(widget, &raw.value, reason)),
            Err(reason) => {
                warn!(widget = %widget, value = %raw.value, reason = %reason, "Ignoring default that does not fit its field");
                Ok(None)
            }
        }
    }

    fn obs_default(&mut self, field: &ObsField) -> Result<()> {
        let Some(raw) = self.raw_default(field.widget, &field.default, None)? else {
            return Ok(());
        };
        let formats = &self.inputs.config.formats;
        let text = match raw.value.trim().to_ascii_lowercase().as_str() {
            "now" | "today" if field.datatype.is_temporal() => {
                let now = if raw.value.trim().eq_ignore_ascii_case("today") {
                    self.now().date().and_time(NaiveTime::MIN)
                } else {
                    self.now()
                };
                match field.datatype {
                    ConceptDatatype::Date => now.format(&formats.date_format).to_string(),
                    ConceptDatatype::Time => now.format(&formats.time_format).to_string(),
                    _ => now.format(&formats.datetime_format).to_string(),
                }
            }
            "true" if field.checkbox_answer.is_some() && field.concepts.len() == 1 => field
                .checkbox_answer
                .map(|a| a.to_string())
                .unwrap_or_default(),
            _ => raw.value.trim().to_string(),
        };

        if field.concepts.len() > 1 {
            let outcome = field
                .answers
                .iter()
                .find(|a| a.concept.to_string() == text)
                .map(|a| (a.concept.to_string(), a.label.clone()))
                .ok_or_else(|| format!("'{text}' is not one of the field's question concepts"));
            if let Some((value, label)) = self.checked(field.widget, &raw, outcome)? {
                self.put(field.widget, FieldValue::single(value, label, ValueSource::Default));
            }
            return Ok(());
        }

        let outcome = parse_obs_value(field, &text, formats, self.inputs.repository);
        if let Some(value) = self.checked(field.widget, &raw, outcome)? {
            let display = display_obs_value(field, &value, formats, self.inputs.repository);
            let mut bound = FieldValue::single(format_obs_value(&value, formats), display, ValueSource::Default);
            bound.multi = field.multi;
            self.put(field.widget, bound);
        }
        Ok(())
    }

    fn encounter_date_default(&mut self, field: &EncounterDateField) -> Result<()> {
        let Some(raw) = self.raw_default(field.widget, &field.default, None)? else {
            return Ok(());
        };
        let formats = &self.inputs.config.formats;
        let outcome = match raw.value.trim().to_ascii_lowercase().as_str() {
            "now" => Ok(self.now()),
            "today" => Ok(self.now().date().and_time(NaiveTime::MIN)),
            _ => NaiveDateTime::parse_from_str(raw.value.trim(), &formats.datetime_format)
                .or_else(|_| {
                    crate::core::values::parse_date(&raw.value, formats).map(|d| d.and_time(NaiveTime::MIN))
                }),
        };
        if let Some(datetime) = self.checked(field.widget, &raw, outcome)? {
            let value = self.encounter_date_value(field, datetime, ValueSource::Default);
            self.put(field.widget, value);
        }
        Ok(())
    }

    fn reference_default(&mut self, field: &ReferenceField, location: bool) -> Result<()> {
        let defaults = &self.inputs.config.defaults;
        let system = if location {
            defaults.location.as_deref()
        } else {
            defaults.provider.as_deref()
        };
        let Some(raw) = self.raw_default(field.widget, &field.default, system)? else {
            return Ok(());
        };
        let repository = self.inputs.repository;
        let found = if location {
            repository
                .find_location(&raw.value)?
                .map(|l| (l.id.to_string(), l.name))
        } else {
            repository
                .find_provider(&raw.value)?
                .map(|p| (p.id.to_string(), p.name))
        };
        let kind = if location { "location" } else { "provider" };
        let outcome = found.ok_or_else(|| format!("no {kind} matches '{}'", raw.value));
        if let Some((id, name)) = self.checked(field.widget, &raw, outcome)? {
            self.put(field.widget, FieldValue::single(id, name, ValueSource::Default));
        }
        Ok(())
    }

    fn put_encounter_type(&mut self, field: &EncounterTypeField, id: EncounterTypeId, source: ValueSource) {
        let label = field
            .options
            .iter()
            .find(|o| o.encounter_type == id)
            .map_or_else(|| id.to_string(), |o| o.label.clone());
        self.put(field.widget, FieldValue::single(id.to_string(), label, source));
    }

    fn encounter_date_value(&self, field: &EncounterDateField, datetime: NaiveDateTime, source: ValueSource) -> FieldValue {
        let formats = &self.inputs.config.formats;
        let mut value = FieldValue::single(
            datetime.format(&formats.date_format).to_string(),
            if field.show_time {
                datetime.format(&formats.datetime_format).to_string()
            } else {
                datetime.format(&formats.date_format).to_string()
            },
            source,
        );
        if field.show_time {
            value.parts.insert("_hours".to_string(), datetime.hour().to_string());
            value.parts.insert("_minutes".to_string(), datetime.minute().to_string());
            value.parts.insert("_seconds".to_string(), datetime.second().to_string());
        }
        value
    }

    // ---- existing data ----

    fn bind_existing(&mut self, schema: &Schema, binding: &Binding, snapshot: &EncounterSnapshot) {
        let encounter = &snapshot.encounter;
        let orders = bind_order_lines(schema, &snapshot.orders);
        let regimens = bind_regimens(schema, self.inputs.config, &snapshot.orders);
        for node in schema.walk() {
            match node {
                SchemaNode::Obs(field) => self.bound_obs(field, binding, snapshot),
                SchemaNode::EncounterDate(field) => {
                    if let Some(datetime) = encounter.encounter_datetime {
                        let value = self.encounter_date_value(field, datetime, ValueSource::Bound);
                        self.put(field.widget, value);
                    }
                }
                SchemaNode::EncounterLocation(field) => {
                    if let Some(id) = encounter.location {
                        let name = self
                            .inputs
                            .repository
                            .find_location(&id.to_string())
                            .ok()
                            .flatten()
                            .map_or_else(|| id.to_string(), |l| l.name);
                        self.put(field.widget, FieldValue::single(id.to_string(), name, ValueSource::Bound));
                    }
                }
                SchemaNode::EncounterProvider(field) => {
                    if let Some(id) = encounter.provider {
                        let name = self
                            .inputs
                            .repository
                            .find_provider(&id.to_string())
                            .ok()
                            .flatten()
                            .map_or_else(|| id.to_string(), |p| p.name);
                        self.put(field.widget, FieldValue::single(id.to_string(), name, ValueSource::Bound));
                    }
                }
                SchemaNode::EncounterType(field) => {
                    if let Some(id) = encounter.encounter_type {
                        self.put_encounter_type(field, id, ValueSource::Bound);
                    }
                }
                SchemaNode::WorkflowState(field) => self.bound_state(field, snapshot),
                SchemaNode::EnrollInProgram(field) => self.bound_enrollment(field, snapshot),
                SchemaNode::DrugOrder(field) => {
                    if let Some(order) = orders.get(&field.widget) {
                        self.bound_order(field, order, snapshot);
                    }
                }
                SchemaNode::StandardRegimen(field) => {
                    if let Some(found) = regimens.get(&field.widget) {
                        self.bound_regimen(field, found);
                    }
                }
                SchemaNode::Section(_) | SchemaNode::Group(_) | SchemaNode::CompleteProgram(_) => {}
            }
        }
    }

    fn bound_obs(&mut self, field: &ObsField, binding: &Binding, snapshot: &EncounterSnapshot) {
        let formats = &self.inputs.config.formats;
        let bound: Vec<_> = binding
            .field_all(field.widget)
            .iter()
            .filter_map(|id| snapshot.obs.get(*id))
            .collect();
        let Some(first) = bound.first() else {
            return;
        };

        let mut value = FieldValue {
            multi: field.multi,
            source: ValueSource::Bound,
            ..FieldValue::default()
        };
        for obs in &bound {
            if field.concepts.len() > 1 {
                let label = field
                    .answers
                    .iter()
                    .find(|a| a.concept == obs.concept)
                    .map_or_else(|| obs.concept.to_string(), |a| a.label.clone());
                value.values.push(obs.concept.to_string());
                value.display.push(label);
            } else if let Some(v) = &obs.value {
                value.values.push(format_obs_value(v, formats));
                value
                    .display
                    .push(display_obs_value(field, v, formats, self.inputs.repository));
            }
        }
        if let (Some(widget), Some(comment)) = (field.comment_widget, first.comment.as_ref()) {
            self.put(
                widget,
                FieldValue::single(comment.clone(), comment.clone(), ValueSource::Bound),
            );
        }
        if !value.values.is_empty() {
            self.put(field.widget, value);
        }
    }

    fn bound_state(&mut self, field: &WorkflowStateField, snapshot: &EncounterSnapshot) {
        let Some(date) = snapshot.datetime() else {
            return;
        };
        let current = snapshot
            .programs
            .iter()
            .filter(|p| p.program == field.program && !p.voided)
            .find_map(|p| p.state_on(field.workflow, date));
        let Some(state) = current else {
            return;
        };
        if let Some(option) = field.options.iter().find(|o| o.state == state.state) {
            self.put(
                field.widget,
                FieldValue::single(option.state.to_string(), option.label.clone(), ValueSource::Bound),
            );
        }
    }

    fn bound_enrollment(&mut self, field: &EnrollField, snapshot: &EncounterSnapshot) {
        let Some(date) = snapshot.datetime() else {
            return;
        };
        let Some(enrollment) = snapshot
            .programs
            .iter()
            .find(|p| p.program == field.program && p.is_active_on(date))
        else {
            return;
        };
        self.put(
            field.widget,
            FieldValue::single("true".to_string(), "true".to_string(), ValueSource::Bound),
        );
        if let Some(widget) = field.date_widget {
            let shown = enrollment
                .date_enrolled
                .format(&self.inputs.config.formats.date_format)
                .to_string();
            self.put(widget, FieldValue::single(shown.clone(), shown, ValueSource::Bound));
        }
    }

    fn bound_regimen(&mut self, field: &StandardRegimenField, found: &RegimenMatch<'_>) {
        let formats = &self.inputs.config.formats;
        let label = field
            .regimens
            .iter()
            .find(|r| r.code == found.code)
            .map_or_else(|| found.code.clone(), |r| r.label.clone());
        self.put(field.widget, FieldValue::single(found.code.clone(), label, ValueSource::Bound));

        if let Some(start) = found.start {
            let shown = start.format(&formats.date_format).to_string();
            self.put(field.start_widget, FieldValue::single(shown.clone(), shown, ValueSource::Bound));
        }
        if let Some((stopped, reason)) = found.stopped() {
            let shown = stopped.format(&formats.datetime_format).to_string();
            let mut value = FieldValue::single(shown.clone(), shown, ValueSource::Bound);
            if let Some(reason) = reason {
                value.parts.insert("_reason".to_string(), reason.to_string());
            }
            self.put(field.discontinued_widget, value);
        }
    }

    fn bound_order(&mut self, field: &DrugOrderField, order: &crate::domain::order::DrugOrder, snapshot: &EncounterSnapshot) {
        let config = self.inputs.config;
        let (value, display) = match order.drug {
            Some(drug) => (
                drug.to_string(),
                self.inputs
                    .repository
                    .drug(drug)
                    .map_or_else(|_| drug.to_string(), |d| d.name),
            ),
            None => (
                order.concept.to_string(),
                field.label.clone().unwrap_or_else(|| order.concept.to_string()),
            ),
        };
        let mut line = FieldValue::single(value, display, ValueSource::Bound);
        line.parts = line_parts(order, config);
        self.put(field.widget, line);

        if let Some(dc) = discontinuation_of(order, &snapshot.orders) {
            if let Some(date) = dc.date_activated {
                let shown = date.format(&config.formats.datetime_format).to_string();
                let mut value = FieldValue::single(shown.clone(), shown, ValueSource::Bound);
                if let Some(reason) = dc.order_reason {
                    value.parts.insert("_reason".to_string(), reason.to_string());
                }
                self.put(field.discontinued_widget, value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::repository::InMemoryRepository;
    use crate::core::expression::SimpleEvaluator;
    use crate::core::matching::match_observations;
    use crate::core::testing::{cid, compile_form, compile_form_with, day, encounter_id, patient_id, repository};
    use crate::domain::obs::fixtures::{coded, obs};
    use crate::domain::obs::ObsValue;
    use crate::domain::program::{PatientProgram, PatientState};
    use crate::domain::ids::{ProgramId, StateId, WorkflowId};
    use crate::domain::encounter::Patient;
    use pretty_assertions::assert_eq;

    fn context(mode: FormMode) -> RenderContext {
        let mut context = RenderContext::new(mode, Patient::new(patient_id()), day(2024, 3, 1));
        context.user_properties.insert("favouriteLocation".to_string(), "Xanadu".to_string());
        context
    }

    fn enter(repo: &InMemoryRepository, config: &FormEntryConfig, template: &str) -> Result<BoundValues> {
        let form = compile_form(repo, template);
        let context = context(FormMode::Enter);
        let scope = EvaluationScope::for_patient(
            &repo.patient(patient_id()).unwrap(),
            context.now.date(),
            Vec::<String>::new(),
            &context.session_attributes,
        );
        let inputs = BinderInputs {
            repository: repo,
            config,
            evaluator: &SimpleEvaluator,
            scope: &scope,
            context: &context,
        };
        bind_values(&form.schema, &Binding::default(), None, &inputs)
    }

    fn edit(repo: &InMemoryRepository, template: &str) -> Result<BoundValues> {
        edit_with(repo, &FormEntryConfig::default(), template)
    }

    fn edit_with(repo: &InMemoryRepository, config: &FormEntryConfig, template: &str) -> Result<BoundValues> {
        let form = compile_form_with(repo, config, template);
        let snapshot = EncounterSnapshot::load(repo, encounter_id()).unwrap();
        let binding = match_observations(&form.schema, &snapshot.obs, &config.matching);
        let context = context(FormMode::Edit);
        let scope = EvaluationScope::new();
        let inputs = BinderInputs {
            repository: repo,
            config,
            evaluator: &SimpleEvaluator,
            scope: &scope,
            context: &context,
        };
        bind_values(&form.schema, &binding, Some(&snapshot), &inputs)
    }

    fn w(n: u32) -> WidgetId {
        WidgetId::from_sequence(n)
    }

    #[test]
    fn test_literal_default() {
        let repo = repository();
        let values = enter(&repo, &FormEntryConfig::default(), r#"<htmlform><obs conceptId="5089" defaultValue="70.0"/></htmlform>"#).unwrap();
        let field = values.get(w(1)).unwrap();
        assert_eq!(field.values, vec!["70"]);
        assert_eq!(field.source, ValueSource::Default);
    }

    #[test]
    fn test_invalid_literal_default_is_design_error() {
        let repo = repository();
        let err = enter(&repo, &FormEntryConfig::default(), r#"<htmlform><obs conceptId="5089" defaultValue="heavy"/></htmlform>"#).unwrap_err();
        assert!(err.is_design_error());

        let err = enter(&repo, &FormEntryConfig::default(), r#"<htmlform><obs conceptId="1000" answerConceptIds="1001,1002" defaultValue="1003"/></htmlform>"#).unwrap_err();
        assert!(err.is_design_error());
    }

    #[test]
    fn test_absent_keyword_leaves_field_empty() {
        let repo = repository();
        let values = enter(&repo, &FormEntryConfig::default(), r#"<htmlform><obs conceptId="5089" defaultValue="GlobalProperty:formentry.weight"/></htmlform>"#).unwrap();
        assert!(values.get(w(1)).is_none());
    }

    #[test]
    fn test_global_property_default() {
        let mut repo = repository();
        repo.data_mut()
            .global_properties
            .insert("formentry.weight".to_string(), "62".to_string());
        let values = enter(&repo, &FormEntryConfig::default(), r#"<htmlform><obs conceptId="5089" defaultValue="GlobalProperty:formentry.weight"/></htmlform>"#).unwrap();
        assert_eq!(values.value(w(1)), Some("62"));
    }

    #[test]
    fn test_checkbox_true_default() {
        let repo = repository();
        let values = enter(&repo, &FormEntryConfig::default(), r#"<htmlform><obs conceptId="1119" answerConceptId="1002" defaultValue="true"/></htmlform>"#).unwrap();
        let field = values.get(w(1)).unwrap();
        assert_eq!(field.values, vec!["1002"]);
        assert_eq!(field.display, vec!["CATS"]);
    }

    #[test]
    fn test_location_defaults() {
        let repo = repository();
        let mut config = FormEntryConfig::default();
        config.defaults.location = Some("Xanadu".to_string());
        let values = enter(&repo, &config, r#"<htmlform><encounterLocation default="SystemDefault"/></htmlform>"#).unwrap();
        assert_eq!(values.value(w(1)), Some("2"));

        let values = enter(&repo, &FormEntryConfig::default(), r#"<htmlform><encounterLocation default="UserProperty:favouriteLocation"/></htmlform>"#).unwrap();
        assert_eq!(values.get(w(1)).unwrap().display, vec!["Xanadu"]);

        let values = enter(&repo, &FormEntryConfig::default(), r#"<htmlform><encounterLocation default="SystemDefault"/></htmlform>"#).unwrap();
        assert!(values.get(w(1)).is_none());

        let err = enter(&repo, &FormEntryConfig::default(), r#"<htmlform><encounterLocation default="Atlantis"/></htmlform>"#).unwrap_err();
        assert!(err.is_design_error());
    }

    #[test]
    fn test_expression_default() {
        let repo = repository();
        let values = enter(&repo, &FormEntryConfig::default(), r#"<htmlform><obs conceptId="5089" defaultExpression="patient.age"/></htmlform>"#).unwrap();
        assert_eq!(values.value(w(1)), Some("34"));
    }

    #[test]
    fn test_unknown_constant_is_misuse() {
        let repo = repository();
        let err = enter(&repo, &FormEntryConfig::default(), r#"<htmlform><obs conceptId="5089" defaultValue="Constant:NO_SUCH"/></htmlform>"#).unwrap_err();
        assert!(matches!(err, FormEntryError::Misuse(_)));
    }

    #[test]
    fn test_today_default_for_date() {
        let repo = repository();
        let values = enter(&repo, &FormEntryConfig::default(), r#"<htmlform><obs conceptId="5096" defaultDatetime="today"/><encounterDate default="now" showTime="true"/></htmlform>"#).unwrap();
        assert_eq!(values.value(w(1)), Some("2024-03-01"));
        let date = values.get(w(2)).unwrap();
        assert_eq!(date.value(), Some("2024-03-01"));
        assert_eq!(date.parts.get("_hours").map(String::as_str), Some("0"));
    }

    #[test]
    fn test_edit_never_reads_defaults() {
        let mut repo = repository();
        repo.data_mut().obs.push(obs(10, 1000, coded(1001), None));
        let values = edit(
            &repo,
            r#"<htmlform><obs conceptId="1000"/><obs conceptId="5089" defaultValue="70"/><encounterDate/></htmlform>"#,
        )
        .unwrap();
        assert_eq!(values.value(w(1)), Some("1001"));
        assert_eq!(values.get(w(1)).unwrap().display, vec!["PENICILLIN"]);
        assert!(values.get(w(2)).is_none());
        assert_eq!(values.value(w(3)), Some("2024-03-01"));
    }

    #[test]
    fn test_invalid_literal_default_fails_in_edit() {
        let mut repo = repository();
        repo.data_mut().obs.push(obs(10, 5089, Some(ObsValue::Numeric(70.0)), None));
        let err = edit(&repo, r#"<htmlform><obs conceptId="5089" defaultValue="heavy"/></htmlform>"#).unwrap_err();
        assert!(matches!(
            err,
            FormEntryError::FormDesign(FormDesignError::InvalidDefault { .. })
        ));

        let err = edit(&repo, r#"<htmlform><obs conceptId="1000" answerConceptIds="1001,1002" defaultValue="1003"/></htmlform>"#).unwrap_err();
        assert!(err.is_design_error());
    }

    #[test]
    fn test_bound_workflow_state_and_enrollment() {
        let mut repo = repository();
        let mut program = PatientProgram::new(patient_id(), ProgramId::new(1).unwrap(), day(2024, 1, 1));
        program.states.push(PatientState::new(
            WorkflowId::new(100).unwrap(),
            StateId::new(201).unwrap(),
            day(2024, 2, 1),
        ));
        repo.data_mut().patient_programs.push(program);
        let values = edit(
            &repo,
            r#"<htmlform><workflowState workflowId="100"/><enrollInProgram programId="1" showDate="true"/></htmlform>"#,
        )
        .unwrap();
        assert_eq!(values.value(w(1)), Some("201"));
        assert_eq!(values.value(w(2)), Some("true"));
        assert_eq!(values.value(w(3)), Some("2024-01-01"));
    }

    #[test]
    fn test_submission_round_trip_for_redisplay() {
        let repo = repository();
        let form = compile_form(&repo, r#"<htmlform><obs conceptId="5089"/><drugOrder drugId="2"/></htmlform>"#);
        let mut submission = SubmittedValues::new();
        submission.set("w1", "72");
        submission.set("w2", "2");
        submission.set("w2_dose", "1");
        let shown = BoundValues::from_submission(&form.schema, &submission);
        assert_eq!(shown.get(w(1)).unwrap().source, ValueSource::LastSubmission);
        assert_eq!(shown.get(w(2)).unwrap().parts.get("_dose").map(String::as_str), Some("1"));
        assert_eq!(shown.to_submission(), submission);
    }

    #[test]
    fn test_encounter_type_default_and_bound_value() {
        let mut repo = repository();
        let template = r#"<htmlform><encounterType types="1,2" default="2"/></htmlform>"#;
        let entered = enter(&repo, &FormEntryConfig::default(), template).unwrap();
        let field = entered.get(w(1)).unwrap();
        assert_eq!(field.values, vec!["2"]);
        assert_eq!(field.display, vec!["ADULTRETURN"]);
        assert_eq!(field.source, ValueSource::Default);

        repo.data_mut().encounters[0].encounter_type = EncounterTypeId::new(1).ok();
        let edited = edit(&repo, template).unwrap();
        assert_eq!(edited.value(w(1)), Some("1"));
        assert_eq!(edited.get(w(1)).unwrap().source, ValueSource::Bound);
    }

    #[test]
    fn test_bound_standard_regimen() {
        use crate::config::{RegimenComponent, RegimenConfig};
        use crate::domain::ids::{DrugId, OrderId};
        use crate::domain::order::{Drug, DrugOrder};

        let mut repo = repository();
        repo.data_mut().drugs.push(Drug {
            id: DrugId::new(3).unwrap(),
            name: "Drug 3".to_string(),
            concept: cid(88),
            retired: false,
        });
        for (id, drug) in [(1, 2), (2, 3)] {
            let mut order = DrugOrder::new(patient_id(), cid(88));
            order.id = OrderId::new(id).ok();
            order.drug = DrugId::new(drug).ok();
            order.encounter = Some(encounter_id());
            order.date_activated = Some(day(2024, 3, 1));
            order.date_stopped = Some(day(2024, 4, 1));
            order.stop_reason = Some(cid(555));
            repo.data_mut().orders.push(order);
        }
        let component = |drug: u32| RegimenComponent {
            drug: DrugId::new(drug).unwrap(),
            dose: None,
            dose_units: None,
            frequency: None,
            instructions: None,
        };
        let config = FormEntryConfig {
            regimens: vec![RegimenConfig {
                code: "DUO".to_string(),
                name: Some("Dual therapy".to_string()),
                components: vec![component(2), component(3)],
            }],
            ..FormEntryConfig::default()
        };

        let values = edit_with(&repo, &config, r#"<htmlform><standardRegimen regimenCodes="DUO"/></htmlform>"#).unwrap();
        let regimen = values.get(w(1)).unwrap();
        assert_eq!(regimen.values, vec!["DUO"]);
        assert_eq!(regimen.display, vec!["Dual therapy"]);
        assert_eq!(values.value(w(2)), Some("2024-03-01"));
        let stopped = values.get(w(3)).unwrap();
        assert_eq!(stopped.parts.get("_reason").map(String::as_str), Some("555"));
    }
}
