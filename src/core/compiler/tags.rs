// Formentry - Clinical Form Compiler and Submission Engine
// Copyright (c) 2025 Formentry Contributors
// Licensed under the MIT License

//! Data-entry tag vocabulary
//!
//! Each tag the compiler understands is a [`TagKind`] variant. Building a
//! schema node is a plain function of the tag kind, the element and the
//! [`CompileContext`]; adding a tag means adding a variant and a builder.
//! Attribute rules are checked here, so a bad template fails at compile time
//! and never reaches submission.

use super::markup::Element;
use super::schema::{
    Answer, CompleteProgramField, DefaultSpec, DrugOrderField, EncounterDateField,
    EncounterTypeField, EncounterTypeOption, EnrollField, FieldStyle, GroupKey, ObsField,
    ReferenceField, RegimenOption, Section, StandardRegimenField, StateOption, StateStyle,
    WorkflowStateField,
};
use crate::adapters::repository::ClinicalRepository;
use crate::config::{ConceptsConfig, RegimenConfig};
use crate::domain::concept::{Concept, ConceptDatatype};
use crate::domain::errors::{FormDesignError, FormEntryError, RepositoryError};
use crate::domain::ids::{
    ConceptId, DrugId, EncounterTypeId, ProgramId, StateId, WidgetIdAllocator, WorkflowId,
};
use crate::domain::order::{CareSetting, DosingType, OrderAction, Urgency};
use crate::domain::result::Result;
use std::collections::BTreeSet;
use std::str::FromStr;

/// Tags that become schema nodes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagKind {
    Obs,
    ObsGroup,
    Section,
    EncounterDate,
    EncounterLocation,
    EncounterProvider,
    EncounterType,
    WorkflowState,
    EnrollInProgram,
    CompleteProgram,
    DrugOrder,
    StandardRegimen,
}

impl TagKind {
    const TABLE: &'static [(&'static str, TagKind)] = &[
        ("obs", TagKind::Obs),
        ("obsgroup", TagKind::ObsGroup),
        ("section", TagKind::Section),
        ("encounterDate", TagKind::EncounterDate),
        ("encounterLocation", TagKind::EncounterLocation),
        ("encounterProvider", TagKind::EncounterProvider),
        ("encounterType", TagKind::EncounterType),
        ("workflowState", TagKind::WorkflowState),
        ("enrollInProgram", TagKind::EnrollInProgram),
        ("completeProgram", TagKind::CompleteProgram),
        ("drugOrder", TagKind::DrugOrder),
        ("standardRegimen", TagKind::StandardRegimen),
    ];

    /// Looks up the kind for an element name
    pub fn from_name(name: &str) -> Option<Self> {
        Self::TABLE
            .iter()
            .find(|(tag, _)| tag.eq_ignore_ascii_case(name))
            .map(|(_, kind)| *kind)
    }

    pub fn tag_name(self) -> &'static str {
        Self::TABLE
            .iter()
            .find(|(_, kind)| *kind == self)
            .map(|(tag, _)| *tag)
            .unwrap_or("unknown")
    }
}

/// Mutable state of one compile pass
pub struct CompileContext<'a> {
    pub repository: &'a dyn ClinicalRepository,
    pub concepts: &'a ConceptsConfig,
    pub regimens: &'a [RegimenConfig],
    pub widgets: WidgetIdAllocator,
    next_group: u32,
    group_path: Vec<ConceptId>,
}

impl<'a> CompileContext<'a> {
    pub fn new(
        repository: &'a dyn ClinicalRepository,
        concepts: &'a ConceptsConfig,
        regimens: &'a [RegimenConfig],
    ) -> Self {
        Self {
            repository,
            concepts,
            regimens,
            widgets: WidgetIdAllocator::new(),
            next_group: 0,
            group_path: Vec::new(),
        }
    }

    /// Enters a group template and returns its key and concept path
    pub fn enter_group(&mut self, concept: ConceptId) -> (GroupKey, Vec<ConceptId>) {
        self.next_group += 1;
        self.group_path.push(concept);
        (GroupKey(self.next_group), self.group_path.clone())
    }

    pub fn leave_group(&mut self) {
        self.group_path.pop();
    }

    /// Resolves a concept reference: id, uuid, `SOURCE:code` or `Constant:NAME`
    pub fn resolve_concept(&self, reference: &str) -> Result<Concept> {
        let reference = reference.trim();
        if let Some(name) = reference.strip_prefix("Constant:") {
            let id = self.concepts.constant(name).ok_or_else(|| {
                FormEntryError::Misuse(format!("Unknown static constant '{name}'"))
            })?;
            return self.repository.concept(id).map_err(|_| unresolved("concept", reference));
        }
        self.repository
            .find_concept(reference)?
            .ok_or_else(|| unresolved("concept", reference))
    }

    fn concept_label(&self, id: ConceptId) -> String {
        self.repository
            .concept(id)
            .map(|c| c.name)
            .unwrap_or_else(|_| id.to_string())
    }
}

fn unresolved(kind: &str, reference: &str) -> FormEntryError {
    FormDesignError::UnresolvedReference {
        kind: kind.to_string(),
        reference: reference.to_string(),
    }
    .into()
}

fn missing(tag: &str, attribute: &str) -> FormEntryError {
    FormDesignError::MissingAttribute {
        tag: tag.to_string(),
        attribute: attribute.to_string(),
    }
    .into()
}

fn conflicting(tag: &str, first: &str, second: &str) -> FormEntryError {
    FormDesignError::ConflictingAttributes {
        tag: tag.to_string(),
        first: first.to_string(),
        second: second.to_string(),
    }
    .into()
}

fn invalid(tag: &str, attribute: &str, value: &str, reason: impl Into<String>) -> FormEntryError {
    FormDesignError::InvalidAttribute {
        tag: tag.to_string(),
        attribute: attribute.to_string(),
        value: value.to_string(),
        reason: reason.into(),
    }
    .into()
}

/// Reads a boolean attribute
fn flag(element: &Element, name: &str, default: bool) -> Result<bool> {
    match element.non_blank_attr(name) {
        None => Ok(default),
        Some(v) if v.eq_ignore_ascii_case("true") => Ok(true),
        Some(v) if v.eq_ignore_ascii_case("false") => Ok(false),
        Some(v) => Err(invalid(&element.name, name, v, "expected true or false")),
    }
}

/// Splits a comma separated list, dropping blanks
fn list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_id<T: FromStr<Err = String>>(element: &Element, attribute: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|reason: String| invalid(&element.name, attribute, value, reason))
}

fn default_spec(element: &Element, value_attribute: &str) -> DefaultSpec {
    DefaultSpec {
        value: element.non_blank_attr(value_attribute).map(str::to_string),
        expression: element.non_blank_attr("defaultExpression").map(str::to_string),
    }
}

/// Builds an `obs` leaf
pub fn build_obs(element: &Element, ctx: &mut CompileContext<'_>) -> Result<ObsField> {
    let tag = element.name.as_str();
    let concepts: Vec<Concept> = match (element.non_blank_attr("conceptId"), element.non_blank_attr("conceptIds")) {
        (Some(_), Some(_)) => return Err(conflicting(tag, "conceptId", "conceptIds")),
        (None, None) => return Err(missing(tag, "conceptId")),
        (Some(reference), None) => vec![ctx.resolve_concept(reference)?],
        (None, Some(references)) => list(references)
            .iter()
            .map(|r| ctx.resolve_concept(r))
            .collect::<Result<_>>()?,
    };
    let first = concepts
        .first()
        .ok_or_else(|| missing(tag, "conceptIds"))?
        .clone();
    if first.datatype == ConceptDatatype::NotApplicable {
        return Err(invalid(
            tag,
            "conceptId",
            &first.id.to_string(),
            "concept does not record a value; use obsgroup for grouping concepts",
        ));
    }

    if element.has_attr("answerConceptId") && element.has_attr("answerConceptIds") {
        return Err(conflicting(tag, "answerConceptId", "answerConceptIds"));
    }
    if element.has_attr("answerConceptIds") && element.has_attr("answerConceptSetIds") {
        return Err(conflicting(tag, "answerConceptIds", "answerConceptSetIds"));
    }

    let checkbox_answer = match element.non_blank_attr("answerConceptId") {
        Some(reference) => Some(ctx.resolve_concept(reference)?.id),
        None => None,
    };

    let mut answers_explicit = true;
    let answers: Vec<Answer> = if concepts.len() > 1 {
        if checkbox_answer.is_none() {
            return Err(missing(tag, "answerConceptId"));
        }
        let labels = element.non_blank_attr("conceptLabels").map(list);
        if let Some(labels) = &labels {
            if labels.len() != concepts.len() {
                return Err(invalid(
                    tag,
                    "conceptLabels",
                    &labels.join(","),
                    format!("expected {} labels", concepts.len()),
                ));
            }
        }
        concepts
            .iter()
            .enumerate()
            .map(|(i, c)| Answer {
                concept: c.id,
                label: labels
                    .as_ref()
                    .and_then(|l| l.get(i).cloned())
                    .unwrap_or_else(|| c.name.clone()),
            })
            .collect()
    } else if let Some(references) = element.non_blank_attr("answerConceptIds") {
        let ids: Vec<ConceptId> = list(references)
            .iter()
            .map(|r| ctx.resolve_concept(r).map(|c| c.id))
            .collect::<Result<_>>()?;
        let labels = element.non_blank_attr("answerLabels").map(list);
        if let Some(labels) = &labels {
            if labels.len() != ids.len() {
                return Err(invalid(
                    tag,
                    "answerLabels",
                    &labels.join(","),
                    format!("expected {} labels to match answerConceptIds", ids.len()),
                ));
            }
        }
        ids.iter()
            .enumerate()
            .map(|(i, id)| Answer {
                concept: *id,
                label: labels
                    .as_ref()
                    .and_then(|l| l.get(i).cloned())
                    .unwrap_or_else(|| ctx.concept_label(*id)),
            })
            .collect()
    } else if let Some(references) = element.non_blank_attr("answerConceptSetIds") {
        let mut out = Vec::new();
        for reference in list(references) {
            let set = ctx.resolve_concept(&reference)?;
            for member in &set.set_members {
                out.push(Answer {
                    concept: *member,
                    label: ctx.concept_label(*member),
                });
            }
        }
        out
    } else if let Some(answer) = checkbox_answer {
        vec![Answer {
            concept: answer,
            label: element
                .non_blank_attr("answerLabel")
                .map(str::to_string)
                .unwrap_or_else(|| ctx.concept_label(answer)),
        }]
    } else {
        answers_explicit = false;
        first
            .answers
            .iter()
            .map(|id| Answer {
                concept: *id,
                label: ctx.concept_label(*id),
            })
            .collect()
    };

    let default_style = if checkbox_answer.is_some() {
        FieldStyle::Checkbox
    } else {
        match first.datatype {
            ConceptDatatype::Coded => FieldStyle::Dropdown,
            ConceptDatatype::Boolean => FieldStyle::Checkbox,
            ConceptDatatype::Numeric => FieldStyle::Number,
            ConceptDatatype::Date => FieldStyle::Date,
            ConceptDatatype::Datetime => FieldStyle::Datetime,
            _ => FieldStyle::Text,
        }
    };
    let style = match element.non_blank_attr("style") {
        Some(value) => FieldStyle::parse(value).ok_or_else(|| {
            invalid(tag, "style", value, "unknown widget style")
        })?,
        None => default_style,
    };

    let multi = flag(element, "selectMulti", false)?;
    if multi && style != FieldStyle::Autocomplete {
        return Err(invalid(
            tag,
            "selectMulti",
            "true",
            "only supported with style=\"autocomplete\"",
        ));
    }

    let default = if element.has_attr("defaultValue") && element.has_attr("defaultDatetime") {
        return Err(conflicting(tag, "defaultValue", "defaultDatetime"));
    } else if element.has_attr("defaultDatetime") {
        default_spec(element, "defaultDatetime")
    } else {
        default_spec(element, "defaultValue")
    };

    let widget = ctx.widgets.next_id();
    let comment_widget = if flag(element, "showCommentField", false)? {
        Some(ctx.widgets.next_id())
    } else {
        None
    };

    Ok(ObsField {
        widget,
        comment_widget,
        concepts: concepts.iter().map(|c| c.id).collect(),
        datatype: first.datatype,
        allow_decimal: first.allow_decimal,
        style,
        answers,
        answers_explicit,
        checkbox_answer,
        multi,
        required: flag(element, "required", false)?,
        allow_future_dates: flag(element, "allowFutureDates", false)?,
        allow_past_dates: flag(element, "allowPastDates", true)?,
        default,
        label: element.non_blank_attr("labelText").map(str::to_string),
    })
}

/// Resolves the grouping concept of an `obsgroup`
pub fn grouping_concept(element: &Element, ctx: &CompileContext<'_>) -> Result<ConceptId> {
    let reference = element
        .non_blank_attr("groupingConceptId")
        .ok_or_else(|| missing(&element.name, "groupingConceptId"))?;
    Ok(ctx.resolve_concept(reference)?.id)
}

pub fn build_section(element: &Element) -> Section {
    Section {
        header: element.non_blank_attr("headerLabel").map(str::to_string),
        children: Vec::new(),
    }
}

pub fn build_encounter_date(element: &Element, ctx: &mut CompileContext<'_>) -> Result<EncounterDateField> {
    Ok(EncounterDateField {
        widget: ctx.widgets.next_id(),
        default: default_spec(element, "default"),
        show_time: flag(element, "showTime", false)?,
        allow_future_dates: flag(element, "allowFutureDates", false)?,
    })
}

pub fn build_reference_field(element: &Element, ctx: &mut CompileContext<'_>) -> Result<ReferenceField> {
    Ok(ReferenceField {
        widget: ctx.widgets.next_id(),
        default: default_spec(element, "default"),
        required: flag(element, "required", false)?,
    })
}

/// Builds an `encounterType` field
///
/// `types` lists the offered types by id, uuid or name; every unretired type
/// is offered when it is absent.
pub fn build_encounter_type(element: &Element, ctx: &mut CompileContext<'_>) -> Result<EncounterTypeField> {
    let tag = element.name.as_str();
    let types = match element.non_blank_attr("types") {
        Some(references) => list(references)
            .iter()
            .map(|r| {
                ctx.repository
                    .find_encounter_type(r)?
                    .ok_or_else(|| unresolved("encounter type", r))
            })
            .collect::<Result<Vec<_>>>()?,
        None => ctx
            .repository
            .encounter_types()?
            .into_iter()
            .filter(|t| !t.retired)
            .collect(),
    };
    let options: Vec<EncounterTypeOption> = types
        .into_iter()
        .map(|t| EncounterTypeOption {
            encounter_type: t.id,
            label: t.name,
        })
        .collect();

    let default: Option<EncounterTypeId> = match element.non_blank_attr("default") {
        None => None,
        Some(reference) => {
            let found = ctx
                .repository
                .find_encounter_type(reference)?
                .ok_or_else(|| unresolved("encounter type", reference))?;
            if !options.iter().any(|o| o.encounter_type == found.id) {
                return Err(invalid(tag, "default", reference, "is not one of the offered types"));
            }
            Some(found.id)
        }
    };

    Ok(EncounterTypeField {
        widget: ctx.widgets.next_id(),
        options,
        default,
        required: flag(element, "required", true)?,
    })
}

/// Builds a `workflowState` field
pub fn build_workflow_state(element: &Element, ctx: &mut CompileContext<'_>) -> Result<WorkflowStateField> {
    let tag = element.name.as_str();
    let raw_workflow = element
        .non_blank_attr("workflowId")
        .ok_or_else(|| missing(tag, "workflowId"))?;
    let workflow_id: WorkflowId = parse_id(element, "workflowId", raw_workflow)?;

    if element.has_attr("stateId") && element.has_attr("stateIds") {
        return Err(conflicting(tag, "stateId", "stateIds"));
    }
    if element.has_attr("stateLabel") && element.has_attr("stateLabels") {
        return Err(conflicting(tag, "stateLabel", "stateLabels"));
    }
    if let (Some(label), false) = (element.attr("stateLabel"), element.has_attr("stateId")) {
        return Err(invalid(tag, "stateLabel", label, "only allowed together with stateId"));
    }
    if let (Some(labels), false) = (element.attr("stateLabels"), element.has_attr("stateIds")) {
        return Err(invalid(tag, "stateLabels", labels, "only allowed together with stateIds"));
    }

    let program = ctx
        .repository
        .program_of_workflow(workflow_id)
        .map_err(|e| match e {
            FormEntryError::Repository(RepositoryError::NotFound { .. }) => {
                unresolved("workflow", raw_workflow)
            }
            other => other,
        })?;
    let workflow = program
        .workflow(workflow_id)
        .ok_or_else(|| unresolved("workflow", raw_workflow))?;

    let single = element.non_blank_attr("stateId");
    let style = match (single.is_some(), element.non_blank_attr("type")) {
        (true, None) => StateStyle::Checkbox,
        (false, None) => StateStyle::Dropdown,
        (true, Some(t)) => match t.to_ascii_lowercase().as_str() {
            "checkbox" => StateStyle::Checkbox,
            "hidden" => StateStyle::Hidden,
            _ => return Err(invalid(tag, "type", t, "with stateId must be checkbox or hidden")),
        },
        (false, Some(t)) => match t.to_ascii_lowercase().as_str() {
            "dropdown" => StateStyle::Dropdown,
            "radio" => StateStyle::Radio,
            _ => return Err(invalid(tag, "type", t, "must be dropdown or radio")),
        },
    };

    let (references, labels): (Vec<String>, Option<Vec<String>>) = match single {
        Some(state) => (
            vec![state.to_string()],
            element.non_blank_attr("stateLabel").map(|l| vec![l.to_string()]),
        ),
        None => (
            element.non_blank_attr("stateIds").map(list).unwrap_or_default(),
            element.non_blank_attr("stateLabels").map(list),
        ),
    };
    if let Some(labels) = &labels {
        if labels.len() != references.len() {
            return Err(invalid(
                tag,
                "stateLabels",
                &labels.join(","),
                format!("expected {} labels to match stateIds", references.len()),
            ));
        }
    }

    let options: Vec<StateOption> = if references.is_empty() {
        workflow
            .states
            .iter()
            .filter(|s| !s.retired)
            .map(|s| StateOption {
                state: s.id,
                label: s.name.clone(),
            })
            .collect()
    } else {
        let mut options = Vec::new();
        for (i, reference) in references.iter().enumerate() {
            let id: StateId = parse_id(element, "stateIds", reference)?;
            let state = workflow
                .state(id)
                .ok_or_else(|| unresolved("state", reference))?;
            if state.retired {
                continue;
            }
            options.push(StateOption {
                state: id,
                label: labels
                    .as_ref()
                    .and_then(|l| l.get(i).cloned())
                    .unwrap_or_else(|| state.name.clone()),
            });
        }
        options
    };

    Ok(WorkflowStateField {
        widget: ctx.widgets.next_id(),
        program: program.id,
        workflow: workflow_id,
        style,
        options,
    })
}

/// Builds an `enrollInProgram` field
pub fn build_enroll(element: &Element, ctx: &mut CompileContext<'_>) -> Result<EnrollField> {
    let tag = element.name.as_str();
    let raw_program = element
        .non_blank_attr("programId")
        .ok_or_else(|| missing(tag, "programId"))?;
    let program_id: ProgramId = parse_id(element, "programId", raw_program)?;
    let program = ctx
        .repository
        .program(program_id)
        .map_err(|_| unresolved("program", raw_program))?;

    let mut states = Vec::new();
    let mut workflows = BTreeSet::new();
    for reference in element.non_blank_attr("stateIds").map(list).unwrap_or_default() {
        let id: StateId = parse_id(element, "stateIds", &reference)?;
        let workflow = program
            .workflow_of_state(id)
            .ok_or_else(|| unresolved("state", &reference))?;
        if !workflows.insert(workflow.id) {
            return Err(invalid(
                tag,
                "stateIds",
                &reference,
                format!("another selected state already belongs to workflow {}", workflow.id),
            ));
        }
        states.push(id);
    }

    let widget = ctx.widgets.next_id();
    let date_widget = if flag(element, "showDate", false)? {
        Some(ctx.widgets.next_id())
    } else {
        None
    };
    Ok(EnrollField {
        widget,
        date_widget,
        program: program_id,
        states,
    })
}

/// Builds a `completeProgram` marker
pub fn build_complete_program(element: &Element, ctx: &CompileContext<'_>) -> Result<CompleteProgramField> {
    let raw_program = element
        .non_blank_attr("programId")
        .ok_or_else(|| missing(&element.name, "programId"))?;
    let program: ProgramId = parse_id(element, "programId", raw_program)?;
    ctx.repository
        .program(program)
        .map_err(|_| unresolved("program", raw_program))?;
    Ok(CompleteProgramField { program })
}

/// Resolves a list of coded answers with optional matching labels
fn answer_list(
    element: &Element,
    ctx: &CompileContext<'_>,
    ids_attribute: &str,
    labels_attribute: &str,
) -> Result<Vec<Answer>> {
    let references = element
        .non_blank_attr(ids_attribute)
        .map(list)
        .unwrap_or_default();
    let labels = element.non_blank_attr(labels_attribute).map(list);
    if let Some(labels) = &labels {
        if labels.len() != references.len() {
            return Err(invalid(
                &element.name,
                labels_attribute,
                &labels.join(","),
                format!("expected {} labels to match {ids_attribute}", references.len()),
            ));
        }
    }
    let mut answers = Vec::new();
    for (i, reference) in references.iter().enumerate() {
        let concept = ctx.resolve_concept(reference)?;
        answers.push(Answer {
            concept: concept.id,
            label: labels
                .as_ref()
                .and_then(|l| l.get(i).cloned())
                .unwrap_or(concept.name),
        });
    }
    Ok(answers)
}

fn care_setting(element: &Element) -> Result<CareSetting> {
    parse_choice(
        element,
        "careSetting",
        CareSetting::Outpatient,
        &[("outpatient", CareSetting::Outpatient), ("inpatient", CareSetting::Inpatient)],
    )
}

fn parse_choice<T>(element: &Element, attribute: &str, default: T, table: &[(&str, T)]) -> Result<T>
where
    T: Copy,
{
    match element.non_blank_attr(attribute) {
        None => Ok(default),
        Some(value) => table
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(value))
            .map(|(_, v)| *v)
            .ok_or_else(|| {
                let allowed: Vec<&str> = table.iter().map(|(n, _)| *n).collect();
                invalid(
                    &element.name,
                    attribute,
                    value,
                    format!("must be one of {}", allowed.join(", ")),
                )
            }),
    }
}

/// Builds a `drugOrder` line
pub fn build_drug_order(element: &Element, ctx: &mut CompileContext<'_>) -> Result<DrugOrderField> {
    let tag = element.name.as_str();
    let (concept, drug) = match (element.non_blank_attr("drugId"), element.non_blank_attr("conceptId")) {
        (Some(raw), _) => {
            let id: DrugId = parse_id(element, "drugId", raw)?;
            let drug = ctx
                .repository
                .drug(id)
                .map_err(|_| unresolved("drug", raw))?;
            (drug.concept, Some(id))
        }
        (None, Some(reference)) => (ctx.resolve_concept(reference)?.id, None),
        (None, None) => return Err(missing(tag, "drugId")),
    };

    let default_action = match element.non_blank_attr("action") {
        Some(value) => value
            .parse::<OrderAction>()
            .map_err(|reason| invalid(tag, "action", value, reason))?,
        None => OrderAction::New,
    };
    let care_setting = care_setting(element)?;
    let dosing_type = parse_choice(
        element,
        "dosingType",
        DosingType::Simple,
        &[("simple", DosingType::Simple), ("freetext", DosingType::FreeText)],
    )?;
    let urgency = parse_choice(
        element,
        "urgency",
        Urgency::Routine,
        &[
            ("routine", Urgency::Routine),
            ("stat", Urgency::Stat),
            ("on_scheduled_date", Urgency::OnScheduledDate),
        ],
    )?;

    let discontinue_reasons = answer_list(
        element,
        ctx,
        "discontinueReasonAnswers",
        "discontinueReasonAnswerLabels",
    )?;

    let frequencies = answer_list(element, ctx, "frequencyAnswers", "frequencyAnswerLabels")?;
    let default_frequency = match element.non_blank_attr("frequency") {
        None => None,
        Some(reference) => {
            let id = ctx.resolve_concept(reference)?.id;
            if !frequencies.is_empty() && !frequencies.iter().any(|f| f.concept == id) {
                return Err(invalid(tag, "frequency", reference, "is not one of frequencyAnswers"));
            }
            Some(id)
        }
    };

    Ok(DrugOrderField {
        widget: ctx.widgets.next_id(),
        voided_widget: ctx.widgets.next_id(),
        discontinued_widget: ctx.widgets.next_id(),
        concept,
        drug,
        default_action,
        care_setting,
        dosing_type,
        urgency,
        frequencies,
        default_frequency,
        discontinue_reasons,
        label: element.non_blank_attr("label").map(str::to_string),
    })
}

/// Builds a `standardRegimen` field
///
/// Every code in `regimenCodes` must name a configured regimen whose drugs
/// all exist.
pub fn build_standard_regimen(element: &Element, ctx: &mut CompileContext<'_>) -> Result<StandardRegimenField> {
    let tag = element.name.as_str();
    let codes = element
        .non_blank_attr("regimenCodes")
        .map(list)
        .unwrap_or_default();
    if codes.is_empty() {
        return Err(missing(tag, "regimenCodes"));
    }
    let mut regimens = Vec::new();
    for code in &codes {
        let regimen = ctx
            .regimens
            .iter()
            .find(|r| r.code == *code)
            .ok_or_else(|| unresolved("regimen", code))?;
        for component in &regimen.components {
            ctx.repository
                .drug(component.drug)
                .map_err(|_| unresolved("drug", &component.drug.to_string()))?;
        }
        regimens.push(RegimenOption {
            code: regimen.code.clone(),
            label: regimen.label().to_string(),
        });
    }

    let discontinue_reasons = answer_list(
        element,
        ctx,
        "discontinueReasonAnswers",
        "discontinueReasonAnswerLabels",
    )?;

    Ok(StandardRegimenField {
        widget: ctx.widgets.next_id(),
        start_widget: ctx.widgets.next_id(),
        discontinued_widget: ctx.widgets.next_id(),
        regimens,
        care_setting: care_setting(element)?,
        discontinue_reasons,
        label: element.non_blank_attr("label").map(str::to_string),
    })
}
