// Formentry - Clinical Form Compiler and Submission Engine
// Copyright (c) 2025 Formentry Contributors
// Licensed under the MIT License

//! The compiled field schema
//!
//! A [`Schema`] is an ordered forest of [`SchemaNode`]s. Leaves own their
//! widget ids; [`ObsGroupTemplate`]s own a [`GroupKey`] and their children.
//! The schema is immutable once built and is consumed by the binder, the
//! matching engine and reconciliation.

use crate::domain::concept::ConceptDatatype;
use crate::domain::ids::{
    ConceptId, DrugId, EncounterTypeId, ProgramId, StateId, WidgetId, WorkflowId,
};
use crate::domain::order::{CareSetting, DosingType, OrderAction, Urgency};
use serde::Serialize;
use std::fmt;

/// Stable key of an obs group template, assigned in document order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct GroupKey(pub u32);

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "g{}", self.0)
    }
}

/// An option offered by a field
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Answer {
    pub concept: ConceptId,
    pub label: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldStyle {
    Dropdown,
    Radio,
    Checkbox,
    Autocomplete,
    Text,
    Textarea,
    Number,
    Date,
    Datetime,
    Hidden,
}

impl FieldStyle {
    pub fn parse(value: &str) -> Option<Self> {
        Some(match value.trim().to_ascii_lowercase().as_str() {
            "dropdown" | "select" => FieldStyle::Dropdown,
            "radio" => FieldStyle::Radio,
            "checkbox" => FieldStyle::Checkbox,
            "autocomplete" => FieldStyle::Autocomplete,
            "text" => FieldStyle::Text,
            "textarea" => FieldStyle::Textarea,
            "number" => FieldStyle::Number,
            "date" => FieldStyle::Date,
            "datetime" => FieldStyle::Datetime,
            "hidden" => FieldStyle::Hidden,
            _ => return None,
        })
    }
}

/// Where a default comes from, before resolution
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DefaultSpec {
    /// Literal or keyword (`GlobalProperty:x`, `SystemDefault`, `now`...)
    pub value: Option<String>,
    /// Expression evaluated when no value is given
    pub expression: Option<String>,
}

impl DefaultSpec {
    pub fn is_empty(&self) -> bool {
        self.value.is_none() && self.expression.is_none()
    }
}

/// A leaf recording one observation (or a set, when multi-valued)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ObsField {
    pub widget: WidgetId,
    pub comment_widget: Option<WidgetId>,
    /// Question concepts; more than one only for `conceptIds`
    pub concepts: Vec<ConceptId>,
    pub datatype: ConceptDatatype,
    pub allow_decimal: bool,
    pub style: FieldStyle,
    /// Offered answers (coded) or offered question concepts (`conceptIds`)
    pub answers: Vec<Answer>,
    /// True when the template listed the answers itself
    pub answers_explicit: bool,
    /// The single coded value a checkbox records
    pub checkbox_answer: Option<ConceptId>,
    pub multi: bool,
    pub required: bool,
    pub allow_future_dates: bool,
    pub allow_past_dates: bool,
    pub default: DefaultSpec,
    pub label: Option<String>,
}

impl ObsField {
    /// True when the field can record this question concept
    pub fn records_concept(&self, concept: ConceptId) -> bool {
        self.concepts.contains(&concept)
    }

    /// Answers that restrict what the field records, for matching
    pub fn restricting_answers(&self) -> Vec<ConceptId> {
        if let Some(answer) = self.checkbox_answer {
            return vec![answer];
        }
        if self.answers_explicit && self.concepts.len() == 1 {
            return self.answers.iter().map(|a| a.concept).collect();
        }
        Vec::new()
    }

    /// Every widget id this field owns
    pub fn widgets(&self) -> Vec<WidgetId> {
        std::iter::once(self.widget).chain(self.comment_widget).collect()
    }
}

/// An obs group template with its child nodes
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ObsGroupTemplate {
    pub key: GroupKey,
    pub concept: ConceptId,
    /// Grouping concepts from the outermost template down to this one
    pub path: Vec<ConceptId>,
    pub label: Option<String>,
    pub children: Vec<SchemaNode>,
}

impl ObsGroupTemplate {
    /// Obs fields directly inside this template (through sections, not nested groups)
    pub fn direct_fields(&self) -> Vec<&ObsField> {
        let mut out = Vec::new();
        collect_direct_fields(&self.children, &mut out);
        out
    }

    /// Group templates directly nested in this one
    pub fn direct_groups(&self) -> Vec<&ObsGroupTemplate> {
        let mut out = Vec::new();
        collect_direct_groups(&self.children, &mut out);
        out
    }
}

fn collect_direct_fields<'a>(nodes: &'a [SchemaNode], out: &mut Vec<&'a ObsField>) {
    for node in nodes {
        match node {
            SchemaNode::Obs(field) => out.push(field),
            SchemaNode::Section(section) => collect_direct_fields(&section.children, out),
            _ => {}
        }
    }
}

fn collect_direct_groups<'a>(nodes: &'a [SchemaNode], out: &mut Vec<&'a ObsGroupTemplate>) {
    for node in nodes {
        match node {
            SchemaNode::Group(group) => out.push(group),
            SchemaNode::Section(section) => collect_direct_groups(&section.children, out),
            _ => {}
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Section {
    pub header: Option<String>,
    pub children: Vec<SchemaNode>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EncounterDateField {
    pub widget: WidgetId,
    pub default: DefaultSpec,
    pub show_time: bool,
    pub allow_future_dates: bool,
}

/// `encounterLocation` and `encounterProvider`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReferenceField {
    pub widget: WidgetId,
    pub default: DefaultSpec,
    pub required: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EncounterTypeOption {
    pub encounter_type: EncounterTypeId,
    pub label: String,
}

/// `encounterType`: one of a listed set of encounter types
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EncounterTypeField {
    pub widget: WidgetId,
    pub options: Vec<EncounterTypeOption>,
    pub default: Option<EncounterTypeId>,
    pub required: bool,
}

impl EncounterTypeField {
    pub fn offers(&self, id: EncounterTypeId) -> bool {
        self.options.iter().any(|o| o.encounter_type == id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StateStyle {
    Checkbox,
    Hidden,
    Dropdown,
    Radio,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StateOption {
    pub state: StateId,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkflowStateField {
    pub widget: WidgetId,
    pub program: ProgramId,
    pub workflow: WorkflowId,
    pub style: StateStyle,
    pub options: Vec<StateOption>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnrollField {
    pub widget: WidgetId,
    pub date_widget: Option<WidgetId>,
    pub program: ProgramId,
    pub states: Vec<StateId>,
}

/// `completeProgram`: completes the active enrollment when entering
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompleteProgramField {
    pub program: ProgramId,
}

/// One drug order line
///
/// The line's own properties travel as suffixed keys of `widget`
/// (`_action`, `_dose`, `_frequency`, `_instructions`, `_quantity`,
/// `_refills`, `_duration`, `_start`).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DrugOrderField {
    pub widget: WidgetId,
    pub voided_widget: WidgetId,
    pub discontinued_widget: WidgetId,
    pub concept: ConceptId,
    pub drug: Option<DrugId>,
    pub default_action: OrderAction,
    pub care_setting: CareSetting,
    pub dosing_type: DosingType,
    pub urgency: Urgency,
    /// Offered frequencies; any frequency concept when empty
    pub frequencies: Vec<Answer>,
    pub default_frequency: Option<ConceptId>,
    pub discontinue_reasons: Vec<Answer>,
    pub label: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegimenOption {
    pub code: String,
    pub label: String,
}

/// `standardRegimen`: a configured set of drugs ordered as one choice
///
/// `widget` carries the regimen code, `start_widget` the start date and
/// `discontinued_widget` the discontinue date with its reason under the
/// `_reason` suffix.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StandardRegimenField {
    pub widget: WidgetId,
    pub start_widget: WidgetId,
    pub discontinued_widget: WidgetId,
    pub regimens: Vec<RegimenOption>,
    pub care_setting: CareSetting,
    pub discontinue_reasons: Vec<Answer>,
    pub label: Option<String>,
}

impl StandardRegimenField {
    pub fn offers(&self, code: &str) -> bool {
        self.regimens.iter().any(|r| r.code == code)
    }
}

/// A node of the compiled schema
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SchemaNode {
    Section(Section),
    Obs(ObsField),
    Group(ObsGroupTemplate),
    EncounterDate(EncounterDateField),
    EncounterLocation(ReferenceField),
    EncounterProvider(ReferenceField),
    EncounterType(EncounterTypeField),
    WorkflowState(WorkflowStateField),
    EnrollInProgram(EnrollField),
    CompleteProgram(CompleteProgramField),
    DrugOrder(DrugOrderField),
    StandardRegimen(StandardRegimenField),
}

impl SchemaNode {
    /// Widget ids owned by this node itself (not its children)
    pub fn own_widgets(&self) -> Vec<WidgetId> {
        match self {
            SchemaNode::Section(_) | SchemaNode::Group(_) | SchemaNode::CompleteProgram(_) => Vec::new(),
            SchemaNode::Obs(f) => f.widgets(),
            SchemaNode::EncounterDate(f) => vec![f.widget],
            SchemaNode::EncounterLocation(f) | SchemaNode::EncounterProvider(f) => vec![f.widget],
            SchemaNode::EncounterType(f) => vec![f.widget],
            SchemaNode::WorkflowState(f) => vec![f.widget],
            SchemaNode::EnrollInProgram(f) => std::iter::once(f.widget).chain(f.date_widget).collect(),
            SchemaNode::DrugOrder(f) => vec![f.widget, f.voided_widget, f.discontinued_widget],
            SchemaNode::StandardRegimen(f) => vec![f.widget, f.start_widget, f.discontinued_widget],
        }
    }

    fn children(&self) -> &[SchemaNode] {
        match self {
            SchemaNode::Section(s) => &s.children,
            SchemaNode::Group(g) => &g.children,
            _ => &[],
        }
    }
}

/// The compiled schema
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Schema {
    pub nodes: Vec<SchemaNode>,
}

impl Schema {
    /// Every node in document order, depth first
    pub fn walk(&self) -> Vec<&SchemaNode> {
        let mut out = Vec::new();
        let mut stack: Vec<&SchemaNode> = self.nodes.iter().rev().collect();
        while let Some(node) = stack.pop() {
            out.push(node);
            stack.extend(node.children().iter().rev());
        }
        out
    }

    /// Obs fields outside any group, in document order
    pub fn top_level_fields(&self) -> Vec<&ObsField> {
        let mut out = Vec::new();
        collect_direct_fields(&self.nodes, &mut out);
        out
    }

    /// Group templates outside any group, in document order
    pub fn top_level_groups(&self) -> Vec<&ObsGroupTemplate> {
        let mut out = Vec::new();
        collect_direct_groups(&self.nodes, &mut out);
        out
    }

    /// Every obs field, grouped or not
    pub fn obs_fields(&self) -> Vec<&ObsField> {
        self.walk()
            .into_iter()
            .filter_map(|n| match n {
                SchemaNode::Obs(f) => Some(f),
                _ => None,
            })
            .collect()
    }

    /// Every group template in document order
    pub fn groups(&self) -> Vec<&ObsGroupTemplate> {
        self.walk()
            .into_iter()
            .filter_map(|n| match n {
                SchemaNode::Group(g) => Some(g),
                _ => None,
            })
            .collect()
    }

    /// Every allocated widget id in document order
    pub fn widgets(&self) -> Vec<WidgetId> {
        self.walk().iter().flat_map(|n| n.own_widgets()).collect()
    }

    pub fn encounter_date(&self) -> Option<&EncounterDateField> {
        self.walk().into_iter().find_map(|n| match n {
            SchemaNode::EncounterDate(f) => Some(f),
            _ => None,
        })
    }

    pub fn encounter_location(&self) -> Option<&ReferenceField> {
        self.walk().into_iter().find_map(|n| match n {
            SchemaNode::EncounterLocation(f) => Some(f),
            _ => None,
        })
    }

    pub fn encounter_provider(&self) -> Option<&ReferenceField> {
        self.walk().into_iter().find_map(|n| match n {
            SchemaNode::EncounterProvider(f) => Some(f),
            _ => None,
        })
    }

    pub fn encounter_type(&self) -> Option<&EncounterTypeField> {
        self.walk().into_iter().find_map(|n| match n {
            SchemaNode::EncounterType(f) => Some(f),
            _ => None,
        })
    }

    pub fn workflow_states(&self) -> Vec<&WorkflowStateField> {
        self.walk()
            .into_iter()
            .filter_map(|n| match n {
                SchemaNode::WorkflowState(f) => Some(f),
                _ => None,
            })
            .collect()
    }

    pub fn enrollments(&self) -> Vec<&EnrollField> {
        self.walk()
            .into_iter()
            .filter_map(|n| match n {
                SchemaNode::EnrollInProgram(f) => Some(f),
                _ => None,
            })
            .collect()
    }

    pub fn drug_orders(&self) -> Vec<&DrugOrderField> {
        self.walk()
            .into_iter()
            .filter_map(|n| match n {
                SchemaNode::DrugOrder(f) => Some(f),
                _ => None,
            })
            .collect()
    }

    pub fn program_completions(&self) -> Vec<&CompleteProgramField> {
        self.walk()
            .into_iter()
            .filter_map(|n| match n {
                SchemaNode::CompleteProgram(f) => Some(f),
                _ => None,
            })
            .collect()
    }

    pub fn standard_regimens(&self) -> Vec<&StandardRegimenField> {
        self.walk()
            .into_iter()
            .filter_map(|n| match n {
                SchemaNode::StandardRegimen(f) => Some(f),
                _ => None,
            })
            .collect()
    }
}
