// Formentry - Clinical Form Compiler and Submission Engine
// Copyright (c) 2025 Formentry Contributors
// Licensed under the MIT License

//! Programs, workflows and patient enrollments
//!
//! A [`PatientProgram`] is saved as a whole aggregate together with its
//! [`PatientState`] rows, so the transition logic can work on an owned copy
//! and hand the finished aggregate to the writer.

use crate::domain::ids::{ConceptId, LocationId, PatientId, PatientProgramId, ProgramId, StateId, WorkflowId};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Program {
    pub id: ProgramId,
    pub name: String,
    /// Coded question whose answer records why an enrollment ended
    #[serde(default)]
    pub outcomes_concept: Option<ConceptId>,
    #[serde(default)]
    pub workflows: Vec<ProgramWorkflow>,
}

impl Program {
    pub fn workflow(&self, id: WorkflowId) -> Option<&ProgramWorkflow> {
        self.workflows.iter().find(|w| w.id == id)
    }

    /// Finds the workflow that owns a state
    pub fn workflow_of_state(&self, state: StateId) -> Option<&ProgramWorkflow> {
        self.workflows.iter().find(|w| w.state(state).is_some())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgramWorkflow {
    pub id: WorkflowId,
    pub program: ProgramId,
    pub name: String,
    #[serde(default)]
    pub states: Vec<WorkflowState>,
}

impl ProgramWorkflow {
    pub fn state(&self, id: StateId) -> Option<&WorkflowState> {
        self.states.iter().find(|s| s.id == id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowState {
    pub id: StateId,
    pub name: String,
    #[serde(default)]
    pub initial: bool,
    #[serde(default)]
    pub terminal: bool,
    #[serde(default)]
    pub retired: bool,
}

/// One interval a patient spent in a workflow state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatientState {
    pub state: StateId,
    pub workflow: WorkflowId,
    #[serde(default)]
    pub start_date: Option<NaiveDateTime>,
    #[serde(default)]
    pub end_date: Option<NaiveDateTime>,
    #[serde(default)]
    pub voided: bool,
}

impl PatientState {
    pub fn new(workflow: WorkflowId, state: StateId, start: NaiveDateTime) -> Self {
        Self {
            state,
            workflow,
            start_date: Some(start),
            end_date: None,
            voided: false,
        }
    }

    /// Active at `date`: started on/before and not ended on/before
    pub fn is_active_on(&self, date: NaiveDateTime) -> bool {
        !self.voided
            && self.start_date.map_or(true, |s| s <= date)
            && self.end_date.map_or(true, |e| e > date)
    }
}

/// A patient's enrollment in a program
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatientProgram {
    /// `None` until persisted
    #[serde(default)]
    pub id: Option<PatientProgramId>,
    pub patient: PatientId,
    pub program: ProgramId,
    pub date_enrolled: NaiveDateTime,
    #[serde(default)]
    pub date_completed: Option<NaiveDateTime>,
    /// Answer to the program's outcomes question, set on completion
    #[serde(default)]
    pub outcome: Option<ConceptId>,
    #[serde(default)]
    pub location: Option<LocationId>,
    #[serde(default)]
    pub states: Vec<PatientState>,
    #[serde(default)]
    pub voided: bool,
}

impl PatientProgram {
    pub fn new(patient: PatientId, program: ProgramId, date_enrolled: NaiveDateTime) -> Self {
        Self {
            id: None,
            patient,
            program,
            date_enrolled,
            date_completed: None,
            outcome: None,
            location: None,
            states: Vec::new(),
            voided: false,
        }
    }

    /// Enrolled on/before `date` and not completed on/before it
    pub fn is_active_on(&self, date: NaiveDateTime) -> bool {
        !self.voided
            && self.date_enrolled <= date
            && self.date_completed.map_or(true, |c| c > date)
    }

    /// The state active in a workflow at `date`
    pub fn state_on(&self, workflow: WorkflowId, date: NaiveDateTime) -> Option<&PatientState> {
        self.states
            .iter()
            .find(|s| s.workflow == workflow && s.is_active_on(date))
    }

    /// The current (open-ended, non-voided) state in a workflow
    pub fn current_state(&self, workflow: WorkflowId) -> Option<&PatientState> {
        self.states
            .iter()
            .filter(|s| s.workflow == workflow && !s.voided && s.end_date.is_none())
            .max_by_key(|s| s.start_date)
    }

    /// Non-voided states in a workflow, start null-first then end null-last
    pub fn sorted_states(&self, workflow: WorkflowId) -> Vec<usize> {
        let mut idx: Vec<usize> = self
            .states
            .iter()
            .enumerate()
            .filter(|(_, s)| s.workflow == workflow && !s.voided)
            .map(|(i, _)| i)
            .collect();
        idx.sort_by(|&a, &b| {
            let (sa, sb) = (&self.states[a], &self.states[b]);
            sa.start_date
                .cmp(&sb.start_date)
                .then_with(|| match (sa.end_date, sb.end_date) {
                    (None, None) => std::cmp::Ordering::Equal,
                    (None, Some(_)) => std::cmp::Ordering::Greater,
                    (Some(_), None) => std::cmp::Ordering::Less,
                    (Some(x), Some(y)) => x.cmp(&y),
                })
        });
        idx
    }
}
