// Formentry - Clinical Form Compiler and Submission Engine
// Copyright (c) 2025 Formentry Contributors
// Licensed under the MIT License

//! Program enrollment and workflow state transitions
//!
//! Within one workflow a patient's states partition time: each state ends
//! where the next begins. Every operation here keeps that partition and
//! keeps the enrollment date at or before the earliest state start.

use crate::adapters::repository::ClinicalRepository;
use crate::config::FormEntryConfig;
use crate::core::compiler::schema::{CompleteProgramField, EnrollField, Schema, WorkflowStateField};
use crate::core::values::SubmittedValues;
use crate::domain::changes::ChangeSet;
use crate::domain::errors::ValidationErrors;
use crate::domain::ids::{PatientId, ProgramId, StateId, WorkflowId};
use crate::domain::obs::ObsValue;
use crate::domain::program::{PatientProgram, PatientState};
use crate::domain::Result;
use chrono::{NaiveDateTime, NaiveTime};
use tracing::debug;

/// Inputs for planning program changes
pub struct ProgramContext<'a> {
    pub repository: &'a dyn ClinicalRepository,
    pub config: &'a FormEntryConfig,
    pub patient: PatientId,
    pub encounter_datetime: NaiveDateTime,
    /// The encounter datetime before this edit; `None` when entering
    pub previous_datetime: Option<NaiveDateTime>,
}

/// Result of editing the state an earlier submission started
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateEdit {
    /// No state in the workflow starts at the old date
    NotFound,
    Unchanged,
    Changed,
}

/// True when `start` is the instant `date` names, or its day when `date` has no time
fn starts_at(start: Option<NaiveDateTime>, date: NaiveDateTime) -> bool {
    match start {
        Some(s) if s == date => true,
        Some(s) => date.time() == NaiveTime::MIN && s.date() == date.date(),
        None => false,
    }
}

/// Pulls the enrollment date back to the earliest state start
fn keep_enrollment_first(program: &mut PatientProgram) {
    if let Some(earliest) = program
        .states
        .iter()
        .filter(|s| !s.voided)
        .filter_map(|s| s.start_date)
        .min()
    {
        if earliest < program.date_enrolled {
            program.date_enrolled = earliest;
        }
    }
}

/// Moves the patient into `state` at `date`
///
/// The state active at `date` ends there (and is voided if it would be left
/// with no length). The new state ends where the next state starts, or
/// where the interrupted state used to end. Returns false when the patient
/// is already in `state` at `date`.
pub fn transition(program: &mut PatientProgram, workflow: WorkflowId, state: StateId, date: NaiveDateTime) -> bool {
    if program.state_on(workflow, date).is_some_and(|s| s.state == state) {
        return false;
    }

    let next_start = program
        .states
        .iter()
        .filter(|s| s.workflow == workflow && !s.voided)
        .filter_map(|s| s.start_date)
        .filter(|start| *start > date)
        .min();

    let mut interrupted_end = None;
    if let Some(prev) = program
        .states
        .iter_mut()
        .find(|s| s.workflow == workflow && s.is_active_on(date))
    {
        interrupted_end = prev.end_date;
        if prev.start_date == Some(date) {
            prev.voided = true;
        } else {
            prev.end_date = Some(date);
        }
    }

    let mut entered = PatientState::new(workflow, state, date);
    entered.end_date = next_start.or(interrupted_end);
    program.states.push(entered);
    keep_enrollment_first(program);
    true
}

/// Edits the state that started at `old`, moving it to `new`
///
/// Moving earlier voids every state that started in `[new, old)` and ends
/// the state active at `new` there. Moving exactly onto the start of a
/// later state replaces that state; moving past it is rejected. A cleared value voids the state and lets its
/// predecessor run on to where it ended.
///
/// # Errors
///
/// Returns a message when the move would cross a later state.
pub fn edit_state(
    program: &mut PatientProgram,
    workflow: WorkflowId,
    old: NaiveDateTime,
    new: NaiveDateTime,
    state: Option<StateId>,
) -> std::result::Result<StateEdit, String> {
    let Some(idx) = program
        .sorted_states(workflow)
        .into_iter()
        .find(|&i| starts_at(program.states[i].start_date, old))
    else {
        return Ok(StateEdit::NotFound);
    };
    let Some(start) = program.states[idx].start_date else {
        return Ok(StateEdit::NotFound);
    };
    let end = program.states[idx].end_date;

    let Some(state) = state else {
        program.states[idx].voided = true;
        if let Some(prev) = program
            .states
            .iter_mut()
            .find(|s| s.workflow == workflow && !s.voided && s.end_date == Some(start))
        {
            prev.end_date = end;
        }
        return Ok(StateEdit::Changed);
    };

    if start == new && program.states[idx].state == state {
        return Ok(StateEdit::Unchanged);
    }

    if new > start {
        let crossed = program.states.iter().enumerate().any(|(i, s)| {
            i != idx
                && s.workflow == workflow
                && !s.voided
                && s.start_date.is_some_and(|d| d > start && d < new)
        });
        if crossed {
            return Err("A state cannot be moved past the start of a later state".to_string());
        }
        // a state starting exactly at `new` would be left with nothing before
        // the edited one takes over, so it gives way
        let mut landing_end = None;
        for (i, s) in program.states.iter_mut().enumerate() {
            if i != idx && s.workflow == workflow && !s.voided && s.start_date == Some(new) {
                s.voided = true;
                landing_end = Some(s.end_date);
            }
        }
        if let Some(end) = landing_end {
            program.states[idx].end_date = end;
        }
        for s in program
            .states
            .iter_mut()
            .filter(|s| s.workflow == workflow && !s.voided && s.end_date == Some(start))
        {
            s.end_date = Some(new);
        }
    } else if new < start {
        for (i, s) in program.states.iter_mut().enumerate() {
            if i != idx
                && s.workflow == workflow
                && !s.voided
                && s.start_date.is_some_and(|d| d >= new && d < start)
            {
                s.voided = true;
            }
        }
        for (i, s) in program.states.iter_mut().enumerate() {
            if i != idx && s.workflow == workflow && s.is_active_on(new) {
                s.end_date = Some(new);
            }
        }
    }

    let edited = &mut program.states[idx];
    edited.start_date = Some(new);
    edited.state = state;
    keep_enrollment_first(program);
    Ok(StateEdit::Changed)
}

struct Planner<'a, 'b> {
    ctx: &'b ProgramContext<'a>,
    errors: &'b mut ValidationErrors,
    /// Working copies, paired with the stored version for change detection
    programs: Vec<(Option<PatientProgram>, PatientProgram)>,
}

impl Planner<'_, '_> {
    fn active_on(&self, program: ProgramId, date: NaiveDateTime) -> Option<usize> {
        self.programs
            .iter()
            .position(|(_, p)| p.program == program && p.is_active_on(date))
    }

    fn create(&mut self, program: ProgramId, date: NaiveDateTime) -> usize {
        self.programs
            .push((None, PatientProgram::new(self.ctx.patient, program, date)));
        self.programs.len() - 1
    }

    fn plan_enrollment(&mut self, field: &EnrollField, values: &SubmittedValues) -> Result<()> {
        let checked = values
            .widget(field.widget)
            .is_some_and(|v| !v.eq_ignore_ascii_case("false"));
        if !checked {
            return Ok(());
        }
        let submitted_date = match field.date_widget {
            Some(widget) => match values.datetime(widget, &self.ctx.config.formats) {
                Ok(date) => date,
                Err(reason) => {
                    self.errors.push(widget.to_string(), reason);
                    return Ok(());
                }
            },
            None => None,
        };
        let date = submitted_date.unwrap_or(self.ctx.encounter_datetime);

        if let (Some(previous), Some(new_date)) = (self.ctx.previous_datetime, submitted_date) {
            if let Some(idx) = self.active_on(field.program, previous) {
                self.move_enrollment(idx, new_date, field);
                return Ok(());
            }
        }

        if self.active_on(field.program, date).is_some() {
            debug!(program = %field.program, "Patient already enrolled, reusing enrollment");
            return Ok(());
        }

        if let Some(idx) = self.programs.iter().position(|(_, p)| {
            p.program == field.program && !p.voided && p.date_completed.is_none() && p.date_enrolled > date
        }) {
            self.move_enrollment(idx, date, field);
            return Ok(());
        }

        let program = self.ctx.repository.program(field.program)?;
        let idx = self.create(field.program, date);
        for state in &field.states {
            if let Some(workflow) = program.workflow_of_state(*state) {
                self.programs[idx]
                    .1
                    .states
                    .push(PatientState::new(workflow.id, *state, date));
            }
        }
        Ok(())
    }

    /// Moves an enrollment date, carrying along states that started with it
    fn move_enrollment(&mut self, idx: usize, date: NaiveDateTime, field: &EnrollField) {
        let program = &mut self.programs[idx].1;
        let old = program.date_enrolled;
        if old == date {
            return;
        }
        program.date_enrolled = date;
        for state in program
            .states
            .iter_mut()
            .filter(|s| !s.voided && s.start_date == Some(old))
        {
            state.start_date = Some(date);
        }
        let earliest = program
            .states
            .iter()
            .filter(|s| !s.voided)
            .filter_map(|s| s.start_date)
            .min();
        if earliest.is_some_and(|e| e < date) {
            let key = field.date_widget.unwrap_or(field.widget).to_string();
            self.errors
                .push(key, "The enrollment date cannot be after the start of a state");
        }
    }

    fn plan_state(&mut self, field: &WorkflowStateField, values: &SubmittedValues) {
        let submitted = match values.widget(field.widget) {
            None => None,
            Some(raw) => match raw.parse::<StateId>() {
                Ok(id) if field.options.iter().any(|o| o.state == id) => Some(id),
                _ => {
                    self.errors
                        .push(field.widget.to_string(), format!("'{raw}' is not an allowed state"));
                    return;
                }
            },
        };
        let date = self.ctx.encounter_datetime;

        if let Some(old) = self.ctx.previous_datetime {
            if let Some(idx) = self
                .active_on(field.program, old)
                .or_else(|| self.active_on(field.program, date))
            {
                match edit_state(&mut self.programs[idx].1, field.workflow, old, date, submitted) {
                    Ok(StateEdit::NotFound) => {}
                    Ok(_) => return,
                    Err(reason) => {
                        self.errors.push(field.widget.to_string(), reason);
                        return;
                    }
                }
            }
        }

        let Some(state) = submitted else {
            return;
        };
        let idx = match self.active_on(field.program, date) {
            Some(idx) => idx,
            None => self.create(field.program, date),
        };
        transition(&mut self.programs[idx].1, field.workflow, state, date);
    }

    /// Completes the enrollment active at the encounter, closing its open states
    ///
    /// The outcome is the coded answer this submission records for the
    /// program's outcomes concept, if it has one.
    fn plan_completion(&mut self, field: &CompleteProgramField, changes: &ChangeSet) -> Result<()> {
        let date = self.ctx.encounter_datetime;
        let Some(idx) = self.active_on(field.program, date) else {
            debug!(program = %field.program, "No active enrollment to complete");
            return Ok(());
        };

        let outcome = match self.ctx.repository.program(field.program)?.outcomes_concept {
            None => None,
            Some(concept) => {
                let answers: Vec<_> = changes
                    .obs_to_create
                    .iter()
                    .filter(|o| o.concept == concept)
                    .filter_map(|o| match o.value {
                        Some(ObsValue::Coded(answer)) => Some(answer),
                        _ => None,
                    })
                    .collect();
                if answers.len() > 1 {
                    self.errors
                        .push(COMPLETE_PROGRAM_FIELD, "Only one program outcome may be recorded");
                    return Ok(());
                }
                answers.first().copied()
            }
        };

        let program = &mut self.programs[idx].1;
        program.date_completed = Some(date);
        if outcome.is_some() {
            program.outcome = outcome;
        }
        for state in program.states.iter_mut().filter(|s| s.is_active_on(date)) {
            state.end_date = Some(date);
        }
        Ok(())
    }
}

/// Error key for problems with a `completeProgram` tag, which has no widget
pub const COMPLETE_PROGRAM_FIELD: &str = "completeProgram";

/// Plans enrollment and workflow state changes of a submission
///
/// # Errors
///
/// Returns a repository error if enrollments cannot be read; submission
/// problems are collected into `errors`.
pub fn plan_programs(
    schema: &Schema,
    values: &SubmittedValues,
    ctx: &ProgramContext<'_>,
    changes: &mut ChangeSet,
    errors: &mut ValidationErrors,
) -> Result<()> {
    let enrollments = schema.enrollments();
    let states = schema.workflow_states();
    let completions = schema.program_completions();
    if enrollments.is_empty() && states.is_empty() && completions.is_empty() {
        return Ok(());
    }

    let stored = ctx.repository.patient_programs(ctx.patient)?;
    let mut planner = Planner {
        ctx,
        errors,
        programs: stored.into_iter().map(|p| (Some(p.clone()), p)).collect(),
    };
    for field in enrollments {
        planner.plan_enrollment(field, values)?;
    }
    for field in states {
        planner.plan_state(field, values);
    }
    if ctx.previous_datetime.is_none() {
        for field in completions {
            planner.plan_completion(field, changes)?;
        }
    }

    for (stored, working) in planner.programs {
        if stored.as_ref() != Some(&working) {
            changes.programs_to_save.push(working);
        }
    }
    Ok(())
}
