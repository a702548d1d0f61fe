// Formentry - Clinical Form Compiler and Submission Engine
// Copyright (c) 2025 Formentry Contributors
// Licensed under the MIT License

//! Form sessions
//!
//! A [`FormSession`] ties one compiled form to one patient, mode and
//! optional encounter. Rendering and submission recompute the snapshot and
//! the matching every time; nothing is cached between requests.
//!
//! # Example
//!
//! ```rust,no_run
//! use formentry::adapters::repository::{ClinicalRepository, ClinicalWriter, InMemoryRepository};
//! use formentry::config::FormEntryConfig;
//! use formentry::core::expression::SimpleEvaluator;
//! use formentry::core::session::{FormMode, FormSession, RenderContext};
//! use formentry::core::values::SubmittedValues;
//! use formentry::domain::ids::PatientId;
//!
//! # fn example() -> formentry::domain::Result<()> {
//! let mut repository = InMemoryRepository::from_json_file("clinic.json")?;
//! let config = FormEntryConfig::default();
//! let patient = repository.patient(PatientId::new(2).unwrap())?;
//! let now = chrono::Local::now().naive_local();
//! let context = RenderContext::new(FormMode::Enter, patient, now);
//!
//! let changes = {
//!     let session = FormSession::open(
//!         "<htmlform><encounterDate/><obs conceptId=\"5089\"/></htmlform>",
//!         &repository,
//!         &config,
//!         &SimpleEvaluator,
//!         context,
//!     )?;
//!     let mut values = SubmittedValues::new();
//!     values.set("w1", "2024-03-01");
//!     values.set("w2", "70");
//!     session.submit(&values, None)?
//! };
//! repository.apply(&changes)?;
//! # Ok(())
//! # }
//! ```

use crate::adapters::repository::ClinicalRepository;
use crate::config::FormEntryConfig;
use crate::core::binder::{bind_values, BinderInputs, BoundValues};
use crate::core::compiler::{compile, CompileEnv, CompiledForm};
use crate::core::expression::{EvaluationScope, ExpressionEvaluator};
use crate::core::matching::{match_observations, Binding};
use crate::core::reconcile::{plan_submission, void_by_schema, Existing, SubmissionContext};
use crate::core::snapshot::EncounterSnapshot;
use crate::core::values::SubmittedValues;
use crate::domain::changes::ChangeSet;
use crate::domain::encounter::Patient;
use crate::domain::errors::FormEntryError;
use crate::domain::ids::EncounterId;
use crate::domain::Result;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use tracing::info;

/// What the user is doing with a form
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FormMode {
    Enter,
    View,
    Edit,
}

impl fmt::Display for FormMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FormMode::Enter => "ENTER",
            FormMode::View => "VIEW",
            FormMode::Edit => "EDIT",
        };
        write!(f, "{s}")
    }
}

impl FromStr for FormMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ENTER" => Ok(FormMode::Enter),
            "VIEW" => Ok(FormMode::View),
            "EDIT" => Ok(FormMode::Edit),
            other => Err(format!("Invalid mode '{other}'. Must be one of: ENTER, VIEW, EDIT")),
        }
    }
}

/// Who is rendering what, and when
#[derive(Debug, Clone)]
pub struct RenderContext {
    pub mode: FormMode,
    pub patient: Patient,
    /// The encounter viewed or edited
    pub encounter: Option<EncounterId>,
    pub roles: BTreeSet<String>,
    pub user_properties: BTreeMap<String, String>,
    pub session_attributes: BTreeMap<String, String>,
    pub now: NaiveDateTime,
}

impl RenderContext {
    pub fn new(mode: FormMode, patient: Patient, now: NaiveDateTime) -> Self {
        Self {
            mode,
            patient,
            encounter: None,
            roles: BTreeSet::new(),
            user_properties: BTreeMap::new(),
            session_attributes: BTreeMap::new(),
            now,
        }
    }

    pub fn with_encounter(mut self, encounter: EncounterId) -> Self {
        self.encounter = Some(encounter);
        self
    }

    pub fn with_roles(mut self, roles: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.roles = roles.into_iter().map(Into::into).collect();
        self
    }
}

/// A form as shown to the user
#[derive(Debug, Clone, Serialize)]
pub struct RenderedForm {
    pub html: String,
    pub values: BoundValues,
    pub binding: Binding,
    /// True when matching had to pick among equally good candidates
    pub ambiguous: bool,
}

/// One compiled form bound to a render context
pub struct FormSession<'a> {
    repository: &'a dyn ClinicalRepository,
    config: &'a FormEntryConfig,
    evaluator: &'a dyn ExpressionEvaluator,
    context: RenderContext,
    scope: EvaluationScope,
    form: CompiledForm,
}

impl<'a> FormSession<'a> {
    /// Compiles a template for a render context
    ///
    /// # Errors
    ///
    /// Returns a form design error if the template does not compile, and a
    /// misuse error when VIEW or EDIT is requested without an encounter.
    pub fn open(
        template: &str,
        repository: &'a dyn ClinicalRepository,
        config: &'a FormEntryConfig,
        evaluator: &'a dyn ExpressionEvaluator,
        context: RenderContext,
    ) -> Result<Self> {
        if context.mode != FormMode::Enter && context.encounter.is_none() {
            return Err(FormEntryError::Misuse(format!(
                "{} mode requires an encounter",
                context.mode
            )));
        }
        let scope = EvaluationScope::for_patient(
            &context.patient,
            context.now.date(),
            &context.roles,
            &context.session_attributes,
        );
        let env = CompileEnv {
            repository,
            config,
            evaluator,
            scope: &scope,
            roles: &context.roles,
            mode: context.mode,
        };
        let form = compile(template, &env)?;
        Ok(Self {
            repository,
            config,
            evaluator,
            context,
            scope,
            form,
        })
    }

    pub fn form(&self) -> &CompiledForm {
        &self.form
    }

    pub fn context(&self) -> &RenderContext {
        &self.context
    }

    /// Loads the encounter and matches its observations to the schema
    fn load(&self) -> Result<Option<(EncounterSnapshot, Binding)>> {
        let Some(id) = self.context.encounter else {
            return Ok(None);
        };
        let snapshot = EncounterSnapshot::load(self.repository, id)?;
        if snapshot.encounter.patient != self.context.patient.id {
            return Err(FormEntryError::Misuse(format!(
                "encounter {id} does not belong to patient {}",
                self.context.patient.id
            )));
        }
        let binding = match_observations(&self.form.schema, &snapshot.obs, &self.config.matching);
        Ok(Some((snapshot, binding)))
    }

    /// Resolves what every widget shows
    ///
    /// # Errors
    ///
    /// Returns a form design error for a default that does not fit its
    /// field, or a repository error.
    pub fn render(&self) -> Result<RenderedForm> {
        let loaded = match self.context.mode {
            FormMode::Enter => None,
            FormMode::View | FormMode::Edit => self.load()?,
        };
        let binding = loaded.as_ref().map(|(_, b)| b.clone()).unwrap_or_default();
        let inputs = BinderInputs {
            repository: self.repository,
            config: self.config,
            evaluator: self.evaluator,
            scope: &self.scope,
            context: &self.context,
        };
        let values = bind_values(
            &self.form.schema,
            &binding,
            loaded.as_ref().map(|(s, _)| s),
            &inputs,
        )?;
        Ok(RenderedForm {
            html: self.form.html.clone(),
            values,
            ambiguous: binding.ambiguous,
            binding,
        })
    }

    /// Redisplays a rejected submission with the values the user sent
    pub fn render_submission(&self, last: &SubmittedValues) -> RenderedForm {
        RenderedForm {
            html: self.form.html.clone(),
            values: BoundValues::from_submission(&self.form.schema, last),
            binding: Binding::default(),
            ambiguous: false,
        }
    }

    fn submission_context(&self, void_reason: Option<String>) -> SubmissionContext<'a> {
        SubmissionContext {
            repository: self.repository,
            config: self.config,
            patient: self.context.patient.id,
            now: self.context.now,
            void_reason,
        }
    }

    /// Plans the writes a submission needs
    ///
    /// # Errors
    ///
    /// Returns `FormEntryError::Validation` when any value is rejected, and a
    /// misuse error in VIEW mode.
    pub fn submit(&self, values: &SubmittedValues, void_reason: Option<String>) -> Result<ChangeSet> {
        if self.context.mode == FormMode::View {
            return Err(FormEntryError::Misuse("forms cannot be submitted in VIEW mode".to_string()));
        }
        let ctx = self.submission_context(void_reason);
        let loaded = match self.context.mode {
            FormMode::Edit => self.load()?,
            _ => None,
        };
        let existing = loaded.as_ref().map(|(snapshot, binding)| Existing { snapshot, binding });
        let changes = plan_submission(&self.form.schema, values, existing, &ctx)?;
        info!(
            mode = %self.context.mode,
            patient = %self.context.patient.id,
            empty = changes.is_empty(),
            "Submission accepted"
        );
        Ok(changes)
    }

    /// Plans voiding everything this form recognizes in the encounter
    ///
    /// # Errors
    ///
    /// Returns a misuse error when the session has no encounter.
    pub fn void_encounter(&self, reason: Option<String>) -> Result<ChangeSet> {
        let Some((snapshot, binding)) = self.load()? else {
            return Err(FormEntryError::Misuse("no encounter to void".to_string()));
        };
        Ok(void_by_schema(
            &self.form.schema,
            Existing {
                snapshot: &snapshot,
                binding: &binding,
            },
            self.config,
            reason,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::repository::ClinicalWriter;
    use crate::core::binder::ValueSource;
    use crate::core::expression::SimpleEvaluator;
    use crate::core::testing::{day, encounter_id, patient_id, repository};
    use crate::domain::ids::WidgetId;

    const FORM: &str = r#"<htmlform>
        <encounterDate/>
        <encounterLocation default="Xanadu"/>
        <obs conceptId="5089" defaultValue="60"/>
        <obs conceptId="80000"/>
    </htmlform>"#;

    fn context(repo: &crate::adapters::repository::InMemoryRepository, mode: FormMode) -> RenderContext {
        let patient = repo.patient(patient_id()).unwrap();
        let context = RenderContext::new(mode, patient, day(2024, 3, 10));
        match mode {
            FormMode::Enter => context,
            _ => context.with_encounter(encounter_id()),
        }
    }

    #[test]
    fn test_mode_parse() {
        assert_eq!("edit".parse::<FormMode>(), Ok(FormMode::Edit));
        assert!("delete".parse::<FormMode>().is_err());
    }

    #[test]
    fn test_edit_requires_encounter() {
        let repo = repository();
        let config = FormEntryConfig::default();
        let context = RenderContext::new(FormMode::Edit, repo.patient(patient_id()).unwrap(), day(2024, 3, 10));
        let err = FormSession::open(FORM, &repo, &config, &SimpleEvaluator, context).err().unwrap();
        assert!(matches!(err, FormEntryError::Misuse(_)));
    }

    #[test]
    fn test_enter_then_edit_then_view() {
        let mut repo = repository();
        let config = FormEntryConfig::default();

        let changes = {
            let session = FormSession::open(FORM, &repo, &config, &SimpleEvaluator, context(&repo, FormMode::Enter)).unwrap();
            let rendered = session.render().unwrap();
            assert_eq!(rendered.values.value(WidgetId::from_sequence(3)), Some("60"));
            let mut values = rendered.values.to_submission();
            values.set("w1", "2024-03-05");
            values.set("w4", "first visit");
            session.submit(&values, None).unwrap()
        };
        let applied = repo.apply(&changes).unwrap();
        let encounter = applied.encounter.unwrap();
        assert_eq!(applied.created_obs.len(), 2);

        let edit = RenderContext::new(FormMode::Edit, repo.patient(patient_id()).unwrap(), day(2024, 3, 10))
            .with_encounter(encounter);
        let session = FormSession::open(FORM, &repo, &config, &SimpleEvaluator, edit).unwrap();
        let rendered = session.render().unwrap();
        assert_eq!(rendered.values.get(WidgetId::from_sequence(3)).unwrap().source, ValueSource::Bound);
        assert_eq!(rendered.values.value(WidgetId::from_sequence(2)), Some("2"));
        let resubmitted = session.submit(&rendered.values.to_submission(), None).unwrap();
        assert!(resubmitted.is_empty(), "{}", resubmitted.summary());
    }

    #[test]
    fn test_view_cannot_submit() {
        let repo = repository();
        let config = FormEntryConfig::default();
        let session = FormSession::open(FORM, &repo, &config, &SimpleEvaluator, context(&repo, FormMode::View)).unwrap();
        assert!(session.render().is_ok());
        let err = session.submit(&SubmittedValues::new(), None).unwrap_err();
        assert!(matches!(err, FormEntryError::Misuse(_)));
    }

    #[test]
    fn test_rejected_submission_redisplays_values() {
        let repo = repository();
        let config = FormEntryConfig::default();
        let session = FormSession::open(FORM, &repo, &config, &SimpleEvaluator, context(&repo, FormMode::Enter)).unwrap();
        let mut values = SubmittedValues::new();
        values.set("w3", "heavy");
        let err = session.submit(&values, None).unwrap_err();
        assert!(err.validation_errors().is_some());

        let shown = session.render_submission(&values);
        assert_eq!(shown.values.value(WidgetId::from_sequence(3)), Some("heavy"));
        assert!(shown.values.get(WidgetId::from_sequence(2)).is_none());
    }
}
