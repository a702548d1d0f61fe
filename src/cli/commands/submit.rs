// Formentry - Clinical Form Compiler and Submission Engine
// Copyright (c) 2025 Formentry Contributors
// Licensed under the MIT License

//! Submit command implementation
//!
//! Plans a submission against a JSON fixture and, unless dry-run, applies it
//! and writes the updated fixture back.

use super::{exit_code_for, load_config_or_default, parse_roles};
use crate::adapters::repository::{ClinicalRepository, ClinicalWriter, InMemoryRepository};
use crate::core::expression::SimpleEvaluator;
use crate::core::session::{FormMode, FormSession, RenderContext};
use crate::core::values::SubmittedValues;
use crate::domain::context::ResultExt;
use crate::domain::{ChangeSet, EncounterId, FormEntryError, PatientId, Result};
use chrono::NaiveDateTime;
use clap::Args;

/// Arguments for the submit command
#[derive(Args, Debug)]
pub struct SubmitArgs {
    /// Path to the form template
    pub template: String,

    /// JSON fixture holding the clinical data
    #[arg(long)]
    pub fixture: String,

    /// JSON object mapping widget ids to one value or a list of values
    #[arg(long)]
    pub submission: String,

    /// Encounter to edit; omit to enter a new one
    #[arg(long)]
    pub encounter: Option<u32>,

    /// Patient the form is for (defaults to the edited encounter's patient)
    #[arg(long)]
    pub patient: Option<u32>,

    /// Comma-separated roles of the submitting user
    #[arg(long)]
    pub roles: Option<String>,

    /// Reason recorded on voided observations and orders
    #[arg(long)]
    pub void_reason: Option<String>,

    /// Print the plan without applying it
    #[arg(long)]
    pub dry_run: bool,
}

impl SubmitArgs {
    /// Execute the submit command
    pub fn execute(&self, config_path: &str) -> anyhow::Result<i32> {
        tracing::info!(
            template = %self.template,
            fixture = %self.fixture,
            encounter = ?self.encounter,
            "Submitting form"
        );

        let now = chrono::Local::now().naive_local();
        match self.run(config_path, now) {
            Ok((changes, applied)) => {
                println!("{}", serde_json::to_string_pretty(&changes)?);
                println!();
                println!("📋 Plan: {}", changes.summary());
                if applied {
                    println!("✅ Applied and saved to {}", self.fixture);
                } else {
                    println!("🔍 Dry run, nothing written");
                }
                Ok(0)
            }
            Err(e) => {
                crate::log_error_with_context!(&e, "Submission failed");
                match e.validation_errors() {
                    Some(errors) => {
                        println!("❌ Submission rejected");
                        for error in errors.errors() {
                            println!("   {error}");
                        }
                    }
                    None => {
                        println!("❌ Submission failed");
                        println!("   Error: {e}");
                    }
                }
                Ok(exit_code_for(&e))
            }
        }
    }

    /// Plans the submission and applies it unless dry-run
    fn run(&self, config_path: &str, now: NaiveDateTime) -> Result<(ChangeSet, bool)> {
        let config = load_config_or_default(config_path)?;
        let template = std::fs::read_to_string(&self.template)
            .with_context(|| format!("Failed to read template {}", self.template))?;
        let submission = std::fs::read_to_string(&self.submission)
            .with_context(|| format!("Failed to read submission {}", self.submission))?;
        let values: SubmittedValues = serde_json::from_str(&submission)
            .with_context(|| format!("Invalid submission {}", self.submission))?;
        let mut repository = InMemoryRepository::from_json_file(&self.fixture)?;

        let encounter = self
            .encounter
            .map(EncounterId::new)
            .transpose()
            .map_err(FormEntryError::Misuse)?;
        let patient_id = match (self.patient, encounter) {
            (Some(id), _) => PatientId::new(id).map_err(FormEntryError::Misuse)?,
            (None, Some(encounter)) => repository.encounter(encounter)?.patient,
            (None, None) => {
                return Err(FormEntryError::Misuse(
                    "--patient is required when entering a new encounter".to_string(),
                ))
            }
        };
        let patient = repository.patient(patient_id)?;

        let mode = if encounter.is_some() { FormMode::Edit } else { FormMode::Enter };
        let mut context =
            RenderContext::new(mode, patient, now).with_roles(parse_roles(self.roles.as_deref()));
        if let Some(encounter) = encounter {
            context = context.with_encounter(encounter);
        }

        let changes = {
            let session =
                FormSession::open(&template, &repository, &config, &SimpleEvaluator, context)?;
            session.submit(&values, self.void_reason.clone())?
        };

        if self.dry_run || config.application.dry_run || changes.is_empty() {
            return Ok((changes, false));
        }

        let applied = repository.apply(&changes)?;
        tracing::info!(encounter = ?applied.encounter, created_obs = applied.created_obs.len(), "Submission applied");
        repository.save_json_file(&self.fixture)?;
        Ok((changes, true))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::testing::{day, repository};
    use pretty_assertions::assert_eq;
    use std::fs;
    use tempfile::TempDir;

    fn workspace(submission: &str) -> (TempDir, SubmitArgs) {
        let dir = TempDir::new().unwrap();
        let fixture = dir.path().join("clinic.json");
        let template = dir.path().join("weight.xml");
        let values = dir.path().join("values.json");
        repository().save_json_file(&fixture).unwrap();
        fs::write(
            &template,
            "<htmlform><encounterDate/><obs conceptId=\"5089\"/></htmlform>",
        )
        .unwrap();
        fs::write(&values, submission).unwrap();

        let args = SubmitArgs {
            template: template.to_string_lossy().to_string(),
            fixture: fixture.to_string_lossy().to_string(),
            submission: values.to_string_lossy().to_string(),
            encounter: None,
            patient: Some(2),
            roles: None,
            void_reason: None,
            dry_run: false,
        };
        (dir, args)
    }

    #[test]
    fn test_submit_applies_and_saves_fixture() {
        let (_dir, args) = workspace(r#"{"w1": "2024-03-05", "w2": "70"}"#);
        let (changes, applied) = args.run("missing-config.toml", day(2024, 3, 10)).unwrap();
        assert!(applied);
        assert_eq!(changes.obs_to_create.len(), 1);

        let saved = InMemoryRepository::from_json_file(&args.fixture).unwrap();
        assert_eq!(saved.data().encounters.len(), 2);
        assert_eq!(saved.data().obs.len(), repository().data().obs.len() + 1);
    }

    #[test]
    fn test_dry_run_leaves_fixture_untouched() {
        let (_dir, mut args) = workspace(r#"{"w1": "2024-03-05", "w2": "70"}"#);
        args.dry_run = true;
        let before = fs::read_to_string(&args.fixture).unwrap();

        let (_, applied) = args.run("missing-config.toml", day(2024, 3, 10)).unwrap();
        assert!(!applied);
        assert_eq!(fs::read_to_string(&args.fixture).unwrap(), before);
    }

    #[test]
    fn test_rejected_submission_exits_with_validation_code() {
        let (_dir, args) = workspace(r#"{"w1": "2024-03-05", "w2": "heavy"}"#);
        let err = args.run("missing-config.toml", day(2024, 3, 10)).unwrap_err();
        assert_eq!(exit_code_for(&err), 3);
    }

    #[test]
    fn test_new_encounter_needs_a_patient() {
        let (_dir, mut args) = workspace("{}");
        args.patient = None;
        let err = args.run("missing-config.toml", day(2024, 3, 10)).unwrap_err();
        assert!(matches!(err, FormEntryError::Misuse(_)));
    }
}
