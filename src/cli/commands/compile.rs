// Formentry - Clinical Form Compiler and Submission Engine
// Copyright (c) 2025 Formentry Contributors
// Licensed under the MIT License

//! Compile command implementation
//!
//! Compiles a template and prints one line per widget, or the schema as JSON.

use super::{exit_code_for, load_config_or_default, parse_roles};
use crate::adapters::repository::{ClinicalRepository, InMemoryRepository};
use crate::core::compiler::schema::SchemaNode;
use crate::core::compiler::{compile, CompileEnv, CompiledForm};
use crate::core::expression::{EvaluationScope, SimpleEvaluator};
use crate::core::session::FormMode;
use crate::domain::context::ResultExt;
use crate::domain::{PatientId, Result};
use clap::Args;
use std::collections::{BTreeMap, BTreeSet};

/// Arguments for the compile command
#[derive(Args, Debug)]
pub struct CompileArgs {
    /// Path to the form template
    pub template: String,

    /// Comma-separated roles of the rendering user
    #[arg(long)]
    pub roles: Option<String>,

    /// JSON fixture with concepts, programs and patients
    #[arg(long)]
    pub fixture: Option<String>,

    /// Patient whose data drives includeIf/excludeIf tests
    #[arg(long)]
    pub patient: Option<u32>,

    /// Mode seen by ifMode blocks (ENTER, VIEW or EDIT)
    #[arg(long, default_value = "ENTER")]
    pub mode: String,

    /// Print the schema and placeholder HTML as JSON
    #[arg(long)]
    pub json: bool,
}

impl CompileArgs {
    /// Execute the compile command
    pub fn execute(&self, config_path: &str) -> anyhow::Result<i32> {
        tracing::info!(template = %self.template, "Compiling form");

        let form = match self.compile_form(config_path) {
            Ok(form) => form,
            Err(e) => {
                crate::log_error_with_context!(&e, "Compile failed");
                println!("❌ Failed to compile {}", self.template);
                println!("   Error: {e}");
                return Ok(exit_code_for(&e));
            }
        };

        if self.json {
            let output = serde_json::json!({
                "widget_count": form.widget_count,
                "schema": form.schema,
                "html": form.html,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        } else {
            println!("✅ Compiled {} ({} widgets)", self.template, form.widget_count);
            println!();
            for line in widget_table(&form) {
                println!("  {line}");
            }
        }
        Ok(0)
    }

    fn compile_form(&self, config_path: &str) -> Result<CompiledForm> {
        let config = load_config_or_default(config_path)?;
        let template = std::fs::read_to_string(&self.template)
            .with_context(|| format!("Failed to read template {}", self.template))?;
        let repository = match &self.fixture {
            Some(path) => InMemoryRepository::from_json_file(path)?,
            None => InMemoryRepository::default(),
        };

        let mode: FormMode = self
            .mode
            .parse()
            .map_err(crate::domain::FormEntryError::Misuse)?;
        let roles: BTreeSet<String> = parse_roles(self.roles.as_deref()).into_iter().collect();
        let scope = match self.patient {
            Some(id) => {
                let id = PatientId::new(id).map_err(crate::domain::FormEntryError::Misuse)?;
                let patient = repository.patient(id)?;
                let today = chrono::Local::now().date_naive();
                EvaluationScope::for_patient(&patient, today, &roles, &BTreeMap::new())
            }
            None => EvaluationScope::new(),
        };

        let env = CompileEnv {
            repository: &repository,
            config: &config,
            evaluator: &SimpleEvaluator,
            scope: &scope,
            roles: &roles,
            mode,
        };
        compile(&template, &env)
    }
}

/// One description line per widget, in document order
pub fn widget_table(form: &CompiledForm) -> Vec<String> {
    let mut lines = Vec::new();
    for node in form.schema.walk() {
        let (kind, detail) = describe(node);
        for widget in node.own_widgets() {
            lines.push(format!("{:<6} {:<18} {}", widget.to_string(), kind, detail));
        }
    }
    lines
}

fn describe(node: &SchemaNode) -> (&'static str, String) {
    match node {
        SchemaNode::Obs(f) => {
            let concepts: Vec<String> = f.concepts.iter().map(|c| c.to_string()).collect();
            let kind = if f.multi { "obs (multi)" } else { "obs" };
            (kind, format!("concept {} {:?}", concepts.join(","), f.datatype))
        }
        SchemaNode::EncounterDate(f) => (
            "encounterDate",
            if f.show_time { "with time".to_string() } else { String::new() },
        ),
        SchemaNode::EncounterLocation(_) => ("encounterLocation", String::new()),
        SchemaNode::EncounterProvider(_) => ("encounterProvider", String::new()),
        SchemaNode::EncounterType(f) => ("encounterType", format!("{} types", f.options.len())),
        SchemaNode::WorkflowState(f) => ("workflowState", format!("workflow {}", f.workflow)),
        SchemaNode::EnrollInProgram(f) => ("enrollInProgram", format!("program {}", f.program)),
        SchemaNode::DrugOrder(f) => ("drugOrder", format!("concept {}", f.concept)),
        SchemaNode::StandardRegimen(f) => {
            let codes: Vec<&str> = f.regimens.iter().map(|r| r.code.as_str()).collect();
            ("standardRegimen", codes.join(","))
        }
        SchemaNode::Section(_) | SchemaNode::Group(_) | SchemaNode::CompleteProgram(_) => {
            ("", String::new())
        }
    }
}
