// Formentry - Clinical Form Compiler and Submission Engine
// Copyright (c) 2025 Formentry Contributors
// Licensed under the MIT License

//! Template compiler
//!
//! Turns form markup into a [`Schema`] plus a placeholder HTML body. The
//! passes run in a fixed order, each total on its input:
//!
//! 1. **Text passes** ([`preprocess`]): reject DOCTYPE, rewrite named
//!    character codes, strip comments, escape test attributes, normalize
//!    `<br>`/`<hr>`.
//! 2. **Parse** ([`markup`]) into an owned tree.
//! 3. **Macros** ([`macros`]), then **repeats** ([`repeat`]).
//! 4. **Conditionals** ([`conditional`]): `includeIf`, `excludeIf`,
//!    `restrictByRole`, `ifMode`.
//! 5. **Schema build** ([`tags`]): every data-entry tag becomes a schema node
//!    and widget ids are handed out in document order.
//!
//! Any problem with the template is a [`FormDesignError`](crate::domain::FormDesignError)
//! and stops compilation.
//!
//! # Example
//!
//! ```rust
//! use formentry::adapters::repository::InMemoryRepository;
//! use formentry::config::FormEntryConfig;
//! use formentry::core::compiler::{compile, CompileEnv};
//! use formentry::core::expression::{EvaluationScope, SimpleEvaluator};
//! use formentry::core::session::FormMode;
//! use std::collections::BTreeSet;
//!
//! let repo = InMemoryRepository::default();
//! let config = FormEntryConfig::default();
//! let scope = EvaluationScope::new();
//! let roles = BTreeSet::new();
//! let env = CompileEnv {
//!     repository: &repo,
//!     config: &config,
//!     evaluator: &SimpleEvaluator,
//!     scope: &scope,
//!     roles: &roles,
//!     mode: FormMode::Enter,
//! };
//!
//! let form = compile("<macros>color=blue\nshape=circle</macros>$color $shape", &env).unwrap();
//! assert_eq!(form.text(), "blue circle");
//! ```

pub mod conditional;
pub mod macros;
pub mod markup;
pub mod preprocess;
pub mod repeat;
pub mod schema;
pub mod tags;

use crate::adapters::repository::ClinicalRepository;
use crate::config::FormEntryConfig;
use crate::core::expression::{EvaluationScope, ExpressionEvaluator};
use crate::core::session::FormMode;
use crate::domain::result::Result;
use conditional::ConditionContext;
use markup::{Element, Node};
use schema::{ObsGroupTemplate, Schema, SchemaNode};
use std::collections::BTreeSet;
use std::time::Instant;
use tags::{CompileContext, TagKind};

pub use schema::GroupKey;

/// Read-only inputs of one compile
pub struct CompileEnv<'a> {
    pub repository: &'a dyn ClinicalRepository,
    pub config: &'a FormEntryConfig,
    pub evaluator: &'a dyn ExpressionEvaluator,
    pub scope: &'a EvaluationScope,
    pub roles: &'a BTreeSet<String>,
    /// Mode the form is being opened in, read by `ifMode`
    pub mode: FormMode,
}

/// Output of a compile
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledForm {
    pub schema: Schema,
    /// Concrete template with data tags replaced by widget placeholders
    pub html: String,
    /// Number of widget ids handed out
    pub widget_count: u32,
}

impl CompiledForm {
    /// Visible text of the compiled body
    pub fn text(&self) -> String {
        markup::parse(&self.html)
            .map(|root| root.text_content())
            .unwrap_or_default()
    }
}

/// Compiles a template
///
/// # Errors
///
/// Returns a form-design error for malformed markup or attributes, and a
/// misuse error for unknown static constants.
pub fn compile(template: &str, env: &CompileEnv<'_>) -> Result<CompiledForm> {
    let started = Instant::now();

    let text = preprocess::preprocess(strip_declaration(template))?;
    let mut body = parse_body(&text)?;

    macros::expand_macros(&mut body, env.evaluator, env.scope)?;
    repeat::expand_repeats(&mut body)?;
    conditional::apply_conditionals(
        &mut body,
        &ConditionContext {
            evaluator: env.evaluator,
            scope: env.scope,
            roles: env.roles,
            mode: env.mode,
        },
    )?;

    let mut ctx = CompileContext::new(env.repository, &env.config.concepts, &env.config.regimens);
    let (nodes, html_nodes) = build_nodes(std::mem::take(&mut body.children), &mut ctx)?;
    let schema = Schema { nodes };

    let html = format!(
        "<div class=\"htmlform\">{}</div>",
        markup::serialize_nodes(&html_nodes)
    );
    let widget_count = ctx.widgets.allocated();

    crate::log_compile_complete!(
        widget_count,
        schema.groups().len(),
        started.elapsed().as_millis()
    );

    Ok(CompiledForm {
        schema,
        html,
        widget_count,
    })
}

fn strip_declaration(template: &str) -> &str {
    let trimmed = template.trim_start();
    if trimmed.starts_with("<?xml") {
        if let Some(end) = trimmed.find("?>") {
            return &trimmed[end + 2..];
        }
    }
    template
}

/// Parses the template; a template without an `htmlform` root becomes the body of one
fn parse_body(text: &str) -> Result<Element> {
    let mut wrapper = markup::parse(&format!("<formentry>{text}</formentry>"))?;
    let only_root = {
        let mut elements = wrapper.child_elements();
        let first = elements.next();
        let blank_text = wrapper.children.iter().all(|n| match n {
            Node::Text(t) => t.trim().is_empty(),
            Node::Element(_) => true,
        });
        match (first, elements.next()) {
            (Some(e), None) if e.name == "htmlform" && blank_text => true,
            _ => false,
        }
    };
    if only_root {
        if let Some(Node::Element(root)) = wrapper
            .children
            .into_iter()
            .find(|n| matches!(n, Node::Element(_)))
        {
            return Ok(root);
        }
        return Ok(Element::new("htmlform"));
    }
    wrapper.name = "htmlform".to_string();
    Ok(wrapper)
}

fn placeholder(widget: impl ToString) -> Node {
    let mut span = Element::new("span");
    span.set_attr("class", "field");
    span.set_attr("data-widget", widget.to_string());
    Node::Element(span)
}

fn build_nodes(
    children: Vec<Node>,
    ctx: &mut CompileContext<'_>,
) -> Result<(Vec<SchemaNode>, Vec<Node>)> {
    let mut nodes = Vec::new();
    let mut html = Vec::new();

    for child in children {
        let element = match child {
            Node::Element(e) => e,
            text => {
                html.push(text);
                continue;
            }
        };

        let Some(kind) = TagKind::from_name(&element.name) else {
            let mut element = element;
            let (inner_nodes, inner_html) =
                build_nodes(std::mem::take(&mut element.children), ctx)?;
            nodes.extend(inner_nodes);
            element.children = inner_html;
            html.push(Node::Element(element));
            continue;
        };

        let node = match kind {
            TagKind::ObsGroup => {
                let concept = tags::grouping_concept(&element, ctx)?;
                let (key, path) = ctx.enter_group(concept);
                let built = build_nodes(element.children.clone(), ctx);
                ctx.leave_group();
                let (children, inner_html) = built?;

                let mut div = Element::new("div");
                div.set_attr("class", "obsgroup");
                div.set_attr("data-group", key.to_string());
                div.children = inner_html;
                html.push(Node::Element(div));

                SchemaNode::Group(ObsGroupTemplate {
                    key,
                    concept,
                    path,
                    label: element.non_blank_attr("label").map(str::to_string),
                    children,
                })
            }
            TagKind::Section => {
                let mut section = tags::build_section(&element);
                let (children, inner_html) = build_nodes(element.children.clone(), ctx)?;
                section.children = children;

                let mut div = Element::new("div");
                div.set_attr("class", "section");
                if let Some(header) = &section.header {
                    let mut span = Element::new("span");
                    span.set_attr("class", "sectionHeader");
                    span.children.push(Node::Text(header.clone()));
                    div.children.push(Node::Element(span));
                }
                div.children.extend(inner_html);
                html.push(Node::Element(div));

                SchemaNode::Section(section)
            }
            leaf => {
                let node = match leaf {
                    TagKind::Obs => SchemaNode::Obs(tags::build_obs(&element, ctx)?),
                    TagKind::EncounterDate => {
                        SchemaNode::EncounterDate(tags::build_encounter_date(&element, ctx)?)
                    }
                    TagKind::EncounterLocation => {
                        SchemaNode::EncounterLocation(tags::build_reference_field(&element, ctx)?)
                    }
                    TagKind::EncounterProvider => {
                        SchemaNode::EncounterProvider(tags::build_reference_field(&element, ctx)?)
                    }
                    TagKind::WorkflowState => {
                        SchemaNode::WorkflowState(tags::build_workflow_state(&element, ctx)?)
                    }
                    TagKind::EncounterType => {
                        SchemaNode::EncounterType(tags::build_encounter_type(&element, ctx)?)
                    }
                    TagKind::EnrollInProgram => {
                        SchemaNode::EnrollInProgram(tags::build_enroll(&element, ctx)?)
                    }
                    TagKind::CompleteProgram => {
                        SchemaNode::CompleteProgram(tags::build_complete_program(&element, ctx)?)
                    }
                    TagKind::DrugOrder => {
                        SchemaNode::DrugOrder(tags::build_drug_order(&element, ctx)?)
                    }
                    TagKind::StandardRegimen => {
                        SchemaNode::StandardRegimen(tags::build_standard_regimen(&element, ctx)?)
                    }
                    TagKind::ObsGroup | TagKind::Section => unreachable!("handled above"),
                };
                html.extend(node.own_widgets().into_iter().map(placeholder));
                node
            }
        };
        nodes.push(node);
    }

    Ok((nodes, html))
}
