// Formentry - Clinical Form Compiler and Submission Engine
// Copyright (c) 2025 Formentry Contributors
// Licensed under the MIT License

//! Conditional blocks: `includeIf`, `excludeIf`, `restrictByRole` and `ifMode`
//!
//! `ifMode` keeps its body when the form is opened in the named mode. With
//! `include="false"` the body is kept in every other mode instead.

use super::markup::{Element, Node};
use crate::core::expression::{EvaluationScope, ExpressionEvaluator};
use crate::core::session::FormMode;
use crate::domain::errors::FormDesignError;
use crate::domain::result::Result;
use std::collections::BTreeSet;

const TEST_ATTRIBUTES: &[&str] = &["logicTest", "velocityTest", "test"];

/// Inputs the conditional pass reads
pub struct ConditionContext<'a> {
    pub evaluator: &'a dyn ExpressionEvaluator,
    pub scope: &'a EvaluationScope,
    pub roles: &'a BTreeSet<String>,
    pub mode: FormMode,
}

/// Resolves every conditional block, splicing kept bodies into the parent
pub fn apply_conditionals(element: &mut Element, ctx: &ConditionContext<'_>) -> Result<()> {
    let mut out = Vec::with_capacity(element.children.len());
    for child in std::mem::take(&mut element.children) {
        match child {
            Node::Element(mut e) => {
                let keep = match e.name.as_str() {
                    "includeIf" => Some(evaluate_test(&e, ctx)?),
                    "excludeIf" => Some(!evaluate_test(&e, ctx)?),
                    "restrictByRole" => Some(role_allows(&e, ctx.roles)?),
                    "ifMode" => Some(mode_matches(&e, ctx.mode)?),
                    _ => None,
                };
                match keep {
                    Some(true) => {
                        apply_conditionals(&mut e, ctx)?;
                        out.extend(e.children);
                    }
                    Some(false) => {}
                    None => {
                        apply_conditionals(&mut e, ctx)?;
                        out.push(Node::Element(e));
                    }
                }
            }
            text => out.push(text),
        }
    }
    element.children = out;
    Ok(())
}

fn evaluate_test(element: &Element, ctx: &ConditionContext<'_>) -> Result<bool> {
    let test = TEST_ATTRIBUTES
        .iter()
        .find_map(|name| element.non_blank_attr(name))
        .ok_or_else(|| FormDesignError::MissingAttribute {
            tag: element.name.clone(),
            attribute: "logicTest".to_string(),
        })?;
    let value = ctx
        .evaluator
        .evaluate(test, ctx.scope)
        .map_err(|reason| FormDesignError::InvalidTest(format!("'{test}': {reason}")))?;
    Ok(value.is_truthy())
}

fn split_roles(value: &str) -> Vec<&str> {
    value
        .split(',')
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .collect()
}

fn role_allows(element: &Element, roles: &BTreeSet<String>) -> Result<bool> {
    let any_held = |list: &str| split_roles(list).iter().any(|r| roles.contains(*r));
    match (element.non_blank_attr("include"), element.non_blank_attr("exclude")) {
        (Some(include), None) => Ok(any_held(include)),
        (None, Some(exclude)) => Ok(!any_held(exclude)),
        (Some(_), Some(_)) => Err(FormDesignError::ConflictingAttributes {
            tag: "restrictByRole".to_string(),
            first: "include".to_string(),
            second: "exclude".to_string(),
        }
        .into()),
        (None, None) => Err(FormDesignError::MissingAttribute {
            tag: "restrictByRole".to_string(),
            attribute: "include".to_string(),
        }
        .into()),
    }
}

fn mode_matches(element: &Element, current: FormMode) -> Result<bool> {
    let raw = element
        .non_blank_attr("mode")
        .ok_or_else(|| FormDesignError::MissingAttribute {
            tag: "ifMode".to_string(),
            attribute: "mode".to_string(),
        })?;
    let mode: FormMode = raw.parse().map_err(|reason| FormDesignError::InvalidAttribute {
        tag: "ifMode".to_string(),
        attribute: "mode".to_string(),
        value: raw.to_string(),
        reason,
    })?;
    let include = match element.non_blank_attr("include") {
        None => true,
        Some(flag) if flag.eq_ignore_ascii_case("true") => true,
        Some(flag) if flag.eq_ignore_ascii_case("false") => false,
        Some(flag) => {
            return Err(FormDesignError::InvalidAttribute {
                tag: "ifMode".to_string(),
                attribute: "include".to_string(),
                value: flag.to_string(),
                reason: "must be true or false".to_string(),
            }
            .into())
        }
    };
    Ok((mode == current) == include)
}
