// Formentry - Clinical Form Compiler and Submission Engine
// Copyright (c) 2025 Formentry Contributors
// Licensed under the MIT License

//! `<macros>` expansion
//!
//! A macros block defines `key=value` pairs, either as text lines or as child
//! `<macro>` elements. Child macros may carry an `expression` evaluated once
//! at compile time. Every `$key` token elsewhere in the template is then
//! replaced by its value in a single pass, longest key first so `$colorName`
//! is not eaten by a shorter `$color`. Substituted values are never expanded
//! again.

use super::markup::{Element, Node};
use crate::core::expression::{EvaluationScope, ExpressionEvaluator};
use crate::domain::errors::{FormDesignError, FormEntryError};
use crate::domain::result::Result;
use regex::{Captures, Regex};
use std::collections::BTreeMap;
use tracing::debug;

/// Removes every `<macros>` block and substitutes its definitions
pub fn expand_macros(
    root: &mut Element,
    evaluator: &dyn ExpressionEvaluator,
    scope: &EvaluationScope,
) -> Result<usize> {
    let mut definitions = BTreeMap::new();
    collect_definitions(root, evaluator, scope, &mut definitions)?;
    if definitions.is_empty() {
        return Ok(0);
    }

    let mut keys: Vec<&String> = definitions.keys().collect();
    keys.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
    // alternation is leftmost-first, so the longest key is tried first
    let alternation: Vec<String> = keys.iter().map(|k| regex::escape(k)).collect();
    let pattern = format!(r"\$({})", alternation.join("|"));
    let tokens = Regex::new(&pattern)
        .map_err(|e| FormEntryError::Other(format!("Invalid macro pattern {pattern}: {e}")))?;

    substitute(root, &Macros { tokens, definitions: &definitions });
    debug!(count = definitions.len(), "Expanded macros");
    Ok(definitions.len())
}

struct Macros<'a> {
    tokens: Regex,
    definitions: &'a BTreeMap<String, String>,
}

fn collect_definitions(
    element: &mut Element,
    evaluator: &dyn ExpressionEvaluator,
    scope: &EvaluationScope,
    out: &mut BTreeMap<String, String>,
) -> Result<()> {
    let mut kept = Vec::with_capacity(element.children.len());
    for child in std::mem::take(&mut element.children) {
        match child {
            Node::Element(e) if e.name == "macros" => parse_block(&e, evaluator, scope, out)?,
            Node::Element(mut e) => {
                collect_definitions(&mut e, evaluator, scope, out)?;
                kept.push(Node::Element(e));
            }
            text => kept.push(text),
        }
    }
    element.children = kept;
    Ok(())
}

fn parse_block(
    block: &Element,
    evaluator: &dyn ExpressionEvaluator,
    scope: &EvaluationScope,
    out: &mut BTreeMap<String, String>,
) -> Result<()> {
    for node in &block.children {
        match node {
            Node::Text(text) => {
                for line in text.lines() {
                    let line = line.trim();
                    if line.is_empty() || line.starts_with('#') {
                        continue;
                    }
                    let (key, value) = line.split_once('=').ok_or_else(|| {
                        FormDesignError::InvalidMacro(format!("expected key=value, found '{line}'"))
                    })?;
                    let key = key.trim();
                    if key.is_empty() {
                        return Err(FormDesignError::InvalidMacro(format!(
                            "missing key in '{line}'"
                        ))
                        .into());
                    }
                    out.insert(key.to_string(), value.trim().to_string());
                }
            }
            Node::Element(e) if e.name == "macro" => {
                let key = e.non_blank_attr("key").ok_or_else(|| {
                    FormDesignError::InvalidMacro("<macro> requires a key".to_string())
                })?;
                let value = match (e.attr("value"), e.non_blank_attr("expression")) {
                    (Some(value), None) => value.to_string(),
                    (None, Some(expression)) => evaluator
                        .evaluate(expression, scope)
                        .map_err(|reason| {
                            FormDesignError::InvalidMacro(format!(
                                "cannot evaluate '{expression}' for {key}: {reason}"
                            ))
                        })?
                        .to_string(),
                    _ => {
                        return Err(FormDesignError::InvalidMacro(format!(
                            "macro {key} needs exactly one of value or expression"
                        ))
                        .into())
                    }
                };
                out.insert(key.to_string(), value);
            }
            Node::Element(e) => {
                return Err(FormDesignError::InvalidMacro(format!(
                    "unexpected <{}> inside <macros>",
                    e.name
                ))
                .into())
            }
        }
    }
    Ok(())
}

fn replace_tokens(text: &str, macros: &Macros<'_>) -> String {
    if !text.contains('$') {
        return text.to_string();
    }
    macros
        .tokens
        .replace_all(text, |caps: &Captures<'_>| {
            macros.definitions.get(&caps[1]).cloned().unwrap_or_default()
        })
        .into_owned()
}

fn substitute(element: &mut Element, macros: &Macros<'_>) {
    for (_, value) in element.attributes.iter_mut() {
        *value = replace_tokens(value, macros);
    }
    for child in element.children.iter_mut() {
        match child {
            Node::Text(text) => *text = replace_tokens(text, macros),
            Node::Element(e) => substitute(e, macros),
        }
    }
}
