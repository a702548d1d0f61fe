// Formentry - Clinical Form Compiler and Submission Engine
// Copyright (c) 2025 Formentry Contributors
// Licensed under the MIT License

//! `<repeat>` expansion
//!
//! Two forms are accepted:
//!
//! ```text
//! <repeat>
//!     <template><obs conceptId="{concept}" labelText="{label}"/></template>
//!     <render concept="5089" label="Weight"/>
//!     <render concept="5090" label="Height"/>
//! </repeat>
//!
//! <repeat with="['4301','STROKE'], ['4302','OTHER NON-CODED']">
//!     <obs conceptId="1000" answerConceptId="{0}" answerLabel="{1}"/>
//! </repeat>
//! ```
//!
//! Nested repeats are expanded innermost first. Expansion only copies markup;
//! widget ids are allocated later, so copies never share ids.

use super::markup::{Element, Node};
use crate::domain::errors::FormDesignError;
use crate::domain::result::Result;

/// Expands every repeat block in place and returns how many were expanded
pub fn expand_repeats(element: &mut Element) -> Result<usize> {
    let mut expanded = 0;
    let mut out = Vec::with_capacity(element.children.len());
    for child in std::mem::take(&mut element.children) {
        match child {
            Node::Element(mut e) => {
                expanded += expand_repeats(&mut e)?;
                if e.name == "repeat" {
                    out.extend(expand_one(&e)?);
                    expanded += 1;
                } else {
                    out.push(Node::Element(e));
                }
            }
            text => out.push(text),
        }
    }
    element.children = out;
    Ok(expanded)
}

fn expand_one(repeat: &Element) -> Result<Vec<Node>> {
    if let Some(with) = repeat.attr("with") {
        let tuples = parse_tuples(with)?;
        let mut out = Vec::new();
        for tuple in &tuples {
            let replacements: Vec<(String, String)> = tuple
                .iter()
                .enumerate()
                .map(|(i, v)| (format!("{{{i}}}"), v.clone()))
                .collect();
            out.extend(
                repeat
                    .children
                    .iter()
                    .map(|n| substitute_node(n, &replacements)),
            );
        }
        return Ok(out);
    }

    let template = repeat
        .child_elements()
        .find(|e| e.name == "template")
        .ok_or_else(|| {
            FormDesignError::InvalidRepeat("<repeat> requires a <template> or a 'with' attribute".to_string())
        })?;

    let mut out = Vec::new();
    for render in repeat.child_elements().filter(|e| e.name == "render") {
        let replacements: Vec<(String, String)> = render
            .attributes
            .iter()
            .map(|(k, v)| (format!("{{{k}}}"), v.clone()))
            .collect();
        out.extend(
            template
                .children
                .iter()
                .map(|n| substitute_node(n, &replacements)),
        );
    }
    Ok(out)
}

fn substitute_text(text: &str, replacements: &[(String, String)]) -> String {
    let mut out = text.to_string();
    for (placeholder, value) in replacements {
        out = out.replace(placeholder, value);
    }
    out
}

fn substitute_node(node: &Node, replacements: &[(String, String)]) -> Node {
    match node {
        Node::Text(t) => Node::Text(substitute_text(t, replacements)),
        Node::Element(e) => Node::Element(Element {
            name: e.name.clone(),
            attributes: e
                .attributes
                .iter()
                .map(|(k, v)| (k.clone(), substitute_text(v, replacements)))
                .collect(),
            children: e
                .children
                .iter()
                .map(|c| substitute_node(c, replacements))
                .collect(),
        }),
    }
}

/// Parses `['a','b'], ["c", "d"]` into tuples of strings
pub fn parse_tuples(input: &str) -> Result<Vec<Vec<String>>> {
    let malformed = |reason: &str| -> FormDesignError {
        FormDesignError::InvalidRepeat(format!("malformed with=\"{input}\": {reason}"))
    };

    let chars: Vec<char> = input.chars().collect();
    let mut tuples = Vec::new();
    let mut i = 0;

    loop {
        while i < chars.len() && (chars[i].is_whitespace() || chars[i] == ',') {
            i += 1;
        }
        if i >= chars.len() {
            break;
        }
        if chars[i] != '[' {
            return Err(malformed(&format!("expected '[' at position {i}")).into());
        }
        i += 1;

        let mut tuple = Vec::new();
        loop {
            while i < chars.len() && (chars[i].is_whitespace() || chars[i] == ',') {
                i += 1;
            }
            match chars.get(i) {
                None => return Err(malformed("unbalanced '['").into()),
                Some(']') => {
                    i += 1;
                    break;
                }
                Some(&quote) if quote == '\'' || quote == '"' => {
                    let start = i + 1;
                    let end = chars[start..]
                        .iter()
                        .position(|&c| c == quote)
                        .map(|p| start + p)
                        .ok_or_else(|| malformed("unterminated quote"))?;
                    tuple.push(chars[start..end].iter().collect());
                    i = end + 1;
                }
                Some(c) => {
                    return Err(malformed(&format!("unexpected '{c}' at position {i}")).into())
                }
            }
        }
        tuples.push(tuple);
    }

    if tuples.is_empty() {
        return Err(malformed("no tuples").into());
    }
    Ok(tuples)
}

#[cfg(test)]
mod tests {
    use super::super::markup::{parse, serialize};
    use super::*;
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    #[test_case("['4301','STROKE'],['4302','OTHER NON-CODED']" ; "compact")]
    #[test_case("  [ '4301' , 'STROKE' ]\n\t,\n [\"4302\",\t\"OTHER NON-CODED\"] " ; "whitespace and mixed quotes")]
    fn test_parse_tuples(input: &str) {
        assert_eq!(
            parse_tuples(input).unwrap(),
            vec![
                vec!["4301".to_string(), "STROKE".to_string()],
                vec!["4302".to_string(), "OTHER NON-CODED".to_string()],
            ]
        );
    }

    #[test_case("['a','b'" ; "unbalanced bracket")]
    #[test_case("['a,'b']" ; "unterminated quote")]
    #[test_case("'a','b'" ; "missing bracket")]
    #[test_case("" ; "empty")]
    fn test_malformed_tuples(input: &str) {
        assert!(parse_tuples(input).unwrap_err().is_design_error());
    }

    #[test]
    fn test_template_and_render() {
        let mut root = parse(
            r#"<htmlform><repeat><template><obs conceptId="{c}" labelText="{l}"/></template><render c="1" l="One"/><render c="2" l="Two"/></repeat></htmlform>"#,
        )
        .unwrap();
        assert_eq!(expand_repeats(&mut root).unwrap(), 1);
        assert_eq!(
            serialize(&root),
            r#"<htmlform><obs conceptId="1" labelText="One"/><obs conceptId="2" labelText="Two"/></htmlform>"#
        );
    }

    #[test]
    fn test_missing_template() {
        let mut root = parse(r#"<htmlform><repeat><render c="1"/></repeat></htmlform>"#).unwrap();
        assert!(expand_repeats(&mut root).unwrap_err().is_design_error());
    }

    #[test]
    fn test_nested_inner_first() {
        let mut root = parse(
            r#"<htmlform><repeat with="['x'],['y']"><repeat with="['1'],['2']"><b>{0}</b></repeat></repeat></htmlform>"#,
        )
        .unwrap();
        expand_repeats(&mut root).unwrap();
        assert_eq!(root.text_content(), "1212");
    }
}
