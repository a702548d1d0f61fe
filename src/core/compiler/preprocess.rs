// Formentry - Clinical Form Compiler and Submission Engine
// Copyright (c) 2025 Formentry Contributors
// Licensed under the MIT License

//! Text-level passes that run before the markup is parsed
//!
//! Form authors write HTML-flavoured markup: named entities such as `&nbsp;`,
//! unclosed `<br>` tags and raw comparison operators inside test attributes.
//! These passes turn that into well-formed XML without touching anything the
//! parser would accept anyway.

use crate::domain::errors::{FormDesignError, FormEntryError};
use crate::domain::result::Result;
use regex::{Captures, Regex};

/// Named character references rewritten to numeric references
const CHARACTER_CODES: &[(&str, u32)] = &[
    ("nbsp", 160),
    ("copy", 169),
    ("reg", 174),
    ("deg", 176),
    ("plusmn", 177),
    ("micro", 181),
    ("middot", 183),
    ("times", 215),
    ("ndash", 8211),
    ("mdash", 8212),
    ("lsquo", 8216),
    ("rsquo", 8217),
    ("ldquo", 8220),
    ("rdquo", 8221),
    ("hellip", 8230),
];

/// Attributes whose values hold expressions
const TEST_ATTRIBUTES: &[&str] = &["logicTest", "velocityTest", "test"];

fn regex(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| FormEntryError::Other(format!("Invalid pattern {pattern}: {e}")))
}

/// Runs every text pass in order
pub fn preprocess(markup: &str) -> Result<String> {
    reject_doctype(markup)?;
    let text = substitute_character_codes(markup);
    let text = strip_comments(&text)?;
    let text = escape_test_attributes(&text)?;
    normalize_void_elements(&text)
}

/// DOCTYPE and entity declarations are never accepted
pub fn reject_doctype(markup: &str) -> Result<()> {
    let upper = markup.to_ascii_uppercase();
    if upper.contains("<!DOCTYPE") || upper.contains("<!ENTITY") {
        return Err(FormDesignError::EntityDeclaration.into());
    }
    Ok(())
}

/// Replaces named character references such as `&nbsp;` with numeric ones
pub fn substitute_character_codes(markup: &str) -> String {
    let mut out = markup.to_string();
    for (name, code) in CHARACTER_CODES {
        out = out.replace(&format!("&{name};"), &format!("&#{code};"));
    }
    out
}

/// Removes `<!-- ... -->` comments, including multi-line ones
pub fn strip_comments(markup: &str) -> Result<String> {
    let re = regex(r"(?is)<!\s*--.*?--\s*>")?;
    Ok(re.replace_all(markup, "").into_owned())
}

/// Escapes `<`, `>` and bare `&` inside test attribute values
pub fn escape_test_attributes(markup: &str) -> Result<String> {
    let names = TEST_ATTRIBUTES.join("|");
    let re = regex(&format!(r#"\b({names})\s*=\s*("[^"]*"|'[^']*')"#))?;
    let amp = regex(r"&(?:(?:[A-Za-z]+|#[0-9]+|#x[0-9A-Fa-f]+);)?")?;

    Ok(re
        .replace_all(markup, |caps: &Captures| {
            let quoted = &caps[2];
            let quote = &quoted[..1];
            let inner = &quoted[1..quoted.len() - 1];
            let inner = amp.replace_all(inner, |m: &Captures| {
                let whole = &m[0];
                if whole.len() > 1 {
                    whole.to_string()
                } else {
                    "&amp;".to_string()
                }
            });
            let inner = inner.replace('<', "&lt;").replace('>', "&gt;");
            format!("{}={quote}{inner}{quote}", &caps[1])
        })
        .into_owned())
}

/// Rewrites `<br>`, `<BR>`, `</br>` and `<hr>` variants as self-closing tags
pub fn normalize_void_elements(markup: &str) -> Result<String> {
    let closing = regex(r"(?i)</\s*(br|hr)\s*>")?;
    let opening = regex(r"(?i)<\s*(br|hr)((?:\s+[^<>]*?)?)\s*/?\s*>")?;
    let text = closing.replace_all(markup, "");
    Ok(opening
        .replace_all(&text, |caps: &Captures| {
            let name = caps[1].to_ascii_lowercase();
            let attrs = caps.get(2).map_or("", |m| m.as_str()).trim_end();
            format!("<{name}{attrs}/>")
        })
        .into_owned())
}
