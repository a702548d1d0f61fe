// Formentry - Clinical Form Compiler and Submission Engine
// Copyright (c) 2025 Formentry Contributors
// Licensed under the MIT License

//! Expression evaluation for conditional blocks, macros and defaults
//!
//! The compiler treats the evaluator as an external collaborator behind the
//! [`ExpressionEvaluator`] trait. [`SimpleEvaluator`] is the built-in
//! implementation: a small boolean/comparison language over a flat variable
//! scope such as `patient.gender`, `patient.age` or `session.locationId`.
//!
//! ```text
//! $patient.gender == 'F' && patient.age >= 15
//! not (user.hasRole.Nurse)
//! patient.age < 5 or patient.attribute.hivStatus = 'positive'
//! ```
//!
//! A leading `$` on a variable is accepted so that velocity-style tests read
//! naturally. Unknown variables evaluate to null.

use crate::domain::encounter::Patient;
use chrono::NaiveDate;
use std::collections::BTreeMap;
use std::fmt;

/// A value produced by an expression
#[derive(Debug, Clone, PartialEq)]
pub enum ExprValue {
    Null,
    Bool(bool),
    Number(f64),
    Text(String),
}

impl ExprValue {
    /// Truthiness used by conditionals
    pub fn is_truthy(&self) -> bool {
        match self {
            ExprValue::Null => false,
            ExprValue::Bool(b) => *b,
            ExprValue::Number(n) => *n != 0.0,
            ExprValue::Text(s) => !s.is_empty() && s != "false",
        }
    }
}

impl fmt::Display for ExprValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExprValue::Null => write!(f, ""),
            ExprValue::Bool(b) => write!(f, "{b}"),
            ExprValue::Number(n) => write!(f, "{}", crate::domain::obs::format_number(*n)),
            ExprValue::Text(s) => write!(f, "{s}"),
        }
    }
}

/// Variables visible to an expression
#[derive(Debug, Clone, Default)]
pub struct EvaluationScope {
    variables: BTreeMap<String, ExprValue>,
}

impl EvaluationScope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a variable
    pub fn set(&mut self, name: impl Into<String>, value: ExprValue) {
        self.variables.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<&ExprValue> {
        self.variables.get(name)
    }

    /// Scope describing a patient, the user's roles and the session
    pub fn for_patient(
        patient: &Patient,
        today: NaiveDate,
        roles: impl IntoIterator<Item = impl AsRef<str>>,
        session: &BTreeMap<String, String>,
    ) -> Self {
        let mut scope = Self::new();
        scope.set("patient.id", ExprValue::Number(f64::from(patient.id.get())));
        scope.set(
            "patient.gender",
            patient
                .gender
                .clone()
                .map(ExprValue::Text)
                .unwrap_or(ExprValue::Null),
        );
        scope.set(
            "patient.age",
            patient
                .age_on(today)
                .map(|a| ExprValue::Number(f64::from(a)))
                .unwrap_or(ExprValue::Null),
        );
        scope.set(
            "patient.birthdate",
            patient
                .birthdate
                .map(|d| ExprValue::Text(d.format("%Y-%m-%d").to_string()))
                .unwrap_or(ExprValue::Null),
        );
        scope.set("patient.dead", ExprValue::Bool(patient.dead));
        for (key, value) in &patient.attributes {
            scope.set(format!("patient.attribute.{key}"), ExprValue::Text(value.clone()));
        }
        for role in roles {
            scope.set(format!("user.hasRole.{}", role.as_ref()), ExprValue::Bool(true));
        }
        for (key, value) in session {
            scope.set(format!("session.{key}"), ExprValue::Text(value.clone()));
        }
        scope
    }
}

/// Evaluates template expressions against a scope
pub trait ExpressionEvaluator {
    /// Evaluates `expression`; the error string describes why it failed
    fn evaluate(&self, expression: &str, scope: &EvaluationScope) -> Result<ExprValue, String>;
}

/// Built-in evaluator for the small conditional language
#[derive(Debug, Default, Clone, Copy)]
pub struct SimpleEvaluator;

impl ExpressionEvaluator for SimpleEvaluator {
    fn evaluate(&self, expression: &str, scope: &EvaluationScope) -> Result<ExprValue, String> {
        let tokens = tokenize(expression)?;
        if tokens.is_empty() {
            return Err("empty expression".to_string());
        }
        let mut parser = Parser {
            tokens,
            pos: 0,
            scope,
        };
        let value = parser.parse_or()?;
        if parser.pos != parser.tokens.len() {
            return Err(format!(
                "unexpected token {:?} in '{expression}'",
                parser.tokens[parser.pos]
            ));
        }
        Ok(value)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Text(String),
    Ident(String),
    Op(&'static str),
    LParen,
    RParen,
}

fn tokenize(input: &str) -> Result<Vec<Token>, String> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        match c {
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '\'' | '"' => {
                let quote = c;
                let start = i + 1;
                let mut end = start;
                while end < chars.len() && chars[end] != quote {
                    end += 1;
                }
                if end >= chars.len() {
                    return Err("unterminated string literal".to_string());
                }
                tokens.push(Token::Text(chars[start..end].iter().collect()));
                i = end + 1;
            }
            '0'..='9' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let n = text
                    .parse::<f64>()
                    .map_err(|_| format!("invalid number '{text}'"))?;
                tokens.push(Token::Number(n));
            }
            '=' | '!' | '<' | '>' | '&' | '|' => {
                let next = chars.get(i + 1).copied();
                let (op, width) = match (c, next) {
                    ('=', Some('=')) => ("==", 2),
                    ('=', _) => ("==", 1),
                    ('!', Some('=')) => ("!=", 2),
                    ('!', _) => ("not", 1),
                    ('<', Some('=')) => ("<=", 2),
                    ('<', Some('>')) => ("!=", 2),
                    ('<', _) => ("<", 1),
                    ('>', Some('=')) => (">=", 2),
                    ('>', _) => (">", 1),
                    ('&', Some('&')) => ("and", 2),
                    ('|', Some('|')) => ("or", 2),
                    _ => return Err(format!("unexpected character '{c}'")),
                };
                tokens.push(Token::Op(op));
                i += width;
            }
            '$' | '_' | 'a'..='z' | 'A'..='Z' => {
                let start = if c == '$' { i + 1 } else { i };
                i = start;
                while i < chars.len()
                    && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '.')
                {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                match word.to_ascii_lowercase().as_str() {
                    "and" => tokens.push(Token::Op("and")),
                    "or" => tokens.push(Token::Op("or")),
                    "not" => tokens.push(Token::Op("not")),
                    _ => tokens.push(Token::Ident(word)),
                }
            }
            _ => return Err(format!("unexpected character '{c}'")),
        }
    }
    Ok(tokens)
}

struct Parser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    scope: &'a EvaluationScope,
}

impl Parser<'_> {
    fn peek_op(&self) -> Option<&'static str> {
        match self.tokens.get(self.pos) {
            Some(Token::Op(op)) => Some(op),
            _ => None,
        }
    }

    fn parse_or(&mut self) -> Result<ExprValue, String> {
        let mut left = self.parse_and()?;
        while self.peek_op() == Some("or") {
            self.pos += 1;
            let right = self.parse_and()?;
            left = ExprValue::Bool(left.is_truthy() || right.is_truthy());
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<ExprValue, String> {
        let mut left = self.parse_not()?;
        while self.peek_op() == Some("and") {
            self.pos += 1;
            let right = self.parse_not()?;
            left = ExprValue::Bool(left.is_truthy() && right.is_truthy());
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> Result<ExprValue, String> {
        if self.peek_op() == Some("not") {
            self.pos += 1;
            let inner = self.parse_not()?;
            return Ok(ExprValue::Bool(!inner.is_truthy()));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<ExprValue, String> {
        let left = self.parse_primary()?;
        let op = match self.peek_op() {
            Some(op @ ("==" | "!=" | "<" | "<=" | ">" | ">=")) => op,
            _ => return Ok(left),
        };
        self.pos += 1;
        let right = self.parse_primary()?;
        Ok(ExprValue::Bool(compare(&left, op, &right)))
    }

    fn parse_primary(&mut self) -> Result<ExprValue, String> {
        let token = self
            .tokens
            .get(self.pos)
            .cloned()
            .ok_or_else(|| "unexpected end of expression".to_string())?;
        self.pos += 1;
        match token {
            Token::Number(n) => Ok(ExprValue::Number(n)),
            Token::Text(s) => Ok(ExprValue::Text(s)),
            Token::Ident(name) => Ok(match name.to_ascii_lowercase().as_str() {
                "true" => ExprValue::Bool(true),
                "false" => ExprValue::Bool(false),
                "null" => ExprValue::Null,
                _ => self.scope.get(&name).cloned().unwrap_or(ExprValue::Null),
            }),
            Token::LParen => {
                let value = self.parse_or()?;
                match self.tokens.get(self.pos) {
                    Some(Token::RParen) => {
                        self.pos += 1;
                        Ok(value)
                    }
                    _ => Err("missing closing parenthesis".to_string()),
                }
            }
            other => Err(format!("unexpected token {other:?}")),
        }
    }
}

fn compare(left: &ExprValue, op: &str, right: &ExprValue) -> bool {
    use std::cmp::Ordering;

    let ordering = match (left, right) {
        (ExprValue::Number(a), ExprValue::Number(b)) => a.partial_cmp(b),
        (ExprValue::Number(a), ExprValue::Text(b)) => b.parse::<f64>().ok().and_then(|b| a.partial_cmp(&b)),
        (ExprValue::Text(a), ExprValue::Number(b)) => a.parse::<f64>().ok().and_then(|a| a.partial_cmp(b)),
        (ExprValue::Text(a), ExprValue::Text(b)) => Some(a.cmp(b)),
        (ExprValue::Bool(a), ExprValue::Bool(b)) => Some(a.cmp(b)),
        (ExprValue::Bool(a), ExprValue::Text(b)) | (ExprValue::Text(b), ExprValue::Bool(a)) => {
            Some(a.to_string().as_str().cmp(b.as_str()))
        }
        (ExprValue::Null, ExprValue::Null) => Some(Ordering::Equal),
        _ => None,
    };
    match (op, ordering) {
        ("==", Some(o)) => o == Ordering::Equal,
        ("==", None) => false,
        ("!=", Some(o)) => o != Ordering::Equal,
        ("!=", None) => true,
        ("<", Some(o)) => o == Ordering::Less,
        ("<=", Some(o)) => o != Ordering::Greater,
        (">", Some(o)) => o == Ordering::Greater,
        (">=", Some(o)) => o != Ordering::Less,
        _ => false,
    }
}
