// Formentry - Clinical Form Compiler and Submission Engine
// Copyright (c) 2025 Formentry Contributors
// Licensed under the MIT License

//! Concept dictionary entries

use crate::domain::ids::ConceptId;
use serde::{Deserialize, Serialize};

/// Datatype of the value a concept records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConceptDatatype {
    Numeric,
    Coded,
    Text,
    Date,
    Datetime,
    Time,
    Boolean,
    /// Grouping concepts and concepts that hold no value
    NotApplicable,
}

impl ConceptDatatype {
    /// True for the date-like datatypes
    pub fn is_temporal(self) -> bool {
        matches!(
            self,
            ConceptDatatype::Date | ConceptDatatype::Datetime | ConceptDatatype::Time
        )
    }
}

/// A concept from the clinical dictionary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Concept {
    pub id: ConceptId,

    #[serde(default)]
    pub uuid: Option<String>,

    /// Preferred display name
    pub name: String,

    pub datatype: ConceptDatatype,

    /// Allowed answers for coded concepts
    #[serde(default)]
    pub answers: Vec<ConceptId>,

    /// Members when this concept is a set
    #[serde(default)]
    pub set_members: Vec<ConceptId>,

    /// Source mappings written as `SOURCE:code`
    #[serde(default)]
    pub mappings: Vec<String>,

    /// Numeric concepts only: whether decimals are accepted
    #[serde(default = "default_true")]
    pub allow_decimal: bool,

    #[serde(default)]
    pub retired: bool,
}

fn default_true() -> bool {
    true
}

impl Concept {
    /// Creates a concept with no answers, members or mappings
    pub fn new(id: ConceptId, name: impl Into<String>, datatype: ConceptDatatype) -> Self {
        Self {
            id,
            uuid: None,
            name: name.into(),
            datatype,
            answers: Vec::new(),
            set_members: Vec::new(),
            mappings: Vec::new(),
            allow_decimal: true,
            retired: false,
        }
    }

    /// Sets the allowed answers
    pub fn with_answers(mut self, answers: impl IntoIterator<Item = ConceptId>) -> Self {
        self.answers = answers.into_iter().collect();
        self
    }

    /// Adds a `SOURCE:code` mapping
    pub fn with_mapping(mut self, mapping: impl Into<String>) -> Self {
        self.mappings.push(mapping.into());
        self
    }

    /// Matches a reference written as id, uuid or `SOURCE:code`
    pub fn matches_reference(&self, reference: &str) -> bool {
        let reference = reference.trim();
        if reference == self.id.to_string() {
            return true;
        }
        if self.uuid.as_deref() == Some(reference) {
            return true;
        }
        self.mappings
            .iter()
            .any(|m| m.eq_ignore_ascii_case(reference))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cid(n: u32) -> ConceptId {
        ConceptId::new(n).unwrap()
    }

    #[test]
    fn test_matches_reference() {
        let concept = Concept::new(cid(5089), "WEIGHT (KG)", ConceptDatatype::Numeric)
            .with_mapping("CIEL:5089");
        assert!(concept.matches_reference("5089"));
        assert!(concept.matches_reference("ciel:5089"));
        assert!(!concept.matches_reference("5090"));
    }

    #[test]
    fn test_temporal_datatypes() {
        assert!(ConceptDatatype::Date.is_temporal());
        assert!(!ConceptDatatype::Coded.is_temporal());
    }
}
