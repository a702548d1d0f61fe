// Formentry - Clinical Form Compiler and Submission Engine
// Copyright (c) 2025 Formentry Contributors
// Licensed under the MIT License

//! Submitted values and obs value conversion
//!
//! A submission is an opaque map from key to one or more raw strings. Keys
//! are widget ids, optionally with a suffix:
//!
//! | Key | Meaning |
//! |---|---|
//! | `w3` | the value of widget 3 |
//! | `w3_hours`, `w3_minutes`, `w3_seconds`, `w3_timezone` | time parts of a split date widget |
//! | `w3_hid` | entry count of a dynamic multi-valued widget |
//! | `w3span_0_hid`, `w3span_1_hid`, ... | the entries themselves |
//! | `w3_dose`, `w3_action`, ... | properties of a drug order line |

use crate::adapters::repository::ClinicalRepository;
use crate::config::FormatsConfig;
use crate::core::compiler::schema::ObsField;
use crate::domain::concept::ConceptDatatype;
use crate::domain::ids::{ConceptId, WidgetId};
use crate::domain::obs::{format_number, ObsValue};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

fn one_or_many<'de, D>(deserializer: D) -> Result<BTreeMap<String, Vec<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: BTreeMap<String, OneOrMany> = BTreeMap::deserialize(deserializer)?;
    Ok(raw
        .into_iter()
        .map(|(k, v)| match v {
            OneOrMany::One(s) => (k, vec![s]),
            OneOrMany::Many(list) => (k, list),
        })
        .collect())
}

/// Raw values of one submission
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubmittedValues {
    #[serde(deserialize_with = "one_or_many")]
    values: BTreeMap<String, Vec<String>>,
}

impl SubmittedValues {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a value under a key
    pub fn add(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.entry(key.into()).or_default().push(value.into());
    }

    /// Replaces every value under a key
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), vec![value.into()]);
    }

    pub fn remove(&mut self, key: &str) {
        self.values.remove(key);
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    /// First non-blank value under a key, trimmed
    pub fn value(&self, key: &str) -> Option<&str> {
        self.values
            .get(key)?
            .iter()
            .map(|v| v.trim())
            .find(|v| !v.is_empty())
    }

    /// Every non-blank value under a key, trimmed
    pub fn all(&self, key: &str) -> Vec<&str> {
        self.values
            .get(key)
            .map(|vs| vs.iter().map(|v| v.trim()).filter(|v| !v.is_empty()).collect())
            .unwrap_or_default()
    }

    pub fn widget(&self, widget: WidgetId) -> Option<&str> {
        self.value(&widget.to_string())
    }

    pub fn part(&self, widget: WidgetId, suffix: &str) -> Option<&str> {
        self.value(&widget.suffixed(suffix))
    }

    /// Values of a dynamic multi-valued widget
    ///
    /// Reads the `_hid` count and its indexed entries when present, otherwise
    /// every value submitted under the widget id itself.
    pub fn dynamic(&self, widget: WidgetId) -> Vec<String> {
        match self
            .part(widget, "_hid")
            .and_then(|count| count.parse::<usize>().ok())
        {
            Some(count) => (0..count)
                .filter_map(|i| self.value(&format!("{widget}span_{i}_hid")))
                .map(str::to_string)
                .collect(),
            None => self
                .all(&widget.to_string())
                .into_iter()
                .map(str::to_string)
                .collect(),
        }
    }

    /// Writes values of a dynamic multi-valued widget using the `_hid` convention
    pub fn set_dynamic(&mut self, widget: WidgetId, entries: &[String]) {
        self.set(widget.suffixed("_hid"), entries.len().to_string());
        for (i, entry) in entries.iter().enumerate() {
            self.set(format!("{widget}span_{i}_hid"), entry.clone());
        }
    }

    /// A date widget with optional split time parts
    ///
    /// The widget value may itself be a full datetime. `Ok(None)` when the
    /// widget is blank.
    pub fn datetime(&self, widget: WidgetId, formats: &FormatsConfig) -> Result<Option<NaiveDateTime>, String> {
        let Some(raw) = self.widget(widget) else {
            return Ok(None);
        };
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, &formats.datetime_format) {
            return Ok(Some(dt));
        }
        let date = parse_date(raw, formats)?;
        let part = |suffix: &str, max: u32| -> Result<u32, String> {
            match self.part(widget, suffix) {
                None => Ok(0),
                Some(v) => v
                    .parse::<u32>()
                    .ok()
                    .filter(|n| *n <= max)
                    .ok_or_else(|| format!("Invalid {} '{v}'", suffix.trim_start_matches('_'))),
            }
        };
        let (h, m, s) = (part("_hours", 23)?, part("_minutes", 59)?, part("_seconds", 59)?);
        date.and_hms_opt(h, m, s)
            .map(Some)
            .ok_or_else(|| format!("Invalid time {h}:{m}:{s}"))
    }
}

pub fn parse_date(raw: &str, formats: &FormatsConfig) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(raw.trim(), &formats.date_format)
        .map_err(|_| format!("Invalid date '{raw}', expected format {}", formats.date_format))
}

/// Parses a raw string into a value for an obs field
///
/// Coded values may be written as an id or any reference the repository
/// resolves (uuid, `SOURCE:code`).
pub fn parse_obs_value(
    field: &ObsField,
    raw: &str,
    formats: &FormatsConfig,
    repository: &dyn ClinicalRepository,
) -> Result<ObsValue, String> {
    let raw = raw.trim();
    match field.datatype {
        ConceptDatatype::Coded => {
            let concept = match raw.parse::<ConceptId>() {
                Ok(id) => id,
                Err(_) => repository
                    .find_concept(raw)
                    .ok()
                    .flatten()
                    .map(|c| c.id)
                    .ok_or_else(|| format!("Unknown answer '{raw}'"))?,
            };
            let allowed = field.checkbox_answer.map(|a| vec![a]).unwrap_or_else(|| {
                field.answers.iter().map(|a| a.concept).collect()
            });
            if !allowed.is_empty() && !allowed.contains(&concept) {
                return Err(format!("Answer {concept} is not one of the allowed answers"));
            }
            Ok(ObsValue::Coded(concept))
        }
        ConceptDatatype::Numeric => {
            let n: f64 = raw
                .parse()
                .map_err(|_| format!("'{raw}' is not a number"))?;
            if !n.is_finite() {
                return Err(format!("'{raw}' is not a number"));
            }
            if !field.allow_decimal && n.fract() != 0.0 {
                return Err(format!("'{raw}' must be a whole number"));
            }
            Ok(ObsValue::Numeric(n))
        }
        ConceptDatatype::Boolean => match raw.to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Ok(ObsValue::Boolean(true)),
            "false" | "0" | "no" => Ok(ObsValue::Boolean(false)),
            _ => Err(format!("'{raw}' is not true or false")),
        },
        ConceptDatatype::Date => parse_date(raw, formats).map(ObsValue::Date),
        ConceptDatatype::Datetime => NaiveDateTime::parse_from_str(raw, &formats.datetime_format)
            .or_else(|_| {
                parse_date(raw, formats)
                    .map(|d| d.and_time(NaiveTime::MIN))
            })
            .map(ObsValue::Datetime)
            .map_err(|_| format!("Invalid datetime '{raw}', expected format {}", formats.datetime_format)),
        ConceptDatatype::Time => NaiveTime::parse_from_str(raw, &formats.time_format)
            .map(ObsValue::Time)
            .map_err(|_| format!("Invalid time '{raw}', expected format {}", formats.time_format)),
        ConceptDatatype::Text | ConceptDatatype::NotApplicable => Ok(ObsValue::Text(raw.to_string())),
    }
}

/// Formats a value the way it is submitted
pub fn format_obs_value(value: &ObsValue, formats: &FormatsConfig) -> String {
    match value {
        ObsValue::Coded(c) => c.to_string(),
        ObsValue::Numeric(n) => format_number(*n),
        ObsValue::Text(t) => t.clone(),
        ObsValue::Date(d) => d.format(&formats.date_format).to_string(),
        ObsValue::Datetime(dt) => dt.format(&formats.datetime_format).to_string(),
        ObsValue::Time(t) => t.format(&formats.time_format).to_string(),
        ObsValue::Boolean(b) => b.to_string(),
        ObsValue::Drug(d) => d.to_string(),
    }
}

/// Formats a value for display: coded answers show their label
pub fn display_obs_value(
    field: &ObsField,
    value: &ObsValue,
    formats: &FormatsConfig,
    repository: &dyn ClinicalRepository,
) -> String {
    match value {
        ObsValue::Coded(c) => field
            .answers
            .iter()
            .find(|a| a.concept == *c)
            .map(|a| a.label.clone())
            .or_else(|| repository.concept(*c).ok().map(|c| c.name))
            .unwrap_or_else(|| c.to_string()),
        other => format_obs_value(other, formats),
    }
}

/// Submission form of a datetime for a date widget
pub fn format_datetime(value: NaiveDateTime, formats: &FormatsConfig) -> String {
    value.format(&formats.datetime_format).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::testing::{cid, compile_form, repository};
    use test_case::test_case;

    fn field(template: &str) -> ObsField {
        let repo = repository();
        let form = compile_form(&repo, template);
        form.schema.obs_fields()[0].clone()
    }

    #[test]
    fn test_json_accepts_single_and_many() {
        let values: SubmittedValues =
            serde_json::from_str(r#"{"w1": "70", "w2": ["1001", " ", "1002"]}"#).unwrap();
        assert_eq!(values.widget(WidgetId::from_sequence(1)), Some("70"));
        assert_eq!(values.all("w2"), vec!["1001", "1002"]);
    }

    #[test]
    fn test_dynamic_values_use_hid_convention() {
        let w = WidgetId::from_sequence(4);
        let mut values = SubmittedValues::new();
        values.set_dynamic(w, &["1001".to_string(), "1003".to_string()]);
        assert_eq!(values.dynamic(w), vec!["1001", "1003"]);

        let mut plain = SubmittedValues::new();
        plain.add("w4", "1002");
        assert_eq!(plain.dynamic(w), vec!["1002"]);
    }

    #[test]
    fn test_split_datetime() {
        let formats = FormatsConfig::default();
        let w = WidgetId::from_sequence(1);
        let mut values = SubmittedValues::new();
        values.set("w1", "2024-03-01");
        values.set("w1_hours", "14");
        values.set("w1_minutes", "30");
        let dt = values.datetime(w, &formats).unwrap().unwrap();
        assert_eq!(dt.format("%H:%M").to_string(), "14:30");

        values.set("w1_hours", "25");
        assert!(values.datetime(w, &formats).is_err());
    }

    #[test_case("70", true ; "whole number")]
    #[test_case("70.5", true ; "decimal")]
    #[test_case("seventy", false ; "not a number")]
    fn test_numeric_parse(raw: &str, ok: bool) {
        let repo = repository();
        let f = field(r#"<obs conceptId="5089"/>"#);
        assert_eq!(parse_obs_value(&f, raw, &FormatsConfig::default(), &repo).is_ok(), ok);
    }

    #[test]
    fn test_coded_answer_must_be_offered() {
        let repo = repository();
        let f = field(r#"<obs conceptId="1000" answerConceptIds="1001,1002"/>"#);
        let formats = FormatsConfig::default();
        assert_eq!(
            parse_obs_value(&f, "1002", &formats, &repo),
            Ok(ObsValue::Coded(cid(1002)))
        );
        assert!(parse_obs_value(&f, "1004", &formats, &repo).is_err());
        assert_eq!(
            display_obs_value(&f, &ObsValue::Coded(cid(1002)), &formats, &repo),
            "CATS"
        );
    }

    #[test]
    fn test_format_round_trips_dates() {
        let repo = repository();
        let formats = FormatsConfig::default();
        let f = field(r#"<obs conceptId="5096"/>"#);
        let value = parse_obs_value(&f, "2024-04-02", &formats, &repo).unwrap();
        assert_eq!(format_obs_value(&value, &formats), "2024-04-02");
        assert!(parse_obs_value(&f, "02/04/2024", &formats, &repo).is_err());
    }
}
