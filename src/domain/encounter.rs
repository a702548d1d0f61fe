// Formentry - Clinical Form Compiler and Submission Engine
// Copyright (c) 2025 Formentry Contributors
// Licensed under the MIT License

//! Patients, encounters and the metadata they reference

use crate::domain::ids::{EncounterId, EncounterTypeId, LocationId, PatientId, ProviderId};
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The patient a form is rendered for
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Patient {
    pub id: PatientId,

    /// `M`, `F` or other administrative gender code
    #[serde(default)]
    pub gender: Option<String>,

    #[serde(default)]
    pub birthdate: Option<NaiveDate>,

    #[serde(default)]
    pub dead: bool,

    /// Free-form attributes visible to conditional expressions
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

impl Patient {
    pub fn new(id: PatientId) -> Self {
        Self {
            id,
            gender: None,
            birthdate: None,
            dead: false,
            attributes: BTreeMap::new(),
        }
    }

    /// Age in whole years on the given date
    pub fn age_on(&self, date: NaiveDate) -> Option<u32> {
        let birth = self.birthdate?;
        date.years_since(birth)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub id: LocationId,
    pub name: String,
    #[serde(default)]
    pub uuid: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provider {
    pub id: ProviderId,
    pub name: String,
    #[serde(default)]
    pub uuid: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncounterType {
    pub id: EncounterTypeId,
    pub name: String,
    #[serde(default)]
    pub uuid: Option<String>,
    #[serde(default)]
    pub retired: bool,
}

/// A clinical encounter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Encounter {
    /// `None` until persisted
    #[serde(default)]
    pub id: Option<EncounterId>,

    pub patient: PatientId,

    #[serde(default)]
    pub encounter_datetime: Option<NaiveDateTime>,

    #[serde(default)]
    pub location: Option<LocationId>,

    #[serde(default)]
    pub provider: Option<ProviderId>,

    #[serde(default)]
    pub encounter_type: Option<EncounterTypeId>,

    #[serde(default)]
    pub voided: bool,

    #[serde(default)]
    pub void_reason: Option<String>,
}

impl Encounter {
    /// Creates an unsaved encounter for a patient
    pub fn new(patient: PatientId) -> Self {
        Self {
            id: None,
            patient,
            encounter_datetime: None,
            location: None,
            provider: None,
            encounter_type: None,
            voided: false,
            void_reason: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_age_on() {
        let mut patient = Patient::new(PatientId::new(2).unwrap());
        assert_eq!(patient.age_on(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()), None);
        patient.birthdate = NaiveDate::from_ymd_opt(2020, 6, 15);
        assert_eq!(
            patient.age_on(NaiveDate::from_ymd_opt(2024, 6, 14).unwrap()),
            Some(3)
        );
        assert_eq!(
            patient.age_on(NaiveDate::from_ymd_opt(2024, 6, 15).unwrap()),
            Some(4)
        );
    }
}
