// Formentry - Clinical Form Compiler and Submission Engine
// Copyright (c) 2025 Formentry Contributors
// Licensed under the MIT License

//! Observations and the observation arena
//!
//! Grouped observations are not linked by object references. Every record
//! lives in an [`ObsArena`] keyed by its [`ObsId`], and the arena keeps two
//! index maps: group → members and member → group. Records only store the id
//! of their parent group, which keeps them trivially serializable and lets the
//! matching engine treat the candidate pool as plain id sets.
//!
//! The indexes are ordered maps, so iteration order depends only on the ids
//! and never on the order records were handed in.

use crate::domain::ids::{ConceptId, DrugId, EncounterId, LocationId, ObsId, PatientId};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// The value carried by an observation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ObsValue {
    Coded(ConceptId),
    Numeric(f64),
    Text(String),
    Date(NaiveDate),
    Datetime(NaiveDateTime),
    Time(NaiveTime),
    Boolean(bool),
    Drug(DrugId),
}

impl ObsValue {
    /// Returns the coded answer, if this is a coded value
    pub fn coded(&self) -> Option<ConceptId> {
        match self {
            ObsValue::Coded(c) => Some(*c),
            _ => None,
        }
    }

    /// Canonical string used to decide whether a value changed
    ///
    /// Numbers drop a trailing `.0` so `70` and `70.0` compare equal.
    pub fn canonical(&self) -> String {
        match self {
            ObsValue::Coded(c) => format!("coded:{c}"),
            ObsValue::Numeric(n) => format!("numeric:{}", format_number(*n)),
            ObsValue::Text(t) => format!("text:{t}"),
            ObsValue::Date(d) => format!("date:{}", d.format("%Y-%m-%d")),
            ObsValue::Datetime(dt) => format!("datetime:{}", dt.format("%Y-%m-%dT%H:%M:%S")),
            ObsValue::Time(t) => format!("time:{}", t.format("%H:%M:%S")),
            ObsValue::Boolean(b) => format!("boolean:{b}"),
            ObsValue::Drug(d) => format!("drug:{d}"),
        }
    }
}

/// Formats a number without a trailing `.0`
pub fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

/// A single persisted observation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Obs {
    pub id: ObsId,
    pub patient: PatientId,

    #[serde(default)]
    pub encounter: Option<EncounterId>,

    /// Question concept, or grouping concept for a group
    pub concept: ConceptId,

    /// `None` for obs groups
    #[serde(default)]
    pub value: Option<ObsValue>,

    pub obs_datetime: NaiveDateTime,

    #[serde(default)]
    pub location: Option<LocationId>,

    #[serde(default)]
    pub comment: Option<String>,

    #[serde(default)]
    pub accession_number: Option<String>,

    /// Parent group, when this obs is a group member
    #[serde(default)]
    pub group: Option<ObsId>,

    #[serde(default)]
    pub voided: bool,

    #[serde(default)]
    pub void_reason: Option<String>,

    /// The obs this one replaced on edit
    #[serde(default)]
    pub previous_version: Option<ObsId>,
}

/// Arena of observation records with group indexes
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObsArena {
    records: BTreeMap<ObsId, Obs>,
    members: BTreeMap<ObsId, BTreeSet<ObsId>>,
    group_of: BTreeMap<ObsId, ObsId>,
}

impl ObsArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds an arena from records in any order
    pub fn from_records(records: impl IntoIterator<Item = Obs>) -> Self {
        let mut arena = Self::new();
        for obs in records {
            arena.insert(obs);
        }
        arena
    }

    /// Inserts or replaces a record and updates the indexes
    pub fn insert(&mut self, obs: Obs) {
        let id = obs.id;
        if let Some(old_parent) = self.group_of.remove(&id) {
            if let Some(set) = self.members.get_mut(&old_parent) {
                set.remove(&id);
            }
        }
        if let Some(parent) = obs.group {
            self.members.entry(parent).or_default().insert(id);
            self.group_of.insert(id, parent);
        }
        self.records.insert(id, obs);
    }

    pub fn get(&self, id: ObsId) -> Option<&Obs> {
        self.records.get(&id)
    }

    pub fn get_mut(&mut self, id: ObsId) -> Option<&mut Obs> {
        self.records.get_mut(&id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// All records in id order, voided included
    pub fn iter(&self) -> impl Iterator<Item = &Obs> {
        self.records.values()
    }

    /// Non-voided records in id order
    pub fn active(&self) -> impl Iterator<Item = &Obs> {
        self.records.values().filter(|o| !o.voided)
    }

    /// Non-voided records attached directly to the encounter (no parent group)
    pub fn roots(&self) -> impl Iterator<Item = &Obs> {
        self.active().filter(|o| o.group.is_none())
    }

    /// Non-voided direct members of a group, in id order
    pub fn members(&self, group: ObsId) -> Vec<&Obs> {
        self.members
            .get(&group)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| self.records.get(id))
                    .filter(|o| !o.voided)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// All member ids of a group including voided ones
    pub fn member_ids(&self, group: ObsId) -> Vec<ObsId> {
        self.members
            .get(&group)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Parent group of a member
    pub fn group_of(&self, member: ObsId) -> Option<ObsId> {
        self.group_of.get(&member).copied()
    }

    /// True when the record has at least one non-voided member
    pub fn is_group(&self, id: ObsId) -> bool {
        !self.members(id).is_empty()
    }

    /// Every non-voided descendant of a group, depth first, in id order
    pub fn descendants(&self, group: ObsId) -> Vec<ObsId> {
        let mut out = Vec::new();
        let mut stack: Vec<ObsId> = self.members(group).iter().rev().map(|o| o.id).collect();
        while let Some(id) = stack.pop() {
            out.push(id);
            let children: Vec<ObsId> = self.members(id).iter().rev().map(|o| o.id).collect();
            stack.extend(children);
        }
        out
    }

    /// Grouping-concept path from the outermost group down to this record
    pub fn concept_path(&self, id: ObsId) -> Vec<ConceptId> {
        let mut path = Vec::new();
        let mut current = Some(id);
        while let Some(cur) = current {
            match self.records.get(&cur) {
                Some(obs) => {
                    path.push(obs.concept);
                    current = obs.group;
                }
                None => break,
            }
        }
        path.reverse();
        path
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn at(y: i32, m: u32, d: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .and_then(|date| date.and_hms_opt(0, 0, 0))
            .unwrap()
    }

    pub fn obs(id: u32, concept: u32, value: Option<ObsValue>, group: Option<u32>) -> Obs {
        Obs {
            id: ObsId::new(id).unwrap(),
            patient: PatientId::new(2).unwrap(),
            encounter: EncounterId::new(1).ok(),
            concept: ConceptId::new(concept).unwrap(),
            value,
            obs_datetime: at(2024, 3, 1),
            location: None,
            comment: None,
            accession_number: None,
            group: group.map(|g| ObsId::new(g).unwrap()),
            voided: false,
            void_reason: None,
            previous_version: None,
        }
    }

    pub fn coded(n: u32) -> Option<ObsValue> {
        Some(ObsValue::Coded(ConceptId::new(n).unwrap()))
    }

    pub fn text(s: &str) -> Option<ObsValue> {
        Some(ObsValue::Text(s.to_string()))
    }
}
