// Formentry - Clinical Form Compiler and Submission Engine
// Copyright (c) 2025 Formentry Contributors
// Licensed under the MIT License

//! Change sets produced by reconciliation
//!
//! A [`ChangeSet`] is a plain description of every write a submission needs.
//! It is computed without touching the store and handed to a
//! `ClinicalWriter`, which applies it atomically. New observations reference
//! their parent either by persisted id or by their position in
//! [`ChangeSet::obs_to_create`], so a whole new group tree can be described
//! before anything has an id.

use crate::domain::encounter::Encounter;
use crate::domain::ids::{ConceptId, EncounterId, ObsId, OrderId, PatientProgramId};
use crate::domain::obs::ObsValue;
use crate::domain::order::DrugOrder;
use crate::domain::program::PatientProgram;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Reference to a parent observation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObsRef {
    /// A persisted obs
    Existing(ObsId),
    /// Index into `obs_to_create`; must point at an earlier entry
    New(usize),
}

/// An observation to create
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewObs {
    pub concept: ConceptId,

    /// `None` for a group
    #[serde(default)]
    pub value: Option<ObsValue>,

    #[serde(default)]
    pub group: Option<ObsRef>,

    #[serde(default)]
    pub comment: Option<String>,

    #[serde(default)]
    pub accession_number: Option<String>,

    /// Explicit obs datetime; the encounter datetime otherwise
    #[serde(default)]
    pub obs_datetime: Option<NaiveDateTime>,

    /// The voided obs this one replaces
    #[serde(default)]
    pub previous_version: Option<ObsId>,
}

impl NewObs {
    pub fn new(concept: ConceptId, value: Option<ObsValue>) -> Self {
        Self {
            concept,
            value,
            group: None,
            comment: None,
            accession_number: None,
            obs_datetime: None,
            previous_version: None,
        }
    }

    pub fn in_group(mut self, group: ObsRef) -> Self {
        self.group = Some(group);
        self
    }
}

/// What happens to the encounter itself
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EncounterChange {
    Create(Encounter),
    Update(Encounter),
}

/// Every write a submission requires
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChangeSet {
    /// The persisted encounter this plan was computed against
    #[serde(default)]
    pub target_encounter: Option<EncounterId>,

    #[serde(default)]
    pub encounter: Option<EncounterChange>,

    #[serde(default)]
    pub obs_to_create: Vec<NewObs>,

    #[serde(default)]
    pub obs_to_void: Vec<ObsId>,

    /// Comment-only edits applied in place
    #[serde(default)]
    pub obs_comment_updates: Vec<(ObsId, Option<String>)>,

    #[serde(default)]
    pub orders_to_create: Vec<DrugOrder>,

    #[serde(default)]
    pub orders_to_void: Vec<OrderId>,

    #[serde(default)]
    pub orders_to_stop: Vec<(OrderId, NaiveDateTime)>,

    /// Whole enrollment aggregates to insert or replace
    #[serde(default)]
    pub programs_to_save: Vec<PatientProgram>,

    #[serde(default)]
    pub void_encounter: bool,

    #[serde(default)]
    pub void_reason: Option<String>,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// True when applying the set would change nothing
    pub fn is_empty(&self) -> bool {
        self.encounter.is_none()
            && self.obs_to_create.is_empty()
            && self.obs_to_void.is_empty()
            && self.obs_comment_updates.is_empty()
            && self.orders_to_create.is_empty()
            && self.orders_to_void.is_empty()
            && self.orders_to_stop.is_empty()
            && self.programs_to_save.is_empty()
            && !self.void_encounter
    }

    /// Queues an obs and returns a reference usable as a parent
    pub fn create_obs(&mut self, obs: NewObs) -> ObsRef {
        self.obs_to_create.push(obs);
        ObsRef::New(self.obs_to_create.len() - 1)
    }

    /// Queues a void once
    pub fn void_obs(&mut self, id: ObsId) {
        if !self.obs_to_void.contains(&id) {
            self.obs_to_void.push(id);
        }
    }

    pub fn void_order(&mut self, id: OrderId) {
        if !self.orders_to_void.contains(&id) {
            self.orders_to_void.push(id);
        }
    }

    /// One-line summary used in logs and CLI output
    pub fn summary(&self) -> String {
        format!(
            "encounter={} obs(+{} -{} ~{}) orders(+{} -{} stop {}) programs={}",
            match &self.encounter {
                Some(EncounterChange::Create(_)) => "create",
                Some(EncounterChange::Update(_)) => "update",
                None if self.void_encounter => "void",
                None => "unchanged",
            },
            self.obs_to_create.len(),
            self.obs_to_void.len(),
            self.obs_comment_updates.len(),
            self.orders_to_create.len(),
            self.orders_to_void.len(),
            self.orders_to_stop.len(),
            self.programs_to_save.len()
        )
    }
}

/// Identifiers assigned while applying a change set
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppliedChanges {
    pub encounter: Option<EncounterId>,
    pub created_obs: Vec<ObsId>,
    pub voided_obs: Vec<ObsId>,
    pub created_orders: Vec<OrderId>,
    pub voided_orders: Vec<OrderId>,
    pub saved_programs: Vec<PatientProgramId>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_obs_returns_position() {
        let mut changes = ChangeSet::new();
        assert!(changes.is_empty());
        let group = changes.create_obs(NewObs::new(ConceptId::new(7).unwrap(), None));
        let member = changes.create_obs(
            NewObs::new(ConceptId::new(1000).unwrap(), Some(ObsValue::Numeric(3.0))).in_group(group),
        );
        assert_eq!(group, ObsRef::New(0));
        assert_eq!(member, ObsRef::New(1));
        assert_eq!(changes.obs_to_create[1].group, Some(ObsRef::New(0)));
        assert!(!changes.is_empty());
    }

    #[test]
    fn test_void_is_deduplicated() {
        let mut changes = ChangeSet::new();
        let id = ObsId::new(4).unwrap();
        changes.void_obs(id);
        changes.void_obs(id);
        assert_eq!(changes.obs_to_void, vec![id]);
        assert!(changes.summary().contains("obs(+0 -1 ~0)"));
    }
}
