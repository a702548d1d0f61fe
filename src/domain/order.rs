// Formentry - Clinical Form Compiler and Submission Engine
// Copyright (c) 2025 Formentry Contributors
// Licensed under the MIT License

//! Drug orders

use crate::domain::ids::{ConceptId, DrugId, EncounterId, OrderId, PatientId};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// What an order does relative to its predecessor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderAction {
    #[default]
    New,
    Revise,
    Renew,
    Discontinue,
}

impl fmt::Display for OrderAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OrderAction::New => "NEW",
            OrderAction::Revise => "REVISE",
            OrderAction::Renew => "RENEW",
            OrderAction::Discontinue => "DISCONTINUE",
        };
        write!(f, "{s}")
    }
}

impl FromStr for OrderAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "NEW" => Ok(OrderAction::New),
            "REVISE" => Ok(OrderAction::Revise),
            "RENEW" => Ok(OrderAction::Renew),
            "DISCONTINUE" => Ok(OrderAction::Discontinue),
            other => Err(format!(
                "Invalid order action '{other}'. Must be one of: NEW, REVISE, RENEW, DISCONTINUE"
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CareSetting {
    #[default]
    Outpatient,
    Inpatient,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Urgency {
    #[default]
    Routine,
    Stat,
    OnScheduledDate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DosingType {
    #[default]
    Simple,
    FreeText,
}

/// A formulary drug
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Drug {
    pub id: DrugId,
    pub name: String,

    /// The concept the drug is a formulation of
    pub concept: ConceptId,

    #[serde(default)]
    pub retired: bool,
}

/// A persisted or proposed drug order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DrugOrder {
    /// `None` until persisted
    #[serde(default)]
    pub id: Option<OrderId>,

    pub patient: PatientId,

    #[serde(default)]
    pub encounter: Option<EncounterId>,

    pub concept: ConceptId,

    #[serde(default)]
    pub drug: Option<DrugId>,

    #[serde(default)]
    pub action: OrderAction,

    #[serde(default)]
    pub previous_order: Option<OrderId>,

    #[serde(default)]
    pub care_setting: CareSetting,

    #[serde(default)]
    pub urgency: Urgency,

    #[serde(default)]
    pub dosing_type: DosingType,

    #[serde(default)]
    pub date_activated: Option<NaiveDateTime>,

    #[serde(default)]
    pub scheduled_date: Option<NaiveDateTime>,

    #[serde(default)]
    pub auto_expire_date: Option<NaiveDateTime>,

    #[serde(default)]
    pub date_stopped: Option<NaiveDateTime>,

    #[serde(default)]
    pub dose: Option<f64>,

    #[serde(default)]
    pub dose_units: Option<ConceptId>,

    #[serde(default)]
    pub route: Option<ConceptId>,

    #[serde(default)]
    pub frequency: Option<ConceptId>,

    #[serde(default)]
    pub as_needed: bool,

    /// Free-text dosing instructions
    #[serde(default)]
    pub dosing_instructions: Option<String>,

    #[serde(default)]
    pub quantity: Option<f64>,

    #[serde(default)]
    pub quantity_units: Option<ConceptId>,

    #[serde(default)]
    pub num_refills: Option<u32>,

    #[serde(default)]
    pub duration: Option<u32>,

    #[serde(default)]
    pub duration_units: Option<ConceptId>,

    #[serde(default)]
    pub order_reason: Option<ConceptId>,

    /// Why the order was stopped, when it was stopped directly
    #[serde(default)]
    pub stop_reason: Option<ConceptId>,

    #[serde(default)]
    pub voided: bool,

    #[serde(default)]
    pub void_reason: Option<String>,
}

impl DrugOrder {
    /// Creates a NEW order with every optional field unset
    pub fn new(patient: PatientId, concept: ConceptId) -> Self {
        Self {
            id: None,
            patient,
            encounter: None,
            concept,
            drug: None,
            action: OrderAction::New,
            previous_order: None,
            care_setting: CareSetting::default(),
            urgency: Urgency::default(),
            dosing_type: DosingType::default(),
            date_activated: None,
            scheduled_date: None,
            auto_expire_date: None,
            date_stopped: None,
            dose: None,
            dose_units: None,
            route: None,
            frequency: None,
            as_needed: false,
            dosing_instructions: None,
            quantity: None,
            quantity_units: None,
            num_refills: None,
            duration: None,
            duration_units: None,
            order_reason: None,
            stop_reason: None,
            voided: false,
            void_reason: None,
        }
    }

    /// Effective start: scheduled date for scheduled orders, else activation
    pub fn effective_start(&self) -> Option<NaiveDateTime> {
        match self.urgency {
            Urgency::OnScheduledDate => self.scheduled_date.or(self.date_activated),
            _ => self.date_activated,
        }
    }

    /// Effective stop: stop date, else auto-expire date
    pub fn effective_stop(&self) -> Option<NaiveDateTime> {
        self.date_stopped.or(self.auto_expire_date)
    }

    /// Active on a date: started on/before it and not yet stopped
    pub fn is_active_on(&self, date: NaiveDateTime) -> bool {
        if self.voided || self.action == OrderAction::Discontinue {
            return false;
        }
        let started = self.effective_start().map_or(true, |s| s <= date);
        let stopped = self.effective_stop().is_some_and(|s| s < date);
        started && !stopped
    }

    /// Copies every unset field from `base`
    pub fn inherit_unset_from(&mut self, base: &DrugOrder) {
        self.drug = self.drug.or(base.drug);
        self.dose = self.dose.or(base.dose);
        self.dose_units = self.dose_units.or(base.dose_units);
        self.route = self.route.or(base.route);
        self.frequency = self.frequency.or(base.frequency);
        if self.dosing_instructions.is_none() {
            self.dosing_instructions = base.dosing_instructions.clone();
        }
        self.quantity = self.quantity.or(base.quantity);
        self.quantity_units = self.quantity_units.or(base.quantity_units);
        self.num_refills = self.num_refills.or(base.num_refills);
        self.duration = self.duration.or(base.duration);
        self.duration_units = self.duration_units.or(base.duration_units);
        self.order_reason = self.order_reason.or(base.order_reason);
    }
}
