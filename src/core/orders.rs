// Formentry - Clinical Form Compiler and Submission Engine
// Copyright (c) 2025 Formentry Contributors
// Licensed under the MIT License

//! Drug order lines
//!
//! Each `drugOrder` tag is one order line. On submission a line is parsed
//! from its suffixed keys and planned against two kinds of prior orders:
//!
//! - the order this line already produced in the encounter being edited
//! - the patient's active order for the same drug outside this encounter,
//!   which REVISE, RENEW and DISCONTINUE act upon
//!
//! | Action | Effect |
//! |---|---|
//! | NEW | create an order |
//! | REVISE | stop the active order just before the new one starts, create a revision inheriting unset fields |
//! | RENEW | as REVISE, but changed free-text instructions are rejected |
//! | DISCONTINUE | create a discontinuation and stop the active order |
//!
//! Editing a line compares it with the order it produced: unchanged lines are
//! left alone, changed lines void and recreate, and a line marked voided
//! voids its order and starts over with a fresh NEW order.

use crate::adapters::repository::ClinicalRepository;
use crate::config::FormEntryConfig;
use crate::core::compiler::schema::{DrugOrderField, Schema};
use crate::core::values::{format_datetime, parse_date, SubmittedValues};
use crate::domain::changes::ChangeSet;
use crate::domain::errors::ValidationErrors;
use crate::domain::ids::{ConceptId, EncounterId, OrderId, PatientId, WidgetId};
use crate::domain::obs::format_number;
use crate::domain::order::{DosingType, DrugOrder, OrderAction, Urgency};
use crate::domain::Result;
use chrono::{Duration, NaiveDateTime, NaiveTime};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Suffixes of the keys an order line is submitted under
pub const LINE_PARTS: &[&str] = &[
    "_action",
    "_dose",
    "_frequency",
    "_instructions",
    "_quantity",
    "_refills",
    "_duration",
    "_start",
];

/// Inputs for planning order lines
pub struct OrderContext<'a> {
    pub repository: &'a dyn ClinicalRepository,
    pub config: &'a FormEntryConfig,
    pub patient: PatientId,
    /// The encounter being edited, if any
    pub encounter: Option<EncounterId>,
    pub encounter_datetime: NaiveDateTime,
    /// Orders already placed in the edited encounter
    pub existing: &'a [DrugOrder],
}

/// One submitted order line
#[derive(Debug, Clone, PartialEq)]
struct OrderLine {
    selected: bool,
    action: OrderAction,
    dose: Option<f64>,
    /// Submitted frequency; the field's default applies only to new orders
    frequency: Option<ConceptId>,
    instructions: Option<String>,
    quantity: Option<f64>,
    refills: Option<u32>,
    duration: Option<u32>,
    start: Option<NaiveDateTime>,
    voided: bool,
    discontinue: Option<(NaiveDateTime, Option<ConceptId>)>,
}

fn same_drug(field: &DrugOrderField, order: &DrugOrder) -> bool {
    match field.drug {
        Some(drug) => order.drug == Some(drug),
        None => order.concept == field.concept,
    }
}

/// Assigns each line the order it produced in an encounter
///
/// Lines claim non-voided, non-discontinuation orders for their drug in id
/// order, so two lines for the same drug never share an order.
pub fn bind_order_lines<'a>(schema: &Schema, orders: &'a [DrugOrder]) -> BTreeMap<WidgetId, &'a DrugOrder> {
    let mut candidates: Vec<&DrugOrder> = orders
        .iter()
        .filter(|o| !o.voided && o.action != OrderAction::Discontinue)
        .collect();
    candidates.sort_by_key(|o| o.id);

    let mut claimed = BTreeSet::new();
    let mut bound = BTreeMap::new();
    for field in schema.drug_orders() {
        if let Some(order) = candidates
            .iter()
            .find(|o| same_drug(field, o) && !claimed.contains(&o.id))
        {
            claimed.insert(order.id);
            bound.insert(field.widget, *order);
        }
    }
    bound
}

/// The discontinuation recorded in an encounter for an order
pub fn discontinuation_of<'a>(order: &DrugOrder, orders: &'a [DrugOrder]) -> Option<&'a DrugOrder> {
    let id = order.id?;
    orders
        .iter()
        .find(|o| !o.voided && o.action == OrderAction::Discontinue && o.previous_order == Some(id))
}

/// Submission keys describing an existing order, as `(suffix, value)` pairs
pub fn line_parts(order: &DrugOrder, config: &FormEntryConfig) -> BTreeMap<String, String> {
    let mut parts = BTreeMap::new();
    parts.insert("_action".to_string(), order.action.to_string());
    if let Some(dose) = order.dose {
        parts.insert("_dose".to_string(), format_number(dose));
    }
    if let Some(frequency) = order.frequency {
        parts.insert("_frequency".to_string(), frequency.to_string());
    }
    if let Some(instructions) = &order.dosing_instructions {
        parts.insert("_instructions".to_string(), instructions.clone());
    }
    if let Some(quantity) = order.quantity {
        parts.insert("_quantity".to_string(), format_number(quantity));
    }
    if let Some(refills) = order.num_refills {
        parts.insert("_refills".to_string(), refills.to_string());
    }
    if let Some(duration) = order.duration {
        parts.insert("_duration".to_string(), duration.to_string());
    }
    if let Some(start) = order.effective_start() {
        parts.insert("_start".to_string(), format_datetime(start, &config.formats));
    }
    parts
}

fn parse_line(
    field: &DrugOrderField,
    values: &SubmittedValues,
    config: &FormEntryConfig,
    errors: &mut ValidationErrors,
) -> OrderLine {
    let w = field.widget;
    let mut number = |suffix: &str| -> Option<f64> {
        let raw = values.part(w, suffix)?;
        match raw.parse::<f64>() {
            Ok(n) if n.is_finite() && n >= 0.0 => Some(n),
            _ => {
                errors.push(w.suffixed(suffix), format!("'{raw}' is not a valid amount"));
                None
            }
        }
    };
    let dose = number("_dose");
    let quantity = number("_quantity");

    let mut whole = |suffix: &str| -> Option<u32> {
        let raw = values.part(w, suffix)?;
        match raw.parse::<u32>() {
            Ok(n) => Some(n),
            Err(_) => {
                errors.push(w.suffixed(suffix), format!("'{raw}' is not a whole number"));
                None
            }
        }
    };
    let refills = whole("_refills");
    let duration = whole("_duration");

    let action = match values.part(w, "_action") {
        Some(raw) => raw.parse::<OrderAction>().unwrap_or_else(|reason| {
            errors.push(w.suffixed("_action"), reason);
            field.default_action
        }),
        None => field.default_action,
    };

    let frequency = values.part(w, "_frequency").and_then(|raw| match raw.parse::<ConceptId>() {
        Ok(c) if field.frequencies.is_empty() || field.frequencies.iter().any(|f| f.concept == c) => Some(c),
        _ => {
            errors.push(w.suffixed("_frequency"), format!("'{raw}' is not an allowed frequency"));
            None
        }
    });

    let start = values.part(w, "_start").and_then(|raw| {
        match parse_datetime(raw, config) {
            Ok(dt) => Some(dt),
            Err(reason) => {
                errors.push(w.suffixed("_start"), reason);
                None
            }
        }
    });

    let discontinue = match values.datetime(field.discontinued_widget, &config.formats) {
        Ok(Some(date)) => {
            let reason = match values.part(field.discontinued_widget, "_reason") {
                None => None,
                Some(raw) => match raw.parse::<ConceptId>() {
                    Ok(c)
                        if field.discontinue_reasons.is_empty()
                            || field.discontinue_reasons.iter().any(|a| a.concept == c) =>
                    {
                        Some(c)
                    }
                    _ => {
                        errors.push(
                            field.discontinued_widget.suffixed("_reason"),
                            format!("'{raw}' is not an allowed discontinue reason"),
                        );
                        None
                    }
                },
            };
            Some((date, reason))
        }
        Ok(None) => None,
        Err(reason) => {
            errors.push(field.discontinued_widget.to_string(), reason);
            None
        }
    };

    OrderLine {
        selected: values.widget(w).is_some(),
        action,
        dose,
        frequency,
        instructions: values.part(w, "_instructions").map(str::to_string),
        quantity,
        refills,
        duration,
        start,
        voided: values
            .widget(field.voided_widget)
            .is_some_and(|v| v.eq_ignore_ascii_case("true")),
        discontinue,
    }
}

pub(crate) fn parse_datetime(raw: &str, config: &FormEntryConfig) -> std::result::Result<NaiveDateTime, String> {
    NaiveDateTime::parse_from_str(raw, &config.formats.datetime_format)
        .or_else(|_| parse_date(raw, &config.formats).map(|d| d.and_time(NaiveTime::MIN)))
}

/// Activation date of a new order
///
/// A start at midnight on the encounter day takes the encounter datetime.
pub(crate) fn activation(start: Option<NaiveDateTime>, encounter_datetime: NaiveDateTime) -> NaiveDateTime {
    match start {
        None => encounter_datetime,
        Some(s) if s.time() == NaiveTime::MIN && s.date() == encounter_datetime.date() => {
            encounter_datetime
        }
        Some(s) => s,
    }
}

struct Planner<'a, 'b> {
    ctx: &'b OrderContext<'a>,
    changes: &'b mut ChangeSet,
    errors: &'b mut ValidationErrors,
    /// Orders voided by this submission
    voided: BTreeSet<OrderId>,
}

impl Planner<'_, '_> {
    fn new_order(&self, field: &DrugOrderField, line: &OrderLine, action: OrderAction) -> DrugOrder {
        let mut order = DrugOrder::new(self.ctx.patient, field.concept);
        order.encounter = self.ctx.encounter;
        order.drug = field.drug;
        order.action = action;
        order.care_setting = field.care_setting;
        order.dosing_type = field.dosing_type;
        order.urgency = field.urgency;
        let activated = activation(line.start, self.ctx.encounter_datetime);
        if field.urgency == Urgency::OnScheduledDate && activated > self.ctx.encounter_datetime {
            order.scheduled_date = Some(activated);
            order.date_activated = Some(self.ctx.encounter_datetime);
        } else {
            order.date_activated = Some(activated);
        }
        order.dose = line.dose;
        order.frequency = line.frequency.or(field.default_frequency);
        order.dosing_instructions = line.instructions.clone();
        order.quantity = line.quantity;
        order.num_refills = line.refills;
        order.duration = line.duration;
        order
    }

    fn stop_date(&self, activated: NaiveDateTime) -> NaiveDateTime {
        activated - Duration::seconds(self.ctx.config.orders.stop_offset_seconds)
    }

    /// The patient's active order for this drug outside the edited encounter
    fn previous_active(&self, field: &DrugOrderField) -> Result<Option<DrugOrder>> {
        let mut orders: Vec<DrugOrder> = self
            .ctx
            .repository
            .patient_orders(self.ctx.patient)?
            .into_iter()
            .filter(|o| {
                same_drug(field, o)
                    && (self.ctx.encounter.is_none() || o.encounter != self.ctx.encounter)
                    && o.is_active_on(self.ctx.encounter_datetime)
            })
            .collect();
        sort_orders(&mut orders);
        Ok(orders.pop())
    }

    fn validate_line(&mut self, field: &DrugOrderField, line: &OrderLine) -> bool {
        if field.dosing_type == DosingType::FreeText && line.instructions.is_none() {
            self.errors.push(
                field.widget.suffixed("_instructions"),
                "Dosing instructions are required",
            );
            return false;
        }
        true
    }

    /// Plans a selected line that has no order in this encounter yet
    fn plan_new_line(&mut self, field: &DrugOrderField, line: &OrderLine) -> Result<()> {
        if line.action == OrderAction::New {
            if self.validate_line(field, line) {
                let order = self.new_order(field, line, OrderAction::New);
                self.changes.orders_to_create.push(order);
            }
            return Ok(());
        }

        let Some(previous) = self.previous_active(field)? else {
            self.errors.push(
                field.widget.to_string(),
                format!("There is no active order to {}", line.action.to_string().to_lowercase()),
            );
            return Ok(());
        };
        let Some(previous_id) = previous.id else {
            return Ok(());
        };

        match line.action {
            OrderAction::Renew
                if line.instructions.is_some()
                    && line.instructions != previous.dosing_instructions =>
            {
                self.errors.push(
                    field.widget.to_string(),
                    "Dosing instructions cannot change when renewing an order",
                );
            }
            OrderAction::Revise | OrderAction::Renew => {
                let mut order = self.new_order(field, line, line.action);
                order.previous_order = Some(previous_id);
                order.frequency = line.frequency;
                order.inherit_unset_from(&previous);
                order.frequency = order.frequency.or(field.default_frequency);
                let activated = order.date_activated.unwrap_or(self.ctx.encounter_datetime);
                self.changes
                    .orders_to_stop
                    .push((previous_id, self.stop_date(activated)));
                self.changes.orders_to_create.push(order);
            }
            OrderAction::Discontinue => {
                let date = activation(line.start, self.ctx.encounter_datetime);
                self.discontinue(field, &previous, date, None);
            }
            OrderAction::New => {}
        }
        Ok(())
    }

    fn discontinue(&mut self, field: &DrugOrderField, target: &DrugOrder, date: NaiveDateTime, reason: Option<ConceptId>) {
        let Some(target_id) = target.id else {
            return;
        };
        let mut order = DrugOrder::new(self.ctx.patient, field.concept);
        order.encounter = self.ctx.encounter;
        order.drug = target.drug.or(field.drug);
        order.action = OrderAction::Discontinue;
        order.previous_order = Some(target_id);
        order.care_setting = target.care_setting;
        order.date_activated = Some(date);
        order.order_reason = reason;
        self.changes.orders_to_stop.push((target_id, date));
        self.changes.orders_to_create.push(order);
    }

    /// Plans a line against the order it produced earlier
    fn plan_bound_line(&mut self, field: &DrugOrderField, line: &OrderLine, bound: &DrugOrder) {
        let Some(bound_id) = bound.id else {
            return;
        };
        if line.voided {
            self.changes.void_order(bound_id);
            self.voided.insert(bound_id);
            if line.selected && self.validate_line(field, line) {
                let mut fresh = self.new_order(field, line, OrderAction::New);
                fresh.previous_order = bound.previous_order;
                self.changes.orders_to_create.push(fresh);
            }
            return;
        }
        if !line.selected {
            self.changes.void_order(bound_id);
            self.voided.insert(bound_id);
            return;
        }
        if !self.line_differs(line, bound) {
            return;
        }
        if line.action == OrderAction::Renew
            && line.instructions.is_some()
            && line.instructions != bound.dosing_instructions
        {
            self.errors.push(
                field.widget.to_string(),
                "Dosing instructions cannot change when renewing an order",
            );
            return;
        }
        if !self.validate_line(field, line) {
            return;
        }
        self.changes.void_order(bound_id);
        self.voided.insert(bound_id);
        let mut recreated = self.new_order(field, line, line.action);
        recreated.previous_order = bound.previous_order;
        if let Some(start) = line.start {
            recreated.date_activated = Some(activation(Some(start), self.ctx.encounter_datetime));
        } else {
            recreated.date_activated = bound.date_activated;
        }
        self.changes.orders_to_create.push(recreated);
    }

    fn line_differs(&self, line: &OrderLine, order: &DrugOrder) -> bool {
        let start_changed = line.start.is_some_and(|s| {
            let formats = &self.ctx.config.formats;
            Some(format_datetime(activation(Some(s), self.ctx.encounter_datetime), formats))
                != order.effective_start().map(|d| format_datetime(d, formats))
        });
        line.action != order.action
            || line.dose != order.dose
            || line.frequency.is_some_and(|f| order.frequency != Some(f))
            || line.instructions != order.dosing_instructions
            || line.quantity != order.quantity
            || line.refills != order.num_refills
            || line.duration != order.duration
            || start_changed
    }

    fn plan_discontinue_widget(&mut self, field: &DrugOrderField, line: &OrderLine, bound: Option<&DrugOrder>) -> Result<()> {
        let Some((date, reason)) = line.discontinue else {
            return Ok(());
        };
        let target = match bound {
            Some(order) => Some(order.clone()),
            None => self.previous_active(field)?,
        };
        let Some(target) = target else {
            self.errors.push(
                field.discontinued_widget.to_string(),
                "There is no active order to discontinue",
            );
            return Ok(());
        };
        if target.id.is_some_and(|id| self.voided.contains(&id)) {
            debug!(order = ?target.id, "Skipping discontinuation of an order voided by this submission");
            return Ok(());
        }
        if let Some(existing) = discontinuation_of(&target, self.ctx.existing) {
            let same = existing.date_activated == Some(date) && existing.order_reason == reason;
            if same {
                return Ok(());
            }
            if let Some(id) = existing.id {
                self.changes.void_order(id);
            }
        }
        self.discontinue(field, &target, date, reason);
        Ok(())
    }
}

/// Plans every order line of a submission
///
/// # Errors
///
/// Returns a repository error if prior orders cannot be read; submission
/// problems are collected into `errors`.
pub fn plan_orders(
    schema: &Schema,
    values: &SubmittedValues,
    ctx: &OrderContext<'_>,
    changes: &mut ChangeSet,
    errors: &mut ValidationErrors,
) -> Result<()> {
    let bound = bind_order_lines(schema, ctx.existing);
    let mut planner = Planner {
        ctx,
        changes,
        errors,
        voided: BTreeSet::new(),
    };

    for field in schema.drug_orders() {
        let line = parse_line(field, values, ctx.config, planner.errors);
        let prior = bound.get(&field.widget).copied();
        match prior {
            Some(order) => planner.plan_bound_line(field, &line, order),
            None if line.selected => planner.plan_new_line(field, &line)?,
            None => {}
        }
        let still_bound = prior.filter(|o| o.id.is_some_and(|id| !planner.voided.contains(&id)));
        planner.plan_discontinue_widget(field, &line, still_bound.or(prior))?;
    }
    Ok(())
}

/// Sorts orders by activation, then predecessors before successors, then
/// auto-expire date, then id; unset dates sort last
pub fn sort_orders(orders: &mut [DrugOrder]) {
    let depth: BTreeMap<Option<OrderId>, usize> = orders
        .iter()
        .map(|o| {
            let mut d = 0;
            let mut current = o.previous_order;
            while let Some(prev) = current {
                if d > orders.len() {
                    break;
                }
                d += 1;
                current = orders
                    .iter()
                    .find(|x| x.id == Some(prev))
                    .and_then(|x| x.previous_order);
            }
            (o.id, d)
        })
        .collect();

    fn last_if_none(a: Option<NaiveDateTime>, b: Option<NaiveDateTime>) -> Ordering {
        match (a, b) {
            (Some(x), Some(y)) => x.cmp(&y),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        }
    }

    orders.sort_by(|a, b| {
        last_if_none(a.effective_start(), b.effective_start())
            .then_with(|| depth.get(&a.id).cmp(&depth.get(&b.id)))
            .then_with(|| last_if_none(a.auto_expire_date, b.auto_expire_date))
            .then_with(|| a.id.cmp(&b.id))
    });
}
