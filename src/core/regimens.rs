// Formentry - Clinical Form Compiler and Submission Engine
// Copyright (c) 2025 Formentry Contributors
// Licensed under the MIT License

//! Standard regimens
//!
//! A `standardRegimen` field orders every drug of a configured regimen in
//! one choice. When an encounter is edited the field is bound to the
//! strongest regimen among its orders: the offered regimen with the most
//! components whose drugs all have an order starting on the same day. The
//! first listed regimen wins a tie.
//!
//! Any change to a bound regimen voids its orders and creates them again.
//! Clearing the choice only voids them.

use crate::config::FormEntryConfig;
use crate::core::compiler::schema::{Schema, StandardRegimenField};
use crate::core::orders::{activation, bind_order_lines, discontinuation_of, OrderContext};
use crate::core::values::SubmittedValues;
use crate::domain::changes::ChangeSet;
use crate::domain::errors::ValidationErrors;
use crate::domain::ids::{ConceptId, OrderId, WidgetId};
use crate::domain::order::{DrugOrder, OrderAction};
use crate::domain::Result;
use chrono::{NaiveDate, NaiveDateTime};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Orders of an encounter recognised as one regimen
#[derive(Debug, Clone, PartialEq)]
pub struct RegimenMatch<'a> {
    pub code: String,
    pub start: Option<NaiveDateTime>,
    pub orders: Vec<&'a DrugOrder>,
}

impl RegimenMatch<'_> {
    /// Stop date and reason recorded on the matched orders
    pub fn stopped(&self) -> Option<(NaiveDateTime, Option<ConceptId>)> {
        let first = self.orders.first()?;
        first.date_stopped.map(|date| (date, first.stop_reason))
    }
}

fn start_day(order: &DrugOrder) -> Option<NaiveDate> {
    order.effective_start().map(|d| d.date())
}

/// Assigns each regimen field the strongest regimen among an encounter's orders
///
/// Orders already claimed by `drugOrder` lines are never considered, and a
/// field never shares an order with an earlier one.
pub fn bind_regimens<'a>(
    schema: &Schema,
    config: &FormEntryConfig,
    orders: &'a [DrugOrder],
) -> BTreeMap<WidgetId, RegimenMatch<'a>> {
    let mut claimed: BTreeSet<OrderId> = bind_order_lines(schema, orders)
        .values()
        .filter_map(|o| o.id)
        .collect();
    let mut bound = BTreeMap::new();

    for field in schema.standard_regimens() {
        let mut pool: Vec<&DrugOrder> = orders
            .iter()
            .filter(|o| {
                !o.voided
                    && o.action != OrderAction::Discontinue
                    && o.id.is_some_and(|id| !claimed.contains(&id))
            })
            .collect();
        pool.sort_by_key(|o| o.id);
        let days: BTreeSet<Option<NaiveDate>> = pool.iter().map(|o| start_day(o)).collect();

        let mut best: Option<RegimenMatch<'a>> = None;
        for option in &field.regimens {
            let Some(regimen) = config.regimen(&option.code) else {
                continue;
            };
            for day in &days {
                let mut picked: Vec<&DrugOrder> = Vec::new();
                let complete = regimen.components.iter().all(|component| {
                    let found = pool.iter().find(|o| {
                        o.drug == Some(component.drug)
                            && start_day(o) == *day
                            && !picked.iter().any(|p| p.id == o.id)
                    });
                    match found {
                        Some(order) => {
                            picked.push(*order);
                            true
                        }
                        None => false,
                    }
                });
                let stronger = best.as_ref().map_or(true, |b| picked.len() > b.orders.len());
                if complete && !picked.is_empty() && stronger {
                    best = Some(RegimenMatch {
                        code: regimen.code.clone(),
                        start: picked.first().and_then(|o| o.effective_start()),
                        orders: picked,
                    });
                }
            }
        }

        if let Some(found) = best {
            claimed.extend(found.orders.iter().filter_map(|o| o.id));
            bound.insert(field.widget, found);
        }
    }
    bound
}

/// One submitted regimen choice
#[derive(Debug, Clone, PartialEq)]
struct RegimenEntry {
    code: Option<String>,
    start: Option<NaiveDateTime>,
    discontinue: Option<(NaiveDateTime, Option<ConceptId>)>,
}

/// Reads a regimen field, or `None` when any of its values was rejected
fn parse_entry(
    field: &StandardRegimenField,
    values: &SubmittedValues,
    config: &FormEntryConfig,
    errors: &mut ValidationErrors,
) -> Option<RegimenEntry> {
    let before = errors.len();
    let formats = &config.formats;

    let code = match values.widget(field.widget) {
        None => None,
        Some(raw) if field.offers(raw) => Some(raw.to_string()),
        Some(raw) => {
            errors.push(field.widget.to_string(), format!("'{raw}' is not an offered regimen"));
            None
        }
    };

    let start = values.datetime(field.start_widget, formats).unwrap_or_else(|reason| {
        errors.push(field.start_widget.to_string(), reason);
        None
    });
    let stopped = values
        .datetime(field.discontinued_widget, formats)
        .unwrap_or_else(|reason| {
            errors.push(field.discontinued_widget.to_string(), reason);
            None
        });
    let reason_key = field.discontinued_widget.suffixed("_reason");
    let reason = values
        .part(field.discontinued_widget, "_reason")
        .and_then(|raw| match raw.parse::<ConceptId>() {
            Ok(c)
                if field.discontinue_reasons.is_empty()
                    || field.discontinue_reasons.iter().any(|a| a.concept == c) =>
            {
                Some(c)
            }
            _ => {
                errors.push(reason_key.clone(), format!("'{raw}' is not an allowed discontinue reason"));
                None
            }
        });

    if code.is_some() && start.is_none() && errors.len() == before {
        errors.push(field.start_widget.to_string(), "A start date is required");
    }
    if let (Some(start), Some(stopped)) = (start, stopped) {
        if start > stopped {
            errors.push(
                field.discontinued_widget.to_string(),
                "The discontinue date cannot be before the start date",
            );
        }
    }
    if reason.is_some() && stopped.is_none() {
        errors.push(reason_key, "A discontinue reason needs a discontinue date");
    }

    if errors.len() > before {
        return None;
    }
    Some(RegimenEntry {
        code,
        start,
        discontinue: stopped.map(|date| (date, reason)),
    })
}

fn unchanged(entry: &RegimenEntry, bound: &RegimenMatch<'_>) -> bool {
    entry.code.as_deref() == Some(bound.code.as_str())
        && entry.start.map(|d| d.date()) == bound.start.map(|d| d.date())
        && entry.discontinue == bound.stopped()
}

/// Plans every regimen field of a submission
///
/// # Errors
///
/// Returns a repository error if a component drug cannot be read;
/// submission problems are collected into `errors`.
pub fn plan_regimens(
    schema: &Schema,
    values: &SubmittedValues,
    ctx: &OrderContext<'_>,
    changes: &mut ChangeSet,
    errors: &mut ValidationErrors,
) -> Result<()> {
    let fields = schema.standard_regimens();
    if fields.is_empty() {
        return Ok(());
    }
    let bound = bind_regimens(schema, ctx.config, ctx.existing);

    for field in fields {
        let Some(entry) = parse_entry(field, values, ctx.config, errors) else {
            continue;
        };
        if let Some(prior) = bound.get(&field.widget) {
            if unchanged(&entry, prior) {
                continue;
            }
            for order in &prior.orders {
                let stopped_by = discontinuation_of(order, ctx.existing);
                for id in std::iter::once(*order).chain(stopped_by).filter_map(|o| o.id) {
                    changes.void_order(id);
                }
            }
        }

        let Some(regimen) = entry.code.as_deref().and_then(|code| ctx.config.regimen(code)) else {
            continue;
        };
        let activated = activation(entry.start, ctx.encounter_datetime);
        for component in &regimen.components {
            let drug = ctx.repository.drug(component.drug)?;
            let mut order = DrugOrder::new(ctx.patient, drug.concept);
            order.encounter = ctx.encounter;
            order.drug = Some(drug.id);
            order.care_setting = field.care_setting;
            order.date_activated = Some(activated);
            order.dose = component.dose;
            order.dose_units = component.dose_units;
            order.frequency = component.frequency;
            order.dosing_instructions = component.instructions.clone();
            if let Some((date, reason)) = entry.discontinue {
                order.date_stopped = Some(date);
                order.stop_reason = reason;
            }
            changes.orders_to_create.push(order);
        }
        debug!(
            regimen = %regimen.code,
            components = regimen.components.len(),
            "Planned standard regimen"
        );
    }
    Ok(())
}
