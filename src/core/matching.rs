// Formentry - Clinical Form Compiler and Submission Engine
// Copyright (c) 2025 Formentry Contributors
// Licensed under the MIT License

//! Obs group matching engine
//!
//! Re-associates persisted grouped observations with the obsgroup templates
//! of a schema. Each template is scored against every compatible candidate
//! (same grouping concept at the same level) and bound injectively.
//!
//! # Ranking
//!
//! For every member of a candidate whose question concept appears among the
//! template's slots:
//!
//! - an answer admitted by a slot that lists specific answers scores 2
//! - an answer taken by an unrestricted slot scores 1
//! - a coded answer no slot admits excludes the candidate
//! - a missing or non-coded value against restricted slots zeroes the rank
//!
//! # Assignment
//!
//! Pairs are bound globally, highest rank first. At each step the best rank
//! still on offer is taken by, in order of preference:
//!
//! 1. a template whose only candidate at that rank is wanted by no other
//!    template at that rank
//! 2. the first template in document order with a single candidate there
//! 3. the first template in document order, taking the lowest obs id; this
//!    is a pick among equals and sets the ambiguity flag
//!
//! Templates left over then take a remaining zero ranked candidate in
//! document order, lowest obs id first.
//!
//! Top-level templates are bound first; nested templates only see members of
//! the group bound to their parent. The candidate pool is an ordered id set,
//! so the assignment never depends on the order records were loaded in.

use crate::config::MatchingConfig;
use crate::core::compiler::schema::{GroupKey, ObsField, ObsGroupTemplate, Schema};
use crate::domain::ids::{ConceptId, ObsId, WidgetId};
use crate::domain::obs::{Obs, ObsArena, ObsValue};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

/// The persisted group bound to a template
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GroupMatch {
    pub obs: ObsId,
    /// Bound to a group attached to the encounter instead of the parent group
    pub cross_parent: bool,
    /// Chosen among equally ranked candidates
    pub guessed: bool,
}

/// Association between schema nodes and persisted observations
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Binding {
    pub groups: BTreeMap<GroupKey, GroupMatch>,
    /// Observations bound to each obs field; more than one only for multi-valued fields
    pub fields: BTreeMap<WidgetId, Vec<ObsId>>,
    /// True when any tie-break picked among equals
    pub ambiguous: bool,
    /// Active leaf observations no field claimed
    pub unmatched: Vec<ObsId>,
}

impl Binding {
    pub fn group(&self, key: GroupKey) -> Option<ObsId> {
        self.groups.get(&key).map(|m| m.obs)
    }

    /// The single observation bound to a field
    pub fn field_obs(&self, widget: WidgetId) -> Option<ObsId> {
        self.fields.get(&widget).and_then(|ids| ids.first().copied())
    }

    pub fn field_all(&self, widget: WidgetId) -> &[ObsId] {
        self.fields.get(&widget).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Every observation a schema field claimed
    pub fn claimed(&self) -> BTreeSet<ObsId> {
        self.fields.values().flatten().copied().collect()
    }
}

/// Rank of one candidate against one template; `None` is a contradiction
fn rank(template: &ObsGroupTemplate, candidate: ObsId, arena: &ObsArena) -> Option<u32> {
    let slots = template.direct_fields();
    let nested: BTreeSet<ConceptId> = template.direct_groups().iter().map(|g| g.concept).collect();

    let mut score = 0;
    let mut zeroed = false;
    for member in arena.members(candidate) {
        if arena.is_group(member.id) {
            if nested.contains(&member.concept) {
                score += 1;
            }
            continue;
        }
        let matching: Vec<&&ObsField> = slots
            .iter()
            .filter(|s| s.records_concept(member.concept))
            .collect();
        if matching.is_empty() {
            continue;
        }
        let answer = member.value.as_ref().and_then(ObsValue::coded);
        let admitted = answer.is_some_and(|a| {
            matching
                .iter()
                .any(|s| s.restricting_answers().contains(&a))
        });
        if admitted {
            score += 2;
        } else if matching.iter().any(|s| s.restricting_answers().is_empty()) {
            score += 1;
        } else if answer.is_some() {
            return None;
        } else {
            zeroed = true;
        }
    }
    Some(if zeroed { 0 } else { score })
}

struct Matcher<'a> {
    arena: &'a ObsArena,
    config: &'a MatchingConfig,
    binding: Binding,
}

impl<'a> Matcher<'a> {
    fn ranked(&self, template: &ObsGroupTemplate, pool: &BTreeSet<ObsId>) -> Vec<(ObsId, u32)> {
        pool.iter()
            .filter(|id| {
                self.arena
                    .get(**id)
                    .is_some_and(|o| o.concept == template.concept)
            })
            .filter_map(|id| rank(template, *id, self.arena).map(|r| (*id, r)))
            .collect()
    }

    fn bind(&mut self, template: &ObsGroupTemplate, obs: ObsId, guessed: bool, cross_parent: bool) {
        self.binding.groups.insert(
            template.key,
            GroupMatch {
                obs,
                cross_parent,
                guessed,
            },
        );
        if guessed {
            self.binding.ambiguous = true;
        }
    }

    /// Binds sibling templates against one candidate pool
    fn bind_level(&mut self, templates: &[&ObsGroupTemplate], pool: &mut BTreeSet<ObsId>) {
        let ranks: Vec<Vec<(ObsId, u32)>> = templates.iter().map(|t| self.ranked(t, pool)).collect();
        let mut open: Vec<usize> = (0..templates.len()).collect();

        let at_rank = |i: usize, rank: u32, pool: &BTreeSet<ObsId>| -> Vec<ObsId> {
            ranks[i]
                .iter()
                .filter(|(id, r)| *r == rank && pool.contains(id))
                .map(|(id, _)| *id)
                .collect()
        };

        loop {
            let best = open
                .iter()
                .flat_map(|i| ranks[*i].iter())
                .filter(|(id, _)| pool.contains(id))
                .map(|(_, r)| *r)
                .max();
            let Some(best) = best.filter(|b| *b > 0) else {
                break;
            };
            let contenders: Vec<(usize, Vec<ObsId>)> = open
                .iter()
                .map(|i| (*i, at_rank(*i, best, pool)))
                .filter(|(_, c)| !c.is_empty())
                .collect();
            let uncontested = contenders.iter().find(|(_, c)| {
                c.len() == 1 && contenders.iter().filter(|(_, o)| o.contains(&c[0])).count() == 1
            });
            let Some((index, candidates)) = uncontested
                .or_else(|| contenders.iter().find(|(_, c)| c.len() == 1))
                .or_else(|| contenders.first())
            else {
                break;
            };
            let template = templates[*index];
            let chosen = candidates[0];
            let guessed = candidates.len() > 1;
            if guessed {
                crate::log_match_guess!(template.key, chosen, candidates.len());
            }
            pool.remove(&chosen);
            self.bind(template, chosen, guessed, false);
            let index = *index;
            open.retain(|i| *i != index);
        }

        for index in open {
            let tied = at_rank(index, 0, pool);
            let Some(chosen) = tied.first().copied() else {
                continue;
            };
            let template = templates[index];
            let guessed = tied.len() > 1;
            if guessed {
                crate::log_match_guess!(template.key, chosen, tied.len());
            }
            pool.remove(&chosen);
            self.bind(template, chosen, guessed, false);
        }
    }

    /// The exception for nested templates whose grouping concept is unique
    /// among their siblings: they may take a group attached to the encounter
    fn bind_cross_parent(&mut self, siblings: &[&ObsGroupTemplate], roots: &mut BTreeSet<ObsId>) {
        for template in siblings {
            if self.binding.groups.contains_key(&template.key) {
                continue;
            }
            let unique = siblings
                .iter()
                .filter(|s| s.concept == template.concept)
                .count()
                == 1;
            if !unique {
                continue;
            }
            let ranked = self.ranked(template, roots);
            let Some(best) = ranked.iter().map(|(_, r)| *r).max() else {
                continue;
            };
            let tied: Vec<ObsId> = ranked
                .iter()
                .filter(|(_, r)| *r == best)
                .map(|(id, _)| *id)
                .collect();
            let Some(chosen) = tied.first().copied() else {
                continue;
            };
            warn!(
                template = %template.key,
                obs = %chosen,
                concept = %template.concept,
                "Binding nested group template to a group attached directly to the encounter"
            );
            let guessed = tied.len() > 1;
            if guessed {
                crate::log_match_guess!(template.key, chosen, tied.len());
            }
            roots.remove(&chosen);
            self.bind(template, chosen, guessed, true);
        }
    }

    fn field_accepts(field: &ObsField, obs: &Obs) -> bool {
        if !field.records_concept(obs.concept) {
            return false;
        }
        let restricting = field.restricting_answers();
        restricting.is_empty()
            || obs
                .value
                .as_ref()
                .and_then(ObsValue::coded)
                .is_some_and(|a| restricting.contains(&a))
    }

    /// Binds leaf fields to observations in `scope`; fields with specific
    /// answers choose first so an open field does not take their answer
    fn bind_fields(&mut self, fields: &[&ObsField], scope: &[ObsId]) {
        let mut available: BTreeSet<ObsId> = scope.iter().copied().collect();
        let restricted = fields.iter().filter(|f| !f.restricting_answers().is_empty());
        let open = fields.iter().filter(|f| f.restricting_answers().is_empty());
        for field in restricted.chain(open) {
            let matches: Vec<ObsId> = available
                .iter()
                .filter(|id| {
                    self.arena
                        .get(**id)
                        .is_some_and(|o| Self::field_accepts(field, o))
                })
                .copied()
                .collect();
            let taken: Vec<ObsId> = if field.multi {
                matches
            } else {
                matches.into_iter().take(1).collect()
            };
            if taken.is_empty() {
                continue;
            }
            for id in &taken {
                available.remove(id);
            }
            self.binding.fields.insert(field.widget, taken);
        }
    }

    fn leaf_members(&self, group: ObsId) -> Vec<ObsId> {
        self.arena
            .members(group)
            .iter()
            .filter(|o| !self.arena.is_group(o.id))
            .map(|o| o.id)
            .collect()
    }
}

/// Matches the observations of one encounter to a schema
pub fn match_observations(schema: &Schema, arena: &ObsArena, config: &MatchingConfig) -> Binding {
    let mut matcher = Matcher {
        arena,
        config,
        binding: Binding::default(),
    };

    let mut roots: BTreeSet<ObsId> = arena
        .roots()
        .filter(|o| arena.is_group(o.id))
        .map(|o| o.id)
        .collect();

    let top = schema.top_level_groups();
    matcher.bind_level(&top, &mut roots);

    let mut queue: Vec<&ObsGroupTemplate> = top;
    let mut next = 0;
    while next < queue.len() {
        let template = queue[next];
        next += 1;
        let children = template.direct_groups();
        if children.is_empty() {
            continue;
        }
        if let Some(parent) = matcher.binding.group(template.key) {
            let mut pool: BTreeSet<ObsId> = arena
                .members(parent)
                .iter()
                .filter(|o| arena.is_group(o.id))
                .map(|o| o.id)
                .collect();
            matcher.bind_level(&children, &mut pool);
            if matcher.config.legacy_cross_parent_binding {
                matcher.bind_cross_parent(&children, &mut roots);
            }
        }
        queue.extend(children);
    }

    let top_scope: Vec<ObsId> = arena
        .roots()
        .filter(|o| !arena.is_group(o.id))
        .map(|o| o.id)
        .collect();
    matcher.bind_fields(&schema.top_level_fields(), &top_scope);

    for template in schema.groups() {
        if let Some(group) = matcher.binding.group(template.key) {
            let scope = matcher.leaf_members(group);
            matcher.bind_fields(&template.direct_fields(), &scope);
        }
    }

    let claimed = matcher.binding.claimed();
    matcher.binding.unmatched = arena
        .active()
        .filter(|o| !arena.is_group(o.id) && !claimed.contains(&o.id))
        .map(|o| o.id)
        .collect();

    debug!(
        groups = matcher.binding.groups.len(),
        fields = matcher.binding.fields.len(),
        unmatched = matcher.binding.unmatched.len(),
        ambiguous = matcher.binding.ambiguous,
        "Observation matching complete"
    );
    matcher.binding
}
