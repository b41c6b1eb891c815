//! Conflict settings, stack-policy resolution, and idempotency scopes.
//!
//! Rules that compete for the same award opportunity share a conflict
//! group; the group's stack policy decides which of the matching rules may
//! fire for one event. The idempotency scope declares the dedupe-key
//! granularity the executor uses to keep a repeated event from being
//! rewarded twice — this crate renders the key, the executor enforces it.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use loyalty_core::types::{EventContext, MembershipId, ProgramId, RuleId, TenantId};

/// Resolution strategy when several rules in one conflict group match the
/// same event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StackPolicy {
    /// Every matching rule applies.
    Stack,
    /// Only one rule in the group may be active per trigger; the validator
    /// rejects a second active EXCLUSIVE rule.
    Exclusive,
    /// Only the highest-yield matching rule applies.
    BestOf,
    /// The matching rule with the highest priority rank applies; ties break
    /// by earliest creation.
    Priority,
}

impl StackPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            StackPolicy::Stack => "STACK",
            StackPolicy::Exclusive => "EXCLUSIVE",
            StackPolicy::BestOf => "BEST_OF",
            StackPolicy::Priority => "PRIORITY",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictSettings {
    /// Catalog-constrained label grouping mutually-competing rules.
    pub conflict_group: String,
    pub stack_policy: StackPolicy,
    /// Higher wins under `Priority`; also orders truncation.
    pub priority_rank: u32,
    /// Hard cap on how many rules from this group may fire for one event,
    /// independent of the stack policy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_awards_per_event: Option<u32>,
}

impl Default for ConflictSettings {
    fn default() -> Self {
        Self {
            conflict_group: "DEFAULT".to_string(),
            stack_policy: StackPolicy::Stack,
            priority_rank: 0,
            max_awards_per_event: None,
        }
    }
}

/// Dedupe-key granularity for repeated events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IdempotencyStrategy {
    /// Defer to the executor's global default keying.
    Default,
    /// One award per (subject, calendar day in `bucket_timezone`).
    PerDay,
    /// One award per (subject, period of `period_days`).
    PerPeriod,
    /// Keyed on the source event id alone.
    PerEvent,
}

impl IdempotencyStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdempotencyStrategy::Default => "default",
            IdempotencyStrategy::PerDay => "per-day",
            IdempotencyStrategy::PerPeriod => "per-period",
            IdempotencyStrategy::PerEvent => "per-event",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdempotencyScope {
    pub strategy: IdempotencyStrategy,
    /// IANA timezone name for day buckets. Mandatory whenever day bucketing
    /// is combined with daily limits or cooldowns; callers localize
    /// timestamps with it before bucketing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucket_timezone: Option<String>,
    /// Period length for the `per-period` strategy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub period_days: Option<u32>,
}

impl Default for IdempotencyScope {
    fn default() -> Self {
        Self {
            strategy: IdempotencyStrategy::Default,
            bucket_timezone: None,
            period_days: None,
        }
    }
}

impl IdempotencyScope {
    /// Render the dedupe key the executor will store for this rule/event
    /// pair: `loyalty:{tenant}:{membership}:{program}:{rule}:{bucket}`.
    ///
    /// Buckets: the source event id (`default`), `evt:{id}` (`per-event`),
    /// the calendar day of `occurred_at` (`per-day`), or `{n}d:{index}`
    /// with the index counting `period_days`-sized windows from the Unix
    /// epoch (`per-period`).
    pub fn dedupe_key(
        &self,
        tenant_id: TenantId,
        membership_id: MembershipId,
        program_id: ProgramId,
        rule_id: RuleId,
        event: &EventContext,
    ) -> String {
        let bucket = match self.strategy {
            IdempotencyStrategy::Default => event.source_event_id.clone(),
            IdempotencyStrategy::PerEvent => format!("evt:{}", event.source_event_id),
            IdempotencyStrategy::PerDay => {
                event.occurred_at.date_naive().format("%Y-%m-%d").to_string()
            }
            IdempotencyStrategy::PerPeriod => {
                let days = self.period_days.unwrap_or(1).max(1) as i64;
                let epoch_day = event.occurred_at.timestamp().div_euclid(86_400);
                format!("{}d:{}", days, epoch_day.div_euclid(days))
            }
        };
        format!(
            "loyalty:{}:{}:{}:{}:{}",
            tenant_id, membership_id, program_id, rule_id, bucket
        )
    }
}

/// One candidate award produced by evaluating a rule against an event,
/// carrying the conflict-relevant slice of its rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleAward {
    pub rule_id: RuleId,
    pub program_id: ProgramId,
    pub conflict_group: String,
    pub stack_policy: StackPolicy,
    pub priority_rank: u32,
    pub points: i64,
    pub earning_domain: String,
    pub created_at: DateTime<Utc>,
    /// The rule's per-event points cap, applied during resolution.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub per_event_cap: Option<i64>,
    /// The rule's group-level cap on awards per event.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_awards_per_event: Option<u32>,
}

/// Resolve competing candidate awards: group by conflict group, apply each
/// group's stack policy, clamp to per-event caps, then truncate the group to
/// the strictest declared `max_awards_per_event`.
///
/// Pure with respect to its inputs — period caps that need the transaction
/// ledger are the executor's concern.
pub fn resolve_conflicts(awards: Vec<RuleAward>) -> Vec<RuleAward> {
    let mut groups: BTreeMap<String, Vec<RuleAward>> = BTreeMap::new();
    for award in awards {
        groups.entry(award.conflict_group.clone()).or_default().push(award);
    }

    let mut resolved = Vec::new();
    for (_, group) in groups {
        resolved.extend(resolve_group(group));
    }
    resolved
}

fn resolve_group(group: Vec<RuleAward>) -> Vec<RuleAward> {
    if group.is_empty() {
        return group;
    }

    // Every rule in a group should declare the same policy; the first award
    // speaks for the group, matching how the catalog assigns policies.
    let policy = group[0].stack_policy;
    let cap = group.iter().filter_map(|a| a.max_awards_per_event).min();

    let mut selected: Vec<RuleAward> = match policy {
        StackPolicy::Stack => group,
        StackPolicy::Exclusive => {
            best_by(group, |a, b| {
                (a.priority_rank, a.points).cmp(&(b.priority_rank, b.points))
            })
        }
        StackPolicy::BestOf => best_by(group, |a, b| a.points.cmp(&b.points)),
        StackPolicy::Priority => best_by(group, |a, b| {
            // Higher rank wins; equal ranks go to the earliest created rule.
            a.priority_rank
                .cmp(&b.priority_rank)
                .then_with(|| b.created_at.cmp(&a.created_at))
        }),
    };

    for award in &mut selected {
        if let Some(cap) = award.per_event_cap {
            award.points = award.points.min(cap);
        }
    }
    selected.retain(|a| a.points > 0);

    selected.sort_by(|a, b| {
        b.priority_rank
            .cmp(&a.priority_rank)
            .then_with(|| b.points.cmp(&a.points))
            .then_with(|| a.created_at.cmp(&b.created_at))
    });
    if let Some(cap) = cap {
        selected.truncate(cap as usize);
    }
    selected
}

fn best_by(
    group: Vec<RuleAward>,
    cmp: impl Fn(&RuleAward, &RuleAward) -> std::cmp::Ordering,
) -> Vec<RuleAward> {
    group
        .into_iter()
        .reduce(|best, current| {
            if cmp(&current, &best) == std::cmp::Ordering::Greater {
                current
            } else {
                best
            }
        })
        .into_iter()
        .collect()
}
