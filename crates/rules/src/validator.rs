//! The anti-chaos validator: every rule must pass before a repository may
//! persist or activate it.
//!
//! Checks run fail-fast against the fully assembled candidate — the first
//! violated invariant aborts with an error naming the offending field.
//! Local checks are pure; the EXCLUSIVE-collision check reads the
//! repository. That read-then-write is best-effort under concurrent
//! writers — the backing store's uniqueness constraint is the hard
//! guarantee.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, warn};

use loyalty_core::config::RulesConfig;
use loyalty_core::error::{LoyaltyError, LoyaltyResult};
use loyalty_core::types::RuleId;

use crate::catalog::RuleCatalog;
use crate::conflict::{IdempotencyStrategy, StackPolicy};
use crate::eligibility::{parse_hhmm, EligibilityConditions};
use crate::formula::{PointsFormula, RateFormula, SimpleFormula, TableFormula};
use crate::rule::{Frequency, RewardRule, RuleTrigger};
use crate::store::RuleRepository;

/// Authoring-time size bounds, sourced from [`RulesConfig`].
#[derive(Debug, Clone, Copy)]
pub struct ValidatorLimits {
    pub max_table_rows: usize,
    pub max_hybrid_bonuses: usize,
}

impl Default for ValidatorLimits {
    fn default() -> Self {
        Self::from(&RulesConfig::default())
    }
}

impl From<&RulesConfig> for ValidatorLimits {
    fn from(config: &RulesConfig) -> Self {
        Self {
            max_table_rows: config.max_table_rows,
            max_hybrid_bonuses: config.max_hybrid_bonuses,
        }
    }
}

/// Conflict-group names a CUSTOM rule may not hide behind.
const RESERVED_GROUPS: &[&str] = &["", "DEFAULT", "CUSTOM"];

pub struct RuleValidator {
    repository: Arc<dyn RuleRepository>,
    catalog: Arc<dyn RuleCatalog>,
    limits: ValidatorLimits,
}

impl RuleValidator {
    pub fn new(repository: Arc<dyn RuleRepository>, catalog: Arc<dyn RuleCatalog>) -> Self {
        Self {
            repository,
            catalog,
            limits: ValidatorLimits::default(),
        }
    }

    pub fn with_limits(mut self, limits: ValidatorLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Validate a candidate rule (new or edited). Returns silently on pass.
    pub fn validate(&self, rule: &RewardRule) -> LoyaltyResult<()> {
        match self.run_checks(rule) {
            Ok(()) => {
                debug!(rule_id = rule.id, version = rule.version, "Rule validated");
                Ok(())
            }
            Err(err) => {
                metrics::counter!("rules.validation_failures").increment(1);
                warn!(rule_id = rule.id, error = %err, "Rule rejected");
                Err(err)
            }
        }
    }

    fn run_checks(&self, rule: &RewardRule) -> LoyaltyResult<()> {
        self.check_catalogs(rule)?;
        check_window(rule)?;
        // priority_rank is unsigned and rate/table formulas structurally
        // carry an amount field, so those two invariants cannot be violated
        // by a constructed rule.
        check_bucket_timezone(rule)?;
        self.check_formula(&rule.points_formula)?;
        check_eligibility(&rule.eligibility)?;
        check_custom_trigger(rule)?;
        self.check_exclusive_collision(rule)?;
        Ok(())
    }

    fn check_catalogs(&self, rule: &RewardRule) -> LoyaltyResult<()> {
        let group = rule.conflict.conflict_group.trim();
        if group.is_empty() {
            return Err(LoyaltyError::invalid(
                "conflict.conflict_group",
                "must not be empty",
            ));
        }
        if !self.catalog.is_valid_conflict_group(group) {
            return Err(LoyaltyError::invalid(
                "conflict.conflict_group",
                format!("'{}' is not in the conflict-group catalog", group),
            ));
        }

        let policy = rule.conflict.stack_policy.as_str();
        if !self.catalog.is_valid_stack_policy(policy) {
            return Err(LoyaltyError::invalid(
                "conflict.stack_policy",
                format!("'{}' is not in the stack-policy catalog", policy),
            ));
        }

        let domain = rule.earning_domain.trim();
        if domain.is_empty() {
            return Err(LoyaltyError::invalid("earning_domain", "must not be empty"));
        }
        if !self.catalog.is_valid_earning_domain(domain) {
            return Err(LoyaltyError::invalid(
                "earning_domain",
                format!("'{}' is not in the earning-domain catalog", domain),
            ));
        }
        Ok(())
    }

    fn check_formula(&self, formula: &PointsFormula) -> LoyaltyResult<()> {
        match formula {
            PointsFormula::Fixed(fixed) => check_fixed_points(fixed.points),
            PointsFormula::Rate(rate) => check_rate(rate),
            PointsFormula::Table(table) => self.check_table(table),
            PointsFormula::Hybrid(hybrid) => {
                check_simple(&hybrid.base)?;
                if hybrid.bonuses.len() > self.limits.max_hybrid_bonuses {
                    return Err(LoyaltyError::invalid(
                        "points_formula.bonuses",
                        format!(
                            "{} bonuses exceed the limit of {}",
                            hybrid.bonuses.len(),
                            self.limits.max_hybrid_bonuses
                        ),
                    ));
                }
                for entry in &hybrid.bonuses {
                    check_simple(&entry.bonus)?;
                    check_eligibility(&entry.condition)?;
                }
                Ok(())
            }
        }
    }

    fn check_table(&self, table: &TableFormula) -> LoyaltyResult<()> {
        if table.table.is_empty() {
            return Err(LoyaltyError::invalid(
                "points_formula.table",
                "must contain at least one range",
            ));
        }
        if table.table.len() > self.limits.max_table_rows {
            return Err(LoyaltyError::invalid(
                "points_formula.table",
                format!(
                    "{} ranges exceed the limit of {}",
                    table.table.len(),
                    self.limits.max_table_rows
                ),
            ));
        }
        for (i, row) in table.table.iter().enumerate() {
            if row.min < 0.0 {
                return Err(LoyaltyError::invalid(
                    "points_formula.table",
                    format!("range {} has a negative min", i),
                ));
            }
            check_fixed_points(row.points)?;
            if let Some(max) = row.max {
                if max <= row.min {
                    return Err(LoyaltyError::invalid(
                        "points_formula.table",
                        format!("range {} has max {} <= min {}", i, max, row.min),
                    ));
                }
            } else if i + 1 != table.table.len() {
                return Err(LoyaltyError::invalid(
                    "points_formula.table",
                    format!("unbounded range {} must be last", i),
                ));
            }
        }
        for (i, pair) in table.table.windows(2).enumerate() {
            if pair[1].min < pair[0].min {
                return Err(LoyaltyError::invalid(
                    "points_formula.table",
                    format!("ranges must be sorted by min ascending (range {})", i + 1),
                ));
            }
            // Safe to unwrap: only the last row may be unbounded.
            if pair[1].min < pair[0].max.unwrap_or(f64::INFINITY) {
                return Err(LoyaltyError::invalid(
                    "points_formula.table",
                    format!("ranges {} and {} overlap", i, i + 1),
                ));
            }
        }
        Ok(())
    }

    /// Invariant: within one program and conflict group, at most one active
    /// EXCLUSIVE rule may share a trigger. Only consulted when the candidate
    /// itself is active.
    fn check_exclusive_collision(&self, rule: &RewardRule) -> LoyaltyResult<()> {
        if !rule.is_active(Utc::now()) {
            return Ok(());
        }
        let existing = self
            .repository
            .find_active_by_program_and_group(rule.program_id, &rule.conflict.conflict_group);
        let conflicting: Vec<&RewardRule> = existing
            .iter()
            .filter(|r| r.id != rule.id && r.trigger == rule.trigger)
            .collect();

        let both_exclusive = rule.conflict.stack_policy == StackPolicy::Exclusive
            && conflicting
                .iter()
                .any(|r| r.conflict.stack_policy == StackPolicy::Exclusive);
        if !conflicting.is_empty() && both_exclusive {
            return Err(LoyaltyError::Conflict {
                conflict_group: rule.conflict.conflict_group.clone(),
                rule_ids: conflicting.iter().map(|r| r.id).collect(),
            });
        }
        Ok(())
    }

    /// A rule may not be deleted while active — deactivate first. Unknown
    /// ids are a not-found error.
    pub fn validate_deletion(&self, rule_id: RuleId) -> LoyaltyResult<()> {
        let rule = self
            .repository
            .find_by_id(rule_id)
            .ok_or(LoyaltyError::NotFound {
                entity: "reward rule",
                id: rule_id,
            })?;
        if rule.is_active(Utc::now()) {
            return Err(LoyaltyError::invalid(
                "status",
                format!("cannot delete active rule {}; deactivate it first", rule_id),
            ));
        }
        Ok(())
    }
}

fn check_window(rule: &RewardRule) -> LoyaltyResult<()> {
    if let (Some(from), Some(to)) = (rule.active_from, rule.active_to) {
        if from >= to {
            return Err(LoyaltyError::invalid(
                "active_from",
                format!("must be before active_to ({} >= {})", from, to),
            ));
        }
    }
    Ok(())
}

fn check_bucket_timezone(rule: &RewardRule) -> LoyaltyResult<()> {
    let day_bucketed = rule.idempotency_scope.strategy == IdempotencyStrategy::PerDay;
    let daily_limited = rule.limits.frequency == Some(Frequency::Daily)
        || rule.limits.cooldown_hours.map_or(false, |h| h > 0);
    let timezone_missing = rule
        .idempotency_scope
        .bucket_timezone
        .as_deref()
        .map_or(true, |tz| tz.trim().is_empty());
    if day_bucketed && daily_limited && timezone_missing {
        return Err(LoyaltyError::invalid(
            "idempotency_scope.bucket_timezone",
            "required for per-day scopes combined with a daily frequency limit or cooldown",
        ));
    }
    Ok(())
}

fn check_fixed_points(points: i64) -> LoyaltyResult<()> {
    if points < 0 {
        return Err(LoyaltyError::invalid(
            "points_formula.points",
            format!("must be non-negative, got {}", points),
        ));
    }
    Ok(())
}

fn check_rate(rate: &RateFormula) -> LoyaltyResult<()> {
    if !rate.rate.is_finite() || rate.rate < 0.0 {
        return Err(LoyaltyError::invalid(
            "points_formula.rate",
            format!("must be a non-negative number, got {}", rate.rate),
        ));
    }
    if let (Some(min), Some(max)) = (rate.min_points, rate.max_points) {
        if min > max {
            return Err(LoyaltyError::invalid(
                "points_formula.min_points",
                format!("{} exceeds max_points {}", min, max),
            ));
        }
    }
    Ok(())
}

fn check_simple(formula: &SimpleFormula) -> LoyaltyResult<()> {
    match formula {
        SimpleFormula::Fixed(fixed) => check_fixed_points(fixed.points),
        SimpleFormula::Rate(rate) => check_rate(rate),
    }
}

fn check_eligibility(conditions: &EligibilityConditions) -> LoyaltyResult<()> {
    if let (Some(min), Some(max)) = (conditions.min_tier_rank, conditions.max_tier_rank) {
        if min > max {
            return Err(LoyaltyError::invalid(
                "eligibility.min_tier_rank",
                format!("{} exceeds max_tier_rank {}", min, max),
            ));
        }
    }
    if let (Some(min), Some(max)) = (conditions.min_amount, conditions.max_amount) {
        if min > max {
            return Err(LoyaltyError::invalid(
                "eligibility.min_amount",
                format!("{} exceeds max_amount {}", min, max),
            ));
        }
    }
    if let Some(days) = &conditions.day_of_week {
        if days.iter().any(|d| *d > 6) {
            return Err(LoyaltyError::invalid(
                "eligibility.day_of_week",
                "weekdays must be in 0–6 (Sunday-based)",
            ));
        }
    }
    if let Some(range) = &conditions.time_range {
        let start = parse_hhmm(&range.start).ok_or_else(|| {
            LoyaltyError::invalid(
                "eligibility.time_range.start",
                format!("'{}' is not a valid HH:mm time", range.start),
            )
        })?;
        let end = parse_hhmm(&range.end).ok_or_else(|| {
            LoyaltyError::invalid(
                "eligibility.time_range.end",
                format!("'{}' is not a valid HH:mm time", range.end),
            )
        })?;
        if start > end {
            return Err(LoyaltyError::invalid(
                "eligibility.time_range",
                "must not cross midnight",
            ));
        }
    }
    Ok(())
}

/// CUSTOM-trigger rules must spell out their conflict behavior: a dedicated
/// conflict group (never the defaults) and, for per-period dedupe, an
/// explicit period length. Stack policy and idempotency strategy are
/// required fields of every rule, so their explicitness is structural.
fn check_custom_trigger(rule: &RewardRule) -> LoyaltyResult<()> {
    if rule.trigger != RuleTrigger::Custom {
        return Ok(());
    }
    let group = rule.conflict.conflict_group.trim();
    if RESERVED_GROUPS.contains(&group) {
        return Err(LoyaltyError::invalid(
            "conflict.conflict_group",
            "CUSTOM rules must declare a dedicated conflict group (not empty, DEFAULT, or CUSTOM)",
        ));
    }
    if rule.idempotency_scope.strategy == IdempotencyStrategy::PerPeriod
        && rule.idempotency_scope.period_days.map_or(true, |d| d == 0)
    {
        return Err(LoyaltyError::invalid(
            "idempotency_scope.period_days",
            "CUSTOM rules with a per-period scope must declare period_days",
        ));
    }
    Ok(())
}
