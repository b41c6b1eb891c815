//! The Reward Rule aggregate — an immutable, versioned snapshot combining
//! scope, eligibility, formula, limits, and conflict policy.
//!
//! Edits never mutate a rule in place: every change derives a new snapshot
//! with the same id and a bumped version, so the full history of a rule
//! stays auditable.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use loyalty_core::types::{
    BranchId, CategoryId, EventContext, MembershipContext, ProgramId, RuleId, StoreId, TenantId,
};

use crate::conflict::{ConflictSettings, IdempotencyScope, RuleAward};
use crate::eligibility::EligibilityConditions;
use crate::formula::PointsFormula;

/// Business-event family a rule reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RuleTrigger {
    Visit,
    Purchase,
    Referral,
    Subscription,
    Retention,
    Custom,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleStatus {
    Draft,
    Active,
    Inactive,
}

/// Binds a rule to a tenant/program and optionally narrows it to a store,
/// branch, channel, category, or SKU.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleScope {
    pub tenant_id: TenantId,
    pub program_id: ProgramId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store_id: Option<StoreId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch_id: Option<BranchId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category_id: Option<CategoryId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sku: Option<String>,
}

impl RuleScope {
    pub fn new(tenant_id: TenantId, program_id: ProgramId) -> Self {
        Self {
            tenant_id,
            program_id,
            store_id: None,
            branch_id: None,
            channel: None,
            category_id: None,
            sku: None,
        }
    }

    /// Whether an event falls inside this scope. Unset narrowing fields
    /// match everything.
    pub fn matches_event(&self, event: &EventContext) -> bool {
        if let Some(store_id) = self.store_id {
            if event.store_id != Some(store_id) {
                return false;
            }
        }
        if let Some(branch_id) = self.branch_id {
            if event.branch_id != Some(branch_id) {
                return false;
            }
        }
        if let Some(channel) = &self.channel {
            if event.channel.as_deref() != Some(channel.as_str()) {
                return false;
            }
        }
        if let Some(category_id) = self.category_id {
            if !event.category_ids.contains(&category_id) {
                return false;
            }
        }
        if let Some(sku) = &self.sku {
            if !event.skus.contains(sku) {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Frequency {
    PerEvent,
    Daily,
    Weekly,
    Monthly,
    PerPeriod,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeriodType {
    Rolling,
    Calendar,
}

/// Usage limits consumed by the executor; declared here, enforced there.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RewardRuleLimits {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency: Option<Frequency>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cooldown_hours: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub per_event_cap: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub per_period_cap: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub period_type: Option<PeriodType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub period_days: Option<u32>,
}

/// Partial field set overlaid onto an existing rule by [`RewardRule::new_version`].
/// `None` keeps the original value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuleUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub trigger: Option<RuleTrigger>,
    pub scope: Option<RuleScope>,
    pub eligibility: Option<EligibilityConditions>,
    pub points_formula: Option<PointsFormula>,
    pub limits: Option<RewardRuleLimits>,
    pub conflict: Option<ConflictSettings>,
    pub idempotency_scope: Option<IdempotencyScope>,
    pub earning_domain: Option<String>,
}

/// One immutable version of a reward rule. `id = 0` marks a rule that has
/// not been persisted yet; the repository assigns ids on first save.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RewardRule {
    pub id: RuleId,
    pub program_id: ProgramId,
    pub name: String,
    pub description: Option<String>,
    pub trigger: RuleTrigger,
    pub scope: RuleScope,
    pub eligibility: EligibilityConditions,
    pub points_formula: PointsFormula,
    pub limits: RewardRuleLimits,
    pub conflict: ConflictSettings,
    pub idempotency_scope: IdempotencyScope,
    /// Catalog-constrained classification of the award's economic nature.
    pub earning_domain: String,
    pub status: RuleStatus,
    pub version: u32,
    pub active_from: Option<DateTime<Utc>>,
    pub active_to: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Legal status transitions. A rule may be parked back to draft only while
/// active; an inactive rule must be reactivated first.
const TRANSITIONS: &[(RuleStatus, RuleStatus)] = &[
    (RuleStatus::Draft, RuleStatus::Active),
    (RuleStatus::Active, RuleStatus::Inactive),
    (RuleStatus::Inactive, RuleStatus::Active),
    (RuleStatus::Active, RuleStatus::Draft),
];

pub fn can_transition(from: RuleStatus, to: RuleStatus) -> bool {
    from == to || TRANSITIONS.iter().any(|&(f, t)| f == from && t == to)
}

impl RewardRule {
    /// Assemble a fresh rule at version 1. Validation is the
    /// [`crate::validator::RuleValidator`]'s job — construction never fails.
    #[allow(clippy::too_many_arguments)]
    pub fn create(
        program_id: ProgramId,
        name: String,
        description: Option<String>,
        trigger: RuleTrigger,
        scope: RuleScope,
        eligibility: EligibilityConditions,
        points_formula: PointsFormula,
        limits: RewardRuleLimits,
        conflict: ConflictSettings,
        idempotency_scope: IdempotencyScope,
        earning_domain: String,
        status: RuleStatus,
        active_from: Option<DateTime<Utc>>,
        active_to: Option<DateTime<Utc>>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            program_id,
            name,
            description,
            trigger,
            scope,
            eligibility,
            points_formula,
            limits,
            conflict,
            idempotency_scope,
            earning_domain,
            status,
            version: 1,
            active_from,
            active_to,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether the rule is live at `now`: status active and `now` inside the
    /// activation window (inclusive bounds, unbounded sides open).
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        if self.status != RuleStatus::Active {
            return false;
        }
        if let Some(from) = self.active_from {
            if now < from {
                return false;
            }
        }
        if let Some(to) = self.active_to {
            if now > to {
                return false;
            }
        }
        true
    }

    /// Derive the next version: same id, `version + 1`, fields overlaid from
    /// the partial update, everything else carried over bit-for-bit.
    pub fn new_version(&self, updates: RuleUpdate) -> Self {
        Self {
            id: self.id,
            program_id: self.program_id,
            name: updates.name.unwrap_or_else(|| self.name.clone()),
            description: updates.description.or_else(|| self.description.clone()),
            trigger: updates.trigger.unwrap_or(self.trigger),
            scope: updates.scope.unwrap_or_else(|| self.scope.clone()),
            eligibility: updates
                .eligibility
                .unwrap_or_else(|| self.eligibility.clone()),
            points_formula: updates
                .points_formula
                .unwrap_or_else(|| self.points_formula.clone()),
            limits: updates.limits.unwrap_or_else(|| self.limits.clone()),
            conflict: updates.conflict.unwrap_or_else(|| self.conflict.clone()),
            idempotency_scope: updates
                .idempotency_scope
                .unwrap_or_else(|| self.idempotency_scope.clone()),
            earning_domain: updates
                .earning_domain
                .unwrap_or_else(|| self.earning_domain.clone()),
            status: self.status,
            version: self.version + 1,
            active_from: self.active_from,
            active_to: self.active_to,
            created_at: self.created_at,
            updated_at: Utc::now(),
        }
    }

    /// Status-transition constructor: returns an active copy. The window
    /// opens at `active_from`, falling back to the existing bound or to now.
    pub fn activate(&self, active_from: Option<DateTime<Utc>>) -> Self {
        let now = Utc::now();
        Self {
            status: RuleStatus::Active,
            active_from: active_from.or(self.active_from).or(Some(now)),
            updated_at: now,
            ..self.clone()
        }
    }

    /// Status-transition constructor: returns an inactive copy with the
    /// activation window closed at now.
    pub fn deactivate(&self) -> Self {
        let now = Utc::now();
        Self {
            status: RuleStatus::Inactive,
            active_to: Some(now),
            updated_at: now,
            ..self.clone()
        }
    }

    /// Status-transition constructor: park the rule back in draft.
    pub fn into_draft(&self) -> Self {
        Self {
            status: RuleStatus::Draft,
            updated_at: Utc::now(),
            ..self.clone()
        }
    }

    /// Adjust the activation window without touching status.
    pub fn with_window(
        &self,
        active_from: Option<DateTime<Utc>>,
        active_to: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            active_from: active_from.or(self.active_from),
            active_to: active_to.or(self.active_to),
            updated_at: Utc::now(),
            ..self.clone()
        }
    }

    /// Authoring-time what-if: the points this rule would award for an
    /// event, or `None` when the rule is not live at the event time, the
    /// event falls outside its scope, or eligibility fails.
    pub fn preview_award(
        &self,
        event: &EventContext,
        membership: &MembershipContext,
    ) -> Option<i64> {
        if !self.is_active(event.occurred_at) {
            return None;
        }
        if !self.scope.matches_event(event) {
            return None;
        }
        if !self.eligibility.matches(event, membership) {
            return None;
        }
        Some(self.points_formula.evaluate(event, membership))
    }

    /// Package an evaluated point total as a candidate award for
    /// [`crate::conflict::resolve_conflicts`].
    pub fn award(&self, points: i64) -> RuleAward {
        RuleAward {
            rule_id: self.id,
            program_id: self.program_id,
            conflict_group: self.conflict.conflict_group.clone(),
            stack_policy: self.conflict.stack_policy,
            priority_rank: self.conflict.priority_rank,
            points,
            earning_domain: self.earning_domain.clone(),
            created_at: self.created_at,
            per_event_cap: self.limits.per_event_cap,
            max_awards_per_event: self.conflict.max_awards_per_event,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conflict::StackPolicy;
    use crate::formula::FixedFormula;
    use chrono::TimeZone;
    use loyalty_core::types::MembershipStatus;

    fn sample_rule() -> RewardRule {
        RewardRule::create(
            1,
            "Base purchase points".to_string(),
            None,
            RuleTrigger::Purchase,
            RuleScope::new(1, 1),
            EligibilityConditions::default(),
            PointsFormula::Fixed(FixedFormula { points: 10 }),
            RewardRuleLimits::default(),
            ConflictSettings {
                conflict_group: "CG_PURCHASE_BASE".to_string(),
                stack_policy: StackPolicy::Stack,
                priority_rank: 0,
                max_awards_per_event: None,
            },
            IdempotencyScope::default(),
            "BASE_PURCHASE".to_string(),
            RuleStatus::Draft,
            None,
            None,
        )
    }

    fn sample_event() -> EventContext {
        EventContext {
            tenant_id: 1,
            source_event_id: "ORDER-1".to_string(),
            occurred_at: Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap(),
            net_amount: 50.0,
            gross_amount: 56.0,
            item_count: 1,
            category_ids: vec![7],
            skus: vec!["SKU-1".to_string()],
            store_id: Some(3),
            branch_id: None,
            channel: Some("online".to_string()),
            metadata: Default::default(),
        }
    }

    fn sample_membership() -> MembershipContext {
        MembershipContext {
            membership_id: 100,
            status: MembershipStatus::Active,
            tier_rank: Some(1),
            joined_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            flags: vec![],
        }
    }

    #[test]
    fn test_create_starts_at_version_one() {
        let rule = sample_rule();
        assert_eq!(rule.version, 1);
        assert_eq!(rule.id, 0);
        assert_eq!(rule.status, RuleStatus::Draft);
    }

    #[test]
    fn test_new_version_bumps_and_preserves() {
        let mut rule = sample_rule();
        rule.id = 42;
        let next = rule.new_version(RuleUpdate {
            name: Some("Renamed".to_string()),
            ..Default::default()
        });

        assert_eq!(next.id, 42);
        assert_eq!(next.version, 2);
        assert_eq!(next.name, "Renamed");
        // Untouched fields carry over unchanged.
        assert_eq!(next.trigger, rule.trigger);
        assert_eq!(next.points_formula, rule.points_formula);
        assert_eq!(next.conflict, rule.conflict);
        assert_eq!(next.created_at, rule.created_at);
    }

    #[test]
    fn test_activate_opens_window() {
        let rule = sample_rule();
        let active = rule.activate(None);
        assert_eq!(active.status, RuleStatus::Active);
        assert!(active.active_from.is_some());

        let from = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
        let scheduled = rule.activate(Some(from));
        assert_eq!(scheduled.active_from, Some(from));
    }

    #[test]
    fn test_deactivate_closes_window() {
        let inactive = sample_rule().activate(None).deactivate();
        assert_eq!(inactive.status, RuleStatus::Inactive);
        assert!(inactive.active_to.is_some());
    }

    #[test]
    fn test_is_active_respects_window() {
        let mut rule = sample_rule();
        rule.status = RuleStatus::Active;
        rule.active_from = Some(Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap());
        rule.active_to = Some(Utc.with_ymd_and_hms(2025, 12, 31, 0, 0, 0).unwrap());

        assert!(rule.is_active(Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap()));
        // Inclusive bounds.
        assert!(rule.is_active(Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()));
        assert!(rule.is_active(Utc.with_ymd_and_hms(2025, 12, 31, 0, 0, 0).unwrap()));
        assert!(!rule.is_active(Utc.with_ymd_and_hms(2024, 12, 31, 0, 0, 0).unwrap()));
        assert!(!rule.is_active(Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()));
    }

    #[test]
    fn test_transition_table() {
        assert!(can_transition(RuleStatus::Draft, RuleStatus::Active));
        assert!(can_transition(RuleStatus::Active, RuleStatus::Inactive));
        assert!(can_transition(RuleStatus::Inactive, RuleStatus::Active));
        assert!(can_transition(RuleStatus::Active, RuleStatus::Draft));
        assert!(!can_transition(RuleStatus::Inactive, RuleStatus::Draft));
        assert!(!can_transition(RuleStatus::Draft, RuleStatus::Inactive));
    }

    #[test]
    fn test_scope_matching() {
        let mut scope = RuleScope::new(1, 1);
        assert!(scope.matches_event(&sample_event()));

        scope.store_id = Some(3);
        scope.channel = Some("online".to_string());
        assert!(scope.matches_event(&sample_event()));

        scope.store_id = Some(9);
        assert!(!scope.matches_event(&sample_event()));

        let mut sku_scope = RuleScope::new(1, 1);
        sku_scope.sku = Some("SKU-MISSING".to_string());
        assert!(!sku_scope.matches_event(&sample_event()));
    }

    #[test]
    fn test_preview_award() {
        let rule = sample_rule().activate(Some(
            Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
        ));
        assert_eq!(
            rule.preview_award(&sample_event(), &sample_membership()),
            Some(10)
        );

        // Draft rules never award.
        assert_eq!(
            sample_rule().preview_award(&sample_event(), &sample_membership()),
            None
        );

        // Out-of-scope events never award.
        let mut narrowed = rule.clone();
        narrowed.scope.branch_id = Some(99);
        assert_eq!(
            narrowed.preview_award(&sample_event(), &sample_membership()),
            None
        );
    }

    #[test]
    fn test_award_packaging() {
        let mut rule = sample_rule();
        rule.id = 7;
        rule.limits.per_event_cap = Some(100);
        let award = rule.award(42);
        assert_eq!(award.rule_id, 7);
        assert_eq!(award.points, 42);
        assert_eq!(award.per_event_cap, Some(100));
        assert_eq!(award.conflict_group, "CG_PURCHASE_BASE");
    }
}
