//! Repository and directory collaborators, with in-memory implementations
//! backed by DashMap.
//!
//! Production: replace with PostgreSQL (sqlx) or similar ACID store. The
//! in-memory store keeps the same API surface for development and testing.
//! The hard guarantee against concurrent EXCLUSIVE activations belongs to
//! the backing store — a uniqueness constraint over
//! `(program, conflict_group, trigger, EXCLUSIVE, active)`.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use dashmap::DashMap;
use tracing::{debug, info};

use loyalty_core::types::{ProgramId, RuleId, TenantId};

use crate::rule::{RewardRule, RuleTrigger};

/// Persistence surface the validator and authoring operations require.
pub trait RuleRepository: Send + Sync {
    fn find_by_id(&self, id: RuleId) -> Option<RewardRule>;

    /// Persist a rule snapshot, assigning an id to fresh rules (`id = 0`).
    /// Superseded versions of the same rule are retained for audit history.
    fn save(&self, rule: RewardRule) -> RewardRule;

    /// All currently-active rules in one program's conflict group.
    fn find_active_by_program_and_group(
        &self,
        program_id: ProgramId,
        conflict_group: &str,
    ) -> Vec<RewardRule>;

    /// All currently-active rules in a program matching a trigger.
    fn find_active_by_program_and_trigger(
        &self,
        program_id: ProgramId,
        trigger: RuleTrigger,
    ) -> Vec<RewardRule>;
}

/// Existence checks for the tenants and programs rules reference.
pub trait ProgramDirectory: Send + Sync {
    fn tenant_exists(&self, tenant_id: TenantId) -> bool;
    fn find_program(&self, program_id: ProgramId) -> Option<ProgramRef>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgramRef {
    pub id: ProgramId,
    pub tenant_id: TenantId,
}

/// Thread-safe in-memory rule store with per-rule version history.
pub struct InMemoryRuleStore {
    rules: DashMap<RuleId, RewardRule>,
    history: DashMap<RuleId, Vec<RewardRule>>,
    next_id: AtomicU64,
}

impl InMemoryRuleStore {
    pub fn new() -> Self {
        info!("Rule store initialized (in-memory, development mode)");
        Self {
            rules: DashMap::new(),
            history: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Superseded snapshots of a rule, oldest first.
    pub fn history(&self, id: RuleId) -> Vec<RewardRule> {
        self.history.get(&id).map(|h| h.clone()).unwrap_or_default()
    }

    pub fn list(&self) -> Vec<RewardRule> {
        let mut rules: Vec<RewardRule> = self.rules.iter().map(|r| r.value().clone()).collect();
        rules.sort_by_key(|r| r.id);
        rules
    }

    /// Remove a rule and its history. Callers run
    /// [`crate::validator::RuleValidator::validate_deletion`] first.
    pub fn delete(&self, id: RuleId) -> Option<RewardRule> {
        self.history.remove(&id);
        self.rules.remove(&id).map(|(_, rule)| rule)
    }
}

impl Default for InMemoryRuleStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RuleRepository for InMemoryRuleStore {
    fn find_by_id(&self, id: RuleId) -> Option<RewardRule> {
        self.rules.get(&id).map(|r| r.value().clone())
    }

    fn save(&self, mut rule: RewardRule) -> RewardRule {
        if rule.id == 0 {
            rule.id = self.next_id.fetch_add(1, Ordering::SeqCst);
        }
        if let Some(previous) = self.rules.get(&rule.id).map(|r| r.value().clone()) {
            self.history.entry(rule.id).or_default().push(previous);
        }
        debug!(
            rule_id = rule.id,
            version = rule.version,
            status = ?rule.status,
            "Rule saved"
        );
        self.rules.insert(rule.id, rule.clone());
        rule
    }

    fn find_active_by_program_and_group(
        &self,
        program_id: ProgramId,
        conflict_group: &str,
    ) -> Vec<RewardRule> {
        let now = Utc::now();
        self.rules
            .iter()
            .filter(|r| {
                let rule = r.value();
                rule.program_id == program_id
                    && rule.conflict.conflict_group == conflict_group
                    && rule.is_active(now)
            })
            .map(|r| r.value().clone())
            .collect()
    }

    fn find_active_by_program_and_trigger(
        &self,
        program_id: ProgramId,
        trigger: RuleTrigger,
    ) -> Vec<RewardRule> {
        let now = Utc::now();
        self.rules
            .iter()
            .filter(|r| {
                let rule = r.value();
                rule.program_id == program_id && rule.trigger == trigger && rule.is_active(now)
            })
            .map(|r| r.value().clone())
            .collect()
    }
}

/// In-memory tenant/program directory for development and tests.
pub struct InMemoryProgramDirectory {
    tenants: DashMap<TenantId, ()>,
    programs: DashMap<ProgramId, ProgramRef>,
}

impl InMemoryProgramDirectory {
    pub fn new() -> Self {
        Self {
            tenants: DashMap::new(),
            programs: DashMap::new(),
        }
    }

    pub fn add_tenant(&self, tenant_id: TenantId) {
        self.tenants.insert(tenant_id, ());
    }

    pub fn add_program(&self, program_id: ProgramId, tenant_id: TenantId) {
        self.programs.insert(
            program_id,
            ProgramRef {
                id: program_id,
                tenant_id,
            },
        );
    }
}

impl Default for InMemoryProgramDirectory {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgramDirectory for InMemoryProgramDirectory {
    fn tenant_exists(&self, tenant_id: TenantId) -> bool {
        self.tenants.contains_key(&tenant_id)
    }

    fn find_program(&self, program_id: ProgramId) -> Option<ProgramRef> {
        self.programs.get(&program_id).map(|p| *p.value())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conflict::{ConflictSettings, IdempotencyScope, StackPolicy};
    use crate::eligibility::EligibilityConditions;
    use crate::formula::{FixedFormula, PointsFormula};
    use crate::rule::{RewardRuleLimits, RuleScope, RuleStatus};

    fn draft_rule(program_id: ProgramId, group: &str) -> RewardRule {
        RewardRule::create(
            program_id,
            "Visit points".to_string(),
            None,
            RuleTrigger::Visit,
            RuleScope::new(1, program_id),
            EligibilityConditions::default(),
            PointsFormula::Fixed(FixedFormula { points: 5 }),
            RewardRuleLimits::default(),
            ConflictSettings {
                conflict_group: group.to_string(),
                stack_policy: StackPolicy::Stack,
                priority_rank: 0,
                max_awards_per_event: None,
            },
            IdempotencyScope::default(),
            "BASE_VISIT".to_string(),
            RuleStatus::Draft,
            None,
            None,
        )
    }

    #[test]
    fn test_save_assigns_ids() {
        let store = InMemoryRuleStore::new();
        let a = store.save(draft_rule(1, "CG_VISIT_DAILY"));
        let b = store.save(draft_rule(1, "CG_VISIT_DAILY"));
        assert_eq!(a.id, 1);
        assert_eq!(b.id, 2);
        assert_eq!(store.find_by_id(1).unwrap().id, 1);
    }

    #[test]
    fn test_save_retains_history() {
        let store = InMemoryRuleStore::new();
        let v1 = store.save(draft_rule(1, "CG_VISIT_DAILY"));
        let v2 = store.save(v1.new_version(Default::default()));
        let v3 = store.save(v2.new_version(Default::default()));
        assert_eq!(v3.version, 3);

        let history = store.history(v1.id);
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].version, 1);
        assert_eq!(history[1].version, 2);
        assert_eq!(store.find_by_id(v1.id).unwrap().version, 3);
    }

    #[test]
    fn test_find_active_filters_status_program_and_group() {
        let store = InMemoryRuleStore::new();
        store.save(draft_rule(1, "CG_VISIT_DAILY").activate(None));
        store.save(draft_rule(1, "CG_VISIT_DAILY")); // draft, excluded
        store.save(draft_rule(2, "CG_VISIT_DAILY").activate(None)); // other program
        store.save(draft_rule(1, "CG_PURCHASE_BASE").activate(None)); // other group

        let active = store.find_active_by_program_and_group(1, "CG_VISIT_DAILY");
        assert_eq!(active.len(), 1);

        let by_trigger = store.find_active_by_program_and_trigger(1, RuleTrigger::Visit);
        assert_eq!(by_trigger.len(), 2);
    }

    #[test]
    fn test_delete_removes_rule_and_history() {
        let store = InMemoryRuleStore::new();
        let rule = store.save(draft_rule(1, "CG_VISIT_DAILY"));
        store.save(rule.new_version(Default::default()));
        assert!(store.delete(rule.id).is_some());
        assert!(store.find_by_id(rule.id).is_none());
        assert!(store.history(rule.id).is_empty());
    }

    #[test]
    fn test_program_directory() {
        let directory = InMemoryProgramDirectory::new();
        directory.add_tenant(1);
        directory.add_program(10, 1);

        assert!(directory.tenant_exists(1));
        assert!(!directory.tenant_exists(2));
        assert_eq!(directory.find_program(10).unwrap().tenant_id, 1);
        assert!(directory.find_program(99).is_none());
    }
}
