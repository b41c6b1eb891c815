//! Rule authoring operations: create, version, and deletion pre-checks.
//!
//! Every operation assembles a full candidate snapshot, runs it through the
//! validator, and only then hands it to the repository. There is no partial
//! application: a rule is stored exactly as validated or not at all.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use loyalty_core::error::{LoyaltyError, LoyaltyResult};
use loyalty_core::types::{ProgramId, RuleId, TenantId};

use crate::catalog::RuleCatalog;
use crate::conflict::{ConflictSettings, IdempotencyScope};
use crate::eligibility::EligibilityConditions;
use crate::formula::PointsFormula;
use crate::rule::{
    can_transition, RewardRule, RewardRuleLimits, RuleScope, RuleStatus, RuleTrigger,
};
pub use crate::rule::RuleUpdate;
use crate::store::{ProgramDirectory, RuleRepository};
use crate::validator::{RuleValidator, ValidatorLimits};

/// Caller input for a new rule. Omitted conflict/idempotency settings fall
/// back to platform defaults (the `DEFAULT` group, `STACK`, executor-default
/// dedupe) — which the validator will reject for CUSTOM triggers, forcing
/// those to be spelled out.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateRuleInput {
    pub tenant_id: TenantId,
    pub program_id: ProgramId,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub trigger: RuleTrigger,
    #[serde(default)]
    pub scope: Option<RuleScope>,
    #[serde(default)]
    pub eligibility: EligibilityConditions,
    pub points_formula: PointsFormula,
    #[serde(default)]
    pub limits: RewardRuleLimits,
    #[serde(default)]
    pub conflict: Option<ConflictSettings>,
    #[serde(default)]
    pub idempotency_scope: Option<IdempotencyScope>,
    pub earning_domain: String,
    /// Requested initial status; defaults to draft. Requesting `active`
    /// activates the rule immediately (window opening at `active_from`).
    #[serde(default)]
    pub status: Option<RuleStatus>,
    #[serde(default)]
    pub active_from: Option<DateTime<Utc>>,
    #[serde(default)]
    pub active_to: Option<DateTime<Utc>>,
}

/// Caller input for editing an existing rule: a partial field overlay plus
/// optional status/window changes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateRuleInput {
    pub tenant_id: TenantId,
    pub program_id: ProgramId,
    #[serde(default)]
    pub update: RuleUpdate,
    #[serde(default)]
    pub status: Option<RuleStatus>,
    #[serde(default)]
    pub active_from: Option<DateTime<Utc>>,
    #[serde(default)]
    pub active_to: Option<DateTime<Utc>>,
}

/// Authoring facade over the repository, directory, catalog, and validator.
pub struct RuleAuthoring {
    repository: Arc<dyn RuleRepository>,
    directory: Arc<dyn ProgramDirectory>,
    validator: RuleValidator,
}

impl RuleAuthoring {
    pub fn new(
        repository: Arc<dyn RuleRepository>,
        directory: Arc<dyn ProgramDirectory>,
        catalog: Arc<dyn RuleCatalog>,
    ) -> Self {
        let validator = RuleValidator::new(repository.clone(), catalog);
        Self {
            repository,
            directory,
            validator,
        }
    }

    pub fn with_validator_limits(mut self, limits: ValidatorLimits) -> Self {
        self.validator = self.validator.with_limits(limits);
        self
    }

    /// Build, validate, and persist a new rule at version 1.
    pub fn create_rule(&self, input: CreateRuleInput) -> LoyaltyResult<RewardRule> {
        self.check_ownership(input.tenant_id, input.program_id)?;

        let mut scope = input
            .scope
            .unwrap_or_else(|| RuleScope::new(input.tenant_id, input.program_id));
        scope.tenant_id = input.tenant_id;
        scope.program_id = input.program_id;

        let rule = RewardRule::create(
            input.program_id,
            input.name,
            input.description,
            input.trigger,
            scope,
            input.eligibility,
            input.points_formula,
            input.limits,
            input.conflict.unwrap_or_default(),
            input.idempotency_scope.unwrap_or_default(),
            input.earning_domain,
            RuleStatus::Draft,
            input.active_from,
            input.active_to,
        );

        let rule = match input.status.unwrap_or(RuleStatus::Draft) {
            RuleStatus::Draft => rule,
            RuleStatus::Active => rule.activate(input.active_from),
            RuleStatus::Inactive => {
                return Err(LoyaltyError::invalid(
                    "status",
                    "a new rule cannot be created inactive",
                ));
            }
        };

        self.validator.validate(&rule)?;
        let saved = self.repository.save(rule);

        metrics::counter!("rules.created").increment(1);
        info!(
            rule_id = saved.id,
            program_id = saved.program_id,
            trigger = ?saved.trigger,
            formula = saved.points_formula.kind(),
            status = ?saved.status,
            "Reward rule created"
        );
        Ok(saved)
    }

    /// Load an existing rule, derive the next version with the partial
    /// update overlaid, apply any status/window change, re-validate, and
    /// persist. The superseded version stays in the repository's history.
    pub fn update_rule(&self, rule_id: RuleId, input: UpdateRuleInput) -> LoyaltyResult<RewardRule> {
        self.check_ownership(input.tenant_id, input.program_id)?;

        let existing = self
            .repository
            .find_by_id(rule_id)
            .ok_or(LoyaltyError::NotFound {
                entity: "reward rule",
                id: rule_id,
            })?;
        if existing.program_id != input.program_id {
            return Err(LoyaltyError::NotFound {
                entity: "reward rule",
                id: rule_id,
            });
        }

        let mut next = existing.new_version(input.update);

        match input.status {
            Some(target) if target != existing.status => {
                if !can_transition(existing.status, target) {
                    return Err(LoyaltyError::invalid(
                        "status",
                        format!(
                            "illegal transition {:?} -> {:?}",
                            existing.status, target
                        ),
                    ));
                }
                next = match target {
                    RuleStatus::Active => next.activate(input.active_from),
                    RuleStatus::Inactive => next.deactivate(),
                    RuleStatus::Draft => next.into_draft(),
                };
                if input.active_to.is_some() || (target != RuleStatus::Active && input.active_from.is_some()) {
                    let from = if target == RuleStatus::Active {
                        None
                    } else {
                        input.active_from
                    };
                    next = next.with_window(from, input.active_to);
                }
            }
            _ => {
                if input.active_from.is_some() || input.active_to.is_some() {
                    next = next.with_window(input.active_from, input.active_to);
                }
            }
        }

        self.validator.validate(&next)?;
        let saved = self.repository.save(next);

        metrics::counter!("rules.versioned").increment(1);
        info!(
            rule_id = saved.id,
            version = saved.version,
            status = ?saved.status,
            "Reward rule updated"
        );
        Ok(saved)
    }

    /// Read-only precondition check for deleting a rule.
    pub fn validate_rule_deletion(&self, rule_id: RuleId) -> LoyaltyResult<()> {
        self.validator.validate_deletion(rule_id)
    }

    fn check_ownership(&self, tenant_id: TenantId, program_id: ProgramId) -> LoyaltyResult<()> {
        if !self.directory.tenant_exists(tenant_id) {
            return Err(LoyaltyError::NotFound {
                entity: "tenant",
                id: tenant_id,
            });
        }
        let program = self
            .directory
            .find_program(program_id)
            .ok_or(LoyaltyError::NotFound {
                entity: "loyalty program",
                id: program_id,
            })?;
        if program.tenant_id != tenant_id {
            return Err(LoyaltyError::NotFound {
                entity: "loyalty program",
                id: program_id,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::StaticCatalog;
    use crate::conflict::StackPolicy;
    use crate::formula::{FixedFormula, PointsFormula};
    use crate::store::{InMemoryProgramDirectory, InMemoryRuleStore};

    fn authoring() -> (Arc<InMemoryRuleStore>, RuleAuthoring) {
        let store = Arc::new(InMemoryRuleStore::new());
        let directory = Arc::new(InMemoryProgramDirectory::new());
        directory.add_tenant(1);
        directory.add_program(1, 1);
        let catalog = Arc::new(StaticCatalog::new());
        let service = RuleAuthoring::new(store.clone(), directory, catalog);
        (store, service)
    }

    fn visit_input() -> CreateRuleInput {
        CreateRuleInput {
            tenant_id: 1,
            program_id: 1,
            name: "Daily visit".to_string(),
            description: None,
            trigger: RuleTrigger::Visit,
            scope: None,
            eligibility: EligibilityConditions::default(),
            points_formula: PointsFormula::Fixed(FixedFormula { points: 10 }),
            limits: RewardRuleLimits::default(),
            conflict: Some(ConflictSettings {
                conflict_group: "CG_VISIT_DAILY".to_string(),
                stack_policy: StackPolicy::Exclusive,
                priority_rank: 5,
                max_awards_per_event: None,
            }),
            idempotency_scope: None,
            earning_domain: "BASE_VISIT".to_string(),
            status: None,
            active_from: None,
            active_to: None,
        }
    }

    #[test]
    fn test_create_rule_persists_draft() {
        let (store, service) = authoring();
        let rule = service.create_rule(visit_input()).unwrap();
        assert_eq!(rule.version, 1);
        assert_eq!(rule.status, RuleStatus::Draft);
        assert!(rule.id > 0);
        assert_eq!(store.find_by_id(rule.id).unwrap(), rule);
    }

    #[test]
    fn test_create_rule_requested_active() {
        let (_, service) = authoring();
        let mut input = visit_input();
        input.status = Some(RuleStatus::Active);
        let rule = service.create_rule(input).unwrap();
        assert_eq!(rule.status, RuleStatus::Active);
        assert!(rule.active_from.is_some());
    }

    #[test]
    fn test_create_rule_unknown_tenant_or_program() {
        let (_, service) = authoring();

        let mut input = visit_input();
        input.tenant_id = 9;
        assert!(matches!(
            service.create_rule(input),
            Err(LoyaltyError::NotFound { entity: "tenant", .. })
        ));

        let mut input = visit_input();
        input.program_id = 9;
        assert!(matches!(
            service.create_rule(input),
            Err(LoyaltyError::NotFound {
                entity: "loyalty program",
                ..
            })
        ));
    }

    #[test]
    fn test_create_custom_rule_needs_explicit_conflict() {
        let (_, service) = authoring();
        let mut input = visit_input();
        input.trigger = RuleTrigger::Custom;
        input.earning_domain = "BASE_RETENTION".to_string();
        // No conflict settings: the DEFAULT fallback is rejected for CUSTOM.
        input.conflict = None;
        assert!(matches!(
            service.create_rule(input.clone()),
            Err(LoyaltyError::InvalidInput {
                field: "conflict.conflict_group",
                ..
            })
        ));

        input.conflict = Some(ConflictSettings {
            conflict_group: "CG_RETENTION_WINDOW".to_string(),
            stack_policy: StackPolicy::BestOf,
            priority_rank: 0,
            max_awards_per_event: None,
        });
        assert!(service.create_rule(input).is_ok());
    }

    #[test]
    fn test_update_rule_bumps_version_and_keeps_history() {
        let (store, service) = authoring();
        let created = service.create_rule(visit_input()).unwrap();

        let updated = service
            .update_rule(
                created.id,
                UpdateRuleInput {
                    tenant_id: 1,
                    program_id: 1,
                    update: RuleUpdate {
                        name: Some("Daily visit v2".to_string()),
                        ..Default::default()
                    },
                    ..Default::default()
                },
            )
            .unwrap();

        assert_eq!(updated.id, created.id);
        assert_eq!(updated.version, 2);
        assert_eq!(updated.name, "Daily visit v2");
        assert_eq!(updated.points_formula, created.points_formula);

        let history = store.history(created.id);
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].version, 1);
    }

    #[test]
    fn test_update_rule_activates_and_deactivates() {
        let (_, service) = authoring();
        let created = service.create_rule(visit_input()).unwrap();

        let activated = service
            .update_rule(
                created.id,
                UpdateRuleInput {
                    tenant_id: 1,
                    program_id: 1,
                    status: Some(RuleStatus::Active),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(activated.status, RuleStatus::Active);

        let deactivated = service
            .update_rule(
                created.id,
                UpdateRuleInput {
                    tenant_id: 1,
                    program_id: 1,
                    status: Some(RuleStatus::Inactive),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(deactivated.status, RuleStatus::Inactive);
        assert!(deactivated.active_to.is_some());
    }

    #[test]
    fn test_update_rejects_illegal_transition() {
        let (_, service) = authoring();
        let created = service.create_rule(visit_input()).unwrap();

        service
            .update_rule(
                created.id,
                UpdateRuleInput {
                    tenant_id: 1,
                    program_id: 1,
                    status: Some(RuleStatus::Active),
                    ..Default::default()
                },
            )
            .unwrap();
        service
            .update_rule(
                created.id,
                UpdateRuleInput {
                    tenant_id: 1,
                    program_id: 1,
                    status: Some(RuleStatus::Inactive),
                    ..Default::default()
                },
            )
            .unwrap();

        // Inactive rules cannot be parked in draft.
        assert!(matches!(
            service.update_rule(
                created.id,
                UpdateRuleInput {
                    tenant_id: 1,
                    program_id: 1,
                    status: Some(RuleStatus::Draft),
                    ..Default::default()
                },
            ),
            Err(LoyaltyError::InvalidInput { field: "status", .. })
        ));
    }

    #[test]
    fn test_second_exclusive_activation_conflicts() {
        let (_, service) = authoring();

        let mut first = visit_input();
        first.status = Some(RuleStatus::Active);
        let first = service.create_rule(first).unwrap();

        let mut second = visit_input();
        second.status = Some(RuleStatus::Active);
        match service.create_rule(second) {
            Err(LoyaltyError::Conflict { rule_ids, .. }) => {
                assert_eq!(rule_ids, vec![first.id]);
            }
            other => panic!("expected Conflict, got {:?}", other),
        }

        // The same second rule under STACK succeeds.
        let mut stacked = visit_input();
        stacked.status = Some(RuleStatus::Active);
        stacked.conflict.as_mut().unwrap().stack_policy = StackPolicy::Stack;
        assert!(service.create_rule(stacked).is_ok());
    }

    #[test]
    fn test_deletion_flow() {
        let (_, service) = authoring();
        let mut input = visit_input();
        input.status = Some(RuleStatus::Active);
        let rule = service.create_rule(input).unwrap();

        assert!(service.validate_rule_deletion(rule.id).is_err());

        service
            .update_rule(
                rule.id,
                UpdateRuleInput {
                    tenant_id: 1,
                    program_id: 1,
                    status: Some(RuleStatus::Inactive),
                    ..Default::default()
                },
            )
            .unwrap();
        assert!(service.validate_rule_deletion(rule.id).is_ok());
    }

    #[test]
    fn test_update_window_without_status_change() {
        let (_, service) = authoring();
        let created = service.create_rule(visit_input()).unwrap();
        let until = Utc::now() + chrono::Duration::days(30);

        let updated = service
            .update_rule(
                created.id,
                UpdateRuleInput {
                    tenant_id: 1,
                    program_id: 1,
                    active_to: Some(until),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(updated.active_to, Some(until));
        assert_eq!(updated.status, RuleStatus::Draft);
    }
}
