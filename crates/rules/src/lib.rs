//! Reward Rule engine — the rule-definition core of the loyalty platform.
//!
//! Models how a membership earns points from a business event (visit,
//! purchase, referral, subscription milestone, custom trigger): award
//! formulas, eligibility predicates, usage limits, conflict resolution
//! policy, and the anti-chaos validator that gates every rule before it may
//! be persisted or activated. The live event executor and the HTTP surface
//! live elsewhere; this crate is the contract they build on.

pub mod authoring;
pub mod catalog;
pub mod conflict;
pub mod eligibility;
pub mod formula;
pub mod rule;
pub mod store;
pub mod validator;

pub use authoring::{CreateRuleInput, RuleAuthoring, RuleUpdate, UpdateRuleInput};
pub use catalog::{RuleCatalog, StaticCatalog};
pub use conflict::{
    resolve_conflicts, ConflictSettings, IdempotencyScope, IdempotencyStrategy, RuleAward,
    StackPolicy,
};
pub use eligibility::{EligibilityConditions, TimeRange};
pub use formula::{
    AmountField, BonusEntry, FixedFormula, HybridFormula, PointsFormula, RateFormula,
    RoundingPolicy, SimpleFormula, TableFormula, TableRow,
};
pub use rule::{
    can_transition, Frequency, PeriodType, RewardRule, RewardRuleLimits, RuleScope, RuleStatus,
    RuleTrigger,
};
pub use store::{
    InMemoryProgramDirectory, InMemoryRuleStore, ProgramDirectory, ProgramRef, RuleRepository,
};
pub use validator::{RuleValidator, ValidatorLimits};
