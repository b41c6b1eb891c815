//! Catalog membership checks for earning domains, conflict groups, and
//! stack policies.
//!
//! The enumerations are maintained outside this crate; the validator only
//! needs membership predicates, injected so the catalogs can evolve without
//! touching rule logic.

use std::collections::HashSet;

use loyalty_core::config::CatalogConfig;

/// Pure membership tests against the platform catalogs.
pub trait RuleCatalog: Send + Sync {
    fn is_valid_earning_domain(&self, domain: &str) -> bool;
    fn is_valid_conflict_group(&self, group: &str) -> bool;
    fn is_valid_stack_policy(&self, policy: &str) -> bool;
}

/// Catalog backed by in-memory sets: the built-in platform enumerations
/// plus any extensions from configuration.
#[derive(Debug, Clone)]
pub struct StaticCatalog {
    earning_domains: HashSet<String>,
    conflict_groups: HashSet<String>,
}

const EARNING_DOMAINS: &[&str] = &[
    "BASE_PURCHASE",
    "BASE_VISIT",
    "BASE_REFERRAL",
    "BASE_SUBSCRIPTION",
    "BASE_RETENTION",
    "BONUS_CATEGORY",
    "BONUS_SKU",
];

const CONFLICT_GROUPS: &[&str] = &[
    "DEFAULT",
    "CG_PURCHASE_BASE",
    "CG_VISIT_DAILY",
    "CG_REFERRAL",
    "CG_SUBSCRIPTION_CYCLE",
    "CG_RETENTION_WINDOW",
];

const STACK_POLICIES: &[&str] = &["STACK", "EXCLUSIVE", "BEST_OF", "PRIORITY"];

impl StaticCatalog {
    pub fn new() -> Self {
        Self {
            earning_domains: EARNING_DOMAINS.iter().map(|s| s.to_string()).collect(),
            conflict_groups: CONFLICT_GROUPS.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Built-ins plus the tenant-configured extensions.
    pub fn from_config(config: &CatalogConfig) -> Self {
        let mut catalog = Self::new();
        catalog
            .earning_domains
            .extend(config.extra_earning_domains.iter().cloned());
        catalog
            .conflict_groups
            .extend(config.extra_conflict_groups.iter().cloned());
        catalog
    }
}

impl Default for StaticCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl RuleCatalog for StaticCatalog {
    fn is_valid_earning_domain(&self, domain: &str) -> bool {
        self.earning_domains.contains(domain)
    }

    fn is_valid_conflict_group(&self, group: &str) -> bool {
        self.conflict_groups.contains(group)
    }

    fn is_valid_stack_policy(&self, policy: &str) -> bool {
        STACK_POLICIES.contains(&policy)
    }
}
