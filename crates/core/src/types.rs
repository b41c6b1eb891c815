//! Shared identifier and context types used across the loyalty crates.
//!
//! Identifiers are numeric — they come from the platform's relational
//! store, not generated in-process.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type TenantId = u64;
pub type ProgramId = u64;
pub type RuleId = u64;
pub type StoreId = u64;
pub type BranchId = u64;
pub type CategoryId = u64;
pub type MembershipId = u64;

/// A normalized business event, as handed to the pure evaluators.
///
/// Field population depends on the event family: purchases carry amounts and
/// line-item data, visits carry store/branch context, custom events lean on
/// `metadata`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventContext {
    pub tenant_id: TenantId,
    /// Upstream identifier of the business event (order id, visit id, ...).
    pub source_event_id: String,
    pub occurred_at: DateTime<Utc>,
    #[serde(default)]
    pub net_amount: f64,
    #[serde(default)]
    pub gross_amount: f64,
    #[serde(default)]
    pub item_count: u32,
    #[serde(default)]
    pub category_ids: Vec<CategoryId>,
    #[serde(default)]
    pub skus: Vec<String>,
    #[serde(default)]
    pub store_id: Option<StoreId>,
    #[serde(default)]
    pub branch_id: Option<BranchId>,
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

/// Membership state at evaluation time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MembershipContext {
    pub membership_id: MembershipId,
    pub status: MembershipStatus,
    /// Rank of the member's current tier, higher = better. `None` when the
    /// member has no tier assigned yet.
    pub tier_rank: Option<u32>,
    pub joined_at: DateTime<Utc>,
    #[serde(default)]
    pub flags: Vec<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MembershipStatus {
    Active,
    Inactive,
}

impl MembershipContext {
    /// Whole days since the membership was created, relative to `now`.
    pub fn age_days(&self, now: DateTime<Utc>) -> i64 {
        (now - self.joined_at).num_days()
    }
}
