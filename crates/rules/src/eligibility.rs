//! Eligibility conditions — the declarative predicate a membership/event
//! pair must satisfy before a rule can award points.
//!
//! All fields are optional and combined with AND; an unset field is
//! vacuously true.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use loyalty_core::types::{CategoryId, EventContext, MembershipContext};

/// Inclusive local time-of-day window, `HH:mm` on both ends.
///
/// Ranges never wrap across midnight — a `start` later than `end` is an
/// authoring error caught by the validator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: String,
    pub end: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EligibilityConditions {
    // Membership conditions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_tier_rank: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tier_rank: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub membership_status: Option<Vec<loyalty_core::types::MembershipStatus>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_membership_age_days: Option<u32>,
    /// Membership must carry every listed flag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flags: Option<Vec<String>>,

    // Event conditions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_amount: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_amount: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_items: Option<u32>,
    /// Event must touch at least one listed category.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category_ids: Option<Vec<CategoryId>>,
    /// Event must touch at least one listed SKU.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skus: Option<Vec<String>>,

    // Date/time conditions
    /// Weekdays 0–6, Sunday-based.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub day_of_week: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_range: Option<TimeRange>,

    /// Opaque key/value conditions owned by an external evaluator. Carried
    /// and serialized, never interpreted here.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, serde_json::Value>>,
}

impl EligibilityConditions {
    /// Evaluate the predicate against an event and the membership it belongs
    /// to. Membership age is measured at the event's `occurred_at`.
    pub fn matches(&self, event: &EventContext, membership: &MembershipContext) -> bool {
        if let Some(statuses) = &self.membership_status {
            if !statuses.contains(&membership.status) {
                return false;
            }
        }

        if let Some(min) = self.min_tier_rank {
            match membership.tier_rank {
                Some(rank) if rank >= min => {}
                _ => return false,
            }
        }
        if let Some(max) = self.max_tier_rank {
            if let Some(rank) = membership.tier_rank {
                if rank > max {
                    return false;
                }
            }
        }

        if let Some(min_age) = self.min_membership_age_days {
            if membership.age_days(event.occurred_at) < min_age as i64 {
                return false;
            }
        }

        if let Some(flags) = &self.flags {
            if !flags.iter().all(|f| membership.flags.contains(f)) {
                return false;
            }
        }

        if let Some(min) = self.min_amount {
            if event.net_amount < min {
                return false;
            }
        }
        if let Some(max) = self.max_amount {
            if event.net_amount > max {
                return false;
            }
        }

        if let Some(min_items) = self.min_items {
            if event.item_count < min_items {
                return false;
            }
        }

        if let Some(categories) = &self.category_ids {
            if !categories.iter().any(|c| event.category_ids.contains(c)) {
                return false;
            }
        }
        if let Some(skus) = &self.skus {
            if !skus.iter().any(|s| event.skus.contains(s)) {
                return false;
            }
        }

        if let Some(days) = &self.day_of_week {
            let weekday = weekday_of(event) as u8;
            if !days.contains(&weekday) {
                return false;
            }
        }

        if let Some(range) = &self.time_range {
            let (Some(start), Some(end)) = (parse_hhmm(&range.start), parse_hhmm(&range.end))
            else {
                // Unparseable ranges never match; the validator rejects them
                // before a rule can be stored.
                return false;
            };
            let minute_of_day = minute_of_day(event);
            if minute_of_day < start || minute_of_day > end {
                return false;
            }
        }

        // `metadata` is opaque to this crate: an external evaluator owns it.

        true
    }
}

/// Weekday of the event timestamp, 0 = Sunday.
fn weekday_of(event: &EventContext) -> u32 {
    use chrono::Datelike;
    event.occurred_at.weekday().num_days_from_sunday()
}

fn minute_of_day(event: &EventContext) -> u32 {
    use chrono::Timelike;
    event.occurred_at.hour() * 60 + event.occurred_at.minute()
}

/// Parse an `HH:mm` string into minutes since midnight.
pub(crate) fn parse_hhmm(s: &str) -> Option<u32> {
    let (h, m) = s.split_once(':')?;
    if h.len() != 2 || m.len() != 2 {
        return None;
    }
    let h: u32 = h.parse().ok()?;
    let m: u32 = m.parse().ok()?;
    if h > 23 || m > 59 {
        return None;
    }
    Some(h * 60 + m)
}
