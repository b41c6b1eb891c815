//! Points formulas — the closed set of award-computation strategies.
//!
//! Every formula is a pure function of an event context: no I/O, no side
//! effects, total for any input. Hybrid formulas are restricted to
//! non-recursive sub-formulas ([`SimpleFormula`]) so evaluation terminates
//! without a depth limit.

use serde::{Deserialize, Serialize};

use loyalty_core::types::{EventContext, MembershipContext};

use crate::eligibility::EligibilityConditions;

/// Which monetary field of the event the formula reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AmountField {
    NetAmount,
    GrossAmount,
}

impl AmountField {
    pub fn select(&self, event: &EventContext) -> f64 {
        match self {
            AmountField::NetAmount => event.net_amount,
            AmountField::GrossAmount => event.gross_amount,
        }
    }
}

/// How a fractional raw point value becomes an integer award.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundingPolicy {
    Floor,
    Ceil,
    Nearest,
}

impl RoundingPolicy {
    pub fn apply(&self, raw: f64) -> i64 {
        match self {
            RoundingPolicy::Floor => raw.floor() as i64,
            RoundingPolicy::Ceil => raw.ceil() as i64,
            RoundingPolicy::Nearest => raw.round() as i64,
        }
    }
}

/// Constant award, independent of event magnitude.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixedFormula {
    pub points: i64,
}

/// `points = round(amount × rate)`, clamped to `[min_points, max_points]`
/// after rounding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateFormula {
    pub rate: f64,
    pub amount_field: AmountField,
    pub rounding: RoundingPolicy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_points: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_points: Option<i64>,
}

/// One row of a lookup table. The range is half-open: `min ≤ amount < max`,
/// with `max = None` meaning no upper bound.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableRow {
    pub min: f64,
    #[serde(default)]
    pub max: Option<f64>,
    pub points: i64,
}

/// Ordered range lookup against the event amount. Rows must be authored
/// sorted by `min` ascending and non-overlapping (the validator enforces
/// this); the first matching row wins, and no match yields zero points.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableFormula {
    pub amount_field: AmountField,
    pub table: Vec<TableRow>,
}

/// Base award plus conditional bonuses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HybridFormula {
    pub base: SimpleFormula,
    pub bonuses: Vec<BonusEntry>,
}

/// A bonus that applies only when its condition holds for the event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BonusEntry {
    pub condition: EligibilityConditions,
    pub bonus: SimpleFormula,
}

/// The sub-formulas a hybrid may compose: fixed or rate only. Table and
/// hybrid are excluded here so the hybrid case can never recurse.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum SimpleFormula {
    Fixed(FixedFormula),
    Rate(RateFormula),
}

impl SimpleFormula {
    pub fn evaluate(&self, event: &EventContext) -> i64 {
        match self {
            SimpleFormula::Fixed(f) => f.points,
            SimpleFormula::Rate(r) => r.evaluate(event),
        }
    }
}

/// An award-computation strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum PointsFormula {
    Fixed(FixedFormula),
    Rate(RateFormula),
    Table(TableFormula),
    Hybrid(HybridFormula),
}

impl RateFormula {
    pub fn evaluate(&self, event: &EventContext) -> i64 {
        let raw = self.amount_field.select(event) * self.rate;
        let mut points = self.rounding.apply(raw);
        // Clamp after rounding, never before.
        if let Some(min) = self.min_points {
            points = points.max(min);
        }
        if let Some(max) = self.max_points {
            points = points.min(max);
        }
        points
    }
}

impl TableFormula {
    pub fn evaluate(&self, event: &EventContext) -> i64 {
        let amount = self.amount_field.select(event);
        self.table
            .iter()
            .find(|row| amount >= row.min && row.max.map_or(true, |max| amount < max))
            .map_or(0, |row| row.points)
    }
}

impl HybridFormula {
    pub fn evaluate(&self, event: &EventContext, membership: &MembershipContext) -> i64 {
        let base = self.base.evaluate(event);
        let bonuses: i64 = self
            .bonuses
            .iter()
            .filter(|entry| entry.condition.matches(event, membership))
            .map(|entry| entry.bonus.evaluate(event))
            .sum();
        base + bonuses
    }
}

impl PointsFormula {
    /// Compute the award for an event. Membership context feeds hybrid bonus
    /// conditions; the other strategies ignore it.
    pub fn evaluate(&self, event: &EventContext, membership: &MembershipContext) -> i64 {
        match self {
            PointsFormula::Fixed(f) => f.points,
            PointsFormula::Rate(r) => r.evaluate(event),
            PointsFormula::Table(t) => t.evaluate(event),
            PointsFormula::Hybrid(h) => h.evaluate(event, membership),
        }
    }

    /// Strategy name for logging and metrics labels.
    pub fn kind(&self) -> &'static str {
        match self {
            PointsFormula::Fixed(_) => "fixed",
            PointsFormula::Rate(_) => "rate",
            PointsFormula::Table(_) => "table",
            PointsFormula::Hybrid(_) => "hybrid",
        }
    }

    /// Whether the formula reads a monetary amount from the event.
    pub fn reads_amount(&self) -> bool {
        matches!(self, PointsFormula::Rate(_) | PointsFormula::Table(_))
    }
}
