//! # Points Earning Rules
//!
//! Rule model and resolution for points accrual: base rates, multipliers,
//! flat bonus points and percentage bonuses, with exclusive groups and
//! stacking.
//!
//! ## Resolution Pipeline
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      resolve_earning()                                  │
//! │                                                                         │
//! │  candidate rules (already gated by applies_to)                          │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  1. Exclusive groups: rules sharing a group do not stack - only the    │
//! │     highest-priority rule in each group survives                        │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  2. Base: caller-provided base points, or the best base_rate rule      │
//! │     applied to the spend when the caller has none                       │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  3. Bonuses combine ADDITIVELY on their incremental contribution:      │
//! │     total = base + Σ base·(mult_i − 1) + Σ flat_i + Σ pct_i(base)      │
//! │                                                                         │
//! │  (This is the documented resolution of the tier-vs-promotional         │
//! │   multiplier precedence question: every surviving multiplier           │
//! │   contributes its incremental bonus; none compounds on another.)       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::error::ValidationError;
use crate::money::{Money, Multiplier, Points, Rate};

// =============================================================================
// Rule Type
// =============================================================================

/// How an earning rule contributes points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[serde(rename_all = "snake_case")]
pub enum RuleType {
    /// Defines the base accrual: points per dollar of qualifying spend.
    BaseRate,
    /// Multiplies the base; contributes the incremental part only.
    Multiplier,
    /// Flat bonus points on top of the base.
    BonusPoints,
    /// Percentage bonus computed on the base points.
    Percentage,
}

impl fmt::Display for RuleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleType::BaseRate => write!(f, "base_rate"),
            RuleType::Multiplier => write!(f, "multiplier"),
            RuleType::BonusPoints => write!(f, "bonus_points"),
            RuleType::Percentage => write!(f, "percentage"),
        }
    }
}

impl FromStr for RuleType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "base_rate" => Ok(RuleType::BaseRate),
            "multiplier" => Ok(RuleType::Multiplier),
            "bonus_points" => Ok(RuleType::BonusPoints),
            "percentage" => Ok(RuleType::Percentage),
            _ => Err(ValidationError::NotAllowed {
                field: "rule_type".to_string(),
                allowed: vec![
                    "base_rate".to_string(),
                    "multiplier".to_string(),
                    "bonus_points".to_string(),
                    "percentage".to_string(),
                ],
            }),
        }
    }
}

// =============================================================================
// Earn Source
// =============================================================================

/// The business event that triggers points accrual.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[serde(rename_all = "snake_case")]
pub enum EarnSource {
    Purchase,
    TradeIn,
    Referral,
    Signup,
    Adjustment,
}

impl fmt::Display for EarnSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EarnSource::Purchase => write!(f, "purchase"),
            EarnSource::TradeIn => write!(f, "trade_in"),
            EarnSource::Referral => write!(f, "referral"),
            EarnSource::Signup => write!(f, "signup"),
            EarnSource::Adjustment => write!(f, "adjustment"),
        }
    }
}

impl FromStr for EarnSource {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "purchase" => Ok(EarnSource::Purchase),
            "trade_in" => Ok(EarnSource::TradeIn),
            "referral" => Ok(EarnSource::Referral),
            "signup" => Ok(EarnSource::Signup),
            "adjustment" => Ok(EarnSource::Adjustment),
            _ => Err(ValidationError::NotAllowed {
                field: "earn_source".to_string(),
                allowed: vec![
                    "purchase".to_string(),
                    "trade_in".to_string(),
                    "referral".to_string(),
                    "signup".to_string(),
                    "adjustment".to_string(),
                ],
            }),
        }
    }
}

// =============================================================================
// Points Earning Rule
// =============================================================================

/// A points accrual rule.
///
/// Product filters are explicit named optional fields per dimension, not an
/// open-ended map; a `None` filter does not restrict that dimension.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct PointsEarningRule {
    /// Unique identifier (UUID v4).
    pub id: String,

    /// Tenant this rule belongs to.
    pub tenant_id: String,

    /// Display name.
    pub name: String,

    /// How this rule contributes points.
    pub rule_type: RuleType,

    /// Points per dollar in hundredths (base_rate): 100 = 1 pt/$.
    pub points_per_dollar_hundredths: i64,

    /// Multiplier in hundredths (multiplier): 200 = double points.
    pub multiplier_hundredths: i64,

    /// Flat bonus points (bonus_points).
    pub bonus_points: i64,

    /// Percentage bonus on the base in basis points (percentage).
    pub percentage_bps: i64,

    /// The event this rule triggers on.
    pub source: EarnSource,

    // Product filters: a rule applies only when every set dimension matches.
    pub filter_collection: Option<String>,
    pub filter_vendor: Option<String>,
    pub filter_product_type: Option<String>,
    pub filter_tag: Option<String>,

    /// Comma-separated tier names; empty/None = unrestricted.
    pub tier_restriction: Option<String>,

    /// Only applies to recently-enrolled members.
    pub new_member_only: bool,

    /// Whether this rule sums with other rules (exclusive groups still
    /// override stacking between their own members).
    pub stackable: bool,

    /// Tie-break inside exclusive groups and between base_rate rules.
    pub priority: i64,

    /// Rules sharing a group do not stack - only the highest-priority
    /// rule in the group applies.
    pub exclusive_group: Option<String>,

    /// Global usage cap; None = unlimited.
    pub max_uses: Option<i64>,

    /// Times this rule has been applied.
    pub current_uses: i64,

    /// Simple on/off switch.
    pub active: bool,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PointsEarningRule {
    /// Whether this rule applies to the given earn context.
    pub fn applies_to(&self, ctx: &EarnContext<'_>) -> bool {
        if !self.active {
            return false;
        }
        if let Some(max) = self.max_uses {
            if self.current_uses >= max {
                return false;
            }
        }
        if self.source != ctx.source {
            return false;
        }
        if !self.allows_tier(ctx.tier) {
            return false;
        }
        if self.new_member_only && !ctx.is_new_member {
            return false;
        }

        // Product filters: every set dimension must match.
        if let Some(want) = self.filter_collection.as_deref() {
            if !ctx.product.is_some_and(|p| p.collections.iter().any(|c| c == want)) {
                return false;
            }
        }
        if let Some(want) = self.filter_vendor.as_deref() {
            if !ctx.product.is_some_and(|p| p.vendor == Some(want)) {
                return false;
            }
        }
        if let Some(want) = self.filter_product_type.as_deref() {
            if !ctx.product.is_some_and(|p| p.product_type == Some(want)) {
                return false;
            }
        }
        if let Some(want) = self.filter_tag.as_deref() {
            if !ctx.product.is_some_and(|p| p.tags.iter().any(|t| t == want)) {
                return false;
            }
        }

        true
    }

    /// Whether the member's tier passes the tier restriction.
    pub fn allows_tier(&self, tier: &str) -> bool {
        match self.tier_restriction.as_deref() {
            None | Some("") => true,
            Some(list) => list
                .split(',')
                .any(|t| t.trim().eq_ignore_ascii_case(tier)),
        }
    }

    /// Base points this rule derives from the spend (base_rate only).
    pub fn base_points_for(&self, spend: Money) -> Points {
        let hundredths = self.points_per_dollar_hundredths.max(0);
        // spend_cents * (pts/$ in hundredths) / 100(hundredths) / 100(cents/$)
        let points = (spend.cents() as i128 * hundredths as i128 + 5000) / 10000;
        Points::new(points as i64)
    }
}

/// The product being transacted, for rule filters.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProductContext<'a> {
    pub collections: &'a [String],
    pub vendor: Option<&'a str>,
    pub product_type: Option<&'a str>,
    pub tags: &'a [String],
}

/// Request context for earning-rule gating.
#[derive(Debug, Clone, Copy)]
pub struct EarnContext<'a> {
    pub source: EarnSource,
    pub tier: &'a str,
    pub is_new_member: bool,
    pub product: Option<&'a ProductContext<'a>>,
}

// =============================================================================
// Earning Resolution
// =============================================================================

/// Outcome of resolving the earning rules for one accrual.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EarnOutcome {
    /// The base points the bonuses were computed from.
    pub base: Points,

    /// Base plus every bonus contribution.
    pub total: Points,

    /// Ids of every rule that contributed.
    pub applied: Vec<String>,
}

/// Resolves already-gated earning rules into a total accrual.
///
/// `base_points` is the caller-provided base (e.g. from the business event
/// itself); when zero, the highest-priority applicable base_rate rule
/// derives the base from `spend`. All surviving bonuses then combine
/// additively on their incremental contribution.
pub fn resolve_earning(
    rules: &[PointsEarningRule],
    base_points: Points,
    spend: Money,
) -> EarnOutcome {
    let survivors = collapse_exclusive_groups(rules);

    let mut applied: Vec<String> = Vec::new();

    // Base: caller-provided, or the best base_rate rule.
    let base_rule = survivors
        .iter()
        .filter(|r| r.rule_type == RuleType::BaseRate)
        .max_by_key(|r| r.priority);

    let base = if base_points.is_positive() {
        base_points
    } else if let Some(rule) = base_rule {
        applied.push(rule.id.clone());
        rule.base_points_for(spend)
    } else {
        Points::zero()
    };

    let mut total = base;

    for rule in &survivors {
        let bonus = match rule.rule_type {
            RuleType::BaseRate => continue,
            RuleType::Multiplier => base.incremental_bonus(Multiplier::from_hundredths(
                rule.multiplier_hundredths.max(0) as u32,
            )),
            RuleType::BonusPoints => Points::new(rule.bonus_points.max(0)),
            RuleType::Percentage => {
                let bonus =
                    Money::from_cents(base.value()).apply_rate(Rate::from_bps(rule.percentage_bps.max(0) as u32));
                Points::new(bonus.cents())
            }
        };

        if bonus.is_positive() {
            total += bonus;
            applied.push(rule.id.clone());
        }
    }

    EarnOutcome {
        base,
        total,
        applied,
    }
}

/// Keeps only the highest-priority rule per exclusive group.
///
/// Rules without a group always survive. Ties inside a group break on
/// rule id for determinism.
fn collapse_exclusive_groups(rules: &[PointsEarningRule]) -> Vec<PointsEarningRule> {
    let mut best_in_group: HashMap<&str, &PointsEarningRule> = HashMap::new();
    let mut ungrouped: Vec<&PointsEarningRule> = Vec::new();

    for rule in rules {
        match rule.exclusive_group.as_deref() {
            None | Some("") => ungrouped.push(rule),
            Some(group) => {
                best_in_group
                    .entry(group)
                    .and_modify(|current| {
                        let replace = (rule.priority, &rule.id) > (current.priority, &current.id);
                        if replace {
                            *current = rule;
                        }
                    })
                    .or_insert(rule);
            }
        }
    }

    let mut survivors: Vec<PointsEarningRule> =
        ungrouped.into_iter().cloned().collect();
    survivors.extend(best_in_group.into_values().cloned());
    // Stable output order regardless of HashMap iteration.
    survivors.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.id.cmp(&b.id)));
    survivors
}

// =============================================================================
// Unit Tests
// =============================================================================
