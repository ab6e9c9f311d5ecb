//! # Promotion Module
//!
//! The stackable, time-windowed, audience-targeted promotion model and its
//! bonus math.
//!
//! ## The Six-Dimension Gate
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │              When does a promotion actually apply?                      │
//! │                                                                         │
//! │  1. active flag          ── promotion.is_active_at()                    │
//! │  2. absolute window      ── promotion.is_active_at()                    │
//! │  3. daily time window    ── promotion.is_active_at()                    │
//! │  4. weekday mask         ── promotion.is_active_at()                    │
//! │  5. global usage cap     ── promotion.is_active_at()                    │
//! │  6. channel / audience / ── promotion.applies_to(ctx), plus the         │
//! │     tier / minimums         per-member usage cap checked against the    │
//! │                             ledger by the evaluator                     │
//! │                                                                         │
//! │  A promotion with active=true but outside its daily window or with      │
//! │  exhausted usage is NOT applicable even though its simple flag is set.  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Stacking Policy
//! At most one non-stackable promotion wins per bonus category, selected by
//! priority DESC then highest computed bonus. Promotions independently
//! marked `stackable` are all summed on top of the exclusive winner.

use chrono::{DateTime, Datelike, FixedOffset, NaiveTime, Utc, Weekday};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ValidationError;
use crate::money::{Money, Multiplier, Rate};
use crate::types::{Audience, Channel};

// =============================================================================
// Promotion Type
// =============================================================================

/// How a promotion's bonus is computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[serde(rename_all = "snake_case")]
pub enum PromotionType {
    /// Percentage bonus on top of a trade-in payout.
    TradeInBonus,
    /// Percentage cashback on a purchase.
    PurchaseCashback,
    /// Constant bonus regardless of base amount.
    FlatBonus,
    /// Multiplier on the base; the bonus is the incremental part only.
    Multiplier,
}

impl fmt::Display for PromotionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PromotionType::TradeInBonus => write!(f, "trade_in_bonus"),
            PromotionType::PurchaseCashback => write!(f, "purchase_cashback"),
            PromotionType::FlatBonus => write!(f, "flat_bonus"),
            PromotionType::Multiplier => write!(f, "multiplier"),
        }
    }
}

impl FromStr for PromotionType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "trade_in_bonus" => Ok(PromotionType::TradeInBonus),
            "purchase_cashback" => Ok(PromotionType::PurchaseCashback),
            "flat_bonus" => Ok(PromotionType::FlatBonus),
            "multiplier" => Ok(PromotionType::Multiplier),
            _ => Err(ValidationError::NotAllowed {
                field: "promotion_type".to_string(),
                allowed: vec![
                    "trade_in_bonus".to_string(),
                    "purchase_cashback".to_string(),
                    "flat_bonus".to_string(),
                    "multiplier".to_string(),
                ],
            }),
        }
    }
}

// =============================================================================
// Weekday Set
// =============================================================================

/// Weekday mask for promotions restricted to certain days.
///
/// Bit 0 = Monday ... bit 6 = Sunday. An empty mask (0) means "every day" -
/// the unrestricted case, not "never".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WeekdaySet(pub u8);

impl WeekdaySet {
    /// The unrestricted set (applies every day).
    pub const fn every_day() -> Self {
        WeekdaySet(0)
    }

    /// Builds a set from explicit weekdays.
    pub fn from_days(days: &[Weekday]) -> Self {
        let mut mask = 0u8;
        for day in days {
            mask |= 1 << day.num_days_from_monday();
        }
        WeekdaySet(mask)
    }

    /// Reconstructs a set from the persisted mask.
    pub const fn from_mask(mask: u8) -> Self {
        WeekdaySet(mask)
    }

    /// Whether the set is unrestricted.
    pub const fn is_unrestricted(&self) -> bool {
        self.0 == 0
    }

    /// Whether `day` is in the set (always true for the unrestricted set).
    pub fn contains(&self, day: Weekday) -> bool {
        self.is_unrestricted() || self.0 & (1 << day.num_days_from_monday()) != 0
    }
}

// =============================================================================
// Promotion
// =============================================================================

/// A time-windowed, audience-targeted promotion.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Promotion {
    /// Unique identifier (UUID v4).
    pub id: String,

    /// Tenant this promotion belongs to.
    pub tenant_id: String,

    /// Display name.
    pub name: String,

    /// How the bonus is computed.
    pub promotion_type: PromotionType,

    /// Percentage bonus in basis points (trade_in_bonus / purchase_cashback).
    pub bonus_bps: i64,

    /// Flat bonus in cents (flat_bonus).
    pub bonus_flat_cents: i64,

    /// Multiplier in hundredths, 150 = 1.5x (multiplier).
    pub multiplier_hundredths: i64,

    /// Absolute activity window.
    pub starts_at: Option<DateTime<Utc>>,
    pub ends_at: Option<DateTime<Utc>>,

    /// Optional intraday window (tenant-local time of day).
    pub daily_start_time: Option<NaiveTime>,
    pub daily_end_time: Option<NaiveTime>,

    /// Weekday mask; 0 = every day.
    pub active_days: i64,

    /// Sales channel this promotion targets.
    pub channel: Channel,

    /// Enrolled members only, or any platform customer.
    pub audience: Audience,

    /// Comma-separated tier names; empty/None = unrestricted.
    pub tier_restriction: Option<String>,

    /// Minimum qualifying item count, 0 = none.
    pub min_items: i64,

    /// Minimum qualifying order value in cents, 0 = none.
    pub min_value_cents: i64,

    /// Whether this promotion sums with other stackable promotions.
    pub stackable: bool,

    /// Tie-break between competing non-stackable promotions.
    pub priority: i64,

    /// Global usage cap; None = unlimited.
    pub max_uses: Option<i64>,

    /// Per-member usage cap; None = unlimited. Checked by the evaluator
    /// against the member's ledger.
    pub max_uses_per_member: Option<i64>,

    /// Times this promotion has been applied.
    pub current_uses: i64,

    /// Simple on/off switch. NOT sufficient on its own - see
    /// [`Promotion::is_active_at`].
    pub active: bool,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Promotion {
    /// Time-and-usage gate: active flag, absolute window, daily window,
    /// weekday mask, global usage cap.
    ///
    /// `now` carries the tenant-local offset so the daily window and
    /// weekday checks see local wall-clock time; instant comparisons
    /// against the absolute window are offset-independent.
    pub fn is_active_at(&self, now: DateTime<FixedOffset>) -> bool {
        if !self.active {
            return false;
        }

        if let Some(max) = self.max_uses {
            if self.current_uses >= max {
                return false;
            }
        }

        if let Some(starts_at) = self.starts_at {
            if now < starts_at {
                return false;
            }
        }
        if let Some(ends_at) = self.ends_at {
            if now > ends_at {
                return false;
            }
        }

        if !self.weekdays().contains(now.weekday()) {
            return false;
        }

        if let (Some(start), Some(end)) = (self.daily_start_time, self.daily_end_time) {
            let tod = now.time();
            let in_window = if start <= end {
                tod >= start && tod <= end
            } else {
                // Window wraps midnight (e.g. 22:00-02:00).
                tod >= start || tod <= end
            };
            if !in_window {
                return false;
            }
        }

        true
    }

    /// Context gate: channel, audience, tier, order minimums.
    pub fn applies_to(&self, ctx: &PromotionContext<'_>) -> bool {
        if !self.channel.accepts(ctx.channel) {
            return false;
        }
        if !self.audience.accepts(ctx.is_member) {
            return false;
        }
        if !self.allows_tier(ctx.tier) {
            return false;
        }
        if self.min_items > 0 && ctx.item_count < self.min_items {
            return false;
        }
        if self.min_value_cents > 0 && ctx.order_value.cents() < self.min_value_cents {
            return false;
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

    /// The weekday mask as a typed set.
    pub fn weekdays(&self) -> WeekdaySet {
        WeekdaySet::from_mask(self.active_days as u8)
    }

    /// Computes this promotion's bonus contribution for `base`.
    ///
    /// ## Bonus Formulas
    /// - trade_in_bonus / purchase_cashback: `base * bonus_percent`
    /// - flat_bonus: `bonus_flat` regardless of base
    /// - multiplier: `base * (multiplier - 1)` - the INCREMENTAL bonus,
    ///   not the full multiplied total; callers add this to the base.
    pub fn calculate_bonus(&self, base: Money) -> Money {
        match self.promotion_type {
            PromotionType::TradeInBonus | PromotionType::PurchaseCashback => {
                base.apply_rate(Rate::from_bps(self.bonus_bps.max(0) as u32))
            }
            PromotionType::FlatBonus => Money::from_cents(self.bonus_flat_cents),
            PromotionType::Multiplier => {
                let multiplier =
                    Multiplier::from_hundredths(self.multiplier_hundredths.max(0) as u32);
                base.apply_rate(Rate::from_bps(multiplier.incremental_hundredths() * 100))
            }
        }
    }
}

/// Request context for the channel/audience/tier/minimum gates.
#[derive(Debug, Clone, Copy)]
pub struct PromotionContext<'a> {
    pub channel: Channel,
    pub is_member: bool,
    pub tier: &'a str,
    pub item_count: i64,
    pub order_value: Money,
}

// =============================================================================
// Stacking Resolution
// =============================================================================

/// Outcome of resolving a set of simultaneously-active promotions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StackOutcome {
    /// Total bonus across the applied promotions.
    pub total_bonus: Money,

    /// The promotion recorded on the ledger entry: the highest-priority
    /// applied promotion (computed bonus breaks ties).
    pub winner_id: Option<String>,

    /// Ids of every promotion that contributed to the total.
    pub applied: Vec<String>,
}

/// Resolves the stacking policy over already-gated promotions.
///
/// Non-stackable promotions are evaluated exclusively against each other
/// (priority DESC, then highest computed bonus); all stackable promotions
/// are summed on top of the exclusive winner.
pub fn resolve_promotion_stack(promotions: &[Promotion], base: Money) -> StackOutcome {
    // (promotion, computed bonus) pairs, zero-bonus promos dropped.
    let scored: Vec<(&Promotion, Money)> = promotions
        .iter()
        .map(|p| (p, p.calculate_bonus(base)))
        .filter(|(_, bonus)| !bonus.is_zero())
        .collect();

    let exclusive_winner = scored
        .iter()
        .filter(|(p, _)| !p.stackable)
        .max_by(|(a, a_bonus), (b, b_bonus)| {
            a.priority
                .cmp(&b.priority)
                .then(a_bonus.cmp(b_bonus))
        });

    let mut total = Money::zero();
    let mut applied: Vec<(&Promotion, Money)> = Vec::new();

    if let Some((winner, bonus)) = exclusive_winner {
        total += *bonus;
        applied.push((winner, *bonus));
    }

    for (p, bonus) in scored.iter().filter(|(p, _)| p.stackable) {
        total += *bonus;
        applied.push((p, *bonus));
    }

    let winner_id = applied
        .iter()
        .max_by(|(a, a_bonus), (b, b_bonus)| {
            a.priority
                .cmp(&b.priority)
                .then(a_bonus.cmp(b_bonus))
        })
        .map(|(p, _)| p.id.clone());

    StackOutcome {
        total_bonus: total,
        winner_id,
        applied: applied.into_iter().map(|(p, _)| p.id.clone()).collect(),
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn promotion(id: &str, promotion_type: PromotionType) -> Promotion {
        let now = Utc::now();
        Promotion {
            id: id.to_string(),
            tenant_id: "t-1".to_string(),
            name: format!("promo {id}"),
            promotion_type,
            bonus_bps: 0,
            bonus_flat_cents: 0,
            multiplier_hundredths: 100,
            starts_at: None,
            ends_at: None,
            daily_start_time: None,
            daily_end_time: None,
            active_days: 0,
            channel: Channel::All,
            audience: Audience::AllCustomers,
            tier_restriction: None,
            min_items: 0,
            min_value_cents: 0,
            stackable: false,
            priority: 0,
            max_uses: None,
            max_uses_per_member: None,
            current_uses: 0,
            active: true,
            created_at: now,
            updated_at: now,
        }
    }

    fn at(hour: u32, minute: u32) -> DateTime<FixedOffset> {
        // 2026-08-19 is a Wednesday.
        FixedOffset::east_opt(0)
            .unwrap()
            .with_ymd_and_hms(2026, 8, 19, hour, minute, 0)
            .unwrap()
    }

    #[test]
    fn test_bonus_percent() {
        let mut p = promotion("p-1", PromotionType::PurchaseCashback);
        p.bonus_bps = 1000; // 10%
        assert_eq!(p.calculate_bonus(Money::from_cents(10_000)).cents(), 1000);
    }

    #[test]
    fn test_bonus_flat_ignores_base() {
        let mut p = promotion("p-1", PromotionType::FlatBonus);
        p.bonus_flat_cents = 500;
        assert_eq!(p.calculate_bonus(Money::from_cents(1)).cents(), 500);
        assert_eq!(p.calculate_bonus(Money::from_cents(99_999)).cents(), 500);
    }

    #[test]
    fn test_bonus_multiplier_is_incremental() {
        let mut p = promotion("p-1", PromotionType::Multiplier);
        p.multiplier_hundredths = 150; // 1.5x
        // Bonus is the extra half, not the multiplied total.
        assert_eq!(p.calculate_bonus(Money::from_cents(1000)).cents(), 500);
    }

    #[test]
    fn test_inactive_flag_gates() {
        let mut p = promotion("p-1", PromotionType::FlatBonus);
        p.active = false;
        assert!(!p.is_active_at(at(12, 0)));
    }

    #[test]
    fn test_daily_window_excludes_even_when_active() {
        let mut p = promotion("p-1", PromotionType::FlatBonus);
        p.daily_start_time = NaiveTime::from_hms_opt(9, 0, 0);
        p.daily_end_time = NaiveTime::from_hms_opt(11, 0, 0);

        // Every other field says "active", but 12:00 is past the window.
        assert!(p.active);
        assert!(!p.is_active_at(at(12, 0)));
        assert!(p.is_active_at(at(10, 30)));
    }

    #[test]
    fn test_daily_window_wrapping_midnight() {
        let mut p = promotion("p-1", PromotionType::FlatBonus);
        p.daily_start_time = NaiveTime::from_hms_opt(22, 0, 0);
        p.daily_end_time = NaiveTime::from_hms_opt(2, 0, 0);

        assert!(p.is_active_at(at(23, 0)));
        assert!(p.is_active_at(at(1, 0)));
        assert!(!p.is_active_at(at(12, 0)));
    }

    #[test]
    fn test_weekday_mask() {
        let mut p = promotion("p-1", PromotionType::FlatBonus);
        p.active_days = WeekdaySet::from_days(&[Weekday::Sat, Weekday::Sun]).0 as i64;

        // 2026-08-19 is a Wednesday.
        assert!(!p.is_active_at(at(12, 0)));

        p.active_days = WeekdaySet::from_days(&[Weekday::Wed]).0 as i64;
        assert!(p.is_active_at(at(12, 0)));
    }

    #[test]
    fn test_absolute_window() {
        let mut p = promotion("p-1", PromotionType::FlatBonus);
        p.starts_at = Some(at(13, 0).with_timezone(&Utc));
        assert!(!p.is_active_at(at(12, 0)));
        assert!(p.is_active_at(at(14, 0)));

        p.ends_at = Some(at(15, 0).with_timezone(&Utc));
        assert!(!p.is_active_at(at(16, 0)));
    }

    #[test]
    fn test_usage_cap_gates() {
        let mut p = promotion("p-1", PromotionType::FlatBonus);
        p.max_uses = Some(100);
        p.current_uses = 100;
        assert!(!p.is_active_at(at(12, 0)));

        p.current_uses = 99;
        assert!(p.is_active_at(at(12, 0)));
    }

    #[test]
    fn test_tier_restriction() {
        let mut p = promotion("p-1", PromotionType::FlatBonus);
        assert!(p.allows_tier("bronze"));

        p.tier_restriction = Some("gold, platinum".to_string());
        assert!(p.allows_tier("gold"));
        assert!(p.allows_tier("Platinum"));
        assert!(!p.allows_tier("bronze"));
    }

    #[test]
    fn test_applies_to_minimums() {
        let mut p = promotion("p-1", PromotionType::PurchaseCashback);
        p.min_items = 2;
        p.min_value_cents = 5000;

        let mut ctx = PromotionContext {
            channel: Channel::InStore,
            is_member: true,
            tier: "bronze",
            item_count: 1,
            order_value: Money::from_cents(10_000),
        };
        assert!(!p.applies_to(&ctx));

        ctx.item_count = 3;
        assert!(p.applies_to(&ctx));

        ctx.order_value = Money::from_cents(4000);
        assert!(!p.applies_to(&ctx));
    }

    #[test]
    fn test_stack_exclusive_picks_priority_then_bonus() {
        let mut low = promotion("low", PromotionType::PurchaseCashback);
        low.bonus_bps = 2000; // bigger bonus
        low.priority = 1;

        let mut high = promotion("high", PromotionType::PurchaseCashback);
        high.bonus_bps = 1000;
        high.priority = 5;

        let outcome = resolve_promotion_stack(&[low, high], Money::from_cents(10_000));
        // Priority wins over raw bonus size.
        assert_eq!(outcome.winner_id.as_deref(), Some("high"));
        assert_eq!(outcome.total_bonus.cents(), 1000);
        assert_eq!(outcome.applied, vec!["high".to_string()]);
    }

    #[test]
    fn test_stack_stackables_sum_on_top_of_winner() {
        let mut exclusive = promotion("exclusive", PromotionType::PurchaseCashback);
        exclusive.bonus_bps = 500; // 5%
        exclusive.priority = 10;

        let mut stack_a = promotion("stack-a", PromotionType::PurchaseCashback);
        stack_a.bonus_bps = 1000; // 10%
        stack_a.stackable = true;

        let mut stack_b = promotion("stack-b", PromotionType::FlatBonus);
        stack_b.bonus_flat_cents = 250;
        stack_b.stackable = true;

        let outcome =
            resolve_promotion_stack(&[exclusive, stack_a, stack_b], Money::from_cents(10_000));
        // 5% + 10% + $2.50 = $17.50
        assert_eq!(outcome.total_bonus.cents(), 1750);
        assert_eq!(outcome.winner_id.as_deref(), Some("exclusive"));
        assert_eq!(outcome.applied.len(), 3);
    }

    #[test]
    fn test_stack_empty_input() {
        let outcome = resolve_promotion_stack(&[], Money::from_cents(10_000));
        assert!(outcome.total_bonus.is_zero());
        assert!(outcome.winner_id.is_none());
        assert!(outcome.applied.is_empty());
    }
}
