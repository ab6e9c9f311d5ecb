//! # Domain Types
//!
//! Core domain types for the dual-currency loyalty ledger.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌──────────────────────┐   ┌────────────────┐   │
//! │  │   LedgerEntry   │   │ MemberBalanceSnapshot│   │     Member     │   │
//! │  │  ─────────────  │   │  ──────────────────  │   │  ───────────── │   │
//! │  │  id (UUID)      │   │  (tenant, member,    │   │  id (UUID)     │   │
//! │  │  currency       │   │   currency) PK       │   │  tier          │   │
//! │  │  amount (signed)│   │  available/pending   │   │  status        │   │
//! │  │  remaining pts  │   │  lifetime_* totals   │   │  external acct │   │
//! │  └─────────────────┘   └──────────────────────┘   └────────────────┘   │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │    Currency     │   │    EventKind    │   │    Channel      │       │
//! │  │  Credit/Points  │   │  TradeIn, ...   │   │  All/InStore/.. │       │
//! │  └─────────────────┘   └─────────────────┘   └─────────────────┘       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Append-Only Ledger
//! A `LedgerEntry` is created exactly once and never deleted. Corrections
//! are additive reversal entries carrying `related_entry_id`; reversal
//! status of an original entry is answered by the existence of a
//! referencing entry, never by mutating the original. The single mutable
//! field is `remaining_points`, the down-counter of a points earn lot.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ValidationError;
use crate::money::{Money, Points};

// =============================================================================
// Currency
// =============================================================================

/// The two ledger currencies.
///
/// Credit is mirrored to the external commerce platform (the authoritative
/// store of spendable balance); points live entirely in this engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[serde(rename_all = "snake_case")]
pub enum Currency {
    /// Store credit, issued through the commerce platform.
    Credit,
    /// Loyalty points, tracked as consumable lots.
    Points,
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Currency::Credit => write!(f, "credit"),
            Currency::Points => write!(f, "points"),
        }
    }
}

impl FromStr for Currency {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "credit" => Ok(Currency::Credit),
            "points" => Ok(Currency::Points),
            _ => Err(ValidationError::NotAllowed {
                field: "currency".to_string(),
                allowed: vec!["credit".to_string(), "points".to_string()],
            }),
        }
    }
}

// =============================================================================
// Event Kind
// =============================================================================

/// The business event behind a ledger entry.
///
/// Closed set: unknown tokens are rejected at ingestion rather than
/// defaulting silently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Device/item trade-in payout.
    TradeIn,
    /// Cashback earned on a purchase.
    PurchaseCashback,
    /// Bonus from a promotion (recorded with `promotion_id`).
    PromotionBonus,
    /// Manual admin adjustment, either direction.
    ManualAdjustment,
    /// Credit issued by a bulk promotional event.
    BulkCredit,
    /// Referral reward.
    Referral,
    /// Points/credit spent by the member (negative amount).
    Redemption,
    /// Unused amount expired by the sweeper (negative amount).
    Expiration,
    /// Additive correction referencing the original entry.
    Reversal,
}

impl EventKind {
    /// All tokens accepted at ingestion, in serialization form.
    pub const ALL: [&'static str; 9] = [
        "trade_in",
        "purchase_cashback",
        "promotion_bonus",
        "manual_adjustment",
        "bulk_credit",
        "referral",
        "redemption",
        "expiration",
        "reversal",
    ];

    /// Serialization token for this kind.
    pub const fn as_str(&self) -> &'static str {
        match self {
            EventKind::TradeIn => "trade_in",
            EventKind::PurchaseCashback => "purchase_cashback",
            EventKind::PromotionBonus => "promotion_bonus",
            EventKind::ManualAdjustment => "manual_adjustment",
            EventKind::BulkCredit => "bulk_credit",
            EventKind::Referral => "referral",
            EventKind::Redemption => "redemption",
            EventKind::Expiration => "expiration",
            EventKind::Reversal => "reversal",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "trade_in" => Ok(EventKind::TradeIn),
            "purchase_cashback" => Ok(EventKind::PurchaseCashback),
            "promotion_bonus" => Ok(EventKind::PromotionBonus),
            "manual_adjustment" => Ok(EventKind::ManualAdjustment),
            "bulk_credit" => Ok(EventKind::BulkCredit),
            "referral" => Ok(EventKind::Referral),
            "redemption" => Ok(EventKind::Redemption),
            "expiration" => Ok(EventKind::Expiration),
            "reversal" => Ok(EventKind::Reversal),
            _ => Err(ValidationError::NotAllowed {
                field: "event_kind".to_string(),
                allowed: EventKind::ALL.iter().map(|s| s.to_string()).collect(),
            }),
        }
    }
}

// =============================================================================
// Channel & Audience
// =============================================================================

/// Sales channel a promotion targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    /// Applies on every channel.
    All,
    /// Physical store only.
    InStore,
    /// Web store only.
    Online,
}

impl Channel {
    /// Whether a promotion on this channel applies to a request on `other`.
    pub fn accepts(&self, other: Channel) -> bool {
        matches!(self, Channel::All) || *self == other || matches!(other, Channel::All)
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::All => write!(f, "all"),
            Channel::InStore => write!(f, "in_store"),
            Channel::Online => write!(f, "online"),
        }
    }
}

/// Whether a promotion targets enrolled members only or any customer
/// of the underlying commerce platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[serde(rename_all = "snake_case")]
pub enum Audience {
    /// Enrolled loyalty members only.
    MembersOnly,
    /// Any customer, member or not.
    AllCustomers,
}

impl Audience {
    /// Whether a promotion with this audience applies to the request.
    ///
    /// `is_member` describes the subject of the operation.
    pub fn accepts(&self, is_member: bool) -> bool {
        match self {
            Audience::MembersOnly => is_member,
            Audience::AllCustomers => true,
        }
    }
}

// =============================================================================
// Member Status
// =============================================================================

/// Membership status (referenced entity, owned by the member system).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[serde(rename_all = "snake_case")]
pub enum MemberStatus {
    Active,
    Suspended,
    Closed,
}

// =============================================================================
// Member
// =============================================================================

/// A loyalty member (external collaborator entity, referenced not owned).
///
/// The engine tolerates a member with no linked external account for
/// points-only operations but refuses any credit-currency operation
/// without one.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Member {
    /// Unique identifier (UUID v4).
    pub id: String,

    /// Tenant this member belongs to.
    pub tenant_id: String,

    /// Account id in the external commerce platform, if linked.
    pub external_account_id: Option<String>,

    /// Tier name ("bronze", "gold", ...). Tier semantics live in config.
    pub tier: String,

    /// Membership status.
    pub status: MemberStatus,

    /// When the member enrolled.
    pub created_at: DateTime<Utc>,

    /// When the member record was last updated.
    pub updated_at: DateTime<Utc>,
}

impl Member {
    /// Whether this member can take part in credit-currency operations.
    pub fn has_external_account(&self) -> bool {
        self.external_account_id
            .as_deref()
            .map(|id| !id.is_empty())
            .unwrap_or(false)
    }

    /// Whether the member enrolled within the last `days` days.
    pub fn is_new_member(&self, now: DateTime<Utc>, days: i64) -> bool {
        now - self.created_at <= chrono::Duration::days(days)
    }
}

// =============================================================================
// Ledger Entry
// =============================================================================

/// An immutable record of a single balance-affecting event.
///
/// For the points currency, a positive entry is also a "lot" carrying its
/// own `points`/`remaining_points` pair; redemption drains lots in
/// FIFO/expiration order (see the lot queries in loyalty-db).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct LedgerEntry {
    /// Unique identifier (UUID v4).
    pub id: String,

    /// Tenant scope. Every query and write is tenant-scoped.
    pub tenant_id: String,

    /// Member this entry belongs to.
    pub member_id: String,

    /// Currency discriminator for the shared ledger table.
    pub currency: Currency,

    /// Signed amount: positive = earn/credit, negative = redeem/expire/debit.
    pub amount: i64,

    /// Currency-specific balance snapshot after this entry.
    ///
    /// For credit this is taken from the external platform response,
    /// never computed locally.
    pub balance_after: i64,

    /// The business event behind this entry.
    pub event_kind: EventKind,

    /// Type of the originating business object ("trade_in", "order", ...).
    pub source_type: Option<String>,

    /// Id of the originating business object.
    pub source_id: Option<String>,

    /// Winning promotion recorded on bonus-bearing entries.
    pub promotion_id: Option<String>,

    /// When the unconsumed amount of this entry expires, if ever.
    pub expires_at: Option<DateTime<Utc>>,

    /// Original lot size (points earn lots only).
    pub points: Option<i64>,

    /// Unconsumed amount of this lot (points earn lots only).
    ///
    /// The single mutable field: drained toward zero by redemption and
    /// expiration, never below zero, never above `points`.
    pub remaining_points: Option<i64>,

    /// Original entry offset by this one (reversal entries only).
    pub related_entry_id: Option<String>,

    /// Why the related entry was reversed (reversal entries only).
    pub reversal_reason: Option<String>,

    /// Who created this entry ("system", admin user id, job id).
    pub created_by: String,

    /// When this entry was appended.
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    /// The signed amount as Money (credit currency).
    #[inline]
    pub fn amount_money(&self) -> Money {
        Money::from_cents(self.amount)
    }

    /// The signed amount as Points (points currency).
    #[inline]
    pub fn amount_points(&self) -> Points {
        Points::new(self.amount)
    }

    /// Whether this entry is a points earn lot.
    pub fn is_earn_lot(&self) -> bool {
        self.currency == Currency::Points && self.amount > 0 && self.remaining_points.is_some()
    }

    /// Unconsumed amount of this lot, zero for non-lots.
    pub fn remaining(&self) -> Points {
        Points::new(self.remaining_points.unwrap_or(0))
    }

    /// Whether this lot's unconsumed amount has expired at `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(expires_at) => expires_at <= now,
            None => false,
        }
    }
}

// =============================================================================
// Balance Snapshot
// =============================================================================

/// Denormalized balance snapshot, one per (tenant, member, currency).
///
/// Derived data: updated transactionally alongside each ledger append and
/// always re-derivable from a full ledger replay
/// (`SnapshotRepository::recalculate_from_ledger` in loyalty-db).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct MemberBalanceSnapshot {
    pub tenant_id: String,
    pub member_id: String,
    pub currency: Currency,

    /// Spendable balance. For points: the sum of `remaining_points` across
    /// open lots, NOT the raw ledger sum. For credit: the locally-tracked
    /// issued total (analytics); the authoritative figure is owned by the
    /// commerce platform.
    pub available: i64,

    /// Earned but not yet spendable. No current earn path defers
    /// availability, so this stays zero until a hold flow exists.
    pub pending: i64,

    pub lifetime_earned: i64,
    pub lifetime_redeemed: i64,
    pub lifetime_expired: i64,

    // Per-category earned breakdown.
    pub earned_trade_in: i64,
    pub earned_cashback: i64,
    pub earned_promotion: i64,
    pub earned_referral: i64,
    pub earned_other: i64,

    pub last_earn_at: Option<DateTime<Utc>>,
    pub last_redeem_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl MemberBalanceSnapshot {
    /// An empty snapshot, used on first access.
    pub fn empty(
        tenant_id: &str,
        member_id: &str,
        currency: Currency,
        now: DateTime<Utc>,
    ) -> Self {
        MemberBalanceSnapshot {
            tenant_id: tenant_id.to_string(),
            member_id: member_id.to_string(),
            currency,
            available: 0,
            pending: 0,
            lifetime_earned: 0,
            lifetime_redeemed: 0,
            lifetime_expired: 0,
            earned_trade_in: 0,
            earned_cashback: 0,
            earned_promotion: 0,
            earned_referral: 0,
            earned_other: 0,
            last_earn_at: None,
            last_redeem_at: None,
            updated_at: now,
        }
    }

    /// Applies the effect of one ledger entry to this snapshot.
    ///
    /// The entry and this delta are written as one atomic unit by the
    /// repository layer; this method is the pure half of that pairing.
    pub fn apply(&mut self, entry: &LedgerEntry) {
        let delta = SnapshotDelta::from_entry(entry);
        self.available += delta.available;
        self.pending += delta.pending;
        self.lifetime_earned += delta.lifetime_earned;
        self.lifetime_redeemed += delta.lifetime_redeemed;
        self.lifetime_expired += delta.lifetime_expired;
        self.earned_trade_in += delta.earned_trade_in;
        self.earned_cashback += delta.earned_cashback;
        self.earned_promotion += delta.earned_promotion;
        self.earned_referral += delta.earned_referral;
        self.earned_other += delta.earned_other;
        if delta.touches_earn {
            self.last_earn_at = Some(entry.created_at);
        }
        if delta.touches_redeem {
            self.last_redeem_at = Some(entry.created_at);
        }
        self.updated_at = entry.created_at;
    }

    /// Projects this snapshot into the caller-facing balance shape.
    pub fn balance(&self) -> Balance {
        Balance {
            available: self.available,
            pending: self.pending,
            lifetime_earned: self.lifetime_earned,
            lifetime_redeemed: self.lifetime_redeemed,
            lifetime_expired: self.lifetime_expired,
        }
    }
}

/// The snapshot-field deltas produced by a single ledger entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SnapshotDelta {
    pub available: i64,
    pub pending: i64,
    pub lifetime_earned: i64,
    pub lifetime_redeemed: i64,
    pub lifetime_expired: i64,
    pub earned_trade_in: i64,
    pub earned_cashback: i64,
    pub earned_promotion: i64,
    pub earned_referral: i64,
    pub earned_other: i64,
    pub touches_earn: bool,
    pub touches_redeem: bool,
}

impl SnapshotDelta {
    /// Derives the snapshot effect of one ledger entry.
    ///
    /// ## Mapping
    /// ```text
    /// earn kinds, amount > 0   → available +a, lifetime_earned +a, category +a
    /// redemption / debit (< 0) → available +a, lifetime_redeemed -a
    /// expiration (< 0)         → available +a, lifetime_expired  -a
    /// reversal (< 0)           → available +a, lifetime_earned   +a
    /// reversal (> 0)           → available +a, lifetime_redeemed +a (undo)
    /// ```
    pub fn from_entry(entry: &LedgerEntry) -> SnapshotDelta {
        let a = entry.amount;
        let mut delta = SnapshotDelta {
            available: a,
            ..SnapshotDelta::default()
        };

        match entry.event_kind {
            EventKind::Redemption => {
                delta.lifetime_redeemed = -a;
                delta.touches_redeem = true;
            }
            EventKind::Expiration => {
                delta.lifetime_expired = -a;
            }
            EventKind::Reversal => {
                if a < 0 {
                    // Reversing an earn shrinks lifetime earnings.
                    delta.lifetime_earned = a;
                } else {
                    // Reversing a redemption gives the spend back.
                    delta.lifetime_redeemed = -a;
                }
            }
            kind if a > 0 => {
                delta.lifetime_earned = a;
                delta.touches_earn = true;
                match kind {
                    EventKind::TradeIn => delta.earned_trade_in = a,
                    EventKind::PurchaseCashback => delta.earned_cashback = a,
                    EventKind::PromotionBonus => delta.earned_promotion = a,
                    EventKind::Referral => delta.earned_referral = a,
                    _ => delta.earned_other = a,
                }
            }
            _ => {
                // Negative manual adjustment: treated as a redeem-side move.
                delta.lifetime_redeemed = -a;
                delta.touches_redeem = true;
            }
        }

        delta
    }
}

// =============================================================================
// Balance (projector output)
// =============================================================================

/// Caller-facing balance projection for one (member, currency).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    pub available: i64,
    pub pending: i64,
    pub lifetime_earned: i64,
    pub lifetime_redeemed: i64,
    pub lifetime_expired: i64,
}

// =============================================================================
// Pagination
// =============================================================================

/// Simple limit/offset page for history queries, newest-first.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Page {
    pub limit: u32,
    pub offset: u32,
}

impl Page {
    /// First page with the given size.
    pub const fn first(limit: u32) -> Self {
        Page { limit, offset: 0 }
    }
}

impl Default for Page {
    fn default() -> Self {
        Page {
            limit: 50,
            offset: 0,
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(kind: EventKind, amount: i64) -> LedgerEntry {
        LedgerEntry {
            id: "e-1".to_string(),
            tenant_id: "t-1".to_string(),
            member_id: "m-1".to_string(),
            currency: Currency::Points,
            amount,
            balance_after: 0,
            event_kind: kind,
            source_type: None,
            source_id: None,
            promotion_id: None,
            expires_at: None,
            points: if amount > 0 { Some(amount) } else { None },
            remaining_points: if amount > 0 { Some(amount) } else { None },
            related_entry_id: None,
            reversal_reason: None,
            created_by: "test".to_string(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_event_kind_round_trip() {
        for token in EventKind::ALL {
            let kind: EventKind = token.parse().unwrap();
            assert_eq!(kind.as_str(), token);
        }
        assert!("gift_card".parse::<EventKind>().is_err());
    }

    #[test]
    fn test_currency_rejects_unknown() {
        assert!("miles".parse::<Currency>().is_err());
        assert_eq!("points".parse::<Currency>().unwrap(), Currency::Points);
    }

    #[test]
    fn test_channel_accepts() {
        assert!(Channel::All.accepts(Channel::InStore));
        assert!(Channel::InStore.accepts(Channel::InStore));
        assert!(!Channel::InStore.accepts(Channel::Online));
        // A request not pinned to a channel matches channel-specific promos.
        assert!(Channel::Online.accepts(Channel::All));
    }

    #[test]
    fn test_audience_accepts() {
        assert!(Audience::MembersOnly.accepts(true));
        assert!(!Audience::MembersOnly.accepts(false));
        assert!(Audience::AllCustomers.accepts(false));
    }

    #[test]
    fn test_snapshot_delta_earn() {
        let delta = SnapshotDelta::from_entry(&entry(EventKind::TradeIn, 500));
        assert_eq!(delta.available, 500);
        assert_eq!(delta.lifetime_earned, 500);
        assert_eq!(delta.earned_trade_in, 500);
        assert!(delta.touches_earn);
        assert!(!delta.touches_redeem);
    }

    #[test]
    fn test_snapshot_delta_redemption() {
        let delta = SnapshotDelta::from_entry(&entry(EventKind::Redemption, -300));
        assert_eq!(delta.available, -300);
        assert_eq!(delta.lifetime_redeemed, 300);
        assert!(delta.touches_redeem);
    }

    #[test]
    fn test_snapshot_delta_expiration() {
        let delta = SnapshotDelta::from_entry(&entry(EventKind::Expiration, -200));
        assert_eq!(delta.available, -200);
        assert_eq!(delta.lifetime_expired, 200);
        assert_eq!(delta.lifetime_redeemed, 0);
    }

    #[test]
    fn test_snapshot_apply_sequence() {
        let now = Utc::now();
        let mut snapshot = MemberBalanceSnapshot::empty("t-1", "m-1", Currency::Points, now);

        snapshot.apply(&entry(EventKind::PurchaseCashback, 500));
        snapshot.apply(&entry(EventKind::Redemption, -200));

        assert_eq!(snapshot.available, 300);
        assert_eq!(snapshot.lifetime_earned, 500);
        assert_eq!(snapshot.lifetime_redeemed, 200);
        assert_eq!(snapshot.earned_cashback, 500);
        assert!(snapshot.last_earn_at.is_some());
        assert!(snapshot.last_redeem_at.is_some());
    }

    #[test]
    fn test_member_external_account() {
        let now = Utc::now();
        let mut member = Member {
            id: "m-1".to_string(),
            tenant_id: "t-1".to_string(),
            external_account_id: None,
            tier: "bronze".to_string(),
            status: MemberStatus::Active,
            created_at: now,
            updated_at: now,
        };
        assert!(!member.has_external_account());

        member.external_account_id = Some(String::new());
        assert!(!member.has_external_account());

        member.external_account_id = Some("acct-1".to_string());
        assert!(member.has_external_account());
    }

    #[test]
    fn test_lot_expiry_check() {
        let mut lot = entry(EventKind::TradeIn, 500);
        let now = Utc::now();
        assert!(!lot.is_expired_at(now));

        lot.expires_at = Some(now - chrono::Duration::days(1));
        assert!(lot.is_expired_at(now));

        lot.expires_at = Some(now + chrono::Duration::days(30));
        assert!(!lot.is_expired_at(now));
    }
}
