//! # Points Engine
//!
//! Points accrual and redemption over the lot-tracked points currency.
//!
//! ## Lot Consumption
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      redeem_points()                                    │
//! │                                                                         │
//! │  open lots, consumption order:                                          │
//! │    soonest expiration first (no-expiry lots last), then oldest first    │
//! │                                                                         │
//! │  lot A (exp Mar 1, 100 left)  ──drain 100──┐                           │
//! │  lot B (exp Jun 1, 200 left)  ──drain  50──┼── redeem 150              │
//! │  lot C (no expiry, 300 left)  ── untouched ┘                           │
//! │                                                                         │
//! │  drains + one negative Redemption entry commit as one transaction       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Points never touch the external platform: both sides of every points
//! operation live in the local ledger.

use chrono::{Duration, Utc};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::notify::LoyaltyNotifier;
use loyalty_core::validation::{
    validate_amount_positive, validate_member_id, validate_tenant_id,
};
use loyalty_core::{
    resolve_earning, Balance, Currency, EarnContext, EarnSource, EventKind, LedgerEntry, Money,
    Page, Points, ProductContext,
};
use loyalty_db::{Database, NewLedgerEntry};

// =============================================================================
// Requests
// =============================================================================

/// Owned product dimensions for earning-rule filters.
#[derive(Debug, Clone, Default)]
pub struct EarnProduct {
    pub collections: Vec<String>,
    pub vendor: Option<String>,
    pub product_type: Option<String>,
    pub tags: Vec<String>,
}

impl EarnProduct {
    /// Borrows this product as the rule-gating context.
    pub fn as_context(&self) -> ProductContext<'_> {
        ProductContext {
            collections: &self.collections,
            vendor: self.vendor.as_deref(),
            product_type: self.product_type.as_deref(),
            tags: &self.tags,
        }
    }
}

/// One points accrual.
#[derive(Debug, Clone)]
pub struct EarnRequest {
    pub tenant_id: String,
    pub member_id: String,

    /// The triggering business event; selects the candidate rules.
    pub source: EarnSource,

    /// Caller-provided base points; zero lets a base_rate rule derive the
    /// base from `spend`.
    pub base_points: Points,

    /// Qualifying spend, for base_rate rules.
    pub spend: Money,

    /// Product being transacted, for rule filters.
    pub product: Option<EarnProduct>,

    pub source_type: Option<String>,
    pub source_id: Option<String>,
    pub created_by: String,
}

/// One points redemption.
#[derive(Debug, Clone)]
pub struct RedeemRequest {
    pub tenant_id: String,
    pub member_id: String,

    /// Always positive; the ledger entry carries the negation.
    pub points: Points,

    pub source_type: Option<String>,
    pub source_id: Option<String>,
    pub created_by: String,
}

/// The ledger event kind recorded for each earn source.
fn event_kind_for(source: EarnSource) -> EventKind {
    match source {
        EarnSource::Purchase => EventKind::PurchaseCashback,
        EarnSource::TradeIn => EventKind::TradeIn,
        EarnSource::Referral => EventKind::Referral,
        EarnSource::Signup => EventKind::PromotionBonus,
        EarnSource::Adjustment => EventKind::ManualAdjustment,
    }
}

// =============================================================================
// Points Engine
// =============================================================================

/// Accrues and redeems loyalty points.
#[derive(Clone)]
pub struct PointsEngine {
    db: Database,
    notifier: Arc<dyn LoyaltyNotifier>,
    config: Arc<EngineConfig>,
}

impl PointsEngine {
    /// Creates a new points engine.
    pub fn new(db: Database, notifier: Arc<dyn LoyaltyNotifier>, config: Arc<EngineConfig>) -> Self {
        PointsEngine {
            db,
            notifier,
            config,
        }
    }

    /// Accrues points for one business event.
    ///
    /// Resolution: the earning rules gate on source, tier, member age and
    /// product filters; surviving rules combine additively; the tier
    /// multiplier from policy contributes its incremental bonus on the
    /// base. Returns `None` when nothing accrues.
    pub async fn earn_points(&self, req: EarnRequest) -> EngineResult<Option<LedgerEntry>> {
        validate_tenant_id(&req.tenant_id)?;
        validate_member_id(&req.member_id)?;

        let member = self.db.members().require(&req.tenant_id, &req.member_id).await?;
        let policy = self.config.policy_for(&req.tenant_id);
        let now = Utc::now();

        let candidates = self
            .db
            .earning_rules()
            .candidates(&req.tenant_id, req.source)
            .await?;

        let product_ctx = req.product.as_ref().map(EarnProduct::as_context);
        let ctx = EarnContext {
            source: req.source,
            tier: &member.tier,
            is_new_member: member.is_new_member(now, policy.new_member_days),
            product: product_ctx.as_ref(),
        };
        let gated: Vec<_> = candidates
            .into_iter()
            .filter(|rule| rule.applies_to(&ctx))
            .collect();

        let outcome = resolve_earning(&gated, req.base_points, req.spend);
        let tier_bonus = outcome.base.incremental_bonus(policy.tier_multiplier(&member.tier));
        let total = outcome.total + tier_bonus;
        if !total.is_positive() {
            debug!(
                member_id = %req.member_id,
                source = %req.source,
                "No points accrued"
            );
            return Ok(None);
        }

        let expires_at = policy
            .points_expiration_days
            .map(|days| now + Duration::days(days));

        let mut tx = self.db.begin().await?;
        let entry = self
            .db
            .ledger()
            .append_tx(
                &mut tx,
                NewLedgerEntry {
                    tenant_id: req.tenant_id.clone(),
                    member_id: req.member_id.clone(),
                    currency: Currency::Points,
                    amount: total.value(),
                    balance_after: None,
                    event_kind: event_kind_for(req.source),
                    source_type: req.source_type,
                    source_id: req.source_id,
                    promotion_id: None,
                    expires_at,
                    related_entry_id: None,
                    reversal_reason: None,
                    created_by: req.created_by,
                },
            )
            .await?;
        for rule_id in &outcome.applied {
            self.db
                .earning_rules()
                .increment_uses_tx(&mut tx, &req.tenant_id, rule_id)
                .await?;
        }
        tx.commit().await?;

        debug!(
            member_id = %req.member_id,
            base = outcome.base.value(),
            total = total.value(),
            rules = outcome.applied.len(),
            "Points accrued"
        );

        if let Err(err) = self.notifier.points_awarded(&req.member_id, total) {
            warn!(member_id = %req.member_id, %err, "Points notification dropped");
        }

        Ok(Some(entry))
    }

    /// Redeems points against the member's open lots.
    ///
    /// Lots drain in consumption order inside one transaction with the
    /// redemption entry; a balance shortfall aborts before any drain.
    pub async fn redeem_points(&self, req: RedeemRequest) -> EngineResult<LedgerEntry> {
        validate_tenant_id(&req.tenant_id)?;
        validate_member_id(&req.member_id)?;
        validate_amount_positive("points", req.points.value())?;

        self.db.members().require(&req.tenant_id, &req.member_id).await?;

        let now = Utc::now();
        let mut tx = self.db.begin().await?;

        let lots = self
            .db
            .ledger()
            .open_lots_tx(&mut tx, &req.tenant_id, &req.member_id, now)
            .await?;
        let available: i64 = lots.iter().map(|lot| lot.remaining().value()).sum();

        if available < req.points.value() {
            return Err(EngineError::InsufficientBalance {
                currency: Currency::Points,
                available,
                requested: req.points.value(),
            });
        }

        let mut left = req.points;
        for lot in &lots {
            if !left.is_positive() {
                break;
            }
            let take = left.min(lot.remaining());
            self.db
                .ledger()
                .drain_lot_tx(&mut tx, &req.tenant_id, &lot.id, take.value())
                .await?;
            left -= take;
        }

        let entry = self
            .db
            .ledger()
            .append_tx(
                &mut tx,
                NewLedgerEntry {
                    tenant_id: req.tenant_id.clone(),
                    member_id: req.member_id.clone(),
                    currency: Currency::Points,
                    amount: -req.points.value(),
                    balance_after: None,
                    event_kind: EventKind::Redemption,
                    source_type: req.source_type,
                    source_id: req.source_id,
                    promotion_id: None,
                    expires_at: None,
                    related_entry_id: None,
                    reversal_reason: None,
                    created_by: req.created_by,
                },
            )
            .await?;
        tx.commit().await?;

        if let Err(err) = self.notifier.points_redeemed(&req.member_id, req.points) {
            warn!(member_id = %req.member_id, %err, "Points notification dropped");
        }

        Ok(entry)
    }

    /// The member's points balance.
    ///
    /// `available` is the open-lot sum, which walks past expired lots the
    /// sweeper has not visited yet; the lifetime figures come from the
    /// snapshot.
    pub async fn points_balance(&self, tenant_id: &str, member_id: &str) -> EngineResult<Balance> {
        validate_tenant_id(tenant_id)?;
        validate_member_id(member_id)?;

        let mut balance = self
            .db
            .snapshots()
            .get(tenant_id, member_id, Currency::Points)
            .await?
            .map(|snapshot| snapshot.balance())
            .unwrap_or_default();
        balance.available = self
            .db
            .ledger()
            .points_available(tenant_id, member_id, Utc::now())
            .await?;
        Ok(balance)
    }

    /// The member's points history, newest first.
    pub async fn history(
        &self,
        tenant_id: &str,
        member_id: &str,
        page: Page,
    ) -> EngineResult<Vec<LedgerEntry>> {
        validate_tenant_id(tenant_id)?;
        validate_member_id(member_id)?;
        Ok(self
            .db
            .ledger()
            .history(tenant_id, member_id, Currency::Points, page)
            .await?)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::NoOpNotifier;
    use loyalty_core::{Member, MemberStatus, PointsEarningRule, RuleType, TenantPolicy};
    use loyalty_db::DbConfig;

    const TENANT: &str = "t-1";
    const MEMBER: &str = "m-1";

    async fn harness(config: EngineConfig) -> (PointsEngine, Database) {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let engine = PointsEngine::new(db.clone(), Arc::new(NoOpNotifier), Arc::new(config));
        (engine, db)
    }

    async fn seed_member(db: &Database, tier: &str) {
        let now = Utc::now();
        db.members()
            .upsert(&Member {
                id: MEMBER.to_string(),
                tenant_id: TENANT.to_string(),
                external_account_id: None,
                tier: tier.to_string(),
                status: MemberStatus::Active,
                created_at: now,
                updated_at: now,
            })
            .await
            .unwrap();
    }

    fn earn_request(base: i64) -> EarnRequest {
        EarnRequest {
            tenant_id: TENANT.to_string(),
            member_id: MEMBER.to_string(),
            source: EarnSource::Purchase,
            base_points: Points::new(base),
            spend: Money::zero(),
            product: None,
            source_type: Some("order".to_string()),
            source_id: Some("o-1".to_string()),
            created_by: "test".to_string(),
        }
    }

    fn redeem_request(points: i64) -> RedeemRequest {
        RedeemRequest {
            tenant_id: TENANT.to_string(),
            member_id: MEMBER.to_string(),
            points: Points::new(points),
            source_type: Some("reward".to_string()),
            source_id: Some("r-1".to_string()),
            created_by: "test".to_string(),
        }
    }

    fn bonus_rule(id: &str, bonus: i64) -> PointsEarningRule {
        let now = Utc::now();
        PointsEarningRule {
            id: id.to_string(),
            tenant_id: TENANT.to_string(),
            name: format!("rule {id}"),
            rule_type: RuleType::BonusPoints,
            points_per_dollar_hundredths: 0,
            multiplier_hundredths: 100,
            bonus_points: bonus,
            percentage_bps: 0,
            source: EarnSource::Purchase,
            filter_collection: None,
            filter_vendor: None,
            filter_product_type: None,
            filter_tag: None,
            tier_restriction: None,
            new_member_only: false,
            stackable: true,
            priority: 0,
            exclusive_group: None,
            max_uses: None,
            current_uses: 0,
            active: true,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_earn_creates_lot_with_policy_expiry() {
        let mut policy = TenantPolicy::default();
        policy.points_expiration_days = Some(30);
        let (engine, _db) = harness(EngineConfig::default().default_policy(policy)).await;
        seed_member(&_db, "bronze").await;

        let entry = engine.earn_points(earn_request(100)).await.unwrap().unwrap();

        assert_eq!(entry.amount, 100);
        assert_eq!(entry.points, Some(100));
        assert_eq!(entry.remaining_points, Some(100));
        assert!(entry.expires_at.is_some());
    }

    #[tokio::test]
    async fn test_earn_applies_rules_and_tier_multiplier() {
        let mut policy = TenantPolicy::default();
        policy.tier_point_multipliers.insert("gold".to_string(), 200);
        let (engine, db) = harness(EngineConfig::default().default_policy(policy)).await;
        seed_member(&db, "gold").await;
        db.earning_rules().insert(&bonus_rule("flat-25", 25)).await.unwrap();

        // 100 base + 25 rule bonus + 100 tier double-points bonus.
        let entry = engine.earn_points(earn_request(100)).await.unwrap().unwrap();
        assert_eq!(entry.amount, 225);

        let rule = db.earning_rules().get(TENANT, "flat-25").await.unwrap().unwrap();
        assert_eq!(rule.current_uses, 1);
    }

    #[tokio::test]
    async fn test_earn_nothing_returns_none() {
        let (engine, db) = harness(EngineConfig::default()).await;
        seed_member(&db, "bronze").await;

        let entry = engine.earn_points(earn_request(0)).await.unwrap();
        assert!(entry.is_none());
    }

    #[tokio::test]
    async fn test_redeem_drains_lots_in_consumption_order() {
        let mut policy = TenantPolicy::default();
        policy.points_expiration_days = Some(30);
        let (engine, db) = harness(EngineConfig::default().default_policy(policy)).await;
        seed_member(&db, "bronze").await;

        // Lot A expires in 30 days; lot B never expires and must drain last.
        engine.earn_points(earn_request(100)).await.unwrap().unwrap();
        let no_expiry = EngineConfig::default();
        let engine_b = PointsEngine::new(db.clone(), Arc::new(NoOpNotifier), Arc::new(no_expiry));
        engine_b.earn_points(earn_request(200)).await.unwrap().unwrap();

        let entry = engine.redeem_points(redeem_request(150)).await.unwrap();
        assert_eq!(entry.amount, -150);
        assert_eq!(entry.event_kind, EventKind::Redemption);

        let lots = db.ledger().open_lots(TENANT, MEMBER, Utc::now()).await.unwrap();
        // The expiring lot is gone; 50 came out of the open-ended one.
        assert_eq!(lots.len(), 1);
        assert_eq!(lots[0].remaining_points, Some(150));

        let balance = engine.points_balance(TENANT, MEMBER).await.unwrap();
        assert_eq!(balance.available, 150);
        assert_eq!(balance.lifetime_redeemed, 150);
    }

    #[tokio::test]
    async fn test_redeem_insufficient_aborts_without_writes() {
        let (engine, db) = harness(EngineConfig::default()).await;
        seed_member(&db, "bronze").await;
        engine.earn_points(earn_request(100)).await.unwrap().unwrap();

        let result = engine.redeem_points(redeem_request(500)).await;
        assert!(matches!(
            result,
            Err(EngineError::InsufficientBalance {
                currency: Currency::Points,
                available: 100,
                requested: 500,
            })
        ));

        // The transaction rolled back: the lot is untouched and no
        // redemption entry exists.
        let lots = db.ledger().open_lots(TENANT, MEMBER, Utc::now()).await.unwrap();
        assert_eq!(lots[0].remaining_points, Some(100));
        let history = engine.history(TENANT, MEMBER, Page::default()).await.unwrap();
        assert_eq!(history.len(), 1);
    }

    #[tokio::test]
    async fn test_balance_excludes_expired_lots() {
        let (engine, db) = harness(EngineConfig::default()).await;
        seed_member(&db, "bronze").await;

        // A lot that expired yesterday, appended directly.
        db.ledger()
            .append(NewLedgerEntry {
                tenant_id: TENANT.to_string(),
                member_id: MEMBER.to_string(),
                currency: Currency::Points,
                amount: 500,
                balance_after: None,
                event_kind: EventKind::PromotionBonus,
                source_type: None,
                source_id: None,
                promotion_id: None,
                expires_at: Some(Utc::now() - Duration::days(1)),
                related_entry_id: None,
                reversal_reason: None,
                created_by: "test".to_string(),
            })
            .await
            .unwrap();

        let balance = engine.points_balance(TENANT, MEMBER).await.unwrap();
        // The snapshot still carries the earn; spendable is the open-lot sum.
        assert_eq!(balance.available, 0);
        assert_eq!(balance.lifetime_earned, 500);
    }
}
