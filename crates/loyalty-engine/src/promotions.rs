//! # Promotion Evaluator
//!
//! Loads candidate promotions, applies the full six-dimension gate, and
//! resolves the stacking policy into a bonus total.
//!
//! ## Evaluation Pipeline
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        evaluate()                                       │
//! │                                                                         │
//! │  SQL candidates (tenant, type, active flag, absolute window)           │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  is_active_at(tenant-local now)  ← daily window, weekday, usage cap    │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  applies_to(ctx)  ← channel, audience, tier, order minimums            │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  per-member usage cap  ← counted against the member's ledger           │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  resolve_promotion_stack()  ← one exclusive winner + all stackables    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Daily windows and weekday masks are evaluated in the tenant's local
//! time, derived from the tenant policy's UTC offset.

use chrono::{DateTime, FixedOffset, Offset, Utc};
use std::sync::Arc;
use tracing::debug;

use crate::config::EngineConfig;
use crate::error::EngineResult;
use loyalty_core::validation::validate_tenant_id;
use loyalty_core::{
    resolve_promotion_stack, Channel, Money, Promotion, PromotionContext, PromotionType,
    StackOutcome,
};
use loyalty_db::Database;

/// One bonus evaluation request.
#[derive(Debug, Clone)]
pub struct BonusRequest {
    pub tenant_id: String,

    /// `None` evaluates as a non-member (audience gate applies).
    pub member_id: Option<String>,

    pub promotion_type: PromotionType,

    /// The amount bonuses are computed from (payout, order value).
    pub base: Money,

    pub channel: Channel,
    pub item_count: i64,
    pub order_value: Money,
}

/// Promotion gating and stacking over the stored promotion set.
#[derive(Clone)]
pub struct PromotionEvaluator {
    db: Database,
    config: Arc<EngineConfig>,
}

impl PromotionEvaluator {
    /// Creates a new evaluator.
    pub fn new(db: Database, config: Arc<EngineConfig>) -> Self {
        PromotionEvaluator { db, config }
    }

    /// Converts an instant to the tenant's local wall clock.
    fn tenant_local(&self, tenant_id: &str, at: DateTime<Utc>) -> DateTime<FixedOffset> {
        let minutes = self.config.policy_for(tenant_id).utc_offset_minutes;
        let offset = FixedOffset::east_opt(minutes * 60).unwrap_or_else(|| Utc.fix());
        at.with_timezone(&offset)
    }

    /// Promotions applicable right now for a tenant, every time gate
    /// applied, highest priority first.
    pub async fn active_promotions(
        &self,
        tenant_id: &str,
        at: DateTime<Utc>,
    ) -> EngineResult<Vec<Promotion>> {
        validate_tenant_id(tenant_id)?;

        let local = self.tenant_local(tenant_id, at);
        let candidates = self.db.promotions().all_candidates(tenant_id, at).await?;
        Ok(candidates
            .into_iter()
            .filter(|p| p.is_active_at(local))
            .collect())
    }

    /// Evaluates the full gate and stacking policy for one request.
    pub async fn evaluate(
        &self,
        req: &BonusRequest,
        at: DateTime<Utc>,
    ) -> EngineResult<StackOutcome> {
        validate_tenant_id(&req.tenant_id)?;

        // Member context drives the audience and tier gates.
        let member = match req.member_id.as_deref() {
            Some(member_id) => Some(self.db.members().require(&req.tenant_id, member_id).await?),
            None => None,
        };
        let tier = member.as_ref().map(|m| m.tier.as_str()).unwrap_or("");

        let ctx = PromotionContext {
            channel: req.channel,
            is_member: member.is_some(),
            tier,
            item_count: req.item_count,
            order_value: req.order_value,
        };

        let local = self.tenant_local(&req.tenant_id, at);
        let candidates = self
            .db
            .promotions()
            .candidates(&req.tenant_id, req.promotion_type, at)
            .await?;

        let mut eligible: Vec<Promotion> = Vec::new();
        for promotion in candidates {
            if !promotion.is_active_at(local) || !promotion.applies_to(&ctx) {
                continue;
            }

            // Per-member cap: counted against the member's own ledger.
            if let (Some(cap), Some(member_id)) =
                (promotion.max_uses_per_member, req.member_id.as_deref())
            {
                let uses = self
                    .db
                    .ledger()
                    .promotion_member_uses(&req.tenant_id, member_id, &promotion.id)
                    .await?;
                if uses >= cap {
                    continue;
                }
            }

            eligible.push(promotion);
        }

        let outcome = resolve_promotion_stack(&eligible, req.base);
        debug!(
            tenant_id = %req.tenant_id,
            promotion_type = %req.promotion_type,
            eligible = eligible.len(),
            bonus_cents = outcome.total_bonus.cents(),
            "Promotion stack resolved"
        );
        Ok(outcome)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveTime, TimeZone};
    use loyalty_core::{
        Audience, Currency, EventKind, Member, MemberStatus, TenantPolicy,
    };
    use loyalty_db::{DbConfig, NewLedgerEntry};

    const TENANT: &str = "t-1";
    const MEMBER: &str = "m-1";

    async fn harness(config: EngineConfig) -> (PromotionEvaluator, Database) {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let evaluator = PromotionEvaluator::new(db.clone(), Arc::new(config));
        (evaluator, db)
    }

    async fn seed_member(db: &Database) {
        let now = Utc::now();
        db.members()
            .upsert(&Member {
                id: MEMBER.to_string(),
                tenant_id: TENANT.to_string(),
                external_account_id: None,
                tier: "gold".to_string(),
                status: MemberStatus::Active,
                created_at: now,
                updated_at: now,
            })
            .await
            .unwrap();
    }

    fn promo(id: &str) -> Promotion {
        let now = Utc::now();
        Promotion {
            id: id.to_string(),
            tenant_id: TENANT.to_string(),
            name: format!("promo {id}"),
            promotion_type: PromotionType::PurchaseCashback,
            bonus_bps: 1000,
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

    fn request() -> BonusRequest {
        BonusRequest {
            tenant_id: TENANT.to_string(),
            member_id: Some(MEMBER.to_string()),
            promotion_type: PromotionType::PurchaseCashback,
            base: Money::from_cents(10_000),
            channel: Channel::Online,
            item_count: 1,
            order_value: Money::from_cents(10_000),
        }
    }

    #[tokio::test]
    async fn test_per_member_cap_blocks_repeat_use() {
        let (evaluator, db) = harness(EngineConfig::default()).await;
        seed_member(&db).await;

        let mut p = promo("p-cap");
        p.max_uses_per_member = Some(1);
        db.promotions().insert(&p).await.unwrap();

        let first = evaluator.evaluate(&request(), Utc::now()).await.unwrap();
        assert_eq!(first.total_bonus.cents(), 1000);
        assert_eq!(first.winner_id.as_deref(), Some("p-cap"));

        // One applied entry on the member's ledger exhausts the cap.
        db.ledger()
            .append(NewLedgerEntry {
                tenant_id: TENANT.to_string(),
                member_id: MEMBER.to_string(),
                currency: Currency::Credit,
                amount: 1000,
                balance_after: Some(1000),
                event_kind: EventKind::PurchaseCashback,
                source_type: Some("order".to_string()),
                source_id: Some("o-1".to_string()),
                promotion_id: Some("p-cap".to_string()),
                expires_at: None,
                related_entry_id: None,
                reversal_reason: None,
                created_by: "test".to_string(),
            })
            .await
            .unwrap();

        let second = evaluator.evaluate(&request(), Utc::now()).await.unwrap();
        assert_eq!(second.total_bonus.cents(), 0);
        assert!(second.winner_id.is_none());
    }

    #[tokio::test]
    async fn test_members_only_promotion_skips_non_members() {
        let (evaluator, db) = harness(EngineConfig::default()).await;
        seed_member(&db).await;

        let mut p = promo("p-members");
        p.audience = Audience::MembersOnly;
        db.promotions().insert(&p).await.unwrap();

        let mut req = request();
        req.member_id = None;
        let outcome = evaluator.evaluate(&req, Utc::now()).await.unwrap();
        assert!(outcome.winner_id.is_none());

        let outcome = evaluator.evaluate(&request(), Utc::now()).await.unwrap();
        assert_eq!(outcome.winner_id.as_deref(), Some("p-members"));
    }

    #[tokio::test]
    async fn test_daily_window_evaluated_in_tenant_local_time() {
        // Tenant clock runs at UTC-5; the window is 09:00-17:00 local.
        let mut policy = TenantPolicy::default();
        policy.utc_offset_minutes = -300;
        let (evaluator, db) = harness(EngineConfig::default().default_policy(policy)).await;
        seed_member(&db).await;

        let mut p = promo("p-daytime");
        p.daily_start_time = NaiveTime::from_hms_opt(9, 0, 0);
        p.daily_end_time = NaiveTime::from_hms_opt(17, 0, 0);
        db.promotions().insert(&p).await.unwrap();

        // 15:00 UTC is 10:00 local: inside the window.
        let morning = Utc.with_ymd_and_hms(2026, 8, 19, 15, 0, 0).unwrap();
        let active = evaluator.active_promotions(TENANT, morning).await.unwrap();
        assert_eq!(active.len(), 1);

        // 13:30 UTC would pass a naive UTC check, but it is 08:30 local
        // and the store has not opened yet.
        let early = Utc.with_ymd_and_hms(2026, 8, 19, 13, 30, 0).unwrap();
        let active = evaluator.active_promotions(TENANT, early).await.unwrap();
        assert!(active.is_empty());

        let outcome = evaluator.evaluate(&request(), morning).await.unwrap();
        assert_eq!(outcome.total_bonus.cents(), 1000);
    }
}
