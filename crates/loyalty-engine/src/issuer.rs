//! # Credit Issuer
//!
//! Store-credit issuance and deduction against the external commerce
//! platform, plus the cashback/trade-in orchestration that feeds it.
//!
//! ## Operation Order
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        add_credit()                                     │
//! │                                                                         │
//! │  1. Validate request, load member, require linked platform account     │
//! │  2. platform.credit_account()        ← EXTERNAL WRITE FIRST            │
//! │     └── error/timeout → return, NOTHING written locally                │
//! │  3. Append ledger entry (+ snapshot)  ┐ one transaction                │
//! │     with the platform's balance       │                                │
//! │  4. Bump applied promotions' usage    ┘                                │
//! │  5. Notify the member                 ← failure logged, never fatal    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::notify::LoyaltyNotifier;
use crate::platform::{call_with_timeout, CommercePlatform};
use crate::promotions::{BonusRequest, PromotionEvaluator};
use loyalty_core::validation::{
    validate_amount_positive, validate_description, validate_member_id, validate_tenant_id,
};
use loyalty_core::{
    Balance, Channel, Currency, EventKind, LedgerEntry, Member, Money, Page, PromotionType,
};
use loyalty_db::{Database, NewLedgerEntry};

// =============================================================================
// Requests
// =============================================================================

/// One credit issuance or deduction.
#[derive(Debug, Clone)]
pub struct CreditRequest {
    pub tenant_id: String,
    pub member_id: String,

    /// Always positive; `deduct_credit` decides the entry's sign.
    pub amount: Money,

    pub event_kind: EventKind,
    pub source_type: Option<String>,
    pub source_id: Option<String>,

    /// Winning promotion recorded on the entry.
    pub promotion_id: Option<String>,

    /// Every promotion whose usage counter this operation consumes.
    pub applied_promotions: Vec<String>,

    /// When the unused credit expires, if the issuing policy says so.
    pub expires_at: Option<DateTime<Utc>>,

    pub created_by: String,

    /// Member-visible note, forwarded to the platform.
    pub note: String,
}

/// A completed order to award cashback for.
#[derive(Debug, Clone)]
pub struct CashbackOrder {
    pub tenant_id: String,
    pub member_id: String,
    pub order_id: String,
    pub order_value: Money,
    pub item_count: i64,
    pub channel: Channel,
    pub created_by: String,
}

/// An accepted trade-in to pay out.
#[derive(Debug, Clone)]
pub struct TradeInPayout {
    pub tenant_id: String,
    pub member_id: String,
    pub trade_in_id: String,

    /// Appraised value; promotions stack their bonuses on top.
    pub base_value: Money,

    pub channel: Channel,
    pub created_by: String,
}

// =============================================================================
// Credit Issuer
// =============================================================================

/// Issues and deducts store credit, external-platform-first.
#[derive(Clone)]
pub struct CreditIssuer {
    db: Database,
    platform: Arc<dyn CommercePlatform>,
    notifier: Arc<dyn LoyaltyNotifier>,
    evaluator: PromotionEvaluator,
    config: Arc<EngineConfig>,
}

impl CreditIssuer {
    /// Creates a new credit issuer.
    pub fn new(
        db: Database,
        platform: Arc<dyn CommercePlatform>,
        notifier: Arc<dyn LoyaltyNotifier>,
        config: Arc<EngineConfig>,
    ) -> Self {
        let evaluator = PromotionEvaluator::new(db.clone(), config.clone());
        CreditIssuer {
            db,
            platform,
            notifier,
            evaluator,
            config,
        }
    }

    /// The member's linked platform account, or the error every
    /// credit-currency operation fails with without one.
    fn require_account(member: &Member) -> EngineResult<String> {
        member
            .external_account_id
            .as_deref()
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .ok_or_else(|| EngineError::ExternalAccountMissing {
                member_id: member.id.clone(),
            })
    }

    fn validate(req: &CreditRequest) -> EngineResult<()> {
        validate_tenant_id(&req.tenant_id)?;
        validate_member_id(&req.member_id)?;
        validate_amount_positive("amount", req.amount.cents())?;
        validate_description(&req.note)?;
        Ok(())
    }

    /// Issues store credit: platform first, then the ledger.
    pub async fn add_credit(&self, req: CreditRequest) -> EngineResult<LedgerEntry> {
        Self::validate(&req)?;

        let member = self.db.members().require(&req.tenant_id, &req.member_id).await?;
        let account_id = Self::require_account(&member)?;

        let credit = call_with_timeout(
            self.config.platform_timeout,
            self.platform.credit_account(&account_id, req.amount, &req.note),
        )
        .await?;

        info!(
            member_id = %req.member_id,
            amount = %req.amount,
            platform_txn = %credit.transaction_id,
            "Platform credit issued"
        );

        let mut tx = self.db.begin().await?;
        let entry = self
            .db
            .ledger()
            .append_tx(
                &mut tx,
                NewLedgerEntry {
                    tenant_id: req.tenant_id.clone(),
                    member_id: req.member_id.clone(),
                    currency: Currency::Credit,
                    amount: req.amount.cents(),
                    balance_after: Some(credit.new_balance.cents()),
                    event_kind: req.event_kind,
                    source_type: req.source_type,
                    source_id: req.source_id,
                    promotion_id: req.promotion_id,
                    expires_at: req.expires_at,
                    related_entry_id: None,
                    reversal_reason: None,
                    created_by: req.created_by,
                },
            )
            .await?;
        for promotion_id in &req.applied_promotions {
            self.db
                .promotions()
                .increment_uses_tx(&mut tx, &req.tenant_id, promotion_id)
                .await?;
        }
        tx.commit().await?;

        if let Err(err) = self
            .notifier
            .credit_issued(&req.member_id, req.amount, credit.new_balance)
        {
            warn!(member_id = %req.member_id, %err, "Credit notification dropped");
        }

        Ok(entry)
    }

    /// Deducts store credit: platform first, then a negative ledger entry.
    ///
    /// The platform is authoritative for whether the balance covers the
    /// deduction; its rejection surfaces as [`EngineError::Platform`].
    pub async fn deduct_credit(&self, req: CreditRequest) -> EngineResult<LedgerEntry> {
        Self::validate(&req)?;

        let member = self.db.members().require(&req.tenant_id, &req.member_id).await?;
        let account_id = Self::require_account(&member)?;

        let debit = call_with_timeout(
            self.config.platform_timeout,
            self.platform.debit_account(&account_id, req.amount, &req.note),
        )
        .await?;

        let entry = self
            .db
            .ledger()
            .append(NewLedgerEntry {
                tenant_id: req.tenant_id.clone(),
                member_id: req.member_id.clone(),
                currency: Currency::Credit,
                amount: -req.amount.cents(),
                balance_after: Some(debit.new_balance.cents()),
                event_kind: req.event_kind,
                source_type: req.source_type,
                source_id: req.source_id,
                promotion_id: req.promotion_id,
                expires_at: None,
                related_entry_id: None,
                reversal_reason: None,
                created_by: req.created_by,
            })
            .await?;

        Ok(entry)
    }

    /// Awards purchase cashback for one order: tier base rate plus the
    /// resolved promotion stack, issued as a single entry recording the
    /// winning promotion.
    pub async fn award_purchase_cashback(
        &self,
        order: CashbackOrder,
    ) -> EngineResult<Option<LedgerEntry>> {
        validate_tenant_id(&order.tenant_id)?;
        validate_member_id(&order.member_id)?;
        validate_amount_positive("order_value", order.order_value.cents())?;

        let member = self
            .db
            .members()
            .require(&order.tenant_id, &order.member_id)
            .await?;
        let policy = self.config.policy_for(&order.tenant_id);
        let base = order.order_value.apply_rate(policy.cashback_rate(&member.tier));

        // Cashback promotions compute their percentage on the order value,
        // not on the tier-derived base.
        let stack = self
            .evaluator
            .evaluate(
                &BonusRequest {
                    tenant_id: order.tenant_id.clone(),
                    member_id: Some(order.member_id.clone()),
                    promotion_type: PromotionType::PurchaseCashback,
                    base: order.order_value,
                    channel: order.channel,
                    item_count: order.item_count,
                    order_value: order.order_value,
                },
                Utc::now(),
            )
            .await?;

        let total = base + stack.total_bonus;
        if total.cents() <= 0 {
            return Ok(None);
        }

        let entry = self
            .add_credit(CreditRequest {
                tenant_id: order.tenant_id,
                member_id: order.member_id,
                amount: total,
                event_kind: EventKind::PurchaseCashback,
                source_type: Some("order".to_string()),
                source_id: Some(order.order_id.clone()),
                promotion_id: stack.winner_id,
                applied_promotions: stack.applied,
                expires_at: None,
                created_by: order.created_by,
                note: format!("Cashback for order {}", order.order_id),
            })
            .await?;

        Ok(Some(entry))
    }

    /// The member's credit balance from the local projection.
    ///
    /// The platform holds the spendable balance; this is the issued/
    /// redeemed/expired view our ledger tracks. Compare against
    /// [`authoritative_credit_balance`](Self::authoritative_credit_balance)
    /// when reconciling.
    pub async fn credit_balance(&self, tenant_id: &str, member_id: &str) -> EngineResult<Balance> {
        validate_tenant_id(tenant_id)?;
        validate_member_id(member_id)?;
        Ok(self
            .db
            .snapshots()
            .get(tenant_id, member_id, Currency::Credit)
            .await?
            .map(|snapshot| snapshot.balance())
            .unwrap_or_default())
    }

    /// The platform's live balance for the member's linked account.
    pub async fn authoritative_credit_balance(
        &self,
        tenant_id: &str,
        member_id: &str,
    ) -> EngineResult<Money> {
        validate_tenant_id(tenant_id)?;
        validate_member_id(member_id)?;

        let member = self.db.members().require(tenant_id, member_id).await?;
        let account_id = Self::require_account(&member)?;
        let balance = call_with_timeout(
            self.config.platform_timeout,
            self.platform.get_balance(&account_id),
        )
        .await?;
        Ok(balance)
    }

    /// The member's credit history, newest first.
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
            .history(tenant_id, member_id, Currency::Credit, page)
            .await?)
    }

    /// Pays out a trade-in: appraised value plus the resolved trade-in
    /// promotion stack, issued as a single entry.
    pub async fn trade_in_payout(&self, payout: TradeInPayout) -> EngineResult<LedgerEntry> {
        validate_tenant_id(&payout.tenant_id)?;
        validate_member_id(&payout.member_id)?;
        validate_amount_positive("base_value", payout.base_value.cents())?;

        let stack = self
            .evaluator
            .evaluate(
                &BonusRequest {
                    tenant_id: payout.tenant_id.clone(),
                    member_id: Some(payout.member_id.clone()),
                    promotion_type: PromotionType::TradeInBonus,
                    base: payout.base_value,
                    channel: payout.channel,
                    item_count: 1,
                    order_value: payout.base_value,
                },
                Utc::now(),
            )
            .await?;

        self.add_credit(CreditRequest {
            tenant_id: payout.tenant_id,
            member_id: payout.member_id,
            amount: payout.base_value + stack.total_bonus,
            event_kind: EventKind::TradeIn,
            source_type: Some("trade_in".to_string()),
            source_id: Some(payout.trade_in_id.clone()),
            promotion_id: stack.winner_id,
            applied_promotions: stack.applied,
            expires_at: None,
            created_by: payout.created_by,
            note: format!("Trade-in payout {}", payout.trade_in_id),
        })
        .await
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::NoOpNotifier;
    use crate::platform::MockPlatform;
    use loyalty_core::{Audience, MemberStatus, Page, Promotion, TenantPolicy};
    use loyalty_db::DbConfig;
    use std::time::Duration;

    const TENANT: &str = "t-1";
    const MEMBER: &str = "m-1";
    const ACCOUNT: &str = "acct-1";

    async fn harness(config: EngineConfig) -> (CreditIssuer, Database, Arc<MockPlatform>) {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let platform = Arc::new(MockPlatform::new());
        let issuer = CreditIssuer::new(
            db.clone(),
            platform.clone(),
            Arc::new(NoOpNotifier),
            Arc::new(config),
        );
        (issuer, db, platform)
    }

    async fn seed_member(db: &Database, account: Option<&str>) {
        let now = Utc::now();
        db.members()
            .upsert(&Member {
                id: MEMBER.to_string(),
                tenant_id: TENANT.to_string(),
                external_account_id: account.map(str::to_string),
                tier: "gold".to_string(),
                status: MemberStatus::Active,
                created_at: now,
                updated_at: now,
            })
            .await
            .unwrap();
    }

    fn credit_request(cents: i64) -> CreditRequest {
        CreditRequest {
            tenant_id: TENANT.to_string(),
            member_id: MEMBER.to_string(),
            amount: Money::from_cents(cents),
            event_kind: EventKind::TradeIn,
            source_type: Some("trade_in".to_string()),
            source_id: Some("ti-1".to_string()),
            promotion_id: None,
            applied_promotions: vec![],
            expires_at: None,
            created_by: "test".to_string(),
            note: "test credit".to_string(),
        }
    }

    fn cashback_promo(id: &str, bonus_bps: i64, stackable: bool) -> Promotion {
        let now = Utc::now();
        Promotion {
            id: id.to_string(),
            tenant_id: TENANT.to_string(),
            name: format!("promo {id}"),
            promotion_type: PromotionType::PurchaseCashback,
            bonus_bps,
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
            stackable,
            priority: 0,
            max_uses: None,
            max_uses_per_member: None,
            current_uses: 0,
            active: true,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_add_credit_records_platform_balance() {
        let (issuer, db, platform) = harness(EngineConfig::default()).await;
        seed_member(&db, Some(ACCOUNT)).await;
        platform.set_balance(ACCOUNT, 1000);

        let entry = issuer.add_credit(credit_request(500)).await.unwrap();

        assert_eq!(entry.amount, 500);
        assert_eq!(entry.currency, Currency::Credit);
        // balance_after comes from the platform response, not local math.
        assert_eq!(entry.balance_after, 1500);
        assert_eq!(platform.balance(ACCOUNT), 1500);

        let snapshot = db
            .snapshots()
            .get(TENANT, MEMBER, Currency::Credit)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(snapshot.lifetime_earned, 500);
    }

    #[tokio::test]
    async fn test_platform_failure_leaves_ledger_untouched() {
        let (issuer, db, platform) = harness(EngineConfig::default()).await;
        seed_member(&db, Some(ACCOUNT)).await;
        platform.set_balance(ACCOUNT, 1000);
        platform.fail_account(ACCOUNT);

        let result = issuer.add_credit(credit_request(500)).await;
        assert!(matches!(result, Err(EngineError::Platform(_))));

        let history = db
            .ledger()
            .history(TENANT, MEMBER, Currency::Credit, Page::default())
            .await
            .unwrap();
        assert!(history.is_empty());
        assert!(db
            .snapshots()
            .get(TENANT, MEMBER, Currency::Credit)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_platform_timeout_writes_nothing() {
        let config = EngineConfig::default().platform_timeout(Duration::from_millis(5));
        let (issuer, db, platform) = harness(config).await;
        seed_member(&db, Some(ACCOUNT)).await;
        platform.set_balance(ACCOUNT, 1000);
        platform.set_call_delay(Duration::from_millis(100));

        let result = issuer.add_credit(credit_request(500)).await;
        assert!(matches!(result, Err(EngineError::PlatformTimeout(_))));

        // The call was abandoned before it mutated the platform, and no
        // local row exists either.
        assert_eq!(platform.balance(ACCOUNT), 1000);
        let history = db
            .ledger()
            .history(TENANT, MEMBER, Currency::Credit, Page::default())
            .await
            .unwrap();
        assert!(history.is_empty());
    }

    #[tokio::test]
    async fn test_credit_requires_external_account() {
        let (issuer, db, _platform) = harness(EngineConfig::default()).await;
        seed_member(&db, None).await;

        let result = issuer.add_credit(credit_request(500)).await;
        assert!(matches!(
            result,
            Err(EngineError::ExternalAccountMissing { .. })
        ));
    }

    #[tokio::test]
    async fn test_deduct_credit_appends_negative_entry() {
        let (issuer, db, platform) = harness(EngineConfig::default()).await;
        seed_member(&db, Some(ACCOUNT)).await;
        platform.set_balance(ACCOUNT, 1000);

        let mut req = credit_request(200);
        req.event_kind = EventKind::Redemption;
        let entry = issuer.deduct_credit(req).await.unwrap();

        assert_eq!(entry.amount, -200);
        assert_eq!(entry.balance_after, 800);
        assert_eq!(platform.balance(ACCOUNT), 800);

        let snapshot = db
            .snapshots()
            .get(TENANT, MEMBER, Currency::Credit)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(snapshot.lifetime_redeemed, 200);
    }

    #[tokio::test]
    async fn test_balance_views_local_and_platform() {
        let (issuer, db, platform) = harness(EngineConfig::default()).await;
        seed_member(&db, Some(ACCOUNT)).await;
        // The account starts with $10.00 the platform knows about but we
        // never issued; the two views diverge by exactly that amount.
        platform.set_balance(ACCOUNT, 1000);

        issuer.add_credit(credit_request(500)).await.unwrap();

        let local = issuer.credit_balance(TENANT, MEMBER).await.unwrap();
        assert_eq!(local.available, 500);
        assert_eq!(local.lifetime_earned, 500);

        let live = issuer
            .authoritative_credit_balance(TENANT, MEMBER)
            .await
            .unwrap();
        assert_eq!(live.cents(), 1500);
    }

    #[tokio::test]
    async fn test_cashback_is_one_entry_with_stacked_bonus() {
        // Gold tier at 5% plus a stackable 10%-of-order promotion:
        // $100.00 order → $5.00 + $10.00 in a single ledger entry.
        let mut policy = TenantPolicy::default();
        policy.tier_cashback_bps.insert("gold".to_string(), 500);
        let config = EngineConfig::default().default_policy(policy);

        let (issuer, db, platform) = harness(config).await;
        seed_member(&db, Some(ACCOUNT)).await;
        platform.set_balance(ACCOUNT, 0);
        db.promotions()
            .insert(&cashback_promo("p-10", 1000, true))
            .await
            .unwrap();

        let entry = issuer
            .award_purchase_cashback(CashbackOrder {
                tenant_id: TENANT.to_string(),
                member_id: MEMBER.to_string(),
                order_id: "o-1".to_string(),
                order_value: Money::from_cents(10_000),
                item_count: 2,
                channel: Channel::Online,
                created_by: "test".to_string(),
            })
            .await
            .unwrap()
            .unwrap();

        assert_eq!(entry.amount, 1500);
        assert_eq!(entry.event_kind, EventKind::PurchaseCashback);
        assert_eq!(entry.promotion_id.as_deref(), Some("p-10"));

        let history = db
            .ledger()
            .history(TENANT, MEMBER, Currency::Credit, Page::default())
            .await
            .unwrap();
        assert_eq!(history.len(), 1);

        // The applied promotion's usage counter moved with the entry.
        let promo = db.promotions().require(TENANT, "p-10").await.unwrap();
        assert_eq!(promo.current_uses, 1);
    }

    #[tokio::test]
    async fn test_trade_in_payout_applies_bonus_promotion() {
        let (issuer, db, platform) = harness(EngineConfig::default()).await;
        seed_member(&db, Some(ACCOUNT)).await;
        platform.set_balance(ACCOUNT, 0);

        let mut promo = cashback_promo("p-trade", 2000, false);
        promo.promotion_type = PromotionType::TradeInBonus;
        db.promotions().insert(&promo).await.unwrap();

        // $80.00 appraisal + 20% bonus = $96.00.
        let entry = issuer
            .trade_in_payout(TradeInPayout {
                tenant_id: TENANT.to_string(),
                member_id: MEMBER.to_string(),
                trade_in_id: "ti-9".to_string(),
                base_value: Money::from_cents(8000),
                channel: Channel::InStore,
                created_by: "test".to_string(),
            })
            .await
            .unwrap();

        assert_eq!(entry.amount, 9600);
        assert_eq!(entry.event_kind, EventKind::TradeIn);
        assert_eq!(entry.promotion_id.as_deref(), Some("p-trade"));
    }
}
