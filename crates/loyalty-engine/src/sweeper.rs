//! # Expiration Sweeper
//!
//! Background job that expires what members never spent: points lots past
//! their expiry, and expiring store credit.
//!
//! ## Sweep Pass
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    every sweep_interval                                 │
//! │                                                                         │
//! │  for each tenant with ledger activity:                                  │
//! │                                                                         │
//! │    POINTS: expired lots still holding points                            │
//! │      per lot, one transaction:                                          │
//! │        zero the remainder ── already drained? skip (idempotent)         │
//! │        append Expiration entry (-remaining, related_entry_id = lot)     │
//! │                                                                         │
//! │    CREDIT: positive entries past expiry with no offsetting entry        │
//! │      platform debit FIRST (authoritative balance), then the             │
//! │      Expiration entry with the platform's reported balance              │
//! │                                                                         │
//! │  Per-row errors are logged and counted; the pass continues. A crashed   │
//! │  pass re-finds whatever it did not finish - every step is idempotent.   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::Utc;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::platform::{call_with_timeout, CommercePlatform};
use loyalty_core::{Currency, EventKind, LedgerEntry, Money, SYSTEM_ACTOR};
use loyalty_db::{Database, NewLedgerEntry};

/// Outcome of one sweep pass over one tenant.
#[derive(Debug, Clone, Copy, Default)]
pub struct SweepReport {
    /// Points lots expired.
    pub points_lots: usize,

    /// Points clawed back across those lots.
    pub points_expired: i64,

    /// Credit entries expired.
    pub credit_entries: usize,

    /// Credit cents clawed back.
    pub credit_expired: i64,

    /// Rows that failed and were left for the next pass.
    pub errors: usize,
}

/// Background expiration sweeper.
#[derive(Clone)]
pub struct ExpirationSweeper {
    db: Database,
    platform: Arc<dyn CommercePlatform>,
    config: Arc<EngineConfig>,
}

impl ExpirationSweeper {
    /// Creates a new sweeper.
    pub fn new(db: Database, platform: Arc<dyn CommercePlatform>, config: Arc<EngineConfig>) -> Self {
        ExpirationSweeper {
            db,
            platform,
            config,
        }
    }

    /// Runs the sweep loop until a shutdown signal arrives.
    pub async fn run(self, mut shutdown_rx: mpsc::Receiver<()>) {
        let mut interval = tokio::time::interval(self.config.sweep_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        info!(
            interval_secs = self.config.sweep_interval.as_secs(),
            "Expiration sweeper started"
        );

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(err) = self.sweep_all().await {
                        error!(%err, "Sweep pass failed");
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Expiration sweeper received shutdown");
                    break;
                }
            }
        }
    }

    /// Sweeps every tenant with ledger activity.
    pub async fn sweep_all(&self) -> EngineResult<SweepReport> {
        let mut total = SweepReport::default();
        for tenant_id in self.db.ledger().tenants().await? {
            let report = self.sweep_tenant(&tenant_id).await;
            total.points_lots += report.points_lots;
            total.points_expired += report.points_expired;
            total.credit_entries += report.credit_entries;
            total.credit_expired += report.credit_expired;
            total.errors += report.errors;
        }
        Ok(total)
    }

    /// Sweeps one tenant: points lots, then expiring credit.
    pub async fn sweep_tenant(&self, tenant_id: &str) -> SweepReport {
        let mut report = SweepReport::default();
        self.sweep_points(tenant_id, &mut report).await;
        self.sweep_credit(tenant_id, &mut report).await;

        if report.points_lots > 0 || report.credit_entries > 0 || report.errors > 0 {
            info!(
                tenant_id,
                points_lots = report.points_lots,
                points = report.points_expired,
                credit_entries = report.credit_entries,
                credit_cents = report.credit_expired,
                errors = report.errors,
                "Sweep pass complete"
            );
        }
        report
    }

    /// Expires points lots past their expiry, batch by batch.
    async fn sweep_points(&self, tenant_id: &str, report: &mut SweepReport) {
        loop {
            let now = Utc::now();
            let lots = match self
                .db
                .ledger()
                .expired_lots(tenant_id, now, self.config.sweep_batch_size)
                .await
            {
                Ok(lots) => lots,
                Err(err) => {
                    error!(tenant_id, %err, "Failed to load expired lots");
                    report.errors += 1;
                    return;
                }
            };
            if lots.is_empty() {
                return;
            }

            let mut progressed = false;
            for lot in &lots {
                match self.expire_lot(tenant_id, lot).await {
                    Ok(Some(points)) => {
                        report.points_lots += 1;
                        report.points_expired += points;
                        progressed = true;
                    }
                    // Drained between the query and the update: not an error.
                    Ok(None) => {
                        debug!(lot_id = %lot.id, "Lot already drained, skipping");
                        progressed = true;
                    }
                    Err(err) => {
                        warn!(tenant_id, lot_id = %lot.id, %err, "Failed to expire lot");
                        report.errors += 1;
                    }
                }
            }

            // A batch where every row failed would refetch the same rows;
            // leave them for the next pass instead of spinning.
            if !progressed {
                return;
            }
        }
    }

    /// Expires one lot in its own transaction.
    async fn expire_lot(&self, tenant_id: &str, lot: &LedgerEntry) -> EngineResult<Option<i64>> {
        let remaining = lot.remaining().value();
        let mut tx = self.db.begin().await?;

        if !self
            .db
            .ledger()
            .zero_lot_remaining_tx(&mut tx, tenant_id, &lot.id)
            .await?
        {
            return Ok(None);
        }

        self.db
            .ledger()
            .append_tx(
                &mut tx,
                NewLedgerEntry {
                    tenant_id: tenant_id.to_string(),
                    member_id: lot.member_id.clone(),
                    currency: Currency::Points,
                    amount: -remaining,
                    balance_after: None,
                    event_kind: EventKind::Expiration,
                    source_type: lot.source_type.clone(),
                    source_id: lot.source_id.clone(),
                    promotion_id: None,
                    expires_at: None,
                    related_entry_id: Some(lot.id.clone()),
                    reversal_reason: None,
                    created_by: SYSTEM_ACTOR.to_string(),
                },
            )
            .await?;
        tx.commit().await?;

        Ok(Some(remaining))
    }

    /// Expires store credit past its expiry: platform debit first, then
    /// the offsetting entry.
    async fn sweep_credit(&self, tenant_id: &str, report: &mut SweepReport) {
        let now = Utc::now();
        let entries = match self
            .db
            .ledger()
            .expirable_credit_entries(tenant_id, now, self.config.sweep_batch_size)
            .await
        {
            Ok(entries) => entries,
            Err(err) => {
                error!(tenant_id, %err, "Failed to load expirable credit");
                report.errors += 1;
                return;
            }
        };

        for entry in &entries {
            match self.expire_credit(tenant_id, entry).await {
                Ok(cents) => {
                    report.credit_entries += 1;
                    report.credit_expired += cents;
                }
                Err(err) => {
                    // Spent credit or a platform outage: left for the
                    // next pass, or for an operator when it persists.
                    warn!(
                        tenant_id,
                        entry_id = %entry.id,
                        %err,
                        "Failed to expire credit entry"
                    );
                    report.errors += 1;
                }
            }
        }
    }

    /// Expires one credit entry.
    async fn expire_credit(&self, tenant_id: &str, entry: &LedgerEntry) -> EngineResult<i64> {
        let member = self.db.members().require(tenant_id, &entry.member_id).await?;
        let account_id = member
            .external_account_id
            .as_deref()
            .filter(|id| !id.is_empty())
            .ok_or_else(|| EngineError::ExternalAccountMissing {
                member_id: member.id.clone(),
            })?;

        let debit = call_with_timeout(
            self.config.platform_timeout,
            self.platform.debit_account(
                account_id,
                Money::from_cents(entry.amount),
                "Expired store credit",
            ),
        )
        .await?;

        self.db
            .ledger()
            .append(NewLedgerEntry {
                tenant_id: tenant_id.to_string(),
                member_id: entry.member_id.clone(),
                currency: Currency::Credit,
                amount: -entry.amount,
                balance_after: Some(debit.new_balance.cents()),
                event_kind: EventKind::Expiration,
                source_type: entry.source_type.clone(),
                source_id: entry.source_id.clone(),
                promotion_id: None,
                expires_at: None,
                related_entry_id: Some(entry.id.clone()),
                reversal_reason: None,
                created_by: SYSTEM_ACTOR.to_string(),
            })
            .await?;

        Ok(entry.amount)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::MockPlatform;
    use chrono::{DateTime, Duration};
    use loyalty_core::{Member, MemberStatus};
    use loyalty_db::DbConfig;

    const TENANT: &str = "t-1";
    const MEMBER: &str = "m-1";
    const ACCOUNT: &str = "acct-1";

    async fn harness() -> (ExpirationSweeper, Database, Arc<MockPlatform>) {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let platform = Arc::new(MockPlatform::new());
        let sweeper = ExpirationSweeper::new(
            db.clone(),
            platform.clone(),
            Arc::new(EngineConfig::default()),
        );
        (sweeper, db, platform)
    }

    async fn seed_member(db: &Database) {
        let now = Utc::now();
        db.members()
            .upsert(&Member {
                id: MEMBER.to_string(),
                tenant_id: TENANT.to_string(),
                external_account_id: Some(ACCOUNT.to_string()),
                tier: "bronze".to_string(),
                status: MemberStatus::Active,
                created_at: now,
                updated_at: now,
            })
            .await
            .unwrap();
    }

    async fn append(
        db: &Database,
        currency: Currency,
        amount: i64,
        expires_at: Option<DateTime<Utc>>,
    ) -> LedgerEntry {
        db.ledger()
            .append(NewLedgerEntry {
                tenant_id: TENANT.to_string(),
                member_id: MEMBER.to_string(),
                currency,
                amount,
                balance_after: None,
                event_kind: EventKind::PromotionBonus,
                source_type: None,
                source_id: None,
                promotion_id: None,
                expires_at,
                related_entry_id: None,
                reversal_reason: None,
                created_by: "test".to_string(),
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_sweep_expires_only_expired_lots() {
        let (sweeper, db, _platform) = harness().await;
        seed_member(&db).await;

        let expired = append(&db, Currency::Points, 500, Some(Utc::now() - Duration::days(30))).await;
        append(&db, Currency::Points, 300, None).await;

        let report = sweeper.sweep_tenant(TENANT).await;

        assert_eq!(report.points_lots, 1);
        assert_eq!(report.points_expired, 500);
        assert_eq!(report.errors, 0);

        // The open-ended lot is untouched and spendable.
        let available = db
            .ledger()
            .points_available(TENANT, MEMBER, Utc::now())
            .await
            .unwrap();
        assert_eq!(available, 300);

        // The expiration entry references the lot it closed.
        let snapshot = db
            .snapshots()
            .get(TENANT, MEMBER, Currency::Points)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(snapshot.lifetime_expired, 500);
        let lot = db.ledger().require(TENANT, &expired.id).await.unwrap();
        assert_eq!(lot.remaining_points, Some(0));
    }

    #[tokio::test]
    async fn test_sweep_is_idempotent() {
        let (sweeper, db, _platform) = harness().await;
        seed_member(&db).await;
        append(&db, Currency::Points, 500, Some(Utc::now() - Duration::days(1))).await;

        let first = sweeper.sweep_tenant(TENANT).await;
        let second = sweeper.sweep_tenant(TENANT).await;

        assert_eq!(first.points_lots, 1);
        assert_eq!(second.points_lots, 0);
        assert_eq!(second.errors, 0);
    }

    #[tokio::test]
    async fn test_sweep_partially_drained_lot_expires_remainder() {
        let (sweeper, db, _platform) = harness().await;
        seed_member(&db).await;

        let lot = append(&db, Currency::Points, 500, Some(Utc::now() - Duration::days(1))).await;
        let mut conn = db.pool().acquire().await.unwrap();
        db.ledger()
            .drain_lot_tx(&mut conn, TENANT, &lot.id, 200)
            .await
            .unwrap();
        drop(conn);

        let report = sweeper.sweep_tenant(TENANT).await;
        assert_eq!(report.points_expired, 300);
    }

    #[tokio::test]
    async fn test_sweep_credit_debits_platform_first() {
        let (sweeper, db, platform) = harness().await;
        seed_member(&db).await;
        platform.set_balance(ACCOUNT, 500);

        let original = append(&db, Currency::Credit, 500, Some(Utc::now() - Duration::days(1))).await;

        let report = sweeper.sweep_tenant(TENANT).await;

        assert_eq!(report.credit_entries, 1);
        assert_eq!(report.credit_expired, 500);
        assert_eq!(platform.balance(ACCOUNT), 0);

        // The offsetting entry carries the platform balance and a
        // reference to the expired issuance.
        let snapshot = db
            .snapshots()
            .get(TENANT, MEMBER, Currency::Credit)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(snapshot.lifetime_expired, 500);
        drop(original);
    }

    #[tokio::test]
    async fn test_sweep_credit_failure_leaves_entry_for_next_pass() {
        let (sweeper, db, platform) = harness().await;
        seed_member(&db).await;
        platform.set_balance(ACCOUNT, 500);
        append(&db, Currency::Credit, 500, Some(Utc::now() - Duration::days(1))).await;

        platform.fail_account(ACCOUNT);
        let report = sweeper.sweep_tenant(TENANT).await;
        assert_eq!(report.credit_entries, 0);
        assert_eq!(report.errors, 1);

        // The platform recovers: the next pass picks the entry up again.
        let platform_ok = {
            let p = MockPlatform::new();
            p.set_balance(ACCOUNT, 500);
            Arc::new(p)
        };
        let retry = ExpirationSweeper::new(db.clone(), platform_ok, Arc::new(EngineConfig::default()));
        let report = retry.sweep_tenant(TENANT).await;
        assert_eq!(report.credit_entries, 1);
    }
}
