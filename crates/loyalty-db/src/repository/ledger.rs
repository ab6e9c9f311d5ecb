//! # Ledger Repository
//!
//! Database operations for the append-only ledger and its points lots.
//!
//! ## Append Pairing
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      append_tx()                                        │
//! │                                                                         │
//! │  1. Validate amount (non-zero; sign carries meaning)                   │
//! │  2. Load (or default) the member's balance snapshot                    │
//! │  3. INSERT the entry              ┐                                     │
//! │  4. Apply the entry's delta       ├── one transaction, always          │
//! │  5. UPSERT the snapshot           ┘                                     │
//! │                                                                         │
//! │  The ledger is the source of truth; the snapshot row written in the    │
//! │  same transaction is derived data and can be rebuilt from replay       │
//! │  (SnapshotRepository::recalculate_from_ledger).                        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Lot Consumption Order
//! Open lots are drained soonest-expiring first (NULL expiry last), then
//! oldest first. Lots fully offset by a reversal never appear as open.

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;
use uuid::Uuid;

use crate::error::{DbError, DbResult};
use crate::repository::snapshot;
use loyalty_core::validation::validate_amount_non_zero;
use loyalty_core::{Currency, EventKind, LedgerEntry, Page};

/// Column list shared by every entry SELECT, in `LedgerEntry` field order.
const ENTRY_COLUMNS: &str = "\
    id, tenant_id, member_id, currency, amount, balance_after, \
    event_kind, source_type, source_id, promotion_id, expires_at, \
    points, remaining_points, related_entry_id, reversal_reason, \
    created_by, created_at";

/// Filter selecting open (consumable) points lots for `le`.
///
/// Open means: positive points entry, unconsumed remainder, not expired
/// at the bound instant, and not offset by a reversal entry.
const OPEN_LOT_FILTER: &str = "\
    le.currency = 'points' \
    AND le.amount > 0 \
    AND le.remaining_points > 0 \
    AND (le.expires_at IS NULL OR le.expires_at > ?) \
    AND NOT EXISTS ( \
        SELECT 1 FROM ledger_entries r \
        WHERE r.related_entry_id = le.id AND r.event_kind = 'reversal' \
    )";

// =============================================================================
// New Entry
// =============================================================================

/// Everything a caller decides about a ledger entry; the repository fills
/// in the id, timestamp, lot fields and (optionally) balance_after.
#[derive(Debug, Clone)]
pub struct NewLedgerEntry {
    pub tenant_id: String,
    pub member_id: String,
    pub currency: Currency,

    /// Signed amount: positive = earn/credit, negative = redeem/expire.
    pub amount: i64,

    /// Balance recorded on the entry. `None` = derive from the snapshot
    /// (`available + amount`); credit entries pass the platform-reported
    /// balance instead, which is never computed locally.
    pub balance_after: Option<i64>,

    pub event_kind: EventKind,
    pub source_type: Option<String>,
    pub source_id: Option<String>,
    pub promotion_id: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub related_entry_id: Option<String>,
    pub reversal_reason: Option<String>,
    pub created_by: String,
}

// =============================================================================
// Repository
// =============================================================================

/// Repository for ledger database operations.
#[derive(Debug, Clone)]
pub struct LedgerRepository {
    pool: SqlitePool,
}

impl LedgerRepository {
    /// Creates a new LedgerRepository.
    pub fn new(pool: SqlitePool) -> Self {
        LedgerRepository { pool }
    }

    // -------------------------------------------------------------------------
    // Append
    // -------------------------------------------------------------------------

    /// Appends one entry (and its snapshot delta) in its own transaction.
    pub async fn append(&self, new: NewLedgerEntry) -> DbResult<LedgerEntry> {
        let mut tx = self.pool.begin().await?;
        let entry = self.append_tx(&mut tx, new).await?;
        tx.commit().await?;
        Ok(entry)
    }

    /// Appends one entry inside a caller-owned transaction.
    ///
    /// Positive points entries become lots: `points` and
    /// `remaining_points` are both initialized to the amount.
    pub async fn append_tx(
        &self,
        conn: &mut SqliteConnection,
        new: NewLedgerEntry,
    ) -> DbResult<LedgerEntry> {
        validate_amount_non_zero(new.amount)?;

        let now = Utc::now();
        let mut snap =
            snapshot::load_or_default(conn, &new.tenant_id, &new.member_id, new.currency).await?;

        let balance_after = new.balance_after.unwrap_or(snap.available + new.amount);
        let is_lot = new.currency == Currency::Points && new.amount > 0;

        let entry = LedgerEntry {
            id: Uuid::new_v4().to_string(),
            tenant_id: new.tenant_id,
            member_id: new.member_id,
            currency: new.currency,
            amount: new.amount,
            balance_after,
            event_kind: new.event_kind,
            source_type: new.source_type,
            source_id: new.source_id,
            promotion_id: new.promotion_id,
            expires_at: new.expires_at,
            points: is_lot.then_some(new.amount),
            remaining_points: is_lot.then_some(new.amount),
            related_entry_id: new.related_entry_id,
            reversal_reason: new.reversal_reason,
            created_by: new.created_by,
            created_at: now,
        };

        debug!(
            id = %entry.id,
            member_id = %entry.member_id,
            currency = %entry.currency,
            amount = entry.amount,
            kind = %entry.event_kind,
            "Appending ledger entry"
        );

        sqlx::query(
            r#"
            INSERT INTO ledger_entries (
                id, tenant_id, member_id, currency, amount, balance_after,
                event_kind, source_type, source_id, promotion_id, expires_at,
                points, remaining_points, related_entry_id, reversal_reason,
                created_by, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&entry.id)
        .bind(&entry.tenant_id)
        .bind(&entry.member_id)
        .bind(entry.currency)
        .bind(entry.amount)
        .bind(entry.balance_after)
        .bind(entry.event_kind)
        .bind(&entry.source_type)
        .bind(&entry.source_id)
        .bind(&entry.promotion_id)
        .bind(entry.expires_at)
        .bind(entry.points)
        .bind(entry.remaining_points)
        .bind(&entry.related_entry_id)
        .bind(&entry.reversal_reason)
        .bind(&entry.created_by)
        .bind(entry.created_at)
        .execute(&mut *conn)
        .await?;

        snap.apply(&entry);
        snapshot::save(conn, &snap).await?;

        Ok(entry)
    }

    // -------------------------------------------------------------------------
    // Reads
    // -------------------------------------------------------------------------

    /// Gets an entry by id, scoped to the tenant.
    pub async fn get(&self, tenant_id: &str, id: &str) -> DbResult<Option<LedgerEntry>> {
        let sql = format!(
            "SELECT {ENTRY_COLUMNS} FROM ledger_entries WHERE tenant_id = ? AND id = ?"
        );
        let entry = sqlx::query_as::<_, LedgerEntry>(&sql)
            .bind(tenant_id)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(entry)
    }

    /// Gets an entry by id inside a caller-owned transaction.
    pub async fn get_tx(
        &self,
        conn: &mut SqliteConnection,
        tenant_id: &str,
        id: &str,
    ) -> DbResult<Option<LedgerEntry>> {
        let sql = format!(
            "SELECT {ENTRY_COLUMNS} FROM ledger_entries WHERE tenant_id = ? AND id = ?"
        );
        let entry = sqlx::query_as::<_, LedgerEntry>(&sql)
            .bind(tenant_id)
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?;
        Ok(entry)
    }

    /// Gets an entry by id, failing with NotFound when absent (or owned
    /// by another tenant).
    pub async fn require(&self, tenant_id: &str, id: &str) -> DbResult<LedgerEntry> {
        self.get(tenant_id, id)
            .await?
            .ok_or_else(|| DbError::not_found("Ledger entry", id))
    }

    /// A member's entry history for one currency, newest-first.
    pub async fn history(
        &self,
        tenant_id: &str,
        member_id: &str,
        currency: Currency,
        page: Page,
    ) -> DbResult<Vec<LedgerEntry>> {
        let sql = format!(
            "SELECT {ENTRY_COLUMNS} FROM ledger_entries \
             WHERE tenant_id = ? AND member_id = ? AND currency = ? \
             ORDER BY created_at DESC, rowid DESC \
             LIMIT ? OFFSET ?"
        );
        let entries = sqlx::query_as::<_, LedgerEntry>(&sql)
            .bind(tenant_id)
            .bind(member_id)
            .bind(currency)
            .bind(page.limit)
            .bind(page.offset)
            .fetch_all(&self.pool)
            .await?;
        Ok(entries)
    }

    /// All entries for one (member, currency), oldest-first: replay order.
    pub async fn replay(
        &self,
        conn: &mut SqliteConnection,
        tenant_id: &str,
        member_id: &str,
        currency: Currency,
    ) -> DbResult<Vec<LedgerEntry>> {
        let sql = format!(
            "SELECT {ENTRY_COLUMNS} FROM ledger_entries \
             WHERE tenant_id = ? AND member_id = ? AND currency = ? \
             ORDER BY created_at ASC, rowid ASC"
        );
        let entries = sqlx::query_as::<_, LedgerEntry>(&sql)
            .bind(tenant_id)
            .bind(member_id)
            .bind(currency)
            .fetch_all(&mut *conn)
            .await?;
        Ok(entries)
    }

    /// Raw signed sum of every entry for one (member, currency).
    pub async fn sum_amount(
        &self,
        tenant_id: &str,
        member_id: &str,
        currency: Currency,
    ) -> DbResult<i64> {
        let sum: i64 = sqlx::query_scalar(
            "SELECT COALESCE(SUM(amount), 0) FROM ledger_entries \
             WHERE tenant_id = ? AND member_id = ? AND currency = ?",
        )
        .bind(tenant_id)
        .bind(member_id)
        .bind(currency)
        .fetch_one(&self.pool)
        .await?;
        Ok(sum)
    }

    /// Every tenant with at least one ledger entry. Sweep-loop input.
    pub async fn tenants(&self) -> DbResult<Vec<String>> {
        let tenants: Vec<String> =
            sqlx::query_scalar("SELECT DISTINCT tenant_id FROM ledger_entries ORDER BY tenant_id")
                .fetch_all(&self.pool)
                .await?;
        Ok(tenants)
    }

    // -------------------------------------------------------------------------
    // Points Lots
    // -------------------------------------------------------------------------

    /// A member's open lots in consumption order.
    pub async fn open_lots(
        &self,
        tenant_id: &str,
        member_id: &str,
        now: DateTime<Utc>,
    ) -> DbResult<Vec<LedgerEntry>> {
        let mut conn = self.pool.acquire().await?;
        self.open_lots_tx(&mut conn, tenant_id, member_id, now)
            .await
    }

    /// A member's open lots in consumption order, inside a caller-owned
    /// transaction. Order: soonest expiration first (NULL last), then
    /// oldest created first.
    pub async fn open_lots_tx(
        &self,
        conn: &mut SqliteConnection,
        tenant_id: &str,
        member_id: &str,
        now: DateTime<Utc>,
    ) -> DbResult<Vec<LedgerEntry>> {
        let sql = format!(
            "SELECT le.* FROM ledger_entries le \
             WHERE le.tenant_id = ? AND le.member_id = ? AND {OPEN_LOT_FILTER} \
             ORDER BY le.expires_at IS NULL, le.expires_at ASC, le.created_at ASC, le.rowid ASC"
        );
        let lots = sqlx::query_as::<_, LedgerEntry>(&sql)
            .bind(tenant_id)
            .bind(member_id)
            .bind(now)
            .fetch_all(&mut *conn)
            .await?;
        Ok(lots)
    }

    /// Sum of `remaining_points` across a member's open lots: the
    /// spendable points balance.
    pub async fn points_available(
        &self,
        tenant_id: &str,
        member_id: &str,
        now: DateTime<Utc>,
    ) -> DbResult<i64> {
        let sql = format!(
            "SELECT COALESCE(SUM(le.remaining_points), 0) FROM ledger_entries le \
             WHERE le.tenant_id = ? AND le.member_id = ? AND {OPEN_LOT_FILTER}"
        );
        let sum: i64 = sqlx::query_scalar(&sql)
            .bind(tenant_id)
            .bind(member_id)
            .bind(now)
            .fetch_one(&self.pool)
            .await?;
        Ok(sum)
    }

    /// Drains `points` from one lot's unconsumed remainder.
    ///
    /// Guarded in SQL: the update only matches while the lot still holds
    /// at least `points`, so a concurrent drain surfaces as a conflict
    /// instead of driving the counter negative.
    pub async fn drain_lot_tx(
        &self,
        conn: &mut SqliteConnection,
        tenant_id: &str,
        lot_id: &str,
        points: i64,
    ) -> DbResult<()> {
        let result = sqlx::query(
            "UPDATE ledger_entries \
             SET remaining_points = remaining_points - ? \
             WHERE tenant_id = ? AND id = ? AND remaining_points >= ?",
        )
        .bind(points)
        .bind(tenant_id)
        .bind(lot_id)
        .bind(points)
        .execute(&mut *conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::Internal(format!(
                "lot {lot_id} no longer holds {points} points"
            )));
        }
        Ok(())
    }

    /// Zeroes a lot's unconsumed remainder (expiration and reversal).
    ///
    /// Idempotent: an already-drained lot matches zero rows, which is
    /// reported as `false` rather than an error.
    pub async fn zero_lot_remaining_tx(
        &self,
        conn: &mut SqliteConnection,
        tenant_id: &str,
        lot_id: &str,
    ) -> DbResult<bool> {
        let result = sqlx::query(
            "UPDATE ledger_entries \
             SET remaining_points = 0 \
             WHERE tenant_id = ? AND id = ? AND remaining_points > 0",
        )
        .bind(tenant_id)
        .bind(lot_id)
        .execute(&mut *conn)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Lots past their expiry that still hold unconsumed points,
    /// tenant-wide, oldest expiry first. Sweeper input.
    pub async fn expired_lots(
        &self,
        tenant_id: &str,
        now: DateTime<Utc>,
        limit: u32,
    ) -> DbResult<Vec<LedgerEntry>> {
        let sql = "SELECT le.* FROM ledger_entries le \
             WHERE le.tenant_id = ? \
               AND le.currency = 'points' \
               AND le.amount > 0 \
               AND le.remaining_points > 0 \
               AND le.expires_at IS NOT NULL AND le.expires_at <= ? \
               AND NOT EXISTS ( \
                   SELECT 1 FROM ledger_entries r \
                   WHERE r.related_entry_id = le.id AND r.event_kind = 'reversal' \
               ) \
             ORDER BY le.expires_at ASC, le.created_at ASC \
             LIMIT ?";
        let lots = sqlx::query_as::<_, LedgerEntry>(sql)
            .bind(tenant_id)
            .bind(now)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        Ok(lots)
    }

    /// Positive credit entries past their expiry not already offset by an
    /// expiration or reversal entry referencing them. Sweeper input.
    pub async fn expirable_credit_entries(
        &self,
        tenant_id: &str,
        now: DateTime<Utc>,
        limit: u32,
    ) -> DbResult<Vec<LedgerEntry>> {
        let sql = "SELECT le.* FROM ledger_entries le \
             WHERE le.tenant_id = ? \
               AND le.currency = 'credit' \
               AND le.amount > 0 \
               AND le.expires_at IS NOT NULL AND le.expires_at <= ? \
               AND NOT EXISTS ( \
                   SELECT 1 FROM ledger_entries r \
                   WHERE r.related_entry_id = le.id \
                     AND r.event_kind IN ('expiration', 'reversal') \
               ) \
             ORDER BY le.expires_at ASC, le.created_at ASC \
             LIMIT ?";
        let entries = sqlx::query_as::<_, LedgerEntry>(sql)
            .bind(tenant_id)
            .bind(now)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        Ok(entries)
    }

    // -------------------------------------------------------------------------
    // Reversal & Promotion Usage
    // -------------------------------------------------------------------------

    /// Whether an entry has already been offset by a reversal.
    ///
    /// Reversal status is the existence of a referencing entry, never a
    /// flag on the original.
    pub async fn is_reversed(&self, tenant_id: &str, entry_id: &str) -> DbResult<bool> {
        let mut conn = self.pool.acquire().await?;
        self.is_reversed_tx(&mut conn, tenant_id, entry_id).await
    }

    /// Transactional variant of [`is_reversed`](Self::is_reversed).
    pub async fn is_reversed_tx(
        &self,
        conn: &mut SqliteConnection,
        tenant_id: &str,
        entry_id: &str,
    ) -> DbResult<bool> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM ledger_entries \
             WHERE tenant_id = ? AND related_entry_id = ? AND event_kind = 'reversal'",
        )
        .bind(tenant_id)
        .bind(entry_id)
        .fetch_one(&mut *conn)
        .await?;
        Ok(count > 0)
    }

    /// How many non-reversed bonus entries a member holds for one
    /// promotion. Input to the per-member usage cap.
    pub async fn promotion_member_uses(
        &self,
        tenant_id: &str,
        member_id: &str,
        promotion_id: &str,
    ) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM ledger_entries le \
             WHERE le.tenant_id = ? AND le.member_id = ? AND le.promotion_id = ? \
               AND le.amount > 0 \
               AND NOT EXISTS ( \
                   SELECT 1 FROM ledger_entries r \
                   WHERE r.related_entry_id = le.id AND r.event_kind = 'reversal' \
               )",
        )
        .bind(tenant_id)
        .bind(member_id)
        .bind(promotion_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};
    use chrono::Duration;

    async fn db() -> Database {
        Database::new(DbConfig::in_memory()).await.unwrap()
    }

    fn points_earn(amount: i64, expires_at: Option<DateTime<Utc>>) -> NewLedgerEntry {
        NewLedgerEntry {
            tenant_id: "t-1".to_string(),
            member_id: "m-1".to_string(),
            currency: Currency::Points,
            amount,
            balance_after: None,
            event_kind: EventKind::TradeIn,
            source_type: None,
            source_id: None,
            promotion_id: None,
            expires_at,
            related_entry_id: None,
            reversal_reason: None,
            created_by: "test".to_string(),
        }
    }

    #[tokio::test]
    async fn test_append_pairs_entry_with_snapshot() {
        let db = db().await;
        let ledger = db.ledger();

        let entry = ledger.append(points_earn(500, None)).await.unwrap();
        assert_eq!(entry.balance_after, 500);
        assert_eq!(entry.points, Some(500));
        assert_eq!(entry.remaining_points, Some(500));

        let snap = db
            .snapshots()
            .get("t-1", "m-1", Currency::Points)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(snap.available, 500);
        assert_eq!(snap.lifetime_earned, 500);
        assert_eq!(snap.earned_trade_in, 500);
    }

    #[tokio::test]
    async fn test_append_rejects_zero_amount() {
        let db = db().await;
        let result = db.ledger().append(points_earn(0, None)).await;
        assert!(matches!(result, Err(DbError::Validation(_))));

        // Nothing written.
        assert_eq!(
            db.ledger()
                .sum_amount("t-1", "m-1", Currency::Points)
                .await
                .unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn test_open_lots_soonest_expiry_first() {
        let db = db().await;
        let ledger = db.ledger();
        let now = Utc::now();

        // Inserted first but expires later (never).
        let never = ledger.append(points_earn(100, None)).await.unwrap();
        // Inserted later but expires soonest.
        let soon = ledger
            .append(points_earn(200, Some(now + Duration::days(5))))
            .await
            .unwrap();
        let later = ledger
            .append(points_earn(300, Some(now + Duration::days(30))))
            .await
            .unwrap();

        let lots = ledger.open_lots("t-1", "m-1", now).await.unwrap();
        let ids: Vec<&str> = lots.iter().map(|l| l.id.as_str()).collect();
        assert_eq!(ids, vec![soon.id.as_str(), later.id.as_str(), never.id.as_str()]);
    }

    #[tokio::test]
    async fn test_expired_lots_are_not_open() {
        let db = db().await;
        let ledger = db.ledger();
        let now = Utc::now();

        ledger
            .append(points_earn(500, Some(now - Duration::days(1))))
            .await
            .unwrap();

        assert!(ledger.open_lots("t-1", "m-1", now).await.unwrap().is_empty());
        assert_eq!(ledger.points_available("t-1", "m-1", now).await.unwrap(), 0);

        let expired = ledger.expired_lots("t-1", now, 100).await.unwrap();
        assert_eq!(expired.len(), 1);
    }

    #[tokio::test]
    async fn test_drain_lot_guard_refuses_overdraw() {
        let db = db().await;
        let ledger = db.ledger();
        let lot = ledger.append(points_earn(100, None)).await.unwrap();

        let mut tx = db.begin().await.unwrap();
        ledger.drain_lot_tx(&mut tx, "t-1", &lot.id, 60).await.unwrap();
        assert!(ledger.drain_lot_tx(&mut tx, "t-1", &lot.id, 60).await.is_err());
        ledger.drain_lot_tx(&mut tx, "t-1", &lot.id, 40).await.unwrap();
        tx.commit().await.unwrap();

        let stored = ledger.require("t-1", &lot.id).await.unwrap();
        assert_eq!(stored.remaining_points, Some(0));
    }

    #[tokio::test]
    async fn test_reversed_lot_never_open() {
        let db = db().await;
        let ledger = db.ledger();
        let now = Utc::now();

        let lot = ledger.append(points_earn(500, None)).await.unwrap();
        assert!(!ledger.is_reversed("t-1", &lot.id).await.unwrap());

        let mut tx = db.begin().await.unwrap();
        ledger.zero_lot_remaining_tx(&mut tx, "t-1", &lot.id).await.unwrap();
        ledger
            .append_tx(
                &mut tx,
                NewLedgerEntry {
                    amount: -500,
                    event_kind: EventKind::Reversal,
                    related_entry_id: Some(lot.id.clone()),
                    reversal_reason: Some("fraud".to_string()),
                    ..points_earn(-500, None)
                },
            )
            .await
            .unwrap();
        tx.commit().await.unwrap();

        assert!(ledger.is_reversed("t-1", &lot.id).await.unwrap());
        assert!(ledger.open_lots("t-1", "m-1", now).await.unwrap().is_empty());
        assert_eq!(ledger.sum_amount("t-1", "m-1", Currency::Points).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_history_newest_first_with_paging() {
        let db = db().await;
        let ledger = db.ledger();

        for amount in [100, 200, 300] {
            ledger.append(points_earn(amount, None)).await.unwrap();
        }

        let page = ledger
            .history("t-1", "m-1", Currency::Points, Page::first(2))
            .await
            .unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].amount, 300);
        assert_eq!(page[1].amount, 200);

        let rest = ledger
            .history("t-1", "m-1", Currency::Points, Page { limit: 2, offset: 2 })
            .await
            .unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].amount, 100);
    }

    #[tokio::test]
    async fn test_tenant_scoping_hides_other_tenants() {
        let db = db().await;
        let ledger = db.ledger();

        let entry = ledger.append(points_earn(100, None)).await.unwrap();
        assert!(ledger.get("t-2", &entry.id).await.unwrap().is_none());
        assert!(matches!(
            ledger.require("t-2", &entry.id).await,
            Err(DbError::NotFound { .. })
        ));
    }
}
