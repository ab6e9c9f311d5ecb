//! # Balance Snapshot Repository
//!
//! Database operations for the denormalized per-(tenant, member, currency)
//! balance rows.
//!
//! ## Derived Data
//! Snapshots are written transactionally alongside each ledger append (see
//! `LedgerRepository::append_tx`) and are never the source of truth.
//! [`SnapshotRepository::recalculate_from_ledger`] rebuilds one from a full
//! replay and reports any drift it corrected; running it twice in a row is
//! a no-op.

use chrono::Utc;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, warn};

use crate::error::DbResult;
use loyalty_core::{Currency, MemberBalanceSnapshot};

/// Column list in `MemberBalanceSnapshot` field order.
const SNAPSHOT_COLUMNS: &str = "\
    tenant_id, member_id, currency, available, pending, \
    lifetime_earned, lifetime_redeemed, lifetime_expired, \
    earned_trade_in, earned_cashback, earned_promotion, earned_referral, earned_other, \
    last_earn_at, last_redeem_at, updated_at";

/// Loads a snapshot row, or an empty in-memory snapshot when none exists.
///
/// Used by the append path; the row is materialized by the save that
/// follows in the same transaction.
pub(crate) async fn load_or_default(
    conn: &mut SqliteConnection,
    tenant_id: &str,
    member_id: &str,
    currency: Currency,
) -> DbResult<MemberBalanceSnapshot> {
    let sql = format!(
        "SELECT {SNAPSHOT_COLUMNS} FROM balance_snapshots \
         WHERE tenant_id = ? AND member_id = ? AND currency = ?"
    );
    let existing = sqlx::query_as::<_, MemberBalanceSnapshot>(&sql)
        .bind(tenant_id)
        .bind(member_id)
        .bind(currency)
        .fetch_optional(&mut *conn)
        .await?;

    Ok(existing
        .unwrap_or_else(|| MemberBalanceSnapshot::empty(tenant_id, member_id, currency, Utc::now())))
}

/// Upserts a snapshot row.
pub(crate) async fn save(
    conn: &mut SqliteConnection,
    snapshot: &MemberBalanceSnapshot,
) -> DbResult<()> {
    sqlx::query(
        r#"
        INSERT INTO balance_snapshots (
            tenant_id, member_id, currency, available, pending,
            lifetime_earned, lifetime_redeemed, lifetime_expired,
            earned_trade_in, earned_cashback, earned_promotion, earned_referral, earned_other,
            last_earn_at, last_redeem_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT (tenant_id, member_id, currency) DO UPDATE SET
            available = excluded.available,
            pending = excluded.pending,
            lifetime_earned = excluded.lifetime_earned,
            lifetime_redeemed = excluded.lifetime_redeemed,
            lifetime_expired = excluded.lifetime_expired,
            earned_trade_in = excluded.earned_trade_in,
            earned_cashback = excluded.earned_cashback,
            earned_promotion = excluded.earned_promotion,
            earned_referral = excluded.earned_referral,
            earned_other = excluded.earned_other,
            last_earn_at = excluded.last_earn_at,
            last_redeem_at = excluded.last_redeem_at,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(&snapshot.tenant_id)
    .bind(&snapshot.member_id)
    .bind(snapshot.currency)
    .bind(snapshot.available)
    .bind(snapshot.pending)
    .bind(snapshot.lifetime_earned)
    .bind(snapshot.lifetime_redeemed)
    .bind(snapshot.lifetime_expired)
    .bind(snapshot.earned_trade_in)
    .bind(snapshot.earned_cashback)
    .bind(snapshot.earned_promotion)
    .bind(snapshot.earned_referral)
    .bind(snapshot.earned_other)
    .bind(snapshot.last_earn_at)
    .bind(snapshot.last_redeem_at)
    .bind(snapshot.updated_at)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

// =============================================================================
// Drift
// =============================================================================

/// What a recalculation found: the rebuilt snapshot plus the deltas
/// against what was stored.
#[derive(Debug, Clone)]
pub struct SnapshotDrift {
    pub recomputed: MemberBalanceSnapshot,
    pub available_delta: i64,
    pub lifetime_earned_delta: i64,
    pub lifetime_redeemed_delta: i64,
    pub lifetime_expired_delta: i64,
}

impl SnapshotDrift {
    /// Whether the stored snapshot already matched the replay.
    pub fn is_clean(&self) -> bool {
        self.available_delta == 0
            && self.lifetime_earned_delta == 0
            && self.lifetime_redeemed_delta == 0
            && self.lifetime_expired_delta == 0
    }
}

// =============================================================================
// Repository
// =============================================================================

/// Repository for balance snapshot operations.
#[derive(Debug, Clone)]
pub struct SnapshotRepository {
    pool: SqlitePool,
}

impl SnapshotRepository {
    /// Creates a new SnapshotRepository.
    pub fn new(pool: SqlitePool) -> Self {
        SnapshotRepository { pool }
    }

    /// Gets a member's snapshot, creating an empty row lazily on first
    /// access.
    pub async fn get_or_create(
        &self,
        tenant_id: &str,
        member_id: &str,
        currency: Currency,
    ) -> DbResult<MemberBalanceSnapshot> {
        let mut tx = self.pool.begin().await?;
        let snapshot = load_or_default(&mut tx, tenant_id, member_id, currency).await?;
        save(&mut tx, &snapshot).await?;
        tx.commit().await?;
        Ok(snapshot)
    }

    /// Gets a member's snapshot if one has been materialized.
    pub async fn get(
        &self,
        tenant_id: &str,
        member_id: &str,
        currency: Currency,
    ) -> DbResult<Option<MemberBalanceSnapshot>> {
        let sql = format!(
            "SELECT {SNAPSHOT_COLUMNS} FROM balance_snapshots \
             WHERE tenant_id = ? AND member_id = ? AND currency = ?"
        );
        let snapshot = sqlx::query_as::<_, MemberBalanceSnapshot>(&sql)
            .bind(tenant_id)
            .bind(member_id)
            .bind(currency)
            .fetch_optional(&self.pool)
            .await?;
        Ok(snapshot)
    }

    /// Rebuilds one snapshot from a full ledger replay, writes the
    /// rebuilt row, and reports the drift it corrected.
    ///
    /// Idempotent: a second run immediately after the first reports a
    /// clean drift.
    pub async fn recalculate_from_ledger(
        &self,
        tenant_id: &str,
        member_id: &str,
        currency: Currency,
    ) -> DbResult<SnapshotDrift> {
        let mut tx = self.pool.begin().await?;

        let stored = load_or_default(&mut tx, tenant_id, member_id, currency).await?;

        let sql = format!(
            "SELECT id, tenant_id, member_id, currency, amount, balance_after, \
                    event_kind, source_type, source_id, promotion_id, expires_at, \
                    points, remaining_points, related_entry_id, reversal_reason, \
                    created_by, created_at \
             FROM ledger_entries \
             WHERE tenant_id = ? AND member_id = ? AND currency = ? \
             ORDER BY created_at ASC, rowid ASC"
        );
        let entries = sqlx::query_as::<_, loyalty_core::LedgerEntry>(&sql)
            .bind(tenant_id)
            .bind(member_id)
            .bind(currency)
            .fetch_all(&mut *tx)
            .await?;

        let mut recomputed =
            MemberBalanceSnapshot::empty(tenant_id, member_id, currency, Utc::now());
        for entry in &entries {
            recomputed.apply(entry);
        }

        save(&mut tx, &recomputed).await?;
        tx.commit().await?;

        let drift = SnapshotDrift {
            available_delta: recomputed.available - stored.available,
            lifetime_earned_delta: recomputed.lifetime_earned - stored.lifetime_earned,
            lifetime_redeemed_delta: recomputed.lifetime_redeemed - stored.lifetime_redeemed,
            lifetime_expired_delta: recomputed.lifetime_expired - stored.lifetime_expired,
            recomputed,
        };

        if drift.is_clean() {
            debug!(
                member_id,
                %currency,
                entries = entries.len(),
                "Snapshot recalculated, no drift"
            );
        } else {
            warn!(
                member_id,
                %currency,
                available_delta = drift.available_delta,
                "Snapshot drift corrected from ledger replay"
            );
        }

        Ok(drift)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
