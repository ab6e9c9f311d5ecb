//! # Promotion & Earning Rule Repositories
//!
//! Database operations for promotions and points earning rules.
//!
//! ## Candidate Queries
//! SQL pre-filters only the cheap dimensions (tenant, type/source, active
//! flag, absolute window). The full gate - daily window, weekday mask,
//! usage caps, channel/audience/tier/minimums - is re-evaluated in
//! loyalty-core on the loaded rows, so the SQL filter is an optimization,
//! never the authority.

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;

use crate::error::{DbError, DbResult};
use loyalty_core::{EarnSource, PointsEarningRule, Promotion, PromotionType};

/// Column list in `Promotion` field order.
const PROMOTION_COLUMNS: &str = "\
    id, tenant_id, name, promotion_type, \
    bonus_bps, bonus_flat_cents, multiplier_hundredths, \
    starts_at, ends_at, daily_start_time, daily_end_time, active_days, \
    channel, audience, tier_restriction, min_items, min_value_cents, \
    stackable, priority, max_uses, max_uses_per_member, current_uses, \
    active, created_at, updated_at";

/// Column list in `PointsEarningRule` field order.
const RULE_COLUMNS: &str = "\
    id, tenant_id, name, rule_type, \
    points_per_dollar_hundredths, multiplier_hundredths, bonus_points, percentage_bps, \
    source, filter_collection, filter_vendor, filter_product_type, filter_tag, \
    tier_restriction, new_member_only, stackable, priority, exclusive_group, \
    max_uses, current_uses, active, created_at, updated_at";

// =============================================================================
// Promotion Repository
// =============================================================================

/// Repository for promotion database operations.
#[derive(Debug, Clone)]
pub struct PromotionRepository {
    pool: SqlitePool,
}

impl PromotionRepository {
    /// Creates a new PromotionRepository.
    pub fn new(pool: SqlitePool) -> Self {
        PromotionRepository { pool }
    }

    /// Inserts a promotion.
    pub async fn insert(&self, promotion: &Promotion) -> DbResult<()> {
        debug!(id = %promotion.id, name = %promotion.name, "Inserting promotion");

        sqlx::query(
            r#"
            INSERT INTO promotions (
                id, tenant_id, name, promotion_type,
                bonus_bps, bonus_flat_cents, multiplier_hundredths,
                starts_at, ends_at, daily_start_time, daily_end_time, active_days,
                channel, audience, tier_restriction, min_items, min_value_cents,
                stackable, priority, max_uses, max_uses_per_member, current_uses,
                active, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&promotion.id)
        .bind(&promotion.tenant_id)
        .bind(&promotion.name)
        .bind(promotion.promotion_type)
        .bind(promotion.bonus_bps)
        .bind(promotion.bonus_flat_cents)
        .bind(promotion.multiplier_hundredths)
        .bind(promotion.starts_at)
        .bind(promotion.ends_at)
        .bind(promotion.daily_start_time)
        .bind(promotion.daily_end_time)
        .bind(promotion.active_days)
        .bind(promotion.channel)
        .bind(promotion.audience)
        .bind(&promotion.tier_restriction)
        .bind(promotion.min_items)
        .bind(promotion.min_value_cents)
        .bind(promotion.stackable)
        .bind(promotion.priority)
        .bind(promotion.max_uses)
        .bind(promotion.max_uses_per_member)
        .bind(promotion.current_uses)
        .bind(promotion.active)
        .bind(promotion.created_at)
        .bind(promotion.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Gets a promotion by id, scoped to the tenant.
    pub async fn get(&self, tenant_id: &str, id: &str) -> DbResult<Option<Promotion>> {
        let sql =
            format!("SELECT {PROMOTION_COLUMNS} FROM promotions WHERE tenant_id = ? AND id = ?");
        let promotion = sqlx::query_as::<_, Promotion>(&sql)
            .bind(tenant_id)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(promotion)
    }

    /// Gets a promotion by id, failing with NotFound when absent.
    pub async fn require(&self, tenant_id: &str, id: &str) -> DbResult<Promotion> {
        self.get(tenant_id, id)
            .await?
            .ok_or_else(|| DbError::not_found("Promotion", id))
    }

    /// Flagged-active promotions of one type whose absolute window covers
    /// `now`, highest priority first. Pre-filter only - the evaluator
    /// re-applies the full gate.
    pub async fn candidates(
        &self,
        tenant_id: &str,
        promotion_type: PromotionType,
        now: DateTime<Utc>,
    ) -> DbResult<Vec<Promotion>> {
        let sql = format!(
            "SELECT {PROMOTION_COLUMNS} FROM promotions \
             WHERE tenant_id = ? AND promotion_type = ? AND active = 1 \
               AND (starts_at IS NULL OR starts_at <= ?) \
               AND (ends_at IS NULL OR ends_at >= ?) \
             ORDER BY priority DESC, created_at ASC"
        );
        let promotions = sqlx::query_as::<_, Promotion>(&sql)
            .bind(tenant_id)
            .bind(promotion_type)
            .bind(now)
            .bind(now)
            .fetch_all(&self.pool)
            .await?;
        Ok(promotions)
    }

    /// Every flagged-active promotion whose absolute window covers `now`,
    /// across types, highest priority first.
    pub async fn all_candidates(
        &self,
        tenant_id: &str,
        now: DateTime<Utc>,
    ) -> DbResult<Vec<Promotion>> {
        let sql = format!(
            "SELECT {PROMOTION_COLUMNS} FROM promotions \
             WHERE tenant_id = ? AND active = 1 \
               AND (starts_at IS NULL OR starts_at <= ?) \
               AND (ends_at IS NULL OR ends_at >= ?) \
             ORDER BY priority DESC, created_at ASC"
        );
        let promotions = sqlx::query_as::<_, Promotion>(&sql)
            .bind(tenant_id)
            .bind(now)
            .bind(now)
            .fetch_all(&self.pool)
            .await?;
        Ok(promotions)
    }

    /// Bumps a promotion's global usage counter, inside the transaction
    /// that appends its bonus entry.
    pub async fn increment_uses_tx(
        &self,
        conn: &mut SqliteConnection,
        tenant_id: &str,
        id: &str,
    ) -> DbResult<()> {
        let result = sqlx::query(
            "UPDATE promotions \
             SET current_uses = current_uses + 1, updated_at = ? \
             WHERE tenant_id = ? AND id = ?",
        )
        .bind(Utc::now())
        .bind(tenant_id)
        .bind(id)
        .execute(&mut *conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Promotion", id));
        }
        Ok(())
    }
}

// =============================================================================
// Earning Rule Repository
// =============================================================================

/// Repository for points earning rule operations.
#[derive(Debug, Clone)]
pub struct EarningRuleRepository {
    pool: SqlitePool,
}

impl EarningRuleRepository {
    /// Creates a new EarningRuleRepository.
    pub fn new(pool: SqlitePool) -> Self {
        EarningRuleRepository { pool }
    }

    /// Inserts an earning rule.
    pub async fn insert(&self, rule: &PointsEarningRule) -> DbResult<()> {
        debug!(id = %rule.id, name = %rule.name, "Inserting earning rule");

        sqlx::query(
            r#"
            INSERT INTO earning_rules (
                id, tenant_id, name, rule_type,
                points_per_dollar_hundredths, multiplier_hundredths, bonus_points, percentage_bps,
                source, filter_collection, filter_vendor, filter_product_type, filter_tag,
                tier_restriction, new_member_only, stackable, priority, exclusive_group,
                max_uses, current_uses, active, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&rule.id)
        .bind(&rule.tenant_id)
        .bind(&rule.name)
        .bind(rule.rule_type)
        .bind(rule.points_per_dollar_hundredths)
        .bind(rule.multiplier_hundredths)
        .bind(rule.bonus_points)
        .bind(rule.percentage_bps)
        .bind(rule.source)
        .bind(&rule.filter_collection)
        .bind(&rule.filter_vendor)
        .bind(&rule.filter_product_type)
        .bind(&rule.filter_tag)
        .bind(&rule.tier_restriction)
        .bind(rule.new_member_only)
        .bind(rule.stackable)
        .bind(rule.priority)
        .bind(&rule.exclusive_group)
        .bind(rule.max_uses)
        .bind(rule.current_uses)
        .bind(rule.active)
        .bind(rule.created_at)
        .bind(rule.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Gets a rule by id, scoped to the tenant.
    pub async fn get(&self, tenant_id: &str, id: &str) -> DbResult<Option<PointsEarningRule>> {
        let sql =
            format!("SELECT {RULE_COLUMNS} FROM earning_rules WHERE tenant_id = ? AND id = ?");
        let rule = sqlx::query_as::<_, PointsEarningRule>(&sql)
            .bind(tenant_id)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(rule)
    }

    /// Flagged-active rules for one earn source, highest priority first.
    /// Pre-filter only - the points engine re-applies the full gate.
    pub async fn candidates(
        &self,
        tenant_id: &str,
        source: EarnSource,
    ) -> DbResult<Vec<PointsEarningRule>> {
        let sql = format!(
            "SELECT {RULE_COLUMNS} FROM earning_rules \
             WHERE tenant_id = ? AND source = ? AND active = 1 \
             ORDER BY priority DESC, created_at ASC"
        );
        let rules = sqlx::query_as::<_, PointsEarningRule>(&sql)
            .bind(tenant_id)
            .bind(source)
            .fetch_all(&self.pool)
            .await?;
        Ok(rules)
    }

    /// Bumps a rule's global usage counter, inside the transaction that
    /// appends its earn entry.
    pub async fn increment_uses_tx(
        &self,
        conn: &mut SqliteConnection,
        tenant_id: &str,
        id: &str,
    ) -> DbResult<()> {
        let result = sqlx::query(
            "UPDATE earning_rules \
             SET current_uses = current_uses + 1, updated_at = ? \
             WHERE tenant_id = ? AND id = ?",
        )
        .bind(Utc::now())
        .bind(tenant_id)
        .bind(id)
        .execute(&mut *conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Earning rule", id));
        }
        Ok(())
    }
}
