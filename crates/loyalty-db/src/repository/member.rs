//! # Member Repository
//!
//! Database operations for member records.
//!
//! Members are owned by the surrounding member system; this engine keeps a
//! referenced copy (tier, status, external account link) so earning and
//! credit operations can gate on them without a cross-service call.

use chrono::Utc;
use sqlx::SqlitePool;
use tracing::debug;

use crate::error::{DbError, DbResult};
use loyalty_core::Member;

/// Column list in `Member` field order.
const MEMBER_COLUMNS: &str =
    "id, tenant_id, external_account_id, tier, status, created_at, updated_at";

/// Repository for member database operations.
#[derive(Debug, Clone)]
pub struct MemberRepository {
    pool: SqlitePool,
}

impl MemberRepository {
    /// Creates a new MemberRepository.
    pub fn new(pool: SqlitePool) -> Self {
        MemberRepository { pool }
    }

    /// Inserts or refreshes a member record.
    pub async fn upsert(&self, member: &Member) -> DbResult<()> {
        debug!(id = %member.id, tier = %member.tier, "Upserting member");

        sqlx::query(
            r#"
            INSERT INTO members (
                id, tenant_id, external_account_id, tier, status, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (id) DO UPDATE SET
                external_account_id = excluded.external_account_id,
                tier = excluded.tier,
                status = excluded.status,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&member.id)
        .bind(&member.tenant_id)
        .bind(&member.external_account_id)
        .bind(&member.tier)
        .bind(member.status)
        .bind(member.created_at)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Gets a member by id, scoped to the tenant.
    pub async fn get(&self, tenant_id: &str, id: &str) -> DbResult<Option<Member>> {
        let sql = format!("SELECT {MEMBER_COLUMNS} FROM members WHERE tenant_id = ? AND id = ?");
        let member = sqlx::query_as::<_, Member>(&sql)
            .bind(tenant_id)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(member)
    }

    /// Gets a member by id, failing with NotFound when absent (or owned
    /// by another tenant).
    pub async fn require(&self, tenant_id: &str, id: &str) -> DbResult<Member> {
        self.get(tenant_id, id)
            .await?
            .ok_or_else(|| DbError::not_found("Member", id))
    }

    /// Finds the member linked to an external platform account.
    pub async fn find_by_external_account(
        &self,
        tenant_id: &str,
        external_account_id: &str,
    ) -> DbResult<Option<Member>> {
        let sql = format!(
            "SELECT {MEMBER_COLUMNS} FROM members \
             WHERE tenant_id = ? AND external_account_id = ?"
        );
        let member = sqlx::query_as::<_, Member>(&sql)
            .bind(tenant_id)
            .bind(external_account_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(member)
    }
}
