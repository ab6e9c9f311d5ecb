//! # Bulk Event Processor
//!
//! Mass store-credit events: find every account whose qualifying spend in
//! a window earns a credit, then issue in rate-limited batches with an
//! account-tag idempotency marker.
//!
//! ## Idempotency
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                 run(job "spring-2026")                                  │
//! │                                                                         │
//! │  per account:                                                           │
//! │    has tag "received-credit-spring-2026"?  ──yes──► skip                │
//! │        │ no                                                             │
//! │        ▼                                                                │
//! │    credit_account() ──err──► record failure, continue with the rest     │
//! │        │ ok                                                             │
//! │        ▼                                                                │
//! │    tag_account("received-credit-spring-2026")                           │
//! │        │                                                                │
//! │        ▼                                                                │
//! │    enrolled member? ──► append BulkCredit ledger entry                  │
//! │                                                                         │
//! │  A crashed or re-run job only credits accounts that never got the tag.  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;
use tracing::{info, warn};

use crate::config::EngineConfig;
use crate::error::EngineResult;
use crate::platform::{call_with_timeout, CommercePlatform, OrderWindow};
use chrono::{DateTime, Utc};
use loyalty_core::validation::{validate_job_id, validate_tenant_id};
use loyalty_core::{bulk_credit_tag, Currency, EventKind, Money, Rate, SYSTEM_ACTOR};
use loyalty_db::{Database, NewLedgerEntry};
use std::collections::BTreeMap;

// =============================================================================
// Job Types
// =============================================================================

/// One bulk credit event.
#[derive(Debug, Clone)]
pub struct BulkJobSpec {
    pub tenant_id: String,

    /// Stable job identifier: names the idempotency tag, so re-running
    /// under the same id never double-credits.
    pub job_id: String,

    /// Order search window and line filters.
    pub window: OrderWindow,

    /// Credit rate applied to each account's qualifying spend.
    pub rate: Rate,

    /// When the issued credit expires, if the event says so.
    pub expires_at: Option<DateTime<Utc>>,

    /// Member-visible note forwarded to the platform.
    pub note: String,
}

/// One account the job would credit.
#[derive(Debug, Clone)]
pub struct BulkCandidate {
    pub account_id: String,

    /// The enrolled member linked to the account, when one exists.
    /// Non-members still receive platform credit, they just have no
    /// ledger to record it in.
    pub member_id: Option<String>,

    pub qualifying_spend: Money,
    pub credit: Money,
}

/// One account the job failed to credit.
#[derive(Debug, Clone)]
pub struct BulkFailure {
    pub account_id: String,
    pub error: String,
}

/// Outcome of a bulk run.
#[derive(Debug, Clone, Default)]
pub struct BulkRunReport {
    pub successful: usize,

    /// Accounts already carrying the job's tag.
    pub skipped: usize,

    pub failed: Vec<BulkFailure>,
    pub total_credited: Money,
}

// =============================================================================
// Processor
// =============================================================================

/// Runs bulk credit events against the platform.
#[derive(Clone)]
pub struct BulkEventProcessor {
    db: Database,
    platform: Arc<dyn CommercePlatform>,
    config: Arc<EngineConfig>,
}

impl BulkEventProcessor {
    /// Creates a new bulk event processor.
    pub fn new(db: Database, platform: Arc<dyn CommercePlatform>, config: Arc<EngineConfig>) -> Self {
        BulkEventProcessor {
            db,
            platform,
            config,
        }
    }

    /// Computes the candidate list without crediting anyone.
    ///
    /// Orders are aggregated per account on their qualifying spend under
    /// the window's line filters; accounts whose credit rounds to zero
    /// are dropped.
    pub async fn preview(&self, spec: &BulkJobSpec) -> EngineResult<Vec<BulkCandidate>> {
        validate_tenant_id(&spec.tenant_id)?;
        validate_job_id(&spec.job_id)?;

        let orders = call_with_timeout(
            self.config.platform_timeout,
            self.platform.search_orders(&spec.window),
        )
        .await?;

        // BTreeMap keeps candidate order deterministic across runs.
        let mut spend_by_account: BTreeMap<String, Money> = BTreeMap::new();
        for order in &orders {
            let qualifying = order.qualifying_spend(&spec.window);
            if qualifying.is_zero() {
                continue;
            }
            *spend_by_account
                .entry(order.account_id.clone())
                .or_default() += qualifying;
        }

        let mut candidates = Vec::with_capacity(spend_by_account.len());
        for (account_id, qualifying_spend) in spend_by_account {
            let credit = qualifying_spend.apply_rate(spec.rate);
            if !credit.is_positive() {
                continue;
            }
            let member_id = self
                .db
                .members()
                .find_by_external_account(&spec.tenant_id, &account_id)
                .await?
                .map(|m| m.id);
            candidates.push(BulkCandidate {
                account_id,
                member_id,
                qualifying_spend,
                credit,
            });
        }

        info!(
            job_id = %spec.job_id,
            orders = orders.len(),
            candidates = candidates.len(),
            "Bulk preview computed"
        );
        Ok(candidates)
    }

    /// Runs the job: credits every candidate in rate-limited batches.
    ///
    /// Per-account failures are captured and the run continues; the report
    /// carries every failure for operator follow-up.
    pub async fn run(&self, spec: &BulkJobSpec) -> EngineResult<BulkRunReport> {
        let candidates = self.preview(spec).await?;
        let tag = bulk_credit_tag(&spec.job_id);
        let mut report = BulkRunReport::default();

        for (index, candidate) in candidates.iter().enumerate() {
            if index > 0 && index % self.config.bulk_batch_size == 0 {
                tokio::time::sleep(self.config.bulk_batch_delay).await;
            }

            match self.credit_candidate(spec, candidate, &tag).await {
                Ok(Some(credited)) => {
                    report.successful += 1;
                    report.total_credited += credited;
                }
                Ok(None) => report.skipped += 1,
                Err(err) => {
                    warn!(
                        job_id = %spec.job_id,
                        account_id = %candidate.account_id,
                        %err,
                        "Bulk credit failed for account"
                    );
                    report.failed.push(BulkFailure {
                        account_id: candidate.account_id.clone(),
                        error: err.to_string(),
                    });
                }
            }
        }

        info!(
            job_id = %spec.job_id,
            successful = report.successful,
            skipped = report.skipped,
            failed = report.failed.len(),
            total = %report.total_credited,
            "Bulk run complete"
        );
        Ok(report)
    }

    /// Credits one candidate. `Ok(None)` means the account already
    /// carried the job's tag.
    async fn credit_candidate(
        &self,
        spec: &BulkJobSpec,
        candidate: &BulkCandidate,
        tag: &str,
    ) -> EngineResult<Option<Money>> {
        let already = call_with_timeout(
            self.config.platform_timeout,
            self.platform.account_has_tag(&candidate.account_id, tag),
        )
        .await?;
        if already {
            return Ok(None);
        }

        let credit = call_with_timeout(
            self.config.platform_timeout,
            self.platform
                .credit_account(&candidate.account_id, candidate.credit, &spec.note),
        )
        .await?;

        // The tag is the idempotency marker: written right after the
        // credit so a crash between the two is the only double-credit
        // window, and re-runs close it for every account that got this far.
        if let Err(err) = call_with_timeout(
            self.config.platform_timeout,
            self.platform.tag_account(&candidate.account_id, tag),
        )
        .await
        {
            warn!(
                account_id = %candidate.account_id,
                %err,
                "Credited but failed to tag; a re-run may credit this account twice"
            );
        }

        if let Some(member_id) = &candidate.member_id {
            self.db
                .ledger()
                .append(NewLedgerEntry {
                    tenant_id: spec.tenant_id.clone(),
                    member_id: member_id.clone(),
                    currency: Currency::Credit,
                    amount: candidate.credit.cents(),
                    balance_after: Some(credit.new_balance.cents()),
                    event_kind: EventKind::BulkCredit,
                    source_type: Some("bulk_event".to_string()),
                    source_id: Some(spec.job_id.clone()),
                    promotion_id: None,
                    expires_at: spec.expires_at,
                    related_entry_id: None,
                    reversal_reason: None,
                    created_by: SYSTEM_ACTOR.to_string(),
                })
                .await?;
        }

        Ok(Some(candidate.credit))
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
