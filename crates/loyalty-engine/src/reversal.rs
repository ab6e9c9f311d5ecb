//! # Reversal Service
//!
//! Additive corrections: a reversal never edits the original entry, it
//! appends a new entry referencing it. Reversal status IS the existence of
//! that referencing entry.
//!
//! ## What a Reversal Offsets
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  original entry              reversal entry                             │
//! │                                                                         │
//! │  points earn lot (+500,      -remaining (only the unconsumed part       │
//! │    300 still unconsumed)       is clawed back: -300)                    │
//! │                                                                         │
//! │  points redemption (-200)    +200, recorded as a fresh consumable lot   │
//! │                                                                         │
//! │  credit issuance (+500)      platform debit first, then -500 with the   │
//! │                              platform's reported balance                │
//! │                                                                         │
//! │  credit debit (-200)         platform credit first, then +200           │
//! │                                                                         │
//! │  reversal / expiration       refused: terminal kinds                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;
use tracing::info;

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::platform::{call_with_timeout, CommercePlatform};
use loyalty_core::validation::{validate_description, validate_tenant_id};
use loyalty_core::{Currency, EventKind, LedgerEntry, Money};
use loyalty_db::{Database, NewLedgerEntry};

/// One reversal request.
#[derive(Debug, Clone)]
pub struct ReversalRequest {
    pub tenant_id: String,

    /// The entry to offset.
    pub entry_id: String,

    /// Member-visible reason, recorded on the reversal entry.
    pub reason: String,

    pub created_by: String,
}

/// Appends reversal entries for ledger corrections.
#[derive(Clone)]
pub struct ReversalService {
    db: Database,
    platform: Arc<dyn CommercePlatform>,
    config: Arc<EngineConfig>,
}

impl ReversalService {
    /// Creates a new reversal service.
    pub fn new(db: Database, platform: Arc<dyn CommercePlatform>, config: Arc<EngineConfig>) -> Self {
        ReversalService {
            db,
            platform,
            config,
        }
    }

    /// Reverses one ledger entry.
    pub async fn reverse(&self, req: ReversalRequest) -> EngineResult<LedgerEntry> {
        validate_tenant_id(&req.tenant_id)?;
        validate_description(&req.reason)?;

        let original = self.db.ledger().require(&req.tenant_id, &req.entry_id).await?;

        if matches!(
            original.event_kind,
            EventKind::Reversal | EventKind::Expiration
        ) {
            return Err(EngineError::NotReversible {
                entry_id: original.id,
                kind: original.event_kind.to_string(),
            });
        }
        if self.db.ledger().is_reversed(&req.tenant_id, &original.id).await? {
            return Err(EngineError::AlreadyReversed {
                entry_id: original.id,
            });
        }

        let entry = match original.currency {
            Currency::Points => self.reverse_points(&req, &original).await?,
            Currency::Credit => self.reverse_credit(&req, &original).await?,
        };

        info!(
            entry_id = %original.id,
            reversal_id = %entry.id,
            amount = entry.amount,
            "Entry reversed"
        );
        Ok(entry)
    }

    /// Points reversal: claws back a lot's unconsumed remainder, or
    /// restores a redemption as a fresh lot. Local-only.
    async fn reverse_points(
        &self,
        req: &ReversalRequest,
        original: &LedgerEntry,
    ) -> EngineResult<LedgerEntry> {
        let mut tx = self.db.begin().await?;

        // Re-checked under the transaction so two concurrent reversals
        // cannot both land.
        if self
            .db
            .ledger()
            .is_reversed_tx(&mut tx, &req.tenant_id, &original.id)
            .await?
        {
            return Err(EngineError::AlreadyReversed {
                entry_id: original.id.clone(),
            });
        }

        let amount = if original.amount > 0 {
            // Earn lot: only what was never consumed comes back. The
            // remainder is re-read under the transaction so a concurrent
            // drain cannot inflate the claw-back.
            let lot = self
                .db
                .ledger()
                .get_tx(&mut tx, &req.tenant_id, &original.id)
                .await?
                .ok_or_else(|| EngineError::Internal(format!("entry {} vanished", original.id)))?;
            let remaining = lot.remaining().value();
            if remaining == 0
                || !self
                    .db
                    .ledger()
                    .zero_lot_remaining_tx(&mut tx, &req.tenant_id, &original.id)
                    .await?
            {
                return Err(EngineError::NothingToReverse {
                    entry_id: original.id.clone(),
                });
            }
            -remaining
        } else {
            // Redemption (or negative adjustment): give the points back.
            // The positive reversal entry is itself a consumable lot.
            -original.amount
        };

        let entry = self
            .db
            .ledger()
            .append_tx(
                &mut tx,
                NewLedgerEntry {
                    tenant_id: req.tenant_id.clone(),
                    member_id: original.member_id.clone(),
                    currency: Currency::Points,
                    amount,
                    balance_after: None,
                    event_kind: EventKind::Reversal,
                    source_type: original.source_type.clone(),
                    source_id: original.source_id.clone(),
                    promotion_id: None,
                    expires_at: None,
                    related_entry_id: Some(original.id.clone()),
                    reversal_reason: Some(req.reason.clone()),
                    created_by: req.created_by.clone(),
                },
            )
            .await?;
        tx.commit().await?;

        Ok(entry)
    }

    /// Credit reversal: moves the money back on the platform first, then
    /// appends the offsetting entry with the platform's reported balance.
    async fn reverse_credit(
        &self,
        req: &ReversalRequest,
        original: &LedgerEntry,
    ) -> EngineResult<LedgerEntry> {
        let member = self
            .db
            .members()
            .require(&req.tenant_id, &original.member_id)
            .await?;
        let account_id = member
            .external_account_id
            .as_deref()
            .filter(|id| !id.is_empty())
            .ok_or_else(|| EngineError::ExternalAccountMissing {
                member_id: member.id.clone(),
            })?;

        let magnitude = Money::from_cents(original.amount.abs());
        let note = format!("Reversal: {}", req.reason);
        let result = if original.amount > 0 {
            call_with_timeout(
                self.config.platform_timeout,
                self.platform.debit_account(account_id, magnitude, &note),
            )
            .await?
        } else {
            call_with_timeout(
                self.config.platform_timeout,
                self.platform.credit_account(account_id, magnitude, &note),
            )
            .await?
        };

        let mut tx = self.db.begin().await?;
        if self
            .db
            .ledger()
            .is_reversed_tx(&mut tx, &req.tenant_id, &original.id)
            .await?
        {
            return Err(EngineError::AlreadyReversed {
                entry_id: original.id.clone(),
            });
        }

        let entry = self
            .db
            .ledger()
            .append_tx(
                &mut tx,
                NewLedgerEntry {
                    tenant_id: req.tenant_id.clone(),
                    member_id: original.member_id.clone(),
                    currency: Currency::Credit,
                    amount: -original.amount,
                    balance_after: Some(result.new_balance.cents()),
                    event_kind: EventKind::Reversal,
                    source_type: original.source_type.clone(),
                    source_id: original.source_id.clone(),
                    promotion_id: None,
                    expires_at: None,
                    related_entry_id: Some(original.id.clone()),
                    reversal_reason: Some(req.reason.clone()),
                    created_by: req.created_by.clone(),
                },
            )
            .await?;
        tx.commit().await?;

        Ok(entry)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
