//! # Engine Error Types
//!
//! Error types for engine operations.
//!
//! ## Error Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Error Propagation                                    │
//! │                                                                         │
//! │  ValidationError (loyalty-core)  ┐                                      │
//! │  DbError (loyalty-db)            ├──► EngineError (this module)         │
//! │  PlatformError (platform port)   ┘         │                            │
//! │                                            ▼                            │
//! │                     Business collaborators (webhooks, admin tools)      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The distinction that matters to callers: [`EngineError::Platform`] and
//! [`EngineError::PlatformTimeout`] mean the external write did NOT go
//! through and nothing was recorded locally; [`EngineError::Db`] after a
//! credit operation means the platform holds the money but the local
//! record failed, which is the recoverable direction by design.

use std::time::Duration;
use thiserror::Error;

use crate::platform::PlatformError;
use loyalty_core::{Currency, ValidationError};
use loyalty_db::DbError;

/// Engine operation errors.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Input rejected before any write or external call.
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// Credit-currency operation on a member without a linked platform
    /// account.
    #[error("Member {member_id} has no linked platform account")]
    ExternalAccountMissing { member_id: String },

    /// Redemption or debit larger than the spendable balance.
    #[error("Insufficient {currency} balance: available {available}, requested {requested}")]
    InsufficientBalance {
        currency: Currency,
        available: i64,
        requested: i64,
    },

    /// Reversal of an entry that already has a reversal referencing it.
    #[error("Entry {entry_id} has already been reversed")]
    AlreadyReversed { entry_id: String },

    /// Reversal of a lot whose unconsumed remainder is already zero.
    #[error("Entry {entry_id} has nothing left to reverse")]
    NothingToReverse { entry_id: String },

    /// Reversal of an entry kind that cannot be reversed (reversals and
    /// expirations are terminal).
    #[error("Entry {entry_id} ({kind}) cannot be reversed")]
    NotReversible { entry_id: String, kind: String },

    /// The external commerce platform rejected or failed the call.
    /// No local write happened.
    #[error("Platform call failed: {0}")]
    Platform(#[from] PlatformError),

    /// The external call did not answer in time. Treated exactly like a
    /// failure: no local write happened.
    #[error("Platform call timed out after {0:?}")]
    PlatformTimeout(Duration),

    /// Database layer failure.
    #[error(transparent)]
    Db(#[from] DbError),

    /// Internal invariant violation.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<sqlx::Error> for EngineError {
    fn from(err: sqlx::Error) -> Self {
        EngineError::Db(DbError::from(err))
    }
}

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;
