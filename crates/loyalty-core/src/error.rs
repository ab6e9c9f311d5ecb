//! # Error Types
//!
//! Domain-specific error types for loyalty-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  loyalty-core errors (this file)                                        │
//! │  ├── CoreError        - Business rule violations                        │
//! │  └── ValidationError  - Input validation failures                       │
//! │                                                                         │
//! │  loyalty-db errors (separate crate)                                     │
//! │  └── DbError          - Database operation failures                     │
//! │                                                                         │
//! │  loyalty-engine errors (separate crate)                                 │
//! │  └── EngineError      - Orchestration + external write failures         │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → DbError → EngineError → Caller     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Design Principles
//! 1. Use `thiserror` for derive macros (not manual impl)
//! 2. Include context in error messages (member id, currency, amounts)
//! 3. Errors are enum variants, never String
//! 4. Structured failures are returned to the caller, never retried here

use thiserror::Error;

use crate::types::Currency;

// =============================================================================
// Core Error
// =============================================================================

/// Core business logic errors.
///
/// These errors represent business rule violations or domain logic failures.
/// They are returned to the immediate caller as structured failures and are
/// never retried automatically.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Redeem/deduct requested more than the member has available.
    ///
    /// ## When This Occurs
    /// - Redeeming more points than the open lots hold
    /// - Deducting more credit than the tracked balance
    #[error("Insufficient {currency} balance: available {available}, requested {requested}")]
    InsufficientBalance {
        currency: Currency,
        available: i64,
        requested: i64,
    },

    /// Member has no linked external account for a credit-currency operation.
    ///
    /// Points-only operations tolerate a missing account; any operation that
    /// must touch the commerce platform fails fast with this error before
    /// any external call is made.
    #[error("Member {member_id} has no linked external account")]
    ExternalAccountMissing { member_id: String },

    /// Ledger entry is already offset by a reversal entry.
    #[error("Ledger entry {entry_id} is already reversed")]
    AlreadyReversed { entry_id: String },

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
///
/// These errors occur when input doesn't meet requirements.
/// Used for early validation before business logic runs.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Value must be positive.
    #[error("{field} must be positive")]
    MustBePositive { field: String },

    /// Value must be non-zero (ledger amounts are signed but never zero).
    #[error("{field} must not be zero")]
    MustBeNonZero { field: String },

    /// Numeric value is out of range.
    #[error("{field} must be between {min} and {max}")]
    OutOfRange { field: String, min: i64, max: i64 },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Invalid format (e.g., invalid enum token, invalid time window).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },

    /// Value is not in the closed set of allowed tokens.
    ///
    /// String-typed enums are rejected at ingestion rather than defaulting
    /// silently.
    #[error("{field} must be one of: {allowed:?}")]
    NotAllowed { field: String, allowed: Vec<String> },
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = CoreError::InsufficientBalance {
            currency: Currency::Points,
            available: 120,
            requested: 500,
        };
        assert_eq!(
            err.to_string(),
            "Insufficient points balance: available 120, requested 500"
        );

        let err = CoreError::ExternalAccountMissing {
            member_id: "member-1".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Member member-1 has no linked external account"
        );
    }

    #[test]
    fn test_validation_error_messages() {
        let err = ValidationError::MustBeNonZero {
            field: "amount".to_string(),
        };
        assert_eq!(err.to_string(), "amount must not be zero");
    }

    #[test]
    fn test_validation_converts_to_core_error() {
        let validation_err = ValidationError::Required {
            field: "member_id".to_string(),
        };
        let core_err: CoreError = validation_err.into();
        assert!(matches!(core_err, CoreError::Validation(_)));
    }
}
