//! # Validation Module
//!
//! Input validation utilities for the loyalty engine.
//!
//! ## Validation Strategy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Layers                                  │
//! │                                                                         │
//! │  Layer 1: Caller (webhook handler, admin tool)                          │
//! │  └── Type validation (deserialization)                                  │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: THIS MODULE - rejected before any write or external call     │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 3: Database (SQLite)                                             │
//! │  ├── NOT NULL constraints                                               │
//! │  ├── CHECK constraints (amount != 0, remaining >= 0)                    │
//! │  └── Foreign key constraints                                            │
//! │                                                                         │
//! │  Defense in depth: multiple layers catch different errors               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use crate::error::ValidationError;

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

// =============================================================================
// Identifier Validators
// =============================================================================

/// Validates a tenant id.
///
/// Cross-tenant access is a programming error the engine rejects rather
/// than silently ignores; an empty tenant id is rejected before it can
/// widen a query to every tenant.
pub fn validate_tenant_id(tenant_id: &str) -> ValidationResult<()> {
    validate_id("tenant_id", tenant_id)
}

/// Validates a member id.
pub fn validate_member_id(member_id: &str) -> ValidationResult<()> {
    validate_id("member_id", member_id)
}

/// Validates a bulk-job id, which becomes part of the idempotency tag
/// written to external accounts (`received-credit-<job_id>`).
pub fn validate_job_id(job_id: &str) -> ValidationResult<()> {
    let job_id = job_id.trim();

    if job_id.is_empty() {
        return Err(ValidationError::Required {
            field: "job_id".to_string(),
        });
    }

    if job_id.len() > 64 {
        return Err(ValidationError::TooLong {
            field: "job_id".to_string(),
            max: 64,
        });
    }

    if !job_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(ValidationError::InvalidFormat {
            field: "job_id".to_string(),
            reason: "must contain only letters, numbers, hyphens, and underscores".to_string(),
        });
    }

    Ok(())
}

fn validate_id(field: &str, value: &str) -> ValidationResult<()> {
    let value = value.trim();

    if value.is_empty() {
        return Err(ValidationError::Required {
            field: field.to_string(),
        });
    }

    if value.len() > 64 {
        return Err(ValidationError::TooLong {
            field: field.to_string(),
            max: 64,
        });
    }

    Ok(())
}

// =============================================================================
// Amount Validators
// =============================================================================

/// Validates a ledger amount: signed, but never zero.
pub fn validate_amount_non_zero(amount: i64) -> ValidationResult<()> {
    if amount == 0 {
        return Err(ValidationError::MustBeNonZero {
            field: "amount".to_string(),
        });
    }
    Ok(())
}

/// Validates an earn/redeem/credit request amount: strictly positive.
/// The sign of the resulting ledger entry is decided by the operation,
/// not by the caller.
pub fn validate_amount_positive(field: &str, amount: i64) -> ValidationResult<()> {
    if amount <= 0 {
        return Err(ValidationError::MustBePositive {
            field: field.to_string(),
        });
    }
    Ok(())
}

// =============================================================================
// Text Validators
// =============================================================================

/// Validates a free-text description attached to a ledger entry.
pub fn validate_description(description: &str) -> ValidationResult<()> {
    if description.len() > 500 {
        return Err(ValidationError::TooLong {
            field: "description".to_string(),
            max: 500,
        });
    }
    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================
