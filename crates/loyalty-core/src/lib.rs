//! # loyalty-core: Pure Business Logic for the Loyalty Engine
//!
//! This crate is the **heart** of the loyalty engine. It contains all
//! business logic as pure functions with zero I/O dependencies.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Loyalty Engine Architecture                        │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │            Business Collaborators (trade-in processing,         │   │
//! │  │            purchase webhooks, admin tools)                      │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │              loyalty-engine (orchestration)                     │   │
//! │  │    credit issuer, points engine, bulk jobs, sweeper             │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ loyalty-core (THIS CRATE) ★                     │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐ ┌───────────┐ ┌───────────┐ ┌──────────────┐   │   │
//! │  │   │   types   │ │   money   │ │ promotion │ │    rules     │   │   │
//! │  │   │  Ledger   │ │  Money    │ │  gating   │ │  earning     │   │   │
//! │  │   │  Snapshot │ │  Points   │ │  stacking │ │  resolution  │   │   │
//! │  │   └───────────┘ └───────────┘ └───────────┘ └──────────────┘   │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS            │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                  loyalty-db (Database Layer)                    │   │
//! │  │          SQLite queries, migrations, repositories               │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Domain types (LedgerEntry, snapshots, Member, enums)
//! - [`money`] - Money/Points/Rate/Multiplier integer arithmetic
//! - [`promotion`] - Promotion gating, bonus math, stacking resolution
//! - [`rules`] - Points earning rules and their resolution
//! - [`config`] - Per-tenant policy with documented fallback orders
//! - [`error`] - Domain error types
//! - [`validation`] - Input validation, rejected before any write
//!
//! ## Design Principles
//!
//! 1. **Pure Functions**: Every function is deterministic - same input = same output
//! 2. **No I/O**: Database, network, file system access is FORBIDDEN here
//! 3. **Integer Amounts**: Cents, points, basis points - no floating point
//! 4. **Closed Enums**: Unknown tokens are rejected at ingestion, never defaulted

// =============================================================================
// Module Declarations
// =============================================================================

pub mod config;
pub mod error;
pub mod money;
pub mod promotion;
pub mod rules;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================
// These allow users to do `use loyalty_core::Money` instead of
// `use loyalty_core::money::Money`

pub use config::TenantPolicy;
pub use error::{CoreError, CoreResult, ValidationError};
pub use money::{Money, Multiplier, Points, Rate};
pub use promotion::{
    resolve_promotion_stack, Promotion, PromotionContext, PromotionType, StackOutcome, WeekdaySet,
};
pub use rules::{
    resolve_earning, EarnContext, EarnOutcome, EarnSource, PointsEarningRule, ProductContext,
    RuleType,
};
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Actor recorded on entries created by background jobs.
pub const SYSTEM_ACTOR: &str = "system";

/// Prefix of the idempotency tag written to external accounts by bulk
/// events: `received-credit-<job_id>`.
pub const BULK_CREDIT_TAG_PREFIX: &str = "received-credit-";

/// Builds the idempotency tag for a bulk-event job.
pub fn bulk_credit_tag(job_id: &str) -> String {
    format!("{BULK_CREDIT_TAG_PREFIX}{job_id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bulk_credit_tag() {
        assert_eq!(bulk_credit_tag("spring-2026"), "received-credit-spring-2026");
    }
}
