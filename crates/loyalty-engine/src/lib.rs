//! # loyalty-engine: Orchestration for the Loyalty Ledger
//!
//! The layer that turns business events into ledger writes: credit
//! issuance against the external commerce platform, points accrual and
//! redemption, promotion evaluation, reversals, bulk credit events, and
//! the expiration sweeper.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │            Business Collaborators (webhooks, admin tools)               │
//! └───────────────────────────────┬─────────────────────────────────────────┘
//! ┌───────────────────────────────▼─────────────────────────────────────────┐
//! │                    ★ loyalty-engine (THIS CRATE) ★                      │
//! │                                                                         │
//! │  ┌─────────────┐ ┌─────────────┐ ┌────────────┐ ┌───────────────────┐  │
//! │  │CreditIssuer │ │PointsEngine │ │ Reversal   │ │ BulkEventProcessor│  │
//! │  │ external-   │ │ lots, FIFO  │ │ Service    │ │ tag idempotency,  │  │
//! │  │ first writes│ │ drains      │ │ additive   │ │ batched issuance  │  │
//! │  └──────┬──────┘ └──────┬──────┘ └─────┬──────┘ └─────────┬─────────┘  │
//! │         │   ┌───────────┴─────┐        │    ┌─────────────┘            │
//! │         │   │PromotionEvaluator│       │    │   ┌───────────────────┐  │
//! │         │   │ 6-dim gate +     │       │    │   │ExpirationSweeper  │  │
//! │         │   │ stacking         │       │    │   │ background loop   │  │
//! │         │   └──────────────────┘       │    │   └─────────┬─────────┘  │
//! └─────────┼──────────────┬───────────────┼────┼─────────────┼────────────┘
//!           ▼              ▼               ▼    ▼             ▼
//!     CommercePlatform   loyalty-core    loyalty-db (SQLite ledger)
//!     (external port)    (pure logic)
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Write Ordering
//! Credit-currency operations call the platform FIRST and write locally
//! only on success; the platform's reported balance is recorded verbatim.
//! Points-currency operations are local-only and transactional.

// =============================================================================
// Module Declarations
// =============================================================================

pub mod bulk;
pub mod config;
pub mod error;
pub mod issuer;
pub mod notify;
pub mod platform;
pub mod points;
pub mod promotions;
pub mod reversal;
pub mod sweeper;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use bulk::{BulkCandidate, BulkEventProcessor, BulkFailure, BulkJobSpec, BulkRunReport};
pub use config::EngineConfig;
pub use error::{EngineError, EngineResult};
pub use issuer::{CashbackOrder, CreditIssuer, CreditRequest, TradeInPayout};
pub use notify::{LoyaltyNotifier, NoOpNotifier, NotifyError};
pub use platform::{
    AccountCredit, CommercePlatform, MockPlatform, OrderLine, OrderWindow, PlatformError,
    PlatformOrder,
};
pub use points::{EarnProduct, EarnRequest, PointsEngine, RedeemRequest};
pub use promotions::{BonusRequest, PromotionEvaluator};
pub use reversal::{ReversalRequest, ReversalService};
pub use sweeper::{ExpirationSweeper, SweepReport};
