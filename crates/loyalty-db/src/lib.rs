//! # loyalty-db: Database Layer for the Loyalty Engine
//!
//! This crate provides database access for the loyalty ledger engine.
//! It uses SQLite for storage with sqlx for async operations.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     Loyalty Engine Data Flow                            │
//! │                                                                         │
//! │  Engine operation (earn_points, add_credit, bulk job, sweeper)         │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                    loyalty-db (THIS CRATE)                      │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌───────────────┐    ┌──────────────┐  │   │
//! │  │   │   Database    │    │  Repositories │    │  Migrations  │  │   │
//! │  │   │   (pool.rs)   │    │ (ledger.rs..) │    │  (embedded)  │  │   │
//! │  │   │               │    │               │    │              │  │   │
//! │  │   │ SqlitePool    │    │ LedgerRepo    │    │ 001_init.sql │  │   │
//! │  │   │ Transactions  │◄───│ SnapshotRepo  │    │ ...          │  │   │
//! │  │   │               │    │ PromotionRepo │    │              │  │   │
//! │  │   └───────────────┘    └───────────────┘    └──────────────┘  │   │
//! │  │                                                                 │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SQLite database (WAL mode)                                            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`pool`] - Connection pool creation and configuration
//! - [`migrations`] - Embedded database migrations
//! - [`error`] - Database error types
//! - [`repository`] - Repository implementations (ledger, snapshot, ...)
//!
//! ## Usage
//!
//! ```rust,ignore
//! use loyalty_db::{Database, DbConfig};
//!
//! let db = Database::new(DbConfig::new("path/to/loyalty.db")).await?;
//! let history = db
//!     .ledger()
//!     .history("tenant-1", "member-1", Currency::Points, Page::default())
//!     .await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{DbError, DbResult};
pub use pool::{Database, DbConfig};

// Repository re-exports for convenience
pub use repository::ledger::{LedgerRepository, NewLedgerEntry};
pub use repository::member::MemberRepository;
pub use repository::promotion::{EarningRuleRepository, PromotionRepository};
pub use repository::snapshot::{SnapshotDrift, SnapshotRepository};
