//! # Repository Module
//!
//! Repository implementations for database access.
//!
//! ## Repository Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     Repository Pattern                                  │
//! │                                                                         │
//! │  loyalty-engine operation                                               │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  Repository (this module) ← SQL lives here, nowhere else               │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SqlitePool → SQLite                                                   │
//! │                                                                         │
//! │  Benefits:                                                              │
//! │  • Engine code never sees SQL                                          │
//! │  • Domain types (loyalty-core) in, domain types out                    │
//! │  • Tenant scoping enforced in exactly one place per query             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Transactional Methods
//! Methods suffixed `_tx` take a `&mut SqliteConnection` and run inside a
//! caller-owned transaction; their unsuffixed counterparts open and commit
//! their own. Multi-step operations (drain lots + append a redemption)
//! compose the `_tx` variants over `Database::begin()`.

pub mod ledger;
pub mod member;
pub mod promotion;
pub mod snapshot;
