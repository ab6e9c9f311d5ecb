//! # Notification Port
//!
//! Trait for member-facing notifications (email, push, webhook fan-out).
//!
//! Notification failure never fails the operation that triggered it: the
//! external write and the ledger entry are already durable by the time a
//! notifier runs, so callers log the error and move on.

use thiserror::Error;

use loyalty_core::{Money, Points};

/// A notification delivery failure.
#[derive(Debug, Error)]
#[error("notification failed: {0}")]
pub struct NotifyError(pub String);

/// Trait for emitting member notifications (implemented by the messaging
/// integration).
pub trait LoyaltyNotifier: Send + Sync {
    /// Store credit landed on the member's account.
    fn credit_issued(
        &self,
        member_id: &str,
        amount: Money,
        new_balance: Money,
    ) -> Result<(), NotifyError>;

    /// Points were awarded.
    fn points_awarded(&self, member_id: &str, points: Points) -> Result<(), NotifyError>;

    /// Points were redeemed.
    fn points_redeemed(&self, member_id: &str, points: Points) -> Result<(), NotifyError>;
}

/// No-op notifier for testing and headless deployments.
pub struct NoOpNotifier;

impl LoyaltyNotifier for NoOpNotifier {
    fn credit_issued(
        &self,
        _member_id: &str,
        _amount: Money,
        _new_balance: Money,
    ) -> Result<(), NotifyError> {
        Ok(())
    }

    fn points_awarded(&self, _member_id: &str, _points: Points) -> Result<(), NotifyError> {
        Ok(())
    }

    fn points_redeemed(&self, _member_id: &str, _points: Points) -> Result<(), NotifyError> {
        Ok(())
    }
}
