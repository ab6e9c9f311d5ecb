//! # Commerce Platform Port
//!
//! The engine's only window onto the external commerce platform that owns
//! customer accounts and the authoritative store-credit balance.
//!
//! ## Write-External-First
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │              Why the port is called before the ledger                   │
//! │                                                                         │
//! │  credit_account() ──ok──► append ledger entry (platform balance         │
//! │        │                  recorded as balance_after)                    │
//! │        │                                                                │
//! │        └──err/timeout──► NOTHING written locally                        │
//! │                                                                         │
//! │  Failure modes:                                                         │
//! │  • external fails, local never attempted → consistent (no-op)          │
//! │  • external ok, local fails → platform holds the money, ledger is      │
//! │    missing a row → recoverable from platform transaction history       │
//! │  • the reverse order would risk a ledger row for money that was        │
//! │    never issued → unrecoverable from our side                          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! All platform calls go through [`CommercePlatform`]; the engine never
//! computes a credit balance locally.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use thiserror::Error;

use loyalty_core::{Channel, Money};

// =============================================================================
// Errors
// =============================================================================

/// Errors surfaced by the platform port.
#[derive(Debug, Clone, Error)]
pub enum PlatformError {
    /// The platform knows no such account.
    #[error("account not found: {0}")]
    AccountNotFound(String),

    /// The platform refused the operation (insufficient balance, policy).
    #[error("rejected: {0}")]
    Rejected(String),

    /// Transport-level failure; the operation may or may not have landed.
    #[error("platform unavailable: {0}")]
    Unavailable(String),
}

// =============================================================================
// Port Types
// =============================================================================

/// Result of a successful balance mutation on the platform.
#[derive(Debug, Clone)]
pub struct AccountCredit {
    /// Authoritative balance after the mutation, as reported by the
    /// platform. Recorded verbatim as the ledger entry's balance_after.
    pub new_balance: Money,

    /// The platform's own transaction id, for audit cross-reference.
    pub transaction_id: String,
}

/// Search window for bulk-event order queries.
#[derive(Debug, Clone)]
pub struct OrderWindow {
    pub created_after: DateTime<Utc>,
    pub created_before: DateTime<Utc>,

    /// Only order lines in this collection qualify, when set.
    pub collection: Option<String>,

    /// Only order lines carrying this tag qualify, when set.
    pub tag: Option<String>,
}

impl OrderWindow {
    /// Whether an order line qualifies under this window's line filters.
    pub fn line_qualifies(&self, line: &OrderLine) -> bool {
        if let Some(want) = self.collection.as_deref() {
            if !line.collections.iter().any(|c| c == want) {
                return false;
            }
        }
        if let Some(want) = self.tag.as_deref() {
            if !line.tags.iter().any(|t| t == want) {
                return false;
            }
        }
        true
    }
}

/// An order as reported by the platform.
#[derive(Debug, Clone)]
pub struct PlatformOrder {
    pub id: String,
    pub account_id: String,
    pub channel: Channel,
    pub created_at: DateTime<Utc>,
    pub lines: Vec<OrderLine>,
}

impl PlatformOrder {
    /// The order's spend that qualifies under the window's line filters.
    pub fn qualifying_spend(&self, window: &OrderWindow) -> Money {
        self.lines
            .iter()
            .filter(|line| window.line_qualifies(line))
            .fold(Money::zero(), |acc, line| acc + line.line_total)
    }

    /// The order's total spend.
    pub fn total_spend(&self) -> Money {
        self.lines
            .iter()
            .fold(Money::zero(), |acc, line| acc + line.line_total)
    }
}

/// One line of a platform order.
#[derive(Debug, Clone)]
pub struct OrderLine {
    pub product_id: String,
    pub collections: Vec<String>,
    pub tags: Vec<String>,
    pub quantity: i64,
    pub line_total: Money,
}

// =============================================================================
// Port Trait
// =============================================================================

/// The external commerce platform, as seen by this engine.
///
/// Implementations wrap the platform's HTTP API; [`MockPlatform`] is the
/// in-memory implementation used by tests.
#[async_trait]
pub trait CommercePlatform: Send + Sync {
    /// Adds store credit to an account. Returns the authoritative new
    /// balance.
    async fn credit_account(
        &self,
        account_id: &str,
        amount: Money,
        note: &str,
    ) -> Result<AccountCredit, PlatformError>;

    /// Removes store credit from an account. Returns the authoritative
    /// new balance.
    async fn debit_account(
        &self,
        account_id: &str,
        amount: Money,
        note: &str,
    ) -> Result<AccountCredit, PlatformError>;

    /// The account's current store-credit balance.
    async fn get_balance(&self, account_id: &str) -> Result<Money, PlatformError>;

    /// Attaches a tag to an account (idempotency markers for bulk jobs).
    async fn tag_account(&self, account_id: &str, tag: &str) -> Result<(), PlatformError>;

    /// Whether an account carries a tag.
    async fn account_has_tag(&self, account_id: &str, tag: &str) -> Result<bool, PlatformError>;

    /// Orders placed inside the window, for bulk-event candidate search.
    async fn search_orders(&self, window: &OrderWindow) -> Result<Vec<PlatformOrder>, PlatformError>;
}

/// Runs one platform call under the engine's timeout.
///
/// A call that outlives the budget is treated exactly like a platform
/// failure: the caller writes nothing locally.
pub(crate) async fn call_with_timeout<T>(
    budget: std::time::Duration,
    fut: impl std::future::Future<Output = Result<T, PlatformError>>,
) -> crate::error::EngineResult<T> {
    match tokio::time::timeout(budget, fut).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(err.into()),
        Err(_) => Err(crate::error::EngineError::PlatformTimeout(budget)),
    }
}

// =============================================================================
// Mock Platform
// =============================================================================

#[derive(Debug, Default)]
struct MockState {
    balances: HashMap<String, i64>,
    tags: HashSet<(String, String)>,
    orders: Vec<PlatformOrder>,
    failing_accounts: HashSet<String>,
    call_delay: Option<std::time::Duration>,
    credit_calls: u64,
    next_txn: u64,
}

/// In-memory platform for tests: programmable balances, orders, per-account
/// failures, and an optional artificial call delay for timeout tests.
#[derive(Debug, Default)]
pub struct MockPlatform {
    state: Mutex<MockState>,
}

impl MockPlatform {
    pub fn new() -> Self {
        MockPlatform::default()
    }

    /// Registers an account with a starting balance.
    pub fn set_balance(&self, account_id: &str, cents: i64) {
        self.state
            .lock()
            .unwrap()
            .balances
            .insert(account_id.to_string(), cents);
    }

    /// Makes every mutating call against this account fail.
    pub fn fail_account(&self, account_id: &str) {
        self.state
            .lock()
            .unwrap()
            .failing_accounts
            .insert(account_id.to_string());
    }

    /// Delays every call by `delay` (drives timeout tests).
    pub fn set_call_delay(&self, delay: std::time::Duration) {
        self.state.lock().unwrap().call_delay = Some(delay);
    }

    /// Registers an order for `search_orders`.
    pub fn push_order(&self, order: PlatformOrder) {
        self.state.lock().unwrap().orders.push(order);
    }

    /// Current balance, for assertions.
    pub fn balance(&self, account_id: &str) -> i64 {
        self.state
            .lock()
            .unwrap()
            .balances
            .get(account_id)
            .copied()
            .unwrap_or(0)
    }

    /// Number of credit_account calls made, for assertions.
    pub fn credit_calls(&self) -> u64 {
        self.state.lock().unwrap().credit_calls
    }

    async fn simulate_latency(&self) {
        let delay = self.state.lock().unwrap().call_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }

    fn check_account(state: &MockState, account_id: &str) -> Result<i64, PlatformError> {
        if state.failing_accounts.contains(account_id) {
            return Err(PlatformError::Unavailable(format!(
                "injected failure for {account_id}"
            )));
        }
        state
            .balances
            .get(account_id)
            .copied()
            .ok_or_else(|| PlatformError::AccountNotFound(account_id.to_string()))
    }
}

#[async_trait]
impl CommercePlatform for MockPlatform {
    async fn credit_account(
        &self,
        account_id: &str,
        amount: Money,
        _note: &str,
    ) -> Result<AccountCredit, PlatformError> {
        self.simulate_latency().await;
        let mut state = self.state.lock().unwrap();
        state.credit_calls += 1;
        let balance = Self::check_account(&state, account_id)?;

        let new_balance = balance + amount.cents();
        state.balances.insert(account_id.to_string(), new_balance);
        state.next_txn += 1;
        Ok(AccountCredit {
            new_balance: Money::from_cents(new_balance),
            transaction_id: format!("txn-{}", state.next_txn),
        })
    }

    async fn debit_account(
        &self,
        account_id: &str,
        amount: Money,
        _note: &str,
    ) -> Result<AccountCredit, PlatformError> {
        self.simulate_latency().await;
        let mut state = self.state.lock().unwrap();
        let balance = Self::check_account(&state, account_id)?;

        if balance < amount.cents() {
            return Err(PlatformError::Rejected(format!(
                "balance {balance} below debit {}",
                amount.cents()
            )));
        }

        let new_balance = balance - amount.cents();
        state.balances.insert(account_id.to_string(), new_balance);
        state.next_txn += 1;
        Ok(AccountCredit {
            new_balance: Money::from_cents(new_balance),
            transaction_id: format!("txn-{}", state.next_txn),
        })
    }

    async fn get_balance(&self, account_id: &str) -> Result<Money, PlatformError> {
        self.simulate_latency().await;
        let state = self.state.lock().unwrap();
        Self::check_account(&state, account_id).map(Money::from_cents)
    }

    async fn tag_account(&self, account_id: &str, tag: &str) -> Result<(), PlatformError> {
        self.simulate_latency().await;
        let mut state = self.state.lock().unwrap();
        Self::check_account(&state, account_id)?;
        state
            .tags
            .insert((account_id.to_string(), tag.to_string()));
        Ok(())
    }

    async fn account_has_tag(&self, account_id: &str, tag: &str) -> Result<bool, PlatformError> {
        self.simulate_latency().await;
        let state = self.state.lock().unwrap();
        Ok(state
            .tags
            .contains(&(account_id.to_string(), tag.to_string())))
    }

    async fn search_orders(
        &self,
        window: &OrderWindow,
    ) -> Result<Vec<PlatformOrder>, PlatformError> {
        self.simulate_latency().await;
        let state = self.state.lock().unwrap();
        Ok(state
            .orders
            .iter()
            .filter(|o| o.created_at >= window.created_after && o.created_at <= window.created_before)
            .cloned()
            .collect())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_credit_and_debit() {
        let platform = MockPlatform::new();
        platform.set_balance("acct-1", 1000);

        let credit = platform
            .credit_account("acct-1", Money::from_cents(500), "bonus")
            .await
            .unwrap();
        assert_eq!(credit.new_balance.cents(), 1500);

        let debit = platform
            .debit_account("acct-1", Money::from_cents(200), "redeem")
            .await
            .unwrap();
        assert_eq!(debit.new_balance.cents(), 1300);

        let overdraw = platform
            .debit_account("acct-1", Money::from_cents(99_999), "too much")
            .await;
        assert!(matches!(overdraw, Err(PlatformError::Rejected(_))));
    }

    #[tokio::test]
    async fn test_mock_unknown_account() {
        let platform = MockPlatform::new();
        let result = platform.get_balance("nobody").await;
        assert!(matches!(result, Err(PlatformError::AccountNotFound(_))));
    }

    #[test]
    fn test_qualifying_spend_subset() {
        let window = OrderWindow {
            created_after: Utc::now() - chrono::Duration::days(1),
            created_before: Utc::now(),
            collection: Some("phones".to_string()),
            tag: None,
        };
        let order = PlatformOrder {
            id: "o-1".to_string(),
            account_id: "acct-1".to_string(),
            channel: Channel::Online,
            created_at: Utc::now(),
            lines: vec![
                OrderLine {
                    product_id: "p-1".to_string(),
                    collections: vec!["phones".to_string()],
                    tags: vec![],
                    quantity: 1,
                    line_total: Money::from_cents(6000),
                },
                OrderLine {
                    product_id: "p-2".to_string(),
                    collections: vec!["cases".to_string()],
                    tags: vec![],
                    quantity: 2,
                    line_total: Money::from_cents(4000),
                },
            ],
        };

        assert_eq!(order.total_spend().cents(), 10_000);
        // Only the phones line qualifies.
        assert_eq!(order.qualifying_spend(&window).cents(), 6000);
    }
}
