//! # Money & Points Module
//!
//! Provides the `Money`, `Points`, `Rate` and `Multiplier` types for the
//! dual-currency ledger.
//!
//! ## Why Integer Money?
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  THE FLOATING POINT PROBLEM                                             │
//! │                                                                         │
//! │  In floating point:                                                     │
//! │    0.1 + 0.2 = 0.30000000000000004  ❌ WRONG!                           │
//! │                                                                         │
//! │  OUR SOLUTION: Integer Cents                                            │
//! │    $100.00 cashback at 15% = 10000 * 1500 / 10000 = 1500 cents, exact  │
//! │                                                                         │
//! │  Rates are basis points (u32), multipliers are hundredths (u32), and   │
//! │  all intermediate math widens to i128 before rounding half-up.         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use loyalty_core::money::{Money, Rate};
//!
//! let order = Money::from_cents(10_000);          // $100.00
//! let cashback = order.apply_rate(Rate::from_bps(1500)); // 15%
//! assert_eq!(cashback.cents(), 1500);             // $15.00
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign, Neg, Sub, SubAssign};

// =============================================================================
// Money Type
// =============================================================================

/// A monetary value in the smallest currency unit (cents).
///
/// ## Design Decisions
/// - **i64 (signed)**: Negative values represent redemptions, expirations,
///   debits and reversals
/// - **Single field tuple struct**: Zero-cost abstraction over i64
/// - **Derives**: Full serde support for JSON serialization
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(i64);

impl Money {
    /// Creates a Money value from cents (the smallest currency unit).
    #[inline]
    pub const fn from_cents(cents: i64) -> Self {
        Money(cents)
    }

    /// Returns the value in cents.
    #[inline]
    pub const fn cents(&self) -> i64 {
        self.0
    }

    /// Returns the major unit (dollars) portion.
    #[inline]
    pub const fn dollars(&self) -> i64 {
        self.0 / 100
    }

    /// Returns the minor unit (cents) portion (always 0-99).
    #[inline]
    pub const fn cents_part(&self) -> i64 {
        (self.0 % 100).abs()
    }

    /// Zero money value.
    #[inline]
    pub const fn zero() -> Self {
        Money(0)
    }

    /// Checks if the value is zero.
    #[inline]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Checks if the value is positive (greater than zero).
    #[inline]
    pub const fn is_positive(&self) -> bool {
        self.0 > 0
    }

    /// Checks if the value is negative (less than zero).
    #[inline]
    pub const fn is_negative(&self) -> bool {
        self.0 < 0
    }

    /// Returns the absolute value.
    #[inline]
    pub const fn abs(&self) -> Self {
        Money(self.0.abs())
    }

    /// Applies a percentage rate and returns the resulting amount.
    ///
    /// ## Implementation
    /// Integer math with half-up rounding: `(cents * bps + 5000) / 10000`.
    /// Widens to i128 to prevent overflow on large amounts.
    ///
    /// ## Example
    /// ```rust
    /// use loyalty_core::money::{Money, Rate};
    ///
    /// let order = Money::from_cents(10_000);       // $100.00
    /// let bonus = order.apply_rate(Rate::from_bps(500)); // 5%
    /// assert_eq!(bonus.cents(), 500);              // $5.00
    /// ```
    pub fn apply_rate(&self, rate: Rate) -> Money {
        let cents = (self.0 as i128 * rate.bps() as i128 + 5000) / 10000;
        Money::from_cents(cents as i64)
    }
}

/// Display implementation shows money in a human-readable format.
///
/// ## Note
/// This is for logs and debugging, not locale-aware rendering.
impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        write!(
            f,
            "{}${}.{:02}",
            sign,
            self.dollars().abs(),
            self.cents_part()
        )
    }
}

/// Default money is zero.
impl Default for Money {
    fn default() -> Self {
        Money::zero()
    }
}

impl Add for Money {
    type Output = Self;

    #[inline]
    fn add(self, other: Self) -> Self {
        Money(self.0 + other.0)
    }
}

impl AddAssign for Money {
    #[inline]
    fn add_assign(&mut self, other: Self) {
        self.0 += other.0;
    }
}

impl Sub for Money {
    type Output = Self;

    #[inline]
    fn sub(self, other: Self) -> Self {
        Money(self.0 - other.0)
    }
}

impl SubAssign for Money {
    #[inline]
    fn sub_assign(&mut self, other: Self) {
        self.0 -= other.0;
    }
}

impl Neg for Money {
    type Output = Self;

    #[inline]
    fn neg(self) -> Self {
        Money(-self.0)
    }
}

// =============================================================================
// Points Type
// =============================================================================

/// A points value for the loyalty points currency.
///
/// Same integer discipline as [`Money`]: signed i64, negative values are
/// redemptions and expirations. Points never carry fractional amounts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Points(i64);

impl Points {
    /// Creates a Points value from a raw count.
    #[inline]
    pub const fn new(value: i64) -> Self {
        Points(value)
    }

    /// Returns the raw points count.
    #[inline]
    pub const fn value(&self) -> i64 {
        self.0
    }

    /// Zero points.
    #[inline]
    pub const fn zero() -> Self {
        Points(0)
    }

    /// Checks if the value is zero.
    #[inline]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Checks if the value is positive (greater than zero).
    #[inline]
    pub const fn is_positive(&self) -> bool {
        self.0 > 0
    }

    /// Returns the smaller of the two values.
    #[inline]
    pub fn min(self, other: Self) -> Self {
        Points(self.0.min(other.0))
    }

    /// Applies a multiplier and returns only the INCREMENTAL bonus points.
    ///
    /// A 1.5× multiplier on 100 base points yields 50 bonus points; the
    /// caller adds this to the base to get the total payout.
    ///
    /// ## Example
    /// ```rust
    /// use loyalty_core::money::{Multiplier, Points};
    ///
    /// let base = Points::new(100);
    /// let bonus = base.incremental_bonus(Multiplier::from_hundredths(150));
    /// assert_eq!(bonus.value(), 50);
    /// ```
    pub fn incremental_bonus(&self, multiplier: Multiplier) -> Points {
        let extra = (self.0 as i128 * multiplier.incremental_hundredths() as i128 + 50) / 100;
        Points(extra as i64)
    }
}

impl fmt::Display for Points {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} pts", self.0)
    }
}

impl Default for Points {
    fn default() -> Self {
        Points::zero()
    }
}

impl Add for Points {
    type Output = Self;

    #[inline]
    fn add(self, other: Self) -> Self {
        Points(self.0 + other.0)
    }
}

impl AddAssign for Points {
    #[inline]
    fn add_assign(&mut self, other: Self) {
        self.0 += other.0;
    }
}

impl Sub for Points {
    type Output = Self;

    #[inline]
    fn sub(self, other: Self) -> Self {
        Points(self.0 - other.0)
    }
}

impl SubAssign for Points {
    #[inline]
    fn sub_assign(&mut self, other: Self) {
        self.0 -= other.0;
    }
}

impl Neg for Points {
    type Output = Self;

    #[inline]
    fn neg(self) -> Self {
        Points(-self.0)
    }
}

// =============================================================================
// Rate (basis points)
// =============================================================================

/// Percentage rate represented in basis points (bps).
///
/// ## Why Basis Points?
/// 1 basis point = 0.01% = 1/10000
/// 1500 bps = 15% (e.g., a trade-in bonus percentage)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Rate(u32);

impl Rate {
    /// Creates a rate from basis points.
    #[inline]
    pub const fn from_bps(bps: u32) -> Self {
        Rate(bps)
    }

    /// Returns the rate in basis points.
    #[inline]
    pub const fn bps(&self) -> u32 {
        self.0
    }

    /// Returns the rate as a percentage (for display only).
    #[inline]
    pub fn percentage(&self) -> f64 {
        self.0 as f64 / 100.0
    }

    /// Zero rate.
    #[inline]
    pub const fn zero() -> Self {
        Rate(0)
    }

    /// Checks if the rate is zero.
    #[inline]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }
}

impl Default for Rate {
    fn default() -> Self {
        Rate::zero()
    }
}

// =============================================================================
// Multiplier (hundredths)
// =============================================================================

/// Points multiplier represented in hundredths.
///
/// 100 = 1.0× (no-op), 150 = 1.5×, 200 = double points.
/// Multipliers below 1.0× are clamped to 1.0× at the call sites that
/// compute incremental bonuses; a multiplier never reduces the base.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Multiplier(u32);

impl Multiplier {
    /// Creates a multiplier from hundredths (150 = 1.5×).
    #[inline]
    pub const fn from_hundredths(hundredths: u32) -> Self {
        Multiplier(hundredths)
    }

    /// The identity multiplier (1.0×).
    #[inline]
    pub const fn identity() -> Self {
        Multiplier(100)
    }

    /// Returns the multiplier in hundredths.
    #[inline]
    pub const fn hundredths(&self) -> u32 {
        self.0
    }

    /// Returns the incremental part in hundredths: `(m - 1.0)`, never negative.
    #[inline]
    pub const fn incremental_hundredths(&self) -> u32 {
        if self.0 > 100 {
            self.0 - 100
        } else {
            0
        }
    }

    /// Checks whether this multiplier changes anything.
    #[inline]
    pub const fn is_identity(&self) -> bool {
        self.0 <= 100
    }
}

impl Default for Multiplier {
    fn default() -> Self {
        Multiplier::identity()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_money_from_cents() {
        let money = Money::from_cents(1099);
        assert_eq!(money.cents(), 1099);
        assert_eq!(money.dollars(), 10);
        assert_eq!(money.cents_part(), 99);
    }

    #[test]
    fn test_money_display() {
        assert_eq!(format!("{}", Money::from_cents(1099)), "$10.99");
        assert_eq!(format!("{}", Money::from_cents(500)), "$5.00");
        assert_eq!(format!("{}", Money::from_cents(-550)), "-$5.50");
        assert_eq!(format!("{}", Money::from_cents(0)), "$0.00");
    }

    #[test]
    fn test_money_arithmetic() {
        let a = Money::from_cents(1000);
        let b = Money::from_cents(500);

        assert_eq!((a + b).cents(), 1500);
        assert_eq!((a - b).cents(), 500);
        assert_eq!((-a).cents(), -1000);
    }

    #[test]
    fn test_apply_rate_exact() {
        // $100.00 at 15% = $15.00
        let amount = Money::from_cents(10_000);
        assert_eq!(amount.apply_rate(Rate::from_bps(1500)).cents(), 1500);
    }

    #[test]
    fn test_apply_rate_rounds_half_up() {
        // $10.00 at 8.25% = $0.825 → $0.83
        let amount = Money::from_cents(1000);
        assert_eq!(amount.apply_rate(Rate::from_bps(825)).cents(), 83);
    }

    #[test]
    fn test_points_incremental_bonus() {
        let base = Points::new(100);
        assert_eq!(
            base.incremental_bonus(Multiplier::from_hundredths(150)).value(),
            50
        );
        // Double points tier benefit
        assert_eq!(
            base.incremental_bonus(Multiplier::from_hundredths(200)).value(),
            100
        );
        // Identity multiplier adds nothing
        assert_eq!(base.incremental_bonus(Multiplier::identity()).value(), 0);
    }

    #[test]
    fn test_multiplier_never_reduces_base() {
        // A misconfigured 0.5× multiplier contributes zero bonus, it does
        // not subtract from the base.
        let base = Points::new(100);
        assert_eq!(
            base.incremental_bonus(Multiplier::from_hundredths(50)).value(),
            0
        );
    }

    #[test]
    fn test_points_arithmetic_and_min() {
        let a = Points::new(300);
        let b = Points::new(120);
        assert_eq!((a - b).value(), 180);
        assert_eq!(a.min(b).value(), 120);
        assert_eq!((-b).value(), -120);
    }
}
