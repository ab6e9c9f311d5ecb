//! # Tenant Policy Configuration
//!
//! Per-tenant knobs the engine resolves at call time. Nothing in here is a
//! module-level mutable default: callers inject a `TenantPolicy` and every
//! lookup has a documented fallback order.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::money::{Multiplier, Rate};

/// Hardcoded minimum cashback: the final fallback when neither a
/// tier-specific rate nor a tenant default is configured (1%).
pub const MIN_CASHBACK_BPS: u32 = 100;

/// Default window for "new member" earning rules.
pub const DEFAULT_NEW_MEMBER_DAYS: i64 = 30;

/// Per-tenant policy resolved per call.
///
/// ## Cashback Fallback Order
/// ```text
/// tier-specific rate → tenant default → MIN_CASHBACK_BPS
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantPolicy {
    /// Tier name → cashback rate in basis points.
    pub tier_cashback_bps: HashMap<String, u32>,

    /// Tenant-wide default cashback in basis points, used when the
    /// member's tier has no specific rate.
    pub default_cashback_bps: Option<u32>,

    /// Tier name → points multiplier in hundredths (200 = double points).
    pub tier_point_multipliers: HashMap<String, u32>,

    /// Days until a points earn lot expires; None = no expiration policy.
    pub points_expiration_days: Option<i64>,

    /// Tenant-local offset from UTC in minutes, for daily promotion
    /// windows and weekday masks.
    pub utc_offset_minutes: i32,

    /// Window for `new_member_only` earning rules.
    pub new_member_days: i64,
}

impl Default for TenantPolicy {
    fn default() -> Self {
        TenantPolicy {
            tier_cashback_bps: HashMap::new(),
            default_cashback_bps: None,
            tier_point_multipliers: HashMap::new(),
            points_expiration_days: None,
            utc_offset_minutes: 0,
            new_member_days: DEFAULT_NEW_MEMBER_DAYS,
        }
    }
}

impl TenantPolicy {
    /// Resolves the cashback rate for a tier.
    ///
    /// Fallback order: tier-specific → tenant default → hardcoded minimum.
    pub fn cashback_rate(&self, tier: &str) -> Rate {
        let bps = self
            .tier_cashback_bps
            .get(tier)
            .copied()
            .or(self.default_cashback_bps)
            .unwrap_or(MIN_CASHBACK_BPS);
        Rate::from_bps(bps)
    }

    /// Resolves the points multiplier tier benefit; identity when the
    /// tier has none.
    pub fn tier_multiplier(&self, tier: &str) -> Multiplier {
        self.tier_point_multipliers
            .get(tier)
            .copied()
            .map(Multiplier::from_hundredths)
            .unwrap_or_else(Multiplier::identity)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cashback_fallback_order() {
        let mut policy = TenantPolicy::default();

        // No config at all: hardcoded minimum.
        assert_eq!(policy.cashback_rate("gold").bps(), MIN_CASHBACK_BPS);

        // Tenant default beats the minimum.
        policy.default_cashback_bps = Some(300);
        assert_eq!(policy.cashback_rate("gold").bps(), 300);

        // Tier-specific beats the tenant default.
        policy.tier_cashback_bps.insert("gold".to_string(), 500);
        assert_eq!(policy.cashback_rate("gold").bps(), 500);
        assert_eq!(policy.cashback_rate("bronze").bps(), 300);
    }

    #[test]
    fn test_tier_multiplier_defaults_to_identity() {
        let mut policy = TenantPolicy::default();
        assert!(policy.tier_multiplier("bronze").is_identity());

        policy
            .tier_point_multipliers
            .insert("platinum".to_string(), 200);
        assert_eq!(policy.tier_multiplier("platinum").hundredths(), 200);
    }
}
