//! # Engine Configuration
//!
//! Knobs for the orchestration layer: external-call timeout, bulk batch
//! shape, sweep cadence, and per-tenant policy resolution.

use std::collections::HashMap;
use std::time::Duration;

use loyalty_core::TenantPolicy;

/// Engine configuration.
///
/// ## Example
/// ```rust,ignore
/// let config = EngineConfig::default()
///     .platform_timeout(Duration::from_secs(5))
///     .bulk_batch_size(25);
/// ```
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Upper bound on any single external platform call. A call that
    /// outlives this is treated as failed.
    /// Default: 10 seconds
    pub platform_timeout: Duration,

    /// Accounts credited per bulk batch before pausing.
    /// Default: 50
    pub bulk_batch_size: usize,

    /// Pause between bulk batches, to stay inside platform rate limits.
    /// Default: 1 second
    pub bulk_batch_delay: Duration,

    /// Rows fetched per sweep pass.
    /// Default: 200
    pub sweep_batch_size: u32,

    /// Interval between sweeper passes.
    /// Default: 1 hour
    pub sweep_interval: Duration,

    /// Fallback policy for tenants without an override.
    pub default_policy: TenantPolicy,

    /// Per-tenant policy overrides.
    pub tenant_policies: HashMap<String, TenantPolicy>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            platform_timeout: Duration::from_secs(10),
            bulk_batch_size: 50,
            bulk_batch_delay: Duration::from_secs(1),
            sweep_batch_size: 200,
            sweep_interval: Duration::from_secs(3600),
            default_policy: TenantPolicy::default(),
            tenant_policies: HashMap::new(),
        }
    }
}

impl EngineConfig {
    /// Sets the external platform call timeout.
    pub fn platform_timeout(mut self, timeout: Duration) -> Self {
        self.platform_timeout = timeout;
        self
    }

    /// Sets the bulk batch size.
    pub fn bulk_batch_size(mut self, size: usize) -> Self {
        self.bulk_batch_size = size.max(1);
        self
    }

    /// Sets the pause between bulk batches.
    pub fn bulk_batch_delay(mut self, delay: Duration) -> Self {
        self.bulk_batch_delay = delay;
        self
    }

    /// Sets the sweep batch size.
    pub fn sweep_batch_size(mut self, size: u32) -> Self {
        self.sweep_batch_size = size.max(1);
        self
    }

    /// Sets the interval between sweeper passes.
    pub fn sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Sets the fallback policy.
    pub fn default_policy(mut self, policy: TenantPolicy) -> Self {
        self.default_policy = policy;
        self
    }

    /// Registers a tenant-specific policy override.
    pub fn tenant_policy(mut self, tenant_id: impl Into<String>, policy: TenantPolicy) -> Self {
        self.tenant_policies.insert(tenant_id.into(), policy);
        self
    }

    /// Resolves the policy for a tenant: override, then default.
    pub fn policy_for(&self, tenant_id: &str) -> &TenantPolicy {
        self.tenant_policies
            .get(tenant_id)
            .unwrap_or(&self.default_policy)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_resolution() {
        let mut override_policy = TenantPolicy::default();
        override_policy.default_cashback_bps = Some(500);

        let config = EngineConfig::default().tenant_policy("t-1", override_policy);

        assert_eq!(config.policy_for("t-1").default_cashback_bps, Some(500));
        assert_eq!(config.policy_for("t-2").default_cashback_bps, None);
    }

    #[test]
    fn test_batch_size_floor() {
        let config = EngineConfig::default().bulk_batch_size(0).sweep_batch_size(0);
        assert_eq!(config.bulk_batch_size, 1);
        assert_eq!(config.sweep_batch_size, 1);
    }
}
