//! Reconciliation tolerances
//!
//! Resolved most-specific first: tenant+rail, tenant, global, then the
//! engine's built-in values.

use crate::types::{Rail, TenantId};
use chrono::Duration;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Matching tolerances for one scope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToleranceConfig {
    /// Absolute amount tolerance
    pub amount_tolerance_fixed: Decimal,

    /// Relative amount tolerance, in percent of the expected amount
    pub amount_tolerance_percent: Decimal,

    /// Widening applied to the external fetch window
    pub timing_tolerance_minutes: i64,

    /// Resolve small amount mismatches automatically
    pub auto_resolve_enabled: bool,

    /// Largest absolute difference that may be auto-resolved
    pub auto_resolve_max_amount: Decimal,
}

impl Default for ToleranceConfig {
    fn default() -> Self {
        Self {
            amount_tolerance_fixed: dec!(0.01),
            amount_tolerance_percent: dec!(0.01),
            timing_tolerance_minutes: 60,
            auto_resolve_enabled: false,
            auto_resolve_max_amount: Decimal::ZERO,
        }
    }
}

impl ToleranceConfig {
    /// `max(fixed, |expected| * percent / 100)`
    pub fn amount_tolerance(&self, expected: Decimal) -> Decimal {
        let relative = expected.abs() * self.amount_tolerance_percent / dec!(100);
        self.amount_tolerance_fixed.max(relative)
    }

    /// Timing tolerance as a duration
    pub fn timing_tolerance(&self) -> Duration {
        Duration::minutes(self.timing_tolerance_minutes.max(0))
    }

    /// Whether a mismatch of `difference` qualifies for auto-resolution
    pub fn auto_resolves(&self, difference: Decimal) -> bool {
        self.auto_resolve_enabled && difference.abs() <= self.auto_resolve_max_amount
    }
}

/// Scope a tolerance config applies to
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "scope", rename_all = "snake_case")]
pub enum ConfigScope {
    /// Every tenant and rail
    Global,
    /// Every rail of one tenant
    Tenant {
        /// Tenant
        tenant_id: TenantId,
    },
    /// One rail of one tenant
    TenantRail {
        /// Tenant
        tenant_id: TenantId,
        /// Rail
        rail: Rail,
    },
}

impl ConfigScope {
    /// Scopes to consult for a run, most specific first
    pub fn lookup_chain(tenant_id: Option<&TenantId>, rail: Rail) -> Vec<ConfigScope> {
        let mut chain = Vec::with_capacity(3);
        if let Some(tenant) = tenant_id {
            chain.push(ConfigScope::TenantRail {
                tenant_id: tenant.clone(),
                rail,
            });
            chain.push(ConfigScope::Tenant {
                tenant_id: tenant.clone(),
            });
        }
        chain.push(ConfigScope::Global);
        chain
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_amount_tolerance_takes_larger_bound() {
        let config = ToleranceConfig::default();
        assert_eq!(config.amount_tolerance(dec!(100)), dec!(0.01));
        assert_eq!(config.amount_tolerance(dec!(1000000)), dec!(100));
    }

    #[test]
    fn test_auto_resolve_ceiling() {
        let mut config = ToleranceConfig::default();
        assert!(!config.auto_resolves(dec!(0.02)));
        config.auto_resolve_enabled = true;
        config.auto_resolve_max_amount = dec!(0.05);
        assert!(config.auto_resolves(dec!(-0.05)));
        assert!(!config.auto_resolves(dec!(0.06)));
    }

    #[test]
    fn test_lookup_chain_order() {
        let tenant = TenantId::new("acme");
        let chain = ConfigScope::lookup_chain(Some(&tenant), Rail::Pix);
        assert_eq!(chain.len(), 3);
        assert_eq!(chain[2], ConfigScope::Global);
        assert_eq!(ConfigScope::lookup_chain(None, Rail::Pix), vec![ConfigScope::Global]);
    }
}
