//! Router configuration structs.
//!
//! Deserialized from `tollgate.toml` by the infra layer and validated at
//! load time so an invalid or incomplete tier chain fails at startup, not
//! at request time.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::budget::ResetPeriod;
use crate::tier::TierConfig;

/// Budget pool definition as it appears in configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    pub name: String,
    pub monthly_limit: Decimal,
    pub reset_period: ResetPeriod,
    #[serde(default = "default_alert_threshold")]
    pub alert_threshold_fraction: f64,
}

fn default_alert_threshold() -> f64 {
    0.9
}

/// Top-level router configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    pub pools: Vec<PoolConfig>,
    pub tiers: Vec<TierConfig>,

    /// Batch size at or above which the amortized-cost comparison runs.
    #[serde(default = "default_batch_threshold")]
    pub batch_threshold: u32,

    /// Reservations older than this with no reconciliation are auto-expired.
    #[serde(default = "default_reservation_ttl_secs")]
    pub reservation_ttl_secs: u64,

    /// Warn when actual cost exceeds the reservation by more than this
    /// fraction (estimation-accuracy signal).
    #[serde(default = "default_overage_slack")]
    pub overage_slack: f64,

    /// Consumed-fraction thresholds that fire alerts, in addition to each
    /// pool's own `alert_threshold_fraction`.
    #[serde(default)]
    pub alert_thresholds: Vec<f64>,
}

fn default_batch_threshold() -> u32 {
    50
}

fn default_reservation_ttl_secs() -> u64 {
    120
}

fn default_overage_slack() -> f64 {
    0.20
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_parse_full_config() {
        let config: RouterConfig = toml::from_str(
            r#"
batch_threshold = 50
reservation_ttl_secs = 120
overage_slack = 0.2
alert_thresholds = [0.5, 0.9]

[[pools]]
name = "local_vps"
monthly_limit = "40.00"
reset_period = "monthly"

[[pools]]
name = "per_token"
monthly_limit = "25.00"
reset_period = "monthly"
alert_threshold_fraction = 0.8

[[tiers]]
ordinal = 0
name = "local"
budget_pool = "local_vps"
max_latency_ms = 30000
cost_model = { kind = "free" }

[[tiers.providers]]
id = "ollama-local"
priority = 0
is_privacy_safe = true

[[tiers]]
ordinal = 1
name = "per_token"
budget_pool = "per_token"
max_latency_ms = 20000
cost_model = { kind = "per_unit", cost_per_kilo_units = "0.60" }

[[tiers.providers]]
id = "openrouter-haiku"
priority = 0
supports_vision = true
"#,
        )
        .unwrap();

        assert_eq!(config.pools.len(), 2);
        assert_eq!(config.pools[0].alert_threshold_fraction, 0.9);
        assert_eq!(config.pools[1].alert_threshold_fraction, 0.8);
        assert_eq!(config.pools[1].monthly_limit, dec!(25.00));
        assert_eq!(config.tiers.len(), 2);
        assert_eq!(config.tiers[1].providers[0].id, "openrouter-haiku");
        assert!(config.tiers[1].providers[0].supports_vision);
        assert_eq!(config.alert_thresholds, vec![0.5, 0.9]);
    }

    #[test]
    fn test_defaults_applied() {
        let config: RouterConfig = toml::from_str(
            r#"
[[pools]]
name = "p"
monthly_limit = "1.00"
reset_period = "daily"

[[tiers]]
ordinal = 0
name = "t"
budget_pool = "p"
max_latency_ms = 1000
cost_model = { kind = "free" }

[[tiers.providers]]
id = "x"
priority = 0
"#,
        )
        .unwrap();

        assert_eq!(config.batch_threshold, 50);
        assert_eq!(config.reservation_ttl_secs, 120);
        assert!((config.overage_slack - 0.20).abs() < 1e-9);
        assert!(config.alert_thresholds.is_empty());
    }
}
