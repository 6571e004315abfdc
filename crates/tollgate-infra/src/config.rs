//! TOML configuration loading and validation.
//!
//! Loads `tollgate.toml` into a [`RouterConfig`] and validates the tier
//! chain before anything touches the ledger. An invalid chain (dangling
//! pool reference, duplicate ordinal, empty tier) fails startup with a
//! specific message instead of surfacing mid-request.

use std::path::Path;

use tollgate_types::config::RouterConfig;
use tollgate_types::error::ConfigError;
use tollgate_types::tier::CostModel;

/// Load and validate a router configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<RouterConfig, ConfigError> {
    let raw = std::fs::read_to_string(path)?;
    let config: RouterConfig =
        toml::from_str(&raw).map_err(|e| ConfigError::Parse(e.to_string()))?;
    validate(&config)?;
    tracing::info!(
        path = %path.display(),
        pools = config.pools.len(),
        tiers = config.tiers.len(),
        "configuration loaded"
    );
    Ok(config)
}

/// Structural validation of a parsed configuration.
pub fn validate(config: &RouterConfig) -> Result<(), ConfigError> {
    if config.pools.is_empty() {
        return Err(ConfigError::Invalid("at least one pool required".into()));
    }
    if config.tiers.is_empty() {
        return Err(ConfigError::Invalid("at least one tier required".into()));
    }

    let mut pool_names = std::collections::HashSet::new();
    for pool in &config.pools {
        if !pool_names.insert(pool.name.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "duplicate pool name: '{}'",
                pool.name
            )));
        }
        if pool.monthly_limit.is_sign_negative() {
            return Err(ConfigError::Invalid(format!(
                "pool '{}' has a negative limit",
                pool.name
            )));
        }
        if !(0.0..=1.0).contains(&pool.alert_threshold_fraction) {
            return Err(ConfigError::Invalid(format!(
                "pool '{}' alert threshold must be within 0..=1",
                pool.name
            )));
        }
    }

    let mut ordinals = std::collections::HashSet::new();
    let mut provider_ids = std::collections::HashSet::new();
    for tier in &config.tiers {
        if !ordinals.insert(tier.ordinal) {
            return Err(ConfigError::Invalid(format!(
                "duplicate tier ordinal: {}",
                tier.ordinal
            )));
        }
        if !pool_names.contains(tier.budget_pool.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "tier '{}' references unknown pool '{}'",
                tier.name, tier.budget_pool
            )));
        }
        if tier.providers.is_empty() {
            return Err(ConfigError::Invalid(format!(
                "tier '{}' has no providers",
                tier.name
            )));
        }
        for provider in &tier.providers {
            if !provider_ids.insert(provider.id.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate provider id: '{}'",
                    provider.id
                )));
            }
        }
        if let CostModel::Amortized { units_per_hour, .. } = &tier.cost_model
            && *units_per_hour == 0
        {
            return Err(ConfigError::Invalid(format!(
                "tier '{}' amortized cost model needs units_per_hour > 0",
                tier.name
            )));
        }
        if tier.max_latency_ms == 0 {
            return Err(ConfigError::Invalid(format!(
                "tier '{}' max_latency_ms must be positive",
                tier.name
            )));
        }
    }

    for threshold in &config.alert_thresholds {
        if !(0.0..=1.0).contains(threshold) {
            return Err(ConfigError::Invalid(format!(
                "alert threshold {threshold} must be within 0..=1"
            )));
        }
    }

    Ok(())
}
