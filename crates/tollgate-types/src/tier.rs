//! Tier and provider configuration types.
//!
//! A tier is an ordered cost/quality class of backend providers. Tier
//! configuration is immutable after load; only the ledger and circuit
//! breaker state mutate at runtime.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Pricing function for a tier, mapping workload units to estimated cost.
///
/// Closed set of pricing shapes, validated at load time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CostModel {
    /// No charge (e.g. a free local tier).
    Free,
    /// Linear per-unit pricing, quoted per 1,000 workload units.
    PerUnit { cost_per_kilo_units: Decimal },
    /// Bulk/rental pricing amortized over throughput (e.g. GPU-hour rental).
    Amortized {
        rate_per_hour: Decimal,
        units_per_hour: u64,
    },
}

/// A single backend provider within a tier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Unique provider id (e.g. "ollama-local", "openrouter-haiku").
    pub id: String,
    /// Selection order within the tier (lower = tried first).
    pub priority: u32,
    /// Whether this provider can handle image/vision requests.
    #[serde(default)]
    pub supports_vision: bool,
    /// Whether requests may be routed here under privacy mode.
    #[serde(default)]
    pub is_privacy_safe: bool,
}

/// One cost/latency/quality class of providers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierConfig {
    /// Position in the fallback chain (0 = cheapest/fastest).
    pub ordinal: u32,
    /// Human-readable tier name (e.g. "local", "per_token", "premium").
    pub name: String,
    /// Budget pool charged for calls through this tier.
    pub budget_pool: String,
    /// Pricing function for cost estimation and reconciliation.
    pub cost_model: CostModel,
    /// Providers in this tier, tried in priority order.
    pub providers: Vec<ProviderConfig>,
    /// Per-call timeout in milliseconds.
    pub max_latency_ms: u64,
}

impl TierConfig {
    /// Whether any provider in this tier satisfies the given constraints.
    pub fn has_eligible_provider(&self, need_vision: bool, need_privacy: bool) -> bool {
        self.providers.iter().any(|p| {
            (!need_vision || p.supports_vision) && (!need_privacy || p.is_privacy_safe)
        })
    }
}

/// Request modality, used to filter tiers whose providers cannot serve it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Modality {
    Text,
    Vision,
}

impl fmt::Display for Modality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Modality::Text => write!(f, "text"),
            Modality::Vision => write!(f, "vision"),
        }
    }
}

impl FromStr for Modality {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(Modality::Text),
            "vision" => Ok(Modality::Vision),
            other => Err(format!("invalid modality: '{other}'")),
        }
    }
}

/// Snapshot of a provider's circuit breaker state for operational surfaces.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderStatus {
    pub id: String,
    pub circuit_state: String,
    pub last_error: Option<String>,
    pub last_latency_ms: Option<u64>,
    pub total_calls: u64,
    pub total_failures: u64,
}
