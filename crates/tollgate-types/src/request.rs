//! Routing request/response types and the per-tier attempt trail.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::tier::Modality;

/// An inference request entering the router.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteRequest {
    pub query_id: Uuid,
    /// Opaque request payload handed to the selected provider.
    pub payload: String,
    pub modality: Modality,
    /// Workload size in units (tokens/bytes) supplied by the caller.
    /// When absent, a character-count heuristic is used.
    pub estimated_units: Option<u64>,
    /// Number of items in the batch (1 for a single request).
    pub batch_size: u32,
    /// Restrict routing to privacy-safe providers only.
    pub privacy_mode: bool,
    /// Explicit tier override; the named tier is tried first.
    pub tier_override: Option<u32>,
}

impl RouteRequest {
    /// A plain single text request with defaults for everything else.
    pub fn text(payload: impl Into<String>) -> Self {
        Self {
            query_id: Uuid::now_v7(),
            payload: payload.into(),
            modality: Modality::Text,
            estimated_units: None,
            batch_size: 1,
            privacy_mode: false,
            tier_override: None,
        }
    }
}

/// Ordered tier chain produced by the router, with the reasons behind it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutePlan {
    /// Tier ordinals in attempt order.
    pub tiers: Vec<u32>,
    /// Human-readable classification decisions, in the order they were made.
    pub reasons: Vec<String>,
}

/// What happened when the executor attempted a single tier.
#[derive(Debug, Clone)]
pub enum AttemptOutcome {
    /// The pre-flight gate rejected the reservation; no charge was made.
    BudgetBlocked { estimated: Decimal, balance: Decimal },
    /// Every provider in the tier had an open circuit or failed constraints.
    NoProviderAvailable,
    /// A provider was invoked and failed; the reservation was released.
    ProviderFailed { provider_id: String, error: String },
    /// The call succeeded.
    Succeeded { provider_id: String },
}

/// One entry in the per-request attempt trail.
#[derive(Debug, Clone)]
pub struct TierAttempt {
    pub tier: u32,
    pub outcome: AttemptOutcome,
}

impl fmt::Display for TierAttempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.outcome {
            AttemptOutcome::BudgetBlocked { estimated, balance } => write!(
                f,
                "tier {} blocked: estimated {} exceeds balance {}",
                self.tier, estimated, balance
            ),
            AttemptOutcome::NoProviderAvailable => {
                write!(f, "tier {} skipped: no provider available", self.tier)
            }
            AttemptOutcome::ProviderFailed { provider_id, error } => write!(
                f,
                "tier {} failed: provider {} ({error})",
                self.tier, provider_id
            ),
            AttemptOutcome::Succeeded { provider_id } => {
                write!(f, "tier {} succeeded via {}", self.tier, provider_id)
            }
        }
    }
}

/// Render an attempt trail as a single human-readable string.
pub fn format_attempts(attempts: &[TierAttempt]) -> String {
    attempts
        .iter()
        .map(|a| a.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Successful routing result returned to the caller.
#[derive(Debug, Clone)]
pub struct RouteSuccess {
    pub query_id: Uuid,
    /// Provider output payload.
    pub output: String,
    pub tier_used: u32,
    pub provider_id: String,
    /// Actual reconciled cost of the call.
    pub cost: Decimal,
    /// Pool balance after reconciliation.
    pub budget_remaining: Decimal,
    /// Why this tier/provider was chosen, including skipped tiers.
    pub routing_reason: String,
}

/// Payload handed to a provider implementation.
#[derive(Debug, Clone)]
pub struct InvokeRequest {
    pub query_id: Uuid,
    pub payload: String,
    pub modality: Modality,
    pub batch_size: u32,
}

impl InvokeRequest {
    pub fn from_route(request: &RouteRequest) -> Self {
        Self {
            query_id: request.query_id,
            payload: request.payload.clone(),
            modality: request.modality,
            batch_size: request.batch_size,
        }
    }
}

/// Result returned by a provider implementation.
#[derive(Debug, Clone)]
pub struct InvokeResponse {
    pub output: String,
    /// Workload units actually processed, used for cost reconciliation.
    pub units_processed: u64,
    /// Provider-reported actual cost, when the backend bills exactly.
    pub reported_cost: Option<Decimal>,
}
