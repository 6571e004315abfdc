//! Span attribute constants for routing and budget instrumentation.
//!
//! Consistent field names for `tracing::span!` / `tracing::info_span!`
//! across the codebase, so every budget check, tier attempt and settlement
//! can be correlated by query id in trace output.
//!
//! Span naming convention: `"{operation} tier:{ordinal}"` (e.g.,
//! `"route tier:1"`)

// --- Request attributes ---

/// Unique id of the routed query.
pub const ROUTE_QUERY_ID: &str = "route.query_id";

/// Request modality ("text", "vision").
pub const ROUTE_MODALITY: &str = "route.modality";

/// Number of items in the batch.
pub const ROUTE_BATCH_SIZE: &str = "route.batch_size";

/// Whether privacy mode restricted provider selection.
pub const ROUTE_PRIVACY_MODE: &str = "route.privacy_mode";

// --- Tier attempt attributes ---

/// Ordinal of the tier being attempted.
pub const ROUTE_TIER: &str = "route.tier";

/// Provider id serving the attempt.
pub const ROUTE_PROVIDER_ID: &str = "route.provider_id";

/// Wall-clock latency of the provider call in milliseconds.
pub const ROUTE_LATENCY_MS: &str = "route.latency_ms";

// --- Budget attributes ---

/// Budget pool charged for the attempt.
pub const BUDGET_POOL: &str = "budget.pool";

/// Estimated cost reserved before the call.
pub const BUDGET_ESTIMATED_COST: &str = "budget.estimated_cost";

/// Actual reconciled cost after the call.
pub const BUDGET_ACTUAL_COST: &str = "budget.actual_cost";

/// Pool balance after settlement.
pub const BUDGET_BALANCE_AFTER: &str = "budget.balance_after";

/// Gate decision ("PASS", "BLOCK").
pub const BUDGET_CHECK_RESULT: &str = "budget.check_result";

// --- Operation name values ---

/// Full route-and-execute operation.
pub const OP_ROUTE: &str = "route";

/// Pre-flight budget gate check.
pub const OP_BUDGET_CHECK: &str = "budget_check";

/// Post-call reconciliation.
pub const OP_SETTLE: &str = "settle";

/// Background reset/expiry sweep.
pub const OP_SWEEP: &str = "sweep";
