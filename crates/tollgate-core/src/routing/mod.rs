//! Request routing: tier classification, provider abstraction, circuit
//! breaking and failover execution.
//!
//! - `ModelProvider`: RPITIT trait for concrete provider implementations
//! - `BoxModelProvider`: object-safe wrapper for dynamic dispatch
//! - `TierRouter`: deterministic tier classification and ordering
//! - `HealthMonitor`: per-provider circuit breaker shared across workers
//! - `FailoverExecutor`: sequential tier attempts with budget gating

pub mod box_provider;
pub mod estimate;
pub mod executor;
pub mod health;
pub mod provider;
pub mod registry;
pub mod router;
