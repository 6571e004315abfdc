//! Routing logic and port definitions for Tollgate.
//!
//! This crate defines the "ports" (ledger and spend-store traits) that the
//! infrastructure layer implements, plus the pure routing machinery: tier
//! classification, circuit breaking, failover execution, cost accounting
//! and alert dispatch. It depends only on `tollgate-types` -- never on
//! `tollgate-infra` or any database/IO crate.

pub mod budget;
pub mod routing;
