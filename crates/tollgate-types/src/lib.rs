//! Shared domain types for Tollgate.
//!
//! This crate contains the core domain types used across the Tollgate router:
//! budget pools and reservations, tier and provider configuration, routing
//! requests/results, the spend-counter key layout, and their error types.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror
//! and rust_decimal.

pub mod alert;
pub mod budget;
pub mod config;
pub mod error;
pub mod request;
pub mod spend;
pub mod tier;
