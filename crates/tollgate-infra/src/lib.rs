//! Infrastructure implementations for Tollgate.
//!
//! Implements the ledger and spend-store ports from `tollgate-core` on
//! SQLite (durable, multi-process safe) and on in-process concurrent maps
//! (tests, single-node deployments without persistence), plus TOML
//! configuration loading.

pub mod config;
pub mod memory;
pub mod sqlite;
