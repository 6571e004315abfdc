//! In-process ledger and spend store on concurrent maps.
//!
//! Same port contracts as the SQLite implementations, without persistence.
//! Suitable for tests and single-node deployments that can afford to lose
//! budget state on restart.

pub mod ledger;
pub mod spend;

pub use ledger::MemoryBudgetLedger;
pub use spend::MemorySpendStore;
