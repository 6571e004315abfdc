//! SQLite-backed ledger, spend store and audit log.
//!
//! Monetary values are persisted as integer micro-units (1 currency unit =
//! 1,000,000) so balance arithmetic inside SQL statements stays exact.

pub mod audit;
pub mod ledger;
mod money;
pub mod pool;
pub mod spend;

pub use audit::SqliteAuditLog;
pub use ledger::SqliteBudgetLedger;
pub use pool::DatabasePool;
pub use spend::SqliteSpendStore;
