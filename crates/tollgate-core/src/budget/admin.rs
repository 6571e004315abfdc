//! Administrative budget operations.
//!
//! Limit changes go through the ledger and are mirrored to the external
//! `budget:{pool}:{period}:limit` key so out-of-process consumers see the
//! same figure the router enforces.

use std::sync::Arc;

use rust_decimal::Decimal;

use tollgate_types::budget::BudgetPool;
use tollgate_types::error::LedgerError;
use tollgate_types::spend::limit_key;

use super::ledger::{BudgetLedger, SpendStore};

/// Administrative surface over the ledger and spend store.
pub struct BudgetAdmin<L, S> {
    ledger: Arc<L>,
    spend: Arc<S>,
}

impl<L: BudgetLedger, S: SpendStore> BudgetAdmin<L, S> {
    pub fn new(ledger: Arc<L>, spend: Arc<S>) -> Self {
        Self { ledger, spend }
    }

    /// Change a pool's limit and mirror it to the external limit key.
    ///
    /// The mirror write is advisory; a failure there is logged and the
    /// ledger remains the source of truth.
    pub async fn set_limit(&self, pool: &str, limit: Decimal) -> Result<BudgetPool, LedgerError> {
        let updated = self.ledger.set_limit(pool, limit).await?;
        tracing::info!(
            pool = %updated.name,
            limit = %updated.monthly_limit,
            balance = %updated.current_balance,
            "pool limit updated"
        );

        let key = limit_key(&updated.name, updated.reset_period);
        if let Err(error) = self.spend.set(&key, limit).await {
            tracing::warn!(key = %key, %error, "limit mirror write failed");
        }
        Ok(updated)
    }
}
