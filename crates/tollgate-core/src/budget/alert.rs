//! Threshold alert dispatch.
//!
//! Evaluates a pool's consumed fraction against its alert thresholds after
//! each settlement. De-duplication rides on the spend store: an
//! `alert:{period}:{pool}:{threshold}` flag claimed with set-if-absent and a
//! period-length TTL guarantees at most one alert per threshold per period,
//! even with concurrent settlements.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc;

use tollgate_types::alert::BudgetAlert;
use tollgate_types::error::LedgerError;
use tollgate_types::spend::alert_key;

use super::ledger::{BudgetLedger, SpendStore};

/// Evaluates alert thresholds and emits [`BudgetAlert`] events.
pub struct AlertDispatcher<L, S> {
    ledger: Arc<L>,
    spend: Arc<S>,
    /// Global thresholds checked for every pool, in addition to the pool's
    /// own `alert_threshold_fraction`.
    extra_thresholds: Vec<f64>,
    tx: mpsc::Sender<BudgetAlert>,
}

impl<L: BudgetLedger, S: SpendStore> AlertDispatcher<L, S> {
    pub fn new(
        ledger: Arc<L>,
        spend: Arc<S>,
        extra_thresholds: Vec<f64>,
        tx: mpsc::Sender<BudgetAlert>,
    ) -> Self {
        Self {
            ledger,
            spend,
            extra_thresholds,
            tx,
        }
    }

    /// Check one pool against all applicable thresholds, firing an alert for
    /// each newly-crossed one. Returns the alerts that fired.
    pub async fn evaluate(&self, pool_name: &str) -> Result<Vec<BudgetAlert>, LedgerError> {
        let pool = self.ledger.pool(pool_name).await?;
        let consumed = pool.consumed_fraction();

        let mut thresholds: Vec<f64> = self
            .extra_thresholds
            .iter()
            .copied()
            .chain(std::iter::once(pool.alert_threshold_fraction))
            .filter(|t| t.is_finite() && *t > 0.0)
            .collect();
        thresholds.sort_by(|a, b| a.total_cmp(b));
        thresholds.dedup();

        let mut fired = Vec::new();
        for threshold in thresholds {
            if consumed < threshold {
                continue;
            }
            let key = alert_key(pool.reset_period, &pool.name, threshold);
            let claimed = self
                .spend
                .set_if_absent(&key, Some(pool.reset_period.duration()))
                .await?;
            if !claimed {
                continue;
            }

            let alert = BudgetAlert {
                pool: pool.name.clone(),
                balance: pool.current_balance,
                limit: pool.monthly_limit,
                percentage: consumed,
                threshold,
                at: Utc::now(),
            };
            tracing::warn!(
                pool = %alert.pool,
                balance = %alert.balance,
                limit = %alert.limit,
                consumed = alert.percentage,
                threshold = alert.threshold,
                "budget threshold crossed"
            );
            // A closed channel means nobody is listening; the event is
            // already logged, so dropping it is acceptable.
            if self.tx.send(alert.clone()).await.is_err() {
                tracing::warn!(pool = %alert.pool, "alert channel closed, event dropped");
            }
            fired.push(alert);
        }
        Ok(fired)
    }
}
