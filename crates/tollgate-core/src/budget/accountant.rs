//! Post-call settlement and background budget reclamation.
//!
//! [`CostAccountant`] settles each reservation against the provider's actual
//! cost, records per-pool and per-provider spend counters, and hands the
//! pool to the alert dispatcher. [`ExpirySweeper`] is the background loop
//! that resets elapsed pools and reclaims holds leaked by crashed workers.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;
use tokio_util::sync::CancellationToken;

use tollgate_types::budget::{Reconciliation, Reservation};
use tollgate_types::error::LedgerError;
use tollgate_types::spend::{EntityKind, cost_key};

use super::alert::AlertDispatcher;
use super::ledger::{BudgetLedger, SpendStore};

/// Settles reservations and keeps spend counters current.
pub struct CostAccountant<L, S> {
    ledger: Arc<L>,
    spend: Arc<S>,
    /// Fraction by which actual cost may exceed the reservation before the
    /// settlement is flagged as an estimation miss.
    overage_slack: f64,
    alerts: Option<Arc<AlertDispatcher<L, S>>>,
}

impl<L: BudgetLedger, S: SpendStore> CostAccountant<L, S> {
    pub fn new(
        ledger: Arc<L>,
        spend: Arc<S>,
        overage_slack: f64,
        alerts: Option<Arc<AlertDispatcher<L, S>>>,
    ) -> Self {
        Self {
            ledger,
            spend,
            overage_slack,
            alerts,
        }
    }

    /// Settle a reservation against the actual cost of a completed call.
    ///
    /// Refund or extra debit happens atomically in the ledger; spend
    /// counters and alert evaluation follow. Counter updates are advisory
    /// and must not fail the settlement, so their errors are logged, not
    /// propagated.
    pub async fn settle(
        &self,
        reservation: &Reservation,
        actual: Decimal,
        provider_id: &str,
    ) -> Result<Reconciliation, LedgerError> {
        let reconciliation = self.ledger.reconcile(&reservation.id, actual).await?;

        let slack = Decimal::from_f64(self.overage_slack).unwrap_or(Decimal::ZERO);
        let tolerated = reconciliation.reserved * (Decimal::ONE + slack);
        if actual > tolerated {
            tracing::warn!(
                reservation_id = %reservation.id,
                pool = %reconciliation.pool_name,
                reserved = %reconciliation.reserved,
                actual = %actual,
                "actual cost exceeded estimate beyond slack"
            );
        }
        if reconciliation.overage_accepted > Decimal::ZERO {
            tracing::warn!(
                reservation_id = %reservation.id,
                pool = %reconciliation.pool_name,
                overage = %reconciliation.overage_accepted,
                "overage accepted at balance floor"
            );
        }

        tracing::info!(
            reservation_id = %reservation.id,
            pool = %reconciliation.pool_name,
            provider = provider_id,
            reserved = %reconciliation.reserved,
            actual = %actual,
            refunded = %reconciliation.refunded,
            extra_debited = %reconciliation.extra_debited,
            balance_after = %reconciliation.balance_after,
            "reservation settled"
        );

        self.record_spend(&reconciliation.pool_name, provider_id, actual)
            .await;

        if let Some(alerts) = &self.alerts
            && let Err(error) = alerts.evaluate(&reconciliation.pool_name).await
        {
            tracing::warn!(pool = %reconciliation.pool_name, %error, "alert evaluation failed");
        }

        Ok(reconciliation)
    }

    /// Release a reservation whose call never executed. The full hold goes
    /// back to the pool and no spend is recorded.
    pub async fn abandon(&self, reservation: &Reservation) -> Result<(), LedgerError> {
        self.ledger.release(&reservation.id).await?;
        tracing::info!(
            reservation_id = %reservation.id,
            pool = %reservation.pool_name,
            amount = %reservation.amount,
            "reservation released without charge"
        );
        Ok(())
    }

    async fn record_spend(&self, pool_name: &str, provider_id: &str, actual: Decimal) {
        let period = match self.ledger.pool(pool_name).await {
            Ok(pool) => pool.reset_period,
            Err(error) => {
                tracing::warn!(pool = pool_name, %error, "spend counter skipped, pool lookup failed");
                return;
            }
        };
        let ttl = Some(period.duration());

        let pool_key = cost_key(period, EntityKind::Pool, pool_name);
        if let Err(error) = self.spend.incr(&pool_key, actual, ttl).await {
            tracing::warn!(key = %pool_key, %error, "spend counter update failed");
        }
        let provider_key = cost_key(period, EntityKind::Provider, provider_id);
        if let Err(error) = self.spend.incr(&provider_key, actual, ttl).await {
            tracing::warn!(key = %provider_key, %error, "spend counter update failed");
        }
    }
}

/// Background loop: periodic pool resets and stale-reservation expiry.
pub struct ExpirySweeper<L> {
    ledger: Arc<L>,
    reservation_ttl: Duration,
    interval: Duration,
}

impl<L: BudgetLedger> ExpirySweeper<L> {
    pub fn new(ledger: Arc<L>, reservation_ttl: Duration, interval: Duration) -> Self {
        Self {
            ledger,
            reservation_ttl,
            interval,
        }
    }

    /// Run until the token is cancelled. Sweep failures are logged and the
    /// loop keeps going; a transient storage error must not kill reclamation.
    pub async fn run(self, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("expiry sweeper stopped");
                    return;
                }
                _ = ticker.tick() => {
                    if let Err(error) = self.sweep_once().await {
                        tracing::warn!(%error, "budget sweep failed");
                    }
                }
            }
        }
    }

    /// One sweep: reset elapsed pools, then expire stale holds.
    pub async fn sweep_once(&self) -> Result<(), LedgerError> {
        let reset = self.ledger.reset_due_pools(Utc::now()).await?;
        for pool in &reset {
            tracing::info!(pool = %pool, "budget pool reset to full limit");
        }

        let expired = self.ledger.expire_stale(self.reservation_ttl).await?;
        for reservation in &expired {
            tracing::warn!(
                reservation_id = %reservation.id,
                pool = %reservation.pool_name,
                amount = %reservation.amount,
                age_secs = (Utc::now() - reservation.created_at).num_seconds(),
                "stale reservation expired, hold refunded"
            );
        }
        Ok(())
    }
}
