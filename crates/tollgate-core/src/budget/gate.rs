//! Pre-flight budget gate.
//!
//! The mandatory check-before-spend step: given a tier's pool and an
//! estimated cost, atomically reserves funds or blocks the request. Every
//! decision is logged as a structured `BudgetCheck`.

use std::sync::Arc;

use rust_decimal::Decimal;
use uuid::Uuid;

use tollgate_types::budget::{BudgetCheck, CheckResult, Reservation, ReserveOutcome};
use tollgate_types::error::LedgerError;

use super::ledger::BudgetLedger;

/// Outcome of a gate decision: the check record plus the hold, if granted.
#[derive(Debug)]
pub struct GateDecision {
    pub check: BudgetCheck,
    pub reservation: Option<Reservation>,
}

impl GateDecision {
    pub fn passed(&self) -> bool {
        self.check.result == CheckResult::Pass
    }
}

/// Reserve-or-block gate in front of the budget ledger.
pub struct PreflightGate<L> {
    ledger: Arc<L>,
}

impl<L: BudgetLedger> PreflightGate<L> {
    pub fn new(ledger: Arc<L>) -> Self {
        Self { ledger }
    }

    /// Try to hold `estimated_cost` from `pool` for one tier attempt.
    ///
    /// A `Block` outcome is not an error: the executor records it and moves
    /// on to the next tier without charge.
    pub async fn check(
        &self,
        query_id: Uuid,
        tier: u32,
        pool: &str,
        estimated_cost: Decimal,
    ) -> Result<GateDecision, LedgerError> {
        let outcome = self.ledger.try_reserve(pool, estimated_cost).await?;

        let decision = match outcome {
            ReserveOutcome::Granted {
                reservation,
                balance_before,
            } => {
                let check = BudgetCheck {
                    query_id,
                    tier_requested: tier,
                    estimated_cost,
                    pool_name: pool.to_string(),
                    balance_before,
                    result: CheckResult::Pass,
                    reservation_id: Some(reservation.id),
                };
                GateDecision {
                    check,
                    reservation: Some(reservation),
                }
            }
            ReserveOutcome::InsufficientFunds { balance } => {
                let check = BudgetCheck {
                    query_id,
                    tier_requested: tier,
                    estimated_cost,
                    pool_name: pool.to_string(),
                    balance_before: balance,
                    result: CheckResult::Block,
                    reservation_id: None,
                };
                GateDecision {
                    check,
                    reservation: None,
                }
            }
        };

        tracing::info!(
            query_id = %decision.check.query_id,
            tier = decision.check.tier_requested,
            pool = %decision.check.pool_name,
            estimated_cost = %decision.check.estimated_cost,
            balance_before = %decision.check.balance_before,
            result = %decision.check.result,
            "budget check"
        );

        Ok(decision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::budget::testing::TestLedger;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_gate_passes_when_funds_available() {
        let ledger = Arc::new(TestLedger::single_pool("per_token", dec!(10.00)));
        let gate = PreflightGate::new(ledger.clone());

        let decision = gate
            .check(Uuid::now_v7(), 1, "per_token", dec!(3.00))
            .await
            .unwrap();

        assert!(decision.passed());
        let reservation = decision.reservation.unwrap();
        assert_eq!(reservation.amount, dec!(3.00));
        assert_eq!(decision.check.balance_before, dec!(10.00));
        assert_eq!(ledger.balance("per_token").await.unwrap(), dec!(7.00));
    }

    #[tokio::test]
    async fn test_balance_before_tracks_consecutive_grants() {
        let ledger = Arc::new(TestLedger::single_pool("per_token", dec!(10.00)));
        let gate = PreflightGate::new(ledger);

        // Each check reports the balance the grant itself decremented,
        // not a re-read that later holds could have moved.
        let first = gate
            .check(Uuid::now_v7(), 1, "per_token", dec!(3.00))
            .await
            .unwrap();
        assert_eq!(first.check.balance_before, dec!(10.00));

        let second = gate
            .check(Uuid::now_v7(), 1, "per_token", dec!(3.00))
            .await
            .unwrap();
        assert_eq!(second.check.balance_before, dec!(7.00));
    }

    #[tokio::test]
    async fn test_gate_blocks_without_charge() {
        let ledger = Arc::new(TestLedger::single_pool("per_token", dec!(0.50)));
        let gate = PreflightGate::new(ledger.clone());

        let decision = gate
            .check(Uuid::now_v7(), 3, "per_token", dec!(3.00))
            .await
            .unwrap();

        assert!(!decision.passed());
        assert!(decision.reservation.is_none());
        assert_eq!(decision.check.balance_before, dec!(0.50));
        // Balance unchanged: no partial reservation.
        assert_eq!(ledger.balance("per_token").await.unwrap(), dec!(0.50));
    }

    #[tokio::test]
    async fn test_gate_unknown_pool_is_an_error() {
        let ledger = Arc::new(TestLedger::single_pool("per_token", dec!(1.00)));
        let gate = PreflightGate::new(ledger);

        let err = gate
            .check(Uuid::now_v7(), 0, "missing", dec!(1.00))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::PoolNotFound(_)));
    }
}
