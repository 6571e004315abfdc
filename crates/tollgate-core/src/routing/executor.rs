//! Failover execution across the planned tier chain.
//!
//! Walks the router's plan tier by tier: reserve funds, pick the tier's
//! best available provider, invoke it once under the tier's timeout, then
//! settle or release. Each tier gets exactly one call; a failure or timeout
//! releases that tier's hold before falling through, so a request is never
//! charged for calls that did not succeed.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tollgate_types::budget::Reservation;
use tollgate_types::error::{ProviderError, RouteError};
use tollgate_types::request::{
    AttemptOutcome, InvokeRequest, RouteRequest, RouteSuccess, TierAttempt, format_attempts,
};
use tollgate_types::tier::{Modality, ProviderConfig, TierConfig};

use crate::budget::accountant::CostAccountant;
use crate::budget::gate::PreflightGate;
use crate::budget::ledger::{BudgetLedger, SpendStore};

use super::box_provider::BoxModelProvider;
use super::estimate::{tier_cost, total_units};
use super::health::HealthMonitor;
use super::registry::ProviderRegistry;
use super::router::TierRouter;

/// Executes requests against the tier chain with budget-gated failover.
pub struct FailoverExecutor<L, S> {
    tiers: Arc<Vec<TierConfig>>,
    router: TierRouter,
    gate: PreflightGate<L>,
    accountant: CostAccountant<L, S>,
    registry: Arc<ProviderRegistry>,
    monitor: Arc<HealthMonitor>,
}

impl<L: BudgetLedger, S: SpendStore> FailoverExecutor<L, S> {
    pub fn new(
        tiers: Arc<Vec<TierConfig>>,
        router: TierRouter,
        gate: PreflightGate<L>,
        accountant: CostAccountant<L, S>,
        registry: Arc<ProviderRegistry>,
        monitor: Arc<HealthMonitor>,
    ) -> Self {
        Self {
            tiers,
            router,
            gate,
            accountant,
            registry,
            monitor,
        }
    }

    /// Route and execute one request.
    ///
    /// Returns the first successful tier's result, or a terminal error
    /// carrying the full attempt trail once every planned tier has been
    /// tried.
    pub async fn execute(&self, request: &RouteRequest) -> Result<RouteSuccess, RouteError> {
        let plan = self.router.plan(request)?;
        let units = total_units(request);
        let mut attempts: Vec<TierAttempt> = Vec::new();

        for &ordinal in &plan.tiers {
            let Some(tier) = self.tiers.iter().find(|t| t.ordinal == ordinal) else {
                continue;
            };

            let estimated = tier_cost(&tier.cost_model, units);
            let decision = self
                .gate
                .check(request.query_id, ordinal, &tier.budget_pool, estimated)
                .await?;

            let Some(reservation) = decision.reservation else {
                attempts.push(TierAttempt {
                    tier: ordinal,
                    outcome: AttemptOutcome::BudgetBlocked {
                        estimated,
                        balance: decision.check.balance_before,
                    },
                });
                continue;
            };

            // One invocation per tier: the highest-priority provider whose
            // circuit admits a call. A failed call is not retried against
            // the tier's remaining providers; the hold goes back and the
            // next tier takes its own reservation.
            let Some((provider_cfg, provider)) = self.pick_provider(tier, request) else {
                self.release_hold(&reservation).await;
                attempts.push(TierAttempt {
                    tier: ordinal,
                    outcome: AttemptOutcome::NoProviderAvailable,
                });
                continue;
            };

            let invoke = InvokeRequest::from_route(request);
            let timeout = Duration::from_millis(tier.max_latency_ms);
            let started = Instant::now();
            let outcome = tokio::time::timeout(timeout, provider.invoke(&invoke)).await;
            let latency_ms = started.elapsed().as_millis() as u64;

            let result = match outcome {
                Ok(result) => result,
                Err(_elapsed) => Err(ProviderError::Timeout(tier.max_latency_ms)),
            };

            match result {
                Ok(response) => {
                    self.monitor
                        .record_outcome(&provider_cfg.id, Ok(()), latency_ms);

                    let actual = response
                        .reported_cost
                        .unwrap_or_else(|| tier_cost(&tier.cost_model, response.units_processed));
                    let reconciliation = self
                        .accountant
                        .settle(&reservation, actual, &provider_cfg.id)
                        .await?;

                    attempts.push(TierAttempt {
                        tier: ordinal,
                        outcome: AttemptOutcome::Succeeded {
                            provider_id: provider_cfg.id.clone(),
                        },
                    });
                    let routing_reason = format!(
                        "{}; {}",
                        plan.reasons.join("; "),
                        format_attempts(&attempts)
                    );
                    tracing::info!(
                        query_id = %request.query_id,
                        tier = ordinal,
                        provider = %provider_cfg.id,
                        cost = %actual,
                        latency_ms,
                        "request served"
                    );
                    return Ok(RouteSuccess {
                        query_id: request.query_id,
                        output: response.output,
                        tier_used: ordinal,
                        provider_id: provider_cfg.id.clone(),
                        cost: actual,
                        budget_remaining: reconciliation.balance_after,
                        routing_reason,
                    });
                }
                Err(error) => {
                    self.monitor
                        .record_outcome(&provider_cfg.id, Err(&error), latency_ms);
                    attempts.push(TierAttempt {
                        tier: ordinal,
                        outcome: AttemptOutcome::ProviderFailed {
                            provider_id: provider_cfg.id.clone(),
                            error: error.to_string(),
                        },
                    });
                    self.release_hold(&reservation).await;
                }
            }
        }

        let all_blocked = !attempts.is_empty()
            && attempts
                .iter()
                .all(|a| matches!(a.outcome, AttemptOutcome::BudgetBlocked { .. }));
        tracing::warn!(
            query_id = %request.query_id,
            trail = %format_attempts(&attempts),
            "all tiers exhausted"
        );
        if all_blocked {
            Err(RouteError::BudgetExhausted { attempts })
        } else {
            Err(RouteError::TiersExhausted { attempts })
        }
    }

    /// The single provider this tier gets to call: highest priority among
    /// those that are registered and whose circuit admits a call.
    fn pick_provider<'t>(
        &'t self,
        tier: &'t TierConfig,
        request: &RouteRequest,
    ) -> Option<(&'t ProviderConfig, &'t BoxModelProvider)> {
        for provider_cfg in self.eligible_providers(tier, request) {
            let Some(provider) = self.registry.get(&provider_cfg.id) else {
                tracing::warn!(
                    provider = %provider_cfg.id,
                    tier = tier.ordinal,
                    "configured provider not registered"
                );
                continue;
            };
            if !self.monitor.try_acquire(&provider_cfg.id).is_usable() {
                tracing::debug!(
                    provider = %provider_cfg.id,
                    tier = tier.ordinal,
                    "provider skipped, circuit open"
                );
                continue;
            }
            return Some((provider_cfg, provider));
        }
        None
    }

    /// Give a tier's hold back to its pool. A failed release is left to the
    /// expiry sweeper rather than aborting the failover.
    async fn release_hold(&self, reservation: &Reservation) {
        if let Err(error) = self.accountant.abandon(reservation).await {
            tracing::warn!(
                reservation_id = %reservation.id,
                %error,
                "release failed, sweeper will reclaim"
            );
        }
    }

    /// Providers in this tier that satisfy the request's constraints, in
    /// priority order.
    fn eligible_providers<'t>(
        &self,
        tier: &'t TierConfig,
        request: &RouteRequest,
    ) -> Vec<&'t ProviderConfig> {
        let need_vision = request.modality == Modality::Vision;
        let need_privacy = request.privacy_mode;
        let mut providers: Vec<&ProviderConfig> = tier
            .providers
            .iter()
            .filter(|p| {
                (!need_vision || p.supports_vision) && (!need_privacy || p.is_privacy_safe)
            })
            .collect();
        providers.sort_by_key(|p| p.priority);
        providers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    use tollgate_types::budget::BudgetPool;
    use tollgate_types::budget::ResetPeriod;
    use tollgate_types::request::InvokeResponse;
    use tollgate_types::tier::CostModel;

    use crate::budget::testing::{TestLedger, TestSpendStore};
    use crate::routing::provider::ModelProvider;

    /// Provider that plays back a scripted sequence of results.
    struct ScriptedProvider {
        id: String,
        script: Mutex<VecDeque<Result<InvokeResponse, ProviderError>>>,
    }

    impl ScriptedProvider {
        fn new(id: &str, script: Vec<Result<InvokeResponse, ProviderError>>) -> Self {
            Self {
                id: id.to_string(),
                script: Mutex::new(script.into()),
            }
        }

        fn always_ok(id: &str, cost: Decimal) -> Self {
            Self::new(id, vec![Ok(ok_response(cost)), Ok(ok_response(cost))])
        }
    }

    impl ModelProvider for ScriptedProvider {
        fn id(&self) -> &str {
            &self.id
        }

        async fn invoke(&self, _request: &InvokeRequest) -> Result<InvokeResponse, ProviderError> {
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(ProviderError::Unavailable("script exhausted".into())))
        }
    }

    /// Provider that never answers within any reasonable timeout.
    struct HangingProvider {
        id: String,
    }

    impl ModelProvider for HangingProvider {
        fn id(&self) -> &str {
            &self.id
        }

        async fn invoke(&self, _request: &InvokeRequest) -> Result<InvokeResponse, ProviderError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(ok_response(dec!(0)))
        }
    }

    fn ok_response(cost: Decimal) -> InvokeResponse {
        InvokeResponse {
            output: "ok".to_string(),
            units_processed: 100,
            reported_cost: Some(cost),
        }
    }

    fn pool(name: &str, balance: Decimal) -> BudgetPool {
        BudgetPool {
            name: name.to_string(),
            monthly_limit: balance.max(dec!(0.01)),
            current_balance: balance,
            reset_period: ResetPeriod::Monthly,
            last_reset_at: chrono::Utc::now(),
            alert_threshold_fraction: 0.9,
        }
    }

    fn provider_cfg(id: &str, priority: u32) -> ProviderConfig {
        ProviderConfig {
            id: id.to_string(),
            priority,
            supports_vision: false,
            is_privacy_safe: false,
        }
    }

    fn tier_cfg(
        ordinal: u32,
        pool: &str,
        cost_per_kilo: Decimal,
        providers: Vec<ProviderConfig>,
    ) -> TierConfig {
        TierConfig {
            ordinal,
            name: format!("tier-{ordinal}"),
            budget_pool: pool.to_string(),
            cost_model: CostModel::PerUnit {
                cost_per_kilo_units: cost_per_kilo,
            },
            providers,
            max_latency_ms: 200,
        }
    }

    struct Harness {
        executor: FailoverExecutor<TestLedger, TestSpendStore>,
        ledger: Arc<TestLedger>,
        monitor: Arc<HealthMonitor>,
    }

    fn harness(
        tiers: Vec<TierConfig>,
        pools: Vec<BudgetPool>,
        providers: Vec<BoxModelProvider>,
    ) -> Harness {
        let tiers = Arc::new(tiers);
        let ledger = Arc::new(TestLedger::new(pools));
        let spend = Arc::new(TestSpendStore::default());
        let monitor = Arc::new(HealthMonitor::new());
        let mut registry = ProviderRegistry::new();
        for provider in providers {
            registry.register(provider);
        }

        let executor = FailoverExecutor::new(
            tiers.clone(),
            TierRouter::new(tiers, 50),
            PreflightGate::new(ledger.clone()),
            CostAccountant::new(ledger.clone(), spend, 0.20, None),
            Arc::new(registry),
            monitor.clone(),
        );
        Harness {
            executor,
            ledger,
            monitor,
        }
    }

    fn request(units: u64) -> RouteRequest {
        let mut req = RouteRequest::text("payload");
        req.estimated_units = Some(units);
        req
    }

    #[tokio::test]
    async fn test_success_on_first_tier_settles_actual_cost() {
        let h = harness(
            vec![tier_cfg(
                1,
                "per_token",
                dec!(0.60),
                vec![provider_cfg("cheap", 0)],
            )],
            vec![pool("per_token", dec!(10.00))],
            vec![BoxModelProvider::new(ScriptedProvider::always_ok(
                "cheap",
                dec!(0.05),
            ))],
        );

        let success = h.executor.execute(&request(1000)).await.unwrap();
        assert_eq!(success.tier_used, 1);
        assert_eq!(success.provider_id, "cheap");
        assert_eq!(success.cost, dec!(0.05));
        // Reserved 0.60, settled at 0.05: balance reflects actual cost only.
        assert_eq!(success.budget_remaining, dec!(9.95));
        assert_eq!(h.ledger.balance("per_token").await.unwrap(), dec!(9.95));
    }

    #[tokio::test]
    async fn test_provider_failure_falls_to_next_tier_without_charge() {
        let h = harness(
            vec![
                tier_cfg(0, "pool_a", dec!(0.10), vec![provider_cfg("flaky", 0)]),
                tier_cfg(1, "pool_b", dec!(0.60), vec![provider_cfg("steady", 0)]),
            ],
            vec![pool("pool_a", dec!(5.00)), pool("pool_b", dec!(5.00))],
            vec![
                BoxModelProvider::new(ScriptedProvider::new(
                    "flaky",
                    vec![Err(ProviderError::Unavailable("connection refused".into()))],
                )),
                BoxModelProvider::new(ScriptedProvider::always_ok("steady", dec!(0.30))),
            ],
        );

        let success = h.executor.execute(&request(500)).await.unwrap();
        assert_eq!(success.tier_used, 1);
        assert_eq!(success.provider_id, "steady");
        // Tier 0's hold was fully released.
        assert_eq!(h.ledger.balance("pool_a").await.unwrap(), dec!(5.00));
        assert_eq!(h.ledger.balance("pool_b").await.unwrap(), dec!(4.70));
        assert!(success.routing_reason.contains("tier 0 failed"));
        assert!(success.routing_reason.contains("tier 1 succeeded via steady"));
    }

    #[tokio::test]
    async fn test_failed_call_advances_to_next_tier_not_next_provider() {
        // Tier 0 has a lower-priority standby that would succeed, but a
        // failed call spends the tier's single attempt: the request must
        // land on tier 1.
        let h = harness(
            vec![
                tier_cfg(
                    0,
                    "pool_a",
                    dec!(0.10),
                    vec![provider_cfg("flaky", 0), provider_cfg("standby", 1)],
                ),
                tier_cfg(1, "pool_b", dec!(0.60), vec![provider_cfg("steady", 0)]),
            ],
            vec![pool("pool_a", dec!(5.00)), pool("pool_b", dec!(5.00))],
            vec![
                BoxModelProvider::new(ScriptedProvider::new(
                    "flaky",
                    vec![Err(ProviderError::Api {
                        status: 500,
                        message: "boom".into(),
                    })],
                )),
                BoxModelProvider::new(ScriptedProvider::always_ok("standby", dec!(0.01))),
                BoxModelProvider::new(ScriptedProvider::always_ok("steady", dec!(0.30))),
            ],
        );

        let success = h.executor.execute(&request(500)).await.unwrap();
        assert_eq!(success.tier_used, 1);
        assert_eq!(success.provider_id, "steady");
        // Tier 0's hold went back in full; standby was never considered.
        assert_eq!(h.ledger.balance("pool_a").await.unwrap(), dec!(5.00));
        assert!(h.monitor.status().iter().all(|s| s.id != "standby"));
        assert!(success.routing_reason.contains("tier 0 failed: provider flaky"));
    }

    #[tokio::test]
    async fn test_blocked_tier_is_skipped_without_charge() {
        // Tier 0 pool cannot cover the estimate; tier 1 can.
        let h = harness(
            vec![
                tier_cfg(0, "pool_a", dec!(1.00), vec![provider_cfg("a", 0)]),
                tier_cfg(1, "pool_b", dec!(1.00), vec![provider_cfg("b", 0)]),
            ],
            vec![pool("pool_a", dec!(0.10)), pool("pool_b", dec!(5.00))],
            vec![
                BoxModelProvider::new(ScriptedProvider::always_ok("a", dec!(0.50))),
                BoxModelProvider::new(ScriptedProvider::always_ok("b", dec!(0.50))),
            ],
        );

        let success = h.executor.execute(&request(500)).await.unwrap();
        assert_eq!(success.tier_used, 1);
        assert_eq!(h.ledger.balance("pool_a").await.unwrap(), dec!(0.10));
        assert!(success.routing_reason.contains("tier 0 blocked"));
    }

    #[tokio::test]
    async fn test_all_tiers_blocked_is_budget_exhausted() {
        let h = harness(
            vec![
                tier_cfg(0, "pool_a", dec!(1.00), vec![provider_cfg("a", 0)]),
                tier_cfg(1, "pool_b", dec!(2.00), vec![provider_cfg("b", 0)]),
            ],
            vec![pool("pool_a", dec!(0.01)), pool("pool_b", dec!(0.01))],
            vec![
                BoxModelProvider::new(ScriptedProvider::always_ok("a", dec!(0.50))),
                BoxModelProvider::new(ScriptedProvider::always_ok("b", dec!(0.50))),
            ],
        );

        let err = h.executor.execute(&request(500)).await.unwrap_err();
        match &err {
            RouteError::BudgetExhausted { attempts } => assert_eq!(attempts.len(), 2),
            other => panic!("expected BudgetExhausted, got: {other}"),
        }
        // Nothing was charged anywhere.
        assert_eq!(h.ledger.balance("pool_a").await.unwrap(), dec!(0.01));
        assert_eq!(h.ledger.balance("pool_b").await.unwrap(), dec!(0.01));
    }

    #[tokio::test]
    async fn test_mixed_failures_are_tiers_exhausted() {
        let h = harness(
            vec![
                tier_cfg(0, "pool_a", dec!(1.00), vec![provider_cfg("a", 0)]),
                tier_cfg(1, "pool_b", dec!(1.00), vec![provider_cfg("b", 0)]),
            ],
            vec![pool("pool_a", dec!(0.01)), pool("pool_b", dec!(5.00))],
            vec![
                BoxModelProvider::new(ScriptedProvider::always_ok("a", dec!(0.50))),
                BoxModelProvider::new(ScriptedProvider::new(
                    "b",
                    vec![Err(ProviderError::Api {
                        status: 500,
                        message: "boom".into(),
                    })],
                )),
            ],
        );

        let err = h.executor.execute(&request(500)).await.unwrap_err();
        assert!(matches!(err, RouteError::TiersExhausted { .. }));
        // The failed tier's hold was released.
        assert_eq!(h.ledger.balance("pool_b").await.unwrap(), dec!(5.00));
    }

    #[tokio::test]
    async fn test_open_circuit_skips_to_next_provider_in_tier() {
        let h = harness(
            vec![tier_cfg(
                0,
                "pool_a",
                dec!(0.10),
                vec![provider_cfg("primary", 0), provider_cfg("backup", 1)],
            )],
            vec![pool("pool_a", dec!(5.00))],
            vec![
                BoxModelProvider::new(ScriptedProvider::always_ok("primary", dec!(0.01))),
                BoxModelProvider::new(ScriptedProvider::always_ok("backup", dec!(0.02))),
            ],
        );

        // Trip primary's breaker.
        let err = ProviderError::Unavailable("down".into());
        for _ in 0..3 {
            h.monitor.record_outcome("primary", Err(&err), 5);
        }

        let success = h.executor.execute(&request(100)).await.unwrap();
        assert_eq!(success.provider_id, "backup");
    }

    #[tokio::test]
    async fn test_no_usable_provider_releases_hold() {
        let h = harness(
            vec![
                tier_cfg(0, "pool_a", dec!(0.10), vec![provider_cfg("only", 0)]),
                tier_cfg(1, "pool_b", dec!(0.60), vec![provider_cfg("steady", 0)]),
            ],
            vec![pool("pool_a", dec!(5.00)), pool("pool_b", dec!(5.00))],
            vec![
                BoxModelProvider::new(ScriptedProvider::always_ok("only", dec!(0.01))),
                BoxModelProvider::new(ScriptedProvider::always_ok("steady", dec!(0.30))),
            ],
        );

        let err = ProviderError::Unavailable("down".into());
        for _ in 0..3 {
            h.monitor.record_outcome("only", Err(&err), 5);
        }

        let success = h.executor.execute(&request(500)).await.unwrap();
        assert_eq!(success.tier_used, 1);
        assert_eq!(h.ledger.balance("pool_a").await.unwrap(), dec!(5.00));
        assert!(success.routing_reason.contains("tier 0 skipped"));
    }

    #[tokio::test]
    async fn test_timeout_counts_as_provider_failure() {
        let h = harness(
            vec![
                tier_cfg(0, "pool_a", dec!(0.10), vec![provider_cfg("slow", 0)]),
                tier_cfg(1, "pool_b", dec!(0.60), vec![provider_cfg("fast", 0)]),
            ],
            vec![pool("pool_a", dec!(5.00)), pool("pool_b", dec!(5.00))],
            vec![
                BoxModelProvider::new(HangingProvider {
                    id: "slow".to_string(),
                }),
                BoxModelProvider::new(ScriptedProvider::always_ok("fast", dec!(0.10))),
            ],
        );

        let success = h.executor.execute(&request(100)).await.unwrap();
        assert_eq!(success.provider_id, "fast");
        assert!(success.routing_reason.contains("timed out"));
        // The timeout was recorded against the circuit breaker.
        let status = h.monitor.status();
        let slow = status.iter().find(|s| s.id == "slow").unwrap();
        assert_eq!(slow.total_failures, 1);
    }

    #[tokio::test]
    async fn test_unreported_cost_falls_back_to_cost_model() {
        let h = harness(
            vec![tier_cfg(
                1,
                "per_token",
                dec!(0.60),
                vec![provider_cfg("cheap", 0)],
            )],
            vec![pool("per_token", dec!(10.00))],
            vec![BoxModelProvider::new(ScriptedProvider::new(
                "cheap",
                vec![Ok(InvokeResponse {
                    output: "ok".to_string(),
                    units_processed: 500,
                    reported_cost: None,
                })],
            ))],
        );

        let success = h.executor.execute(&request(1000)).await.unwrap();
        // 500 processed units at 0.60/kilo.
        assert_eq!(success.cost, dec!(0.30));
    }
}
