//! Tier classification and fallback ordering.
//!
//! Produces a deterministic, auditable tier chain for each request: privacy
//! and modality filters first, then the batch amortized-cost comparison,
//! then ascending ordinal (cheapest first). No hidden randomness.

use std::sync::Arc;

use rust_decimal::Decimal;

use tollgate_types::error::RouteError;
use tollgate_types::request::{RoutePlan, RouteRequest};
use tollgate_types::tier::{CostModel, Modality, TierConfig};

use super::estimate::{tier_cost, total_units};

/// Classifies requests into an ordered tier chain.
pub struct TierRouter {
    tiers: Arc<Vec<TierConfig>>,
    batch_threshold: u32,
}

impl TierRouter {
    pub fn new(tiers: Arc<Vec<TierConfig>>, batch_threshold: u32) -> Self {
        Self {
            tiers,
            batch_threshold,
        }
    }

    fn tier(&self, ordinal: u32) -> Option<&TierConfig> {
        self.tiers.iter().find(|t| t.ordinal == ordinal)
    }

    /// Classify a request and produce the ordered tier chain.
    ///
    /// Never returns an empty plan: a request with no eligible tier is an
    /// explicit [`RouteError::NoEligibleTier`], not a silent downgrade.
    pub fn plan(&self, request: &RouteRequest) -> Result<RoutePlan, RouteError> {
        let need_vision = request.modality == Modality::Vision;
        let need_privacy = request.privacy_mode;
        let mut reasons = Vec::new();

        let mut eligible: Vec<&TierConfig> = self
            .tiers
            .iter()
            .filter(|t| t.has_eligible_provider(need_vision, need_privacy))
            .collect();
        eligible.sort_by_key(|t| t.ordinal);

        let excluded: Vec<u32> = self
            .tiers
            .iter()
            .filter(|t| !t.has_eligible_provider(need_vision, need_privacy))
            .map(|t| t.ordinal)
            .collect();
        if !excluded.is_empty() && (need_vision || need_privacy) {
            let mut constraints = Vec::new();
            if need_privacy {
                constraints.push("privacy mode");
            }
            if need_vision {
                constraints.push("vision modality");
            }
            reasons.push(format!(
                "{}: excluded tiers {:?}",
                constraints.join(" + "),
                excluded
            ));
        }

        if eligible.is_empty() {
            let reason = format!(
                "no tier has a provider satisfying privacy={need_privacy} modality={}",
                request.modality
            );
            tracing::warn!(query_id = %request.query_id, %reason, "no eligible tier");
            return Err(RouteError::NoEligibleTier { reason });
        }

        let mut ordered: Vec<u32> = eligible.iter().map(|t| t.ordinal).collect();

        if let Some(override_tier) = request.tier_override {
            let Some(pos) = ordered.iter().position(|&t| t == override_tier) else {
                return Err(RouteError::NoEligibleTier {
                    reason: format!(
                        "manual override tier {override_tier} is not eligible for this request"
                    ),
                });
            };
            ordered.remove(pos);
            ordered.insert(0, override_tier);
            reasons.push(format!("manual override: tier {override_tier} first"));
        } else if request.batch_size >= self.batch_threshold {
            self.apply_batch_preference(request, &mut ordered, &mut reasons);
        }

        reasons.push(format!("fallback chain: {ordered:?}"));
        Ok(RoutePlan {
            tiers: ordered,
            reasons,
        })
    }

    /// Prefer a bulk-priced tier for large batches, but only when its
    /// amortized cost beats per-unit pricing. Both costs are computed and
    /// logged explicitly so the decision is auditable.
    fn apply_batch_preference(
        &self,
        request: &RouteRequest,
        ordered: &mut Vec<u32>,
        reasons: &mut Vec<String>,
    ) {
        let units = total_units(request);

        let amortized_best: Option<(u32, Decimal)> = ordered
            .iter()
            .filter_map(|&ord| self.tier(ord))
            .filter(|t| matches!(t.cost_model, CostModel::Amortized { .. }))
            .map(|t| (t.ordinal, tier_cost(&t.cost_model, units)))
            .min_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));

        let per_unit_best: Option<(u32, Decimal)> = ordered
            .iter()
            .filter_map(|&ord| self.tier(ord))
            .filter(|t| !matches!(t.cost_model, CostModel::Amortized { .. }))
            .map(|t| (t.ordinal, tier_cost(&t.cost_model, units)))
            .min_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));

        let (Some((bulk_tier, bulk_cost)), Some((unit_tier, unit_cost))) =
            (amortized_best, per_unit_best)
        else {
            return;
        };

        tracing::info!(
            query_id = %request.query_id,
            batch_size = request.batch_size,
            bulk_tier,
            bulk_cost = %bulk_cost,
            unit_tier,
            unit_cost = %unit_cost,
            "batch cost comparison"
        );

        if bulk_cost < unit_cost {
            let savings = unit_cost - bulk_cost;
            ordered.retain(|&t| t != bulk_tier);
            ordered.insert(0, bulk_tier);
            reasons.push(format!(
                "batch of {}: amortized tier {bulk_tier} ({bulk_cost}) beats \
                 per-unit tier {unit_tier} ({unit_cost}), saving {savings}",
                request.batch_size
            ));
        } else {
            reasons.push(format!(
                "batch of {}: per-unit tier {unit_tier} ({unit_cost}) stays ahead \
                 of amortized tier {bulk_tier} ({bulk_cost})",
                request.batch_size
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use tollgate_types::tier::ProviderConfig;

    fn provider(id: &str, vision: bool, privacy: bool) -> ProviderConfig {
        ProviderConfig {
            id: id.to_string(),
            priority: 0,
            supports_vision: vision,
            is_privacy_safe: privacy,
        }
    }

    fn tier(ordinal: u32, model: CostModel, providers: Vec<ProviderConfig>) -> TierConfig {
        TierConfig {
            ordinal,
            name: format!("tier-{ordinal}"),
            budget_pool: "pool".to_string(),
            cost_model: model,
            providers,
            max_latency_ms: 10_000,
        }
    }

    fn five_tier_router() -> TierRouter {
        // Tier 0/2 privacy-safe, tier 1 vision-capable, tier 4 bulk-priced.
        let tiers = vec![
            tier(0, CostModel::Free, vec![provider("local", false, true)]),
            tier(
                1,
                CostModel::PerUnit {
                    cost_per_kilo_units: dec!(0.60),
                },
                vec![provider("cheap-hosted", true, false)],
            ),
            tier(
                2,
                CostModel::PerUnit {
                    cost_per_kilo_units: dec!(1.20),
                },
                vec![provider("eu-hosted", false, true)],
            ),
            tier(
                3,
                CostModel::PerUnit {
                    cost_per_kilo_units: dec!(6.00),
                },
                vec![provider("premium", true, false)],
            ),
            tier(
                4,
                CostModel::Amortized {
                    rate_per_hour: dec!(0.34),
                    units_per_hour: 1_000,
                },
                vec![provider("gpu-rental", false, false)],
            ),
        ];
        TierRouter::new(Arc::new(tiers), 50)
    }

    #[test]
    fn test_default_order_is_ascending_ordinal() {
        let router = five_tier_router();
        let plan = router.plan(&RouteRequest::text("hello")).unwrap();
        assert_eq!(plan.tiers, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_plan_is_deterministic() {
        let router = five_tier_router();
        let req = RouteRequest::text("hello");
        let a = router.plan(&req).unwrap();
        let b = router.plan(&req).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_privacy_mode_excludes_unsafe_tiers() {
        let router = five_tier_router();
        let mut req = RouteRequest::text("sensitive");
        req.privacy_mode = true;

        let plan = router.plan(&req).unwrap();
        // Only tiers 0 and 2 carry privacy-safe providers, even though
        // tiers 1/3/4 may be cheaper or faster.
        assert_eq!(plan.tiers, vec![0, 2]);
        assert!(plan.reasons.iter().any(|r| r.contains("privacy mode")));
    }

    #[test]
    fn test_vision_excludes_text_only_tiers() {
        let router = five_tier_router();
        let mut req = RouteRequest::text("describe this image");
        req.modality = Modality::Vision;

        let plan = router.plan(&req).unwrap();
        assert_eq!(plan.tiers, vec![1, 3]);
    }

    #[test]
    fn test_privacy_plus_vision_with_no_match_is_explicit_error() {
        let router = five_tier_router();
        let mut req = RouteRequest::text("sensitive image");
        req.modality = Modality::Vision;
        req.privacy_mode = true;

        let err = router.plan(&req).unwrap_err();
        assert!(matches!(err, RouteError::NoEligibleTier { .. }));
    }

    #[test]
    fn test_large_batch_prefers_cheaper_amortized_tier() {
        // Per-unit tier 1: 500 units at 0.60/k = 0.30 total.
        // Amortized tier 4: 500 units at 0.34/hr over 1000 units/hr = 0.17.
        let tiers = vec![
            tier(
                1,
                CostModel::PerUnit {
                    cost_per_kilo_units: dec!(0.60),
                },
                vec![provider("cheap-hosted", false, false)],
            ),
            tier(
                4,
                CostModel::Amortized {
                    rate_per_hour: dec!(0.34),
                    units_per_hour: 1_000,
                },
                vec![provider("gpu-rental", false, false)],
            ),
        ];
        let router = TierRouter::new(Arc::new(tiers), 50);

        let mut req = RouteRequest::text("x");
        req.estimated_units = Some(1);
        req.batch_size = 500;

        let plan = router.plan(&req).unwrap();
        assert_eq!(plan.tiers, vec![4, 1]);
        let comparison = plan
            .reasons
            .iter()
            .find(|r| r.contains("amortized tier 4"))
            .unwrap();
        assert!(comparison.contains("0.17"));
        assert!(comparison.contains("0.30"));
        assert!(comparison.contains("saving 0.13"));
    }

    #[test]
    fn test_small_batch_keeps_per_unit_order() {
        let router = five_tier_router();
        let mut req = RouteRequest::text("x");
        req.estimated_units = Some(1);
        req.batch_size = 10; // below threshold

        let plan = router.plan(&req).unwrap();
        assert_eq!(plan.tiers, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_large_batch_keeps_order_when_amortized_loses() {
        let router = five_tier_router();
        let mut req = RouteRequest::text("x");
        req.estimated_units = Some(1);
        req.batch_size = 100;

        // Free tier 0 costs 0, amortized can never beat it.
        let plan = router.plan(&req).unwrap();
        assert_eq!(plan.tiers, vec![0, 1, 2, 3, 4]);
        assert!(plan.reasons.iter().any(|r| r.contains("stays ahead")));
    }

    #[test]
    fn test_manual_override_goes_first() {
        let router = five_tier_router();
        let mut req = RouteRequest::text("x");
        req.tier_override = Some(3);

        let plan = router.plan(&req).unwrap();
        assert_eq!(plan.tiers, vec![3, 0, 1, 2, 4]);
        assert!(plan.reasons.iter().any(|r| r.contains("manual override")));
    }

    #[test]
    fn test_override_of_ineligible_tier_errors() {
        let router = five_tier_router();
        let mut req = RouteRequest::text("x");
        req.privacy_mode = true;
        req.tier_override = Some(1); // not privacy-safe

        let err = router.plan(&req).unwrap_err();
        match err {
            RouteError::NoEligibleTier { reason } => {
                assert!(reason.contains("override tier 1"));
            }
            other => panic!("expected NoEligibleTier, got: {other}"),
        }
    }
}
