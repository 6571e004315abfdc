//! Cost estimation.
//!
//! Workload size defaults to a character-count heuristic (roughly four
//! characters per token-sized unit) when the caller supplies no explicit
//! size. Tier cost functions map total units to an estimated charge.

use rust_decimal::Decimal;

use tollgate_types::request::RouteRequest;
use tollgate_types::tier::CostModel;

/// Characters per estimated workload unit.
pub const CHARS_PER_UNIT: u64 = 4;

/// Decimal places retained on computed costs (micro-unit precision).
const COST_SCALE: u32 = 6;

/// Estimated workload units for a single item of the request.
pub fn estimate_units(request: &RouteRequest) -> u64 {
    request.estimated_units.unwrap_or_else(|| {
        let chars = request.payload.chars().count() as u64;
        chars.div_ceil(CHARS_PER_UNIT).max(1)
    })
}

/// Total estimated units across the whole batch.
pub fn total_units(request: &RouteRequest) -> u64 {
    estimate_units(request) * u64::from(request.batch_size.max(1))
}

/// Estimated cost of `units` under a tier's pricing function.
pub fn tier_cost(model: &CostModel, units: u64) -> Decimal {
    let cost = match model {
        CostModel::Free => Decimal::ZERO,
        CostModel::PerUnit {
            cost_per_kilo_units,
        } => Decimal::from(units) * *cost_per_kilo_units / Decimal::from(1_000u32),
        CostModel::Amortized {
            rate_per_hour,
            units_per_hour,
        } => {
            if *units_per_hour == 0 {
                return Decimal::ZERO;
            }
            // Pro-rata over fractional hours of throughput.
            Decimal::from(units) * *rate_per_hour / Decimal::from(*units_per_hour)
        }
    };
    cost.round_dp(COST_SCALE)
}
