//! Allocation engine: pure budget math over a treasury snapshot.
//!
//! Budgets are recomputed from the ledger's cumulative counters every cycle
//! and never cached. Arithmetic is integer (u128) and mirrors the treasury
//! program's own allocation check, so a budget computed here is never
//! rejected on-chain for exceeding the allocation.

use std::fmt;

use serde::Serialize;

use crate::config::{ALLOCATION_TOLERANCE, Allocations};
use crate::error::{KeeperError, KeeperResult};
use crate::onchain_instance::treasury_state::{BPS_DENOMINATOR, TreasuryState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationCategory {
    Buyback,
    Liquidity,
}

impl fmt::Display for OperationCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationCategory::Buyback => write!(f, "buyback"),
            OperationCategory::Liquidity => write!(f, "liquidity"),
        }
    }
}

/// Allocation split in basis points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AllocationRatios {
    pub buyback_bps: u16,
    pub liquidity_bps: u16,
    pub reserve_bps: u16,
}

impl AllocationRatios {
    pub fn from_state(state: &TreasuryState) -> Self {
        Self {
            buyback_bps: state.buyback_allocation_bps,
            liquidity_bps: state.liquidity_allocation_bps,
            reserve_bps: state.reserve_allocation_bps,
        }
    }

    pub fn bps(&self, category: OperationCategory) -> u16 {
        match category {
            OperationCategory::Buyback => self.buyback_bps,
            OperationCategory::Liquidity => self.liquidity_bps,
        }
    }

    pub fn ratio(&self, category: OperationCategory) -> f64 {
        self.bps(category) as f64 / BPS_DENOMINATOR as f64
    }
}

fn spent(category: OperationCategory, state: &TreasuryState) -> u64 {
    match category {
        OperationCategory::Buyback => state.total_buybacks_usdc,
        OperationCategory::Liquidity => state.total_liquidity_usdc,
    }
}

/// Remaining budget for a category: `converted * ratio - spent`, floored at 0.
pub fn budget_for(
    category: OperationCategory,
    state: &TreasuryState,
    ratios: &AllocationRatios,
) -> u64 {
    let total_budget = state.total_usdc_converted as u128 * ratios.bps(category) as u128
        / BPS_DENOMINATOR as u128;
    let remaining = total_budget.saturating_sub(spent(category, state) as u128);
    // bps never exceed the denominator in a valid snapshot; clamp anyway.
    remaining.min(u64::MAX as u128) as u64
}

/// Amount actually dispatched: the smallest of budget, balance and cap.
pub fn clamp_spend(budget: u64, available_balance: u64, max_per_cycle: u64) -> u64 {
    budget.min(available_balance).min(max_per_cycle)
}

/// Cross-check the local allocation defaults against the ledger's bps at
/// startup. The ledger is authoritative; divergence beyond the tolerance
/// means the operator's picture of the treasury is wrong, so refuse to run.
pub fn reconcile(local: &Allocations, state: &TreasuryState) -> KeeperResult<AllocationRatios> {
    state.check_allocation_invariant()?;
    let ledger = AllocationRatios::from_state(state);
    let reserve_ratio = ledger.reserve_bps as f64 / BPS_DENOMINATOR as f64;

    for (name, local_ratio, ledger_ratio) in [
        ("buyback", local.buyback, ledger.ratio(OperationCategory::Buyback)),
        ("liquidity", local.liquidity, ledger.ratio(OperationCategory::Liquidity)),
        ("reserve", local.reserve, reserve_ratio),
    ] {
        if (local_ratio - ledger_ratio).abs() > ALLOCATION_TOLERANCE {
            return Err(KeeperError::ConfigInvalid(format!(
                "allocations.{} = {} diverges from ledger value {} (tolerance {})",
                name, local_ratio, ledger_ratio, ALLOCATION_TOLERANCE
            )));
        }
    }
    Ok(ledger)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::onchain_instance::treasury_state::sample_state;

    fn half_split() -> AllocationRatios {
        AllocationRatios { buyback_bps: 5_000, liquidity_bps: 3_000, reserve_bps: 2_000 }
    }

    #[test]
    fn buyback_budget_before_and_after_spend() {
        let mut state = sample_state();
        state.total_usdc_converted = 1_000;
        state.total_buybacks_usdc = 0;
        assert_eq!(budget_for(OperationCategory::Buyback, &state, &half_split()), 500);

        state.total_buybacks_usdc = 500;
        assert_eq!(budget_for(OperationCategory::Buyback, &state, &half_split()), 0);
    }

    #[test]
    fn liquidity_budget_uses_its_own_counter() {
        let mut state = sample_state();
        state.total_usdc_converted = 1_000;
        state.total_buybacks_usdc = 500;
        state.total_liquidity_usdc = 100;
        assert_eq!(budget_for(OperationCategory::Liquidity, &state, &half_split()), 200);
    }

    #[test]
    fn overspent_category_floors_at_zero() {
        let mut state = sample_state();
        state.total_usdc_converted = 1_000;
        state.total_liquidity_usdc = 10_000;
        assert_eq!(budget_for(OperationCategory::Liquidity, &state, &half_split()), 0);
    }

    #[test]
    fn budget_non_increasing_in_spent() {
        let mut state = sample_state();
        state.total_usdc_converted = 987_654_321;
        let ratios = half_split();
        let mut previous = u64::MAX;
        for spent in (0..600_000_000u64).step_by(7_777_777) {
            state.total_buybacks_usdc = spent;
            let budget = budget_for(OperationCategory::Buyback, &state, &ratios);
            assert!(budget <= previous);
            previous = budget;
        }
        assert_eq!(previous, 0);
    }

    #[test]
    fn no_overflow_at_counter_limits() {
        let mut state = sample_state();
        state.total_usdc_converted = u64::MAX;
        let ratios = AllocationRatios { buyback_bps: 10_000, liquidity_bps: 0, reserve_bps: 0 };
        assert_eq!(budget_for(OperationCategory::Buyback, &state, &ratios), u64::MAX);
        assert_eq!(budget_for(OperationCategory::Liquidity, &state, &ratios), 0);
    }

    #[test]
    fn clamp_takes_minimum() {
        assert_eq!(clamp_spend(1_000, 600, 300), 300);
        assert_eq!(clamp_spend(200, 600, 300), 200);
        assert_eq!(clamp_spend(1_000, 100, 300), 100);
        assert_eq!(clamp_spend(0, 600, 300), 0);
    }

    #[test]
    fn reconcile_accepts_matching_and_rejects_divergent() {
        let state = sample_state();
        let local = Allocations { buyback: 0.5, liquidity: 0.3, reserve: 0.2 };
        assert_eq!(reconcile(&local, &state).unwrap(), half_split());

        let drifted = Allocations { buyback: 0.45, liquidity: 0.35, reserve: 0.2 };
        assert!(matches!(reconcile(&drifted, &state), Err(KeeperError::ConfigInvalid(_))));
    }

    #[test]
    fn reconcile_rejects_broken_ledger_split() {
        let mut state = sample_state();
        state.reserve_allocation_bps = 0;
        let local = Allocations { buyback: 0.5, liquidity: 0.3, reserve: 0.2 };
        assert!(matches!(reconcile(&local, &state), Err(KeeperError::ConfigInvalid(_))));
    }
}
