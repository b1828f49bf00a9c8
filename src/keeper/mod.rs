//! # Keeper Module
//!
//! Treasury automation: allocation budgets, operation executors, the
//! observability handle, and the control loop that ties them together.
//!
//! ## Cycle
//! 1. Read a treasury snapshot from the ledger
//! 2. Convert accumulated SOL fees to USDC
//! 3. Gate on the ledger cooldown
//! 4. Dispatch buyback and liquidity within their allocation budgets

/// Budget math over a treasury snapshot
pub mod allocation;
/// Token buybacks and explicit burns
pub mod buyback;
/// Orchestrator loop and shutdown handle
pub mod keeper_loop;
/// Liquidity provisioning
pub mod liquidity;
/// Structured cycle and operation records
pub mod observer;
/// Operation and cycle outcomes
pub mod outcome;

#[cfg(test)]
pub(crate) mod test_support;

pub use keeper_loop::{EffectiveLimits, Keeper, KeeperSettings, Shutdown};
pub use observer::Observer;
