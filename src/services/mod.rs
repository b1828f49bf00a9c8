//! # Services Module
//!
//! External market collaborators for the keeper: the Jupiter swap engine and
//! the liquidity pool client.

pub mod liquidity_pool;
pub mod swap_engine;

pub use liquidity_pool::{LiquidityPool, PoolReserves, RpcLiquidityPool};
pub use swap_engine::{JupiterSwapService, Quote, SwapProvider, SwapResult, SwapSigner};
