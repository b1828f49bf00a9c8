use std::sync::Arc;

use tracing::info;

use crate::config::ExecutionMode;
use crate::error::KeeperResult;
use crate::keeper::outcome::{OperationOutcome, Settlement};
use crate::services::LiquidityPool;

/// Pairs treasury USDC with the protocol token at the pool's spot reserve
/// ratio and deposits it.
pub struct LiquidityManager {
    pool: Arc<dyn LiquidityPool>,
    mode: ExecutionMode,
}

impl LiquidityManager {
    pub fn new(pool: Arc<dyn LiquidityPool>, mode: ExecutionMode) -> Self {
        Self { pool, mode }
    }

    /// Fails closed with `PoolUnavailable` when reserves cannot be read;
    /// there is no fallback price.
    pub async fn add_liquidity(&self, usdc_amount: u64) -> KeeperResult<OperationOutcome> {
        let reserves = self.pool.reserves().await?;
        let token_amount = reserves.paired_token_amount(usdc_amount)?;

        if self.mode.is_simulated() {
            info!(
                usdc_amount,
                token_amount,
                usdc_reserve = reserves.usdc_reserve,
                token_reserve = reserves.token_reserve,
                simulated = true,
                "[SIMULATED] Would add liquidity"
            );
            return Ok(OperationOutcome::Executed(Settlement {
                amount_in: usdc_amount,
                quoted_out: Some(token_amount),
                executed_out: token_amount,
                min_out: None,
                price_impact_bps: None,
                reference: format!("simulated:add_liquidity:{}:{}", usdc_amount, token_amount),
                simulated: true,
            }));
        }

        let submission = self.pool.add_liquidity(usdc_amount, token_amount).await?;
        info!(usdc_amount, token_amount, signature = %submission.signature, "Liquidity added");
        Ok(OperationOutcome::Executed(Settlement {
            amount_in: usdc_amount,
            quoted_out: Some(token_amount),
            executed_out: token_amount,
            min_out: None,
            price_impact_bps: None,
            reference: submission.signature,
            simulated: false,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::KeeperError;
    use crate::keeper::test_support::FakePool;

    #[tokio::test]
    async fn deposits_at_reserve_ratio() {
        let pool = Arc::new(FakePool::with_reserves(1_000_000, 4_000_000));
        let manager = LiquidityManager::new(pool.clone(), ExecutionMode::Live);

        let outcome = manager.add_liquidity(250).await.unwrap();
        let settlement = outcome.settlement().unwrap();
        assert_eq!(settlement.executed_out, 1_000);
        assert!(!settlement.simulated);
        assert_eq!(pool.deposits(), vec![(250, 1_000)]);
    }

    #[tokio::test]
    async fn unreadable_reserves_fail_closed() {
        let pool = Arc::new(FakePool::unavailable());
        let manager = LiquidityManager::new(pool.clone(), ExecutionMode::Live);

        let err = manager.add_liquidity(250).await.unwrap_err();
        assert!(matches!(err, KeeperError::PoolUnavailable(_)));
        assert!(pool.deposits().is_empty());
    }

    #[tokio::test]
    async fn empty_pool_fails_closed() {
        let pool = Arc::new(FakePool::with_reserves(0, 4_000_000));
        let manager = LiquidityManager::new(pool.clone(), ExecutionMode::Live);
        assert!(matches!(
            manager.add_liquidity(250).await,
            Err(KeeperError::PoolUnavailable(_))
        ));
        assert!(pool.deposits().is_empty());
    }

    #[tokio::test]
    async fn simulation_reads_reserves_only() {
        let pool = Arc::new(FakePool::with_reserves(2, 3));
        let manager = LiquidityManager::new(pool.clone(), ExecutionMode::DryRun);

        let outcome = manager.add_liquidity(10).await.unwrap();
        let settlement = outcome.settlement().unwrap();
        assert!(settlement.simulated);
        assert_eq!(settlement.executed_out, 15);
        assert_eq!(pool.reserve_reads(), 1);
        assert!(pool.deposits().is_empty());
    }
}
