//! Liquidity pool client: reads vault reserves and deposits treasury USDC
//! through the treasury program's `add_liquidity` entry point.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_sdk::{commitment_config::CommitmentConfig, pubkey::Pubkey};
use tokio::time::timeout;

use crate::error::{KeeperError, KeeperResult};
use crate::onchain_instance::{Submission, TreasuryProgram};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolReserves {
    pub usdc_reserve: u64,
    pub token_reserve: u64,
}

impl PoolReserves {
    /// Token amount matching `usdc_amount` at the spot reserve ratio.
    pub fn paired_token_amount(&self, usdc_amount: u64) -> KeeperResult<u64> {
        if self.usdc_reserve == 0 {
            return Err(KeeperError::PoolUnavailable(
                "pool USDC reserve is empty, no reference price".to_string(),
            ));
        }
        let amount = usdc_amount as u128 * self.token_reserve as u128 / self.usdc_reserve as u128;
        u64::try_from(amount).map_err(|_| {
            KeeperError::PoolUnavailable(format!("paired token amount {} overflows", amount))
        })
    }
}

#[async_trait]
pub trait LiquidityPool: Send + Sync {
    async fn reserves(&self) -> KeeperResult<PoolReserves>;
    async fn add_liquidity(&self, usdc_amount: u64, token_amount: u64)
        -> KeeperResult<Submission>;
}

pub struct RpcLiquidityPool {
    rpc: Arc<RpcClient>,
    program: Arc<TreasuryProgram>,
    pool_usdc: Pubkey,
    pool_token: Pubkey,
    commitment: CommitmentConfig,
    read_timeout: Duration,
}

impl RpcLiquidityPool {
    pub fn new(
        rpc: Arc<RpcClient>,
        program: Arc<TreasuryProgram>,
        pool_usdc: Pubkey,
        pool_token: Pubkey,
        commitment: CommitmentConfig,
        read_timeout: Duration,
    ) -> Self {
        Self { rpc, program, pool_usdc, pool_token, commitment, read_timeout }
    }

    async fn vault_balance(&self, vault: &Pubkey) -> KeeperResult<u64> {
        let response = timeout(
            self.read_timeout,
            self.rpc.get_token_account_balance_with_commitment(vault, self.commitment),
        )
        .await
        .map_err(|_| KeeperError::PoolUnavailable(format!("reserve read of {} timed out", vault)))?
        .map_err(|e| KeeperError::PoolUnavailable(format!("reserve read of {}: {}", vault, e)))?;

        response.value.amount.parse::<u64>().map_err(|e| {
            KeeperError::PoolUnavailable(format!("reserve amount of {}: {}", vault, e))
        })
    }
}

#[async_trait]
impl LiquidityPool for RpcLiquidityPool {
    async fn reserves(&self) -> KeeperResult<PoolReserves> {
        let usdc_reserve = self.vault_balance(&self.pool_usdc).await?;
        let token_reserve = self.vault_balance(&self.pool_token).await?;
        Ok(PoolReserves { usdc_reserve, token_reserve })
    }

    async fn add_liquidity(
        &self,
        usdc_amount: u64,
        token_amount: u64,
    ) -> KeeperResult<Submission> {
        let ix = self
            .program
            .accounts()
            .add_liquidity_ix(&self.pool_usdc, usdc_amount, token_amount);
        self.program.submit("add_liquidity", ix).await
    }
}
