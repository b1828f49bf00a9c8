//! Reads the treasury snapshot the keeper plans each cycle against.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_sdk::{commitment_config::CommitmentConfig, pubkey::Pubkey};
use tokio::time::timeout;
use tracing::debug;

use crate::config::Config;
use crate::error::{KeeperError, KeeperResult};
use crate::onchain_instance::treasury_state::{
    BPS_DENOMINATOR, StateSource, TreasuryAccount, TreasuryState,
};

#[async_trait]
pub trait LedgerReader: Send + Sync {
    async fn fetch(&self) -> KeeperResult<TreasuryState>;
}

/// Accounts the reader pulls a snapshot from.
#[derive(Debug, Clone)]
pub struct TreasuryAddresses {
    pub program_id: Pubkey,
    pub treasury: Pubkey,
    pub treasury_usdc: Pubkey,
    pub fee_vault: Pubkey,
}

pub struct RpcLedgerReader {
    rpc: Arc<RpcClient>,
    addresses: TreasuryAddresses,
    commitment: CommitmentConfig,
    read_timeout: Duration,
    sol_fee_reserve: u64,
}

impl RpcLedgerReader {
    pub fn new(
        rpc: Arc<RpcClient>,
        addresses: TreasuryAddresses,
        commitment: CommitmentConfig,
        read_timeout: Duration,
        sol_fee_reserve: u64,
    ) -> Self {
        Self { rpc, addresses, commitment, read_timeout, sol_fee_reserve }
    }

    async fn bounded<T, F>(&self, what: &'static str, fut: F) -> KeeperResult<T>
    where
        F: std::future::Future<Output = Result<T, solana_client::client_error::ClientError>>,
    {
        match timeout(self.read_timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(KeeperError::Unavailable(format!("{}: {}", what, e))),
            Err(_) => Err(KeeperError::Timeout(what, self.read_timeout.as_secs())),
        }
    }
}

#[async_trait]
impl LedgerReader for RpcLedgerReader {
    async fn fetch(&self) -> KeeperResult<TreasuryState> {
        let response = self
            .bounded(
                "treasury account read",
                self.rpc
                    .get_account_with_commitment(&self.addresses.treasury, self.commitment),
            )
            .await?;
        let slot = response.context.slot;
        let account = response.value.ok_or_else(|| {
            KeeperError::Unavailable(format!(
                "treasury account {} not found",
                self.addresses.treasury
            ))
        })?;
        if account.owner != self.addresses.program_id {
            return Err(KeeperError::Decode(format!(
                "treasury account owned by {}, expected {}",
                account.owner, self.addresses.program_id
            )));
        }
        let treasury = TreasuryAccount::decode(&account.data)?;

        let vault_lamports = self
            .bounded(
                "fee vault balance read",
                self.rpc
                    .get_balance_with_commitment(&self.addresses.fee_vault, self.commitment),
            )
            .await?
            .value;

        let usdc = self
            .bounded(
                "treasury usdc balance read",
                self.rpc.get_token_account_balance_with_commitment(
                    &self.addresses.treasury_usdc,
                    self.commitment,
                ),
            )
            .await?
            .value;
        let usdc_balance = usdc.amount.parse::<u64>().map_err(|e| {
            KeeperError::Decode(format!("treasury usdc amount '{}': {}", usdc.amount, e))
        })?;

        let state = TreasuryState::from_account(
            &treasury,
            vault_lamports.saturating_sub(self.sol_fee_reserve),
            usdc_balance,
            StateSource::Ledger { slot },
        );
        debug!(
            slot,
            paused = state.paused,
            usdc_balance = state.usdc_balance,
            sol_balance = state.sol_balance,
            total_usdc_converted = state.total_usdc_converted,
            "Fetched treasury snapshot"
        );
        Ok(state)
    }
}

/// Dry-run reader: always returns the same state, labeled `Synthetic`.
pub struct SyntheticLedgerReader {
    state: TreasuryState,
}

/// USDC (6 decimals) held by the synthetic treasury.
const SYNTHETIC_USDC_BALANCE: u64 = 1_000_000_000;
const SYNTHETIC_USDC_CONVERTED: u64 = 10_000_000_000;

impl SyntheticLedgerReader {
    pub fn new(state: TreasuryState) -> Self {
        Self { state }
    }

    /// Synthetic treasury mirroring the local configuration, with enough
    /// native balance to exercise the conversion path.
    pub fn from_config(config: &Config) -> Self {
        let buyback_bps = (config.allocations.buyback * BPS_DENOMINATOR as f64).round() as u16;
        let liquidity_bps =
            (config.allocations.liquidity * BPS_DENOMINATOR as f64).round() as u16;
        let reserve_bps = (BPS_DENOMINATOR as u16)
            .saturating_sub(buyback_bps)
            .saturating_sub(liquidity_bps);

        Self::new(TreasuryState {
            authority: Pubkey::default(),
            sol_balance: config.limits.min_sol_to_swap,
            usdc_balance: SYNTHETIC_USDC_BALANCE,
            buyback_allocation_bps: buyback_bps,
            liquidity_allocation_bps: liquidity_bps,
            reserve_allocation_bps: reserve_bps,
            max_usdc_per_cycle: config.limits.max_usdc_per_cycle,
            cooldown_seconds: config.limits.cooldown_seconds(),
            slippage_bps: config.limits.slippage_bps,
            total_sol_collected: 0,
            total_usdc_converted: SYNTHETIC_USDC_CONVERTED,
            total_buybacks_usdc: 0,
            total_liquidity_usdc: 0,
            total_tokens_burned: 0,
            last_operation_timestamp: 0,
            paused: false,
            source: StateSource::Synthetic,
        })
    }
}

#[async_trait]
impl LedgerReader for SyntheticLedgerReader {
    async fn fetch(&self) -> KeeperResult<TreasuryState> {
        Ok(self.state.clone())
    }
}
