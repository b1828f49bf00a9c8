//! Builds the live (or dry-run) collaborators from a validated [`Config`].

use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::{Keypair, Signer};
use spl_associated_token_account::get_associated_token_address;
use tracing::{info, warn};

use crate::config::{Config, ExecutionMode, PrivateKey};
use crate::error::{KeeperError, KeeperResult};
use crate::keeper::{Keeper, KeeperSettings, Observer};
use crate::onchain_instance::instance::treasury_address;
use crate::onchain_instance::{
    LedgerReader, LedgerWriter, RpcLedgerReader, SyntheticLedgerReader, TreasuryAccounts,
    TreasuryAddresses, TreasuryProgram,
};
use crate::services::{JupiterSwapService, RpcLiquidityPool, SwapSigner};

/// Everything `main` needs to run the loop or a one-shot command.
pub struct Runtime {
    pub reader: Arc<dyn LedgerReader>,
    pub ledger: Arc<dyn LedgerWriter>,
    pub observer: Arc<Observer>,
    pub keeper: Keeper,
}

pub fn load_keypair(key: &PrivateKey) -> Result<Keypair> {
    let bytes = bs58::decode(key.expose())
        .into_vec()
        .context("KEEPER_PRIVATE_KEY is not valid base58")?;
    Keypair::try_from(&bytes[..]).map_err(|e| anyhow!("Invalid keypair bytes: {}", e))
}

/// Conversions swap SOL out of the keeper wallet, so a live fee vault must be
/// that wallet. Dry runs read a synthetic treasury and accept any vault.
pub fn resolve_fee_vault(
    configured: Option<Pubkey>,
    keeper: Pubkey,
    mode: ExecutionMode,
) -> KeeperResult<Pubkey> {
    match configured {
        Some(vault) if vault != keeper && !mode.is_simulated() => {
            Err(KeeperError::ConfigInvalid(format!(
                "FEE_VAULT {} is not the keeper wallet {}; the keeper can only convert SOL it signs for",
                vault, keeper
            )))
        }
        Some(vault) => Ok(vault),
        None => Ok(keeper),
    }
}

pub fn build(config: &Config) -> Result<Runtime> {
    let solana = &config.solana;
    let rpc = Arc::new(RpcClient::new_with_timeout_and_commitment(
        solana.cluster.url().to_string(),
        solana.rpc_timeout,
        solana.commitment,
    ));

    let keypair = match &solana.private_key {
        Some(key) => Arc::new(load_keypair(key)?),
        None => {
            warn!("No KEEPER_PRIVATE_KEY set, using an ephemeral keypair for simulation");
            Arc::new(Keypair::new())
        }
    };
    let authority = keypair.pubkey();

    // Dry runs read a synthetic treasury and never reach the program.
    let program_id = solana.program_id.unwrap_or_default();
    let treasury = treasury_address(&program_id);
    let treasury_usdc = solana
        .treasury_usdc_account
        .unwrap_or_else(|| get_associated_token_address(&treasury, &solana.usdc_mint));
    let fee_vault = resolve_fee_vault(solana.fee_vault, authority, config.mode)?;

    info!("🔑 Keeper wallet: {}", authority);
    info!("🏦 Treasury: {} (program {})", treasury, program_id);
    info!("💵 Treasury USDC account: {}", treasury_usdc);
    info!("⛽ Fee vault: {}", fee_vault);

    let accounts = TreasuryAccounts {
        program_id,
        treasury,
        treasury_usdc,
        authority,
        usdc_mint: solana.usdc_mint,
        token_mint: solana.token_mint.unwrap_or_default(),
    };
    let program = Arc::new(TreasuryProgram::new(
        rpc.clone(),
        keypair.clone(),
        accounts,
        solana.commitment,
        solana.rpc_timeout,
        solana.confirm_timeout,
    ));

    let reader: Arc<dyn LedgerReader> = if config.mode.is_simulated() {
        info!("🧪 Dry run: treasury state is synthetic");
        Arc::new(SyntheticLedgerReader::from_config(config))
    } else {
        Arc::new(RpcLedgerReader::new(
            rpc.clone(),
            TreasuryAddresses { program_id, treasury, treasury_usdc, fee_vault },
            solana.commitment,
            solana.rpc_timeout,
            config.limits.sol_fee_reserve,
        ))
    };

    let signer = SwapSigner {
        rpc: rpc.clone(),
        keypair,
        commitment: solana.commitment,
        send_timeout: solana.rpc_timeout,
        confirm_timeout: solana.confirm_timeout,
    };
    let swap = Arc::new(
        JupiterSwapService::new(
            config.jupiter_api_url.clone(),
            solana.rpc_timeout,
            Some(signer),
            config.mode,
        )
        .context("Failed to build Jupiter HTTP client")?,
    );

    let (pool_usdc, pool_token) = match (solana.pool_usdc_account, solana.pool_token_account) {
        (Some(usdc), Some(token)) => (usdc, token),
        _ => {
            warn!("Pool vaults not configured, liquidity provisioning will fail closed");
            (Pubkey::default(), Pubkey::default())
        }
    };
    let pool = Arc::new(RpcLiquidityPool::new(
        rpc,
        program.clone(),
        pool_usdc,
        pool_token,
        solana.commitment,
        solana.rpc_timeout,
    ));

    let observer = Arc::new(Observer::tracing());
    let ledger: Arc<dyn LedgerWriter> = program;
    let keeper = Keeper::new(
        KeeperSettings::from_config(config, treasury_usdc),
        reader.clone(),
        ledger.clone(),
        swap,
        pool,
        observer.clone(),
    );

    Ok(Runtime { reader, ledger, observer, keeper })
}
