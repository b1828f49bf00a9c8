//! Swap Engine Service
//!
//! Quotes and executes treasury swaps (SOL → USDC conversions, USDC → token
//! buybacks) through the Jupiter aggregator.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_sdk::{
    commitment_config::CommitmentConfig,
    pubkey::Pubkey,
    signature::{Keypair, Signer},
    transaction::VersionedTransaction,
};
use spl_associated_token_account::get_associated_token_address;
use tokio::time::timeout;
use tracing::{error, info, warn};

use crate::config::ExecutionMode;
use crate::error::{KeeperError, KeeperResult};
use crate::onchain_instance::instance::confirm_signature;

/// A priced route for one pair and amount. Immutable; never persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Quote {
    pub input_mint: Pubkey,
    pub output_mint: Pubkey,
    pub in_amount: u64,
    pub out_amount: u64,
    pub price_impact_bps: u16,
    /// Provider payload echoed back when requesting the swap transaction.
    #[serde(skip)]
    pub route: serde_json::Value,
}

impl Quote {
    /// Lowest acceptable output under a slippage bound.
    pub fn min_out(&self, slippage_bps: u16) -> u64 {
        let keep = 10_000u128.saturating_sub(slippage_bps as u128);
        (self.out_amount as u128 * keep / 10_000) as u64
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SwapResult {
    pub executed_in_amount: u64,
    pub executed_out_amount: u64,
    pub execution_reference: String,
    pub simulated: bool,
}

impl SwapResult {
    /// Deterministic stand-in used in dry runs: settles exactly at the quote.
    pub fn simulated(quote: &Quote) -> Self {
        Self {
            executed_in_amount: quote.in_amount,
            executed_out_amount: quote.out_amount,
            execution_reference: format!(
                "simulated:{}:{}:{}",
                quote.input_mint, quote.output_mint, quote.in_amount
            ),
            simulated: true,
        }
    }
}

/// Lifecycle of a single swap. `Submitted` swaps are never resubmitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SwapPhase {
    Quoted,
    Submitted { signature: String },
    Confirmed { signature: String },
    Failed { reason: String },
}

impl fmt::Display for SwapPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SwapPhase::Quoted => write!(f, "quoted"),
            SwapPhase::Submitted { signature } => write!(f, "submitted({})", signature),
            SwapPhase::Confirmed { signature } => write!(f, "confirmed({})", signature),
            SwapPhase::Failed { reason } => write!(f, "failed({})", reason),
        }
    }
}

#[async_trait]
pub trait SwapProvider: Send + Sync {
    async fn quote(
        &self,
        input_mint: &Pubkey,
        output_mint: &Pubkey,
        amount: u64,
        max_slippage_bps: u16,
    ) -> KeeperResult<Quote>;

    /// Execute a quoted swap. Output settles into `destination` when given,
    /// otherwise into the keeper wallet's associated account for the output mint.
    async fn execute_swap(&self, quote: &Quote, destination: Option<Pubkey>)
        -> KeeperResult<SwapResult>;
}

/// Jupiter API quote response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JupiterQuote {
    #[serde(rename = "inputMint")]
    pub input_mint: String,
    #[serde(rename = "inAmount")]
    pub in_amount: String,
    #[serde(rename = "outputMint")]
    pub output_mint: String,
    #[serde(rename = "outAmount")]
    pub out_amount: String,
    #[serde(rename = "slippageBps")]
    pub slippage_bps: Option<u16>,
    #[serde(rename = "priceImpactPct")]
    pub price_impact_pct: Option<String>,
    #[serde(rename = "contextSlot")]
    pub context_slot: Option<u64>,
}

/// Jupiter API swap response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JupiterSwapResponse {
    #[serde(rename = "swapTransaction")]
    pub swap_transaction: String,
}

/// Jupiter swap request payload
#[derive(Debug, Clone, Serialize)]
pub struct JupiterSwapRequest<'a> {
    #[serde(rename = "userPublicKey")]
    pub user_public_key: String,
    #[serde(rename = "quoteResponse")]
    pub quote_response: &'a serde_json::Value,
    #[serde(rename = "wrapAndUnwrapSol")]
    pub wrap_and_unwrap_sol: bool,
    #[serde(rename = "dynamicComputeUnitLimit")]
    pub dynamic_compute_unit_limit: bool,
    #[serde(rename = "destinationTokenAccount", skip_serializing_if = "Option::is_none")]
    pub destination_token_account: Option<String>,
}

impl<'a> JupiterSwapRequest<'a> {
    pub fn new(owner: &Pubkey, quote: &'a Quote, destination: Option<Pubkey>) -> Self {
        Self {
            user_public_key: owner.to_string(),
            quote_response: &quote.route,
            wrap_and_unwrap_sol: true,
            dynamic_compute_unit_limit: true,
            destination_token_account: destination.map(|d| d.to_string()),
        }
    }
}

/// Convert Jupiter's fractional `priceImpactPct` ("0.0123" = 1.23%) to basis
/// points, rounding up.
pub fn price_impact_to_bps(pct: Option<&str>) -> KeeperResult<u16> {
    let Some(raw) = pct else {
        return Ok(0);
    };
    let fraction: f64 = raw
        .trim()
        .parse()
        .map_err(|e| KeeperError::Quote(format!("invalid priceImpactPct '{}': {}", raw, e)))?;
    if !fraction.is_finite() {
        return Err(KeeperError::Quote(format!("invalid priceImpactPct '{}'", raw)));
    }
    let bps = (fraction.abs() * 10_000.0).ceil();
    Ok(bps.min(u16::MAX as f64) as u16)
}

/// Parse a raw Jupiter quote body into a [`Quote`].
pub fn parse_quote(raw: serde_json::Value) -> KeeperResult<Quote> {
    let parsed: JupiterQuote = serde_json::from_value(raw.clone())
        .map_err(|e| KeeperError::Quote(format!("unexpected quote response: {}", e)))?;

    let parse_amount = |field: &str, value: &str| {
        value
            .parse::<u64>()
            .map_err(|e| KeeperError::Quote(format!("invalid {} '{}': {}", field, value, e)))
    };
    let parse_mint = |value: &str| {
        value
            .parse::<Pubkey>()
            .map_err(|e| KeeperError::Quote(format!("invalid mint '{}': {}", value, e)))
    };

    let quote = Quote {
        input_mint: parse_mint(&parsed.input_mint)?,
        output_mint: parse_mint(&parsed.output_mint)?,
        in_amount: parse_amount("inAmount", &parsed.in_amount)?,
        out_amount: parse_amount("outAmount", &parsed.out_amount)?,
        price_impact_bps: price_impact_to_bps(parsed.price_impact_pct.as_deref())?,
        route: raw,
    };
    if quote.out_amount == 0 {
        return Err(KeeperError::Quote("no viable route (zero output)".to_string()));
    }
    Ok(quote)
}

/// Signing half of the swap service; absent in dry runs without a wallet.
pub struct SwapSigner {
    pub rpc: Arc<RpcClient>,
    pub keypair: Arc<Keypair>,
    pub commitment: CommitmentConfig,
    pub send_timeout: Duration,
    pub confirm_timeout: Duration,
}

/// Jupiter-backed swap service
pub struct JupiterSwapService {
    http: reqwest::Client,
    api_url: String,
    signer: Option<SwapSigner>,
    mode: ExecutionMode,
}

impl JupiterSwapService {
    pub fn new(
        api_url: String,
        request_timeout: Duration,
        signer: Option<SwapSigner>,
        mode: ExecutionMode,
    ) -> KeeperResult<Self> {
        let http = reqwest::Client::builder().timeout(request_timeout).build()?;
        Ok(Self { http, api_url, signer, mode })
    }

    async fn token_balance(signer: &SwapSigner, account: &Pubkey) -> Option<u64> {
        match signer
            .rpc
            .get_token_account_balance_with_commitment(account, signer.commitment)
            .await
        {
            Ok(response) => response.value.amount.parse().ok(),
            Err(_) => None,
        }
    }

    async fn submit_swap(
        &self,
        signer: &SwapSigner,
        quote: &Quote,
        destination: Option<Pubkey>,
    ) -> KeeperResult<SwapResult> {
        let owner = signer.keypair.pubkey();
        let request = JupiterSwapRequest::new(&owner, quote, destination);
        let output_account = destination
            .unwrap_or_else(|| get_associated_token_address(&owner, &quote.output_mint));

        let response = self
            .http
            .post(format!("{}/swap", self.api_url))
            .json(&request)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(KeeperError::Execution(format!(
                "Jupiter swap API returned error: {}",
                response.status()
            )));
        }
        let swap_response: JupiterSwapResponse = response
            .json()
            .await
            .map_err(|e| KeeperError::Execution(format!("failed to parse swap response: {}", e)))?;

        // Deserialize and partially sign Jupiter swap transaction
        let transaction_bytes = base64::engine::general_purpose::STANDARD
            .decode(&swap_response.swap_transaction)
            .map_err(|e| KeeperError::Execution(format!("failed to decode swap transaction: {}", e)))?;
        let mut versioned_tx: VersionedTransaction = bincode::deserialize(&transaction_bytes)
            .map_err(|e| {
                KeeperError::Execution(format!("failed to deserialize versioned transaction: {}", e))
            })?;

        // Find the signer index in the message's account keys
        let idx = versioned_tx
            .message
            .static_account_keys()
            .iter()
            .position(|key| key == &owner)
            .ok_or_else(|| KeeperError::Execution("keeper not a signer of swap transaction".to_string()))?;
        if idx >= versioned_tx.signatures.len() {
            return Err(KeeperError::Execution("swap transaction signer slot missing".to_string()));
        }
        let msg_data = versioned_tx.message.serialize();
        let signature = signer.keypair.sign_message(&msg_data);
        versioned_tx.signatures[idx] = signature;

        let before = Self::token_balance(signer, &output_account).await;

        match timeout(signer.send_timeout, signer.rpc.send_transaction(&versioned_tx)).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => {
                return Err(KeeperError::Execution(format!("swap transaction rejected: {}", e)));
            }
            Err(_) => warn!(%signature, "Swap send timed out, checking signature status"),
        }
        info!(phase = %SwapPhase::Submitted { signature: signature.to_string() }, "Swap submitted");

        confirm_signature(&signer.rpc, &signature, signer.commitment, signer.confirm_timeout)
            .await?;

        let after = Self::token_balance(signer, &output_account).await;
        let executed_out = match (before, after) {
            (Some(b), Some(a)) if a > b => a - b,
            _ => {
                warn!(%signature, "Could not measure swap output, using quoted amount");
                quote.out_amount
            }
        };

        Ok(SwapResult {
            executed_in_amount: quote.in_amount,
            executed_out_amount: executed_out,
            execution_reference: signature.to_string(),
            simulated: false,
        })
    }
}

#[async_trait]
impl SwapProvider for JupiterSwapService {
    async fn quote(
        &self,
        input_mint: &Pubkey,
        output_mint: &Pubkey,
        amount: u64,
        max_slippage_bps: u16,
    ) -> KeeperResult<Quote> {
        let params = [
            ("inputMint", input_mint.to_string()),
            ("outputMint", output_mint.to_string()),
            ("amount", amount.to_string()),
            ("slippageBps", max_slippage_bps.to_string()),
        ];

        let response = self
            .http
            .get(format!("{}/quote", self.api_url))
            .query(&params)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(KeeperError::Quote(format!(
                "Jupiter quote API returned error: {}",
                response.status()
            )));
        }
        let raw: serde_json::Value = response
            .json()
            .await
            .map_err(|e| KeeperError::Quote(format!("failed to parse quote response: {}", e)))?;

        parse_quote(raw)
    }

    async fn execute_swap(
        &self,
        quote: &Quote,
        destination: Option<Pubkey>,
    ) -> KeeperResult<SwapResult> {
        if self.mode.is_simulated() {
            return Ok(SwapResult::simulated(quote));
        }
        let signer = self
            .signer
            .as_ref()
            .ok_or_else(|| KeeperError::MissingCredentials("no keeper wallet for swaps".to_string()))?;

        info!(
            phase = %SwapPhase::Quoted,
            input = %quote.input_mint,
            output = %quote.output_mint,
            in_amount = quote.in_amount,
            quoted_out = quote.out_amount,
            destination = ?destination,
            "Executing swap"
        );
        match self.submit_swap(signer, quote, destination).await {
            Ok(result) => {
                info!(
                    phase = %SwapPhase::Confirmed { signature: result.execution_reference.clone() },
                    executed_out = result.executed_out_amount,
                    "Swap settled"
                );
                Ok(result)
            }
            Err(e) => {
                error!(phase = %SwapPhase::Failed { reason: e.to_string() }, "Swap did not settle");
                Err(e)
            }
        }
    }
}
