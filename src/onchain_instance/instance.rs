use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use anchor_lang::prelude::AnchorSerialize;
use async_trait::async_trait;
use serde::Serialize;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_sdk::{
    commitment_config::CommitmentConfig,
    hash::hash,
    instruction::{AccountMeta, Instruction},
    pubkey::Pubkey,
    signature::{Keypair, Signature, Signer},
    transaction::Transaction,
};
use spl_associated_token_account::get_associated_token_address;
use tokio::time::{Instant, sleep, timeout};
use tracing::{error, info, warn};

use crate::error::{KeeperError, KeeperResult};
use crate::onchain_instance::treasury_state::TREASURY_SEED;

const CONFIRM_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Derive the treasury PDA for a program.
pub fn treasury_address(program_id: &Pubkey) -> Pubkey {
    Pubkey::find_program_address(&[TREASURY_SEED], program_id).0
}

/// Anchor instruction discriminator: first 8 bytes of `sha256("global:<name>")`.
pub fn instruction_discriminator(name: &str) -> [u8; 8] {
    let mut disc = [0u8; 8];
    disc.copy_from_slice(&hash(format!("global:{}", name).as_bytes()).to_bytes()[..8]);
    disc
}

fn instruction_data<A: AnchorSerialize>(name: &str, args: &A) -> Vec<u8> {
    let mut data = instruction_discriminator(name).to_vec();
    // Writing into a Vec cannot fail.
    let _ = args.serialize(&mut data);
    data
}

struct AmountArgs {
    amount: u64,
}

impl AnchorSerialize for AmountArgs {
    fn serialize<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        AnchorSerialize::serialize(&self.amount, writer)
    }
}

/// Argument pair shared by `execute_buyback(usdc_amount, min_tokens_out)` and
/// `add_liquidity(usdc_amount, token_amount)`.
struct AmountPairArgs(u64, u64);

impl AnchorSerialize for AmountPairArgs {
    fn serialize<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        AnchorSerialize::serialize(&self.0, writer)?;
        AnchorSerialize::serialize(&self.1, writer)
    }
}

/// Optional fields for `update_config`; `None` leaves a value untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConfigUpdate {
    pub max_usdc_per_cycle: Option<u64>,
    pub cooldown_seconds: Option<i64>,
    pub slippage_bps: Option<u16>,
}

impl AnchorSerialize for ConfigUpdate {
    fn serialize<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        AnchorSerialize::serialize(&self.max_usdc_per_cycle, writer)?;
        AnchorSerialize::serialize(&self.cooldown_seconds, writer)?;
        AnchorSerialize::serialize(&self.slippage_bps, writer)
    }
}

impl ConfigUpdate {
    pub fn is_empty(&self) -> bool {
        self.max_usdc_per_cycle.is_none()
            && self.cooldown_seconds.is_none()
            && self.slippage_bps.is_none()
    }
}

/// Every account the keeper's instructions touch.
#[derive(Debug, Clone)]
pub struct TreasuryAccounts {
    pub program_id: Pubkey,
    pub treasury: Pubkey,
    pub treasury_usdc: Pubkey,
    pub authority: Pubkey,
    pub usdc_mint: Pubkey,
    pub token_mint: Pubkey,
}

impl TreasuryAccounts {
    /// Keeper-owned USDC account buybacks are paid out to.
    pub fn keeper_usdc(&self) -> Pubkey {
        get_associated_token_address(&self.authority, &self.usdc_mint)
    }

    /// Keeper-owned account holding bought-back tokens.
    pub fn keeper_token(&self) -> Pubkey {
        get_associated_token_address(&self.authority, &self.token_mint)
    }

    fn treasury_meta(&self) -> AccountMeta {
        AccountMeta::new(self.treasury, false)
    }

    fn authority_meta(&self) -> AccountMeta {
        AccountMeta::new_readonly(self.authority, true)
    }

    pub fn record_fee_ix(&self, lamports: u64) -> Instruction {
        Instruction {
            program_id: self.program_id,
            accounts: vec![self.treasury_meta()],
            data: instruction_data("record_fee", &AmountArgs { amount: lamports }),
        }
    }

    pub fn record_usdc_conversion_ix(&self, usdc_amount: u64) -> Instruction {
        Instruction {
            program_id: self.program_id,
            accounts: vec![self.treasury_meta(), self.authority_meta()],
            data: instruction_data("record_usdc_conversion", &AmountArgs { amount: usdc_amount }),
        }
    }

    pub fn execute_buyback_ix(&self, usdc_amount: u64, min_tokens_out: u64) -> Instruction {
        Instruction {
            program_id: self.program_id,
            accounts: vec![
                self.treasury_meta(),
                AccountMeta::new(self.treasury_usdc, false),
                AccountMeta::new(self.keeper_usdc(), false),
                self.authority_meta(),
                AccountMeta::new_readonly(spl_token::ID, false),
            ],
            data: instruction_data(
                "execute_buyback",
                &AmountPairArgs(usdc_amount, min_tokens_out),
            ),
        }
    }

    pub fn add_liquidity_ix(
        &self,
        pool_usdc: &Pubkey,
        usdc_amount: u64,
        token_amount: u64,
    ) -> Instruction {
        Instruction {
            program_id: self.program_id,
            accounts: vec![
                self.treasury_meta(),
                AccountMeta::new(self.treasury_usdc, false),
                AccountMeta::new(*pool_usdc, false),
                self.authority_meta(),
                AccountMeta::new_readonly(spl_token::ID, false),
            ],
            data: instruction_data(
                "add_liquidity",
                &AmountPairArgs(usdc_amount, token_amount),
            ),
        }
    }

    pub fn emergency_pause_ix(&self) -> Instruction {
        Instruction {
            program_id: self.program_id,
            accounts: vec![self.treasury_meta(), self.authority_meta()],
            data: instruction_discriminator("emergency_pause").to_vec(),
        }
    }

    pub fn resume_ix(&self) -> Instruction {
        Instruction {
            program_id: self.program_id,
            accounts: vec![self.treasury_meta(), self.authority_meta()],
            data: instruction_discriminator("resume").to_vec(),
        }
    }

    pub fn update_config_ix(&self, update: &ConfigUpdate) -> Instruction {
        Instruction {
            program_id: self.program_id,
            accounts: vec![self.treasury_meta(), self.authority_meta()],
            data: instruction_data("update_config", update),
        }
    }

    pub fn burn_ix(&self, amount: u64) -> KeeperResult<Instruction> {
        spl_token::instruction::burn(
            &spl_token::ID,
            &self.keeper_token(),
            &self.token_mint,
            &self.authority,
            &[],
            amount,
        )
        .map_err(|e| KeeperError::Execution(format!("burn instruction: {}", e)))
    }
}

/// Reference to a confirmed ledger submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Submission {
    pub signature: String,
}

/// State-mutating operations against the treasury. Each call is sent once;
/// a submission whose outcome is unknown is reported, never retried.
#[async_trait]
pub trait LedgerWriter: Send + Sync {
    async fn record_fee(&self, lamports: u64) -> KeeperResult<Submission>;
    async fn record_usdc_conversion(&self, usdc_amount: u64) -> KeeperResult<Submission>;
    async fn record_buyback(&self, usdc_amount: u64, min_tokens_out: u64)
        -> KeeperResult<Submission>;
    async fn emergency_pause(&self) -> KeeperResult<Submission>;
    async fn resume(&self) -> KeeperResult<Submission>;
    async fn update_config(&self, update: ConfigUpdate) -> KeeperResult<Submission>;
    async fn burn_tokens(&self, amount: u64) -> KeeperResult<Submission>;
}

/// USDCBALL treasury program client: signs with the keeper wallet and submits
/// through the shared RPC client.
pub struct TreasuryProgram {
    rpc: Arc<RpcClient>,
    payer: Arc<Keypair>,
    accounts: TreasuryAccounts,
    commitment: CommitmentConfig,
    send_timeout: Duration,
    confirm_timeout: Duration,
}

impl TreasuryProgram {
    pub fn new(
        rpc: Arc<RpcClient>,
        payer: Arc<Keypair>,
        accounts: TreasuryAccounts,
        commitment: CommitmentConfig,
        send_timeout: Duration,
        confirm_timeout: Duration,
    ) -> Self {
        Self { rpc, payer, accounts, commitment, send_timeout, confirm_timeout }
    }

    pub fn accounts(&self) -> &TreasuryAccounts {
        &self.accounts
    }

    /// Sign, send, and wait (bounded) for confirmation of one instruction.
    pub async fn submit(&self, label: &'static str, ix: Instruction) -> KeeperResult<Submission> {
        let blockhash = match timeout(self.send_timeout, self.rpc.get_latest_blockhash()).await {
            Ok(result) => result?,
            Err(_) => return Err(KeeperError::Timeout("blockhash fetch", self.send_timeout.as_secs())),
        };
        let tx = Transaction::new_signed_with_payer(
            &[ix],
            Some(&self.payer.pubkey()),
            &[self.payer.as_ref()],
            blockhash,
        );
        let signature = tx.signatures[0];

        match timeout(self.send_timeout, self.rpc.send_transaction(&tx)).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => {
                return Err(KeeperError::Execution(format!("{} rejected: {}", label, e)));
            }
            Err(_) => {
                // The send may or may not have reached the cluster; only the
                // signature status can tell.
                warn!(%signature, label, "Send timed out, checking signature status");
            }
        }

        info!(%signature, label, "Submitted treasury instruction");
        confirm_signature(&self.rpc, &signature, self.commitment, self.confirm_timeout).await?;
        info!(%signature, label, "Treasury instruction confirmed");
        Ok(Submission { signature: signature.to_string() })
    }
}

/// Poll the signature status until it lands, fails, or the bound elapses.
/// The status is always checked once more after the deadline.
pub(crate) async fn confirm_signature(
    rpc: &RpcClient,
    signature: &Signature,
    commitment: CommitmentConfig,
    bound: Duration,
) -> KeeperResult<()> {
    let deadline = Instant::now() + bound;
    loop {
        match rpc.get_signature_status_with_commitment(signature, commitment).await {
            Ok(Some(Ok(()))) => return Ok(()),
            Ok(Some(Err(tx_err))) => {
                return Err(KeeperError::Execution(format!(
                    "{} failed on-chain: {}",
                    signature, tx_err
                )));
            }
            Ok(None) => {}
            Err(e) => warn!(%signature, "Signature status lookup failed: {}", e),
        }
        if Instant::now() >= deadline {
            error!(%signature, "Confirmation not observed in time, treating as failed");
            return Err(KeeperError::ExecutionUnconfirmed {
                signature: signature.to_string(),
                timeout_secs: bound.as_secs(),
            });
        }
        sleep(CONFIRM_POLL_INTERVAL).await;
    }
}

#[async_trait]
impl LedgerWriter for TreasuryProgram {
    async fn record_fee(&self, lamports: u64) -> KeeperResult<Submission> {
        self.submit("record_fee", self.accounts.record_fee_ix(lamports)).await
    }

    async fn record_usdc_conversion(&self, usdc_amount: u64) -> KeeperResult<Submission> {
        self.submit(
            "record_usdc_conversion",
            self.accounts.record_usdc_conversion_ix(usdc_amount),
        )
        .await
    }

    async fn record_buyback(
        &self,
        usdc_amount: u64,
        min_tokens_out: u64,
    ) -> KeeperResult<Submission> {
        self.submit(
            "execute_buyback",
            self.accounts.execute_buyback_ix(usdc_amount, min_tokens_out),
        )
        .await
    }

    async fn emergency_pause(&self) -> KeeperResult<Submission> {
        self.submit("emergency_pause", self.accounts.emergency_pause_ix()).await
    }

    async fn resume(&self) -> KeeperResult<Submission> {
        self.submit("resume", self.accounts.resume_ix()).await
    }

    async fn update_config(&self, update: ConfigUpdate) -> KeeperResult<Submission> {
        if update.is_empty() {
            return Err(KeeperError::ConfigInvalid("update_config with no changes".to_string()));
        }
        self.submit("update_config", self.accounts.update_config_ix(&update)).await
    }

    async fn burn_tokens(&self, amount: u64) -> KeeperResult<Submission> {
        let ix = self.accounts.burn_ix(amount)?;
        self.submit("burn", ix).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn accounts() -> TreasuryAccounts {
        let program_id = Pubkey::new_unique();
        TreasuryAccounts {
            program_id,
            treasury: treasury_address(&program_id),
            treasury_usdc: Pubkey::new_unique(),
            authority: Pubkey::new_unique(),
            usdc_mint: Pubkey::new_unique(),
            token_mint: Pubkey::new_unique(),
        }
    }

    #[test]
    fn discriminators_are_distinct_and_stable() {
        let names = [
            "record_fee",
            "record_usdc_conversion",
            "execute_buyback",
            "add_liquidity",
            "emergency_pause",
            "resume",
            "update_config",
        ];
        let discs: Vec<[u8; 8]> = names.iter().map(|n| instruction_discriminator(n)).collect();
        for (i, a) in discs.iter().enumerate() {
            for b in &discs[i + 1..] {
                assert_ne!(a, b);
            }
        }
        assert_eq!(instruction_discriminator("resume"), instruction_discriminator("resume"));
    }

    #[test]
    fn buyback_instruction_layout() {
        let accounts = accounts();
        let ix = accounts.execute_buyback_ix(500, 1_234);

        assert_eq!(ix.program_id, accounts.program_id);
        assert_eq!(&ix.data[..8], &instruction_discriminator("execute_buyback"));
        assert_eq!(&ix.data[8..16], &500u64.to_le_bytes());
        assert_eq!(&ix.data[16..24], &1_234u64.to_le_bytes());
        assert_eq!(ix.data.len(), 24);

        assert_eq!(ix.accounts[0].pubkey, accounts.treasury);
        assert!(ix.accounts[0].is_writable);
        assert_eq!(ix.accounts[2].pubkey, accounts.keeper_usdc());
        assert!(ix.accounts[3].is_signer);
        assert_eq!(ix.accounts[4].pubkey, spl_token::ID);
    }

    #[test]
    fn update_config_encodes_options() {
        let accounts = accounts();
        let ix = accounts.update_config_ix(&ConfigUpdate {
            max_usdc_per_cycle: None,
            cooldown_seconds: Some(600),
            slippage_bps: None,
        });
        let body = &ix.data[8..];
        assert_eq!(body[0], 0);
        assert_eq!(body[1], 1);
        assert_eq!(&body[2..10], &600i64.to_le_bytes());
        assert_eq!(body[10], 0);
        assert_eq!(body.len(), 11);
    }

    #[test]
    fn liquidity_and_fee_arguments_are_little_endian() {
        let accounts = accounts();
        let pool_usdc = Pubkey::new_unique();
        let ix = accounts.add_liquidity_ix(&pool_usdc, 300, 900);
        assert_eq!(&ix.data[..8], &instruction_discriminator("add_liquidity"));
        assert_eq!(&ix.data[8..16], &300u64.to_le_bytes());
        assert_eq!(&ix.data[16..24], &900u64.to_le_bytes());
        assert_eq!(ix.accounts[2].pubkey, pool_usdc);

        let ix = accounts.record_usdc_conversion_ix(4_200);
        assert_eq!(&ix.data[8..], &4_200u64.to_le_bytes());
    }

    #[test]
    fn record_fee_needs_no_signer() {
        let accounts = accounts();
        let ix = accounts.record_fee_ix(77);
        assert_eq!(ix.accounts.len(), 1);
        assert!(!ix.accounts[0].is_signer);

        let pause = accounts.emergency_pause_ix();
        assert_eq!(pause.data.len(), 8);
        assert!(pause.accounts[1].is_signer);
    }

    #[test]
    fn burn_targets_keeper_token_account() {
        let accounts = accounts();
        let ix = accounts.burn_ix(10).unwrap();
        assert_eq!(ix.program_id, spl_token::ID);
        assert_eq!(ix.accounts[0].pubkey, accounts.keeper_token());
        assert_eq!(ix.accounts[1].pubkey, accounts.token_mint);
    }

    #[test]
    fn empty_config_update() {
        assert!(ConfigUpdate::default().is_empty());
        assert!(!ConfigUpdate { slippage_bps: Some(50), ..Default::default() }.is_empty());
    }
}
