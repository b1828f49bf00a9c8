//! Configuration module for environment variables and keeper settings
//!
//! Values come from an optional JSON file (`KEEPER_CONFIG_PATH`, camelCase
//! `dryRun/allocations/limits/monitoring` block) with environment variables
//! layered on top. Validation happens separately in [`Config::validate`] so a
//! bad allocation split is reported as `ConfigInvalid` before the loop starts.

use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use anchor_client::Cluster;
use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use solana_sdk::{commitment_config::CommitmentConfig, pubkey::Pubkey};

use crate::error::{KeeperError, KeeperResult};

/// Allowed distance of the allocation sum from 1.0.
pub const ALLOCATION_TOLERANCE: f64 = 0.001;

/// Highest slippage the treasury program accepts (10%).
pub const MAX_SLIPPAGE_BPS: u16 = 1_000;

pub const DEFAULT_USDC_MINT: &str = "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v";
pub const DEFAULT_JUPITER_API_URL: &str = "https://quote-api.jup.ag/v6";

/// Whether mutating calls go out to the collaborators or are simulated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    Live,
    DryRun,
}

impl ExecutionMode {
    pub fn is_simulated(self) -> bool {
        matches!(self, ExecutionMode::DryRun)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct Allocations {
    pub buyback: f64,
    pub liquidity: f64,
    pub reserve: f64,
}

impl Default for Allocations {
    fn default() -> Self {
        Self { buyback: 0.5, liquidity: 0.3, reserve: 0.2 }
    }
}

impl Allocations {
    pub fn validate(&self) -> KeeperResult<()> {
        for (name, value) in [
            ("buyback", self.buyback),
            ("liquidity", self.liquidity),
            ("reserve", self.reserve),
        ] {
            if !value.is_finite() || !(0.0..=1.0).contains(&value) {
                return Err(KeeperError::ConfigInvalid(format!(
                    "allocations.{} must be within [0, 1], got {}",
                    name, value
                )));
            }
        }
        let sum = self.buyback + self.liquidity + self.reserve;
        if (sum - 1.0).abs() > ALLOCATION_TOLERANCE {
            return Err(KeeperError::ConfigInvalid(format!(
                "allocations sum to {:.6}, expected 1.0 (tolerance {})",
                sum, ALLOCATION_TOLERANCE
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Limits {
    /// Per-operation cap in USDC minor units.
    pub max_usdc_per_cycle: u64,
    pub cooldown_minutes: u64,
    pub slippage_bps: u16,
    /// Native balance (lamports) at which fees get converted to USDC.
    pub min_sol_to_swap: u64,
    /// Lamports left behind in the fee vault for transaction fees.
    pub sol_fee_reserve: u64,
    pub burn_after_buyback: bool,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_usdc_per_cycle: 1_000_000_000,
            cooldown_minutes: 60,
            slippage_bps: 100,
            min_sol_to_swap: 1_000_000_000,
            sol_fee_reserve: 50_000_000,
            burn_after_buyback: false,
        }
    }
}

impl Limits {
    pub fn cooldown_seconds(&self) -> i64 {
        (self.cooldown_minutes as i64).saturating_mul(60)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Monitoring {
    pub check_interval_seconds: u64,
}

impl Default for Monitoring {
    fn default() -> Self {
        Self { check_interval_seconds: 300 }
    }
}

/// Base58 keypair. Debug output never includes the key material.
#[derive(Clone)]
pub struct PrivateKey(String);

impl PrivateKey {
    pub fn new(key: String) -> Self {
        Self(key)
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PrivateKey(<redacted>)")
    }
}

#[derive(Debug, Clone)]
pub struct SolanaConfig {
    pub cluster: Cluster,
    pub commitment: CommitmentConfig,
    /// Treasury program; required outside dry-run mode.
    pub program_id: Option<Pubkey>,
    pub usdc_mint: Pubkey,
    pub token_mint: Option<Pubkey>,
    pub treasury_usdc_account: Option<Pubkey>,
    pub fee_vault: Option<Pubkey>,
    pub pool_usdc_account: Option<Pubkey>,
    pub pool_token_account: Option<Pubkey>,
    pub private_key: Option<PrivateKey>,
    pub rpc_timeout: Duration,
    pub confirm_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub mode: ExecutionMode,
    pub allocations: Allocations,
    pub limits: Limits,
    pub monitoring: Monitoring,
    pub solana: SolanaConfig,
    /// Jupiter API base URL
    pub jupiter_api_url: String,
    /// Health server port; the server is off when unset.
    pub http_port: Option<u16>,
}

/// Shape of the optional JSON config file.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileConfig {
    dry_run: Option<bool>,
    allocations: Option<Allocations>,
    limits: Option<FileLimits>,
    monitoring: Option<FileMonitoring>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileLimits {
    max_usdc_per_cycle: Option<u64>,
    cooldown_minutes: Option<u64>,
    slippage_bps: Option<u16>,
    min_sol_to_swap: Option<u64>,
    sol_fee_reserve: Option<u64>,
    burn_after_buyback: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileMonitoring {
    check_interval_seconds: Option<u64>,
}

impl Config {
    /// Load configuration from the process environment (and the config file it
    /// points at).
    pub fn from_env() -> Result<Self> {
        let file = match env::var("KEEPER_CONFIG_PATH") {
            Ok(path) => {
                let raw = std::fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read config file {}", path))?;
                Some(raw)
            }
            Err(_) => None,
        };
        Self::from_source(|key| env::var(key).ok(), file.as_deref())
    }

    /// Build from an arbitrary key lookup plus optional JSON file contents.
    pub fn from_source<F>(lookup: F, file_json: Option<&str>) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let file: FileConfig = match file_json {
            Some(raw) => serde_json::from_str(raw).context("Failed to parse config file")?,
            None => FileConfig::default(),
        };
        let file_limits = file.limits.unwrap_or_default();
        let defaults = Limits::default();

        let dry_run = parse_var(&lookup, "DRY_RUN")?
            .or(file.dry_run)
            .unwrap_or(false);

        let mut allocations = file.allocations.unwrap_or_default();
        if let Some(v) = parse_var(&lookup, "ALLOCATION_BUYBACK")? {
            allocations.buyback = v;
        }
        if let Some(v) = parse_var(&lookup, "ALLOCATION_LIQUIDITY")? {
            allocations.liquidity = v;
        }
        if let Some(v) = parse_var(&lookup, "ALLOCATION_RESERVE")? {
            allocations.reserve = v;
        }

        let limits = Limits {
            max_usdc_per_cycle: parse_var(&lookup, "MAX_USDC_PER_CYCLE")?
                .or(file_limits.max_usdc_per_cycle)
                .unwrap_or(defaults.max_usdc_per_cycle),
            cooldown_minutes: parse_var(&lookup, "COOLDOWN_MINUTES")?
                .or(file_limits.cooldown_minutes)
                .unwrap_or(defaults.cooldown_minutes),
            slippage_bps: parse_var(&lookup, "SLIPPAGE_BPS")?
                .or(file_limits.slippage_bps)
                .unwrap_or(defaults.slippage_bps),
            min_sol_to_swap: parse_var(&lookup, "MIN_SOL_TO_SWAP")?
                .or(file_limits.min_sol_to_swap)
                .unwrap_or(defaults.min_sol_to_swap),
            sol_fee_reserve: parse_var(&lookup, "SOL_FEE_RESERVE")?
                .or(file_limits.sol_fee_reserve)
                .unwrap_or(defaults.sol_fee_reserve),
            burn_after_buyback: parse_var(&lookup, "BURN_AFTER_BUYBACK")?
                .or(file_limits.burn_after_buyback)
                .unwrap_or(defaults.burn_after_buyback),
        };

        let monitoring = Monitoring {
            check_interval_seconds: parse_var(&lookup, "CHECK_INTERVAL_SECONDS")?
                .or(file.monitoring.and_then(|m| m.check_interval_seconds))
                .unwrap_or(Monitoring::default().check_interval_seconds),
        };

        let cluster = match lookup("SOLANA_CLUSTER") {
            Some(raw) => Cluster::from_str(&raw)
                .map_err(|e| anyhow!("Invalid SOLANA_CLUSTER '{}': {}", raw, e))?,
            None => Cluster::Devnet,
        };

        let commitment = match lookup("RPC_COMMITMENT").as_deref() {
            None | Some("confirmed") => CommitmentConfig::confirmed(),
            Some("finalized") => CommitmentConfig::finalized(),
            Some(other) => {
                return Err(anyhow!(
                    "RPC_COMMITMENT must be 'confirmed' or 'finalized', got '{}'",
                    other
                ));
            }
        };

        let solana = SolanaConfig {
            cluster,
            commitment,
            program_id: parse_pubkey(&lookup, "TREASURY_PROGRAM_ID")?,
            usdc_mint: parse_pubkey(&lookup, "USDC_MINT")?
                .map_or_else(|| Pubkey::from_str(DEFAULT_USDC_MINT), Ok)
                .context("Invalid default USDC mint")?,
            token_mint: parse_pubkey(&lookup, "TOKEN_MINT")?,
            treasury_usdc_account: parse_pubkey(&lookup, "TREASURY_USDC_ACCOUNT")?,
            fee_vault: parse_pubkey(&lookup, "FEE_VAULT")?,
            pool_usdc_account: parse_pubkey(&lookup, "POOL_USDC_ACCOUNT")?,
            pool_token_account: parse_pubkey(&lookup, "POOL_TOKEN_ACCOUNT")?,
            private_key: lookup("KEEPER_PRIVATE_KEY")
                .filter(|k| !k.trim().is_empty())
                .map(PrivateKey),
            rpc_timeout: Duration::from_secs(
                parse_var(&lookup, "RPC_TIMEOUT_SECONDS")?.unwrap_or(15),
            ),
            confirm_timeout: Duration::from_secs(
                parse_var(&lookup, "CONFIRM_TIMEOUT_SECONDS")?.unwrap_or(60),
            ),
        };

        let jupiter_api_url = lookup("JUPITER_API_URL")
            .unwrap_or_else(|| DEFAULT_JUPITER_API_URL.to_string());
        url::Url::parse(&jupiter_api_url)
            .with_context(|| format!("Invalid JUPITER_API_URL '{}'", jupiter_api_url))?;

        Ok(Self {
            mode: if dry_run { ExecutionMode::DryRun } else { ExecutionMode::Live },
            allocations,
            limits,
            monitoring,
            solana,
            jupiter_api_url: jupiter_api_url.trim_end_matches('/').to_string(),
            http_port: parse_var(&lookup, "KEEPER_HTTP_PORT")?,
        })
    }

    /// Startup checks. Anything returned here is fatal.
    pub fn validate(&self) -> KeeperResult<()> {
        self.allocations.validate()?;

        if self.limits.slippage_bps > MAX_SLIPPAGE_BPS {
            return Err(KeeperError::ConfigInvalid(format!(
                "limits.slippageBps {} exceeds the treasury maximum of {}",
                self.limits.slippage_bps, MAX_SLIPPAGE_BPS
            )));
        }
        if self.monitoring.check_interval_seconds == 0 {
            return Err(KeeperError::ConfigInvalid(
                "monitoring.checkIntervalSeconds must be positive".to_string(),
            ));
        }

        if self.mode == ExecutionMode::Live {
            if self.solana.private_key.is_none() {
                return Err(KeeperError::MissingCredentials(
                    "KEEPER_PRIVATE_KEY is required outside dry-run mode".to_string(),
                ));
            }
            for (name, value) in [
                ("TREASURY_PROGRAM_ID", self.solana.program_id),
                ("TOKEN_MINT", self.solana.token_mint),
                ("POOL_USDC_ACCOUNT", self.solana.pool_usdc_account),
                ("POOL_TOKEN_ACCOUNT", self.solana.pool_token_account),
            ] {
                if value.is_none() {
                    return Err(KeeperError::ConfigInvalid(format!(
                        "{} is required outside dry-run mode",
                        name
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.monitoring.check_interval_seconds)
    }
}

fn parse_var<F, T>(lookup: &F, key: &str) -> Result<Option<T>>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: fmt::Display,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| anyhow!("Invalid value for {}: '{}' ({})", key, raw, e)),
        _ => Ok(None),
    }
}

fn parse_pubkey<F>(lookup: &F, key: &str) -> Result<Option<Pubkey>>
where
    F: Fn(&str) -> Option<String>,
{
    parse_var(lookup, key)
}
