//! One-shot operator commands. With no arguments the keeper loop runs.

use anyhow::{Result, bail};
use chrono::Utc;
use serde_json::json;
use tracing::info;

use crate::config::Config;
use crate::keeper::EffectiveLimits;
use crate::keeper::allocation::{AllocationRatios, OperationCategory, budget_for, clamp_spend};
use crate::onchain_instance::{ConfigUpdate, LedgerReader, LedgerWriter};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Run,
    Status,
    Pause,
    Resume,
    RecordFee { lamports: u64 },
    UpdateConfig(ConfigUpdate),
}

const USAGE: &str = "usage: usdcball-keeper [run | status | pause | resume | record-fee <lamports> | update-config <max|-> <cooldown-secs|-> <slippage-bps|->]";

impl Command {
    /// Parse the arguments after the program name.
    pub fn parse<I, S>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let args: Vec<String> = args.into_iter().map(|a| a.as_ref().to_string()).collect();
        let argv: Vec<&str> = args.iter().map(String::as_str).collect();

        let command = match argv.as_slice() {
            [] | ["run"] => Command::Run,
            ["status"] => Command::Status,
            ["pause"] => Command::Pause,
            ["resume"] => Command::Resume,
            ["record-fee", lamports] => Command::RecordFee { lamports: parse_arg("lamports", lamports)? },
            ["update-config", max, cooldown, slippage] => {
                let update = ConfigUpdate {
                    max_usdc_per_cycle: parse_optional("max", max)?,
                    cooldown_seconds: parse_optional("cooldown", cooldown)?,
                    slippage_bps: parse_optional("slippage", slippage)?,
                };
                if update.is_empty() {
                    bail!("update-config needs at least one value\n{}", USAGE);
                }
                Command::UpdateConfig(update)
            }
            _ => bail!("unrecognized arguments {:?}\n{}", argv, USAGE),
        };
        Ok(command)
    }

    pub fn is_mutating(&self) -> bool {
        !matches!(self, Command::Run | Command::Status)
    }
}

fn parse_arg<T: std::str::FromStr>(name: &str, raw: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    raw.parse::<T>()
        .map_err(|e| anyhow::anyhow!("invalid {} '{}': {}", name, raw, e))
}

fn parse_optional<T: std::str::FromStr>(name: &str, raw: &str) -> Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    if raw == "-" { Ok(None) } else { parse_arg(name, raw).map(Some) }
}

/// Print one snapshot with the budgets the next cycle would work from.
pub async fn status(config: &Config, reader: &dyn LedgerReader) -> Result<serde_json::Value> {
    let state = reader.fetch().await?;
    let limits = EffectiveLimits::resolve(&state, &config.limits);
    let ratios = AllocationRatios::from_state(&state);
    let now = Utc::now().timestamp();

    let budgets: serde_json::Map<String, serde_json::Value> = [OperationCategory::Buyback, OperationCategory::Liquidity]
        .into_iter()
        .map(|category| {
            let budget = budget_for(category, &state, &ratios);
            let amount = clamp_spend(budget, state.usdc_balance, limits.max_usdc_per_cycle);
            (category.to_string(), json!({ "budget": budget, "next_spend": amount }))
        })
        .collect();

    let mode = if config.mode.is_simulated() { "dry_run" } else { "live" };
    let invariant_ok = state.check_allocation_invariant().is_ok();
    let cooldown_remaining = state.cooldown_remaining(now, limits.cooldown_seconds);

    Ok(json!({
        "mode": mode,
        "state": state,
        "allocation_invariant_ok": invariant_ok,
        "cooldown_remaining_secs": cooldown_remaining,
        "effective_limits": {
            "max_usdc_per_cycle": limits.max_usdc_per_cycle,
            "slippage_bps": limits.slippage_bps,
            "cooldown_seconds": limits.cooldown_seconds,
        },
        "budgets": budgets,
    }))
}

/// Submit one administrative instruction and return its signature.
pub async fn execute(command: Command, ledger: &dyn LedgerWriter) -> Result<String> {
    let submission = match command {
        Command::Pause => ledger.emergency_pause().await?,
        Command::Resume => ledger.resume().await?,
        Command::RecordFee { lamports } => ledger.record_fee(lamports).await?,
        Command::UpdateConfig(update) => ledger.update_config(update).await?,
        Command::Run | Command::Status => bail!("{:?} does not submit a transaction", command),
    };
    info!(signature = %submission.signature, "✅ Transaction confirmed");
    Ok(submission.signature)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keeper::test_support::{FakeLedger, FakeReader};
    use crate::onchain_instance::treasury_state::sample_state;
    use std::collections::HashMap;

    #[test]
    fn parses_every_command() {
        assert_eq!(Command::parse(Vec::<String>::new()).unwrap(), Command::Run);
        assert_eq!(Command::parse(["run"]).unwrap(), Command::Run);
        assert_eq!(Command::parse(["status"]).unwrap(), Command::Status);
        assert_eq!(Command::parse(["pause"]).unwrap(), Command::Pause);
        assert_eq!(Command::parse(["resume"]).unwrap(), Command::Resume);
        assert_eq!(
            Command::parse(["record-fee", "5000"]).unwrap(),
            Command::RecordFee { lamports: 5_000 }
        );
        assert_eq!(
            Command::parse(["update-config", "-", "600", "50"]).unwrap(),
            Command::UpdateConfig(ConfigUpdate {
                max_usdc_per_cycle: None,
                cooldown_seconds: Some(600),
                slippage_bps: Some(50),
            })
        );
    }

    #[test]
    fn rejects_bad_arguments() {
        assert!(Command::parse(["record-fee"]).is_err());
        assert!(Command::parse(["record-fee", "-1"]).is_err());
        assert!(Command::parse(["update-config", "-", "-", "-"]).is_err());
        assert!(Command::parse(["update-config", "1", "2"]).is_err());
        assert!(Command::parse(["frobnicate"]).is_err());
    }

    #[tokio::test]
    async fn execute_routes_to_ledger() {
        let ledger = FakeLedger::default();
        execute(Command::Pause, &ledger).await.unwrap();
        execute(Command::RecordFee { lamports: 10 }, &ledger).await.unwrap();
        let update = ConfigUpdate { max_usdc_per_cycle: Some(7), cooldown_seconds: None, slippage_bps: None };
        execute(Command::UpdateConfig(update.clone()), &ledger).await.unwrap();

        assert_eq!(ledger.total_calls(), 3);
        assert_eq!(ledger.last_update.lock().clone(), Some(update));
        assert!(execute(Command::Status, &ledger).await.is_err());
    }

    #[tokio::test]
    async fn status_reports_budgets() {
        let mut state = sample_state();
        state.total_usdc_converted = 2_000;
        state.total_buybacks_usdc = 400;
        let reader = FakeReader::new(state);
        let map: HashMap<&str, &str> = [("DRY_RUN", "true")].into_iter().collect();
        let config = Config::from_source(|k| map.get(k).map(|v| v.to_string()), None).unwrap();

        let report = status(&config, &reader).await.unwrap();
        assert_eq!(report["mode"], "dry_run");
        assert_eq!(report["budgets"]["buyback"]["budget"], 600);
        assert_eq!(report["budgets"]["liquidity"]["budget"], 600);
        assert_eq!(report["allocation_invariant_ok"], true);
    }
}
