//! What a dispatched operation or a whole cycle ended up doing.
//!
//! Skips are ordinary outcomes, not errors.

use std::fmt;

use serde::Serialize;

use crate::keeper::allocation::OperationCategory;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Conversion,
    Buyback,
    Liquidity,
    Burn,
}

impl From<OperationCategory> for OperationKind {
    fn from(category: OperationCategory) -> Self {
        match category {
            OperationCategory::Buyback => OperationKind::Buyback,
            OperationCategory::Liquidity => OperationKind::Liquidity,
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OperationKind::Conversion => "conversion",
            OperationKind::Buyback => "buyback",
            OperationKind::Liquidity => "liquidity",
            OperationKind::Burn => "burn",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    SlippageExceeded { price_impact_bps: u16, limit_bps: u16 },
    InsufficientBudget,
    Paused,
    CooldownActive { remaining_secs: i64 },
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::SlippageExceeded { price_impact_bps, limit_bps } => write!(
                f,
                "price impact {} bps exceeds limit {} bps",
                price_impact_bps, limit_bps
            ),
            SkipReason::InsufficientBudget => write!(f, "no spendable budget"),
            SkipReason::Paused => write!(f, "treasury paused"),
            SkipReason::CooldownActive { remaining_secs } => {
                write!(f, "cooldown active, {}s remaining", remaining_secs)
            }
        }
    }
}

/// Settled (or simulated) operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Settlement {
    /// Input amount: lamports for conversions, USDC minor units otherwise.
    pub amount_in: u64,
    pub quoted_out: Option<u64>,
    pub executed_out: u64,
    /// Floor passed to the ledger alongside the record, when applicable.
    pub min_out: Option<u64>,
    pub price_impact_bps: Option<u16>,
    pub reference: String,
    pub simulated: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum OperationOutcome {
    Executed(Settlement),
    Skipped(SkipReason),
}

impl OperationOutcome {
    pub fn settlement(&self) -> Option<&Settlement> {
        match self {
            OperationOutcome::Executed(settlement) => Some(settlement),
            OperationOutcome::Skipped(_) => None,
        }
    }

    /// True when something changed outside the keeper.
    pub fn mutated_ledger(&self) -> bool {
        self.settlement().is_some_and(|s| !s.simulated)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DispatchTally {
    pub executed: u32,
    pub skipped: u32,
    pub failed: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CycleOutcome {
    Paused,
    CooldownActive { remaining_secs: i64 },
    InvalidLedgerConfig { reason: String },
    Completed(DispatchTally),
    Failed { error: String },
}

impl CycleOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            CycleOutcome::Paused => "paused",
            CycleOutcome::CooldownActive { .. } => "cooldown_active",
            CycleOutcome::InvalidLedgerConfig { .. } => "invalid_ledger_config",
            CycleOutcome::Completed(_) => "completed",
            CycleOutcome::Failed { .. } => "failed",
        }
    }
}
