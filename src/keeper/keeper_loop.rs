//! The keeper's control loop.
//!
//! One cycle: read the treasury, convert accumulated SOL fees to USDC, gate on
//! cooldown, then dispatch buyback and liquidity against their remaining
//! allocation budgets. Cycles run sequentially on a single task and are
//! separated by an interruptible sleep.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use solana_sdk::pubkey::Pubkey;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{Allocations, Config, ExecutionMode, Limits};
use crate::error::{KeeperError, KeeperResult};
use crate::keeper::allocation::{
    budget_for, clamp_spend, reconcile, AllocationRatios, OperationCategory,
};
use crate::keeper::buyback::{settlement, BuybackExecutor};
use crate::keeper::liquidity::LiquidityManager;
use crate::keeper::observer::{CycleRecord, Observer, OperationRecord};
use crate::keeper::outcome::{
    CycleOutcome, DispatchTally, OperationKind, OperationOutcome, Settlement, SkipReason,
};
use crate::onchain_instance::{LedgerReader, LedgerWriter, StateSource, TreasuryState};
use crate::services::{LiquidityPool, SwapProvider, SwapResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeeperPhase {
    Idle,
    Polling,
    Converting,
    Gated,
    Dispatching,
    Sleeping,
    Stopped,
}

impl fmt::Display for KeeperPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            KeeperPhase::Idle => "idle",
            KeeperPhase::Polling => "polling",
            KeeperPhase::Converting => "converting",
            KeeperPhase::Gated => "gated",
            KeeperPhase::Dispatching => "dispatching",
            KeeperPhase::Sleeping => "sleeping",
            KeeperPhase::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Keeper-local settings, fixed for the lifetime of the loop.
#[derive(Debug, Clone)]
pub struct KeeperSettings {
    pub mode: ExecutionMode,
    pub usdc_mint: Pubkey,
    pub token_mint: Pubkey,
    /// Treasury-owned USDC account conversions settle into.
    pub treasury_usdc: Pubkey,
    pub limits: Limits,
    pub check_interval: Duration,
}

impl KeeperSettings {
    pub fn from_config(config: &Config, treasury_usdc: Pubkey) -> Self {
        let token_mint = config.solana.token_mint.unwrap_or_else(|| {
            warn!("TOKEN_MINT not set, buyback quotes will fail");
            Pubkey::default()
        });
        Self {
            mode: config.mode,
            usdc_mint: config.solana.usdc_mint,
            token_mint,
            treasury_usdc,
            limits: config.limits.clone(),
            check_interval: config.check_interval(),
        }
    }
}

/// Limits in force for one cycle. Where the ledger and the local config both
/// define a limit, the stricter one wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EffectiveLimits {
    pub max_usdc_per_cycle: u64,
    pub slippage_bps: u16,
    pub cooldown_seconds: i64,
}

impl EffectiveLimits {
    pub fn resolve(state: &TreasuryState, local: &Limits) -> Self {
        Self {
            max_usdc_per_cycle: state.max_usdc_per_cycle.min(local.max_usdc_per_cycle),
            slippage_bps: state.slippage_bps.min(local.slippage_bps),
            cooldown_seconds: state.cooldown_seconds.max(local.cooldown_seconds()),
        }
    }
}

/// Stop signal for [`Keeper::run`]. Dropping it also stops the loop.
pub struct Shutdown {
    tx: watch::Sender<bool>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx }
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }

    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

pub struct Keeper {
    settings: KeeperSettings,
    reader: Arc<dyn LedgerReader>,
    ledger: Arc<dyn LedgerWriter>,
    swap: Arc<dyn SwapProvider>,
    buyback: BuybackExecutor,
    liquidity: LiquidityManager,
    observer: Arc<Observer>,
    phase: KeeperPhase,
    cycle_index: u64,
}

impl Keeper {
    pub fn new(
        settings: KeeperSettings,
        reader: Arc<dyn LedgerReader>,
        ledger: Arc<dyn LedgerWriter>,
        swap: Arc<dyn SwapProvider>,
        pool: Arc<dyn LiquidityPool>,
        observer: Arc<Observer>,
    ) -> Self {
        let buyback = BuybackExecutor::new(
            swap.clone(),
            ledger.clone(),
            settings.usdc_mint,
            settings.token_mint,
            settings.mode,
        );
        let liquidity = LiquidityManager::new(pool, settings.mode);
        Self {
            settings,
            reader,
            ledger,
            swap,
            buyback,
            liquidity,
            observer,
            phase: KeeperPhase::Idle,
            cycle_index: 0,
        }
    }

    pub fn phase(&self) -> KeeperPhase {
        self.phase
    }

    fn simulated(&self) -> bool {
        self.settings.mode.is_simulated()
    }

    /// Cross-check local allocation defaults against the ledger before the
    /// first cycle. Any error here is fatal to startup.
    pub async fn reconcile_allocations(&self, local: &Allocations) -> KeeperResult<AllocationRatios> {
        let state = self.reader.fetch().await?;
        let ratios = reconcile(local, &state)?;
        info!(
            buyback_bps = ratios.buyback_bps,
            liquidity_bps = ratios.liquidity_bps,
            reserve_bps = ratios.reserve_bps,
            synthetic = state.is_synthetic(),
            "Allocations reconciled with ledger"
        );
        Ok(ratios)
    }

    /// [`reconcile_allocations`](Self::reconcile_allocations), retrying
    /// transient read failures every check interval. Other errors are returned.
    pub async fn reconcile_on_startup(&self, local: &Allocations) -> KeeperResult<AllocationRatios> {
        loop {
            match self.reconcile_allocations(local).await {
                Err(e) if e.is_transient() => {
                    warn!(
                        retry_in_secs = self.settings.check_interval.as_secs(),
                        "Ledger not reachable for startup reconciliation: {}", e
                    );
                    tokio::time::sleep(self.settings.check_interval).await;
                }
                result => return result,
            }
        }
    }

    /// Run cycles until `shutdown` fires or its sender is dropped.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            mode = ?self.settings.mode,
            interval_secs = self.settings.check_interval.as_secs(),
            "🔁 Keeper loop started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }
            self.run_cycle().await;

            self.phase = KeeperPhase::Sleeping;
            let stop = tokio::select! {
                _ = tokio::time::sleep(self.settings.check_interval) => false,
                signal = shutdown.wait_for(|stop| *stop) => {
                    if signal.is_err() {
                        warn!("Shutdown handle dropped, stopping keeper");
                    }
                    true
                }
            };
            if stop {
                break;
            }
            self.phase = KeeperPhase::Idle;
        }

        self.phase = KeeperPhase::Stopped;
        info!(cycles = self.cycle_index, "Keeper loop stopped");
    }

    /// Run one cycle and record it. Errors end the cycle, never the loop.
    pub async fn run_cycle(&mut self) -> CycleOutcome {
        let cycle_id = Uuid::new_v4();
        let started = Instant::now();
        let index = self.cycle_index;
        self.cycle_index += 1;

        let mut source = None;
        let outcome = match self.cycle(cycle_id, index, &mut source).await {
            Ok(outcome) => outcome,
            Err(e) => {
                if e.is_transient() {
                    warn!(cycle_id = %cycle_id, "Transient failure, retrying next cycle: {}", e);
                }
                CycleOutcome::Failed { error: e.to_string() }
            }
        };

        self.observer.cycle(CycleRecord {
            timestamp: Utc::now(),
            cycle_id,
            outcome: outcome.clone(),
            state_source: source,
            duration_ms: started.elapsed().as_millis() as u64,
            simulated: self.simulated(),
        });
        outcome
    }

    async fn cycle(
        &mut self,
        cycle_id: Uuid,
        index: u64,
        source: &mut Option<StateSource>,
    ) -> KeeperResult<CycleOutcome> {
        self.phase = KeeperPhase::Polling;
        let mut state = self.reader.fetch().await?;
        *source = Some(state.source);

        if let Err(e) = state.check_allocation_invariant() {
            warn!(cycle_id = %cycle_id, "Refusing to dispatch: {}", e);
            return Ok(CycleOutcome::InvalidLedgerConfig { reason: e.to_string() });
        }
        if state.paused {
            info!(cycle_id = %cycle_id, "Treasury paused, nothing to do");
            return Ok(CycleOutcome::Paused);
        }

        let mut tally = DispatchTally::default();
        let limits = EffectiveLimits::resolve(&state, &self.settings.limits);

        if self.should_convert(&state) {
            self.phase = KeeperPhase::Converting;
            let amount = state.sol_balance;
            match self.convert(&state, limits.slippage_bps).await {
                Ok(outcome) => {
                    self.tally_and_record(cycle_id, OperationKind::Conversion, amount, &outcome, &mut tally);
                    if outcome.mutated_ledger() {
                        state = self.refresh(source).await?;
                    } else if let Some(settlement) = outcome.settlement() {
                        project(&mut state, OperationKind::Conversion, settlement);
                    }
                }
                Err(e) => self.record_failure(cycle_id, OperationKind::Conversion, amount, &e, &mut tally),
            }
            if state.paused {
                return Ok(CycleOutcome::Completed(tally));
            }
        }

        self.phase = KeeperPhase::Gated;
        let now = Utc::now().timestamp();
        if let Some(remaining_secs) = state.cooldown_remaining(now, limits.cooldown_seconds) {
            debug!(cycle_id = %cycle_id, remaining_secs, "Cooldown active");
            if tally == DispatchTally::default() {
                return Ok(CycleOutcome::CooldownActive { remaining_secs });
            }
            // A conversion already happened this cycle; report it as completed.
            return Ok(CycleOutcome::Completed(tally));
        }

        self.phase = KeeperPhase::Dispatching;
        let order = if index % 2 == 0 {
            [OperationCategory::Buyback, OperationCategory::Liquidity]
        } else {
            [OperationCategory::Liquidity, OperationCategory::Buyback]
        };

        let mut refreshed = false;
        for category in order {
            let kind = OperationKind::from(category);

            // Only a re-read snapshot can have moved into pause or cooldown.
            if refreshed {
                let now = Utc::now().timestamp();
                let reason = if state.paused {
                    Some(SkipReason::Paused)
                } else {
                    state
                        .cooldown_remaining(now, limits.cooldown_seconds)
                        .map(|remaining_secs| SkipReason::CooldownActive { remaining_secs })
                };
                if let Some(reason) = reason {
                    let outcome = OperationOutcome::Skipped(reason);
                    self.tally_and_record(cycle_id, kind, 0, &outcome, &mut tally);
                    continue;
                }
            }

            let ratios = AllocationRatios::from_state(&state);
            let budget = budget_for(category, &state, &ratios);
            let amount = clamp_spend(budget, state.usdc_balance, limits.max_usdc_per_cycle);
            debug!(
                cycle_id = %cycle_id,
                category = %category,
                budget,
                available = state.usdc_balance,
                max_per_cycle = limits.max_usdc_per_cycle,
                amount,
                "Budget computed"
            );
            if amount == 0 {
                let outcome = OperationOutcome::Skipped(SkipReason::InsufficientBudget);
                self.tally_and_record(cycle_id, kind, 0, &outcome, &mut tally);
                continue;
            }

            match self.dispatch(cycle_id, category, amount, limits.slippage_bps).await {
                Ok(outcome) => {
                    self.tally_and_record(cycle_id, kind, amount, &outcome, &mut tally);
                    if outcome.mutated_ledger() {
                        state = self.refresh(source).await?;
                        refreshed = true;
                    } else if let Some(settlement) = outcome.settlement() {
                        project(&mut state, kind, settlement);
                        refreshed = true;
                    }
                }
                Err(e) => self.record_failure(cycle_id, kind, amount, &e, &mut tally),
            }
        }

        Ok(CycleOutcome::Completed(tally))
    }

    fn should_convert(&self, state: &TreasuryState) -> bool {
        state.sol_balance > 0 && state.sol_balance >= self.settings.limits.min_sol_to_swap
    }

    async fn refresh(&self, source: &mut Option<StateSource>) -> KeeperResult<TreasuryState> {
        let state = self.reader.fetch().await?;
        state.check_allocation_invariant()?;
        *source = Some(state.source);
        Ok(state)
    }

    /// Swap the keeper-held fee SOL into the treasury USDC account and record
    /// the conversion.
    async fn convert(&self, state: &TreasuryState, slippage_bps: u16) -> KeeperResult<OperationOutcome> {
        let sol_mint = spl_token::native_mint::id();
        let quote = self
            .swap
            .quote(&sol_mint, &self.settings.usdc_mint, state.sol_balance, slippage_bps)
            .await?;

        if quote.price_impact_bps > slippage_bps {
            warn!(
                lamports = state.sol_balance,
                price_impact_bps = quote.price_impact_bps,
                limit_bps = slippage_bps,
                "Conversion skipped, price impact too high"
            );
            return Ok(OperationOutcome::Skipped(SkipReason::SlippageExceeded {
                price_impact_bps: quote.price_impact_bps,
                limit_bps: slippage_bps,
            }));
        }

        let result = if self.simulated() {
            info!(
                lamports = state.sol_balance,
                quoted_out = quote.out_amount,
                simulated = true,
                "[SIMULATED] Would convert SOL to USDC"
            );
            SwapResult::simulated(&quote)
        } else {
            self.swap
                .execute_swap(&quote, Some(self.settings.treasury_usdc))
                .await?
        };
        let settlement = settlement(&quote, &result, slippage_bps);

        if !settlement.simulated {
            let submission = self
                .ledger
                .record_usdc_conversion(settlement.executed_out)
                .await
                .map_err(|e| unrecorded(&settlement, e))?;
            info!(
                usdc = settlement.executed_out,
                swap = %settlement.reference,
                signature = %submission.signature,
                "💱 Conversion recorded"
            );
        }
        Ok(OperationOutcome::Executed(settlement))
    }

    async fn dispatch(
        &self,
        cycle_id: Uuid,
        category: OperationCategory,
        amount: u64,
        slippage_bps: u16,
    ) -> KeeperResult<OperationOutcome> {
        match category {
            OperationCategory::Buyback => {
                let outcome = self.buyback.execute(amount, slippage_bps).await?;
                if let Some(settlement) = outcome.settlement().filter(|s| !s.simulated) {
                    let submission = self
                        .ledger
                        .record_buyback(settlement.amount_in, settlement.min_out.unwrap_or_default())
                        .await
                        .map_err(|e| unrecorded(settlement, e))?;
                    info!(
                        usdc = settlement.amount_in,
                        tokens = settlement.executed_out,
                        signature = %submission.signature,
                        "🔥 Buyback recorded"
                    );
                }
                if self.settings.limits.burn_after_buyback {
                    if let Some(settlement) = outcome.settlement() {
                        self.burn(cycle_id, settlement.executed_out).await;
                    }
                }
                Ok(outcome)
            }
            OperationCategory::Liquidity => self.liquidity.add_liquidity(amount).await,
        }
    }

    /// Burn failures are recorded but never fail the buyback that preceded them.
    async fn burn(&self, cycle_id: Uuid, tokens: u64) {
        let simulated = self.simulated();
        let record = match self.buyback.burn(tokens).await {
            Ok(outcome) => {
                OperationRecord::from_outcome(cycle_id, OperationKind::Burn, tokens, &outcome, simulated)
            }
            Err(e) => OperationRecord::failed(cycle_id, OperationKind::Burn, tokens, &e.to_string(), simulated),
        };
        self.observer.operation(record);
    }

    fn tally_and_record(
        &self,
        cycle_id: Uuid,
        kind: OperationKind,
        amount: u64,
        outcome: &OperationOutcome,
        tally: &mut DispatchTally,
    ) {
        match outcome {
            OperationOutcome::Executed(_) => tally.executed += 1,
            OperationOutcome::Skipped(_) => tally.skipped += 1,
        }
        self.observer.operation(OperationRecord::from_outcome(
            cycle_id,
            kind,
            amount,
            outcome,
            self.simulated(),
        ));
    }

    fn record_failure(
        &self,
        cycle_id: Uuid,
        kind: OperationKind,
        amount: u64,
        error: &KeeperError,
        tally: &mut DispatchTally,
    ) {
        tally.failed += 1;
        self.observer.operation(OperationRecord::failed(
            cycle_id,
            kind,
            amount,
            &error.to_string(),
            self.simulated(),
        ));
    }
}

/// The swap settled but recording it on the ledger did not succeed. An
/// unconfirmed record keeps its signature: it may still have landed.
fn unrecorded(settlement: &Settlement, error: KeeperError) -> KeeperError {
    match error {
        KeeperError::ExecutionUnconfirmed { .. } => {
            warn!(
                swap = %settlement.reference,
                "Ledger record outcome unknown, check the treasury counters before recording by hand: {}",
                error
            );
            error
        }
        other => KeeperError::Execution(format!(
            "swap {} settled but was not recorded on the ledger: {}",
            settlement.reference, other
        )),
    }
}

/// Apply a simulated settlement to the local snapshot so later budgets in the
/// same cycle see it. Dry runs never re-read the ledger for this.
fn project(state: &mut TreasuryState, kind: OperationKind, settlement: &Settlement) {
    let now = Utc::now().timestamp();
    match kind {
        OperationKind::Conversion => {
            state.sol_balance = state.sol_balance.saturating_sub(settlement.amount_in);
            state.usdc_balance = state.usdc_balance.saturating_add(settlement.executed_out);
            state.total_usdc_converted =
                state.total_usdc_converted.saturating_add(settlement.executed_out);
        }
        OperationKind::Buyback => {
            state.usdc_balance = state.usdc_balance.saturating_sub(settlement.amount_in);
            state.total_buybacks_usdc = state.total_buybacks_usdc.saturating_add(settlement.amount_in);
            state.last_operation_timestamp = now;
        }
        OperationKind::Liquidity => {
            state.usdc_balance = state.usdc_balance.saturating_sub(settlement.amount_in);
            state.total_liquidity_usdc =
                state.total_liquidity_usdc.saturating_add(settlement.amount_in);
            state.last_operation_timestamp = now;
        }
        OperationKind::Burn => {
            state.total_tokens_burned = state.total_tokens_burned.saturating_add(settlement.executed_out);
        }
    }
}
