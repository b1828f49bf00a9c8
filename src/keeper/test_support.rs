//! Hand-written collaborator fakes with call counters.
//!
//! `FakeReader`, `FakeLedger`, `FakeSwap` and `FakePool` can share one
//! treasury snapshot so that settled swaps and recorded operations show up on
//! the next read. Each fake only moves what its on-chain counterpart moves:
//! swaps move balances, ledger records move counters (plus the transfers the
//! program performs itself).

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use solana_sdk::pubkey::Pubkey;

use crate::error::{KeeperError, KeeperResult};
use crate::onchain_instance::{ConfigUpdate, LedgerReader, LedgerWriter, Submission, TreasuryState};
use crate::services::{LiquidityPool, PoolReserves, Quote, SwapProvider, SwapResult};

pub type SharedState = Arc<Mutex<TreasuryState>>;

fn signature(label: &str, n: u32) -> Submission {
    Submission { signature: format!("{}-{}", label, n) }
}

fn unconfirmed(label: &str, n: u32) -> KeeperError {
    KeeperError::ExecutionUnconfirmed { signature: format!("{}-{}", label, n), timeout_secs: 60 }
}

pub struct FakeReader {
    state: SharedState,
    fetches: AtomicU32,
    fail: AtomicBool,
}

impl FakeReader {
    pub fn new(state: TreasuryState) -> Self {
        Self::shared(Arc::new(Mutex::new(state)))
    }

    pub fn shared(state: SharedState) -> Self {
        Self { state, fetches: AtomicU32::new(0), fail: AtomicBool::new(false) }
    }

    pub fn handle(&self) -> SharedState {
        self.state.clone()
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn fetches(&self) -> u32 {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LedgerReader for FakeReader {
    async fn fetch(&self) -> KeeperResult<TreasuryState> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(KeeperError::Unavailable("fake ledger offline".to_string()));
        }
        Ok(self.state.lock().clone())
    }
}

/// Quotes at a fixed 2:1 rate and a configurable price impact.
pub struct FakeSwap {
    impact_bps: u16,
    fail_quotes: bool,
    fail_executes: AtomicBool,
    quotes: AtomicU32,
    executes: AtomicU32,
    quoted_inputs: Mutex<Vec<Pubkey>>,
    destinations: Mutex<Vec<Option<Pubkey>>>,
    settlement: Option<(SharedState, Pubkey)>,
}

impl FakeSwap {
    pub fn with_impact(impact_bps: u16) -> Self {
        Self {
            impact_bps,
            fail_quotes: false,
            fail_executes: AtomicBool::new(false),
            quotes: AtomicU32::new(0),
            executes: AtomicU32::new(0),
            quoted_inputs: Mutex::new(Vec::new()),
            destinations: Mutex::new(Vec::new()),
            settlement: None,
        }
    }

    /// Settle swaps against `state`: native input leaves the keeper wallet
    /// (the fee vault), and output only reaches the treasury balance when it
    /// is sent to `treasury_usdc`.
    pub fn settling_into(mut self, state: SharedState, treasury_usdc: Pubkey) -> Self {
        self.settlement = Some((state, treasury_usdc));
        self
    }

    pub fn failing_quotes() -> Self {
        Self { fail_quotes: true, ..Self::with_impact(0) }
    }

    pub fn set_failing_executes(&self, fail: bool) {
        self.fail_executes.store(fail, Ordering::SeqCst);
    }

    pub fn quote_calls(&self) -> u32 {
        self.quotes.load(Ordering::SeqCst)
    }

    pub fn execute_calls(&self) -> u32 {
        self.executes.load(Ordering::SeqCst)
    }

    pub fn quoted_inputs(&self) -> Vec<Pubkey> {
        self.quoted_inputs.lock().clone()
    }

    pub fn destinations(&self) -> Vec<Option<Pubkey>> {
        self.destinations.lock().clone()
    }
}

#[async_trait]
impl SwapProvider for FakeSwap {
    async fn quote(
        &self,
        input_mint: &Pubkey,
        output_mint: &Pubkey,
        amount: u64,
        _max_slippage_bps: u16,
    ) -> KeeperResult<Quote> {
        self.quotes.fetch_add(1, Ordering::SeqCst);
        self.quoted_inputs.lock().push(*input_mint);
        if self.fail_quotes {
            return Err(KeeperError::Quote("no route".to_string()));
        }
        Ok(Quote {
            input_mint: *input_mint,
            output_mint: *output_mint,
            in_amount: amount,
            out_amount: amount * 2,
            price_impact_bps: self.impact_bps,
            route: serde_json::Value::Null,
        })
    }

    async fn execute_swap(
        &self,
        quote: &Quote,
        destination: Option<Pubkey>,
    ) -> KeeperResult<SwapResult> {
        let n = self.executes.fetch_add(1, Ordering::SeqCst);
        self.destinations.lock().push(destination);
        if self.fail_executes.load(Ordering::SeqCst) {
            return Err(KeeperError::Execution("route expired".to_string()));
        }
        if let Some((state, treasury_usdc)) = &self.settlement {
            let mut s = state.lock();
            if quote.input_mint == spl_token::native_mint::id() {
                s.sol_balance = s.sol_balance.saturating_sub(quote.in_amount);
            }
            if destination == Some(*treasury_usdc) {
                s.usdc_balance += quote.out_amount;
            }
        }
        Ok(SwapResult {
            executed_in_amount: quote.in_amount,
            executed_out_amount: quote.out_amount,
            execution_reference: format!("swap-{}", n),
            simulated: false,
        })
    }
}

#[derive(Default)]
pub struct FakeLedger {
    state: Option<SharedState>,
    fees: AtomicU32,
    conversions: AtomicU32,
    buybacks: AtomicU32,
    pauses: AtomicU32,
    resumes: AtomicU32,
    updates: AtomicU32,
    burns: AtomicU32,
    unconfirmed: AtomicBool,
    pub last_update: Mutex<Option<ConfigUpdate>>,
    pub last_buyback: Mutex<Option<(u64, u64)>>,
}

impl FakeLedger {
    /// Applies recorded operations to `state`, as the program would.
    pub fn backed_by(state: SharedState) -> Self {
        Self { state: Some(state), ..Self::default() }
    }

    /// Records are sent but never observed as confirmed.
    pub fn set_unconfirmed(&self, unconfirmed: bool) {
        self.unconfirmed.store(unconfirmed, Ordering::SeqCst);
    }

    fn apply(&self, f: impl FnOnce(&mut TreasuryState)) {
        if let Some(state) = &self.state {
            f(&mut state.lock());
        }
    }

    pub fn conversions(&self) -> u32 {
        self.conversions.load(Ordering::SeqCst)
    }

    pub fn buybacks(&self) -> u32 {
        self.buybacks.load(Ordering::SeqCst)
    }

    pub fn burns(&self) -> u32 {
        self.burns.load(Ordering::SeqCst)
    }

    pub fn total_calls(&self) -> u32 {
        [
            &self.fees,
            &self.conversions,
            &self.buybacks,
            &self.pauses,
            &self.resumes,
            &self.updates,
            &self.burns,
        ]
        .iter()
        .map(|c| c.load(Ordering::SeqCst))
        .sum()
    }
}

#[async_trait]
impl LedgerWriter for FakeLedger {
    async fn record_fee(&self, lamports: u64) -> KeeperResult<Submission> {
        let n = self.fees.fetch_add(1, Ordering::SeqCst);
        self.apply(|s| {
            s.total_sol_collected += lamports;
            s.sol_balance += lamports;
        });
        Ok(signature("fee", n))
    }

    async fn record_usdc_conversion(&self, usdc_amount: u64) -> KeeperResult<Submission> {
        let n = self.conversions.fetch_add(1, Ordering::SeqCst);
        if self.unconfirmed.load(Ordering::SeqCst) {
            return Err(unconfirmed("conversion", n));
        }
        self.apply(|s| s.total_usdc_converted += usdc_amount);
        Ok(signature("conversion", n))
    }

    async fn record_buyback(&self, usdc_amount: u64, min_tokens_out: u64) -> KeeperResult<Submission> {
        let n = self.buybacks.fetch_add(1, Ordering::SeqCst);
        *self.last_buyback.lock() = Some((usdc_amount, min_tokens_out));
        if self.unconfirmed.load(Ordering::SeqCst) {
            return Err(unconfirmed("buyback", n));
        }
        self.apply(|s| {
            s.total_buybacks_usdc += usdc_amount;
            s.usdc_balance -= usdc_amount;
            s.last_operation_timestamp = Utc::now().timestamp();
        });
        Ok(signature("buyback", n))
    }

    async fn emergency_pause(&self) -> KeeperResult<Submission> {
        let n = self.pauses.fetch_add(1, Ordering::SeqCst);
        self.apply(|s| s.paused = true);
        Ok(signature("pause", n))
    }

    async fn resume(&self) -> KeeperResult<Submission> {
        let n = self.resumes.fetch_add(1, Ordering::SeqCst);
        self.apply(|s| s.paused = false);
        Ok(signature("resume", n))
    }

    async fn update_config(&self, update: ConfigUpdate) -> KeeperResult<Submission> {
        let n = self.updates.fetch_add(1, Ordering::SeqCst);
        *self.last_update.lock() = Some(update);
        Ok(signature("update", n))
    }

    async fn burn_tokens(&self, amount: u64) -> KeeperResult<Submission> {
        let n = self.burns.fetch_add(1, Ordering::SeqCst);
        self.apply(|s| s.total_tokens_burned += amount);
        Ok(signature("burn", n))
    }
}

pub struct FakePool {
    reserves: Option<PoolReserves>,
    state: Option<SharedState>,
    reads: AtomicU32,
    deposits: Mutex<Vec<(u64, u64)>>,
}

impl FakePool {
    pub fn with_reserves(usdc_reserve: u64, token_reserve: u64) -> Self {
        Self {
            reserves: Some(PoolReserves { usdc_reserve, token_reserve }),
            state: None,
            reads: AtomicU32::new(0),
            deposits: Mutex::new(Vec::new()),
        }
    }

    pub fn unavailable() -> Self {
        Self { reserves: None, ..Self::with_reserves(0, 0) }
    }

    pub fn backed_by(mut self, state: SharedState) -> Self {
        self.state = Some(state);
        self
    }

    pub fn reserve_reads(&self) -> u32 {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn deposits(&self) -> Vec<(u64, u64)> {
        self.deposits.lock().clone()
    }
}

#[async_trait]
impl LiquidityPool for FakePool {
    async fn reserves(&self) -> KeeperResult<PoolReserves> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.reserves
            .ok_or_else(|| KeeperError::PoolUnavailable("vault account missing".to_string()))
    }

    async fn add_liquidity(&self, usdc_amount: u64, token_amount: u64) -> KeeperResult<Submission> {
        let mut deposits = self.deposits.lock();
        deposits.push((usdc_amount, token_amount));
        if let Some(state) = &self.state {
            let mut s = state.lock();
            s.total_liquidity_usdc += usdc_amount;
            s.usdc_balance -= usdc_amount;
            s.last_operation_timestamp = Utc::now().timestamp();
        }
        Ok(signature("liquidity", deposits.len() as u32))
    }
}
