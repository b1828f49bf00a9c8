use std::sync::Arc;

use solana_sdk::pubkey::Pubkey;
use tracing::{info, warn};

use crate::config::ExecutionMode;
use crate::error::KeeperResult;
use crate::keeper::outcome::{OperationOutcome, Settlement, SkipReason};
use crate::onchain_instance::{LedgerWriter, Submission};
use crate::services::{Quote, SwapProvider, SwapResult};

/// Buys the protocol token with treasury USDC.
///
/// The executor only swaps. Recording the buyback on the ledger is the
/// caller's job, and the cumulative counters are not assumed updated until a
/// later ledger read shows it.
pub struct BuybackExecutor {
    swap: Arc<dyn SwapProvider>,
    ledger: Arc<dyn LedgerWriter>,
    usdc_mint: Pubkey,
    token_mint: Pubkey,
    mode: ExecutionMode,
}

impl BuybackExecutor {
    pub fn new(
        swap: Arc<dyn SwapProvider>,
        ledger: Arc<dyn LedgerWriter>,
        usdc_mint: Pubkey,
        token_mint: Pubkey,
        mode: ExecutionMode,
    ) -> Self {
        Self { swap, ledger, usdc_mint, token_mint, mode }
    }

    pub async fn execute(&self, usdc_amount: u64, slippage_bps: u16) -> KeeperResult<OperationOutcome> {
        let quote = self
            .swap
            .quote(&self.usdc_mint, &self.token_mint, usdc_amount, slippage_bps)
            .await?;

        if quote.price_impact_bps > slippage_bps {
            warn!(
                usdc_amount,
                price_impact_bps = quote.price_impact_bps,
                limit_bps = slippage_bps,
                "Buyback skipped, price impact too high"
            );
            return Ok(OperationOutcome::Skipped(SkipReason::SlippageExceeded {
                price_impact_bps: quote.price_impact_bps,
                limit_bps: slippage_bps,
            }));
        }

        let result = if self.mode.is_simulated() {
            info!(
                usdc_amount,
                quoted_out = quote.out_amount,
                price_impact_bps = quote.price_impact_bps,
                simulated = true,
                "[SIMULATED] Would buy back tokens"
            );
            SwapResult::simulated(&quote)
        } else {
            self.swap.execute_swap(&quote, None).await?
        };

        Ok(OperationOutcome::Executed(settlement(&quote, &result, slippage_bps)))
    }

    /// Burn bought-back tokens held by the keeper. Never called implicitly by
    /// [`execute`](Self::execute).
    pub async fn burn(&self, token_amount: u64) -> KeeperResult<OperationOutcome> {
        if self.mode.is_simulated() {
            info!(token_amount, simulated = true, "[SIMULATED] Would burn tokens");
            return Ok(OperationOutcome::Executed(Settlement {
                amount_in: token_amount,
                quoted_out: None,
                executed_out: token_amount,
                min_out: None,
                price_impact_bps: None,
                reference: format!("simulated:burn:{}", token_amount),
                simulated: true,
            }));
        }
        let Submission { signature } = self.ledger.burn_tokens(token_amount).await?;
        Ok(OperationOutcome::Executed(Settlement {
            amount_in: token_amount,
            quoted_out: None,
            executed_out: token_amount,
            min_out: None,
            price_impact_bps: None,
            reference: signature,
            simulated: false,
        }))
    }
}

/// Shared by every swap-backed operation.
pub(crate) fn settlement(quote: &Quote, result: &SwapResult, slippage_bps: u16) -> Settlement {
    Settlement {
        amount_in: result.executed_in_amount,
        quoted_out: Some(quote.out_amount),
        executed_out: result.executed_out_amount,
        min_out: Some(quote.min_out(slippage_bps)),
        price_impact_bps: Some(quote.price_impact_bps),
        reference: result.execution_reference.clone(),
        simulated: result.simulated,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::KeeperError;
    use crate::keeper::test_support::{FakeLedger, FakeSwap};

    fn executor(swap: Arc<FakeSwap>, ledger: Arc<FakeLedger>, mode: ExecutionMode) -> BuybackExecutor {
        BuybackExecutor::new(swap, ledger, Pubkey::new_unique(), Pubkey::new_unique(), mode)
    }

    #[tokio::test]
    async fn executes_within_slippage() {
        let swap = Arc::new(FakeSwap::with_impact(40));
        let ledger = Arc::new(FakeLedger::default());
        let outcome = executor(swap.clone(), ledger.clone(), ExecutionMode::Live)
            .execute(1_000, 100)
            .await
            .unwrap();

        let settlement = outcome.settlement().unwrap();
        assert!(!settlement.simulated);
        assert_eq!(settlement.amount_in, 1_000);
        assert_eq!(settlement.price_impact_bps, Some(40));
        assert_eq!(settlement.min_out, Some(settlement.quoted_out.unwrap() * 99 / 100));
        assert_eq!(swap.execute_calls(), 1);
        // Recording is left to the caller.
        assert_eq!(ledger.total_calls(), 0);
    }

    #[tokio::test]
    async fn high_impact_is_skip_without_swap() {
        let swap = Arc::new(FakeSwap::with_impact(101));
        let ledger = Arc::new(FakeLedger::default());
        let outcome = executor(swap.clone(), ledger, ExecutionMode::Live)
            .execute(1_000, 100)
            .await
            .unwrap();

        assert_eq!(
            outcome,
            OperationOutcome::Skipped(SkipReason::SlippageExceeded {
                price_impact_bps: 101,
                limit_bps: 100
            })
        );
        assert_eq!(swap.quote_calls(), 1);
        assert_eq!(swap.execute_calls(), 0);
    }

    #[tokio::test]
    async fn simulation_quotes_but_never_swaps() {
        let swap = Arc::new(FakeSwap::with_impact(10));
        let ledger = Arc::new(FakeLedger::default());
        let exec = executor(swap.clone(), ledger.clone(), ExecutionMode::DryRun);

        let outcome = exec.execute(5_000, 100).await.unwrap();
        assert!(outcome.settlement().unwrap().simulated);
        assert!(!outcome.mutated_ledger());
        assert_eq!(swap.execute_calls(), 0);

        let burned = exec.burn(77).await.unwrap();
        assert!(burned.settlement().unwrap().simulated);
        assert_eq!(ledger.total_calls(), 0);
    }

    #[tokio::test]
    async fn quote_failure_propagates() {
        let swap = Arc::new(FakeSwap::failing_quotes());
        let ledger = Arc::new(FakeLedger::default());
        let err = executor(swap.clone(), ledger, ExecutionMode::Live)
            .execute(1_000, 100)
            .await
            .unwrap_err();
        assert!(matches!(err, KeeperError::Quote(_)));
        assert_eq!(swap.execute_calls(), 0);
    }

    #[tokio::test]
    async fn burn_is_explicit_ledger_call() {
        let swap = Arc::new(FakeSwap::with_impact(0));
        let ledger = Arc::new(FakeLedger::default());
        let exec = executor(swap, ledger.clone(), ExecutionMode::Live);

        exec.execute(1_000, 100).await.unwrap();
        assert_eq!(ledger.burns(), 0);

        let outcome = exec.burn(900).await.unwrap();
        assert_eq!(outcome.settlement().unwrap().executed_out, 900);
        assert_eq!(ledger.burns(), 1);
    }
}
