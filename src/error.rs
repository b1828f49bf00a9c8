//! Error taxonomy for the keeper.
//!
//! Skip decisions (paused treasury, active cooldown, slippage over the limit,
//! empty budget) are not errors and never show up here; they are modeled as
//! outcome variants in [`crate::keeper`].

use thiserror::Error;

#[derive(Debug, Error)]
pub enum KeeperError {
    /// The treasury (or another ledger account) could not be retrieved.
    #[error("ledger unavailable: {0}")]
    Unavailable(String),

    /// Ledger data was retrieved but does not match the expected layout.
    #[error("failed to decode ledger data: {0}")]
    Decode(String),

    #[error("quote failed: {0}")]
    Quote(String),

    #[error("execution rejected: {0}")]
    Execution(String),

    /// Submitted, but confirmation was not observed within the bound.
    /// Treated as failed for accounting and never resubmitted.
    #[error("transaction {signature} not confirmed within {timeout_secs}s")]
    ExecutionUnconfirmed { signature: String, timeout_secs: u64 },

    #[error("liquidity pool unavailable: {0}")]
    PoolUnavailable(String),

    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("missing credentials: {0}")]
    MissingCredentials(String),

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("rpc error: {0}")]
    Rpc(String),

    #[error("{0} timed out after {1}s")]
    Timeout(&'static str, u64),
}

impl KeeperError {
    /// Fatal errors stop the process; everything else is logged and the
    /// keeper moves on to the next scheduled cycle.
    pub fn is_fatal(&self) -> bool {
        matches!(self, KeeperError::ConfigInvalid(_) | KeeperError::MissingCredentials(_))
    }

    /// Network/timeout class failures that are retried at the next cycle.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            KeeperError::Network(_)
                | KeeperError::Rpc(_)
                | KeeperError::Timeout(..)
                | KeeperError::Unavailable(_)
        )
    }
}

impl From<solana_client::client_error::ClientError> for KeeperError {
    fn from(err: solana_client::client_error::ClientError) -> Self {
        KeeperError::Rpc(err.to_string())
    }
}

pub type KeeperResult<T> = std::result::Result<T, KeeperError>;
