//! # Onchain Program Instance Module
//!
//! Interaction with the USDCBALL treasury program deployed on Solana.
//!
//! ## Features
//! - Treasury account decoding and per-cycle snapshots
//! - Confirmed-commitment ledger reads (plus a synthetic reader for dry runs)
//! - Instruction builders and bounded submit/confirm for every treasury operation

/// Treasury program client and instruction builders
pub mod instance;
/// Ledger state readers
pub mod reader;
/// Account layout and snapshot type
pub mod treasury_state;

pub use instance::{ConfigUpdate, LedgerWriter, Submission, TreasuryAccounts, TreasuryProgram};
pub use reader::{LedgerReader, RpcLedgerReader, SyntheticLedgerReader, TreasuryAddresses};
pub use treasury_state::{StateSource, TreasuryState};
