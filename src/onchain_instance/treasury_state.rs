//! Treasury account layout and the per-cycle snapshot the keeper works from.

use std::io::{Read, Write};

use anchor_lang::prelude::{AnchorDeserialize, AnchorSerialize};
use serde::Serialize;
use solana_sdk::{hash::hash, pubkey::Pubkey};

use crate::error::{KeeperError, KeeperResult};

pub const TREASURY_SEED: &[u8] = b"treasury";

/// Basis points denominator; allocation bps must sum to exactly this.
pub const BPS_DENOMINATOR: u64 = 10_000;

/// Anchor account discriminator for `Treasury`.
pub fn treasury_discriminator() -> [u8; 8] {
    let mut disc = [0u8; 8];
    disc.copy_from_slice(&hash(b"account:Treasury").to_bytes()[..8]);
    disc
}

/// Raw on-chain `Treasury` account, field order as the program stores it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreasuryAccount {
    pub authority: Pubkey,
    pub buyback_allocation_bps: u16,
    pub liquidity_allocation_bps: u16,
    pub reserve_allocation_bps: u16,
    pub max_usdc_per_cycle: u64,
    pub cooldown_seconds: i64,
    pub slippage_bps: u16,
    pub total_sol_collected: u64,
    pub total_usdc_converted: u64,
    pub total_buybacks_usdc: u64,
    pub total_liquidity_usdc: u64,
    pub total_tokens_burned: u64,
    pub last_operation_timestamp: i64,
    pub paused: bool,
    pub bump: u8,
}

impl AnchorSerialize for TreasuryAccount {
    fn serialize<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        AnchorSerialize::serialize(&self.authority.to_bytes(), writer)?;
        AnchorSerialize::serialize(&self.buyback_allocation_bps, writer)?;
        AnchorSerialize::serialize(&self.liquidity_allocation_bps, writer)?;
        AnchorSerialize::serialize(&self.reserve_allocation_bps, writer)?;
        AnchorSerialize::serialize(&self.max_usdc_per_cycle, writer)?;
        AnchorSerialize::serialize(&self.cooldown_seconds, writer)?;
        AnchorSerialize::serialize(&self.slippage_bps, writer)?;
        AnchorSerialize::serialize(&self.total_sol_collected, writer)?;
        AnchorSerialize::serialize(&self.total_usdc_converted, writer)?;
        AnchorSerialize::serialize(&self.total_buybacks_usdc, writer)?;
        AnchorSerialize::serialize(&self.total_liquidity_usdc, writer)?;
        AnchorSerialize::serialize(&self.total_tokens_burned, writer)?;
        AnchorSerialize::serialize(&self.last_operation_timestamp, writer)?;
        AnchorSerialize::serialize(&self.paused, writer)?;
        AnchorSerialize::serialize(&self.bump, writer)
    }
}

impl AnchorDeserialize for TreasuryAccount {
    fn deserialize_reader<R: Read>(reader: &mut R) -> std::io::Result<Self> {
        Ok(Self {
            authority: Pubkey::new_from_array(<[u8; 32]>::deserialize_reader(reader)?),
            buyback_allocation_bps: u16::deserialize_reader(reader)?,
            liquidity_allocation_bps: u16::deserialize_reader(reader)?,
            reserve_allocation_bps: u16::deserialize_reader(reader)?,
            max_usdc_per_cycle: u64::deserialize_reader(reader)?,
            cooldown_seconds: i64::deserialize_reader(reader)?,
            slippage_bps: u16::deserialize_reader(reader)?,
            total_sol_collected: u64::deserialize_reader(reader)?,
            total_usdc_converted: u64::deserialize_reader(reader)?,
            total_buybacks_usdc: u64::deserialize_reader(reader)?,
            total_liquidity_usdc: u64::deserialize_reader(reader)?,
            total_tokens_burned: u64::deserialize_reader(reader)?,
            last_operation_timestamp: i64::deserialize_reader(reader)?,
            paused: bool::deserialize_reader(reader)?,
            bump: u8::deserialize_reader(reader)?,
        })
    }
}

impl TreasuryAccount {
    /// Decode account data (discriminator + borsh body). Trailing bytes are
    /// tolerated since account space may be over-allocated.
    pub fn decode(data: &[u8]) -> KeeperResult<Self> {
        if data.len() < 8 {
            return Err(KeeperError::Decode(format!(
                "treasury account is {} bytes, shorter than the discriminator",
                data.len()
            )));
        }
        if data[..8] != treasury_discriminator() {
            return Err(KeeperError::Decode("treasury discriminator mismatch".to_string()));
        }
        let mut body = &data[8..];
        Self::deserialize(&mut body)
            .map_err(|e| KeeperError::Decode(format!("treasury body: {}", e)))
    }
}

/// Where a snapshot came from. Synthetic snapshots only exist in dry runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StateSource {
    Ledger { slot: u64 },
    Synthetic,
}

/// Point-in-time view of the treasury used for one cycle. Never carried
/// across cycles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TreasuryState {
    pub authority: Pubkey,
    pub sol_balance: u64,
    pub usdc_balance: u64,
    pub buyback_allocation_bps: u16,
    pub liquidity_allocation_bps: u16,
    pub reserve_allocation_bps: u16,
    pub max_usdc_per_cycle: u64,
    pub cooldown_seconds: i64,
    pub slippage_bps: u16,
    pub total_sol_collected: u64,
    pub total_usdc_converted: u64,
    pub total_buybacks_usdc: u64,
    pub total_liquidity_usdc: u64,
    pub total_tokens_burned: u64,
    pub last_operation_timestamp: i64,
    pub paused: bool,
    pub source: StateSource,
}

impl TreasuryState {
    pub fn from_account(
        account: &TreasuryAccount,
        sol_balance: u64,
        usdc_balance: u64,
        source: StateSource,
    ) -> Self {
        Self {
            authority: account.authority,
            sol_balance,
            usdc_balance,
            buyback_allocation_bps: account.buyback_allocation_bps,
            liquidity_allocation_bps: account.liquidity_allocation_bps,
            reserve_allocation_bps: account.reserve_allocation_bps,
            max_usdc_per_cycle: account.max_usdc_per_cycle,
            cooldown_seconds: account.cooldown_seconds,
            slippage_bps: account.slippage_bps,
            total_sol_collected: account.total_sol_collected,
            total_usdc_converted: account.total_usdc_converted,
            total_buybacks_usdc: account.total_buybacks_usdc,
            total_liquidity_usdc: account.total_liquidity_usdc,
            total_tokens_burned: account.total_tokens_burned,
            last_operation_timestamp: account.last_operation_timestamp,
            paused: account.paused,
            source,
        }
    }

    pub fn allocation_bps_sum(&self) -> u64 {
        self.buyback_allocation_bps as u64
            + self.liquidity_allocation_bps as u64
            + self.reserve_allocation_bps as u64
    }

    /// The ledger rejects configs that break this before persisting them, but
    /// the keeper still refuses to act on a snapshot where it does not hold.
    pub fn check_allocation_invariant(&self) -> KeeperResult<()> {
        let sum = self.allocation_bps_sum();
        if sum != BPS_DENOMINATOR {
            return Err(KeeperError::ConfigInvalid(format!(
                "ledger allocation bps sum to {} (buyback={}, liquidity={}, reserve={})",
                sum,
                self.buyback_allocation_bps,
                self.liquidity_allocation_bps,
                self.reserve_allocation_bps
            )));
        }
        Ok(())
    }

    pub fn is_synthetic(&self) -> bool {
        matches!(self.source, StateSource::Synthetic)
    }

    /// Seconds left before the cooldown window closes, or `None` once elapsed.
    pub fn cooldown_remaining(&self, now: i64, cooldown_seconds: i64) -> Option<i64> {
        let elapsed = now.saturating_sub(self.last_operation_timestamp);
        if elapsed < cooldown_seconds {
            Some(cooldown_seconds - elapsed)
        } else {
            None
        }
    }
}

#[cfg(test)]
pub(crate) fn sample_state() -> TreasuryState {
    TreasuryState {
        authority: Pubkey::new_unique(),
        sol_balance: 0,
        usdc_balance: 10_000_000,
        buyback_allocation_bps: 5_000,
        liquidity_allocation_bps: 3_000,
        reserve_allocation_bps: 2_000,
        max_usdc_per_cycle: 1_000_000_000,
        cooldown_seconds: 0,
        slippage_bps: 100,
        total_sol_collected: 0,
        total_usdc_converted: 0,
        total_buybacks_usdc: 0,
        total_liquidity_usdc: 0,
        total_tokens_burned: 0,
        last_operation_timestamp: 0,
        paused: false,
        source: StateSource::Ledger { slot: 1 },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account() -> TreasuryAccount {
        TreasuryAccount {
            authority: Pubkey::new_from_array([7u8; 32]),
            buyback_allocation_bps: 5_000,
            liquidity_allocation_bps: 3_000,
            reserve_allocation_bps: 2_000,
            max_usdc_per_cycle: 250_000_000,
            cooldown_seconds: 3_600,
            slippage_bps: 100,
            total_sol_collected: 42,
            total_usdc_converted: 1_000_000,
            total_buybacks_usdc: 400_000,
            total_liquidity_usdc: 100_000,
            total_tokens_burned: 9,
            last_operation_timestamp: 1_700_000_000,
            paused: false,
            bump: 254,
        }
    }

    fn encode(account: &TreasuryAccount) -> Vec<u8> {
        let mut data = treasury_discriminator().to_vec();
        account.serialize(&mut data).unwrap();
        data
    }

    #[test]
    fn decodes_account_with_padding() {
        let mut data = encode(&account());
        data.extend_from_slice(&[0u8; 16]);

        let decoded = TreasuryAccount::decode(&data).unwrap();
        assert_eq!(decoded, account());

        let state = TreasuryState::from_account(&decoded, 5, 6, StateSource::Ledger { slot: 99 });
        assert_eq!(state.authority, Pubkey::new_from_array([7u8; 32]));
        assert_eq!(state.total_buybacks_usdc, 400_000);
        assert_eq!(state.sol_balance, 5);
        assert_eq!(state.usdc_balance, 6);
        assert!(!state.is_synthetic());
    }

    #[test]
    fn body_layout_matches_program_field_order() {
        let data = encode(&account());
        // discriminator, authority, 3 x u16 bps, u64, i64, u16, 5 x u64, i64, bool, u8
        assert_eq!(data.len(), 8 + 32 + 6 + 8 + 8 + 2 + 40 + 8 + 1 + 1);
        assert_eq!(&data[8..40], &[7u8; 32]);
        assert_eq!(&data[40..42], &5_000u16.to_le_bytes());
        assert_eq!(&data[46..54], &250_000_000u64.to_le_bytes());
        assert_eq!(&data[54..62], &3_600i64.to_le_bytes());
        assert_eq!(data[data.len() - 1], 254);
    }

    #[test]
    fn rejects_wrong_discriminator_and_short_data() {
        let mut data = encode(&account());
        data[0] ^= 0xff;
        assert!(matches!(TreasuryAccount::decode(&data), Err(KeeperError::Decode(_))));
        assert!(matches!(TreasuryAccount::decode(&[1, 2, 3]), Err(KeeperError::Decode(_))));

        let truncated = encode(&account())[..20].to_vec();
        assert!(matches!(TreasuryAccount::decode(&truncated), Err(KeeperError::Decode(_))));
    }

    #[test]
    fn allocation_invariant() {
        let mut state = sample_state();
        assert!(state.check_allocation_invariant().is_ok());
        state.reserve_allocation_bps = 1_999;
        assert!(matches!(
            state.check_allocation_invariant(),
            Err(KeeperError::ConfigInvalid(_))
        ));
    }

    #[test]
    fn cooldown_remaining_uses_ledger_timestamp() {
        let mut state = sample_state();
        state.last_operation_timestamp = 1_000;
        assert_eq!(state.cooldown_remaining(1_100, 300), Some(200));
        assert_eq!(state.cooldown_remaining(1_300, 300), None);
        assert_eq!(state.cooldown_remaining(5_000, 0), None);
    }
}
