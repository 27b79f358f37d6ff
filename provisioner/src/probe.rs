//! Read-only ledger probes that classify how far a pool has been provisioned

use crate::derive::PoolKeys;
use crate::error::{ProvisionError, ProvisionResult};
use crate::ledger::Ledger;
use solana_sdk::{account::Account, program_pack::Pack, pubkey::Pubkey};
use spl_token::state::Mint;

/// Provisioning state inferred from the ledger on every run; never stored
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolProvisioningState {
    MarketAbsent,
    MarketPresentPoolUnseeded,
    PoolPreInitialized,
    PoolInitialized,
}

pub struct ChainStateProbe<'a, L: Ledger + ?Sized> {
    ledger: &'a L,
}

impl<'a, L: Ledger + ?Sized> ChainStateProbe<'a, L> {
    pub fn new(ledger: &'a L) -> Self {
        Self { ledger }
    }

    pub fn accounts_info(&self, addresses: &[Pubkey]) -> ProvisionResult<Vec<Option<Account>>> {
        let accounts = self.ledger.get_multiple_accounts(addresses)?;
        if accounts.len() != addresses.len() {
            return Err(ProvisionError::ProbeUnavailable(format!(
                "asked for {} accounts, ledger returned {}",
                addresses.len(),
                accounts.len()
            )));
        }
        Ok(accounts)
    }

    pub fn account(&self, address: &Pubkey) -> ProvisionResult<Option<Account>> {
        Ok(self.accounts_info(&[*address])?.pop().flatten())
    }

    pub fn market_exists(&self, market: &Pubkey) -> ProvisionResult<bool> {
        Ok(self.account(market)?.is_some_and(|a| !a.data.is_empty()))
    }

    /// LP mint present with non-zero supply. A zero-supply mint is left by
    /// pre-initialize before any liquidity is seeded and does not count.
    pub fn pool_pre_initialized(&self, lp_mint: &Pubkey) -> ProvisionResult<bool> {
        match self.account(lp_mint)? {
            Some(account) => Ok(decode_mint_supply(lp_mint, &account.data)? != 0),
            None => Ok(false),
        }
    }

    pub fn pool_initialized(&self, pool_id: &Pubkey) -> ProvisionResult<bool> {
        Ok(self.account(pool_id)?.is_some_and(|a| !a.data.is_empty()))
    }

    pub fn mint(&self, mint: &Pubkey) -> ProvisionResult<Mint> {
        let account = self.account(mint)?.ok_or_else(|| ProvisionError::AccountDecode {
            address: *mint,
            reason: "mint account not found".into(),
        })?;
        decode_mint(mint, &account.data)
    }

    /// Infer the lifecycle position from one batched read
    pub fn classify(&self, keys: &PoolKeys) -> ProvisionResult<PoolProvisioningState> {
        let accounts = self.accounts_info(&[keys.roots.market, keys.lp_mint, keys.id])?;
        let has_data = |a: &Option<Account>| a.as_ref().is_some_and(|a| !a.data.is_empty());

        if !has_data(&accounts[0]) {
            return Ok(PoolProvisioningState::MarketAbsent);
        }
        if has_data(&accounts[2]) {
            return Ok(PoolProvisioningState::PoolInitialized);
        }
        match &accounts[1] {
            Some(lp) if decode_mint_supply(&keys.lp_mint, &lp.data)? != 0 => Ok(PoolProvisioningState::PoolPreInitialized),
            _ => Ok(PoolProvisioningState::MarketPresentPoolUnseeded),
        }
    }
}

pub fn decode_mint(address: &Pubkey, raw: &[u8]) -> ProvisionResult<Mint> {
    let fail = |reason: String| ProvisionError::AccountDecode {
        address: *address,
        reason,
    };
    if raw.len() < Mint::LEN {
        return Err(fail(format!(
            "mint data is {} bytes, expected {}",
            raw.len(),
            Mint::LEN
        )));
    }
    Mint::unpack_from_slice(&raw[..Mint::LEN]).map_err(|e| fail(format!("mint decode: {}", e)))
}

pub fn decode_mint_supply(address: &Pubkey, raw: &[u8]) -> ProvisionResult<u64> {
    decode_mint(address, raw).map(|mint| mint.supply)
}
