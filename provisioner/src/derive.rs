//! Deterministic derivation of the AMM pool accounts
//!
//! Every pool account is a program-derived address seeded by the AMM program,
//! the order-book market and a fixed per-account seed. The same root
//! identifiers always yield the same `PoolKeys`, which is what makes
//! "already provisioned?" probes safe to repeat.

use crate::error::{ProvisionError, ProvisionResult};
use solana_sdk::pubkey::Pubkey;
use std::str::FromStr;

pub const AUTHORITY_SEED: &[u8] = b"amm authority";
pub const POOL_ID_SEED: &[u8] = b"amm_associated_seed";
pub const BASE_VAULT_SEED: &[u8] = b"coin_vault_associated_seed";
pub const QUOTE_VAULT_SEED: &[u8] = b"pc_vault_associated_seed";
pub const LP_MINT_SEED: &[u8] = b"lp_mint_associated_seed";
pub const LP_VAULT_SEED: &[u8] = b"temp_lp_token_associated_seed";
pub const TARGET_ORDERS_SEED: &[u8] = b"target_associated_seed";
pub const WITHDRAW_QUEUE_SEED: &[u8] = b"withdraw_associated_seed";
pub const OPEN_ORDERS_SEED: &[u8] = b"open_order_associated_seed";

/// Identifiers every pool account is derived from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RootIds {
    pub amm_program: Pubkey,
    pub dex_program: Pubkey,
    pub market: Pubkey,
    pub base_mint: Pubkey,
    pub quote_mint: Pubkey,
}

impl RootIds {
    /// Parse base58 identifiers, rejecting anything that is not a 32-byte address
    pub fn parse(
        amm_program: &str,
        dex_program: &str,
        market: &str,
        base_mint: &str,
        quote_mint: &str,
    ) -> ProvisionResult<Self> {
        Ok(Self {
            amm_program: parse_address("amm_program", amm_program)?,
            dex_program: parse_address("dex_program", dex_program)?,
            market: parse_address("market", market)?,
            base_mint: parse_address("base_mint", base_mint)?,
            quote_mint: parse_address("quote_mint", quote_mint)?,
        })
    }
}

pub fn parse_address(field: &str, value: &str) -> ProvisionResult<Pubkey> {
    Pubkey::from_str(value.trim()).map_err(|e| {
        ProvisionError::Derivation(format!("{} is not a valid address ({:?}): {}", field, value, e))
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolKeys {
    pub roots: RootIds,
    pub id: Pubkey,
    pub authority: Pubkey,
    pub nonce: u8,
    pub base_vault: Pubkey,
    pub quote_vault: Pubkey,
    pub lp_mint: Pubkey,
    pub lp_vault: Pubkey,
    pub target_orders: Pubkey,
    pub withdraw_queue: Pubkey,
    pub open_orders: Pubkey,
}

impl PoolKeys {
    pub fn derive(roots: RootIds) -> ProvisionResult<Self> {
        let (authority, nonce) =
            Pubkey::try_find_program_address(&[AUTHORITY_SEED], &roots.amm_program)
                .ok_or_else(|| ProvisionError::Derivation("no valid pool authority nonce".into()))?;

        let associated = |seed: &[u8]| associated_address(&roots, seed);

        Ok(Self {
            roots,
            id: associated(POOL_ID_SEED)?,
            authority,
            nonce,
            base_vault: associated(BASE_VAULT_SEED)?,
            quote_vault: associated(QUOTE_VAULT_SEED)?,
            lp_mint: associated(LP_MINT_SEED)?,
            lp_vault: associated(LP_VAULT_SEED)?,
            target_orders: associated(TARGET_ORDERS_SEED)?,
            withdraw_queue: associated(WITHDRAW_QUEUE_SEED)?,
            open_orders: associated(OPEN_ORDERS_SEED)?,
        })
    }

    /// Check these keys were derived for the market actually on the ledger
    pub fn check_market(&self, market: &crate::dex::MarketInfo) -> ProvisionResult<()> {
        let mismatch = |reason: String| ProvisionError::PoolKeyMismatch {
            market: market.address,
            reason,
        };

        if market.address != self.roots.market {
            return Err(mismatch(format!("keys derived for market {}", self.roots.market)));
        }
        if market.base_mint != self.roots.base_mint {
            return Err(mismatch(format!(
                "market base mint {} != configured {}",
                market.base_mint, self.roots.base_mint
            )));
        }
        if market.quote_mint != self.roots.quote_mint {
            return Err(mismatch(format!(
                "market quote mint {} != configured {}",
                market.quote_mint, self.roots.quote_mint
            )));
        }
        Ok(())
    }
}

fn associated_address(roots: &RootIds, seed: &[u8]) -> ProvisionResult<Pubkey> {
    Pubkey::try_find_program_address(
        &[roots.amm_program.as_ref(), roots.market.as_ref(), seed],
        &roots.amm_program,
    )
    .map(|(address, _bump)| address)
    .ok_or_else(|| {
        ProvisionError::Derivation(format!(
            "no valid address for seed {}",
            String::from_utf8_lossy(seed)
        ))
    })
}
