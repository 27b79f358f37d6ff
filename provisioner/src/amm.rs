//! Instruction builders for the AMM program
//!
//! Each call is one tag byte followed by little-endian scalars, with the
//! account list fully enumerated in the order the program reads it.

use crate::derive::PoolKeys;
use crate::dex::MarketInfo;
use solana_sdk::{
    instruction::{AccountMeta, Instruction},
    pubkey::Pubkey,
    system_program, sysvar,
};

pub const IX_INITIALIZE: u8 = 0;
pub const IX_SWAP_BASE_IN: u8 = 9;
pub const IX_PRE_INITIALIZE: u8 = 10;
pub const IX_SWAP_BASE_OUT: u8 = 11;

/// Owner-side accounts of a swap
#[derive(Debug, Clone, Copy)]
pub struct SwapAccounts {
    pub source: Pubkey,
    pub destination: Pubkey,
    pub owner: Pubkey,
}

/// Build pre_initialize: creates LP mint, vaults and bookkeeping accounts
pub fn pre_initialize(keys: &PoolKeys, owner: &Pubkey) -> Instruction {
    let data = vec![IX_PRE_INITIALIZE, keys.nonce];

    let accounts = vec![
        AccountMeta::new_readonly(spl_token::id(), false),
        AccountMeta::new_readonly(system_program::id(), false),
        AccountMeta::new_readonly(sysvar::rent::id(), false),
        AccountMeta::new(keys.target_orders, false),
        AccountMeta::new(keys.withdraw_queue, false),
        AccountMeta::new_readonly(keys.authority, false),
        AccountMeta::new(keys.lp_mint, false),
        AccountMeta::new_readonly(keys.roots.base_mint, false),
        AccountMeta::new_readonly(keys.roots.quote_mint, false),
        AccountMeta::new(keys.base_vault, false),
        AccountMeta::new(keys.quote_vault, false),
        AccountMeta::new(keys.lp_vault, false),
        AccountMeta::new_readonly(keys.roots.market, false),
        AccountMeta::new(*owner, true),
    ];

    Instruction {
        program_id: keys.roots.amm_program,
        accounts,
        data,
    }
}

/// Build initialize: creates the pool account and mints LP to `owner_lp_account`
pub fn initialize(keys: &PoolKeys, owner_lp_account: &Pubkey, owner: &Pubkey, open_time: u64) -> Instruction {
    let mut data = vec![IX_INITIALIZE, keys.nonce];
    data.extend_from_slice(&open_time.to_le_bytes());

    let accounts = vec![
        AccountMeta::new_readonly(spl_token::id(), false),
        AccountMeta::new_readonly(system_program::id(), false),
        AccountMeta::new_readonly(sysvar::rent::id(), false),
        AccountMeta::new(keys.id, false),
        AccountMeta::new_readonly(keys.authority, false),
        AccountMeta::new(keys.open_orders, false),
        AccountMeta::new(keys.lp_mint, false),
        AccountMeta::new_readonly(keys.roots.base_mint, false),
        AccountMeta::new_readonly(keys.roots.quote_mint, false),
        AccountMeta::new_readonly(keys.base_vault, false),
        AccountMeta::new_readonly(keys.quote_vault, false),
        AccountMeta::new(keys.withdraw_queue, false),
        AccountMeta::new(keys.target_orders, false),
        AccountMeta::new(*owner_lp_account, false),
        AccountMeta::new_readonly(keys.lp_vault, false),
        AccountMeta::new_readonly(keys.roots.dex_program, false),
        AccountMeta::new_readonly(keys.roots.market, false),
        AccountMeta::new(*owner, true),
    ];

    Instruction {
        program_id: keys.roots.amm_program,
        accounts,
        data,
    }
}

fn swap_accounts(keys: &PoolKeys, market: &MarketInfo, vault_signer: &Pubkey, user: &SwapAccounts) -> Vec<AccountMeta> {
    vec![
        AccountMeta::new_readonly(spl_token::id(), false),
        AccountMeta::new(keys.id, false),
        AccountMeta::new_readonly(keys.authority, false),
        AccountMeta::new(keys.open_orders, false),
        AccountMeta::new(keys.target_orders, false),
        AccountMeta::new(keys.base_vault, false),
        AccountMeta::new(keys.quote_vault, false),
        AccountMeta::new_readonly(keys.roots.dex_program, false),
        AccountMeta::new(market.address, false),
        AccountMeta::new(market.bids, false),
        AccountMeta::new(market.asks, false),
        AccountMeta::new(market.event_queue, false),
        AccountMeta::new(market.base_vault, false),
        AccountMeta::new(market.quote_vault, false),
        AccountMeta::new_readonly(*vault_signer, false),
        AccountMeta::new(user.source, false),
        AccountMeta::new(user.destination, false),
        AccountMeta::new_readonly(user.owner, true),
    ]
}

fn swap_instruction(
    tag: u8,
    keys: &PoolKeys,
    market: &MarketInfo,
    vault_signer: &Pubkey,
    user: &SwapAccounts,
    first: u64,
    second: u64,
) -> Instruction {
    let mut data = Vec::with_capacity(17);
    data.push(tag);
    data.extend_from_slice(&first.to_le_bytes());
    data.extend_from_slice(&second.to_le_bytes());

    Instruction {
        program_id: keys.roots.amm_program,
        accounts: swap_accounts(keys, market, vault_signer, user),
        data,
    }
}

/// Swap an exact input amount, failing on-chain below `minimum_amount_out`
pub fn swap_base_in(
    keys: &PoolKeys,
    market: &MarketInfo,
    vault_signer: &Pubkey,
    user: &SwapAccounts,
    amount_in: u64,
    minimum_amount_out: u64,
) -> Instruction {
    swap_instruction(IX_SWAP_BASE_IN, keys, market, vault_signer, user, amount_in, minimum_amount_out)
}

/// Swap for an exact output amount, spending at most `max_amount_in`
pub fn swap_base_out(
    keys: &PoolKeys,
    market: &MarketInfo,
    vault_signer: &Pubkey,
    user: &SwapAccounts,
    max_amount_in: u64,
    amount_out: u64,
) -> Instruction {
    swap_instruction(IX_SWAP_BASE_OUT, keys, market, vault_signer, user, max_amount_in, amount_out)
}

/// Instruction tag, for callers inspecting built or recorded instructions
pub fn instruction_tag(ix: &Instruction) -> Option<u8> {
    ix.data.first().copied()
}
