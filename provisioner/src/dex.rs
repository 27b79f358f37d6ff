//! Client side of the order-book exchange: market layout, vault signer
//! derivation and the market-creation instruction set

use crate::error::{ProvisionError, ProvisionResult};
use solana_sdk::{
    instruction::{AccountMeta, Instruction},
    program_pack::Pack,
    pubkey::Pubkey,
    signature::{Keypair, Signer},
    system_instruction, sysvar,
};

/// Market account size (5-byte head + state + 7-byte tail)
pub const MARKET_STATE_LEN: usize = 388;
pub const REQUEST_QUEUE_LEN: usize = 5120 + 12;
pub const EVENT_QUEUE_LEN: usize = 262_144 + 12;
pub const ORDER_BOOK_LEN: usize = 65_536 + 12;

const IX_INITIALIZE_MARKET: u32 = 0;
const MAX_VAULT_NONCE: u64 = 255;

// Byte offsets into the market account
const OWN_ADDRESS: usize = 13;
const VAULT_SIGNER_NONCE: usize = 45;
const BASE_MINT: usize = 53;
const QUOTE_MINT: usize = 85;
const BASE_VAULT: usize = 117;
const QUOTE_VAULT: usize = 165;
const REQUEST_QUEUE: usize = 221;
const EVENT_QUEUE: usize = 253;
const BIDS: usize = 285;
const ASKS: usize = 317;
const BASE_LOT_SIZE: usize = 349;
const QUOTE_LOT_SIZE: usize = 357;
const MARKET_STATE_END: usize = 381;

/// Parameters of a market to create
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MarketParams {
    pub base_mint: Pubkey,
    pub quote_mint: Pubkey,
    pub base_lot_size: u64,
    pub quote_lot_size: u64,
    pub fee_rate_bps: u16,
    pub pc_dust_threshold: u64,
}

/// Decoded order-book market
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MarketInfo {
    pub address: Pubkey,
    pub base_mint: Pubkey,
    pub quote_mint: Pubkey,
    pub base_vault: Pubkey,
    pub quote_vault: Pubkey,
    pub request_queue: Pubkey,
    pub event_queue: Pubkey,
    pub bids: Pubkey,
    pub asks: Pubkey,
    pub vault_signer_nonce: u64,
    pub base_lot_size: u64,
    pub quote_lot_size: u64,
}

fn read_u64(data: &[u8], offset: usize) -> Option<u64> {
    let bytes = data.get(offset..offset + 8)?;
    let mut buf = [0u8; 8];
    buf.copy_from_slice(bytes);
    Some(u64::from_le_bytes(buf))
}

fn read_pubkey(data: &[u8], offset: usize) -> Option<Pubkey> {
    let bytes = data.get(offset..offset + 32)?;
    let mut buf = [0u8; 32];
    buf.copy_from_slice(bytes);
    Some(Pubkey::new_from_array(buf))
}

impl MarketInfo {
    pub fn decode(address: Pubkey, data: &[u8]) -> ProvisionResult<Self> {
        let fail = |reason: &str| ProvisionError::MarketDecode {
            address,
            reason: reason.to_string(),
        };
        if data.len() < MARKET_STATE_END {
            return Err(fail(&format!("account is {} bytes", data.len())));
        }

        let key = |offset| read_pubkey(data, offset).ok_or_else(|| fail("truncated key"));
        let int = |offset| read_u64(data, offset).ok_or_else(|| fail("truncated integer"));

        if key(OWN_ADDRESS)? != address {
            return Err(fail("stored own address differs from account address"));
        }

        Ok(Self {
            address,
            base_mint: key(BASE_MINT)?,
            quote_mint: key(QUOTE_MINT)?,
            base_vault: key(BASE_VAULT)?,
            quote_vault: key(QUOTE_VAULT)?,
            request_queue: key(REQUEST_QUEUE)?,
            event_queue: key(EVENT_QUEUE)?,
            bids: key(BIDS)?,
            asks: key(ASKS)?,
            vault_signer_nonce: int(VAULT_SIGNER_NONCE)?,
            base_lot_size: int(BASE_LOT_SIZE)?,
            quote_lot_size: int(QUOTE_LOT_SIZE)?,
        })
    }

    /// Inverse of `decode`, used by the in-memory ledger
    #[cfg(test)]
    pub(crate) fn pack(&self) -> Vec<u8> {
        let mut data = vec![0u8; MARKET_STATE_LEN];
        data[..5].copy_from_slice(b"serum");
        let mut put_key = |offset: usize, key: &Pubkey| data[offset..offset + 32].copy_from_slice(key.as_ref());
        put_key(OWN_ADDRESS, &self.address);
        put_key(BASE_MINT, &self.base_mint);
        put_key(QUOTE_MINT, &self.quote_mint);
        put_key(BASE_VAULT, &self.base_vault);
        put_key(QUOTE_VAULT, &self.quote_vault);
        put_key(REQUEST_QUEUE, &self.request_queue);
        put_key(EVENT_QUEUE, &self.event_queue);
        put_key(BIDS, &self.bids);
        put_key(ASKS, &self.asks);
        data[VAULT_SIGNER_NONCE..VAULT_SIGNER_NONCE + 8].copy_from_slice(&self.vault_signer_nonce.to_le_bytes());
        data[BASE_LOT_SIZE..BASE_LOT_SIZE + 8].copy_from_slice(&self.base_lot_size.to_le_bytes());
        data[QUOTE_LOT_SIZE..QUOTE_LOT_SIZE + 8].copy_from_slice(&self.quote_lot_size.to_le_bytes());
        data
    }
}

/// Vault signer of a market: first nonce whose seed yields a valid program address
pub fn vault_signer_and_nonce(market: &Pubkey, dex_program: &Pubkey) -> ProvisionResult<(Pubkey, u64)> {
    (0..=MAX_VAULT_NONCE)
        .find_map(|nonce| {
            Pubkey::create_program_address(&[market.as_ref(), &nonce.to_le_bytes()], dex_program)
                .ok()
                .map(|signer| (signer, nonce))
        })
        .ok_or_else(|| ProvisionError::Derivation(format!("no vault signer nonce for market {}", market)))
}

/// Recompute the vault signer and check it against the nonce the market declares
pub fn verify_vault_signer(market: &MarketInfo, dex_program: &Pubkey) -> ProvisionResult<Pubkey> {
    let (signer, derived) = vault_signer_and_nonce(&market.address, dex_program)?;
    check_vault_nonce(market, derived)?;
    Ok(signer)
}

fn check_vault_nonce(market: &MarketInfo, derived: u64) -> ProvisionResult<()> {
    if derived != market.vault_signer_nonce {
        return Err(ProvisionError::VaultNonceMismatch {
            market: market.address,
            derived,
            declared: market.vault_signer_nonce,
        });
    }
    Ok(())
}

/// Build the exchange's initialize-market instruction
pub fn initialize_market_instruction(
    dex_program: &Pubkey,
    accounts: &MarketAccounts,
    params: &MarketParams,
    vault_signer_nonce: u64,
) -> Instruction {
    let mut data = Vec::with_capacity(1 + 4 + 8 + 8 + 2 + 8 + 8);
    data.push(0u8); // layout version
    data.extend_from_slice(&IX_INITIALIZE_MARKET.to_le_bytes());
    data.extend_from_slice(&params.base_lot_size.to_le_bytes());
    data.extend_from_slice(&params.quote_lot_size.to_le_bytes());
    data.extend_from_slice(&params.fee_rate_bps.to_le_bytes());
    data.extend_from_slice(&vault_signer_nonce.to_le_bytes());
    data.extend_from_slice(&params.pc_dust_threshold.to_le_bytes());

    Instruction {
        program_id: *dex_program,
        accounts: vec![
            AccountMeta::new(accounts.market, false),
            AccountMeta::new(accounts.request_queue, false),
            AccountMeta::new(accounts.event_queue, false),
            AccountMeta::new(accounts.bids, false),
            AccountMeta::new(accounts.asks, false),
            AccountMeta::new(accounts.base_vault, false),
            AccountMeta::new(accounts.quote_vault, false),
            AccountMeta::new_readonly(params.base_mint, false),
            AccountMeta::new_readonly(params.quote_mint, false),
            AccountMeta::new_readonly(sysvar::rent::id(), false),
        ],
        data,
    }
}

/// Addresses of the accounts a new market is made of
#[derive(Debug, Clone, Copy)]
pub struct MarketAccounts {
    pub market: Pubkey,
    pub request_queue: Pubkey,
    pub event_queue: Pubkey,
    pub bids: Pubkey,
    pub asks: Pubkey,
    pub base_vault: Pubkey,
    pub quote_vault: Pubkey,
}

/// One transaction of the market-creation set
pub struct MarketTransaction {
    pub instructions: Vec<Instruction>,
    pub signers: Vec<Keypair>,
}

/// Rent-exempt lamports for each account size, in the order
/// token account, market, request queue, event queue, order book side
pub struct MarketRent {
    pub token_account: u64,
    pub market: u64,
    pub request_queue: u64,
    pub event_queue: u64,
    pub order_book: u64,
}

/// Build the two transactions that create a market: vaults first, then
/// the market and its queues.
pub fn create_market_transactions(
    payer: &Pubkey,
    market: &Pubkey,
    dex_program: &Pubkey,
    params: &MarketParams,
    rent: &MarketRent,
) -> ProvisionResult<Vec<MarketTransaction>> {
    let (vault_signer, nonce) = vault_signer_and_nonce(market, dex_program)?;
    let token_program = spl_token::id();

    let base_vault = Keypair::new();
    let quote_vault = Keypair::new();
    let mut vault_ixs = Vec::with_capacity(4);
    for (vault, mint) in [(&base_vault, &params.base_mint), (&quote_vault, &params.quote_mint)] {
        vault_ixs.push(system_instruction::create_account(
            payer,
            &vault.pubkey(),
            rent.token_account,
            spl_token::state::Account::LEN as u64,
            &token_program,
        ));
        vault_ixs.push(
            spl_token::instruction::initialize_account(&token_program, &vault.pubkey(), mint, &vault_signer)
                .map_err(|e| ProvisionError::Derivation(format!("vault init instruction: {}", e)))?,
        );
    }

    let request_queue = Keypair::new();
    let event_queue = Keypair::new();
    let bids = Keypair::new();
    let asks = Keypair::new();

    let accounts = MarketAccounts {
        market: *market,
        request_queue: request_queue.pubkey(),
        event_queue: event_queue.pubkey(),
        bids: bids.pubkey(),
        asks: asks.pubkey(),
        base_vault: base_vault.pubkey(),
        quote_vault: quote_vault.pubkey(),
    };

    let sized = [
        (accounts.market, rent.market, MARKET_STATE_LEN),
        (accounts.request_queue, rent.request_queue, REQUEST_QUEUE_LEN),
        (accounts.event_queue, rent.event_queue, EVENT_QUEUE_LEN),
        (accounts.bids, rent.order_book, ORDER_BOOK_LEN),
        (accounts.asks, rent.order_book, ORDER_BOOK_LEN),
    ];
    let mut market_ixs: Vec<Instruction> = sized
        .iter()
        .map(|(address, lamports, len)| {
            system_instruction::create_account(payer, address, *lamports, *len as u64, dex_program)
        })
        .collect();
    market_ixs.push(initialize_market_instruction(dex_program, &accounts, params, nonce));

    Ok(vec![
        MarketTransaction {
            instructions: vault_ixs,
            signers: vec![base_vault, quote_vault],
        },
        MarketTransaction {
            instructions: market_ixs,
            signers: vec![request_queue, event_queue, bids, asks],
        },
    ])
}
