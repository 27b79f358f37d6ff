//! In-memory ledger for unit tests.
//!
//! Applies the effects of the instructions the provisioner sends (account
//! creation, mint/token bookkeeping, market and pool initialization) so the
//! probes see the same progression a validator would show. Every submission
//! is applied atomically and recorded.

use crate::derive::PoolKeys;
use crate::dex::MarketInfo;
use crate::error::{ProvisionError, ProvisionResult};
use crate::ledger::{HeldTokenAccount, Ledger, TokenBalance};
use crate::stage::Stage;
use solana_sdk::{
    account::Account,
    instruction::Instruction,
    program_option::COption,
    program_pack::Pack,
    pubkey::Pubkey,
    signature::{Keypair, Signature, Signer},
    system_program,
};
use spl_token::instruction::TokenInstruction;
use spl_token::state::Mint;
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};

const LP_MINTED_ON_INITIALIZE: u64 = 1_000_000;
const POOL_ACCOUNT_LEN: usize = 752;

pub fn mint_account(decimals: u8, supply: u64) -> Account {
    let mut data = vec![0u8; Mint::LEN];
    Mint::pack(
        Mint {
            mint_authority: COption::None,
            supply,
            decimals,
            is_initialized: true,
            freeze_authority: COption::None,
        },
        &mut data,
    )
    .unwrap();
    Account {
        lamports: rent_for(Mint::LEN),
        data,
        owner: spl_token::id(),
        executable: false,
        rent_epoch: 0,
    }
}

/// Number of token-program transfers in `instructions`
pub fn transfer_count(instructions: &[Instruction]) -> usize {
    instructions
        .iter()
        .filter(|ix| ix.program_id == spl_token::id() && ix.data.first() == Some(&3))
        .count()
}

fn rent_for(data_len: usize) -> u64 {
    (data_len as u64 + 128) * 3480 * 2
}

fn token_account(owner: &Pubkey) -> Account {
    Account {
        lamports: rent_for(spl_token::state::Account::LEN),
        data: vec![0u8; spl_token::state::Account::LEN],
        owner: *owner,
        executable: false,
        rent_epoch: 0,
    }
}

#[derive(Clone, Default)]
struct State {
    accounts: HashMap<Pubkey, Account>,
    balances: HashMap<Pubkey, TokenBalance>,
    held: Vec<(Pubkey, Pubkey, Pubkey)>,
    native: HashMap<Pubkey, u64>,
}

impl State {
    fn mint(&self, mint: &Pubkey) -> Option<Mint> {
        let account = self.accounts.get(mint)?;
        Mint::unpack_from_slice(account.data.get(..Mint::LEN)?).ok()
    }

    fn decimals(&self, mint: &Pubkey) -> u8 {
        self.mint(mint).map(|m| m.decimals).unwrap_or(0)
    }

    fn write_mint(&mut self, address: Pubkey, mint: Mint) {
        let account = self.accounts.entry(address).or_insert_with(|| mint_account(0, 0));
        account.data.resize(Mint::LEN, 0);
        Mint::pack(mint, &mut account.data).unwrap();
        account.owner = spl_token::id();
    }

    fn set_amount(&mut self, account: Pubkey, amount: u64, decimals: u8) {
        self.balances.insert(
            account,
            TokenBalance {
                amount,
                decimals,
                ui_amount: amount.to_string(),
            },
        );
    }

    fn open_token_account(&mut self, address: Pubkey, mint: &Pubkey, amount: u64) {
        let decimals = self.decimals(mint);
        self.accounts
            .entry(address)
            .or_insert_with(|| token_account(&spl_token::id()));
        if !self.balances.contains_key(&address) {
            self.set_amount(address, amount, decimals);
        }
    }

    fn credit(&mut self, account: &Pubkey, amount: u64) -> Result<(), String> {
        let entry = self.balances.entry(*account).or_insert(TokenBalance {
            amount: 0,
            decimals: 0,
            ui_amount: "0".into(),
        });
        entry.amount = entry
            .amount
            .checked_add(amount)
            .ok_or_else(|| format!("balance overflow on {}", account))?;
        entry.ui_amount = entry.amount.to_string();
        Ok(())
    }

    fn debit(&mut self, account: &Pubkey, amount: u64) -> Result<(), String> {
        let entry = self
            .balances
            .get_mut(account)
            .ok_or_else(|| format!("token account {} does not exist", account))?;
        entry.amount = entry
            .amount
            .checked_sub(amount)
            .ok_or_else(|| format!("insufficient funds in {}", account))?;
        entry.ui_amount = entry.amount.to_string();
        Ok(())
    }
}

pub struct MockLedger {
    state: RefCell<State>,
    submissions: RefCell<Vec<(Stage, Vec<Instruction>)>>,
    fail_reads: RefCell<bool>,
    fail_at: RefCell<Option<Stage>>,
    swap_fill: RefCell<Option<[(Pubkey, u64); 2]>>,
    dex_program: Option<Pubkey>,
    amm_program: Option<Pubkey>,
}

impl MockLedger {
    pub fn new() -> Self {
        Self {
            state: RefCell::new(State::default()),
            submissions: RefCell::new(Vec::new()),
            fail_reads: RefCell::new(false),
            fail_at: RefCell::new(None),
            swap_fill: RefCell::new(None),
            dex_program: None,
            amm_program: None,
        }
    }

    /// Simulate market initialization for this exchange program
    pub fn with_dex(mut self, dex_program: Pubkey) -> Self {
        self.dex_program = Some(dex_program);
        self
    }

    /// Simulate pre_initialize/initialize for this AMM program
    pub fn with_amm(mut self, amm_program: Pubkey) -> Self {
        self.amm_program = Some(amm_program);
        self
    }

    pub fn put_account(&self, address: Pubkey, account: Account) {
        self.state.borrow_mut().accounts.insert(address, account);
    }

    /// Store an initialized market for `keys` declaring `vault_signer_nonce`
    pub fn put_market(&self, keys: &PoolKeys, vault_signer_nonce: u64) {
        let info = MarketInfo {
            address: keys.roots.market,
            base_mint: keys.roots.base_mint,
            quote_mint: keys.roots.quote_mint,
            base_vault: Pubkey::new_unique(),
            quote_vault: Pubkey::new_unique(),
            request_queue: Pubkey::new_unique(),
            event_queue: Pubkey::new_unique(),
            bids: Pubkey::new_unique(),
            asks: Pubkey::new_unique(),
            vault_signer_nonce,
            base_lot_size: 1,
            quote_lot_size: 1,
        };
        self.put_account(
            info.address,
            Account {
                lamports: rent_for(crate::dex::MARKET_STATE_LEN),
                data: info.pack(),
                owner: keys.roots.dex_program,
                executable: false,
                rent_epoch: 0,
            },
        );
    }

    pub fn fail_reads(&self, fail: bool) {
        *self.fail_reads.borrow_mut() = fail;
    }

    /// Reject every submission for `stage` without applying it
    pub fn fail_submissions_at(&self, stage: Option<Stage>) {
        *self.fail_at.borrow_mut() = stage;
    }

    pub fn submission_count(&self) -> usize {
        self.submissions.borrow().len()
    }

    pub fn submitted_stages(&self) -> Vec<Stage> {
        self.submissions.borrow().iter().map(|(stage, _)| *stage).collect()
    }

    /// Register a non-associated token account for `owner`
    pub fn add_token_account(&self, owner: Pubkey, mint: Pubkey, amount: u64) -> Pubkey {
        let address = Pubkey::new_unique();
        let mut state = self.state.borrow_mut();
        state.open_token_account(address, &mint, amount);
        state.held.push((owner, mint, address));
        address
    }

    pub fn set_native_balance(&self, owner: Pubkey, lamports: u64) {
        self.state.borrow_mut().native.insert(owner, lamports);
    }

    pub fn set_token_balance(&self, account: Pubkey, amount: u64, decimals: u8) {
        self.state.borrow_mut().set_amount(account, amount, decimals);
    }

    /// Balances the next swap submission leaves behind
    pub fn script_swap_fill(&self, source: Pubkey, source_after: u64, destination: Pubkey, destination_after: u64) {
        *self.swap_fill.borrow_mut() = Some([(source, source_after), (destination, destination_after)]);
    }

    fn check_reads(&self) -> ProvisionResult<()> {
        if *self.fail_reads.borrow() {
            return Err(ProvisionError::ProbeUnavailable("connection refused".into()));
        }
        Ok(())
    }

    fn apply(&self, state: &mut State, stage: Stage, ix: &Instruction) -> Result<(), String> {
        let key = |i: usize| {
            ix.accounts
                .get(i)
                .map(|meta| meta.pubkey)
                .ok_or_else(|| format!("missing account #{}", i))
        };

        if ix.program_id == system_program::id() {
            // CreateAccount { lamports, space, owner }
            if ix.data.get(..4) == Some(&0u32.to_le_bytes()[..]) && ix.data.len() >= 52 {
                let lamports = u64::from_le_bytes(ix.data[4..12].try_into().unwrap());
                let space = u64::from_le_bytes(ix.data[12..20].try_into().unwrap()) as usize;
                let owner = Pubkey::try_from(&ix.data[20..52]).unwrap();
                let address = key(1)?;
                if state.accounts.contains_key(&address) {
                    return Err(format!("account {} already in use", address));
                }
                state.accounts.insert(
                    address,
                    Account {
                        lamports,
                        data: vec![0u8; space],
                        owner,
                        executable: false,
                        rent_epoch: 0,
                    },
                );
            }
            return Ok(());
        }

        if ix.program_id == spl_associated_token_account::id() {
            let address = key(1)?;
            let mint = key(3)?;
            let idempotent = ix.data.first() == Some(&1);
            if state.accounts.contains_key(&address) {
                return if idempotent {
                    Ok(())
                } else {
                    Err(format!("associated account {} already exists", address))
                };
            }
            state.open_token_account(address, &mint, 0);
            state.held.push((key(2)?, mint, address));
            return Ok(());
        }

        if ix.program_id == spl_token::id() {
            let unpacked = TokenInstruction::unpack(&ix.data).map_err(|e| e.to_string())?;
            match unpacked {
                TokenInstruction::InitializeMint2 {
                    decimals,
                    mint_authority,
                    freeze_authority,
                } => {
                    state.write_mint(
                        key(0)?,
                        Mint {
                            mint_authority: COption::Some(mint_authority),
                            supply: 0,
                            decimals,
                            is_initialized: true,
                            freeze_authority,
                        },
                    );
                }
                TokenInstruction::InitializeAccount => {
                    let address = key(0)?;
                    let mint = key(1)?;
                    let wrapped = if mint == spl_token::native_mint::id() {
                        let lamports = state.accounts.get(&address).map(|a| a.lamports).unwrap_or(0);
                        lamports.saturating_sub(rent_for(spl_token::state::Account::LEN))
                    } else {
                        0
                    };
                    state.open_token_account(address, &mint, wrapped);
                }
                TokenInstruction::MintTo { amount } => {
                    let mint_key = key(0)?;
                    let mut mint = state.mint(&mint_key).ok_or_else(|| format!("mint {} missing", mint_key))?;
                    mint.supply = mint.supply.checked_add(amount).ok_or("supply overflow")?;
                    state.write_mint(mint_key, mint);
                    let destination = key(1)?;
                    state.open_token_account(destination, &mint_key, 0);
                    state.credit(&destination, amount)?;
                }
                TokenInstruction::Transfer { amount } => {
                    state.debit(&key(0)?, amount)?;
                    state.credit(&key(1)?, amount)?;
                }
                TokenInstruction::CloseAccount => {
                    let address = key(0)?;
                    state.accounts.remove(&address);
                    state.balances.remove(&address);
                }
                _ => {}
            }
            return Ok(());
        }

        if Some(ix.program_id) == self.dex_program && ix.data.get(1..5) == Some(&0u32.to_le_bytes()[..]) {
            if ix.data.len() < 39 {
                return Err("short initialize-market data".into());
            }
            let int = |offset: usize| u64::from_le_bytes(ix.data[offset..offset + 8].try_into().unwrap());
            let info = MarketInfo {
                address: key(0)?,
                request_queue: key(1)?,
                event_queue: key(2)?,
                bids: key(3)?,
                asks: key(4)?,
                base_vault: key(5)?,
                quote_vault: key(6)?,
                base_mint: key(7)?,
                quote_mint: key(8)?,
                base_lot_size: int(5),
                quote_lot_size: int(13),
                vault_signer_nonce: int(23),
            };
            let market = state
                .accounts
                .get_mut(&info.address)
                .ok_or_else(|| format!("market account {} not allocated", info.address))?;
            market.data = info.pack();
            return Ok(());
        }

        if Some(ix.program_id) == self.amm_program {
            match ix.data.first() {
                Some(&crate::amm::IX_PRE_INITIALIZE) => {
                    let lp_mint = key(6)?;
                    let decimals = state.decimals(&key(7)?);
                    // resubmission keeps what the first call created
                    if state.mint(&lp_mint).is_none() {
                        state.write_mint(
                            lp_mint,
                            Mint {
                                mint_authority: COption::Some(key(5)?),
                                supply: 0,
                                decimals,
                                is_initialized: true,
                                freeze_authority: COption::None,
                            },
                        );
                    }
                    for (vault, mint) in [(key(9)?, key(7)?), (key(10)?, key(8)?), (key(11)?, lp_mint)] {
                        state.open_token_account(vault, &mint, 0);
                    }
                    for bookkeeping in [key(3)?, key(4)?] {
                        state.accounts.entry(bookkeeping).or_insert_with(|| token_account(&ix.program_id));
                    }
                }
                Some(&crate::amm::IX_INITIALIZE) => {
                    let pool = key(3)?;
                    let lp_key = key(6)?;
                    let mut lp = state
                        .mint(&lp_key)
                        .ok_or_else(|| format!("lp mint {} not pre-initialized", lp_key))?;
                    lp.supply = lp
                        .supply
                        .checked_add(LP_MINTED_ON_INITIALIZE)
                        .ok_or("lp supply overflow")?;
                    state.write_mint(lp_key, lp);
                    let owner_lp = key(13)?;
                    state.open_token_account(owner_lp, &lp_key, 0);
                    state.credit(&owner_lp, LP_MINTED_ON_INITIALIZE)?;
                    state.accounts.insert(
                        pool,
                        Account {
                            lamports: rent_for(POOL_ACCOUNT_LEN),
                            data: vec![1u8; POOL_ACCOUNT_LEN],
                            owner: ix.program_id,
                            executable: false,
                            rent_epoch: 0,
                        },
                    );
                }
                _ => {}
            }
        }

        if stage == Stage::Swap {
            if let Some(fill) = self.swap_fill.borrow_mut().take() {
                for (account, amount) in fill {
                    let decimals = state.balances.get(&account).map(|b| b.decimals).unwrap_or(0);
                    state.set_amount(account, amount, decimals);
                }
            }
        }
        Ok(())
    }
}

impl Ledger for MockLedger {
    fn get_multiple_accounts(&self, addresses: &[Pubkey]) -> ProvisionResult<Vec<Option<Account>>> {
        self.check_reads()?;
        let state = self.state.borrow();
        Ok(addresses.iter().map(|a| state.accounts.get(a).cloned()).collect())
    }

    fn token_balance(&self, token_account: &Pubkey) -> ProvisionResult<TokenBalance> {
        self.check_reads()?;
        self.state
            .borrow()
            .balances
            .get(token_account)
            .cloned()
            .ok_or_else(|| ProvisionError::ProbeUnavailable(format!("could not find account {}", token_account)))
    }

    fn token_accounts_by_owner(&self, owner: &Pubkey, mint: &Pubkey) -> ProvisionResult<Vec<HeldTokenAccount>> {
        self.check_reads()?;
        let state = self.state.borrow();
        Ok(state
            .held
            .iter()
            .filter(|(o, m, _)| o == owner && m == mint)
            .filter_map(|(_, _, address)| {
                state.balances.get(address).map(|b| HeldTokenAccount {
                    address: *address,
                    amount: b.amount,
                })
            })
            .collect())
    }

    fn native_balance(&self, owner: &Pubkey) -> ProvisionResult<u64> {
        self.check_reads()?;
        Ok(self.state.borrow().native.get(owner).copied().unwrap_or(0))
    }

    fn minimum_balance_for_rent_exemption(&self, data_len: usize) -> ProvisionResult<u64> {
        self.check_reads()?;
        Ok(rent_for(data_len))
    }

    fn submit(
        &self,
        stage: Stage,
        instructions: &[Instruction],
        payer: &Keypair,
        extra_signers: &[&Keypair],
    ) -> ProvisionResult<Signature> {
        if *self.fail_at.borrow() == Some(stage) {
            return Err(ProvisionError::submission(stage, "simulated rejection"));
        }

        let signed: HashSet<Pubkey> = std::iter::once(payer.pubkey())
            .chain(extra_signers.iter().map(|kp| kp.pubkey()))
            .collect();
        for meta in instructions.iter().flat_map(|ix| ix.accounts.iter()) {
            if meta.is_signer && !signed.contains(&meta.pubkey) {
                return Err(ProvisionError::submission(
                    stage,
                    format!("missing signature for {}", meta.pubkey),
                ));
            }
        }

        let mut next = self.state.borrow().clone();
        for ix in instructions {
            self.apply(&mut next, stage, ix)
                .map_err(|reason| ProvisionError::submission(stage, reason))?;
        }
        *self.state.borrow_mut() = next;

        let mut submissions = self.submissions.borrow_mut();
        submissions.push((stage, instructions.to_vec()));
        let mut bytes = [0u8; 64];
        bytes[..8].copy_from_slice(&(submissions.len() as u64).to_le_bytes());
        Ok(Signature::from(bytes))
    }
}
