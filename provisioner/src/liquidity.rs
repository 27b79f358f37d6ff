//! Initial liquidity: volume computation and the vault funding transaction

use crate::derive::PoolKeys;
use crate::error::{ProvisionError, ProvisionResult};
use crate::ledger::{HeldTokenAccount, Ledger};
use crate::probe::ChainStateProbe;
use crate::stage::Stage;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use solana_sdk::{
    instruction::Instruction,
    program_pack::Pack,
    pubkey::Pubkey,
    signature::{Keypair, Signature, Signer},
    system_instruction,
};
use spl_associated_token_account::{get_associated_token_address, instruction::create_associated_token_account_idempotent};
use spl_token::{instruction as token_instruction, native_mint};

/// Initial deposit in base units
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LiquidityPlan {
    pub base_volume: u64,
    pub quote_volume: u64,
}

/// `volume = trunc(quantity * 10^decimals)`, in exact decimal arithmetic
pub fn compute_volumes(
    base_decimals: u8,
    quote_decimals: u8,
    base_quantity: Decimal,
    quote_quantity: Decimal,
) -> ProvisionResult<LiquidityPlan> {
    Ok(LiquidityPlan {
        base_volume: to_base_units(base_quantity, base_decimals)?,
        quote_volume: to_base_units(quote_quantity, quote_decimals)?,
    })
}

pub fn to_base_units(quantity: Decimal, decimals: u8) -> ProvisionResult<u64> {
    if quantity.is_sign_negative() && !quantity.is_zero() {
        return Err(ProvisionError::InvalidAmount(format!("negative quantity {}", quantity)));
    }
    let out_of_range = || ProvisionError::InvalidAmount(format!("{} at {} decimals exceeds u64", quantity, decimals));

    let scale = 10u64.checked_pow(u32::from(decimals)).ok_or_else(out_of_range)?;
    quantity
        .checked_mul(Decimal::from(scale))
        .map(|v| v.trunc())
        .and_then(|v| v.to_u64())
        .ok_or_else(out_of_range)
}

/// Where one side of the deposit comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FundingSource {
    /// Existing token account holding at least the volume
    Held(HeldTokenAccount),
    /// Wrap native balance into a transient token account
    WrapNative { rent: u64 },
}

/// Instructions plus the extra signers they need
#[derive(Default)]
pub struct FundingTransaction {
    pub instructions: Vec<Instruction>,
    pub signers: Vec<Keypair>,
}

impl FundingTransaction {
    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    pub fn signer_refs(&self) -> Vec<&Keypair> {
        self.signers.iter().collect()
    }
}

pub struct LiquiditySeeder<'a, L: Ledger + ?Sized> {
    ledger: &'a L,
}

impl<'a, L: Ledger + ?Sized> LiquiditySeeder<'a, L> {
    pub fn new(ledger: &'a L) -> Self {
        Self { ledger }
    }

    /// Read both mints' decimals and turn user quantities into volumes
    pub fn plan(&self, keys: &PoolKeys, base_quantity: Decimal, quote_quantity: Decimal) -> ProvisionResult<LiquidityPlan> {
        let probe = ChainStateProbe::new(self.ledger);
        let base = probe.mint(&keys.roots.base_mint)?;
        let quote = probe.mint(&keys.roots.quote_mint)?;
        compute_volumes(base.decimals, quote.decimals, base_quantity, quote_quantity)
    }

    /// Largest held account covering `volume`, or native wrapping for the
    /// native mint. Errors with `InsufficientFunds` when neither works.
    pub fn select_source(&self, owner: &Pubkey, mint: &Pubkey, volume: u64) -> ProvisionResult<FundingSource> {
        let insufficient = || ProvisionError::InsufficientFunds {
            mint: *mint,
            required: volume,
        };

        if *mint == native_mint::id() {
            let rent = self
                .ledger
                .minimum_balance_for_rent_exemption(spl_token::state::Account::LEN)?;
            let needed = volume.checked_add(rent).ok_or_else(insufficient)?;
            let balance = self.ledger.native_balance(owner)?;
            log::debug!("Native balance {} lamports, need {} to wrap", balance, needed);
            return if balance >= needed {
                Ok(FundingSource::WrapNative { rent })
            } else {
                Err(insufficient())
            };
        }

        self.ledger
            .token_accounts_by_owner(owner, mint)?
            .into_iter()
            .filter(|held| held.amount >= volume)
            .max_by_key(|held| held.amount)
            .map(FundingSource::Held)
            .ok_or_else(insufficient)
    }

    /// Queue the vault transfers for `plan` into `tx`.
    ///
    /// Both sides are resolved before anything is queued, so a funding
    /// shortfall leaves `tx` untouched.
    pub fn fund_vaults(
        &self,
        plan: &LiquidityPlan,
        owner: &Pubkey,
        keys: &PoolKeys,
        tx: &mut FundingTransaction,
    ) -> ProvisionResult<()> {
        let base = self.select_source(owner, &keys.roots.base_mint, plan.base_volume)?;
        let quote = self.select_source(owner, &keys.roots.quote_mint, plan.quote_volume)?;
        log::info!("Funding sources: base {:?}, quote {:?}", base, quote);

        // initialize mints LP tokens into this account
        tx.instructions.push(create_associated_token_account_idempotent(
            owner,
            owner,
            &keys.lp_mint,
            &spl_token::id(),
        ));

        queue_transfer(tx, owner, base, &keys.base_vault, plan.base_volume)?;
        queue_transfer(tx, owner, quote, &keys.quote_vault, plan.quote_volume)?;
        Ok(())
    }

    /// Compute, fund and submit the initial deposit
    pub fn seed(
        &self,
        payer: &Keypair,
        keys: &PoolKeys,
        base_quantity: Decimal,
        quote_quantity: Decimal,
    ) -> ProvisionResult<Signature> {
        let plan = self.plan(keys, base_quantity, quote_quantity)?;
        log::info!(
            "Liquidity plan: base {} ({} units), quote {} ({} units)",
            base_quantity,
            plan.base_volume,
            quote_quantity,
            plan.quote_volume
        );

        let mut tx = FundingTransaction::default();
        self.fund_vaults(&plan, &payer.pubkey(), keys, &mut tx)?;
        self.ledger
            .submit(Stage::SeedLiquidity, &tx.instructions, payer, &tx.signer_refs())
    }
}

fn token_ix(result: Result<Instruction, solana_sdk::program_error::ProgramError>) -> ProvisionResult<Instruction> {
    result.map_err(|e| ProvisionError::submission(Stage::SeedLiquidity, format!("token instruction: {}", e)))
}

fn queue_transfer(
    tx: &mut FundingTransaction,
    owner: &Pubkey,
    source: FundingSource,
    vault: &Pubkey,
    volume: u64,
) -> ProvisionResult<()> {
    let token_program = spl_token::id();
    match source {
        FundingSource::Held(held) => {
            tx.instructions.push(token_ix(token_instruction::transfer(
                &token_program,
                &held.address,
                vault,
                owner,
                &[],
                volume,
            ))?);
        }
        FundingSource::WrapNative { rent } => {
            // create, fill, drain and close in one transaction
            let temp = Keypair::new();
            let wrapped = temp.pubkey();
            tx.instructions.push(system_instruction::create_account(
                owner,
                &wrapped,
                volume + rent,
                spl_token::state::Account::LEN as u64,
                &token_program,
            ));
            tx.instructions.push(token_ix(token_instruction::initialize_account(
                &token_program,
                &wrapped,
                &native_mint::id(),
                owner,
            ))?);
            tx.instructions.push(token_ix(token_instruction::transfer(
                &token_program,
                &wrapped,
                vault,
                owner,
                &[],
                volume,
            ))?);
            tx.instructions.push(token_ix(token_instruction::close_account(
                &token_program,
                &wrapped,
                owner,
                owner,
                &[],
            ))?);
            tx.signers.push(temp);
        }
    }
    Ok(())
}

/// Owner's associated LP account for a pool
pub fn owner_lp_account(owner: &Pubkey, keys: &PoolKeys) -> Pubkey {
    get_associated_token_address(owner, &keys.lp_mint)
}
