//! Token-service helpers: owner associated accounts and test token deployment

use crate::error::{ProvisionError, ProvisionResult};
use crate::ledger::{Ledger, TokenBalance};
use crate::probe::ChainStateProbe;
use crate::stage::Stage;
use solana_sdk::{
    instruction::Instruction,
    program_pack::Pack,
    pubkey::Pubkey,
    signature::{Keypair, Signer},
    system_instruction,
};
use spl_associated_token_account::{get_associated_token_address, instruction::create_associated_token_account};
use spl_token::state::Mint;
use std::thread;
use std::time::Duration;

/// Creation instructions for each of `owner`'s associated accounts that the
/// ledger does not hold yet. Existing accounts are left out.
pub fn missing_associated_accounts<L: Ledger + ?Sized>(
    ledger: &L,
    payer: &Pubkey,
    owner: &Pubkey,
    mints: &[Pubkey],
) -> ProvisionResult<Vec<Instruction>> {
    let addresses: Vec<Pubkey> = mints
        .iter()
        .map(|mint| get_associated_token_address(owner, mint))
        .collect();
    let accounts = ChainStateProbe::new(ledger).accounts_info(&addresses)?;

    let mut instructions = Vec::new();
    for ((mint, address), account) in mints.iter().zip(&addresses).zip(accounts) {
        if account.is_some() {
            log::debug!("Associated account {} for mint {} exists", address, mint);
            continue;
        }
        log::info!("Queueing associated account {} for mint {}", address, mint);
        instructions.push(create_associated_token_account(payer, owner, mint, &spl_token::id()));
    }
    Ok(instructions)
}

/// A freshly minted test token
#[derive(Debug, Clone)]
pub struct DeployedToken {
    pub mint: Pubkey,
    pub owner_account: Pubkey,
    pub balance: TokenBalance,
}

fn token_ix(result: Result<Instruction, solana_sdk::program_error::ProgramError>) -> ProvisionResult<Instruction> {
    result.map_err(|e| ProvisionError::submission(Stage::TokenDeploy, e))
}

/// Create a mint owned by `payer`, open the payer's associated account and
/// mint `amount` into it.
pub fn deploy_test_token<L: Ledger + ?Sized>(
    ledger: &L,
    payer: &Keypair,
    decimals: u8,
    amount: u64,
    settle: Duration,
) -> ProvisionResult<DeployedToken> {
    let mint = Keypair::new();
    let owner = payer.pubkey();
    let token_program = spl_token::id();
    let owner_account = get_associated_token_address(&owner, &mint.pubkey());

    let rent = ledger.minimum_balance_for_rent_exemption(Mint::LEN)?;
    let create = [
        system_instruction::create_account(&owner, &mint.pubkey(), rent, Mint::LEN as u64, &token_program),
        token_ix(spl_token::instruction::initialize_mint2(
            &token_program,
            &mint.pubkey(),
            &owner,
            Some(&owner),
            decimals,
        ))?,
        create_associated_token_account(&owner, &owner, &mint.pubkey(), &token_program),
    ];
    let signature = ledger.submit(Stage::TokenDeploy, &create, payer, &[&mint])?;
    log::info!("Created mint {} and account {}: {}", mint.pubkey(), owner_account, signature);
    thread::sleep(settle);

    let balance = mint_to_owner(ledger, payer, &mint.pubkey(), amount, settle)?;
    Ok(DeployedToken {
        mint: mint.pubkey(),
        owner_account,
        balance,
    })
}

/// Mint `amount` more into the payer's associated account for `mint`
pub fn mint_to_owner<L: Ledger + ?Sized>(
    ledger: &L,
    payer: &Keypair,
    mint: &Pubkey,
    amount: u64,
    settle: Duration,
) -> ProvisionResult<TokenBalance> {
    let owner = payer.pubkey();
    let owner_account = get_associated_token_address(&owner, mint);
    let ix = token_ix(spl_token::instruction::mint_to(
        &spl_token::id(),
        mint,
        &owner_account,
        &owner,
        &[],
        amount,
    ))?;

    let signature = ledger.submit(Stage::TokenDeploy, &[ix], payer, &[])?;
    log::info!("Minted {} of {} to {}: {}", amount, mint, owner_account, signature);
    thread::sleep(settle);

    let balance = ledger.token_balance(&owner_account)?;
    log::info!(
        "Balance of {} = {} ({} decimals)",
        mint,
        balance.ui_amount,
        balance.decimals
    );
    Ok(balance)
}
