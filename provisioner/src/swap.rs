//! Single swap against a provisioned pool, reconciled from observed balances

use crate::amm::{self, SwapAccounts};
use crate::derive::PoolKeys;
use crate::dex::{self, MarketInfo};
use crate::error::{ProvisionError, ProvisionResult};
use crate::ledger::{Ledger, TokenBalance};
use crate::stage::Stage;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use solana_sdk::{
    pubkey::Pubkey,
    signature::{Keypair, Signature, Signer},
};
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwapMode {
    /// `amount` is the exact input, `other_amount_threshold` the minimum output
    BaseIn,
    /// `amount` is the exact output, `other_amount_threshold` the maximum input
    BaseOut,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwapDirection {
    BaseToQuote,
    QuoteToBase,
}

#[derive(Debug, Clone, Copy)]
pub struct SwapRequest {
    pub mode: SwapMode,
    pub amount: u64,
    pub other_amount_threshold: u64,
    pub accounts: SwapAccounts,
}

/// What actually moved, from post-minus-pre balances
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapOutcome {
    pub signature: Signature,
    /// Source balance decrease
    pub amount_in_observed: i128,
    /// Destination balance increase
    pub amount_out_observed: i128,
    /// Destination per source, in human units; `None` if nothing was spent
    pub implied_rate: Option<Decimal>,
}

impl SwapOutcome {
    pub fn observe(
        signature: Signature,
        source_before: &TokenBalance,
        source_after: &TokenBalance,
        destination_before: &TokenBalance,
        destination_after: &TokenBalance,
    ) -> Self {
        let amount_in_observed = i128::from(source_before.amount) - i128::from(source_after.amount);
        let amount_out_observed = i128::from(destination_after.amount) - i128::from(destination_before.amount);

        Self {
            signature,
            amount_in_observed,
            amount_out_observed,
            implied_rate: implied_rate(
                amount_in_observed,
                source_after.decimals,
                amount_out_observed,
                destination_after.decimals,
            ),
        }
    }
}

/// `(out / 10^out_decimals) / (in / 10^in_decimals)`
pub fn implied_rate(amount_in: i128, in_decimals: u8, amount_out: i128, out_decimals: u8) -> Option<Decimal> {
    let human = |amount: i128, decimals: u8| {
        let amount = i64::try_from(amount).ok()?;
        Decimal::try_new(amount, u32::from(decimals)).ok()
    };
    let spent = human(amount_in, in_decimals)?;
    if spent.is_zero() {
        return None;
    }
    human(amount_out, out_decimals)?.checked_div(spent)
}

pub struct SwapExecutor<'a, L: Ledger + ?Sized> {
    ledger: &'a L,
    settle_delay: Duration,
}

impl<'a, L: Ledger + ?Sized> SwapExecutor<'a, L> {
    pub fn new(ledger: &'a L, settle_delay: Duration) -> Self {
        Self { ledger, settle_delay }
    }

    /// Submit one swap and report what the balances show it did.
    ///
    /// The vault signer nonce is re-derived first; a mismatch aborts before
    /// anything referencing the vault signer is sent. The minimum/maximum
    /// threshold is enforced by the AMM program, not here.
    pub fn swap(
        &self,
        payer: &Keypair,
        request: &SwapRequest,
        keys: &PoolKeys,
        market: &MarketInfo,
    ) -> ProvisionResult<SwapOutcome> {
        let vault_signer = dex::verify_vault_signer(market, &keys.roots.dex_program)?;
        if request.accounts.owner != payer.pubkey() {
            return Err(ProvisionError::InvalidState(format!(
                "swap owner {} is not the signing payer {}",
                request.accounts.owner,
                payer.pubkey()
            )));
        }

        let source_before = self.ledger.token_balance(&request.accounts.source)?;
        let destination_before = self.ledger.token_balance(&request.accounts.destination)?;
        log::info!(
            "Before swap: source {} ({}), destination {} ({})",
            request.accounts.source,
            source_before.ui_amount,
            request.accounts.destination,
            destination_before.ui_amount
        );

        let instruction = match request.mode {
            SwapMode::BaseIn => amm::swap_base_in(
                keys,
                market,
                &vault_signer,
                &request.accounts,
                request.amount,
                request.other_amount_threshold,
            ),
            SwapMode::BaseOut => amm::swap_base_out(
                keys,
                market,
                &vault_signer,
                &request.accounts,
                request.other_amount_threshold,
                request.amount,
            ),
        };

        let signature = self.ledger.submit(Stage::Swap, &[instruction], payer, &[])?;
        log::info!("[{}] submitted {}, waiting {:?}", Stage::Swap, signature, self.settle_delay);
        thread::sleep(self.settle_delay);

        let source_after = self.ledger.token_balance(&request.accounts.source)?;
        let destination_after = self.ledger.token_balance(&request.accounts.destination)?;

        let outcome = SwapOutcome::observe(
            signature,
            &source_before,
            &source_after,
            &destination_before,
            &destination_after,
        );
        log::info!(
            "Swap result: in {} (requested {:?} {}), out {}, rate {}",
            outcome.amount_in_observed,
            request.mode,
            request.amount,
            outcome.amount_out_observed,
            outcome
                .implied_rate
                .map(|r| r.normalize().to_string())
                .unwrap_or_else(|| "n/a".to_string())
        );
        Ok(outcome)
    }
}

/// Source/destination associated accounts for a swap direction
pub fn swap_accounts(owner: &Pubkey, keys: &PoolKeys, direction: SwapDirection) -> SwapAccounts {
    use spl_associated_token_account::get_associated_token_address as ata;
    let base = ata(owner, &keys.roots.base_mint);
    let quote = ata(owner, &keys.roots.quote_mint);
    let (source, destination) = match direction {
        SwapDirection::BaseToQuote => (base, quote),
        SwapDirection::QuoteToBase => (quote, base),
    };
    SwapAccounts {
        source,
        destination,
        owner: *owner,
    }
}
