//! Ensures the order-book market for a pool exists, creating it at most once

use crate::dex::{self, MarketInfo, MarketParams, MarketRent};
use crate::error::{ProvisionError, ProvisionResult};
use crate::ledger::Ledger;
use crate::probe::ChainStateProbe;
use crate::stage::{run_if_absent, Stage, StageRecord};
use solana_sdk::{
    program_pack::Pack,
    pubkey::Pubkey,
    signature::{Keypair, Signer},
};
use std::thread;
use std::time::Duration;

/// The market a pool sits on. Creating it needs the keypair; an existing
/// market can be referenced by address alone.
#[derive(Debug)]
pub enum MarketIdentity {
    Keypair(Keypair),
    Address(Pubkey),
}

impl MarketIdentity {
    pub fn address(&self) -> Pubkey {
        match self {
            MarketIdentity::Keypair(kp) => kp.pubkey(),
            MarketIdentity::Address(address) => *address,
        }
    }
}

pub struct MarketProvisioner<'a, L: Ledger + ?Sized> {
    ledger: &'a L,
    settle_delay: Duration,
}

impl<'a, L: Ledger + ?Sized> MarketProvisioner<'a, L> {
    pub fn new(ledger: &'a L, settle_delay: Duration) -> Self {
        Self { ledger, settle_delay }
    }

    /// Create the market if the ledger does not hold it yet, then load it.
    pub fn ensure_market(
        &self,
        owner: &Keypair,
        params: &MarketParams,
        dex_program: &Pubkey,
        identity: &MarketIdentity,
    ) -> ProvisionResult<(MarketInfo, StageRecord)> {
        let probe = ChainStateProbe::new(self.ledger);
        let address = identity.address();

        let record = run_if_absent(
            Stage::Market,
            || probe.market_exists(&address),
            || {
                let signature = self.create_market(owner, params, dex_program, identity)?;
                log::info!("Waiting {:?} for market {} to settle", self.settle_delay, address);
                thread::sleep(self.settle_delay);
                Ok(signature)
            },
        )?;

        let info = self.load_market(&address)?;
        log::debug!("Market {}: {:?}", address, info);
        Ok((info, record))
    }

    pub fn load_market(&self, address: &Pubkey) -> ProvisionResult<MarketInfo> {
        let account = ChainStateProbe::new(self.ledger)
            .account(address)?
            .filter(|a| !a.data.is_empty())
            .ok_or_else(|| ProvisionError::submission(Stage::Market, format!("market {} not visible on ledger", address)))?;
        MarketInfo::decode(*address, &account.data)
    }

    fn create_market(
        &self,
        owner: &Keypair,
        params: &MarketParams,
        dex_program: &Pubkey,
        identity: &MarketIdentity,
    ) -> ProvisionResult<solana_sdk::signature::Signature> {
        let market_keypair = match identity {
            MarketIdentity::Keypair(kp) => kp,
            MarketIdentity::Address(address) => {
                return Err(ProvisionError::submission(
                    Stage::Market,
                    format!("market {} is absent and no keypair was configured to create it", address),
                ))
            }
        };

        let rent = MarketRent {
            token_account: self
                .ledger
                .minimum_balance_for_rent_exemption(spl_token::state::Account::LEN)?,
            market: self.ledger.minimum_balance_for_rent_exemption(dex::MARKET_STATE_LEN)?,
            request_queue: self.ledger.minimum_balance_for_rent_exemption(dex::REQUEST_QUEUE_LEN)?,
            event_queue: self.ledger.minimum_balance_for_rent_exemption(dex::EVENT_QUEUE_LEN)?,
            order_book: self.ledger.minimum_balance_for_rent_exemption(dex::ORDER_BOOK_LEN)?,
        };

        let transactions = dex::create_market_transactions(
            &owner.pubkey(),
            &market_keypair.pubkey(),
            dex_program,
            params,
            &rent,
        )?;

        let last = transactions.len() - 1;
        let mut signature = None;
        for (i, tx) in transactions.iter().enumerate() {
            let mut signers: Vec<&Keypair> = tx.signers.iter().collect();
            if i == last {
                signers.push(market_keypair);
            }
            let sig = self.ledger.submit(Stage::Market, &tx.instructions, owner, &signers)?;
            log::info!("[{}] transaction {}/{}: {}", Stage::Market, i + 1, transactions.len(), sig);
            signature = Some(sig);
        }

        signature.ok_or_else(|| ProvisionError::submission(Stage::Market, "empty market transaction set"))
    }
}
