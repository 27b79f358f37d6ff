//! Ledger RPC boundary: account reads, token balances and submission

use crate::error::{ProvisionError, ProvisionResult};
use crate::stage::Stage;
use solana_account_decoder::UiAccountData;
use solana_client::{
    rpc_client::RpcClient, rpc_config::RpcSendTransactionConfig,
    rpc_request::TokenAccountsFilter,
};
use solana_sdk::{
    account::Account,
    commitment_config::CommitmentConfig,
    instruction::Instruction,
    pubkey::Pubkey,
    signature::{Keypair, Signature, Signer},
    transaction::Transaction,
};
use std::str::FromStr;
use std::thread;
use std::time::{Duration, Instant};

/// Token account balance as reported by the ledger
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenBalance {
    pub amount: u64,
    pub decimals: u8,
    pub ui_amount: String,
}

/// A token account held by an owner for one mint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeldTokenAccount {
    pub address: Pubkey,
    pub amount: u64,
}

/// Everything the provisioner needs from the ledger.
///
/// Read failures must surface as `ProbeUnavailable`; `None` in
/// `get_multiple_accounts` means the ledger answered "not found".
pub trait Ledger {
    fn get_multiple_accounts(&self, addresses: &[Pubkey]) -> ProvisionResult<Vec<Option<Account>>>;

    fn token_balance(&self, token_account: &Pubkey) -> ProvisionResult<TokenBalance>;

    fn token_accounts_by_owner(
        &self,
        owner: &Pubkey,
        mint: &Pubkey,
    ) -> ProvisionResult<Vec<HeldTokenAccount>>;

    fn native_balance(&self, owner: &Pubkey) -> ProvisionResult<u64>;

    fn minimum_balance_for_rent_exemption(&self, data_len: usize) -> ProvisionResult<u64>;

    /// Sign with `payer` plus `extra_signers`, submit, and return the signature
    fn submit(
        &self,
        stage: Stage,
        instructions: &[Instruction],
        payer: &Keypair,
        extra_signers: &[&Keypair],
    ) -> ProvisionResult<Signature>;
}

/// Submission options
#[derive(Debug, Clone)]
pub struct SubmitOptions {
    pub commitment: CommitmentConfig,
    pub skip_preflight: bool,
    /// Poll for confirmation up to this long; `None` returns right after send
    pub confirm_timeout: Option<Duration>,
}

/// `Ledger` backed by a JSON-RPC node
pub struct RpcLedger {
    client: RpcClient,
    options: SubmitOptions,
}

impl RpcLedger {
    pub fn new(rpc_url: String, options: SubmitOptions) -> Self {
        Self {
            client: RpcClient::new_with_commitment(rpc_url, options.commitment),
            options,
        }
    }

    pub fn client(&self) -> &RpcClient {
        &self.client
    }

    fn await_confirmation(&self, stage: Stage, signature: &Signature, timeout: Duration) -> ProvisionResult<()> {
        let started = Instant::now();
        loop {
            let status = self
                .client
                .get_signature_status_with_commitment(signature, self.options.commitment)
                .map_err(|e| ProvisionError::submission(stage, format!("status of {}: {}", signature, e)))?;

            match status {
                Some(Ok(())) => return Ok(()),
                Some(Err(e)) => {
                    return Err(ProvisionError::submission(stage, format!("{} failed: {}", signature, e)))
                }
                None if started.elapsed() >= timeout => {
                    return Err(ProvisionError::submission(
                        stage,
                        format!("{} not confirmed within {:?}", signature, timeout),
                    ))
                }
                None => thread::sleep(Duration::from_millis(500)),
            }
        }
    }
}

fn probe_err(what: &str, e: impl std::fmt::Display) -> ProvisionError {
    ProvisionError::ProbeUnavailable(format!("{}: {}", what, e))
}

impl Ledger for RpcLedger {
    fn get_multiple_accounts(&self, addresses: &[Pubkey]) -> ProvisionResult<Vec<Option<Account>>> {
        self.client
            .get_multiple_accounts(addresses)
            .map_err(|e| probe_err("getMultipleAccounts", e))
    }

    fn token_balance(&self, token_account: &Pubkey) -> ProvisionResult<TokenBalance> {
        let ui = self
            .client
            .get_token_account_balance(token_account)
            .map_err(|e| probe_err("getTokenAccountBalance", e))?;

        let amount = ui
            .amount
            .parse::<u64>()
            .map_err(|e| probe_err("token amount", e))?;

        Ok(TokenBalance {
            amount,
            decimals: ui.decimals,
            ui_amount: ui.ui_amount_string,
        })
    }

    fn token_accounts_by_owner(
        &self,
        owner: &Pubkey,
        mint: &Pubkey,
    ) -> ProvisionResult<Vec<HeldTokenAccount>> {
        let keyed = self
            .client
            .get_token_accounts_by_owner(owner, TokenAccountsFilter::Mint(*mint))
            .map_err(|e| probe_err("getTokenAccountsByOwner", e))?;

        let mut held = Vec::with_capacity(keyed.len());
        for entry in keyed {
            let address = Pubkey::from_str(&entry.pubkey).map_err(|e| probe_err("token account key", e))?;
            let amount = match &entry.account.data {
                UiAccountData::Json(parsed) => parsed.parsed["info"]["tokenAmount"]["amount"]
                    .as_str()
                    .and_then(|s| s.parse::<u64>().ok()),
                _ => None,
            };

            match amount {
                Some(amount) => held.push(HeldTokenAccount { address, amount }),
                None => log::warn!("Skipping token account {} with unparsed data", address),
            }
        }

        Ok(held)
    }

    fn native_balance(&self, owner: &Pubkey) -> ProvisionResult<u64> {
        self.client
            .get_balance(owner)
            .map_err(|e| probe_err("getBalance", e))
    }

    fn minimum_balance_for_rent_exemption(&self, data_len: usize) -> ProvisionResult<u64> {
        self.client
            .get_minimum_balance_for_rent_exemption(data_len)
            .map_err(|e| probe_err("getMinimumBalanceForRentExemption", e))
    }

    fn submit(
        &self,
        stage: Stage,
        instructions: &[Instruction],
        payer: &Keypair,
        extra_signers: &[&Keypair],
    ) -> ProvisionResult<Signature> {
        let recent_blockhash = self
            .client
            .get_latest_blockhash()
            .map_err(|e| ProvisionError::submission(stage, format!("latest blockhash: {}", e)))?;

        let mut signers: Vec<&Keypair> = Vec::with_capacity(extra_signers.len() + 1);
        signers.push(payer);
        signers.extend_from_slice(extra_signers);

        let transaction = Transaction::new_signed_with_payer(
            instructions,
            Some(&payer.pubkey()),
            signers.as_slice(),
            recent_blockhash,
        );

        let config = RpcSendTransactionConfig {
            skip_preflight: self.options.skip_preflight,
            preflight_commitment: Some(self.options.commitment.commitment),
            ..RpcSendTransactionConfig::default()
        };

        let signature = self
            .client
            .send_transaction_with_config(&transaction, config)
            .map_err(|e| ProvisionError::submission(stage, e))?;

        log::debug!("[{}] sent {} ({} instructions)", stage, signature, instructions.len());

        if let Some(timeout) = self.options.confirm_timeout {
            self.await_confirmation(stage, &signature, timeout)?;
        }

        Ok(signature)
    }
}
