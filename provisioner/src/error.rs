//! Error taxonomy for pool provisioning

use crate::stage::Stage;
use solana_sdk::pubkey::Pubkey;
use thiserror::Error;

pub type ProvisionResult<T> = Result<T, ProvisionError>;

#[derive(Error, Debug)]
pub enum ProvisionError {
    /// Malformed identifier or no valid derived address. Fatal.
    #[error("Derivation error: {0}")]
    Derivation(String),

    /// Ledger read failed. Never to be read as "account absent".
    #[error("Probe unavailable: {0}")]
    ProbeUnavailable(String),

    #[error("Insufficient funds for mint {mint}: need {required} base units")]
    InsufficientFunds { mint: Pubkey, required: u64 },

    #[error("Vault signer nonce mismatch for market {market}: derived {derived}, market declares {declared}")]
    VaultNonceMismatch {
        market: Pubkey,
        derived: u64,
        declared: u64,
    },

    #[error("Submission failed at stage {stage}: {reason}")]
    SubmissionFailure { stage: Stage, reason: String },

    #[error("Pool keys do not match market {market}: {reason}")]
    PoolKeyMismatch { market: Pubkey, reason: String },

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Cannot decode market {address}: {reason}")]
    MarketDecode { address: Pubkey, reason: String },

    /// A definite read: the account is missing or is not what it should be
    #[error("Cannot use account {address}: {reason}")]
    AccountDecode { address: Pubkey, reason: String },

    #[error("Invalid lifecycle state: {0}")]
    InvalidState(String),
}

impl ProvisionError {
    /// Only transient ledger reads are worth retrying; everything else
    /// needs a configuration or funding change first.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ProvisionError::ProbeUnavailable(_))
    }

    pub fn submission(stage: Stage, reason: impl ToString) -> Self {
        ProvisionError::SubmissionFailure {
            stage,
            reason: reason.to_string(),
        }
    }
}
