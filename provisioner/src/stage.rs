//! Probe-then-act primitive shared by every provisioning stage

use crate::error::ProvisionResult;
use solana_sdk::signature::Signature;
use std::fmt;

/// On-chain steps of a pool lifecycle, in the only order they may run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Market,
    PreInitialize,
    SeedLiquidity,
    Initialize,
    OwnerAccounts,
    Swap,
    /// Test-fixture token setup, outside the pool lifecycle
    TokenDeploy,
}

impl Stage {
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Market => "market",
            Stage::PreInitialize => "pre_initialize",
            Stage::SeedLiquidity => "seed_liquidity",
            Stage::Initialize => "initialize",
            Stage::OwnerAccounts => "owner_accounts",
            Stage::Swap => "swap",
            Stage::TokenDeploy => "token_deploy",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageOutcome {
    /// Ledger already reflected this stage; nothing submitted
    Skipped,
    Executed(Signature),
}

impl StageOutcome {
    pub fn is_executed(&self) -> bool {
        matches!(self, StageOutcome::Executed(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageRecord {
    pub stage: Stage,
    pub outcome: StageOutcome,
}

/// Lifecycle position of one pool. Swaps require `Seeded`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LifecycleState {
    Absent,
    MarketCreated,
    PreInitialized,
    Initialized,
    Seeded,
}

/// Run `action` only when `already_done` reports the stage unsatisfied.
///
/// A probe error propagates unchanged: an unreadable ledger is never taken
/// to mean the stage is missing.
pub fn run_if_absent<P, A>(stage: Stage, already_done: P, action: A) -> ProvisionResult<StageRecord>
where
    P: FnOnce() -> ProvisionResult<bool>,
    A: FnOnce() -> ProvisionResult<Signature>,
{
    let outcome = if already_done()? {
        log::info!("[{}] skipped (already satisfied)", stage);
        StageOutcome::Skipped
    } else {
        log::info!("[{}] executing", stage);
        let signature = action()?;
        log::info!("[{}] executed: {}", stage, signature);
        StageOutcome::Executed(signature)
    };

    Ok(StageRecord { stage, outcome })
}
