//! AMM pool provisioner
//!
//! Idempotently brings constant-product pools on an order-book exchange
//! from nothing to swappable: market, pool accounts, initial liquidity and
//! owner token accounts. Every stage is probed on the ledger before it is
//! submitted, so re-running against a partially provisioned pool resumes
//! where the previous run stopped.

pub mod amm;
pub mod config;
pub mod derive;
pub mod dex;
pub mod error;
pub mod ledger;
pub mod liquidity;
pub mod market;
pub mod orchestrator;
pub mod probe;
pub mod stage;
pub mod swap;
pub mod token;

#[cfg(test)]
mod mock;

pub use derive::{PoolKeys, RootIds};
pub use error::{ProvisionError, ProvisionResult};
pub use ledger::{Ledger, RpcLedger};
pub use orchestrator::{PoolLifecycleOrchestrator, PoolSettings, ProvisionReport, SettleDelays};
pub use stage::{LifecycleState, Stage, StageOutcome};
