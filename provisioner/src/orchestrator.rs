//! Pool lifecycle state machine
//!
//! market -> pre_initialize -> seed_liquidity + initialize -> owner_accounts
//! -> swap. Every stage re-probes the ledger and is skipped when already
//! satisfied, so an interrupted run resumes at the first incomplete stage.
//! Stages never run out of order.

use crate::amm;
use crate::derive::{PoolKeys, RootIds};
use crate::dex::{self, MarketInfo, MarketParams};
use crate::error::{ProvisionError, ProvisionResult};
use crate::ledger::Ledger;
use crate::liquidity::{owner_lp_account, LiquiditySeeder};
use crate::market::{MarketIdentity, MarketProvisioner};
use crate::probe::{ChainStateProbe, PoolProvisioningState};
use crate::stage::{run_if_absent, LifecycleState, Stage, StageOutcome, StageRecord};
use crate::swap::{swap_accounts, SwapDirection, SwapExecutor, SwapMode, SwapOutcome, SwapRequest};
use crate::token;
use rust_decimal::Decimal;
use solana_sdk::signature::{Keypair, Signature, Signer};
use std::thread;
use std::time::Duration;

/// Fixed waits after each submission before the next probe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SettleDelays {
    pub market: Duration,
    pub pre_initialize: Duration,
    pub seed_liquidity: Duration,
    pub initialize: Duration,
    pub owner_accounts: Duration,
    pub swap: Duration,
}

impl SettleDelays {
    pub fn none() -> Self {
        Self::uniform(Duration::ZERO)
    }

    pub fn uniform(delay: Duration) -> Self {
        Self {
            market: delay,
            pre_initialize: delay,
            seed_liquidity: delay,
            initialize: delay,
            owner_accounts: delay,
            swap: delay,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapSettings {
    pub direction: SwapDirection,
    pub mode: SwapMode,
    pub amount: u64,
    pub other_amount_threshold: u64,
}

/// Everything one pool is provisioned from
#[derive(Debug)]
pub struct PoolSettings {
    pub name: String,
    pub roots: RootIds,
    pub market: MarketIdentity,
    pub base_lot_size: u64,
    pub quote_lot_size: u64,
    pub fee_rate_bps: u16,
    pub pc_dust_threshold: u64,
    pub base_quantity: Decimal,
    pub quote_quantity: Decimal,
    pub open_time: u64,
    pub swap: Option<SwapSettings>,
}

impl PoolSettings {
    pub fn market_params(&self) -> MarketParams {
        MarketParams {
            base_mint: self.roots.base_mint,
            quote_mint: self.roots.quote_mint,
            base_lot_size: self.base_lot_size,
            quote_lot_size: self.quote_lot_size,
            fee_rate_bps: self.fee_rate_bps,
            pc_dust_threshold: self.pc_dust_threshold,
        }
    }
}

/// Audit trail of one run
#[derive(Debug, Clone)]
pub struct ProvisionReport {
    pub pool: String,
    pub keys: PoolKeys,
    pub initial_state: PoolProvisioningState,
    pub state: LifecycleState,
    pub stages: Vec<StageRecord>,
    pub swap: Option<SwapOutcome>,
}

impl ProvisionReport {
    fn record(&mut self, record: StageRecord, reached: LifecycleState) {
        self.stages.push(record);
        self.state = self.state.max(reached);
    }

    pub fn executed(&self) -> impl Iterator<Item = &StageRecord> {
        self.stages.iter().filter(|r| r.outcome.is_executed())
    }

    pub fn outcome(&self, stage: Stage) -> Option<StageOutcome> {
        self.stages.iter().find(|r| r.stage == stage).map(|r| r.outcome)
    }
}

pub struct PoolLifecycleOrchestrator<'a, L: Ledger + ?Sized> {
    ledger: &'a L,
    payer: &'a Keypair,
    settings: &'a PoolSettings,
    settle: SettleDelays,
}

impl<'a, L: Ledger + ?Sized> PoolLifecycleOrchestrator<'a, L> {
    pub fn new(ledger: &'a L, payer: &'a Keypair, settings: &'a PoolSettings, settle: SettleDelays) -> Self {
        Self {
            ledger,
            payer,
            settings,
            settle,
        }
    }

    pub fn run(&self) -> ProvisionResult<ProvisionReport> {
        let settings = self.settings;
        let owner = self.payer.pubkey();

        // Keys come first: nothing is submitted for a pool we cannot address
        let keys = PoolKeys::derive(settings.roots)?;
        log::info!(
            "[{}] pool {} authority {} nonce {} lp_mint {}",
            settings.name,
            keys.id,
            keys.authority,
            keys.nonce,
            keys.lp_mint
        );

        let probe = ChainStateProbe::new(self.ledger);
        let initial_state = probe.classify(&keys)?;
        log::info!("[{}] ledger shows {:?}", settings.name, initial_state);

        let mut report = ProvisionReport {
            pool: settings.name.clone(),
            keys,
            initial_state,
            state: LifecycleState::Absent,
            stages: Vec::new(),
            swap: None,
        };

        let (market, record) = MarketProvisioner::new(self.ledger, self.settle.market).ensure_market(
            self.payer,
            &settings.market_params(),
            &settings.roots.dex_program,
            &settings.market,
        )?;
        report.record(record, LifecycleState::MarketCreated);

        keys.check_market(&market)?;
        dex::verify_vault_signer(&market, &settings.roots.dex_program)?;

        let record = run_if_absent(
            Stage::PreInitialize,
            || probe.pool_pre_initialized(&keys.lp_mint),
            || {
                let ix = amm::pre_initialize(&keys, &owner);
                self.submit_and_settle(Stage::PreInitialize, &[ix], self.settle.pre_initialize)
            },
        )?;
        report.record(record, LifecycleState::PreInitialized);

        // One probe gates both halves of the initialize transition
        let initialized = probe.pool_initialized(&keys.id)?;

        let record = run_if_absent(
            Stage::SeedLiquidity,
            || Ok(initialized),
            || {
                let signature = LiquiditySeeder::new(self.ledger).seed(
                    self.payer,
                    &keys,
                    settings.base_quantity,
                    settings.quote_quantity,
                )?;
                thread::sleep(self.settle.seed_liquidity);
                Ok(signature)
            },
        )?;
        report.record(record, LifecycleState::PreInitialized);

        let record = run_if_absent(
            Stage::Initialize,
            || Ok(initialized),
            || {
                let ix = amm::initialize(&keys, &owner_lp_account(&owner, &keys), &owner, settings.open_time);
                self.submit_and_settle(Stage::Initialize, &[ix], self.settle.initialize)
            },
        )?;
        report.record(record, LifecycleState::Initialized);

        let missing = token::missing_associated_accounts(
            self.ledger,
            &owner,
            &owner,
            &[keys.roots.base_mint, keys.roots.quote_mint, keys.lp_mint],
        )?;
        let record = run_if_absent(
            Stage::OwnerAccounts,
            || Ok(missing.is_empty()),
            || self.submit_and_settle(Stage::OwnerAccounts, &missing, self.settle.owner_accounts),
        )?;
        report.record(record, LifecycleState::Seeded);

        if let Some(swap) = &settings.swap {
            let outcome = self.swap(&report, &market, swap)?;
            report.stages.push(StageRecord {
                stage: Stage::Swap,
                outcome: StageOutcome::Executed(outcome.signature),
            });
            report.swap = Some(outcome);
        }

        log::info!(
            "[{}] done: {} of {} stages executed",
            settings.name,
            report.executed().count(),
            report.stages.len()
        );
        Ok(report)
    }

    /// Swap against the pool; only permitted once the lifecycle is `Seeded`
    pub fn swap(&self, report: &ProvisionReport, market: &MarketInfo, swap: &SwapSettings) -> ProvisionResult<SwapOutcome> {
        if report.state != LifecycleState::Seeded {
            return Err(ProvisionError::InvalidState(format!(
                "pool {} is {:?}, swaps need Seeded",
                report.pool, report.state
            )));
        }

        let request = SwapRequest {
            mode: swap.mode,
            amount: swap.amount,
            other_amount_threshold: swap.other_amount_threshold,
            accounts: swap_accounts(&self.payer.pubkey(), &report.keys, swap.direction),
        };
        SwapExecutor::new(self.ledger, self.settle.swap).swap(self.payer, &request, &report.keys, market)
    }

    fn submit_and_settle(
        &self,
        stage: Stage,
        instructions: &[solana_sdk::instruction::Instruction],
        settle: Duration,
    ) -> ProvisionResult<Signature> {
        let signature = self.ledger.submit(stage, instructions, self.payer, &[])?;
        log::debug!("[{}] waiting {:?} to settle", stage, settle);
        thread::sleep(settle);
        Ok(signature)
    }
}
