//! Provisioning against a local validator
//!
//! Requires solana-test-validator and the program binaries; run with
//! `--ignored`.

use amm_provisioner::{
    orchestrator::{PoolLifecycleOrchestrator, SettleDelays},
    probe::{ChainStateProbe, PoolProvisioningState},
    stage::{LifecycleState, Stage, StageOutcome},
    token::mint_to_owner,
};
use amm_provisioner_e2e::{fixtures, TestContext};
use solana_sdk::signature::Signer;
use std::time::Duration;

fn settle() -> SettleDelays {
    SettleDelays::uniform(Duration::from_secs(1))
}

#[test]
#[ignore]
fn test_token_deploy_and_mint() {
    let ctx = TestContext::new().expect("test context");
    let (usdc, vvs) = fixtures::deploy_pair(&ctx).unwrap();

    assert_eq!(usdc.balance.decimals, 6);
    assert_eq!(vvs.balance.decimals, 9);
    assert_eq!(usdc.balance.amount, 100_000_000_000);

    let topped_up = mint_to_owner(&ctx.ledger, &ctx.payer, &usdc.mint, 1_000_000, fixtures::SETTLE).unwrap();
    assert_eq!(topped_up.amount, 100_001_000_000);
}

#[test]
#[ignore]
fn test_full_lifecycle_then_idempotent_rerun() {
    let ctx = TestContext::new().expect("test context");
    let (usdc, vvs) = fixtures::deploy_pair(&ctx).unwrap();
    let settings = fixtures::pool_settings(&ctx, &usdc, &vvs);

    let orchestrator = PoolLifecycleOrchestrator::new(&ctx.ledger, &ctx.payer, &settings, settle());
    let first = orchestrator.run().expect("first run");

    assert_eq!(first.initial_state, PoolProvisioningState::MarketAbsent);
    assert_eq!(first.state, LifecycleState::Seeded);
    for stage in [Stage::Market, Stage::PreInitialize, Stage::SeedLiquidity, Stage::Initialize] {
        assert!(first.outcome(stage).unwrap().is_executed(), "{} should have run", stage);
    }
    let swap = first.swap.expect("swap outcome");
    assert!(swap.amount_in_observed > 0);
    assert!(swap.amount_out_observed > 0);

    let probe = ChainStateProbe::new(&ctx.ledger);
    assert_eq!(probe.classify(&first.keys).unwrap(), PoolProvisioningState::PoolInitialized);

    // Nothing but the swap is submitted the second time
    let second = orchestrator.run().expect("second run");
    assert_eq!(second.initial_state, PoolProvisioningState::PoolInitialized);
    for record in second.stages.iter().filter(|r| r.stage != Stage::Swap) {
        assert_eq!(record.outcome, StageOutcome::Skipped, "{} re-ran", record.stage);
    }
    assert_eq!(second.keys, first.keys);
    log::info!("Payer {} provisioned pool {}", ctx.payer.pubkey(), first.keys.id);
}
