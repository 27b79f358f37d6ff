//! AMM Pool Provisioner
//!
//! Provisions every configured pool in parallel and logs what each run
//! created and what it found already in place.

use amm_provisioner::{
    config::{load_keypair, Config},
    ledger::RpcLedger,
    orchestrator::{PoolLifecycleOrchestrator, ProvisionReport},
    stage::StageOutcome,
};
use amm_provisioner::ProvisionError;
use anyhow::Result;
use futures::future::join_all;
use solana_sdk::signature::Signer;
use std::sync::Arc;
use tokio::task::JoinError;

type PoolResult = Result<ProvisionReport, (String, ProvisionError)>;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    log::info!("Starting AMM pool provisioner");

    // Load configuration
    let config = Config::load().unwrap_or_else(|e| {
        log::warn!("Failed to load config ({:#}), using default devnet config", e);
        Config::default_devnet()
    });

    log::info!("Connected to RPC: {}", config.rpc_url);

    let ledger = Arc::new(RpcLedger::new(config.rpc_url.clone(), config.submit_options()?));
    let payer = Arc::new(load_keypair(&config.keypair_path)?);
    log::info!("Payer wallet: {}", payer.pubkey());

    let delays = config.settle.delays();
    let mut tasks = Vec::with_capacity(config.pools.len());
    for pool in &config.pools {
        let settings = pool.resolve()?;
        let ledger = Arc::clone(&ledger);
        let payer = Arc::clone(&payer);

        // Each pool runs its blocking RPC sequence on its own thread
        tasks.push(tokio::task::spawn_blocking(move || {
            PoolLifecycleOrchestrator::new(ledger.as_ref(), payer.as_ref(), &settings, delays)
                .run()
                .map_err(|e| (settings.name.clone(), e))
        }));
    }

    let failed = tally(join_all(tasks).await);
    if failed > 0 {
        anyhow::bail!("{} of {} pools failed", failed, config.pools.len());
    }

    log::info!("All {} pools provisioned", config.pools.len());
    Ok(())
}

/// Log every pool's result and return how many failed. A panicked task
/// counts as a failed pool.
fn tally(results: Vec<Result<PoolResult, JoinError>>) -> usize {
    let mut failed = 0;
    for joined in results {
        match joined {
            Ok(Ok(report)) => log_report(&report),
            Ok(Err((pool, e))) => {
                failed += 1;
                if e.is_retryable() {
                    log::error!("[{}] ledger unavailable, safe to re-run: {}", pool, e);
                } else {
                    log::error!("[{}] provisioning failed: {}", pool, e);
                }
            }
            Err(e) => {
                failed += 1;
                log::error!("Provisioning task panicked: {}", e);
            }
        }
    }
    failed
}

fn log_report(report: &ProvisionReport) {
    log::info!(
        "[{}] pool {} reached {:?} (found {:?})",
        report.pool,
        report.keys.id,
        report.state,
        report.initial_state
    );
    for record in &report.stages {
        match record.outcome {
            StageOutcome::Skipped => log::info!("[{}]   {:<16} skipped", report.pool, record.stage),
            StageOutcome::Executed(sig) => log::info!("[{}]   {:<16} {}", report.pool, record.stage, sig),
        }
    }
    if let Some(swap) = &report.swap {
        log::info!(
            "[{}] swap in {} out {} rate {}",
            report.pool,
            swap.amount_in_observed,
            swap.amount_out_observed,
            swap.implied_rate
                .map(|r| r.normalize().to_string())
                .unwrap_or_else(|| "n/a".to_string())
        );
    }
}
