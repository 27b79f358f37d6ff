//! Pool fixtures built on freshly deployed test tokens

use crate::harness::TestContext;
use amm_provisioner::{
    derive::RootIds,
    market::MarketIdentity,
    orchestrator::{PoolSettings, SwapSettings},
    swap::{SwapDirection, SwapMode},
    token::{deploy_test_token, DeployedToken},
};
use anyhow::Result;
use rust_decimal::Decimal;
use solana_sdk::signature::{Keypair, Signer};
use std::time::Duration;

pub const SETTLE: Duration = Duration::from_millis(500);

/// Mint a 6-decimal and a 9-decimal token, 100k whole units each
pub fn deploy_pair(ctx: &TestContext) -> Result<(DeployedToken, DeployedToken)> {
    let usdc = deploy_test_token(&ctx.ledger, &ctx.payer, 6, 100_000_000_000, SETTLE)?;
    let vvs = deploy_test_token(&ctx.ledger, &ctx.payer, 9, 100_000_000_000_000, SETTLE)?;
    Ok((usdc, vvs))
}

/// 1 base : 1000 quote pool on a new market, swapping 1 base unit
pub fn pool_settings(ctx: &TestContext, base: &DeployedToken, quote: &DeployedToken) -> PoolSettings {
    let market = Keypair::new();
    PoolSettings {
        name: "e2e".to_string(),
        roots: RootIds {
            amm_program: ctx.amm_program,
            dex_program: ctx.dex_program,
            market: market.pubkey(),
            base_mint: base.mint,
            quote_mint: quote.mint,
        },
        market: MarketIdentity::Keypair(market),
        base_lot_size: 1,
        quote_lot_size: 1,
        fee_rate_bps: 0,
        pc_dust_threshold: 100,
        base_quantity: Decimal::from(1),
        quote_quantity: Decimal::from(1000),
        open_time: 0,
        swap: Some(SwapSettings {
            direction: SwapDirection::BaseToQuote,
            mode: SwapMode::BaseIn,
            amount: 1,
            other_amount_threshold: 1,
        }),
    }
}
