//! Provisioner configuration

use crate::derive::{parse_address, RootIds};
use crate::ledger::SubmitOptions;
use crate::market::MarketIdentity;
use crate::orchestrator::{PoolSettings, SettleDelays, SwapSettings};
use crate::swap::{SwapDirection, SwapMode};
use anyhow::{bail, Context, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use solana_sdk::{
    commitment_config::{CommitmentConfig, CommitmentLevel},
    signature::{Keypair, Signer},
};
use std::str::FromStr;
use std::time::Duration;

const VVS_MINT: &str = "5s7oAh76gkfFR1DUsHxoKSG5kWoyq8Z25tkeByGMToZL";
const USDC_MINT: &str = "4zMMC9srt5Ri5X14GAgXhaHii3GnPAEERYPJgZJDncDU";
const DEVNET_DEX_PROGRAM: &str = "DESVgJVGajEgKGXhb6XmqDHGz3VjdgP7rEVESBgxmroY";
const DEVNET_AMM_PROGRAM: &str = "9rpQHSyFVM1dkkHFQ2TtTzPEW7DVmEyPmN8wVniqJtuC";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// RPC URL for the cluster
    pub rpc_url: String,

    /// Payer wallet keypair path
    pub keypair_path: String,

    /// processed, confirmed or finalized
    #[serde(default = "default_commitment")]
    pub commitment: String,

    #[serde(default)]
    pub skip_preflight: bool,

    /// Poll each signature until confirmed, up to this many seconds
    #[serde(default)]
    pub confirm_timeout_secs: Option<u64>,

    #[serde(default)]
    pub settle: SettleConfig,

    pub pools: Vec<PoolConfig>,
}

fn default_commitment() -> String {
    "confirmed".to_string()
}

/// Seconds to wait after each stage before probing again
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SettleConfig {
    pub market_secs: u64,
    pub pre_initialize_secs: u64,
    pub seed_liquidity_secs: u64,
    pub initialize_secs: u64,
    pub owner_accounts_secs: u64,
    pub swap_secs: u64,
}

impl Default for SettleConfig {
    fn default() -> Self {
        Self {
            market_secs: 60,
            pre_initialize_secs: 60,
            seed_liquidity_secs: 3,
            initialize_secs: 30,
            owner_accounts_secs: 3,
            swap_secs: 3,
        }
    }
}

impl SettleConfig {
    pub fn delays(&self) -> SettleDelays {
        SettleDelays {
            market: Duration::from_secs(self.market_secs),
            pre_initialize: Duration::from_secs(self.pre_initialize_secs),
            seed_liquidity: Duration::from_secs(self.seed_liquidity_secs),
            initialize: Duration::from_secs(self.initialize_secs),
            owner_accounts: Duration::from_secs(self.owner_accounts_secs),
            swap: Duration::from_secs(self.swap_secs),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapConfig {
    pub direction: SwapDirection,
    pub mode: SwapMode,
    /// Exact input (base_in) or exact output (base_out), in base units
    pub amount: u64,
    /// Minimum output (base_in) or maximum input (base_out)
    pub other_amount_threshold: u64,
}

/// One pool to provision
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    pub name: String,
    pub amm_program: String,
    pub dex_program: String,
    pub base_mint: String,
    pub quote_mint: String,

    #[serde(default = "default_lot_size")]
    pub base_lot_size: u64,
    #[serde(default = "default_lot_size")]
    pub quote_lot_size: u64,
    #[serde(default)]
    pub fee_rate_bps: u16,
    #[serde(default = "default_pc_dust_threshold")]
    pub pc_dust_threshold: u64,

    /// Initial deposit in human units, e.g. "1000" or "0.5"
    pub base_quantity: Decimal,
    pub quote_quantity: Decimal,

    #[serde(default)]
    pub open_time: u64,

    /// Keypair of the market; required when the market does not exist yet
    #[serde(default)]
    pub market_keypair_path: Option<String>,

    /// Address of an existing market
    #[serde(default)]
    pub market_address: Option<String>,

    #[serde(default)]
    pub swap: Option<SwapConfig>,
}

fn default_lot_size() -> u64 {
    1
}

fn default_pc_dust_threshold() -> u64 {
    100
}

impl PoolConfig {
    /// Parse identifiers and load the market keypair
    pub fn resolve(&self) -> Result<PoolSettings> {
        let market = match (&self.market_keypair_path, &self.market_address) {
            (Some(path), address) => {
                let keypair = load_keypair(path)
                    .with_context(|| format!("pool {}: market keypair", self.name))?;
                if let Some(address) = address {
                    let declared = parse_address("market_address", address)?;
                    if declared != keypair.pubkey() {
                        bail!(
                            "pool {}: market keypair {} does not match market_address {}",
                            self.name,
                            keypair.pubkey(),
                            declared
                        );
                    }
                }
                MarketIdentity::Keypair(keypair)
            }
            (None, Some(address)) => MarketIdentity::Address(parse_address("market_address", address)?),
            (None, None) => bail!("pool {}: set market_keypair_path or market_address", self.name),
        };

        let roots = RootIds::parse(
            &self.amm_program,
            &self.dex_program,
            &market.address().to_string(),
            &self.base_mint,
            &self.quote_mint,
        )
        .with_context(|| format!("pool {}", self.name))?;

        Ok(PoolSettings {
            name: self.name.clone(),
            roots,
            market,
            base_lot_size: self.base_lot_size,
            quote_lot_size: self.quote_lot_size,
            fee_rate_bps: self.fee_rate_bps,
            pc_dust_threshold: self.pc_dust_threshold,
            base_quantity: self.base_quantity,
            quote_quantity: self.quote_quantity,
            open_time: self.open_time,
            swap: self.swap.map(|s| SwapSettings {
                direction: s.direction,
                mode: s.mode,
                amount: s.amount,
                other_amount_threshold: s.other_amount_threshold,
            }),
        })
    }
}

impl Config {
    /// Load configuration from TOML file
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("PROVISIONER_CONFIG")
            .unwrap_or_else(|_| "provisioner-config.toml".to_string());

        let config_str = std::fs::read_to_string(&config_path)
            .context(format!("Failed to read config file: {}", config_path))?;

        Self::from_toml(&config_str)
    }

    pub fn from_toml(config_str: &str) -> Result<Self> {
        let config: Config = toml::from_str(config_str).context("Failed to parse config TOML")?;
        config.commitment_config()?;
        Ok(config)
    }

    /// Two VVS/USDC pools on devnet, one per direction
    pub fn default_devnet() -> Self {
        let pool = |name: &str, base: &str, quote: &str, base_qty: i64, quote_qty: i64, swap_amount: u64| PoolConfig {
            name: name.to_string(),
            amm_program: DEVNET_AMM_PROGRAM.to_string(),
            dex_program: DEVNET_DEX_PROGRAM.to_string(),
            base_mint: base.to_string(),
            quote_mint: quote.to_string(),
            base_lot_size: 1,
            quote_lot_size: 1,
            fee_rate_bps: 0,
            pc_dust_threshold: 100,
            base_quantity: Decimal::from(base_qty),
            quote_quantity: Decimal::from(quote_qty),
            open_time: 0,
            market_keypair_path: Some(format!("~/.config/amm-provisioner/{}-market.json", name)),
            market_address: None,
            swap: Some(SwapConfig {
                direction: SwapDirection::BaseToQuote,
                mode: SwapMode::BaseIn,
                amount: swap_amount,
                other_amount_threshold: 1,
            }),
        };

        Self {
            rpc_url: "https://api.devnet.solana.com".to_string(),
            keypair_path: "~/.config/solana/id.json".to_string(),
            commitment: default_commitment(),
            skip_preflight: true,
            confirm_timeout_secs: None,
            settle: SettleConfig::default(),
            pools: vec![
                // spend USDC, receive VVS
                pool("usdc-vvs-buy", USDC_MINT, VVS_MINT, 1, 1000, 1),
                // spend 0.001 VVS, receive USDC
                pool("vvs-usdc-sell", VVS_MINT, USDC_MINT, 100, 1, 1_000_000),
            ],
        }
    }

    pub fn commitment_config(&self) -> Result<CommitmentConfig> {
        let commitment = CommitmentLevel::from_str(&self.commitment)
            .map_err(|e| anyhow::anyhow!("Invalid commitment {:?}: {}", self.commitment, e))?;
        Ok(CommitmentConfig { commitment })
    }

    pub fn submit_options(&self) -> Result<SubmitOptions> {
        Ok(SubmitOptions {
            commitment: self.commitment_config()?,
            skip_preflight: self.skip_preflight,
            confirm_timeout: self.confirm_timeout_secs.map(Duration::from_secs),
        })
    }
}

/// Load a keypair from a JSON byte array, a base58 secret or raw bytes
pub fn load_keypair(path: &str) -> Result<Keypair> {
    let expanded_path = shellexpand::tilde(path);
    let bytes = std::fs::read(expanded_path.as_ref())
        .context(format!("Failed to read keypair from {}", path))?;

    let secret = match bytes.first().copied() {
        None => bail!("Keypair file {} is empty", path),
        Some(b'[') => serde_json::from_slice::<Vec<u8>>(&bytes).context("Failed to parse keypair JSON")?,
        Some(_) if bytes.len() != 64 => {
            let text = std::str::from_utf8(&bytes).context("Keypair file is neither JSON, base58 nor 64 bytes")?;
            bs58::decode(text.trim())
                .into_vec()
                .context("Failed to decode base58 keypair")?
        }
        Some(_) => bytes,
    };

    Keypair::try_from(&secret[..]).context("Failed to create keypair from bytes")
}
