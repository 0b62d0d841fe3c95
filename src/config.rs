use serde::{Deserialize, Serialize};
use std::env;

use crate::core::Address;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub cache: CacheConfig,
    pub chain: ChainConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub capacity: usize,
}

/// Ledger-side configuration, read once at process start. Contract addresses
/// are optional: a deployment without them supports free communities only and
/// paid flows fail with a configuration error instead of guessing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    pub chain_id: u64,
    pub rpc_url: String,
    pub usdc_address: Option<Address>,
    pub membership_address: Option<Address>,
    pub marketplace_address: Option<Address>,
    pub registrar_address: Option<Address>,
    pub treasury_address: Option<Address>,
    pub default_membership_duration_secs: u64,
    pub default_transfer_cooldown_secs: u64,
    pub default_subscription_price: f64,
}

/// Base Sepolia, matching the app's default deployment target.
const DEFAULT_CHAIN_ID: u64 = 84532;
const DEFAULT_RPC_URL: &str = "https://sepolia.base.org";
const DEFAULT_USDC_ADDRESS: &str = "0xd9aAEc86B65D86f6A7B5b1b0c42FFA531710b6CA";
const DEFAULT_MEMBERSHIP_DURATION_SECS: u64 = 30 * 24 * 60 * 60;
const DEFAULT_TRANSFER_COOLDOWN_SECS: u64 = 7 * 24 * 60 * 60;
const DEFAULT_SUBSCRIPTION_PRICE: f64 = 99.0;

fn env_address(key: &str) -> Option<Address> {
    env::var(key).ok().and_then(|raw| Address::parse(&raw).ok())
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            database: DatabaseConfig {
                url: env::var("DATABASE_URL")
                    .unwrap_or_else(|_| "sqlite:data/skillvesta.db".to_string()),
            },
            server: ServerConfig {
                host: env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: env::var("SERVER_PORT")
                    .unwrap_or_else(|_| "3000".to_string())
                    .parse()
                    .unwrap_or(3000),
            },
            cache: CacheConfig {
                capacity: env::var("CACHE_CAPACITY")
                    .unwrap_or_else(|_| "1000".to_string())
                    .parse()
                    .unwrap_or(1000),
            },
            chain: ChainConfig {
                chain_id: env::var("CHAIN_ID")
                    .unwrap_or_else(|_| DEFAULT_CHAIN_ID.to_string())
                    .parse()
                    .unwrap_or(DEFAULT_CHAIN_ID),
                rpc_url: env::var("CHAIN_RPC_URL").unwrap_or_else(|_| DEFAULT_RPC_URL.to_string()),
                usdc_address: env_address("USDC_CONTRACT_ADDRESS")
                    .or_else(|| Address::parse(DEFAULT_USDC_ADDRESS).ok()),
                membership_address: env_address("MEMBERSHIP_CONTRACT_ADDRESS"),
                marketplace_address: env_address("MARKETPLACE_CONTRACT_ADDRESS"),
                registrar_address: env_address("REGISTRAR_CONTRACT_ADDRESS"),
                treasury_address: env_address("PLATFORM_TREASURY_ADDRESS"),
                default_membership_duration_secs: env::var("MEMBERSHIP_DURATION_SECS")
                    .unwrap_or_else(|_| DEFAULT_MEMBERSHIP_DURATION_SECS.to_string())
                    .parse()
                    .unwrap_or(DEFAULT_MEMBERSHIP_DURATION_SECS),
                default_transfer_cooldown_secs: env::var("TRANSFER_COOLDOWN_SECS")
                    .unwrap_or_else(|_| DEFAULT_TRANSFER_COOLDOWN_SECS.to_string())
                    .parse()
                    .unwrap_or(DEFAULT_TRANSFER_COOLDOWN_SECS),
                default_subscription_price: env::var("SUBSCRIPTION_PRICE_USDC")
                    .unwrap_or_else(|_| DEFAULT_SUBSCRIPTION_PRICE.to_string())
                    .parse()
                    .unwrap_or(DEFAULT_SUBSCRIPTION_PRICE),
            },
        })
    }

    pub fn server_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}
