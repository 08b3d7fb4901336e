// ============================================================================
// Engine configuration
// ============================================================================
//
// Every knob has a default and can be overridden from the environment (or a
// `.env` file). Amount thresholds are entered as human decimal strings and
// converted with the token's real decimal count at start-up, so a minimum
// stake can never silently be expressed in the wrong precision.
//
// ============================================================================

use crate::amount::AmountCodec;
use crate::error::{CoreError, CoreResult};
use crate::market_resolve::{PoolState, RegistryConfig};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_TOKEN_DECIMALS: u32 = 6;
pub const DEFAULT_MIN_STAKE: &str = "1";
pub const DEFAULT_SEED_LIQUIDITY: &str = "1000";
pub const DEFAULT_MIN_DURATION_SECS: u64 = 60 * 60;
pub const DEFAULT_MAX_DURATION_SECS: u64 = 30 * 24 * 60 * 60;
pub const DEFAULT_RPC_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_RPC_RETRY_DELAY_MS: u64 = 500;
pub const DEFAULT_BULK_READ_DELAY_MS: u64 = 100;
pub const DEFAULT_REFRESH_INTERVAL_SECS: u64 = 15;
pub const DEFAULT_CONFIRMATION_POLL_MS: u64 = 1_000;
pub const DEFAULT_METADATA_RETENTION_DAYS: u64 = 30;
pub const DEFAULT_SIM_DATA_DIR: &str = "data/sim";
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:1234";

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub token_decimals: u32,
    /// Human decimal string, e.g. "1.00"
    pub min_stake: String,
    /// Human decimal string split across both pools of a new market
    pub seed_liquidity: String,
    pub min_duration_secs: u64,
    pub max_duration_secs: u64,
    /// Account allowed to resolve/cancel any simulated market
    pub admin: Option<String>,

    /// Ranked read endpoints, primary first
    pub rpc_urls: Vec<String>,
    pub market_contract: Option<String>,
    pub token_contract: Option<String>,
    /// Account used by the node-managed wallet
    pub wallet_address: Option<String>,
    pub rpc_timeout: Duration,
    pub rpc_retry_delay: Duration,
    pub bulk_read_delay: Duration,
    pub refresh_interval: Duration,
    pub confirmation_poll_interval: Duration,

    pub sim_data_dir: PathBuf,
    pub metadata_retention: Duration,
    pub bind_addr: SocketAddr,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            token_decimals: DEFAULT_TOKEN_DECIMALS,
            min_stake: DEFAULT_MIN_STAKE.to_string(),
            seed_liquidity: DEFAULT_SEED_LIQUIDITY.to_string(),
            min_duration_secs: DEFAULT_MIN_DURATION_SECS,
            max_duration_secs: DEFAULT_MAX_DURATION_SECS,
            admin: None,
            rpc_urls: Vec::new(),
            market_contract: None,
            token_contract: None,
            wallet_address: None,
            rpc_timeout: Duration::from_secs(DEFAULT_RPC_TIMEOUT_SECS),
            rpc_retry_delay: Duration::from_millis(DEFAULT_RPC_RETRY_DELAY_MS),
            bulk_read_delay: Duration::from_millis(DEFAULT_BULK_READ_DELAY_MS),
            refresh_interval: Duration::from_secs(DEFAULT_REFRESH_INTERVAL_SECS),
            confirmation_poll_interval: Duration::from_millis(DEFAULT_CONFIRMATION_POLL_MS),
            sim_data_dir: PathBuf::from(DEFAULT_SIM_DATA_DIR),
            metadata_retention: Duration::from_secs(DEFAULT_METADATA_RETENTION_DAYS * 24 * 60 * 60),
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 1234)),
        }
    }
}

impl EngineConfig {
    /// Load from the process environment, reading `.env` first if present.
    pub fn from_env() -> CoreResult<Self> {
        dotenv::dotenv().ok();
        let defaults = Self::default();

        let rpc_urls = std::env::var("RPC_URLS")
            .map(|raw| {
                raw.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            token_decimals: env_parse("TOKEN_DECIMALS", defaults.token_decimals)?,
            min_stake: env_string("MIN_STAKE").unwrap_or(defaults.min_stake),
            seed_liquidity: env_string("SEED_LIQUIDITY").unwrap_or(defaults.seed_liquidity),
            min_duration_secs: env_parse("MIN_DURATION_SECS", defaults.min_duration_secs)?,
            max_duration_secs: env_parse("MAX_DURATION_SECS", defaults.max_duration_secs)?,
            admin: env_string("MARKET_ADMIN"),
            rpc_urls,
            market_contract: env_string("MARKET_CONTRACT"),
            token_contract: env_string("TOKEN_CONTRACT"),
            wallet_address: env_string("WALLET_ADDRESS"),
            rpc_timeout: Duration::from_secs(env_parse("RPC_TIMEOUT_SECS", DEFAULT_RPC_TIMEOUT_SECS)?),
            rpc_retry_delay: Duration::from_millis(env_parse(
                "RPC_RETRY_DELAY_MS",
                DEFAULT_RPC_RETRY_DELAY_MS,
            )?),
            bulk_read_delay: Duration::from_millis(env_parse(
                "BULK_READ_DELAY_MS",
                DEFAULT_BULK_READ_DELAY_MS,
            )?),
            refresh_interval: Duration::from_secs(env_parse(
                "REFRESH_INTERVAL_SECS",
                DEFAULT_REFRESH_INTERVAL_SECS,
            )?),
            confirmation_poll_interval: Duration::from_millis(env_parse(
                "CONFIRMATION_POLL_MS",
                DEFAULT_CONFIRMATION_POLL_MS,
            )?),
            sim_data_dir: env_string("SIM_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.sim_data_dir),
            metadata_retention: Duration::from_secs(
                env_parse("METADATA_RETENTION_DAYS", DEFAULT_METADATA_RETENTION_DAYS)? * 24 * 60 * 60,
            ),
            bind_addr: env_parse(
                "BIND_ADDR",
                SocketAddr::from_str(DEFAULT_BIND_ADDR).unwrap_or(defaults.bind_addr),
            )?,
        })
    }

    pub fn codec(&self) -> CoreResult<AmountCodec> {
        AmountCodec::new(self.token_decimals)
    }

    /// Whether a remote ledger is configured.
    pub fn has_remote_ledger(&self) -> bool {
        !self.rpc_urls.is_empty() && self.market_contract.is_some() && self.token_contract.is_some()
    }

    /// Check thresholds against the token's precision and produce the
    /// registry limits in minor units.
    pub fn validate(&self) -> CoreResult<RegistryConfig> {
        let codec = self.codec()?;

        let min_stake = codec
            .to_minor_units(&self.min_stake)
            .map_err(|e| CoreError::Config(format!("MIN_STAKE: {}", e)))?;
        let seed_liquidity = codec
            .to_minor_units(&self.seed_liquidity)
            .map_err(|e| CoreError::Config(format!("SEED_LIQUIDITY: {}", e)))?;

        if min_stake == 0 {
            return Err(CoreError::Config("MIN_STAKE must be positive".to_string()));
        }
        if min_stake > seed_liquidity {
            return Err(CoreError::Config(format!(
                "MIN_STAKE {} exceeds SEED_LIQUIDITY {}",
                self.min_stake, self.seed_liquidity
            )));
        }
        // every market starts from this seed, so it must be priceable
        PoolState::seeded(seed_liquidity)
            .and_then(|pools| pools.prices())
            .map_err(|e| {
                CoreError::Config(format!(
                    "SEED_LIQUIDITY {} cannot be priced at TOKEN_DECIMALS={}: {}",
                    self.seed_liquidity, self.token_decimals, e
                ))
            })?;
        if self.min_duration_secs == 0 || self.min_duration_secs > self.max_duration_secs {
            return Err(CoreError::Config(format!(
                "duration window [{}, {}] is empty",
                self.min_duration_secs, self.max_duration_secs
            )));
        }
        if self.refresh_interval.is_zero() || self.confirmation_poll_interval.is_zero() {
            return Err(CoreError::Config(
                "REFRESH_INTERVAL_SECS and CONFIRMATION_POLL_MS must be positive".to_string(),
            ));
        }
        if !self.rpc_urls.is_empty() && (self.market_contract.is_none() || self.token_contract.is_none()) {
            return Err(CoreError::Config(
                "RPC_URLS set without MARKET_CONTRACT and TOKEN_CONTRACT".to_string(),
            ));
        }

        Ok(RegistryConfig {
            min_duration_secs: self.min_duration_secs,
            max_duration_secs: self.max_duration_secs,
            min_stake,
            seed_liquidity,
            admin: self.admin.clone(),
        })
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn env_parse<T: FromStr>(key: &str, default: T) -> CoreResult<T> {
    match env_string(key) {
        Some(raw) => raw
            .parse::<T>()
            .map_err(|_| CoreError::Config(format!("{}='{}' could not be parsed", key, raw))),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let registry = EngineConfig::default().validate().unwrap();
        assert_eq!(registry.min_stake, 1_000_000);
        assert_eq!(registry.seed_liquidity, 1_000_000_000);
        assert_eq!(registry.min_duration_secs, 3_600);
        assert_eq!(registry.max_duration_secs, 2_592_000);
    }

    #[test]
    fn test_min_stake_finer_than_token_rejected() {
        let config = EngineConfig {
            token_decimals: 2,
            min_stake: "0.001".to_string(),
            ..EngineConfig::default()
        };
        assert!(matches!(config.validate(), Err(CoreError::Config(_))));
    }

    #[test]
    fn test_min_stake_scales_with_decimals() {
        let six = EngineConfig { min_stake: "0.5".into(), ..EngineConfig::default() };
        let eighteen = EngineConfig {
            token_decimals: 18,
            min_stake: "0.5".into(),
            seed_liquidity: "10".into(),
            ..EngineConfig::default()
        };
        assert_eq!(six.validate().unwrap().min_stake, 500_000);
        assert_eq!(eighteen.validate().unwrap().min_stake, 500_000_000_000_000_000);
    }

    #[test]
    fn test_empty_duration_window_rejected() {
        let config = EngineConfig {
            min_duration_secs: 10,
            max_duration_secs: 5,
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rpc_requires_contracts() {
        let config = EngineConfig {
            rpc_urls: vec!["http://localhost:8545".into()],
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());
        assert!(!config.has_remote_ledger());
    }

    #[test]
    fn test_seed_must_fit_the_invariant() {
        // 500e18 squared overflows the pool invariant
        let eighteen = EngineConfig { token_decimals: 18, ..EngineConfig::default() };
        let err = eighteen.validate().unwrap_err();
        assert!(matches!(&err, CoreError::Config(msg) if msg.contains("SEED_LIQUIDITY")));

        // K beyond the Decimal range still prices
        let twelve = EngineConfig { token_decimals: 12, ..EngineConfig::default() };
        assert_eq!(twelve.validate().unwrap().seed_liquidity, 1_000 * 10u128.pow(12));
    }

    #[test]
    fn test_zero_intervals_rejected() {
        let config = EngineConfig {
            refresh_interval: Duration::ZERO,
            ..EngineConfig::default()
        };
        assert!(matches!(config.validate(), Err(CoreError::Config(_))));
    }
}
