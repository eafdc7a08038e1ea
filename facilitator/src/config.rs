//! Environment-driven configuration for the facilitator server.
//!
//! All settings come from environment variables (with `.env` loaded at
//! startup). Keys and allowlists are read once at boot and treated as
//! immutable; any change requires a restart.
//!
//! Recognized variables:
//! - `PORT` (default 4022), `HOST` (default 0.0.0.0)
//! - `EVM_PRIVATE_KEY` (required) - comma-separated settlement signer keys
//! - `BRIDGE_EVM_PRIVATE_KEY` (optional) - separate signer for bridge burns;
//!   falls back to `EVM_PRIVATE_KEY` when absent
//! - `EVM_RPC_URL` (optional) - default RPC when no per-chain RPC is set
//! - `RPC_URL_<NETWORK>` - per-chain RPC endpoints (see `networks`)
//! - `CROSS_CHAIN_ENABLED` (default true) - master switch for bridging
//! - `DEPLOY_ERC4337_WITH_EIP6492` (default false) - deploy smart wallets
//!   during settlement for EIP-6492-wrapped signatures
//! - `BRIDGE_DB_PATH` (default railbridge.sqlite) - bridge job store file
//! - `BRIDGE_MAX_ATTEMPTS` (default 3) - bridge retry budget
//! - `TX_RECEIPT_TIMEOUT_SECS` (default 120) - receipt wait deadline

use alloy_network::EthereumWallet;
use alloy_primitives::B256;
use alloy_signer_local::PrivateKeySigner;
use std::env;
use std::net::IpAddr;
use std::str::FromStr;

use railbridge_chain_eip155::networks::KNOWN_NETWORKS;
use railbridge_types::chain::ChainId;

const ENV_PORT: &str = "PORT";
const ENV_HOST: &str = "HOST";
const ENV_EVM_PRIVATE_KEY: &str = "EVM_PRIVATE_KEY";
const ENV_BRIDGE_EVM_PRIVATE_KEY: &str = "BRIDGE_EVM_PRIVATE_KEY";
const ENV_EVM_RPC_URL: &str = "EVM_RPC_URL";
const ENV_CROSS_CHAIN_ENABLED: &str = "CROSS_CHAIN_ENABLED";
const ENV_DEPLOY_ERC4337_WITH_EIP6492: &str = "DEPLOY_ERC4337_WITH_EIP6492";
const ENV_BRIDGE_DB_PATH: &str = "BRIDGE_DB_PATH";
const ENV_BRIDGE_MAX_ATTEMPTS: &str = "BRIDGE_MAX_ATTEMPTS";
const ENV_TX_RECEIPT_TIMEOUT_SECS: &str = "TX_RECEIPT_TIMEOUT_SECS";

pub const DEFAULT_PORT: u16 = 4022;
pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_DB_PATH: &str = "railbridge.sqlite";
pub const DEFAULT_RECEIPT_TIMEOUT_SECS: u64 = 120;

/// A validated EVM private key (32 bytes).
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct EvmPrivateKey(B256);

impl EvmPrivateKey {
    pub fn as_bytes(&self) -> &[u8; 32] {
        self.0.as_ref()
    }
}

// Key material must never end up in logs.
impl std::fmt::Debug for EvmPrivateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "EvmPrivateKey(..)")
    }
}

impl FromStr for EvmPrivateKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        B256::from_str(s)
            .map(Self)
            .map_err(|e| format!("Invalid evm private key: {e}"))
    }
}

/// Configuration error types. Any of these is fatal at boot (exit code 1).
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("env {0} not set")]
    MissingVariable(&'static str),
    #[error("env {variable}: {message}")]
    InvalidValue {
        variable: &'static str,
        message: String,
    },
}

/// Immutable server configuration, loaded once at boot.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: IpAddr,
    pub port: u16,
    pub settlement_keys: Vec<EvmPrivateKey>,
    /// Bridge-burn signer keys; `None` means the settlement keys are reused
    /// (and the two paths share one nonce manager per chain).
    pub bridge_keys: Option<Vec<EvmPrivateKey>>,
    /// Chains with an explicit `RPC_URL_<NETWORK>` endpoint.
    pub per_chain_rpc: Vec<(ChainId, String)>,
    /// Default RPC endpoint; attached to the chain it reports via
    /// `eth_chainId` at boot.
    pub default_rpc: Option<String>,
    pub cross_chain_enabled: bool,
    pub deploy_erc4337_with_eip6492: bool,
    pub db_path: String,
    pub bridge_max_attempts: u32,
    pub receipt_timeout_secs: u64,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let port = parse_or(ENV_PORT, DEFAULT_PORT)?;
        let host: IpAddr = parse_or(ENV_HOST, DEFAULT_HOST.parse().expect("valid default host"))?;

        let settlement_keys = parse_keys(ENV_EVM_PRIVATE_KEY)?
            .ok_or(ConfigError::MissingVariable(ENV_EVM_PRIVATE_KEY))?;
        let bridge_keys = parse_keys(ENV_BRIDGE_EVM_PRIVATE_KEY)?;

        let per_chain_rpc = KNOWN_NETWORKS
            .iter()
            .filter_map(|network| {
                env::var(network.env_rpc)
                    .ok()
                    .map(|url| (ChainId::from(network.chain), url))
            })
            .collect();
        let default_rpc = env::var(ENV_EVM_RPC_URL).ok();

        Ok(Self {
            host,
            port,
            settlement_keys,
            bridge_keys,
            per_chain_rpc,
            default_rpc,
            cross_chain_enabled: parse_or(ENV_CROSS_CHAIN_ENABLED, true)?,
            deploy_erc4337_with_eip6492: parse_or(ENV_DEPLOY_ERC4337_WITH_EIP6492, false)?,
            db_path: env::var(ENV_BRIDGE_DB_PATH).unwrap_or_else(|_| DEFAULT_DB_PATH.into()),
            bridge_max_attempts: parse_or(ENV_BRIDGE_MAX_ATTEMPTS, 3)?,
            receipt_timeout_secs: parse_or(
                ENV_TX_RECEIPT_TIMEOUT_SECS,
                DEFAULT_RECEIPT_TIMEOUT_SECS,
            )?,
        })
    }

    /// Builds the settlement wallet from the configured keys.
    pub fn settlement_wallet(&self) -> Result<EthereumWallet, ConfigError> {
        make_wallet(&self.settlement_keys, ENV_EVM_PRIVATE_KEY)
    }

    /// Builds the bridge wallet, or `None` when the settlement wallet is to
    /// be reused.
    pub fn bridge_wallet(&self) -> Result<Option<EthereumWallet>, ConfigError> {
        match &self.bridge_keys {
            Some(keys) => Ok(Some(make_wallet(keys, ENV_BRIDGE_EVM_PRIVATE_KEY)?)),
            None => Ok(None),
        }
    }
}

/// Parses a comma-separated key list from `variable`. `Ok(None)` when the
/// variable is unset; an error when it is set but unparseable or empty.
fn parse_keys(variable: &'static str) -> Result<Option<Vec<EvmPrivateKey>>, ConfigError> {
    let Ok(raw) = env::var(variable) else {
        return Ok(None);
    };
    let keys = raw
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            entry
                .parse::<EvmPrivateKey>()
                .map_err(|message| ConfigError::InvalidValue { variable, message })
        })
        .collect::<Result<Vec<_>, _>>()?;
    if keys.is_empty() {
        return Err(ConfigError::InvalidValue {
            variable,
            message: "did not contain any private keys".into(),
        });
    }
    Ok(Some(keys))
}

/// Constructs an [`EthereumWallet`] registering every key as a signer.
fn make_wallet(
    keys: &[EvmPrivateKey],
    variable: &'static str,
) -> Result<EthereumWallet, ConfigError> {
    let mut signers = keys.iter().map(|key| {
        PrivateKeySigner::from_bytes(&B256::from_slice(key.as_bytes())).map_err(|e| {
            ConfigError::InvalidValue {
                variable,
                message: e.to_string(),
            }
        })
    });
    let first = signers
        .next()
        .expect("key list is non-empty by construction")?;
    let mut wallet = EthereumWallet::from(first);
    for signer in signers {
        wallet.register_signer(signer?);
    }
    Ok(wallet)
}

fn parse_or<T>(variable: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(variable) {
        Err(_) => Ok(default),
        Ok(raw) => raw.parse::<T>().map_err(|e| ConfigError::InvalidValue {
            variable,
            message: e.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn restore_env(key: &str, original: Option<String>) {
        if let Some(value) = original {
            // Safety: guarded by `ENV_LOCK`, so no concurrent environment
            // mutation occurs.
            unsafe { env::set_var(key, value) };
        } else {
            // Safety: guarded by `ENV_LOCK`.
            unsafe { env::remove_var(key) };
        }
    }

    const KEY_1: &str = "0xcafe000000000000000000000000000000000000000000000000000000000001";
    const KEY_2: &str = "0xcafe000000000000000000000000000000000000000000000000000000000002";

    #[test]
    fn loads_defaults_and_required_key() {
        let _guard = ENV_LOCK.lock().expect("env lock poisoned");
        let original_key = env::var(ENV_EVM_PRIVATE_KEY).ok();
        let original_port = env::var(ENV_PORT).ok();
        let original_bridge = env::var(ENV_BRIDGE_EVM_PRIVATE_KEY).ok();

        // Safety: guarded by `ENV_LOCK`.
        unsafe {
            env::set_var(ENV_EVM_PRIVATE_KEY, KEY_1);
            env::remove_var(ENV_PORT);
            env::remove_var(ENV_BRIDGE_EVM_PRIVATE_KEY);
        }

        let config = Config::from_env().expect("config loads");
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.settlement_keys.len(), 1);
        assert!(config.bridge_keys.is_none());
        assert!(config.cross_chain_enabled);
        assert!(!config.deploy_erc4337_with_eip6492);
        assert_eq!(config.bridge_max_attempts, 3);
        assert_eq!(config.db_path, DEFAULT_DB_PATH);

        restore_env(ENV_EVM_PRIVATE_KEY, original_key);
        restore_env(ENV_PORT, original_port);
        restore_env(ENV_BRIDGE_EVM_PRIVATE_KEY, original_bridge);
    }

    #[test]
    fn missing_settlement_key_is_fatal() {
        let _guard = ENV_LOCK.lock().expect("env lock poisoned");
        let original_key = env::var(ENV_EVM_PRIVATE_KEY).ok();

        // Safety: guarded by `ENV_LOCK`.
        unsafe { env::remove_var(ENV_EVM_PRIVATE_KEY) };

        let err = Config::from_env().expect_err("missing key must fail");
        assert!(matches!(err, ConfigError::MissingVariable(ENV_EVM_PRIVATE_KEY)));

        restore_env(ENV_EVM_PRIVATE_KEY, original_key);
    }

    #[test]
    fn wallet_supports_multiple_comma_separated_keys() {
        let _guard = ENV_LOCK.lock().expect("env lock poisoned");
        let original_key = env::var(ENV_EVM_PRIVATE_KEY).ok();

        // Safety: guarded by `ENV_LOCK`.
        unsafe { env::set_var(ENV_EVM_PRIVATE_KEY, format!("{KEY_1}, {KEY_2}")) };

        let config = Config::from_env().expect("config loads");
        assert_eq!(config.settlement_keys.len(), 2);
        let wallet = config.settlement_wallet().expect("wallet builds");

        use alloy_network::NetworkWallet;
        let signers: Vec<_> =
            NetworkWallet::<alloy_network::Ethereum>::signer_addresses(&wallet).collect();
        assert_eq!(signers.len(), 2);

        restore_env(ENV_EVM_PRIVATE_KEY, original_key);
    }

    #[test]
    fn key_debug_does_not_leak_material() {
        let key: EvmPrivateKey = KEY_1.parse().unwrap();
        assert_eq!(format!("{key:?}"), "EvmPrivateKey(..)");
    }
}
