//! Environment-driven configuration.
//!
//! All settings come from environment variables, loaded after `.env` at
//! startup:
//! - `HOST`, `PORT` — bind address
//! - `EVM_PRIVATE_KEY` — hex private key for the local signing identity
//! - `EVM_ACCOUNT_ADDRESS` — optional known-address override reported by the
//!   from_env account lookup instead of the derived signer address
//! - `RPC_URL_BASE`, `RPC_URL_BASE_SEPOLIA`, `RPC_URL_ETH_SEPOLIA` — per-network
//!   RPC overrides; public endpoints are used when unset
//! - `CUSTODY_API_URL`, `CUSTODY_API_KEY`, `CUSTODY_ACCOUNT_NAME` — custody
//!   backend; all three must be set together, otherwise custody is disabled
//! - `RECEIPT_TIMEOUT_SECS` — how long to wait for a transaction receipt
//! - `PAID_RESOURCE_URL` — upstream x402-gated resource the proxy pays for

use alloy_primitives::Address;
use alloy_signer_local::PrivateKeySigner;
use std::collections::HashMap;
use std::env;
use std::str::FromStr;
use std::time::Duration;
use url::Url;

use crate::network::Network;

const ENV_HOST: &str = "HOST";
const ENV_PORT: &str = "PORT";
const ENV_EVM_PRIVATE_KEY: &str = "EVM_PRIVATE_KEY";
const ENV_EVM_ACCOUNT_ADDRESS: &str = "EVM_ACCOUNT_ADDRESS";
const ENV_RPC_BASE: &str = "RPC_URL_BASE";
const ENV_RPC_BASE_SEPOLIA: &str = "RPC_URL_BASE_SEPOLIA";
const ENV_RPC_ETH_SEPOLIA: &str = "RPC_URL_ETH_SEPOLIA";
const ENV_CUSTODY_API_URL: &str = "CUSTODY_API_URL";
const ENV_CUSTODY_API_KEY: &str = "CUSTODY_API_KEY";
const ENV_CUSTODY_ACCOUNT_NAME: &str = "CUSTODY_ACCOUNT_NAME";
const ENV_RECEIPT_TIMEOUT_SECS: &str = "RECEIPT_TIMEOUT_SECS";
const ENV_PAID_RESOURCE_URL: &str = "PAID_RESOURCE_URL";

mod config_defaults {
    pub const HOST: &str = "0.0.0.0";
    pub const PORT: u16 = 8080;
    pub const RECEIPT_TIMEOUT_SECS: u64 = 60;
    pub const PAID_RESOURCE_URL: &str = "https://pay.zen7.com/crypto/item1";
}

/// Errors raised while reading configuration from the environment.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("env {0} not set")]
    MissingVar(&'static str),
    #[error("env {var} is invalid: {reason}")]
    InvalidVar { var: &'static str, reason: String },
    #[error(
        "custody configuration incomplete: {ENV_CUSTODY_API_URL}, {ENV_CUSTODY_API_KEY} and {ENV_CUSTODY_ACCOUNT_NAME} must be set together"
    )]
    PartialCustody,
}

/// Custody backend settings. Present only when fully configured.
#[derive(Debug, Clone)]
pub struct CustodyConfig {
    pub api_url: Url,
    pub api_key: String,
    pub account_name: String,
}

/// Fully resolved service configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub signer: PrivateKeySigner,
    /// Known on-chain address to report instead of the derived signer
    /// address, when the operator pins one.
    pub account_override: Option<Address>,
    pub rpc_urls: HashMap<Network, Url>,
    pub custody: Option<CustodyConfig>,
    pub receipt_timeout: Duration,
    pub paid_resource_url: Url,
}

impl Config {
    /// Read and validate all settings from the environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let host = env::var(ENV_HOST).unwrap_or_else(|_| config_defaults::HOST.to_string());
        let port = match env::var(ENV_PORT) {
            Ok(value) => value.parse().map_err(|_| ConfigError::InvalidVar {
                var: ENV_PORT,
                reason: format!("not a port number: {value}"),
            })?,
            Err(_) => config_defaults::PORT,
        };

        let key = env::var(ENV_EVM_PRIVATE_KEY)
            .map_err(|_| ConfigError::MissingVar(ENV_EVM_PRIVATE_KEY))?;
        let signer =
            PrivateKeySigner::from_str(key.trim()).map_err(|e| ConfigError::InvalidVar {
                var: ENV_EVM_PRIVATE_KEY,
                reason: e.to_string(),
            })?;

        let account_override = match env::var(ENV_EVM_ACCOUNT_ADDRESS) {
            Ok(value) => Some(Address::from_str(value.trim()).map_err(|e| {
                ConfigError::InvalidVar {
                    var: ENV_EVM_ACCOUNT_ADDRESS,
                    reason: e.to_string(),
                }
            })?),
            Err(_) => None,
        };

        let mut rpc_urls = HashMap::new();
        for network in Network::variants() {
            let var = match network {
                Network::Base => ENV_RPC_BASE,
                Network::BaseSepolia => ENV_RPC_BASE_SEPOLIA,
                Network::EthereumSepolia => ENV_RPC_ETH_SEPOLIA,
            };
            if let Ok(value) = env::var(var) {
                let url = Url::parse(&value).map_err(|e| ConfigError::InvalidVar {
                    var,
                    reason: e.to_string(),
                })?;
                rpc_urls.insert(*network, url);
            }
        }

        let custody = Self::custody_from_env()?;

        let receipt_timeout = match env::var(ENV_RECEIPT_TIMEOUT_SECS) {
            Ok(value) => {
                let secs: u64 = value.parse().map_err(|_| ConfigError::InvalidVar {
                    var: ENV_RECEIPT_TIMEOUT_SECS,
                    reason: format!("not a number of seconds: {value}"),
                })?;
                Duration::from_secs(secs)
            }
            Err(_) => Duration::from_secs(config_defaults::RECEIPT_TIMEOUT_SECS),
        };

        let paid_resource_url = env::var(ENV_PAID_RESOURCE_URL)
            .unwrap_or_else(|_| config_defaults::PAID_RESOURCE_URL.to_string());
        let paid_resource_url =
            Url::parse(&paid_resource_url).map_err(|e| ConfigError::InvalidVar {
                var: ENV_PAID_RESOURCE_URL,
                reason: e.to_string(),
            })?;

        Ok(Self {
            host,
            port,
            signer,
            account_override,
            rpc_urls,
            custody,
            receipt_timeout,
            paid_resource_url,
        })
    }

    fn custody_from_env() -> Result<Option<CustodyConfig>, ConfigError> {
        let api_url = env::var(ENV_CUSTODY_API_URL).ok();
        let api_key = env::var(ENV_CUSTODY_API_KEY).ok();
        let account_name = env::var(ENV_CUSTODY_ACCOUNT_NAME).ok();
        match (api_url, api_key, account_name) {
            (None, None, None) => Ok(None),
            (Some(api_url), Some(api_key), Some(account_name)) => {
                let api_url = Url::parse(&api_url).map_err(|e| ConfigError::InvalidVar {
                    var: ENV_CUSTODY_API_URL,
                    reason: e.to_string(),
                })?;
                Ok(Some(CustodyConfig {
                    api_url,
                    api_key,
                    account_name,
                }))
            }
            _ => Err(ConfigError::PartialCustody),
        }
    }

    /// Hex form of the local signing key, for custody import.
    pub fn signer_key_hex(&self) -> String {
        hex::encode(self.signer.to_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Env vars are process-global; serialize tests that touch them.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    const TEST_KEY: &str = "0x59c6995e998f97a5a0044966f0945389dc9e86dae88c7a8412f4603b6b78690d";

    fn clear_env() {
        for var in [
            ENV_HOST,
            ENV_PORT,
            ENV_EVM_PRIVATE_KEY,
            ENV_EVM_ACCOUNT_ADDRESS,
            ENV_RPC_BASE,
            ENV_RPC_BASE_SEPOLIA,
            ENV_RPC_ETH_SEPOLIA,
            ENV_CUSTODY_API_URL,
            ENV_CUSTODY_API_KEY,
            ENV_CUSTODY_ACCOUNT_NAME,
            ENV_RECEIPT_TIMEOUT_SECS,
            ENV_PAID_RESOURCE_URL,
        ] {
            unsafe { env::remove_var(var) };
        }
    }

    #[test]
    fn defaults_apply_when_only_key_is_set() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        unsafe { env::set_var(ENV_EVM_PRIVATE_KEY, TEST_KEY) };
        let config = Config::from_env().unwrap();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 8080);
        assert!(config.custody.is_none());
        assert_eq!(config.receipt_timeout, Duration::from_secs(60));
        assert!(config.rpc_urls.is_empty());
        clear_env();
    }

    #[test]
    fn missing_key_is_an_error() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::MissingVar(ENV_EVM_PRIVATE_KEY)));
    }

    #[test]
    fn partial_custody_is_rejected() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        unsafe {
            env::set_var(ENV_EVM_PRIVATE_KEY, TEST_KEY);
            env::set_var(ENV_CUSTODY_API_URL, "https://custody.example");
        }
        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::PartialCustody));
        clear_env();
    }

    #[test]
    fn account_address_override_is_parsed() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        unsafe {
            env::set_var(ENV_EVM_PRIVATE_KEY, TEST_KEY);
            env::set_var(
                ENV_EVM_ACCOUNT_ADDRESS,
                "0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913",
            );
        }
        let config = Config::from_env().unwrap();
        let pinned = config.account_override.unwrap();
        assert_ne!(pinned, config.signer.address());
        assert_eq!(
            pinned.to_checksum(None),
            "0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913"
        );
        clear_env();
    }

    #[test]
    fn malformed_account_address_is_rejected() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        unsafe {
            env::set_var(ENV_EVM_PRIVATE_KEY, TEST_KEY);
            env::set_var(ENV_EVM_ACCOUNT_ADDRESS, "not-an-address");
        }
        let err = Config::from_env().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidVar {
                var: ENV_EVM_ACCOUNT_ADDRESS,
                ..
            }
        ));
        clear_env();
    }

    #[test]
    fn rpc_overrides_are_picked_up() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        unsafe {
            env::set_var(ENV_EVM_PRIVATE_KEY, TEST_KEY);
            env::set_var(ENV_RPC_ETH_SEPOLIA, "https://rpc.example/sepolia");
        }
        let config = Config::from_env().unwrap();
        assert_eq!(
            config.rpc_urls.get(&Network::EthereumSepolia).unwrap().as_str(),
            "https://rpc.example/sepolia"
        );
        assert!(!config.rpc_urls.contains_key(&Network::Base));
        clear_env();
    }
}
