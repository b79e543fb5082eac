//! The relay service: account lifecycle plus permit and transfer execution.
//!
//! This is the layer the HTTP handlers call into. Account operations talk to
//! the custody provider; execution goes through the backend selector. The local
//! signing identity and the custody account are expected to hold the same
//! address, which is what makes custody-to-local fallback transparent to
//! allowance holders.

use alloy_primitives::Address;
use alloy_signer_local::PrivateKeySigner;
use serde::Serialize;
use std::sync::Arc;
use tracing::instrument;

use crate::backend::{BackendSelector, CustodyBackend, LocalBackend};
use crate::chain::ChainRegistry;
use crate::config::Config;
use crate::custody::{CustodyAccount, CustodyClient, CustodyError};
use crate::executor::{
    ExecutionError, parse_address, validate_permit, validate_transfer,
};
use crate::network::Network;
use crate::types::{ExecutionOutcome, PermitParams, TokenAmount, TransferParams};

/// Errors from account operations.
#[derive(Debug, thiserror::Error)]
pub enum AccountError {
    /// No custody backend is configured, so there is nothing to manage.
    #[error("No custody backend configured")]
    CustodyNotConfigured,
    #[error(transparent)]
    Custody(#[from] CustodyError),
    #[error("Invalid address: {0}")]
    InvalidAddress(String),
    #[error("Invalid private key")]
    InvalidKey,
    #[error("Provide either a name or an address")]
    MissingSelector,
}

/// Result of importing the relay key into custody. `recovered` is set when
/// the account already existed and the address was derived locally instead.
#[derive(Debug, Clone, Serialize)]
pub struct ImportedAccount {
    pub name: String,
    pub address: String,
    pub recovered: bool,
}

/// Exported key material in both common encodings.
#[derive(Debug, Clone, Serialize)]
pub struct ExportedAccount {
    pub name: String,
    pub private_key_hex: String,
    pub private_key_hex_prefixed: String,
}

/// Balance of an address in both raw and human units.
#[derive(Debug, Clone, Serialize)]
pub struct BalanceReport {
    pub network: Network,
    pub address: String,
    pub balance: TokenAmount,
    pub balance_usdc: String,
}

/// Allowance granted by `owner` to the relay identity.
#[derive(Debug, Clone, Serialize)]
pub struct AllowanceReport {
    pub network: Network,
    pub owner: String,
    pub spender: String,
    pub allowance: TokenAmount,
    pub allowance_usdc: String,
}

/// Shared application service.
pub struct Relay {
    registry: Arc<ChainRegistry>,
    selector: BackendSelector,
    custody: Option<CustodyClient>,
    custody_account_name: Option<String>,
    signer_address: Address,
    account_override: Option<Address>,
    signer_key_hex: String,
}

impl Relay {
    /// Wire the service together from resolved configuration and a connected
    /// chain registry.
    pub fn new(config: &Config, registry: Arc<ChainRegistry>) -> Result<Self, CustodyError> {
        let signer_address = config.signer.address();
        let local = Arc::new(LocalBackend::new(registry.clone()));
        let (custody, custody_account_name, custody_backend) = match &config.custody {
            Some(custody_config) => {
                let client =
                    CustodyClient::try_new(custody_config.api_url.clone(), &custody_config.api_key)?;
                let backend = CustodyBackend::new(
                    client.clone(),
                    custody_config.account_name.clone(),
                    signer_address,
                );
                (
                    Some(client),
                    Some(custody_config.account_name.clone()),
                    Some(Arc::new(backend) as Arc<dyn crate::backend::ExecutionBackend>),
                )
            }
            None => (None, None, None),
        };
        let selector = BackendSelector::new(custody_backend, local);
        Ok(Self {
            registry,
            selector,
            custody,
            custody_account_name,
            signer_address,
            account_override: config.account_override,
            signer_key_hex: config.signer_key_hex(),
        })
    }

    fn custody(&self) -> Result<&CustodyClient, AccountError> {
        self.custody
            .as_ref()
            .ok_or(AccountError::CustodyNotConfigured)
    }

    /// Address of the relay signing identity.
    pub fn signer_address(&self) -> Address {
        self.signer_address
    }

    /// Whether execution prefers the custody backend.
    pub fn custody_enabled(&self) -> bool {
        self.selector.has_custody()
    }

    /// Create a fresh custody account, under `name` or the configured
    /// default account name.
    #[instrument(skip_all, err, fields(name = ?name))]
    pub async fn create_account(&self, name: Option<&str>) -> Result<CustodyAccount, AccountError> {
        let custody = self.custody()?;
        let name = match name {
            Some(name) => name.to_string(),
            None => self
                .custody_account_name
                .clone()
                .ok_or(AccountError::CustodyNotConfigured)?,
        };
        let account = custody.create_account(&name).await?;
        Ok(account)
    }

    /// Import a private key into custody, defaulting to the relay's own key
    /// and the configured account name.
    ///
    /// When the name is already taken the import is considered done: the
    /// address is derived from the local key and reported with `recovered`
    /// set, so repeated startups stay idempotent.
    #[instrument(skip_all, err, fields(name = ?name))]
    pub async fn import_account(
        &self,
        name: Option<&str>,
        private_key: Option<&str>,
    ) -> Result<ImportedAccount, AccountError> {
        let custody = self.custody()?;
        let name = match name {
            Some(name) => name.to_string(),
            None => self
                .custody_account_name
                .clone()
                .ok_or(AccountError::CustodyNotConfigured)?,
        };
        let key_hex = private_key.unwrap_or(&self.signer_key_hex);
        match custody.import_account(&name, key_hex).await {
            Ok(account) => Ok(ImportedAccount {
                name: account.name,
                address: account.address,
                recovered: false,
            }),
            Err(CustodyError::AlreadyExists { name }) => {
                tracing::info!(%name, "Custody account already exists, deriving address locally");
                let address = match private_key {
                    Some(key) => {
                        let signer: PrivateKeySigner =
                            key.trim().parse().map_err(|_| AccountError::InvalidKey)?;
                        signer.address().to_checksum(None)
                    }
                    None => self.signer_address.to_checksum(None),
                };
                Ok(ImportedAccount {
                    name,
                    address,
                    recovered: true,
                })
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Look a custody account up by name.
    pub async fn account_by_name(&self, name: &str) -> Result<CustodyAccount, AccountError> {
        let account = self.custody()?.account_by_name(name).await?;
        Ok(account)
    }

    /// Look a custody account up by address.
    pub async fn account_by_address(&self, address: &str) -> Result<CustodyAccount, AccountError> {
        parse_address("address", address)
            .map_err(|_| AccountError::InvalidAddress(address.to_string()))?;
        let account = self.custody()?.account_by_address(address).await?;
        Ok(account)
    }

    /// The account implied by the environment, without touching custody.
    /// An operator-pinned address override wins over the derived one.
    pub fn account_from_env(&self) -> CustodyAccount {
        let address = self.account_override.unwrap_or(self.signer_address);
        CustodyAccount {
            name: self
                .custody_account_name
                .clone()
                .unwrap_or_else(|| "local".to_string()),
            address: address.to_checksum(None),
        }
    }

    /// Export the private key a custody account holds, selected by name or
    /// by address, in both encodings.
    #[instrument(skip_all, err, fields(name = ?name, address = ?address))]
    pub async fn export_account(
        &self,
        name: Option<&str>,
        address: Option<&str>,
    ) -> Result<ExportedAccount, AccountError> {
        let custody = self.custody()?;
        let name = match (name, address) {
            (Some(name), _) => name.to_string(),
            (None, Some(address)) => {
                parse_address("address", address)
                    .map_err(|_| AccountError::InvalidAddress(address.to_string()))?;
                custody.account_by_address(address).await?.name
            }
            (None, None) => return Err(AccountError::MissingSelector),
        };
        let exported = custody.export_account(&name).await?;
        let bare = exported
            .private_key
            .strip_prefix("0x")
            .unwrap_or(&exported.private_key)
            .to_string();
        Ok(ExportedAccount {
            name,
            private_key_hex_prefixed: format!("0x{bare}"),
            private_key_hex: bare,
        })
    }

    /// Validate and execute a signed permit.
    #[instrument(skip_all, err, fields(network = %params.network))]
    pub async fn execute_permit(
        &self,
        params: &PermitParams,
    ) -> Result<ExecutionOutcome, ExecutionError> {
        let validated = validate_permit(params)?;
        self.selector.execute_permit(&validated).await
    }

    /// Validate and execute an allowance-backed transfer.
    #[instrument(skip_all, err, fields(network = %params.network))]
    pub async fn execute_transfer(
        &self,
        params: &TransferParams,
    ) -> Result<ExecutionOutcome, ExecutionError> {
        let validated = validate_transfer(params)?;
        self.selector.execute_transfer(&validated).await
    }

    /// USDC balance of `address` (default: the relay identity) on `network`.
    pub async fn balance(
        &self,
        network: Network,
        address: Option<&str>,
    ) -> Result<BalanceReport, ExecutionError> {
        let client = self
            .registry
            .by_network(network)
            .ok_or_else(|| ExecutionError::UnknownNetwork(network.to_string()))?;
        let address = match address {
            Some(raw) => parse_address("address", raw)?,
            None => self.signer_address,
        };
        let balance = client.balance_of(address).await?;
        Ok(BalanceReport {
            network,
            address: address.to_checksum(None),
            balance,
            balance_usdc: balance.to_usdc(network.usdc().decimals).to_string(),
        })
    }

    /// Allowance `owner` has granted to the relay identity on `network`.
    pub async fn allowance(
        &self,
        network: Network,
        owner: &str,
    ) -> Result<AllowanceReport, ExecutionError> {
        let client = self
            .registry
            .by_network(network)
            .ok_or_else(|| ExecutionError::UnknownNetwork(network.to_string()))?;
        let owner = parse_address("owner", owner)?;
        let spender = client.signer_address();
        let allowance = client.allowance(owner, spender).await?;
        Ok(AllowanceReport {
            network,
            owner: owner.to_checksum(None),
            spender: spender.to_checksum(None),
            allowance,
            allowance_usdc: allowance.to_usdc(network.usdc().decimals).to_string(),
        })
    }

    /// Liveness report: reachable networks and the signing identity.
    pub async fn health(&self) -> HealthReport {
        let mut networks = Vec::new();
        for (network, client) in &*self.registry {
            let latest_block = client.latest_block().await.ok();
            let gas_price = client.gas_price().await.ok().map(|wei| wei.to_string());
            let signer_nonce = client.transaction_nonce(self.signer_address).await.ok();
            let signer_wei = self
                .selector
                .get_eth_balance(*network)
                .await
                .ok()
                .map(|wei| wei.to_string());
            networks.push(NetworkHealth {
                network: *network,
                chain_id: network.chain_id(),
                reachable: latest_block.is_some(),
                latest_block,
                gas_price,
                signer_nonce,
                signer_wei,
            });
        }
        networks.sort_by_key(|n| n.chain_id);
        HealthReport {
            ok: true,
            status: "ok",
            signer: self.signer_address.to_checksum(None),
            custody_enabled: self.custody_enabled(),
            networks,
        }
    }
}

/// Reachability and chain diagnostics for one configured network.
#[derive(Debug, Clone, Serialize)]
pub struct NetworkHealth {
    pub network: Network,
    pub chain_id: u64,
    pub reachable: bool,
    pub latest_block: Option<u64>,
    /// Current gas price in wei.
    pub gas_price: Option<String>,
    /// Pending transaction nonce of the relay signer.
    pub signer_nonce: Option<u64>,
    /// Native balance of the relay signer in wei.
    pub signer_wei: Option<String>,
}

/// Health endpoint payload.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub ok: bool,
    pub status: &'static str,
    pub signer: String,
    pub custody_enabled: bool,
    pub networks: Vec<NetworkHealth>,
}
