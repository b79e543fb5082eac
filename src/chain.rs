//! On-chain access layer: a signing JSON-RPC client per supported network.
//!
//! Each [`EvmChainClient`] wraps a composed Alloy provider with gas, nonce and
//! chain-id fillers plus a wallet filler for the relay signer. Submission is
//! serialized per client so a signing identity never has more than one
//! transaction in flight; the nonce filler stays trivially correct that way.

use alloy_network::EthereumWallet;
use alloy_primitives::{Address, U256};
use alloy_provider::fillers::{
    BlobGasFiller, ChainIdFiller, FillProvider, GasFiller, JoinFill, NonceFiller, WalletFiller,
};
use alloy_provider::{
    Identity, PendingTransactionBuilder, PendingTransactionError, Provider, ProviderBuilder,
    RootProvider, WatchTxError,
};
use alloy_rpc_client::RpcClient;
use alloy_rpc_types_eth::TransactionReceipt;
use alloy_signer_local::PrivateKeySigner;
use alloy_sol_types::sol;
use alloy_transport::TransportError;
use alloy_transport_http::Http;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::instrument;
use url::Url;

use crate::network::Network;
use crate::types::{TokenAmount, TransactionHash};

sol! {
    #[allow(missing_docs)]
    #[allow(clippy::too_many_arguments)]
    #[derive(Debug)]
    #[sol(rpc)]
    interface Usdc {
        function balanceOf(address account) external view returns (uint256);
        function allowance(address owner, address spender) external view returns (uint256);
        function nonces(address owner) external view returns (uint256);
        function transferFrom(address from, address to, uint256 value) external returns (bool);
        function permit(
            address owner,
            address spender,
            uint256 value,
            uint256 deadline,
            uint8 v,
            bytes32 r,
            bytes32 s
        ) external;
    }
}

/// Gas limits sized for USDC proxy contracts; generous but bounded.
pub const PERMIT_GAS_LIMIT: u64 = 100_000;
pub const TRANSFER_FROM_GAS_LIMIT: u64 = 150_000;

/// Combined filler type for gas, blob gas, nonce, and chain ID.
pub type RelayFiller =
    JoinFill<GasFiller, JoinFill<BlobGasFiller, JoinFill<NonceFiller, ChainIdFiller>>>;

/// The fully composed provider type used for signing submissions.
pub type RelayProvider = FillProvider<
    JoinFill<JoinFill<Identity, RelayFiller>, WalletFiller<EthereumWallet>>,
    RootProvider,
>;

/// Errors raised by the chain access layer.
#[derive(Debug, thiserror::Error)]
pub enum ChainError {
    /// The RPC endpoint could not be reached or returned a transport-level failure.
    #[error("RPC endpoint for {network} unavailable: {source}")]
    Unreachable {
        network: Network,
        source: TransportError,
    },
    /// The endpoint serves a different chain than the network registry says.
    #[error("Chain id mismatch for {network}: expected {expected}, endpoint reports {actual}")]
    ChainIdMismatch {
        network: Network,
        expected: u64,
        actual: u64,
    },
    /// A contract call or transaction submission failed before inclusion.
    #[error("Contract call failed: {0}")]
    Contract(#[from] alloy_contract::Error),
    /// The transaction was included but reverted.
    #[error("Transaction {tx_hash} reverted on chain")]
    Reverted { tx_hash: TransactionHash },
    /// The transaction was submitted but no receipt arrived within the window.
    /// Carries the hash so callers can reconcile later.
    #[error("No receipt for {tx_hash} within {timeout_secs}s")]
    ConfirmationTimeout {
        tx_hash: TransactionHash,
        timeout_secs: u64,
    },
    /// Receipt polling failed for a reason other than timing out.
    #[error("Failed to watch transaction {tx_hash}: {source}")]
    ReceiptUnavailable {
        tx_hash: TransactionHash,
        source: PendingTransactionError,
    },
}

/// Confirmed result of an on-chain submission.
#[derive(Debug, Clone)]
pub struct ConfirmedTx {
    pub tx_hash: TransactionHash,
    pub gas_used: u64,
    pub block_number: Option<u64>,
}

/// A signing client bound to one network and one USDC deployment.
#[derive(Debug)]
pub struct EvmChainClient {
    network: Network,
    provider: RelayProvider,
    signer_address: Address,
    /// Held across send and receipt wait. One in-flight tx per identity.
    submission: Mutex<()>,
    receipt_timeout: Duration,
}

impl EvmChainClient {
    /// Connect to `rpc_url` with the given signer and verify the endpoint
    /// serves the chain the registry expects.
    pub async fn connect(
        network: Network,
        rpc_url: Url,
        signer: PrivateKeySigner,
        receipt_timeout: Duration,
    ) -> Result<Self, ChainError> {
        let signer_address = signer.address();
        let wallet = EthereumWallet::from(signer);
        let client = RpcClient::new(Http::new(rpc_url), false);
        let filler = JoinFill::new(
            GasFiller,
            JoinFill::new(
                BlobGasFiller,
                JoinFill::new(NonceFiller::default(), ChainIdFiller::default()),
            ),
        );
        let provider: RelayProvider = ProviderBuilder::default()
            .filler(filler)
            .wallet(wallet)
            .connect_client(client);

        let actual = provider
            .get_chain_id()
            .await
            .map_err(|source| ChainError::Unreachable { network, source })?;
        let expected = network.chain_id();
        if actual != expected {
            return Err(ChainError::ChainIdMismatch {
                network,
                expected,
                actual,
            });
        }
        tracing::info!(%network, chain_id = expected, signer = %signer_address, "Connected EVM chain client");

        Ok(Self {
            network,
            provider,
            signer_address,
            submission: Mutex::new(()),
            receipt_timeout,
        })
    }

    pub fn network(&self) -> Network {
        self.network
    }

    /// Address of the relay signing identity on this network.
    pub fn signer_address(&self) -> Address {
        self.signer_address
    }

    fn usdc(&self) -> Usdc::UsdcInstance<&RelayProvider> {
        Usdc::new(self.network.usdc().address, &self.provider)
    }

    /// USDC balance of `account` in base units.
    #[instrument(skip_all, err, fields(network = %self.network, account = %account))]
    pub async fn balance_of(&self, account: Address) -> Result<TokenAmount, ChainError> {
        let balance = self.usdc().balanceOf(account).call().await?;
        Ok(balance.into())
    }

    /// Current USDC allowance granted by `owner` to `spender`.
    #[instrument(skip_all, err, fields(network = %self.network, owner = %owner, spender = %spender))]
    pub async fn allowance(
        &self,
        owner: Address,
        spender: Address,
    ) -> Result<TokenAmount, ChainError> {
        let allowance = self.usdc().allowance(owner, spender).call().await?;
        Ok(allowance.into())
    }

    /// Current EIP-2612 permit nonce of `owner`.
    #[instrument(skip_all, err, fields(network = %self.network, owner = %owner))]
    pub async fn permit_nonce(&self, owner: Address) -> Result<U256, ChainError> {
        let nonce = self.usdc().nonces(owner).call().await?;
        Ok(nonce)
    }

    /// Native balance of the signing identity, for gas diagnostics.
    pub async fn signer_native_balance(&self) -> Result<U256, ChainError> {
        self.provider
            .get_balance(self.signer_address)
            .await
            .map_err(|source| ChainError::Unreachable {
                network: self.network,
                source,
            })
    }

    /// Height of the latest block, also the liveness probe.
    pub async fn latest_block(&self) -> Result<u64, ChainError> {
        self.provider
            .get_block_number()
            .await
            .map_err(|source| ChainError::Unreachable {
                network: self.network,
                source,
            })
    }

    /// Current gas price in wei.
    pub async fn gas_price(&self) -> Result<u128, ChainError> {
        self.provider
            .get_gas_price()
            .await
            .map_err(|source| ChainError::Unreachable {
                network: self.network,
                source,
            })
    }

    /// Pending transaction nonce of `address`. Distinct from the ERC-20
    /// permit nonce.
    pub async fn transaction_nonce(&self, address: Address) -> Result<u64, ChainError> {
        self.provider
            .get_transaction_count(address)
            .await
            .map_err(|source| ChainError::Unreachable {
                network: self.network,
                source,
            })
    }

    /// Submit a signed EIP-2612 permit on behalf of its owner.
    ///
    /// The caller must have already validated the deadline; an expired permit
    /// would revert and burn gas for nothing.
    #[allow(clippy::too_many_arguments)]
    #[instrument(skip_all, err, fields(network = %self.network, owner = %owner, spender = %spender, value = %value))]
    pub async fn submit_permit(
        &self,
        owner: Address,
        spender: Address,
        value: U256,
        deadline: U256,
        v: u8,
        r: alloy_primitives::B256,
        s: alloy_primitives::B256,
    ) -> Result<ConfirmedTx, ChainError> {
        let _guard = self.submission.lock().await;
        let pending = self
            .usdc()
            .permit(owner, spender, value, deadline, v, r, s)
            .gas(PERMIT_GAS_LIMIT)
            .send()
            .await?;
        self.confirm(pending).await
    }

    /// Move `value` from `from` to `to` against an existing allowance.
    #[instrument(skip_all, err, fields(network = %self.network, from = %from, to = %to, value = %value))]
    pub async fn submit_transfer_from(
        &self,
        from: Address,
        to: Address,
        value: U256,
    ) -> Result<ConfirmedTx, ChainError> {
        let _guard = self.submission.lock().await;
        let pending = self
            .usdc()
            .transferFrom(from, to, value)
            .gas(TRANSFER_FROM_GAS_LIMIT)
            .send()
            .await?;
        self.confirm(pending).await
    }

    /// Wait for a receipt within the configured window and classify the outcome.
    async fn confirm(
        &self,
        pending: PendingTransactionBuilder<alloy_network::Ethereum>,
    ) -> Result<ConfirmedTx, ChainError> {
        let tx_hash = TransactionHash::from(*pending.tx_hash());
        tracing::debug!(%tx_hash, "Submitted transaction, awaiting receipt");
        let receipt: TransactionReceipt = pending
            .with_timeout(Some(self.receipt_timeout))
            .get_receipt()
            .await
            .map_err(|e| match e {
                PendingTransactionError::TxWatcher(WatchTxError::Timeout) => {
                    ChainError::ConfirmationTimeout {
                        tx_hash,
                        timeout_secs: self.receipt_timeout.as_secs(),
                    }
                }
                source => ChainError::ReceiptUnavailable { tx_hash, source },
            })?;
        if !receipt.status() {
            return Err(ChainError::Reverted { tx_hash });
        }
        Ok(ConfirmedTx {
            tx_hash,
            gas_used: receipt.gas_used,
            block_number: receipt.block_number,
        })
    }
}

/// Connected clients for every supported network, built once at startup.
#[derive(Debug)]
pub struct ChainRegistry {
    clients: std::collections::HashMap<Network, EvmChainClient>,
}

impl ChainRegistry {
    /// Connect a client per network. Startup fails if any endpoint is
    /// unreachable or serves the wrong chain.
    pub async fn connect(
        rpc_urls: &std::collections::HashMap<Network, Url>,
        signer: PrivateKeySigner,
        receipt_timeout: Duration,
    ) -> Result<Self, ChainError> {
        let mut clients = std::collections::HashMap::new();
        for network in Network::variants() {
            let rpc_url = match rpc_urls.get(network) {
                Some(url) => url.clone(),
                None => Url::parse(network.default_rpc_url())
                    .expect("Default RPC URLs are well-formed"),
            };
            let client =
                EvmChainClient::connect(*network, rpc_url, signer.clone(), receipt_timeout).await?;
            clients.insert(*network, client);
        }
        Ok(Self { clients })
    }

    pub fn by_network(&self, network: Network) -> Option<&EvmChainClient> {
        self.clients.get(&network)
    }
}

impl<'a> IntoIterator for &'a ChainRegistry {
    type Item = (&'a Network, &'a EvmChainClient);
    type IntoIter = std::collections::hash_map::Iter<'a, Network, EvmChainClient>;

    fn into_iter(self) -> Self::IntoIter {
        self.clients.iter()
    }
}
