//! Execution backends and the selection policy between them.
//!
//! Two backends can carry out a validated request: the custody provider
//! (server-side keys, reached over HTTP) and the local signer (a private key
//! this process holds, submitting through [`crate::chain`]). The selector
//! prefers custody when configured and falls back to local signing exactly
//! once, on any failure that is not a deterministic on-chain revert. A local
//! failure after fallback is terminal.

use alloy_primitives::U256;
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use tracing::instrument;

use crate::chain::ChainRegistry;
use crate::custody::{CustodyClient, CustodyError};
use crate::executor::{ExecutionError, ValidatedPermit, ValidatedTransfer, assert_allowance};
use crate::network::Network;
use crate::types::{ExecutionMethod, ExecutionOutcome, PermitParams};

/// A strategy for carrying out validated permit and transfer requests.
#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    /// Short label for logs.
    fn label(&self) -> &'static str;

    /// Submit a validated permit on behalf of its owner.
    async fn execute_permit(
        &self,
        permit: &ValidatedPermit,
    ) -> Result<ExecutionOutcome, ExecutionError>;

    /// Carry out a validated allowance-backed transfer.
    async fn execute_transfer(
        &self,
        transfer: &ValidatedTransfer,
    ) -> Result<ExecutionOutcome, ExecutionError>;

    /// Native-token balance of the backend's signing identity, in wei.
    async fn get_eth_balance(&self, network: Network) -> Result<U256, ExecutionError>;
}

impl From<CustodyError> for ExecutionError {
    /// Custody failures cannot be told apart from transient service trouble
    /// at this layer, so they all classify as retryable unavailability.
    fn from(value: CustodyError) -> Self {
        ExecutionError::BackendUnavailable(value.to_string())
    }
}

/// Backend that delegates to the custody provider's API.
///
/// The custody account holds the same address as the local signer, so an
/// allowance granted to the relay identity is spendable from either side.
pub struct CustodyBackend {
    client: CustodyClient,
    account_name: String,
    account_address: alloy_primitives::Address,
}

impl CustodyBackend {
    pub fn new(
        client: CustodyClient,
        account_name: String,
        account_address: alloy_primitives::Address,
    ) -> Self {
        Self {
            client,
            account_name,
            account_address,
        }
    }

    pub fn account_name(&self) -> &str {
        &self.account_name
    }
}

#[async_trait]
impl ExecutionBackend for CustodyBackend {
    fn label(&self) -> &'static str {
        "custody"
    }

    #[instrument(skip_all, err, fields(backend = self.label(), network = %permit.network))]
    async fn execute_permit(
        &self,
        permit: &ValidatedPermit,
    ) -> Result<ExecutionOutcome, ExecutionError> {
        let wire = PermitParams {
            owner: permit.owner.to_checksum(None),
            spender: permit.spender.to_checksum(None),
            value: permit.value,
            deadline: permit.deadline,
            v: permit.v,
            r: permit.r,
            s: permit.s,
            network: permit.network,
        };
        let transfer = self.client.submit_permit(&self.account_name, &wire).await?;
        Ok(ExecutionOutcome {
            method: ExecutionMethod::CustodyPermitTransfer,
            tx_hash: transfer.tx_hash,
            network: permit.network,
            details: Some(json!({
                "owner": wire.owner,
                "spender": wire.spender,
                "value": wire.value.to_string(),
                "deadline": wire.deadline.0,
            })),
        })
    }

    #[instrument(skip_all, err, fields(backend = self.label(), network = %transfer.network))]
    async fn execute_transfer(
        &self,
        transfer: &ValidatedTransfer,
    ) -> Result<ExecutionOutcome, ExecutionError> {
        // The custody API only moves the account's own funds. Pulling from a
        // third-party holder needs transferFrom, which only the local signer
        // submits.
        if transfer.from != self.account_address {
            return Err(ExecutionError::BackendUnavailable(format!(
                "custody account {} cannot spend from {}",
                self.account_address, transfer.from
            )));
        }
        let result = self
            .client
            .native_transfer(
                &self.account_name,
                &transfer.to.to_checksum(None),
                transfer.value,
                transfer.network,
            )
            .await?;
        Ok(ExecutionOutcome {
            method: ExecutionMethod::CustodyNative,
            tx_hash: result.tx_hash,
            network: transfer.network,
            details: None,
        })
    }

    async fn get_eth_balance(&self, _network: Network) -> Result<U256, ExecutionError> {
        Err(ExecutionError::UnsupportedOperation(
            "Custody provider does not expose native balances".to_string(),
        ))
    }
}

/// Backend that signs and submits through the locally held key.
pub struct LocalBackend {
    registry: Arc<ChainRegistry>,
}

impl LocalBackend {
    pub fn new(registry: Arc<ChainRegistry>) -> Self {
        Self { registry }
    }

    fn client(&self, network: Network) -> Result<&crate::chain::EvmChainClient, ExecutionError> {
        self.registry
            .by_network(network)
            .ok_or_else(|| ExecutionError::UnknownNetwork(network.to_string()))
    }
}

#[async_trait]
impl ExecutionBackend for LocalBackend {
    fn label(&self) -> &'static str {
        "local"
    }

    #[instrument(skip_all, err, fields(backend = self.label(), network = %permit.network))]
    async fn execute_permit(
        &self,
        permit: &ValidatedPermit,
    ) -> Result<ExecutionOutcome, ExecutionError> {
        let client = self.client(permit.network)?;
        // The nonce this permit consumes, read back for the caller rather
        // than trusted from the request.
        let nonce = client.permit_nonce(permit.owner).await?;
        let confirmed = client
            .submit_permit(
                permit.owner,
                permit.spender,
                permit.value.0,
                U256::from(permit.deadline.0),
                permit.v,
                permit.r.into(),
                permit.s.into(),
            )
            .await?;
        Ok(ExecutionOutcome {
            method: ExecutionMethod::LocalSigned,
            tx_hash: confirmed.tx_hash,
            network: permit.network,
            details: Some(json!({
                "owner": permit.owner.to_checksum(None),
                "spender": permit.spender.to_checksum(None),
                "value": permit.value.to_string(),
                "deadline": permit.deadline.0,
                "nonce": nonce.to_string(),
                "gas_used": confirmed.gas_used,
                "block_number": confirmed.block_number,
            })),
        })
    }

    #[instrument(skip_all, err, fields(backend = self.label(), network = %transfer.network))]
    async fn execute_transfer(
        &self,
        transfer: &ValidatedTransfer,
    ) -> Result<ExecutionOutcome, ExecutionError> {
        let client = self.client(transfer.network)?;
        let spender = client.signer_address();
        // The allowance precheck happens against the identity that will
        // actually submit. Skipped when the signer moves its own funds.
        if transfer.from != spender {
            let approved = client.allowance(transfer.from, spender).await?;
            assert_allowance(approved, transfer.value)?;
        }
        let confirmed = client
            .submit_transfer_from(transfer.from, transfer.to, transfer.value.0)
            .await?;
        let decimals = transfer.network.usdc().decimals;
        let final_balance = client.balance_of(transfer.to).await?;
        Ok(ExecutionOutcome {
            method: ExecutionMethod::LocalSigned,
            tx_hash: confirmed.tx_hash,
            network: transfer.network,
            details: Some(json!({
                "gas_used": confirmed.gas_used,
                "block_number": confirmed.block_number,
                "final_balance": final_balance.to_string(),
                "final_balance_usdc": final_balance.to_usdc(decimals).to_string(),
            })),
        })
    }

    async fn get_eth_balance(&self, network: Network) -> Result<U256, ExecutionError> {
        let balance = self.client(network)?.signer_native_balance().await?;
        Ok(balance)
    }
}

/// Chooses between custody and local execution with single-shot fallback.
pub struct BackendSelector {
    custody: Option<Arc<dyn ExecutionBackend>>,
    local: Arc<dyn ExecutionBackend>,
}

impl BackendSelector {
    pub fn new(custody: Option<Arc<dyn ExecutionBackend>>, local: Arc<dyn ExecutionBackend>) -> Self {
        Self { custody, local }
    }

    /// Whether a custody backend is configured at all.
    pub fn has_custody(&self) -> bool {
        self.custody.is_some()
    }

    #[instrument(skip_all, err, fields(network = %permit.network))]
    pub async fn execute_permit(
        &self,
        permit: &ValidatedPermit,
    ) -> Result<ExecutionOutcome, ExecutionError> {
        let Some(custody) = &self.custody else {
            return self.local.execute_permit(permit).await;
        };
        match custody.execute_permit(permit).await {
            Ok(outcome) => Ok(outcome),
            Err(err) if err.is_retryable() => {
                tracing::warn!(error = %err, "Custody permit execution failed, retrying with local signer");
                let outcome = self.local.execute_permit(permit).await?;
                Ok(mark_fallback(outcome))
            }
            Err(err) => Err(err),
        }
    }

    #[instrument(skip_all, err, fields(network = %transfer.network))]
    pub async fn execute_transfer(
        &self,
        transfer: &ValidatedTransfer,
    ) -> Result<ExecutionOutcome, ExecutionError> {
        let Some(custody) = &self.custody else {
            return self.local.execute_transfer(transfer).await;
        };
        match custody.execute_transfer(transfer).await {
            Ok(outcome) => Ok(outcome),
            Err(err) if err.is_retryable() => {
                tracing::warn!(error = %err, "Custody transfer failed, retrying with local signer");
                let outcome = self.local.execute_transfer(transfer).await?;
                Ok(mark_fallback(outcome))
            }
            Err(err) => Err(err),
        }
    }

    /// Native balance reads always come from the local chain view; the
    /// custody provider does not expose them.
    pub async fn get_eth_balance(&self, network: Network) -> Result<U256, ExecutionError> {
        self.local.get_eth_balance(network).await
    }
}

/// Record on the outcome that the result came from the fallback path.
fn mark_fallback(mut outcome: ExecutionOutcome) -> ExecutionOutcome {
    let mut details = outcome
        .details
        .take()
        .unwrap_or_else(|| json!({}));
    if let Some(map) = details.as_object_mut() {
        map.insert("fallback_from_custody".to_string(), json!(true));
    }
    outcome.details = Some(details);
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{SignatureComponent, TokenAmount, TransactionHash, UnixTimestamp};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ScriptedBackend {
        calls: AtomicUsize,
        result: fn() -> Result<ExecutionOutcome, ExecutionError>,
    }

    impl ScriptedBackend {
        fn new(result: fn() -> Result<ExecutionOutcome, ExecutionError>) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                result,
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ExecutionBackend for ScriptedBackend {
        fn label(&self) -> &'static str {
            "scripted"
        }

        async fn execute_permit(
            &self,
            _permit: &ValidatedPermit,
        ) -> Result<ExecutionOutcome, ExecutionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            (self.result)()
        }

        async fn execute_transfer(
            &self,
            _transfer: &ValidatedTransfer,
        ) -> Result<ExecutionOutcome, ExecutionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            (self.result)()
        }

        async fn get_eth_balance(&self, _network: Network) -> Result<U256, ExecutionError> {
            Ok(U256::ZERO)
        }
    }

    fn local_outcome() -> Result<ExecutionOutcome, ExecutionError> {
        Ok(ExecutionOutcome {
            method: ExecutionMethod::LocalSigned,
            tx_hash: TransactionHash([0x22; 32]),
            network: Network::Base,
            details: None,
        })
    }

    fn custody_outcome() -> Result<ExecutionOutcome, ExecutionError> {
        Ok(ExecutionOutcome {
            method: ExecutionMethod::CustodyPermitTransfer,
            tx_hash: TransactionHash([0x11; 32]),
            network: Network::Base,
            details: None,
        })
    }

    fn unavailable() -> Result<ExecutionOutcome, ExecutionError> {
        Err(ExecutionError::BackendUnavailable("custody down".into()))
    }

    fn revert() -> Result<ExecutionOutcome, ExecutionError> {
        Err(ExecutionError::OnChainRevert {
            tx_hash: TransactionHash([0x33; 32]),
        })
    }

    fn sample_permit() -> ValidatedPermit {
        ValidatedPermit {
            network: Network::Base,
            owner: alloy_primitives::Address::repeat_byte(0x11),
            spender: alloy_primitives::Address::repeat_byte(0x22),
            value: TokenAmount::from(20000u64),
            deadline: UnixTimestamp(u64::MAX),
            v: 27,
            r: SignatureComponent([0x11; 32]),
            s: SignatureComponent([0x22; 32]),
        }
    }

    fn sample_transfer() -> ValidatedTransfer {
        ValidatedTransfer {
            network: Network::Base,
            from: alloy_primitives::Address::repeat_byte(0x11),
            to: alloy_primitives::Address::repeat_byte(0x22),
            value: TokenAmount::from(10000u64),
        }
    }

    #[tokio::test]
    async fn custody_permit_reports_request_details() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/transfers/permit"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "tx_hash": format!("0x{}", "11".repeat(32)),
            })))
            .mount(&mock_server)
            .await;
        let client = CustodyClient::try_from(mock_server.uri().as_str()).unwrap();
        let backend = CustodyBackend::new(
            client,
            "relay-main".to_string(),
            alloy_primitives::Address::repeat_byte(0x22),
        );

        let outcome = backend.execute_permit(&sample_permit()).await.unwrap();
        assert_eq!(outcome.method, ExecutionMethod::CustodyPermitTransfer);
        let details = outcome.details.unwrap();
        assert_eq!(details["value"], json!("20000"));
        assert_eq!(details["deadline"], json!(u64::MAX));
        assert!(details["owner"].as_str().unwrap().starts_with("0x"));
        assert!(details["spender"].as_str().unwrap().starts_with("0x"));
    }

    #[tokio::test]
    async fn custody_success_short_circuits() {
        let custody = ScriptedBackend::new(custody_outcome);
        let local = ScriptedBackend::new(local_outcome);
        let selector = BackendSelector::new(Some(custody.clone()), local.clone());
        let outcome = selector.execute_permit(&sample_permit()).await.unwrap();
        assert_eq!(outcome.method, ExecutionMethod::CustodyPermitTransfer);
        assert_eq!(custody.calls(), 1);
        assert_eq!(local.calls(), 0);
    }

    #[tokio::test]
    async fn unavailable_custody_falls_back_exactly_once() {
        let custody = ScriptedBackend::new(unavailable);
        let local = ScriptedBackend::new(local_outcome);
        let selector = BackendSelector::new(Some(custody.clone()), local.clone());
        let outcome = selector.execute_transfer(&sample_transfer()).await.unwrap();
        assert_eq!(outcome.method, ExecutionMethod::LocalSigned);
        assert_eq!(custody.calls(), 1);
        assert_eq!(local.calls(), 1);
        let details = outcome.details.unwrap();
        assert_eq!(details["fallback_from_custody"], serde_json::json!(true));
    }

    #[tokio::test]
    async fn revert_does_not_fall_back() {
        let custody = ScriptedBackend::new(revert);
        let local = ScriptedBackend::new(local_outcome);
        let selector = BackendSelector::new(Some(custody.clone()), local.clone());
        let err = selector.execute_permit(&sample_permit()).await.unwrap_err();
        assert!(matches!(err, ExecutionError::OnChainRevert { .. }));
        assert_eq!(local.calls(), 0);
    }

    #[tokio::test]
    async fn local_failure_after_fallback_is_terminal() {
        let custody = ScriptedBackend::new(unavailable);
        let local = ScriptedBackend::new(unavailable);
        let selector = BackendSelector::new(Some(custody.clone()), local.clone());
        let err = selector.execute_permit(&sample_permit()).await.unwrap_err();
        assert!(matches!(err, ExecutionError::BackendUnavailable(_)));
        assert_eq!(custody.calls(), 1);
        assert_eq!(local.calls(), 1);
    }

    #[tokio::test]
    async fn no_custody_goes_straight_to_local() {
        let local = ScriptedBackend::new(local_outcome);
        let selector = BackendSelector::new(None, local.clone());
        let outcome = selector.execute_permit(&sample_permit()).await.unwrap();
        assert_eq!(outcome.method, ExecutionMethod::LocalSigned);
        assert_eq!(local.calls(), 1);
        // No fallback happened, so no provenance marker either.
        assert!(outcome.details.is_none());
    }
}
