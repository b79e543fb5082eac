//! Request validation and the execution error taxonomy.
//!
//! Every precondition that can be checked without spending gas is checked
//! here, before any backend is attempted: address shape, permit deadline,
//! permit support on the target deployment, and the allowance backing a
//! `transferFrom`. A request that fails a precondition never reaches a
//! backend and never consumes the fallback attempt.

use alloy_primitives::Address;
use std::str::FromStr;
use tracing::instrument;

use crate::chain::ChainError;
use crate::network::Network;
use crate::types::{PermitParams, SignatureComponent, TokenAmount, TransactionHash, TransferParams, UnixTimestamp};

/// Terminal classification of a failed execution.
///
/// `OnChainRevert` is deterministic and never retried against another
/// backend; `Transport`, `ConfirmationTimeout` and `BackendUnavailable` are
/// environmental and eligible for fallback.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ExecutionError {
    #[error("Unknown network: {0}")]
    UnknownNetwork(String),
    #[error("Invalid address in `{field}`: {value}")]
    InvalidAddress { field: &'static str, value: String },
    #[error("Permit deadline {deadline} has already passed (now {now})")]
    ExpiredDeadline {
        deadline: UnixTimestamp,
        now: UnixTimestamp,
    },
    #[error("Insufficient allowance: approved {approved}, required {required}")]
    InsufficientAllowance {
        approved: TokenAmount,
        required: TokenAmount,
    },
    #[error("{0}")]
    UnsupportedOperation(String),
    #[error("Transaction {tx_hash} reverted on chain")]
    OnChainRevert { tx_hash: TransactionHash },
    #[error("Transport failure: {0}")]
    Transport(String),
    #[error("No receipt for {tx_hash} within {timeout_secs}s; reconcile by transaction hash")]
    ConfirmationTimeout {
        tx_hash: TransactionHash,
        timeout_secs: u64,
    },
    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),
}

impl ExecutionError {
    /// Whether a different backend may still succeed on the same request.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ExecutionError::OnChainRevert { .. })
    }
}

impl From<ChainError> for ExecutionError {
    fn from(value: ChainError) -> Self {
        match value {
            ChainError::Reverted { tx_hash } => ExecutionError::OnChainRevert { tx_hash },
            ChainError::ConfirmationTimeout {
                tx_hash,
                timeout_secs,
            } => ExecutionError::ConfirmationTimeout {
                tx_hash,
                timeout_secs,
            },
            other => ExecutionError::Transport(other.to_string()),
        }
    }
}

/// A permit request with every field parsed into on-chain form.
#[derive(Debug, Clone)]
pub struct ValidatedPermit {
    pub network: Network,
    pub owner: Address,
    pub spender: Address,
    pub value: TokenAmount,
    pub deadline: UnixTimestamp,
    pub v: u8,
    pub r: SignatureComponent,
    pub s: SignatureComponent,
}

/// A transfer request with both endpoints parsed.
#[derive(Debug, Clone)]
pub struct ValidatedTransfer {
    pub network: Network,
    pub from: Address,
    pub to: Address,
    pub value: TokenAmount,
}

/// Parse a wire address, naming the offending field on failure.
pub fn parse_address(field: &'static str, value: &str) -> Result<Address, ExecutionError> {
    Address::from_str(value).map_err(|_| ExecutionError::InvalidAddress {
        field,
        value: value.to_string(),
    })
}

/// Reject permits whose deadline is not strictly in the future. Submitting
/// one on-chain would revert and burn gas.
#[instrument(skip_all, err, fields(deadline = %deadline))]
pub fn assert_deadline(deadline: UnixTimestamp) -> Result<(), ExecutionError> {
    let now = UnixTimestamp::now();
    if deadline <= now {
        return Err(ExecutionError::ExpiredDeadline { deadline, now });
    }
    Ok(())
}

/// Reject permit submissions on deployments without an EIP-2612 surface.
#[instrument(skip_all, err, fields(network = %network))]
pub fn assert_permit_support(network: Network) -> Result<(), ExecutionError> {
    if !network.usdc().supports_permit {
        return Err(ExecutionError::UnsupportedOperation(format!(
            "USDC on {network} does not support EIP-2612 permit"
        )));
    }
    Ok(())
}

/// Require the allowance observed on chain to cover the requested amount.
#[instrument(skip_all, err, fields(approved = %approved, required = %required))]
pub fn assert_allowance(
    approved: TokenAmount,
    required: TokenAmount,
) -> Result<(), ExecutionError> {
    if approved < required {
        return Err(ExecutionError::InsufficientAllowance { approved, required });
    }
    Ok(())
}

/// Run every gas-free precondition on a permit request.
#[instrument(skip_all, err)]
pub fn validate_permit(params: &PermitParams) -> Result<ValidatedPermit, ExecutionError> {
    assert_permit_support(params.network)?;
    let owner = parse_address("owner", &params.owner)?;
    let spender = parse_address("spender", &params.spender)?;
    assert_deadline(params.deadline)?;
    Ok(ValidatedPermit {
        network: params.network,
        owner,
        spender,
        value: params.value,
        deadline: params.deadline,
        v: params.v,
        r: params.r,
        s: params.s,
    })
}

/// Run every gas-free precondition on a transfer request. The allowance
/// check needs chain access and happens in the backend, against the
/// spender actually used there.
#[instrument(skip_all, err)]
pub fn validate_transfer(params: &TransferParams) -> Result<ValidatedTransfer, ExecutionError> {
    let from = parse_address("from", &params.from)?;
    let to = parse_address("to", &params.to)?;
    Ok(ValidatedTransfer {
        network: params.network,
        from,
        to,
        value: params.value,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TokenAmount;

    fn permit_params(network: Network, deadline: u64) -> PermitParams {
        PermitParams {
            owner: "0x1111111111111111111111111111111111111111".into(),
            spender: "0x2222222222222222222222222222222222222222".into(),
            value: TokenAmount::from(20000u64),
            deadline: UnixTimestamp(deadline),
            v: 27,
            r: SignatureComponent([0x11; 32]),
            s: SignatureComponent([0x22; 32]),
            network,
        }
    }

    #[test]
    fn expired_deadline_is_rejected() {
        let params = permit_params(Network::EthereumSepolia, 1);
        let err = validate_permit(&params).unwrap_err();
        assert!(matches!(err, ExecutionError::ExpiredDeadline { .. }));
    }

    #[test]
    fn deadline_equal_to_now_is_rejected() {
        // A permit expiring this very second is already unusable by the time
        // it reaches the chain.
        let err = assert_deadline(UnixTimestamp::now()).unwrap_err();
        assert!(matches!(err, ExecutionError::ExpiredDeadline { .. }));
    }

    #[test]
    fn future_deadline_passes() {
        let deadline = UnixTimestamp::now().0 + 3600;
        let params = permit_params(Network::EthereumSepolia, deadline);
        let validated = validate_permit(&params).unwrap();
        assert_eq!(validated.network, Network::EthereumSepolia);
        assert_eq!(validated.v, 27);
    }

    #[test]
    fn permit_on_base_sepolia_is_unsupported() {
        let deadline = UnixTimestamp::now().0 + 3600;
        let params = permit_params(Network::BaseSepolia, deadline);
        let err = validate_permit(&params).unwrap_err();
        assert!(matches!(err, ExecutionError::UnsupportedOperation(_)));
        assert!(err.is_retryable());
    }

    #[test]
    fn malformed_owner_address_names_the_field() {
        let mut params = permit_params(Network::Base, UnixTimestamp::now().0 + 3600);
        params.owner = "not-an-address".into();
        let err = validate_permit(&params).unwrap_err();
        match err {
            ExecutionError::InvalidAddress { field, value } => {
                assert_eq!(field, "owner");
                assert_eq!(value, "not-an-address");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn allowance_shortfall_reports_both_sides() {
        let err =
            assert_allowance(TokenAmount::from(100u64), TokenAmount::from(20000u64)).unwrap_err();
        match err {
            ExecutionError::InsufficientAllowance { approved, required } => {
                assert_eq!(approved, TokenAmount::from(100u64));
                assert_eq!(required, TokenAmount::from(20000u64));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn transfer_validation_parses_both_endpoints() {
        let params = TransferParams {
            from: "0x1111111111111111111111111111111111111111".into(),
            to: "0x2222222222222222222222222222222222222222".into(),
            value: TokenAmount::from(10000u64),
            network: Network::Base,
        };
        let validated = validate_transfer(&params).unwrap();
        assert_eq!(
            validated.from,
            parse_address("from", &params.from).unwrap()
        );
    }

    #[test]
    fn revert_is_terminal_transport_is_not() {
        let revert = ExecutionError::OnChainRevert {
            tx_hash: TransactionHash([0u8; 32]),
        };
        assert!(!revert.is_retryable());
        let transport = ExecutionError::Transport("connection reset".into());
        assert!(transport.is_retryable());
    }
}
