//! HTTP endpoints of the relay service.
//!
//! Account management lives under `/cdp/accounts`, execution and chain reads
//! under `/x402`. Error bodies are `{"detail": "..."}` with the status chosen
//! by error class: precondition failures are 400s, custody trouble maps to
//! 502/503, and an unresolved confirmation is a 504 carrying the transaction
//! hash for later reconciliation.

use axum::extract::Query;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Extension, Json, Router, response::IntoResponse, response::Response};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::instrument;

use crate::executor::ExecutionError;
use crate::network::Network;
use crate::proxy::PaidProxy;
use crate::relay::{AccountError, Relay};
use crate::types::{ExecutionOutcome, PermitParams, TokenAmount, TransferParams};

/// All routes of the service. State is attached via extensions in `main`.
pub fn routes() -> Router {
    Router::new()
        .route("/health", get(get_health))
        .route("/cdp/accounts", post(post_create_account))
        .route("/cdp/accounts/import", post(post_import_account))
        .route("/cdp/accounts/by_name", get(get_account_by_name))
        .route("/cdp/accounts/by_address", get(get_account_by_address))
        .route("/cdp/accounts/from_env", get(get_account_from_env))
        .route("/cdp/accounts/export", post(post_export_account))
        .route("/x402/execute-permit", post(post_execute_permit))
        .route("/x402/transfer-from", post(post_transfer_from))
        .route("/x402/balance", get(get_balance))
        .route("/x402/allowance", get(get_allowance))
        .route("/x402/item1", get(get_paid_item))
}

fn detail(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "detail": message.into() }))).into_response()
}

/// Map execution failures onto HTTP statuses.
fn execution_error_response(error: ExecutionError) -> Response {
    let status = match &error {
        ExecutionError::UnknownNetwork(_)
        | ExecutionError::InvalidAddress { .. }
        | ExecutionError::ExpiredDeadline { .. }
        | ExecutionError::InsufficientAllowance { .. }
        | ExecutionError::UnsupportedOperation(_) => StatusCode::BAD_REQUEST,
        ExecutionError::ConfirmationTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        ExecutionError::BackendUnavailable(_) => StatusCode::BAD_GATEWAY,
        ExecutionError::OnChainRevert { .. } | ExecutionError::Transport(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    detail(status, error.to_string())
}

fn account_error_response(error: AccountError) -> Response {
    let status = match &error {
        AccountError::CustodyNotConfigured => StatusCode::SERVICE_UNAVAILABLE,
        AccountError::InvalidAddress(_)
        | AccountError::InvalidKey
        | AccountError::MissingSelector => StatusCode::BAD_REQUEST,
        AccountError::Custody(crate::custody::CustodyError::NotFound(_)) => StatusCode::NOT_FOUND,
        AccountError::Custody(crate::custody::CustodyError::AlreadyExists { .. }) => {
            StatusCode::CONFLICT
        }
        AccountError::Custody(_) => StatusCode::BAD_GATEWAY,
    };
    detail(status, error.to_string())
}

fn execution_response(message: &str, outcome: ExecutionOutcome) -> Response {
    (
        StatusCode::OK,
        Json(json!({
            "success": true,
            "message": message,
            "method": outcome.method,
            "txHash": outcome.tx_hash,
            "network": outcome.network,
            "details": outcome.details,
        })),
    )
        .into_response()
}

/// `GET /health`: signer identity and per-network reachability.
#[instrument(skip_all)]
async fn get_health(Extension(relay): Extension<Arc<Relay>>) -> impl IntoResponse {
    Json(relay.health().await)
}

#[derive(Debug, Default, Deserialize)]
struct CreateAccountBody {
    name: Option<String>,
}

/// `POST /cdp/accounts`: create a fresh custody account. The body is
/// optional; a missing name falls back to the configured account name.
#[instrument(skip_all)]
async fn post_create_account(
    Extension(relay): Extension<Arc<Relay>>,
    body: Option<Json<CreateAccountBody>>,
) -> Response {
    let body = body.map(|Json(body)| body).unwrap_or_default();
    match relay.create_account(body.name.as_deref()).await {
        Ok(account) => (StatusCode::CREATED, Json(account)).into_response(),
        Err(error) => account_error_response(error),
    }
}

#[derive(Debug, Deserialize)]
struct ImportAccountBody {
    /// Defaults to the relay's own key when omitted.
    private_key: Option<String>,
    /// Defaults to the configured custody account name when omitted.
    name: Option<String>,
}

/// `POST /cdp/accounts/import`: import a private key into custody.
///
/// Re-importing an existing name succeeds with `recovered: true`.
#[instrument(skip_all)]
async fn post_import_account(
    Extension(relay): Extension<Arc<Relay>>,
    Json(body): Json<ImportAccountBody>,
) -> Response {
    match relay
        .import_account(body.name.as_deref(), body.private_key.as_deref())
        .await
    {
        Ok(imported) => (StatusCode::OK, Json(imported)).into_response(),
        Err(error) => account_error_response(error),
    }
}

#[derive(Debug, Deserialize)]
struct ByNameQuery {
    name: String,
}

/// `GET /cdp/accounts/by_name?name=...`
#[instrument(skip_all)]
async fn get_account_by_name(
    Extension(relay): Extension<Arc<Relay>>,
    Query(query): Query<ByNameQuery>,
) -> Response {
    match relay.account_by_name(&query.name).await {
        Ok(account) => Json(account).into_response(),
        Err(error) => account_error_response(error),
    }
}

#[derive(Debug, Deserialize)]
struct ByAddressQuery {
    address: String,
}

/// `GET /cdp/accounts/by_address?address=0x...`
#[instrument(skip_all)]
async fn get_account_by_address(
    Extension(relay): Extension<Arc<Relay>>,
    Query(query): Query<ByAddressQuery>,
) -> Response {
    match relay.account_by_address(&query.address).await {
        Ok(account) => Json(account).into_response(),
        Err(error) => account_error_response(error),
    }
}

/// `GET /cdp/accounts/from_env`: the account implied by the local key.
#[instrument(skip_all)]
async fn get_account_from_env(Extension(relay): Extension<Arc<Relay>>) -> Response {
    Json(relay.account_from_env()).into_response()
}

#[derive(Debug, Deserialize)]
struct ExportAccountBody {
    name: Option<String>,
    address: Option<String>,
}

/// `POST /cdp/accounts/export`: private key held by a custody account,
/// selected by name or address, in both encodings.
#[instrument(skip_all)]
async fn post_export_account(
    Extension(relay): Extension<Arc<Relay>>,
    Json(body): Json<ExportAccountBody>,
) -> Response {
    match relay
        .export_account(body.name.as_deref(), body.address.as_deref())
        .await
    {
        Ok(exported) => Json(exported).into_response(),
        Err(error) => account_error_response(error),
    }
}

/// `POST /x402/execute-permit`: submit a signed EIP-2612 permit.
#[instrument(skip_all, fields(network = %body.network))]
async fn post_execute_permit(
    Extension(relay): Extension<Arc<Relay>>,
    Json(body): Json<PermitParams>,
) -> Response {
    match relay.execute_permit(&body).await {
        Ok(outcome) => execution_response("Permit executed", outcome),
        Err(error) => {
            tracing::warn!(error = %error, "Permit execution failed");
            execution_error_response(error)
        }
    }
}

#[derive(Debug, Deserialize)]
struct TransferFromBody {
    /// The allowance granter. `owner` is accepted as an alias.
    #[serde(alias = "owner")]
    from: String,
    /// Recipient; defaults to the relay identity.
    to: Option<String>,
    /// Amount in USDC base units. Defaults to `10000` (0.01 USDC).
    /// `amount` is accepted as an alias.
    #[serde(alias = "amount")]
    value: Option<TokenAmount>,
    network: Network,
}

const DEFAULT_TRANSFER_VALUE: u64 = 10_000;

/// `POST /x402/transfer-from`: pull approved funds with `transferFrom`.
#[instrument(skip_all, fields(network = %body.network))]
async fn post_transfer_from(
    Extension(relay): Extension<Arc<Relay>>,
    Json(body): Json<TransferFromBody>,
) -> Response {
    let params = TransferParams {
        from: body.from,
        to: body
            .to
            .unwrap_or_else(|| relay.signer_address().to_checksum(None)),
        value: body
            .value
            .unwrap_or_else(|| TokenAmount::from(DEFAULT_TRANSFER_VALUE)),
        network: body.network,
    };
    match relay.execute_transfer(&params).await {
        Ok(outcome) => transfer_response(&params.value, outcome),
        Err(error) => {
            tracing::warn!(error = %error, "Transfer execution failed");
            execution_error_response(error)
        }
    }
}

/// Transfer success bodies additionally surface the amount moved and the
/// recipient's resulting balance when the executing backend reports it.
fn transfer_response(amount: &TokenAmount, outcome: ExecutionOutcome) -> Response {
    let mut body = json!({
        "success": true,
        "message": "Transfer completed",
        "method": outcome.method,
        "txHash": outcome.tx_hash,
        "network": outcome.network,
        "amount_transferred": amount.to_string(),
        "details": outcome.details,
    });
    let balances = body["details"].as_object().map(|details| {
        (
            details.get("final_balance").cloned(),
            details.get("final_balance_usdc").cloned(),
        )
    });
    if let (Some(map), Some((raw, usdc))) = (body.as_object_mut(), balances) {
        if let Some(raw) = raw {
            map.insert("final_balance".to_string(), raw);
        }
        if let Some(usdc) = usdc {
            map.insert("final_balance_usdc".to_string(), usdc);
        }
    }
    (StatusCode::OK, Json(body)).into_response()
}

#[derive(Debug, Deserialize)]
struct BalanceQuery {
    network: String,
    address: Option<String>,
}

/// `GET /x402/balance?network=...&address=0x...`
#[instrument(skip_all)]
async fn get_balance(
    Extension(relay): Extension<Arc<Relay>>,
    Query(query): Query<BalanceQuery>,
) -> Response {
    let network: Network = match query.network.parse() {
        Ok(network) => network,
        Err(e) => return detail(StatusCode::BAD_REQUEST, e.to_string()),
    };
    match relay.balance(network, query.address.as_deref()).await {
        Ok(report) => Json(report).into_response(),
        Err(error) => execution_error_response(error),
    }
}

#[derive(Debug, Deserialize)]
struct AllowanceQuery {
    network: String,
    owner: String,
}

/// `GET /x402/allowance?network=...&owner=0x...`: allowance granted to the
/// relay identity.
#[instrument(skip_all)]
async fn get_allowance(
    Extension(relay): Extension<Arc<Relay>>,
    Query(query): Query<AllowanceQuery>,
) -> Response {
    let network: Network = match query.network.parse() {
        Ok(network) => network,
        Err(e) => return detail(StatusCode::BAD_REQUEST, e.to_string()),
    };
    match relay.allowance(network, &query.owner).await {
        Ok(report) => Json(report).into_response(),
        Err(error) => execution_error_response(error),
    }
}

/// `GET /x402/item1`: fetch the upstream paid resource, paying on the way.
#[instrument(skip_all)]
async fn get_paid_item(Extension(proxy): Extension<Arc<PaidProxy>>) -> Response {
    match proxy.fetch().await {
        Ok(response) => Json(response).into_response(),
        Err(error) => {
            tracing::error!(error = %error, "Paid proxy request failed");
            detail(StatusCode::BAD_GATEWAY, error.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TransactionHash;

    #[test]
    fn precondition_failures_are_bad_requests() {
        let response = execution_error_response(ExecutionError::UnsupportedOperation(
            "no permit on baseSepolia".into(),
        ));
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn confirmation_timeout_is_gateway_timeout() {
        let response = execution_error_response(ExecutionError::ConfirmationTimeout {
            tx_hash: TransactionHash([0x11; 32]),
            timeout_secs: 60,
        });
        assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
    }

    #[test]
    fn revert_is_internal_error() {
        let response = execution_error_response(ExecutionError::OnChainRevert {
            tx_hash: TransactionHash([0x11; 32]),
        });
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn missing_custody_is_service_unavailable() {
        let response = account_error_response(AccountError::CustodyNotConfigured);
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn transfer_success_body_surfaces_balances() {
        let outcome = ExecutionOutcome {
            method: crate::types::ExecutionMethod::LocalSigned,
            tx_hash: TransactionHash([0x22; 32]),
            network: Network::Base,
            details: Some(json!({
                "final_balance": "30000",
                "final_balance_usdc": "0.030000",
            })),
        };
        let response = transfer_response(&TokenAmount::from(20000u64), outcome);
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["success"], json!(true));
        assert_eq!(body["amount_transferred"], json!("20000"));
        assert_eq!(body["final_balance"], json!("30000"));
        assert_eq!(body["final_balance_usdc"], json!("0.030000"));
        assert!(body["txHash"].is_string());
    }
}
