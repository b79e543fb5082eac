//! Typed HTTP client for the custody provider's account and transfer API.
//!
//! The custody service holds server-side keys addressed by account name. This
//! client covers account lifecycle (create, import, lookup, export) and the
//! two execution primitives the relay can delegate: a native USDC transfer
//! and a permit-then-transferFrom submission.
//!
//! Error handling distinguishes the cases callers branch on: an import of an
//! already-known name is [`CustodyError::AlreadyExists`] and recoverable; an
//! unreachable or erroring custody service is [`CustodyError::Unavailable`]
//! and triggers local fallback.

use http::{HeaderMap, HeaderValue, StatusCode};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::instrument;
use url::Url;

use crate::network::Network;
use crate::types::{PermitParams, TokenAmount, TransactionHash};

/// Errors raised while talking to the custody API.
#[derive(Debug, thiserror::Error)]
pub enum CustodyError {
    #[error("URL parse error: {context}: {source}")]
    UrlParse {
        context: &'static str,
        #[source]
        source: url::ParseError,
    },
    #[error("HTTP error: {context}: {source}")]
    Http {
        context: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("Failed to deserialize JSON: {context}: {source}")]
    JsonDeserialization {
        context: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("Failed to read response body as text: {context}: {source}")]
    ResponseBodyRead {
        context: &'static str,
        #[source]
        source: reqwest::Error,
    },
    /// An account with the requested name already exists at the custody
    /// provider. The caller can recover the address by other means.
    #[error("Custody account `{name}` already exists")]
    AlreadyExists { name: String },
    /// No account matched the lookup.
    #[error("Custody account not found: {0}")]
    NotFound(String),
    #[error("Unexpected HTTP status {status}: {context}: {body}")]
    HttpStatus {
        context: &'static str,
        status: StatusCode,
        body: String,
    },
}

/// A server-side account as the custody API reports it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustodyAccount {
    pub name: String,
    pub address: String,
}

#[derive(Debug, Serialize)]
struct CreateAccountRequest<'a> {
    name: &'a str,
}

#[derive(Debug, Serialize)]
struct ImportAccountRequest<'a> {
    name: &'a str,
    private_key: &'a str,
}

#[derive(Debug, Serialize)]
struct ExportAccountRequest<'a> {
    name: &'a str,
}

/// Exported key material. The custody API returns the raw hex without a
/// prefix; both forms are surfaced to callers.
#[derive(Debug, Clone, Deserialize)]
pub struct ExportedKey {
    pub private_key: String,
}

#[derive(Debug, Serialize)]
struct NativeTransferRequest<'a> {
    from_account: &'a str,
    to: &'a str,
    amount: TokenAmount,
    network: Network,
}

#[derive(Debug, Serialize)]
struct SubmitPermitRequest<'a> {
    spender_account: &'a str,
    permit: &'a PermitParams,
}

/// A transfer acknowledged by the custody provider.
#[derive(Debug, Clone, Deserialize)]
pub struct CustodyTransfer {
    pub tx_hash: TransactionHash,
}

/// A client for the custody provider's REST API.
#[derive(Clone, Debug)]
pub struct CustodyClient {
    base_url: Url,
    client: Client,
    headers: HeaderMap,
    timeout: Option<Duration>,
}

impl CustodyClient {
    /// Constructs a client from a base URL and an API key. The key is sent
    /// as a bearer token with every request.
    pub fn try_new(base_url: Url, api_key: &str) -> Result<Self, CustodyError> {
        let mut headers = HeaderMap::new();
        let value = HeaderValue::from_str(&format!("Bearer {api_key}")).map_err(|_| {
            CustodyError::HttpStatus {
                context: "Constructing Authorization header",
                status: StatusCode::BAD_REQUEST,
                body: "API key contains non-header characters".to_string(),
            }
        })?;
        headers.insert(http::header::AUTHORIZATION, value);
        Ok(Self {
            base_url,
            client: Client::new(),
            headers,
            timeout: None,
        })
    }

    /// Base URL of the custody API.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Sets a timeout for all future requests.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let mut this = self.clone();
        this.timeout = Some(timeout);
        this
    }

    fn endpoint(&self, path: &str, context: &'static str) -> Result<Url, CustodyError> {
        self.base_url
            .join(path)
            .map_err(|source| CustodyError::UrlParse { context, source })
    }

    /// Create a fresh server-side account under `name`.
    #[instrument(skip_all, err, fields(name = %name))]
    pub async fn create_account(&self, name: &str) -> Result<CustodyAccount, CustodyError> {
        let url = self.endpoint("./accounts", "Constructing ./accounts URL")?;
        self.post_json(&url, "POST /accounts", &CreateAccountRequest { name })
            .await
    }

    /// Import an existing private key under `name`.
    ///
    /// A 409 from the custody API becomes [`CustodyError::AlreadyExists`] so
    /// callers can recover instead of failing.
    #[instrument(skip_all, err, fields(name = %name))]
    pub async fn import_account(
        &self,
        name: &str,
        private_key: &str,
    ) -> Result<CustodyAccount, CustodyError> {
        let url = self.endpoint("./accounts/import", "Constructing ./accounts/import URL")?;
        let result = self
            .post_json(
                &url,
                "POST /accounts/import",
                &ImportAccountRequest { name, private_key },
            )
            .await;
        match result {
            Err(CustodyError::HttpStatus { status, .. }) if status == StatusCode::CONFLICT => {
                Err(CustodyError::AlreadyExists {
                    name: name.to_string(),
                })
            }
            other => other,
        }
    }

    /// Look an account up by its name.
    #[instrument(skip_all, err, fields(name = %name))]
    pub async fn account_by_name(&self, name: &str) -> Result<CustodyAccount, CustodyError> {
        let url = self.endpoint(
            &format!("./accounts/by-name/{name}"),
            "Constructing ./accounts/by-name URL",
        )?;
        self.get_json(&url, "GET /accounts/by-name").await
    }

    /// Look an account up by its EVM address.
    #[instrument(skip_all, err, fields(address = %address))]
    pub async fn account_by_address(&self, address: &str) -> Result<CustodyAccount, CustodyError> {
        let url = self.endpoint(
            &format!("./accounts/by-address/{address}"),
            "Constructing ./accounts/by-address URL",
        )?;
        self.get_json(&url, "GET /accounts/by-address").await
    }

    /// Export the private key held for `name`.
    #[instrument(skip_all, err, fields(name = %name))]
    pub async fn export_account(&self, name: &str) -> Result<ExportedKey, CustodyError> {
        let url = self.endpoint("./accounts/export", "Constructing ./accounts/export URL")?;
        self.post_json(&url, "POST /accounts/export", &ExportAccountRequest { name })
            .await
    }

    /// Ask the custody provider to move USDC with its native transfer
    /// primitive, spending from the named account.
    #[instrument(skip_all, err, fields(from = %from_account, to = %to, %amount, %network))]
    pub async fn native_transfer(
        &self,
        from_account: &str,
        to: &str,
        amount: TokenAmount,
        network: Network,
    ) -> Result<CustodyTransfer, CustodyError> {
        let url = self.endpoint("./transfers", "Constructing ./transfers URL")?;
        self.post_json(
            &url,
            "POST /transfers",
            &NativeTransferRequest {
                from_account,
                to,
                amount,
                network,
            },
        )
        .await
    }

    /// Ask the custody provider to submit a signed permit on behalf of its
    /// owner, spending gas from the named account.
    #[instrument(skip_all, err, fields(spender = %spender_account, network = %permit.network))]
    pub async fn submit_permit(
        &self,
        spender_account: &str,
        permit: &PermitParams,
    ) -> Result<CustodyTransfer, CustodyError> {
        let url = self.endpoint(
            "./transfers/permit",
            "Constructing ./transfers/permit URL",
        )?;
        self.post_json(
            &url,
            "POST /transfers/permit",
            &SubmitPermitRequest {
                spender_account,
                permit,
            },
        )
        .await
    }

    async fn post_json<T, R>(
        &self,
        url: &Url,
        context: &'static str,
        payload: &T,
    ) -> Result<R, CustodyError>
    where
        T: Serialize + ?Sized,
        R: serde::de::DeserializeOwned,
    {
        let mut req = self.client.post(url.clone()).json(payload);
        for (key, value) in self.headers.iter() {
            req = req.header(key, value);
        }
        if let Some(timeout) = self.timeout {
            req = req.timeout(timeout);
        }
        let http_response = req
            .send()
            .await
            .map_err(|e| CustodyError::Http { context, source: e })?;
        Self::decode(http_response, context).await
    }

    async fn get_json<R>(&self, url: &Url, context: &'static str) -> Result<R, CustodyError>
    where
        R: serde::de::DeserializeOwned,
    {
        let mut req = self.client.get(url.clone());
        for (key, value) in self.headers.iter() {
            req = req.header(key, value);
        }
        if let Some(timeout) = self.timeout {
            req = req.timeout(timeout);
        }
        let http_response = req
            .send()
            .await
            .map_err(|e| CustodyError::Http { context, source: e })?;
        Self::decode(http_response, context).await
    }

    async fn decode<R>(
        http_response: reqwest::Response,
        context: &'static str,
    ) -> Result<R, CustodyError>
    where
        R: serde::de::DeserializeOwned,
    {
        let status = http_response.status();
        if status == StatusCode::OK || status == StatusCode::CREATED {
            http_response
                .json::<R>()
                .await
                .map_err(|e| CustodyError::JsonDeserialization { context, source: e })
        } else {
            let body = http_response
                .text()
                .await
                .map_err(|e| CustodyError::ResponseBodyRead { context, source: e })?;
            if status == StatusCode::NOT_FOUND {
                return Err(CustodyError::NotFound(body));
            }
            Err(CustodyError::HttpStatus {
                context,
                status,
                body,
            })
        }
    }
}

/// Converts a string URL into a [`CustodyClient`] with no API key, for tests.
impl TryFrom<&str> for CustodyClient {
    type Error = CustodyError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let mut normalized = value.trim_end_matches('/').to_string();
        normalized.push('/');
        let url = Url::parse(&normalized).map_err(|e| CustodyError::UrlParse {
            context: "Failed to parse base url",
            source: e,
        })?;
        CustodyClient::try_new(url, "")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn create_account_round_trips() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/accounts"))
            .and(body_partial_json(json!({"name": "relay-main"})))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "name": "relay-main",
                "address": "0x1111111111111111111111111111111111111111",
            })))
            .mount(&mock_server)
            .await;

        let client = CustodyClient::try_from(mock_server.uri().as_str()).unwrap();
        let account = client.create_account("relay-main").await.unwrap();
        assert_eq!(account.name, "relay-main");
        assert_eq!(
            account.address,
            "0x1111111111111111111111111111111111111111"
        );
    }

    #[tokio::test]
    async fn import_conflict_becomes_already_exists() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/accounts/import"))
            .respond_with(
                ResponseTemplate::new(409).set_body_json(json!({"error": "already exists"})),
            )
            .mount(&mock_server)
            .await;

        let client = CustodyClient::try_from(mock_server.uri().as_str()).unwrap();
        let err = client
            .import_account("relay-main", "deadbeef")
            .await
            .unwrap_err();
        assert!(matches!(err, CustodyError::AlreadyExists { name } if name == "relay-main"));
    }

    #[tokio::test]
    async fn missing_account_becomes_not_found() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/accounts/by-name/ghost"))
            .respond_with(ResponseTemplate::new(404).set_body_string("no such account"))
            .mount(&mock_server)
            .await;

        let client = CustodyClient::try_from(mock_server.uri().as_str()).unwrap();
        let err = client.account_by_name("ghost").await.unwrap_err();
        assert!(matches!(err, CustodyError::NotFound(_)));
    }

    #[tokio::test]
    async fn native_transfer_reports_tx_hash() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/transfers"))
            .and(body_partial_json(json!({
                "from_account": "relay-main",
                "amount": "10000",
                "network": "baseSepolia",
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "tx_hash": format!("0x{}", "ab".repeat(32)),
            })))
            .mount(&mock_server)
            .await;

        let client = CustodyClient::try_from(mock_server.uri().as_str()).unwrap();
        let transfer = client
            .native_transfer(
                "relay-main",
                "0x2222222222222222222222222222222222222222",
                TokenAmount::from(10000u64),
                Network::BaseSepolia,
            )
            .await
            .unwrap();
        assert_eq!(
            transfer.tx_hash.to_string(),
            format!("0x{}", "ab".repeat(32))
        );
    }

    #[tokio::test]
    async fn server_error_is_http_status() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/accounts/export"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&mock_server)
            .await;

        let client = CustodyClient::try_from(mock_server.uri().as_str()).unwrap();
        let err = client.export_account("relay-main").await.unwrap_err();
        match err {
            CustodyError::HttpStatus { status, body, .. } => {
                assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
                assert_eq!(body, "boom");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
