//! Pay-per-request proxy for an x402-gated upstream resource.
//!
//! The upstream answers `402 Payment Required` with its payment terms; the
//! reqwest middleware signs a payment with the relay key and retries with the
//! `X-Payment` header attached. Callers of this service never see the 402
//! handshake, only the final payload plus the settlement receipt the upstream
//! returns in `X-Payment-Response`.

use alloy_signer_local::PrivateKeySigner;
use reqwest_middleware::ClientWithMiddleware;
use serde::Serialize;
use tracing::instrument;
use url::Url;
use x402_reqwest::X402Payments;

/// Errors raised while fetching the paid resource.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    /// Transport failure or the payment middleware refused to pay.
    #[error("Paid request failed: {0}")]
    Request(#[from] reqwest_middleware::Error),
    #[error("Failed to read upstream response: {0}")]
    Body(#[from] reqwest::Error),
}

/// What the upstream returned once payment settled.
#[derive(Debug, Clone, Serialize)]
pub struct ProxyResponse {
    /// Upstream payload, JSON when possible, raw text otherwise.
    pub data: serde_json::Value,
    pub status_code: u16,
    /// Settlement receipt from the upstream's `X-Payment-Response` header.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub x_payment_response: Option<String>,
    pub content_type: Option<String>,
}

/// A client that transparently pays for one upstream resource.
pub struct PaidProxy {
    client: ClientWithMiddleware,
    resource_url: Url,
}

impl PaidProxy {
    /// Build the paying client around the relay signer.
    pub fn new(signer: PrivateKeySigner, resource_url: Url) -> Self {
        let payments = X402Payments::with_wallet(signer);
        let client = reqwest_middleware::ClientBuilder::new(reqwest::Client::new())
            .with(payments)
            .build();
        Self {
            client,
            resource_url,
        }
    }

    /// URL of the resource this proxy pays for.
    pub fn resource_url(&self) -> &Url {
        &self.resource_url
    }

    /// Fetch the paid resource, settling payment along the way if asked.
    #[instrument(skip_all, err, fields(url = %self.resource_url))]
    pub async fn fetch(&self) -> Result<ProxyResponse, ProxyError> {
        let response = self.client.get(self.resource_url.clone()).send().await?;
        let status_code = response.status().as_u16();
        let x_payment_response = response
            .headers()
            .get("X-Payment-Response")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let content_type = response
            .headers()
            .get(http::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.text().await?;
        let data = serde_json::from_str(&body).unwrap_or(serde_json::Value::String(body));
        if x_payment_response.is_some() {
            tracing::info!(status_code, "Paid resource fetched with settled payment");
        }
        Ok(ProxyResponse {
            data,
            status_code,
            x_payment_response,
            content_type,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const TEST_KEY: &str = "0x59c6995e998f97a5a0044966f0945389dc9e86dae88c7a8412f4603b6b78690d";

    fn proxy_for(url: &str) -> PaidProxy {
        let signer = PrivateKeySigner::from_str(TEST_KEY).unwrap();
        PaidProxy::new(signer, Url::parse(url).unwrap())
    }

    #[tokio::test]
    async fn free_resource_passes_straight_through() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/crypto/item1"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("X-Payment-Response", "c2V0dGxlZA==")
                    .set_body_json(serde_json::json!({"item": "item1"})),
            )
            .mount(&mock_server)
            .await;

        let proxy = proxy_for(&format!("{}/crypto/item1", mock_server.uri()));
        let result = proxy.fetch().await.unwrap();
        assert_eq!(result.status_code, 200);
        assert_eq!(result.data["item"], "item1");
        assert_eq!(result.x_payment_response.as_deref(), Some("c2V0dGxlZA=="));
    }

    #[tokio::test]
    async fn non_json_body_is_kept_as_text() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/crypto/item1"))
            .respond_with(ResponseTemplate::new(200).set_body_string("plain payload"))
            .mount(&mock_server)
            .await;

        let proxy = proxy_for(&format!("{}/crypto/item1", mock_server.uri()));
        let result = proxy.fetch().await.unwrap();
        assert_eq!(result.data, serde_json::Value::String("plain payload".into()));
        assert!(result.x_payment_response.is_none());
    }
}
