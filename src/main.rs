//! HTTP entrypoint of the permit relay.
//!
//! Endpoints:
//! - `GET /health` — signer identity and per-network reachability
//! - `POST /cdp/accounts` — create a custody account
//! - `POST /cdp/accounts/import` — import the relay key into custody
//! - `GET /cdp/accounts/by_name`, `GET /cdp/accounts/by_address` — lookups
//! - `GET /cdp/accounts/from_env` — account implied by the local key
//! - `POST /cdp/accounts/export` — export held key material
//! - `POST /x402/execute-permit` — submit a signed EIP-2612 permit
//! - `POST /x402/transfer-from` — move approved funds via `transferFrom`
//! - `GET /x402/balance`, `GET /x402/allowance` — chain reads
//! - `GET /x402/item1` — fetch the upstream paid resource
//!
//! Environment:
//! - `.env` values loaded at startup
//! - `HOST`, `PORT` control binding address
//! - `EVM_PRIVATE_KEY`, `RPC_URL_*`, `CUSTODY_*` configure execution
//! - `OTEL_*` variables enable tracing export

use axum::Extension;
use axum::http::Method;
use dotenvy::dotenv;
use std::sync::Arc;
use tower_http::cors;
use tower_http::trace::TraceLayer;

use permit_relay::chain::ChainRegistry;
use permit_relay::config::Config;
use permit_relay::handlers;
use permit_relay::proxy::PaidProxy;
use permit_relay::relay::Relay;
use permit_relay::sig_down::SigDown;
use permit_relay::telemetry::Telemetry;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();

    let _telemetry = Telemetry::new();

    let config = Config::from_env()?;

    let registry = Arc::new(
        ChainRegistry::connect(&config.rpc_urls, config.signer.clone(), config.receipt_timeout)
            .await?,
    );
    let relay = Arc::new(Relay::new(&config, registry)?);
    let proxy = Arc::new(PaidProxy::new(
        config.signer.clone(),
        config.paid_resource_url.clone(),
    ));

    tracing::info!(
        signer = %relay.signer_address(),
        custody = relay.custody_enabled(),
        paid_resource = %proxy.resource_url(),
        "Relay initialized"
    );

    let app = handlers::routes()
        .layer(Extension(relay))
        .layer(Extension(proxy))
        .layer(TraceLayer::new_for_http())
        .layer(
            cors::CorsLayer::new()
                .allow_origin(cors::Any)
                .allow_methods([Method::GET, Method::POST])
                .allow_headers(cors::Any),
        );

    let addr = format!("{}:{}", config.host, config.port);
    tracing::info!("Starting server at http://{}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .unwrap_or_else(|e| {
            tracing::error!("Failed to bind to {}: {}", addr, e);
            std::process::exit(1);
        });

    let sig_down = SigDown::try_new()?;
    let cancellation_token = sig_down.cancellation_token();
    let graceful_shutdown = async move { cancellation_token.cancelled().await };
    axum::serve(listener, app)
        .with_graceful_shutdown(graceful_shutdown)
        .await?;

    Ok(())
}
