//! USDC permit relay: gas-sponsored EIP-2612 permits and allowance-backed
//! transfers on Base and the Sepolia testnets.
//!
//! The service accepts permits signed off-chain by token holders, submits
//! them on-chain at the relay's expense, and moves approved funds with
//! `transferFrom`. Execution is carried out by a custody provider when one is
//! configured, with transparent fallback to a locally held signing key. A
//! small proxy pays for an x402-gated upstream resource on demand.
//!
//! # Modules
//!
//! - [`network`] — supported networks and their USDC deployments.
//! - [`types`] — wire-level value types (amounts, signatures, outcomes).
//! - [`chain`] — signing JSON-RPC clients, one per network.
//! - [`executor`] — request validation and the execution error taxonomy.
//! - [`custody`] — typed client for the custody provider's REST API.
//! - [`backend`] — execution backends and the custody-to-local fallback.
//! - [`relay`] — the application service the HTTP handlers call into.
//! - [`proxy`] — pay-per-request client for the upstream x402 resource.
//! - [`handlers`] — Axum HTTP endpoints.
//! - [`config`] — environment-driven configuration.
//! - [`telemetry`] — tracing and OpenTelemetry wiring.
//! - [`sig_down`] — graceful shutdown on SIGTERM/SIGINT.

pub mod backend;
pub mod chain;
pub mod config;
pub mod custody;
pub mod executor;
pub mod handlers;
pub mod network;
pub mod proxy;
pub mod relay;
pub mod sig_down;
pub mod telemetry;
pub mod types;
