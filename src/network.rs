//! Network definitions and known USDC deployments.
//!
//! This module defines the supported networks, their chain IDs and default RPC
//! endpoints, and provides statically known USDC deployments per network.

use alloy_primitives::{Address, address};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::str::FromStr;

/// Supported EVM networks.
///
/// Network identifiers on the wire (`"mainnet"`, `"baseSepolia"`, `"ethSepolia"`)
/// match what relying-party frontends send in permit and transfer requests.
#[derive(Debug, Hash, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Network {
    /// Base mainnet (chain ID 8453).
    #[serde(rename = "mainnet")]
    Base,
    /// Base Sepolia testnet (chain ID 84532).
    #[serde(rename = "baseSepolia")]
    BaseSepolia,
    /// Ethereum Sepolia testnet (chain ID 11155111).
    #[serde(rename = "ethSepolia")]
    EthereumSepolia,
}

/// Error for a network identifier missing from the registry.
#[derive(Debug, Clone, thiserror::Error)]
#[error("Unknown network: {0}")]
pub struct UnknownNetwork(pub String);

impl Display for Network {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Network::Base => write!(f, "mainnet"),
            Network::BaseSepolia => write!(f, "baseSepolia"),
            Network::EthereumSepolia => write!(f, "ethSepolia"),
        }
    }
}

impl FromStr for Network {
    type Err = UnknownNetwork;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mainnet" => Ok(Network::Base),
            "baseSepolia" => Ok(Network::BaseSepolia),
            "ethSepolia" => Ok(Network::EthereumSepolia),
            other => Err(UnknownNetwork(other.to_string())),
        }
    }
}

impl Network {
    /// Return all known [`Network`] variants.
    pub fn variants() -> &'static [Network] {
        &[
            Network::Base,
            Network::BaseSepolia,
            Network::EthereumSepolia,
        ]
    }

    /// Canonical chain ID, cross-checked against the live RPC endpoint at startup.
    pub fn chain_id(&self) -> u64 {
        match self {
            Network::Base => 8453,
            Network::BaseSepolia => 84532,
            Network::EthereumSepolia => 11155111,
        }
    }

    /// Default RPC endpoint, overridable per network via `RPC_URL_*` env vars.
    pub fn default_rpc_url(&self) -> &'static str {
        match self {
            Network::Base => "https://mainnet.base.org",
            Network::BaseSepolia => "https://sepolia.base.org",
            Network::EthereumSepolia => "https://ethereum-sepolia-rpc.publicnode.com",
        }
    }

    /// The USDC deployment on this network.
    pub fn usdc(&self) -> &'static UsdcDeployment {
        UsdcDeployment::by_network(*self)
    }
}

/// Metadata identifying a token in EIP-712 typed data signatures.
///
/// The `name` and `version` must match what the token contract returns from
/// `name()` and `version()`; permit signatures are bound to them through the
/// domain separator.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TokenEip712 {
    pub name: String,
    pub version: String,
}

/// A deployed USDC instance with the metadata the executors need.
///
/// `supports_permit` records whether the deployment exposes the EIP-2612
/// surface at all; the Base Sepolia test token does not, and submitting a
/// permit there is a predictable `UnsupportedOperation`, not a revert.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct UsdcDeployment {
    pub network: Network,
    pub address: Address,
    pub decimals: u8,
    pub eip712: TokenEip712,
    pub supports_permit: bool,
}

static USDC_BASE: Lazy<UsdcDeployment> = Lazy::new(|| UsdcDeployment {
    network: Network::Base,
    address: address!("0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913"),
    decimals: 6,
    eip712: TokenEip712 {
        name: "USD Coin".into(),
        version: "2".into(),
    },
    supports_permit: true,
});

static USDC_BASE_SEPOLIA: Lazy<UsdcDeployment> = Lazy::new(|| UsdcDeployment {
    network: Network::BaseSepolia,
    address: address!("0x036CbD53842c5426634e7929541eC2318f3dCF7e"),
    decimals: 6,
    eip712: TokenEip712 {
        name: "USDC".into(),
        version: "2".into(),
    },
    supports_permit: false,
});

static USDC_ETH_SEPOLIA: Lazy<UsdcDeployment> = Lazy::new(|| UsdcDeployment {
    network: Network::EthereumSepolia,
    address: address!("0x1c7D4B196Cb0C7B01d743Fbc6116a902379C7238"),
    decimals: 6,
    eip712: TokenEip712 {
        name: "USDC".into(),
        version: "2".into(),
    },
    supports_permit: true,
});

impl UsdcDeployment {
    /// USDC deployment for the given network.
    pub fn by_network(network: Network) -> &'static UsdcDeployment {
        match network {
            Network::Base => &USDC_BASE,
            Network::BaseSepolia => &USDC_BASE_SEPOLIA,
            Network::EthereumSepolia => &USDC_ETH_SEPOLIA,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn network_id_round_trip() {
        for network in Network::variants() {
            let id = network.to_string();
            assert_eq!(id.parse::<Network>().unwrap(), *network);
        }
    }

    #[test]
    fn unknown_network_is_rejected() {
        let err = "polygon".parse::<Network>().unwrap_err();
        assert_eq!(err.0, "polygon");
    }

    #[test]
    fn chain_ids_match_registry() {
        assert_eq!(Network::Base.chain_id(), 8453);
        assert_eq!(Network::BaseSepolia.chain_id(), 84532);
        assert_eq!(Network::EthereumSepolia.chain_id(), 11155111);
    }

    #[test]
    fn base_sepolia_usdc_has_no_permit() {
        assert!(!Network::BaseSepolia.usdc().supports_permit);
        assert!(Network::Base.usdc().supports_permit);
        assert!(Network::EthereumSepolia.usdc().supports_permit);
    }

    #[test]
    fn serde_uses_wire_identifiers() {
        let json = serde_json::to_string(&Network::EthereumSepolia).unwrap();
        assert_eq!(json, "\"ethSepolia\"");
        let network: Network = serde_json::from_str("\"mainnet\"").unwrap();
        assert_eq!(network, Network::Base);
    }
}
