//! Wire-level and on-chain value types shared across the service.
//!
//! Token amounts travel as decimal strings to avoid JSON number precision
//! loss; signature components accept hex with or without the `0x` prefix,
//! matching what wallet libraries emit.

use alloy_primitives::{B256, U256};
use rust_decimal::Decimal;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::fmt::{Debug, Display};
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::network::Network;

/// A raw USDC amount in base units (6 decimals), serialized as a decimal string.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct TokenAmount(pub U256);

impl TokenAmount {
    /// Render the base-unit amount as a human USDC figure, e.g. `20000` -> `0.02`.
    pub fn to_usdc(&self, decimals: u8) -> Decimal {
        let raw = i128::try_from(self.0).unwrap_or(i128::MAX);
        Decimal::from_i128_with_scale(raw, decimals as u32).normalize()
    }
}

impl From<u64> for TokenAmount {
    fn from(value: u64) -> Self {
        TokenAmount(U256::from(value))
    }
}

impl From<U256> for TokenAmount {
    fn from(value: U256) -> Self {
        TokenAmount(value)
    }
}

impl Display for TokenAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for TokenAmount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for TokenAmount {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let value = U256::from_str_radix(&s, 10)
            .map_err(|_| D::Error::custom(format!("Invalid token amount: {s}")))?;
        Ok(TokenAmount(value))
    }
}

/// Seconds since the Unix epoch. Permit deadlines arrive in this form.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UnixTimestamp(pub u64);

impl UnixTimestamp {
    /// The current wall-clock time.
    pub fn now() -> Self {
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        UnixTimestamp(duration.as_secs())
    }
}

impl Display for UnixTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<UnixTimestamp> for U256 {
    fn from(value: UnixTimestamp) -> Self {
        U256::from(value.0)
    }
}

/// One half of a secp256k1 signature (`r` or `s`), as a 32-byte word.
///
/// Accepts hex strings with or without a `0x` prefix on the wire and always
/// serializes with the prefix.
#[derive(Copy, Clone, PartialEq, Eq)]
pub struct SignatureComponent(pub [u8; 32]);

impl Debug for SignatureComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SignatureComponent(0x{})", hex::encode(self.0))
    }
}

impl From<SignatureComponent> for B256 {
    fn from(value: SignatureComponent) -> Self {
        B256::from(value.0)
    }
}

impl From<SignatureComponent> for U256 {
    fn from(value: SignatureComponent) -> Self {
        U256::from_be_bytes(value.0)
    }
}

impl FromStr for SignatureComponent {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let stripped = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(stripped)
            .map_err(|_| "Invalid signature component: not valid hex".to_string())?;
        let array: [u8; 32] = bytes
            .try_into()
            .map_err(|_| "Signature component must be exactly 32 bytes".to_string())?;
        Ok(SignatureComponent(array))
    }
}

impl Display for SignatureComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl Serialize for SignatureComponent {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for SignatureComponent {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(D::Error::custom)
    }
}

/// A transaction hash, serialized as 0x-prefixed hex.
#[derive(Copy, Clone, PartialEq, Eq)]
pub struct TransactionHash(pub [u8; 32]);

impl From<B256> for TransactionHash {
    fn from(value: B256) -> Self {
        TransactionHash(value.0)
    }
}

impl Debug for TransactionHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TransactionHash(0x{})", hex::encode(self.0))
    }
}

impl Display for TransactionHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl Serialize for TransactionHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for TransactionHash {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let stripped = s.strip_prefix("0x").unwrap_or(&s);
        let bytes = hex::decode(stripped)
            .map_err(|_| D::Error::custom("Invalid transaction hash: not valid hex"))?;
        let array: [u8; 32] = bytes
            .try_into()
            .map_err(|_| D::Error::custom("Transaction hash must be exactly 32 bytes"))?;
        Ok(TransactionHash(array))
    }
}

/// How a movement of funds was ultimately carried out.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMethod {
    /// The custody backend moved funds with its native transfer primitive.
    CustodyNative,
    /// The custody backend submitted permit followed by transferFrom.
    CustodyPermitTransfer,
    /// A locally held key signed and submitted the transaction(s).
    LocalSigned,
    /// Accepted on the wire for compatibility; never emitted. Local results
    /// after a custody failure report `local_signed` with
    /// `details.fallback_from_custody` set.
    Fallback,
}

impl Display for ExecutionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExecutionMethod::CustodyNative => "custody_native",
            ExecutionMethod::CustodyPermitTransfer => "custody_permit_transfer",
            ExecutionMethod::LocalSigned => "local_signed",
            ExecutionMethod::Fallback => "fallback",
        };
        write!(f, "{}", s)
    }
}

/// Parameters of a signed EIP-2612 permit as they arrive on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermitParams {
    /// Token holder who signed the permit.
    pub owner: String,
    /// Address being approved to spend.
    pub spender: String,
    /// Approved amount in USDC base units.
    pub value: TokenAmount,
    /// Permit expiry as a Unix timestamp.
    pub deadline: UnixTimestamp,
    /// Signature recovery id, 27 or 28.
    pub v: u8,
    pub r: SignatureComponent,
    pub s: SignatureComponent,
    pub network: Network,
}

/// Parameters of an allowance-backed `transferFrom` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferParams {
    /// Address holding the funds; the spender must have allowance from it.
    pub from: String,
    /// Recipient of the funds.
    pub to: String,
    /// Amount to move in USDC base units.
    pub value: TokenAmount,
    pub network: Network,
}

/// The successful result of a permit or transfer execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub method: ExecutionMethod,
    pub tx_hash: TransactionHash,
    pub network: Network,
    /// Free-form execution metadata: gas used, block number, recipient balance
    /// after settlement, fallback provenance.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_amount_serializes_as_decimal_string() {
        let amount = TokenAmount::from(20000u64);
        assert_eq!(serde_json::to_string(&amount).unwrap(), "\"20000\"");
        let parsed: TokenAmount = serde_json::from_str("\"20000\"").unwrap();
        assert_eq!(parsed, amount);
    }

    #[test]
    fn token_amount_rejects_non_decimal() {
        assert!(serde_json::from_str::<TokenAmount>("\"0x20000\"").is_err());
        assert!(serde_json::from_str::<TokenAmount>("\"12.5\"").is_err());
    }

    #[test]
    fn token_amount_to_usdc_scales_six_decimals() {
        let amount = TokenAmount::from(20000u64);
        assert_eq!(amount.to_usdc(6).to_string(), "0.02");
        let amount = TokenAmount::from(1_000_000u64);
        assert_eq!(amount.to_usdc(6).to_string(), "1");
    }

    #[test]
    fn signature_component_accepts_optional_prefix() {
        let with_prefix: SignatureComponent = format!("0x{}", "ab".repeat(32)).parse().unwrap();
        let without_prefix: SignatureComponent = "ab".repeat(32).parse().unwrap();
        assert_eq!(with_prefix, without_prefix);
        assert_eq!(with_prefix.to_string(), format!("0x{}", "ab".repeat(32)));
    }

    #[test]
    fn signature_component_rejects_wrong_length() {
        assert!("0xdeadbeef".parse::<SignatureComponent>().is_err());
    }

    #[test]
    fn permit_params_wire_shape() {
        let json = serde_json::json!({
            "owner": "0x1111111111111111111111111111111111111111",
            "spender": "0x2222222222222222222222222222222222222222",
            "value": "20000",
            "deadline": 1893456000u64,
            "v": 27,
            "r": format!("0x{}", "11".repeat(32)),
            "s": format!("0x{}", "22".repeat(32)),
            "network": "ethSepolia",
        });
        let params: PermitParams = serde_json::from_value(json).unwrap();
        assert_eq!(params.network, Network::EthereumSepolia);
        assert_eq!(params.value, TokenAmount::from(20000u64));
        assert_eq!(params.deadline, UnixTimestamp(1893456000));
        assert_eq!(params.v, 27);
    }

    #[test]
    fn execution_method_wire_identifiers() {
        assert_eq!(
            serde_json::to_string(&ExecutionMethod::CustodyPermitTransfer).unwrap(),
            "\"custody_permit_transfer\""
        );
        let method: ExecutionMethod = serde_json::from_str("\"local_signed\"").unwrap();
        assert_eq!(method, ExecutionMethod::LocalSigned);
    }
}
