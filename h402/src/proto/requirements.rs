//! Payment requirements advertised by a resource server.

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::amount::{AmountError, TokenAmount};
use crate::namespace::Namespace;

/// The only payment scheme h402 defines: pay at least the exact amount.
pub const EXACT_SCHEME: &str = "exact";

/// How `amountRequired` is expressed on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AmountFormat {
    /// A decimal in whole tokens, scaled by `10^tokenDecimals`.
    HumanReadable,
    /// An integer in the token's smallest unit.
    SmallestUnit,
}

/// What a client must pay to access a resource.
///
/// Instances are always normalized: `amount_required` is an integer in the
/// token's smallest unit regardless of the format it was configured in, and
/// the value serializes back with `amountRequiredFormat: "smallestUnit"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentRequirements {
    /// Chain family.
    pub namespace: Namespace,
    /// Payment scheme, `"exact"`.
    pub scheme: String,
    /// Network within the namespace (`"8453"`, `"mainnet"`, `"bitcoin"`).
    pub network_id: String,
    /// Token contract or mint. `None` (or the zero address on EVM) means the native asset.
    pub token_address: Option<String>,
    /// Required amount in the token's smallest unit.
    pub amount_required: TokenAmount,
    /// Recipient address.
    pub pay_to_address: String,
    /// Token decimals, when known.
    pub token_decimals: Option<u8>,
    /// Token ticker, when known.
    pub token_symbol: Option<String>,
    /// The protected resource URL the payment is bound to.
    pub resource: String,
    /// Human-readable description of the resource.
    pub description: Option<String>,
    /// Expected time to settle, in seconds.
    pub estimated_processing_time: Option<u64>,
}

impl PaymentRequirements {
    /// Creates exact-scheme requirements with the amount already in smallest units.
    #[must_use]
    pub fn new(
        namespace: Namespace,
        network_id: impl Into<String>,
        pay_to_address: impl Into<String>,
        amount_required: TokenAmount,
        resource: impl Into<String>,
    ) -> Self {
        Self {
            namespace,
            scheme: EXACT_SCHEME.to_owned(),
            network_id: network_id.into(),
            token_address: None,
            amount_required,
            pay_to_address: pay_to_address.into(),
            token_decimals: None,
            token_symbol: None,
            resource: resource.into(),
            description: None,
            estimated_processing_time: None,
        }
    }

    /// Sets the token contract or mint.
    #[must_use]
    pub fn with_token(mut self, address: impl Into<String>, decimals: u8) -> Self {
        self.token_address = Some(address.into());
        self.token_decimals = Some(decimals);
        self
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Replaces the amount with a human-readable one scaled by the configured decimals.
    ///
    /// # Errors
    ///
    /// Returns [`RequirementsError`] if no decimals are configured or the
    /// amount cannot be normalized.
    pub fn with_human_readable_amount(mut self, amount: &str) -> Result<Self, RequirementsError> {
        let decimals = self
            .token_decimals
            .ok_or(RequirementsError::MissingDecimals)?;
        self.amount_required = TokenAmount::from_human_readable(amount, decimals)?;
        Ok(self)
    }

    /// Returns the token address unless it denotes the native asset.
    #[must_use]
    pub fn token(&self) -> Option<&str> {
        self.token_address
            .as_deref()
            .filter(|address| !address.is_empty() && !is_zero_address(address))
    }
}

fn is_zero_address(address: &str) -> bool {
    address
        .strip_prefix("0x")
        .is_some_and(|hex| !hex.is_empty() && hex.bytes().all(|b| b == b'0'))
}

/// Errors produced while normalizing payment requirements.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RequirementsError {
    /// A human-readable amount was given without token decimals.
    #[error("humanReadable amount requires tokenDecimals")]
    MissingDecimals,
    /// The amount could not be normalized.
    #[error(transparent)]
    Amount(#[from] AmountError),
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum RawAmount {
    Text(String),
    Number(serde_json::Number),
}

impl RawAmount {
    fn into_text(self) -> String {
        match self {
            Self::Text(text) => text,
            Self::Number(number) => number.to_string(),
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PaymentRequirementsWire {
    namespace: Namespace,
    scheme: String,
    network_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    token_address: Option<String>,
    amount_required: RawAmount,
    #[serde(default = "default_format")]
    amount_required_format: AmountFormat,
    pay_to_address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    token_decimals: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    token_symbol: Option<String>,
    resource: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    estimated_processing_time: Option<u64>,
}

const fn default_format() -> AmountFormat {
    AmountFormat::SmallestUnit
}

impl TryFrom<PaymentRequirementsWire> for PaymentRequirements {
    type Error = RequirementsError;

    fn try_from(wire: PaymentRequirementsWire) -> Result<Self, Self::Error> {
        let raw = wire.amount_required.into_text();
        let amount_required = match wire.amount_required_format {
            AmountFormat::SmallestUnit => raw.parse::<TokenAmount>()?,
            AmountFormat::HumanReadable => {
                let decimals = wire
                    .token_decimals
                    .ok_or(RequirementsError::MissingDecimals)?;
                TokenAmount::from_human_readable(&raw, decimals)?
            }
        };
        Ok(Self {
            namespace: wire.namespace,
            scheme: wire.scheme,
            network_id: wire.network_id,
            token_address: wire.token_address,
            amount_required,
            pay_to_address: wire.pay_to_address,
            token_decimals: wire.token_decimals,
            token_symbol: wire.token_symbol,
            resource: wire.resource,
            description: wire.description,
            estimated_processing_time: wire.estimated_processing_time,
        })
    }
}

impl Serialize for PaymentRequirements {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        PaymentRequirementsWire {
            namespace: self.namespace,
            scheme: self.scheme.clone(),
            network_id: self.network_id.clone(),
            token_address: self.token_address.clone(),
            amount_required: RawAmount::Text(self.amount_required.to_string()),
            amount_required_format: AmountFormat::SmallestUnit,
            pay_to_address: self.pay_to_address.clone(),
            token_decimals: self.token_decimals,
            token_symbol: self.token_symbol.clone(),
            resource: self.resource.clone(),
            description: self.description.clone(),
            estimated_processing_time: self.estimated_processing_time,
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for PaymentRequirements {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let wire = PaymentRequirementsWire::deserialize(deserializer)?;
        Self::try_from(wire).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn normalizes_human_readable_once() {
        let requirements: PaymentRequirements = serde_json::from_value(json!({
            "namespace": "evm",
            "scheme": "exact",
            "networkId": "8453",
            "tokenAddress": "0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913",
            "amountRequired": 0.01,
            "amountRequiredFormat": "humanReadable",
            "payToAddress": "0x209693Bc6afc0C5328bA36FaF03C514EF312287C",
            "tokenDecimals": 6,
            "resource": "https://api.example.com/premium"
        }))
        .unwrap();
        assert_eq!(requirements.amount_required, TokenAmount::from(10_000));

        let json = serde_json::to_value(&requirements).unwrap();
        assert_eq!(json["amountRequired"], "10000");
        assert_eq!(json["amountRequiredFormat"], "smallestUnit");
        let again: PaymentRequirements = serde_json::from_value(json).unwrap();
        assert_eq!(again, requirements);
    }

    #[test]
    fn human_readable_without_decimals_is_rejected() {
        let result = serde_json::from_value::<PaymentRequirements>(json!({
            "namespace": "solana",
            "scheme": "exact",
            "networkId": "mainnet",
            "amountRequired": "1.5",
            "amountRequiredFormat": "humanReadable",
            "payToAddress": "9xQeWvG816bUx9EPjHmaT23yvVM2ZWbrrpZb9PusVFin",
            "resource": "https://api.example.com/premium"
        }));
        assert!(result.is_err());
    }

    #[test]
    fn zero_address_means_native() {
        let requirements = PaymentRequirements::new(
            Namespace::Evm,
            "8453",
            "0x209693Bc6afc0C5328bA36FaF03C514EF312287C",
            TokenAmount::from(1),
            "https://api.example.com/premium",
        )
        .with_token("0x0000000000000000000000000000000000000000", 18);
        assert_eq!(requirements.token(), None);
    }
}
