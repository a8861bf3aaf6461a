//! Token amounts.
//!
//! [`TokenAmount`] is an unsigned 256-bit integer expressed in a token's
//! smallest unit. On the wire it is always a decimal string, so values that
//! exceed `u64` survive JSON round-trips intact.
//!
//! Human-readable amounts (`"0.01"` USDC) are converted exactly once through
//! [`TokenAmount::from_human_readable`], which scales a [`Decimal`] by
//! `10^decimals`. Floating point never enters the conversion.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use alloy_primitives::U256;
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// An amount in a token's smallest unit (wei, lamports, satoshis, ...).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TokenAmount(pub U256);

/// Errors produced when parsing or normalizing an amount.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AmountError {
    /// The input is not a number.
    #[error("Invalid number format: {0}")]
    InvalidFormat(String),
    /// Negative amounts are never valid.
    #[error("Negative value is not allowed")]
    Negative,
    /// The input has more fractional digits than the token supports.
    #[error("Too big of a precision: {money} vs {token} on token")]
    WrongPrecision {
        /// Decimal places in the input.
        money: u32,
        /// Decimal places supported by the token.
        token: u8,
    },
    /// The scaled amount does not fit in 256 bits.
    #[error("Amount overflows 256 bits")]
    Overflow,
}

impl TokenAmount {
    /// The zero amount.
    pub const ZERO: Self = Self(U256::ZERO);

    /// Normalizes a human-readable decimal string into the smallest unit.
    ///
    /// `"1.5"` with 6 decimals becomes `1_500_000`. Trailing zeros in the
    /// fraction are ignored, so `"1.500"` is accepted for a 1-decimal token.
    ///
    /// # Errors
    ///
    /// Returns [`AmountError`] if the input is not a non-negative decimal,
    /// carries more fractional digits than `decimals`, or overflows.
    pub fn from_human_readable(input: &str, decimals: u8) -> Result<Self, AmountError> {
        let parsed = Decimal::from_str(input.trim())
            .or_else(|_| Decimal::from_scientific(input.trim()))
            .map_err(|_| AmountError::InvalidFormat(input.to_owned()))?;
        if parsed.is_sign_negative() && !parsed.is_zero() {
            return Err(AmountError::Negative);
        }
        let parsed = parsed.normalize();
        let scale = parsed.scale();
        if scale > u32::from(decimals) {
            return Err(AmountError::WrongPrecision {
                money: scale,
                token: decimals,
            });
        }
        let mantissa = U256::from(parsed.mantissa().unsigned_abs());
        let exponent = U256::from(u32::from(decimals) - scale);
        let factor = U256::from(10u8)
            .checked_pow(exponent)
            .ok_or(AmountError::Overflow)?;
        mantissa
            .checked_mul(factor)
            .map(Self)
            .ok_or(AmountError::Overflow)
    }

    /// Returns the inner integer.
    #[must_use]
    pub const fn as_u256(&self) -> U256 {
        self.0
    }

    /// Returns `true` for the zero amount.
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }
}

impl From<U256> for TokenAmount {
    fn from(value: U256) -> Self {
        Self(value)
    }
}

impl From<u64> for TokenAmount {
    fn from(value: u64) -> Self {
        Self(U256::from(value))
    }
}

impl From<TokenAmount> for U256 {
    fn from(value: TokenAmount) -> Self {
        value.0
    }
}

impl FromStr for TokenAmount {
    type Err = AmountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.starts_with('-') {
            return Err(AmountError::Negative);
        }
        if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(AmountError::InvalidFormat(s.to_owned()));
        }
        U256::from_str_radix(s, 10)
            .map(Self)
            .map_err(|_| AmountError::Overflow)
    }
}

impl Display for TokenAmount {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for TokenAmount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for TokenAmount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct AmountVisitor;

        impl serde::de::Visitor<'_> for AmountVisitor {
            type Value = TokenAmount;

            fn expecting(&self, f: &mut Formatter<'_>) -> fmt::Result {
                f.write_str("a non-negative integer or a decimal integer string")
            }

            fn visit_str<E: serde::de::Error>(self, v: &str) -> Result<Self::Value, E> {
                TokenAmount::from_str(v).map_err(E::custom)
            }

            fn visit_u64<E: serde::de::Error>(self, v: u64) -> Result<Self::Value, E> {
                Ok(TokenAmount::from(v))
            }

            fn visit_i64<E: serde::de::Error>(self, v: i64) -> Result<Self::Value, E> {
                u64::try_from(v)
                    .map(TokenAmount::from)
                    .map_err(|_| E::custom(AmountError::Negative))
            }
        }

        deserializer.deserialize_any(AmountVisitor)
    }
}
