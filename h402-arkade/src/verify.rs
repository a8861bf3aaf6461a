//! Arkade payment checks.

use alloy_primitives::U256;
use h402::proto::{ErrorReason, PaymentRequirements, PaymentVerificationError};

use crate::address::ArkAddress;
use crate::psbt::{Psbt, TxOut};

/// Decodes a PSBT, mapping failures to `invalid_arkade_psbt`.
///
/// # Errors
///
/// Returns `invalid_arkade_psbt` if the bytes are not a well-formed PSBT.
pub fn decode_psbt(bytes: &[u8]) -> Result<Psbt, PaymentVerificationError> {
    Psbt::decode(bytes).map_err(|e| {
        PaymentVerificationError::rejected(ErrorReason::InvalidArkadePsbt, e.to_string())
    })
}

/// Requires a taproot key or script signature on every input.
///
/// # Errors
///
/// Returns `invalid_arkade_psbt_unsigned` naming the first unsigned input.
pub fn assert_signed(psbt: &Psbt) -> Result<(), PaymentVerificationError> {
    match psbt.unsigned_inputs().first() {
        Some(index) => Err(PaymentVerificationError::rejected(
            ErrorReason::InvalidArkadePsbtUnsigned,
            format!("input {index} has no taproot signature"),
        )),
        None => Ok(()),
    }
}

/// Parses the requirements' `payToAddress` and checks it belongs to `network_id`.
///
/// `"bitcoin"` expects an `ark` address and every other network a `tark` one.
///
/// # Errors
///
/// Returns `invalid_arkade_address` if the address does not parse or is for
/// the wrong network.
pub fn recipient(
    requirements: &PaymentRequirements,
    network_id: &str,
) -> Result<ArkAddress, PaymentVerificationError> {
    let address: ArkAddress = requirements.pay_to_address.parse().map_err(|e| {
        PaymentVerificationError::rejected(
            ErrorReason::InvalidArkadeAddress,
            format!("payToAddress: {e}"),
        )
    })?;
    if address.is_mainnet() != (network_id == "bitcoin") {
        return Err(PaymentVerificationError::rejected(
            ErrorReason::InvalidArkadeAddress,
            format!("payToAddress is not an address for {network_id}"),
        ));
    }
    Ok(address)
}

/// Sats paid to `address`, or `None` if no output pays it.
#[must_use]
pub fn paid_to(outputs: &[TxOut], address: &ArkAddress) -> Option<U256> {
    let script = address.script_pubkey();
    outputs
        .iter()
        .filter(|output| output.script_pubkey == script)
        .map(|output| U256::from(output.value))
        .reduce(|total, value| total + value)
}

/// Checks that `outputs` pay the requirements.
///
/// # Errors
///
/// Returns `invalid_payment_requirements` for a token requirement,
/// `invalid_arkade_address` for a bad recipient,
/// `invalid_arkade_recipient_mismatch` if no output pays the recipient, and
/// `invalid_arkade_transaction_value` if the outputs sum below the amount.
pub fn assert_payment(
    outputs: &[TxOut],
    requirements: &PaymentRequirements,
    network_id: &str,
) -> Result<(), PaymentVerificationError> {
    if let Some(token) = requirements.token() {
        return Err(PaymentVerificationError::InvalidRequirements(format!(
            "arkade pays in bitcoin only, got token {token}"
        )));
    }
    let address = recipient(requirements, network_id)?;
    let paid = paid_to(outputs, &address).ok_or_else(|| {
        PaymentVerificationError::rejected(
            ErrorReason::InvalidArkadeRecipientMismatch,
            format!("no output pays {}", requirements.pay_to_address),
        )
    })?;
    let required = requirements.amount_required.0;
    if paid < required {
        return Err(PaymentVerificationError::rejected(
            ErrorReason::InvalidArkadeTransactionValue,
            format!("outputs pay {paid} sats, required {required}"),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use h402::amount::TokenAmount;
    use h402::namespace::Namespace;
    use h402::proto::AsPaymentProblem;

    use super::*;
    use crate::psbt::fixture;

    fn address() -> ArkAddress {
        ArkAddress::new(false, [2u8; 32], [3u8; 32])
    }

    fn requirements(amount: u64) -> PaymentRequirements {
        PaymentRequirements::new(
            Namespace::Arkade,
            "mutinynet",
            address().to_string(),
            TokenAmount::from(amount),
            "https://api.example.com/premium",
        )
    }

    fn reason(result: Result<(), PaymentVerificationError>) -> ErrorReason {
        result.unwrap_err().as_payment_problem().reason()
    }

    fn outputs(values: &[u64]) -> Vec<TxOut> {
        values
            .iter()
            .map(|value| TxOut {
                value: *value,
                script_pubkey: address().script_pubkey(),
            })
            .chain(std::iter::once(TxOut {
                value: 50_000,
                script_pubkey: ArkAddress::new(false, [2u8; 32], [4u8; 32]).script_pubkey(),
            }))
            .collect()
    }

    #[test]
    fn outputs_to_recipient_are_summed() {
        assert_eq!(paid_to(&outputs(&[600, 400]), &address()), Some(U256::from(1_000)));
        assert!(assert_payment(&outputs(&[600, 400]), &requirements(1_000), "mutinynet").is_ok());
    }

    #[test]
    fn underpayment_is_insufficient() {
        let reason = reason(assert_payment(
            &outputs(&[999]),
            &requirements(1_000),
            "mutinynet",
        ));
        assert_eq!(reason, ErrorReason::InvalidArkadeTransactionValue);
        assert!(reason.is_insufficient_amount());
    }

    #[test]
    fn missing_recipient_is_a_mismatch() {
        assert_eq!(
            reason(assert_payment(&outputs(&[]), &requirements(1), "mutinynet")),
            ErrorReason::InvalidArkadeRecipientMismatch
        );
    }

    #[test]
    fn testnet_address_on_mainnet_is_rejected() {
        assert_eq!(
            reason(assert_payment(&outputs(&[10]), &requirements(1), "bitcoin")),
            ErrorReason::InvalidArkadeAddress
        );
    }

    #[test]
    fn token_requirements_are_rejected() {
        let requirements = requirements(1).with_token("usdt", 6);
        assert_eq!(
            reason(assert_payment(&outputs(&[10]), &requirements, "mutinynet")),
            ErrorReason::InvalidPaymentRequirements
        );
    }

    #[test]
    fn unsigned_input_is_reported() {
        let psbt = decode_psbt(&fixture::psbt(&[(1, vec![0x51])], &[true, true, false])).unwrap();
        let err = assert_signed(&psbt).unwrap_err();
        assert_eq!(
            err.as_payment_problem().reason(),
            ErrorReason::InvalidArkadePsbtUnsigned
        );
        assert!(err.to_string().contains("input 2"));
    }

    #[test]
    fn garbage_is_an_invalid_psbt() {
        let err = decode_psbt(b"not a psbt").unwrap_err();
        assert_eq!(err.as_payment_problem().reason(), ErrorReason::InvalidArkadePsbt);
    }
}
