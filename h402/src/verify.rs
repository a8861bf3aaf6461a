//! Chain-agnostic verification steps.
//!
//! Every namespace handler starts with the same two checks, neither of which
//! touches a chain: the payload envelope must match the requirements field for
//! field, and the network must be one the handler actually serves.

use crate::namespace::Namespace;
use crate::proto::{EXACT_SCHEME, H402_VERSION, PaymentPayload, PaymentRequirements, PaymentVerificationError};

/// Checks that the envelope of `payload` matches `requirements`.
///
/// `h402Version` must be the supported version. `scheme`, `namespace`,
/// `networkId`, and `resource` must be byte-identical, and the scheme must be
/// `"exact"`. The payload variant must belong to the envelope's namespace.
///
/// # Errors
///
/// Returns the [`PaymentVerificationError`] for the first mismatching field.
pub fn validate_base_payload(
    payload: &PaymentPayload,
    requirements: &PaymentRequirements,
) -> Result<(), PaymentVerificationError> {
    if payload.h402_version != H402_VERSION {
        return Err(PaymentVerificationError::VersionMismatch(
            payload.h402_version,
        ));
    }
    if payload.scheme != requirements.scheme || payload.scheme != EXACT_SCHEME {
        return Err(PaymentVerificationError::SchemeMismatch);
    }
    if payload.namespace != requirements.namespace
        || payload.payload.namespace() != payload.namespace
    {
        return Err(PaymentVerificationError::NamespaceMismatch);
    }
    if payload.network_id != requirements.network_id {
        return Err(PaymentVerificationError::NetworkMismatch);
    }
    if payload.resource != requirements.resource {
        return Err(PaymentVerificationError::ResourceMismatch);
    }
    Ok(())
}

/// Checks that a handler for `(namespace, network_id)` may process `requirements`.
///
/// # Errors
///
/// Returns [`PaymentVerificationError::UnsupportedNetwork`] or
/// [`PaymentVerificationError::NamespaceMismatch`].
pub fn validate_chain_match(
    namespace: Namespace,
    network_id: &str,
    requirements: &PaymentRequirements,
) -> Result<(), PaymentVerificationError> {
    if requirements.namespace != namespace {
        return Err(PaymentVerificationError::NamespaceMismatch);
    }
    if requirements.network_id != network_id {
        return Err(PaymentVerificationError::UnsupportedNetwork(format!(
            "{}:{}",
            requirements.namespace, requirements.network_id
        )));
    }
    Ok(())
}
