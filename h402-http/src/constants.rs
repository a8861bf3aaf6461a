//! HTTP-specific constants for the h402 protocol.

use std::time::Duration;

/// Request header carrying the `base64(JSON)` payment payload (client → server).
pub const X_PAYMENT_HEADER: &str = "X-PAYMENT";

/// Response header carrying the `base64(JSON)` settlement receipt.
pub const X_PAYMENT_RESPONSE_HEADER: &str = "X-PAYMENT-RESPONSE";

/// Deadline applied to each verify and settle call unless configured otherwise.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
