//! Core trait for payment verification and settlement.
//!
//! A [`Facilitator`] is anything that can answer `verify` and `settle`: the
//! in-process [`HandlerRegistry`](crate::handler::HandlerRegistry), or a
//! remote facilitator reached over HTTP. Resource-server middleware is generic
//! over this trait.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::proto::{SettleRequest, SettleResponse, SupportedResponse, VerifyRequest, VerifyResponse};

/// A boxed, sendable future.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Verifies and settles payments.
///
/// Payment-level failures are reported inside [`VerifyResponse`] and
/// [`SettleResponse`]. `Err` is reserved for failures to reach an answer at
/// all, such as a remote facilitator that cannot be contacted.
pub trait Facilitator: Send + Sync {
    /// Transport-level error.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Verifies a payment without executing it.
    fn verify(&self, request: VerifyRequest) -> BoxFuture<'_, Result<VerifyResponse, Self::Error>>;

    /// Executes a verified payment.
    fn settle(&self, request: SettleRequest) -> BoxFuture<'_, Result<SettleResponse, Self::Error>>;

    /// Lists the payment kinds this facilitator serves.
    fn supported(&self) -> BoxFuture<'_, Result<SupportedResponse, Self::Error>>;
}

impl<T: Facilitator + ?Sized> Facilitator for Arc<T> {
    type Error = T::Error;

    fn verify(&self, request: VerifyRequest) -> BoxFuture<'_, Result<VerifyResponse, Self::Error>> {
        (**self).verify(request)
    }

    fn settle(&self, request: SettleRequest) -> BoxFuture<'_, Result<SettleResponse, Self::Error>> {
        (**self).settle(request)
    }

    fn supported(&self) -> BoxFuture<'_, Result<SupportedResponse, Self::Error>> {
        (**self).supported()
    }
}
