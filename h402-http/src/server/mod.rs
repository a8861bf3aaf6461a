//! Tower middleware for enforcing h402 payments on protected routes.
//!
//! Incoming requests are matched against configured [`RouteConfig`]s.
//! Protected routes require an `X-PAYMENT` header, which is verified with a
//! facilitator before the handler runs and settled after it.
//!
//! Returns a `402 Payment Required` response if the request lacks a valid
//! payment, or if settlement fails before the response head is sent.
//!
//! See [`H402Middleware`] for configuration options. For low-level
//! interaction with a remote facilitator, see [`FacilitatorClient`].
//!
//! [`RouteConfig`]: crate::route::RouteConfig

mod body;
pub mod error;
pub mod facilitator_client;
pub mod layer;
pub mod paygate;
pub mod paywall;

pub use body::{GuardedBody, StreamAborted};
pub use error::{PaygateError, VerificationError};
pub use facilitator_client::{FacilitatorClient, FacilitatorClientError};
pub use layer::{H402Middleware, H402MiddlewareService};
pub use paygate::{Paygate, SettlementMode};
pub use paywall::Paywall;
