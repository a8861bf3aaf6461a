//! Tower middleware for enforcing h402 payments on protected routes.
//!
//! One [`H402Middleware`] covers a whole router: every request is matched
//! against the configured routes, unmatched requests pass through untouched,
//! and matched ones must carry a valid `X-PAYMENT` header.
//!
//! ## Settlement Timing
//!
//! Verification always happens before the handler runs and settlement after
//! it. The response head is held until settlement resolves: the receipt goes
//! out as the `X-PAYMENT-RESPONSE` header, and a failed settlement becomes a
//! 402 instead of the handler's response.
//!
//! With **[`H402Middleware::settle_async`]** settlement runs on a spawned task,
//! so a broadcast is never cut short by a client hanging up. The upstream body
//! is not read until the task resolves, which suits proxied streams.
//!
//! ```ignore
//! let middleware = H402Middleware::new("https://facilitator.example")?
//!     .with_route(RouteConfig::new("GET /premium/*", accepts)?)
//!     .with_timeout(Duration::from_secs(10));
//! let app = Router::new().route("/premium/data", get(handler)).layer(middleware);
//! ```

use std::convert::Infallible;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use axum_core::extract::Request;
use axum_core::response::Response;
use h402::facilitator::Facilitator;
use tower::util::BoxCloneSyncService;
use tower::{Layer, Service};
use url::Url;

use super::facilitator_client::{FacilitatorClient, FacilitatorClientError};
use super::paygate::{Paygate, SettlementMode};
use super::paywall::Paywall;
use crate::constants::DEFAULT_TIMEOUT;
use crate::route::{RouteConfig, RouteMatcher};

/// The h402 middleware: a facilitator plus the routes it protects.
pub struct H402Middleware<F> {
    facilitator: F,
    routes: RouteMatcher,
    settlement: SettlementMode,
    timeout: Duration,
    paywall: Option<Arc<dyn Paywall>>,
}

impl<F: Clone> Clone for H402Middleware<F> {
    fn clone(&self) -> Self {
        Self {
            facilitator: self.facilitator.clone(),
            routes: self.routes.clone(),
            settlement: self.settlement,
            timeout: self.timeout,
            paywall: self.paywall.clone(),
        }
    }
}

impl<F: std::fmt::Debug> std::fmt::Debug for H402Middleware<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("H402Middleware")
            .field("facilitator", &self.facilitator)
            .field("routes", &self.routes)
            .field("settlement", &self.settlement)
            .field("timeout", &self.timeout)
            .field("paywall", &self.paywall.is_some())
            .finish()
    }
}

impl H402Middleware<Arc<FacilitatorClient>> {
    /// Creates a middleware backed by the remote facilitator at `url`.
    ///
    /// # Errors
    ///
    /// Returns [`FacilitatorClientError::UrlParse`] if the URL is invalid.
    pub fn new(url: &str) -> Result<Self, FacilitatorClientError> {
        let facilitator = FacilitatorClient::try_from(url)?;
        Ok(Self::with_facilitator(Arc::new(facilitator)))
    }

    /// Returns the configured facilitator URL.
    #[must_use]
    pub fn facilitator_url(&self) -> &Url {
        self.facilitator.base_url()
    }
}

impl TryFrom<&str> for H402Middleware<Arc<FacilitatorClient>> {
    type Error = FacilitatorClientError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl<F> H402Middleware<F> {
    /// Creates a middleware around any facilitator, local or remote.
    pub fn with_facilitator(facilitator: F) -> Self {
        Self {
            facilitator,
            routes: RouteMatcher::default(),
            settlement: SettlementMode::Sync,
            timeout: DEFAULT_TIMEOUT,
            paywall: None,
        }
    }

    /// Returns a reference to the underlying facilitator.
    pub const fn facilitator(&self) -> &F {
        &self.facilitator
    }

    /// Protects a route. Routes are tried in the order they were added.
    #[must_use]
    pub fn with_route(mut self, route: RouteConfig) -> Self {
        self.routes.push(route);
        self
    }

    /// Settles on a spawned task, holding the upstream body until it resolves.
    #[must_use]
    pub const fn settle_async(mut self) -> Self {
        self.settlement = SettlementMode::Async;
        self
    }

    /// Settles inline in the request future (default).
    #[must_use]
    pub const fn settle_sync(mut self) -> Self {
        self.settlement = SettlementMode::Sync;
        self
    }

    /// Sets the deadline for each verify and settle call (default 30s).
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Serves `paywall`'s HTML to browsers that arrive without a payment.
    #[must_use]
    pub fn with_paywall(mut self, paywall: impl Paywall + 'static) -> Self {
        self.paywall = Some(Arc::new(paywall));
        self
    }
}

impl<S, F> Layer<S> for H402Middleware<F>
where
    S: Service<Request, Response = Response, Error = Infallible> + Clone + Send + Sync + 'static,
    S::Future: Send + 'static,
    F: Facilitator + Clone + 'static,
{
    type Service = H402MiddlewareService<F>;

    fn layer(&self, inner: S) -> Self::Service {
        H402MiddlewareService {
            gate: Arc::new(Paygate {
                facilitator: self.facilitator.clone(),
                routes: self.routes.clone(),
                settlement: self.settlement,
                timeout: self.timeout,
                paywall: self.paywall.clone(),
            }),
            inner: BoxCloneSyncService::new(inner),
        }
    }
}

/// Service that enforces h402 payments on incoming requests.
#[allow(missing_debug_implementations)] // BoxCloneSyncService does not implement Debug
pub struct H402MiddlewareService<F> {
    gate: Arc<Paygate<F>>,
    /// The wrapped service
    inner: BoxCloneSyncService<Request, Response, Infallible>,
}

impl<F> Clone for H402MiddlewareService<F> {
    fn clone(&self) -> Self {
        Self {
            gate: Arc::clone(&self.gate),
            inner: self.inner.clone(),
        }
    }
}

impl<F> Service<Request> for H402MiddlewareService<F>
where
    F: Facilitator + 'static,
{
    type Response = Response;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Response, Infallible>> + Send>>;

    /// Delegates readiness polling to the wrapped inner service.
    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request) -> Self::Future {
        let gate = Arc::clone(&self.gate);
        // The readied instance serves this call; its clone waits for the next poll_ready.
        let fresh = self.inner.clone();
        let inner = std::mem::replace(&mut self.inner, fresh);
        Box::pin(async move { gate.handle_request(inner, req).await })
    }
}
