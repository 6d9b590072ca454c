//! Tower middleware that admits or rejects requests per client.

use std::net::SocketAddr;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::extract::ConnectInfo;
use axum::http::Request;
use axum::response::{IntoResponse, Response};
use futures::future::{self, BoxFuture};
use tower::{Layer, Service};
use tracing::warn;

use super::response::RateLimited;
use crate::error::AdmissionError;
use crate::ratelimit::{ClientIdentity, RateLimiter};

/// Header consulted when forwarded addresses are trusted.
pub const FORWARDED_FOR: &str = "x-forwarded-for";

/// Layer that wraps a service with per-client admission control.
///
/// Requests must carry `ConnectInfo<SocketAddr>` in their extensions, which
/// axum provides when served with `into_make_service_with_connect_info`.
#[derive(Debug, Clone)]
pub struct AdmissionLayer {
    limiter: Arc<RateLimiter>,
    trust_forwarded_for: bool,
}

impl AdmissionLayer {
    /// Create a layer backed by `limiter`.
    pub fn new(limiter: Arc<RateLimiter>) -> Self {
        Self {
            limiter,
            trust_forwarded_for: false,
        }
    }

    /// Identify clients by the first `X-Forwarded-For` address when present.
    ///
    /// Only enable this behind a proxy that sets the header itself.
    pub fn trust_forwarded_for(mut self, trust: bool) -> Self {
        self.trust_forwarded_for = trust;
        self
    }
}

impl<S> Layer<S> for AdmissionLayer {
    type Service = AdmissionService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AdmissionService {
            inner,
            limiter: Arc::clone(&self.limiter),
            trust_forwarded_for: self.trust_forwarded_for,
        }
    }
}

/// Service produced by [`AdmissionLayer`].
#[derive(Debug, Clone)]
pub struct AdmissionService<S> {
    inner: S,
    limiter: Arc<RateLimiter>,
    trust_forwarded_for: bool,
}

impl<S, B> Service<Request<B>> for AdmissionService<S>
where
    S: Service<Request<B>, Response = Response> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: Send + 'static,
    B: Send + 'static,
{
    type Response = Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request<B>) -> Self::Future {
        let identity = match client_identity(&request, self.trust_forwarded_for) {
            Ok(identity) => identity,
            Err(e) => {
                warn!(
                    limiter = %self.limiter.name(),
                    error = %e,
                    "Request has no client identity"
                );
                return Box::pin(future::ready(Ok(e.into_response())));
            }
        };

        let decision = self.limiter.check(&identity);
        if !decision.allowed {
            let rejection = RateLimited::new(self.limiter.limit(), &decision);
            return Box::pin(future::ready(Ok(rejection.into_response())));
        }

        // Call the instance that was driven to readiness.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        Box::pin(inner.call(request))
    }
}

/// Derive the client identity for a request.
///
/// With `trust_forwarded_for`, the first parsable `X-Forwarded-For` entry
/// wins; otherwise, or if the header is missing or malformed, the peer
/// address from `ConnectInfo` is used.
pub fn client_identity<B>(
    request: &Request<B>,
    trust_forwarded_for: bool,
) -> Result<ClientIdentity, AdmissionError> {
    if trust_forwarded_for {
        let forwarded = request
            .headers()
            .get(FORWARDED_FOR)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.split(',').next())
            .and_then(|first| ClientIdentity::from_ip_str(first).ok());
        if let Some(identity) = forwarded {
            return Ok(identity);
        }
    }

    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| ClientIdentity::from_socket_addr(*addr))
        .ok_or_else(|| {
            AdmissionError::IdentityUnavailable("request has no peer address".to_string())
        })
}
