//! HTTP server exposing the preset-limited routes.

use std::future::Future;
use std::net::SocketAddr;

use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tokio::net::TcpListener;
use tracing::{error, info};

use super::layer::AdmissionLayer;
use crate::error::{Result, WardenError};
use crate::ratelimit::{Preset, PresetLimiters};

#[derive(Debug, Serialize)]
struct PingResponse {
    status: &'static str,
    preset: Preset,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

/// Build the router: `/health` plus one `/{preset}/ping` route per preset,
/// each behind its own limiter.
pub fn router(limiters: &PresetLimiters, trust_forwarded_for: bool) -> Router {
    let mut app = Router::new().route(
        "/health",
        get(|| async {
            Json(HealthResponse {
                status: "ok",
                version: env!("CARGO_PKG_VERSION"),
            })
        }),
    );

    for preset in Preset::ALL {
        let layer = AdmissionLayer::new(limiters.get(preset).clone())
            .trust_forwarded_for(trust_forwarded_for);
        let limited = Router::new()
            .route(
                "/ping",
                get(move || async move {
                    Json(PingResponse {
                        status: "ok",
                        preset,
                    })
                }),
            )
            .layer(layer);
        app = app.nest(&format!("/{}", preset), limited);
    }

    app
}

/// HTTP server for the rate-limited routes.
pub struct HttpServer {
    /// Address to bind to
    addr: SocketAddr,
    /// The preset limiters
    limiters: PresetLimiters,
    /// Whether to identify clients by `X-Forwarded-For`
    trust_forwarded_for: bool,
}

impl HttpServer {
    /// Create a new HTTP server.
    pub fn new(addr: SocketAddr, limiters: PresetLimiters, trust_forwarded_for: bool) -> Self {
        Self {
            addr,
            limiters,
            trust_forwarded_for,
        }
    }

    /// Bind the configured address and serve until `signal` resolves.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.addr).await.map_err(|e| {
            error!(addr = %self.addr, error = %e, "Failed to bind HTTP listener");
            WardenError::Io(e)
        })?;
        self.serve_on(listener, signal).await
    }

    /// Serve on an already-bound listener until `signal` resolves.
    pub async fn serve_on<F>(self, listener: TcpListener, signal: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let app = router(&self.limiters, self.trust_forwarded_for);
        let local_addr = listener.local_addr()?;

        info!(
            addr = %local_addr,
            trust_forwarded_for = self.trust_forwarded_for,
            "Starting HTTP server with graceful shutdown"
        );

        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(signal)
        .await
        .map_err(|e| {
            error!(error = %e, "HTTP server failed");
            WardenError::Io(e)
        })
    }
}
