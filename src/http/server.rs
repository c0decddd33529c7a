//! HTTP server setup.
//!
//! # Responsibilities
//! - Build the public Axum router: interception layer in front of the
//!   upstream forwarder
//! - Wire up ambient middleware (request ID, tracing, timeout)
//! - Serve until the shutdown broadcast fires

use std::net::SocketAddr;
use std::time::Duration;

use axum::{middleware::from_fn_with_state, Router};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::config::GuardConfig;
use crate::http::forward::{forward, Upstream};
use crate::http::middleware::{security_middleware, SecurityLayer};

/// Public-facing server of the guard.
pub struct GuardServer {
    router: Router,
}

impl GuardServer {
    pub fn new(config: &GuardConfig, layer: SecurityLayer) -> Result<Self, axum::http::uri::InvalidUri> {
        let upstream = Upstream::new(&config.upstream.address)?;
        tracing::info!(upstream = %upstream.authority(), "Forwarding passed requests");
        let router = Self::build_router(config, layer, upstream);
        Ok(Self { router })
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(config: &GuardConfig, layer: SecurityLayer, upstream: Upstream) -> Router {
        Router::new()
            .fallback(forward)
            .with_state(upstream)
            .layer(from_fn_with_state(layer, security_middleware))
            .layer(TimeoutLayer::new(Duration::from_secs(
                config.upstream.request_timeout_secs,
            )))
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(TraceLayer::new_for_http())
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
    }

    /// The assembled router, for in-process use.
    pub fn into_router(self) -> Router {
        self.router
    }

    /// Run the server, accepting connections on the given listener.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "Guard listening");

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
            })
            .await?;

        tracing::info!("Guard stopped");
        Ok(())
    }
}
