//! Okapi Gateway HTTP Server
//!
//! Binds the configured port and hands every request to a single dispatcher
//! that routes by path prefix:
//! - /stop-server - Terminate the process
//! - /status - Session status
//! - /token - Current API token
//! - /authenticate?user=&pwd=&mfa= - SSO login
//! - /api/* - Forward to the API gateway with the token attached

pub mod handlers;
pub mod router;

use axum::Router;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::auth::{IdentityProvider, SessionManager, SsoClient};
use crate::config::GatewayConfig;
use crate::proxy::ProxyForwarder;

/// Delay between answering `/stop-server` and dropping the listener, so the
/// confirmation can be written out
const STOP_FLUSH_DELAY: Duration = Duration::from_millis(100);

/// One-shot stop request raised by `/stop-server`
#[derive(Clone, Default)]
pub struct ShutdownSignal {
    notify: Arc<Notify>,
}

impl ShutdownSignal {
    pub fn trigger(&self) {
        let notify = self.notify.clone();
        tokio::spawn(async move {
            tokio::time::sleep(STOP_FLUSH_DELAY).await;
            notify.notify_one();
        });
    }

    pub async fn wait(&self) {
        self.notify.notified().await;
    }
}

/// Application state shared across handlers
pub struct AppState {
    pub config: GatewayConfig,
    pub session: SessionManager,
    pub proxy: ProxyForwarder,
    pub shutdown: ShutdownSignal,
}

impl AppState {
    /// Build the state around an identity provider
    pub fn new(config: GatewayConfig, provider: Arc<dyn IdentityProvider>) -> anyhow::Result<Self> {
        let session = SessionManager::new(provider, config.token_max_age_chrono());
        let proxy = ProxyForwarder::new(config.upstream_timeout, config.token_placement.clone())?;

        Ok(Self {
            config,
            session,
            proxy,
            shutdown: ShutdownSignal::default(),
        })
    }
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .fallback(handlers::dispatch)
        .with_state(state)
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
}

/// Serve on an already bound listener until `/stop-server` is requested
///
/// Returns as soon as the stop is signalled. Connections still in flight are
/// not drained.
pub async fn serve(listener: TcpListener, state: Arc<AppState>) -> anyhow::Result<()> {
    let shutdown = state.shutdown.clone();
    let app = build_router(state);

    tokio::select! {
        result = axum::serve(listener, app) => result?,
        _ = shutdown.wait() => {
            info!("[INFO] Stop requested, no longer accepting connections");
        }
    }

    Ok(())
}

/// Start the Okapi Gateway HTTP server
///
/// # Errors
/// Returns error if the HTTP clients cannot be built or the port cannot be bound
pub async fn start_server(config: GatewayConfig) -> anyhow::Result<()> {
    let provider = SsoClient::new(&config.sso_endpoint, config.upstream_timeout)
        .map_err(|e| anyhow::anyhow!("Failed to initialize SSO client: {}", e))?;

    let addr = config.bind_addr();
    let state = Arc::new(AppState::new(config, Arc::new(provider))?);

    let listener = TcpListener::bind(&addr).await?;

    info!("[INFO] Okapi Gateway listening on {}", addr);
    info!("[INFO] SSO endpoint: {}", state.config.sso_endpoint);
    info!(
        "[INFO] Proxying /api to {}{}",
        state.config.api_endpoint.as_str().trim_end_matches('/'),
        state.config.base_path
    );

    serve(listener, state).await
}
