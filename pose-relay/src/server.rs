//! HTTP server with graceful shutdown

use std::future::Future;
use std::time::Duration;

use axum::{routing::get, Router};
use tokio::net::TcpListener;
use tokio::signal;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::{
    catch_panic::CatchPanicLayer,
    cors::CorsLayer,
    request_id::{PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};

use crate::{
    config::Config,
    error::Result,
    health,
    ids::MakeTypedRequestId,
    relay::{ws_upgrade, LivenessMonitor, Relay},
    state::AppState,
};

/// Server instance
pub struct Server {
    config: Config,
}

impl Server {
    /// Create a new server instance
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Build the application router: the WebSocket endpoint plus the
    /// side-channel HTTP routes, wrapped in the middleware stack
    pub fn router(&self, state: AppState) -> Router {
        let ws_path = normalize_path(&state.relay.config().ws_path);

        let http_routes = Router::new()
            .route("/health", get(health::health))
            .route("/ready", get(health::readiness))
            .route("/metrics", get(health::metrics))
            .route("/rooms", get(health::rooms))
            .route("/rooms/{code}", get(health::room))
            .layer(TimeoutLayer::with_status_code(
                http::StatusCode::REQUEST_TIMEOUT,
                self.config.middleware.request_timeout(),
            ));

        let mut app = Router::new()
            .route(&ws_path, get(ws_upgrade))
            .merge(http_routes)
            .with_state(state)
            .layer(self.build_cors_layer())
            .layer(
                TraceLayer::new_for_http()
                    .make_span_with(DefaultMakeSpan::new().include_headers(true))
                    .on_response(DefaultOnResponse::new().include_headers(true)),
            )
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(SetRequestIdLayer::x_request_id(MakeTypedRequestId));

        if self.config.middleware.catch_panic {
            app = app.layer(CatchPanicLayer::new());
        }
        app
    }

    /// Bind the configured address and serve until SIGINT/SIGTERM
    pub async fn serve(self) -> Result<()> {
        let addr = self.config.bind_address();
        let listener = TcpListener::bind(&addr).await?;
        self.serve_with_listener(listener, shutdown_signal()).await
    }

    /// Serve on an already-bound listener until `shutdown` resolves
    pub async fn serve_with_listener<F>(self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let state = AppState::new(self.config.clone());
        let relay = state.relay.clone();
        let app = self.router(state);

        let local_addr = listener.local_addr()?;
        tracing::info!(
            service = %self.config.service.name,
            address = %local_addr,
            ws_path = %relay.config().ws_path,
            "Server listening"
        );
        self.log_middleware_config();

        let background = CancellationToken::new();
        let tasks = spawn_background(&relay, &background);

        let closing = relay.clone();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                shutdown.await;
                let closed = closing.close_all();
                tracing::info!(sessions = closed, "Shutdown signal received, closing sessions");
            })
            .await?;

        background.cancel();
        let grace = Duration::from_secs(self.config.service.shutdown_grace_secs);
        for task in tasks {
            if tokio::time::timeout(grace, task).await.is_err() {
                tracing::warn!("Background task did not stop within the grace period");
            }
        }

        tracing::info!("Server shutdown complete");
        Ok(())
    }

    /// Log middleware configuration for debugging
    fn log_middleware_config(&self) {
        tracing::info!("Middleware configuration:");
        tracing::info!(
            "  - Panic recovery: {}",
            if self.config.middleware.catch_panic { "enabled" } else { "disabled" }
        );
        tracing::info!("  - Request ID tracking: enabled");
        tracing::info!("  - CORS mode: {}", self.config.middleware.cors_mode);
        tracing::info!(
            "  - Request timeout: {} seconds",
            self.config.middleware.request_timeout_secs
        );
    }

    /// Build CORS layer based on configuration
    fn build_cors_layer(&self) -> CorsLayer {
        match self.config.middleware.cors_mode.as_str() {
            "permissive" => {
                tracing::debug!("Enabling permissive CORS");
                CorsLayer::permissive()
            }
            "restrictive" => {
                tracing::debug!("Enabling restrictive CORS (default deny)");
                CorsLayer::new()
            }
            "disabled" => {
                tracing::debug!("CORS disabled (using restrictive)");
                CorsLayer::new()
            }
            _ => {
                tracing::warn!(
                    "Unknown CORS mode: {}, defaulting to permissive",
                    self.config.middleware.cors_mode
                );
                CorsLayer::permissive()
            }
        }
    }
}

fn normalize_path(path: &str) -> String {
    let trimmed = path.trim();
    if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}

/// Start the liveness monitor and the rate-counter sweep
fn spawn_background(relay: &Relay, shutdown: &CancellationToken) -> Vec<JoinHandle<()>> {
    let liveness = tokio::spawn(LivenessMonitor::new(relay.clone()).run(shutdown.clone()));

    let sweeper_relay = relay.clone();
    let sweeper_shutdown = shutdown.clone();
    let sweeper = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(sweeper_relay.config().rate_sweep_interval());
        ticker.tick().await;
        loop {
            tokio::select! {
                () = sweeper_shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    sweeper_relay.sweep_rate_limits();
                }
            }
        }
    });

    vec![liveness, sweeper]
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl+C), starting graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        },
    }
}
