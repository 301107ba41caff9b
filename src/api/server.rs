//! API Server
//!
//! HTTP front of the platform with graceful shutdown.

use super::{
    handlers::AppState,
    middleware::{create_cors_layer, request_id_middleware},
    routes::create_router,
};
use crate::config::ApiConfig;
use crate::errors::{ConfigurationError, EngineResult};
use crate::factory::Platform;
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::signal;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};
use tracing::{info, warn};

pub struct ApiServer {
    config: ApiConfig,
    platform: Arc<Platform>,
}

impl ApiServer {
    pub fn new(config: ApiConfig, platform: Arc<Platform>) -> Self {
        Self { config, platform }
    }

    /// Serve until Ctrl+C or SIGTERM
    pub async fn run(self) -> EngineResult<()> {
        let addr = self.socket_addr()?;
        let app = self.create_app();

        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!(%addr, origins = ?self.config.allowed_origins, "API server listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        info!("API server stopped");
        Ok(())
    }

    pub fn create_app(&self) -> axum::Router {
        let state = Arc::new(AppState {
            platform: self.platform.clone(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        });

        create_router(state)
            // Request ID middleware (first for tracing)
            .layer(axum::middleware::from_fn(request_id_middleware))
            // CORS layer (before timeout to handle preflight)
            .layer(create_cors_layer(self.config.allowed_origins.clone()))
            .layer(TimeoutLayer::new(Duration::from_secs(self.config.request_timeout_secs)))
            .layer(TraceLayer::new_for_http())
    }

    fn socket_addr(&self) -> EngineResult<SocketAddr> {
        let ip = self
            .config
            .host
            .parse::<std::net::IpAddr>()
            .map_err(|e| ConfigurationError::InvalidValue {
                field: "api.host".to_string(),
                value: self.config.host.clone(),
                reason: e.to_string(),
            })?;
        Ok(SocketAddr::from((ip, self.config.port)))
    }
}

/// Wait for shutdown signal
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received terminate signal");
        },
    }
}
