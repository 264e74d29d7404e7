//! Startup orchestration.
//!
//! # Responsibilities
//! - Load and validate configuration
//! - Initialize all subsystems in dependency order
//! - Start background tasks (health checks, metrics, config watcher)
//! - Bind listeners and begin accepting traffic
//! - Tear everything down once shutdown is triggered
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Subsystems initialize in order, not concurrently
//! - Listeners start last (traffic only when ready)

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;

use crate::admin::{setup_admin_router, AdminState};
use crate::config::loader::{load_config, ConfigError};
use crate::config::watcher::ConfigWatcher;
use crate::config::GatewayConfig;
use crate::gateway::Gateway;
use crate::health::InMemoryHealthHistory;
use crate::http::HttpServer;
use crate::lifecycle::signals::spawn_signal_handler;
use crate::lifecycle::Shutdown;
use crate::observability::{logging, metrics};
use crate::store::{self, StoreError};

/// Fatal errors while bringing the gateway up.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("state store error: {0}")]
    Store(#[from] StoreError),

    #[error("failed to initialize logging: {0}")]
    Logging(#[from] tracing_subscriber::util::TryInitError),

    #[error("invalid {name} address {value:?}")]
    InvalidAddress { name: &'static str, value: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Load configuration, install logging and run until a termination signal.
pub async fn run(config_path: Option<PathBuf>) -> Result<(), StartupError> {
    let config = match &config_path {
        Some(path) => load_config(path)?,
        None => GatewayConfig::default(),
    };
    logging::init_logging(&config.observability)?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = ?config_path,
        endpoints = config.endpoints.len(),
        "traffic-gateway starting"
    );

    let shutdown = Shutdown::new();
    spawn_signal_handler(shutdown.clone());
    serve(config, config_path.as_deref(), shutdown).await
}

/// Bring up every subsystem for `config` and serve until `shutdown` fires.
///
/// With `config_path` set, endpoint changes in that file are applied live.
pub async fn serve(
    config: GatewayConfig,
    config_path: Option<&Path>,
    shutdown: Shutdown,
) -> Result<(), StartupError> {
    let proxy_addr = parse_addr("listener", &config.listener.bind_address)?;

    if config.observability.metrics_enabled {
        let addr = parse_addr("metrics", &config.observability.metrics_address)?;
        metrics::init_metrics(addr);
    }

    let store = store::connect(&config.store).await?;
    let history = Arc::new(InMemoryHealthHistory::new(
        config.health_check.history_capacity,
    ));
    let gateway = Arc::new(Gateway::new(&config, store, history));

    // Kept alive for the lifetime of the server
    let _watcher = match config_path {
        Some(path) => {
            let (watcher, mut updates) = ConfigWatcher::new(path, config.endpoints.clone());
            let handle = match watcher.run() {
                Ok(handle) => Some(handle),
                Err(e) => {
                    tracing::error!(error = %e, "Config watcher failed to start, hot reload disabled");
                    None
                }
            };
            let gateway = gateway.clone();
            tokio::spawn(async move {
                while let Some(endpoints) = updates.recv().await {
                    gateway.reload(&endpoints);
                }
            });
            handle
        }
        None => None,
    };

    let admin_task = if config.admin.enabled {
        let addr = parse_addr("admin", &config.admin.bind_address)?;
        let listener = TcpListener::bind(addr).await?;
        tracing::info!(address = %listener.local_addr()?, "Admin API listening");

        let router = setup_admin_router(AdminState {
            gateway: gateway.clone(),
            api_key: Arc::from(config.admin.api_key.as_str()),
        });
        let stop = shutdown.wait();
        Some(tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router)
                .with_graceful_shutdown(stop)
                .await
            {
                tracing::error!(error = %e, "Admin API stopped with error");
            }
        }))
    } else {
        None
    };

    let listener = TcpListener::bind(proxy_addr).await?;
    let server = HttpServer::new(gateway.clone());
    let result = server.run(listener, shutdown.wait()).await;

    // The proxy may also stop on its own error
    shutdown.trigger();
    if let Some(task) = admin_task {
        let _ = task.await;
    }
    gateway.shutdown();
    tracing::info!("Shutdown complete");

    result.map_err(StartupError::from)
}

fn parse_addr(name: &'static str, value: &str) -> Result<SocketAddr, StartupError> {
    value.parse().map_err(|_| StartupError::InvalidAddress {
        name,
        value: value.to_string(),
    })
}
