//! Labdesk Server
//!
//! Serves the lab dashboard API on top of a simulated or remote provisioning
//! backend.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::signal;
use tracing::{info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use labdesk_server::api;
use labdesk_server::infra::lab_service::LabService;
use labdesk_server::infra::remote::RemoteLabService;
use labdesk_server::infra::simulated::SimulatedLabService;
use labdesk_server::service::lab_store::{LabLifecycleStore, LabLimits};
use labdesk_server::{AppState, Config};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = Config::load()?;
    let config = Arc::new(config);

    let filter = EnvFilter::builder()
        .with_default_directive(Level::INFO.into())
        .from_env_lossy();
    if config.log_format == "json" {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer())
            .with(filter)
            .init();
    }

    let http_addr: SocketAddr = format!("{}:{}", config.http_host, config.http_port).parse()?;

    info!("Starting Labdesk Server");
    info!("HTTP listening on {}", http_addr);

    // Initialize the provisioning backend
    let service: Arc<dyn LabService> = if config.uses_remote_backend() {
        info!("Using remote provisioning backend at {}", config.backend_url);
        let remote = Arc::new(RemoteLabService::from_config(&config)?);
        remote
            .clone()
            .spawn_poller(Duration::from_secs(config.poll_interval_secs));
        remote
    } else {
        info!(
            "Using simulated provisioning backend ({}s provisioning)",
            config.provision_delay_secs
        );
        let simulated = Arc::new(SimulatedLabService::from_config(&config));
        if config.seed_demo_labs {
            simulated.seed_demo_labs().await;
        }
        simulated.start().await;
        simulated
    };

    // Initialize the store
    let store = Arc::new(LabLifecycleStore::new(
        service,
        LabLimits::from_config(&config),
    ));
    store.clone().spawn_event_pump();

    match store.list_labs().await {
        Ok(labs) => info!("Loaded {} labs", labs.len()),
        Err(e) => warn!("Initial lab listing failed: {}", e),
    }

    // Create application state
    let state = AppState {
        config: config.clone(),
        store,
    };

    let app = api::http::create_router(state);

    axum::serve(
        tokio::net::TcpListener::bind(http_addr).await?,
        app.into_make_service(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Received shutdown signal");
}
