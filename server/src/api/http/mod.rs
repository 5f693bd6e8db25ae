//! HTTP API handlers

mod access;
mod events;
mod health;
mod lab;

use axum::{
    routing::{delete, get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::AppState;

/// Create the HTTP router with all routes
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        // Health check
        .route("/health", get(health::health_check))
        // Lab routes
        .route("/labs", get(lab::list_labs))
        .route("/labs", post(lab::create_lab))
        .route("/labs/{id}", get(lab::get_lab))
        .route("/labs/{id}", delete(lab::delete_lab))
        .route("/labs/{id}/stop", post(lab::stop_lab))
        .route("/labs/{id}/extend", post(lab::extend_lab))
        // Access routes
        .route("/labs/{id}/access", get(access::get_access))
        .route("/labs/{id}/vpn-config", get(access::download_vpn_config))
        .route("/labs/{id}/vms", get(access::get_vm_access))
        .route("/labs/{id}/vms/{vm}/terminal", get(access::launch_terminal))
        .route("/labs/{id}/vms/{vm}/rdp", get(access::launch_rdp))
        // Provisioning notifications and change feed
        .route("/provisioning/events", post(events::receive_provision_event))
        .route("/events", get(events::lab_events));

    Router::new()
        .nest("/api/v1", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
