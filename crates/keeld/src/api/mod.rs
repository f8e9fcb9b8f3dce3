//! HTTP surfaces of the daemon.
//!
//! Two routers share one [`LifecycleController`]: the plugin protocol served
//! on the Unix socket, and the admin API served over TCP.

pub mod admin;
pub mod plugin;

use std::sync::Arc;

use axum::Router;
use keel::LifecycleController;
use tower_http::trace::TraceLayer;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    /// The lifecycle controller every handler delegates to.
    pub controller: Arc<LifecycleController>,
}

impl AppState {
    /// Wrap a controller.
    #[must_use]
    pub const fn new(controller: Arc<LifecycleController>) -> Self {
        Self { controller }
    }
}

/// Router for the container runtime plugin protocol.
pub fn plugin_app(state: AppState) -> Router {
    plugin::routes()
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Router for the administrative REST API.
pub fn admin_app(state: AppState) -> Router {
    admin::routes()
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}
