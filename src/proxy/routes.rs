//! Proxy router
//!
//! Every path on the proxy listener goes to the same handler.

use axum::Router;
use tower_http::trace::TraceLayer;

use super::handler::{proxy_handler, ProxyState};

/// Creates the router for the proxy listener.
pub fn create_proxy_router(state: ProxyState) -> Router {
    Router::new()
        .fallback(proxy_handler)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
