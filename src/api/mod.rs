//! Admin API Module
//!
//! HTTP handlers and routing for the operator facing API.
//!
//! # Endpoints
//! - `POST /purge` - Remove a resource from the cache
//! - `GET /stats` - Cache and proxy counters
//! - `GET /health` - Health check endpoint

pub mod handlers;
pub mod routes;

pub use handlers::*;
pub use routes::create_router;
