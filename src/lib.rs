//! Edge Cache - a caching reverse proxy
//!
//! Serves configured virtual hosts from their origin servers, keeping
//! cachable responses in an in-memory or memcached backed store.

pub mod api;
pub mod cache;
pub mod config;
pub mod error;
pub mod models;
pub mod proxy;
pub mod stats;
pub mod tasks;

pub use api::AppState;
pub use cache::{CacheBackend, CacheStore, ContentEntry};
pub use config::Config;
pub use proxy::{create_proxy_router, OriginTable, ProxyState};
pub use stats::{Collector, Stats};
pub use tasks::{spawn_cleanup_task, StoreQueue};
