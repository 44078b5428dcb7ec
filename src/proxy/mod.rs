//! Proxy Module
//!
//! The caching reverse proxy: origin routing, caching policy and the
//! request handler.

mod handler;
mod origin;
mod policy;
mod routes;

pub use handler::{cache_key, proxy_handler, ProxyState, MAX_REQUEST_BODY, ORIGIN_TIMEOUT};
pub use origin::{strip_port, Origin, OriginTable, Protocol};
pub use policy::{analyze, clean_headers, should_validate, Cachability};
pub use routes::create_proxy_router;
