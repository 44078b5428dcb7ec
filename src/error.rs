//! Error types for the edge cache
//!
//! Provides unified error handling using thiserror.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use crate::models::MessageResponse;

// == Cache Error Enum ==
/// Errors raised by the cache stores.
#[derive(Error, Debug)]
pub enum CacheError {
    /// Key not found in cache
    #[error("Key not found: {0}")]
    NotFound(String),

    /// Key was present but its TTL has elapsed
    #[error("Key expired: {0}")]
    Expired(String),

    /// A single object is larger than the whole memory budget
    #[error("Object too large: {size} bytes exceeds the {limit} bytes memory limit")]
    TooLarge { size: usize, limit: usize },

    /// Eviction could not free enough memory and force purge is disabled
    #[error("Insufficient memory: freed {freed} of {needed} bytes")]
    InsufficientMemory { freed: usize, needed: usize },

    /// Remote store connectivity or protocol failure
    #[error("Cache backend unavailable: {0}")]
    BackendUnavailable(String),

    /// Corrupt blob read back from the remote store
    #[error("Error decoding item: {0}")]
    Decode(String),

    /// Cache type is neither memory nor memcached
    #[error("Invalid cache type: {0}")]
    InvalidCacheType(String),

    /// A store option failed to parse
    #[error("Invalid cache option {name}: {reason}")]
    InvalidOption { name: String, reason: String },
}

// == Proxy Error Enum ==
/// Errors raised on the synchronous request path of the proxy.
#[derive(Error, Debug)]
pub enum ProxyError {
    /// No backend is configured for the requested virtual host
    #[error("Unknown host: {0}")]
    UnknownHost(String),

    /// The origin could not be reached or the request could not be built
    #[error("Origin unavailable: {0}")]
    OriginUnavailable(String),

    /// The inbound request could not be read
    #[error("Bad request: {0}")]
    BadRequest(String),
}

impl ProxyError {
    /// Status code sent to the client for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::UnknownHost(_) | ProxyError::OriginUnavailable(_) => {
                StatusCode::BAD_GATEWAY
            }
            ProxyError::BadRequest(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl From<reqwest::Error> for ProxyError {
    fn from(err: reqwest::Error) -> Self {
        ProxyError::OriginUnavailable(err.to_string())
    }
}

// == IntoResponse Implementation ==
impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        (self.status(), self.to_string()).into_response()
    }
}

// == Api Error Enum ==
/// Errors returned by the admin API.
#[derive(Error, Debug)]
pub enum ApiError {
    /// Request body could not be parsed
    #[error("unable to parse purge request")]
    InvalidRequest(String),

    /// Error surfaced by the cache store
    #[error(transparent)]
    Cache(#[from] CacheError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Cache(CacheError::NotFound(_)) => StatusCode::NOT_FOUND,
            ApiError::Cache(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        (status, Json(MessageResponse::new(self.to_string()))).into_response()
    }
}

// == Config Error Enum ==
/// Errors raised while loading or validating configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Unable to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unable to parse config file: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

// == Result Type Alias ==
/// Convenience Result type for cache store operations.
pub type Result<T> = std::result::Result<T, CacheError>;
