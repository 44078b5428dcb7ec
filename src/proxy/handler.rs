//! Proxy request handling
//!
//! Every inbound request is routed by its `Host` header. Fresh cached
//! entries are served directly, stale ones are revalidated with the origin,
//! misses are fetched and, when the response is cachable, handed to the
//! store queue after the response is built.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    body::{Body, Bytes},
    extract::{Request, State},
    http::{header, HeaderMap, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
};
use tracing::{debug, warn};

use super::origin::OriginTable;
use super::policy::{
    analyze, clean_headers, http_date, is_hop_by_hop, restore_headers, should_validate,
};
use crate::cache::{current_timestamp, CacheStore, ContentEntry};
use crate::error::ProxyError;
use crate::stats::{CacheStatus, Collector, Outcome};
use crate::tasks::StoreQueue;

/// Time allowed for a complete origin exchange
pub const ORIGIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Largest inbound request body buffered for forwarding (16 MiB)
pub const MAX_REQUEST_BODY: usize = 16 * 1024 * 1024;

// == Proxy State ==
/// Shared state of the proxy listener.
#[derive(Clone)]
pub struct ProxyState {
    pub cache: Arc<dyn CacheStore>,
    pub origins: Arc<OriginTable>,
    pub client: reqwest::Client,
    pub queue: StoreQueue,
    pub collector: Arc<dyn Collector>,
    /// Scheme clients use to reach the proxy
    pub scheme: Arc<str>,
}

impl ProxyState {
    pub fn new(
        cache: Arc<dyn CacheStore>,
        origins: OriginTable,
        queue: StoreQueue,
        collector: Arc<dyn Collector>,
        scheme: &str,
    ) -> Result<Self, ProxyError> {
        let client = origins.client(ORIGIN_TIMEOUT)?;
        Ok(Self {
            cache,
            origins: Arc::new(origins),
            client,
            queue,
            collector,
            scheme: Arc::from(scheme),
        })
    }
}

/// Request as it will be sent to the origin.
struct OutboundRequest {
    method: Method,
    url: String,
    headers: HeaderMap,
    body: Bytes,
}

/// Fully buffered origin response.
struct OriginResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
}

impl IntoResponse for OriginResponse {
    fn into_response(self) -> Response {
        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() = self.status;
        let headers = response.headers_mut();
        for (name, value) in &self.headers {
            if !is_hop_by_hop(name) {
                headers.append(name.clone(), value.clone());
            }
        }
        response
    }
}

// == Handler ==
/// Fallback handler for every request on the proxy listener.
pub async fn proxy_handler(State(state): State<ProxyState>, request: Request) -> Response {
    let start = Instant::now();
    let host = request_host(&request).unwrap_or_default().to_string();

    let (cache_status, response) = match state.handle(request).await {
        Ok(served) => served,
        Err(e) => {
            warn!("request for {} failed: {}", host, e);
            (CacheStatus::Error, e.into_response())
        }
    };

    state.collector.request(
        &host,
        response.status().as_u16(),
        cache_status,
        start.elapsed(),
    );
    response
}

impl ProxyState {
    async fn handle(&self, request: Request) -> Result<(CacheStatus, Response), ProxyError> {
        let host = request_host(&request)
            .ok_or_else(|| ProxyError::BadRequest("missing Host header".to_string()))?
            .to_string();
        let (domain, origin) = self.origins.resolve(&host)?;
        let validation_interval = origin.validation_interval;

        let (key, url) = {
            let path = request
                .uri()
                .path_and_query()
                .map(|p| p.as_str())
                .unwrap_or("/");
            (
                cache_key(&self.scheme, &host, path),
                format!("{}{}", origin.base_url(domain), path),
            )
        };

        let (parts, body) = request.into_parts();
        let body = axum::body::to_bytes(body, MAX_REQUEST_BODY)
            .await
            .map_err(|e| ProxyError::BadRequest(e.to_string()))?;
        let outbound = OutboundRequest {
            method: parts.method,
            url,
            headers: forward_headers(&parts.headers),
            body,
        };

        let cached = match self.cache.lookup(&key).await {
            Ok(found) => found,
            Err(e) => {
                debug!("cache lookup for {} failed: {}", key, e);
                None
            }
        };

        match cached {
            Some(entry) if should_validate(&entry, validation_interval, current_timestamp()) => {
                self.revalidate(&host, key, outbound, entry).await
            }
            Some(entry) => {
                debug!("serving {} from cache", key);
                Ok((CacheStatus::Hit, cached_response(&entry)))
            }
            None => {
                let response = self.fetch(&outbound).await?;
                if let Some(entry) = self.cachable_entry(&outbound.method, &response) {
                    self.queue.submit(key, entry);
                }
                Ok((CacheStatus::Miss, response.into_response()))
            }
        }
    }

    /// Asks the origin whether `entry` is still current.
    ///
    /// A 304 serves the cached copy and re-stores it with a new timestamp.
    /// Any other answer is relayed and handled like a fresh fetch.
    async fn revalidate(
        &self,
        host: &str,
        key: String,
        mut outbound: OutboundRequest,
        entry: ContentEntry,
    ) -> Result<(CacheStatus, Response), ProxyError> {
        if let Some(date) = http_date(entry.cached_at()) {
            outbound.headers.insert(header::IF_MODIFIED_SINCE, date);
        }

        let response = match self.fetch(&outbound).await {
            Ok(response) => response,
            Err(e) => {
                self.collector.validation(host, Outcome::Error);
                return Err(e);
            }
        };

        if response.status == StatusCode::NOT_MODIFIED {
            debug!("origin confirmed cached copy of {}", key);
            self.collector.validation(host, Outcome::Hit);
            let served = cached_response(&entry);
            self.queue.submit(key, entry.refreshed(current_timestamp()));
            return Ok((CacheStatus::Revalidated, served));
        }

        debug!("origin replaced cached copy of {}", key);
        self.collector.validation(host, Outcome::Miss);
        match self.cachable_entry(&outbound.method, &response) {
            Some(entry) => {
                self.queue.submit(key, entry);
            }
            None => {
                // The replacement may not be cached, so the stale copy goes.
                let cache = self.cache.clone();
                tokio::spawn(async move {
                    if let Err(e) = cache.purge(&key).await {
                        debug!("unable to purge stale {}: {}", key, e);
                    }
                });
            }
        }
        Ok((CacheStatus::Refreshed, response.into_response()))
    }

    async fn fetch(&self, outbound: &OutboundRequest) -> Result<OriginResponse, ProxyError> {
        let mut request = self
            .client
            .request(outbound.method.clone(), outbound.url.as_str())
            .headers(outbound.headers.clone());
        if !outbound.body.is_empty() {
            request = request.body(outbound.body.clone());
        }

        let response = request.send().await?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await?;

        debug!("origin answered {} for {}", status, outbound.url);
        Ok(OriginResponse {
            status,
            headers,
            body,
        })
    }

    /// Builds the entry to cache for a response, if it may be cached.
    ///
    /// Only complete `GET` answers are kept since hits are always served
    /// with status 200.
    fn cachable_entry(&self, method: &Method, response: &OriginResponse) -> Option<ContentEntry> {
        if method != Method::GET || response.status != StatusCode::OK {
            return None;
        }

        let verdict = analyze(&response.headers, self.cache.as_ref());
        if !verdict.cachable {
            return None;
        }

        Some(ContentEntry::new(
            response.body.clone(),
            verdict.content_type,
            clean_headers(&response.headers),
            verdict.max_age,
            current_timestamp(),
        ))
    }
}

// == Helpers ==
/// Cache key of a request: `scheme://host/path?query`, with the host exactly
/// as the client sent it.
pub fn cache_key(scheme: &str, host: &str, path_and_query: &str) -> String {
    format!("{}://{}{}", scheme, host, path_and_query)
}

fn request_host(request: &Request) -> Option<&str> {
    request
        .headers()
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .or_else(|| request.uri().authority().map(|a| a.as_str()))
        .filter(|host| !host.is_empty())
}

/// Inbound headers minus those tied to the client connection.
fn forward_headers(inbound: &HeaderMap) -> HeaderMap {
    let mut headers = HeaderMap::with_capacity(inbound.len());
    for (name, value) in inbound {
        if is_hop_by_hop(name) || name == header::HOST || name == header::CONTENT_LENGTH {
            continue;
        }
        headers.append(name.clone(), value.clone());
    }
    headers
}

fn cached_response(entry: &ContentEntry) -> Response {
    let mut headers = restore_headers(entry.headers());
    if !headers.contains_key(header::CONTENT_TYPE) {
        if let Ok(value) = HeaderValue::from_str(entry.content_type()) {
            headers.insert(header::CONTENT_TYPE, value);
        }
    }

    let mut response = Response::new(Body::from(entry.content().clone()));
    *response.headers_mut() = headers;
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_cache_key() {
        assert_eq!(
            cache_key("http", "www.example.com", "/style.css?v=2"),
            "http://www.example.com/style.css?v=2"
        );
        assert_eq!(
            cache_key("https", "www.example.com:8443", "/"),
            "https://www.example.com:8443/"
        );
    }

    #[test]
    fn test_request_host() {
        let request = axum::http::Request::builder()
            .uri("/a")
            .header("host", "www.example.com:8080")
            .body(Body::empty())
            .unwrap();
        assert_eq!(request_host(&request), Some("www.example.com:8080"));

        let request = axum::http::Request::builder()
            .uri("http://other.example.com/a")
            .body(Body::empty())
            .unwrap();
        assert_eq!(request_host(&request), Some("other.example.com"));

        let request = axum::http::Request::builder().uri("/a").body(Body::empty()).unwrap();
        assert_eq!(request_host(&request), None);
    }

    #[test]
    fn test_forward_headers() {
        let mut inbound = HeaderMap::new();
        inbound.insert(header::HOST, HeaderValue::from_static("www.example.com"));
        inbound.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
        inbound.insert(header::CONTENT_LENGTH, HeaderValue::from_static("0"));
        inbound.insert(header::ACCEPT, HeaderValue::from_static("text/css"));
        inbound.append(header::ACCEPT_LANGUAGE, HeaderValue::from_static("en"));
        inbound.append(header::ACCEPT_LANGUAGE, HeaderValue::from_static("fr"));

        let forwarded = forward_headers(&inbound);
        assert_eq!(forwarded.len(), 3);
        assert_eq!(forwarded.get_all(header::ACCEPT_LANGUAGE).iter().count(), 2);
        assert!(!forwarded.contains_key(header::HOST));
        assert!(!forwarded.contains_key(header::CONNECTION));
    }

    #[test]
    fn test_cached_response() {
        let mut headers = HashMap::new();
        headers.insert("etag".to_string(), "\"v1\"".to_string());
        let entry = ContentEntry::new("a{}", "text/css", headers, 60, 1);

        let response = cached_response(&entry);
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers().get(header::CONTENT_TYPE).unwrap(), "text/css");
        assert_eq!(response.headers().get(header::ETAG).unwrap(), "\"v1\"");
    }

    #[test]
    fn test_origin_response_drops_hop_by_hop() {
        let mut headers = HeaderMap::new();
        headers.insert(header::TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/html"));

        let response = OriginResponse {
            status: StatusCode::NOT_FOUND,
            headers,
            body: Bytes::from_static(b"missing"),
        }
        .into_response();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(!response.headers().contains_key(header::TRANSFER_ENCODING));
        assert_eq!(response.headers().get(header::CONTENT_TYPE).unwrap(), "text/html");
    }
}
