//! Response DTOs for the admin API

use serde::Serialize;

use crate::stats::StatsSnapshot;

/// Message body returned by POST /purge and by every admin error.
#[derive(Debug, Clone, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Confirmation sent after a successful purge
    pub fn purged() -> Self {
        Self::new("successfully purged item from cache")
    }
}

/// Response body for GET /stats
#[derive(Debug, Clone, Serialize)]
pub struct StatsResponse {
    /// Store in use, `memory` or `memcached`
    pub backend: String,
    #[serde(flatten)]
    pub stats: StatsSnapshot,
}

impl StatsResponse {
    pub fn new(backend: impl Into<String>, stats: StatsSnapshot) -> Self {
        Self {
            backend: backend.into(),
            stats,
        }
    }
}

/// Response body for the health endpoint (GET /health)
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Health status (e.g., "healthy")
    pub status: String,
    /// Current timestamp in ISO 8601 format
    pub timestamp: String,
}

impl HealthResponse {
    /// Creates a new HealthResponse with current timestamp
    pub fn healthy() -> Self {
        Self {
            status: "healthy".to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_response_serialize() {
        let json = serde_json::to_string(&MessageResponse::purged()).unwrap();
        assert_eq!(json, r#"{"message":"successfully purged item from cache"}"#);
    }

    #[test]
    fn test_stats_response_is_flat() {
        let stats = StatsSnapshot {
            hits: 3,
            misses: 1,
            hit_rate: 0.75,
            ..Default::default()
        };
        let value = serde_json::to_value(StatsResponse::new("memory", stats)).unwrap();

        assert_eq!(value["backend"], "memory");
        assert_eq!(value["hits"], 3);
        assert_eq!(value["hit_rate"], 0.75);
    }

    #[test]
    fn test_health_response_serialize() {
        let resp = HealthResponse::healthy();
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains("healthy"));
        assert!(json.contains("timestamp"));
    }
}
