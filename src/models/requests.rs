//! Request DTOs for the admin API

use serde::Deserialize;

/// Request body for POST /purge
#[derive(Debug, Clone, Deserialize)]
pub struct PurgeRequest {
    /// Cache key of the resource, e.g. `http://www.example.com/style.css`
    pub resource: String,
}

impl PurgeRequest {
    /// Rejects an empty resource.
    pub fn validate(&self) -> Result<(), String> {
        if self.resource.is_empty() {
            return Err("resource cannot be empty".to_string());
        }
        Ok(())
    }
}
