//! Request and Response models for the admin API

pub mod requests;
pub mod responses;

pub use requests::PurgeRequest;
pub use responses::{HealthResponse, MessageResponse, StatsResponse};
