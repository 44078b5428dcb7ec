//! Background Tasks Module
//!
//! - Expiry sweeper: drops expired entries from the memory store
//! - Store queue: writes origin responses into the cache off the request path

mod cleanup;
mod store_queue;

pub use cleanup::spawn_cleanup_task;
pub use store_queue::{StoreJob, StoreQueue};
