//! Offline cache: versioned partitions, per-route strategies, and the
//! worker task that owns them.

pub mod messages;
pub mod store;
pub mod strategy;
pub mod worker;

pub use messages::ControlRequest;
pub use store::{CacheRequest, HttpFetcher};
pub use worker::{spawn_worker, CacheClient};
