//! Control and notice protocol between the cache worker and its clients.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Control requests. Each gets exactly one reply on its channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ControlRequest {
    GetCacheStatus,
    ClearCache,
    CachePost { url: String },
    GetOfflinePosts,
}

/// Contents of one partition, as reported by `get-cache-status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartitionStatus {
    pub count: usize,
    pub urls: Vec<String>,
}

/// Snapshot of every owned cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheStatus {
    pub version: String,
    pub caches: BTreeMap<String, PartitionStatus>,
    pub total_entries: usize,
}

/// A blog post available offline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfflinePost {
    pub url: String,
    pub cached: bool,
}

/// Replies to control requests.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ControlReply {
    Status(CacheStatus),
    Ack { success: bool },
    OfflinePosts(Vec<OfflinePost>),
}

/// Advisory notices broadcast to all subscribers; no reply expected and
/// losing one is harmless.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum WorkerNotice {
    PostCached { url: String },
    OfflinePostServed { url: String },
    SwUpdateAvailable,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_request_wire_format() {
        let req: ControlRequest =
            serde_json::from_str(r#"{"type":"cache-post","url":"/journal/hello/"}"#).unwrap();
        assert!(matches!(req, ControlRequest::CachePost { ref url } if url == "/journal/hello/"));

        let req: ControlRequest = serde_json::from_str(r#"{"type":"get-cache-status"}"#).unwrap();
        assert!(matches!(req, ControlRequest::GetCacheStatus));
    }

    #[test]
    fn test_notice_wire_format() {
        let json = serde_json::to_value(&WorkerNotice::OfflinePostServed {
            url: "/journal/hello/".into(),
        })
        .unwrap();
        assert_eq!(json["type"], "offline-post-served");

        let json = serde_json::to_value(&WorkerNotice::SwUpdateAvailable).unwrap();
        assert_eq!(json["type"], "sw-update-available");
    }
}
