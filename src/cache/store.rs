//! Request/response types, the partition store, and the upstream fetcher.

use super::strategy::{Partition, CACHE_PREFIX};

use askama::Template;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use thiserror::Error;

/// One inbound request, reduced to what the strategies need.
#[derive(Debug, Clone)]
pub struct CacheRequest {
    pub method: String,
    pub path: String,
    /// The Accept header; decides HTML offline fallback vs a bare 503.
    pub accept: String,
    pub same_origin: bool,
    /// Request body, carried verbatim on the pass-through path.
    pub body: Vec<u8>,
}

impl CacheRequest {
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: "GET".to_string(),
            path: path.into(),
            accept: "text/html".to_string(),
            same_origin: true,
            body: Vec::new(),
        }
    }

    pub fn accept(mut self, accept: impl Into<String>) -> Self {
        self.accept = accept.into();
        self
    }

    pub fn wants_html(&self) -> bool {
        self.accept.contains("text/html")
    }
}

/// A response body, either fetched from upstream or served from cache.
#[derive(Debug, Clone)]
pub struct CachedResponse {
    pub status: u16,
    pub content_type: String,
    pub body: Vec<u8>,
}

impl CachedResponse {
    pub fn html(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            content_type: "text/html".to_string(),
            body: body.into(),
        }
    }

    pub fn text(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            content_type: "text/plain".to_string(),
            body: body.into(),
        }
    }

    pub fn unavailable(message: &str) -> Self {
        Self::text(503, message.as_bytes().to_vec())
    }

    pub fn is_success(&self) -> bool {
        self.status == 200
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("network error: {0}")]
    Network(String),
}

/// Upstream origin access. The worker is generic over this seam so tests
/// can script network behavior.
pub trait Fetcher: Send + Sync + 'static {
    /// GET one path; used for cache fills, precaching, and revalidation.
    fn fetch(
        &self,
        path: &str,
    ) -> impl Future<Output = Result<CachedResponse, FetchError>> + Send;

    /// Forward a request as-is, preserving its method and body.
    fn forward(
        &self,
        request: &CacheRequest,
    ) -> impl Future<Output = Result<CachedResponse, FetchError>> + Send;
}

/// Fetcher backed by an HTTP origin.
pub struct HttpFetcher {
    origin: String,
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(origin: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
            client: reqwest::Client::new(),
        }
    }
}

impl Fetcher for HttpFetcher {
    async fn fetch(&self, path: &str) -> Result<CachedResponse, FetchError> {
        let url = format!("{}{}", self.origin, path);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| FetchError::Network(e.to_string()))?;
        read_response(response).await
    }

    async fn forward(&self, request: &CacheRequest) -> Result<CachedResponse, FetchError> {
        let url = format!("{}{}", self.origin, request.path);
        let method = reqwest::Method::from_bytes(request.method.as_bytes())
            .map_err(|e| FetchError::Network(e.to_string()))?;
        let response = self
            .client
            .request(method, &url)
            .header(reqwest::header::ACCEPT, &request.accept)
            .body(request.body.clone())
            .send()
            .await
            .map_err(|e| FetchError::Network(e.to_string()))?;
        read_response(response).await
    }
}

async fn read_response(response: reqwest::Response) -> Result<CachedResponse, FetchError> {
    let status = response.status().as_u16();
    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/octet-stream")
        .to_string();
    let body = response
        .bytes()
        .await
        .map_err(|e| FetchError::Network(e.to_string()))?
        .to_vec();

    Ok(CachedResponse {
        status,
        content_type,
        body,
    })
}

/// Every cache this worker knows about, keyed by versioned name. Stale
/// versions linger here until activation deletes them.
#[derive(Default)]
pub struct PartitionStore {
    caches: HashMap<String, BTreeMap<String, CachedResponse>>,
}

impl PartitionStore {
    pub fn put(&mut self, partition: Partition, version: &str, path: &str, response: CachedResponse) {
        self.caches
            .entry(partition.cache_name(version))
            .or_default()
            .insert(path.to_string(), response);
    }

    pub fn get(&self, partition: Partition, version: &str, path: &str) -> Option<&CachedResponse> {
        self.caches
            .get(&partition.cache_name(version))
            .and_then(|cache| cache.get(path))
    }

    pub fn entries(&self, partition: Partition, version: &str) -> Vec<String> {
        self.caches
            .get(&partition.cache_name(version))
            .map(|cache| cache.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn cache_names(&self) -> Vec<String> {
        self.caches.keys().cloned().collect()
    }

    pub fn entry_count(&self, name: &str) -> usize {
        self.caches.get(name).map(BTreeMap::len).unwrap_or(0)
    }

    pub fn entry_paths(&self, name: &str) -> Vec<String> {
        self.caches
            .get(name)
            .map(|cache| cache.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Delete every owned cache that is not one of the given version's
    /// partitions. Returns the deleted names.
    pub fn drop_stale(&mut self, version: &str) -> Vec<String> {
        let keep: Vec<String> = Partition::ALL
            .iter()
            .map(|p| p.cache_name(version))
            .collect();
        let stale: Vec<String> = self
            .caches
            .keys()
            .filter(|name| name.contains(CACHE_PREFIX) && !keep.contains(name))
            .cloned()
            .collect();
        for name in &stale {
            self.caches.remove(name);
        }
        stale
    }

    /// Delete every owned cache.
    pub fn clear(&mut self) {
        self.caches.retain(|name, _| !name.contains(CACHE_PREFIX));
    }

    /// Pre-seed an entry under an arbitrary cache name. Only used to model
    /// caches left behind by a previous version.
    #[cfg(test)]
    pub fn seed(&mut self, name: &str, path: &str, response: CachedResponse) {
        self.caches
            .entry(name.to_string())
            .or_default()
            .insert(path.to_string(), response);
    }
}

/// Generated offline fallback page, served when an HTML navigation has no
/// network and no cached copy.
#[derive(Template)]
#[template(path = "offline.html")]
struct OfflineTemplate;

pub fn offline_page() -> String {
    OfflineTemplate.render().unwrap_or_else(|e| {
        tracing::warn!("offline template render failed: {}", e);
        "<!DOCTYPE html><html><body><h1>You're Offline</h1></body></html>".to_string()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partition_store_versioned_isolation() {
        let mut store = PartitionStore::default();
        store.put(Partition::Static, "v1", "/a", CachedResponse::html(200, "one"));
        store.put(Partition::Static, "v2", "/a", CachedResponse::html(200, "two"));

        assert_eq!(store.get(Partition::Static, "v1", "/a").unwrap().body, b"one");
        assert_eq!(store.get(Partition::Static, "v2", "/a").unwrap().body, b"two");
    }

    #[test]
    fn test_drop_stale_keeps_current_version() {
        let mut store = PartitionStore::default();
        store.put(Partition::Static, "v1", "/a", CachedResponse::html(200, "x"));
        store.put(Partition::Blog, "v1", "/journal/p/", CachedResponse::html(200, "x"));
        store.put(Partition::Static, "v2", "/a", CachedResponse::html(200, "y"));

        let mut dropped = store.drop_stale("v2");
        dropped.sort();
        assert_eq!(dropped, ["vitaltrail-blog-v1", "vitaltrail-static-v1"]);
        assert!(store.get(Partition::Static, "v2", "/a").is_some());
        assert!(store.get(Partition::Static, "v1", "/a").is_none());
    }

    #[test]
    fn test_offline_page_is_html() {
        let page = offline_page();
        assert!(page.contains("<html"));
        assert!(page.contains("Offline"));
    }
}
