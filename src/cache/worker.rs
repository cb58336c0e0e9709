//! The cache worker task: an isolated owner of the versioned cache
//! partitions.
//!
//! All cache state lives inside the task; the rest of the process talks
//! to it through a [`CacheClient`]. Requests carry a oneshot reply
//! channel, so a caller observes exactly one response per request.
//! Background revalidation re-enters the worker through its own command
//! queue and is therefore processed only after the triggering reply has
//! been delivered.

use super::messages::{
    CacheStatus, ControlReply, ControlRequest, OfflinePost, PartitionStatus, WorkerNotice,
};
use super::store::{offline_page, CacheRequest, CachedResponse, Fetcher, PartitionStore};
use super::strategy::{Partition, Strategy, StrategyTable, STATIC_ROUTES};

use std::collections::BTreeMap;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot};

/// Worker lifecycle. Phases only ever advance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Installing,
    Installed,
    Activating,
    Active,
    Redundant,
}

/// Commands on the worker's queue. `Revalidate` is self-addressed.
pub enum Command {
    Fetch {
        request: CacheRequest,
        reply: oneshot::Sender<CachedResponse>,
    },
    Control {
        request: ControlRequest,
        reply: oneshot::Sender<ControlReply>,
    },
    Revalidate {
        path: String,
    },
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache worker unavailable")]
    WorkerGone,
}

/// Cloneable handle to a running worker.
#[derive(Clone)]
pub struct CacheClient {
    tx: mpsc::Sender<Command>,
    notices: broadcast::Sender<WorkerNotice>,
}

impl CacheClient {
    /// Route a request through the worker and wait for its response.
    pub async fn fetch(&self, request: CacheRequest) -> Result<CachedResponse, CacheError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Fetch { request, reply })
            .await
            .map_err(|_| CacheError::WorkerGone)?;
        rx.await.map_err(|_| CacheError::WorkerGone)
    }

    /// Send a control request and wait for its reply.
    pub async fn control(&self, request: ControlRequest) -> Result<ControlReply, CacheError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Control { request, reply })
            .await
            .map_err(|_| CacheError::WorkerGone)?;
        rx.await.map_err(|_| CacheError::WorkerGone)
    }

    /// Subscribe to advisory notices.
    pub fn subscribe(&self) -> broadcast::Receiver<WorkerNotice> {
        self.notices.subscribe()
    }
}

pub struct CacheWorker<F: Fetcher> {
    version: String,
    phase: Phase,
    store: PartitionStore,
    table: StrategyTable,
    fetcher: F,
    self_tx: mpsc::Sender<Command>,
    notices: broadcast::Sender<WorkerNotice>,
    offline_html: String,
}

/// Spawn a worker and return its client handle.
pub fn spawn_worker<F: Fetcher>(
    version: impl Into<String>,
    fetcher: F,
) -> (CacheClient, tokio::task::JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(64);
    let (notices, _) = broadcast::channel(32);

    let worker = CacheWorker {
        version: version.into(),
        phase: Phase::Installing,
        store: PartitionStore::default(),
        table: StrategyTable::default(),
        fetcher,
        self_tx: tx.clone(),
        notices: notices.clone(),
        offline_html: offline_page(),
    };

    let client = CacheClient { tx, notices };
    let handle = tokio::spawn(worker.run(rx));
    (client, handle)
}

impl<F: Fetcher> CacheWorker<F> {
    async fn run(mut self, mut rx: mpsc::Receiver<Command>) {
        self.install().await;
        self.activate();

        while let Some(command) = rx.recv().await {
            match command {
                Command::Fetch { request, reply } => {
                    let response = self.handle_fetch(&request).await;
                    let _ = reply.send(response);
                }
                Command::Control { request, reply } => {
                    let response = self.handle_control(request).await;
                    let _ = reply.send(response);
                }
                Command::Revalidate { path } => self.revalidate(&path).await,
            }
        }

        self.phase = Phase::Redundant;
        tracing::info!("cache worker: all clients gone, shutting down");
    }

    /// Pre-populate the static partition from the critical-route list.
    /// A route that cannot be fetched is skipped, never fatal.
    async fn install(&mut self) {
        tracing::info!(version = %self.version, "cache worker: installing");

        let mut cached = 0;
        for route in STATIC_ROUTES.iter().copied() {
            match self.fetcher.fetch(route).await {
                Ok(response) if response.is_success() => {
                    self.store.put(Partition::Static, &self.version, route, response);
                    cached += 1;
                }
                Ok(response) => {
                    tracing::debug!(route, status = response.status, "precache skipped");
                }
                Err(e) => {
                    tracing::debug!(route, "precache skipped: {}", e);
                }
            }
        }

        self.phase = Phase::Installed;
        tracing::info!(cached, "cache worker: installed");
    }

    /// Drop partitions belonging to other versions and go active. A
    /// version change is surfaced as an update notice.
    fn activate(&mut self) {
        self.phase = Phase::Activating;
        let stale = self.store.drop_stale(&self.version);
        if !stale.is_empty() {
            tracing::info!(?stale, "cache worker: deleted stale caches");
            let _ = self.notices.send(WorkerNotice::SwUpdateAvailable);
        }
        self.phase = Phase::Active;
        tracing::info!(version = %self.version, "cache worker: active");
    }

    async fn handle_fetch(&mut self, request: &CacheRequest) -> CachedResponse {
        // Non-GET and cross-origin traffic passes through untouched,
        // keeping its method and body.
        if request.method != "GET" || !request.same_origin {
            return self.pass_through(request).await;
        }

        match self.table.classify(&request.path) {
            Strategy::NeverCache => self.pass_through(request).await,
            Strategy::CacheFirst => self.cache_first(request).await,
            Strategy::NetworkFirst => self.network_first(request).await,
            Strategy::BlogContent => self.blog_content(request).await,
            Strategy::Default => self.default_strategy(request).await,
        }
    }

    async fn pass_through(&self, request: &CacheRequest) -> CachedResponse {
        match self.fetcher.forward(request).await {
            Ok(response) => response,
            Err(_) => CachedResponse::unavailable("Network Error"),
        }
    }

    /// Serve from the static partition when possible, refreshing the
    /// entry in the background.
    async fn cache_first(&mut self, request: &CacheRequest) -> CachedResponse {
        if let Some(cached) = self.store.get(Partition::Static, &self.version, &request.path) {
            let response = cached.clone();
            let _ = self.self_tx.try_send(Command::Revalidate {
                path: request.path.clone(),
            });
            return response;
        }

        match self.fetcher.fetch(&request.path).await {
            Ok(response) => {
                if response.is_success() {
                    self.store
                        .put(Partition::Static, &self.version, &request.path, response.clone());
                }
                response
            }
            Err(_) => CachedResponse::unavailable("Service Unavailable"),
        }
    }

    async fn network_first(&mut self, request: &CacheRequest) -> CachedResponse {
        match self.fetcher.fetch(&request.path).await {
            Ok(response) => {
                if response.is_success() {
                    self.store
                        .put(Partition::Dynamic, &self.version, &request.path, response.clone());
                }
                response
            }
            Err(_) => self.dynamic_fallback(request),
        }
    }

    /// Network first against the blog partition, with client notices
    /// either way.
    async fn blog_content(&mut self, request: &CacheRequest) -> CachedResponse {
        match self.fetcher.fetch(&request.path).await {
            Ok(response) => {
                if response.is_success() {
                    self.store
                        .put(Partition::Blog, &self.version, &request.path, response.clone());
                    let _ = self.notices.send(WorkerNotice::PostCached {
                        url: request.path.clone(),
                    });
                }
                response
            }
            Err(_) => {
                if let Some(cached) = self.store.get(Partition::Blog, &self.version, &request.path)
                {
                    let response = cached.clone();
                    let _ = self.notices.send(WorkerNotice::OfflinePostServed {
                        url: request.path.clone(),
                    });
                    return response;
                }
                CachedResponse::html(200, self.offline_html.clone())
            }
        }
    }

    /// Network with dynamic fallback; only successful HTML responses are
    /// worth storing here.
    async fn default_strategy(&mut self, request: &CacheRequest) -> CachedResponse {
        match self.fetcher.fetch(&request.path).await {
            Ok(response) => {
                if response.is_success() && request.wants_html() {
                    self.store
                        .put(Partition::Dynamic, &self.version, &request.path, response.clone());
                }
                response
            }
            Err(_) => self.dynamic_fallback(request),
        }
    }

    fn dynamic_fallback(&self, request: &CacheRequest) -> CachedResponse {
        if let Some(cached) = self.store.get(Partition::Dynamic, &self.version, &request.path) {
            return cached.clone();
        }
        if request.wants_html() {
            CachedResponse::html(200, self.offline_html.clone())
        } else {
            CachedResponse::unavailable("Network Error")
        }
    }

    async fn revalidate(&mut self, path: &str) {
        match self.fetcher.fetch(path).await {
            Ok(response) if response.is_success() => {
                self.store.put(Partition::Static, &self.version, path, response);
            }
            Ok(_) => {}
            Err(e) => tracing::debug!(path, "revalidation skipped: {}", e),
        }
    }

    async fn handle_control(&mut self, request: ControlRequest) -> ControlReply {
        match request {
            ControlRequest::GetCacheStatus => {
                let mut caches = BTreeMap::new();
                let mut total = 0;
                for name in self.store.cache_names() {
                    let urls = self.store.entry_paths(&name);
                    total += urls.len();
                    caches.insert(
                        name.clone(),
                        PartitionStatus {
                            count: self.store.entry_count(&name),
                            urls,
                        },
                    );
                }
                ControlReply::Status(CacheStatus {
                    version: self.version.clone(),
                    caches,
                    total_entries: total,
                })
            }
            ControlRequest::ClearCache => {
                self.store.clear();
                tracing::info!("cache worker: all caches cleared");
                ControlReply::Ack { success: true }
            }
            ControlRequest::CachePost { url } => {
                let success = match self.fetcher.fetch(&url).await {
                    Ok(response) if response.is_success() => {
                        self.store.put(Partition::Blog, &self.version, &url, response);
                        true
                    }
                    Ok(_) => false,
                    Err(e) => {
                        tracing::debug!(url = %url, "cache-post failed: {}", e);
                        false
                    }
                };
                ControlReply::Ack { success }
            }
            ControlRequest::GetOfflinePosts => {
                let posts = self
                    .store
                    .entries(Partition::Blog, &self.version)
                    .into_iter()
                    .map(|url| OfflinePost { url, cached: true })
                    .collect();
                ControlReply::OfflinePosts(posts)
            }
        }
    }
}
