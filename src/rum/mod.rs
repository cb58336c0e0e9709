//! Real-user-monitoring session aggregator.
//!
//! A sampled fraction of visits gets a session record: page views,
//! interactions, and periodic performance snapshots. Events accumulate in
//! an in-memory queue and flush when the batch fills, when the periodic
//! timer fires, or at unload. An unsampled aggregator is constructible but
//! inert for the lifetime of the page.

mod session;

pub use session::{
    element_path, is_password_target, DeviceInfo, InputEvent, InteractionKind, MemoryUsage,
    NetworkInfo, PageView, PerformanceSnapshot, Session, UserInteraction, VisibilityChange,
    VisibilityState,
};

use crate::sink::{AnalyticsEvent, AnalyticsSink};
use crate::vitals::WebVitals;

use chrono::{DateTime, Duration, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Minimum spacing between recorded scroll events.
const SCROLL_THROTTLE_MS: i64 = 250;
/// Long tasks shorter than this are not worth an event.
const LONG_TASK_MS: f64 = 50.0;
/// Resource timings are queued past this duration, or when the transfer
/// size is zero (a failed or cache-opaque fetch).
const SLOW_RESOURCE_MS: f64 = 100.0;
/// Heap usage events fire above this percentage.
const HIGH_MEMORY_PERCENT: f64 = 75.0;

/// Aggregator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RumConfig {
    pub enabled: bool,
    /// Fraction of visits to sample, in [0, 1].
    pub sample_rate: f64,
    pub track_interactions: bool,
    pub track_visibility: bool,
    pub track_network: bool,
    pub track_memory: bool,
    pub track_long_tasks: bool,
    pub track_resources: bool,
    pub batch_size: usize,
    pub flush_interval_secs: u64,
    /// Optional HTTP collector for flushed batches.
    pub endpoint: Option<String>,
}

impl Default for RumConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sample_rate: 1.0,
            track_interactions: true,
            track_visibility: true,
            track_network: true,
            track_memory: true,
            track_long_tasks: true,
            track_resources: true,
            batch_size: 20,
            flush_interval_secs: 30,
            endpoint: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RumEventKind {
    PageView,
    Interaction,
    Performance,
    Error,
    Custom,
}

/// One queued telemetry event.
#[derive(Debug, Clone, Serialize)]
pub struct RumEvent {
    pub kind: RumEventKind,
    pub timestamp: DateTime<Utc>,
    pub session_id: String,
    pub data: serde_json::Value,
}

/// Read-only session digest for the API surface.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub sampled: bool,
    pub duration_ms: i64,
    pub page_views: usize,
    pub interactions: usize,
    pub performance_snapshots: usize,
    pub device_info: DeviceInfo,
    pub network_info: NetworkInfo,
}

pub struct SessionAggregator {
    config: RumConfig,
    session: Session,
    sampled: bool,
    sink: Arc<dyn AnalyticsSink>,
    /// Built only when an HTTP collector endpoint is configured.
    client: Option<reqwest::Client>,
    queue: Vec<RumEvent>,
    current_scroll_depth: u8,
    last_scroll_at: Option<DateTime<Utc>>,
    visibility_since: DateTime<Utc>,
}

impl SessionAggregator {
    /// Construct with a fresh uniform sampling draw.
    pub fn new(
        config: RumConfig,
        device_info: DeviceInfo,
        network_info: NetworkInfo,
        sink: Arc<dyn AnalyticsSink>,
        now: DateTime<Utc>,
    ) -> Self {
        let draw = rand::random::<f64>();
        Self::with_sample_draw(config, device_info, network_info, sink, now, draw)
    }

    /// Construct with an explicit sampling draw. A draw greater than the
    /// configured sample rate leaves the aggregator inert.
    pub fn with_sample_draw(
        config: RumConfig,
        device_info: DeviceInfo,
        network_info: NetworkInfo,
        sink: Arc<dyn AnalyticsSink>,
        now: DateTime<Utc>,
        draw: f64,
    ) -> Self {
        let sampled = config.enabled && draw <= config.sample_rate && config.sample_rate > 0.0;
        if !sampled {
            tracing::debug!("SessionAggregator: visit not sampled");
        }
        let client = config.endpoint.as_ref().map(|_| reqwest::Client::new());

        Self {
            config,
            session: Session {
                session_id: generate_session_id(now),
                start_time: now,
                device_info,
                network_info,
                page_views: Vec::new(),
                interactions: Vec::new(),
                performance_snapshots: Vec::new(),
            },
            sampled,
            sink,
            client,
            queue: Vec::new(),
            current_scroll_depth: 0,
            last_scroll_at: None,
            visibility_since: now,
        }
    }

    /// Whether this visit was sampled. An unsampled aggregator performs
    /// no tracked side effects.
    pub fn is_sampled(&self) -> bool {
        self.sampled
    }

    pub fn queued_events(&self) -> usize {
        self.queue.len()
    }

    /// Start a new page view, finalizing the previous one first.
    pub fn track_page_view(
        &mut self,
        url: impl Into<String>,
        title: impl Into<String>,
        referrer: impl Into<String>,
        load_time: f64,
        time_to_interactive: f64,
        now: DateTime<Utc>,
    ) {
        if !self.sampled {
            return;
        }

        self.finalize_current_page_view(now);

        let view = PageView {
            url: url.into(),
            title: title.into(),
            timestamp: now,
            referrer: referrer.into(),
            load_time,
            time_to_interactive,
            scroll_depth: 0,
            time_on_page_ms: 0,
            visibility_changes: Vec::new(),
        };
        let data = serde_json::to_value(&view).unwrap_or(serde_json::Value::Null);
        self.session.page_views.push(view);
        self.current_scroll_depth = 0;
        self.queue_event(RumEventKind::PageView, data, now);
    }

    /// Record one raw input event, applying throttling and redaction.
    pub fn track_interaction(&mut self, event: &InputEvent, now: DateTime<Utc>) {
        if !self.sampled || !self.config.track_interactions {
            return;
        }

        let interaction = match event {
            InputEvent::Click { target, x, y } => UserInteraction {
                kind: InteractionKind::Click,
                element: element_path(target),
                timestamp: now,
                x: Some(*x),
                y: Some(*y),
                value: None,
            },
            InputEvent::Scroll { depth_percent } => {
                if let Some(last) = self.last_scroll_at {
                    if now - last < Duration::milliseconds(SCROLL_THROTTLE_MS) {
                        return;
                    }
                }
                self.last_scroll_at = Some(now);
                self.current_scroll_depth = (*depth_percent).min(100);
                UserInteraction {
                    kind: InteractionKind::Scroll,
                    element: "window".to_string(),
                    timestamp: now,
                    x: None,
                    y: None,
                    value: Some(self.current_scroll_depth.to_string()),
                }
            }
            InputEvent::Input { target } => {
                let input_type = target
                    .last()
                    .and_then(|n| n.input_type.clone())
                    .unwrap_or_else(|| "text".to_string());
                // Only the field type is recorded, never its contents.
                UserInteraction {
                    kind: InteractionKind::Input,
                    element: element_path(target),
                    timestamp: now,
                    x: None,
                    y: None,
                    value: Some(input_type),
                }
            }
            InputEvent::Keypress { target, key } => {
                // Password fields are never captured; only navigation keys
                // are meaningful.
                if is_password_target(target)
                    || !matches!(key.as_str(), "Enter" | "Tab" | "Escape")
                {
                    return;
                }
                UserInteraction {
                    kind: InteractionKind::Keypress,
                    element: element_path(target),
                    timestamp: now,
                    x: None,
                    y: None,
                    value: Some(key.clone()),
                }
            }
            InputEvent::Touch { target, x, y } => UserInteraction {
                kind: InteractionKind::Touch,
                element: element_path(target),
                timestamp: now,
                x: Some(*x),
                y: Some(*y),
                value: None,
            },
        };

        let data = serde_json::to_value(&interaction).unwrap_or(serde_json::Value::Null);
        self.session.interactions.push(interaction);
        self.queue_event(RumEventKind::Interaction, data, now);
    }

    /// Record a visibility transition with the duration of the prior
    /// state.
    pub fn record_visibility(&mut self, state: VisibilityState, now: DateTime<Utc>) {
        if !self.sampled || !self.config.track_visibility {
            return;
        }

        let duration_ms = (now - self.visibility_since).num_milliseconds();
        self.visibility_since = now;

        if let Some(view) = self.session.page_views.last_mut() {
            view.visibility_changes.push(VisibilityChange {
                timestamp: now,
                state,
                duration_ms,
            });
        }

        self.queue_event(
            RumEventKind::Custom,
            serde_json::json!({
                "event_type": "visibility_change",
                "state": state,
                "duration_ms": duration_ms,
            }),
            now,
        );
    }

    /// Update the session's network info on a connection change.
    pub fn record_network_change(&mut self, info: NetworkInfo, now: DateTime<Utc>) {
        if !self.sampled || !self.config.track_network {
            return;
        }
        self.session.network_info = info.clone();
        self.queue_event(
            RumEventKind::Custom,
            serde_json::json!({ "event_type": "network_change", "network_info": info }),
            now,
        );
    }

    pub fn record_long_task(&mut self, start_time: f64, duration: f64, now: DateTime<Utc>) {
        if !self.sampled || !self.config.track_long_tasks || duration <= LONG_TASK_MS {
            return;
        }
        self.queue_event(
            RumEventKind::Performance,
            serde_json::json!({
                "event_type": "long_task",
                "start_time": start_time,
                "duration": duration,
            }),
            now,
        );
    }

    pub fn record_resource(
        &mut self,
        name: &str,
        duration: f64,
        transfer_size: u64,
        initiator_type: &str,
        now: DateTime<Utc>,
    ) {
        if !self.sampled || !self.config.track_resources {
            return;
        }
        if duration <= SLOW_RESOURCE_MS && transfer_size != 0 {
            return;
        }
        self.queue_event(
            RumEventKind::Performance,
            serde_json::json!({
                "event_type": "resource_timing",
                "name": name,
                "duration": duration,
                "transfer_size": transfer_size,
                "initiator_type": initiator_type,
            }),
            now,
        );
    }

    pub fn record_error(&mut self, message: &str, source: Option<&str>, now: DateTime<Utc>) {
        if !self.sampled {
            return;
        }
        self.queue_event(
            RumEventKind::Error,
            serde_json::json!({ "message": message, "source": source }),
            now,
        );
    }

    pub fn record_memory(&mut self, memory: MemoryUsage, now: DateTime<Utc>) {
        if !self.sampled || !self.config.track_memory || memory.used_percent <= HIGH_MEMORY_PERCENT
        {
            return;
        }
        self.queue_event(
            RumEventKind::Performance,
            serde_json::json!({ "event_type": "high_memory_usage", "memory": memory }),
            now,
        );
    }

    /// Append a periodic performance snapshot to the session.
    pub fn snapshot_performance(
        &mut self,
        url: &str,
        vitals: WebVitals,
        memory: Option<MemoryUsage>,
        now: DateTime<Utc>,
    ) {
        if !self.sampled {
            return;
        }
        let snapshot = PerformanceSnapshot {
            timestamp: now,
            url: url.to_string(),
            vitals,
            memory,
        };
        let data = serde_json::to_value(&snapshot).unwrap_or(serde_json::Value::Null);
        self.session.performance_snapshots.push(snapshot);
        self.queue_event(RumEventKind::Performance, data, now);
    }

    /// Drain the queue to the analytics sink (and the HTTP collector when
    /// configured). Network failures are logged and the batch dropped;
    /// there is no durable retry.
    pub fn flush(&mut self) {
        if self.queue.is_empty() {
            return;
        }
        let events = std::mem::take(&mut self.queue);
        let count = events.len();

        for event in &events {
            self.sink.track(
                AnalyticsEvent::new("rum_event", "RUM")
                    .label(format!("{:?}", event.kind).to_lowercase())
                    .params(serde_json::json!({
                        "session_id": event.session_id,
                        "event_data": event.data,
                    })),
            );
        }

        if let (Some(endpoint), Some(client)) = (self.config.endpoint.clone(), self.client.clone())
        {
            let body = serde_json::json!({
                "session_id": self.session.session_id,
                "events": events,
            });
            tokio::spawn(async move {
                if let Err(e) = client.post(&endpoint).json(&body).send().await {
                    tracing::warn!("SessionAggregator: batch delivery failed: {}", e);
                }
            });
        }

        tracing::debug!("SessionAggregator: flushed {} events", count);
    }

    /// Unload path: finalize the current page view and flush best-effort.
    pub fn finalize(&mut self, now: DateTime<Utc>) {
        if !self.sampled {
            return;
        }
        self.finalize_current_page_view(now);
        self.flush();
    }

    pub fn session_summary(&self, now: DateTime<Utc>) -> SessionSummary {
        SessionSummary {
            session_id: self.session.session_id.clone(),
            sampled: self.sampled,
            duration_ms: (now - self.session.start_time).num_milliseconds(),
            page_views: self.session.page_views.len(),
            interactions: self.session.interactions.len(),
            performance_snapshots: self.session.performance_snapshots.len(),
            device_info: self.session.device_info.clone(),
            network_info: self.session.network_info.clone(),
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    fn finalize_current_page_view(&mut self, now: DateTime<Utc>) {
        if let Some(view) = self.session.page_views.last_mut() {
            if view.time_on_page_ms == 0 {
                view.time_on_page_ms = (now - view.timestamp).num_milliseconds();
                view.scroll_depth = self.current_scroll_depth;
            }
        }
    }

    fn queue_event(&mut self, kind: RumEventKind, data: serde_json::Value, now: DateTime<Utc>) {
        self.queue.push(RumEvent {
            kind,
            timestamp: now,
            session_id: self.session.session_id.clone(),
            data,
        });
        if self.queue.len() >= self.config.batch_size {
            self.flush();
        }
    }
}

fn generate_session_id(now: DateTime<Utc>) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(9)
        .map(char::from)
        .collect();
    format!("{}-{}", now.timestamp_millis(), suffix.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::session::DomNode;
    use super::*;
    use crate::sink::RecordingSink;

    fn aggregator(
        config: RumConfig,
        sink: RecordingSink,
        draw: f64,
        now: DateTime<Utc>,
    ) -> SessionAggregator {
        SessionAggregator::with_sample_draw(
            config,
            DeviceInfo::default(),
            NetworkInfo::default(),
            Arc::new(sink),
            now,
            draw,
        )
    }

    #[test]
    fn test_zero_sample_rate_is_inert() {
        let sink = RecordingSink::new();
        for _ in 0..10_000 {
            let mut agg = SessionAggregator::new(
                RumConfig {
                    sample_rate: 0.0,
                    ..Default::default()
                },
                DeviceInfo::default(),
                NetworkInfo::default(),
                Arc::new(sink.clone()),
                Utc::now(),
            );
            assert!(!agg.is_sampled());
            assert!(agg.client.is_none(), "no HTTP client without an endpoint");
            agg.track_page_view("/", "Home", "", 100.0, 50.0, Utc::now());
            agg.track_interaction(
                &InputEvent::Scroll { depth_percent: 50 },
                Utc::now(),
            );
            agg.record_visibility(VisibilityState::Hidden, Utc::now());
            assert_eq!(agg.queued_events(), 0);
            assert!(agg.session().page_views.is_empty());
        }
        assert!(sink.is_empty());
    }

    #[test]
    fn test_full_sample_rate_tracks() {
        let sink = RecordingSink::new();
        let mut agg = aggregator(RumConfig::default(), sink, 0.999, Utc::now());
        agg.track_page_view("/", "Home", "", 100.0, 50.0, Utc::now());
        assert_eq!(agg.session().page_views.len(), 1);
        assert_eq!(agg.queued_events(), 1);
    }

    #[test]
    fn test_page_view_transition_finalizes_previous() {
        let sink = RecordingSink::new();
        let t0 = Utc::now();
        let mut agg = aggregator(RumConfig::default(), sink, 0.0, t0);

        agg.track_page_view("/a", "A", "", 100.0, 50.0, t0);
        agg.track_interaction(
            &InputEvent::Scroll { depth_percent: 60 },
            t0 + Duration::seconds(5),
        );

        let t1 = t0 + Duration::seconds(42);
        agg.track_page_view("/b", "B", "/a", 80.0, 40.0, t1);

        let first = &agg.session().page_views[0];
        assert_eq!(first.time_on_page_ms, 42_000);
        assert_eq!(first.scroll_depth, 60);

        // Scrolling on page B must not retroactively change A.
        agg.track_interaction(
            &InputEvent::Scroll { depth_percent: 90 },
            t1 + Duration::seconds(2),
        );
        assert_eq!(agg.session().page_views[0].scroll_depth, 60);
    }

    #[test]
    fn test_scroll_throttled_to_window() {
        let sink = RecordingSink::new();
        let t0 = Utc::now();
        let mut agg = aggregator(RumConfig::default(), sink, 0.0, t0);

        agg.track_interaction(&InputEvent::Scroll { depth_percent: 10 }, t0);
        agg.track_interaction(
            &InputEvent::Scroll { depth_percent: 20 },
            t0 + Duration::milliseconds(100),
        );
        agg.track_interaction(
            &InputEvent::Scroll { depth_percent: 30 },
            t0 + Duration::milliseconds(300),
        );
        assert_eq!(agg.session().interactions.len(), 2);
    }

    #[test]
    fn test_password_keypress_never_captured() {
        let sink = RecordingSink::new();
        let mut agg = aggregator(RumConfig::default(), sink, 0.0, Utc::now());
        let password_field = vec![DomNode {
            tag: "INPUT".into(),
            id: None,
            classes: vec![],
            input_type: Some("password".into()),
        }];

        agg.track_interaction(
            &InputEvent::Keypress {
                target: password_field.clone(),
                key: "Enter".into(),
            },
            Utc::now(),
        );
        // Non-navigation keys are skipped even on ordinary fields.
        agg.track_interaction(
            &InputEvent::Keypress {
                target: vec![DomNode {
                    tag: "INPUT".into(),
                    id: None,
                    classes: vec![],
                    input_type: Some("text".into()),
                }],
                key: "a".into(),
            },
            Utc::now(),
        );
        assert!(agg.session().interactions.is_empty());

        // Input events on password fields record only the field type.
        agg.track_interaction(&InputEvent::Input { target: password_field }, Utc::now());
        assert_eq!(
            agg.session().interactions[0].value.as_deref(),
            Some("password")
        );
    }

    #[test]
    fn test_batch_size_triggers_flush() {
        let sink = RecordingSink::new();
        let t0 = Utc::now();
        let mut agg = aggregator(
            RumConfig {
                batch_size: 3,
                ..Default::default()
            },
            sink.clone(),
            0.0,
            t0,
        );
        for i in 0..3i64 {
            agg.record_long_task(0.0, 80.0, t0 + Duration::seconds(i));
        }
        assert_eq!(agg.queued_events(), 0, "queue drained at batch size");
        assert_eq!(sink.len(), 3);
    }

    #[test]
    fn test_visibility_records_prior_state_duration() {
        let sink = RecordingSink::new();
        // The aggregator's visibility clock starts at its construction
        // time, so the expected duration must measure from the same t0.
        let t0 = Utc::now();
        let mut agg = aggregator(RumConfig::default(), sink, 0.0, t0);
        agg.track_page_view("/", "Home", "", 0.0, 0.0, t0);
        agg.record_visibility(VisibilityState::Hidden, t0 + Duration::seconds(7));

        let changes = &agg.session().page_views[0].visibility_changes;
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].duration_ms, 7_000);
        assert_eq!(changes[0].state, VisibilityState::Hidden);
    }

    #[test]
    fn test_finalize_flushes_queue() {
        let sink = RecordingSink::new();
        let t0 = Utc::now();
        let mut agg = aggregator(RumConfig::default(), sink.clone(), 0.0, t0);
        agg.track_page_view("/", "Home", "", 0.0, 0.0, t0);
        agg.finalize(t0 + Duration::seconds(10));
        assert_eq!(agg.queued_events(), 0);
        assert_eq!(sink.len(), 1);
        assert_eq!(agg.session().page_views[0].time_on_page_ms, 10_000);
    }
}
