//! Analytics sink: fire-and-forget structured events.

use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

/// A structured analytics event. Delivery is at-most-once; the core never
/// waits on or retries a sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyticsEvent {
    pub action: String,
    pub category: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_parameters: Option<serde_json::Value>,
}

impl AnalyticsEvent {
    pub fn new(action: impl Into<String>, category: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            category: category.into(),
            label: None,
            value: None,
            custom_parameters: None,
        }
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn value(mut self, value: i64) -> Self {
        self.value = Some(value);
        self
    }

    pub fn params(mut self, params: serde_json::Value) -> Self {
        self.custom_parameters = Some(params);
        self
    }
}

/// Destination for analytics events.
pub trait AnalyticsSink: Send + Sync {
    fn track(&self, event: AnalyticsEvent);
}

/// Sink that logs events through tracing.
pub struct LogSink;

impl AnalyticsSink for LogSink {
    fn track(&self, event: AnalyticsEvent) {
        tracing::info!(
            action = %event.action,
            category = %event.category,
            label = event.label.as_deref().unwrap_or(""),
            "analytics event"
        );
    }
}

/// Sink that POSTs each event to an HTTP collector. Sends are spawned and
/// never awaited by the caller; failures are logged and the event dropped.
pub struct HttpSink {
    endpoint: String,
    client: reqwest::Client,
}

impl HttpSink {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            client: reqwest::Client::new(),
        }
    }
}

impl AnalyticsSink for HttpSink {
    fn track(&self, event: AnalyticsEvent) {
        let client = self.client.clone();
        let endpoint = self.endpoint.clone();
        tokio::spawn(async move {
            if let Err(e) = client.post(&endpoint).json(&event).send().await {
                tracing::warn!("HttpSink: failed to deliver event: {}", e);
            }
        });
    }
}

/// Sink that records events in memory, for assertions in tests and for
/// the session summary endpoint's recent-events view.
#[derive(Clone, Default)]
pub struct RecordingSink {
    events: Arc<Mutex<Vec<AnalyticsEvent>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AnalyticsEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.events.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl AnalyticsSink for RecordingSink {
    fn track(&self, event: AnalyticsEvent) {
        self.events.lock().unwrap().push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization_skips_empty_fields() {
        let event = AnalyticsEvent::new("performance_metric", "Performance");
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["action"], "performance_metric");
        assert!(json.get("label").is_none());
        assert!(json.get("value").is_none());

        let full = AnalyticsEvent::new("performance_alert", "Performance")
            .label("critical_lcp")
            .value(4200)
            .params(serde_json::json!({"metric": "lcp"}));
        let json = serde_json::to_value(&full).unwrap();
        assert_eq!(json["value"], 4200);
        assert_eq!(json["custom_parameters"]["metric"], "lcp");
    }

    #[test]
    fn test_recording_sink_collects() {
        let sink = RecordingSink::new();
        sink.track(AnalyticsEvent::new("a", "c"));
        sink.track(AnalyticsEvent::new("b", "c"));
        assert_eq!(sink.len(), 2);
        assert_eq!(sink.events()[0].action, "a");
    }
}
