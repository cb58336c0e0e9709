//! Alert manager: de-duplicated, auto-expiring performance alerts.
//!
//! Lifecycle per alert: none -> active(warning|critical) -> resolved.
//! Creation is suppressed while an unresolved alert for the same
//! (metric, category) pair is younger than the suppression window; every
//! alert auto-resolves after the resolution window unless resolved first.

use crate::sink::{AnalyticsEvent, AnalyticsSink};
use crate::vitals::budget::{AlertThresholds, Threshold};
use crate::vitals::{MetricName, WebVitals};

use chrono::{DateTime, Duration, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Alert severity. Critical is checked before warning and takes
/// precedence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Critical,
}

/// What subsystem the alert concerns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertCategory {
    Performance,
    Error,
    Resource,
    Memory,
    User,
}

impl AlertCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertCategory::Performance => "performance",
            AlertCategory::Error => "error",
            AlertCategory::Resource => "resource",
            AlertCategory::Memory => "memory",
            AlertCategory::User => "user",
        }
    }
}

/// A single alert record. Owned exclusively by the manager; external
/// consumers only ever see clones.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    pub severity: Severity,
    pub category: AlertCategory,
    pub metric: String,
    pub value: f64,
    pub threshold: f64,
    pub created_at: DateTime<Utc>,
    pub url: String,
    /// Extra context, e.g. the offending resource URL.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub resolved: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
}

/// Destination notified exactly once per created alert.
pub trait AlertSink: Send + Sync {
    fn notify(&self, alert: &Alert);
}

/// Logs alerts through tracing, error level for critical.
pub struct ConsoleSink;

impl AlertSink for ConsoleSink {
    fn notify(&self, alert: &Alert) {
        match alert.severity {
            Severity::Critical => tracing::error!(
                metric = %alert.metric,
                value = alert.value,
                threshold = alert.threshold,
                "critical alert"
            ),
            Severity::Warning => tracing::warn!(
                metric = %alert.metric,
                value = alert.value,
                threshold = alert.threshold,
                "warning alert"
            ),
        }
    }
}

/// Forwards alerts to the analytics sink as structured events.
pub struct AnalyticsAlertSink {
    sink: Arc<dyn AnalyticsSink>,
}

impl AnalyticsAlertSink {
    pub fn new(sink: Arc<dyn AnalyticsSink>) -> Self {
        Self { sink }
    }
}

impl AlertSink for AnalyticsAlertSink {
    fn notify(&self, alert: &Alert) {
        let severity = match alert.severity {
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        };
        self.sink.track(
            AnalyticsEvent::new("performance_alert", "Performance")
                .label(format!("{}_{}", severity, alert.metric))
                .value(alert.value.round() as i64)
                .params(serde_json::json!({
                    "severity": severity,
                    "metric": alert.metric,
                    "threshold": alert.threshold,
                    "url": alert.url,
                })),
        );
    }
}

/// POSTs alerts to a webhook. Delivery is spawned; failures are logged,
/// never retried, and never roll back the alert.
pub struct WebhookSink {
    url: String,
    client: reqwest::Client,
}

impl WebhookSink {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            client: reqwest::Client::new(),
        }
    }
}

impl AlertSink for WebhookSink {
    fn notify(&self, alert: &Alert) {
        let client = self.client.clone();
        let url = self.url.clone();
        let body = serde_json::json!({
            "type": "performance_alert",
            "alert": alert,
            "timestamp": Utc::now().to_rfc3339(),
        });
        tokio::spawn(async move {
            if let Err(e) = client.post(&url).json(&body).send().await {
                tracing::warn!("WebhookSink: notification failed: {}", e);
            }
        });
    }
}

/// Serializable checkpoint of recent alerts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AlertSnapshot {
    pub alerts: Vec<Alert>,
}

/// How many alerts a checkpoint keeps.
const SNAPSHOT_LIMIT: usize = 50;

pub struct AlertManager {
    thresholds: AlertThresholds,
    page_url: String,
    alerts: Vec<Alert>,
    sinks: Vec<Box<dyn AlertSink>>,
    suppression_window: Duration,
    resolve_after: Duration,
}

impl AlertManager {
    pub fn new(thresholds: AlertThresholds, page_url: impl Into<String>) -> Self {
        Self {
            thresholds,
            page_url: page_url.into(),
            alerts: Vec::new(),
            sinks: Vec::new(),
            suppression_window: Duration::minutes(5),
            resolve_after: Duration::minutes(10),
        }
    }

    pub fn add_sink(&mut self, sink: Box<dyn AlertSink>) {
        self.sinks.push(sink);
    }

    /// Check a full vitals snapshot against the alert thresholds.
    pub fn evaluate_vitals(&mut self, vitals: &WebVitals, now: DateTime<Utc>) {
        let metrics = [
            (MetricName::Lcp, vitals.lcp),
            (MetricName::Fid, vitals.fid),
            (MetricName::Cls, vitals.cls),
            (MetricName::Fcp, vitals.fcp),
            (MetricName::Ttfb, vitals.ttfb),
            (MetricName::Inp, vitals.inp),
        ];
        for (metric, value) in metrics {
            if let Some(value) = value {
                self.observe_metric(&metric, value, now);
            }
        }
    }

    /// Check one metric reading. Unobserved metrics never alert.
    pub fn observe_metric(&mut self, metric: &MetricName, value: f64, now: DateTime<Utc>) {
        if let Some(threshold) = self.thresholds.for_metric(metric) {
            self.check(
                AlertCategory::Performance,
                metric.as_str().to_string(),
                value,
                threshold,
                None,
                now,
            );
        }
    }

    /// Check a resource load duration against the slow-resource
    /// thresholds.
    pub fn observe_resource(&mut self, name: &str, duration_ms: f64, now: DateTime<Utc>) {
        let threshold = self.thresholds.slow_resources;
        self.check(
            AlertCategory::Resource,
            "resource_load_time".to_string(),
            duration_ms,
            threshold,
            Some(name.to_string()),
            now,
        );
    }

    /// Check heap usage (percent of the limit).
    pub fn observe_memory(&mut self, used_percent: f64, now: DateTime<Utc>) {
        let threshold = self.thresholds.memory_usage;
        self.check(
            AlertCategory::Memory,
            "memory_usage".to_string(),
            used_percent,
            threshold,
            None,
            now,
        );
    }

    /// Check the error rate (errors per minute).
    pub fn observe_error_rate(&mut self, errors_per_minute: f64, now: DateTime<Utc>) {
        let threshold = self.thresholds.error_rate;
        self.check(
            AlertCategory::Error,
            "error_rate".to_string(),
            errors_per_minute,
            threshold,
            None,
            now,
        );
    }

    /// Auto-resolve alerts past the resolution window. Called from the
    /// periodic driver.
    pub fn tick(&mut self, now: DateTime<Utc>) {
        let cutoff = self.resolve_after;
        for alert in &mut self.alerts {
            if !alert.resolved && now - alert.created_at >= cutoff {
                alert.resolved = true;
                alert.resolved_at = Some(now);
            }
        }
    }

    /// Resolve a specific alert.
    pub fn resolve(&mut self, id: &str, now: DateTime<Utc>) -> bool {
        match self.alerts.iter_mut().find(|a| a.id == id && !a.resolved) {
            Some(alert) => {
                alert.resolved = true;
                alert.resolved_at = Some(now);
                true
            }
            None => false,
        }
    }

    /// Unresolved alerts, in creation order.
    pub fn active_alerts(&self) -> Vec<Alert> {
        self.alerts.iter().filter(|a| !a.resolved).cloned().collect()
    }

    /// All alerts created within a period, for report assembly.
    pub fn alerts_in_period(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<Alert> {
        self.alerts
            .iter()
            .filter(|a| a.created_at >= start && a.created_at <= end)
            .cloned()
            .collect()
    }

    pub fn active_count(&self) -> usize {
        self.alerts.iter().filter(|a| !a.resolved).count()
    }

    /// Checkpoint the most recent alerts.
    pub fn snapshot(&self) -> AlertSnapshot {
        let skip = self.alerts.len().saturating_sub(SNAPSHOT_LIMIT);
        AlertSnapshot {
            alerts: self.alerts[skip..].to_vec(),
        }
    }

    /// Restore from a checkpoint, replacing current state.
    pub fn restore(&mut self, snapshot: AlertSnapshot) {
        self.alerts = snapshot.alerts;
    }

    fn check(
        &mut self,
        category: AlertCategory,
        metric: String,
        value: f64,
        threshold: Threshold,
        detail: Option<String>,
        now: DateTime<Utc>,
    ) {
        // Critical takes precedence over warning.
        let (severity, crossed) = if value >= threshold.critical {
            (Severity::Critical, threshold.critical)
        } else if value >= threshold.warning {
            (Severity::Warning, threshold.warning)
        } else {
            return;
        };

        let suppressed = self.alerts.iter().any(|a| {
            a.metric == metric
                && a.category == category
                && !a.resolved
                && now - a.created_at < self.suppression_window
        });
        if suppressed {
            return;
        }

        let alert = Alert {
            id: generate_alert_id(now),
            severity,
            category,
            metric,
            value,
            threshold: crossed,
            created_at: now,
            url: self.page_url.clone(),
            detail,
            resolved: false,
            resolved_at: None,
        };

        for sink in &self.sinks {
            sink.notify(&alert);
        }
        self.alerts.push(alert);
    }
}

fn generate_alert_id(now: DateTime<Utc>) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(9)
        .map(char::from)
        .collect();
    format!("alert_{}_{}", now.timestamp_millis(), suffix.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc as StdArc, Mutex};

    #[derive(Clone, Default)]
    struct RecordingAlertSink {
        seen: StdArc<Mutex<Vec<Alert>>>,
    }

    impl AlertSink for RecordingAlertSink {
        fn notify(&self, alert: &Alert) {
            self.seen.lock().unwrap().push(alert.clone());
        }
    }

    fn manager() -> AlertManager {
        AlertManager::new(AlertThresholds::default(), "https://example.test/")
    }

    #[test]
    fn test_severity_classification_critical_first() {
        let mut m = manager();
        let now = Utc::now();
        m.observe_metric(&MetricName::Lcp, 5000.0, now);
        let active = m.active_alerts();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].severity, Severity::Critical);
        assert_eq!(active[0].threshold, 4000.0);
    }

    #[test]
    fn test_below_warning_creates_nothing() {
        let mut m = manager();
        m.observe_metric(&MetricName::Lcp, 2000.0, Utc::now());
        assert!(m.active_alerts().is_empty());
    }

    #[test]
    fn test_suppression_within_window_then_new_after_resolution() {
        let mut m = manager();
        let t0 = Utc::now();

        m.observe_metric(&MetricName::Lcp, 3000.0, t0);
        m.observe_metric(&MetricName::Lcp, 3200.0, t0 + Duration::minutes(2));
        assert_eq!(m.active_alerts().len(), 1, "second reading suppressed");

        // After the auto-resolution window the first alert resolves and a
        // third reading creates a fresh alert.
        let t1 = t0 + Duration::minutes(11);
        m.tick(t1);
        assert!(m.active_alerts().is_empty());
        m.observe_metric(&MetricName::Lcp, 3100.0, t1);
        assert_eq!(m.active_alerts().len(), 1);
        assert_eq!(m.active_count(), 1);
    }

    #[test]
    fn test_distinct_categories_not_suppressed_together() {
        let mut m = manager();
        let now = Utc::now();
        m.observe_metric(&MetricName::Ttfb, 2000.0, now);
        m.observe_memory(95.0, now);
        m.observe_error_rate(20.0, now);
        assert_eq!(m.active_alerts().len(), 3);
    }

    #[test]
    fn test_active_alerts_creation_order() {
        let mut m = manager();
        let t0 = Utc::now();
        m.observe_metric(&MetricName::Fcp, 3500.0, t0);
        m.observe_memory(80.0, t0 + Duration::seconds(1));
        m.observe_resource("/big.js", 6000.0, t0 + Duration::seconds(2));

        let active = m.active_alerts();
        let metrics: Vec<&str> = active.iter().map(|a| a.metric.as_str()).collect();
        assert_eq!(metrics, ["fcp", "memory_usage", "resource_load_time"]);
        assert_eq!(active[2].detail.as_deref(), Some("/big.js"));
    }

    #[test]
    fn test_sinks_notified_exactly_once_per_alert() {
        let mut m = manager();
        let sink = RecordingAlertSink::default();
        m.add_sink(Box::new(sink.clone()));

        let t0 = Utc::now();
        m.observe_metric(&MetricName::Cls, 0.3, t0);
        m.observe_metric(&MetricName::Cls, 0.4, t0 + Duration::minutes(1)); // suppressed
        assert_eq!(sink.seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_manual_resolve() {
        let mut m = manager();
        let now = Utc::now();
        m.observe_metric(&MetricName::Inp, 600.0, now);
        let id = m.active_alerts()[0].id.clone();
        assert!(m.resolve(&id, now));
        assert!(!m.resolve(&id, now));
        assert!(m.active_alerts().is_empty());
    }

    #[test]
    fn test_snapshot_roundtrip_and_limit() {
        let mut m = manager();
        let t0 = Utc::now();
        // Distinct metrics avoid suppression.
        for i in 0..60i64 {
            m.observe_resource(&format!("/r{i}"), 6000.0, t0 + Duration::minutes(11 * i));
            m.tick(t0 + Duration::minutes(11 * i));
        }
        let snap = m.snapshot();
        assert!(snap.alerts.len() <= 50);

        let json = serde_json::to_string(&snap).unwrap();
        let back: AlertSnapshot = serde_json::from_str(&json).unwrap();
        let mut fresh = manager();
        fresh.restore(back);
        assert_eq!(fresh.snapshot().alerts.len(), snap.alerts.len());
    }
}
