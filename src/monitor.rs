//! The monitoring context: one per process, owning the collector, alert
//! manager, session aggregator, and reporter, and routing readings
//! between them.

use crate::alerts::{AlertManager, AlertSnapshot};
use crate::report::{Report, Reporter, ResourceSample};
use crate::rum::{InputEvent, MemoryUsage, SessionAggregator};
use crate::storage::{keys, Store, StoreError};
use crate::vitals::budget::{rate, BudgetReport, PerformanceBudgets, Rating};
use crate::vitals::{MetricCollector, MetricReading, PerformanceEntry, WebVitals};

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};

/// Resource loads slower than this are fed to the alert manager.
const SLOW_RESOURCE_ALERT_MS: f64 = 2000.0;

/// Current-vitals view for the API.
#[derive(Debug, Clone, Serialize)]
pub struct VitalsOverview {
    pub url: String,
    pub vitals: WebVitals,
    pub ratings: BTreeMap<String, Rating>,
    pub budget: BudgetReport,
    pub budget_failures: usize,
}

pub struct Monitor {
    collector: MetricCollector,
    pub alerts: AlertManager,
    pub rum: SessionAggregator,
    pub reporter: Reporter,
    budgets: PerformanceBudgets,
    pending: Arc<Mutex<Vec<MetricReading>>>,
    error_times: VecDeque<DateTime<Utc>>,
}

impl Monitor {
    pub fn new(
        mut collector: MetricCollector,
        alerts: AlertManager,
        rum: SessionAggregator,
        reporter: Reporter,
        budgets: PerformanceBudgets,
    ) -> Self {
        // Readings emitted during ingest are buffered here and routed to
        // the alert manager and reporter afterwards.
        let pending = Arc::new(Mutex::new(Vec::new()));
        let buffer = pending.clone();
        collector.subscribe(move |reading: &MetricReading| {
            buffer.lock().unwrap().push(reading.clone());
        });

        Self {
            collector,
            alerts,
            rum,
            reporter,
            budgets,
            pending,
            error_times: VecDeque::new(),
        }
    }

    /// Feed one raw performance entry through the whole pipeline.
    pub fn ingest_entry(&mut self, entry: &PerformanceEntry, now: DateTime<Utc>) {
        self.collector.ingest(entry, now);
        self.drain_readings(now);

        match entry {
            PerformanceEntry::Resource {
                name,
                duration,
                transfer_size,
                initiator_type,
            } => {
                self.rum
                    .record_resource(name, *duration, *transfer_size, initiator_type, now);
                self.reporter.record_resource(ResourceSample {
                    name: name.clone(),
                    duration: *duration,
                    transfer_size: *transfer_size,
                    initiator_type: initiator_type.clone(),
                });
                if *duration >= SLOW_RESOURCE_ALERT_MS {
                    self.alerts.observe_resource(name, *duration, now);
                }
            }
            PerformanceEntry::LongTask {
                start_time,
                duration,
            } => {
                self.rum.record_long_task(*start_time, *duration, now);
            }
            PerformanceEntry::Navigation { load_event_end, .. } => {
                if *load_event_end > 0.0 {
                    self.reporter.record_page_view(*load_event_end);
                }
            }
            _ => {}
        }
    }

    /// Record an application-defined timing.
    pub fn record_custom(&mut self, name: &str, value: f64, now: DateTime<Utc>) {
        self.collector.record_custom(name, value, now);
        self.drain_readings(now);
    }

    /// Feed one raw input event to the session aggregator.
    pub fn track_input(&mut self, event: &InputEvent, now: DateTime<Utc>) {
        self.rum.track_interaction(event, now);
    }

    /// Record a page error; the rolling per-minute rate feeds the alert
    /// manager.
    pub fn record_error(&mut self, message: &str, source: Option<&str>, now: DateTime<Utc>) {
        self.rum.record_error(message, source, now);
        self.error_times.push_back(now);
        let cutoff = now - Duration::seconds(60);
        while self.error_times.front().is_some_and(|t| *t < cutoff) {
            self.error_times.pop_front();
        }
        self.alerts
            .observe_error_rate(self.error_times.len() as f64, now);
    }

    pub fn record_memory(&mut self, memory: MemoryUsage, now: DateTime<Utc>) {
        self.rum.record_memory(memory, now);
        self.alerts.observe_memory(memory.used_percent, now);
    }

    /// Periodic alert pass: current vitals against thresholds plus
    /// auto-resolution.
    pub fn evaluate_alerts(&mut self, now: DateTime<Utc>) {
        let vitals = self.collector.vitals();
        self.alerts.evaluate_vitals(&vitals, now);
        self.alerts.tick(now);
    }

    /// Periodic history sample into the session record.
    pub fn sample_history(&mut self, now: DateTime<Utc>) {
        let vitals = self.collector.vitals();
        if vitals.any_observed() {
            let url = self.collector.url().to_string();
            self.rum.snapshot_performance(&url, vitals, None, now);
        }
    }

    /// Generate a report over the window since the last one.
    pub fn generate_report(&mut self, now: DateTime<Utc>) -> Report {
        let alerts = self.alerts.alerts_in_period(self.reporter.window_start(), now);
        self.reporter.generate(alerts, now)
    }

    pub fn vitals_overview(&self) -> VitalsOverview {
        let vitals = self.collector.vitals();
        let ratings = vitals
            .named()
            .into_iter()
            .map(|(name, value)| (name.as_str().to_string(), rate(&name, value)))
            .collect();
        VitalsOverview {
            url: self.collector.url().to_string(),
            budget: self.budgets.status(&vitals),
            budget_failures: self.budgets.failure_count(&vitals),
            vitals,
            ratings,
        }
    }

    /// Persist restart-surviving state. Best-effort on the unload path.
    pub fn checkpoint(&self, store: &Store) -> Result<(), StoreError> {
        store.put_json(keys::ALERTS, &self.alerts.snapshot())?;
        store.put_blob(keys::LIFETIME_DIGESTS, &self.reporter.checkpoint())?;
        Ok(())
    }

    /// Restore checkpointed state. Missing or corrupt snapshots restore
    /// nothing.
    pub fn restore(&mut self, store: &Store) -> Result<(), StoreError> {
        if let Some(snapshot) = store.get_json::<AlertSnapshot>(keys::ALERTS)? {
            self.alerts.restore(snapshot);
        }
        if let Some(blob) = store.get_blob(keys::LIFETIME_DIGESTS)? {
            self.reporter.restore(&blob);
        }
        Ok(())
    }

    /// Unload: finalize the page view, flush the event queue, checkpoint.
    pub fn finalize(&mut self, store: &Store, now: DateTime<Utc>) {
        self.rum.finalize(now);
        if let Err(e) = self.checkpoint(store) {
            tracing::warn!("Monitor: final checkpoint failed: {}", e);
        }
    }

    fn drain_readings(&mut self, now: DateTime<Utc>) {
        let readings: Vec<MetricReading> = self.pending.lock().unwrap().drain(..).collect();
        for reading in readings {
            if let Some(value) = reading.value {
                self.reporter.record_sample(&reading.name, value, reading.timestamp);
                self.alerts.observe_metric(&reading.name, value, now);
            }
        }
    }
}
