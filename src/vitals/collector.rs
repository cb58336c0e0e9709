//! Metric collector: normalizes raw performance entries into readings.

use super::{Capabilities, EntryKind, MetricName, MetricReading, PerformanceEntry, WebVitals};

use chrono::{DateTime, Utc};
use std::collections::HashSet;
use thiserror::Error;

/// Collector error types.
#[derive(Error, Debug)]
pub enum CollectError {
    #[error("entry kind {0} is not supported in this environment")]
    Unsupported(&'static str),
}

/// Handle returned by [`MetricCollector::subscribe`]; pass it back to
/// [`MetricCollector::unsubscribe`] to cancel delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerHandle(u64);

type Listener = Box<dyn FnMut(&MetricReading) + Send>;

/// Tracks Core Web Vitals from a stream of performance entries.
///
/// Each metric follows its own accumulation rule; readings fan out to
/// registered listeners as they are finalized or superseded. Observation of
/// an unsupported entry kind degrades that single metric to permanently
/// unobserved and is logged once.
pub struct MetricCollector {
    url: String,
    capabilities: Capabilities,
    observed: HashSet<EntryKind>,
    unsupported: HashSet<EntryKind>,

    lcp: Option<f64>,
    fid: Option<f64>,
    cls_raw: f64,
    cls_seen: bool,
    fcp: Option<f64>,
    ttfb: Option<f64>,
    inp: Option<f64>,

    listeners: Vec<(u64, Listener)>,
    next_listener_id: u64,
}

impl MetricCollector {
    /// Create a collector for the given page URL, registering an observer
    /// for every vitals-bearing entry kind the environment supports.
    pub fn new(url: impl Into<String>, capabilities: Capabilities) -> Self {
        let mut collector = Self {
            url: url.into(),
            capabilities,
            observed: HashSet::new(),
            unsupported: HashSet::new(),
            lcp: None,
            fid: None,
            cls_raw: 0.0,
            cls_seen: false,
            fcp: None,
            ttfb: None,
            inp: None,
            listeners: Vec::new(),
            next_listener_id: 0,
        };

        for kind in EntryKind::ALL {
            if let Err(e) = collector.observe(kind) {
                tracing::warn!("MetricCollector: {}", e);
            }
        }

        collector
    }

    /// Register interest in an entry kind. Failure is non-fatal: the
    /// metric backed by that kind simply stays unobserved.
    pub fn observe(&mut self, kind: EntryKind) -> Result<(), CollectError> {
        if !self.capabilities.probe(kind) {
            self.unsupported.insert(kind);
            return Err(CollectError::Unsupported(kind.as_str()));
        }
        self.observed.insert(kind);
        Ok(())
    }

    /// Register a reading listener; readings are delivered in
    /// registration order.
    pub fn subscribe(&mut self, listener: impl FnMut(&MetricReading) + Send + 'static) -> ListenerHandle {
        let id = self.next_listener_id;
        self.next_listener_id += 1;
        self.listeners.push((id, Box::new(listener)));
        ListenerHandle(id)
    }

    /// Cancel a listener. Returns false if the handle was already removed.
    pub fn unsubscribe(&mut self, handle: ListenerHandle) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(id, _)| *id != handle.0);
        self.listeners.len() != before
    }

    /// Feed one raw entry through the per-metric state machines.
    pub fn ingest(&mut self, entry: &PerformanceEntry, now: DateTime<Utc>) {
        if !self.observed.contains(&entry.kind()) {
            return;
        }

        match entry {
            // The last candidate seen supersedes all prior ones.
            PerformanceEntry::LargestContentfulPaint { start_time } => {
                self.lcp = Some(*start_time);
                self.emit(MetricName::Lcp, *start_time, now);
            }
            // First input only; later inputs belong to INP.
            PerformanceEntry::FirstInput {
                start_time,
                processing_start,
            } => {
                if self.fid.is_none() {
                    let delay = processing_start - start_time;
                    self.fid = Some(delay);
                    self.emit(MetricName::Fid, delay, now);
                }
            }
            // Running sum over the page lifetime, input-adjacent shifts
            // excluded. Never resets.
            PerformanceEntry::LayoutShift {
                value,
                had_recent_input,
            } => {
                if !had_recent_input {
                    self.cls_raw += value;
                    self.cls_seen = true;
                    self.emit(MetricName::Cls, self.cls_rounded(), now);
                }
            }
            // First match wins, subsequent matches ignored.
            PerformanceEntry::Paint { name, start_time } => {
                if name == "first-contentful-paint" && self.fcp.is_none() {
                    self.fcp = Some(*start_time);
                    self.emit(MetricName::Fcp, *start_time, now);
                }
            }
            // INP tracks the maximum observed delay, not the first.
            PerformanceEntry::Event {
                start_time,
                processing_end,
            } => {
                let delay = processing_end - start_time;
                if delay > 0.0 && self.inp.map_or(true, |max| delay > max) {
                    self.inp = Some(delay);
                    self.emit(MetricName::Inp, delay, now);
                }
            }
            // Computed once; does not update afterward.
            PerformanceEntry::Navigation {
                fetch_start,
                response_start,
                ..
            } => {
                if self.ttfb.is_none() {
                    let ttfb = response_start - fetch_start;
                    self.ttfb = Some(ttfb);
                    self.emit(MetricName::Ttfb, ttfb, now);
                }
            }
            // Resource and long-task entries carry no vital; downstream
            // consumers receive them through their own channels.
            PerformanceEntry::Resource { .. } | PerformanceEntry::LongTask { .. } => {}
        }
    }

    /// Record an application-defined timing.
    pub fn record_custom(&mut self, name: &str, value: f64, now: DateTime<Utc>) {
        self.emit(MetricName::Custom(name.to_string()), value, now);
    }

    /// Snapshot of the six core vitals. CLS is rounded to 4 decimal places
    /// for reporting; full precision stays internal.
    pub fn vitals(&self) -> WebVitals {
        WebVitals {
            lcp: self.lcp,
            fid: self.fid,
            cls: self.cls_seen.then(|| self.cls_rounded()),
            fcp: self.fcp,
            ttfb: self.ttfb,
            inp: self.inp,
        }
    }

    /// Full-precision CLS accumulator, for internal consumers.
    pub fn cls_raw(&self) -> Option<f64> {
        self.cls_seen.then_some(self.cls_raw)
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn cls_rounded(&self) -> f64 {
        (self.cls_raw * 10_000.0).round() / 10_000.0
    }

    fn emit(&mut self, name: MetricName, value: f64, now: DateTime<Utc>) {
        let reading = MetricReading {
            name,
            value: Some(value),
            timestamp: now,
            url: self.url.clone(),
        };
        for (_, listener) in &mut self.listeners {
            listener(&reading);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn collector() -> MetricCollector {
        MetricCollector::new("https://example.test/", Capabilities::full())
    }

    #[test]
    fn test_cls_accumulates_and_excludes_recent_input() {
        let mut c = collector();
        let now = Utc::now();
        for (value, had_recent_input) in [(0.02, false), (0.01, true), (0.03, false)] {
            c.ingest(
                &PerformanceEntry::LayoutShift {
                    value,
                    had_recent_input,
                },
                now,
            );
        }
        let cls = c.vitals().cls.unwrap();
        assert!((cls - 0.05).abs() < 1e-9, "cls = {cls}");
    }

    #[test]
    fn test_cls_rounds_for_reporting_only() {
        let mut c = collector();
        let now = Utc::now();
        c.ingest(
            &PerformanceEntry::LayoutShift {
                value: 0.123456789,
                had_recent_input: false,
            },
            now,
        );
        assert_eq!(c.vitals().cls, Some(0.1235));
        assert!((c.cls_raw().unwrap() - 0.123456789).abs() < 1e-12);
    }

    #[test]
    fn test_lcp_last_candidate_wins() {
        let mut c = collector();
        let now = Utc::now();
        c.ingest(&PerformanceEntry::LargestContentfulPaint { start_time: 900.0 }, now);
        c.ingest(&PerformanceEntry::LargestContentfulPaint { start_time: 2100.0 }, now);
        assert_eq!(c.vitals().lcp, Some(2100.0));
    }

    #[test]
    fn test_fcp_first_match_wins_and_ignores_other_paints() {
        let mut c = collector();
        let now = Utc::now();
        c.ingest(
            &PerformanceEntry::Paint {
                name: "first-paint".into(),
                start_time: 100.0,
            },
            now,
        );
        assert_eq!(c.vitals().fcp, None);
        c.ingest(
            &PerformanceEntry::Paint {
                name: "first-contentful-paint".into(),
                start_time: 220.0,
            },
            now,
        );
        c.ingest(
            &PerformanceEntry::Paint {
                name: "first-contentful-paint".into(),
                start_time: 980.0,
            },
            now,
        );
        assert_eq!(c.vitals().fcp, Some(220.0));
    }

    #[test]
    fn test_inp_tracks_maximum_delay() {
        let mut c = collector();
        let now = Utc::now();
        c.ingest(
            &PerformanceEntry::Event {
                start_time: 0.0,
                processing_end: 120.0,
            },
            now,
        );
        c.ingest(
            &PerformanceEntry::Event {
                start_time: 500.0,
                processing_end: 540.0,
            },
            now,
        );
        assert_eq!(c.vitals().inp, Some(120.0));
    }

    #[test]
    fn test_ttfb_computed_once() {
        let mut c = collector();
        let now = Utc::now();
        let nav = |fetch_start, response_start| PerformanceEntry::Navigation {
            fetch_start,
            response_start,
            dom_interactive: 0.0,
            load_event_end: 0.0,
        };
        c.ingest(&nav(10.0, 250.0), now);
        c.ingest(&nav(0.0, 900.0), now);
        assert_eq!(c.vitals().ttfb, Some(240.0));
    }

    #[test]
    fn test_unsupported_kind_stays_unobserved() {
        let caps = Capabilities::with_kinds(&[EntryKind::Paint]);
        let mut c = MetricCollector::new("https://example.test/", caps);
        let now = Utc::now();
        c.ingest(
            &PerformanceEntry::LayoutShift {
                value: 0.5,
                had_recent_input: false,
            },
            now,
        );
        assert_eq!(c.vitals().cls, None);
    }

    #[test]
    fn test_listener_fan_out_and_cancellation() {
        let mut c = collector();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let handle = c.subscribe(move |reading| {
            sink.lock().unwrap().push(reading.name.clone());
        });

        let now = Utc::now();
        c.ingest(&PerformanceEntry::LargestContentfulPaint { start_time: 1.0 }, now);
        assert_eq!(seen.lock().unwrap().as_slice(), &[MetricName::Lcp]);

        assert!(c.unsubscribe(handle));
        assert!(!c.unsubscribe(handle));
        c.ingest(&PerformanceEntry::LargestContentfulPaint { start_time: 2.0 }, now);
        assert_eq!(seen.lock().unwrap().len(), 1);
    }
}
