//! Web-vitals metric types and the performance-entry stream.
//!
//! The browser's performance-observation facility is modeled as a stream of
//! [`PerformanceEntry`] values. A [`Capabilities`] probe stands in for
//! feature detection: entry kinds absent from the probe never produce
//! readings, and the corresponding metric stays unobserved (`None`).

pub mod budget;
pub mod collector;
pub mod digest;

pub use collector::MetricCollector;

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Names of the metrics the collector can produce.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MetricName {
    Lcp,
    Fid,
    Cls,
    Fcp,
    Ttfb,
    Inp,
    /// Application-defined timing, identified by its label.
    Custom(String),
}

impl MetricName {
    pub fn as_str(&self) -> &str {
        match self {
            MetricName::Lcp => "lcp",
            MetricName::Fid => "fid",
            MetricName::Cls => "cls",
            MetricName::Fcp => "fcp",
            MetricName::Ttfb => "ttfb",
            MetricName::Inp => "inp",
            MetricName::Custom(name) => name,
        }
    }
}

impl fmt::Display for MetricName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single normalized metric observation.
///
/// `value` is `None` until the metric has actually been observed; a missing
/// observation is never reported as zero. Readings are immutable once
/// recorded.
#[derive(Debug, Clone)]
pub struct MetricReading {
    pub name: MetricName,
    pub value: Option<f64>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub url: String,
}

/// Raw performance entries, shaped after the browser performance timeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum PerformanceEntry {
    LargestContentfulPaint {
        start_time: f64,
    },
    FirstInput {
        start_time: f64,
        processing_start: f64,
    },
    LayoutShift {
        value: f64,
        had_recent_input: bool,
    },
    Paint {
        name: String,
        start_time: f64,
    },
    Event {
        start_time: f64,
        processing_end: f64,
    },
    Navigation {
        fetch_start: f64,
        response_start: f64,
        dom_interactive: f64,
        load_event_end: f64,
    },
    Resource {
        name: String,
        duration: f64,
        transfer_size: u64,
        initiator_type: String,
    },
    LongTask {
        start_time: f64,
        duration: f64,
    },
}

impl PerformanceEntry {
    pub fn kind(&self) -> EntryKind {
        match self {
            PerformanceEntry::LargestContentfulPaint { .. } => EntryKind::LargestContentfulPaint,
            PerformanceEntry::FirstInput { .. } => EntryKind::FirstInput,
            PerformanceEntry::LayoutShift { .. } => EntryKind::LayoutShift,
            PerformanceEntry::Paint { .. } => EntryKind::Paint,
            PerformanceEntry::Event { .. } => EntryKind::Event,
            PerformanceEntry::Navigation { .. } => EntryKind::Navigation,
            PerformanceEntry::Resource { .. } => EntryKind::Resource,
            PerformanceEntry::LongTask { .. } => EntryKind::LongTask,
        }
    }
}

/// The observable entry classes, used for capability probing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryKind {
    LargestContentfulPaint,
    FirstInput,
    LayoutShift,
    Paint,
    Event,
    Navigation,
    Resource,
    LongTask,
}

impl EntryKind {
    pub const ALL: [EntryKind; 8] = [
        EntryKind::LargestContentfulPaint,
        EntryKind::FirstInput,
        EntryKind::LayoutShift,
        EntryKind::Paint,
        EntryKind::Event,
        EntryKind::Navigation,
        EntryKind::Resource,
        EntryKind::LongTask,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntryKind::LargestContentfulPaint => "largest-contentful-paint",
            EntryKind::FirstInput => "first-input",
            EntryKind::LayoutShift => "layout-shift",
            EntryKind::Paint => "paint",
            EntryKind::Event => "event",
            EntryKind::Navigation => "navigation",
            EntryKind::Resource => "resource",
            EntryKind::LongTask => "longtask",
        }
    }
}

/// Which entry kinds the current environment can actually observe.
///
/// Callers branch on presence, never on a failed registration.
#[derive(Debug, Clone)]
pub struct Capabilities {
    supported: HashSet<EntryKind>,
}

impl Capabilities {
    /// Every entry kind available.
    pub fn full() -> Self {
        Self {
            supported: EntryKind::ALL.into_iter().collect(),
        }
    }

    /// Only the given kinds available.
    pub fn with_kinds(kinds: &[EntryKind]) -> Self {
        Self {
            supported: kinds.iter().copied().collect(),
        }
    }

    pub fn probe(&self, kind: EntryKind) -> bool {
        self.supported.contains(&kind)
    }
}

/// Point-in-time snapshot of the six core vitals.
///
/// CLS is pre-rounded to 4 decimal places here; the collector keeps full
/// precision internally.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct WebVitals {
    pub lcp: Option<f64>,
    pub fid: Option<f64>,
    pub cls: Option<f64>,
    pub fcp: Option<f64>,
    pub ttfb: Option<f64>,
    pub inp: Option<f64>,
}

impl WebVitals {
    /// The six vitals with their names, observed or not.
    pub fn named(&self) -> [(MetricName, Option<f64>); 6] {
        [
            (MetricName::Lcp, self.lcp),
            (MetricName::Fid, self.fid),
            (MetricName::Cls, self.cls),
            (MetricName::Fcp, self.fcp),
            (MetricName::Ttfb, self.ttfb),
            (MetricName::Inp, self.inp),
        ]
    }

    /// True when at least one vital has been observed.
    pub fn any_observed(&self) -> bool {
        self.lcp.is_some()
            || self.fid.is_some()
            || self.cls.is_some()
            || self.fcp.is_some()
            || self.ttfb.is_some()
            || self.inp.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_deserializes_from_tagged_json() {
        let entry: PerformanceEntry = serde_json::from_str(
            r#"{"type":"layout-shift","value":0.02,"had_recent_input":false}"#,
        )
        .unwrap();
        assert!(matches!(
            entry,
            PerformanceEntry::LayoutShift {
                value,
                had_recent_input: false,
            } if (value - 0.02).abs() < f64::EPSILON
        ));
        assert_eq!(entry.kind(), EntryKind::LayoutShift);
    }

    #[test]
    fn test_capability_probe() {
        let caps = Capabilities::with_kinds(&[EntryKind::Paint, EntryKind::Navigation]);
        assert!(caps.probe(EntryKind::Paint));
        assert!(!caps.probe(EntryKind::LayoutShift));
        assert!(Capabilities::full().probe(EntryKind::LayoutShift));
    }

    #[test]
    fn test_metric_name_strings() {
        assert_eq!(MetricName::Lcp.as_str(), "lcp");
        assert_eq!(MetricName::Custom("font-load".into()).as_str(), "font-load");
    }
}
