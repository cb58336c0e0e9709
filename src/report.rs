//! Periodic performance reports over non-overlapping windows.
//!
//! The reporter accumulates metric samples and resource timings between
//! report generations. Each `generate` call consumes the samples gathered
//! since the previous call, so consecutive reports never double-count a
//! window. Lifetime quantiles are kept separately in t-digests and
//! survive restarts through the snapshot store.

use crate::alerts::Alert;
use crate::vitals::budget::{rate, Rating};
use crate::vitals::digest::{DigestSet, LifetimeStats};
use crate::vitals::MetricName;

use chrono::{DateTime, Duration, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// How many generated reports are retained in memory.
const REPORT_CAP: usize = 100;
/// How many slowest resources a report lists.
const SLOWEST_LIMIT: usize = 5;

/// One metric observation awaiting the next report window.
#[derive(Debug, Clone)]
struct Sample {
    metric: MetricName,
    value: f64,
    timestamp: DateTime<Utc>,
}

/// One resource timing awaiting the next report window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceSample {
    pub name: String,
    pub duration: f64,
    pub transfer_size: u64,
    pub initiator_type: String,
}

/// Distribution of ratings across a window's samples.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct RatingDistribution {
    pub good: usize,
    pub needs_improvement: usize,
    pub poor: usize,
}

/// Percentile summary of one metric over one window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricSummary {
    pub average: f64,
    pub median: f64,
    pub p75: f64,
    pub p95: f64,
    pub samples: usize,
    pub distribution: RatingDistribution,
}

/// Resource roll-up over one window.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourceSummary {
    pub total: usize,
    pub average_duration: f64,
    pub slowest: Vec<ResourceSample>,
    /// Zero-byte transfers, counted as failed or opaque fetches.
    pub failed: usize,
}

/// Headline numbers for one report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportTotals {
    pub page_views: usize,
    pub average_load_time: f64,
    pub alert_count: usize,
    pub performance_score: f64,
}

/// One generated report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub id: String,
    pub generated_at: DateTime<Utc>,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub summary: ReportTotals,
    pub metrics: BTreeMap<String, MetricSummary>,
    pub resources: ResourceSummary,
    pub alerts: Vec<Alert>,
    pub lifetime: BTreeMap<String, LifetimeStats>,
}

pub struct Reporter {
    samples: Vec<Sample>,
    resources: Vec<ResourceSample>,
    page_views: usize,
    load_times: Vec<f64>,
    reports: Vec<Report>,
    lifetime: DigestSet,
    last_period_end: DateTime<Utc>,
    retention: Duration,
}

impl Reporter {
    pub fn new(retention_days: i64, now: DateTime<Utc>) -> Self {
        Self {
            samples: Vec::new(),
            resources: Vec::new(),
            page_views: 0,
            load_times: Vec::new(),
            reports: Vec::new(),
            lifetime: DigestSet::new(),
            last_period_end: now,
            retention: Duration::days(retention_days.max(1)),
        }
    }

    /// Fold one metric reading into the pending window and the lifetime
    /// digests.
    pub fn record_sample(&mut self, metric: &MetricName, value: f64, timestamp: DateTime<Utc>) {
        self.lifetime.record(metric.as_str(), value);
        self.samples.push(Sample {
            metric: metric.clone(),
            value,
            timestamp,
        });
    }

    pub fn record_resource(&mut self, sample: ResourceSample) {
        self.resources.push(sample);
    }

    pub fn record_page_view(&mut self, load_time: f64) {
        self.page_views += 1;
        self.load_times.push(load_time);
    }

    /// Build a report over everything gathered since the previous one and
    /// reset the window. Old reports past the retention horizon are
    /// pruned.
    pub fn generate(&mut self, alerts: Vec<Alert>, now: DateTime<Utc>) -> Report {
        let period_start = self.last_period_end;
        self.last_period_end = now;

        let samples = std::mem::take(&mut self.samples);
        let resources = std::mem::take(&mut self.resources);
        let load_times = std::mem::take(&mut self.load_times);
        let page_views = std::mem::replace(&mut self.page_views, 0);

        let performance_score = overall_score(&samples);

        let mut by_metric: BTreeMap<String, (MetricName, Vec<f64>)> = BTreeMap::new();
        for sample in samples {
            by_metric
                .entry(sample.metric.as_str().to_string())
                .or_insert_with(|| (sample.metric.clone(), Vec::new()))
                .1
                .push(sample.value);
        }

        let metrics: BTreeMap<String, MetricSummary> = by_metric
            .into_iter()
            .map(|(name, (metric, values))| (name, summarize_metric(&metric, values)))
            .collect();

        let report = Report {
            id: generate_report_id(now),
            generated_at: now,
            period_start,
            period_end: now,
            summary: ReportTotals {
                page_views,
                average_load_time: mean(&load_times),
                alert_count: alerts.len(),
                performance_score,
            },
            metrics,
            resources: summarize_resources(resources),
            alerts,
            lifetime: self.lifetime.all_stats(),
        };

        self.reports.push(report.clone());
        self.prune(now);
        report
    }

    /// Start of the window the next report will cover.
    pub fn window_start(&self) -> DateTime<Utc> {
        self.last_period_end
    }

    /// Most recent reports, newest first.
    pub fn recent_reports(&self, limit: usize) -> Vec<Report> {
        self.reports.iter().rev().take(limit).cloned().collect()
    }

    pub fn report_count(&self) -> usize {
        self.reports.len()
    }

    pub fn lifetime_stats(&self) -> BTreeMap<String, LifetimeStats> {
        self.lifetime.all_stats()
    }

    /// Encode the lifetime digests for the snapshot store.
    pub fn checkpoint(&self) -> Vec<u8> {
        self.lifetime.encode()
    }

    /// Restore lifetime digests from a checkpoint blob.
    pub fn restore(&mut self, data: &[u8]) {
        self.lifetime = DigestSet::decode(data);
    }

    fn prune(&mut self, now: DateTime<Utc>) {
        let horizon = now - self.retention;
        self.reports.retain(|r| r.generated_at >= horizon);
        if self.reports.len() > REPORT_CAP {
            let excess = self.reports.len() - REPORT_CAP;
            self.reports.drain(..excess);
        }
    }
}

/// Index-based percentile over a sorted slice: sorted[floor(len * q)],
/// with the median at sorted[len / 2]. Matches the report format's
/// historical definition exactly.
fn summarize_metric(metric: &MetricName, mut values: Vec<f64>) -> MetricSummary {
    if values.is_empty() {
        return MetricSummary {
            average: 0.0,
            median: 0.0,
            p75: 0.0,
            p95: 0.0,
            samples: 0,
            distribution: RatingDistribution::default(),
        };
    }

    let average = mean(&values);
    let mut distribution = RatingDistribution::default();
    for v in &values {
        match rate(metric, Some(*v)) {
            Rating::Good => distribution.good += 1,
            Rating::NeedsImprovement => distribution.needs_improvement += 1,
            Rating::Poor => distribution.poor += 1,
            Rating::Unknown => {}
        }
    }

    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let len = values.len();
    let at = |q: f64| values[((len as f64 * q) as usize).min(len - 1)];

    MetricSummary {
        average,
        median: values[len / 2],
        p75: at(0.75),
        p95: at(0.95),
        samples: len,
        distribution,
    }
}

fn summarize_resources(mut resources: Vec<ResourceSample>) -> ResourceSummary {
    if resources.is_empty() {
        return ResourceSummary::default();
    }
    let total = resources.len();
    let average_duration = resources.iter().map(|r| r.duration).sum::<f64>() / total as f64;
    let failed = resources.iter().filter(|r| r.transfer_size == 0).count();
    resources.sort_by(|a, b| b.duration.partial_cmp(&a.duration).unwrap_or(std::cmp::Ordering::Equal));
    resources.truncate(SLOWEST_LIMIT);
    ResourceSummary {
        total,
        average_duration,
        slowest: resources,
        failed,
    }
}

/// Score out of 100, averaged over the window's LCP, FID, CLS, and FCP
/// samples: each sample scores 100 minus 25 when it rates poor, 12.5 when
/// needs-improvement. A window with no scoreable samples scores 0.
fn overall_score(samples: &[Sample]) -> f64 {
    let mut total: f64 = 0.0;
    let mut scored: usize = 0;
    for sample in samples {
        if !matches!(
            sample.metric,
            MetricName::Lcp | MetricName::Fid | MetricName::Cls | MetricName::Fcp
        ) {
            continue;
        }
        let score: f64 = match rate(&sample.metric, Some(sample.value)) {
            Rating::Poor => 75.0,
            Rating::NeedsImprovement => 87.5,
            _ => 100.0,
        };
        total += score;
        scored += 1;
    }
    if scored == 0 {
        0.0
    } else {
        total / scored as f64
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

fn generate_report_id(now: DateTime<Utc>) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(9)
        .map(char::from)
        .collect();
    format!("report_{}_{}", now.timestamp_millis(), suffix.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reporter(now: DateTime<Utc>) -> Reporter {
        Reporter::new(30, now)
    }

    #[test]
    fn test_empty_window_yields_zeroed_report() {
        let t0 = Utc::now();
        let mut r = reporter(t0);
        let report = r.generate(Vec::new(), t0 + Duration::hours(1));
        assert_eq!(report.summary.page_views, 0);
        assert_eq!(report.summary.average_load_time, 0.0);
        assert_eq!(report.summary.performance_score, 0.0);
        assert!(report.metrics.is_empty());
        assert_eq!(report.resources.total, 0);
    }

    #[test]
    fn test_windows_do_not_overlap() {
        let t0 = Utc::now();
        let mut r = reporter(t0);
        r.record_sample(&MetricName::Lcp, 2000.0, t0 + Duration::minutes(5));

        let t1 = t0 + Duration::hours(1);
        let first = r.generate(Vec::new(), t1);
        assert_eq!(first.period_start, t0);
        assert_eq!(first.period_end, t1);
        assert_eq!(first.metrics["lcp"].samples, 1);

        let t2 = t1 + Duration::hours(1);
        let second = r.generate(Vec::new(), t2);
        assert_eq!(second.period_start, t1);
        assert!(second.metrics.is_empty(), "samples not carried across windows");
    }

    #[test]
    fn test_percentiles_are_index_based() {
        let t0 = Utc::now();
        let mut r = reporter(t0);
        // 1..=20, shuffled ingestion order.
        for v in [7, 1, 20, 3, 15, 9, 2, 18, 5, 11, 4, 13, 6, 17, 8, 19, 10, 14, 12, 16] {
            r.record_sample(&MetricName::Ttfb, v as f64, t0);
        }
        let report = r.generate(Vec::new(), t0 + Duration::hours(1));
        let ttfb = &report.metrics["ttfb"];
        // sorted[20/2] = 11, sorted[15] = 16, sorted[19] = 20
        assert_eq!(ttfb.median, 11.0);
        assert_eq!(ttfb.p75, 16.0);
        assert_eq!(ttfb.p95, 20.0);
        assert_eq!(ttfb.samples, 20);
        assert_eq!(ttfb.average, 10.5);
    }

    #[test]
    fn test_score_averages_per_sample_scores() {
        let t0 = Utc::now();
        let mut r = reporter(t0);
        r.record_sample(&MetricName::Lcp, 5000.0, t0); // poor: 75
        r.record_sample(&MetricName::Lcp, 2000.0, t0); // good: 100
        let report = r.generate(Vec::new(), t0 + Duration::hours(1));
        assert_eq!(report.summary.performance_score, 87.5);

        let mut r = reporter(t0);
        r.record_sample(&MetricName::Lcp, 5000.0, t0); // poor: 75
        r.record_sample(&MetricName::Fid, 150.0, t0); // needs-improvement: 87.5
        let report = r.generate(Vec::new(), t0 + Duration::hours(1));
        assert_eq!(report.summary.performance_score, 81.25);
    }

    #[test]
    fn test_score_counts_only_scoreable_metrics() {
        let t0 = Utc::now();

        // TTFB alone never enters the score; no valid samples reads as 0.
        let mut r = reporter(t0);
        r.record_sample(&MetricName::Ttfb, 9_000.0, t0);
        let report = r.generate(Vec::new(), t0 + Duration::hours(1));
        assert_eq!(report.summary.performance_score, 0.0);

        // A poor TTFB next to a good CLS deducts nothing.
        let mut r = reporter(t0);
        r.record_sample(&MetricName::Ttfb, 9_000.0, t0);
        r.record_sample(&MetricName::Cls, 0.05, t0);
        let report = r.generate(Vec::new(), t0 + Duration::hours(1));
        assert_eq!(report.summary.performance_score, 100.0);
    }

    #[test]
    fn test_resource_summary() {
        let t0 = Utc::now();
        let mut r = reporter(t0);
        for i in 0..8 {
            r.record_resource(ResourceSample {
                name: format!("/asset-{i}.js"),
                duration: 100.0 * (i + 1) as f64,
                transfer_size: if i == 0 { 0 } else { 1024 },
                initiator_type: "script".to_string(),
            });
        }
        let report = r.generate(Vec::new(), t0 + Duration::hours(1));
        assert_eq!(report.resources.total, 8);
        assert_eq!(report.resources.failed, 1);
        assert_eq!(report.resources.slowest.len(), 5);
        assert_eq!(report.resources.slowest[0].name, "/asset-7.js");
        assert_eq!(report.resources.average_duration, 450.0);
    }

    #[test]
    fn test_report_cap() {
        let t0 = Utc::now();
        let mut r = reporter(t0);
        for i in 0..120i64 {
            r.generate(Vec::new(), t0 + Duration::minutes(i));
        }
        assert_eq!(r.report_count(), 100);
        let recent = r.recent_reports(5);
        assert_eq!(recent.len(), 5);
        assert_eq!(recent[0].generated_at, t0 + Duration::minutes(119));
    }

    #[test]
    fn test_retention_prunes_old_reports() {
        let t0 = Utc::now();
        let mut r = Reporter::new(7, t0);
        r.generate(Vec::new(), t0);
        r.generate(Vec::new(), t0 + Duration::days(10));
        assert_eq!(r.report_count(), 1, "report older than retention dropped");
    }

    #[test]
    fn test_lifetime_survives_checkpoint() {
        let t0 = Utc::now();
        let mut r = reporter(t0);
        for v in [1000.0, 2000.0, 3000.0] {
            r.record_sample(&MetricName::Lcp, v, t0);
        }
        r.generate(Vec::new(), t0 + Duration::hours(1));

        let blob = r.checkpoint();
        let mut fresh = reporter(t0);
        fresh.restore(&blob);
        assert_eq!(fresh.lifetime_stats()["lcp"].samples, 3);
    }
}
