//! Threshold tables: 3-tier ratings, pass/fail budgets, alert thresholds.
//!
//! The rating table and the performance budgets are distinct
//! configurations and must not be conflated: ratings grade a value into
//! good / needs-improvement / poor, budgets are a single coarse pass/fail
//! line per metric.

use super::{MetricName, WebVitals};
use serde::{Deserialize, Serialize};

/// Rating of a metric value against the fixed Core Web Vitals thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Rating {
    Good,
    NeedsImprovement,
    Poor,
    Unknown,
}

/// Rate a metric value. Values in ms except CLS, which is unitless.
/// An unobserved value (`None`) and custom timings rate as unknown.
pub fn rate(metric: &MetricName, value: Option<f64>) -> Rating {
    let value = match value {
        Some(v) => v,
        None => return Rating::Unknown,
    };

    let (good, poor) = match metric {
        MetricName::Lcp => (2500.0, 4000.0),
        MetricName::Fid => (100.0, 300.0),
        MetricName::Cls => (0.1, 0.25),
        MetricName::Fcp => (1800.0, 3000.0),
        MetricName::Ttfb => (800.0, 1800.0),
        MetricName::Inp => (200.0, 500.0),
        MetricName::Custom(_) => return Rating::Unknown,
    };

    if value <= good {
        Rating::Good
    } else if value <= poor {
        Rating::NeedsImprovement
    } else {
        Rating::Poor
    }
}

/// Outcome of a budget check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BudgetStatus {
    Pass,
    Fail,
}

/// Single-threshold performance budgets, one critical line per metric.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PerformanceBudgets {
    pub lcp: f64,
    pub fid: f64,
    pub cls: f64,
    pub fcp: f64,
    pub ttfb: f64,
}

impl Default for PerformanceBudgets {
    fn default() -> Self {
        Self {
            lcp: 2500.0,
            fid: 100.0,
            cls: 0.1,
            fcp: 1800.0,
            ttfb: 800.0,
        }
    }
}

/// Pass/fail status for each budgeted metric.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BudgetReport {
    pub lcp: BudgetStatus,
    pub fid: BudgetStatus,
    pub cls: BudgetStatus,
    pub fcp: BudgetStatus,
    pub ttfb: BudgetStatus,
}

impl PerformanceBudgets {
    /// Check one value against one budget line. Unobserved values pass:
    /// a budget can only fail on evidence.
    pub fn check(value: Option<f64>, budget: f64) -> BudgetStatus {
        match value {
            Some(v) if v > budget => BudgetStatus::Fail,
            _ => BudgetStatus::Pass,
        }
    }

    /// Check a vitals snapshot against every budget line.
    pub fn status(&self, vitals: &WebVitals) -> BudgetReport {
        BudgetReport {
            lcp: Self::check(vitals.lcp, self.lcp),
            fid: Self::check(vitals.fid, self.fid),
            cls: Self::check(vitals.cls, self.cls),
            fcp: Self::check(vitals.fcp, self.fcp),
            ttfb: Self::check(vitals.ttfb, self.ttfb),
        }
    }

    /// Number of failing budget lines, for summary events.
    pub fn failure_count(&self, vitals: &WebVitals) -> usize {
        let report = self.status(vitals);
        [report.lcp, report.fid, report.cls, report.fcp, report.ttfb]
            .iter()
            .filter(|s| **s == BudgetStatus::Fail)
            .count()
    }
}

/// Warning/critical threshold pair for one alert signal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Threshold {
    pub warning: f64,
    pub critical: f64,
}

/// Alert thresholds for every monitored signal. These are coarser than
/// the rating table and carry three signals the vitals do not: memory
/// usage (percent), error rate (per minute), slow resources (ms).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertThresholds {
    pub lcp: Threshold,
    pub fid: Threshold,
    pub cls: Threshold,
    pub fcp: Threshold,
    pub ttfb: Threshold,
    pub inp: Threshold,
    pub memory_usage: Threshold,
    pub error_rate: Threshold,
    pub slow_resources: Threshold,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            lcp: Threshold { warning: 2500.0, critical: 4000.0 },
            fid: Threshold { warning: 100.0, critical: 300.0 },
            cls: Threshold { warning: 0.1, critical: 0.25 },
            fcp: Threshold { warning: 1800.0, critical: 3000.0 },
            ttfb: Threshold { warning: 800.0, critical: 1800.0 },
            inp: Threshold { warning: 200.0, critical: 500.0 },
            memory_usage: Threshold { warning: 75.0, critical: 90.0 },
            error_rate: Threshold { warning: 5.0, critical: 15.0 },
            slow_resources: Threshold { warning: 2000.0, critical: 5000.0 },
        }
    }
}

impl AlertThresholds {
    /// Threshold pair for a vitals metric, if it has one.
    pub fn for_metric(&self, metric: &MetricName) -> Option<Threshold> {
        match metric {
            MetricName::Lcp => Some(self.lcp),
            MetricName::Fid => Some(self.fid),
            MetricName::Cls => Some(self.cls),
            MetricName::Fcp => Some(self.fcp),
            MetricName::Ttfb => Some(self.ttfb),
            MetricName::Inp => Some(self.inp),
            MetricName::Custom(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_null_is_unknown() {
        for metric in [
            MetricName::Lcp,
            MetricName::Fid,
            MetricName::Cls,
            MetricName::Fcp,
            MetricName::Ttfb,
            MetricName::Inp,
        ] {
            assert_eq!(rate(&metric, None), Rating::Unknown);
        }
    }

    #[test]
    fn test_rate_boundaries() {
        assert_eq!(rate(&MetricName::Lcp, Some(2500.0)), Rating::Good);
        assert_eq!(rate(&MetricName::Lcp, Some(2500.1)), Rating::NeedsImprovement);
        assert_eq!(rate(&MetricName::Lcp, Some(4000.0)), Rating::NeedsImprovement);
        assert_eq!(rate(&MetricName::Lcp, Some(4000.1)), Rating::Poor);
        assert_eq!(rate(&MetricName::Cls, Some(0.05)), Rating::Good);
        assert_eq!(rate(&MetricName::Cls, Some(0.3)), Rating::Poor);
        assert_eq!(rate(&MetricName::Custom("x".into()), Some(1.0)), Rating::Unknown);
    }

    #[test]
    fn test_budget_status_distinct_from_rating() {
        // 3000ms LCP is only needs-improvement for rating, but fails the
        // 2500ms budget line.
        assert_eq!(rate(&MetricName::Lcp, Some(3000.0)), Rating::NeedsImprovement);
        let vitals = WebVitals {
            lcp: Some(3000.0),
            ..Default::default()
        };
        let report = PerformanceBudgets::default().status(&vitals);
        assert_eq!(report.lcp, BudgetStatus::Fail);
        // Unobserved metrics pass rather than fail.
        assert_eq!(report.cls, BudgetStatus::Pass);
    }

    #[test]
    fn test_failure_count() {
        let vitals = WebVitals {
            lcp: Some(5000.0),
            ttfb: Some(1000.0),
            ..Default::default()
        };
        assert_eq!(PerformanceBudgets::default().failure_count(&vitals), 2);
    }
}
