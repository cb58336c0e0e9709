//! VitalTrail - Performance telemetry and offline cache service
//!
//! Collects Core Web Vitals from ingested performance entries, raises
//! threshold alerts, aggregates real-user sessions, generates periodic
//! reports, and serves page traffic through an offline-capable cache
//! worker.

mod alerts;
mod cache;
mod config;
mod monitor;
mod report;
mod rum;
mod sink;
mod storage;
mod vitals;
mod web;

use alerts::{AlertManager, AnalyticsAlertSink, ConsoleSink, WebhookSink};
use cache::HttpFetcher;
use config::ServerConfig;
use monitor::Monitor;
use report::Reporter;
use rum::{DeviceInfo, NetworkInfo, RumConfig, SessionAggregator};
use sink::{AnalyticsSink, HttpSink, LogSink};
use storage::Store;
use vitals::budget::{AlertThresholds, PerformanceBudgets};
use vitals::{Capabilities, MetricCollector};
use web::Server;

use chrono::Utc;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env()
            .add_directive("vitaltrail=info".parse()?))
        .init();

    // Load configuration
    let cfg = ServerConfig::load();
    tracing::info!("Starting VitalTrail on port {}...", cfg.http_port);
    tracing::info!("Using snapshot store at {}", cfg.db_path);

    // Snapshot store
    let store = Store::new(&cfg.db_path)?;

    // Analytics sink
    let analytics: Arc<dyn AnalyticsSink> = match &cfg.analytics_endpoint {
        Some(endpoint) => Arc::new(HttpSink::new(endpoint.clone())),
        None => Arc::new(LogSink),
    };

    // Telemetry pipeline
    let collector = MetricCollector::new(cfg.page_url.clone(), Capabilities::full());

    let mut alert_manager = AlertManager::new(AlertThresholds::default(), cfg.page_url.clone());
    alert_manager.add_sink(Box::new(ConsoleSink));
    alert_manager.add_sink(Box::new(AnalyticsAlertSink::new(analytics.clone())));
    if let Some(webhook) = &cfg.alert_webhook {
        alert_manager.add_sink(Box::new(WebhookSink::new(webhook.clone())));
    }

    let now = Utc::now();
    let rum = SessionAggregator::new(
        RumConfig {
            sample_rate: cfg.sample_rate,
            batch_size: cfg.batch_size,
            flush_interval_secs: cfg.flush_interval_secs,
            ..Default::default()
        },
        DeviceInfo::default(),
        NetworkInfo::default(),
        analytics,
        now,
    );

    let reporter = Reporter::new(cfg.retention_days, now);

    let mut monitor = Monitor::new(
        collector,
        alert_manager,
        rum,
        reporter,
        PerformanceBudgets::default(),
    );
    monitor.restore(&store)?;
    let monitor = Arc::new(Mutex::new(monitor));

    // Cache worker against the upstream origin
    let fetcher = HttpFetcher::new(cfg.upstream_origin.clone());
    let (cache_client, _cache_task) = cache::spawn_worker(cfg.cache_version.clone(), fetcher);

    // Periodic driver: alert evaluation, history sampling, report
    // generation with checkpoint, RUM flush.
    {
        let monitor = monitor.clone();
        let store = store.clone();
        let report_secs = cfg.report_interval_secs.max(1);
        let flush_secs = cfg.flush_interval_secs.max(1);
        tokio::spawn(async move {
            let mut alert_tick = tokio::time::interval(Duration::from_secs(10));
            let mut history_tick = tokio::time::interval(Duration::from_secs(30));
            let mut report_tick = tokio::time::interval(Duration::from_secs(report_secs));
            let mut flush_tick = tokio::time::interval(Duration::from_secs(flush_secs));
            // Skip the immediate first tick of each interval.
            alert_tick.tick().await;
            history_tick.tick().await;
            report_tick.tick().await;
            flush_tick.tick().await;

            loop {
                tokio::select! {
                    _ = alert_tick.tick() => {
                        monitor.lock().unwrap().evaluate_alerts(Utc::now());
                    }
                    _ = history_tick.tick() => {
                        monitor.lock().unwrap().sample_history(Utc::now());
                    }
                    _ = report_tick.tick() => {
                        let mut m = monitor.lock().unwrap();
                        let report = m.generate_report(Utc::now());
                        tracing::info!(
                            id = %report.id,
                            score = report.summary.performance_score,
                            "report generated"
                        );
                        if let Err(e) = m.checkpoint(&store) {
                            tracing::warn!("periodic checkpoint failed: {}", e);
                        }
                    }
                    _ = flush_tick.tick() => {
                        monitor.lock().unwrap().rum.flush();
                    }
                }
            }
        });
    }

    // Web server, shut down cleanly on ctrl-c
    let server = Server::new(cfg, monitor.clone(), cache_client);
    tokio::select! {
        result = server.start() => result?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutting down");
            monitor.lock().unwrap().finalize(&store, Utc::now());
        }
    }

    Ok(())
}
