//! Configuration module for VitalTrail.
//!
//! Loads configuration from environment variables with sensible defaults.
//! Loading never fails; unparsable values fall back to the default.

use std::env;

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// HTTP port for the web server (default: 8080)
    pub http_port: u16,
    /// Path to the SQLite snapshot store (default: "vitaltrail.db")
    pub db_path: String,
    /// Canonical page URL attached to readings and alerts
    pub page_url: String,
    /// Upstream origin the cache worker fetches from
    pub upstream_origin: String,
    /// Cache version; changing it invalidates old partitions
    pub cache_version: String,
    /// RUM sampling rate in [0, 1] (default: 1.0)
    pub sample_rate: f64,
    /// RUM event batch size (default: 20)
    pub batch_size: usize,
    /// RUM flush interval in seconds (default: 30)
    pub flush_interval_secs: u64,
    /// Report generation interval in seconds (default: 3600)
    pub report_interval_secs: u64,
    /// How many days of reports to keep (default: 30)
    pub retention_days: i64,
    /// Optional HTTP analytics collector
    pub analytics_endpoint: Option<String>,
    /// Optional alert webhook URL
    pub alert_webhook: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_port: 8080,
            db_path: "vitaltrail.db".to_string(),
            page_url: "http://localhost:8080/".to_string(),
            upstream_origin: "http://127.0.0.1:4321".to_string(),
            cache_version: "v1".to_string(),
            sample_rate: 1.0,
            batch_size: 20,
            flush_interval_secs: 30,
            report_interval_secs: 3600,
            retention_days: 30,
            analytics_endpoint: None,
            alert_webhook: None,
        }
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, into: &mut T) {
    if let Ok(raw) = env::var(name) {
        if let Ok(value) = raw.parse() {
            *into = value;
        } else {
            tracing::warn!("config: ignoring unparsable {}={}", name, raw);
        }
    }
}

impl ServerConfig {
    /// Load configuration from `VITALTRAIL_*` environment variables.
    pub fn load() -> Self {
        let mut cfg = Self::default();

        parse_var("VITALTRAIL_HTTP_PORT", &mut cfg.http_port);
        parse_var("VITALTRAIL_SAMPLE_RATE", &mut cfg.sample_rate);
        parse_var("VITALTRAIL_BATCH_SIZE", &mut cfg.batch_size);
        parse_var("VITALTRAIL_FLUSH_INTERVAL_SECS", &mut cfg.flush_interval_secs);
        parse_var("VITALTRAIL_REPORT_INTERVAL_SECS", &mut cfg.report_interval_secs);
        parse_var("VITALTRAIL_RETENTION_DAYS", &mut cfg.retention_days);

        if let Ok(db_path) = env::var("VITALTRAIL_DB_PATH") {
            cfg.db_path = db_path;
        }
        if let Ok(url) = env::var("VITALTRAIL_PAGE_URL") {
            cfg.page_url = url;
        }
        if let Ok(origin) = env::var("VITALTRAIL_UPSTREAM_ORIGIN") {
            cfg.upstream_origin = origin;
        }
        if let Ok(version) = env::var("VITALTRAIL_CACHE_VERSION") {
            cfg.cache_version = version;
        }
        if let Ok(endpoint) = env::var("VITALTRAIL_ANALYTICS_ENDPOINT") {
            cfg.analytics_endpoint = Some(endpoint);
        }
        if let Ok(webhook) = env::var("VITALTRAIL_ALERT_WEBHOOK") {
            cfg.alert_webhook = Some(webhook);
        }

        cfg.sample_rate = cfg.sample_rate.clamp(0.0, 1.0);
        cfg
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.http_port, 8080);
        assert_eq!(cfg.db_path, "vitaltrail.db");
        assert_eq!(cfg.cache_version, "v1");
        assert_eq!(cfg.sample_rate, 1.0);
        assert!(cfg.analytics_endpoint.is_none());
    }
}
