//! HTTP request handlers.

use super::AppState;
use crate::cache::{CacheRequest, ControlRequest};
use crate::rum::{InputEvent, MemoryUsage};
use crate::vitals::PerformanceEntry;

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{header, HeaderMap, HeaderValue, Method, StatusCode, Uri},
    response::{IntoResponse, Json},
};
use chrono::Utc;
use serde::{Deserialize, Serialize};

// ============================================================================
// Telemetry API
// ============================================================================

pub async fn handle_get_vitals(State(state): State<AppState>) -> impl IntoResponse {
    let overview = state.monitor.lock().unwrap().vitals_overview();
    Json(overview)
}

pub async fn handle_get_alerts(State(state): State<AppState>) -> impl IntoResponse {
    let alerts = state.monitor.lock().unwrap().alerts.active_alerts();
    Json(alerts)
}

#[derive(Debug, Deserialize)]
pub struct ReportsQuery {
    #[serde(default = "default_report_limit")]
    pub limit: usize,
}

fn default_report_limit() -> usize {
    10
}

pub async fn handle_get_reports(
    State(state): State<AppState>,
    Query(query): Query<ReportsQuery>,
) -> impl IntoResponse {
    let reports = state
        .monitor
        .lock()
        .unwrap()
        .reporter
        .recent_reports(query.limit);
    Json(reports)
}

pub async fn handle_get_session(State(state): State<AppState>) -> impl IntoResponse {
    let summary = state.monitor.lock().unwrap().rum.session_summary(Utc::now());
    Json(summary)
}

pub async fn handle_cache_status(State(state): State<AppState>) -> impl IntoResponse {
    match state.cache.control(ControlRequest::GetCacheStatus).await {
        Ok(reply) => Json(reply).into_response(),
        Err(e) => (StatusCode::SERVICE_UNAVAILABLE, e.to_string()).into_response(),
    }
}

// ============================================================================
// Ingest
// ============================================================================

#[derive(Debug, Serialize)]
pub struct IngestResponse {
    pub accepted: usize,
}

pub async fn handle_ingest_entries(
    State(state): State<AppState>,
    Json(entries): Json<Vec<PerformanceEntry>>,
) -> impl IntoResponse {
    let now = Utc::now();
    let accepted = entries.len();
    {
        let mut monitor = state.monitor.lock().unwrap();
        for entry in &entries {
            monitor.ingest_entry(entry, now);
        }
    }
    (StatusCode::ACCEPTED, Json(IngestResponse { accepted }))
}

pub async fn handle_ingest_interactions(
    State(state): State<AppState>,
    Json(events): Json<Vec<InputEvent>>,
) -> impl IntoResponse {
    let now = Utc::now();
    let accepted = events.len();
    {
        let mut monitor = state.monitor.lock().unwrap();
        for event in &events {
            monitor.track_input(event, now);
        }
    }
    (StatusCode::ACCEPTED, Json(IngestResponse { accepted }))
}

/// One page error, as posted by the error handler on the page.
#[derive(Debug, Deserialize)]
pub struct ErrorReport {
    pub message: String,
    #[serde(default)]
    pub source: Option<String>,
}

pub async fn handle_ingest_errors(
    State(state): State<AppState>,
    Json(errors): Json<Vec<ErrorReport>>,
) -> impl IntoResponse {
    let now = Utc::now();
    let accepted = errors.len();
    {
        let mut monitor = state.monitor.lock().unwrap();
        for error in &errors {
            monitor.record_error(&error.message, error.source.as_deref(), now);
        }
    }
    (StatusCode::ACCEPTED, Json(IngestResponse { accepted }))
}

pub async fn handle_ingest_memory(
    State(state): State<AppState>,
    Json(samples): Json<Vec<MemoryUsage>>,
) -> impl IntoResponse {
    let now = Utc::now();
    let accepted = samples.len();
    {
        let mut monitor = state.monitor.lock().unwrap();
        for sample in &samples {
            monitor.record_memory(*sample, now);
        }
    }
    (StatusCode::ACCEPTED, Json(IngestResponse { accepted }))
}

// ============================================================================
// Cache-proxied fallback
// ============================================================================

pub async fn handle_proxied_fetch(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let accept = headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("*/*")
        .to_string();

    let request = CacheRequest {
        method: method.to_string(),
        path: uri.path().to_string(),
        accept,
        same_origin: true,
        body: body.to_vec(),
    };

    let cached = match state.cache.fetch(request).await {
        Ok(response) => response,
        Err(e) => {
            return (StatusCode::SERVICE_UNAVAILABLE, e.to_string()).into_response();
        }
    };

    let status = StatusCode::from_u16(cached.status).unwrap_or(StatusCode::BAD_GATEWAY);
    let mut response = (status, cached.body).into_response();
    if let Ok(value) = HeaderValue::from_str(&cached.content_type) {
        response.headers_mut().insert(header::CONTENT_TYPE, value);
    }
    response
}
