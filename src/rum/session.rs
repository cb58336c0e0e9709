//! Session record types and interaction normalization.

use crate::vitals::WebVitals;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Immutable device description, captured once per session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub user_agent: String,
    pub screen_resolution: String,
    pub viewport_size: String,
    pub device_pixel_ratio: f64,
    pub touch_enabled: bool,
    pub hardware_concurrency: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_memory: Option<f64>,
    pub platform: String,
}

impl Default for DeviceInfo {
    fn default() -> Self {
        Self {
            user_agent: String::new(),
            screen_resolution: String::new(),
            viewport_size: String::new(),
            device_pixel_ratio: 1.0,
            touch_enabled: false,
            hardware_concurrency: 1,
            device_memory: None,
            platform: String::new(),
        }
    }
}

/// Connection description; updated on connection-change events.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetworkInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub effective_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub downlink: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rtt: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub save_data: Option<bool>,
    pub online: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VisibilityState {
    Visible,
    Hidden,
}

/// One visibility transition, with the time spent in the prior state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisibilityChange {
    pub timestamp: DateTime<Utc>,
    pub state: VisibilityState,
    pub duration_ms: i64,
}

/// One tracked page view. Exactly one page view is current at a time;
/// `time_on_page` and the final `scroll_depth` are fixed at finalization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageView {
    pub url: String,
    pub title: String,
    pub timestamp: DateTime<Utc>,
    pub referrer: String,
    pub load_time: f64,
    pub time_to_interactive: f64,
    pub scroll_depth: u8,
    pub time_on_page_ms: i64,
    pub visibility_changes: Vec<VisibilityChange>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InteractionKind {
    Click,
    Scroll,
    Input,
    Keypress,
    Touch,
}

/// A lightweight structured interaction record. `value` carries the
/// event-specific payload (scroll depth, key name, or input kind) and
/// never field contents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserInteraction {
    pub kind: InteractionKind,
    pub element: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub x: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub y: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

/// Heap usage sample.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MemoryUsage {
    pub used_js_heap_size: u64,
    pub total_js_heap_size: u64,
    pub js_heap_size_limit: u64,
    pub used_percent: f64,
}

/// Periodic vitals + memory snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceSnapshot {
    pub timestamp: DateTime<Utc>,
    pub url: String,
    pub vitals: WebVitals,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory: Option<MemoryUsage>,
}

/// The per-visit session record, owned by the aggregator.
#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub session_id: String,
    pub start_time: DateTime<Utc>,
    pub device_info: DeviceInfo,
    pub network_info: NetworkInfo,
    pub page_views: Vec<PageView>,
    pub interactions: Vec<UserInteraction>,
    pub performance_snapshots: Vec<PerformanceSnapshot>,
}

/// One node of an ancestor chain, rootmost first, as reported by the
/// page's instrumentation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomNode {
    pub tag: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub classes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_type: Option<String>,
}

/// Raw input events delivered by the page, before normalization.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum InputEvent {
    Click { target: Vec<DomNode>, x: f64, y: f64 },
    Scroll { depth_percent: u8 },
    Input { target: Vec<DomNode> },
    Keypress { target: Vec<DomNode>, key: String },
    Touch { target: Vec<DomNode>, x: f64, y: f64 },
}

/// Build the `tag#id.class > ...` descriptor for an ancestor chain.
pub fn element_path(chain: &[DomNode]) -> String {
    let mut parts = Vec::with_capacity(chain.len());
    for node in chain {
        let mut selector = node.tag.to_lowercase();
        if let Some(id) = &node.id {
            selector.push('#');
            selector.push_str(id);
        } else if !node.classes.is_empty() {
            for class in &node.classes {
                selector.push('.');
                selector.push_str(class);
            }
        }
        parts.push(selector);
    }
    parts.join(" > ")
}

/// True when the leaf of the chain is a password field. Such targets are
/// never recorded with key or value payloads.
pub fn is_password_target(chain: &[DomNode]) -> bool {
    chain
        .last()
        .and_then(|node| node.input_type.as_deref())
        .is_some_and(|t| t.eq_ignore_ascii_case("password"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(tag: &str, id: Option<&str>, classes: &[&str]) -> DomNode {
        DomNode {
            tag: tag.into(),
            id: id.map(String::from),
            classes: classes.iter().map(|c| c.to_string()).collect(),
            input_type: None,
        }
    }

    #[test]
    fn test_element_path_prefers_id_over_classes() {
        let chain = [
            node("DIV", Some("app"), &["shell"]),
            node("MAIN", None, &[]),
            node("BUTTON", None, &["primary", "large"]),
        ];
        assert_eq!(element_path(&chain), "div#app > main > button.primary.large");
    }

    #[test]
    fn test_element_path_empty_chain() {
        assert_eq!(element_path(&[]), "");
    }

    #[test]
    fn test_password_target_detection() {
        let mut input = node("INPUT", None, &[]);
        input.input_type = Some("password".into());
        let chain = [node("FORM", None, &[]), input];
        assert!(is_password_target(&chain));

        let text_chain = [DomNode {
            tag: "INPUT".into(),
            id: None,
            classes: vec![],
            input_type: Some("text".into()),
        }];
        assert!(!is_password_target(&text_chain));
        assert!(!is_password_target(&[]));
    }

    #[test]
    fn test_input_event_deserializes_tagged() {
        let event: InputEvent =
            serde_json::from_str(r#"{"kind":"scroll","depth_percent":40}"#).unwrap();
        assert!(matches!(event, InputEvent::Scroll { depth_percent: 40 }));
    }
}
