//! Per-application event log.
//!
//! Append-only, except that a `started` event truncates the application's
//! log before it is appended. Heartbeat route specs are canonicalized on the
//! way in so that stored heartbeats compare cleanly.

use std::collections::HashMap;

use serde_json::{Map, Value};
use tokio::sync::Mutex;

use crate::apps::Application;

pub const EVENT_STARTED: &str = "started";
pub const EVENT_HEARTBEAT: &str = "heartbeat";
pub const EVENT_DETECTED_ATTACK: &str = "detected_attack";

pub fn event_kind(event: &Value) -> Option<&str> {
    event.get("type").and_then(Value::as_str)
}

#[derive(Debug, Default)]
pub struct EventStore {
    events: Mutex<HashMap<u64, Vec<Value>>>,
}

impl EventStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn append(&self, app: &Application, event: Value) {
        let kind = event_kind(&event).map(ToString::to_string);
        let event = match kind.as_deref() {
            Some(EVENT_HEARTBEAT) => normalize_heartbeat(event),
            _ => event,
        };

        let mut events = self.events.lock().await;
        let log = events.entry(app.id).or_default();
        if kind.as_deref() == Some(EVENT_STARTED) {
            if !log.is_empty() {
                tracing::info!(service_id = app.id, discarded = log.len(), "event log reset");
            }
            log.clear();
        }
        log.push(event);
        tracing::debug!(
            service_id = app.id,
            kind = kind.as_deref().unwrap_or("unknown"),
            stored = log.len(),
            "event captured"
        );
    }

    /// Events in insertion order; empty when nothing was captured.
    pub async fn list(&self, app: &Application) -> Vec<Value> {
        self.events
            .lock()
            .await
            .get(&app.id)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn list_of_kind(&self, app: &Application, kind: &str) -> Vec<Value> {
        self.events
            .lock()
            .await
            .get(&app.id)
            .map(|log| {
                log.iter()
                    .filter(|event| event_kind(event) == Some(kind))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }
}

fn normalize_heartbeat(mut event: Value) -> Value {
    if let Some(routes) = event.get_mut("routes").and_then(Value::as_array_mut) {
        for route in routes {
            if let Some(apispec) = route.get_mut("apispec") {
                *apispec = normalize_api_spec(apispec);
            }
        }
    }
    event
}

/// Collapses every single-element `type` list to its element, at any depth.
///
/// Returns a new value and leaves the input untouched. The result contains no
/// `type` key whose value is a one-element list, so applying the transform
/// again is a no-op.
pub fn normalize_api_spec(value: &Value) -> Value {
    match value {
        Value::Object(fields) => {
            let mut normalized = Map::with_capacity(fields.len());
            for (key, child) in fields {
                let child = if key == "type" {
                    collapse_type(child)
                } else {
                    normalize_api_spec(child)
                };
                normalized.insert(key.clone(), child);
            }
            Value::Object(normalized)
        }
        Value::Array(items) => Value::Array(items.iter().map(normalize_api_spec).collect()),
        scalar => scalar.clone(),
    }
}

fn collapse_type(value: &Value) -> Value {
    match normalize_api_spec(value) {
        Value::Array(mut items) if items.len() == 1 => match items.pop() {
            Some(only) => collapse_type(&only),
            None => Value::Array(items),
        },
        other => other,
    }
}
