//! Per-application runtime configuration.
//!
//! The record is created lazily on first read and mutated by shallow merge.
//! `configUpdatedAt` is the change marker agents poll for, so every mutation
//! of any store owned by an application goes through [`ConfigStore::bump`]
//! or [`ConfigStore::update`].

use std::collections::HashMap;

use serde::Serialize;
use serde_json::{Map, Value, json};
use tokio::sync::Mutex;

use crate::{apps::Application, now_millis};

pub const KEY_SERVICE_ID: &str = "serviceId";
pub const KEY_CONFIG_UPDATED_AT: &str = "configUpdatedAt";
pub const KEY_HEARTBEAT_INTERVAL: &str = "heartbeatIntervalInMS";
pub const KEY_BLOCK: &str = "block";

/// Stored configuration record. Held as a JSON object so that partial
/// updates are kept verbatim, including fields the mock does not know.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(transparent)]
pub struct AppConfig(Map<String, Value>);

impl AppConfig {
    fn defaults(app: &Application, heartbeat_interval_ms: u64) -> Self {
        let mut fields = Map::new();
        fields.insert("success".to_string(), Value::Bool(true));
        fields.insert(KEY_SERVICE_ID.to_string(), Value::from(app.id));
        fields.insert(
            KEY_CONFIG_UPDATED_AT.to_string(),
            Value::from(app.config_updated_at),
        );
        fields.insert(
            KEY_HEARTBEAT_INTERVAL.to_string(),
            Value::from(heartbeat_interval_ms),
        );
        fields.insert("endpoints".to_string(), json!([]));
        fields.insert("blockedUserIds".to_string(), json!([]));
        fields.insert("allowedIPAddresses".to_string(), json!([]));
        fields.insert("receivedAnyStats".to_string(), Value::Bool(true));
        fields.insert(KEY_BLOCK.to_string(), Value::Bool(false));
        Self(fields)
    }

    pub fn service_id(&self) -> Option<u64> {
        self.0.get(KEY_SERVICE_ID).and_then(Value::as_u64)
    }

    pub fn config_updated_at(&self) -> i64 {
        self.0
            .get(KEY_CONFIG_UPDATED_AT)
            .and_then(Value::as_i64)
            .unwrap_or_default()
    }

    pub fn heartbeat_interval_ms(&self) -> Option<u64> {
        self.0.get(KEY_HEARTBEAT_INTERVAL).and_then(Value::as_u64)
    }

    pub fn block(&self) -> bool {
        self.0
            .get(KEY_BLOCK)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    fn merge(&mut self, partial: &Value) {
        if let Value::Object(fields) = partial {
            for (key, value) in fields {
                self.0.insert(key.clone(), value.clone());
            }
        }
    }

    fn touch(&mut self, previous: i64) {
        let stamp = now_millis().max(previous.saturating_add(1));
        self.0
            .insert(KEY_CONFIG_UPDATED_AT.to_string(), Value::from(stamp));
    }
}

#[derive(Debug)]
pub struct ConfigStore {
    heartbeat_interval_ms: u64,
    configs: Mutex<HashMap<u64, AppConfig>>,
}

impl ConfigStore {
    #[must_use]
    pub fn new(heartbeat_interval_ms: u64) -> Self {
        Self {
            heartbeat_interval_ms,
            configs: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the stored record, creating the default one on first read.
    pub async fn get(&self, app: &Application) -> AppConfig {
        let mut configs = self.configs.lock().await;
        configs
            .entry(app.id)
            .or_insert_with(|| AppConfig::defaults(app, self.heartbeat_interval_ms))
            .clone()
    }

    /// Shallow-merges `partial` over the record and refreshes
    /// `configUpdatedAt`. Non-object partials merge nothing. The timestamp
    /// is strictly increasing across calls for the same application.
    pub async fn update(&self, app: &Application, partial: &Value) -> AppConfig {
        let mut configs = self.configs.lock().await;
        let config = configs
            .entry(app.id)
            .or_insert_with(|| AppConfig::defaults(app, self.heartbeat_interval_ms));
        let previous = config.config_updated_at();
        config.merge(partial);
        config.touch(previous);
        tracing::debug!(
            service_id = app.id,
            config_updated_at = config.config_updated_at(),
            "runtime config updated"
        );
        config.clone()
    }

    pub async fn bump(&self, app: &Application) -> AppConfig {
        self.update(app, &Value::Object(Map::new())).await
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{Value, json};

    use super::ConfigStore;
    use crate::apps::Application;

    fn app(id: u64) -> Application {
        Application {
            id,
            token: format!("token-{id}"),
            config_updated_at: 1_700_000_000_000,
        }
    }

    #[tokio::test]
    async fn first_read_creates_defaults_and_is_idempotent() {
        let store = ConfigStore::new(600_000);
        let app = app(7);

        let first = store.get(&app).await;
        let second = store.get(&app).await;

        assert_eq!(first, second);
        assert_eq!(first.service_id(), Some(7));
        assert_eq!(first.heartbeat_interval_ms(), Some(600_000));
        assert!(!first.block());
        assert_eq!(first.config_updated_at(), app.config_updated_at);
        assert_eq!(first.get("receivedAnyStats"), Some(&json!(true)));
        assert_eq!(first.get("endpoints"), Some(&json!([])));
    }

    #[tokio::test]
    async fn update_merges_and_bumps_timestamp() {
        let store = ConfigStore::new(600_000);
        let app = app(1);
        let before = store.get(&app).await;

        let updated = store
            .update(&app, &json!({ "heartbeatIntervalInMS": 1000 }))
            .await;
        assert_eq!(updated.heartbeat_interval_ms(), Some(1000));
        assert!(updated.config_updated_at() > before.config_updated_at());
        assert_eq!(store.get(&app).await, updated);

        let again = store.update(&app, &json!({ "block": true })).await;
        assert!(again.block());
        assert_eq!(again.heartbeat_interval_ms(), Some(1000));
        assert!(again.config_updated_at() > updated.config_updated_at());
    }

    #[tokio::test]
    async fn update_without_prior_read_starts_from_defaults() {
        let store = ConfigStore::new(600_000);
        let app = app(3);

        let updated = store.update(&app, &json!({ "block": true })).await;
        assert!(updated.block());
        assert_eq!(updated.heartbeat_interval_ms(), Some(600_000));
        assert_eq!(updated.service_id(), Some(3));
    }

    #[tokio::test]
    async fn unvalidated_fields_are_stored_as_is() {
        let store = ConfigStore::new(600_000);
        let app = app(2);

        let updated = store
            .update(
                &app,
                &json!({ "heartbeatIntervalInMS": "often", "custom": { "nested": [1, 2] } }),
            )
            .await;
        assert_eq!(updated.heartbeat_interval_ms(), None);
        assert_eq!(updated.get("heartbeatIntervalInMS"), Some(&json!("often")));
        assert_eq!(updated.get("custom"), Some(&json!({ "nested": [1, 2] })));
    }

    #[tokio::test]
    async fn partial_cannot_pin_the_timestamp() {
        let store = ConfigStore::new(600_000);
        let app = app(4);
        let before = store.get(&app).await;

        let updated = store
            .update(&app, &json!({ "configUpdatedAt": 5 }))
            .await;
        assert!(updated.config_updated_at() > before.config_updated_at());
    }

    #[tokio::test]
    async fn bump_and_non_object_partials_only_touch_the_timestamp() {
        let store = ConfigStore::new(600_000);
        let app = app(5);
        let before = store.get(&app).await;

        let bumped = store.bump(&app).await;
        let after_array = store.update(&app, &json!([1, 2, 3])).await;
        let after_null = store.update(&app, &Value::Null).await;

        assert!(bumped.config_updated_at() > before.config_updated_at());
        assert!(after_array.config_updated_at() > bumped.config_updated_at());
        assert!(after_null.config_updated_at() > after_array.config_updated_at());
        assert_eq!(after_null.heartbeat_interval_ms(), Some(600_000));
        assert_eq!(after_null.get("0"), None);
    }

    #[tokio::test]
    async fn records_are_isolated_per_application() {
        let store = ConfigStore::new(600_000);
        store.update(&app(1), &json!({ "block": true })).await;

        assert!(store.get(&app(1)).await.block());
        assert!(!store.get(&app(2)).await.block());
    }
}
