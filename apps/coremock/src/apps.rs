//! Application registry.
//!
//! Applications are tenants of the mock backend. Each registration allocates
//! the next integer id and an opaque bearer token; every other store refers
//! to the application by that id.

use rand::distr::{Alphanumeric, SampleString};
use tokio::sync::Mutex;

use crate::now_millis;

pub const TOKEN_SUFFIX_LEN: usize = 48;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Application {
    pub id: u64,
    pub token: String,
    pub config_updated_at: i64,
}

#[derive(Debug)]
struct RegistryState {
    next_id: u64,
    apps: Vec<Application>,
}

#[derive(Debug)]
pub struct AppRegistry {
    token_prefix: String,
    state: Mutex<RegistryState>,
}

impl AppRegistry {
    #[must_use]
    pub fn new(token_prefix: impl Into<String>) -> Self {
        Self {
            token_prefix: token_prefix.into(),
            state: Mutex::new(RegistryState {
                next_id: 1,
                apps: Vec::new(),
            }),
        }
    }

    /// Registers a new application and returns it. Never fails.
    pub async fn register(&self) -> Application {
        let mut state = self.state.lock().await;
        let id = state.next_id;
        state.next_id = state.next_id.saturating_add(1);

        let suffix = Alphanumeric.sample_string(&mut rand::rng(), TOKEN_SUFFIX_LEN);
        let app = Application {
            id,
            token: format!("{}_{id}_{suffix}", self.token_prefix),
            config_updated_at: now_millis(),
        };
        state.apps.push(app.clone());
        app
    }

    /// Resolves a bearer token. Candidates whose length differs are skipped
    /// without comparing bytes; equal-length candidates are compared in
    /// constant time.
    pub async fn lookup(&self, token: &str) -> Option<Application> {
        if token.is_empty() {
            return None;
        }
        let state = self.state.lock().await;
        state
            .apps
            .iter()
            .find(|app| constant_time_eq(&app.token, token))
            .cloned()
    }
}

pub(crate) fn constant_time_eq(left: &str, right: &str) -> bool {
    let left_bytes = left.as_bytes();
    let right_bytes = right.as_bytes();
    if left_bytes.len() != right_bytes.len() {
        return false;
    }

    let mut diff = 0_u8;
    for (a, b) in left_bytes.iter().zip(right_bytes.iter()) {
        diff |= *a ^ *b;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::{AppRegistry, TOKEN_SUFFIX_LEN, constant_time_eq};

    #[tokio::test]
    async fn register_allocates_increasing_ids_and_distinct_tokens() {
        let registry = AppRegistry::new("AIK_RUNTIME_1");
        let first = registry.register().await;
        let second = registry.register().await;

        assert_eq!(first.id, 1);
        assert_eq!(second.id, 2);
        assert_ne!(first.token, second.token);
    }

    #[tokio::test]
    async fn token_has_prefix_id_and_alphanumeric_suffix() {
        let registry = AppRegistry::new("AIK_RUNTIME_1");
        let app = registry.register().await;

        let suffix = app
            .token
            .strip_prefix("AIK_RUNTIME_1_1_")
            .expect("token should start with prefix and id");
        assert_eq!(suffix.len(), TOKEN_SUFFIX_LEN);
        assert!(suffix.chars().all(|ch| ch.is_ascii_alphanumeric()));
    }

    #[tokio::test]
    async fn lookup_resolves_registered_tokens_only() {
        let registry = AppRegistry::new("AIK_RUNTIME_1");
        let first = registry.register().await;
        let second = registry.register().await;

        assert_eq!(registry.lookup(&first.token).await, Some(first.clone()));
        assert_eq!(registry.lookup(&second.token).await, Some(second));
        assert_eq!(registry.lookup("").await, None);
        assert_eq!(registry.lookup("AIK_RUNTIME_1_1_short").await, None);

        let mut tampered = first.token.clone();
        tampered.pop();
        tampered.push('!');
        assert_eq!(registry.lookup(&tampered).await, None);
    }

    #[test]
    fn constant_time_eq_checks_length_then_bytes() {
        assert!(constant_time_eq("abc", "abc"));
        assert!(!constant_time_eq("abc", "abd"));
        assert!(!constant_time_eq("abc", "abcd"));
        assert!(constant_time_eq("", ""));
    }
}
