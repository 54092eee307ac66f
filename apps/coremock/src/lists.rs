//! Firewall lists: blocked/allowed/monitored IPs and user-agent rules.
//!
//! Every write replaces the whole collection and bumps the owning
//! application's `configUpdatedAt`, so agents notice list changes through the
//! same marker they use for configuration changes.

use std::{collections::HashMap, sync::Arc};

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::{apps::Application, runtime_config::ConfigStore};

const GROUP_KEY: &str = "geoip/Belgium;BE";
const GROUP_SOURCE: &str = "geoip";
const GROUP_DESCRIPTION: &str = "geo restrictions";

#[derive(Clone, Debug, Default)]
struct AppLists {
    blocked_ips: Vec<String>,
    allowed_ips: Vec<String>,
    monitored_ips: Vec<String>,
    blocked_user_agents: String,
    monitored_user_agents: String,
    user_agent_details: Vec<Value>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct IpListGroup {
    pub key: &'static str,
    pub source: &'static str,
    pub description: &'static str,
    pub ips: Vec<String>,
}

impl IpListGroup {
    fn wrap(ips: Vec<String>) -> Vec<Self> {
        if ips.is_empty() {
            return Vec::new();
        }
        vec![Self {
            key: GROUP_KEY,
            source: GROUP_SOURCE,
            description: GROUP_DESCRIPTION,
            ips,
        }]
    }
}

/// Response document for the lists endpoint.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FirewallLists {
    pub success: bool,
    pub service_id: u64,
    #[serde(rename = "blockedIPAddresses")]
    pub blocked_ip_addresses: Vec<IpListGroup>,
    #[serde(rename = "allowedIPAddresses")]
    pub allowed_ip_addresses: Vec<IpListGroup>,
    #[serde(rename = "monitoredIPAddresses")]
    pub monitored_ip_addresses: Vec<IpListGroup>,
    pub blocked_user_agents: String,
    pub monitored_user_agents: String,
    pub user_agent_details: Vec<Value>,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ListUpdateError {
    #[error("Request body is missing or invalid")]
    InvalidBody,
    #[error("blockedIPAddresses is missing or invalid")]
    InvalidBlockedIpAddresses,
}

/// A validated list update. Built entirely before any store is touched, so
/// a rejected payload never causes a partial write.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ListUpdate {
    pub blocked_ip_addresses: Vec<String>,
    pub allowed_ip_addresses: Option<Vec<String>>,
    pub monitored_ip_addresses: Option<Vec<String>>,
    pub blocked_user_agents: Option<String>,
    pub monitored_user_agents: Option<String>,
    pub user_agent_details: Option<Vec<Value>>,
}

impl ListUpdate {
    /// `blockedIPAddresses` is mandatory. Optional fields with the wrong
    /// shape are ignored rather than rejected.
    pub fn from_json(body: &Value) -> Result<Self, ListUpdateError> {
        let fields = match body {
            Value::Object(fields) if !fields.is_empty() => fields,
            _ => return Err(ListUpdateError::InvalidBody),
        };
        let blocked_ip_addresses = fields
            .get("blockedIPAddresses")
            .and_then(string_list)
            .ok_or(ListUpdateError::InvalidBlockedIpAddresses)?;

        Ok(Self {
            blocked_ip_addresses,
            allowed_ip_addresses: fields.get("allowedIPAddresses").and_then(string_list),
            monitored_ip_addresses: fields.get("monitoredIPAddresses").and_then(string_list),
            blocked_user_agents: fields.get("blockedUserAgents").and_then(rule_set),
            monitored_user_agents: fields.get("monitoredUserAgents").and_then(rule_set),
            user_agent_details: fields
                .get("userAgentDetails")
                .and_then(Value::as_array)
                .cloned(),
        })
    }
}

fn string_list(value: &Value) -> Option<Vec<String>> {
    value
        .as_array()?
        .iter()
        .map(|entry| entry.as_str().map(ToString::to_string))
        .collect()
}

fn rule_set(value: &Value) -> Option<String> {
    value
        .as_str()
        .filter(|rules| !rules.is_empty())
        .map(ToString::to_string)
}

#[derive(Debug)]
pub struct ListStore {
    configs: Arc<ConfigStore>,
    lists: Mutex<HashMap<u64, AppLists>>,
}

impl ListStore {
    #[must_use]
    pub fn new(configs: Arc<ConfigStore>) -> Self {
        Self {
            configs,
            lists: Mutex::new(HashMap::new()),
        }
    }

    async fn read<T>(&self, app: &Application, f: impl FnOnce(&AppLists) -> T) -> T {
        let lists = self.lists.lock().await;
        match lists.get(&app.id) {
            Some(entry) => f(entry),
            None => f(&AppLists::default()),
        }
    }

    async fn write(&self, app: &Application, f: impl FnOnce(&mut AppLists)) {
        {
            let mut lists = self.lists.lock().await;
            f(lists.entry(app.id).or_default());
        }
        self.configs.bump(app).await;
    }

    pub async fn blocked_ip_addresses(&self, app: &Application) -> Vec<String> {
        self.read(app, |lists| lists.blocked_ips.clone()).await
    }

    pub async fn set_blocked_ip_addresses(&self, app: &Application, ips: Vec<String>) {
        self.write(app, |lists| lists.blocked_ips = ips).await;
    }

    pub async fn allowed_ip_addresses(&self, app: &Application) -> Vec<String> {
        self.read(app, |lists| lists.allowed_ips.clone()).await
    }

    pub async fn set_allowed_ip_addresses(&self, app: &Application, ips: Vec<String>) {
        self.write(app, |lists| lists.allowed_ips = ips).await;
    }

    pub async fn monitored_ip_addresses(&self, app: &Application) -> Vec<String> {
        self.read(app, |lists| lists.monitored_ips.clone()).await
    }

    pub async fn set_monitored_ip_addresses(&self, app: &Application, ips: Vec<String>) {
        self.write(app, |lists| lists.monitored_ips = ips).await;
    }

    pub async fn blocked_user_agents(&self, app: &Application) -> String {
        self.read(app, |lists| lists.blocked_user_agents.clone())
            .await
    }

    pub async fn set_blocked_user_agents(&self, app: &Application, rules: String) {
        self.write(app, |lists| lists.blocked_user_agents = rules)
            .await;
    }

    pub async fn monitored_user_agents(&self, app: &Application) -> String {
        self.read(app, |lists| lists.monitored_user_agents.clone())
            .await
    }

    pub async fn set_monitored_user_agents(&self, app: &Application, rules: String) {
        self.write(app, |lists| lists.monitored_user_agents = rules)
            .await;
    }

    pub async fn user_agent_details(&self, app: &Application) -> Vec<Value> {
        self.read(app, |lists| lists.user_agent_details.clone())
            .await
    }

    pub async fn set_user_agent_details(&self, app: &Application, details: Vec<Value>) {
        self.write(app, |lists| lists.user_agent_details = details)
            .await;
    }

    /// Applies a validated update under one lock and bumps the config
    /// timestamp once. Absent optional fields leave their collection untouched.
    pub async fn apply(&self, app: &Application, update: ListUpdate) {
        self.write(app, |lists| {
            lists.blocked_ips = update.blocked_ip_addresses;
            if let Some(ips) = update.allowed_ip_addresses {
                lists.allowed_ips = ips;
            }
            if let Some(ips) = update.monitored_ip_addresses {
                lists.monitored_ips = ips;
            }
            if let Some(rules) = update.blocked_user_agents {
                lists.blocked_user_agents = rules;
            }
            if let Some(rules) = update.monitored_user_agents {
                lists.monitored_user_agents = rules;
            }
            if let Some(details) = update.user_agent_details {
                lists.user_agent_details = details;
            }
        })
        .await;
        tracing::info!(service_id = app.id, "firewall lists updated");
    }

    pub async fn snapshot(&self, app: &Application) -> FirewallLists {
        let entry = self.read(app, AppLists::clone).await;
        FirewallLists {
            success: true,
            service_id: app.id,
            blocked_ip_addresses: IpListGroup::wrap(entry.blocked_ips),
            allowed_ip_addresses: IpListGroup::wrap(entry.allowed_ips),
            monitored_ip_addresses: IpListGroup::wrap(entry.monitored_ips),
            blocked_user_agents: entry.blocked_user_agents,
            monitored_user_agents: entry.monitored_user_agents,
            user_agent_details: entry.user_agent_details,
        }
    }
}
