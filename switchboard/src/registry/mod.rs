//! Agent registry: endpoint discovery, capability index, health polling.
//!
//! Cards are loaded from a YAML registry file at boot and refreshed by a
//! periodic health poll that re-fetches each agent's card. A failed poll marks
//! the agent `offline` but keeps its last-known card. The registry never blocks
//! engine progress: an unknown capability is an ordinary empty lookup, and the
//! planner routes around it.

mod card;

pub use card::{AgentCard, CommunicationMode};

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::rpc::A2aClient;

/// Error for registry file loading and card refresh.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("read registry file: {0}")]
    Io(#[from] std::io::Error),
    #[error("parse registry file: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("unknown agent: {0}")]
    UnknownAgent(String),
}

#[derive(Clone, Debug)]
struct RegistryEntry {
    card: AgentCard,
    online: bool,
    last_seen: DateTime<Utc>,
}

/// Current set of agent cards, keyed by agent name.
pub struct AgentRegistry {
    agents: DashMap<String, RegistryEntry>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self {
            agents: DashMap::new(),
        }
    }

    /// Loads cards from a YAML registry file (a list of card entries).
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<usize, RegistryError> {
        let content = std::fs::read_to_string(path)?;
        self.load_yaml(&content)
    }

    /// Loads cards from YAML text. Returns how many were registered.
    pub fn load_yaml(&self, content: &str) -> Result<usize, RegistryError> {
        let cards: Vec<AgentCard> = serde_yaml::from_str(content)?;
        let count = cards.len();
        for card in cards {
            self.register(card);
        }
        Ok(count)
    }

    /// Registers (or replaces) a card; the agent starts online.
    pub fn register(&self, card: AgentCard) {
        info!(agent = %card.name, endpoint = %card.endpoint, "agent registered");
        self.agents.insert(
            card.name.clone(),
            RegistryEntry {
                card,
                online: true,
                last_seen: Utc::now(),
            },
        );
    }

    /// Marks an agent offline, keeping its last-known card.
    pub fn mark_offline(&self, name: &str) {
        if let Some(mut entry) = self.agents.get_mut(name) {
            entry.online = false;
        }
    }

    pub fn card(&self, name: &str) -> Option<AgentCard> {
        self.agents.get(name).map(|e| e.card.clone())
    }

    pub fn is_online(&self, name: &str) -> bool {
        self.agents.get(name).map(|e| e.online).unwrap_or(false)
    }

    /// Online agents advertising the given capability. Empty is a normal
    /// outcome, not an error.
    pub fn agents_for_capability(&self, capability: &str) -> Vec<AgentCard> {
        let mut out: Vec<AgentCard> = self
            .agents
            .iter()
            .filter(|e| e.online && e.card.capabilities.iter().any(|c| c == capability))
            .map(|e| e.card.clone())
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }

    /// All cards, online or not.
    pub fn all_cards(&self) -> Vec<AgentCard> {
        let mut out: Vec<AgentCard> = self.agents.iter().map(|e| e.card.clone()).collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }

    /// Capability -> online agent names, for planning prompts. Deterministic order.
    pub fn capability_catalog(&self) -> BTreeMap<String, Vec<String>> {
        let mut catalog: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for entry in self.agents.iter() {
            if !entry.online {
                continue;
            }
            for cap in &entry.card.capabilities {
                catalog
                    .entry(cap.clone())
                    .or_default()
                    .push(entry.card.name.clone());
            }
        }
        for names in catalog.values_mut() {
            names.sort();
        }
        catalog
    }

    /// Re-fetches every agent's card once. Reachable agents come back online
    /// with a fresh card; unreachable ones are marked offline.
    pub async fn poll_once(&self, client: &A2aClient) {
        let names: Vec<(String, String)> = self
            .agents
            .iter()
            .map(|e| (e.key().clone(), e.card.endpoint.clone()))
            .collect();
        for (name, endpoint) in names {
            match client.get_agent_card(&endpoint).await {
                Ok(card) => {
                    debug!(agent = %name, "health poll ok");
                    self.agents.insert(
                        name,
                        RegistryEntry {
                            card,
                            online: true,
                            last_seen: Utc::now(),
                        },
                    );
                }
                Err(e) => {
                    warn!(agent = %name, error = %e, "health poll failed, marking offline");
                    self.mark_offline(&name);
                }
            }
        }
    }

    /// Spawns the periodic health poll (default cadence 60 s). The task runs
    /// until aborted; the registry itself stays usable throughout.
    pub fn spawn_health_poll(
        self: &Arc<Self>,
        client: Arc<A2aClient>,
        every: Duration,
    ) -> tokio::task::JoinHandle<()> {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // First tick fires immediately; skip it so boot-time registration settles.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                registry.poll_once(&client).await;
            }
        })
    }
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn card(name: &str, caps: &[&str]) -> AgentCard {
        AgentCard {
            name: name.to_string(),
            version: "1.0".to_string(),
            endpoint: format!("http://{}", name),
            capabilities: caps.iter().map(|c| c.to_string()).collect(),
            communication_modes: vec![CommunicationMode::Sync],
        }
    }

    /// **Scenario**: Capability lookup returns only online agents, sorted by name.
    #[test]
    fn capability_lookup_filters_offline() {
        let reg = AgentRegistry::new();
        reg.register(card("jira", &["issue_tracking"]));
        reg.register(card("servicenow", &["issue_tracking", "itsm"]));
        reg.mark_offline("servicenow");

        let found = reg.agents_for_capability("issue_tracking");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "jira");
    }

    /// **Scenario**: Unknown capability yields an empty list, not an error.
    #[test]
    fn unknown_capability_is_empty() {
        let reg = AgentRegistry::new();
        reg.register(card("crm", &["crm_read"]));
        assert!(reg.agents_for_capability("quantum_forecast").is_empty());
    }

    /// **Scenario**: YAML registry file loads cards with capabilities and modes.
    #[test]
    fn loads_yaml_registry() {
        let reg = AgentRegistry::new();
        let yaml = r#"
- name: salesforce
  version: "2.1"
  endpoint: http://localhost:8001
  capabilities: [crm_read, crm_write]
  communication_modes: [sync, streaming]
- name: websearch
  endpoint: http://localhost:8004
  capabilities: [web_search]
"#;
        let n = reg.load_yaml(yaml).unwrap();
        assert_eq!(n, 2);
        let sf = reg.card("salesforce").unwrap();
        assert_eq!(sf.version, "2.1");
        assert!(sf
            .communication_modes
            .contains(&CommunicationMode::Streaming));
        // version defaults when omitted
        assert_eq!(reg.card("websearch").unwrap().version, "0.0.0");
    }

    /// **Scenario**: The capability catalog groups online agent names per capability.
    #[test]
    fn catalog_groups_by_capability() {
        let reg = AgentRegistry::new();
        reg.register(card("jira", &["issue_tracking"]));
        reg.register(card("servicenow", &["issue_tracking"]));
        let catalog = reg.capability_catalog();
        assert_eq!(
            catalog.get("issue_tracking"),
            Some(&vec!["jira".to_string(), "servicenow".to_string()])
        );
    }

    /// **Scenario**: Re-registering after offline brings the agent back online.
    #[test]
    fn reregister_marks_online() {
        let reg = AgentRegistry::new();
        reg.register(card("jira", &["issue_tracking"]));
        reg.mark_offline("jira");
        assert!(!reg.is_online("jira"));
        reg.register(card("jira", &["issue_tracking"]));
        assert!(reg.is_online("jira"));
    }
}
