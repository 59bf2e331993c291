//! Agent card: immutable description of one remote agent.

use serde::{Deserialize, Serialize};

/// How an agent can be spoken to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommunicationMode {
    Sync,
    Streaming,
}

fn default_version() -> String {
    "0.0.0".to_string()
}

fn default_modes() -> Vec<CommunicationMode> {
    vec![CommunicationMode::Sync]
}

/// Immutable description of a remote agent. Registered at boot from the
/// registry file or on first contact, refreshed by health polling.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AgentCard {
    pub name: String,
    #[serde(default = "default_version")]
    pub version: String,
    /// Base URL; the transport appends `/a2a` and `/agent-card`.
    pub endpoint: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default = "default_modes")]
    pub communication_modes: Vec<CommunicationMode>,
}

impl AgentCard {
    pub fn supports_streaming(&self) -> bool {
        self.communication_modes
            .contains(&CommunicationMode::Streaming)
    }
}
