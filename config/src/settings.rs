//! Typed orchestrator settings read from `ORCH_*` environment variables.
//!
//! Unknown variables are ignored; malformed numeric values fall back to the default.

use std::path::PathBuf;
use std::time::Duration;

/// Settings that affect the orchestrator core. Everything else is ignored.
#[derive(Clone, Debug)]
pub struct Settings {
    /// Listen port for the transport surface (`ORCH_PORT`, default 8000).
    pub port: u16,
    /// Path to the YAML agent registry file (`ORCH_AGENTS_CONFIG`), if set.
    pub agents_config: Option<PathBuf>,
    /// Path to the YAML entity-extraction rules (`ORCH_ENTITY_RULES`), if set.
    pub entity_rules: Option<PathBuf>,
    /// Checkpoint directory for the SQLite store (`ORCH_CHECKPOINT_DIR`), if set;
    /// when absent the supervisor falls back to an in-memory store.
    pub checkpoint_dir: Option<PathBuf>,
    /// Upper bound on workflow steps (`ORCH_MAX_STEPS`, default 100).
    pub max_steps: usize,
    /// Token budget for the trimmed conversation window (`ORCH_TOKEN_BUDGET`, default 4000).
    pub token_budget: usize,
    /// Idle thread TTL before GC (`ORCH_IDLE_TTL` in seconds, default 24h).
    pub idle_ttl: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            port: 8000,
            agents_config: None,
            entity_rules: None,
            checkpoint_dir: None,
            max_steps: 100,
            token_budget: 4000,
            idle_ttl: Duration::from_secs(24 * 60 * 60),
        }
    }
}

fn parsed_or_default<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Settings {
    /// Reads settings from the process environment, applying defaults for
    /// anything unset or unparseable.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            port: parsed_or_default("ORCH_PORT", defaults.port),
            agents_config: std::env::var("ORCH_AGENTS_CONFIG").ok().map(PathBuf::from),
            entity_rules: std::env::var("ORCH_ENTITY_RULES").ok().map(PathBuf::from),
            checkpoint_dir: std::env::var("ORCH_CHECKPOINT_DIR").ok().map(PathBuf::from),
            max_steps: parsed_or_default("ORCH_MAX_STEPS", defaults.max_steps),
            token_budget: parsed_or_default("ORCH_TOKEN_BUDGET", defaults.token_budget),
            idle_ttl: Duration::from_secs(parsed_or_default(
                "ORCH_IDLE_TTL",
                defaults.idle_ttl.as_secs(),
            )),
        }
    }
}
