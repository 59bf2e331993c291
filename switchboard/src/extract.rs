//! Pattern-driven entity extraction from agent payloads.
//!
//! Rules are data, not code: each binds `(regex, entity_type, entity_system)`
//! and is loaded from a YAML file. The extractor walks every string leaf of a
//! JSON payload, applies every rule, and dedups candidates by
//! `(entity_id, entity_system)` before they reach the memory graph.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// One extraction rule as it appears in the rules file.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EntityRule {
    /// Regex matched against string leaves. The first capture group, when
    /// present, is the entity id; otherwise the whole match is.
    pub pattern: String,
    pub entity_type: String,
    pub entity_system: String,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    #[serde(default)]
    pub tags: Vec<String>,
}

fn default_confidence() -> f64 {
    0.9
}

/// A candidate `DomainEntity` produced by a rule hit.
#[derive(Clone, Debug, PartialEq)]
pub struct EntityCandidate {
    pub entity_id: String,
    pub entity_system: String,
    pub entity_type: String,
    pub confidence: f64,
    pub tags: Vec<String>,
    /// JSON pointer-ish path of the matched leaf, for summaries.
    pub source_path: String,
    /// Nearest enclosing JSON object, used as the node content.
    pub context: Value,
}

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("read rules file: {0}")]
    Io(#[from] std::io::Error),
    #[error("parse rules: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid pattern `{pattern}`: {message}")]
    Pattern { pattern: String, message: String },
}

/// Extraction seam: implementations turn an agent payload into entity candidates.
pub trait EntityExtractor: Send + Sync {
    fn extract(&self, payload: &Value) -> Vec<EntityCandidate>;
}

#[derive(Debug)]
struct CompiledRule {
    regex: Regex,
    rule: EntityRule,
}

/// Rule-driven extractor over JSON trees.
#[derive(Debug)]
pub struct PatternExtractor {
    rules: Vec<CompiledRule>,
}

impl PatternExtractor {
    pub fn new(rules: Vec<EntityRule>) -> Result<Self, ExtractError> {
        let mut compiled = Vec::with_capacity(rules.len());
        for rule in rules {
            let regex = Regex::new(&rule.pattern).map_err(|e| ExtractError::Pattern {
                pattern: rule.pattern.clone(),
                message: e.to_string(),
            })?;
            compiled.push(CompiledRule { regex, rule });
        }
        Ok(Self { rules: compiled })
    }

    /// No rules: extracts nothing. Useful when no rules file is configured.
    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    pub fn from_yaml_str(content: &str) -> Result<Self, ExtractError> {
        let rules: Vec<EntityRule> = serde_yaml::from_str(content)?;
        Self::new(rules)
    }

    pub fn from_yaml_file(path: impl AsRef<std::path::Path>) -> Result<Self, ExtractError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    fn walk(
        &self,
        value: &Value,
        path: &str,
        enclosing: &Value,
        out: &mut Vec<EntityCandidate>,
    ) {
        match value {
            Value::String(s) => {
                for compiled in &self.rules {
                    for caps in compiled.regex.captures_iter(s) {
                        let id = caps
                            .get(1)
                            .or_else(|| caps.get(0))
                            .map(|m| m.as_str().to_string())
                            .unwrap_or_default();
                        if id.is_empty() {
                            continue;
                        }
                        out.push(EntityCandidate {
                            entity_id: id,
                            entity_system: compiled.rule.entity_system.clone(),
                            entity_type: compiled.rule.entity_type.clone(),
                            confidence: compiled.rule.confidence,
                            tags: compiled.rule.tags.clone(),
                            source_path: path.to_string(),
                            context: enclosing.clone(),
                        });
                    }
                }
            }
            Value::Object(map) => {
                for (k, v) in map {
                    let child_path = format!("{}/{}", path, k);
                    // Children of an object use that object as their context.
                    self.walk(v, &child_path, value, out);
                }
            }
            Value::Array(items) => {
                for (i, v) in items.iter().enumerate() {
                    let child_path = format!("{}/{}", path, i);
                    self.walk(v, &child_path, enclosing, out);
                }
            }
            _ => {}
        }
    }
}

impl EntityExtractor for PatternExtractor {
    fn extract(&self, payload: &Value) -> Vec<EntityCandidate> {
        let mut raw = Vec::new();
        self.walk(payload, "", payload, &mut raw);

        // Dedup by (entity_id, entity_system); keep the highest confidence hit.
        let mut out: Vec<EntityCandidate> = Vec::new();
        for candidate in raw {
            match out
                .iter_mut()
                .find(|c| c.entity_id == candidate.entity_id
                    && c.entity_system == candidate.entity_system)
            {
                Some(existing) => {
                    if candidate.confidence > existing.confidence {
                        *existing = candidate;
                    }
                }
                None => out.push(candidate),
            }
        }
        out
    }
}
