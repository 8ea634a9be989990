//! Data models for the agent registry document.
//!
//! The registry is a single JSON document shared by every writer. Fields the
//! registry does not know about are kept in `extra` maps so that a writer
//! running an older build never strips data added by a newer one.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Schema version written into freshly created registries.
pub const DEFAULT_VERSION: &str = "2.0.0";

/// Status given to agents when they are added without one.
pub const STATUS_ACTIVE: &str = "active";

/// Status stamped onto agents taken out of the live list.
pub const STATUS_REMOVED: &str = "removed";

/// One agent entry, either live (`agents`) or archived (`hall_of_fame`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRecord {
    /// Unique key within a list.
    pub id: String,
    /// ISO-8601 spawn time; ordering and tie-break key.
    #[serde(default)]
    pub spawned_at: String,
    #[serde(default = "default_status")]
    pub status: String,
    /// Evaluation metrics, replaced wholesale by `update-metrics`.
    #[serde(default)]
    pub metrics: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub removed_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub removal_reason: Option<String>,
    /// Free-form fields (specialization, prompt, lineage, ...).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_status() -> String {
    STATUS_ACTIVE.to_string()
}

impl AgentRecord {
    /// Creates an active agent with no metrics.
    #[cfg(test)]
    pub fn new(id: impl Into<String>, spawned_at: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            spawned_at: spawned_at.into(),
            status: default_status(),
            metrics: Map::new(),
            removed_at: None,
            removal_reason: None,
            extra: Map::new(),
        }
    }

    /// Checks the fields the registry relies on for identity and ordering.
    pub fn validate(&self) -> Result<(), String> {
        if self.id.trim().is_empty() {
            return Err("agent id must not be empty".to_string());
        }
        if self.id.contains(',') {
            return Err(format!("agent id '{}' must not contain ','", self.id));
        }
        if chrono::DateTime::parse_from_rfc3339(&self.spawned_at).is_err() {
            return Err(format!(
                "agent '{}' has invalid spawned_at '{}' (expected RFC 3339)",
                self.id, self.spawned_at
            ));
        }
        Ok(())
    }
}

impl fmt::Display for AgentRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}, spawned {})", self.id, self.status, self.spawned_at)
    }
}

/// The full decoded registry document at one point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Registry {
    #[serde(default = "default_version")]
    pub version: String,
    /// Live agents, ascending by `spawned_at`.
    #[serde(default)]
    pub agents: Vec<AgentRecord>,
    #[serde(default)]
    pub hall_of_fame: Vec<AgentRecord>,
    #[serde(default)]
    pub system_lead: Option<String>,
    #[serde(default)]
    pub config: Option<Map<String, Value>>,
    #[serde(default)]
    pub last_spawn: Option<String>,
    #[serde(default)]
    pub last_evaluation: Option<String>,
    #[serde(default)]
    pub specializations_note: Option<String>,
    /// Top-level keys this build does not model.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_version() -> String {
    DEFAULT_VERSION.to_string()
}

impl Default for Registry {
    /// The canonical empty skeleton written on first use.
    fn default() -> Self {
        Self {
            version: default_version(),
            agents: Vec::new(),
            hall_of_fame: Vec::new(),
            system_lead: None,
            config: Some(Map::new()),
            last_spawn: None,
            last_evaluation: None,
            specializations_note: None,
            extra: Map::new(),
        }
    }
}

impl Registry {
    /// Returns the live agent with the given id.
    pub fn agent(&self, id: &str) -> Option<&AgentRecord> {
        self.agents.iter().find(|a| a.id == id)
    }

    pub fn contains_agent(&self, id: &str) -> bool {
        self.agent(id).is_some()
    }

    /// Ids of live agents in list order.
    pub fn agent_ids(&self) -> Vec<&str> {
        self.agents.iter().map(|a| a.id.as_str()).collect()
    }
}

/// Counts and stamps printed by `show --summary`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RegistrySummary {
    pub version: String,
    pub active: usize,
    pub hall_of_fame: usize,
    pub system_lead: Option<String>,
    pub last_spawn: Option<String>,
    pub last_evaluation: Option<String>,
    /// Live agents grouped by `status`.
    pub by_status: std::collections::BTreeMap<String, usize>,
}

impl RegistrySummary {
    pub fn from_registry(registry: &Registry) -> Self {
        let mut by_status = std::collections::BTreeMap::new();
        for agent in &registry.agents {
            *by_status.entry(agent.status.clone()).or_insert(0) += 1;
        }

        Self {
            version: registry.version.clone(),
            active: registry.agents.len(),
            hall_of_fame: registry.hall_of_fame.len(),
            system_lead: registry.system_lead.clone(),
            last_spawn: registry.last_spawn.clone(),
            last_evaluation: registry.last_evaluation.clone(),
            by_status,
        }
    }
}

impl fmt::Display for RegistrySummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Registry v{}", self.version)?;
        writeln!(f, "   Active agents: {}", self.active)?;
        writeln!(f, "   Hall of fame: {}", self.hall_of_fame)?;
        writeln!(
            f,
            "   System lead: {}",
            self.system_lead.as_deref().unwrap_or("-")
        )?;
        writeln!(
            f,
            "   Last spawn: {}",
            self.last_spawn.as_deref().unwrap_or("-")
        )?;
        write!(
            f,
            "   Last evaluation: {}",
            self.last_evaluation.as_deref().unwrap_or("-")
        )?;
        for (status, count) in &self.by_status {
            write!(f, "\n   - {}: {}", status, count)?;
        }
        Ok(())
    }
}
