//! Pure registry mutations.
//!
//! Each function takes a snapshot by value and returns the next one. They
//! never read the clock; callers pass `now` so a retried attempt produces the
//! same document it would have produced the first time.

use crate::error::{RegistryError, Result};
use crate::models::{AgentRecord, Registry, STATUS_REMOVED};
use crate::registry::merge::{latest_timestamp, merge, sort_records};
use serde_json::{Map, Value};

/// Append `record` to the live agents and stamp `last_spawn`.
///
/// Adding an id that is already live is a no-op, so replaying the same add
/// after a rejected push never duplicates the agent.
pub fn add_agent(mut registry: Registry, record: AgentRecord) -> Registry {
    if registry.contains_agent(&record.id) {
        return registry;
    }

    registry.last_spawn = latest_timestamp(registry.last_spawn.as_deref(), Some(&record.spawned_at));
    registry.agents.push(record);
    sort_records(&mut registry.agents);
    registry
}

/// Take the listed agents out of the live list.
///
/// The removed records are returned tagged with `status`, `removed_at` and
/// `removal_reason`; they are not written back into the registry.
pub fn remove_agents(
    mut registry: Registry,
    ids: &[String],
    reason: &str,
    now: &str,
) -> (Registry, Vec<AgentRecord>) {
    let (removed, kept): (Vec<_>, Vec<_>) = registry
        .agents
        .into_iter()
        .partition(|agent| ids.iter().any(|id| *id == agent.id));

    registry.agents = kept;

    let removed = removed
        .into_iter()
        .map(|mut agent| {
            agent.status = STATUS_REMOVED.to_string();
            agent.removed_at = Some(now.to_string());
            agent.removal_reason = Some(reason.to_string());
            agent
        })
        .collect();

    (registry, removed)
}

/// Replace the metrics of `agent_id` and stamp `last_evaluation`.
///
/// Live agents are searched first, then the hall of fame.
pub fn update_metrics(
    mut registry: Registry,
    agent_id: &str,
    metrics: Map<String, Value>,
    now: &str,
) -> Result<Registry> {
    let target = registry
        .agents
        .iter_mut()
        .chain(registry.hall_of_fame.iter_mut())
        .find(|agent| agent.id == agent_id)
        .ok_or_else(|| RegistryError::AgentNotFound(agent_id.to_string()))?;

    target.metrics = metrics;
    registry.last_evaluation = latest_timestamp(registry.last_evaluation.as_deref(), Some(now));
    Ok(registry)
}

/// Point `system_lead` at a live agent.
pub fn set_system_lead(mut registry: Registry, agent_id: &str) -> Result<Registry> {
    if !registry.contains_agent(agent_id) {
        return Err(RegistryError::AgentNotFound(agent_id.to_string()));
    }
    registry.system_lead = Some(agent_id.to_string());
    Ok(registry)
}

/// Fold a snapshot produced elsewhere into the current registry.
///
/// `snapshot` plays the part of the writer's intended state and `current` the
/// freshly pulled one, so concurrent additions on either side survive.
pub fn import_snapshot(current: Registry, snapshot: &Registry) -> Registry {
    merge(snapshot, &current)
}
