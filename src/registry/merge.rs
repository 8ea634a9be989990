//! Reconciling two registry snapshots.
//!
//! `merge(base, incoming)` takes the snapshot a writer wants to publish and
//! the state it just observed on disk, and produces a document that keeps
//! every agent from both sides. It is pure and idempotent.

use crate::models::{AgentRecord, Registry};
use std::collections::HashMap;

/// Merge `base` (what the caller intends to publish) with `incoming`
/// (freshly observed state).
pub fn merge(base: &Registry, incoming: &Registry) -> Registry {
    let mut extra = base.extra.clone();
    for (key, value) in &incoming.extra {
        if !value.is_null() {
            extra.insert(key.clone(), value.clone());
        }
    }

    Registry {
        version: if incoming.version.is_empty() {
            base.version.clone()
        } else {
            incoming.version.clone()
        },
        agents: merge_records(&base.agents, &incoming.agents),
        hall_of_fame: merge_records(&base.hall_of_fame, &incoming.hall_of_fame),
        system_lead: prefer_incoming(&base.system_lead, &incoming.system_lead),
        config: prefer_incoming(&base.config, &incoming.config),
        last_spawn: latest_timestamp(base.last_spawn.as_deref(), incoming.last_spawn.as_deref()),
        last_evaluation: latest_timestamp(
            base.last_evaluation.as_deref(),
            incoming.last_evaluation.as_deref(),
        ),
        specializations_note: prefer_incoming(
            &base.specializations_note,
            &incoming.specializations_note,
        ),
        extra,
    }
}

/// Union two record lists by id.
///
/// When an id appears on both sides the record with the greater `spawned_at`
/// wins; on a tie the `base` record is kept. The result is sorted by
/// `spawned_at`, with records that share a timestamp left in first-seen order.
pub fn merge_records(base: &[AgentRecord], incoming: &[AgentRecord]) -> Vec<AgentRecord> {
    let mut merged: Vec<AgentRecord> = Vec::with_capacity(base.len() + incoming.len());
    let mut index: HashMap<&str, usize> = HashMap::new();

    for record in base.iter().chain(incoming) {
        match index.get(record.id.as_str()) {
            Some(&pos) => {
                if record.spawned_at > merged[pos].spawned_at {
                    merged[pos] = record.clone();
                }
            }
            None => {
                index.insert(record.id.as_str(), merged.len());
                merged.push(record.clone());
            }
        }
    }

    sort_records(&mut merged);
    merged
}

/// Stable sort ascending by `spawned_at`.
///
/// Records with equal timestamps keep their relative order, so an already
/// ordered list is never reshuffled.
pub fn sort_records(records: &mut [AgentRecord]) {
    records.sort_by(|a, b| a.spawned_at.cmp(&b.spawned_at));
}

/// Greatest ISO-8601 string wins; `None` only when both are absent.
pub fn latest_timestamp(a: Option<&str>, b: Option<&str>) -> Option<String> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.max(b).to_string()),
        (Some(a), None) => Some(a.to_string()),
        (None, Some(b)) => Some(b.to_string()),
        (None, None) => None,
    }
}

fn prefer_incoming<T: Clone>(base: &Option<T>, incoming: &Option<T>) -> Option<T> {
    incoming.clone().or_else(|| base.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::store;
    use proptest::prelude::*;
    use serde_json::json;

    fn agent(id: &str, spawned_at: &str) -> AgentRecord {
        AgentRecord::new(id, spawned_at)
    }

    fn registry_with(agents: Vec<AgentRecord>) -> Registry {
        Registry {
            agents,
            ..Registry::default()
        }
    }

    #[test]
    fn test_disjoint_additions_are_both_kept_and_sorted() {
        let shared = agent("agent-1", "2025-01-01T00:00:00Z");
        let base = registry_with(vec![shared.clone(), agent("agent-3", "2025-01-03T00:00:00Z")]);
        let incoming = registry_with(vec![shared, agent("agent-2", "2025-01-02T00:00:00Z")]);

        let merged = merge(&base, &incoming);

        assert_eq!(merged.agent_ids(), vec!["agent-1", "agent-2", "agent-3"]);
    }

    #[test]
    fn test_same_id_keeps_later_spawned_record() {
        let old = agent("agent-1", "2025-01-01T00:00:00Z");
        let mut respawned = agent("agent-1", "2025-02-01T00:00:00Z");
        respawned.metrics.insert("score".into(), json!(9));

        let merged = merge_records(&[old.clone()], &[respawned.clone()]);
        assert_eq!(merged, vec![respawned.clone()]);

        let merged = merge_records(&[respawned.clone()], &[old]);
        assert_eq!(merged, vec![respawned]);
    }

    #[test]
    fn test_same_id_tie_keeps_base() {
        let mut mine = agent("agent-1", "2025-01-01T00:00:00Z");
        mine.metrics.insert("score".into(), json!(1));
        let theirs = agent("agent-1", "2025-01-01T00:00:00Z");

        let merged = merge_records(&[mine.clone()], &[theirs]);
        assert_eq!(merged, vec![mine]);
    }

    #[test]
    fn test_tied_spawn_times_keep_document_order() {
        let x = registry_with(vec![
            agent("agent-b", "2025-01-01T00:00:00Z"),
            agent("agent-a", "2025-01-01T00:00:00Z"),
        ]);

        let merged = merge(&x, &x);
        assert_eq!(merged.agent_ids(), vec!["agent-b", "agent-a"]);
        assert_eq!(merged, x);

        let incoming = registry_with(vec![agent("agent-c", "2025-01-01T00:00:00Z")]);
        let merged = merge(&x, &incoming);
        assert_eq!(merged.agent_ids(), vec!["agent-b", "agent-a", "agent-c"]);
    }

    #[test]
    fn test_timestamps_take_the_greatest() {
        let base = Registry {
            last_spawn: Some("2025-03-01T00:00:00Z".into()),
            last_evaluation: None,
            ..Registry::default()
        };
        let incoming = Registry {
            last_spawn: Some("2025-02-01T00:00:00Z".into()),
            last_evaluation: Some("2025-01-05T00:00:00Z".into()),
            ..Registry::default()
        };

        let merged = merge(&base, &incoming);
        assert_eq!(merged.last_spawn.as_deref(), Some("2025-03-01T00:00:00Z"));
        assert_eq!(merged.last_evaluation.as_deref(), Some("2025-01-05T00:00:00Z"));
    }

    #[test]
    fn test_incoming_scalars_win_only_when_defined() {
        let base = Registry {
            system_lead: Some("agent-1".into()),
            specializations_note: Some("parsers".into()),
            ..Registry::default()
        };
        let incoming = Registry {
            version: "2.1.0".into(),
            system_lead: None,
            specializations_note: Some("codecs".into()),
            config: None,
            ..Registry::default()
        };

        let merged = merge(&base, &incoming);
        assert_eq!(merged.version, "2.1.0");
        assert_eq!(merged.system_lead.as_deref(), Some("agent-1"));
        assert_eq!(merged.specializations_note.as_deref(), Some("codecs"));
        assert_eq!(merged.config, base.config);
    }

    #[test]
    fn test_unknown_keys_union() {
        let mut base = Registry::default();
        base.extra.insert("mine".into(), json!(1));
        let mut incoming = Registry::default();
        incoming.extra.insert("theirs".into(), json!(2));

        let merged = merge(&base, &incoming);
        assert_eq!(merged.extra.get("mine"), Some(&json!(1)));
        assert_eq!(merged.extra.get("theirs"), Some(&json!(2)));
    }

    fn arb_registry() -> impl Strategy<Value = Registry> {
        // Few distinct days so equal spawn times in arbitrary id order are common.
        let agent = ("agent-[a-z0-9]{1,2}", 1u32..4).prop_map(|(id, day)| {
            AgentRecord::new(id, format!("2025-01-{day:02}T00:00:00Z"))
        });
        (
            prop::collection::vec(agent.clone(), 0..8),
            prop::collection::vec(agent, 0..4),
            prop::option::of("agent-[0-9]"),
            prop::option::of((1u32..28).prop_map(|d| format!("2025-02-{d:02}T00:00:00Z"))),
        )
            .prop_map(|(agents, hall, lead, last_spawn)| Registry {
                // Unique ids, stably ordered by spawn time; ties stay unsorted by id.
                agents: merge_records(&agents, &[]),
                hall_of_fame: merge_records(&hall, &[]),
                system_lead: lead,
                last_spawn,
                ..Registry::default()
            })
    }

    proptest! {
        #[test]
        fn prop_merge_with_self_is_identity(x in arb_registry()) {
            prop_assert_eq!(merge(&x, &x), x);
        }

        #[test]
        fn prop_merge_never_drops_agents(a in arb_registry(), b in arb_registry()) {
            let merged = merge(&a, &b);
            for id in a.agent_ids().into_iter().chain(b.agent_ids()) {
                prop_assert_eq!(merged.agents.iter().filter(|r| r.id == id).count(), 1);
            }
        }

        #[test]
        fn prop_merge_converges(a in arb_registry(), b in arb_registry()) {
            let once = merge(&a, &b);
            let twice = merge(&once, &b);
            prop_assert_eq!(store::encode(&once).unwrap(), store::encode(&twice).unwrap());
        }
    }
}
