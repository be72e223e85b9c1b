//! The transition graph handed to the transition engine.

use crate::action::Action;
use crate::types::{ActionId, RscId};
use crate::working_set::WorkingSet;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::{debug, trace, warn};
use warden_core::score::INFINITY_S;
use warden_core::{task, AttrMap};

/// Prefix of the executor meta attributes in an action's attributes
pub const META_PREFIX: &str = "CRM_meta_";

/// How the transition engine executes an action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    /// Sent to the executor on the target node
    RscOp,
    /// A milestone; confirmed as soon as its inputs complete
    PseudoEvent,
    /// Carried out by the cluster itself (fencing, shutdown, refresh)
    CrmEvent,
}

/// The resource an action operates on
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ResourceDescriptor {
    pub id: String,
    pub long_id: String,
    pub class: String,
    pub provider: Option<String>,
    #[serde(rename = "type")]
    pub agent: String,
}

/// One action of the graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct GraphAction {
    pub id: usize,
    pub kind: ActionKind,
    pub operation: String,
    pub operation_key: String,
    pub on_node: Option<String>,
    pub on_node_uuid: Option<String>,
    pub resource: Option<ResourceDescriptor>,
    pub attributes: AttrMap,
}

/// An action together with the actions that must complete before it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Synapse {
    pub id: usize,
    pub priority: i32,
    pub action: GraphAction,
    /// Ids of the actions this one waits for
    pub inputs: Vec<usize>,
}

/// The output of one scheduling run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TransitionGraph {
    pub transition_id: u64,
    pub cluster_delay: String,
    pub stonith_timeout: String,
    pub failed_stop_offset: String,
    pub failed_start_offset: String,
    pub batch_limit: u32,
    pub synapses: Vec<Synapse>,
}

impl TransitionGraph {
    /// The synapse of the action with the given operation key, on `node`
    /// when one is given
    pub fn find(&self, key: &str, node: Option<&str>) -> Option<&Synapse> {
        self.synapses.iter().find(|s| {
            s.action.operation_key == key
                && node.is_none_or(|n| s.action.on_node.as_deref() == Some(n))
        })
    }

    /// Synapses running a task, in emission order
    pub fn with_operation<'a>(&'a self, operation: &'a str) -> impl Iterator<Item = &'a Synapse> + 'a {
        self.synapses
            .iter()
            .filter(move |s| s.action.operation == operation)
    }

    /// Whether action `before` is a direct input of action `after`
    pub fn is_input(&self, before: &str, after: &str) -> bool {
        let Some(before) = self.find(before, None) else {
            return false;
        };
        self.find(after, None)
            .is_some_and(|s| s.inputs.contains(&before.action.id))
    }
}

/// Whether an action survives into the graph
fn should_dump(ws: &WorkingSet, action: &Action) -> bool {
    if action.optional {
        trace!("Skipping optional {}", action.uuid);
        return false;
    }
    if !action.runnable {
        trace!("Skipping unrunnable {}", action.uuid);
        return false;
    }
    if action.pseudo {
        return true;
    }
    if let Some(rsc) = action.rsc {
        let probe = action.task == task::MONITOR && !action.is_recurring();
        if !ws.rsc(rsc).managed && !probe && action.task != task::CANCEL {
            trace!("Skipping {}: resource is unmanaged", action.uuid);
            return false;
        }
    }
    match action.node {
        Some(node) if ws.node(node).online => true,
        Some(node) if action.task == task::FENCE => {
            trace!("Fencing {} while it is offline", ws.uname(node));
            true
        }
        Some(node) => {
            warn!("Action {} scheduled on offline node {}", action.uuid, ws.uname(node));
            false
        }
        None if action.rsc.is_none() => true,
        None => {
            warn!("Action {} has no node", action.uuid);
            false
        }
    }
}

/// Collects the actions emitted by the variants' `expand`
#[derive(Debug, Default)]
pub struct GraphBuilder {
    order: Vec<ActionId>,
    seen: BTreeSet<ActionId>,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Emit one action if it survives pruning
    pub fn add_action(&mut self, ws: &WorkingSet, id: ActionId) {
        if self.seen.contains(&id) || !should_dump(ws, ws.action(id)) {
            return;
        }
        self.seen.insert(id);
        self.order.push(id);
    }

    /// Emit the surviving actions of one resource
    pub fn add_rsc_actions(&mut self, ws: &WorkingSet, rsc: RscId) {
        for id in &ws.rsc(rsc).actions {
            self.add_action(ws, *id);
        }
    }

    /// Emit the actions that belong to no resource
    pub fn add_cluster_actions(&mut self, ws: &WorkingSet) {
        let ids: Vec<ActionId> = ws
            .actions
            .iter()
            .filter(|a| a.rsc.is_none())
            .map(|a| a.id)
            .collect();
        for id in ids {
            self.add_action(ws, id);
        }
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Build the graph and mark the emitted actions as dumped
    pub fn finish(self, ws: &mut WorkingSet, transition_id: u64) -> TransitionGraph {
        let mut synapses = Vec::with_capacity(self.order.len());
        for (idx, id) in self.order.iter().enumerate() {
            let action = ws.action(*id);
            let mut inputs: Vec<usize> = action
                .actions_before
                .iter()
                .filter(|w| self.seen.contains(&w.action))
                .map(|w| w.action.0)
                .collect();
            inputs.sort_unstable();
            inputs.dedup();

            let rsc_priority = action.rsc.map(|r| ws.rsc(r).priority).unwrap_or(0);
            synapses.push(Synapse {
                id: idx,
                priority: action.priority.max(rsc_priority),
                action: graph_action(ws, action),
                inputs,
            });
        }
        for id in &self.order {
            ws.action_mut(*id).dumped = true;
        }

        let options = &ws.options;
        let graph = TransitionGraph {
            transition_id,
            cluster_delay: options.cluster_delay.clone(),
            stonith_timeout: options.stonith_timeout.clone(),
            failed_stop_offset: INFINITY_S.to_string(),
            failed_start_offset: if options.start_failure_is_fatal {
                INFINITY_S.to_string()
            } else {
                "1".to_string()
            },
            batch_limit: options.batch_limit,
            synapses,
        };
        debug!(
            "Transition {} has {} synapses",
            transition_id,
            graph.synapses.len()
        );
        graph
    }
}

fn meta_key(key: &str) -> String {
    format!("{}{}", META_PREFIX, key.replace('-', "_"))
}

fn graph_action(ws: &WorkingSet, action: &Action) -> GraphAction {
    let kind = if action.pseudo {
        ActionKind::PseudoEvent
    } else if action.rsc.is_some() {
        ActionKind::RscOp
    } else {
        ActionKind::CrmEvent
    };

    let mut attributes = AttrMap::new();
    let mut resource = None;
    if let Some(rsc) = action.rsc {
        let r = ws.rsc(rsc);
        if action.task != task::STOP && kind == ActionKind::RscOp {
            attributes.extend(r.params.iter().map(|(k, v)| (k.clone(), v.clone())));
        }

        let mut ancestry = vec![r.id.clone()];
        let mut meta = AttrMap::new();
        if let Some(instance) = r.instance {
            meta.insert("clone".to_string(), instance.to_string());
        }
        let mut parent = r.parent;
        while let Some(p) = parent {
            ws.fns(p).append_meta(ws, p, &mut meta);
            ancestry.push(ws.rsc(p).id.clone());
            parent = ws.rsc(p).parent;
        }
        attributes.extend(meta.iter().map(|(k, v)| (meta_key(k), v.clone())));

        ancestry.reverse();
        resource = Some(ResourceDescriptor {
            id: r.id.clone(),
            long_id: ancestry.join(":"),
            class: r.class.clone(),
            provider: r.provider.clone(),
            agent: r.agent.clone(),
        });
    }

    attributes.extend(action.meta.iter().map(|(k, v)| (meta_key(k), v.clone())));
    attributes.extend(action.extra.iter().map(|(k, v)| (k.clone(), v.clone())));

    let node = action.node.map(|n| ws.node(n));
    GraphAction {
        id: action.id.0,
        kind,
        operation: action.task.clone(),
        operation_key: action.uuid.clone(),
        on_node: node.map(|n| n.uname.clone()),
        on_node_uuid: node.map(|n| n.id.clone()),
        resource,
        attributes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{NodeId, OrderType};
    use crate::working_set::tests::{add_primitive, create_test_set};

    #[test]
    fn test_pruned_actions_stay_out() {
        let mut ws = create_test_set(&["n1"]);
        let rsc = add_primitive(&mut ws, "db");
        ws.rsc_mut(rsc).params.insert("port".to_string(), "5432".to_string());

        let start = ws.custom_action(Some(rsc), "db_start_0", task::START, Some(NodeId(0)), false);
        let stop = ws.custom_action(Some(rsc), "db_stop_0", task::STOP, Some(NodeId(0)), false);
        let optional = ws.custom_action(Some(rsc), "db_monitor_10000", task::MONITOR, Some(NodeId(0)), true);
        ws.order_actions(stop, start, OrderType::RESTART);
        ws.order_actions(start, optional, OrderType::MANDATORY);

        let mut builder = GraphBuilder::new();
        builder.add_rsc_actions(&ws, rsc);
        assert_eq!(builder.len(), 2);

        let graph = builder.finish(&mut ws, 7);
        assert_eq!(graph.transition_id, 7);
        assert_eq!(graph.failed_start_offset, "INFINITY");
        assert!(graph.is_input("db_stop_0", "db_start_0"));
        assert!(graph.find("db_monitor_10000", None).is_none());

        let start = graph.find("db_start_0", Some("n1")).map(|s| &s.action);
        assert_eq!(start.map(|a| a.kind), Some(ActionKind::RscOp));
        assert_eq!(start.and_then(|a| a.attributes.get("port")).map(String::as_str), Some("5432"));
        assert_eq!(
            start.and_then(|a| a.attributes.get("CRM_meta_timeout")).map(String::as_str),
            Some("20000")
        );
        let stop = graph.find("db_stop_0", None).map(|s| &s.action);
        assert!(stop.is_some_and(|a| !a.attributes.contains_key("port")));
        assert!(ws.action(ActionId(0)).dumped);
    }

    #[test]
    fn test_cluster_actions_are_crm_events() {
        let mut ws = create_test_set(&["n1"]);
        let fence = ws.custom_action(None, "stonith-n1", task::FENCE, Some(NodeId(0)), false);
        ws.nodes[0].online = false;
        let all_stopped = ws.pseudo_op(task::ALL_STOPPED);
        ws.set_mandatory(all_stopped);
        ws.order_actions(fence, all_stopped, OrderType::MANDATORY);

        let mut builder = GraphBuilder::new();
        builder.add_cluster_actions(&ws);
        let graph = builder.finish(&mut ws, 1);

        let kinds: Vec<ActionKind> = graph.synapses.iter().map(|s| s.action.kind).collect();
        assert_eq!(kinds, vec![ActionKind::CrmEvent, ActionKind::PseudoEvent]);
        assert!(graph.is_input("stonith-n1", task::ALL_STOPPED));
    }
}
