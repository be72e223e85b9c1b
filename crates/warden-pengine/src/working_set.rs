//! The arena owning every node, resource, action and constraint of one run.

use crate::action::{key_interval, Action, META_INTERVAL, META_TIMEOUT};
use crate::constraints::{rsc_key, ColocationConstraint, LocationConstraint, OrderConstraint};
use crate::node::Node;
use crate::resource::Resource;
use crate::types::{ActionId, ActionWrapper, NodeId, OrderType, RscId};
use tracing::{debug, error, info, trace};
use warden_core::types::NoQuorumPolicy;
use warden_core::{merge_weights, score_to_string, task, ClusterOptions};

/// Everything one scheduling run works on
#[derive(Debug, Clone)]
pub struct WorkingSet {
    pub options: ClusterOptions,
    pub have_quorum: bool,
    pub nodes: Vec<Node>,
    pub resources: Vec<Resource>,
    /// Top-level resources, in configuration order
    pub top: Vec<RscId>,
    pub actions: Vec<Action>,
    pub locations: Vec<LocationConstraint>,
    pub colocations: Vec<ColocationConstraint>,
    pub orderings: Vec<OrderConstraint>,
    pub dc_node: Option<NodeId>,
    pub max_valid_nodes: usize,
    pub config_errors: Vec<String>,
    pub show_scores: bool,
}

impl WorkingSet {
    pub fn new(options: ClusterOptions, have_quorum: bool) -> Self {
        Self {
            options,
            have_quorum,
            nodes: Vec::new(),
            resources: Vec::new(),
            top: Vec::new(),
            actions: Vec::new(),
            locations: Vec::new(),
            colocations: Vec::new(),
            orderings: Vec::new(),
            dc_node: None,
            max_valid_nodes: 0,
            config_errors: Vec::new(),
            show_scores: false,
        }
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.0]
    }

    pub fn rsc(&self, id: RscId) -> &Resource {
        &self.resources[id.0]
    }

    pub fn rsc_mut(&mut self, id: RscId) -> &mut Resource {
        &mut self.resources[id.0]
    }

    pub fn action(&self, id: ActionId) -> &Action {
        &self.actions[id.0]
    }

    pub fn action_mut(&mut self, id: ActionId) -> &mut Action {
        &mut self.actions[id.0]
    }

    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> {
        (0..self.nodes.len()).map(NodeId)
    }

    pub fn uname(&self, node: NodeId) -> &str {
        &self.nodes[node.0].uname
    }

    /// Find a node by id or name
    pub fn find_node(&self, name: &str) -> Option<NodeId> {
        crate::node::find_node(&self.nodes, name).map(|(id, _)| id)
    }

    /// Find a resource by its unique id
    pub fn find_resource(&self, id: &str) -> Option<RscId> {
        self.resources.iter().position(|r| r.id == id).map(RscId)
    }

    pub fn add_resource(&mut self, rsc: Resource) -> RscId {
        self.resources.push(rsc);
        RscId(self.resources.len() - 1)
    }

    /// The top-level ancestor of a resource
    pub fn uber_parent(&self, mut rsc: RscId) -> RscId {
        while let Some(parent) = self.rsc(rsc).parent {
            rsc = parent;
        }
        rsc
    }

    /// The resource and all of its descendants, parents first
    pub fn self_and_descendants(&self, rsc: RscId) -> Vec<RscId> {
        let mut out = vec![rsc];
        let mut idx = 0;
        while idx < out.len() {
            out.extend(self.rsc(out[idx]).children.iter().copied());
            idx += 1;
        }
        out
    }

    /// Leaf resources below (or equal to) `rsc`
    pub fn leaves(&self, rsc: RscId) -> Vec<RscId> {
        self.self_and_descendants(rsc)
            .into_iter()
            .filter(|r| self.rsc(*r).is_leaf())
            .collect()
    }

    /// Leaf resources of the whole configuration
    pub fn all_leaves(&self) -> Vec<RscId> {
        (0..self.resources.len())
            .map(RscId)
            .filter(|r| self.rsc(*r).is_leaf())
            .collect()
    }

    /// Record a configuration problem; the offending item is skipped
    pub fn config_error(&mut self, message: impl Into<String>) {
        let message = message.into();
        error!("Configuration error: {}", message);
        self.config_errors.push(message);
    }

    /// Apply a preference for `rsc` (and its descendants) on one node or on all nodes
    pub fn resource_location(&mut self, rsc: RscId, node: Option<NodeId>, score: i32, tag: &str) {
        let targets: Vec<NodeId> = match node {
            Some(n) => vec![n],
            None => self.node_ids().collect(),
        };
        for r in self.self_and_descendants(rsc) {
            for n in &targets {
                let base = self.nodes[n.0].weight;
                let entry = self.resources[r.0].allowed_nodes.entry(*n).or_insert(base);
                *entry = merge_weights(*entry, score);
            }
        }
        debug!(
            rsc = %self.rsc(rsc).id,
            tag,
            score = %score_to_string(score),
            "Applied location preference to {} node(s)",
            targets.len()
        );
    }

    /// Find the actions of `rsc` with a given key.
    ///
    /// With a node, only actions on that node match; a matching action that has
    /// no node yet is bound to it.
    pub fn find_actions(&mut self, rsc: RscId, key: &str, node: Option<NodeId>) -> Vec<ActionId> {
        let candidates: Vec<ActionId> = self
            .rsc(rsc)
            .actions
            .iter()
            .copied()
            .filter(|a| self.action(*a).uuid == key)
            .collect();

        let mut found = Vec::new();
        for id in candidates {
            match (node, self.action(id).node) {
                (None, _) => found.push(id),
                (Some(wanted), Some(actual)) if wanted == actual => found.push(id),
                (Some(wanted), None) => {
                    trace!("Binding {} to {}", key, self.uname(wanted));
                    self.action_mut(id).node = Some(wanted);
                    let runnable = self.compute_runnable(id);
                    self.action_mut(id).runnable = runnable;
                    found.push(id);
                }
                _ => {}
            }
        }
        found
    }

    /// Create an action, or merge into the existing one with the same key,
    /// task and node.
    pub fn custom_action(
        &mut self,
        rsc: Option<RscId>,
        key: impl Into<String>,
        task_name: &str,
        node: Option<NodeId>,
        optional: bool,
    ) -> ActionId {
        let key = key.into();
        let existing = match rsc {
            Some(r) => self
                .find_actions(r, &key, node)
                .into_iter()
                .find(|a| self.action(*a).task == task_name),
            None => self
                .actions
                .iter()
                .find(|a| a.rsc.is_none() && a.uuid == key && a.node == node)
                .map(|a| a.id),
        };

        if let Some(id) = existing {
            if !optional {
                self.set_mandatory(id);
            }
            return id;
        }

        let id = ActionId(self.actions.len());
        let mut action = Action::new(id, key, task_name, rsc, node, optional);
        if let Some(r) = rsc {
            let resource = self.rsc(r);
            if !resource.managed {
                action.optional = true;
            }
            let interval = key_interval(&action.uuid);
            action.meta.insert(
                META_TIMEOUT.to_string(),
                resource.op_timeout(task_name, interval).to_string(),
            );
            if interval > 0 {
                action
                    .meta
                    .insert(META_INTERVAL.to_string(), interval.to_string());
            }
            action.priority = resource.priority;
        }
        trace!(
            "Created action {} {} on {}",
            id,
            action.uuid,
            node.map(|n| self.uname(n)).unwrap_or("<none>")
        );
        self.actions.push(action);
        if let Some(r) = rsc {
            self.rsc_mut(r).actions.push(id);
        }
        let runnable = self.compute_runnable(id);
        self.action_mut(id).runnable = runnable;
        id
    }

    /// A cluster-wide milestone such as `all_stopped`
    pub fn pseudo_op(&mut self, name: &str) -> ActionId {
        let id = self.custom_action(None, name, name, None, true);
        let action = self.action_mut(id);
        action.pseudo = true;
        action.runnable = true;
        id
    }

    /// Make an action mandatory, unless its resource is unmanaged.
    ///
    /// Returns whether anything changed.
    pub fn set_mandatory(&mut self, id: ActionId) -> bool {
        let action = self.action(id);
        if !action.optional {
            return false;
        }
        if let Some(r) = action.rsc {
            if !self.rsc(r).managed {
                return false;
            }
        }
        self.action_mut(id).optional = false;
        true
    }

    /// Whether an action can currently be executed
    pub fn compute_runnable(&self, id: ActionId) -> bool {
        let action = self.action(id);
        if action.pseudo {
            return true;
        }
        let Some(rsc) = action.rsc else {
            return true;
        };
        let Some(node) = action.node else {
            return false;
        };
        let node = self.node(node);
        if !node.online || node.pending {
            return false;
        }
        if action.task == task::STOP || action.task == task::DEMOTE || self.have_quorum {
            return true;
        }
        match self.options.no_quorum_policy {
            NoQuorumPolicy::Ignore => true,
            NoQuorumPolicy::Freeze => {
                let rsc = self.rsc(rsc);
                let active_here = action.node.map(|n| rsc.running_on.contains(&n)).unwrap_or(false);
                active_here && action.task != task::START && action.task != task::PROMOTE
            }
            NoQuorumPolicy::Stop | NoQuorumPolicy::Suicide => false,
        }
    }

    /// Add an ordering edge between two existing actions
    pub fn order_actions(&mut self, first: ActionId, then: ActionId, kind: OrderType) {
        if first == then {
            return;
        }
        if let Some(wrapper) = self.actions[then.0]
            .actions_before
            .iter_mut()
            .find(|w| w.action == first)
        {
            wrapper.kind |= kind;
            if let Some(back) = self.actions[first.0]
                .actions_after
                .iter_mut()
                .find(|w| w.action == then)
            {
                back.kind |= kind;
            }
            return;
        }
        trace!(
            "Ordering {} before {} ({})",
            self.action(first).uuid,
            self.action(then).uuid,
            kind
        );
        self.actions[then.0].actions_before.push(ActionWrapper {
            action: first,
            kind,
        });
        self.actions[first.0].actions_after.push(ActionWrapper {
            action: then,
            kind,
        });
    }

    /// Record an ordering to be resolved into concrete actions later
    #[allow(clippy::too_many_arguments)]
    pub fn custom_action_order(
        &mut self,
        lh_rsc: Option<RscId>,
        lh_key: Option<String>,
        lh_action: Option<ActionId>,
        rh_rsc: Option<RscId>,
        rh_key: Option<String>,
        rh_action: Option<ActionId>,
        kind: OrderType,
    ) {
        let id = self.orderings.len();
        self.orderings.push(OrderConstraint {
            id,
            kind,
            lh_rsc,
            lh_key,
            lh_action,
            rh_rsc,
            rh_key,
            rh_action,
        });
    }

    /// Order two one-shot resource operations by name
    pub fn new_rsc_order(
        &mut self,
        lh_rsc: RscId,
        lh_task: &str,
        rh_rsc: RscId,
        rh_task: &str,
        kind: OrderType,
    ) {
        let lh_key = rsc_key(&self.rsc(lh_rsc).id, lh_task);
        let rh_key = rsc_key(&self.rsc(rh_rsc).id, rh_task);
        self.custom_action_order(
            Some(lh_rsc),
            Some(lh_key),
            None,
            Some(rh_rsc),
            Some(rh_key),
            None,
            kind,
        );
    }

    /// Log a resource's candidate weights
    pub fn dump_scores(&self, rsc: RscId, stage: &str) {
        let resource = self.rsc(rsc);
        for (node, weight) in &resource.allowed_nodes {
            if self.show_scores {
                info!(
                    "{}: {} allocation score on {}: {}",
                    stage,
                    resource.id,
                    self.uname(*node),
                    score_to_string(*weight)
                );
            } else {
                trace!(
                    "{}: {} allocation score on {}: {}",
                    stage,
                    resource.id,
                    self.uname(*node),
                    score_to_string(*weight)
                );
            }
        }
    }
}
