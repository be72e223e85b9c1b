//! Per-variant behavior of resources.
//!
//! Every stage of the pipeline talks to resources through the
//! [`ResourceVariant`] trait. Containers (groups, clones, masters) implement
//! each operation by delegating to their children in the order their
//! semantics require, and the native implementation handles the leaves.

mod clone;
mod group;
mod master;
mod native;

pub use clone::CloneVariant;
pub use group::GroupVariant;
pub use master::MasterVariant;
pub use native::NativeVariant;

use crate::constraints::{ColocationConstraint, LocationConstraint, OrderConstraint};
use crate::graph::GraphBuilder;
use crate::types::{ActionId, NodeId, OrderType, RscId, VariantKind};
use crate::working_set::WorkingSet;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, trace};
use warden_core::{merge_weights, task, AttrMap, Role, INFINITY};

/// Operations every resource variant provides
pub trait ResourceVariant: Send + Sync {
    /// Name of the variant
    fn name(&self) -> &str;

    /// Choose where the resource (and its children) will run
    fn color(&self, ws: &mut WorkingSet, rsc: RscId) -> Option<NodeId>;

    /// Create the actions that take the resource from its role to its next role
    fn create_actions(&self, ws: &mut WorkingSet, rsc: RscId);

    /// Create probes on `node`; returns whether any probe was created
    fn create_probe(
        &self,
        ws: &mut WorkingSet,
        rsc: RscId,
        node: NodeId,
        complete: ActionId,
        force: bool,
    ) -> bool;

    /// Orderings the variant needs between its own actions
    fn internal_constraints(&self, ws: &mut WorkingSet, rsc: RscId);

    /// Apply a colocation in which `lh` is the dependent
    fn rsc_colocation_lh(
        &self,
        ws: &mut WorkingSet,
        lh: RscId,
        rh: RscId,
        con: &ColocationConstraint,
    );

    /// Apply a colocation in which `rh` (this variant) is the target
    fn rsc_colocation_rh(
        &self,
        ws: &mut WorkingSet,
        lh: RscId,
        rh: RscId,
        con: &ColocationConstraint,
    );

    /// Resolve the first side of an ordering into actions of `rsc`
    fn rsc_order_lh(&self, ws: &mut WorkingSet, rsc: RscId, order: &OrderConstraint) {
        default_order_lh(ws, rsc, order);
    }

    /// Resolve the second side of an ordering into actions of `rsc`
    fn rsc_order_rh(
        &self,
        ws: &mut WorkingSet,
        lh_action: ActionId,
        rsc: RscId,
        order: &OrderConstraint,
    ) {
        default_order_rh(ws, lh_action, rsc, order);
    }

    /// Apply a resolved location constraint
    fn rsc_location(&self, ws: &mut WorkingSet, rsc: RscId, loc: &LocationConstraint);

    /// Emit the surviving actions into the graph
    fn expand(&self, ws: &mut WorkingSet, rsc: RscId, graph: &mut GraphBuilder) {
        for child in ws.rsc(rsc).children.clone() {
            ws.fns(child).expand(ws, child, graph);
        }
        graph.add_rsc_actions(ws, rsc);
    }

    /// Turn stop/start pairs into migrations or reloads where possible
    fn migrate_reload(&self, ws: &mut WorkingSet, rsc: RscId) {
        for child in ws.rsc(rsc).children.clone() {
            ws.fns(child).migrate_reload(ws, child);
        }
    }

    /// Order the resource's actions around fencing of a node
    fn stonith_ordering(&self, ws: &mut WorkingSet, rsc: RscId, stonith_op: ActionId) {
        for child in ws.rsc(rsc).children.clone() {
            ws.fns(child).stonith_ordering(ws, child, stonith_op);
        }
    }

    /// Add variant-specific attributes to the actions of the resource
    fn append_meta(&self, _ws: &WorkingSet, _rsc: RscId, _meta: &mut AttrMap) {}
}

static NATIVE: NativeVariant = NativeVariant;
static GROUP: GroupVariant = GroupVariant;
static CLONE: CloneVariant = CloneVariant;
static MASTER: MasterVariant = MasterVariant;

/// The operation table for a variant
pub fn variant_for(kind: VariantKind) -> &'static dyn ResourceVariant {
    match kind {
        VariantKind::Native => &NATIVE,
        VariantKind::Group => &GROUP,
        VariantKind::Clone => &CLONE,
        VariantKind::Master => &MASTER,
    }
}

impl WorkingSet {
    /// The operation table of a resource
    pub fn fns(&self, rsc: RscId) -> &'static dyn ResourceVariant {
        variant_for(self.rsc(rsc).kind)
    }
}

fn default_order_lh(ws: &mut WorkingSet, rsc: RscId, order: &OrderConstraint) {
    let Some(key) = order.lh_key.clone() else {
        return;
    };
    let mut lh_actions = ws.find_actions(rsc, &key, None);

    if lh_actions.is_empty() {
        let resource_id = ws.rsc(rsc).id.clone();
        let task_name = crate::action::key_task(&key, &resource_id).unwrap_or_default();
        // Nothing to wait for when there is nothing to stop; a start that was
        // never scheduled must block what depends on it
        if order.kind.contains(OrderType::RUNNABLE_LEFT)
            && (task_name == task::START || task_name == task::PROMOTE)
        {
            debug!("Creating placeholder {} for ordering {}", key, order.id);
            let task_name = task_name.to_string();
            lh_actions.push(ws.custom_action(Some(rsc), key, &task_name, None, true));
        } else {
            trace!("No LH-side ({}) for ordering {}", key, order.id);
            return;
        }
    }

    for lh in lh_actions {
        resolve_rh(ws, lh, order);
    }
}

fn default_order_rh(ws: &mut WorkingSet, lh_action: ActionId, rsc: RscId, order: &OrderConstraint) {
    let Some(key) = order.rh_key.as_deref() else {
        return;
    };
    let rh_actions = ws.find_actions(rsc, key, None);
    if rh_actions.is_empty() {
        trace!("No RH-side ({}) for ordering {}", key, order.id);
        return;
    }
    for rh in rh_actions {
        ws.order_actions(lh_action, rh, order.kind);
    }
}

/// First-side resolution for containers.
///
/// An ordering on a container's `start` (or `stop`, `promote`, `demote`)
/// waits for the whole container: it is moved to the completion pseudo
/// action, or to the confirmed post-notification when the container
/// notifies. Orderings towards the container itself or its own children
/// keep the action they name.
pub(crate) fn container_order_lh(ws: &mut WorkingSet, rsc: RscId, order: &OrderConstraint) {
    let internal = order
        .rh_rsc
        .is_some_and(|rh| rh == rsc || ws.rsc(rh).parent == Some(rsc));
    let Some(key) = order.lh_key.as_deref().filter(|_| !internal) else {
        default_order_lh(ws, rsc, order);
        return;
    };

    let id = ws.rsc(rsc).id.clone();
    let done = match crate::action::key_task(key, &id) {
        Some(task::START) => Some((task::START, task::STARTED)),
        Some(task::STOP) => Some((task::STOP, task::STOPPED)),
        Some(task::PROMOTE) => Some((task::PROMOTE, task::PROMOTED)),
        Some(task::DEMOTE) => Some((task::DEMOTE, task::DEMOTED)),
        _ => None,
    };
    let Some((requested, complete)) = done else {
        default_order_lh(ws, rsc, order);
        return;
    };

    let confirmed = ws
        .rsc(rsc)
        .clone
        .as_ref()
        .and_then(|c| c.boundary(requested))
        .and_then(|b| b.post_done);
    let mut converted = order.clone();
    converted.lh_key = Some(match confirmed {
        Some(post_done) => ws.action(post_done).uuid.clone(),
        None => crate::constraints::rsc_key(&id, complete),
    });
    trace!(
        "Ordering {} now starts from {:?}",
        order.id,
        converted.lh_key
    );
    default_order_lh(ws, rsc, &converted);
}

/// Order one resolved first-side action against the second side of `order`
pub(crate) fn resolve_rh(ws: &mut WorkingSet, lh_action: ActionId, order: &OrderConstraint) {
    if let Some(rh_rsc) = order.rh_rsc {
        ws.fns(rh_rsc).rsc_order_rh(ws, lh_action, rh_rsc, order);
    } else if let Some(rh_action) = order.rh_action {
        ws.order_actions(lh_action, rh_action, order.kind);
    }
}

/// Whether a colocation still applies given the roles the two resources will hold
pub(crate) fn colocation_applies(ws: &WorkingSet, lh: RscId, rh: RscId, con: &ColocationConstraint) -> bool {
    if con.score == 0 {
        return false;
    }
    let role_matches = |rsc: RscId, wanted: Role| {
        let resource = ws.rsc(rsc);
        wanted == Role::Unknown
            || resource.kind.is_clone_like()
            || resource.provisional
            || resource.next_role == wanted
            || (wanted == Role::Started && resource.next_role == Role::Unknown)
    };
    role_matches(lh, con.role_lh) && role_matches(rh, con.role_rh)
}

/// Apply a colocation to the dependent's candidate weights, given the nodes
/// the target ends up on
pub(crate) fn apply_colocation(ws: &mut WorkingSet, lh: RscId, targets: &[NodeId], con: &ColocationConstraint) {
    let wanted: BTreeSet<Option<String>> = targets
        .iter()
        .map(|n| ws.node(*n).attr(&con.node_attribute).map(str::to_string))
        .collect();

    let matching: BTreeMap<NodeId, bool> = ws
        .rsc(lh)
        .allowed_nodes
        .keys()
        .map(|n| {
            let value = ws.node(*n).attr(&con.node_attribute).map(str::to_string);
            (*n, value.is_some() && wanted.contains(&value))
        })
        .collect();

    let lh_id = ws.rsc(lh).id.clone();
    for (node, weight) in ws.rsc_mut(lh).allowed_nodes.iter_mut() {
        let matches = matching.get(node).copied().unwrap_or(false);
        if con.score >= INFINITY {
            if !matches {
                *weight = -INFINITY;
            }
        } else if matches {
            *weight = merge_weights(*weight, con.score);
        }
    }
    debug!("Applied colocation {} to {}", con.id, lh_id);
}

/// Ban a resource from every node
pub(crate) fn ban_everywhere(ws: &mut WorkingSet, rsc: RscId) {
    for weight in ws.rsc_mut(rsc).allowed_nodes.values_mut() {
        *weight = -INFINITY;
    }
}

/// Candidate weights of `rsc` with the preferences of its mandatory
/// dependents folded in.
///
/// Dependents of a mandatory colocation pull the resource towards the nodes
/// they prefer, those of a mandatory anti-colocation push it away from them.
/// A dependent whose preferences would leave no usable node is ignored, so a
/// resource is never kept from running by something that only wants to
/// follow it.
pub(crate) fn merge_dependent_weights(ws: &WorkingSet, rsc: RscId) -> BTreeMap<NodeId, i32> {
    merge_dependents_into(ws, ws.rsc(rsc).allowed_nodes.clone(), rsc)
}

/// Fold the preferences of the dependents of `target` into `weights`
pub(crate) fn merge_dependents_into(
    ws: &WorkingSet,
    mut weights: BTreeMap<NodeId, i32>,
    target: RscId,
) -> BTreeMap<NodeId, i32> {
    let mut visited = vec![target];
    collect_dependents(ws, target, 1, &mut weights, &mut visited);
    weights
}

fn collect_dependents(
    ws: &WorkingSet,
    target: RscId,
    scale: i32,
    weights: &mut BTreeMap<NodeId, i32>,
    visited: &mut Vec<RscId>,
) {
    for con in &ws.rsc(target).rsc_cons_lhs {
        let factor = scale * (con.score / INFINITY);
        if factor == 0 || con.role_rh != Role::Unknown || visited.contains(&con.rsc_lh) {
            continue;
        }
        visited.push(con.rsc_lh);

        let dependent = &ws.rsc(con.rsc_lh).allowed_nodes;
        let candidate: BTreeMap<NodeId, i32> = weights
            .iter()
            .map(|(node, weight)| {
                let merged = match dependent.get(node) {
                    Some(other) => merge_weights(*weight, other.saturating_mul(factor)),
                    None => *weight,
                };
                (*node, merged)
            })
            .collect();

        if candidate.values().any(|w| *w >= 0) {
            *weights = candidate;
            collect_dependents(ws, con.rsc_lh, factor, weights, visited);
        } else {
            debug!(
                "Ignoring preferences of {} for {}: no node would remain",
                ws.rsc(con.rsc_lh).id,
                ws.rsc(target).id
            );
        }
    }
}

/// Pick the best node for a resource and record the decision
pub(crate) fn choose_node(ws: &mut WorkingSet, rsc: RscId) -> Option<NodeId> {
    let resource = ws.rsc(rsc);

    if !resource.managed {
        let current = resource.running_on.first().copied();
        debug!("Unmanaged resource {} stays where it is", resource.id);
        assign_node(ws, rsc, current);
        return current;
    }

    if resource.next_role == Role::Stopped {
        debug!("Resource {} is to be stopped", resource.id);
        assign_node(ws, rsc, None);
        return None;
    }

    let mut candidates: Vec<(NodeId, i32)> = resource
        .allowed_nodes
        .iter()
        .filter(|(node, weight)| **weight >= 0 && ws.node(**node).can_run_resources())
        .map(|(node, weight)| (*node, *weight))
        .collect();

    candidates.sort_by(|(a, wa), (b, wb)| {
        wb.cmp(wa)
            .then_with(|| {
                ws.node(*a)
                    .allocated
                    .len()
                    .cmp(&ws.node(*b).allocated.len())
            })
            .then_with(|| {
                let ra = resource.running_on.contains(a);
                let rb = resource.running_on.contains(b);
                rb.cmp(&ra)
            })
            .then_with(|| a.cmp(b))
    });

    let chosen = candidates.first().map(|(node, _)| *node);
    if chosen.is_none() {
        debug!("Resource {} cannot run anywhere", resource.id);
    }
    assign_node(ws, rsc, chosen);
    chosen
}

/// Record an allocation decision
pub(crate) fn assign_node(ws: &mut WorkingSet, rsc: RscId, node: Option<NodeId>) {
    ws.rsc_mut(rsc).allocated_to = node;
    match node {
        Some(n) => {
            ws.node_mut(n).allocated.push(rsc);
            debug!("Assigning {} to {}", ws.rsc(rsc).id, ws.uname(n));
        }
        None => {
            if ws.rsc(rsc).role > Role::Stopped || !ws.rsc(rsc).running_on.is_empty() {
                debug!("Resource {} will not run anywhere", ws.rsc(rsc).id);
            }
        }
    }
}

/// Apply a location constraint to one resource's own candidate map
pub(crate) fn apply_location(ws: &mut WorkingSet, rsc: RscId, loc: &LocationConstraint) {
    if matches!(loc.role_filter, Some(Role::Master) | Some(Role::Slave)) {
        trace!("Deferring role-specific location {}", loc.id);
        return;
    }
    for (node, score) in &loc.nodes {
        let base = ws.node(*node).weight;
        let entry = ws.rsc_mut(rsc).allowed_nodes.entry(*node).or_insert(base);
        *entry = merge_weights(*entry, *score);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::working_set::tests::{add_primitive, create_test_set};

    #[test]
    fn test_variant_table() {
        assert_eq!(variant_for(VariantKind::Native).name(), "native");
        assert_eq!(variant_for(VariantKind::Group).name(), "group");
        assert_eq!(variant_for(VariantKind::Clone).name(), "clone");
        assert_eq!(variant_for(VariantKind::Master).name(), "master");
    }

    #[test]
    fn test_choose_node_prefers_weight_then_load() {
        let mut ws = create_test_set(&["n1", "n2", "n3"]);
        let a = add_primitive(&mut ws, "a");
        let b = add_primitive(&mut ws, "b");
        ws.rsc_mut(a).allowed_nodes.insert(NodeId(2), 10);

        assert_eq!(choose_node(&mut ws, a), Some(NodeId(2)));
        ws.rsc_mut(b).allowed_nodes.insert(NodeId(0), -1);
        assert_eq!(choose_node(&mut ws, b), Some(NodeId(1)));
    }

    #[test]
    fn test_choose_node_tie_favors_current_node() {
        let mut ws = create_test_set(&["n1", "n2"]);
        let a = add_primitive(&mut ws, "a");
        ws.rsc_mut(a).running_on.push(NodeId(1));
        assert_eq!(choose_node(&mut ws, a), Some(NodeId(1)));
    }

    #[test]
    fn test_mandatory_colocation_excludes_other_nodes() {
        let mut ws = create_test_set(&["n1", "n2"]);
        let a = add_primitive(&mut ws, "a");
        let b = add_primitive(&mut ws, "b");
        let con = ColocationConstraint::new("a-with-b", a, b, INFINITY);

        apply_colocation(&mut ws, a, &[NodeId(1)], &con);
        assert_eq!(ws.rsc(a).weight_on(NodeId(0)), Some(-INFINITY));
        assert_eq!(ws.rsc(a).weight_on(NodeId(1)), Some(0));

        let con = ColocationConstraint::new("a-apart-b", a, b, -50);
        apply_colocation(&mut ws, a, &[NodeId(1)], &con);
        assert_eq!(ws.rsc(a).weight_on(NodeId(1)), Some(-50));
    }

    #[test]
    fn test_dependent_weights_are_merged() {
        let mut ws = create_test_set(&["n1", "n2"]);
        let a = add_primitive(&mut ws, "a");
        let b = add_primitive(&mut ws, "b");
        let con = ColocationConstraint::new("a-with-b", a, b, INFINITY);
        ws.rsc_mut(b).rsc_cons_lhs.push(con);
        ws.rsc_mut(a).allowed_nodes.insert(NodeId(0), -INFINITY);

        let merged = merge_dependent_weights(&ws, b);
        assert_eq!(merged[&NodeId(0)], -INFINITY);
        assert_eq!(merged[&NodeId(1)], 0);

        // a dependent that can run nowhere does not drag its target down
        ws.rsc_mut(a).allowed_nodes.insert(NodeId(1), -INFINITY);
        let merged = merge_dependent_weights(&ws, b);
        assert_eq!(merged[&NodeId(0)], 0);
    }

    #[test]
    fn test_anti_colocated_dependent_pushes_target_away() {
        let mut ws = create_test_set(&["n1", "n2"]);
        let a = add_primitive(&mut ws, "a");
        let b = add_primitive(&mut ws, "b");
        let con = ColocationConstraint::new("a-apart-from-b", a, b, -INFINITY);
        ws.rsc_mut(b).rsc_cons_lhs.push(con);
        ws.rsc_mut(a).allowed_nodes.insert(NodeId(0), 100);

        let merged = merge_dependent_weights(&ws, b);
        assert_eq!(merged[&NodeId(0)], -100);
        assert_eq!(merged[&NodeId(1)], 0);

        // an advisory anti-colocation leaves the target alone
        let weak = ColocationConstraint::new("a-apart-from-b", a, b, -50);
        ws.rsc_mut(b).rsc_cons_lhs = vec![weak];
        let merged = merge_dependent_weights(&ws, b);
        assert_eq!(merged[&NodeId(0)], 0);
    }
}
