use super::{apply_colocation, apply_location, container_order_lh, merge_dependents_into, ResourceVariant};
use crate::constraints::{rsc_key, ColocationConstraint, LocationConstraint, OrderConstraint};
use crate::graph::GraphBuilder;
use crate::notify::{create_notification_boundaries, expand_notifications};
use crate::resource::CloneSettings;
use crate::types::{ActionId, NodeId, OrderType, RscId};
use crate::working_set::WorkingSet;
use std::collections::BTreeMap;
use tracing::{debug, warn};
use warden_core::{task, AttrMap, Role, INFINITY};

/// Several instances of the same resource
pub struct CloneVariant;

pub(crate) fn clone_settings(ws: &WorkingSet, rsc: RscId) -> CloneSettings {
    ws.rsc(rsc).clone.clone().unwrap_or_default()
}

impl CloneVariant {
    /// Place the instances, running ones first, honoring the per-node and
    /// total instance limits
    pub(crate) fn allocate_instances(ws: &mut WorkingSet, rsc: RscId) {
        let settings = clone_settings(ws, rsc);
        let children = ws.rsc(rsc).children.clone();
        let limit = settings
            .clone_max
            .min(ws.max_valid_nodes * settings.clone_node_max);

        // Things colocated with the clone pull every instance along
        for child in &children {
            for leaf in ws.leaves(*child) {
                let merged = merge_dependents_into(ws, ws.rsc(leaf).allowed_nodes.clone(), rsc);
                ws.rsc_mut(leaf).allowed_nodes = merged;
            }
        }

        let mut order = children.clone();
        order.sort_by_key(|c| {
            ws.leaves(*c)
                .iter()
                .all(|l| ws.rsc(*l).running_on.is_empty())
        });

        let mut per_node: BTreeMap<NodeId, usize> = BTreeMap::new();
        let mut allocated = 0;
        for child in order {
            if allocated >= limit {
                debug!("Instance {} not allocated: limit of {} reached", ws.rsc(child).id, limit);
                ws.resource_location(child, None, -INFINITY, "clone_color:limit_reached");
            }
            for (node, count) in &per_node {
                if *count >= settings.clone_node_max {
                    ws.resource_location(child, Some(*node), -INFINITY, "clone_color:node_max");
                }
            }
            if let Some(node) = ws.fns(child).color(ws, child) {
                allocated += 1;
                *per_node.entry(node).or_default() += 1;
            }
        }
        debug!("Allocated {} of {} instances of {}", allocated, children.len(), ws.rsc(rsc).id);
    }

    /// Whether any instance will start or stop in this transition
    fn pseudo_status(ws: &WorkingSet, rsc: RscId) -> (bool, bool) {
        let (mut starting, mut stopping) = (false, false);
        for leaf in ws.leaves(rsc) {
            for op in &ws.rsc(leaf).actions {
                let action = ws.action(*op);
                if action.optional {
                    continue;
                }
                if action.task == task::STOP && action.runnable {
                    stopping = true;
                } else if action.task == task::START && action.runnable {
                    starting = true;
                }
            }
        }
        (starting, stopping)
    }

    /// A pseudo action of the container itself
    pub(crate) fn container_pseudo(
        ws: &mut WorkingSet,
        rsc: RscId,
        t: &str,
        optional: bool,
        priority: i32,
    ) -> ActionId {
        let key = rsc_key(&ws.rsc(rsc).id, t);
        let id = ws.custom_action(Some(rsc), key, t, None, optional);
        let action = ws.action_mut(id);
        action.pseudo = true;
        action.runnable = true;
        action.priority = priority;
        id
    }

    pub(crate) fn create_clone_actions(ws: &mut WorkingSet, rsc: RscId) {
        for child in ws.rsc(rsc).children.clone() {
            ws.fns(child).create_actions(ws, child);
        }

        let (starting, stopping) = Self::pseudo_status(ws, rsc);
        let start = Self::container_pseudo(ws, rsc, task::START, !starting, 0);
        let running = Self::container_pseudo(ws, rsc, task::STARTED, !starting, INFINITY);
        let stop = Self::container_pseudo(ws, rsc, task::STOP, !stopping, 0);
        let stopped = Self::container_pseudo(ws, rsc, task::STOPPED, !stopping, INFINITY);

        if clone_settings(ws, rsc).notify {
            let start_notify = create_notification_boundaries(ws, rsc, task::START, Some(start), Some(running));
            let stop_notify = create_notification_boundaries(ws, rsc, task::STOP, Some(stop), Some(stopped));
            if let Some(settings) = ws.rsc_mut(rsc).clone.as_mut() {
                settings.start_notify = Some(start_notify);
                settings.stop_notify = Some(stop_notify);
            }
        }
    }

    pub(crate) fn clone_internal_constraints(ws: &mut WorkingSet, rsc: RscId) {
        let settings = clone_settings(ws, rsc);

        ws.new_rsc_order(rsc, task::STOPPED, rsc, task::START, OrderType::OPTIONAL);
        ws.new_rsc_order(rsc, task::START, rsc, task::STARTED, OrderType::OPTIONAL);
        ws.new_rsc_order(rsc, task::STOP, rsc, task::STOPPED, OrderType::OPTIONAL);

        let mut last: Option<RscId> = None;
        for child in ws.rsc(rsc).children.clone() {
            ws.fns(child).internal_constraints(ws, child);

            ws.new_rsc_order(rsc, task::START, child, task::START, OrderType::IMPLIES_LEFT | OrderType::RUNNABLE_LEFT);
            ws.new_rsc_order(child, task::START, rsc, task::STARTED, OrderType::IMPLIES_RIGHT);
            ws.new_rsc_order(rsc, task::STOP, child, task::STOP, OrderType::IMPLIES_LEFT);
            ws.new_rsc_order(child, task::STOP, rsc, task::STOPPED, OrderType::IMPLIES_RIGHT);

            if let (true, Some(prev)) = (settings.ordered, last) {
                ws.new_rsc_order(prev, task::START, child, task::START, OrderType::MANDATORY);
                ws.new_rsc_order(child, task::STOP, prev, task::STOP, OrderType::IMPLIES_LEFT);
            }
            last = Some(child);
        }
    }

    /// Expand the notifications of every boundary the container created
    pub(crate) fn expand_notify(ws: &mut WorkingSet, rsc: RscId) {
        for action in [task::START, task::STOP, task::PROMOTE, task::DEMOTE] {
            let Some(mut boundary) = ws
                .rsc(rsc)
                .clone
                .as_ref()
                .and_then(|c| c.boundary(action))
                .cloned()
            else {
                continue;
            };
            expand_notifications(ws, rsc, &mut boundary);
            if let Some(settings) = ws.rsc_mut(rsc).clone.as_mut() {
                match action {
                    task::START => settings.start_notify = Some(boundary),
                    task::STOP => settings.stop_notify = Some(boundary),
                    task::PROMOTE => settings.promote_notify = Some(boundary),
                    _ => settings.demote_notify = Some(boundary),
                }
            }
        }
    }
}

impl ResourceVariant for CloneVariant {
    fn name(&self) -> &str {
        "clone"
    }

    fn color(&self, ws: &mut WorkingSet, rsc: RscId) -> Option<NodeId> {
        let resource = ws.rsc(rsc);
        if !resource.provisional {
            return None;
        }
        if resource.allocating {
            warn!("Dependency loop detected involving {}", resource.id);
            return None;
        }
        ws.rsc_mut(rsc).allocating = true;

        for con in ws.rsc(rsc).rsc_cons.clone() {
            let rh = con.rsc_rh;
            ws.fns(rh).color(ws, rh);
            ws.fns(rsc).rsc_colocation_lh(ws, rsc, rh, &con);
        }
        ws.dump_scores(rsc, "clone_color");
        Self::allocate_instances(ws, rsc);

        let resource = ws.rsc_mut(rsc);
        resource.allocating = false;
        resource.provisional = false;
        None
    }

    fn create_actions(&self, ws: &mut WorkingSet, rsc: RscId) {
        Self::create_clone_actions(ws, rsc);
    }

    fn create_probe(
        &self,
        ws: &mut WorkingSet,
        rsc: RscId,
        node: NodeId,
        complete: ActionId,
        force: bool,
    ) -> bool {
        let settings = clone_settings(ws, rsc);
        let children = ws.rsc(rsc).children.clone();

        if !settings.globally_unique && settings.clone_node_max == 1 {
            // Anonymous instances are interchangeable: one probe answers for all
            let active_here = children.iter().any(|c| {
                ws.leaves(*c)
                    .iter()
                    .any(|l| ws.rsc(*l).running_on.contains(&node))
            });
            if active_here {
                return false;
            }
            return match children.first() {
                Some(first) => ws.fns(*first).create_probe(ws, *first, node, complete, force),
                None => false,
            };
        }

        let mut any = false;
        for child in children {
            any |= ws.fns(child).create_probe(ws, child, node, complete, force);
        }
        any
    }

    fn internal_constraints(&self, ws: &mut WorkingSet, rsc: RscId) {
        Self::clone_internal_constraints(ws, rsc);
    }

    fn rsc_colocation_lh(
        &self,
        ws: &mut WorkingSet,
        lh: RscId,
        rh: RscId,
        con: &ColocationConstraint,
    ) {
        for child in ws.rsc(lh).children.clone() {
            ws.fns(child).rsc_colocation_lh(ws, child, rh, con);
        }
    }

    fn rsc_colocation_rh(
        &self,
        ws: &mut WorkingSet,
        lh: RscId,
        rh: RscId,
        con: &ColocationConstraint,
    ) {
        if !ws.rsc(lh).provisional || ws.rsc(rh).provisional {
            return;
        }
        let targets: Vec<NodeId> = ws
            .rsc(rh)
            .children
            .iter()
            .map(|c| ws.rsc(*c))
            .filter(|child| match con.role_rh {
                Role::Unknown => true,
                Role::Started => child.next_role != Role::Stopped,
                wanted => child.next_role == wanted,
            })
            .filter_map(|child| child.allocated_to)
            .collect();
        debug!(
            "{} is colocated with {} instance(s) of {}",
            ws.rsc(lh).id,
            targets.len(),
            ws.rsc(rh).id
        );
        apply_colocation(ws, lh, &targets, con);
    }

    fn rsc_order_lh(&self, ws: &mut WorkingSet, rsc: RscId, order: &OrderConstraint) {
        container_order_lh(ws, rsc, order);
    }

    fn rsc_location(&self, ws: &mut WorkingSet, rsc: RscId, loc: &LocationConstraint) {
        for r in ws.self_and_descendants(rsc) {
            apply_location(ws, r, loc);
        }
    }

    fn expand(&self, ws: &mut WorkingSet, rsc: RscId, graph: &mut GraphBuilder) {
        Self::expand_notify(ws, rsc);
        for child in ws.rsc(rsc).children.clone() {
            ws.fns(child).expand(ws, child, graph);
        }
        graph.add_rsc_actions(ws, rsc);
    }

    fn append_meta(&self, ws: &WorkingSet, rsc: RscId, meta: &mut AttrMap) {
        let settings = clone_settings(ws, rsc);
        meta.insert("clone_max".to_string(), settings.clone_max.to_string());
        meta.insert("clone_node_max".to_string(), settings.clone_node_max.to_string());
        meta.insert("notify".to_string(), settings.notify.to_string());
        meta.insert("globally_unique".to_string(), settings.globally_unique.to_string());
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::resource::Resource;
    use crate::types::VariantKind;
    use crate::working_set::tests::create_test_set;

    pub(crate) fn create_test_clone(
        ws: &mut WorkingSet,
        id: &str,
        kind: VariantKind,
        settings: CloneSettings,
    ) -> RscId {
        let mut clone = Resource::new(id, kind);
        let instances = settings.clone_max;
        clone.clone = Some(settings);
        for n in 0..ws.nodes.len() {
            clone.allowed_nodes.insert(NodeId(n), 0);
        }
        let parent = ws.add_resource(clone);
        ws.top.push(parent);
        for n in 0..instances {
            let mut child = Resource::new(format!("{}-child:{}", id, n), VariantKind::Native);
            child.base_id = format!("{}-child", id);
            child.instance = Some(n);
            child.class = "ocf".to_string();
            child.agent = "Stateful".to_string();
            child.parent = Some(parent);
            child.allowed_nodes = ws.rsc(parent).allowed_nodes.clone();
            let child = ws.add_resource(child);
            ws.rsc_mut(parent).children.push(child);
        }
        ws.max_valid_nodes = ws.nodes.len();
        parent
    }

    fn settings(clone_max: usize, clone_node_max: usize) -> CloneSettings {
        CloneSettings {
            clone_max,
            clone_node_max,
            ..Default::default()
        }
    }

    #[test]
    fn test_one_instance_per_node() {
        let mut ws = create_test_set(&["n1", "n2"]);
        let clone = create_test_clone(&mut ws, "fs", VariantKind::Clone, settings(3, 1));

        CloneVariant.color(&mut ws, clone);
        let placed: Vec<Option<NodeId>> = ws
            .rsc(clone)
            .children
            .iter()
            .map(|c| ws.rsc(*c).allocated_to)
            .collect();
        assert_eq!(placed.iter().filter(|p| p.is_some()).count(), 2);
        assert!(placed.contains(&Some(NodeId(0))));
        assert!(placed.contains(&Some(NodeId(1))));
    }

    #[test]
    fn test_running_instances_keep_their_node() {
        let mut ws = create_test_set(&["n1", "n2"]);
        let clone = create_test_clone(&mut ws, "fs", VariantKind::Clone, settings(1, 1));
        let child = ws.rsc(clone).children[0];
        ws.rsc_mut(child).running_on.push(NodeId(1));
        ws.rsc_mut(child).role = Role::Started;

        CloneVariant.color(&mut ws, clone);
        assert_eq!(ws.rsc(child).allocated_to, Some(NodeId(1)));
    }

    #[test]
    fn test_clone_pseudo_actions_follow_instances() {
        let mut ws = create_test_set(&["n1"]);
        let clone = create_test_clone(&mut ws, "fs", VariantKind::Clone, settings(1, 1));

        CloneVariant.color(&mut ws, clone);
        CloneVariant.create_actions(&mut ws, clone);

        let start = ws
            .find_actions(clone, "fs_start_0", None)
            .first()
            .copied()
            .map(|a| ws.action(a).optional);
        assert_eq!(start, Some(false));
        let stop = ws
            .find_actions(clone, "fs_stop_0", None)
            .first()
            .copied()
            .map(|a| ws.action(a).optional);
        assert_eq!(stop, Some(true));
    }

    #[test]
    fn test_colocation_with_clone_instances() {
        let mut ws = create_test_set(&["n1", "n2", "n3"]);
        let clone = create_test_clone(&mut ws, "fs", VariantKind::Clone, settings(2, 1));
        let app = crate::working_set::tests::add_primitive(&mut ws, "app");
        let c1 = ws.rsc(clone).children[1];
        ws.rsc_mut(c1).allowed_nodes.insert(NodeId(0), -INFINITY);

        CloneVariant.color(&mut ws, clone);
        let con = ColocationConstraint::new("app-with-fs", app, clone, INFINITY);
        CloneVariant.rsc_colocation_rh(&mut ws, app, clone, &con);

        let weights = &ws.rsc(app).allowed_nodes;
        let banned: Vec<NodeId> = weights
            .iter()
            .filter(|(_, w)| **w == -INFINITY)
            .map(|(n, _)| *n)
            .collect();
        assert_eq!(banned.len(), 1);
    }
}
