use super::{apply_location, container_order_lh, ResourceVariant};
use crate::constraints::{rsc_key, ColocationConstraint, LocationConstraint, OrderConstraint};
use crate::types::{ActionId, NodeId, OrderType, RscId};
use crate::working_set::WorkingSet;
use tracing::{debug, warn};
use warden_core::{task, Role, INFINITY};

/// An ordered list of resources kept together
pub struct GroupVariant;

impl GroupVariant {
    fn settings(ws: &WorkingSet, rsc: RscId) -> crate::resource::GroupSettings {
        ws.rsc(rsc).group.unwrap_or_default()
    }
}

impl ResourceVariant for GroupVariant {
    fn name(&self) -> &str {
        "group"
    }

    fn color(&self, ws: &mut WorkingSet, rsc: RscId) -> Option<NodeId> {
        let resource = ws.rsc(rsc);
        if !resource.provisional {
            return resource.allocated_to;
        }
        if resource.allocating {
            warn!("Dependency loop detected involving {}", resource.id);
            return None;
        }
        let children = resource.children.clone();
        let Some(first) = children.first().copied() else {
            debug!("Group {} is empty", resource.id);
            ws.rsc_mut(rsc).provisional = false;
            return None;
        };
        ws.rsc_mut(rsc).allocating = true;

        // Whatever follows the group follows its first member
        let lhs = ws.rsc(rsc).rsc_cons_lhs.clone();
        ws.rsc_mut(first).rsc_cons_lhs.extend(lhs);

        for con in ws.rsc(rsc).rsc_cons.clone() {
            let rh = con.rsc_rh;
            ws.fns(rh).color(ws, rh);
            self.rsc_colocation_lh(ws, rsc, rh, &con);
        }

        for child in &children {
            ws.fns(*child).color(ws, *child);
        }

        let chosen = ws.rsc(first).allocated_to;
        let resource = ws.rsc_mut(rsc);
        resource.allocated_to = chosen;
        resource.allocating = false;
        resource.provisional = false;
        chosen
    }

    fn create_actions(&self, ws: &mut WorkingSet, rsc: RscId) {
        let children = ws.rsc(rsc).children.clone();
        for child in &children {
            ws.fns(*child).create_actions(ws, *child);
        }

        let id = ws.rsc(rsc).id.clone();
        for t in [task::START, task::STARTED, task::STOP, task::STOPPED] {
            let action = ws.custom_action(Some(rsc), rsc_key(&id, t), t, None, true);
            let action = ws.action_mut(action);
            action.pseudo = true;
            action.runnable = true;
        }

        let next_role = children
            .iter()
            .map(|c| ws.rsc(*c).next_role)
            .max()
            .unwrap_or(Role::Stopped);
        let role = children
            .iter()
            .map(|c| ws.rsc(*c).role)
            .max()
            .unwrap_or(Role::Stopped);
        let resource = ws.rsc_mut(rsc);
        resource.next_role = next_role;
        resource.role = role;
    }

    fn create_probe(
        &self,
        ws: &mut WorkingSet,
        rsc: RscId,
        node: NodeId,
        complete: ActionId,
        force: bool,
    ) -> bool {
        let mut any = false;
        for child in ws.rsc(rsc).children.clone() {
            any |= ws.fns(child).create_probe(ws, child, node, complete, force);
        }
        any
    }

    fn internal_constraints(&self, ws: &mut WorkingSet, rsc: RscId) {
        let settings = Self::settings(ws, rsc);
        let group_id = ws.rsc(rsc).id.clone();

        ws.new_rsc_order(rsc, task::STOPPED, rsc, task::START, OrderType::OPTIONAL);
        ws.new_rsc_order(rsc, task::STOP, rsc, task::STOPPED, OrderType::OPTIONAL);
        ws.new_rsc_order(rsc, task::START, rsc, task::STARTED, OrderType::OPTIONAL);

        let mut last: Option<RscId> = None;
        for child in ws.rsc(rsc).children.clone() {
            ws.fns(child).internal_constraints(ws, child);

            if let (true, Some(prev)) = (settings.colocated, last) {
                let con = ColocationConstraint::new(
                    format!("{}:internal_colocation", group_id),
                    child,
                    prev,
                    INFINITY,
                );
                ws.rsc_mut(prev).rsc_cons_lhs.push(con.clone());
                ws.rsc_mut(child).rsc_cons.push(con);
            }

            ws.new_rsc_order(rsc, task::START, child, task::START, OrderType::IMPLIES_LEFT | OrderType::RUNNABLE_LEFT);
            ws.new_rsc_order(child, task::START, rsc, task::STARTED, OrderType::IMPLIES_RIGHT | OrderType::RUNNABLE_LEFT);
            ws.new_rsc_order(rsc, task::STOP, child, task::STOP, OrderType::IMPLIES_LEFT);
            ws.new_rsc_order(child, task::STOP, rsc, task::STOPPED, OrderType::IMPLIES_RIGHT);

            if let (true, Some(prev)) = (settings.ordered, last) {
                ws.new_rsc_order(prev, task::START, child, task::START, OrderType::MANDATORY);
                ws.new_rsc_order(child, task::STOP, prev, task::STOP, OrderType::IMPLIES_LEFT);
            }
            last = Some(child);
        }
    }

    fn rsc_colocation_lh(
        &self,
        ws: &mut WorkingSet,
        lh: RscId,
        rh: RscId,
        con: &ColocationConstraint,
    ) {
        let children = ws.rsc(lh).children.clone();
        if Self::settings(ws, lh).colocated {
            if let Some(first) = children.first() {
                ws.fns(*first).rsc_colocation_lh(ws, *first, rh, con);
            }
            return;
        }
        if con.score >= INFINITY {
            ws.config_error(format!(
                "{}: cannot perform mandatory colocation between non-colocated group {} and {}",
                con.id,
                ws.rsc(lh).id,
                ws.rsc(rh).id
            ));
            return;
        }
        for child in children {
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
        if ws.rsc(rh).provisional {
            return;
        }
        let children = ws.rsc(rh).children.clone();
        if Self::settings(ws, rh).colocated {
            // A mandatory dependent needs the whole group, so it follows the last member
            let target = if con.score >= INFINITY {
                children.last()
            } else {
                children.first()
            };
            if let Some(child) = target {
                ws.fns(*child).rsc_colocation_rh(ws, lh, *child, con);
            }
            return;
        }
        if con.score >= INFINITY {
            ws.config_error(format!(
                "{}: cannot perform mandatory colocation with non-colocated group {}",
                con.id,
                ws.rsc(rh).id
            ));
            return;
        }
        for child in children {
            ws.fns(child).rsc_colocation_rh(ws, lh, child, con);
        }
    }

    fn rsc_order_lh(&self, ws: &mut WorkingSet, rsc: RscId, order: &OrderConstraint) {
        container_order_lh(ws, rsc, order);
    }

    fn rsc_location(&self, ws: &mut WorkingSet, rsc: RscId, loc: &LocationConstraint) {
        for r in ws.self_and_descendants(rsc) {
            apply_location(ws, r, loc);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::{GroupSettings, Resource};
    use crate::types::VariantKind;
    use crate::working_set::tests::{add_primitive, create_test_set};

    fn create_test_group(ws: &mut WorkingSet, id: &str, members: &[&str]) -> RscId {
        let mut group = Resource::new(id, VariantKind::Group);
        group.group = Some(GroupSettings::default());
        for n in 0..ws.nodes.len() {
            group.allowed_nodes.insert(NodeId(n), 0);
        }
        let gid = ws.add_resource(group);
        ws.top.push(gid);
        for member in members {
            let child = add_primitive(ws, member);
            ws.top.retain(|r| *r != child);
            ws.rsc_mut(child).parent = Some(gid);
            ws.rsc_mut(gid).children.push(child);
        }
        gid
    }

    #[test]
    fn test_group_members_follow_first() {
        let mut ws = create_test_set(&["n1", "n2"]);
        let group = create_test_group(&mut ws, "web", &["ip", "apache"]);
        let ip = ws.rsc(group).children[0];
        let apache = ws.rsc(group).children[1];
        ws.rsc_mut(ip).allowed_nodes.insert(NodeId(1), 100);

        GroupVariant.internal_constraints(&mut ws, group);
        assert_eq!(ws.rsc(apache).rsc_cons.len(), 1);

        assert_eq!(GroupVariant.color(&mut ws, group), Some(NodeId(1)));
        assert_eq!(ws.rsc(apache).allocated_to, Some(NodeId(1)));
    }

    #[test]
    fn test_group_pseudo_actions() {
        let mut ws = create_test_set(&["n1"]);
        let group = create_test_group(&mut ws, "web", &["ip"]);

        GroupVariant.color(&mut ws, group);
        GroupVariant.create_actions(&mut ws, group);

        let tasks: Vec<&str> = ws
            .rsc(group)
            .actions
            .iter()
            .map(|a| ws.action(*a).task.as_str())
            .collect();
        assert_eq!(tasks, vec!["start", "running", "stop", "stopped"]);
        assert!(ws.rsc(group).actions.iter().all(|a| ws.action(*a).pseudo));
        assert_eq!(ws.rsc(group).next_role, Role::Started);
    }

    #[test]
    fn test_unordered_group_skips_chain() {
        let mut ws = create_test_set(&["n1"]);
        let group = create_test_group(&mut ws, "web", &["a", "b"]);
        ws.rsc_mut(group).group = Some(GroupSettings {
            ordered: false,
            colocated: false,
        });

        GroupVariant.internal_constraints(&mut ws, group);
        let b = ws.rsc(group).children[1];
        assert!(ws.rsc(b).rsc_cons.is_empty());
        assert!(!ws
            .orderings
            .iter()
            .any(|o| o.lh_key.as_deref() == Some("a_start_0") && o.rh_key.as_deref() == Some("b_start_0")));
    }
}
