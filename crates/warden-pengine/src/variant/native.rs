//! Leaf resources: placement, the role state machine, recurring monitors,
//! probes, migration and fencing interaction.

use super::{apply_colocation, apply_location, ban_everywhere, choose_node, colocation_applies, merge_dependent_weights, ResourceVariant};
use crate::action::{META_INTERVAL, META_TARGET_RC};
use crate::constraints::{rsc_key, ColocationConstraint, LocationConstraint};
use crate::error::check_invariant;
use crate::resource::OpDef;
use crate::types::{ActionId, NodeId, OrderType, RscId};
use crate::working_set::WorkingSet;
use tracing::{debug, error, info, trace, warn};
use warden_core::types::{rc, RecoveryPolicy};
use warden_core::{op_key, task, Role, INFINITY};

pub struct NativeVariant;

/// Step taken to move a resource one hop between two roles
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RoleStep {
    RoleError,
    Null,
    Start,
    Stop,
    Promote,
    Demote,
}

use Role::{Master as M, Slave as SL, Started as ST, Stopped as SP, Unknown as UN};

/// Next role on the way from `[current]` to `[target]`
const STATE_MATRIX: [[Role; 5]; 5] = [
    /* Unknown */ [UN, SP, ST, SL, SL],
    /* Stopped */ [SP, SP, ST, SL, SL],
    /* Started */ [SP, SP, ST, SL, M],
    /* Slave   */ [SP, SP, SP, SL, M],
    /* Master  */ [SP, SL, SL, SL, M],
];

/// Action performing the hop `[current] -> [next]`
const ACTION_MATRIX: [[RoleStep; 5]; 5] = {
    use RoleStep::*;
    [
        /* Unknown */ [RoleError, Stop, RoleError, RoleError, RoleError],
        /* Stopped */ [RoleError, Null, Start, Start, RoleError],
        /* Started */ [RoleError, Stop, Null, Null, Promote],
        /* Slave   */ [RoleError, Stop, Stop, Null, Promote],
        /* Master  */ [RoleError, Demote, Demote, Demote, Null],
    ]
};

fn next_hop(from: Role, to: Role) -> (Role, RoleStep) {
    (
        STATE_MATRIX[from.index()][to.index()],
        ACTION_MATRIX[from.index()][STATE_MATRIX[from.index()][to.index()].index()],
    )
}

impl ResourceVariant for NativeVariant {
    fn name(&self) -> &str {
        "native"
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
        debug!("Allocating {}", resource.id);
        ws.rsc_mut(rsc).allocating = true;

        let merged = merge_dependent_weights(ws, rsc);
        ws.rsc_mut(rsc).allowed_nodes = merged;

        for con in ws.rsc(rsc).rsc_cons.clone() {
            let rh = con.rsc_rh;
            ws.fns(rh).color(ws, rh);
            self.rsc_colocation_lh(ws, rsc, rh, &con);
        }

        ws.dump_scores(rsc, "native_color");
        let chosen = if ws.rsc(rsc).provisional {
            choose_node(ws, rsc)
        } else {
            ws.rsc(rsc).allocated_to
        };

        let resource = ws.rsc_mut(rsc);
        resource.allocating = false;
        resource.provisional = false;
        chosen
    }

    fn create_actions(&self, ws: &mut WorkingSet, rsc: RscId) {
        let resource = ws.rsc(rsc);
        let id = resource.id.clone();
        let mut chosen = resource.allocated_to;
        let mut next_role = if !resource.managed {
            resource.role
        } else if chosen.is_none() {
            Role::Stopped
        } else if resource.next_role == Role::Unknown {
            Role::Started
        } else {
            resource.next_role
        };

        if let (true, Some(node)) = (resource.managed, chosen) {
            check_invariant!(
                ws.node(node).can_run_resources(),
                {
                    chosen = None;
                    next_role = Role::Stopped;
                },
                "{} was allocated to {}, which cannot run resources",
                id,
                ws.uname(node)
            );
        }

        let resource = ws.rsc(rsc);
        let running_on = resource.running_on.clone();
        let mut need_stop = resource.failed;

        if running_on.len() > 1 {
            error!(
                "Resource {} ({}) appears to be active on {} nodes",
                id,
                resource.agent,
                running_on.len()
            );
            match resource.recovery {
                RecoveryPolicy::StopStart => need_stop = true,
                RecoveryPolicy::StopOnly => {
                    need_stop = true;
                    next_role = Role::Stopped;
                    chosen = None;
                    ws.rsc_mut(rsc).allocated_to = None;
                }
                RecoveryPolicy::Block => {
                    warn!("Blocking {} until it is cleaned up", id);
                    let resource = ws.rsc_mut(rsc);
                    resource.managed = false;
                    next_role = resource.role;
                }
            }
        } else if let (Some(current), Some(target)) = (running_on.first(), chosen) {
            if *current != target && resource.role > Role::Stopped {
                debug!("Moving {} from {} to {}", id, ws.uname(*current), ws.uname(target));
                need_stop = true;
            }
        }

        ws.rsc_mut(rsc).next_role = next_role;

        let mut role = ws.rsc(rsc).role;
        debug!("{}: role {} -> {}", id, role, next_role);

        if need_stop && !running_on.is_empty() {
            while role != Role::Stopped {
                let (hop, step) = next_hop(role, Role::Stopped);
                if !perform_step(ws, rsc, step, role, hop, chosen) {
                    break;
                }
                role = hop;
            }
            role = Role::Stopped;
        }

        while role != next_role {
            let (hop, step) = next_hop(role, next_role);
            if !perform_step(ws, rsc, step, role, hop, chosen) {
                break;
            }
            role = hop;
        }

        // Optional placeholders, so orderings and propagation have something
        // to bind to even when nothing changes
        if let Some(node) = chosen {
            ws.custom_action(Some(rsc), rsc_key(&id, task::START), task::START, Some(node), true);
        }
        for node in &running_on {
            ws.custom_action(Some(rsc), rsc_key(&id, task::STOP), task::STOP, Some(*node), true);
        }

        create_recurring_ops(ws, rsc, chosen);
    }

    fn create_probe(
        &self,
        ws: &mut WorkingSet,
        rsc: RscId,
        node: NodeId,
        complete: ActionId,
        force: bool,
    ) -> bool {
        let resource = ws.rsc(rsc);
        if resource.orphan {
            trace!("Skipping probe of orphan {}", resource.id);
            return false;
        }
        if !force && resource.known_on.contains(&node) {
            return false;
        }

        let id = resource.id.clone();
        let key = op_key(&id, task::MONITOR, 0);
        debug!("Probing {} on {}", id, ws.uname(node));
        let probe = ws.custom_action(Some(rsc), key, task::MONITOR, Some(node), false);
        ws.action_mut(probe)
            .meta
            .insert(META_TARGET_RC.to_string(), rc::NOT_RUNNING.to_string());

        ws.order_actions(probe, complete, OrderType::IMPLIES_RIGHT);
        ws.custom_action_order(
            None,
            None,
            Some(probe),
            Some(rsc),
            Some(rsc_key(&id, task::START)),
            None,
            OrderType::OPTIONAL,
        );
        true
    }

    fn internal_constraints(&self, ws: &mut WorkingSet, rsc: RscId) {
        ws.new_rsc_order(rsc, task::STOP, rsc, task::START, OrderType::RESTART);
        ws.new_rsc_order(rsc, task::DEMOTE, rsc, task::STOP, OrderType::IMPLIES_LEFT);
        ws.new_rsc_order(rsc, task::START, rsc, task::PROMOTE, OrderType::RUNNABLE_LEFT);
        ws.new_rsc_order(rsc, task::STOP, rsc, task::DELETE, OrderType::IMPLIES_LEFT);
        ws.new_rsc_order(rsc, task::DELETE, rsc, task::START, OrderType::OPTIONAL);
    }

    fn rsc_colocation_lh(
        &self,
        ws: &mut WorkingSet,
        lh: RscId,
        rh: RscId,
        con: &ColocationConstraint,
    ) {
        if !colocation_applies(ws, lh, rh, con) {
            trace!("Colocation {} does not apply", con.id);
            return;
        }
        ws.fns(rh).rsc_colocation_rh(ws, lh, rh, con);
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
        match ws.rsc(rh).allocated_to {
            Some(node) => apply_colocation(ws, lh, &[node], con),
            None if con.score >= INFINITY => {
                debug!(
                    "{} cannot run anywhere: {} is not allocated",
                    ws.rsc(lh).id,
                    ws.rsc(rh).id
                );
                ban_everywhere(ws, lh);
            }
            None => {}
        }
    }

    fn rsc_location(&self, ws: &mut WorkingSet, rsc: RscId, loc: &LocationConstraint) {
        apply_location(ws, rsc, loc);
    }

    fn migrate_reload(&self, ws: &mut WorkingSet, rsc: RscId) {
        let resource = ws.rsc(rsc);
        if !resource.managed || resource.failed || resource.start_pending {
            return;
        }
        if resource.next_role != Role::Started {
            trace!("{} is not going to be started, not migrating", resource.id);
            return;
        }
        let ([src], Some(dest)) = (resource.running_on.as_slice(), resource.allocated_to) else {
            return;
        };
        let (src, id) = (*src, resource.id.clone());

        let Some(start) = ws
            .find_actions(rsc, &rsc_key(&id, task::START), Some(dest))
            .into_iter()
            .next()
        else {
            return;
        };
        let Some(stop) = ws
            .find_actions(rsc, &rsc_key(&id, task::STOP), Some(src))
            .into_iter()
            .next()
        else {
            return;
        };

        let usable = |a: ActionId| {
            let action = ws.action(a);
            !action.pseudo && !action.optional && action.runnable
        };
        if !usable(start) || !usable(stop) {
            return;
        }

        let foreign_dep = |wrappers: &[crate::types::ActionWrapper]| {
            wrappers.iter().any(|w| {
                let other = ws.action(w.action);
                other.rsc.is_some_and(|r| r != rsc) && !other.optional
            })
        };
        if foreign_dep(&ws.action(start).actions_before) || foreign_dep(&ws.action(stop).actions_after) {
            trace!("{} has blocking dependencies, not migrating", id);
            return;
        }

        if src != dest && ws.rsc(rsc).can_migrate {
            info!("Migrating {} from {} to {}", id, ws.uname(src), ws.uname(dest));
            let source = ws.uname(src).to_string();
            let target = ws.uname(dest).to_string();
            for (action, new_task) in [(stop, task::MIGRATE_TO), (start, task::MIGRATE_FROM)] {
                let action = ws.action_mut(action);
                action.task = new_task.to_string();
                action.uuid = rsc_key(&id, new_task);
                action.meta.insert("migrate_source".to_string(), source.clone());
                action.meta.insert("migrate_target".to_string(), target.clone());
            }
        } else if src == dest && ws.action(start).allow_reload_conversion {
            info!("Reloading {} on {}", id, ws.uname(src));
            let action = ws.action_mut(start);
            action.task = task::RELOAD.to_string();
            action.uuid = rsc_key(&id, task::RELOAD);
            ws.action_mut(stop).pseudo = true;
        }
    }

    fn stonith_ordering(&self, ws: &mut WorkingSet, rsc: RscId, stonith_op: ActionId) {
        let Some(target) = ws.action(stonith_op).node else {
            return;
        };
        let resource = ws.rsc(rsc);
        let id = resource.id.clone();
        let failed = resource.failed;

        if !resource.is_stonith() {
            for t in [task::START, task::PROMOTE] {
                ws.custom_action_order(
                    None,
                    None,
                    Some(stonith_op),
                    Some(rsc),
                    Some(rsc_key(&id, t)),
                    None,
                    OrderType::IMPLIES_LEFT,
                );
            }
        }

        let all_stopped = ws.pseudo_op(task::ALL_STOPPED);
        let target_online = ws.node(target).online;
        for action in ws.rsc(rsc).actions.clone() {
            let current = ws.action(action);
            let is_stop = current.task == task::STOP;
            if !is_stop && current.task != task::DEMOTE {
                continue;
            }
            if current.node == Some(target) {
                if !target_online || failed {
                    info!("{} on {} is implied by fencing", current.uuid, ws.uname(target));
                    let current = ws.action_mut(action);
                    current.pseudo = true;
                    current.runnable = true;
                    ws.order_actions(stonith_op, action, OrderType::IMPLIES_LEFT);
                } else {
                    debug!("Stopping {} on {} before fencing it", id, ws.uname(target));
                    ws.order_actions(action, stonith_op, OrderType::IMPLIES_LEFT);
                }
            }
            if is_stop {
                ws.order_actions(action, all_stopped, OrderType::OPTIONAL);
            }
        }
    }
}

/// Create the actions for one hop of the role state machine
fn perform_step(
    ws: &mut WorkingSet,
    rsc: RscId,
    step: RoleStep,
    from: Role,
    to: Role,
    chosen: Option<NodeId>,
) -> bool {
    let id = ws.rsc(rsc).id.clone();
    match step {
        RoleStep::RoleError => {
            error!("Resource {}: no transition from role {} to {}", id, from, to);
            return false;
        }
        RoleStep::Null => {}
        RoleStep::Stop => {
            let remove = ws.options.remove_after_stop;
            for node in ws.rsc(rsc).running_on.clone() {
                debug!("Stopping {} on {}", id, ws.uname(node));
                let stop = ws.custom_action(Some(rsc), rsc_key(&id, task::STOP), task::STOP, Some(node), false);
                if remove && !ws.action(stop).optional {
                    ws.custom_action(
                        Some(rsc),
                        rsc_key(&id, task::DELETE),
                        task::DELETE,
                        Some(node),
                        false,
                    );
                }
            }
        }
        RoleStep::Demote => {
            for node in ws.rsc(rsc).running_on.clone() {
                debug!("Demoting {} on {}", id, ws.uname(node));
                ws.custom_action(Some(rsc), rsc_key(&id, task::DEMOTE), task::DEMOTE, Some(node), false);
            }
        }
        RoleStep::Start | RoleStep::Promote => {
            let t = if step == RoleStep::Start { task::START } else { task::PROMOTE };
            let Some(node) = chosen else {
                error!("Resource {}: cannot {} without a node", id, t);
                return false;
            };
            debug!("{} {} on {}", t, id, ws.uname(node));
            ws.custom_action(Some(rsc), rsc_key(&id, t), t, Some(node), false);
        }
    }
    true
}

/// Schedule the configured recurring operations, or cancel ones that no
/// longer apply to the role the resource is heading for
fn create_recurring_ops(ws: &mut WorkingSet, rsc: RscId, chosen: Option<NodeId>) {
    let resource = ws.rsc(rsc);
    let id = resource.id.clone();
    let next_role = resource.next_role;
    let ops: Vec<OpDef> = resource
        .ops
        .iter()
        .filter(|op| op.is_recurring() && !op.disabled)
        .cloned()
        .collect();

    let Some(node) = chosen.filter(|_| next_role != Role::Stopped) else {
        return;
    };
    let start = ws
        .find_actions(rsc, &rsc_key(&id, task::START), Some(node))
        .into_iter()
        .next();
    let start_optional = start.map(|a| ws.action(a).optional).unwrap_or(true);

    for op in ops {
        let key = op.key(&id);
        let active = ws.rsc(rsc).has_active_op(node, &key);

        if op.role.is_some_and(|r| r != next_role) {
            if active {
                info!("Cancelling {} on {}: role is now {}", key, ws.uname(node), next_role);
                let cancel = ws.custom_action(Some(rsc), key.clone(), task::CANCEL, Some(node), false);
                let action = ws.action_mut(cancel);
                action.meta.insert(META_INTERVAL.to_string(), op.interval_ms.to_string());
                action.meta.insert("operation".to_string(), op.name.clone());
                for t in [task::PROMOTE, task::DEMOTE] {
                    ws.custom_action_order(
                        None,
                        None,
                        Some(cancel),
                        Some(rsc),
                        Some(rsc_key(&id, t)),
                        None,
                        OrderType::OPTIONAL,
                    );
                }
            }
            continue;
        }

        let optional = start_optional && active;
        if !optional {
            debug!("Scheduling {} on {}", key, ws.uname(node));
        }
        let monitor = ws.custom_action(Some(rsc), key, &op.name, Some(node), optional);
        if op.role == Some(Role::Master) {
            ws.action_mut(monitor)
                .meta
                .insert(META_TARGET_RC.to_string(), rc::RUNNING_MASTER.to_string());
        }

        ws.custom_action_order(
            Some(rsc),
            Some(rsc_key(&id, task::START)),
            None,
            None,
            None,
            Some(monitor),
            OrderType::MANDATORY,
        );
        if next_role == Role::Master {
            ws.custom_action_order(
                Some(rsc),
                Some(rsc_key(&id, task::PROMOTE)),
                None,
                None,
                None,
                Some(monitor),
                OrderType::MANDATORY,
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::working_set::tests::{add_primitive, create_test_set};

    fn actions_of(ws: &WorkingSet, rsc: RscId, t: &str) -> Vec<ActionId> {
        ws.rsc(rsc)
            .actions
            .iter()
            .copied()
            .filter(|a| ws.action(*a).task == t)
            .collect()
    }

    fn monitor(name: &str, interval_ms: u64, role: Option<Role>) -> OpDef {
        OpDef {
            name: name.to_string(),
            interval_ms,
            timeout_ms: 20_000,
            role,
            disabled: false,
        }
    }

    #[test]
    fn test_role_paths() {
        assert_eq!(next_hop(Role::Stopped, Role::Master), (Role::Slave, RoleStep::Start));
        assert_eq!(next_hop(Role::Slave, Role::Master), (Role::Master, RoleStep::Promote));
        assert_eq!(next_hop(Role::Master, Role::Stopped), (Role::Slave, RoleStep::Demote));
        assert_eq!(next_hop(Role::Slave, Role::Stopped), (Role::Stopped, RoleStep::Stop));
        assert_eq!(next_hop(Role::Started, Role::Started), (Role::Started, RoleStep::Null));
    }

    #[test]
    fn test_start_on_chosen_node() {
        let mut ws = create_test_set(&["n1"]);
        let rsc = add_primitive(&mut ws, "db");

        assert_eq!(NativeVariant.color(&mut ws, rsc), Some(NodeId(0)));
        NativeVariant.create_actions(&mut ws, rsc);

        let starts = actions_of(&ws, rsc, task::START);
        assert_eq!(starts.len(), 1);
        assert!(!ws.action(starts[0]).optional);
        assert!(ws.action(starts[0]).runnable);
        assert!(actions_of(&ws, rsc, task::STOP).is_empty());
        assert_eq!(ws.rsc(rsc).next_role, Role::Started);
    }

    #[test]
    fn test_move_stops_then_starts() {
        let mut ws = create_test_set(&["n1", "n2"]);
        let rsc = add_primitive(&mut ws, "db");
        ws.rsc_mut(rsc).role = Role::Started;
        ws.rsc_mut(rsc).running_on.push(NodeId(0));
        ws.rsc_mut(rsc).allowed_nodes.insert(NodeId(0), -INFINITY);

        NativeVariant.color(&mut ws, rsc);
        NativeVariant.create_actions(&mut ws, rsc);

        let stop = actions_of(&ws, rsc, task::STOP);
        let start = actions_of(&ws, rsc, task::START);
        assert_eq!(ws.action(stop[0]).node, Some(NodeId(0)));
        assert!(!ws.action(stop[0]).optional);
        assert_eq!(ws.action(start[0]).node, Some(NodeId(1)));
        assert!(!ws.action(start[0]).optional);
    }

    #[test]
    fn test_staying_resource_keeps_optional_actions() {
        let mut ws = create_test_set(&["n1"]);
        let rsc = add_primitive(&mut ws, "db");
        ws.rsc_mut(rsc).role = Role::Started;
        ws.rsc_mut(rsc).running_on.push(NodeId(0));

        NativeVariant.color(&mut ws, rsc);
        NativeVariant.create_actions(&mut ws, rsc);

        assert!(ws.rsc(rsc).actions.iter().all(|a| ws.action(*a).optional));
    }

    #[test]
    fn test_recurring_monitor_roles() {
        let mut ws = create_test_set(&["n1"]);
        let rsc = add_primitive(&mut ws, "db");
        {
            let r = ws.rsc_mut(rsc);
            r.ops.push(monitor("monitor", 10_000, None));
            r.ops.push(monitor("monitor", 5_000, Some(Role::Master)));
        }

        NativeVariant.color(&mut ws, rsc);
        NativeVariant.create_actions(&mut ws, rsc);

        let monitors = actions_of(&ws, rsc, task::MONITOR);
        assert_eq!(monitors.len(), 1);
        assert_eq!(ws.action(monitors[0]).uuid, "db_monitor_10000");
        assert!(!ws.action(monitors[0]).optional);
        assert!(actions_of(&ws, rsc, task::CANCEL).is_empty());
    }

    #[test]
    fn test_color_loop_terminates() {
        let mut ws = create_test_set(&["n1"]);
        let a = add_primitive(&mut ws, "a");
        let b = add_primitive(&mut ws, "b");
        ws.rsc_mut(a)
            .rsc_cons
            .push(ColocationConstraint::new("a-b", a, b, INFINITY));
        ws.rsc_mut(b)
            .rsc_cons
            .push(ColocationConstraint::new("b-a", b, a, INFINITY));

        NativeVariant.color(&mut ws, a);
        assert!(!ws.rsc(a).provisional);
        assert!(!ws.rsc(b).provisional);
        assert!(!ws.rsc(a).allocating);
        assert_eq!(ws.node(NodeId(0)).allocated.len(), 2);

        // a second call returns the recorded decision
        let before = ws.rsc(a).allocated_to;
        assert_eq!(NativeVariant.color(&mut ws, a), before);
        assert_eq!(ws.node(NodeId(0)).allocated.len(), 2);
    }

    #[test]
    fn test_mandatory_colocation_with_unallocated_target() {
        let mut ws = create_test_set(&["n1"]);
        let a = add_primitive(&mut ws, "a");
        let b = add_primitive(&mut ws, "b");
        ws.rsc_mut(b).allowed_nodes.insert(NodeId(0), -INFINITY);
        ws.rsc_mut(a)
            .rsc_cons
            .push(ColocationConstraint::new("a-b", a, b, INFINITY));

        assert_eq!(NativeVariant.color(&mut ws, a), None);
        assert_eq!(ws.rsc(b).allocated_to, None);
    }

    #[test]
    fn test_probe_skips_known_and_orphans() {
        let mut ws = create_test_set(&["n1", "n2"]);
        let rsc = add_primitive(&mut ws, "db");
        ws.rsc_mut(rsc).known_on.push(NodeId(0));
        let complete = ws.pseudo_op(task::PROBE_COMPLETE);

        assert!(!NativeVariant.create_probe(&mut ws, rsc, NodeId(0), complete, false));
        assert!(NativeVariant.create_probe(&mut ws, rsc, NodeId(1), complete, false));
        let probes = actions_of(&ws, rsc, task::MONITOR);
        assert_eq!(probes.len(), 1);
        assert_eq!(ws.action(probes[0]).meta[META_TARGET_RC], "7");
        assert_eq!(ws.action(complete).actions_before.len(), 1);

        ws.rsc_mut(rsc).orphan = true;
        assert!(!NativeVariant.create_probe(&mut ws, rsc, NodeId(0), complete, true));
    }

    #[test]
    fn test_stop_on_fenced_node_becomes_pseudo() {
        let mut ws = create_test_set(&["n1", "n2"]);
        let rsc = add_primitive(&mut ws, "db");
        ws.rsc_mut(rsc).role = Role::Started;
        ws.rsc_mut(rsc).running_on.push(NodeId(0));
        ws.node_mut(NodeId(0)).online = false;
        ws.node_mut(NodeId(0)).unclean = true;

        NativeVariant.color(&mut ws, rsc);
        NativeVariant.create_actions(&mut ws, rsc);
        let stop = actions_of(&ws, rsc, task::STOP)[0];
        assert!(!ws.action(stop).runnable);

        let fence = ws.custom_action(None, "stonith-n1", task::FENCE, Some(NodeId(0)), false);
        NativeVariant.stonith_ordering(&mut ws, rsc, fence);

        assert!(ws.action(stop).pseudo);
        assert!(ws.action(stop).runnable);
        assert!(ws.action(stop).actions_before.iter().any(|w| w.action == fence));
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "cannot run resources")]
    fn test_allocation_to_standby_node_is_a_bug() {
        let mut ws = create_test_set(&["n1"]);
        let rsc = add_primitive(&mut ws, "db");
        ws.node_mut(NodeId(0)).standby = true;
        ws.rsc_mut(rsc).allocated_to = Some(NodeId(0));
        ws.rsc_mut(rsc).provisional = false;

        NativeVariant.create_actions(&mut ws, rsc);
    }

    #[test]
    fn test_migration_rewrites_move() {
        let mut ws = create_test_set(&["n1", "n2"]);
        let rsc = add_primitive(&mut ws, "db");
        ws.rsc_mut(rsc).role = Role::Started;
        ws.rsc_mut(rsc).running_on.push(NodeId(0));
        ws.rsc_mut(rsc).allowed_nodes.insert(NodeId(0), -INFINITY);
        ws.rsc_mut(rsc).can_migrate = true;

        NativeVariant.color(&mut ws, rsc);
        NativeVariant.create_actions(&mut ws, rsc);
        NativeVariant.migrate_reload(&mut ws, rsc);

        assert!(actions_of(&ws, rsc, task::STOP).is_empty());
        let to = actions_of(&ws, rsc, task::MIGRATE_TO);
        let from = actions_of(&ws, rsc, task::MIGRATE_FROM);
        assert_eq!(ws.action(to[0]).node, Some(NodeId(0)));
        assert_eq!(ws.action(from[0]).node, Some(NodeId(1)));
        assert_eq!(ws.action(from[0]).meta["migrate_source"], "n1");
        assert_eq!(ws.action(to[0]).meta["migrate_target"], "n2");
    }

    #[test]
    fn test_reload_replaces_restart_in_place() {
        let mut ws = create_test_set(&["n1"]);
        let rsc = add_primitive(&mut ws, "db");
        ws.rsc_mut(rsc).role = Role::Started;
        ws.rsc_mut(rsc).running_on.push(NodeId(0));
        ws.rsc_mut(rsc).can_migrate = true;

        NativeVariant.color(&mut ws, rsc);
        NativeVariant.create_actions(&mut ws, rsc);
        let start = actions_of(&ws, rsc, task::START)[0];
        let stop = actions_of(&ws, rsc, task::STOP)[0];
        ws.set_mandatory(start);
        ws.set_mandatory(stop);

        // same node without reload support: a plain restart
        NativeVariant.migrate_reload(&mut ws, rsc);
        assert_eq!(ws.action(start).task, task::START);
        assert!(!ws.action(stop).pseudo);

        ws.action_mut(start).allow_reload_conversion = true;
        NativeVariant.migrate_reload(&mut ws, rsc);
        assert_eq!(ws.action(start).task, task::RELOAD);
        assert_eq!(ws.action(start).uuid, "db_reload_0");
        assert!(ws.action(stop).pseudo);
    }
}
