//! Drift detection against the recorded operation history.
//!
//! For every resource active on a node, the digests recorded with its last
//! start and its recurring operations are compared with digests of the
//! current parameters. Recurring operations that are no longer configured
//! (or any recurring operation in maintenance mode) are cancelled, and a
//! resource whose agent changed is deleted and re-created.

use crate::action::META_INTERVAL;
use crate::constraints::rsc_key;
use crate::resource::NodeHistory;
use crate::types::{NodeId, OrderType, RscId};
use crate::working_set::WorkingSet;
use tracing::{debug, info, trace, warn};
use warden_core::digest::{calculate_digest, calculate_restart_digest};
use warden_core::{op_key, task, OpHistory};

/// Meta key naming the operation a cancel stops
pub const META_CANCEL_OPERATION: &str = "operation";
/// Meta key with the call id of the operation a cancel stops
pub const META_CANCEL_CALL_ID: &str = "call_id";

/// How the recorded parameters of one operation compare with the current ones
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamChange {
    /// Nothing recorded, or nothing changed
    None,
    /// Only parameters that can be applied in place changed
    Reload,
    /// A parameter that needs a restart changed, or the agent cannot reload
    Restart,
}

/// Classify a parameter change from the digests recorded with `op`
pub fn classify_change(params: &warden_core::AttrMap, op: &OpHistory) -> ParamChange {
    if let Some(recorded) = &op.op_restart_digest {
        if *recorded != calculate_restart_digest(params, &op.op_force_restart) {
            return ParamChange::Restart;
        }
    }
    match &op.op_digest {
        Some(recorded) if *recorded != calculate_digest(params) => {
            if op.op_restart_digest.is_some() && op.interval == 0 {
                ParamChange::Reload
            } else {
                ParamChange::Restart
            }
        }
        _ => ParamChange::None,
    }
}

/// Stage 1: compare every active resource with its recorded history
pub fn check_actions(ws: &mut WorkingSet) {
    for node in ws.node_ids().collect::<Vec<_>>() {
        // Offline nodes are only of interest when they will be fenced
        if !ws.node(node).online && !ws.options.stonith_enabled {
            trace!("Skipping parameter checks on offline node {}", ws.uname(node));
            continue;
        }
        for rsc in ws.all_leaves() {
            check_actions_for(ws, rsc, node);
        }
    }
}

fn check_actions_for(ws: &mut WorkingSet, rsc: RscId, node: NodeId) {
    let resource = ws.rsc(rsc);
    if resource.orphan {
        trace!("Skipping parameter check for orphan {}", resource.id);
        return;
    }
    if !resource.running_on.contains(&node) {
        return;
    }
    let Some(history) = resource.history_on(node).cloned() else {
        return;
    };

    if definition_changed(ws, rsc, &history) {
        delete_resource(ws, rsc, node);
    }

    for op in &history.active_ops {
        let recurring = op.interval > 0;
        if recurring && ws.options.maintenance_mode {
            cancel_op(ws, rsc, node, op, "maintenance mode");
        } else if recurring || op.operation == task::START || op.operation == task::MIGRATE_FROM || op.operation == task::MONITOR {
            check_action_definition(ws, rsc, node, op);
        }
    }
}

/// Whether the agent recorded in the history differs from the configured one
fn definition_changed(ws: &WorkingSet, rsc: RscId, history: &NodeHistory) -> bool {
    let resource = ws.rsc(rsc);
    let mut changed = false;
    for (what, configured, recorded) in [
        ("class", Some(resource.class.as_str()), Some(history.class.as_str())),
        ("type", Some(resource.agent.as_str()), Some(history.agent.as_str())),
        ("provider", resource.provider.as_deref(), history.provider.as_deref()),
    ] {
        if configured != recorded {
            info!(
                "Forcing restart of {}: {} changed from {} to {}",
                resource.id,
                what,
                recorded.unwrap_or("<none>"),
                configured.unwrap_or("<none>")
            );
            changed = true;
        }
    }
    changed
}

/// Stop the resource, remove it from the executor's records and re-create it
fn delete_resource(ws: &mut WorkingSet, rsc: RscId, node: NodeId) {
    let id = ws.rsc(rsc).id.clone();
    ws.custom_action(Some(rsc), rsc_key(&id, task::STOP), task::STOP, Some(node), false);
    // Bound to whichever node the resource ends up on
    ws.custom_action(Some(rsc), rsc_key(&id, task::START), task::START, None, false);
    schedule_delete(ws, rsc, node);
}

/// Create a `delete` of `rsc` on `node`, followed by a refresh of the
/// executor's records.
///
/// Only nodes that are up and clean can forget a resource, and a failed
/// resource keeps its history until it is cleaned up.
pub fn schedule_delete(ws: &mut WorkingSet, rsc: RscId, node: NodeId) -> bool {
    let n = ws.node(node);
    if !n.online || n.unclean {
        debug!("Not deleting {} on {}: node is not clean and up", ws.rsc(rsc).id, n.uname);
        return false;
    }
    if ws.rsc(rsc).failed {
        debug!("Not deleting failed resource {}", ws.rsc(rsc).id);
        return false;
    }
    let id = ws.rsc(rsc).id.clone();
    info!("Removing {} from {}", id, ws.uname(node));
    let delete = ws.custom_action(Some(rsc), rsc_key(&id, task::DELETE), task::DELETE, Some(node), false);
    let refresh = ws.custom_action(None, task::LRM_REFRESH, task::LRM_REFRESH, None, false);
    ws.order_actions(delete, refresh, OrderType::IMPLIES_LEFT);
    true
}

/// Cancel a recurring operation recorded in the history, before any stop
fn cancel_op(ws: &mut WorkingSet, rsc: RscId, node: NodeId, op: &OpHistory, reason: &str) {
    let id = ws.rsc(rsc).id.clone();
    let key = op_key(&id, &op.operation, op.interval);
    info!("Cancelling {} on {}: {}", key, ws.uname(node), reason);

    let cancel = ws.custom_action(Some(rsc), key, task::CANCEL, Some(node), false);
    // A cancel is safe even when the resource is not managed
    let action = ws.action_mut(cancel);
    action.optional = false;
    action
        .meta
        .insert(META_CANCEL_OPERATION.to_string(), op.operation.clone());
    action
        .meta
        .insert(META_CANCEL_CALL_ID.to_string(), op.call_id.to_string());
    action
        .meta
        .insert(META_INTERVAL.to_string(), op.interval.to_string());

    ws.custom_action_order(
        None,
        None,
        Some(cancel),
        Some(rsc),
        Some(rsc_key(&id, task::STOP)),
        None,
        OrderType::OPTIONAL,
    );
}

fn check_action_definition(ws: &mut WorkingSet, rsc: RscId, node: NodeId, op: &OpHistory) {
    let id = ws.rsc(rsc).id.clone();

    if op.interval > 0 && ws.rsc(rsc).find_op(&op.operation, op.interval).is_none() {
        if ws.options.stop_orphan_actions {
            cancel_op(ws, rsc, node, op, "no longer configured");
        } else {
            debug!("Orphan action {}_{}_{} left running on {}", id, op.operation, op.interval, ws.uname(node));
        }
        return;
    }

    let change = classify_change(&ws.rsc(rsc).params, op);
    if change == ParamChange::None {
        trace!("Parameters of {} on {} are unchanged", id, ws.uname(node));
        return;
    }

    if op.interval > 0 {
        // Re-sending the recurring operation replaces the old one
        let key = op_key(&id, &op.operation, op.interval);
        info!("Parameters of {} on {} changed: re-scheduling it", key, ws.uname(node));
        let monitor = ws.custom_action(Some(rsc), key, &op.operation, None, false);
        ws.custom_action_order(
            Some(rsc),
            Some(rsc_key(&id, task::START)),
            None,
            None,
            None,
            Some(monitor),
            OrderType::RUNNABLE_LEFT,
        );
        return;
    }

    // Probes and starts are both answered with a new start
    let start = ws.custom_action(Some(rsc), rsc_key(&id, task::START), task::START, None, false);
    match change {
        ParamChange::Reload => {
            info!("Parameters of {} on {} changed: reloading", id, ws.uname(node));
            ws.action_mut(start).allow_reload_conversion = true;
        }
        _ => warn!("Parameters of {} on {} changed: restarting", id, ws.uname(node)),
    }
}

/// Stage 4: orphans are stopped and never moved
pub fn check_orphans(ws: &mut WorkingSet) {
    for rsc in ws.all_leaves() {
        let resource = ws.rsc(rsc);
        if !resource.orphan || resource.running_on.is_empty() {
            continue;
        }
        if resource.managed {
            info!("Orphan resource {} will be stopped", resource.id);
            if ws.options.remove_after_stop {
                for node in ws.rsc(rsc).running_on.clone() {
                    schedule_delete(ws, rsc, node);
                }
            }
        } else {
            warn!("Orphan resource {} is left running: it is not managed", resource.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::working_set::tests::{add_primitive, create_test_set};
    use warden_core::types::op_status;
    use warden_core::AttrMap;

    fn params(pairs: &[(&str, &str)]) -> AttrMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn history_op(operation: &str, interval: u64, recorded: &AttrMap, restart: Option<&[&str]>) -> OpHistory {
        OpHistory {
            id: None,
            operation: operation.to_string(),
            interval,
            call_id: 1,
            rc_code: 0,
            op_status: op_status::DONE,
            target_rc: None,
            op_digest: Some(calculate_digest(recorded)),
            op_restart_digest: restart.map(|r| calculate_restart_digest(recorded, r)),
            op_force_restart: restart
                .map(|r| r.iter().map(|s| s.to_string()).collect())
                .unwrap_or_default(),
        }
    }

    fn running_with(ws: &mut WorkingSet, rsc: RscId, ops: Vec<OpHistory>) {
        let node = NodeId(0);
        let resource = ws.rsc_mut(rsc);
        resource.running_on.push(node);
        resource.role = warden_core::Role::Started;
        resource.history.push(NodeHistory {
            node: Some(node),
            class: resource.class.clone(),
            provider: resource.provider.clone(),
            agent: resource.agent.clone(),
            active_ops: ops,
        });
    }

    fn find(ws: &WorkingSet, t: &str) -> Vec<crate::types::ActionId> {
        ws.actions.iter().filter(|a| a.task == t).map(|a| a.id).collect()
    }

    #[test]
    fn test_classify_change() {
        let before = params(&[("port", "5432"), ("loglevel", "info")]);
        let start = history_op("start", 0, &before, Some(&["port"]));

        assert_eq!(classify_change(&before, &start), ParamChange::None);
        let reloadable = params(&[("port", "5432"), ("loglevel", "debug")]);
        assert_eq!(classify_change(&reloadable, &start), ParamChange::Reload);
        let restart = params(&[("port", "5433"), ("loglevel", "info")]);
        assert_eq!(classify_change(&restart, &start), ParamChange::Restart);

        // without a restart list any change restarts
        let plain = history_op("start", 0, &before, None);
        assert_eq!(classify_change(&reloadable, &plain), ParamChange::Restart);
    }

    #[test]
    fn test_unchanged_params_schedule_nothing() {
        let mut ws = create_test_set(&["n1"]);
        let rsc = add_primitive(&mut ws, "db");
        ws.rsc_mut(rsc).params = params(&[("port", "5432")]);
        let recorded = ws.rsc(rsc).params.clone();
        running_with(&mut ws, rsc, vec![history_op("start", 0, &recorded, Some(&["port"]))]);

        check_actions(&mut ws);
        assert!(ws.actions.is_empty());
    }

    #[test]
    fn test_reloadable_change_allows_reload() {
        let mut ws = create_test_set(&["n1"]);
        let rsc = add_primitive(&mut ws, "db");
        let recorded = params(&[("port", "5432"), ("loglevel", "info")]);
        ws.rsc_mut(rsc).params = params(&[("port", "5432"), ("loglevel", "debug")]);
        running_with(&mut ws, rsc, vec![history_op("start", 0, &recorded, Some(&["port"]))]);

        check_actions(&mut ws);
        let starts = find(&ws, task::START);
        assert_eq!(starts.len(), 1);
        let start = ws.action(starts[0]);
        assert!(!start.optional);
        assert!(start.allow_reload_conversion);
        assert_eq!(start.node, None);
        assert!(find(&ws, task::STOP).is_empty());
    }

    #[test]
    fn test_orphan_recurring_op_is_cancelled() {
        let mut ws = create_test_set(&["n1"]);
        let rsc = add_primitive(&mut ws, "db");
        let recorded = ws.rsc(rsc).params.clone();
        running_with(
            &mut ws,
            rsc,
            vec![
                history_op("start", 0, &recorded, None),
                history_op("monitor", 10_000, &recorded, None),
            ],
        );

        check_actions(&mut ws);
        let cancels = find(&ws, task::CANCEL);
        assert_eq!(cancels.len(), 1);
        let cancel = ws.action(cancels[0]);
        assert_eq!(cancel.uuid, "db_monitor_10000");
        assert_eq!(cancel.meta[META_INTERVAL], "10000");
        assert!(ws.orderings.iter().any(|o| o.lh_action == Some(cancels[0])
            && o.rh_key.as_deref() == Some("db_stop_0")));
    }

    #[test]
    fn test_standby_node_still_cancels_orphan_ops() {
        let mut ws = create_test_set(&["n1"]);
        ws.node_mut(NodeId(0)).standby = true;
        let rsc = add_primitive(&mut ws, "db");
        let recorded = ws.rsc(rsc).params.clone();
        running_with(
            &mut ws,
            rsc,
            vec![
                history_op("start", 0, &recorded, None),
                history_op("monitor", 10_000, &recorded, None),
            ],
        );

        check_actions(&mut ws);
        let cancels = find(&ws, task::CANCEL);
        assert_eq!(cancels.len(), 1);
        assert_eq!(ws.action(cancels[0]).node, Some(NodeId(0)));
    }

    #[test]
    fn test_offline_node_skipped_without_fencing() {
        let mut ws = create_test_set(&["n1"]);
        ws.options.stonith_enabled = false;
        ws.node_mut(NodeId(0)).online = false;
        let rsc = add_primitive(&mut ws, "db");
        let recorded = ws.rsc(rsc).params.clone();
        running_with(
            &mut ws,
            rsc,
            vec![
                history_op("start", 0, &recorded, None),
                history_op("monitor", 10_000, &recorded, None),
            ],
        );

        check_actions(&mut ws);
        assert!(find(&ws, task::CANCEL).is_empty());
    }

    #[test]
    fn test_maintenance_cancels_even_unmanaged() {
        let mut ws = create_test_set(&["n1"]);
        ws.options.maintenance_mode = true;
        let rsc = add_primitive(&mut ws, "db");
        ws.rsc_mut(rsc).managed = false;
        ws.rsc_mut(rsc).ops.push(crate::resource::OpDef {
            name: "monitor".to_string(),
            interval_ms: 10_000,
            timeout_ms: 20_000,
            role: None,
            disabled: false,
        });
        let recorded = ws.rsc(rsc).params.clone();
        running_with(&mut ws, rsc, vec![history_op("monitor", 10_000, &recorded, None)]);

        check_actions(&mut ws);
        let cancels = find(&ws, task::CANCEL);
        assert_eq!(cancels.len(), 1);
        assert!(!ws.action(cancels[0]).optional);
    }

    #[test]
    fn test_changed_agent_deletes_and_restarts() {
        let mut ws = create_test_set(&["n1"]);
        let rsc = add_primitive(&mut ws, "db");
        let recorded = ws.rsc(rsc).params.clone();
        running_with(&mut ws, rsc, vec![history_op("start", 0, &recorded, None)]);
        ws.rsc_mut(rsc).agent = "pgsql".to_string();

        check_actions(&mut ws);
        assert_eq!(find(&ws, task::DELETE).len(), 1);
        assert_eq!(find(&ws, task::LRM_REFRESH).len(), 1);
        let stop = find(&ws, task::STOP)[0];
        assert!(!ws.action(stop).optional);
        assert_eq!(ws.action(stop).node, Some(NodeId(0)));
    }
}
