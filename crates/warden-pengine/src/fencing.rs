//! Fencing of unclean nodes and graceful shutdown of leaving nodes.

use crate::constraints::rsc_key;
use crate::probe::META_NO_WAIT;
use crate::types::{ActionId, NodeId, OrderType};
use crate::working_set::WorkingSet;
use tracing::{debug, error, info, warn};
use warden_core::task;
use warden_core::types::NoQuorumPolicy;

/// Meta key naming the node a fencing operation targets
pub const META_TARGET: &str = "on_node";
/// Meta key with the id of the node a fencing operation targets
pub const META_TARGET_UUID: &str = "on_node_uuid";
/// Meta key with the fencing action to perform (reboot, off, ...)
pub const META_STONITH_ACTION: &str = "stonith_action";

/// Whether any resource (or any of its descendants) is managed
fn any_managed_resources(ws: &WorkingSet) -> bool {
    ws.resources.iter().any(|r| r.managed)
}

/// Whether unclean nodes may be fenced in this run
pub fn fencing_allowed(ws: &WorkingSet) -> bool {
    if !ws.options.stonith_enabled {
        return false;
    }
    let quorum_ok = ws.have_quorum
        || matches!(
            ws.options.no_quorum_policy,
            NoQuorumPolicy::Ignore | NoQuorumPolicy::Suicide
        );
    if !quorum_ok {
        return false;
    }
    if !any_managed_resources(ws) {
        info!("Delaying fencing operations until there are resources to manage");
        return false;
    }
    true
}

/// Create the fencing operation for an unclean node
fn fence_node(ws: &mut WorkingSet, node: NodeId) -> ActionId {
    warn!("Scheduling node {} for fencing", ws.uname(node));
    let fence = ws.custom_action(None, task::FENCE, task::FENCE, Some(node), false);
    let (uname, uuid) = (ws.uname(node).to_string(), ws.node(node).id.clone());
    let stonith_action = ws.options.stonith_action.clone();
    let action = ws.action_mut(fence);
    action.meta.insert(META_TARGET.to_string(), uname);
    action.meta.insert(META_TARGET_UUID.to_string(), uuid);
    action
        .meta
        .insert(META_STONITH_ACTION.to_string(), stonith_action);

    for rsc in ws.top.clone() {
        ws.fns(rsc).stonith_ordering(ws, rsc, fence);
    }
    fence
}

/// Create the shutdown of a node that is leaving the cluster, after every
/// managed resource on it has stopped
fn shutdown_node(ws: &mut WorkingSet, node: NodeId) -> ActionId {
    info!("Scheduling node {} for shutdown", ws.uname(node));
    let down = ws.custom_action(None, task::SHUTDOWN, task::SHUTDOWN, Some(node), false);
    ws.action_mut(down)
        .meta
        .insert(META_NO_WAIT.to_string(), "true".to_string());

    for rsc in ws.node(node).running.clone() {
        if !ws.rsc(rsc).managed {
            continue;
        }
        let id = ws.rsc(rsc).id.clone();
        ws.custom_action_order(
            Some(rsc),
            Some(rsc_key(&id, task::STOP)),
            None,
            None,
            None,
            Some(down),
            OrderType::IMPLIES_LEFT,
        );
    }
    down
}

/// Stage 6: fence unclean nodes, shut down leaving ones, and keep the
/// coordinator for last
pub fn fencing_and_shutdown(ws: &mut WorkingSet) {
    let ready = ws.pseudo_op(task::STONITH_UP);
    let all_stopped = ws.pseudo_op(task::ALL_STOPPED);
    let done = ws.pseudo_op(task::STONITH_DONE);
    let need_fencing = fencing_allowed(ws);

    let mut dc_down = None;
    let mut dc_fence = None;
    let mut last_fence: Option<ActionId> = None;
    let mut integrity_lost = false;

    for node in ws.node_ids().collect::<Vec<_>>() {
        let n = ws.node(node);
        let (unclean, online, shutdown, is_dc) = (n.unclean, n.online, n.shutdown, n.is_dc);

        if unclean && need_fencing {
            let fence = fence_node(ws, node);
            ws.order_actions(ready, fence, OrderType::IMPLIES_LEFT);
            ws.order_actions(fence, all_stopped, OrderType::IMPLIES_RIGHT);

            if is_dc {
                dc_down = Some(fence);
                dc_fence = Some(fence);
            } else {
                // One fencing operation at a time
                if let Some(previous) = last_fence {
                    ws.order_actions(previous, fence, OrderType::IMPLIES_LEFT);
                }
                last_fence = Some(fence);
            }
        } else if unclean {
            integrity_lost = true;
            warn!("Node {} is unclean!", ws.uname(node));
        } else if online && shutdown {
            let down = shutdown_node(ws, node);
            if is_dc {
                dc_down = Some(down);
            }
        }
    }

    if integrity_lost {
        if !ws.options.stonith_enabled {
            warn!("YOUR RESOURCES ARE NOW LIKELY COMPROMISED");
            error!("Enable fencing to keep your resources safe");
        } else if !ws.have_quorum {
            info!("Cannot fence unclean nodes until quorum is attained (or no-quorum-policy is set to ignore)");
        }
    }

    if let Some(dc) = dc_down {
        debug!("Ordering shutdowns before {} on the coordinator", ws.action(dc).task);
        ws.action_mut(dc)
            .meta
            .insert(META_NO_WAIT.to_string(), "true".to_string());

        let others: Vec<ActionId> = ws
            .actions
            .iter()
            .filter(|a| a.task == task::SHUTDOWN && a.node.is_some_and(|n| !ws.node(n).is_dc))
            .map(|a| a.id)
            .collect();
        for down in others {
            ws.order_actions(down, dc, OrderType::IMPLIES_LEFT);
        }
        if let Some(last) = last_fence.filter(|l| *l != dc) {
            ws.order_actions(last, dc, OrderType::IMPLIES_LEFT);
        }
    }

    if let Some(last) = last_fence {
        ws.order_actions(last, done, OrderType::IMPLIES_RIGHT);
    } else if let Some(dc) = dc_fence {
        ws.order_actions(dc, done, OrderType::IMPLIES_RIGHT);
    }
    ws.order_actions(ready, done, OrderType::OPTIONAL);
}
