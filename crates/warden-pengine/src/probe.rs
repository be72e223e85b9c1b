//! Probes: find out what is running where before acting on it.

use crate::constraints::rsc_key;
use crate::types::OrderType;
use crate::working_set::WorkingSet;
use tracing::{debug, info};
use warden_core::{task, INFINITY};

/// Meta key telling the transition engine not to wait for a confirmation
pub const META_NO_WAIT: &str = "op_no_wait";

fn is_true(value: &str) -> bool {
    matches!(value.to_ascii_lowercase().as_str(), "true" | "yes" | "on" | "1")
}

/// Probe every resource on every node where its state is unknown.
///
/// Each node gets a `probe_complete` action that waits for its probes, and
/// the global `probe_complete` milestone waits for all of them. Starts and
/// stops of probed resources wait for the milestone.
pub fn probe_resources(ws: &mut WorkingSet) {
    let mut probe_complete = None;

    for node in ws.node_ids().collect::<Vec<_>>() {
        let n = ws.node(node);
        if !n.online || n.unclean {
            continue;
        }
        let probed = n.attr(task::PROBE_COMPLETE).map(is_true);
        let force = probed == Some(false);
        if force {
            info!("Re-probing every resource on {}", n.uname);
        }
        let pending = n.pending;

        let complete = *probe_complete.get_or_insert_with(|| ws.pseudo_op(task::PROBE_COMPLETE));
        let node_complete = ws.custom_action(None, task::PROBE_COMPLETE, task::PROBE_COMPLETE, Some(node), true);
        {
            let action = ws.action_mut(node_complete);
            action.priority = INFINITY;
            action.meta.insert(META_NO_WAIT.to_string(), "true".to_string());
            if pending {
                action.runnable = false;
            }
        }
        if pending {
            info!("Probes on {} are unrunnable: node is pending", ws.uname(node));
        }
        ws.order_actions(node_complete, complete, OrderType::RUNNABLE_LEFT);

        for rsc in ws.top.clone() {
            if !ws.fns(rsc).create_probe(ws, rsc, node, node_complete, force) {
                continue;
            }
            ws.action_mut(complete).optional = false;
            // The node's own completion stays optional once it was reported probed
            if probed != Some(true) {
                ws.action_mut(node_complete).optional = false;
            }

            let id = ws.rsc(rsc).id.clone();
            for t in [task::START, task::STOP] {
                ws.custom_action_order(
                    None,
                    None,
                    Some(complete),
                    Some(rsc),
                    Some(rsc_key(&id, t)),
                    None,
                    OrderType::OPTIONAL,
                );
            }
        }
    }

    let Some(complete) = probe_complete else {
        debug!("No node can be probed");
        return;
    };
    for rsc in ws.all_leaves() {
        let id = ws.rsc(rsc).id.clone();
        ws.custom_action_order(
            None,
            None,
            Some(complete),
            Some(rsc),
            Some(rsc_key(&id, task::STOP)),
            None,
            OrderType::OPTIONAL,
        );
    }
}
