//! Resolution of ordering constraints into action edges, and propagation of
//! mandatory and runnable state along those edges.

use crate::types::{ActionId, OrderType};
use crate::variant::resolve_rh;
use crate::working_set::WorkingSet;
use std::collections::VecDeque;
use tracing::{debug, trace};

/// Turn every recorded ordering into edges between concrete actions
pub fn apply_orderings(ws: &mut WorkingSet) {
    // Variants may record more orderings while resolving
    let mut idx = 0;
    while idx < ws.orderings.len() {
        let order = ws.orderings[idx].clone();
        idx += 1;

        if let Some(lh) = order.lh_rsc {
            ws.fns(lh).rsc_order_lh(ws, lh, &order);
        } else if let Some(lh_action) = order.lh_action {
            resolve_rh(ws, lh_action, &order);
        } else {
            trace!("Ordering {} has no first side", order.id);
        }
    }
    debug!("Resolved {} orderings", idx);
}

/// Propagate ordering semantics until nothing changes.
///
/// A mandatory first makes an `IMPLIES_RIGHT` then mandatory, a mandatory
/// then makes an `IMPLIES_LEFT` first mandatory, and an unrunnable first
/// makes a `RUNNABLE_LEFT` then unrunnable. Each step only ever clears
/// `optional` or `runnable`, so the loop terminates.
pub fn propagate(ws: &mut WorkingSet) {
    let mut queue: VecDeque<ActionId> = ws.actions.iter().map(|a| a.id).collect();
    let mut steps = 0usize;

    while let Some(id) = queue.pop_front() {
        steps += 1;
        let (optional, runnable) = {
            let action = ws.action(id);
            (action.optional, action.runnable)
        };

        for edge in ws.action(id).actions_after.clone() {
            let then = edge.action;
            let mut changed = false;
            if !optional && edge.kind.contains(OrderType::IMPLIES_RIGHT) && ws.set_mandatory(then) {
                trace!("{} is mandatory because of {}", ws.action(then).uuid, ws.action(id).uuid);
                changed = true;
            }
            if !runnable && edge.kind.contains(OrderType::RUNNABLE_LEFT) && ws.action(then).runnable {
                trace!("{} is unrunnable because of {}", ws.action(then).uuid, ws.action(id).uuid);
                ws.action_mut(then).runnable = false;
                changed = true;
            }
            if changed {
                queue.push_back(then);
            }
        }

        if optional {
            continue;
        }
        for edge in ws.action(id).actions_before.clone() {
            let first = edge.action;
            if edge.kind.contains(OrderType::IMPLIES_LEFT) && ws.set_mandatory(first) {
                trace!("{} is mandatory because of {}", ws.action(first).uuid, ws.action(id).uuid);
                queue.push_back(first);
            }
        }
    }
    debug!("Action states settled after {} steps", steps);
}

/// Stage 7: resolve orderings, settle action states, then convert
/// stop/start pairs into migrations and reloads
pub fn order_and_propagate(ws: &mut WorkingSet) {
    apply_orderings(ws);
    propagate(ws);
    for rsc in ws.top.clone() {
        ws.fns(rsc).migrate_reload(ws, rsc);
    }
}
