//! The scheduling pipeline: one function per stage, run in a fixed order
//! over a freshly unpacked working set.

use crate::check::{check_actions, check_orphans};
use crate::fencing::fencing_and_shutdown;
use crate::graph::{GraphBuilder, TransitionGraph};
use crate::ordering::order_and_propagate;
use crate::placement::{apply_locations, apply_node_health, apply_stickiness, count_valid_nodes};
use crate::probe::probe_resources;
use crate::types::RscId;
use crate::unpack::unpack;
use crate::working_set::WorkingSet;
use std::cmp::Reverse;
use tracing::{debug, info};
use warden_core::ClusterDocument;

/// Stage 0: build the working set from the input document
pub fn stage0(doc: &ClusterDocument, show_scores: bool) -> WorkingSet {
    let mut ws = unpack(doc);
    ws.show_scores = show_scores;
    ws
}

/// Stage 1: detect parameter and definition changes of active resources
pub fn stage1(ws: &mut WorkingSet) {
    check_actions(ws);
}

/// Stage 2: node capacity, health, locations and stickiness
pub fn stage2(ws: &mut WorkingSet) {
    count_valid_nodes(ws);
    apply_node_health(ws);
    apply_locations(ws);
    apply_stickiness(ws);
}

/// Stage 3: orderings each variant needs between its own actions
pub fn stage3(ws: &mut WorkingSet) {
    for rsc in ws.top.clone() {
        ws.fns(rsc).internal_constraints(ws, rsc);
    }
}

/// Stage 4: resources that are running but no longer configured
pub fn stage4(ws: &mut WorkingSet) {
    check_orphans(ws);
}

/// Top-level resources, highest priority first, configuration order otherwise
fn by_priority(ws: &WorkingSet) -> Vec<RscId> {
    let mut sorted = ws.top.clone();
    sorted.sort_by_key(|r| Reverse(ws.rsc(*r).priority));
    sorted
}

/// Stage 5: choose nodes, probe, and create the actions reaching each
/// resource's next role
pub fn stage5(ws: &mut WorkingSet) {
    let sorted = by_priority(ws);
    for rsc in &sorted {
        let chosen = ws.fns(*rsc).color(ws, *rsc);
        debug!(
            "Allocated {} to {}",
            ws.rsc(*rsc).id,
            chosen.map(|n| ws.uname(n)).unwrap_or("<none>")
        );
    }

    probe_resources(ws);

    for rsc in &sorted {
        ws.fns(*rsc).create_actions(ws, *rsc);
    }
}

/// Stage 6: fencing and shutdown
pub fn stage6(ws: &mut WorkingSet) {
    fencing_and_shutdown(ws);
}

/// Stage 7: orderings, state propagation, migrations and reloads
pub fn stage7(ws: &mut WorkingSet) {
    order_and_propagate(ws);
}

/// Stage 8: emit the surviving actions as a transition graph
pub fn stage8(ws: &mut WorkingSet, transition_id: u64) -> TransitionGraph {
    let mut builder = GraphBuilder::new();
    for rsc in ws.top.clone() {
        ws.fns(rsc).expand(ws, rsc, &mut builder);
    }
    builder.add_cluster_actions(ws);
    builder.finish(ws, transition_id)
}

/// Run stages 1 to 7 on an unpacked working set
pub fn calculate(ws: &mut WorkingSet) {
    stage1(ws);
    stage2(ws);
    stage3(ws);
    stage4(ws);
    stage5(ws);
    stage6(ws);
    stage7(ws);
}

/// Run the whole pipeline for one input document
pub fn schedule(doc: &ClusterDocument, transition_id: u64, show_scores: bool) -> (WorkingSet, TransitionGraph) {
    let mut ws = stage0(doc, show_scores);
    calculate(&mut ws);
    let graph = stage8(&mut ws, transition_id);
    info!(
        "Calculated transition {} ({} actions, {} configuration errors)",
        transition_id,
        graph.synapses.len(),
        ws.config_errors.len()
    );
    (ws, graph)
}
