//! Placement preferences: location constraints, node health, stickiness and
//! failure limits.

use crate::node::{Node, ATTR_HEALTH_PREFIX};
use crate::types::{NodeId, RscId};
use crate::unpack::FAIL_COUNT_INFINITY;
use crate::working_set::WorkingSet;
use tracing::{debug, info, trace, warn};
use warden_core::types::NodeHealthStrategy;
use warden_core::{merge_weights, parse_score, score_to_string, ClusterOptions, INFINITY};

/// Count the nodes able to host resources; clones never spread wider
pub fn count_valid_nodes(ws: &mut WorkingSet) {
    ws.max_valid_nodes = ws
        .nodes
        .iter()
        .filter(|n| n.can_run_resources() && n.weight >= 0)
        .count();
    debug!("{} nodes can run resources", ws.max_valid_nodes);
}

/// Apply every location constraint through the constrained resource's variant
pub fn apply_locations(ws: &mut WorkingSet) {
    for loc in ws.locations.clone() {
        trace!("Applying location {}", loc.id);
        ws.fns(loc.rsc).rsc_location(ws, loc.rsc, &loc);
    }
}

/// Score of one `#health*` attribute value under a strategy
fn health_value(value: &str, strategy: NodeHealthStrategy, options: &ClusterOptions) -> i32 {
    let (red, yellow, green) = match strategy {
        NodeHealthStrategy::MigrateOnRed => (-INFINITY, 0, 0),
        NodeHealthStrategy::OnlyGreen => (-INFINITY, -INFINITY, 0),
        _ => (
            options.node_health_red.get(),
            options.node_health_yellow.get(),
            options.node_health_green.get(),
        ),
    };
    match value.to_ascii_lowercase().as_str() {
        "red" => red,
        "yellow" => yellow,
        "green" => green,
        other => parse_score(other).unwrap_or(0),
    }
}

/// Combined health score of a node: every `#health*` attribute merged
pub fn node_health(node: &Node, options: &ClusterOptions) -> i32 {
    let strategy = options.node_health_strategy;
    node.attrs
        .iter()
        .filter(|(k, _)| k.starts_with(ATTR_HEALTH_PREFIX))
        .fold(0, |score, (_, v)| merge_weights(score, health_value(v, strategy, options)))
}

/// Turn node health into a location preference for every resource
pub fn apply_node_health(ws: &mut WorkingSet) {
    match ws.options.node_health_strategy {
        NodeHealthStrategy::None => return,
        NodeHealthStrategy::Custom => {
            debug!("Custom node health: leaving health attributes to location rules");
            return;
        }
        _ => {}
    }

    let scores: Vec<(NodeId, i32)> = ws
        .node_ids()
        .map(|n| (n, node_health(ws.node(n), &ws.options)))
        .filter(|(_, score)| *score != 0)
        .collect();
    for (node, score) in scores {
        info!("Node {} has a combined health of {}", ws.uname(node), score_to_string(score));
        for rsc in ws.top.clone() {
            ws.resource_location(rsc, Some(node), score, "#health");
        }
    }
}

/// The resource whose placement a failure affects: interchangeable clone
/// instances share one failure history
fn failure_target(ws: &WorkingSet, rsc: RscId) -> RscId {
    let top = ws.uber_parent(rsc);
    let anonymous = ws
        .rsc(top)
        .clone
        .as_ref()
        .is_some_and(|c| !c.globally_unique);
    if anonymous {
        top
    } else {
        rsc
    }
}

/// Stickiness towards current nodes, and bans from nodes where a resource
/// failed too often
pub fn apply_stickiness(ws: &mut WorkingSet) {
    let symmetric = ws.options.symmetric_cluster;
    for rsc in ws.all_leaves() {
        let resource = ws.rsc(rsc);
        let stickiness = resource.stickiness;
        if resource.managed && stickiness != 0 {
            for node in resource.running_on.clone() {
                if !symmetric && ws.rsc(rsc).weight_on(node).is_none() {
                    trace!("{}: not sticking to {}, it is not allowed there", ws.rsc(rsc).id, ws.uname(node));
                    continue;
                }
                let base = ws.node(node).weight;
                let weight = ws.rsc_mut(rsc).allowed_nodes.entry(node).or_insert(base);
                *weight = merge_weights(*weight, stickiness);
                debug!("{}: resource stickiness of {} on {}", ws.rsc(rsc).id, stickiness, ws.uname(node));
            }
        }

        let threshold = ws.rsc(rsc).migration_threshold;
        for (node, count) in ws.rsc(rsc).fail_count.clone() {
            if count == 0 {
                continue;
            }
            let limit_hit = count >= FAIL_COUNT_INFINITY || (threshold > 0 && count >= threshold);
            if !limit_hit {
                trace!("{} has failed {} times on {}", ws.rsc(rsc).id, count, ws.uname(node));
                continue;
            }
            let target = failure_target(ws, rsc);
            warn!(
                "Forcing {} away from {} after {} failures (max={})",
                ws.rsc(target).id,
                ws.uname(node),
                score_to_string(count.min(FAIL_COUNT_INFINITY) as i32),
                threshold
            );
            ws.resource_location(target, Some(node), -INFINITY, "__fail_limit__");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constraints::LocationConstraint;
    use crate::working_set::tests::{add_primitive, create_test_set};

    #[test]
    fn test_location_preferences() {
        let mut ws = create_test_set(&["n1", "n2"]);
        let rsc = add_primitive(&mut ws, "db");
        ws.locations.push(LocationConstraint {
            id: "db-prefers-n2".to_string(),
            rsc,
            role_filter: None,
            nodes: vec![(NodeId(1), 50), (NodeId(0), -INFINITY)],
        });

        apply_locations(&mut ws);
        assert_eq!(ws.rsc(rsc).weight_on(NodeId(1)), Some(50));
        assert_eq!(ws.rsc(rsc).weight_on(NodeId(0)), Some(-INFINITY));
    }

    #[test]
    fn test_stickiness_only_where_running() {
        let mut ws = create_test_set(&["n1", "n2"]);
        let rsc = add_primitive(&mut ws, "db");
        ws.rsc_mut(rsc).stickiness = 100;
        ws.rsc_mut(rsc).running_on.push(NodeId(0));

        apply_stickiness(&mut ws);
        assert_eq!(ws.rsc(rsc).weight_on(NodeId(0)), Some(100));
        assert_eq!(ws.rsc(rsc).weight_on(NodeId(1)), Some(0));

        // unmanaged resources are left where they are anyway
        let other = add_primitive(&mut ws, "web");
        ws.rsc_mut(other).stickiness = 100;
        ws.rsc_mut(other).managed = false;
        ws.rsc_mut(other).running_on.push(NodeId(1));
        apply_stickiness(&mut ws);
        assert_eq!(ws.rsc(other).weight_on(NodeId(1)), Some(0));
    }

    #[test]
    fn test_asymmetric_stickiness_needs_permission() {
        let mut ws = create_test_set(&["n1", "n2"]);
        ws.options.symmetric_cluster = false;
        let rsc = add_primitive(&mut ws, "db");
        ws.rsc_mut(rsc).allowed_nodes.clear();
        ws.rsc_mut(rsc).stickiness = 100;
        ws.rsc_mut(rsc).running_on.push(NodeId(0));

        apply_stickiness(&mut ws);
        assert_eq!(ws.rsc(rsc).weight_on(NodeId(0)), None);
    }

    #[test]
    fn test_migration_threshold() {
        let mut ws = create_test_set(&["n1", "n2"]);
        let rsc = add_primitive(&mut ws, "db");
        ws.rsc_mut(rsc).migration_threshold = 3;
        ws.rsc_mut(rsc).fail_count.insert(NodeId(0), 2);
        apply_stickiness(&mut ws);
        assert_eq!(ws.rsc(rsc).weight_on(NodeId(0)), Some(0));

        ws.rsc_mut(rsc).fail_count.insert(NodeId(0), 3);
        ws.rsc_mut(rsc).fail_count.insert(NodeId(1), FAIL_COUNT_INFINITY);
        ws.rsc_mut(rsc).migration_threshold = 0;
        apply_stickiness(&mut ws);
        // without a threshold only an infinite count bans
        assert_eq!(ws.rsc(rsc).weight_on(NodeId(0)), Some(0));
        assert_eq!(ws.rsc(rsc).weight_on(NodeId(1)), Some(-INFINITY));
    }

    #[test]
    fn test_node_health_strategies() {
        let mut ws = create_test_set(&["n1", "n2"]);
        let rsc = add_primitive(&mut ws, "db");
        ws.nodes[0].attrs.insert("#health-disk".to_string(), "yellow".to_string());
        ws.nodes[1].attrs.insert("#health-cpu".to_string(), "red".to_string());

        ws.options.node_health_strategy = NodeHealthStrategy::None;
        apply_node_health(&mut ws);
        assert_eq!(ws.rsc(rsc).weight_on(NodeId(1)), Some(0));

        ws.options.node_health_strategy = NodeHealthStrategy::MigrateOnRed;
        assert_eq!(node_health(ws.node(NodeId(0)), &ws.options), 0);
        assert_eq!(node_health(ws.node(NodeId(1)), &ws.options), -INFINITY);

        ws.options.node_health_strategy = NodeHealthStrategy::OnlyGreen;
        assert_eq!(node_health(ws.node(NodeId(0)), &ws.options), -INFINITY);

        ws.options.node_health_strategy = NodeHealthStrategy::Progressive;
        ws.options.node_health_yellow = warden_core::ScoreValue(-10);
        ws.nodes[0].attrs.insert("#health-net".to_string(), "-5".to_string());
        assert_eq!(node_health(ws.node(NodeId(0)), &ws.options), -15);

        apply_node_health(&mut ws);
        assert_eq!(ws.rsc(rsc).weight_on(NodeId(0)), Some(-15));
        assert_eq!(ws.rsc(rsc).weight_on(NodeId(1)), Some(-INFINITY));
    }
}
