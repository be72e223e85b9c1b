//! Multi-state clones: instances run as slaves and up to `master-max` of
//! them are promoted.

use super::clone::{clone_settings, CloneVariant};
use super::ResourceVariant;
use crate::constraints::{ColocationConstraint, LocationConstraint, OrderConstraint};
use crate::graph::GraphBuilder;
use crate::notify::create_notification_boundaries;
use crate::types::{ActionId, NodeId, OrderType, RscId};
use crate::working_set::WorkingSet;
use std::collections::BTreeMap;
use tracing::{debug, info, trace};
use warden_core::{merge_weights, parse_score, task, AttrMap, Role, INFINITY};

/// Promotion score used when a node carries no preference for an instance
const DEFAULT_PROMOTION_SCORE: i32 = -1;

pub struct MasterVariant;

impl MasterVariant {
    /// Node attribute preference for promoting `child` where it was placed
    fn attribute_score(ws: &WorkingSet, child: RscId, node: NodeId) -> i32 {
        let resource = ws.rsc(child);
        let node = ws.node(node);
        [format!("master-{}", resource.id), format!("master-{}", resource.base_id)]
            .iter()
            .find_map(|name| node.attr(name))
            .and_then(|value| parse_score(value).ok())
            .unwrap_or(DEFAULT_PROMOTION_SCORE)
    }

    /// Nodes where the target of a colocation holds the wanted role
    fn colocation_targets(ws: &WorkingSet, con: &ColocationConstraint) -> Vec<NodeId> {
        let rh = ws.rsc(con.rsc_rh);
        if !rh.kind.is_clone_like() {
            return rh.allocated_to.into_iter().collect();
        }
        rh.children
            .iter()
            .map(|c| ws.rsc(*c))
            .filter(|child| match con.role_rh {
                Role::Unknown => true,
                Role::Started => child.next_role != Role::Stopped,
                wanted => child.next_role == wanted,
            })
            .filter_map(|child| child.allocated_to)
            .collect()
    }

    /// How much each instance wants to be promoted where it was placed
    fn promotion_scores(ws: &WorkingSet, rsc: RscId) -> BTreeMap<RscId, i32> {
        let master = ws.rsc(rsc);
        let mut scores = BTreeMap::new();

        for child in &master.children {
            let Some(node) = ws.rsc(*child).allocated_to else {
                continue;
            };
            let mut score = Self::attribute_score(ws, *child, node);

            for loc in master
                .rsc_location
                .iter()
                .filter(|l| l.role_filter == Some(Role::Master))
            {
                if let Some((_, weight)) = loc.nodes.iter().find(|(n, _)| *n == node) {
                    score = merge_weights(score, *weight);
                }
            }

            for con in master.rsc_cons.iter().filter(|c| c.role_lh == Role::Master) {
                let targets = Self::colocation_targets(ws, con);
                if targets.contains(&node) {
                    score = merge_weights(score, con.score);
                } else if con.score >= INFINITY {
                    score = -INFINITY;
                }
            }

            trace!(
                "Promotion score for {} on {}: {}",
                ws.rsc(*child).id,
                ws.uname(node),
                score
            );
            scores.insert(*child, score);
        }
        scores
    }

    /// Decide which instances are promoted
    fn choose_masters(ws: &mut WorkingSet, rsc: RscId) {
        let settings = clone_settings(ws, rsc);
        let scores = Self::promotion_scores(ws, rsc);
        let master_max = match ws.rsc(rsc).target_role {
            Some(Role::Slave) | Some(Role::Started) | Some(Role::Stopped) => 0,
            _ => settings.master_max,
        };

        let mut order: Vec<RscId> = ws.rsc(rsc).children.clone();
        order.sort_by(|a, b| {
            let sa = scores.get(a).copied().unwrap_or(-INFINITY);
            let sb = scores.get(b).copied().unwrap_or(-INFINITY);
            sb.cmp(&sa)
                .then_with(|| {
                    let ma = ws.rsc(*a).role == Role::Master;
                    let mb = ws.rsc(*b).role == Role::Master;
                    mb.cmp(&ma)
                })
                .then_with(|| a.cmp(b))
        });

        let mut per_node: BTreeMap<NodeId, usize> = BTreeMap::new();
        let mut promoted = 0;
        for child in order {
            let resource = ws.rsc(child);
            let Some(node) = resource.allocated_to else {
                ws.rsc_mut(child).next_role = Role::Stopped;
                continue;
            };

            if !resource.managed {
                let role = resource.role;
                if role == Role::Master {
                    promoted += 1;
                    *per_node.entry(node).or_default() += 1;
                }
                ws.rsc_mut(child).next_role = role;
                continue;
            }

            let score = scores.get(&child).copied().unwrap_or(-INFINITY);
            let on_node = per_node.get(&node).copied().unwrap_or(0);
            let next_role = if score >= 0
                && promoted < master_max
                && on_node < settings.master_node_max
            {
                promoted += 1;
                *per_node.entry(node).or_default() += 1;
                Role::Master
            } else {
                Role::Slave
            };

            if next_role == Role::Master && resource.role != Role::Master {
                info!("Promoting {} on {}", resource.id, ws.uname(node));
            } else if next_role == Role::Slave && resource.role == Role::Master {
                info!("Demoting {} on {}", resource.id, ws.uname(node));
            }
            ws.rsc_mut(child).next_role = next_role;
        }

        debug!("{}: promoted {} of at most {} instances", ws.rsc(rsc).id, promoted, master_max);
        if let Some(settings) = ws.rsc_mut(rsc).clone.as_mut() {
            settings.masters_allocated = promoted;
        }
    }

    /// Whether any instance will be promoted or demoted in this transition
    fn role_status(ws: &WorkingSet, rsc: RscId) -> (bool, bool) {
        let (mut promoting, mut demoting) = (false, false);
        for leaf in ws.leaves(rsc) {
            for op in &ws.rsc(leaf).actions {
                let action = ws.action(*op);
                if action.optional || !action.runnable {
                    continue;
                }
                if action.task == task::PROMOTE {
                    promoting = true;
                } else if action.task == task::DEMOTE {
                    demoting = true;
                }
            }
        }
        (promoting, demoting)
    }
}

impl ResourceVariant for MasterVariant {
    fn name(&self) -> &str {
        "master"
    }

    fn color(&self, ws: &mut WorkingSet, rsc: RscId) -> Option<NodeId> {
        if !ws.rsc(rsc).provisional {
            return None;
        }
        CloneVariant.color(ws, rsc);
        Self::choose_masters(ws, rsc);
        None
    }

    fn create_actions(&self, ws: &mut WorkingSet, rsc: RscId) {
        CloneVariant::create_clone_actions(ws, rsc);

        let (promoting, demoting) = Self::role_status(ws, rsc);
        let promote = CloneVariant::container_pseudo(ws, rsc, task::PROMOTE, !promoting, 0);
        let promoted = CloneVariant::container_pseudo(ws, rsc, task::PROMOTED, !promoting, INFINITY);
        let demote = CloneVariant::container_pseudo(ws, rsc, task::DEMOTE, !demoting, 0);
        let demoted = CloneVariant::container_pseudo(ws, rsc, task::DEMOTED, !demoting, INFINITY);

        if clone_settings(ws, rsc).notify {
            let promote_notify =
                create_notification_boundaries(ws, rsc, task::PROMOTE, Some(promote), Some(promoted));
            let demote_notify =
                create_notification_boundaries(ws, rsc, task::DEMOTE, Some(demote), Some(demoted));
            if let Some(settings) = ws.rsc_mut(rsc).clone.as_mut() {
                settings.promote_notify = Some(promote_notify);
                settings.demote_notify = Some(demote_notify);
            }
        }
    }

    fn create_probe(
        &self,
        ws: &mut WorkingSet,
        rsc: RscId,
        node: NodeId,
        complete: ActionId,
        force: bool,
    ) -> bool {
        CloneVariant.create_probe(ws, rsc, node, complete, force)
    }

    fn internal_constraints(&self, ws: &mut WorkingSet, rsc: RscId) {
        CloneVariant::clone_internal_constraints(ws, rsc);
        let ordered = clone_settings(ws, rsc).ordered;

        ws.new_rsc_order(rsc, task::STOPPED, rsc, task::PROMOTE, OrderType::OPTIONAL);
        ws.new_rsc_order(rsc, task::DEMOTED, rsc, task::START, OrderType::OPTIONAL);
        ws.new_rsc_order(rsc, task::STARTED, rsc, task::PROMOTE, OrderType::OPTIONAL);
        ws.new_rsc_order(rsc, task::DEMOTED, rsc, task::STOP, OrderType::OPTIONAL);
        ws.new_rsc_order(rsc, task::DEMOTE, rsc, task::DEMOTED, OrderType::OPTIONAL);
        ws.new_rsc_order(rsc, task::PROMOTE, rsc, task::PROMOTED, OrderType::OPTIONAL);
        ws.new_rsc_order(rsc, task::DEMOTED, rsc, task::PROMOTE, OrderType::OPTIONAL);

        let mut last: Option<RscId> = None;
        for child in ws.rsc(rsc).children.clone() {
            ws.new_rsc_order(child, task::DEMOTE, child, task::PROMOTE, OrderType::OPTIONAL);

            ws.new_rsc_order(rsc, task::PROMOTE, child, task::PROMOTE, OrderType::IMPLIES_LEFT | OrderType::RUNNABLE_LEFT);
            ws.new_rsc_order(child, task::PROMOTE, rsc, task::PROMOTED, OrderType::IMPLIES_RIGHT);
            ws.new_rsc_order(rsc, task::DEMOTE, child, task::DEMOTE, OrderType::IMPLIES_LEFT);
            ws.new_rsc_order(child, task::DEMOTE, rsc, task::DEMOTED, OrderType::IMPLIES_RIGHT);

            if let (true, Some(prev)) = (ordered, last) {
                ws.new_rsc_order(prev, task::PROMOTE, child, task::PROMOTE, OrderType::OPTIONAL);
                ws.new_rsc_order(child, task::DEMOTE, prev, task::DEMOTE, OrderType::OPTIONAL);
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
        if con.role_lh == Role::Master {
            trace!("{} feeds the promotion scores of {}", con.id, ws.rsc(lh).id);
            return;
        }
        CloneVariant.rsc_colocation_lh(ws, lh, rh, con);
    }

    fn rsc_colocation_rh(
        &self,
        ws: &mut WorkingSet,
        lh: RscId,
        rh: RscId,
        con: &ColocationConstraint,
    ) {
        CloneVariant.rsc_colocation_rh(ws, lh, rh, con);
    }

    fn rsc_order_lh(&self, ws: &mut WorkingSet, rsc: RscId, order: &OrderConstraint) {
        CloneVariant.rsc_order_lh(ws, rsc, order);
    }

    fn rsc_location(&self, ws: &mut WorkingSet, rsc: RscId, loc: &LocationConstraint) {
        CloneVariant.rsc_location(ws, rsc, loc);
    }

    fn expand(&self, ws: &mut WorkingSet, rsc: RscId, graph: &mut GraphBuilder) {
        CloneVariant.expand(ws, rsc, graph);
    }

    fn append_meta(&self, ws: &WorkingSet, rsc: RscId, meta: &mut AttrMap) {
        CloneVariant.append_meta(ws, rsc, meta);
        let settings = clone_settings(ws, rsc);
        meta.insert("master_max".to_string(), settings.master_max.to_string());
        meta.insert("master_node_max".to_string(), settings.master_node_max.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::CloneSettings;
    use crate::types::VariantKind;
    use crate::variant::clone::tests::create_test_clone;
    use crate::working_set::tests::create_test_set;

    fn create_test_master(ws: &mut WorkingSet) -> RscId {
        create_test_clone(
            ws,
            "db",
            VariantKind::Master,
            CloneSettings {
                clone_max: 2,
                clone_node_max: 1,
                master_max: 1,
                master_node_max: 1,
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_highest_score_is_promoted() {
        let mut ws = create_test_set(&["n1", "n2"]);
        ws.nodes[1].attrs.insert("master-db-child".to_string(), "10".to_string());
        ws.nodes[0].attrs.insert("master-db-child".to_string(), "5".to_string());
        let ms = create_test_master(&mut ws);

        MasterVariant.color(&mut ws, ms);

        let roles: Vec<(Option<NodeId>, Role)> = ws
            .rsc(ms)
            .children
            .iter()
            .map(|c| (ws.rsc(*c).allocated_to, ws.rsc(*c).next_role))
            .collect();
        assert!(roles.contains(&(Some(NodeId(1)), Role::Master)));
        assert!(roles.contains(&(Some(NodeId(0)), Role::Slave)));
        assert_eq!(ws.rsc(ms).clone.as_ref().map(|c| c.masters_allocated), Some(1));
    }

    #[test]
    fn test_no_promotion_without_preference() {
        let mut ws = create_test_set(&["n1", "n2"]);
        let ms = create_test_master(&mut ws);

        MasterVariant.color(&mut ws, ms);
        assert!(ws
            .rsc(ms)
            .children
            .iter()
            .all(|c| ws.rsc(*c).next_role == Role::Slave));
    }

    #[test]
    fn test_master_location_feeds_promotion() {
        let mut ws = create_test_set(&["n1", "n2"]);
        ws.nodes[0].attrs.insert("master-db-child".to_string(), "1".to_string());
        ws.nodes[1].attrs.insert("master-db-child".to_string(), "1".to_string());
        let ms = create_test_master(&mut ws);
        ws.rsc_mut(ms).rsc_location.push(LocationConstraint {
            id: "prefer-n1-master".to_string(),
            rsc: ms,
            role_filter: Some(Role::Master),
            nodes: vec![(NodeId(0), 100)],
        });

        MasterVariant.color(&mut ws, ms);
        let master = ws
            .rsc(ms)
            .children
            .iter()
            .find(|c| ws.rsc(**c).next_role == Role::Master)
            .and_then(|c| ws.rsc(*c).allocated_to);
        assert_eq!(master, Some(NodeId(0)));
    }

    #[test]
    fn test_promote_pseudo_actions() {
        let mut ws = create_test_set(&["n1", "n2"]);
        ws.nodes[0].attrs.insert("master-db-child".to_string(), "10".to_string());
        let ms = create_test_master(&mut ws);

        MasterVariant.color(&mut ws, ms);
        MasterVariant.create_actions(&mut ws, ms);

        let promote = ws.find_actions(ms, "db_promote_0", None);
        assert_eq!(promote.len(), 1);
        assert!(!ws.action(promote[0]).optional);
        let demote = ws.find_actions(ms, "db_demote_0", None);
        assert!(ws.action(demote[0]).optional);

        let mut meta = AttrMap::new();
        MasterVariant.append_meta(&ws, ms, &mut meta);
        assert_eq!(meta.get("master_max").map(String::as_str), Some("1"));
        assert_eq!(meta.get("clone_max").map(String::as_str), Some("2"));
    }
}
