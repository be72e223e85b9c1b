//! Building a working set from a cluster document.
//!
//! Unpacking runs in a fixed order: nodes and their membership state first,
//! then the resource tree (expanding clones into instances), then the
//! operation history of every node, and finally the constraints. Problems
//! with individual items are recorded as configuration errors and the item
//! is skipped.

use crate::constraints::{invert_action, ColocationConstraint, LocationConstraint};
use crate::node::Node;
use crate::resource::{CloneSettings, GroupSettings, NodeHistory, OpDef, Resource, DEFAULT_OP_TIMEOUT_MS};
use crate::rules::resolve_rule;
use crate::types::{NodeId, OrderType, RscId, VariantKind};
use crate::working_set::WorkingSet;
use std::cmp::Ordering;
use tracing::{debug, info, trace, warn};
use warden_core::cib::{
    ColocationConfig, CrmdState, JoinState, LocationConfig, NodeState, OrderingConfig, PrimitiveConfig,
    ResourceHistory,
};
use warden_core::types::{op_status, rc, RecoveryPolicy};
use warden_core::{parse_interval_ms, parse_score, task, AttrMap, ClusterDocument, OpHistory, ResourceConfig, Role, INFINITY};

/// Node attribute putting a node in standby
pub const ATTR_STANDBY: &str = "standby";
/// Prefix of the transient attributes counting failures of a resource
pub const FAIL_COUNT_PREFIX: &str = "fail-count-";
/// Fail count recorded for a failed start when start failures are fatal
pub const FAIL_COUNT_INFINITY: u32 = INFINITY as u32;

/// Build the working set for one scheduling run
pub fn unpack(doc: &ClusterDocument) -> WorkingSet {
    let mut ws = WorkingSet::new(doc.options.clone(), doc.have_quorum);
    if !ws.have_quorum {
        warn!("We do not have quorum: no-quorum-policy is {:?}", ws.options.no_quorum_policy);
    }

    unpack_nodes(&mut ws, doc);
    for config in &doc.resources {
        let inherited = AttrMap::new();
        if let Some(rsc) = unpack_resource(&mut ws, config, None, None, &inherited, doc.nodes.len()) {
            ws.top.push(rsc);
        }
    }
    unpack_status(&mut ws, doc);

    for loc in &doc.constraints.locations {
        unpack_location(&mut ws, loc);
    }
    for col in &doc.constraints.colocations {
        unpack_colocation(&mut ws, col);
    }
    for order in &doc.constraints.orderings {
        unpack_ordering(&mut ws, order);
    }

    info!(
        "Unpacked {} nodes, {} resources and {} constraints ({} configuration errors)",
        ws.nodes.len(),
        ws.resources.len(),
        ws.locations.len() + ws.colocations.len() + ws.orderings.len(),
        ws.config_errors.len()
    );
    ws
}

fn unpack_nodes(ws: &mut WorkingSet, doc: &ClusterDocument) {
    let fencing = ws.options.stonith_enabled;
    for config in &doc.nodes {
        if ws.find_node(&config.id).is_some() {
            ws.config_error(format!("duplicate node {}", config.id));
            continue;
        }
        let mut node = Node::new(config.id.as_str(), config.uname(), config.node_type);
        node.attrs
            .extend(config.attributes.iter().map(|(k, v)| (k.clone(), v.clone())));

        match doc.status.iter().find(|s| s.id == config.id) {
            Some(state) => {
                node.attrs.extend(
                    state
                        .transient_attributes
                        .iter()
                        .map(|(k, v)| (k.clone(), v.clone())),
                );
                if fencing {
                    determine_online_fencing(&mut node, state);
                } else {
                    determine_online(&mut node, state);
                }
                node.shutdown = state.shutdown;
            }
            None if fencing && ws.options.startup_fencing => {
                warn!("Node {} has never been seen and will be fenced", node.uname);
                node.unclean = true;
            }
            None => debug!("Node {} is down: no state reported", node.uname),
        }

        node.standby |= node
            .attr(ATTR_STANDBY)
            .is_some_and(|v| matches!(v.to_ascii_lowercase().as_str(), "true" | "on" | "yes" | "1"));
        node.is_dc = doc.dc_uuid.as_deref() == Some(config.id.as_str());
        if !node.online || node.shutdown {
            node.weight = -INFINITY;
        }

        if node.unclean {
            warn!("Node {} is unclean", node.uname);
        } else if node.online {
            info!(
                "Node {} is {}",
                node.uname,
                if node.shutdown {
                    "shutting down"
                } else if node.pending {
                    "pending"
                } else if node.standby {
                    "standby"
                } else {
                    "online"
                }
            );
        }

        let is_dc = node.is_dc;
        ws.nodes.push(node);
        if is_dc {
            ws.dc_node = Some(NodeId(ws.nodes.len() - 1));
        }
    }

    for state in &doc.status {
        if ws.find_node(&state.id).is_none() {
            ws.config_error(format!("status reported for unknown node {}", state.id));
        }
    }
}

fn controller_up(state: &NodeState) -> bool {
    state.in_ccm && state.crmd == CrmdState::Online
}

/// Membership rules when fencing is available: a node that should be up but
/// is not reachable must be fenced before its resources can move
fn determine_online_fencing(node: &mut Node, state: &NodeState) {
    node.expected_up = state.expected == Some(JoinState::Member);
    node.unclean = state.unclean;

    if controller_up(state) {
        match state.join {
            JoinState::Member => node.online = true,
            JoinState::Pending | JoinState::Banned => {
                info!("Node {} is not ready to run resources", node.uname);
                node.online = true;
                node.pending = true;
                node.standby = true;
            }
            JoinState::Down if node.expected_up => {
                warn!("Node {} is unexpectedly down", node.uname);
                node.unclean = true;
            }
            JoinState::Down => info!("Node {} is coming up", node.uname),
        }
    } else if node.expected_up {
        warn!("Node {} is unexpectedly down", node.uname);
        node.unclean = true;
    } else {
        debug!("Node {} is down", node.uname);
    }
}

/// Without fencing a node is either up or down, and never unclean unless
/// reported so
fn determine_online(node: &mut Node, state: &NodeState) {
    node.expected_up = state.expected == Some(JoinState::Member);
    node.unclean = state.unclean;
    if controller_up(state) {
        match state.join {
            JoinState::Member => node.online = true,
            JoinState::Pending => {
                node.online = true;
                node.pending = true;
                node.standby = true;
            }
            JoinState::Down | JoinState::Banned => {}
        }
    }
}

fn meta_value<'a>(meta: &'a AttrMap, key: &str) -> Option<&'a str> {
    meta.get(key)
        .or_else(|| meta.get(&key.replace('-', "_")))
        .map(String::as_str)
}

fn meta_flag(meta: &AttrMap, key: &str, default: bool) -> bool {
    match meta_value(meta, key).map(|v| v.to_ascii_lowercase()) {
        Some(v) => matches!(v.as_str(), "true" | "yes" | "on" | "1"),
        None => default,
    }
}

fn meta_count(ws: &mut WorkingSet, meta: &AttrMap, key: &str, default: usize) -> usize {
    match meta_value(meta, key) {
        Some(v) => match v.trim().parse::<usize>() {
            Ok(n) => n,
            Err(_) => {
                ws.config_error(format!("invalid value '{}' for {}", v, key));
                default
            }
        },
        None => default,
    }
}

fn meta_score(ws: &mut WorkingSet, meta: &AttrMap, key: &str, default: i32) -> i32 {
    match meta_value(meta, key) {
        Some(v) => parse_score(v).unwrap_or_else(|e| {
            ws.config_error(format!("{} for {}", e, key));
            default
        }),
        None => default,
    }
}

/// Child meta attributes override the ones inherited from the parent
fn merged_meta(inherited: &AttrMap, own: &AttrMap) -> AttrMap {
    let mut meta = inherited.clone();
    meta.extend(own.iter().map(|(k, v)| (k.clone(), v.clone())));
    meta
}

/// Settings shared by every variant
fn apply_common_meta(ws: &mut WorkingSet, rsc: &mut Resource) {
    let options = ws.options.clone();
    let meta = rsc.meta.clone();

    let managed_default = options.is_managed_default && !options.maintenance_mode;
    rsc.managed = meta_flag(&meta, "is-managed", managed_default);
    rsc.stickiness = meta_score(ws, &meta, "resource-stickiness", options.default_resource_stickiness.get());
    rsc.priority = meta_score(ws, &meta, "priority", 0);
    rsc.migration_threshold = meta_count(ws, &meta, "migration-threshold", options.default_migration_threshold as usize) as u32;
    rsc.can_migrate = meta_flag(&meta, "allow-migrate", false);
    rsc.recovery = match meta_value(&meta, "multiple-active") {
        None | Some("stop_start") => RecoveryPolicy::StopStart,
        Some("stop_only") => RecoveryPolicy::StopOnly,
        Some("block") => RecoveryPolicy::Block,
        Some(other) => {
            ws.config_error(format!("{}: unknown multiple-active policy '{}'", rsc.id, other));
            RecoveryPolicy::StopStart
        }
    };

    rsc.target_role = match meta_value(&meta, "target-role") {
        None | Some("default") => None,
        Some(value) => match value.parse::<Role>() {
            Ok(role) => Some(role),
            Err(e) => {
                ws.config_error(format!("{}: {}", rsc.id, e));
                None
            }
        },
    };
    if options.stop_all_resources {
        rsc.target_role = Some(Role::Stopped);
    }
    if rsc.target_role == Some(Role::Stopped) {
        rsc.next_role = Role::Stopped;
    }

    if options.symmetric_cluster {
        for (idx, node) in ws.nodes.iter().enumerate() {
            rsc.allowed_nodes.insert(NodeId(idx), node.weight);
        }
    }
}

fn unpack_ops(ws: &mut WorkingSet, config: &PrimitiveConfig, rsc_id: &str) -> Vec<OpDef> {
    let mut ops = Vec::new();
    for op in &config.operations {
        let interval_ms = match parse_interval_ms(&op.interval) {
            Ok(ms) => ms,
            Err(e) => {
                ws.config_error(format!("{}: operation {}: {}", rsc_id, op.name, e));
                continue;
            }
        };
        let timeout_ms = match op.timeout.as_deref().map(parse_interval_ms) {
            None => DEFAULT_OP_TIMEOUT_MS,
            Some(Ok(ms)) => ms,
            Some(Err(e)) => {
                ws.config_error(format!("{}: operation {}: {}", rsc_id, op.name, e));
                DEFAULT_OP_TIMEOUT_MS
            }
        };
        ops.push(OpDef {
            name: op.name.clone(),
            interval_ms,
            timeout_ms,
            role: op.role,
            disabled: op.disabled,
        });
    }
    ops
}

fn instance_id(id: &str, instance: Option<usize>) -> String {
    match instance {
        Some(n) => format!("{}:{}", id, n),
        None => id.to_string(),
    }
}

fn unpack_primitive(
    ws: &mut WorkingSet,
    config: &PrimitiveConfig,
    parent: Option<RscId>,
    instance: Option<usize>,
    inherited: &AttrMap,
) -> RscId {
    let id = instance_id(&config.id, instance);
    let mut rsc = Resource::new(id.as_str(), VariantKind::Native);
    rsc.base_id = config.id.clone();
    rsc.parent = parent;
    rsc.instance = instance;
    rsc.class = config.class.clone();
    rsc.provider = config.provider.clone();
    rsc.agent = config.agent.clone();
    rsc.params = config.params.clone();
    rsc.meta = merged_meta(inherited, &config.meta);
    rsc.ops = unpack_ops(ws, config, &id);
    apply_common_meta(ws, &mut rsc);
    trace!("Unpacked primitive {}", id);
    ws.add_resource(rsc)
}

fn unpack_resource(
    ws: &mut WorkingSet,
    config: &ResourceConfig,
    parent: Option<RscId>,
    instance: Option<usize>,
    inherited: &AttrMap,
    node_count: usize,
) -> Option<RscId> {
    if instance.is_none() && ws.find_resource(config.id()).is_some() {
        ws.config_error(format!("duplicate resource id {}", config.id()));
        return None;
    }

    match config {
        ResourceConfig::Primitive(p) => Some(unpack_primitive(ws, p, parent, instance, inherited)),
        ResourceConfig::Group(g) => {
            let id = instance_id(&g.id, instance);
            let mut group = Resource::new(id.as_str(), VariantKind::Group);
            group.base_id = g.id.clone();
            group.parent = parent;
            group.instance = instance;
            group.meta = merged_meta(inherited, &g.meta);
            group.group = Some(GroupSettings {
                ordered: meta_flag(&group.meta, "ordered", true),
                colocated: meta_flag(&group.meta, "collocated", true),
            });
            apply_common_meta(ws, &mut group);

            let meta = group.meta.clone();
            let gid = ws.add_resource(group);
            for child in &g.children {
                let child = unpack_primitive(ws, child, Some(gid), instance, &meta);
                ws.rsc_mut(gid).children.push(child);
            }
            if g.children.is_empty() {
                warn!("Group {} has no members", id);
            }
            Some(gid)
        }
        ResourceConfig::Clone(c) | ResourceConfig::Master(c) => {
            if parent.is_some() {
                ws.config_error(format!("{}: clones cannot be nested", c.id));
                return None;
            }
            let kind = if matches!(config, ResourceConfig::Master(_)) {
                VariantKind::Master
            } else {
                VariantKind::Clone
            };
            let mut clone = Resource::new(c.id.as_str(), kind);
            clone.meta = merged_meta(inherited, &c.meta);
            let meta = clone.meta.clone();
            let settings = CloneSettings {
                clone_max: meta_count(ws, &meta, "clone-max", node_count),
                clone_node_max: meta_count(ws, &meta, "clone-node-max", 1),
                master_max: meta_count(ws, &meta, "master-max", 1),
                master_node_max: meta_count(ws, &meta, "master-node-max", 1),
                ordered: meta_flag(&meta, "ordered", false),
                notify: meta_flag(&meta, "notify", false),
                globally_unique: meta_flag(&meta, "globally-unique", false),
                ..Default::default()
            };
            let instances = settings.clone_max;
            clone.clone = Some(settings);
            apply_common_meta(ws, &mut clone);

            let cid = ws.add_resource(clone);
            for n in 0..instances {
                if let Some(child) = unpack_resource(ws, &c.child, Some(cid), Some(n), &meta, node_count) {
                    ws.rsc_mut(cid).children.push(child);
                }
            }
            debug!("Unpacked {} with {} instances", c.id, instances);
            Some(cid)
        }
    }
}

/// How a failed operation is handled
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum OnFail {
    Ignore,
    Recover,
    Block,
    Fence,
}

/// Placement ban caused by a hard error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HardError {
    ThisNode,
    Everywhere,
}

/// What the operation history of one resource on one node says
#[derive(Debug, Clone)]
struct Replay {
    role: Role,
    on_fail: OnFail,
    start_pending: bool,
    failed_start: bool,
    failed_stop: bool,
    force_stop: bool,
    hard_error: Option<HardError>,
    active_ops: Vec<OpHistory>,
}

/// Replay a resource's operations on one node, oldest call first
fn replay_history(ops: &[OpHistory], multi_state: bool, fencing: bool) -> Replay {
    let active_role = if multi_state { Role::Slave } else { Role::Started };
    let mut sorted: Vec<&OpHistory> = ops.iter().collect();
    sorted.sort_by_key(|op| op.call_id);

    let mut replay = Replay {
        role: Role::Unknown,
        on_fail: OnFail::Ignore,
        start_pending: false,
        failed_start: false,
        failed_stop: false,
        force_stop: false,
        hard_error: None,
        active_ops: Vec::new(),
    };

    for op in sorted {
        if op.operation == task::NOTIFY {
            continue;
        }
        let is_probe = op.operation == task::MONITOR && op.interval == 0;
        let mut operation = op.operation.as_str();
        let mut status = op.op_status;
        let mut code = op.rc_code;

        match op.target_rc {
            Some(target) if status == op_status::DONE && target != code => status = op_status::ERROR,
            _ if status == op_status::ERROR => status = op_status::DONE,
            _ => {}
        }
        if status == op_status::NOT_SUPPORTED {
            code = rc::UNIMPLEMENT_FEATURE;
        }

        match code {
            rc::NOT_RUNNING => {
                if is_probe || op.target_rc == Some(rc::NOT_RUNNING) {
                    status = op_status::DONE;
                    replay.role = Role::Stopped;
                    replay.on_fail = OnFail::Ignore;
                } else if operation != task::STOP {
                    status = op_status::ERROR;
                }
            }
            rc::RUNNING_MASTER => {
                if is_probe {
                    status = op_status::DONE;
                } else if op.target_rc.is_some_and(|t| t != code) {
                    status = op_status::ERROR;
                } else if op.target_rc.is_none()
                    && (operation != task::MONITOR || replay.role != Role::Master)
                {
                    status = op_status::ERROR;
                }
                replay.role = Role::Master;
            }
            rc::FAILED_MASTER => {
                replay.role = Role::Master;
                status = op_status::ERROR;
            }
            rc::UNIMPLEMENT_FEATURE if op.interval > 0 => status = op_status::NOT_SUPPORTED,
            rc::UNIMPLEMENT_FEATURE | rc::INSUFFICIENT_PRIV | rc::NOT_INSTALLED | rc::INVALID_PARAM | rc::NOT_CONFIGURED => {
                replay.hard_error = Some(if code == rc::NOT_CONFIGURED {
                    HardError::Everywhere
                } else {
                    HardError::ThisNode
                });
                if is_probe {
                    operation = task::STOP;
                    status = op_status::DONE;
                }
            }
            rc::OK => {}
            _ => {
                if status == op_status::DONE {
                    status = op_status::ERROR;
                }
            }
        }

        match status {
            op_status::PENDING => {
                if operation == task::START {
                    replay.start_pending = true;
                    replay.role = active_role;
                } else if operation == task::PROMOTE {
                    replay.role = Role::Master;
                }
            }
            op_status::DONE => {
                if code == rc::NOT_RUNNING {
                    // nothing to do
                } else if operation == task::STOP {
                    replay.role = Role::Stopped;
                    if replay.on_fail <= OnFail::Recover {
                        replay.on_fail = OnFail::Ignore;
                    }
                } else if operation == task::PROMOTE {
                    replay.role = Role::Master;
                } else if operation == task::DEMOTE {
                    replay.role = Role::Slave;
                } else if replay.role < Role::Started {
                    replay.role = active_role;
                }
                track_active(&mut replay.active_ops, op, operation, code);
            }
            op_status::ERROR | op_status::TIMEOUT | op_status::NOT_SUPPORTED => {
                warn!("Processing failed op {} (rc={}, status={})", op_key_of(op), code, status);
                let on_fail = if operation == task::STOP {
                    if fencing {
                        OnFail::Fence
                    } else {
                        OnFail::Block
                    }
                } else {
                    OnFail::Recover
                };
                replay.on_fail = replay.on_fail.max(on_fail);

                if operation == task::STOP {
                    replay.failed_stop = true;
                } else if operation == task::PROMOTE {
                    replay.role = Role::Master;
                } else if operation == task::DEMOTE {
                    warn!("Forcing a stop after failed demote {}", op_key_of(op));
                    replay.role = Role::Slave;
                    replay.force_stop = true;
                } else if operation == task::START {
                    replay.failed_start = true;
                }
                if replay.role < Role::Started {
                    replay.role = active_role;
                }
            }
            _ => trace!("Ignoring {} with status {}", op_key_of(op), status),
        }
    }
    replay
}

fn op_key_of(op: &OpHistory) -> String {
    op.id
        .clone()
        .unwrap_or_else(|| format!("{}_{}", op.operation, op.interval))
}

/// Keep the operations that still describe the running instance: the last
/// start and the recurring operations registered after it
fn track_active(active: &mut Vec<OpHistory>, op: &OpHistory, operation: &str, code: i32) {
    if operation == task::STOP {
        active.clear();
    } else if operation == task::START || operation == task::MIGRATE_FROM {
        active.clear();
        active.push(op.clone());
    } else if op.interval == 0 && operation == task::MONITOR && active.is_empty() {
        if code == rc::OK || code == rc::RUNNING_MASTER {
            active.push(op.clone());
        }
    } else if op.interval > 0 && !active.is_empty() {
        active.retain(|o| !(o.operation == op.operation && o.interval == op.interval));
        active.push(op.clone());
    }
}

/// Strip a trailing `:<n>` instance suffix
fn strip_instance(id: &str) -> &str {
    match id.rsplit_once(':') {
        Some((base, n)) if n.parse::<usize>().is_ok() => base,
        _ => id,
    }
}

/// Find the leaf that a history entry describes.
///
/// Anonymous clone instances are interchangeable, so an entry is matched to
/// any instance of the right base id that is not yet active elsewhere.
fn find_history_owner(ws: &WorkingSet, id: &str, node: NodeId) -> Option<RscId> {
    let exact = ws.find_resource(id).filter(|r| ws.rsc(*r).is_leaf());
    if let Some(rsc) = exact {
        let top = ws.uber_parent(rsc);
        let unique = ws
            .rsc(top)
            .clone
            .as_ref()
            .is_none_or(|c| c.globally_unique);
        if unique {
            return Some(rsc);
        }
    }

    let base = strip_instance(id);
    let candidates: Vec<RscId> = ws
        .all_leaves()
        .into_iter()
        .filter(|r| {
            let resource = ws.rsc(*r);
            resource.base_id == base && resource.instance.is_some() && !resource.orphan
        })
        .collect();

    candidates
        .iter()
        .copied()
        .find(|r| ws.rsc(*r).known_on.contains(&node) && ws.rsc(*r).running_on.is_empty())
        .or_else(|| exact.filter(|r| ws.rsc(*r).running_on.is_empty()))
        .or_else(|| candidates.iter().copied().find(|r| ws.rsc(*r).running_on.is_empty() && ws.rsc(*r).known_on.is_empty()))
        .or_else(|| candidates.iter().copied().find(|r| ws.rsc(*r).running_on.is_empty()))
}

/// A resource found in the history but not in the configuration
fn create_orphan(ws: &mut WorkingSet, history: &ResourceHistory) -> RscId {
    warn!("Nothing known about resource {} found in the history", history.id);
    let mut rsc = Resource::new(history.id.as_str(), VariantKind::Native);
    rsc.class = history.class.clone();
    rsc.provider = history.provider.clone();
    rsc.agent = history.agent.clone();
    rsc.orphan = true;
    rsc.managed = ws.options.stop_orphan_resources && !ws.options.maintenance_mode;
    for (idx, node) in ws.nodes.iter().enumerate() {
        rsc.allowed_nodes.insert(NodeId(idx), node.weight);
    }
    let id = ws.add_resource(rsc);
    ws.top.push(id);
    if ws.rsc(id).managed {
        info!("Making sure orphan {} is stopped", history.id);
        ws.rsc_mut(id).next_role = Role::Stopped;
        ws.resource_location(id, None, -INFINITY, "__orphan_dont_run__");
    }
    id
}

fn unpack_status(ws: &mut WorkingSet, doc: &ClusterDocument) {
    let fencing = ws.options.stonith_enabled;

    // Replay everything first, then hand out anonymous instances with the
    // active ones first so that a stopped entry never takes the instance
    // number of a running one
    let mut replays = Vec::new();
    for state in &doc.status {
        let Some(node) = ws.find_node(&state.id) else {
            continue;
        };
        for history in &state.resources {
            if history.ops.is_empty() {
                continue;
            }
            let multi_state = ws
                .find_resource(strip_instance(&history.id))
                .or_else(|| ws.find_resource(&history.id))
                .map(|r| ws.rsc(ws.uber_parent(r)).kind == VariantKind::Master)
                .unwrap_or_else(|| {
                    ws.all_leaves().into_iter().any(|r| {
                        ws.rsc(r).base_id == strip_instance(&history.id)
                            && ws.rsc(ws.uber_parent(r)).kind == VariantKind::Master
                    })
                });
            let replay = replay_history(&history.ops, multi_state, fencing);
            replays.push((node, history, replay));
        }
    }
    replays.sort_by(|(_, _, a), (_, _, b)| {
        let active = |r: &Replay| r.role > Role::Stopped;
        match (active(a), active(b)) {
            (true, false) => Ordering::Less,
            (false, true) => Ordering::Greater,
            _ => Ordering::Equal,
        }
    });

    for (node, history, replay) in replays {
        let rsc = match find_history_owner(ws, &history.id, node) {
            Some(rsc) => rsc,
            None => create_orphan(ws, history),
        };
        if ws.rsc(rsc).id != history.id {
            debug!("Internally renamed {} on {} to {}", history.id, ws.uname(node), ws.rsc(rsc).id);
        }
        apply_replay(ws, rsc, node, history, replay);
    }

    for idx in 0..ws.nodes.len() {
        let node = NodeId(idx);
        let counts: Vec<(String, u32)> = ws
            .node(node)
            .attrs
            .iter()
            .filter_map(|(k, v)| {
                let id = k.strip_prefix(FAIL_COUNT_PREFIX)?;
                let count = parse_score(v).ok()?.max(0) as u32;
                Some((id.to_string(), count))
            })
            .collect();
        for (id, count) in counts {
            let owners: Vec<RscId> = ws
                .all_leaves()
                .into_iter()
                .filter(|r| ws.rsc(*r).id == id || (ws.rsc(*r).base_id == id && ws.rsc(*r).known_on.contains(&node)))
                .collect();
            for rsc in owners {
                let entry = ws.rsc_mut(rsc).fail_count.entry(node).or_insert(0);
                *entry = (*entry).max(count);
            }
        }
    }
}

fn apply_replay(ws: &mut WorkingSet, rsc: RscId, node: NodeId, history: &ResourceHistory, replay: Replay) {
    let mut on_fail = replay.on_fail;
    if ws.node(node).unclean {
        on_fail = OnFail::Ignore;
    }

    {
        let resource = ws.rsc_mut(rsc);
        resource.add_known_on(node);
        resource.history.push(NodeHistory {
            node: Some(node),
            class: history.class.clone(),
            provider: history.provider.clone(),
            agent: history.agent.clone(),
            active_ops: replay.active_ops,
        });
        resource.start_pending |= replay.start_pending;
        if replay.force_stop {
            resource.next_role = Role::Stopped;
        }
    }

    if let Some(scope) = replay.hard_error {
        let top = ws.uber_parent(rsc);
        let target = if ws.rsc(top).kind.is_clone_like()
            && !ws.rsc(top).clone.as_ref().is_some_and(|c| c.globally_unique)
        {
            top
        } else {
            rsc
        };
        let scope = match scope {
            HardError::ThisNode => Some(node),
            HardError::Everywhere => None,
        };
        warn!("Hard error: preventing {} from starting {}", ws.rsc(target).id, match scope {
            Some(n) => format!("on {}", ws.uname(n)),
            None => "anywhere".to_string(),
        });
        ws.resource_location(target, scope, -INFINITY, "hard-error");
    }
    if replay.failed_stop {
        ws.resource_location(rsc, Some(node), -INFINITY, "__stop_fail__");
    }
    if replay.failed_start && ws.options.start_failure_is_fatal {
        ws.rsc_mut(rsc).fail_count.insert(node, FAIL_COUNT_INFINITY);
    }

    match on_fail {
        OnFail::Ignore | OnFail::Recover => {}
        OnFail::Fence => {
            warn!("Node {} will be fenced because of a failed stop of {}", ws.uname(node), ws.rsc(rsc).id);
            ws.node_mut(node).unclean = true;
        }
        OnFail::Block => {
            warn!("Blocking {}: its stop failed and fencing is disabled", ws.rsc(rsc).id);
            ws.rsc_mut(rsc).managed = false;
        }
    }

    if replay.role > Role::Stopped {
        let resource = ws.rsc_mut(rsc);
        resource.add_running_on(node);
        if replay.role > resource.role || resource.role == Role::Stopped {
            resource.role = replay.role;
        }
        if on_fail != OnFail::Ignore {
            resource.failed = true;
        }
        if !ws.node(node).running.contains(&rsc) {
            ws.node_mut(node).running.push(rsc);
        }
        debug!("{} is {} on {}", ws.rsc(rsc).id, replay.role, ws.uname(node));
    }
}

fn unpack_location(ws: &mut WorkingSet, config: &LocationConfig) {
    let Some(rsc) = ws.find_resource(&config.rsc) else {
        ws.config_error(format!("{}: no resource named {}", config.id, config.rsc));
        return;
    };

    let mut resolved = Vec::new();
    if let Some(node_name) = &config.node {
        let Some(node) = ws.find_node(node_name) else {
            ws.config_error(format!("{}: no node named {}", config.id, node_name));
            return;
        };
        let score = config.score.map(|s| s.get()).unwrap_or(0);
        resolved.push((config.id.clone(), config.role, vec![(node, score)]));
    }
    for (idx, rule) in config.rules.iter().enumerate() {
        let id = rule
            .id
            .clone()
            .unwrap_or_else(|| format!("{}-rule-{}", config.id, idx));
        resolved.push((id, rule.role.or(config.role), resolve_rule(rule, &ws.nodes)));
    }
    if resolved.is_empty() {
        ws.config_error(format!("{}: neither a node nor rules given", config.id));
        return;
    }

    for (id, role_filter, nodes) in resolved {
        debug!("Location {} for {} covers {} node(s)", id, config.rsc, nodes.len());
        let loc = LocationConstraint {
            id,
            rsc,
            role_filter,
            nodes,
        };
        ws.rsc_mut(rsc).rsc_location.push(loc.clone());
        ws.locations.push(loc);
    }
}

fn unpack_colocation(ws: &mut WorkingSet, config: &ColocationConfig) {
    let (Some(lh), Some(rh)) = (ws.find_resource(&config.rsc), ws.find_resource(&config.with_rsc)) else {
        ws.config_error(format!(
            "{}: unknown resource {} or {}",
            config.id, config.rsc, config.with_rsc
        ));
        return;
    };
    if config.score.get() == 0 {
        debug!("Ignoring colocation {} with score 0", config.id);
        return;
    }

    let mut con = ColocationConstraint::new(config.id.as_str(), lh, rh, config.score.get());
    con.role_lh = config.rsc_role.unwrap_or(Role::Unknown);
    con.role_rh = config.with_rsc_role.unwrap_or(Role::Unknown);
    if let Some(attribute) = &config.node_attribute {
        con.node_attribute = attribute.clone();
    }
    ws.rsc_mut(lh).rsc_cons.push(con.clone());
    ws.rsc_mut(rh).rsc_cons_lhs.push(con.clone());
    ws.colocations.push(con);
}

fn unpack_ordering(ws: &mut WorkingSet, config: &OrderingConfig) {
    let (Some(first), Some(then)) = (ws.find_resource(&config.first), ws.find_resource(&config.then)) else {
        ws.config_error(format!(
            "{}: unknown resource {} or {}",
            config.id, config.first, config.then
        ));
        return;
    };

    let first_action = config.first_action.clone().unwrap_or_else(|| task::START.to_string());
    let then_action = config.then_action.clone().unwrap_or_else(|| first_action.clone());
    let mandatory = config.score.map(|s| s.get() > 0).unwrap_or(true);
    let kind = if mandatory {
        OrderType::MANDATORY
    } else {
        OrderType::OPTIONAL
    };
    debug!(
        "{}: {} {} then {} {} ({})",
        config.id, config.first, first_action, config.then, then_action, kind
    );
    ws.new_rsc_order(first, &first_action, then, &then_action, kind);

    if !config.symmetrical.unwrap_or(true) {
        return;
    }
    let (Some(inverse_first), Some(inverse_then)) = (invert_action(&then_action), invert_action(&first_action)) else {
        ws.config_error(format!(
            "cannot invert ordering {}: specify the inverse manually",
            config.id
        ));
        return;
    };
    let kind = if mandatory {
        OrderType::IMPLIES_LEFT
    } else {
        OrderType::OPTIONAL
    };
    ws.new_rsc_order(then, inverse_first, first, inverse_then, kind);
}
