use crate::constraints::{ColocationConstraint, LocationConstraint};
use crate::notify::NotifyBoundary;
use crate::types::{ActionId, NodeId, RscId, VariantKind};
use std::collections::BTreeMap;
use warden_core::cib::OpHistory;
use warden_core::types::RecoveryPolicy;
use warden_core::{op_key, task, AttrMap, Role};

/// Default operation timeout when none is configured
pub const DEFAULT_OP_TIMEOUT_MS: u64 = 20_000;

/// A configured operation
#[derive(Debug, Clone, PartialEq)]
pub struct OpDef {
    pub name: String,
    pub interval_ms: u64,
    pub timeout_ms: u64,
    pub role: Option<Role>,
    pub disabled: bool,
}

impl OpDef {
    pub fn key(&self, rsc_id: &str) -> String {
        op_key(rsc_id, &self.name, self.interval_ms)
    }

    pub fn is_recurring(&self) -> bool {
        self.interval_ms > 0
    }
}

/// What the runtime state says about a resource on one node
#[derive(Debug, Clone, Default)]
pub struct NodeHistory {
    pub node: Option<NodeId>,
    pub class: String,
    pub provider: Option<String>,
    pub agent: String,
    /// Last result per operation key since the most recent start
    pub active_ops: Vec<OpHistory>,
}

impl NodeHistory {
    /// Most recent successful start (or migrate_from) since the resource came up
    pub fn last_start(&self) -> Option<&OpHistory> {
        self.active_ops.iter().rev().find(|op| {
            op.interval == 0 && (op.operation == "start" || op.operation == "migrate_from")
        })
    }

    /// Recurring operations still registered with the executor
    pub fn recurring(&self) -> impl Iterator<Item = &OpHistory> {
        self.active_ops.iter().filter(|op| op.interval > 0)
    }
}

/// Clone and master settings
#[derive(Debug, Clone, Default)]
pub struct CloneSettings {
    pub clone_max: usize,
    pub clone_node_max: usize,
    pub master_max: usize,
    pub master_node_max: usize,
    pub ordered: bool,
    pub notify: bool,
    pub globally_unique: bool,
    pub masters_allocated: usize,
    pub start_notify: Option<NotifyBoundary>,
    pub stop_notify: Option<NotifyBoundary>,
    pub promote_notify: Option<NotifyBoundary>,
    pub demote_notify: Option<NotifyBoundary>,
}

impl CloneSettings {
    /// Notification boundary around one of the container's actions
    pub fn boundary(&self, action: &str) -> Option<&NotifyBoundary> {
        match action {
            task::START => self.start_notify.as_ref(),
            task::STOP => self.stop_notify.as_ref(),
            task::PROMOTE => self.promote_notify.as_ref(),
            task::DEMOTE => self.demote_notify.as_ref(),
            _ => None,
        }
    }
}

/// Group settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupSettings {
    pub ordered: bool,
    pub colocated: bool,
}

impl Default for GroupSettings {
    fn default() -> Self {
        Self {
            ordered: true,
            colocated: true,
        }
    }
}

/// A resource of any variant
#[derive(Debug, Clone)]
pub struct Resource {
    /// Unique id, including the `:<n>` suffix for clone instances
    pub id: String,
    /// Configured id, without any instance suffix
    pub base_id: String,
    pub kind: VariantKind,
    pub parent: Option<RscId>,
    pub children: Vec<RscId>,
    pub instance: Option<usize>,

    pub class: String,
    pub provider: Option<String>,
    pub agent: String,
    pub params: AttrMap,
    pub meta: AttrMap,
    pub ops: Vec<OpDef>,

    pub role: Role,
    pub next_role: Role,
    pub target_role: Option<Role>,
    pub running_on: Vec<NodeId>,
    /// Nodes whose runtime state mentions this resource at all
    pub known_on: Vec<NodeId>,
    pub allowed_nodes: BTreeMap<NodeId, i32>,
    pub allocated_to: Option<NodeId>,

    /// Colocations where this resource is the dependent
    pub rsc_cons: Vec<ColocationConstraint>,
    /// Colocations where this resource is the target
    pub rsc_cons_lhs: Vec<ColocationConstraint>,
    pub rsc_location: Vec<LocationConstraint>,
    pub actions: Vec<ActionId>,

    pub managed: bool,
    pub orphan: bool,
    pub failed: bool,
    pub provisional: bool,
    pub allocating: bool,
    pub start_pending: bool,
    pub can_migrate: bool,

    pub stickiness: i32,
    pub migration_threshold: u32,
    pub priority: i32,
    pub recovery: RecoveryPolicy,
    pub fail_count: BTreeMap<NodeId, u32>,
    pub history: Vec<NodeHistory>,

    pub clone: Option<CloneSettings>,
    pub group: Option<GroupSettings>,
}

impl Resource {
    pub fn new(id: impl Into<String>, kind: VariantKind) -> Self {
        let id = id.into();
        Self {
            base_id: id.clone(),
            id,
            kind,
            parent: None,
            children: Vec::new(),
            instance: None,
            class: String::new(),
            provider: None,
            agent: String::new(),
            params: AttrMap::new(),
            meta: AttrMap::new(),
            ops: Vec::new(),
            role: Role::Stopped,
            next_role: Role::Unknown,
            target_role: None,
            running_on: Vec::new(),
            known_on: Vec::new(),
            allowed_nodes: BTreeMap::new(),
            allocated_to: None,
            rsc_cons: Vec::new(),
            rsc_cons_lhs: Vec::new(),
            rsc_location: Vec::new(),
            actions: Vec::new(),
            managed: true,
            orphan: false,
            failed: false,
            provisional: true,
            allocating: false,
            start_pending: false,
            can_migrate: false,
            stickiness: 0,
            migration_threshold: 0,
            priority: 0,
            recovery: RecoveryPolicy::StopStart,
            fail_count: BTreeMap::new(),
            history: Vec::new(),
            clone: None,
            group: None,
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.kind == VariantKind::Native
    }

    pub fn is_stonith(&self) -> bool {
        self.class == "stonith"
    }

    /// Weight of `node` in the candidate map; absent nodes are not allowed
    pub fn weight_on(&self, node: NodeId) -> Option<i32> {
        self.allowed_nodes.get(&node).copied()
    }

    pub fn history_on(&self, node: NodeId) -> Option<&NodeHistory> {
        self.history.iter().find(|h| h.node == Some(node))
    }

    /// Whether the executor on `node` already runs the recurring op `key`
    pub fn has_active_op(&self, node: NodeId, key: &str) -> bool {
        self.history_on(node)
            .map(|h| {
                h.recurring()
                    .any(|op| op_key(&self.id, &op.operation, op.interval) == key)
            })
            .unwrap_or(false)
    }

    /// Configured operation matching a name and interval
    pub fn find_op(&self, name: &str, interval_ms: u64) -> Option<&OpDef> {
        self.ops
            .iter()
            .find(|op| op.name == name && op.interval_ms == interval_ms)
    }

    /// Timeout for a task, from its interval-zero definition if there is one
    pub fn op_timeout(&self, name: &str, interval_ms: u64) -> u64 {
        self.find_op(name, interval_ms)
            .map(|op| op.timeout_ms)
            .unwrap_or(DEFAULT_OP_TIMEOUT_MS)
    }

    pub fn add_running_on(&mut self, node: NodeId) {
        if !self.running_on.contains(&node) {
            self.running_on.push(node);
        }
    }

    pub fn add_known_on(&mut self, node: NodeId) {
        if !self.known_on.contains(&node) {
            self.known_on.push(node);
        }
    }

    /// Read a boolean meta attribute
    pub fn meta_bool(&self, key: &str, default: bool) -> bool {
        match self.meta.get(key).map(|v| v.to_ascii_lowercase()) {
            Some(v) => matches!(v.as_str(), "true" | "yes" | "on" | "1"),
            None => default,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn history_with(ops: &[(&str, u64)]) -> NodeHistory {
        NodeHistory {
            node: Some(NodeId(0)),
            class: "ocf".to_string(),
            provider: None,
            agent: "Dummy".to_string(),
            active_ops: ops
                .iter()
                .enumerate()
                .map(|(i, (name, interval))| OpHistory {
                    id: None,
                    operation: name.to_string(),
                    interval: *interval,
                    call_id: i as i64,
                    rc_code: 0,
                    op_status: 0,
                    target_rc: None,
                    op_digest: None,
                    op_restart_digest: None,
                    op_force_restart: Vec::new(),
                })
                .collect(),
        }
    }

    #[test]
    fn test_active_op_lookup() {
        let mut rsc = Resource::new("db", VariantKind::Native);
        rsc.history
            .push(history_with(&[("start", 0), ("monitor", 10_000)]));

        assert!(rsc.has_active_op(NodeId(0), "db_monitor_10000"));
        assert!(!rsc.has_active_op(NodeId(0), "db_monitor_20000"));
        assert!(!rsc.has_active_op(NodeId(1), "db_monitor_10000"));
        assert_eq!(
            rsc.history_on(NodeId(0))
                .and_then(|h| h.last_start())
                .map(|op| op.call_id),
            Some(0)
        );
    }

    #[test]
    fn test_meta_bool_and_timeouts() {
        let mut rsc = Resource::new("ip", VariantKind::Native);
        rsc.meta.insert("allow-migrate".to_string(), "Yes".to_string());
        rsc.ops.push(OpDef {
            name: "start".to_string(),
            interval_ms: 0,
            timeout_ms: 90_000,
            role: None,
            disabled: false,
        });

        assert!(rsc.meta_bool("allow-migrate", false));
        assert!(rsc.meta_bool("notify", true));
        assert_eq!(rsc.op_timeout("start", 0), 90_000);
        assert_eq!(rsc.op_timeout("stop", 0), DEFAULT_OP_TIMEOUT_MS);
    }
}
