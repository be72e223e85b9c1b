use crate::node::ATTR_ID;
use crate::types::{ActionId, NodeId, OrderType, RscId};
use warden_core::{op_key, task, Role};

/// Resolved location preference
#[derive(Debug, Clone, PartialEq)]
pub struct LocationConstraint {
    pub id: String,
    pub rsc: RscId,
    /// Only applies while the resource holds this role
    pub role_filter: Option<Role>,
    pub nodes: Vec<(NodeId, i32)>,
}

/// `rsc_lh` should (or must not) run where `rsc_rh` runs
#[derive(Debug, Clone, PartialEq)]
pub struct ColocationConstraint {
    pub id: String,
    pub rsc_lh: RscId,
    pub rsc_rh: RscId,
    pub score: i32,
    /// `Role::Unknown` matches any role
    pub role_lh: Role,
    pub role_rh: Role,
    pub node_attribute: String,
}

impl ColocationConstraint {
    pub fn new(id: impl Into<String>, rsc_lh: RscId, rsc_rh: RscId, score: i32) -> Self {
        Self {
            id: id.into(),
            rsc_lh,
            rsc_rh,
            score,
            role_lh: Role::Unknown,
            role_rh: Role::Unknown,
            node_attribute: ATTR_ID.to_string(),
        }
    }
}

/// An ordering between two actions.
///
/// Each side names either a resource plus an operation key, resolved into
/// concrete actions late in the run, or an action that already exists.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderConstraint {
    pub id: usize,
    pub kind: OrderType,
    pub lh_rsc: Option<RscId>,
    pub lh_key: Option<String>,
    pub lh_action: Option<ActionId>,
    pub rh_rsc: Option<RscId>,
    pub rh_key: Option<String>,
    pub rh_action: Option<ActionId>,
}

/// The action a symmetrical ordering uses for the way back
pub fn invert_action(action: &str) -> Option<&'static str> {
    match action {
        task::START => Some(task::STOP),
        task::STOP => Some(task::START),
        task::PROMOTE => Some(task::DEMOTE),
        task::DEMOTE => Some(task::PROMOTE),
        task::STARTED => Some(task::STOPPED),
        task::STOPPED => Some(task::STARTED),
        task::PROMOTED => Some(task::DEMOTED),
        task::DEMOTED => Some(task::PROMOTED),
        _ => None,
    }
}

/// Key of a one-shot resource action
pub fn rsc_key(rsc_id: &str, task: &str) -> String {
    op_key(rsc_id, task, 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invert_action() {
        assert_eq!(invert_action("start"), Some("stop"));
        assert_eq!(invert_action("demote"), Some("promote"));
        assert_eq!(invert_action("running"), Some("stopped"));
        assert_eq!(invert_action("monitor"), None);
    }

    #[test]
    fn test_colocation_defaults() {
        let con = ColocationConstraint::new("c1", RscId(0), RscId(1), 100);
        assert_eq!(con.node_attribute, "#id");
        assert_eq!(con.role_lh, Role::Unknown);
        assert_eq!(rsc_key("db", "start"), "db_start_0");
    }
}
