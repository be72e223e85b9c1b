use crate::types::{NodeId, RscId};
use warden_core::types::NodeType;
use warden_core::AttrMap;

/// Node attribute holding the node id, used by colocation `node-attribute`
pub const ATTR_ID: &str = "#id";
/// Node attribute holding the node name
pub const ATTR_UNAME: &str = "#uname";
/// Prefix of node attributes that carry health colors or scores
pub const ATTR_HEALTH_PREFIX: &str = "#health";

/// A cluster node as seen by one scheduling run
#[derive(Debug, Clone)]
pub struct Node {
    pub id: String,
    pub uname: String,
    pub node_type: NodeType,
    pub online: bool,
    pub unclean: bool,
    pub shutdown: bool,
    pub pending: bool,
    pub standby: bool,
    pub expected_up: bool,
    pub is_dc: bool,
    /// Base weight copied into every resource's candidate map
    pub weight: i32,
    pub attrs: AttrMap,
    /// Resources believed active here (non-owning)
    pub running: Vec<RscId>,
    /// Resources placed here during this run
    pub allocated: Vec<RscId>,
}

impl Node {
    pub fn new(id: impl Into<String>, uname: impl Into<String>, node_type: NodeType) -> Self {
        let id = id.into();
        let uname = uname.into();
        let mut attrs = AttrMap::new();
        attrs.insert(ATTR_ID.to_string(), id.clone());
        attrs.insert(ATTR_UNAME.to_string(), uname.clone());
        Self {
            id,
            uname,
            node_type,
            online: false,
            unclean: false,
            shutdown: false,
            pending: false,
            standby: false,
            expected_up: false,
            is_dc: false,
            weight: 0,
            attrs,
            running: Vec::new(),
            allocated: Vec::new(),
        }
    }

    /// Whether new resources may be placed here
    pub fn can_run_resources(&self) -> bool {
        self.online
            && !self.shutdown
            && !self.unclean
            && !self.standby
            && !self.pending
            && self.node_type == NodeType::Member
    }

    /// Look up a node attribute
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs.get(name).map(String::as_str)
    }
}

/// Lookup helper used by tests and unpacking
pub fn find_node<'a>(nodes: &'a [Node], name: &str) -> Option<(NodeId, &'a Node)> {
    nodes
        .iter()
        .enumerate()
        .find(|(_, n)| n.id == name || n.uname == name)
        .map(|(idx, n)| (NodeId(idx), n))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_node(id: &str) -> Node {
        let mut node = Node::new(id, format!("{}.local", id), NodeType::Member);
        node.online = true;
        node
    }

    #[test]
    fn test_can_run_resources() {
        let mut node = create_test_node("n1");
        assert!(node.can_run_resources());

        node.standby = true;
        assert!(!node.can_run_resources());

        let mut node = create_test_node("n2");
        node.unclean = true;
        assert!(!node.can_run_resources());

        let mut ping = Node::new("p1", "p1", NodeType::Ping);
        ping.online = true;
        assert!(!ping.can_run_resources());
    }

    #[test]
    fn test_builtin_attributes() {
        let node = create_test_node("n1");
        assert_eq!(node.attr(ATTR_ID), Some("n1"));
        assert_eq!(node.attr(ATTR_UNAME), Some("n1.local"));
        assert_eq!(node.attr("rack"), None);
    }

    #[test]
    fn test_find_node_by_id_or_uname() {
        let nodes = vec![create_test_node("n1"), create_test_node("n2")];
        assert_eq!(find_node(&nodes, "n2").map(|(id, _)| id), Some(NodeId(1)));
        assert_eq!(
            find_node(&nodes, "n1.local").map(|(id, _)| id),
            Some(NodeId(0))
        );
        assert!(find_node(&nodes, "n3").is_none());
    }
}
