//! The declarative cluster document.
//!
//! One `ClusterDocument` carries everything a scheduling run needs: cluster
//! options, node definitions, resource definitions, constraints and the
//! last-known runtime state reported by every node. It is read from JSON or
//! YAML and never mutated by the policy engine.

use crate::score::{parse_score, score_to_string, INFINITY};
use crate::types::{NoQuorumPolicy, NodeHealthStrategy, NodeType, Role};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;

/// String key/value pairs (parameters, meta attributes, node attributes)
pub type AttrMap = BTreeMap<String, String>;

/// Top-level input of one scheduling run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ClusterDocument {
    pub options: ClusterOptions,
    pub have_quorum: bool,
    pub dc_uuid: Option<String>,
    pub nodes: Vec<NodeConfig>,
    pub resources: Vec<ResourceConfig>,
    pub constraints: Constraints,
    pub status: Vec<NodeState>,
}

impl Default for ClusterDocument {
    fn default() -> Self {
        Self {
            options: ClusterOptions::default(),
            have_quorum: true,
            dc_uuid: None,
            nodes: Vec::new(),
            resources: Vec::new(),
            constraints: Constraints::default(),
            status: Vec::new(),
        }
    }
}

/// Cluster-wide options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ClusterOptions {
    pub stonith_enabled: bool,
    pub stonith_action: String,
    pub startup_fencing: bool,
    pub symmetric_cluster: bool,
    pub no_quorum_policy: NoQuorumPolicy,
    pub default_resource_stickiness: ScoreValue,
    pub default_migration_threshold: u32,
    pub is_managed_default: bool,
    #[serde(deserialize_with = "de_string")]
    pub cluster_delay: String,
    #[serde(deserialize_with = "de_string")]
    pub stonith_timeout: String,
    pub batch_limit: u32,
    pub start_failure_is_fatal: bool,
    pub stop_all_resources: bool,
    pub stop_orphan_resources: bool,
    pub stop_orphan_actions: bool,
    pub remove_after_stop: bool,
    pub maintenance_mode: bool,
    pub node_health_strategy: NodeHealthStrategy,
    pub node_health_red: ScoreValue,
    pub node_health_yellow: ScoreValue,
    pub node_health_green: ScoreValue,
}

impl Default for ClusterOptions {
    fn default() -> Self {
        Self {
            stonith_enabled: true,
            stonith_action: "reboot".to_string(),
            startup_fencing: true,
            symmetric_cluster: true,
            no_quorum_policy: NoQuorumPolicy::Stop,
            default_resource_stickiness: ScoreValue(0),
            default_migration_threshold: 0,
            is_managed_default: true,
            cluster_delay: "60s".to_string(),
            stonith_timeout: "60s".to_string(),
            batch_limit: 30,
            start_failure_is_fatal: true,
            stop_all_resources: false,
            stop_orphan_resources: true,
            stop_orphan_actions: true,
            remove_after_stop: false,
            maintenance_mode: false,
            node_health_strategy: NodeHealthStrategy::None,
            node_health_red: ScoreValue(-INFINITY),
            node_health_yellow: ScoreValue(0),
            node_health_green: ScoreValue(0),
        }
    }
}

/// A score written either as a number or as `INFINITY`/`-INFINITY`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScoreValue(pub i32);

impl ScoreValue {
    pub fn get(self) -> i32 {
        self.0
    }
}

impl Serialize for ScoreValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        if self.0.abs() >= INFINITY {
            serializer.serialize_str(&score_to_string(self.0))
        } else {
            serializer.serialize_i32(self.0)
        }
    }
}

impl<'de> Deserialize<'de> for ScoreValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = Scalar::deserialize(deserializer)?;
        parse_score(&raw.into_string())
            .map(ScoreValue)
            .map_err(D::Error::custom)
    }
}

/// Any scalar a YAML or JSON author might write where a string is meant
#[derive(Deserialize)]
#[serde(untagged)]
enum Scalar {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl Scalar {
    fn into_string(self) -> String {
        match self {
            Scalar::Bool(b) => b.to_string(),
            Scalar::Int(i) => i.to_string(),
            Scalar::Float(f) => f.to_string(),
            Scalar::Text(s) => s,
        }
    }
}

fn de_string<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<String, D::Error> {
    Scalar::deserialize(deserializer).map(Scalar::into_string)
}

fn de_opt_string<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<Option<String>, D::Error> {
    Ok(Option::<Scalar>::deserialize(deserializer)?.map(Scalar::into_string))
}

fn de_attr_map<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<AttrMap, D::Error> {
    let raw = BTreeMap::<String, Scalar>::deserialize(deserializer)?;
    Ok(raw.into_iter().map(|(k, v)| (k, v.into_string())).collect())
}

/// A configured cluster node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeConfig {
    pub id: String,
    #[serde(default)]
    pub uname: Option<String>,
    #[serde(rename = "type", default)]
    pub node_type: NodeType,
    #[serde(default, deserialize_with = "de_attr_map")]
    pub attributes: AttrMap,
}

impl NodeConfig {
    /// Human name, falling back to the id
    pub fn uname(&self) -> &str {
        self.uname.as_deref().unwrap_or(&self.id)
    }
}

/// A configured resource, tagged by variant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ResourceConfig {
    Primitive(PrimitiveConfig),
    Group(GroupConfig),
    Clone(CloneConfig),
    Master(CloneConfig),
}

impl ResourceConfig {
    pub fn id(&self) -> &str {
        match self {
            ResourceConfig::Primitive(p) => &p.id,
            ResourceConfig::Group(g) => &g.id,
            ResourceConfig::Clone(c) | ResourceConfig::Master(c) => &c.id,
        }
    }
}

/// A leaf resource backed by one agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrimitiveConfig {
    pub id: String,
    #[serde(default = "default_class")]
    pub class: String,
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(rename = "type")]
    pub agent: String,
    #[serde(default, deserialize_with = "de_attr_map")]
    pub params: AttrMap,
    #[serde(default, deserialize_with = "de_attr_map")]
    pub meta: AttrMap,
    #[serde(default)]
    pub operations: Vec<OperationConfig>,
}

fn default_class() -> String {
    "ocf".to_string()
}

/// An ordered set of primitives started and stopped together
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupConfig {
    pub id: String,
    #[serde(default, deserialize_with = "de_attr_map")]
    pub meta: AttrMap,
    pub children: Vec<PrimitiveConfig>,
}

/// A clone or master wrapper around a primitive or group
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloneConfig {
    pub id: String,
    #[serde(default, deserialize_with = "de_attr_map")]
    pub meta: AttrMap,
    pub child: Box<ResourceConfig>,
}

/// A configured operation (monitor, start, stop, ...)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationConfig {
    pub name: String,
    #[serde(default = "default_interval", deserialize_with = "de_string")]
    pub interval: String,
    #[serde(default, deserialize_with = "de_opt_string")]
    pub timeout: Option<String>,
    #[serde(default)]
    pub role: Option<Role>,
    #[serde(default)]
    pub disabled: bool,
}

fn default_interval() -> String {
    "0".to_string()
}

/// All constraints of the document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Constraints {
    pub locations: Vec<LocationConfig>,
    pub colocations: Vec<ColocationConfig>,
    pub orderings: Vec<OrderingConfig>,
}

/// Location preference: either a plain `node`/`score` pair or a list of rules
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct LocationConfig {
    pub id: String,
    pub rsc: String,
    #[serde(default)]
    pub node: Option<String>,
    #[serde(default)]
    pub score: Option<ScoreValue>,
    #[serde(default)]
    pub role: Option<Role>,
    #[serde(default)]
    pub rules: Vec<RuleConfig>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BooleanOp {
    #[default]
    And,
    Or,
}

/// A location rule evaluated against node attributes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RuleConfig {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub score: Option<ScoreValue>,
    #[serde(default)]
    pub score_attribute: Option<String>,
    #[serde(default)]
    pub boolean_op: BooleanOp,
    #[serde(default)]
    pub role: Option<Role>,
    #[serde(default)]
    pub expressions: Vec<ExpressionConfig>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpressionOp {
    Lt,
    Gt,
    Lte,
    Gte,
    Eq,
    Ne,
    Defined,
    NotDefined,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    #[default]
    String,
    Number,
    Version,
}

/// One attribute comparison inside a rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpressionConfig {
    pub attribute: String,
    pub operation: ExpressionOp,
    #[serde(default, deserialize_with = "de_opt_string")]
    pub value: Option<String>,
    #[serde(rename = "type", default)]
    pub value_type: ValueType,
}

/// `rsc` should (or must not) run where `with-rsc` runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ColocationConfig {
    pub id: String,
    pub rsc: String,
    pub with_rsc: String,
    pub score: ScoreValue,
    #[serde(default)]
    pub rsc_role: Option<Role>,
    #[serde(default)]
    pub with_rsc_role: Option<Role>,
    #[serde(default)]
    pub node_attribute: Option<String>,
}

/// `then` runs its action after `first` ran its action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct OrderingConfig {
    pub id: String,
    pub first: String,
    #[serde(default)]
    pub first_action: Option<String>,
    pub then: String,
    #[serde(default)]
    pub then_action: Option<String>,
    #[serde(default)]
    pub score: Option<ScoreValue>,
    #[serde(default)]
    pub symmetrical: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CrmdState {
    #[default]
    Online,
    Offline,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JoinState {
    #[default]
    Member,
    Pending,
    Down,
    Banned,
}

/// Runtime state reported for one node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeState {
    pub id: String,
    pub uname: Option<String>,
    pub in_ccm: bool,
    pub crmd: CrmdState,
    pub join: JoinState,
    pub expected: Option<JoinState>,
    pub shutdown: bool,
    pub unclean: bool,
    #[serde(deserialize_with = "de_attr_map")]
    pub transient_attributes: AttrMap,
    pub resources: Vec<ResourceHistory>,
}

impl Default for NodeState {
    fn default() -> Self {
        Self {
            id: String::new(),
            uname: None,
            in_ccm: true,
            crmd: CrmdState::Online,
            join: JoinState::Member,
            expected: Some(JoinState::Member),
            shutdown: false,
            unclean: false,
            transient_attributes: AttrMap::new(),
            resources: Vec::new(),
        }
    }
}

/// Operation history of one resource on one node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceHistory {
    pub id: String,
    #[serde(default = "default_class")]
    pub class: String,
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(rename = "type", default)]
    pub agent: String,
    #[serde(default)]
    pub ops: Vec<OpHistory>,
}

/// One recorded operation result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpHistory {
    #[serde(default)]
    pub id: Option<String>,
    pub operation: String,
    /// Interval in milliseconds
    #[serde(default)]
    pub interval: u64,
    pub call_id: i64,
    #[serde(default)]
    pub rc_code: i32,
    #[serde(default)]
    pub op_status: i32,
    #[serde(default)]
    pub target_rc: Option<i32>,
    #[serde(default)]
    pub op_digest: Option<String>,
    #[serde(default)]
    pub op_restart_digest: Option<String>,
    /// Parameters whose change requires a restart rather than a reload
    #[serde(default)]
    pub op_force_restart: Vec<String>,
}
