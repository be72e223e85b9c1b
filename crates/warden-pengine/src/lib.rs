//! Warden Policy Engine - Cluster resource placement and action scheduling
//!
//! This crate provides:
//! - Unpacking of the cluster document into a working set
//! - Location rules, node health and stickiness scoring
//! - Per-variant (primitive, group, clone, master) placement and actions
//! - Probes, fencing, shutdown and clone notifications
//! - Ordering resolution and propagation of mandatory/runnable state
//! - Transition graph emission
//! - A polling service computing a transition per input change

pub mod action;
pub mod allocate;
pub mod check;
pub mod constraints;
pub mod engine;
pub mod error;
pub mod fencing;
pub mod graph;
pub mod node;
pub mod notify;
pub mod ordering;
pub mod placement;
pub mod probe;
pub mod resource;
pub mod rules;
pub mod types;
pub mod unpack;
pub mod variant;
pub mod working_set;

// Re-export commonly used types
pub use allocate::schedule;
pub use engine::{EngineConfig, PolicyEngine};
pub use error::{PolicyError, Result};
pub use graph::{ActionKind, Synapse, TransitionGraph};
pub use types::{ActionId, NodeId, OrderType, RscId, VariantKind};
pub use working_set::WorkingSet;
