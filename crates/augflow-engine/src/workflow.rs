//! Workflow definition types
//!
//! These serde types mirror the workflow-file node records consumed
//! by the compiler: each node carries an id, a category, an ordered
//! next list with one positive share per branch, and category-
//! specific parameters. Parsing is shape-only; all semantic checks
//! (share sums, dangling references, sink presence) happen during
//! compilation.

use serde::{Deserialize, Serialize};

/// Unique identifier of a declared node
pub type NodeId = String;

/// Category of a declared node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    /// Binds to a dataset; graph entry point
    Source,
    /// Binds to a named augmentation
    Transform,
}

/// One raw node record of a workflow definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSpec {
    /// Unique node id
    pub id: NodeId,
    /// Node category
    #[serde(rename = "type")]
    pub node_type: NodeType,
    /// Downstream node ids, one per branch; empty marks a sink
    #[serde(default)]
    pub next: Vec<NodeId>,
    /// Positive probability weight per branch, same length as `next`
    #[serde(default)]
    pub shares: Vec<f64>,
    /// Category-specific parameters
    #[serde(default)]
    pub params: serde_json::Value,
}

/// Source-specific parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceParams {
    /// Dataset referenced by this source
    pub dataset_id: String,
    /// Total item count of the referenced dataset; drives how often
    /// this source is sampled relative to others
    pub total_item_count: u64,
    /// Optional per-branch filter ids; length must equal the branch
    /// count when present
    #[serde(default)]
    pub filters: Option<Vec<String>>,
}

/// Transform-specific parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformParams {
    /// Augmentation kind, resolved against the registry
    pub kind: String,
    /// Probability the transform fires instead of passing through
    #[serde(default = "default_fire_probability")]
    pub fire_probability: f64,
    /// Kind-specific parameters forwarded to the factory
    #[serde(flatten)]
    pub params: serde_json::Value,
}

fn default_fire_probability() -> f64 {
    1.0
}

/// A complete workflow definition
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowSpec {
    pub nodes: Vec<NodeSpec>,
}

impl WorkflowSpec {
    /// Parse a workflow definition from a JSON string
    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Parse a workflow definition from a JSON value
    pub fn from_json(value: serde_json::Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }

    /// Find a node by id
    pub fn find_node(&self, id: &str) -> Option<&NodeSpec> {
        self.nodes.iter().find(|n| n.id == id)
    }
}
