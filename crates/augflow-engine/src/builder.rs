//! Fluent builder for workflow definitions
//!
//! Provides a programmatic alternative to JSON workflow files, used
//! heavily by tests and embedding code.
//!
//! # Example
//!
//! ```ignore
//! let spec = WorkflowBuilder::new()
//!     .source("src", "coco", 1200)
//!     .next_to(&[("flip", 1.0)])
//!     .transform("flip", "flip", 0.5)
//!     .build();
//! ```

use crate::workflow::{NodeSpec, NodeType, WorkflowSpec};

/// Fluent builder for `WorkflowSpec`
///
/// `next_to` and the `with_*` methods configure the most recently
/// added node; a node without `next_to` becomes a sink.
pub struct WorkflowBuilder {
    nodes: Vec<NodeSpec>,
}

impl WorkflowBuilder {
    /// Create an empty builder
    pub fn new() -> Self {
        Self { nodes: Vec::new() }
    }

    /// Add a source node bound to a dataset
    pub fn source(
        mut self,
        id: impl Into<String>,
        dataset_id: impl Into<String>,
        total_item_count: u64,
    ) -> Self {
        self.nodes.push(NodeSpec {
            id: id.into(),
            node_type: NodeType::Source,
            next: Vec::new(),
            shares: Vec::new(),
            params: serde_json::json!({
                "dataset_id": dataset_id.into(),
                "total_item_count": total_item_count,
            }),
        });
        self
    }

    /// Add a transform node bound to an augmentation kind
    pub fn transform(
        mut self,
        id: impl Into<String>,
        kind: impl Into<String>,
        fire_probability: f64,
    ) -> Self {
        self.nodes.push(NodeSpec {
            id: id.into(),
            node_type: NodeType::Transform,
            next: Vec::new(),
            shares: Vec::new(),
            params: serde_json::json!({
                "kind": kind.into(),
                "fire_probability": fire_probability,
            }),
        });
        self
    }

    /// Set the weighted branches of the most recently added node
    pub fn next_to(mut self, branches: &[(&str, f64)]) -> Self {
        if let Some(node) = self.nodes.last_mut() {
            node.next = branches.iter().map(|(id, _)| (*id).to_owned()).collect();
            node.shares = branches.iter().map(|(_, share)| *share).collect();
        }
        self
    }

    /// Set per-branch filter ids on the most recently added source
    pub fn with_filters(mut self, filters: &[&str]) -> Self {
        if let Some(node) = self.nodes.last_mut() {
            if let Some(obj) = node.params.as_object_mut() {
                obj.insert(
                    "filters".to_owned(),
                    serde_json::json!(filters.iter().map(|f| (*f).to_owned()).collect::<Vec<_>>()),
                );
            }
        }
        self
    }

    /// Merge kind-specific parameters into the most recently added
    /// transform
    pub fn with_params(mut self, params: serde_json::Value) -> Self {
        if let Some(node) = self.nodes.last_mut() {
            if let (Some(obj), Some(extra)) = (node.params.as_object_mut(), params.as_object()) {
                for (key, value) in extra {
                    obj.insert(key.clone(), value.clone());
                }
            }
        }
        self
    }

    /// Build the workflow definition
    pub fn build(self) -> WorkflowSpec {
        WorkflowSpec { nodes: self.nodes }
    }
}

impl Default for WorkflowBuilder {
    fn default() -> Self {
        Self::new()
    }
}
