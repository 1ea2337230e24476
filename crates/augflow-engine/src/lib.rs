//! Declarative augmentation workflow engine
//!
//! A workflow is declared as a list of nodes (sources bound to
//! datasets, transforms bound to registered augmentation kinds) with
//! weighted branches between them. The engine compiles that
//! declaration into an immutable operator graph — expanding branches,
//! merging structurally identical transform instances, annotating
//! every operator with its reach probability — and then serves
//! fetches: each fetch samples one weighted sink-to-source path,
//! pulls the required dataset items, and pushes them through the
//! path's operators, synchronizing confluent operators on their full
//! input batch.
//!
//! Typical embedding:
//!
//! ```ignore
//! let spec = WorkflowSpec::from_json_str(&workflow_json)?;
//! let agent = Agent::with_seed(&spec, &registry, datasets, 42)?;
//! let sample = agent.fetch()?;
//! ```

pub mod agent;
pub mod builder;
pub mod error;
pub mod executor;
pub mod graph;
pub mod path;
pub mod workflow;

#[cfg(test)]
mod test_support;

pub use agent::Agent;
pub use builder::WorkflowBuilder;
pub use error::{ConfigError, FetchError};
pub use executor::Executor;
pub use graph::{compile, CompiledGraph, OpId, OpKind, Operator, SourceOp, TransformOp};
pub use path::{sample, ExecutionPath};
pub use workflow::{NodeId, NodeSpec, NodeType, SourceParams, TransformParams, WorkflowSpec};
